//! Inbound response envelopes.

use serde::{Deserialize, Serialize};

use crate::body::{ExceptionDetail, ResponseBody};
use crate::errors::Result;
use crate::message::ClientTag;

/// Wire status of form `"NNN text"`, split into numeric code and text.
///
/// A value with no parseable numeric prefix keeps `code == None` and is
/// never successful.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct StatusCode {
    /// Numeric class, e.g. 200 or 404. `None` when unparseable.
    pub code: Option<u16>,
    /// Status text, e.g. `"OK"` or `"Not Found"`.
    pub message: String,
}

impl StatusCode {
    /// Success is defined as `200 <= code < 300`.
    pub fn is_successful(&self) -> bool {
        self.code.is_some_and(|code| (200..300).contains(&code))
    }
}

impl From<String> for StatusCode {
    fn from(raw: String) -> Self {
        let trimmed = raw.trim();
        match trimmed.split_once(' ') {
            Some((prefix, rest)) => match prefix.parse::<u16>() {
                Ok(code) => Self { code: Some(code), message: rest.trim().to_string() },
                Err(_) => Self { code: None, message: trimmed.to_string() },
            },
            None => match trimmed.parse::<u16>() {
                Ok(code) => Self { code: Some(code), message: String::new() },
                Err(_) => Self { code: None, message: trimmed.to_string() },
            },
        }
    }
}

impl From<StatusCode> for String {
    fn from(status: StatusCode) -> Self {
        match status.code {
            Some(code) if status.message.is_empty() => code.to_string(),
            Some(code) => format!("{code} {}", status.message),
            None => status.message,
        }
    }
}

/// Header of an inbound response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResponseHeader {
    /// Status of the operation this frame answers, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<StatusCode>,

    /// Type-name tag for the body payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_body_type: Option<String>,

    /// Echo of the request tag. Absent on unsolicited frames.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_tag: Option<ClientTag>,
}

/// Raw wire shape of a response, before body typing.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawResponse {
    header: ResponseHeader,
    #[serde(default)]
    body: Option<serde_json::Value>,
}

/// One decoded inbound envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// Status, body type tag and correlation tag.
    pub header: ResponseHeader,
    /// Decoded body. `None` when the frame carried no payload.
    pub body: Option<ResponseBody>,
}

impl Response {
    /// Decode one complete wire line.
    pub fn from_line(line: &str) -> Result<Self> {
        let raw: RawResponse = serde_json::from_str(line)?;
        let body = raw
            .body
            .and_then(|value| ResponseBody::decode(raw.header.message_body_type.as_deref(), value));
        Ok(Self { header: raw.header, body })
    }

    /// Whether the status code is present and in the 2xx class.
    pub fn is_successful(&self) -> bool {
        self.header.status_code.as_ref().is_some_and(StatusCode::is_successful)
    }

    /// Build a synthetic exception-bodied response for a request that
    /// failed locally, so callers handle every failure mode through the
    /// same body shape.
    pub fn exception(tag: ClientTag, message: impl Into<String>) -> Self {
        Self {
            header: ResponseHeader {
                status_code: None,
                message_body_type: Some("ExceptionDetail".to_string()),
                client_tag: Some(tag),
            },
            body: Some(ResponseBody::Exception(ExceptionDetail { message: message.into() })),
        }
    }

    /// Exception message carried by this response, if the body is
    /// exception-shaped.
    pub fn exception_message(&self) -> Option<&str> {
        match &self.body {
            Some(ResponseBody::Exception(detail)) => Some(&detail.message),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_ok_parses() {
        let status = StatusCode::from("200 OK".to_string());
        assert_eq!(status.code, Some(200));
        assert_eq!(status.message, "OK");
        assert!(status.is_successful());
    }

    #[test]
    fn status_not_found_is_unsuccessful() {
        let status = StatusCode::from("404 Not Found".to_string());
        assert_eq!(status.code, Some(404));
        assert_eq!(status.message, "Not Found");
        assert!(!status.is_successful());
    }

    #[test]
    fn status_without_numeric_prefix_has_no_code() {
        let status = StatusCode::from("No Content".to_string());
        assert_eq!(status.code, None);
        assert!(!status.is_successful());
    }

    #[test]
    fn bare_numeric_status_parses() {
        let status = StatusCode::from("204".to_string());
        assert_eq!(status.code, Some(204));
        assert!(status.is_successful());
    }

    #[test]
    fn response_decodes_header_and_tag() {
        let line = r#"{"Header":{"StatusCode":"200 OK","MessageBodyType":"ExceptionDetail","ClientTag":"abc"},"Body":{"ExceptionDetail":{"Message":"boom"}}}"#;
        let response = Response::from_line(line).unwrap();

        assert!(response.is_successful());
        assert_eq!(response.header.client_tag.as_ref().map(ClientTag::as_str), Some("abc"));
        assert_eq!(response.exception_message(), Some("boom"));
    }

    #[test]
    fn empty_body_decodes_to_none() {
        let line = r#"{"Header":{"StatusCode":"204 NoContent"}}"#;
        let response = Response::from_line(line).unwrap();
        assert!(response.body.is_none());
    }

    #[test]
    fn synthetic_exception_carries_message() {
        let response = Response::exception(ClientTag::from("t".to_string()), "Request timeout");
        assert!(!response.is_successful());
        assert_eq!(response.exception_message(), Some("Request timeout"));
    }
}
