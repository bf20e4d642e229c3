//! Lumen client core logic
//!
//! Pure state machine logic for the Lumen protocol, completely decoupled
//! from I/O. Time is passed as a parameter to every method that needs
//! it, so the same code runs under production tokio timers and under
//! deterministic tests with virtual instants.
//!
//! # Components
//!
//! - [`gesture`]: Per-button finite state machine converting raw
//!   press/release edges into classified gestures

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod gesture;

pub use gesture::{Gesture, GestureConfig, GestureDetector, GestureState};
