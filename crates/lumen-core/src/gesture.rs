//! Button gesture classification.
//!
//! A [`GestureDetector`] owns the state for exactly one physical button
//! and turns raw press/release edges into semantic gestures. Input is
//! strictly serial: one edge at a time, always for the same button.
//!
//! # State Machine
//!
//! ```text
//!           Press                Release
//! ┌──────┐ ───────> ┌──────┐ ──────────> ┌──────┐
//! │ Idle │          │ Down │             │  Up  │
//! └──────┘ <─────── └──────┘ <────────── └──────┘
//!            long-press        second Press → DoublePress
//!            expiry → LongPress
//!            double-click expiry → Press
//! ```
//!
//! Timer-driven transitions use a single owned deadline slot, cleared on
//! every transition. The owner arms a real timer from [`deadline`] and
//! calls [`tick`] when it fires; tests drive expiry with virtual
//! instants.
//!
//! Unexpected edges never error: they are treated as implicit resets.
//!
//! [`deadline`]: GestureDetector::deadline
//! [`tick`]: GestureDetector::tick

use std::time::{Duration, Instant};

use lumen_proto::ButtonEdge;

/// Grace period added to the double-click window for raise/lower-style
/// controls, which are operated more slowly than plain buttons.
const RAISE_LOWER_GRACE: Duration = Duration::from_millis(250);

/// A classified button interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gesture {
    /// Single press and release.
    Press,
    /// Two presses within the double-click window.
    DoublePress,
    /// Press held past the long-press window.
    LongPress,
}

/// Detector state for one button.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GestureState {
    /// No interaction in progress.
    Idle,
    /// Button is down, long-press deadline may be pending.
    Down,
    /// Button released, double-click deadline may be pending.
    Up,
}

/// Per-button-class timing configuration.
#[derive(Debug, Clone, Copy)]
pub struct GestureConfig {
    /// Long-press window. Zero disables Down tracking entirely: a press
    /// emits [`Gesture::Press`] immediately.
    pub click_speed: Duration,
    /// Double-press window. Zero disables double-press detection.
    pub double_click_speed: Duration,
    /// Extends the double-press window by a fixed grace period for
    /// raise/lower controls.
    pub raise_lower: bool,
}

impl Default for GestureConfig {
    fn default() -> Self {
        Self {
            click_speed: Duration::from_millis(300),
            double_click_speed: Duration::from_millis(300),
            raise_lower: false,
        }
    }
}

impl GestureConfig {
    fn double_click_window(&self) -> Duration {
        if self.raise_lower {
            self.double_click_speed + RAISE_LOWER_GRACE
        } else {
            self.double_click_speed
        }
    }
}

/// Per-button gesture state machine.
///
/// Never panics and never returns errors; every input produces at most
/// one emitted gesture.
#[derive(Debug, Clone)]
pub struct GestureDetector {
    state: GestureState,
    config: GestureConfig,
    // Single owned timer slot, cleared on every transition.
    deadline: Option<Instant>,
}

impl GestureDetector {
    /// Create a detector in `Idle` with the given timing class.
    pub fn new(config: GestureConfig) -> Self {
        Self { state: GestureState::Idle, config, deadline: None }
    }

    /// Current state.
    pub fn state(&self) -> GestureState {
        self.state
    }

    /// Pending deadline, if a timer-driven transition is armed. The
    /// owner schedules a wakeup for this instant and calls [`tick`].
    ///
    /// [`tick`]: Self::tick
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Process one raw edge.
    pub fn handle_edge(&mut self, edge: ButtonEdge, now: Instant) -> Option<Gesture> {
        match (self.state, edge) {
            (GestureState::Idle, ButtonEdge::Press) => {
                if self.config.click_speed.is_zero() {
                    // No long-press tracking for this button class; the
                    // press is the whole gesture.
                    self.reset();
                    return Some(Gesture::Press);
                }
                self.state = GestureState::Down;
                self.deadline = Some(now + self.config.click_speed);
                None
            }
            (GestureState::Down, ButtonEdge::Release) => {
                self.state = GestureState::Up;
                if self.config.double_click_speed.is_zero() {
                    self.deadline = None;
                } else {
                    self.deadline = Some(now + self.config.double_click_window());
                }
                None
            }
            (GestureState::Up, ButtonEdge::Press) if self.deadline.is_some() => {
                self.reset();
                Some(Gesture::DoublePress)
            }
            (state, edge) => {
                // Stale or spurious edge; treated as an implicit reset.
                tracing::trace!(?state, ?edge, "unexpected edge, resetting");
                self.reset();
                None
            }
        }
    }

    /// Drive deadline expiry. Emits at most one gesture when the armed
    /// deadline has passed; otherwise a no-op.
    pub fn tick(&mut self, now: Instant) -> Option<Gesture> {
        let deadline = self.deadline?;
        if now < deadline {
            return None;
        }

        let expired = self.state;
        self.reset();
        match expired {
            // Held past the long-press window with no release.
            GestureState::Down => Some(Gesture::LongPress),
            // Double-click window lapsed with no second press.
            GestureState::Up => Some(Gesture::Press),
            GestureState::Idle => None,
        }
    }

    /// Cancel any pending deadline and force `Idle`.
    pub fn reset(&mut self) {
        self.state = GestureState::Idle;
        self.deadline = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn config(click_ms: u64, double_ms: u64) -> GestureConfig {
        GestureConfig {
            click_speed: Duration::from_millis(click_ms),
            double_click_speed: Duration::from_millis(double_ms),
            raise_lower: false,
        }
    }

    fn at(t0: Instant, ms: u64) -> Instant {
        t0 + Duration::from_millis(ms)
    }

    #[test]
    fn single_click_emits_one_press_after_window() {
        let t0 = Instant::now();
        let mut detector = GestureDetector::new(config(50, 50));

        assert_eq!(detector.handle_edge(ButtonEdge::Press, t0), None);
        assert_eq!(detector.handle_edge(ButtonEdge::Release, at(t0, 10)), None);
        assert_eq!(detector.state(), GestureState::Up);

        // Nothing before the double-click window lapses.
        assert_eq!(detector.tick(at(t0, 40)), None);
        assert_eq!(detector.tick(at(t0, 100)), Some(Gesture::Press));
        assert_eq!(detector.state(), GestureState::Idle);

        // No further emissions.
        assert_eq!(detector.tick(at(t0, 200)), None);
    }

    #[test]
    fn double_click_emits_exactly_one_double_press() {
        let t0 = Instant::now();
        let mut detector = GestureDetector::new(config(200, 200));

        assert_eq!(detector.handle_edge(ButtonEdge::Press, t0), None);
        assert_eq!(detector.handle_edge(ButtonEdge::Release, at(t0, 20)), None);
        assert_eq!(
            detector.handle_edge(ButtonEdge::Press, at(t0, 100)),
            Some(Gesture::DoublePress)
        );
        assert_eq!(detector.state(), GestureState::Idle);
        assert_eq!(detector.deadline(), None);

        // The trailing release of the second click is stale, not an event.
        assert_eq!(detector.handle_edge(ButtonEdge::Release, at(t0, 120)), None);
        assert_eq!(detector.tick(at(t0, 500)), None);
    }

    #[test]
    fn held_press_emits_long_press() {
        let t0 = Instant::now();
        let mut detector = GestureDetector::new(config(100, 100));

        assert_eq!(detector.handle_edge(ButtonEdge::Press, t0), None);
        assert_eq!(detector.state(), GestureState::Down);

        assert_eq!(detector.tick(at(t0, 99)), None);
        assert_eq!(detector.tick(at(t0, 101)), Some(Gesture::LongPress));
        assert_eq!(detector.state(), GestureState::Idle);

        // The eventual release is stale.
        assert_eq!(detector.handle_edge(ButtonEdge::Release, at(t0, 300)), None);
    }

    #[test]
    fn zero_click_speed_emits_press_immediately() {
        let t0 = Instant::now();
        let mut detector = GestureDetector::new(config(0, 100));

        assert_eq!(detector.handle_edge(ButtonEdge::Press, t0), Some(Gesture::Press));
        assert_eq!(detector.state(), GestureState::Idle);
        assert_eq!(detector.deadline(), None);
    }

    #[test]
    fn zero_double_click_speed_arms_no_timer_after_release() {
        let t0 = Instant::now();
        let mut detector = GestureDetector::new(config(100, 0));

        detector.handle_edge(ButtonEdge::Press, t0);
        assert_eq!(detector.handle_edge(ButtonEdge::Release, at(t0, 10)), None);
        assert_eq!(detector.state(), GestureState::Up);
        assert_eq!(detector.deadline(), None);

        // No timer was armed, so the double-press branch is unreachable:
        // a new press is a plain reset.
        assert_eq!(detector.handle_edge(ButtonEdge::Press, at(t0, 50)), None);
        assert_eq!(detector.state(), GestureState::Idle);
        assert_eq!(detector.tick(at(t0, 1000)), None);
    }

    #[test]
    fn raise_lower_extends_double_click_window() {
        let t0 = Instant::now();
        let mut detector = GestureDetector::new(GestureConfig {
            click_speed: Duration::from_millis(100),
            double_click_speed: Duration::from_millis(100),
            raise_lower: true,
        });

        detector.handle_edge(ButtonEdge::Press, t0);
        detector.handle_edge(ButtonEdge::Release, at(t0, 10));

        // Plain window would have lapsed at 110ms; grace keeps it armed.
        assert_eq!(detector.tick(at(t0, 200)), None);
        assert_eq!(detector.tick(at(t0, 361)), Some(Gesture::Press));
    }

    #[test]
    fn spurious_press_while_down_resets() {
        let t0 = Instant::now();
        let mut detector = GestureDetector::new(config(100, 100));

        detector.handle_edge(ButtonEdge::Press, t0);
        assert_eq!(detector.handle_edge(ButtonEdge::Press, at(t0, 10)), None);
        assert_eq!(detector.state(), GestureState::Idle);
        assert_eq!(detector.deadline(), None);
    }

    #[test]
    fn reset_cancels_pending_deadline() {
        let t0 = Instant::now();
        let mut detector = GestureDetector::new(config(100, 100));

        detector.handle_edge(ButtonEdge::Press, t0);
        assert!(detector.deadline().is_some());

        detector.reset();
        assert_eq!(detector.state(), GestureState::Idle);
        assert_eq!(detector.tick(at(t0, 1000)), None);
    }

    proptest! {
        /// Arbitrary edge/tick interleavings never panic, and the
        /// deadline slot is empty whenever the detector is idle.
        #[test]
        fn arbitrary_input_upholds_invariants(
            inputs in proptest::collection::vec((0u8..3, 0u64..500), 0..64),
        ) {
            let t0 = Instant::now();
            let mut detector = GestureDetector::new(config(50, 50));
            let mut elapsed = 0;

            for (kind, advance) in inputs {
                elapsed += advance;
                let now = t0 + Duration::from_millis(elapsed);
                match kind {
                    0 => { detector.handle_edge(ButtonEdge::Press, now); }
                    1 => { detector.handle_edge(ButtonEdge::Release, now); }
                    _ => { detector.tick(now); }
                }

                if detector.state() == GestureState::Idle {
                    prop_assert_eq!(detector.deadline(), None);
                }
            }
        }
    }
}
