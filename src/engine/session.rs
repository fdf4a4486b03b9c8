//! Window bookkeeping for one measured process.

use std::time::Duration;

/// Where a session is in its lifetime.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Not started yet.
    Idle,
    /// Running windows whose scores are discarded.
    WarmingUp,
    /// Running windows whose scores are kept.
    Measuring,
    /// Every window has elapsed.
    Done,
}

/// A window that just closed.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Window {
    /// A discarded window. `index` counts from zero among warmup windows.
    Warmup {
        /// Zero-based window index.
        index: u32,
        /// Nanoseconds per operation.
        score: f64,
    },
    /// A kept window. `index` counts from zero among measurement windows.
    Measurement {
        /// Zero-based window index.
        index: u32,
        /// Nanoseconds per operation.
        score: f64,
    },
}

impl Window {
    /// Nanoseconds per operation.
    #[must_use]
    pub fn score(&self) -> f64 {
        match self {
            Window::Warmup { score, .. } | Window::Measurement { score, .. } => *score,
        }
    }
}

/// Counts operations in fixed wall-clock windows and turns each window into a score.
///
/// Timestamps are nanoseconds from an arbitrary origin, as produced by an [`super::Clock`].
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use mch::engine::session::{IterationSession, Window};
///
/// let mut session = IterationSession::new(0, 2, Duration::from_nanos(100));
/// session.begin(0);
/// session.record_operation();
/// session.record_operation();
/// assert_eq!(session.poll(99), None);
/// assert_eq!(session.poll(100), Some(Window::Measurement { index: 0, score: 50.0 }));
/// ```
#[derive(Clone, Debug)]
pub struct IterationSession {
    warmup_iterations: u32,
    measurement_iterations: u32,
    window: u64,
    window_start: Option<u64>,
    iteration_index: u32,
    operation_count: u64,
    scores: Vec<f64>,
}

impl IterationSession {
    /// A session of `warmup_iterations` discarded windows followed by `measurement_iterations` kept ones.
    #[must_use]
    pub fn new(warmup_iterations: u32, measurement_iterations: u32, window: Duration) -> Self {
        Self {
            warmup_iterations,
            measurement_iterations,
            window: u64::try_from(window.as_nanos()).unwrap_or(u64::MAX),
            window_start: None,
            iteration_index: 0,
            operation_count: 0,
            scores: Vec::with_capacity(measurement_iterations as usize),
        }
    }

    /// Opens the first window at `now`. Does nothing if the session already started.
    pub fn begin(&mut self, now: u64) {
        if self.window_start.is_none() {
            self.window_start = Some(now);
        }
    }

    /// Restarts the clock of the current window without touching its operation count, so time spent in hooks
    /// between windows is not charged to the next one.
    pub fn begin_window(&mut self, now: u64) {
        if self.window_start.is_some() && !self.is_done() {
            self.window_start = Some(now);
        }
    }

    /// Counts one completed operation in the current window.
    pub fn record_operation(&mut self) {
        self.operation_count += 1;
    }

    /// Nanoseconds spent in the current window so far.
    #[must_use]
    pub fn window_elapsed(&self, now: u64) -> u64 {
        self.window_start.map_or(0, |start| now.saturating_sub(start))
    }

    /// Closes the current window if it has lasted at least the window length.
    ///
    /// On a boundary the score is recorded (measurement windows only), the operation count resets and the next window
    /// opens at `now`. After the final window the session is done and polling returns `None`.
    #[allow(clippy::cast_precision_loss)]
    pub fn poll(&mut self, now: u64) -> Option<Window> {
        if self.is_done() {
            return None;
        }
        let elapsed = self.window_start.map(|start| now.saturating_sub(start))?;
        if elapsed < self.window {
            return None;
        }

        let score = elapsed as f64 / self.operation_count.max(1) as f64;
        let window = if self.iteration_index < self.warmup_iterations {
            Window::Warmup {
                index: self.iteration_index,
                score,
            }
        } else {
            self.scores.push(score);
            Window::Measurement {
                index: self.iteration_index - self.warmup_iterations,
                score,
            }
        };

        self.iteration_index += 1;
        self.operation_count = 0;
        self.window_start = Some(now);
        Some(window)
    }

    /// Which part of the session is current.
    #[must_use]
    pub fn phase(&self) -> Phase {
        if self.window_start.is_none() {
            Phase::Idle
        } else if self.is_done() {
            Phase::Done
        } else if self.iteration_index < self.warmup_iterations {
            Phase::WarmingUp
        } else {
            Phase::Measuring
        }
    }

    /// Whether every window has elapsed.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.iteration_index >= self.warmup_iterations + self.measurement_iterations
    }

    /// Zero-based index of the current window across warmup and measurement.
    #[must_use]
    pub fn iteration_index(&self) -> u32 {
        self.iteration_index
    }

    /// Operations counted in the current window.
    #[must_use]
    pub fn operation_count(&self) -> u64 {
        self.operation_count
    }

    /// Scores of the measurement windows closed so far.
    #[must_use]
    pub fn scores(&self) -> &[f64] {
        &self.scores
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECOND: u64 = 1_000_000_000;

    #[test]
    fn three_windows_yield_two_scores_and_finish_on_the_third() {
        let mut session = IterationSession::new(1, 2, Duration::from_secs(1));
        assert_eq!(session.phase(), Phase::Idle);
        session.begin(0);
        assert_eq!(session.phase(), Phase::WarmingUp);

        let mut now = 0;
        let mut boundaries = 0;
        while !session.is_done() {
            now += SECOND / 4;
            session.record_operation();
            if let Some(window) = session.poll(now) {
                boundaries += 1;
                assert_eq!(window.score(), 2.5e8);
                if boundaries < 3 {
                    assert!(!session.is_done());
                }
            }
        }

        assert_eq!(boundaries, 3);
        assert_eq!(now, 3 * SECOND);
        assert_eq!(session.phase(), Phase::Done);
        assert_eq!(session.scores().len(), 2);
        assert_eq!(session.poll(now + 10 * SECOND), None);
    }

    #[test]
    fn windows_are_classified_in_order() {
        let mut session = IterationSession::new(2, 2, Duration::from_nanos(10));
        session.begin(0);
        session.record_operation();
        assert!(matches!(session.poll(10), Some(Window::Warmup { index: 0, .. })));
        session.record_operation();
        assert!(matches!(session.poll(20), Some(Window::Warmup { index: 1, .. })));
        assert_eq!(session.phase(), Phase::Measuring);
        session.record_operation();
        assert!(matches!(session.poll(30), Some(Window::Measurement { index: 0, .. })));
        session.record_operation();
        assert!(matches!(session.poll(40), Some(Window::Measurement { index: 1, .. })));
        assert!(session.is_done());
    }

    #[test]
    fn boundary_requires_a_full_window_and_resets_the_count() {
        let mut session = IterationSession::new(0, 2, Duration::from_nanos(100));
        session.begin(1_000);
        for _ in 0..4 {
            session.record_operation();
        }
        assert_eq!(session.poll(1_099), None);
        assert_eq!(session.operation_count(), 4);
        assert_eq!(
            session.poll(1_200),
            Some(Window::Measurement {
                index: 0,
                score: 50.0
            })
        );
        assert_eq!(session.operation_count(), 0);
        assert_eq!(session.window_elapsed(1_250), 50);
    }

    #[test]
    fn begin_window_excludes_hook_time() {
        let mut session = IterationSession::new(0, 2, Duration::from_nanos(100));
        session.begin(0);
        session.record_operation();
        assert!(session.poll(100).is_some());
        session.begin_window(150);
        session.record_operation();
        assert_eq!(session.poll(220), None);
        assert_eq!(
            session.poll(250),
            Some(Window::Measurement {
                index: 1,
                score: 100.0
            })
        );
    }

    #[test]
    fn unstarted_session_never_closes_a_window() {
        let mut session = IterationSession::new(0, 2, Duration::from_nanos(1));
        session.record_operation();
        assert_eq!(session.poll(u64::MAX), None);
        assert_eq!(session.window_elapsed(5), 0);
    }
}
