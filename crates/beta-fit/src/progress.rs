//! Per-prototype progress for batch runs.
//!
//! ```
//! use beta_fit::progress::{Progress, ProgressCallback};
//!
//! let callback: ProgressCallback = Box::new(|p| {
//!     eprintln!("[{}/{}] {} failures={}", p.completed, p.total, p.prototype_id, p.failures);
//!     p.failures < 5
//! });
//! assert!(callback(&Progress::new(1, 4, "p0000")));
//! ```

use std::time::Duration;

/// Snapshot taken after a prototype has been fitted or reused.
#[derive(Debug, Clone)]
pub struct Progress {
    /// Prototypes finished so far, including this one.
    pub completed: usize,
    pub total: usize,
    /// Id of the prototype that just finished.
    pub prototype_id: String,
    /// Whether that prototype's fit succeeded.
    pub success: bool,
    /// Failed prototypes so far.
    pub failures: usize,
    pub elapsed: Duration,
    /// Mean time per prototype times the prototypes left.
    pub estimated_remaining: Option<Duration>,
}

impl Progress {
    pub fn new(completed: usize, total: usize, prototype_id: impl Into<String>) -> Self {
        Self {
            completed,
            total,
            prototype_id: prototype_id.into(),
            success: true,
            failures: 0,
            elapsed: Duration::ZERO,
            estimated_remaining: None,
        }
    }

    pub fn with_outcome(mut self, success: bool, failures: usize) -> Self {
        self.success = success;
        self.failures = failures;
        self
    }

    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = elapsed;
        self.estimated_remaining = match self.completed {
            0 => None,
            n if n > self.total => None,
            n => Some(elapsed.mul_f64((self.total - n) as f64 / n as f64)),
        };
        self
    }

    /// Share of prototypes finished, in `[0, 1]`.
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        (self.completed as f64 / self.total as f64).min(1.0)
    }
}

/// Called after each prototype. Returning `false` stops the batch once the
/// current result is on disk.
pub type ProgressCallback = Box<dyn Fn(&Progress) -> bool + Send + Sync>;
