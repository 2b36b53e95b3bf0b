// # Clock Trait
//
// Wall-clock abstraction for the engine's due-time arithmetic.
//
// Every call site that needs "now" goes through this trait so that the
// test suite can drive rotations deterministically. Production code uses
// `SystemClock`; tests inject a manually advanced clock.

use chrono::{DateTime, Utc};

/// Time source consumed by the engine and the job evaluator
pub trait Clock: Send + Sync {
    /// Current wall-clock time
    fn now(&self) -> DateTime<Utc>;

    /// Current time as Unix epoch seconds (the persisted representation)
    fn epoch_secs(&self) -> i64 {
        self.now().timestamp()
    }
}

/// Production clock backed by the system time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
