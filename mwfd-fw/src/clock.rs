use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Time source handed to the worker context so expiry logic is testable.
///
/// The system clock is the default; a manual clock only moves when the test
/// advances it.
#[derive(Debug, Clone)]
pub struct Clock {
    manual: Option<Arc<Mutex<Instant>>>,
}

impl Clock {
    pub fn system() -> Self {
        Self { manual: None }
    }

    /// A clock frozen at the current instant until `advance` is called.
    pub fn manual() -> Self {
        Self {
            manual: Some(Arc::new(Mutex::new(Instant::now()))),
        }
    }

    pub fn now(&self) -> Instant {
        match &self.manual {
            Some(frozen) => *frozen.lock().unwrap(),
            None => Instant::now(),
        }
    }

    /// Move a manual clock forward. Has no effect on the system clock.
    pub fn advance(&self, delta: Duration) {
        if let Some(frozen) = &self.manual {
            let mut now = frozen.lock().unwrap();
            *now += delta;
        }
    }

    pub fn is_manual(&self) -> bool {
        self.manual.is_some()
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::system()
    }
}
