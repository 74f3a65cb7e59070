//! Cooperative loop metering.
//!
//! The compiled template calls [`IterationBudget::tick`] at the top of every
//! loop body; once the running count exceeds the limit the call fails and the
//! render aborts.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use minijinja::{Error, ErrorKind};

#[derive(Debug, Clone)]
pub struct IterationBudget {
    max: usize,
    count: Arc<AtomicUsize>,
    tripped: Arc<AtomicBool>,
}

impl IterationBudget {
    pub fn new(max: usize) -> Self {
        Self {
            max,
            count: Arc::new(AtomicUsize::new(0)),
            tripped: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start of a render call.
    pub fn reset(&self) {
        self.count.store(0, Ordering::SeqCst);
        self.tripped.store(false, Ordering::SeqCst);
    }

    pub fn tick(&self) -> Result<(), Error> {
        let n = self.count.fetch_add(1, Ordering::SeqCst) + 1;
        if n > self.max {
            self.tripped.store(true, Ordering::SeqCst);
            return Err(Error::new(
                ErrorKind::InvalidOperation,
                format!("iteration budget of {} exceeded", self.max),
            ));
        }
        Ok(())
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub fn max(&self) -> usize {
        self.max
    }

    pub fn is_tripped(&self) -> bool {
        self.tripped.load(Ordering::SeqCst)
    }
}
