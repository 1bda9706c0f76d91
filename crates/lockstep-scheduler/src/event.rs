//! A settable, waitable event.

use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// A one-shot flag that threads can wait on, in the shape the scheduler
/// needs for [`crate::schedule_event`] and the sleep functions.
pub struct TaskEvent {
    flag: Mutex<bool>,
    cond: Condvar,
}

impl TaskEvent {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            flag: Mutex::new(false),
            cond: Condvar::new(),
        })
    }

    /// Set the flag and wake all waiters.
    pub fn set(&self) {
        let mut flag = self.flag.lock().unwrap();
        *flag = true;
        self.cond.notify_all();
    }

    pub fn is_set(&self) -> bool {
        *self.flag.lock().unwrap()
    }

    /// Block until the flag is set.
    pub fn wait(&self) {
        let mut flag = self.flag.lock().unwrap();
        while !*flag {
            flag = self.cond.wait(flag).unwrap();
        }
    }

    /// Block until the flag is set or the timeout elapses. Returns whether
    /// the flag was set.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut flag = self.flag.lock().unwrap();
        if !*flag {
            let (guard, _) = self.cond.wait_timeout(flag, timeout).unwrap();
            flag = guard;
        }
        *flag
    }
}
