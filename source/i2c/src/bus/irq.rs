use std::{sync::Arc, time::Duration};

use parking_lot::{Condvar, Mutex};

/// A bus completion signal.
///
/// This is an auto-resetting event: [`signal`](Self::signal) wakes exactly one
/// waiter (or is remembered until the next wait), and a successful
/// [`wait`](Self::wait) consumes it. It starts out unsignaled.
///
/// `Irq` is a cheap handle; clones refer to the same event. The platform's
/// interrupt handler for the bus holds one clone and calls `signal`.
#[derive(Clone, Debug, Default)]
pub struct Irq {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    signaled: Mutex<bool>,
    cv: Condvar,
}

/// Returned by [`Irq::wait`] when the timeout elapsed first.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TimedOut;

impl Irq {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signal(&self) {
        let mut signaled = self.inner.signaled.lock();
        *signaled = true;
        self.inner.cv.notify_one();
    }

    /// Reset the event without waiting on it.
    pub fn clear(&self) {
        *self.inner.signaled.lock() = false;
    }

    /// Block until the event is signaled, consuming the signal.
    ///
    /// With `timeout == None`, this waits forever.
    pub fn wait(&self, timeout: Option<Duration>) -> Result<(), TimedOut> {
        let mut signaled = self.inner.signaled.lock();
        match timeout {
            None => {
                while !*signaled {
                    self.inner.cv.wait(&mut signaled);
                }
            }
            Some(timeout) => {
                // `wait_while_for` re-checks the flag across spurious wakeups
                let res = self
                    .inner
                    .cv
                    .wait_while_for(&mut signaled, |signaled| !*signaled, timeout);
                if res.timed_out() && !*signaled {
                    return Err(TimedOut);
                }
            }
        }
        *signaled = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn signal_is_remembered_once() {
        let irq = Irq::new();
        irq.signal();
        assert_eq!(irq.wait(Some(Duration::from_millis(1))), Ok(()));
        assert_eq!(irq.wait(Some(Duration::from_millis(1))), Err(TimedOut));
    }

    #[test]
    fn clear_discards_signal() {
        let irq = Irq::new();
        irq.signal();
        irq.clear();
        assert_eq!(irq.wait(Some(Duration::from_millis(1))), Err(TimedOut));
    }

    #[test]
    fn wakes_blocked_waiter() {
        let irq = Irq::new();
        let waiter = thread::spawn({
            let irq = irq.clone();
            move || irq.wait(None)
        });
        thread::sleep(Duration::from_millis(10));
        irq.signal();
        assert_eq!(waiter.join().unwrap(), Ok(()));
    }
}
