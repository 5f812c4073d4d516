//
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::{Error, Result};

// Sleeps are cut into slices this long so a cancel is noticed quickly.
const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// How often and how long to poll the ACME API for a status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Wait between attempts.
    pub interval: Duration,
    /// Attempts before giving up with [`Error::Timeout`].
    ///
    /// [`Error::Timeout`]: enum.Error.html#variant.Timeout
    pub max_attempts: u32,
}

impl PollPolicy {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        PollPolicy {
            interval,
            max_attempts,
        }
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        PollPolicy::new(Duration::from_secs(1), 60)
    }
}

/// Cancellation of a running authorization, by hand or by deadline.
///
/// Clones share the flag, so one clone can be handed to another thread
/// to cancel with.
#[derive(Debug, Clone, Default)]
pub struct Cancel {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl Cancel {
    /// Never fires unless [`cancel`](#method.cancel) is called.
    pub fn new() -> Self {
        Cancel::default()
    }

    /// Fires `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Cancel::with_deadline(Instant::now() + timeout)
    }

    /// Fires at `deadline`.
    pub fn with_deadline(deadline: Instant) -> Self {
        Cancel {
            flag: Arc::new(AtomicBool::new(false)),
            deadline: Some(deadline),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst) || self.deadline.map(|d| Instant::now() >= d).unwrap_or(false)
    }

    pub(crate) fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sleep for `dur`, or less if cancelled meanwhile.
    pub(crate) fn sleep(&self, dur: Duration) -> Result<()> {
        let until = Instant::now() + dur;
        loop {
            self.check()?;
            let now = Instant::now();
            if now >= until {
                return Ok(());
            }
            thread::sleep((until - now).min(SLEEP_SLICE));
        }
    }
}

/// One polling attempt.
pub(crate) enum Poll<T> {
    Ready(T),
    Pending,
}

/// Run `attempt` until it is ready, fails, or the policy runs out.
///
/// Transient errors (no response, server errors) use up an attempt and are
/// tried again. `what` names the thing waited for in the timeout error.
pub(crate) fn poll_until<T, F>(policy: &PollPolicy, cancel: &Cancel, what: &str, mut attempt: F) -> Result<T>
where
    F: FnMut() -> Result<Poll<T>>,
{
    for n in 0..policy.max_attempts {
        if n > 0 {
            cancel.sleep(policy.interval)?;
        } else {
            cancel.check()?;
        }
        match attempt() {
            Ok(Poll::Ready(t)) => return Ok(t),
            Ok(Poll::Pending) => trace!("Still waiting for {} ({})", what, n + 1),
            Err(e) if e.is_transient() => debug!("Retry {} after: {}", what, e),
            Err(e) => return Err(e),
        }
    }
    Err(Error::Timeout(what.to_string()))
}
