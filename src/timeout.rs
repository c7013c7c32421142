//! Timeouts for external dependencies
//!
//! Every store lock, transparency log request and signer subprocess is
//! bounded:
//! - `lock_seconds`: waiting for the ledger lock
//! - `transparency_seconds`: each transparency log HTTP request
//! - `signing_seconds`: the signer subprocess as a whole

use std::io;
use std::process::{Child, ExitStatus};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutConfig {
    pub lock_seconds: u64,
    pub transparency_seconds: u64,
    pub signing_seconds: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            lock_seconds: 10,
            transparency_seconds: 10,
            signing_seconds: 30,
        }
    }
}

impl TimeoutConfig {
    pub const MAX_LOCK_SECONDS: u64 = 300;
    pub const MAX_TRANSPARENCY_SECONDS: u64 = 120;
    pub const MAX_SIGNING_SECONDS: u64 = 600;

    pub fn validate(&self) -> Result<(), TimeoutValidationError> {
        if self.lock_seconds == 0 || self.lock_seconds > Self::MAX_LOCK_SECONDS {
            return Err(TimeoutValidationError::LockOutOfBounds {
                value: self.lock_seconds,
            });
        }
        if self.transparency_seconds == 0 || self.transparency_seconds > Self::MAX_TRANSPARENCY_SECONDS {
            return Err(TimeoutValidationError::TransparencyOutOfBounds {
                value: self.transparency_seconds,
            });
        }
        if self.signing_seconds == 0 || self.signing_seconds > Self::MAX_SIGNING_SECONDS {
            return Err(TimeoutValidationError::SigningOutOfBounds {
                value: self.signing_seconds,
            });
        }
        Ok(())
    }

    pub fn lock(&self) -> Duration {
        Duration::from_secs(self.lock_seconds)
    }

    pub fn transparency(&self) -> Duration {
        Duration::from_secs(self.transparency_seconds)
    }

    pub fn signing(&self) -> Duration {
        Duration::from_secs(self.signing_seconds)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TimeoutValidationError {
    #[error("storage.lock_timeout_seconds must be in (0, 300], got {value}")]
    LockOutOfBounds { value: u64 },

    #[error("transparency.timeout_seconds must be in (0, 120], got {value}")]
    TransparencyOutOfBounds { value: u64 },

    #[error("signing.timeout_seconds must be in (0, 600], got {value}")]
    SigningOutOfBounds { value: u64 },
}

/// Wait for a child process, killing it once `timeout` elapses.
///
/// Returns `Ok(None)` when the deadline passed.
pub fn wait_with_deadline(child: &mut Child, timeout: Duration) -> io::Result<Option<ExitStatus>> {
    let deadline = Instant::now() + timeout;
    let poll = Duration::from_millis(50);

    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        let now = Instant::now();
        if now >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Ok(None);
        }
        std::thread::sleep(poll.min(deadline - now));
    }
}
