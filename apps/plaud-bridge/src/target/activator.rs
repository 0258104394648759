use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use super::{DebugListing, ProcessHandle};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Delivers the out-of-band activation signal.
pub trait Signaler: Send + Sync {
    fn signal(&self, pid: u32) -> io::Result<()>;
}

/// `SIGUSR1`, which makes a Node/Electron runtime open its inspector.
#[derive(Debug, Clone, Copy, Default)]
pub struct UserSignal;

impl Signaler for UserSignal {
    #[cfg(unix)]
    fn signal(&self, pid: u32) -> io::Result<()> {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let pid = i32::try_from(pid)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
        kill(Pid::from_raw(pid), Signal::SIGUSR1).map_err(io::Error::from)
    }

    #[cfg(not(unix))]
    fn signal(&self, _pid: u32) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "debug channel activation requires a unix signal",
        ))
    }
}

pub struct ChannelActivator {
    signaler: Arc<dyn Signaler>,
    listing: DebugListing,
    wait: Duration,
    poll_interval: Duration,
}

impl ChannelActivator {
    pub fn new(signaler: Arc<dyn Signaler>, listing: DebugListing, wait: Duration) -> Self {
        Self {
            signaler,
            listing,
            wait,
            poll_interval: POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Signals the process and waits until the listing shows a connectable target.
    /// Safe to call when the channel is already open.
    pub async fn ensure_open(&self, handle: &ProcessHandle) -> bool {
        if let Err(err) = self.signaler.signal(handle.pid) {
            warn!(pid = handle.pid, error = %err, "failed to signal target process");
            return false;
        }
        debug!(pid = handle.pid, "sent debug activation signal");

        let deadline = Instant::now() + self.wait;
        loop {
            match self.listing.first_debugger_url().await {
                Ok(Some(_)) => {
                    debug!(pid = handle.pid, "debug channel is listening");
                    return true;
                }
                Ok(None) => debug!("debug listing has no targets yet"),
                Err(err) => debug!(error = %err, "debug listing not reachable yet"),
            }
            let now = Instant::now();
            if now >= deadline {
                warn!(
                    pid = handle.pid,
                    port = self.listing.endpoint().port,
                    "debug channel did not open in time"
                );
                return false;
            }
            sleep(self.poll_interval.min(deadline - now)).await;
        }
    }
}
