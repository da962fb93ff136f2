//! Cancellation of one invocation.
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use log::{debug, warn};

use crate::sys;

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    next_id: AtomicU64,
    live: Mutex<HashMap<u64, u32>>,
}

/// Shared flag plus the registry of live child processes it terminates.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Mark the invocation cancelled and ask every live process to stop.
    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        let pids: Vec<u32> = match self.inner.live.lock() {
            Ok(live) => live.values().copied().collect(),
            Err(poisoned) => poisoned.into_inner().values().copied().collect(),
        };
        debug!("shell event=cancel live={}", pids.len());
        for pid in pids {
            terminate(pid);
        }
    }

    /// Track a spawned process. A process registered after cancellation is
    /// terminated right away.
    pub(crate) fn register(&self, pid: u32) -> u64 {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        match self.inner.live.lock() {
            Ok(mut live) => {
                live.insert(id, pid);
            }
            Err(poisoned) => {
                poisoned.into_inner().insert(id, pid);
            }
        }
        if self.is_cancelled() {
            terminate(pid);
        }
        id
    }

    pub(crate) fn unregister(&self, id: u64) {
        match self.inner.live.lock() {
            Ok(mut live) => {
                live.remove(&id);
            }
            Err(poisoned) => {
                poisoned.into_inner().remove(&id);
            }
        }
    }
}

fn terminate(pid: u32) {
    if let Err(err) = sys::terminate(pid) {
        warn!("shell event=terminate-failed pid={} error={}", pid, err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_is_shared_between_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[cfg(unix)]
    #[test]
    fn cancel_terminates_registered_process() {
        let mut child = std::process::Command::new("sleep").arg("30").spawn().unwrap();
        let token = CancelToken::new();
        let id = token.register(child.id());
        token.cancel();
        let status = child.wait().unwrap();
        token.unregister(id);
        assert!(!status.success());
    }
}
