//! Ctrl+C / SIGTERM handling.
//!
//! The first signal is turned into a cooperative shutdown request: the main
//! task selects on [`InterruptHandler::interrupted`], drops the in-flight
//! work (which kills a running agent child) and removes the scratch
//! directory on its way out. A second signal forces an immediate exit after
//! removing the tracked scratch directory.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio::sync::watch;

use crate::runner::EXIT_FAILURE;
use crate::scratch::remove_scratch;

/// Shared interrupt state, cheap to clone.
#[derive(Debug, Clone)]
pub struct InterruptHandler {
    requested: Arc<watch::Sender<bool>>,
    scratch: Arc<Mutex<Option<PathBuf>>>,
}

impl Default for InterruptHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl InterruptHandler {
    pub fn new() -> Self {
        let (requested, _) = watch::channel(false);
        Self {
            requested: Arc::new(requested),
            scratch: Arc::new(Mutex::new(None)),
        }
    }

    /// Install the process-wide signal handler.
    ///
    /// Only one handler can be installed per process.
    pub fn install_handler(&self) -> io::Result<()> {
        let handler = self.clone();
        ctrlc::set_handler(move || {
            if handler.trigger_interrupt() {
                return;
            }
            if let Some(path) = handler.tracked_scratch() {
                remove_scratch(&path);
            }
            eprintln!(
                "[{}] pairloop: interrupted twice, exiting",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
            );
            std::process::exit(i32::from(EXIT_FAILURE));
        })
        .map_err(|e| io::Error::other(e.to_string()))
    }

    /// Record a shutdown request. Returns true for the first request.
    pub fn trigger_interrupt(&self) -> bool {
        !self.requested.send_replace(true)
    }

    /// Resolves once an interrupt has been requested, immediately if one
    /// already was.
    pub async fn interrupted(&self) {
        let mut rx = self.requested.subscribe();
        // the sender lives in `self`, so the channel cannot close here
        let _ = rx.wait_for(|requested| *requested).await;
    }

    /// Remember the scratch directory so a forced exit can remove it.
    pub fn track_scratch(&self, path: &Path) {
        if let Ok(mut slot) = self.scratch.lock() {
            *slot = Some(path.to_path_buf());
        }
    }

    pub fn untrack_scratch(&self) {
        if let Ok(mut slot) = self.scratch.lock() {
            *slot = None;
        }
    }

    fn tracked_scratch(&self) -> Option<PathBuf> {
        self.scratch.lock().ok().and_then(|slot| slot.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_first_trigger_only() {
        let handler = InterruptHandler::new();
        assert!(handler.trigger_interrupt());
        assert!(!handler.trigger_interrupt());
        assert!(!handler.clone().trigger_interrupt());
    }

    #[tokio::test]
    async fn test_interrupted_waits_for_trigger() {
        let handler = InterruptHandler::new();
        let pending = tokio::time::timeout(Duration::from_millis(50), handler.interrupted()).await;
        assert!(pending.is_err());

        let remote = handler.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            remote.trigger_interrupt();
        });
        tokio::time::timeout(Duration::from_secs(5), handler.interrupted())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_interrupt_before_wait_resolves_immediately() {
        let handler = InterruptHandler::new();
        handler.trigger_interrupt();
        tokio::time::timeout(Duration::from_millis(100), handler.interrupted())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_interrupt_drops_in_flight_work() {
        let handler = InterruptHandler::new();
        let dropped = Arc::new(std::sync::atomic::AtomicBool::new(false));

        struct SetOnDrop(Arc<std::sync::atomic::AtomicBool>);
        impl Drop for SetOnDrop {
            fn drop(&mut self) {
                self.0.store(true, std::sync::atomic::Ordering::SeqCst);
            }
        }

        let guard = SetOnDrop(Arc::clone(&dropped));
        let work = async move {
            let _guard = guard;
            tokio::time::sleep(Duration::from_secs(30)).await;
        };
        handler.trigger_interrupt();

        let finished = tokio::select! {
            _ = work => true,
            _ = handler.interrupted() => false,
        };
        assert!(!finished);
        assert!(dropped.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[test]
    fn test_track_scratch() {
        let handler = InterruptHandler::new();
        assert_eq!(handler.tracked_scratch(), None);
        handler.track_scratch(Path::new("/tmp/pairloop-x"));
        assert_eq!(
            handler.tracked_scratch(),
            Some(PathBuf::from("/tmp/pairloop-x"))
        );
        handler.untrack_scratch();
        assert_eq!(handler.tracked_scratch(), None);
    }
}
