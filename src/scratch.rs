//! Per-run scratch directory.
//!
//! The directory is removed when the [`ScratchDir`] is closed or dropped,
//! which covers normal exits, fatal aborts and interrupts handled by
//! [`crate::interrupt::InterruptHandler`].

use std::io;
use std::path::Path;

use tempfile::{Builder, TempDir};
use tracing::{debug, warn};

const PREFIX: &str = "pairloop-";

/// Temporary directory for captured intermediate output.
#[derive(Debug)]
pub struct ScratchDir {
    dir: TempDir,
}

impl ScratchDir {
    /// Create a fresh directory under `root`, or the system temp dir.
    pub fn create(root: Option<&Path>) -> io::Result<Self> {
        let mut builder = Builder::new();
        builder.prefix(PREFIX);
        let dir = match root {
            Some(root) => {
                std::fs::create_dir_all(root)?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };
        debug!(path = %dir.path().display(), "created scratch directory");
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Remove the directory now, reporting failures.
    pub fn close(self) -> io::Result<()> {
        self.dir.close()
    }
}

/// Best-effort removal used when the process is forced to exit.
pub fn remove_scratch(path: &Path) {
    match std::fs::remove_dir_all(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "failed to remove scratch directory"),
    }
}
