//! Scoped ownership of the transient chapter PDF.
//!
//! A [TempPdf] deletes its file when closed or dropped. Every live temp file is also listed in a
//! [TempRegistry], which the interrupt handler (Ctrl+C or a termination signal) empties before
//! exiting.

use std::collections::HashSet;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempPath;
use tracing::{debug, warn};

const FILE_PREFIX: &str = "manhwa-cli-";
const FILE_SUFFIX: &str = ".pdf";

/// Exit status used after an interrupt, matching the shell convention for SIGINT.
pub const INTERRUPT_EXIT_CODE: i32 = 130;

/// Shared list of temp files that are still on disk. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct TempRegistry {
    live: Arc<Mutex<HashSet<PathBuf>>>,
}

impl TempRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, path: &Path) {
        if let Ok(mut live) = self.live.lock() {
            live.insert(path.to_path_buf());
        }
    }

    fn unregister(&self, path: &Path) {
        if let Ok(mut live) = self.live.lock() {
            live.remove(path);
        }
    }

    /// Paths currently registered.
    pub fn live_paths(&self) -> Vec<PathBuf> {
        match self.live.lock() {
            Ok(live) => live.iter().cloned().collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Delete every registered file and clear the registry. Failures are logged.
    pub fn remove_all(&self) {
        let paths: Vec<PathBuf> = match self.live.lock() {
            Ok(mut live) => live.drain().collect(),
            Err(_) => return,
        };
        for path in paths {
            match std::fs::remove_file(&path) {
                Ok(()) => debug!("removed {}", path.display()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!("could not remove temp file {}: {}", path.display(), e),
            }
        }
    }

    /// Install a handler for Ctrl+C, SIGTERM and SIGHUP that removes all live temp files and exits
    /// with code 130. Can only be installed once per process.
    pub fn install_interrupt_handler(&self) -> Result<(), ctrlc::Error> {
        let registry = self.clone();
        ctrlc::set_handler(move || {
            registry.remove_all();
            eprintln!();
            std::process::exit(INTERRUPT_EXIT_CODE);
        })
    }
}

/// A uniquely named PDF file in the OS temp directory, deleted on close or drop.
#[derive(Debug)]
pub struct TempPdf {
    path: Option<TempPath>,
    registry: TempRegistry,
}

impl TempPdf {
    /// Create a fresh empty file and return it opened for writing together with its guard.
    pub fn create(registry: &TempRegistry) -> io::Result<(File, TempPdf)> {
        Self::create_in(registry, &std::env::temp_dir())
    }

    /// Like [TempPdf::create] but in `dir`.
    pub fn create_in(registry: &TempRegistry, dir: &Path) -> io::Result<(File, TempPdf)> {
        let named = tempfile::Builder::new()
            .prefix(FILE_PREFIX)
            .suffix(FILE_SUFFIX)
            .tempfile_in(dir)?;
        let (file, path) = named.into_parts();
        registry.register(&path);
        debug!("created temp file {}", path.display());
        Ok((
            file,
            TempPdf {
                path: Some(path),
                registry: registry.clone(),
            },
        ))
    }

    pub fn path(&self) -> &Path {
        match &self.path {
            Some(p) => &**p,
            None => Path::new(""),
        }
    }

    /// Delete the file now, reporting failure to the caller instead of ignoring it.
    pub fn close(mut self) -> io::Result<()> {
        match self.path.take() {
            Some(path) => {
                self.registry.unregister(&path);
                path.close()
            }
            None => Ok(()),
        }
    }
}

impl Drop for TempPdf {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            self.registry.unregister(&path);
            // TempPath deletes on drop and ignores errors.
            drop(path);
        }
    }
}
