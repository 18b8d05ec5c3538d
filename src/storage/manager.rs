//! Output directory, filename and disk-space management
//!
//! Resolves the recordings directory, hands out collision-free staging
//! filenames, watches free space from a background thread and scans for
//! orphaned staging files left behind by a crash.

use chrono::Local;
use log::{error, info, warn};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;
use thiserror::Error;

/// Free-space floor below which the session is force-stopped.
pub const LOW_SPACE_THRESHOLD: u64 = 500 * 1024 * 1024;

/// Default cadence of the disk-space poller.
pub const POLL_INTERVAL: Duration = Duration::from_secs(5);

const PARTIAL_SUFFIX: &str = ".partial.mp4";
const FINAL_SUFFIX: &str = ".mp4";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("output directory not usable: {0}")]
    InvalidDirectory(PathBuf),
}

struct DiskPoller {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
    thread_id: ThreadId,
}

/// Manages the output directory, unique filenames, free-space polling and
/// orphan recovery.
pub struct StorageManager {
    output_dir: Mutex<PathBuf>,
    poller: Mutex<Option<DiskPoller>>,
}

impl StorageManager {
    /// Create a manager rooted at the default recordings directory,
    /// creating it if missing.
    pub fn new() -> Self {
        let dir = Self::resolve_default_directory();
        info!("StorageManager: output directory {:?}", dir);
        Self {
            output_dir: Mutex::new(dir),
            poller: Mutex::new(None),
        }
    }

    /// Create a manager rooted at an explicit directory (validated).
    pub fn with_directory<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let manager = Self {
            output_dir: Mutex::new(PathBuf::new()),
            poller: Mutex::new(None),
        };
        manager.set_output_directory(path)?;
        Ok(manager)
    }

    /// `<user videos>/Recordings`, with fallbacks when the platform cannot
    /// report a videos folder or the directory cannot be created.
    fn resolve_default_directory() -> PathBuf {
        let preferred = directories::UserDirs::new()
            .and_then(|dirs| {
                dirs.video_dir()
                    .map(|videos| videos.join("Recordings"))
                    .or_else(|| Some(dirs.home_dir().join("Videos").join("Recordings")))
            })
            .unwrap_or_else(|| PathBuf::from("Recordings"));

        if let Err(e) = std::fs::create_dir_all(&preferred) {
            error!(
                "StorageManager: cannot create {:?}: {}, falling back",
                preferred, e
            );
            let fallback = std::env::temp_dir().join("Recordings");
            let _ = std::fs::create_dir_all(&fallback);
            return fallback;
        }
        preferred
    }

    pub fn output_directory(&self) -> PathBuf {
        self.output_dir.lock().clone()
    }

    /// Point at a new directory, creating it; rejected when creation fails.
    pub fn set_output_directory<P: AsRef<Path>>(&self, path: P) -> Result<(), StorageError> {
        let path = path.as_ref();
        std::fs::create_dir_all(path)
            .map_err(|_| StorageError::InvalidDirectory(path.to_path_buf()))?;
        *self.output_dir.lock() = path.to_path_buf();
        info!("StorageManager: output directory changed to {:?}", path);
        Ok(())
    }

    /// Produce a collision-free staging path:
    /// `ScreenRec_YYYY-MM-DD_HH-MM-SS[_NNN].partial.mp4`. The final path is
    /// derived from it with [`StorageManager::partial_to_final`].
    pub fn generate_filename(&self) -> PathBuf {
        let dir = self.output_directory();
        let stamp = Local::now().format("ScreenRec_%Y-%m-%d_%H-%M-%S").to_string();

        let mut partial = dir.join(format!("{}{}", stamp, PARTIAL_SUFFIX));
        let mut final_name = dir.join(format!("{}{}", stamp, FINAL_SUFFIX));

        let mut suffix = 0u32;
        while partial.exists() || final_name.exists() {
            suffix += 1;
            partial = dir.join(format!("{}_{:03}{}", stamp, suffix, PARTIAL_SUFFIX));
            final_name = dir.join(format!("{}_{:03}{}", stamp, suffix, FINAL_SUFFIX));
        }
        partial
    }

    /// Pure string rewrite of the staging suffix; idempotent when the
    /// suffix is absent.
    pub fn partial_to_final<P: AsRef<Path>>(partial: P) -> PathBuf {
        let path = partial.as_ref();
        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => name,
            None => return path.to_path_buf(),
        };
        match name.strip_suffix(PARTIAL_SUFFIX) {
            Some(base) => path.with_file_name(format!("{}{}", base, FINAL_SUFFIX)),
            None => path.to_path_buf(),
        }
    }

    /// Free bytes on the volume holding the output directory; 0 when the
    /// query fails.
    pub fn free_bytes(&self) -> u64 {
        let dir = self.output_directory();
        fs2::available_space(&dir).unwrap_or_else(|e| {
            warn!("StorageManager: free-space query failed for {:?}: {}", dir, e);
            0
        })
    }

    pub fn is_low(&self, threshold: u64) -> bool {
        self.free_bytes() < threshold
    }

    /// Launch the background free-space watcher. Each tick that observes
    /// free space below `threshold` invokes `callback` once. The callback
    /// may re-enter [`StorageManager::stop_polling`]; the poller detects
    /// the self-cancellation and tears down without deadlock.
    pub fn start_polling<F>(&self, callback: F, interval: Duration, threshold: u64)
    where
        F: Fn() + Send + 'static,
    {
        self.stop_polling();

        let stop = Arc::new(AtomicBool::new(false));
        let dir_source = self.output_directory();
        let handle = {
            let stop = stop.clone();
            thread::Builder::new()
                .name("storage-poll".into())
                .spawn(move || {
                    while !stop.load(Ordering::Acquire) {
                        let low = fs2::available_space(&dir_source)
                            .map(|free| free < threshold)
                            .unwrap_or(false);
                        if low {
                            warn!("StorageManager: disk space critically low");
                            callback();
                        }
                        // Sleep in slices so a stop request lands promptly.
                        let deadline = std::time::Instant::now() + interval;
                        while !stop.load(Ordering::Acquire)
                            && std::time::Instant::now() < deadline
                        {
                            thread::sleep(Duration::from_millis(20));
                        }
                    }
                })
                .expect("spawn storage-poll thread")
        };

        *self.poller.lock() = Some(DiskPoller {
            stop,
            thread_id: handle.thread().id(),
            handle,
        });
    }

    /// Stop the watcher. Idempotent; safe to call from the watcher's own
    /// callback (the join degrades to a detach in that case).
    pub fn stop_polling(&self) {
        let poller = match self.poller.lock().take() {
            Some(p) => p,
            None => return,
        };
        poller.stop.store(true, Ordering::Release);
        if thread::current().id() == poller.thread_id {
            // Re-entrant stop from the poll thread itself: detach, the
            // loop exits on the stop flag.
            return;
        }
        if poller.handle.join().is_err() {
            warn!("StorageManager: poll thread panicked");
        }
    }

    /// Staging files left behind in the output directory.
    pub fn find_orphans(&self) -> Vec<PathBuf> {
        let dir = self.output_directory();
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("StorageManager: cannot scan {:?}: {}", dir, e);
                return Vec::new();
            }
        };
        let mut orphans: Vec<PathBuf> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_file()
                    && path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.ends_with(PARTIAL_SUFFIX))
            })
            .collect();
        orphans.sort();
        orphans
    }

    /// Promote an orphaned staging file to its final name. String-level
    /// rename only; no media repair is attempted.
    pub fn recover_orphan<P: AsRef<Path>>(&self, partial: P) -> Result<PathBuf, StorageError> {
        let partial = partial.as_ref();
        let final_path = Self::partial_to_final(partial);
        std::fs::rename(partial, &final_path)?;
        info!("StorageManager: recovered {:?}", final_path);
        Ok(final_path)
    }

    /// Delete an orphaned staging file.
    pub fn delete_orphan<P: AsRef<Path>>(&self, partial: P) -> Result<(), StorageError> {
        std::fs::remove_file(partial.as_ref())?;
        Ok(())
    }
}

impl Default for StorageManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for StorageManager {
    fn drop(&mut self) {
        self.stop_polling();
    }
}
