//! MP4 mux writer with staging-then-rename finalization
//!
//! The container bytes are produced by a platform [`ContainerBackend`];
//! this layer owns the resilience protocol around it:
//!
//! 1. the backend creates the container at the `*.partial.mp4` staging path
//! 2. a second write handle on the same path takes an advisory exclusive
//!    lock for the session's lifetime, so external processes can read the
//!    staging file but not write it (failure to lock is logged, non-fatal)
//! 3. samples are forwarded in PTS order per stream; a non-monotonic PTS is
//!    logged and the sample skipped
//! 4. `finalize` runs at most once: close the backend, release the lock,
//!    rename staging to final (replacing any existing target)
//!
//! If the process dies before step 4 completes, the staging file remains on
//! disk for the orphan-recovery flow.

use fs2::FileExt;
use log::{error, info, warn};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::pipeline::types::{AudioSample, EncodedSample};

#[derive(Debug, Error)]
pub enum MuxError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The platform container backend rejected an operation.
    #[error("container backend: {0}")]
    Backend(String),

    /// A write or finalize arrived after finalization completed.
    #[error("mux writer already finalized")]
    AlreadyFinalized,
}

/// Stream configuration for the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MuxConfig {
    pub video_width: u32,
    pub video_height: u32,
    pub video_fps: u32,
    pub video_bitrate_bps: u32,
    pub audio_sample_rate: u32,
    pub audio_channels: u16,
    pub audio_bits_per_sample: u16,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            video_width: 1920,
            video_height: 1080,
            video_fps: 30,
            video_bitrate_bps: 8_000_000,
            audio_sample_rate: 48_000,
            audio_channels: 2,
            audio_bits_per_sample: 16,
        }
    }
}

/// Platform muxer writing one H.264 and one AAC stream into an MP4 file.
///
/// `begin` creates the container file at the given path and declares both
/// streams; cross-stream interleaving is the backend's responsibility.
pub trait ContainerBackend: Send {
    fn begin(&mut self, path: &Path, config: &MuxConfig) -> Result<(), MuxError>;
    fn write_video(&mut self, sample: &EncodedSample) -> Result<(), MuxError>;
    fn write_audio(&mut self, sample: &AudioSample) -> Result<(), MuxError>;
    /// Flush buffered samples and close the container.
    fn finish(&mut self) -> Result<(), MuxError>;
}

/// Writes a session's MP4 through the staging-then-rename protocol.
pub struct MuxWriter {
    backend: Box<dyn ContainerBackend>,
    staging_path: PathBuf,
    final_path: PathBuf,
    lock_handle: Option<File>,
    bytes_written: u64,
    last_video_pts: Option<i64>,
    last_audio_pts: Option<i64>,
    finalized: bool,
}

impl MuxWriter {
    /// Create the staging container and acquire the exclusive write lock.
    pub fn initialize(
        staging_path: PathBuf,
        final_path: PathBuf,
        config: &MuxConfig,
        mut backend: Box<dyn ContainerBackend>,
    ) -> Result<Self, MuxError> {
        backend.begin(&staging_path, config)?;

        let lock_handle = match Self::acquire_lock(&staging_path) {
            Ok(handle) => {
                info!("MuxWriter: exclusive write lock acquired on staging file");
                Some(handle)
            }
            Err(e) => {
                // Non-fatal: recording proceeds, recovery guarantees weaken.
                warn!(
                    "MuxWriter: could not acquire write lock on {:?}: {}",
                    staging_path, e
                );
                None
            }
        };

        info!("MuxWriter: writing to {:?}", staging_path);
        Ok(Self {
            backend,
            staging_path,
            final_path,
            lock_handle,
            bytes_written: 0,
            last_video_pts: None,
            last_audio_pts: None,
            finalized: false,
        })
    }

    fn acquire_lock(path: &Path) -> std::io::Result<File> {
        let handle = OpenOptions::new().write(true).open(path)?;
        handle.try_lock_exclusive()?;
        Ok(handle)
    }

    /// Forward an encoded video sample; PTS must increase within the stream.
    pub fn write_video(&mut self, sample: &EncodedSample) -> Result<(), MuxError> {
        if self.finalized {
            return Err(MuxError::AlreadyFinalized);
        }
        if let Some(last) = self.last_video_pts {
            if sample.pts_hns <= last {
                warn!(
                    "MuxWriter: non-monotonic video PTS {} after {}, skipping sample",
                    sample.pts_hns, last
                );
                return Ok(());
            }
        }
        match self.backend.write_video(sample) {
            Ok(()) => {
                self.last_video_pts = Some(sample.pts_hns);
                self.bytes_written += sample.data.len() as u64;
                Ok(())
            }
            Err(e) => {
                error!("MuxWriter: video write failed: {}", e);
                Err(e)
            }
        }
    }

    /// Forward a PCM sample for AAC encoding; PTS must increase within the
    /// stream.
    pub fn write_audio(&mut self, sample: &AudioSample) -> Result<(), MuxError> {
        if self.finalized {
            return Err(MuxError::AlreadyFinalized);
        }
        if let Some(last) = self.last_audio_pts {
            if sample.pts_hns <= last {
                warn!(
                    "MuxWriter: non-monotonic audio PTS {} after {}, skipping sample",
                    sample.pts_hns, last
                );
                return Ok(());
            }
        }
        match self.backend.write_audio(sample) {
            Ok(()) => {
                self.last_audio_pts = Some(sample.pts_hns);
                self.bytes_written += sample.data.len() as u64;
                Ok(())
            }
            Err(e) => {
                error!("MuxWriter: audio write failed: {}", e);
                Err(e)
            }
        }
    }

    /// Close the container, release the lock and promote the staging file.
    ///
    /// Runs at most once. On a backend close failure the rename is still
    /// attempted so the recording stays reachable, but the error is
    /// returned; on a rename failure the staging file remains on disk for
    /// recovery at next launch.
    pub fn finalize(&mut self) -> Result<PathBuf, MuxError> {
        if self.finalized {
            return Err(MuxError::AlreadyFinalized);
        }
        self.finalized = true;

        let finish_result = self.backend.finish();
        if let Err(ref e) = finish_result {
            error!("MuxWriter: container close failed: {}", e);
        }

        if let Some(handle) = self.lock_handle.take() {
            if let Err(e) = fs2::FileExt::unlock(&handle) {
                warn!("MuxWriter: lock release failed: {}", e);
            } else {
                info!("MuxWriter: exclusive write lock released");
            }
        }

        // Replace any existing target, matching the platform rename-with-
        // replace semantics on every OS.
        let _ = fs::remove_file(&self.final_path);
        if let Err(e) = fs::rename(&self.staging_path, &self.final_path) {
            error!(
                "MuxWriter: rename {:?} -> {:?} failed: {}",
                self.staging_path, self.final_path, e
            );
            return Err(MuxError::Io(e));
        }

        finish_result?;
        info!("MuxWriter: recording saved to {:?}", self.final_path);
        Ok(self.final_path.clone())
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn staging_path(&self) -> &Path {
        &self.staging_path
    }

    pub fn final_path(&self) -> &Path {
        &self.final_path
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }
}

impl Drop for MuxWriter {
    fn drop(&mut self) {
        if !self.finalized {
            // Crash-adjacent backstop: try to leave a playable file behind.
            if let Err(e) = self.finalize() {
                warn!("MuxWriter: finalize on drop failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::io::Write;

    /// Backend that appends raw sample bytes to the container file.
    struct FlatFileBackend {
        file: Option<File>,
    }

    impl FlatFileBackend {
        fn new() -> Box<Self> {
            Box::new(Self { file: None })
        }
    }

    impl ContainerBackend for FlatFileBackend {
        fn begin(&mut self, path: &Path, _config: &MuxConfig) -> Result<(), MuxError> {
            self.file = Some(File::create(path)?);
            Ok(())
        }

        fn write_video(&mut self, sample: &EncodedSample) -> Result<(), MuxError> {
            self.file
                .as_mut()
                .ok_or_else(|| MuxError::Backend("not begun".into()))?
                .write_all(&sample.data)?;
            Ok(())
        }

        fn write_audio(&mut self, sample: &AudioSample) -> Result<(), MuxError> {
            self.file
                .as_mut()
                .ok_or_else(|| MuxError::Backend("not begun".into()))?
                .write_all(&sample.data)?;
            Ok(())
        }

        fn finish(&mut self) -> Result<(), MuxError> {
            if let Some(f) = self.file.take() {
                f.sync_all()?;
            }
            Ok(())
        }
    }

    fn video_sample(pts: i64) -> EncodedSample {
        EncodedSample {
            data: Bytes::from_static(&[1u8; 32]),
            pts_hns: pts,
            duration_hns: 333_333,
            is_keyframe: false,
        }
    }

    fn audio_sample(pts: i64) -> AudioSample {
        AudioSample {
            data: Bytes::from_static(&[2u8; 16]),
            pts_hns: pts,
            duration_hns: 100_000,
            sample_rate: 48_000,
            channels: 2,
        }
    }

    fn paths(dir: &tempfile::TempDir) -> (PathBuf, PathBuf) {
        (
            dir.path().join("rec.partial.mp4"),
            dir.path().join("rec.mp4"),
        )
    }

    #[test]
    fn test_finalize_promotes_staging() {
        let dir = tempfile::tempdir().unwrap();
        let (staging, final_path) = paths(&dir);

        let mut mux = MuxWriter::initialize(
            staging.clone(),
            final_path.clone(),
            &MuxConfig::default(),
            FlatFileBackend::new(),
        )
        .unwrap();
        mux.write_video(&video_sample(0)).unwrap();
        mux.write_audio(&audio_sample(0)).unwrap();
        assert_eq!(mux.bytes_written(), 48);

        let promoted = mux.finalize().unwrap();
        assert_eq!(promoted, final_path);
        assert!(final_path.exists());
        assert!(!staging.exists());
    }

    #[test]
    fn test_finalize_is_at_most_once() {
        let dir = tempfile::tempdir().unwrap();
        let (staging, final_path) = paths(&dir);
        let mut mux = MuxWriter::initialize(
            staging,
            final_path,
            &MuxConfig::default(),
            FlatFileBackend::new(),
        )
        .unwrap();
        mux.finalize().unwrap();
        assert!(matches!(mux.finalize(), Err(MuxError::AlreadyFinalized)));
    }

    #[test]
    fn test_no_writes_after_finalize() {
        let dir = tempfile::tempdir().unwrap();
        let (staging, final_path) = paths(&dir);
        let mut mux = MuxWriter::initialize(
            staging,
            final_path,
            &MuxConfig::default(),
            FlatFileBackend::new(),
        )
        .unwrap();
        mux.finalize().unwrap();
        assert!(matches!(
            mux.write_video(&video_sample(0)),
            Err(MuxError::AlreadyFinalized)
        ));
        assert!(matches!(
            mux.write_audio(&audio_sample(0)),
            Err(MuxError::AlreadyFinalized)
        ));
    }

    #[test]
    fn test_non_monotonic_pts_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let (staging, final_path) = paths(&dir);
        let mut mux = MuxWriter::initialize(
            staging,
            final_path,
            &MuxConfig::default(),
            FlatFileBackend::new(),
        )
        .unwrap();
        mux.write_video(&video_sample(1_000)).unwrap();
        let before = mux.bytes_written();
        // Same and regressing PTS are skipped without error.
        mux.write_video(&video_sample(1_000)).unwrap();
        mux.write_video(&video_sample(500)).unwrap();
        assert_eq!(mux.bytes_written(), before);
        mux.write_video(&video_sample(2_000)).unwrap();
        assert!(mux.bytes_written() > before);
    }

    #[test]
    fn test_staging_is_write_locked_until_finalize() {
        let dir = tempfile::tempdir().unwrap();
        let (staging, final_path) = paths(&dir);
        let mut mux = MuxWriter::initialize(
            staging.clone(),
            final_path.clone(),
            &MuxConfig::default(),
            FlatFileBackend::new(),
        )
        .unwrap();

        // Readers are fine; a second writer cannot take the lock.
        assert!(File::open(&staging).is_ok());
        let foreign = OpenOptions::new().write(true).open(&staging).unwrap();
        assert!(foreign.try_lock_exclusive().is_err());
        drop(foreign);

        mux.finalize().unwrap();

        // After finalize the promoted file is lockable again.
        let reopened = OpenOptions::new().write(true).open(&final_path).unwrap();
        assert!(reopened.try_lock_exclusive().is_ok());
        fs2::FileExt::unlock(&reopened).unwrap();
    }

    #[test]
    fn test_rename_replaces_existing_target() {
        let dir = tempfile::tempdir().unwrap();
        let (staging, final_path) = paths(&dir);
        fs::write(&final_path, b"stale").unwrap();

        let mut mux = MuxWriter::initialize(
            staging.clone(),
            final_path.clone(),
            &MuxConfig::default(),
            FlatFileBackend::new(),
        )
        .unwrap();
        mux.write_video(&video_sample(0)).unwrap();
        mux.finalize().unwrap();

        assert!(!staging.exists());
        assert_eq!(fs::read(&final_path).unwrap().len(), 32);
    }

    #[test]
    fn test_drop_finalizes_unfinished_session() {
        let dir = tempfile::tempdir().unwrap();
        let (staging, final_path) = paths(&dir);
        {
            let mut mux = MuxWriter::initialize(
                staging.clone(),
                final_path.clone(),
                &MuxConfig::default(),
                FlatFileBackend::new(),
            )
            .unwrap();
            mux.write_video(&video_sample(0)).unwrap();
        }
        assert!(final_path.exists());
        assert!(!staging.exists());
    }
}
