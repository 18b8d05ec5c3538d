//! Session controller: owns the pipeline and runs the encode loop
//!
//! The controller wires the clock, queues, pacer, state machine, encoder,
//! muxer and storage together and exposes the control surface the GUI
//! shell drives: start, stop, pause, resume, mute, telemetry.
//!
//! # Threads
//!
//! Producers (capture, audio) run inside their adapters. The encode thread
//! is owned here: it drains both queues, paces video, feeds the encoder
//! and the muxer. The encoder and mux writer are *moved into* that thread
//! and handed back through its `JoinHandle` at stop, so exactly one thread
//! ever touches them and finalization strictly follows the join.
//!
//! Stop is cooperative and re-entrant: the disk-space poller and the
//! capture adapter's device-lost callback both call
//! [`SessionController::stop`] from their own threads. The state machine
//! accepts the transition once; losers see a rejected event and back off
//! before touching any lock.

use anyhow::{anyhow, Result};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::capture::traits::{AudioAdapter, CaptureAdapter};
use crate::encoder::h264::{TransformProvider, VideoEncoder};
use crate::encoder::power::{clamp_for_power, PowerProbe, PowerState};
use crate::pipeline::pacer::{FramePacer, PaceAction};
use crate::pipeline::queue::{AudioQueue, FrameQueue};
use crate::pipeline::state::{SessionEvent, SessionMachine, SessionState};
use crate::pipeline::sync::SyncManager;
use crate::pipeline::telemetry::{TelemetrySnapshot, TelemetryStore};
use crate::pipeline::types::{AudioSample, EncoderProfile, EncoderTier, GpuImage, VideoFrame};
use crate::storage::manager::{StorageManager, LOW_SPACE_THRESHOLD, POLL_INTERVAL};
use crate::storage::mux::{ContainerBackend, MuxConfig, MuxWriter};

pub type StatusCallback = Box<dyn Fn(&str) + Send + Sync>;
pub type ErrorCallback = Box<dyn Fn(&str) + Send + Sync>;

/// Produces one container backend per session.
pub type ContainerFactory = Box<dyn Fn() -> Box<dyn ContainerBackend> + Send + Sync>;

/// What the encode thread hands back when it exits.
struct EncodeArtifacts {
    encoder: VideoEncoder,
    mux: MuxWriter,
}

/// The shared state the encode thread needs. Deliberately not the whole
/// controller: the thread must not keep the controller alive.
#[derive(Clone)]
struct EncodeShared {
    machine: Arc<SessionMachine>,
    sync: Arc<SyncManager>,
    video_queue: Arc<FrameQueue>,
    audio_queue: Arc<AudioQueue>,
    pacer: Arc<FramePacer>,
    telemetry: Arc<TelemetryStore>,
    running: Arc<AtomicBool>,
}

impl EncodeShared {
    /// A sample stamped inside a pause carries a PTS ahead of the rebased
    /// clock; such samples surface in the queues right after resume and
    /// must not reach the file.
    fn is_intra_pause(&self, pts_hns: i64) -> bool {
        let slack = 3 * self.pacer.target_interval_hns();
        pts_hns > self.sync.now_pts() + slack
    }
}

struct ActiveSession {
    encode_thread: JoinHandle<EncodeArtifacts>,
    force_keyframe: Arc<AtomicBool>,
    tier: EncoderTier,
    final_path: PathBuf,
}

struct Inner {
    machine: Arc<SessionMachine>,
    sync: Arc<SyncManager>,
    telemetry: Arc<TelemetryStore>,
    video_queue: Arc<FrameQueue>,
    audio_queue: Arc<AudioQueue>,
    pacer: Arc<FramePacer>,

    capture: Mutex<Box<dyn CaptureAdapter>>,
    audio: Mutex<Box<dyn AudioAdapter>>,
    provider: Mutex<Box<dyn TransformProvider>>,
    container_factory: ContainerFactory,
    power: Box<dyn PowerProbe>,

    storage: Mutex<Option<Arc<StorageManager>>>,
    on_status: Mutex<Option<StatusCallback>>,
    on_error: Mutex<Option<ErrorCallback>>,

    profile_override: Mutex<Option<EncoderProfile>>,
    disk_poll_interval: Mutex<Duration>,
    disk_low_threshold: AtomicU64,

    muted: AtomicBool,
    on_ac: AtomicBool,
    encode_running: Arc<AtomicBool>,
    active: Mutex<Option<ActiveSession>>,
    output_path: Mutex<Option<PathBuf>>,
}

/// Cheap cloneable handle to the recording session controller.
///
/// Clones share one controller; callbacks registered on adapters and the
/// disk poller hold clones so they can stop the session from their own
/// threads.
pub struct SessionController {
    inner: Arc<Inner>,
}

impl Clone for SessionController {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl SessionController {
    /// Build a controller around platform adapters and backends.
    pub fn new(
        capture: Box<dyn CaptureAdapter>,
        audio: Box<dyn AudioAdapter>,
        provider: Box<dyn TransformProvider>,
        container_factory: ContainerFactory,
        power: Box<dyn PowerProbe>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                machine: Arc::new(SessionMachine::new()),
                sync: Arc::new(SyncManager::new()),
                telemetry: Arc::new(TelemetryStore::new()),
                video_queue: Arc::new(FrameQueue::new()),
                audio_queue: Arc::new(AudioQueue::new()),
                pacer: Arc::new(FramePacer::new(30)),
                capture: Mutex::new(capture),
                audio: Mutex::new(audio),
                provider: Mutex::new(provider),
                container_factory,
                power,
                storage: Mutex::new(None),
                on_status: Mutex::new(None),
                on_error: Mutex::new(None),
                profile_override: Mutex::new(None),
                disk_poll_interval: Mutex::new(POLL_INTERVAL),
                disk_low_threshold: AtomicU64::new(LOW_SPACE_THRESHOLD),
                muted: AtomicBool::new(false),
                on_ac: AtomicBool::new(true),
                encode_running: Arc::new(AtomicBool::new(false)),
                active: Mutex::new(None),
                output_path: Mutex::new(None),
            }),
        }
    }

    /// One-time setup; must be called before the first start.
    pub fn initialize(
        &self,
        storage: Arc<StorageManager>,
        on_status: Option<StatusCallback>,
        on_error: Option<ErrorCallback>,
    ) -> Result<()> {
        *self.inner.storage.lock() = Some(storage);
        *self.inner.on_status.lock() = on_status;
        *self.inner.on_error.lock() = on_error;
        info!("SessionController initialized");
        Ok(())
    }

    /// Override the encoder profile for subsequent sessions.
    pub fn set_encoder_profile(&self, profile: EncoderProfile) {
        *self.inner.profile_override.lock() = Some(profile);
    }

    /// Tune the disk watcher (cadence and free-space floor).
    pub fn set_disk_policy(&self, interval: Duration, threshold: u64) {
        *self.inner.disk_poll_interval.lock() = interval;
        self.inner
            .disk_low_threshold
            .store(threshold, Ordering::Relaxed);
    }

    /// Start a recording session. Rejected unless the session is idle.
    pub fn start(&self) -> Result<()> {
        let inner = &self.inner;
        if !inner.machine.transition(SessionEvent::Start) {
            return Err(anyhow!("start rejected in state {}", inner.machine.state()));
        }
        self.notify_status("Starting...");

        let Some(storage) = inner.storage.lock().clone() else {
            self.abort_start("Controller not initialized with a storage manager");
            return Err(anyhow!("controller not initialized with a storage manager"));
        };

        let staging_path = storage.generate_filename();
        let final_path = StorageManager::partial_to_final(&staging_path);

        inner.sync.start();

        // Capture adapter is mandatory; audio degrades to a silent session.
        let capture_init = inner
            .capture
            .lock()
            .initialize(inner.video_queue.clone(), inner.sync.clone());
        if let Err(e) = capture_init {
            self.abort_start(&format!("Capture initialization failed: {e}"));
            return Err(e.context("capture initialization"));
        }
        let audio_init = inner
            .audio
            .lock()
            .initialize(inner.audio_queue.clone(), inner.sync.clone());
        let audio_ok = match audio_init {
            Ok(()) => true,
            Err(e) => {
                warn!("Audio initialization failed, continuing without audio: {e}");
                false
            }
        };

        // Resolve the encoder profile: overrides, capture dimensions, then
        // the power clamp. Resolution is never clamped.
        let mut profile = (*inner.profile_override.lock()).unwrap_or_default();
        {
            let capture = inner.capture.lock();
            if capture.width() > 0 && capture.height() > 0 {
                profile.width = capture.width();
                profile.height = capture.height();
            }
        }
        let power_state = inner.power.power_state();
        inner
            .on_ac
            .store(power_state != PowerState::Battery, Ordering::Relaxed);
        let profile = clamp_for_power(profile, power_state);

        let encoder_init = {
            let mut provider = inner.provider.lock();
            VideoEncoder::initialize(&profile, &mut **provider)
        };
        let encoder = match encoder_init {
            Ok(encoder) => encoder,
            Err(e) => {
                self.abort_start(&format!("Video encoder initialization failed: {e}"));
                return Err(anyhow!(e).context("encoder initialization"));
            }
        };

        let mux_config = {
            let audio = inner.audio.lock();
            MuxConfig {
                video_width: encoder.output_width(),
                video_height: encoder.output_height(),
                video_fps: encoder.output_fps(),
                video_bitrate_bps: profile.bitrate_bps,
                audio_sample_rate: if audio_ok { audio.sample_rate() } else { 48_000 },
                audio_channels: if audio_ok { audio.channels() } else { 2 },
                audio_bits_per_sample: if audio_ok { audio.bits_per_sample() } else { 16 },
            }
        };
        let backend = (inner.container_factory)();
        let mux_init =
            MuxWriter::initialize(staging_path, final_path.clone(), &mux_config, backend);
        let mux = match mux_init {
            Ok(mux) => mux,
            Err(e) => {
                self.abort_start(&format!("Mux writer initialization failed: {e}"));
                return Err(anyhow!(e).context("mux initialization"));
            }
        };

        inner.telemetry.reset();
        inner.pacer.initialize(encoder.output_fps());

        // Device loss is unrecoverable: surface the error and stop. The
        // callback runs on the adapter's capture thread, so finalization
        // runs there too. Weak, because the adapter lives inside the
        // controller.
        {
            let weak = Arc::downgrade(inner);
            inner
                .capture
                .lock()
                .set_device_lost_callback(Box::new(move || {
                    let Some(inner) = weak.upgrade() else { return };
                    let controller = SessionController { inner };
                    error!("Device-lost event received, auto-stopping recording");
                    controller.notify_error(
                        "\u{26A0} Graphics device was reset or removed. Recording stopped.",
                    );
                    let _ = controller.stop();
                }));
        }

        // Audio device invalidation is survivable: the adapter keeps the
        // packet cadence with injected silence, the session continues.
        if audio_ok {
            inner
                .audio
                .lock()
                .set_device_invalid_callback(Box::new(|| {
                    warn!("Audio device invalidated, continuing with silence");
                }));
        }

        let tier = encoder.tier();
        let force_keyframe = encoder.force_keyframe_flag();
        inner.encode_running.store(true, Ordering::Release);
        let shared = EncodeShared {
            machine: inner.machine.clone(),
            sync: inner.sync.clone(),
            video_queue: inner.video_queue.clone(),
            audio_queue: inner.audio_queue.clone(),
            pacer: inner.pacer.clone(),
            telemetry: inner.telemetry.clone(),
            running: inner.encode_running.clone(),
        };
        let encode_thread = thread::Builder::new()
            .name("encode".into())
            .spawn(move || encode_loop(shared, encoder, mux))
            .expect("spawn encode thread");

        *inner.active.lock() = Some(ActiveSession {
            encode_thread,
            force_keyframe,
            tier,
            final_path: final_path.clone(),
        });
        *inner.output_path.lock() = Some(final_path.clone());

        let capture_start = inner.capture.lock().start();
        if let Err(e) = capture_start {
            self.notify_error(&format!("Capture start failed: {e}"));
            let _ = self.stop();
            return Err(e.context("capture start"));
        }
        if audio_ok {
            let audio_start = inner.audio.lock().start();
            if let Err(e) = audio_start {
                warn!("Audio start failed, continuing without audio: {e}");
            }
            inner
                .audio
                .lock()
                .set_muted(inner.muted.load(Ordering::Relaxed));
        }

        // Watch free space; the callback stops the session from the poll
        // thread (the poller converts its own join into a detach). Weak,
        // because the storage manager is held by the controller.
        {
            let weak = Arc::downgrade(inner);
            let interval = *inner.disk_poll_interval.lock();
            let threshold = inner.disk_low_threshold.load(Ordering::Relaxed);
            storage.start_polling(
                move || {
                    let Some(inner) = weak.upgrade() else { return };
                    let controller = SessionController { inner };
                    if !controller.inner.machine.is_idle() {
                        warn!("Auto-stopping: disk space critically low");
                        controller.notify_error(
                            "\u{26A0} Disk space critically low! Recording auto-stopped.",
                        );
                        let _ = controller.stop();
                    }
                },
                interval,
                threshold,
            );
        }

        self.notify_status("Recording...");
        info!("Recording started -> {:?}", final_path);
        Ok(())
    }

    /// Stop the session: drain, flush, finalize. Rejected when no session
    /// is recording or paused. Never retried: once `Stopping` is entered,
    /// `Finalized` always follows.
    pub fn stop(&self) -> Result<()> {
        let inner = &self.inner;
        if !inner.machine.transition(SessionEvent::Stop) {
            return Err(anyhow!("stop rejected in state {}", inner.machine.state()));
        }
        self.notify_status("Stopping...");

        let storage = inner.storage.lock().clone();
        if let Some(storage) = storage {
            storage.stop_polling();
        }

        // Producers first, then the consumer drains what is queued.
        inner.capture.lock().stop();
        inner.audio.lock().stop();
        inner.encode_running.store(false, Ordering::Release);

        let session = inner.active.lock().take();
        if let Some(session) = session {
            match session.encode_thread.join() {
                Ok(mut artifacts) => {
                    match artifacts.encoder.flush() {
                        Ok(leftover) => {
                            for sample in &leftover {
                                if artifacts.mux.write_video(sample).is_err() {
                                    inner.telemetry.on_frame_dropped();
                                }
                            }
                        }
                        Err(e) => warn!("Encoder flush failed: {e}"),
                    }
                    if let Err(e) = artifacts.mux.finalize() {
                        self.notify_error(&format!(
                            "Recording finalization failed; staging file kept for recovery: {e}"
                        ));
                    }
                }
                Err(_) => {
                    self.notify_error("Encode thread panicked; staging file kept for recovery");
                }
            }
        }

        inner.machine.transition(SessionEvent::Finalized);
        self.notify_status("Idle");
        info!(
            "Recording stopped. Encoded: {} frames, audio pkts: {}",
            inner.telemetry.frames_encoded(),
            inner.telemetry.audio_packets_written()
        );
        Ok(())
    }

    /// Pause: samples dequeued while paused are discarded.
    pub fn pause(&self) -> Result<()> {
        let inner = &self.inner;
        if !inner.machine.transition(SessionEvent::Pause) {
            return Err(anyhow!("pause rejected in state {}", inner.machine.state()));
        }
        inner.sync.pause();
        inner.pacer.reset();
        self.notify_status("Paused");
        Ok(())
    }

    /// Resume: rebase timing and force an IDR so the post-pause segment is
    /// independently decodable.
    pub fn resume(&self) -> Result<()> {
        let inner = &self.inner;
        if !inner.machine.transition(SessionEvent::Resume) {
            return Err(anyhow!(
                "resume rejected in state {}",
                inner.machine.state()
            ));
        }
        inner.sync.resume();
        inner.pacer.reset();
        if let Some(session) = inner.active.lock().as_ref() {
            session.force_keyframe.store(true, Ordering::Release);
        }
        self.notify_status("Recording...");
        Ok(())
    }

    /// Forwarded to the audio adapter; no state transition.
    pub fn set_muted(&self, muted: bool) {
        self.inner.muted.store(muted, Ordering::Relaxed);
        self.inner.audio.lock().set_muted(muted);
    }

    pub fn is_muted(&self) -> bool {
        self.inner.muted.load(Ordering::Relaxed)
    }

    pub fn state(&self) -> SessionState {
        self.inner.machine.state()
    }

    /// Final path of the current or most recent session.
    pub fn output_path(&self) -> Option<PathBuf> {
        self.inner.output_path.lock().clone()
    }

    pub fn frames_captured(&self) -> u64 {
        self.inner.capture.lock().frames_captured()
    }

    pub fn frames_dropped(&self) -> u64 {
        self.inner.capture.lock().frames_dropped()
    }

    pub fn frames_encoded(&self) -> u64 {
        self.inner.telemetry.frames_encoded()
    }

    pub fn audio_packets_written(&self) -> u64 {
        self.inner.telemetry.audio_packets_written()
    }

    /// Snapshot of the live counters for the UI, merging the adapter's
    /// capture-side counters with the encode-side ones.
    pub fn telemetry_snapshot(&self) -> TelemetrySnapshot {
        let inner = &self.inner;
        inner
            .telemetry
            .set_backlog(inner.video_queue.size() as u32);
        let tier = inner.active.lock().as_ref().map(|s| s.tier);
        let (captured, backpressure_drops) = {
            let capture = inner.capture.lock();
            (capture.frames_captured(), capture.frames_dropped())
        };
        let mut snapshot = inner
            .telemetry
            .snapshot(tier, inner.on_ac.load(Ordering::Relaxed));
        snapshot.frames_captured = captured;
        snapshot.frames_dropped += backpressure_drops;
        snapshot
    }

    /// Roll the machine back to idle after a failed start step.
    fn abort_start(&self, message: &str) {
        self.notify_error(message);
        self.inner.machine.transition(SessionEvent::Stop);
        self.inner.machine.transition(SessionEvent::Finalized);
    }

    fn notify_status(&self, message: &str) {
        if let Some(cb) = self.inner.on_status.lock().as_ref() {
            cb(message);
        }
    }

    fn notify_error(&self, message: &str) {
        error!("{message}");
        if let Some(cb) = self.inner.on_error.lock().as_ref() {
            cb(message);
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        // Backstop when the controller is dropped mid-session: stop the
        // producers, drain, and finalize so the recording is not lost.
        if self.machine.is_idle() {
            return;
        }
        self.capture.lock().stop();
        self.audio.lock().stop();
        self.encode_running.store(false, Ordering::Release);
        if let Some(session) = self.active.lock().take() {
            if let Ok(mut artifacts) = session.encode_thread.join() {
                if let Ok(leftover) = artifacts.encoder.flush() {
                    for sample in &leftover {
                        let _ = artifacts.mux.write_video(sample);
                    }
                }
                if let Err(e) = artifacts.mux.finalize() {
                    warn!(
                        "Finalize during teardown failed for {:?}: {e}",
                        session.final_path
                    );
                }
            }
        }
    }
}

/// The hot loop: runs on the encode thread until the running flag drops
/// and the video queue is drained.
fn encode_loop(shared: EncodeShared, mut encoder: VideoEncoder, mut mux: MuxWriter) -> EncodeArtifacts {
    // Retained handle of the last submitted frame, for duplicate insertion.
    let mut last_image: Option<Arc<dyn GpuImage>> = None;
    let mut last_paced_pts: i64 = 0;

    while shared.running.load(Ordering::Acquire) || !shared.video_queue.empty() {
        if let Some(frame) = shared.video_queue.try_pop() {
            process_video_frame(
                &shared,
                &mut encoder,
                &mut mux,
                frame,
                &mut last_image,
                &mut last_paced_pts,
            );
            shared
                .telemetry
                .set_backlog(shared.video_queue.size() as u32);
        }

        drain_audio(&shared, &mut mux);

        if shared.video_queue.empty() {
            thread::sleep(Duration::from_millis(1));
        }
    }

    EncodeArtifacts { encoder, mux }
}

/// Pace, possibly duplicate, encode and mux one video frame.
fn process_video_frame(
    shared: &EncodeShared,
    encoder: &mut VideoEncoder,
    mux: &mut MuxWriter,
    frame: VideoFrame,
    last_image: &mut Option<Arc<dyn GpuImage>>,
    last_paced_pts: &mut i64,
) {
    // Honour pause: anything dequeued while paused is discarded, as is
    // anything stamped inside the pause that surfaces after resume.
    if shared.machine.state() == SessionState::Paused || shared.is_intra_pause(frame.pts_hns) {
        return;
    }

    let (action, paced_pts) = shared.pacer.pace(frame.pts_hns, false);
    match action {
        PaceAction::Drop => {
            shared.telemetry.on_frame_dropped();
            return;
        }
        PaceAction::Duplicate => {
            // Re-encode the retained previous frame at the midpoint PTS,
            // then fall through to the current frame.
            if let Some(prev) = last_image.clone() {
                let dup_pts = *last_paced_pts + (paced_pts - *last_paced_pts) / 2;
                match encoder.encode(&prev, dup_pts) {
                    Ok(Some(sample)) => {
                        if mux.write_video(&sample).is_ok() {
                            shared.telemetry.on_frame_encoded();
                            shared.telemetry.on_duplicate_inserted();
                        } else {
                            shared.telemetry.on_frame_dropped();
                        }
                    }
                    Ok(None) => shared.telemetry.on_duplicate_inserted(),
                    Err(e) => debug!("Duplicate encode failed: {e}"),
                }
            }
        }
        PaceAction::Accept => {}
    }

    // Retain a shared handle before encoding so a later duplicate can
    // re-submit the same image.
    *last_image = Some(frame.image.clone());
    *last_paced_pts = paced_pts;

    match encoder.encode(&frame.image, paced_pts) {
        Ok(Some(sample)) => {
            if mux.write_video(&sample).is_ok() {
                shared.telemetry.on_frame_encoded();
            } else {
                shared.telemetry.on_frame_dropped();
            }
        }
        Ok(None) => {}
        Err(e) => {
            shared.telemetry.on_frame_dropped();
            debug!("Encode submit failed: {e}");
        }
    }
}

/// Drain every pending audio packet into the muxer.
fn drain_audio(shared: &EncodeShared, mux: &mut MuxWriter) {
    while let Some(packet) = shared.audio_queue.try_pop() {
        if shared.machine.state() == SessionState::Paused || shared.is_intra_pause(packet.pts_hns)
        {
            continue;
        }
        let sample = AudioSample::from_packet(&packet);
        if mux.write_audio(&sample).is_ok() {
            shared.telemetry.on_audio_written();
        }
    }
}
