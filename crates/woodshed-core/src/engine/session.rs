//! Session lifecycle and the engine that serializes it.
//!
//! A session walks `Idle → Initializing → Processing → Stopped`. The
//! engine owns the transition: `start` is rejected while a session is
//! already live (never queued), and `stop` synchronously tears the streams
//! down before returning, so no callback ever touches released state.
//!
//! When the source is a live capture of another player, the engine mutes
//! that player through the injected [`SourceControl`] for the session's
//! lifetime and restores it on stop and on every failure path; the
//! restore lives in a drop guard so failure paths cannot forget it.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use basedrop::Shared;
use cpal::traits::DeviceTrait;
use crossbeam::channel;

use crate::audio::{self, AudioConfig, StreamHandle};
use crate::dsp::pitch::MAX_SEMITONES;
use crate::dsp::stretch::StretchedReader;
use crate::engine::atomics::SessionAtomics;
use crate::engine::chain::{ChainSource, ProcessChain, CAPTURE_QUEUE_SAMPLES};
use crate::engine::command::{command_channel, CommandSender, SessionCommand};
use crate::engine::gc::AudioGc;
use crate::engine::governor::{GovernorConfig, GovernorState};
use crate::error::{EngineError, ProcessingFault, Result};
use crate::types::{AudioClip, PlayState};

/// Lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    /// No streams or stages exist
    Idle = 0,
    /// Devices and stages are being acquired
    Initializing = 1,
    /// Chain connected, audio flowing
    Processing = 2,
    /// Torn down; terminal until the next `start`
    Stopped = 3,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => SessionState::Initializing,
            2 => SessionState::Processing,
            3 => SessionState::Stopped,
            _ => SessionState::Idle,
        }
    }
}

/// Control surface of the player being captured.
///
/// Injected by the caller (there is no ambient global to reach for): when a
/// capture session starts, the engine mutes the source so its unprocessed
/// output is not audible alongside the processed one, and restores the
/// original state afterwards.
pub trait SourceControl: Send {
    fn mute(&mut self);
    fn restore(&mut self);
}

/// Holds the muted source and guarantees restoration exactly once,
/// including on early-error drops.
struct SourceGuard {
    control: Option<Box<dyn SourceControl>>,
    muted: bool,
}

impl SourceGuard {
    fn new(control: Option<Box<dyn SourceControl>>) -> Self {
        Self { control, muted: false }
    }

    fn mute(&mut self) {
        if let Some(control) = &mut self.control {
            if !self.muted {
                control.mute();
                self.muted = true;
            }
        }
    }

    fn restore(&mut self) {
        if let Some(control) = &mut self.control {
            if self.muted {
                control.restore();
                self.muted = false;
            }
        }
    }
}

impl Drop for SourceGuard {
    fn drop(&mut self) {
        self.restore();
    }
}

/// What a session processes
pub enum SessionSource {
    /// A decoded clip, played through the time stretcher
    Clip(AudioClip),
    /// Live capture from the configured capture device
    Capture {
        /// Optional handle to mute/restore the captured player
        control: Option<Box<dyn SourceControl>>,
    },
}

/// Feedback monitor thread handle
struct Monitor {
    shutdown: channel::Sender<()>,
    thread: thread::JoinHandle<()>,
}

/// The engine: builds sessions and serializes their lifecycle.
pub struct Engine {
    audio_config: AudioConfig,
    governor_config: GovernorConfig,
    state: Arc<AtomicU8>,
    gc: Arc<AudioGc>,
    /// Output device handle, acquired once and reused across sessions
    device: Option<cpal::Device>,
}

impl Engine {
    pub fn new(audio_config: AudioConfig, governor_config: GovernorConfig) -> Self {
        Self {
            audio_config,
            governor_config,
            state: Arc::new(AtomicU8::new(SessionState::Idle as u8)),
            gc: Arc::new(AudioGc::spawn()),
            device: None,
        }
    }

    /// Engine with default device selection and governor tuning
    pub fn with_defaults() -> Self {
        Self::new(AudioConfig::default(), GovernorConfig::default())
    }

    /// Acquire the configured output device. Idempotent: repeated calls
    /// (and every `start`) reuse the handle acquired the first time.
    pub fn initialize(&mut self) -> Result<()> {
        if self.device.is_none() {
            let device = audio::find_output_device(self.audio_config.output_device.as_ref())?;
            log::info!(
                "output device acquired: {}",
                device.name().unwrap_or_else(|_| "unknown".into())
            );
            self.device = Some(device);
        }
        Ok(())
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Begin a processing session.
    ///
    /// Fails with [`EngineError::AlreadyRunning`] if a session is live;
    /// device and capture acquisition failures propagate, leaving the
    /// engine back in `Idle` with any muted source restored.
    pub fn start(&mut self, source: SessionSource) -> Result<Session> {
        begin_transition(&self.state)?;
        log::info!("session initializing");

        let result = self.start_inner(source);
        if let Err(err) = &result {
            log::warn!("session start failed: {}", err);
            self.state.store(SessionState::Idle as u8, Ordering::Release);
        }
        result
    }

    fn start_inner(&mut self, source: SessionSource) -> Result<Session> {
        let atomics = Arc::new(SessionAtomics::new());
        let (command_tx, command_rx) = command_channel();

        self.initialize()?;
        let device = self
            .device
            .as_ref()
            .expect("initialize acquired the output device");
        let (stream_config, _) = audio::negotiated_output_config(device, &self.audio_config)?;
        let sample_rate = stream_config.sample_rate.0;

        let mut guard = SourceGuard::new(None);
        let is_capture;
        let (chain_source, capture_setup) = match source {
            SessionSource::Clip(clip) => {
                is_capture = false;
                let shared = Shared::new(&self.gc.handle(), clip);
                (ChainSource::Clip(StretchedReader::new(shared)), None)
            }
            SessionSource::Capture { control } => {
                is_capture = true;
                guard = SourceGuard::new(control);
                let capture_device =
                    audio::find_capture_device(self.audio_config.capture_device.as_ref())?;
                let (producer, consumer) = rtrb::RingBuffer::new(CAPTURE_QUEUE_SAMPLES);
                (
                    ChainSource::Capture(consumer),
                    Some((capture_device, producer)),
                )
            }
        };

        let chain = ProcessChain::new(
            chain_source,
            Arc::clone(&atomics),
            command_rx,
            sample_rate,
            &self.governor_config,
        );

        // Mute the captured player before any of its audio can double up
        // with the processed path. The guard restores it if anything below
        // fails.
        guard.mute();

        let mut streams = audio::start_output_stream(device, &stream_config, chain)?;
        if let Some((capture_device, producer)) = capture_setup {
            audio::start_capture_stream(&capture_device, &mut streams, producer)?;
        }

        let monitor = spawn_monitor(
            Arc::clone(&atomics),
            self.governor_config.clone(),
            is_capture,
        );

        self.state
            .store(SessionState::Processing as u8, Ordering::Release);
        log::info!(
            "session processing: {}Hz, ~{:.1}ms output latency{}",
            sample_rate,
            streams.latency_ms(),
            if is_capture { ", live capture" } else { "" }
        );

        Ok(Session {
            atomics,
            commands: command_tx,
            streams,
            monitor: Some(monitor),
            guard,
            state: Arc::clone(&self.state),
            gc_handle: self.gc.handle(),
            is_capture,
            stopped: false,
        })
    }
}

/// Idle/Stopped → Initializing; anything else is a live session.
fn begin_transition(state: &AtomicU8) -> Result<()> {
    match SessionState::from_u8(state.load(Ordering::Acquire)) {
        SessionState::Idle | SessionState::Stopped => {
            state.store(SessionState::Initializing as u8, Ordering::Release);
            Ok(())
        }
        SessionState::Initializing | SessionState::Processing => Err(EngineError::AlreadyRunning),
    }
}

fn spawn_monitor(
    atomics: Arc<SessionAtomics>,
    config: GovernorConfig,
    governor_active: bool,
) -> Monitor {
    let (shutdown_tx, shutdown_rx) = channel::bounded::<()>(1);
    let interval = Duration::from_millis(config.interval_ms.max(1));

    let thread = thread::Builder::new()
        .name("session-monitor".to_string())
        .spawn(move || {
            let ticker = channel::tick(interval);
            let mut governor = GovernorState::new(config);
            let mut fault_logged = false;
            loop {
                crossbeam::select! {
                    recv(shutdown_rx) -> _ => break,
                    recv(ticker) -> _ => {
                        // Feedback only closes the loop for live capture;
                        // clip playback keeps the governor dormant.
                        if governor_active {
                            if let Some(gain) = governor.update(atomics.hf_energy()) {
                                atomics.set_governor_gain(gain);
                                if gain < 1.0 {
                                    log::warn!(
                                        "sustained high-frequency energy; ducking output to {:.0} dB",
                                        20.0 * gain.log10()
                                    );
                                } else {
                                    log::info!("high-frequency energy normalized; restoring gain");
                                }
                            }
                        }
                        if !fault_logged {
                            if let Some(fault) = atomics.fault() {
                                log::error!(
                                    "processing fault: {}; session degraded to passthrough, stop and restart it",
                                    fault
                                );
                                fault_logged = true;
                            }
                        }
                    }
                }
            }
        })
        .expect("failed to spawn session-monitor thread");

    Monitor {
        shutdown: shutdown_tx,
        thread,
    }
}

/// A live processing session.
///
/// Continuous controls (`set_pitch`, `set_volume`, `set_stretch`) are
/// lock-free and take effect on the next audio block. Transport methods
/// enqueue commands drained at block boundaries. Dropping the session
/// stops it.
pub struct Session {
    atomics: Arc<SessionAtomics>,
    commands: CommandSender,
    streams: StreamHandle,
    monitor: Option<Monitor>,
    guard: SourceGuard,
    state: Arc<AtomicU8>,
    gc_handle: basedrop::Handle,
    is_capture: bool,
    stopped: bool,
}

impl Session {
    pub fn sample_rate(&self) -> u32 {
        self.streams.sample_rate()
    }

    pub fn latency_ms(&self) -> f32 {
        self.streams.latency_ms()
    }

    pub fn is_capture(&self) -> bool {
        self.is_capture
    }

    /// Shift pitch by `semitones`, clamped to one octave either way.
    pub fn set_pitch(&self, semitones: f32) {
        self.atomics
            .set_pitch_semitones(semitones.clamp(-MAX_SEMITONES, MAX_SEMITONES));
    }

    /// Master volume in 0..=1
    pub fn set_volume(&self, gain: f32) {
        self.atomics.set_volume(gain.clamp(0.0, 1.0));
    }

    /// Stretch playback duration by `factor` (clip sessions only; live
    /// capture has no read-ahead to stretch into).
    pub fn set_stretch(&self, factor: f64) -> Result<()> {
        if self.is_capture {
            return Err(EngineError::UnsupportedForCapture);
        }
        if !(factor > 0.0) || !factor.is_finite() {
            return Err(EngineError::InvalidStretchFactor(factor));
        }
        self.atomics.set_stretch_factor(factor as f32);
        Ok(())
    }

    /// Balance of the unprocessed and processed paths
    pub fn set_mix(&self, dry: f32, wet: f32) {
        self.atomics.set_dry_gain(dry.clamp(0.0, 1.0));
        self.atomics.set_wet_gain(wet.clamp(0.0, 1.0));
    }

    pub fn play(&mut self) {
        self.commands.send(SessionCommand::Play);
    }

    pub fn pause(&mut self) {
        self.commands.send(SessionCommand::Pause);
    }

    /// Jump to an input-domain frame
    pub fn seek(&mut self, frame: u64) {
        self.commands.send(SessionCommand::Seek(frame));
    }

    /// Loop a practice region (input-domain frames)
    pub fn set_loop_region(&mut self, start: u64, end: u64) {
        self.commands.send(SessionCommand::SetLoop { start, end });
    }

    pub fn clear_loop(&mut self) {
        self.commands.send(SessionCommand::ClearLoop);
    }

    /// Swap the playing clip without restarting the session
    pub fn replace_clip(&mut self, clip: AudioClip) {
        let shared = Shared::new(&self.gc_handle, clip);
        self.commands.send(SessionCommand::ReplaceClip(shared));
    }

    /// Playhead in input-domain frames
    pub fn position(&self) -> u64 {
        self.atomics.position()
    }

    pub fn play_state(&self) -> PlayState {
        self.atomics.play_state()
    }

    /// Peak output level of the most recent block
    pub fn peak(&self) -> f32 {
        self.atomics.peak()
    }

    /// True once clip playback has run off the end of the source
    pub fn ended(&self) -> bool {
        self.atomics.ended()
    }

    /// Fault raised by the processing path, if any. A faulted session
    /// passes audio through dry and should be stopped.
    pub fn fault(&self) -> Option<ProcessingFault> {
        self.atomics.fault()
    }

    /// Tear the session down: stop callbacks, join the monitor, release
    /// capture and restore the muted source. Synchronous: when this
    /// returns, nothing references the session's buffers.
    pub fn stop(mut self) -> Result<()> {
        self.teardown();
        Ok(())
    }

    fn teardown(&mut self) {
        if self.stopped {
            return;
        }
        log::info!("session stopping");
        // Order matters: silence the callbacks first, then the monitor,
        // then give the captured player its volume back.
        self.streams.shutdown();
        if let Some(monitor) = self.monitor.take() {
            let _ = monitor.shutdown.send(());
            let _ = monitor.thread.join();
        }
        self.guard.restore();
        self.atomics.set_play_state(PlayState::Stopped);
        self.state
            .store(SessionState::Stopped as u8, Ordering::Release);
        self.stopped = true;
        log::info!("session stopped");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    /// Records mute/restore calls for assertions
    struct MockControl {
        muted: Arc<AtomicBool>,
        restores: Arc<AtomicU8>,
    }

    impl SourceControl for MockControl {
        fn mute(&mut self) {
            self.muted.store(true, Ordering::SeqCst);
        }
        fn restore(&mut self) {
            self.muted.store(false, Ordering::SeqCst);
            self.restores.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn mock() -> (Box<dyn SourceControl>, Arc<AtomicBool>, Arc<AtomicU8>) {
        let muted = Arc::new(AtomicBool::new(false));
        let restores = Arc::new(AtomicU8::new(0));
        (
            Box::new(MockControl {
                muted: Arc::clone(&muted),
                restores: Arc::clone(&restores),
            }),
            muted,
            restores,
        )
    }

    #[test]
    fn transition_rejected_while_live() {
        let state = AtomicU8::new(SessionState::Idle as u8);
        assert!(begin_transition(&state).is_ok());
        // Now Initializing: a second start is rejected, not queued
        assert!(matches!(
            begin_transition(&state),
            Err(EngineError::AlreadyRunning)
        ));

        state.store(SessionState::Processing as u8, Ordering::Release);
        assert!(matches!(
            begin_transition(&state),
            Err(EngineError::AlreadyRunning)
        ));

        // Stopped re-enters Initializing
        state.store(SessionState::Stopped as u8, Ordering::Release);
        assert!(begin_transition(&state).is_ok());
    }

    #[test]
    fn guard_restores_on_explicit_restore() {
        let (control, muted, restores) = mock();
        let mut guard = SourceGuard::new(Some(control));
        guard.mute();
        assert!(muted.load(Ordering::SeqCst));
        guard.restore();
        assert!(!muted.load(Ordering::SeqCst));
        assert_eq!(restores.load(Ordering::SeqCst), 1);
        // Restoring twice does not double-fire
        guard.restore();
        assert_eq!(restores.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn guard_restores_on_drop() {
        let (control, muted, restores) = mock();
        {
            let mut guard = SourceGuard::new(Some(control));
            guard.mute();
            assert!(muted.load(Ordering::SeqCst));
            // Simulates an early error return: the guard goes out of scope
        }
        assert!(!muted.load(Ordering::SeqCst));
        assert_eq!(restores.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn guard_without_control_is_inert() {
        let mut guard = SourceGuard::new(None);
        guard.mute();
        guard.restore();
        // Nothing to assert beyond "did not panic"
    }

    #[test]
    fn unmuted_guard_does_not_restore() {
        let (control, _muted, restores) = mock();
        {
            let _guard = SourceGuard::new(Some(control));
            // Never muted
        }
        assert_eq!(restores.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn session_state_round_trip() {
        for state in [
            SessionState::Idle,
            SessionState::Initializing,
            SessionState::Processing,
            SessionState::Stopped,
        ] {
            assert_eq!(SessionState::from_u8(state as u8), state);
        }
    }
}
