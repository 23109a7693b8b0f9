//! The per-session processing chain, driven from the audio callback.
//!
//! Source → dry/wet split → pitch stage (wet) → mix → volume & governor
//! gain → safety clipper → device. The chain owns every buffer it touches;
//! all of them are allocated at construction and `render` never allocates,
//! blocks, or performs I/O. Parameters arrive through [`SessionAtomics`]
//! (sampled once per block) and transport commands through the SPSC queue
//! (drained at block boundaries).

use std::sync::Arc;

use basedrop::Shared;

use crate::dsp::pitch::PitchShifter;
use crate::dsp::stretch::StretchedReader;
use crate::effect::{SafetyClipper, SmoothedGain};
use crate::engine::atomics::SessionAtomics;
use crate::engine::command::SessionCommand;
use crate::engine::governor::{GovernorConfig, HighpassEnergy};
use crate::error::ProcessingFault;
use crate::types::{AudioClip, PlayState, StereoBuffer};

/// Largest block the chain processes at once; covers every buffer size the
/// backend negotiates. Larger callbacks are split.
pub const MAX_BLOCK_FRAMES: usize = 8192;

/// Capacity of the capture sample queue (interleaved samples); roughly
/// 90ms of stereo at 48kHz, enough to ride out scheduling jitter between
/// the capture and output callbacks.
pub const CAPTURE_QUEUE_SAMPLES: usize = 8192;

/// Where a session's samples come from.
pub enum ChainSource {
    /// A decoded clip played through the streaming time stretcher.
    /// `Shared` keeps the final drop off the audio thread.
    Clip(StretchedReader<Shared<AudioClip>>),
    /// Interleaved stereo samples arriving from a live capture callback
    Capture(rtrb::Consumer<f32>),
}

/// The session's signal path, owned exclusively by the output callback.
pub struct ProcessChain {
    source: ChainSource,
    pitch: PitchShifter,
    dry_gain: SmoothedGain,
    wet_gain: SmoothedGain,
    volume: SmoothedGain,
    governor: SmoothedGain,
    clipper: SafetyClipper,
    hf_meter: HighpassEnergy,
    atomics: Arc<SessionAtomics>,
    commands: rtrb::Consumer<SessionCommand>,
    source_block: StereoBuffer,
    wet_block: StereoBuffer,
    loop_region: Option<(u64, u64)>,
    playing: bool,
    /// Once a fault is raised the chain degrades to dry passthrough
    fault_bypass: bool,
    /// Frames processed, drives the position readout for capture sources
    capture_frames: u64,
}

impl ProcessChain {
    pub fn new(
        source: ChainSource,
        atomics: Arc<SessionAtomics>,
        commands: rtrb::Consumer<SessionCommand>,
        sample_rate: u32,
        governor_config: &GovernorConfig,
    ) -> Self {
        let mut chain = Self {
            source,
            pitch: PitchShifter::new(),
            dry_gain: SmoothedGain::new(sample_rate, governor_config.ramp_ms, 0.0),
            wet_gain: SmoothedGain::new(sample_rate, governor_config.ramp_ms, 1.0),
            volume: SmoothedGain::new(sample_rate, governor_config.ramp_ms, 1.0),
            governor: SmoothedGain::new(sample_rate, governor_config.ramp_ms, 1.0),
            clipper: SafetyClipper::new(),
            hf_meter: HighpassEnergy::new(sample_rate, governor_config.highpass_hz),
            atomics,
            commands,
            source_block: StereoBuffer::silence(MAX_BLOCK_FRAMES),
            wet_block: StereoBuffer::silence(MAX_BLOCK_FRAMES),
            loop_region: None,
            playing: true,
            fault_bypass: false,
            capture_frames: 0,
        };
        chain.atomics.set_play_state(PlayState::Playing);
        chain
    }

    /// Shareable clip-activity indicator from the output clipper
    pub fn clip_indicator(&self) -> std::sync::Arc<std::sync::atomic::AtomicBool> {
        self.clipper.clip_indicator()
    }

    /// Render one callback's worth of interleaved stereo output.
    pub fn render(&mut self, output: &mut [f32]) {
        for chunk in output.chunks_mut(MAX_BLOCK_FRAMES * 2) {
            self.render_block(chunk);
        }
    }

    fn render_block(&mut self, output: &mut [f32]) {
        self.drain_commands();

        let frames = output.len() / 2;
        self.source_block.set_len_from_capacity(frames);
        self.wet_block.set_len_from_capacity(frames);

        self.pull_source(frames);

        // Wet path: copy of the source through the pitch stage
        self.wet_block
            .as_mut_slice()
            .copy_from_slice(self.source_block.as_slice());
        let semitones = self.atomics.pitch_semitones();
        if semitones != self.pitch.semitones() {
            self.pitch.set_semitones(semitones);
        }
        if !self.fault_bypass {
            self.pitch.process(&mut self.wet_block);
        }

        // Mix and level. The governor gain rides on top of the user volume
        // so a duck never erases the user's setting.
        self.dry_gain.set_target(self.atomics.dry_gain());
        self.wet_gain.set_target(self.atomics.wet_gain());
        self.volume.set_target(self.atomics.volume().clamp(0.0, 1.0));
        self.governor.set_target(self.atomics.governor_gain());
        for i in 0..frames {
            let dry = self.source_block[i] * self.dry_gain.next();
            let wet = self.wet_block[i] * self.wet_gain.next();
            let level = self.volume.next() * self.governor.next();
            self.wet_block[i] = (dry + wet) * level;
        }

        self.clipper.process(&mut self.wet_block);

        // A stage that produced non-finite samples has violated its
        // invariants; degrade to dry passthrough rather than handing the
        // device garbage. The callback has no error channel, so the fault
        // is reported through the atomics.
        if !self.fault_bypass {
            let finite = self
                .wet_block
                .iter()
                .all(|f| f.left.is_finite() && f.right.is_finite());
            if !finite {
                self.atomics.raise_fault(ProcessingFault::NonFiniteOutput);
                self.fault_bypass = true;
            }
        }
        if self.fault_bypass {
            self.wet_block
                .as_mut_slice()
                .copy_from_slice(self.source_block.as_slice());
        }

        self.atomics.set_peak(self.wet_block.peak());
        self.atomics
            .set_hf_energy(self.hf_meter.measure(&self.wet_block));

        output.copy_from_slice(self.wet_block.as_interleaved());
    }

    fn pull_source(&mut self, frames: usize) {
        match &mut self.source {
            ChainSource::Clip(reader) => {
                if !self.playing {
                    self.source_block.fill_silence();
                    return;
                }
                reader.set_factor(self.atomics.stretch_factor() as f64);
                if let Some((start, end)) = self.loop_region {
                    if reader.position() >= end as f64 {
                        reader.seek(start as usize);
                    }
                }
                let produced = reader.fill(&mut self.source_block);
                if reader.is_finished() && produced < frames {
                    if let Some((start, _)) = self.loop_region {
                        // Looping past the clip end wraps instead of stopping
                        reader.seek(start as usize);
                    } else {
                        self.playing = false;
                        self.atomics.set_ended(true);
                        self.atomics.set_play_state(PlayState::Stopped);
                    }
                }
                self.atomics.set_position(reader.position() as u64);
            }
            ChainSource::Capture(consumer) => {
                // Underruns read as silence; the capture callback may not
                // have filled the queue yet.
                for sample in self.source_block.as_interleaved_mut() {
                    *sample = consumer.pop().unwrap_or(0.0);
                }
                self.capture_frames += frames as u64;
                self.atomics.set_position(self.capture_frames);
            }
        }
    }

    fn drain_commands(&mut self) {
        while let Ok(command) = self.commands.pop() {
            match command {
                SessionCommand::Play => {
                    self.playing = true;
                    self.atomics.set_ended(false);
                    self.atomics.set_play_state(PlayState::Playing);
                }
                SessionCommand::Pause => {
                    self.playing = false;
                    self.atomics.set_play_state(PlayState::Paused);
                }
                SessionCommand::Seek(frame) => {
                    if let ChainSource::Clip(reader) = &mut self.source {
                        reader.seek(frame as usize);
                        self.atomics.set_position(frame);
                        self.atomics.set_ended(false);
                    }
                }
                SessionCommand::SetLoop { start, end } => {
                    if start < end {
                        self.loop_region = Some((start, end));
                    }
                }
                SessionCommand::ClearLoop => {
                    self.loop_region = None;
                }
                SessionCommand::ReplaceClip(clip) => {
                    if let ChainSource::Clip(reader) = &mut self.source {
                        // replace_clip reuses the reader's buffers; the old
                        // Shared drops here and basedrop defers the free.
                        reader.replace_clip(clip);
                        self.atomics.set_position(0);
                        self.atomics.set_ended(false);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::command::command_channel;
    use crate::engine::gc::AudioGc;
    use crate::types::AudioClip;

    const SAMPLE_RATE: u32 = 44100;

    fn sine_clip(freq: f32, seconds: f32) -> AudioClip {
        let len = (SAMPLE_RATE as f32 * seconds) as usize;
        let samples: Vec<f32> = (0..len)
            .map(|i| (std::f32::consts::TAU * freq * i as f32 / SAMPLE_RATE as f32).sin() * 0.5)
            .collect();
        AudioClip::from_mono(samples, SAMPLE_RATE)
    }

    fn clip_chain(
        clip: AudioClip,
        gc: &AudioGc,
    ) -> (
        ProcessChain,
        Arc<SessionAtomics>,
        crate::engine::command::CommandSender,
    ) {
        let atomics = Arc::new(SessionAtomics::new());
        let (tx, rx) = command_channel();
        let shared = Shared::new(&gc.handle(), clip);
        let chain = ProcessChain::new(
            ChainSource::Clip(StretchedReader::new(shared)),
            Arc::clone(&atomics),
            rx,
            SAMPLE_RATE,
            &GovernorConfig::default(),
        );
        (chain, atomics, tx)
    }

    fn rms(block: &[f32]) -> f32 {
        (block.iter().map(|&s| s * s).sum::<f32>() / block.len() as f32).sqrt()
    }

    #[test]
    fn renders_audio_from_clip() {
        let gc = AudioGc::spawn();
        let (mut chain, _atomics, _tx) = clip_chain(sine_clip(440.0, 1.0), &gc);

        let mut out = vec![0.0f32; 1024];
        // Skip the stretcher's seed-up
        for _ in 0..4 {
            chain.render(&mut out);
        }
        assert!(rms(&out) > 0.1, "rms {}", rms(&out));
        assert!(out.iter().all(|s| s.is_finite()));
    }

    #[test]
    fn pause_outputs_silence_and_holds_position() {
        let gc = AudioGc::spawn();
        let (mut chain, atomics, mut tx) = clip_chain(sine_clip(440.0, 1.0), &gc);

        let mut out = vec![0.0f32; 512];
        chain.render(&mut out);
        tx.send(SessionCommand::Pause);
        chain.render(&mut out);
        let held = atomics.position();
        chain.render(&mut out);
        assert_eq!(atomics.position(), held);
        assert!(out.iter().all(|&s| s == 0.0));
        assert_eq!(atomics.play_state(), PlayState::Paused);

        tx.send(SessionCommand::Play);
        for _ in 0..4 {
            chain.render(&mut out);
        }
        assert!(atomics.position() > held);
    }

    #[test]
    fn playback_ends_at_clip_end() {
        let gc = AudioGc::spawn();
        // A short clip ends within a few blocks
        let (mut chain, atomics, _tx) = clip_chain(sine_clip(440.0, 0.1), &gc);

        let mut out = vec![0.0f32; 2048];
        for _ in 0..40 {
            chain.render(&mut out);
            if atomics.ended() {
                break;
            }
        }
        assert!(atomics.ended());
        assert_eq!(atomics.play_state(), PlayState::Stopped);
        // Once ended, output is silence
        chain.render(&mut out);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn loop_region_wraps_position() {
        let gc = AudioGc::spawn();
        let (mut chain, atomics, mut tx) = clip_chain(sine_clip(440.0, 1.0), &gc);

        tx.send(SessionCommand::SetLoop { start: 4410, end: 8820 });
        let mut out = vec![0.0f32; 2048];
        let mut max_pos = 0u64;
        for _ in 0..60 {
            chain.render(&mut out);
            max_pos = max_pos.max(atomics.position());
        }
        // Position never escapes far past the loop end and never ends
        assert!(max_pos < 8820 + crate::dsp::FRAME_SIZE as u64 * 2, "max {}", max_pos);
        assert!(!atomics.ended());
    }

    #[test]
    fn volume_atomic_scales_output() {
        let gc = AudioGc::spawn();
        let (mut chain, atomics, _tx) = clip_chain(sine_clip(440.0, 2.0), &gc);

        let mut out = vec![0.0f32; 1024];
        for _ in 0..8 {
            chain.render(&mut out);
        }
        let loud = rms(&out);

        atomics.set_volume(0.1);
        // Let the ramp settle
        for _ in 0..20 {
            chain.render(&mut out);
        }
        let soft = rms(&out);
        assert!(soft < loud * 0.25, "loud {} soft {}", loud, soft);
    }

    #[test]
    fn governor_gain_ducks_output() {
        let gc = AudioGc::spawn();
        let (mut chain, atomics, _tx) = clip_chain(sine_clip(440.0, 2.0), &gc);

        let mut out = vec![0.0f32; 1024];
        for _ in 0..8 {
            chain.render(&mut out);
        }
        let before = rms(&out);

        atomics.set_governor_gain(GovernorConfig::default().duck_gain());
        for _ in 0..30 {
            chain.render(&mut out);
        }
        let after = rms(&out);
        assert!(after < before * 0.2, "before {} after {}", before, after);
    }

    #[test]
    fn capture_underrun_is_silence() {
        let (_producer, consumer) = rtrb::RingBuffer::<f32>::new(CAPTURE_QUEUE_SAMPLES);
        let atomics = Arc::new(SessionAtomics::new());
        let (_tx, rx) = command_channel();
        let mut chain = ProcessChain::new(
            ChainSource::Capture(consumer),
            Arc::clone(&atomics),
            rx,
            SAMPLE_RATE,
            &GovernorConfig::default(),
        );

        let mut out = vec![1.0f32; 512];
        chain.render(&mut out);
        assert!(out.iter().all(|&s| s == 0.0));
        assert_eq!(atomics.position(), 256);
    }

    #[test]
    fn capture_passes_samples_through() {
        let (mut producer, consumer) = rtrb::RingBuffer::<f32>::new(CAPTURE_QUEUE_SAMPLES);
        let atomics = Arc::new(SessionAtomics::new());
        let (_tx, rx) = command_channel();
        let mut chain = ProcessChain::new(
            ChainSource::Capture(consumer),
            Arc::clone(&atomics),
            rx,
            SAMPLE_RATE,
            &GovernorConfig::default(),
        );

        for i in 0..1024 {
            let s = (std::f32::consts::TAU * 440.0 * (i / 2) as f32 / SAMPLE_RATE as f32).sin() * 0.5;
            producer.push(s).unwrap();
        }
        let mut out = vec![0.0f32; 1024];
        chain.render(&mut out);
        assert!(rms(&out) > 0.1);
    }

    #[test]
    fn seek_command_moves_playhead() {
        let gc = AudioGc::spawn();
        let (mut chain, atomics, mut tx) = clip_chain(sine_clip(440.0, 2.0), &gc);

        tx.send(SessionCommand::Seek(44100));
        let mut out = vec![0.0f32; 512];
        chain.render(&mut out);
        assert!(atomics.position() >= 44100);
    }

    #[test]
    fn replace_clip_restarts_from_zero() {
        let gc = AudioGc::spawn();
        let (mut chain, atomics, mut tx) = clip_chain(sine_clip(440.0, 1.0), &gc);

        let mut out = vec![0.0f32; 2048];
        for _ in 0..8 {
            chain.render(&mut out);
        }
        assert!(atomics.position() > 0);

        let replacement = Shared::new(&gc.handle(), sine_clip(880.0, 1.0));
        tx.send(SessionCommand::ReplaceClip(replacement));
        chain.render(&mut out);
        assert!(atomics.position() < 4096);
        assert!(rms(&out) > 0.1);
    }
}
