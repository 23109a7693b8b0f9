//! Woodshed - headless practice player.
//!
//! Plays a track (or the capture device) through the pitch/stretch engine,
//! or renders a processed copy of a track to a WAV file.
//!
//! ## Command line flags
//!
//! - `--pitch <semitones>`: transpose by -12..=12 semitones
//! - `--tempo <percent>`: playback tempo as a percentage of the original
//!   (50..=200, 100 = unchanged)
//! - `--volume <gain>`: output level 0..=1
//! - `--loop <start:end>`: loop a practice region (seconds)
//! - `--capture`: process live capture instead of a file
//! - `--render <out.wav>`: render to a WAV file instead of playing
//! - `--hq`: use the phase vocoder for `--render` pitch shifting
//! - `--list-devices`: list audio devices and exit
//! - `--init-config`: write the config file (with current values) and exit

use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use woodshed_core::audio::{capture_devices, output_devices};
use woodshed_core::config::{default_config_path, load_config, save_config, AppConfig};
use woodshed_core::decode::load_clip;
use woodshed_core::engine::{Engine, Session, SessionSource};
use woodshed_core::render::{render_clip, PitchQuality};
use woodshed_core::types::{AudioClip, DEFAULT_SAMPLE_RATE};

/// Musically sane stretch range, matching the 50-200% tempo the flag accepts
const MIN_STRETCH: f64 = 0.5;
const MAX_STRETCH: f64 = 2.0;

#[derive(Debug)]
struct Args {
    file: Option<PathBuf>,
    render: Option<PathBuf>,
    capture: bool,
    list_devices: bool,
    init_config: bool,
    hq: bool,
    pitch: f32,
    tempo_percent: f64,
    volume: f32,
    /// Loop region in seconds
    loop_region: Option<(f64, f64)>,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            file: None,
            render: None,
            capture: false,
            list_devices: false,
            init_config: false,
            hq: false,
            pitch: 0.0,
            tempo_percent: 100.0,
            volume: 1.0,
            loop_region: None,
        }
    }
}

impl Args {
    fn parse(mut iter: impl Iterator<Item = String>) -> Result<Self> {
        let mut args = Args::default();
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                "--list-devices" => args.list_devices = true,
                "--init-config" => args.init_config = true,
                "--capture" => args.capture = true,
                "--hq" => args.hq = true,
                "--render" => {
                    args.render = Some(PathBuf::from(value(&mut iter, "--render")?));
                }
                "--pitch" => {
                    args.pitch = value(&mut iter, "--pitch")?
                        .parse()
                        .context("--pitch expects a number of semitones")?;
                }
                "--tempo" => {
                    let percent: f64 = value(&mut iter, "--tempo")?
                        .parse()
                        .context("--tempo expects a percentage")?;
                    if !(percent > 0.0) || !percent.is_finite() {
                        bail!("--tempo must be a positive percentage");
                    }
                    args.tempo_percent = percent;
                }
                "--volume" => {
                    let gain: f32 = value(&mut iter, "--volume")?
                        .parse()
                        .context("--volume expects a gain in 0..=1")?;
                    args.volume = gain.clamp(0.0, 1.0);
                }
                "--loop" => {
                    let region = value(&mut iter, "--loop")?;
                    let (a, b) = region
                        .split_once(':')
                        .context("--loop expects start:end in seconds")?;
                    let start: f64 = a.parse().context("--loop start is not a number")?;
                    let end: f64 = b.parse().context("--loop end is not a number")?;
                    if !(start >= 0.0 && end > start) {
                        bail!("--loop region must satisfy 0 <= start < end");
                    }
                    args.loop_region = Some((start, end));
                }
                other if !other.starts_with('-') => {
                    if args.file.is_some() {
                        bail!("unexpected argument: {}", other);
                    }
                    args.file = Some(PathBuf::from(other));
                }
                other => bail!("unknown flag: {} (try --help)", other),
            }
        }
        Ok(args)
    }
}

fn value(iter: &mut impl Iterator<Item = String>, flag: &str) -> Result<String> {
    iter.next().with_context(|| format!("{} expects a value", flag))
}

fn print_usage() {
    println!("woodshed - practice player: slow down or transpose without changing the other");
    println!();
    println!("USAGE:");
    println!("    woodshed [OPTIONS] <FILE>              play FILE through the engine");
    println!("    woodshed --capture [OPTIONS]           process live capture");
    println!("    woodshed --render <OUT> [OPTIONS] <FILE>  render a processed WAV");
    println!("    woodshed --list-devices");
    println!();
    println!("OPTIONS:");
    println!("    --pitch <SEMITONES>   transpose, -12..=12 (default 0)");
    println!("    --tempo <PERCENT>     tempo as % of original, 50..=200 (default 100)");
    println!("    --volume <GAIN>       output level 0..=1 (default 1)");
    println!("    --loop <START:END>    loop a practice region, in seconds");
    println!("    --hq                  phase-vocoder pitch shifting for --render");
    println!("    --init-config         write the config file and exit");
}

/// Tempo percentage to stretch factor (output length over input length),
/// clamped to the range the stretcher is happy in.
fn stretch_factor(tempo_percent: f64) -> f64 {
    let factor = 100.0 / tempo_percent;
    if (MIN_STRETCH..=MAX_STRETCH).contains(&factor) {
        factor
    } else {
        let clamped = factor.clamp(MIN_STRETCH, MAX_STRETCH);
        log::warn!(
            "tempo {}% is outside the 50-200% range, using {:.0}%",
            tempo_percent,
            100.0 / clamped
        );
        clamped
    }
}

fn main() -> Result<()> {
    // Initialize logger - set RUST_LOG=debug for verbose output
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args = Args::parse(std::env::args().skip(1))?;

    if args.list_devices {
        return list_devices();
    }

    let config_path = default_config_path();
    let mut config: AppConfig = load_config(&config_path);

    if args.init_config {
        save_config(&config, &config_path)?;
        println!("wrote {}", config_path.display());
        return Ok(());
    }

    let engine_rate = config.audio.sample_rate.unwrap_or(DEFAULT_SAMPLE_RATE);
    // Pin the stream to the decode rate so clips and device share one clock
    config.audio = config.audio.with_sample_rate(engine_rate);

    let stretch = stretch_factor(args.tempo_percent);

    if let Some(out) = args.render.clone() {
        let file = args.file.clone().context("--render needs an input file")?;
        return render(&file, &out, engine_rate, args.pitch, stretch, args.hq);
    }

    if args.capture {
        if (stretch - 1.0).abs() > f64::EPSILON {
            bail!("--tempo is unavailable for live capture; the stretcher needs read-ahead into the source");
        }
        return run_capture(config, &args);
    }

    let file = args.file.clone().context("no input file (try --help)")?;
    run_playback(config, &file, engine_rate, &args, stretch)
}

fn list_devices() -> Result<()> {
    println!("Output devices:");
    for device in output_devices()? {
        println!(
            "  {} {}{}",
            if device.is_default { "*" } else { " " },
            device.id.name,
            device
                .sample_rate
                .map(|r| format!(" ({} Hz)", r))
                .unwrap_or_default()
        );
    }
    println!("Capture devices:");
    let captures = capture_devices()?;
    if captures.is_empty() {
        println!("  (none)");
    }
    for device in captures {
        println!(
            "  {} {}{}",
            if device.is_default { "*" } else { " " },
            device.id.name,
            device
                .sample_rate
                .map(|r| format!(" ({} Hz)", r))
                .unwrap_or_default()
        );
    }
    Ok(())
}

fn run_playback(
    config: AppConfig,
    file: &Path,
    engine_rate: u32,
    args: &Args,
    stretch: f64,
) -> Result<()> {
    let clip = load_clip(file, engine_rate)?;
    let duration = clip.duration_seconds();
    log::info!("loaded {} ({:.1}s)", file.display(), duration);

    let mut engine = Engine::new(config.audio, config.governor);
    let mut session = engine.start(SessionSource::Clip(clip))?;
    session.set_pitch(args.pitch);
    session.set_volume(args.volume);
    if (stretch - 1.0).abs() > f64::EPSILON {
        session.set_stretch(stretch)?;
    }
    if let Some((start, end)) = args.loop_region {
        let rate = session.sample_rate() as f64;
        session.set_loop_region((start * rate) as u64, (end * rate) as u64);
    }

    println!("playing - press Enter to stop");
    watch_session(&session, Some(duration));
    session.stop()?;
    Ok(())
}

fn run_capture(config: AppConfig, args: &Args) -> Result<()> {
    let mut engine = Engine::new(config.audio, config.governor);
    // No player to mute from a standalone CLI; the feedback governor still
    // rides the output gain.
    let session = engine.start(SessionSource::Capture { control: None })?;
    session.set_pitch(args.pitch);
    session.set_volume(args.volume);

    println!("processing live capture - press Enter to stop");
    watch_session(&session, None);
    session.stop()?;
    Ok(())
}

/// Poll the session until it ends or the user presses Enter, printing a
/// one-line position/peak readout.
fn watch_session(session: &Session, duration: Option<f64>) {
    let stop = stdin_watcher();
    let rate = session.sample_rate() as f64;
    loop {
        if stop.try_recv().is_ok() || session.ended() {
            break;
        }
        if let Some(fault) = session.fault() {
            log::error!("stopping faulted session: {}", fault);
            break;
        }
        let position = session.position() as f64 / rate;
        match duration {
            Some(total) => print!("\r{:7.1}s / {:.1}s  peak {:5.2}", position, total, session.peak()),
            None => print!("\r{:7.1}s  peak {:5.2}", position, session.peak()),
        }
        let _ = std::io::stdout().flush();
        thread::sleep(Duration::from_millis(100));
    }
    println!();
}

/// Fires once when the user presses Enter
fn stdin_watcher() -> mpsc::Receiver<()> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut line = String::new();
        let _ = std::io::stdin().read_line(&mut line);
        let _ = tx.send(());
    });
    rx
}

fn render(
    file: &Path,
    out: &Path,
    engine_rate: u32,
    pitch: f32,
    stretch: f64,
    hq: bool,
) -> Result<()> {
    let clip = load_clip(file, engine_rate)?;
    let quality = if hq {
        PitchQuality::Vocoder
    } else {
        PitchQuality::Granular
    };
    log::info!(
        "rendering {} ({:+.1} st, {:.2}x, {:?})",
        file.display(),
        pitch,
        stretch,
        quality
    );

    let rendered = render_clip(&clip, pitch, stretch, quality)?;
    write_wav(&rendered, out)?;
    println!("wrote {} ({:.1}s)", out.display(), rendered.duration_seconds());
    Ok(())
}

/// Write a clip as 16-bit PCM WAV
fn write_wav(clip: &AudioClip, path: &Path) -> Result<()> {
    let spec = hound::WavSpec {
        channels: clip.channel_count() as u16,
        sample_rate: clip.sample_rate(),
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)
        .with_context(|| format!("creating {}", path.display()))?;

    for i in 0..clip.frames() {
        for ch in 0..clip.channel_count() {
            let clamped = clip.channel(ch)[i].clamp(-1.0, 1.0);
            writer
                .write_sample((clamped * 32767.0) as i16)
                .context("writing WAV sample")?;
        }
    }
    writer.finalize().context("finalizing WAV file")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Args> {
        Args::parse(args.iter().map(|s| s.to_string()))
    }

    #[test]
    fn defaults_are_neutral() {
        let args = parse(&["take-five.flac"]).unwrap();
        assert_eq!(args.file.as_deref(), Some(Path::new("take-five.flac")));
        assert_eq!(args.pitch, 0.0);
        assert_eq!(args.tempo_percent, 100.0);
        assert_eq!(args.volume, 1.0);
        assert!(!args.capture);
        assert!(args.render.is_none());
    }

    #[test]
    fn flags_with_values() {
        let args = parse(&[
            "--pitch", "-3", "--tempo", "75", "--volume", "0.8", "--loop", "12.5:30",
            "song.mp3",
        ])
        .unwrap();
        assert_eq!(args.pitch, -3.0);
        assert_eq!(args.tempo_percent, 75.0);
        assert_eq!(args.volume, 0.8);
        assert_eq!(args.loop_region, Some((12.5, 30.0)));
    }

    #[test]
    fn rejects_bad_input() {
        assert!(parse(&["--tempo", "0", "x.wav"]).is_err());
        assert!(parse(&["--loop", "30:12", "x.wav"]).is_err());
        assert!(parse(&["--loop", "nope", "x.wav"]).is_err());
        assert!(parse(&["--pitch"]).is_err());
        assert!(parse(&["--frobnicate"]).is_err());
        assert!(parse(&["a.wav", "b.wav"]).is_err());
    }

    #[test]
    fn volume_clamps_to_unity() {
        let args = parse(&["--volume", "3.5", "x.wav"]).unwrap();
        assert_eq!(args.volume, 1.0);
    }

    #[test]
    fn tempo_to_stretch() {
        assert!((stretch_factor(100.0) - 1.0).abs() < 1e-9);
        // Half tempo doubles the duration
        assert!((stretch_factor(50.0) - 2.0).abs() < 1e-9);
        assert!((stretch_factor(200.0) - 0.5).abs() < 1e-9);
        // Out-of-range tempi clamp to the sane window
        assert_eq!(stretch_factor(10.0), MAX_STRETCH);
        assert_eq!(stretch_factor(500.0), MIN_STRETCH);
    }
}
