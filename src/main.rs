use anyhow::{Context, Result, bail};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use framerec::config::RecorderSettings;
use framerec::screencast::synthetic::{TestPattern, ToneGenerator};
use framerec::screencast::{GstEncoderFactory, RecordingSession, WorkerSignal};

static STOP_REQUESTED: AtomicBool = AtomicBool::new(false);

const DEFAULT_FRAMES: u64 = 300;
const PATTERN_SIZE: (u32, u32) = (1280, 720);
const SAMPLE_RATE: u32 = 48_000;
const CHANNELS: u32 = 2;
const TONE_HZ: f32 = 440.0;
/// Audio is delivered in 10ms blocks
const AUDIO_BLOCK: Duration = Duration::from_millis(10);

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let frames = parse_frames(std::env::args().skip(1))?;
    setup_signal_handler();

    let settings = RecorderSettings::load();
    let frame_rate = settings.frame_rate.max(1);

    let host = TestPattern::new(PATTERN_SIZE.0, PATTERN_SIZE.1)?;
    let signal = Arc::new(WorkerSignal::spawn()?);
    let mut session = RecordingSession::new(
        settings,
        host,
        Box::new(ToneGenerator::new(SAMPLE_RATE, CHANNELS, TONE_HZ)),
        Arc::new(GstEncoderFactory),
        signal,
    );

    session
        .begin_recording()
        .context("Failed to start recording")?;
    if let Some(path) = session.output_path() {
        log::info!("Writing {} frames to {}", frames, path.display());
    }

    let audio_input = session.audio_input();
    let audio_running = Arc::new(AtomicBool::new(true));
    let audio_thread = {
        let running = audio_running.clone();
        std::thread::Builder::new()
            .name("framerec-audio".into())
            .spawn(move || {
                let mut tone = ToneGenerator::new(SAMPLE_RATE, CHANNELS, TONE_HZ);
                let block_frames = (SAMPLE_RATE as u128 * AUDIO_BLOCK.as_millis() / 1000) as usize;
                while running.load(Ordering::Relaxed) {
                    let block = tone.next_block(block_frames);
                    if let Err(e) = audio_input.push(&block, CHANNELS) {
                        log::debug!("Audio block rejected: {}", e);
                    }
                    std::thread::sleep(AUDIO_BLOCK);
                }
            })
            .context("Failed to spawn audio thread")?
    };

    let frame_duration = Duration::from_secs_f64(1.0 / frame_rate as f64);
    let mut frame_index = 0u64;
    while frame_index < frames && !STOP_REQUESTED.load(Ordering::Relaxed) {
        let frame_start = Instant::now();

        session.host_mut().render(frame_index);
        session.on_frame(frame_index);
        frame_index += 1;

        // Frame rate limiting
        let frame_elapsed = frame_start.elapsed();
        if frame_elapsed < frame_duration {
            std::thread::sleep(frame_duration - frame_elapsed);
        }
    }

    audio_running.store(false, Ordering::Relaxed);
    if audio_thread.join().is_err() {
        log::error!("Audio thread panicked");
    }

    let output = session.output_path().map(|p| p.to_path_buf());
    session.end_recording().context("Failed to stop recording")?;
    if let Some(path) = output {
        log::info!("Recording saved to {}", path.display());
    }
    Ok(())
}

fn parse_frames(mut args: impl Iterator<Item = String>) -> Result<u64> {
    let mut frames = DEFAULT_FRAMES;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--frames" => {
                let value = args.next().context("--frames requires a value")?;
                frames = value
                    .parse()
                    .with_context(|| format!("Invalid frame count: {}", value))?;
            }
            other => bail!("Unknown argument: {}", other),
        }
    }
    Ok(frames)
}

/// Set up signal handler for SIGTERM and SIGINT
fn setup_signal_handler() {
    use std::sync::Once;
    static INIT: Once = Once::new();

    INIT.call_once(|| unsafe {
        let handler = stop_handler as extern "C" fn(libc::c_int) as libc::sighandler_t;
        libc::signal(libc::SIGTERM, handler);
        libc::signal(libc::SIGINT, handler);
    });
}

extern "C" fn stop_handler(_: libc::c_int) {
    STOP_REQUESTED.store(true, Ordering::Relaxed);
}
