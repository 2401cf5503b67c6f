//! Damage-driven capture daemon for the local X display.

use anyhow::Context;
use clap::{Parser, ValueEnum};
use damage_capture_rust::{
    BitstreamDump, BmpDumper, CaptureDump, CaptureOrchestratorBuilder, ChannelSink,
    HwEncoderConfig, OrchestratorConfig,
};
use signal_hook::consts::signal::{SIGINT, SIGTERM};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Clone, Copy, ValueEnum)]
enum CodecArg {
    H264,
    Hevc,
}

#[derive(Parser)]
#[command(name = "damage-capture")]
#[command(about = "Capture X11 screen changes as stills or a hardware-encoded stream")]
#[command(version)]
struct Cli {
    /// X display to capture (defaults to $DISPLAY)
    #[arg(long)]
    display: Option<String>,

    /// Activity expiry tick in milliseconds
    #[arg(long, default_value_t = 100)]
    tick_ms: u64,

    /// Stream codec
    #[arg(long, value_enum, default_value = "hevc")]
    codec: CodecArg,

    /// Write damaged-region stills as numbered BMP files into this directory
    #[arg(long)]
    dump_dir: Option<PathBuf>,

    /// Append encoded frames to this file
    #[arg(long)]
    bitstream: Option<PathBuf>,

    /// Log level when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Grab stills while streaming has no encoder session
    #[arg(long)]
    still_fallback: bool,

    /// Output queue length between the capture loop and the file writer
    #[arg(long, default_value_t = 64)]
    queue: usize,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&cli.log_level))
        .init();
    log::info!(
        "damage-capture {} ({})",
        damage_capture_rust::version(),
        damage_capture_rust::capabilities()
    );

    let stop = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(SIGINT, Arc::clone(&stop)).context("register SIGINT")?;
    signal_hook::flag::register(SIGTERM, Arc::clone(&stop)).context("register SIGTERM")?;

    let encoder = match cli.codec {
        CodecArg::H264 => HwEncoderConfig::h264(),
        CodecArg::Hevc => HwEncoderConfig::default(),
    };
    let config = OrchestratorConfig {
        display: cli.display.clone(),
        tick_interval: Duration::from_millis(cli.tick_ms),
        encoder,
        still_fallback_on_encoder_failure: cli.still_fallback,
        ..Default::default()
    };

    let mut dump = CaptureDump::default();
    if let Some(dir) = &cli.dump_dir {
        dump.stills = Some(BmpDumper::new(dir).context("create still dump directory")?);
    }
    if let Some(path) = &cli.bitstream {
        dump.bitstream = Some(BitstreamDump::create(path).context("create bitstream file")?);
    }

    let (sink, receiver) = ChannelSink::bounded(cli.queue);
    let dropped = sink.dropped_handle();

    let writer = thread::Builder::new()
        .name("capture-writer".to_string())
        .spawn(move || {
            for output in receiver {
                if let Err(e) = dump.write(&output) {
                    log::error!("Dump write failed: {}", e);
                }
            }
            if let Err(e) = dump.flush() {
                log::error!("Dump flush failed: {}", e);
            }
        })
        .context("spawn writer thread")?;

    let mut orchestrator = CaptureOrchestratorBuilder::new()
        .config(config)
        .sink(move |output| sink.send(output))
        .connect()
        .context("start capture")?;
    let stats = orchestrator.stats_handle();

    let result = orchestrator.run(&stop);

    // Dropping the orchestrator closes the channel and ends the writer
    drop(orchestrator);
    if writer.join().is_err() {
        log::error!("Writer thread panicked");
    }

    let stats = stats.lock().clone();
    log::info!(
        "Captured {} stills, {} frames ({} bytes); {} sessions, {} creation failures, {} reconfigures, {} outputs dropped, {:.1}% streamed",
        stats.stills_captured,
        stats.frames_encoded,
        stats.bytes_encoded,
        stats.sessions_created,
        stats.session_create_failures,
        stats.reconfigures,
        dropped.load(Ordering::Relaxed),
        stats.streaming_share_percent()
    );

    result.context("capture loop")?;
    Ok(())
}
