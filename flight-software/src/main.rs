//! perseid: on-camera meteor detector and timelapse stacker.
//!
//! A single grab loop feeds two subsystems from every capture frame:
//! the RMS FTP meteor detector (downsampled 640×480 luma, 256-frame
//! blocks) and the full-resolution timelapse stacker. Detections and
//! stacks are pushed to the LAN receiver over plain HTTP.

use anyhow::{bail, Context, Result};
use clap::Parser;
use detector::{DetectConfig, DetectionEngine};
use flight_software::{darkcap, IngestDriver};
use shared::capture::{FrameSource, SyntheticFrameSource};
use shared::clock::MonotonicClock;
use shared::encode::JpegStackEncoder;
use shared::push::{PushClient, PushConfig};
use stacker::{Stacker, StackerConfig};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};

#[derive(Parser, Debug)]
#[command(name = "perseid", version, about = "Meteor detection and stacking station")]
struct Args {
    /// Receiver IP address.
    #[arg(short = 'S', long, default_value = "192.168.1.245")]
    server: String,

    /// Receiver port.
    #[arg(long, default_value_t = 8765)]
    port: u16,

    /// RMS station identifier, e.g. XX0001.
    #[arg(short = 'I', long, default_value = "XX0001")]
    station: String,

    /// Numeric camera id for FF headers.
    #[arg(long, default_value_t = 1)]
    camno: u32,

    /// Seconds of frames averaged per stack image.
    #[arg(short = 't', long, default_value_t = 30)]
    stack_secs: u32,

    /// JPEG quality 1-100.
    #[arg(short = 'q', long, default_value_t = 85)]
    quality: u8,

    /// Dark frame file (see --capture-dark).
    #[arg(short = 'd', long)]
    dark: Option<PathBuf>,

    /// Staging directory for FF files awaiting upload.
    #[arg(long, default_value = "/tmp/perseid-ff")]
    ff_staging: PathBuf,

    /// Staging directory for stack JPEGs awaiting upload.
    #[arg(long, default_value = "/tmp/perseid-stack")]
    stack_staging: PathBuf,

    /// Frame source ("synthetic" until a vendor capture backend is wired).
    #[arg(long, default_value = "synthetic")]
    source: String,

    /// Capture resolution width.
    #[arg(long, default_value_t = 1920)]
    width: usize,

    /// Capture resolution height.
    #[arg(long, default_value_t = 1080)]
    height: usize,

    /// Average this many frames into a dark file at --dark, then exit.
    #[arg(long, value_name = "FRAMES")]
    capture_dark: Option<u32>,

    /// Stop after this many seconds (default: run until killed).
    #[arg(long)]
    duration_secs: Option<u64>,
}

fn make_source(args: &Args) -> Result<Box<dyn FrameSource>> {
    match args.source.as_str() {
        // One synthetic streak roughly every 20 s at 25 fps.
        "synthetic" => Ok(Box::new(SyntheticFrameSource::new(
            args.width,
            args.height,
            500,
        ))),
        other => bail!("unknown frame source '{other}'"),
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();
    let args = Args::parse();

    info!(
        "perseid starting: server={}:{} station={} stack={}s q={}",
        args.server, args.port, args.station, args.stack_secs, args.quality
    );

    let mut source = make_source(&args)?;

    if let Some(frames) = args.capture_dark {
        let out = args
            .dark
            .clone()
            .context("--capture-dark needs --dark for the output path")?;
        return darkcap::capture_dark(source.as_mut(), frames, &out);
    }

    let push = PushClient::new(PushConfig {
        server_ip: args.server.clone(),
        server_port: args.port,
        timeout_ms: 5000,
    });

    let detect_cfg = DetectConfig {
        ff_tmp_dir: args.ff_staging.clone(),
        ..DetectConfig::default()
    };
    let fps = detect_cfg.fps;
    let engine = DetectionEngine::new(detect_cfg, push.clone(), &args.station, args.camno)
        .context("starting detection engine")?;

    let stacker = Stacker::new(
        StackerConfig {
            width: args.width,
            height: args.height,
            frames_per_stack: (args.stack_secs as f32 * fps).round() as u32,
            jpeg_quality: args.quality,
            station_id: args.station.clone(),
            dark_path: args.dark.clone(),
            staging_dir: args.stack_staging.clone(),
        },
        push,
        Box::new(JpegStackEncoder),
        None,
    )
    .context("starting stacker")?;

    let mut driver = IngestDriver::new(source, Box::new(MonotonicClock::new()), engine, stacker)
        .context("starting ingest driver")?;

    let running = Arc::new(AtomicBool::new(true));
    if let Some(secs) = args.duration_secs {
        let flag = Arc::clone(&running);
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_secs(secs));
            info!("run duration elapsed, shutting down");
            flag.store(false, Ordering::SeqCst);
        });
    }

    driver.run(&running);
    // Dropping the driver joins the detection and encoder workers.
    drop(driver);
    info!("perseid stopped");
    Ok(())
}
