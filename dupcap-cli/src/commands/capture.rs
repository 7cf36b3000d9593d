//! Capture command - pull frames from an output

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, ValueEnum};
use dupcap_core::{
    Backend, CaptureSession, CaptureStatus, ConfigFile, CursorReader, CursorSnapshot,
    FrameDescriptor, FrameType, MemoryBackend, StatsSnapshot,
};
use tokio::signal;
use tracing::{debug, info, trace, warn};

use super::SyntheticSize;

const REINIT_ATTEMPTS: u32 = 20;
const REINIT_DELAY: Duration = Duration::from_millis(250);
const CURSOR_POLL: Duration = Duration::from_millis(2);

/// Frame layout selectable on the command line
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum FormatArg {
    /// 32-bit BGRA
    Raw,
    /// Planar YUV 4:2:0
    Yuv420,
    /// H.264 access units
    H264,
}

impl From<FormatArg> for FrameType {
    fn from(format: FormatArg) -> Self {
        match format {
            FormatArg::Raw => FrameType::Raw,
            FormatArg::Yuv420 => FrameType::PlanarYuv,
            FormatArg::H264 => FrameType::HardwareVideo,
        }
    }
}

/// Arguments for the capture command
#[derive(Args)]
pub struct CaptureArgs {
    /// Frame format (defaults to the config file's options)
    #[arg(short, long, value_enum)]
    pub format: Option<FormatArg>,

    /// Adapter index (defaults to the config file)
    #[arg(short, long)]
    pub adapter: Option<u32>,

    /// Output index on the adapter (defaults to the config file)
    #[arg(short, long)]
    pub output: Option<u32>,

    /// Stop after this many frames
    #[arg(short = 'n', long)]
    pub frames: Option<u64>,

    /// Append every frame to this file
    #[arg(long, value_name = "FILE")]
    pub out: Option<PathBuf>,

    /// Capture a generated desktop of the given size instead of the real one
    #[arg(long, value_name = "WxH")]
    pub synthetic: Option<SyntheticSize>,
}

/// Run a capture session until the frame limit or Ctrl+C
pub async fn capture(args: CaptureArgs) -> Result<()> {
    println!("dupcap - Starting Capture\n");

    let file = ConfigFile::load().context("Failed to load configuration")?;
    let mut config = file.capture;
    if let Some(adapter) = args.adapter {
        config.adapter = adapter;
    }
    if let Some(output) = args.output {
        config.output = output;
    }
    if let Some(format) = args.format {
        config.options.clear();
        config = config.with_frame_type(format.into());
    }

    println!("Configuration:");
    println!("  Output:      {}:{}", config.adapter, config.output);
    println!("  Format:      {}", config.frame_type());
    println!("  Timeout:     {} ms", config.acquire_timeout_ms);
    match args.frames {
        Some(frames) => println!("  Frames:      {}", frames),
        None => println!("  Frames:      until Ctrl+C"),
    }
    if let Some(ref out) = args.out {
        println!("  Writing to:  {}", out.display());
    }
    println!();

    let stop = Arc::new(AtomicBool::new(false));

    // Duplication calls block, so the session lives on a blocking thread
    let mut worker = {
        let stop = Arc::clone(&stop);
        tokio::task::spawn_blocking(move || run(&args, config, &stop))
    };

    let stats = tokio::select! {
        result = &mut worker => result??,
        _ = signal::ctrl_c() => {
            println!("\nReceived interrupt signal...");
            stop.store(true, Ordering::Relaxed);
            worker.await??
        }
    };

    println!("Capture stopped.");
    println!();
    println!("{}", stats.format_detailed());

    Ok(())
}

fn run(
    args: &CaptureArgs,
    config: dupcap_core::CaptureConfig,
    stop: &Arc<AtomicBool>,
) -> Result<StatsSnapshot> {
    match args.synthetic {
        Some(size) => capture_loop(
            CaptureSession::new(MemoryBackend::synthetic(size.width, size.height), config),
            args,
            stop,
        ),
        None => {
            #[cfg(windows)]
            {
                let backend = dupcap_core::DxgiBackend::new()?;
                capture_loop(CaptureSession::new(backend, config), args, stop)
            }
            #[cfg(not(windows))]
            {
                let _ = config;
                Err(super::no_native_backend())
            }
        }
    }
}

fn capture_loop<B: Backend>(
    mut session: CaptureSession<B>,
    args: &CaptureArgs,
    stop: &Arc<AtomicBool>,
) -> Result<StatsSnapshot> {
    if !session.can_capture() {
        bail!("The desktop cannot be captured right now (secure desktop, lock screen or UAC prompt)");
    }
    session
        .try_initialize()
        .context("Failed to initialize capture")?;

    if let Some(output) = session.output() {
        println!("Capture started!");
        println!("  Backend:    {}", session.backend().name());
        println!("  Output:     {}", output);
        println!("  Frame type: {}", session.frame_type());
        println!("  Max frame:  {} bytes", session.max_frame_size());
        println!();
        println!("Press Ctrl+C to stop...\n");
    }

    let cursor_thread = session
        .cursor_reader()
        .map(|reader| spawn_cursor_consumer(reader, Arc::clone(stop)));

    let mut sink = match args.out {
        Some(ref path) => Some(BufWriter::new(
            File::create(path).with_context(|| format!("Failed to create {}", path.display()))?,
        )),
        None => None,
    };

    let mut buffer = vec![0u8; session.max_frame_size()];
    let mut delivered = 0u64;

    let result = loop {
        if stop.load(Ordering::Relaxed) || args.frames.is_some_and(|limit| delivered >= limit) {
            break Ok(());
        }

        let status = session.capture();
        if status.contains(CaptureStatus::NEEDS_REINIT) {
            if let Err(e) = reinitialize(&mut session, stop) {
                break Err(e);
            }
            buffer.resize(session.max_frame_size(), 0);
            continue;
        }
        if status.contains(CaptureStatus::ERROR) {
            break Err(anyhow::anyhow!("Capture failed"));
        }
        if !status.contains(CaptureStatus::FRAME_READY) {
            continue;
        }

        let mut frame = FrameDescriptor::new(&mut buffer);
        let status = session.get_frame(&mut frame);
        if status.contains(CaptureStatus::NEEDS_REINIT) {
            if let Err(e) = reinitialize(&mut session, stop) {
                break Err(e);
            }
            buffer.resize(session.max_frame_size(), 0);
            continue;
        }
        if status.contains(CaptureStatus::ERROR) {
            break Err(anyhow::anyhow!("Failed to extract frame"));
        }
        if status.contains(CaptureStatus::TIMEOUT) {
            // The encoder has not produced an access unit yet
            continue;
        }

        debug!(
            "Frame {}: {}x{} pitch {} stride {} ({} bytes)",
            delivered, frame.width, frame.height, frame.pitch, frame.stride, frame.len
        );
        if let Some(sink) = sink.as_mut() {
            if let Err(e) = sink.write_all(frame.data()) {
                break Err(anyhow::Error::new(e).context("Failed to write frame"));
            }
        }
        delivered += 1;
    };

    stop.store(true, Ordering::Relaxed);
    if let Some(handle) = cursor_thread {
        match handle.join() {
            Ok(updates) => info!("Cursor consumer saw {} updates", updates),
            Err(_) => warn!("Cursor consumer thread panicked"),
        }
    }
    if let Some(mut sink) = sink {
        sink.flush().context("Failed to flush output file")?;
    }
    result?;

    let stats = session.stats().snapshot();
    session.deinitialize();
    Ok(stats)
}

/// Re-create the session after access loss, waiting out secure desktops
fn reinitialize<B: Backend>(session: &mut CaptureSession<B>, stop: &AtomicBool) -> Result<()> {
    warn!("Capture needs re-initialization");
    for attempt in 1..=REINIT_ATTEMPTS {
        if stop.load(Ordering::Relaxed) {
            return Ok(());
        }
        if session.can_capture() && session.initialize() {
            info!("Re-initialized after {} attempt(s)", attempt);
            return Ok(());
        }
        debug!("Re-initialization attempt {} failed", attempt);
        thread::sleep(REINIT_DELAY);
    }
    bail!(
        "Failed to re-initialize capture after {} attempts",
        REINIT_ATTEMPTS
    )
}

/// Drain cursor snapshots on a separate thread until `stop` is set
fn spawn_cursor_consumer(mut reader: CursorReader, stop: Arc<AtomicBool>) -> JoinHandle<u64> {
    thread::spawn(move || {
        let mut snapshot = CursorSnapshot::default();
        let mut updates = 0u64;
        while !stop.load(Ordering::Relaxed) {
            if reader.get_cursor(&mut snapshot) {
                updates += 1;
                trace!(
                    "Cursor ({}, {}) visible={} shape={}",
                    snapshot.position.x,
                    snapshot.position.y,
                    snapshot.visible,
                    snapshot.has_shape
                );
                reader.free_cursor();
            } else {
                thread::sleep(CURSOR_POLL);
            }
        }
        updates
    })
}
