use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use analyzer_loop::{
    args::{convert_filter, Args},
    buffer_pool,
    capture::{run_tone_source, ToneSource},
    AnalyzerConfig, PeakReporter, ProcessingLoop,
};
use anyhow::{anyhow, Context};
use clap::Parser;
use tracing::info;

// How often the supervisor wakes up to check on things
const TICK: Duration = Duration::from_millis(100);
// How often we print loop stats
const STATS_INTERVAL: Duration = Duration::from_secs(1);

fn main() -> anyhow::Result<()> {
    // Get CLI arguments
    let args = Args::parse();

    // Setup logging
    let filter = convert_filter(args.verbose.log_level_filter());
    tracing_subscriber::fmt().with_max_level(filter).init();
    info!("Starting spectrum analyzer");

    let config = AnalyzerConfig {
        fft_size: args.fft_size,
        frame_rate: args.rate,
        dynamic_frame_rate: !args.fixed_rate,
        window: args.window,
        ..Default::default()
    };

    // Setup the buffer pool between capture and processing
    let (acquisition, exchange) = buffer_pool(args.capacity, args.fft_size);

    let analyzer = ProcessingLoop::new(&config, exchange, PeakReporter::new(args.report_every))
        .context("Invalid analyzer configuration")?;
    let handle = analyzer
        .start()
        .context("Failed to spawn processing thread")?;

    // Stop the loop on Ctrl-C, everything else winds down from there
    let control = handle.control().clone();
    ctrlc::set_handler(move || control.stop()).context("Failed to set Ctrl-C handler")?;

    // Start producing samples on a thread
    let running = Arc::new(AtomicBool::new(true));
    let source = ToneSource::new(args.frequency, args.sample_rate, args.tone, 0.5);
    let interval = source.block_duration(args.fft_size);
    let capture = {
        let running = Arc::clone(&running);
        thread::Builder::new()
            .name("tone-source".to_owned())
            .spawn(move || run_tone_source(acquisition, source, &running, interval))
            .context("Failed to spawn capture thread")?
    };

    let started = Instant::now();
    let deadline = args.duration.map(Duration::from_secs);
    let mut last_stats = Instant::now();
    while handle.is_running() {
        thread::sleep(TICK);
        if deadline.map_or(false, |d| started.elapsed() >= d) {
            handle.stop();
        }
        if last_stats.elapsed() >= STATS_INTERVAL {
            info!("{}", handle.control().stats());
            last_stats = Instant::now();
        }
    }

    let stats = handle.control().stats();
    let analyzer = handle
        .join()
        .map_err(|_| anyhow!("Processing thread panicked"))?;
    running.store(false, Ordering::SeqCst);
    let capture_stats = capture
        .join()
        .map_err(|_| anyhow!("Capture thread panicked"))?;

    info!("Final: {stats}");
    info!(
        produced = capture_stats.produced,
        overflows = capture_stats.overflows,
        frames_drawn = analyzer.sink().frames_seen(),
        "Done"
    );
    Ok(())
}
