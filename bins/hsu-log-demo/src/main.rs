use anyhow::{Context, Result};
use clap::Parser;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tracing_subscriber::filter::{filter_fn, EnvFilter};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

use hsu_log_pipeline::{EmitOutcome, Logger, LoggingConfig, LoggingContext, Severity};

/// HSU Log Demo - exercises the logging pipeline
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path (YAML)
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Number of message bursts to emit
    #[arg(short, long, default_value_t = 3)]
    bursts: u32,

    /// Shell command whose stderr is captured
    #[arg(long, value_name = "CMD")]
    capture_cmd: Option<String>,

    /// Keep emitting a rate-limited heartbeat for this many seconds
    #[arg(long)]
    run_duration: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => LoggingConfig::load_from_file(path)?,
        None => LoggingConfig::default(),
    };
    if args.debug {
        config.min_level = Severity::Debug;
    }

    let context = LoggingContext::init(config).context("Failed to initialize logging")?;
    initialize_tracing(args.debug, &context);

    info!("Starting HSU log demo");
    if let Some(path) = &args.config {
        info!("Config file: {}", path);
    }

    let log = context.logger("demo");
    emit_bursts(&log, args.bursts)?;

    #[cfg(unix)]
    {
        if let Some(cmd) = &args.capture_cmd {
            run_captured(&context, cmd).await?;
        }
    }
    #[cfg(not(unix))]
    {
        if args.capture_cmd.is_some() {
            warn!("Subprocess capture is only available on unix targets");
        }
    }

    if let Some(duration) = args.run_duration {
        info!("Running for {} seconds (test mode)", duration);
        tokio::select! {
            _ = heartbeat(&log) => {}
            _ = tokio::time::sleep(Duration::from_secs(duration)) => {}
            result = wait_for_shutdown_signal() => result?,
        }
    }

    let suppressed = context.rate_limiter().suppressed("heartbeat");
    info!(suppressed_heartbeats = suppressed, "Shutting down logging");
    context.shutdown();

    Ok(())
}

fn initialize_tracing(debug: bool, context: &LoggingContext) {
    let level = if debug { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // The pipeline's own diagnostics cannot go through the pipeline, print them directly
    let internal = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_thread_names(true)
        .with_filter(filter_fn(|metadata| {
            metadata.target().starts_with("hsu_log_pipeline")
        }));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(context.tracing_layer())
        .with(internal)
        .init();
}

fn emit_bursts(log: &Logger, bursts: u32) -> Result<()> {
    let mut queued = 0;
    let mut suppressed = 0;

    for burst in 0..bursts {
        debug!(burst, "Emitting burst");

        log.debug("Debug message")?;
        log.info("Informational message")?;
        log.warning("Warning message")?;
        log.error("Error message")?;

        for (severity, key) in [
            (Severity::Debug, "debug"),
            (Severity::Info, "info"),
            (Severity::Warning, "warning"),
            (Severity::Error, "error"),
        ] {
            let message = format!("{} message ({})", severity.as_str().to_lowercase(), key);
            match log.emit(severity, message, Some(key))? {
                EmitOutcome::Queued => queued += 1,
                EmitOutcome::Suppressed => suppressed += 1,
                EmitOutcome::BelowLevel => {}
            }
        }
    }

    info!(queued, suppressed, "Rate-limited messages emitted");
    Ok(())
}

async fn heartbeat(log: &Logger) {
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    loop {
        interval.tick().await;
        if let Err(e) = log.emit(Severity::Info, "still running", Some("heartbeat")) {
            error!("Heartbeat failed: {}", e);
            return;
        }
    }
}

/// Run `cmd` with its stderr captured; dump the captured lines if it fails.
#[cfg(unix)]
async fn run_captured(context: &LoggingContext, cmd: &str) -> Result<()> {
    let capture = context.capture("demo.capture")?;

    info!("Running captured command: {}", cmd);
    let mut child = tokio::process::Command::new("sh")
        .arg("-c")
        .arg(cmd)
        .stderr(capture.child_stdio()?)
        .spawn()
        .with_context(|| format!("Failed to spawn: {}", cmd))?;

    let status = child.wait().await?;

    // Joining the reader can block until grandchildren release the pipe
    let (capture, joined) = tokio::task::spawn_blocking(move || {
        let joined = capture.shutdown();
        (capture, joined)
    })
    .await?;
    if !joined {
        warn!("Capture reader still running; draining what was read so far");
    }

    if status.success() {
        info!(
            buffered = capture.buffered(),
            "Captured command exited cleanly"
        );
    } else {
        let drained = capture.drain()?;
        error!(
            status = %status,
            lines = drained,
            "Captured command failed"
        );
    }

    Ok(())
}

async fn wait_for_shutdown_signal() -> Result<()> {
    use tokio::signal;

    #[cfg(unix)]
    {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
            .context("Failed to create SIGTERM handler")?;
        let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())
            .context("Failed to create SIGINT handler")?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM signal");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT signal");
            }
        }
    }

    #[cfg(windows)]
    {
        signal::ctrl_c().await.context("Failed to listen for Ctrl+C")?;
        info!("Received Ctrl+C signal");
    }

    Ok(())
}
