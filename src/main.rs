//! Mock Interceptor - CLI Entry Point
//!
//! Replays newline-delimited JSON requests against a stub configuration and
//! prints one disposition per request.

use anyhow::Result;
use clap::Parser;
use mock_interceptor::replay::replay;
use mock_interceptor::{InterceptorConfig, LifecycleEvent, MockInterceptor};
use std::path::PathBuf;
use tokio::io::{AsyncBufRead, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(
    name = "mock-interceptor",
    about = "Replay captured requests against mock stubs and report mocked/passthrough dispositions",
    version
)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "mock-interceptor.yaml")]
    config: PathBuf,

    /// Newline-delimited JSON request records (defaults to stdin)
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "info")]
    log_level: Level,

    /// Print default configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr, dispositions to stdout.
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if args.print_config {
        let default_config = include_str!("../demos/default-config.yaml");
        println!("{}", default_config);
        return Ok(());
    }

    let config = if args.config.exists() {
        info!(path = ?args.config, "Loading configuration");
        InterceptorConfig::from_file(&args.config)?
    } else if args.validate {
        anyhow::bail!("Configuration file not found: {:?}", args.config);
    } else {
        info!("Using default configuration (no stubs)");
        InterceptorConfig::default()
    };

    if args.validate {
        config.validate()?;
        println!(
            "Configuration is valid ({} stubs defined)",
            config.stubs.len()
        );
        return Ok(());
    }

    let interceptor = MockInterceptor::from_config(&config)?;
    spawn_event_logger(&interceptor);

    let input: Box<dyn AsyncBufRead + Unpin + Send> = match &args.input {
        Some(path) => Box::new(BufReader::new(tokio::fs::File::open(path).await?)),
        None => Box::new(BufReader::new(tokio::io::stdin())),
    };

    let summary = replay(&interceptor, input, tokio::io::stdout()).await?;
    info!(
        mocked = summary.mocked,
        passthrough = summary.passthrough,
        errors = summary.errors,
        "Replay finished"
    );

    Ok(())
}

/// Mirror lifecycle events into the debug log.
fn spawn_event_logger(interceptor: &MockInterceptor) {
    let mut rx = interceptor.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event logger lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });
}

fn log_event(event: &LifecycleEvent) {
    let request = event.request();
    match event {
        LifecycleEvent::ResponseMocked { response, handler, .. } => debug!(
            event = event.name(),
            request_id = %request.id(),
            status = response.status,
            handler = %handler,
        ),
        LifecycleEvent::UnhandledException { error, .. } => debug!(
            event = event.name(),
            request_id = %request.id(),
            error = %error,
        ),
        _ => debug!(
            event = event.name(),
            request_id = %request.id(),
            method = %request.method(),
            path = %request.path(),
        ),
    }
}
