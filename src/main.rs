// ABOUTME: Main entry point for the roomlog command-line tool
// ABOUTME: Initializes logging, loads config and dispatches the selected subcommand

use anyhow::Result;
use clap::Parser;
use roomlog::{cli, config::Config};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn init_logging(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());

    // Logs go to stderr so query output on stdout stays clean
    let json_layer = json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
    });
    let text_layer = (!json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Set up panic hook to log panics before they crash the process
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("\nPANIC! roomlog crashed with the following error:\n");
        eprintln!("{}", panic_info);
        eprintln!("\nBacktrace:");
        eprintln!("{:?}", std::backtrace::Backtrace::force_capture());
    }));

    let args = cli::Cli::parse();
    init_logging(args.log_json);

    dotenvy::dotenv().ok();
    let mut config = Config::load()?;
    if let Some(db) = &args.db {
        config.store.path = db.display().to_string();
    }

    tracing::info!(
        store = %config.store.path,
        trigger = %config.room_history.trigger_keyword,
        default_limit = config.room_history.default_limit,
        default_hours = config.room_history.default_hours,
        "Configuration loaded"
    );

    cli::run(args.command, &config).await
}
