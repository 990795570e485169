mod cli;
mod commands;
mod config;
mod format;

use clap::Parser;

use cli::{Cli, Command};
use commands::Runtime;
use config::Config;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let level = match cli.verbose {
        0 => cli.log_level.as_str(),
        1 => "debug",
        _ => "trace",
    };
    let env_filter = tracing_subscriber::EnvFilter::try_new(level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));

    // Hold the non-blocking guards for the lifetime of main so logs flush on exit.
    let _log_guards = init_logging(env_filter, cli.log_file.as_deref())?;

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> anyhow::Result<()> {
    let data_dir = cli
        .data_dir
        .clone()
        .unwrap_or_else(receipt_common::paths::receipt_data_dir);
    config::ensure_data_dir(&data_dir)?;
    let config = Config::load(&data_dir)?;
    tracing::debug!(
        data_dir = %config.data_dir.display(),
        ledger = %config.ledger_path.display(),
        "receipt v{} starting",
        env!("CARGO_PKG_VERSION")
    );

    let runtime = Runtime::open(config)?;
    let json = cli.json;
    let result = match cli.command {
        Command::Init => commands::init(&runtime, json),
        Command::Issue(args) => commands::issue(&runtime, args, json),
        Command::List { limit } => commands::list(&runtime, limit, json),
        Command::Show { id } => commands::show(&runtime, &id, json),
        Command::Verify { signatures } => commands::verify(&runtime, signatures, json),
        Command::Proof { id } => commands::proof(&runtime, &id, json),
        Command::Export { id, out } => commands::export(&runtime, &id, out.as_deref(), json),
        Command::Status => commands::status(&runtime, json),
    };

    // Flush pending audit entries even when the command failed.
    runtime.shutdown().await;
    result
}

// ── Logging setup ───────────────────────────────────────────────────

/// Install the global subscriber: stderr, plus `log_file` when given.
/// Dropping the returned guards flushes any queued lines.
fn init_logging(
    env_filter: tracing_subscriber::EnvFilter,
    log_file: Option<&std::path::Path>,
) -> anyhow::Result<Vec<tracing_appender::non_blocking::WorkerGuard>> {
    use tracing_subscriber::prelude::*;

    // Writes go through a worker thread: a full or unread stderr pipe must
    // never stall a certificate build holding the ledger write lock.
    let (nb_stderr, stderr_guard) = tracing_appender::non_blocking(std::io::stderr());
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(nb_stderr);
    let mut guards = vec![stderr_guard];

    let file_layer = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            let (nb_file, file_guard) = tracing_appender::non_blocking(file);
            guards.push(file_guard);
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(nb_file),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();

    Ok(guards)
}

#[cfg(test)]
mod tests {
    use super::*;

    // The only test in this binary that installs the global subscriber.
    #[test]
    fn log_file_layer_is_created_and_flushed() {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("receipt-log-{nanos}"));
        let path = dir.join("nested").join("receipt.log");

        let guards = init_logging(
            tracing_subscriber::EnvFilter::new("info"),
            Some(path.as_path()),
        )
        .unwrap();
        assert_eq!(guards.len(), 2);
        tracing::info!("ledger opened");
        drop(guards);

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("ledger opened"));
        assert!(!written.contains('\u{1b}'), "file output carries no ANSI codes");
        let _ = std::fs::remove_dir_all(&dir);
    }
}
