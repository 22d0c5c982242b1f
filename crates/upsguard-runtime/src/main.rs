//! upsguard: UPS monitoring daemon with staged shutdown orchestration.
//! Single-process binary embedding the poller, trigger evaluator,
//! notification worker, and shutdown orchestrator.

use clap::Parser;

mod cli;
mod config;
mod monitor;
mod statefile;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    match args.command.unwrap_or(cli::Command::Run) {
        cli::Command::Run => {
            init_logging();
            let config = config::Config::load(&args.config)?;
            tracing::info!("upsguard starting ({})", config.ups.name);
            monitor::run_daemon(config, args.dry_run, args.exit_after_shutdown).await?;
            tracing::info!("upsguard stopped");
        }
        cli::Command::ValidateConfig => match config::Config::load(&args.config) {
            Ok(config) => {
                println!(
                    "configuration OK: ups {}, {} notification sink(s), {} remote server(s)",
                    config.ups.name,
                    config.notifications.urls.len(),
                    config.shutdown.remote_servers.len()
                );
            }
            Err(e) => {
                eprintln!("configuration invalid: {e}");
                std::process::exit(1);
            }
        },
        cli::Command::TestNotifications => {
            init_logging();
            let config = config::Config::load(&args.config)?;
            monitor::test_notifications(&config).await?;
        }
    }

    Ok(())
}

fn init_logging() {
    let filter = std::env::var("UPSGUARD_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .init();
}
