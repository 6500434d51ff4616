mod cli;

use clap::Parser;
use cli::{Cli, Command};
use tracing_subscriber::EnvFilter;
use vibecheck::config::Config;

fn main() -> anyhow::Result<()> {
    let args = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(args.logs.as_deref()))
        .with_writer(std::io::stderr)
        .init();

    let config = Config::from_env()?;
    config.init_thread_pool();

    match args.command {
        Command::Build(opts) => cli::run_build(config, opts),
        Command::Query(opts) => cli::run_query(config, opts),
        Command::Inspect(opts) => cli::run_inspect(config, opts),
    }
}

fn log_filter(logs: Option<&str>) -> EnvFilter {
    if let Some(raw) = logs {
        return match cli::map_log_level(raw) {
            Some(level) => EnvFilter::new(level),
            None => {
                eprintln!(
                    "Unknown log level `{raw}`. Use one of: info, warning, error, critical. Using `info`."
                );
                EnvFilter::new("info")
            }
        };
    }
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}
