use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;

mod cli;
mod commands;
mod config;
mod error;

use cli::{Cli, Commands};
use config::{Overrides, load_config, merge_config};
use error::{CliResult, to_exit_code};

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize tracing based on verbosity
    let filter = if cli.verbose {
        "tether=debug,tether_cli=debug"
    } else {
        "tether=warn,tether_cli=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("error: failed to start runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Run the async main
    let result = runtime.block_on(async_main(cli));
    to_exit_code(result)
}

async fn async_main(cli: Cli) -> CliResult<()> {
    let file_config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve(args) => {
            let overrides = Overrides {
                channel: args.channel.as_deref(),
                ..Overrides::default()
            };
            let config = merge_config(file_config, &args.bridge, overrides)?;
            commands::serve::execute(args, config).await
        }
        Commands::Send(args) => {
            let overrides = Overrides {
                reply_timeout: args.timeout.map(Duration::from_secs),
                ..Overrides::default()
            };
            let config = merge_config(file_config, &args.bridge, overrides)?;
            commands::send::execute(args, config).await
        }
    }
}
