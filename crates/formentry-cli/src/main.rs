//! Form entry queue processor CLI.

use clap::{ColorChoice, Parser};
use formentry_cli::commands::{
    open_workspace, run_enqueue, run_errors, run_process, run_queue, run_status, run_transform,
};
use formentry_cli::logging::{LogConfig, LogFormat, init_logging};
use std::io::{self, IsTerminal};
use tracing::level_filters::LevelFilter;

mod cli;
mod summary;

use crate::cli::{Cli, Command, LogFormatArg, LogLevelArg};
use crate::summary::{
    print_enqueued, print_errors, print_process_summary, print_queue, print_status,
};

fn main() {
    let cli = Cli::parse();
    cli.color.write_global();
    let log_config = log_config_from_cli(&cli);
    if let Err(error) = init_logging(&log_config) {
        eprintln!("error: failed to initialize logging: {error}");
        std::process::exit(1);
    }
    let exit_code = match run(&cli) {
        Ok(code) => code,
        Err(error) => {
            eprintln!("error: {error:#}");
            1
        }
    };
    std::process::exit(exit_code);
}

fn run(cli: &Cli) -> anyhow::Result<i32> {
    let config = cli.config.as_deref();
    match &cli.command {
        Command::Process => {
            let result = run_process(&open_workspace(config)?)?;
            print_process_summary(&result);
            Ok(if result.has_failure() { 1 } else { 0 })
        }
        Command::Status => {
            print_status(&run_status(&open_workspace(config)?)?);
            Ok(0)
        }
        Command::Enqueue(args) => {
            print_enqueued(&run_enqueue(&open_workspace(config)?, &args.files)?);
            Ok(0)
        }
        Command::Queue(args) => {
            print_queue(&run_queue(&open_workspace(config)?, args.limit)?);
            Ok(0)
        }
        Command::Errors(args) => {
            print_errors(&run_errors(&open_workspace(config)?, args.limit)?);
            Ok(0)
        }
        Command::Transform(args) => {
            print!("{}", run_transform(&args.xslt, &args.input)?);
            Ok(0)
        }
    }
}

/// Build logging configuration from CLI flags with consistent precedence.
fn log_config_from_cli(cli: &Cli) -> LogConfig {
    let mut config = LogConfig {
        level_filter: cli.verbosity.tracing_level_filter(),
        ..LogConfig::default()
    };
    config.use_env_filter = !(cli.verbosity.is_present() || cli.log_level.is_some());
    if let Some(level) = cli.log_level {
        config.level_filter = match level {
            LogLevelArg::Error => LevelFilter::ERROR,
            LogLevelArg::Warn => LevelFilter::WARN,
            LogLevelArg::Info => LevelFilter::INFO,
            LogLevelArg::Debug => LevelFilter::DEBUG,
            LogLevelArg::Trace => LevelFilter::TRACE,
        };
    }
    config.format = match cli.log_format {
        LogFormatArg::Pretty => LogFormat::Pretty,
        LogFormatArg::Compact => LogFormat::Compact,
        LogFormatArg::Json => LogFormat::Json,
    };
    config.log_file = cli.log_file.clone();
    config.with_ansi = match cli.color.color {
        ColorChoice::Always => true,
        ColorChoice::Never => false,
        ColorChoice::Auto => cli.log_file.is_none() && io::stderr().is_terminal(),
    };
    config
}
