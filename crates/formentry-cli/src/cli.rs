//! CLI argument definitions for `formentry`.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use clap_verbosity_flag::{Verbosity, WarnLevel};
use colorchoice_clap::Color;

#[derive(Parser)]
#[command(
    name = "formentry",
    version,
    about = "Form entry queue processor - transform queued XML form submissions to HL7",
    long_about = "Drain a queue of XML form submissions.\n\n\
                  Each submission is matched to its form by id, transformed to HL7 with the\n\
                  form's XSLT and filed in the inbound queue. Submissions that cannot be\n\
                  matched or transformed are moved to the error bin."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Configuration file (default: ./formentry.toml when present).
    #[arg(long = "config", value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Adjust log verbosity (-v for info, -vv for debug, -q for errors only).
    #[command(flatten)]
    pub verbosity: Verbosity<WarnLevel>,

    /// Control ANSI color output (auto, always, never).
    #[command(flatten)]
    pub color: Color,

    /// Explicit log level (overrides -v/-q flags).
    #[arg(long = "log-level", value_enum, global = true)]
    pub log_level: Option<LogLevelArg>,

    /// Log output format (pretty for human, json for machine parsing).
    #[arg(
        long = "log-format",
        value_enum,
        default_value = "pretty",
        global = true
    )]
    pub log_format: LogFormatArg,

    /// Write logs to a file instead of stderr.
    #[arg(long = "log-file", value_name = "PATH", global = true)]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Drain the queue once.
    Process,

    /// Show queued, archived and errored counts.
    Status,

    /// Append XML payload files to the queue.
    Enqueue(EnqueueArgs),

    /// List queued entries, oldest first.
    Queue(QueueArgs),

    /// List error-bin entries, newest first.
    Errors(ErrorsArgs),

    /// Apply a stylesheet to a payload without touching the queue.
    Transform(TransformArgs),
}

#[derive(Parser)]
pub struct EnqueueArgs {
    /// Payload files, queued in the order given.
    #[arg(value_name = "FILE", required = true)]
    pub files: Vec<PathBuf>,
}

#[derive(Parser)]
pub struct QueueArgs {
    /// Show at most this many entries.
    #[arg(long = "limit", value_name = "N")]
    pub limit: Option<usize>,
}

#[derive(Parser)]
pub struct ErrorsArgs {
    /// Show at most this many entries.
    #[arg(long = "limit", value_name = "N")]
    pub limit: Option<usize>,
}

#[derive(Parser)]
pub struct TransformArgs {
    /// XSLT stylesheet.
    #[arg(long = "xslt", value_name = "FILE")]
    pub xslt: PathBuf,

    /// XML payload to transform.
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,
}

/// CLI log level choices.
#[derive(Clone, Copy, ValueEnum)]
pub enum LogLevelArg {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// CLI log format choices.
#[derive(Clone, Copy, ValueEnum)]
pub enum LogFormatArg {
    Pretty,
    Compact,
    Json,
}
