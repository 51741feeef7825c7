//! Library side of the `formentry` command line tool.

pub mod commands;
pub mod logging;
