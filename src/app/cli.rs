//! Command line interface
//!
//! `workline list` shows the built-in pipelines; `workline run <name>` feeds
//! payloads through one of them and prints each result as a JSON line.

use crate::core::styles::palette_to_clap;
use crate::core::version::long_version;
use clap::{CommandFactory, FromArgMatches, Parser, Subcommand};
use std::io::IsTerminal;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone, PartialEq)]
#[command(name = "workline")]
#[command(about = "Run work pipelines over claim-based queues")]
#[command(version)]
pub struct Args {
    /// Configuration file path
    #[arg(long = "config", value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Log level
    #[arg(
        long = "log-level",
        value_name = "LEVEL",
        global = true,
        value_parser = ["trace", "debug", "info", "warn", "error", "off"]
    )]
    pub log_level: Option<String>,

    /// Log output format
    #[arg(
        long = "log-format",
        value_name = "FORMAT",
        global = true,
        value_parser = ["text", "ext", "json"]
    )]
    pub log_format: Option<String>,

    /// Log file path
    #[arg(long = "log-file", value_name = "FILE", global = true)]
    pub log_file: Option<PathBuf>,

    /// Disable colored output
    #[arg(long = "no-color", global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// List the available pipelines
    List,

    /// Feed payloads through a pipeline and print the results
    Run {
        /// Pipeline name
        #[arg(value_name = "NAME")]
        name: String,

        /// JSON payload; repeat for several. Reads JSON lines from stdin when omitted
        #[arg(long = "payload", value_name = "JSON")]
        payloads: Vec<String>,
    },
}

impl Args {
    /// True when output should be colored
    pub fn use_color(&self) -> bool {
        !self.no_color && std::io::stdout().is_terminal()
    }
}

/// Parse the process arguments, styling help output when stdout is a terminal
pub fn parse_args() -> Args {
    let styled = std::io::stdout().is_terminal() && std::env::var_os("NO_COLOR").is_none();
    let matches = Args::command()
        .long_version(long_version())
        .styles(palette_to_clap(styled))
        .get_matches();
    match Args::from_arg_matches(&matches) {
        Ok(args) => args,
        Err(e) => e.exit(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_definition_is_valid() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_run_with_payloads() {
        let args = Args::try_parse_from([
            "workline",
            "run",
            "annotate",
            "--payload",
            r#"{"a":1}"#,
            "--payload",
            r#"{"b":2}"#,
            "--log-level",
            "debug",
        ])
        .unwrap();

        assert_eq!(args.log_level.as_deref(), Some("debug"));
        assert_eq!(
            args.command,
            Command::Run {
                name: "annotate".to_string(),
                payloads: vec![r#"{"a":1}"#.to_string(), r#"{"b":2}"#.to_string()],
            }
        );
    }

    #[test]
    fn test_global_flags_before_subcommand() {
        let args =
            Args::try_parse_from(["workline", "--no-color", "--config", "w.toml", "list"]).unwrap();
        assert!(args.no_color);
        assert!(!args.use_color());
        assert_eq!(args.config, Some(PathBuf::from("w.toml")));
        assert_eq!(args.command, Command::List);
    }

    #[test]
    fn test_rejects_unknown_log_format() {
        assert!(Args::try_parse_from(["workline", "--log-format", "xml", "list"]).is_err());
    }
}
