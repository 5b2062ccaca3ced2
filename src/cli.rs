// src/cli.rs
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// ct-vat: harvest Belgian certificates from CT logs and find their VAT numbers
#[derive(Parser, Debug, Clone)]
#[command(name = "ct-vat")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to TOML config file
    #[arg(short = 'c', long = "config", default_value = "config.toml")]
    pub config: String,

    /// Verbose logging (set log level to debug)
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    /// Quiet logging (set log level to warn)
    #[arg(short = 'q', long = "quiet", global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Manage CT log servers
    #[command(subcommand)]
    Servers(ServersCommand),

    /// Download and process certificates until interrupted (Ctrl-C)
    Run {
        /// Only scan these server ids (default: every registered server)
        #[arg(short = 's', long = "server")]
        servers: Vec<i64>,

        /// Also resume VAT searches left unfinished by a previous run
        #[arg(long = "resume-vat")]
        resume_vat: bool,
    },

    /// Search VAT numbers for certificates not searched yet
    ResumeVat,

    /// Print issuer, algorithm and VAT statistics
    Report,

    /// Export certificates as CSV
    Export {
        /// Only certificates with a VAT number
        #[arg(long = "vat-only")]
        vat_only: bool,

        /// Write to file instead of stdout
        #[arg(short = 'o', long = "output")]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum ServersCommand {
    /// Register a new log server
    Add {
        /// Base URL of the log, e.g. https://ct.googleapis.com/logs/xenon2024/
        url: String,

        /// Display name (defaults to the URL)
        #[arg(short = 'n', long = "nickname")]
        nickname: Option<String>,
    },

    /// List registered log servers
    List,
}

impl Cli {
    /// Validate flag combinations and return errors for invalid usage
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.verbose && self.quiet {
            anyhow::bail!("Cannot specify both --verbose and --quiet");
        }

        Ok(())
    }

    /// Log level forced by flags, if any
    pub fn log_level_override(&self) -> Option<&'static str> {
        if self.verbose {
            Some("debug")
        } else if self.quiet {
            Some("warn")
        } else {
            None
        }
    }
}
