use clap::{Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use crate::config::MAX_CONCURRENCY;
use danmaku::ExportFormat;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "dmdl",
    author,
    version,
    about = "Download Bilibili danmaku as XML, JSON, CSV or plain text",
    long_about = "Resolves av/BV/ep/ss/md identifiers, fetches every danmaku segment of every part and writes one merged, time-ordered file.\n\nRunning without a subcommand starts the interactive prompt."
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Configuration file (defaults to <config dir>/dmdl/config.toml)
    #[arg(long, global = true, env = "DMDL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Request timeout in seconds, overrides the configuration
    #[arg(long, global = true)]
    pub timeout: Option<u64>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Download the danmaku of an identifier into one file
    #[command(alias = "dl")]
    Download {
        /// av…, BV…, ep…, ss… or md… identifier
        id: String,

        #[command(flatten)]
        opts: DownloadOpts,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Resolve an identifier and list its parts without fetching danmaku
    Info {
        /// av…, BV…, ep…, ss… or md… identifier
        id: String,

        /// Cookie file
        #[arg(short, long)]
        cookie_file: Option<PathBuf>,

        /// Print the part list as JSON
        #[arg(long)]
        json: bool,
    },

    /// Prompt for identifiers until `q` is entered (default)
    Interactive,

    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },

    /// Show or reset the configuration file
    Config {
        /// Print the effective configuration
        #[arg(long)]
        show: bool,

        /// Write the defaults back to the file
        #[arg(long, conflicts_with = "show")]
        reset: bool,
    },
}

/// Flags that override the configuration for one download.
#[derive(clap::Args, Debug, Default, Clone)]
pub struct DownloadOpts {
    /// Output directory
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Export format
    #[arg(short, long, value_enum)]
    pub format: Option<FormatArg>,

    /// Maximum number of six-minute segments per part
    #[arg(short, long, value_parser = clap::value_parser!(u32).range(1..))]
    pub max_segments: Option<u32>,

    /// Cookie file
    #[arg(short, long)]
    pub cookie_file: Option<PathBuf>,

    /// Maximum concurrent segment requests
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..=MAX_CONCURRENCY as u64))]
    pub concurrency: Option<u64>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatArg {
    Xml,
    Json,
    Csv,
    #[value(alias = "text")]
    Txt,
}

impl From<FormatArg> for ExportFormat {
    fn from(value: FormatArg) -> Self {
        match value {
            FormatArg::Xml => ExportFormat::Xml,
            FormatArg::Json => ExportFormat::Json,
            FormatArg::Csv => ExportFormat::Csv,
            FormatArg::Txt => ExportFormat::Txt,
        }
    }
}
