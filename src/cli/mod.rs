use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase log verbosity (-v for debug, -vv for trace). Overridden by
    /// the `MFUTAR_LOG` environment variable when set.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Create a new archive from specified files and directories.
    #[command(alias = "c")]
    Create {
        /// One or more input files or directories to add to the archive.
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// The path for the output archive file.
        #[arg(short, long)]
        output: PathBuf,

        /// Number of ranks (scoped worker groups) to split the file list
        /// across. [0 = auto-detect based on CPU cores]
        #[arg(long, default_value_t = 0)]
        ranks: usize,

        /// Payload copy chunk size, in bytes -- the work-stealing job
        /// granularity each chunk-copy task covers.
        #[arg(long, default_value_t = 4 * 1024 * 1024)]
        chunk_size: usize,

        /// Size of each read/write call inside a chunk-copy job, in bytes.
        #[arg(long, default_value_t = 128 * 1024)]
        block_size: usize,

        /// Don't preserve ownership, permissions, timestamps, or xattrs.
        #[arg(long = "no-preserve", action = clap::ArgAction::SetFalse, default_value_t = true)]
        preserve: bool,

        /// Follow symlinks instead of archiving them as links.
        #[arg(long)]
        dereference: bool,

        /// Don't write a `.idx` sidecar alongside the archive.
        #[arg(long = "no-index", action = clap::ArgAction::SetFalse, default_value_t = true)]
        build_index: bool,
    },

    /// Extract files from an archive.
    #[command(alias = "x")]
    Extract {
        /// The archive file to extract.
        #[arg(required = true)]
        archive: PathBuf,

        /// The directory where files will be extracted. Defaults to the
        /// current directory.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Number of ranks to split extraction work across. [0 = auto]
        #[arg(long, default_value_t = 0)]
        ranks: usize,

        /// Payload copy chunk size, in bytes.
        #[arg(long, default_value_t = 4 * 1024 * 1024)]
        chunk_size: usize,

        /// Size of each read/write call inside the payload copy loop, in
        /// bytes.
        #[arg(long, default_value_t = 128 * 1024)]
        block_size: usize,

        /// Don't restore ownership, permissions, timestamps, or xattrs.
        #[arg(long = "no-preserve", action = clap::ArgAction::SetFalse, default_value_t = true)]
        preserve: bool,
    },

    /// List the contents of an archive without extracting it.
    #[command(alias = "l")]
    List {
        /// The archive file to list contents of.
        #[arg(required = true)]
        archive: PathBuf,
    },
}

/// Resolves `--ranks 0` (auto) to the detected CPU count, and clamps to at
/// least 1.
pub fn resolve_ranks(requested: usize) -> usize {
    if requested == 0 {
        num_cpus::get().max(1)
    } else {
        requested
    }
}

/// Initializes `tracing-subscriber` from, in priority order, the
/// `MFUTAR_LOG` environment variable, then the `-v`/`-vv` flag count,
/// defaulting to warnings-and-above when neither is set.
pub fn init_logging(verbosity: u8) {
    use tracing_subscriber::EnvFilter;

    let filter = if std::env::var("MFUTAR_LOG").is_ok() {
        EnvFilter::try_from_env("MFUTAR_LOG").unwrap_or_else(|_| EnvFilter::new("warn"))
    } else {
        let level = match verbosity {
            0 => "warn",
            1 => "info,mfutar=debug",
            _ => "trace",
        };
        EnvFilter::new(level)
    };

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Parses command-line arguments using `clap` and returns the command to
/// execute.
pub fn run() -> Result<Args, Box<dyn std::error::Error>> {
    Ok(Args::parse())
}
