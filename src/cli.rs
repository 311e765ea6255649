use clap::Parser;
use std::path::PathBuf;

/// CLI arguments for the collaboration server.
#[derive(Parser, Debug)]
#[clap(name = "coedit-server")]
#[clap(about = "Real-time collaborative plain-text editing server", long_about = None)]
pub struct Args {
    /// Port to listen on
    #[clap(short, long, default_value = "5000")]
    pub port: u16,

    /// Host to bind to
    #[clap(long, default_value = "0.0.0.0")]
    pub host: String,

    /// Directory for document snapshots
    #[clap(long, value_name = "DIR", default_value = "./documents")]
    pub store_dir: PathBuf,

    /// Debounce window for canonical batch flushes, in milliseconds
    #[clap(long, value_name = "MS", default_value = "500")]
    pub debounce_ms: u64,

    /// Applied operations retained for rebasing optimistic echoes
    #[clap(long, value_name = "N", default_value = "10")]
    pub tail_size: usize,

    /// Minutes a session-less document engine stays resident
    #[clap(long, value_name = "MINUTES", default_value = "30")]
    pub idle_eviction_mins: u64,

    /// Deadline for flushing all engines on shutdown, in seconds
    #[clap(long, value_name = "SECONDS", default_value = "30")]
    pub shutdown_drain_secs: u64,

    /// Exact cross-origin to allow (defaults to any origin)
    #[clap(long, value_name = "ORIGIN")]
    pub allowed_origin: Option<String>,
}
