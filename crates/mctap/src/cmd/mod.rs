use std::path::PathBuf;

use clap::{Args, Subcommand};

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod analyze;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Analyze a capture file and report slow requests.
    Analyze(AnalyzeArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Analyze(args) => analyze::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct AnalyzeArgs {
    /// Capture file to analyze (legacy pcap).
    pub capture: PathBuf,

    /// Latency above which a request/response pair is reported
    /// (e.g. 5ms, 2s; a bare number is milliseconds).
    #[arg(long, default_value = "1ms")]
    pub threshold: String,

    /// Smallest key length a plausible message may carry.
    #[arg(long, value_name = "LEN", default_value_t = 1)]
    pub min_key: usize,

    /// Largest key length a plausible message may carry.
    #[arg(long, value_name = "LEN", default_value_t = 250)]
    pub max_key: usize,

    /// Largest message body a plausible message may carry, in bytes.
    #[arg(long, value_name = "BYTES", default_value_t = 20 * 1024 * 1024)]
    pub max_body: usize,

    /// Give up on a flow at the first malformed message instead of
    /// scanning ahead for the next plausible one.
    #[arg(long)]
    pub no_recover: bool,

    /// Port that identifies the server side of a connection.
    #[arg(long, value_name = "PORT", default_value_t = 11211)]
    pub server_port: u16,

    /// Write latency records to this file instead of stdout.
    #[arg(long, value_name = "FILE")]
    pub report_file: Option<PathBuf>,

    /// Include per-opcode vbucket lists in the summary.
    #[arg(long)]
    pub dump_vbuckets: bool,

    /// Pace ingestion so capture time advances at this multiple of
    /// wall-clock time (1.0 replays in real time).
    #[arg(long, value_name = "SCALE")]
    pub time_scale: Option<f64>,

    /// Log a completion summary for every flow.
    #[arg(long, short = 'v')]
    pub verbose: bool,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}
