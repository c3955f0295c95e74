use std::path::PathBuf;

/// Errors surfaced by the analysis pipeline.
///
/// Only the source-open variants are fatal to a run; everything that
/// happens after ingestion starts is isolated to the affected flow.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The capture file could not be opened at all.
    #[error("failed to open capture {path}: {source}")]
    SourceOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file opened but is not a legacy pcap capture.
    #[error("{path} is not a legacy pcap capture: {detail}")]
    NotACapture { path: PathBuf, detail: String },

    /// The capture stream became unreadable mid-run.
    #[error("capture read error: {0}")]
    Capture(String),

    /// A pipeline task was cancelled or panicked.
    #[error("pipeline task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
