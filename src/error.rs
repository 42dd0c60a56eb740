use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Failures that abort a pipeline run or one of its optional stages.
///
/// Per-row problems (bad dates, unparseable numbers, unknown names) are
/// not errors: they are recovered with documented defaults and surfaced
/// as counters in the load/link reports.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A source directory yielded zero CSV files. Proceeding would merge
    /// the remaining sources as silent zeros, so this is fatal.
    #[error("no {dataset} data files found under {}", dir.display())]
    NoDataFound { dataset: &'static str, dir: PathBuf },

    #[error("failed to read {}: {err}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        err: std::io::Error,
    },

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error("failed to parse {}: {err}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        err: serde_json::Error,
    },

    #[error("{} is not a GeoJSON feature collection", path.display())]
    InvalidBoundaryFile { path: PathBuf },

    #[error("clustering needs at least {k} districts, found {n}")]
    TooFewDistricts { k: usize, n: usize },
}
