use polars::error::PolarsError;
use sunmap::error::SunmapError;

#[derive(thiserror::Error, Debug)]
pub enum SunmapCliError {
    #[error("{0}")]
    Anyhow(#[from] anyhow::Error),
    #[error("serde JSON error: {0}")]
    SerdeJSONError(#[from] serde_json::Error),
    #[error("polars error: {0}")]
    PolarsError(#[from] PolarsError),
    #[error("{0}")]
    SunmapError(#[from] SunmapError),
    #[error("std IO error: {0}")]
    IOError(#[from] std::io::Error),
}

pub type SunmapCliResult<T> = Result<T, SunmapCliError>;
