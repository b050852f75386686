//! Error types.

use std::collections::BTreeSet;
use std::fmt::Display;

use itertools::Itertools;

use crate::region::RegionKey;

#[derive(thiserror::Error, Debug)]
pub enum SunmapError {
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Data quality error in {context}: {message}")]
    DataQuality { context: String, message: String },
    #[error("Inconsistent region keys between packages: {0}")]
    Consistency(RegionMismatch),
    #[error("Wrapped polars error: {0}")]
    PolarsError(#[from] polars::error::PolarsError),
    #[error("IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Zip archive error: {0}")]
    ZipError(#[from] zip::result::ZipError),
    #[error("Shapefile error: {0}")]
    ShapefileError(#[from] shapefile::Error),
    #[error("dBase error: {0}")]
    DbaseError(#[from] shapefile::dbase::Error),
    #[error("serde JSON error: {0}")]
    SerdeJSONError(#[from] serde_json::Error),
    #[error("Invalid pattern: {0}")]
    RegexError(#[from] regex::Error),
}

impl SunmapError {
    pub fn data_quality(context: impl Display, message: impl Display) -> Self {
        Self::DataQuality {
            context: context.to_string(),
            message: message.to_string(),
        }
    }
}

pub type SunmapResult<T> = Result<T, SunmapError>;

/// Region keys found in only one of the two packages.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RegionMismatch {
    pub missing_geometry: BTreeSet<RegionKey>,
    pub missing_data: BTreeSet<RegionKey>,
}

impl RegionMismatch {
    pub fn is_empty(&self) -> bool {
        self.missing_geometry.is_empty() && self.missing_data.is_empty()
    }
}

impl Display for RegionMismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "no polygon for [{}]; no data for [{}]",
            self.missing_geometry.iter().join(", "),
            self.missing_data.iter().join(", ")
        )
    }
}
