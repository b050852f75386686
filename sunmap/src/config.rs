use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::COL;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub data: DataConfig,
    pub geometry: GeometryConfig,
    /// Fail a build when the two packages disagree on their region keys, rather than warn.
    pub strict_consistency: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            data: DataConfig::default(),
            geometry: GeometryConfig::default(),
            strict_consistency: true,
        }
    }
}

/// Tunables of the tabular pipeline and the series package.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct DataConfig {
    pub raw_dir: PathBuf,
    pub sources: Vec<String>,
    /// Source label the package is built from. Defaults to the only source, or to the derived
    /// "All" label when several sources are combined with `include_all`.
    pub package_source: Option<String>,
    pub identifier_column: String,
    /// Columns matching this pattern (cumulative or prior-period totals) are dropped before the
    /// metric columns are selected.
    pub exclude_columns: String,
    pub cumulative: bool,
    pub include_all: bool,
    pub conflict: ConflictRule,
    pub output_path: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        DataConfig {
            raw_dir: PathBuf::from("data").join("raw"),
            sources: vec!["SGU-Solar".into()],
            package_source: None,
            identifier_column: COL::SOURCE_POSTCODE.into(),
            exclude_columns: "Previous|Total".into(),
            cumulative: true,
            include_all: false,
            conflict: ConflictRule::default(),
            output_path: PathBuf::from("output").join("data.json"),
        }
    }
}

impl DataConfig {
    pub fn package_source(&self) -> Option<String> {
        if let Some(source) = self.package_source.as_ref() {
            return Some(source.clone());
        }
        match self.sources.as_slice() {
            [single] => Some(single.clone()),
            [] => None,
            _ if self.include_all => Some(COL::ALL_SOURCES.into()),
            _ => None,
        }
    }
}

/// Tunables of the geometry pipeline and the boundary package.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct GeometryConfig {
    pub archive: PathBuf,
    pub code_field: String,
    /// Remote and offshore postcodes removed from the geometry before aggregation.
    pub excluded_postcodes: Vec<String>,
    /// Grid size in degrees of the per-polygon prepass.
    pub prepass_tolerance: f64,
    pub preserve_topology: bool,
    /// Arc tolerance of the topology-aware pass: a triangle area for Visvalingam-Whyatt, a
    /// distance for Douglas-Peucker.
    pub tolerance: f64,
    pub algorithm: SimplifyAlgorithm,
    pub base_height: f64,
    pub output_path: PathBuf,
    pub geojson_path: Option<PathBuf>,
}

impl Default for GeometryConfig {
    fn default() -> Self {
        GeometryConfig {
            archive: PathBuf::from("data")
                .join("shp")
                .join("poa_2016_aust_shape.zip"),
            code_field: COL::SOURCE_BOUNDARY_CODE.into(),
            excluded_postcodes: ["6798", "6799", "2899", "7151"]
                .into_iter()
                .map(String::from)
                .collect(),
            prepass_tolerance: 0.005,
            preserve_topology: true,
            tolerance: 0.002,
            algorithm: SimplifyAlgorithm::default(),
            base_height: 0.5,
            output_path: PathBuf::from("output").join("geo.shp"),
            geojson_path: None,
        }
    }
}

/// How a value is chosen when two raw files of the same source carry the same postcode and
/// period.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default, EnumString, Display)]
#[strum(ascii_case_insensitive)]
pub enum ConflictRule {
    /// The file sorting later by name wins.
    #[default]
    PreferLatest,
    /// The file sorting earlier by name wins.
    PreferEarliest,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default, EnumString, Display)]
#[strum(ascii_case_insensitive)]
pub enum SimplifyAlgorithm {
    #[default]
    #[strum(to_string = "VisvalingamWhyatt", serialize = "vw")]
    VisvalingamWhyatt,
    #[strum(to_string = "DouglasPeucker", serialize = "dp")]
    DouglasPeucker,
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn partial_config_should_fill_defaults() {
        let config: Config = toml::from_str(
            r#"
            strict_consistency = false

            [geometry]
            tolerance = 0.01
            algorithm = "DouglasPeucker"
            "#,
        )
        .unwrap();
        assert!(!config.strict_consistency);
        assert_eq!(config.geometry.tolerance, 0.01);
        assert_eq!(config.geometry.algorithm, SimplifyAlgorithm::DouglasPeucker);
        assert_eq!(config.geometry.prepass_tolerance, 0.005);
        assert_eq!(config.data, DataConfig::default());
    }

    #[test]
    fn package_source_defaults() {
        let mut data = DataConfig::default();
        assert_eq!(data.package_source().as_deref(), Some("SGU-Solar"));
        data.sources.push("SWH-Solar".into());
        assert_eq!(data.package_source(), None);
        data.include_all = true;
        assert_eq!(data.package_source().as_deref(), Some(COL::ALL_SOURCES));
        data.package_source = Some("SWH-Solar".into());
        assert_eq!(data.package_source().as_deref(), Some("SWH-Solar"));
    }

    #[test]
    fn algorithm_should_parse_case_insensitively() {
        assert_eq!(
            SimplifyAlgorithm::from_str("VW").unwrap(),
            SimplifyAlgorithm::VisvalingamWhyatt
        );
        assert_eq!(
            SimplifyAlgorithm::from_str("douglaspeucker").unwrap(),
            SimplifyAlgorithm::DouglasPeucker
        );
        assert!(SimplifyAlgorithm::from_str("chaikin").is_err());
        assert_eq!(
            ConflictRule::from_str("preferearliest").unwrap(),
            ConflictRule::PreferEarliest
        );
    }
}
