use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::config::Config;
use crate::error::{RegionMismatch, SunmapError, SunmapResult};
use crate::geo::BoundaryPackage;
use crate::package::BuildPackage;
use crate::region::{AreaKey, RegionKey};
use crate::tabular::{LongFormRecords, MetricType};

// Re-exports
pub use column_names as COL;

// Modules
pub mod column_names;
pub mod config;
pub mod consistency;
pub mod error;
#[cfg(feature = "formatters")]
pub mod formatters;
pub mod geo;
pub mod package;
pub mod period;
pub mod region;
pub mod tabular;
pub mod topology;

/// Sibling of `path` the series package is written to before it replaces `path`.
fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".partial");
    path.with_file_name(name)
}

/// Both packages of a run and how their region keys compare.
#[derive(Debug)]
pub struct BuildOutputs {
    pub package: BuildPackage,
    pub boundaries: BoundaryPackage,
    pub mismatch: RegionMismatch,
}

/// Type for the sunmap pipelines
#[derive(Debug, Default)]
pub struct Sunmap {
    pub config: Config,
}

impl Sunmap {
    /// Setup the Sunmap object with default configuration
    pub fn new() -> Self {
        Self::new_with_config(Config::default())
    }

    /// Setup the Sunmap object with custom configuration
    pub fn new_with_config(config: Config) -> Self {
        debug!("config: {config:?}");
        Self { config }
    }

    /// Long-form records of every configured source at area level `K`.
    pub fn records<K: AreaKey>(&self, metric: MetricType) -> SunmapResult<LongFormRecords<K>> {
        tabular::make_records(&self.config.data, metric)
    }

    /// Build the series package in memory.
    pub fn build_package(&self) -> SunmapResult<BuildPackage> {
        let source = self.config.data.package_source().ok_or_else(|| {
            SunmapError::Configuration(
                "several sources are configured: set data.package_source or data.include_all"
                    .into(),
            )
        })?;
        let installs = self.records::<RegionKey>(MetricType::Installations)?;
        let outputs = self.records::<RegionKey>(MetricType::Output)?;
        BuildPackage::build(&installs, &outputs, &source)
    }

    /// Build the boundary package in memory.
    pub fn build_boundaries(&self) -> SunmapResult<BoundaryPackage> {
        BoundaryPackage::build(&self.config.geometry)
    }

    pub fn check_consistency(
        &self,
        package: &BuildPackage,
        boundaries: &BoundaryPackage,
    ) -> SunmapResult<RegionMismatch> {
        consistency::check_regions(
            &package.region_keys(),
            &boundaries.region_keys(),
            self.config.strict_consistency,
        )
    }

    /// Compare the packages already written to the configured output paths.
    pub fn check_outputs(&self) -> SunmapResult<RegionMismatch> {
        let package = BuildPackage::from_path(&self.config.data.output_path)?;
        let boundaries = BoundaryPackage::from_shapefile(&self.config.geometry.output_path)?;
        self.check_consistency(&package, &boundaries)
    }

    pub fn write_package(&self, package: &BuildPackage) -> SunmapResult<()> {
        package.write_json(&self.config.data.output_path)
    }

    /// Write the boundary shapefile, and the GeoJSON copy when a path is configured.
    pub fn write_boundaries(&self, boundaries: &BoundaryPackage) -> SunmapResult<()> {
        boundaries.write_shapefile(&self.config.geometry.output_path)?;
        if let Some(path) = self.config.geometry.geojson_path.as_deref() {
            self.write_geojson(boundaries, path)?;
        }
        Ok(())
    }

    #[cfg(feature = "formatters")]
    fn write_geojson(&self, boundaries: &BoundaryPackage, path: &Path) -> SunmapResult<()> {
        use formatters::{FormatterInput, GeoJSONFormatter, OutputGenerator};

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        info!("Writing GeoJSON to {}", path.display());
        let mut file = std::fs::File::create(path)?;
        GeoJSONFormatter.save(&mut file, &mut FormatterInput::Boundaries(boundaries.clone()))
    }

    #[cfg(not(feature = "formatters"))]
    fn write_geojson(&self, _boundaries: &BoundaryPackage, path: &Path) -> SunmapResult<()> {
        Err(SunmapError::Configuration(format!(
            "cannot write {}: built without the formatters feature",
            path.display()
        )))
    }

    /// Run both pipelines, compare their region keys, then write both packages. Nothing is
    /// written if either pipeline or a strict comparison fails, and the series package only
    /// replaces the previous one once the boundaries are written.
    pub fn build(&self) -> SunmapResult<BuildOutputs> {
        let package = self.build_package()?;
        let boundaries = self.build_boundaries()?;
        let mismatch = self.check_consistency(&package, &boundaries)?;

        let output_path = &self.config.data.output_path;
        let staged = staging_path(output_path);
        package.write_json(&staged)?;
        if let Err(err) = self.write_boundaries(&boundaries) {
            if let Err(cleanup) = std::fs::remove_file(&staged) {
                debug!("Could not remove {}: {cleanup}", staged.display());
            }
            return Err(err);
        }
        std::fs::rename(&staged, output_path)?;
        info!("All done!");
        Ok(BuildOutputs {
            package,
            boundaries,
            mismatch,
        })
    }
}
