use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use clap::{Args, Parser, Subcommand};
use enum_dispatch::enum_dispatch;
use log::{debug, info};
use polars::frame::DataFrame;
use serde::{Deserialize, Serialize};
use spinners::{Spinner, Spinners};
use strum_macros::EnumString;
use sunmap::{
    config::{Config, SimplifyAlgorithm},
    formatters::{
        CSVFormatter, FormatterInput, GeoJSONFormatter, GeoJSONSeqFormatter, OutputFormatter,
        OutputGenerator,
    },
    package::{period_index_for_frame, BuildPackage},
    region::{Postcode, RegionKey},
    tabular::MetricType,
    Sunmap,
};

use crate::display::{
    display_boundary_summary, display_caption, display_mismatch, display_package_summary,
};
use crate::error::SunmapCliResult;

const DEFAULT_PROGRESS_SPINNER: Spinners = Spinners::Dots;
const COMPLETE_PROGRESS_STRING: &str = "✔";
const RUNNING_TAIL_STRING: &str = "...";
const AGGREGATING_STRING: &str = "Aggregating raw series";
const SIMPLIFYING_STRING: &str = "Dissolving and simplifying boundaries";
const BUILDING_STRING: &str = "Building both packages";

/// Defines the output formats we are able to produce data in.
#[derive(Clone, Debug, Deserialize, Serialize, EnumString, PartialEq, Eq)]
#[strum(ascii_case_insensitive)]
pub enum OutputFormat {
    GeoJSON,
    GeoJSONSeq,
    Csv,
    Stdout,
}

impl From<&OutputFormat> for OutputFormatter {
    fn from(value: &OutputFormat) -> Self {
        match value {
            OutputFormat::GeoJSON => OutputFormatter::GeoJSON(GeoJSONFormatter),
            OutputFormat::GeoJSONSeq => OutputFormatter::GeoJSONSeq(GeoJSONSeqFormatter),
            OutputFormat::Csv | OutputFormat::Stdout => OutputFormatter::Csv(CSVFormatter),
        }
    }
}

fn write_output<T, U>(
    output_generator: T,
    mut input: FormatterInput,
    output_file: Option<U>,
) -> SunmapCliResult<()>
where
    T: OutputGenerator,
    U: AsRef<Path>,
{
    if let Some(output_file) = output_file {
        let mut f = File::create(output_file).context("Failed to write output")?;
        output_generator.save(&mut f, &mut input)?;
    } else {
        let mut stdout_lock = std::io::stdout().lock();
        output_generator.save(&mut stdout_lock, &mut input)?;
    };
    Ok(())
}

/// Run `task` behind a spinner unless `quiet`.
fn with_spinner<T>(quiet: bool, message: &str, task: impl FnOnce() -> T) -> T {
    let sp = (!quiet).then(|| {
        Spinner::with_timer(
            DEFAULT_PROGRESS_SPINNER,
            message.to_string() + RUNNING_TAIL_STRING,
        )
    });
    let result = task();
    if let Some(mut s) = sp {
        s.stop_with_symbol(COMPLETE_PROGRESS_STRING)
    }
    result
}

/// Trait that defines what to run when a given subcommand is invoked.
#[enum_dispatch]
pub trait RunCommand {
    fn run(&self, config: Config) -> SunmapCliResult<()>;
}

/// The `data` command aggregates the raw series and writes the series package.
#[derive(Args, Debug)]
pub struct DataCommand {
    #[arg(short = 'o', long, help = "Output file for the JSON package")]
    output_file: Option<PathBuf>,
    #[arg(long, help = "Source the package is built from")]
    source: Option<String>,
    #[arg(short = 'n', long, help = "Number of regions to show in the summary")]
    max_results: Option<usize>,
    #[arg(from_global)]
    quiet: bool,
}

impl RunCommand for DataCommand {
    fn run(&self, mut config: Config) -> SunmapCliResult<()> {
        info!("Running `data` subcommand");
        if let Some(output_file) = &self.output_file {
            config.data.output_path = output_file.clone();
        }
        if let Some(source) = &self.source {
            config.data.package_source = Some(source.clone());
        }
        let sunmap = Sunmap::new_with_config(config);
        let package = with_spinner(self.quiet, AGGREGATING_STRING, || sunmap.build_package())?;
        sunmap.write_package(&package)?;
        display_package_summary(&package, self.max_results);
        Ok(())
    }
}

/// The `geometry` command dissolves and simplifies the boundaries and writes the shapefile.
#[derive(Args, Debug)]
pub struct GeometryCommand {
    #[arg(short = 'o', long, help = "Output shapefile")]
    output_file: Option<PathBuf>,
    #[arg(long, help = "Also write the boundaries as GeoJSON to this file")]
    geojson: Option<PathBuf>,
    #[arg(short = 't', long, help = "Tolerance of the topology-aware simplification")]
    tolerance: Option<f64>,
    #[arg(
        short = 'a',
        long,
        value_name = "vw|dp",
        help = "Simplification algorithm of the topology-aware pass"
    )]
    algorithm: Option<SimplifyAlgorithm>,
    #[arg(from_global)]
    quiet: bool,
}

impl RunCommand for GeometryCommand {
    fn run(&self, mut config: Config) -> SunmapCliResult<()> {
        info!("Running `geometry` subcommand");
        if let Some(output_file) = &self.output_file {
            config.geometry.output_path = output_file.clone();
        }
        if let Some(geojson) = &self.geojson {
            config.geometry.geojson_path = Some(geojson.clone());
        }
        if let Some(tolerance) = self.tolerance {
            config.geometry.tolerance = tolerance;
        }
        if let Some(algorithm) = self.algorithm {
            config.geometry.algorithm = algorithm;
        }
        let sunmap = Sunmap::new_with_config(config);
        let boundaries = with_spinner(self.quiet, SIMPLIFYING_STRING, || sunmap.build_boundaries())?;
        sunmap.write_boundaries(&boundaries)?;
        display_boundary_summary(&boundaries);
        Ok(())
    }
}

/// The `build` command runs both pipelines, checks that their region keys agree and writes
/// both packages.
#[derive(Args, Debug)]
pub struct BuildCommand {
    #[arg(
        long,
        help = "Warn instead of failing when the packages disagree on their regions"
    )]
    lenient: bool,
    #[arg(from_global)]
    quiet: bool,
}

impl RunCommand for BuildCommand {
    fn run(&self, mut config: Config) -> SunmapCliResult<()> {
        info!("Running `build` subcommand");
        if self.lenient {
            config.strict_consistency = false;
        }
        let sunmap = Sunmap::new_with_config(config);
        let outputs = with_spinner(self.quiet, BUILDING_STRING, || sunmap.build())?;
        display_package_summary(&outputs.package, None);
        display_boundary_summary(&outputs.boundaries);
        display_mismatch(&outputs.mismatch);
        Ok(())
    }
}

/// The `check` command compares the region keys of packages already written.
#[derive(Args, Debug)]
pub struct CheckCommand {
    #[arg(long, help = "Series package to check")]
    data: Option<PathBuf>,
    #[arg(long, help = "Boundary shapefile to check")]
    geometry: Option<PathBuf>,
}

impl RunCommand for CheckCommand {
    fn run(&self, mut config: Config) -> SunmapCliResult<()> {
        info!("Running `check` subcommand");
        if let Some(data) = &self.data {
            config.data.output_path = data.clone();
        }
        if let Some(geometry) = &self.geometry {
            config.geometry.output_path = geometry.clone();
        }
        // Report every mismatch rather than stopping at the first strict failure
        config.strict_consistency = false;
        let mismatch = Sunmap::new_with_config(config).check_outputs()?;
        display_mismatch(&mismatch);
        if mismatch.is_empty() {
            Ok(())
        } else {
            Err(anyhow!("Packages disagree on their region keys: {mismatch}").into())
        }
    }
}

/// The `records` command writes the long-form records of every configured source.
#[derive(Args, Debug)]
pub struct RecordsCommand {
    #[arg(
        short = 'm',
        long,
        value_name = "installations|output",
        help = "Metric to aggregate"
    )]
    metric: MetricType,
    #[arg(
        short = 'f',
        long,
        value_name = "csv|stdout",
        default_value = "csv",
        help = "Output format for the results"
    )]
    output_format: OutputFormat,
    #[arg(short = 'o', long, help = "Output file to place the results")]
    output_file: Option<PathBuf>,
    #[arg(long, help = "Add an \"All\" source summing every source")]
    all: bool,
    #[arg(long = "postcodes", help = "Keep full postcodes instead of 2-digit regions")]
    postcodes: bool,
    #[arg(from_global)]
    quiet: bool,
}

impl RunCommand for RecordsCommand {
    fn run(&self, mut config: Config) -> SunmapCliResult<()> {
        info!("Running `records` subcommand");
        config.data.include_all |= self.all;
        let sunmap = Sunmap::new_with_config(config);
        let df = with_spinner(self.quiet, AGGREGATING_STRING, || -> SunmapCliResult<DataFrame> {
            let df = if self.postcodes {
                sunmap.records::<Postcode>(self.metric)?.to_dataframe()?
            } else {
                sunmap.records::<RegionKey>(self.metric)?.to_dataframe()?
            };
            Ok(df)
        })?;
        debug!("{df:#?}");
        let formatter: OutputFormatter = (&self.output_format).into();
        write_output(
            formatter,
            FormatterInput::Records(df),
            self.output_file.as_deref(),
        )?;
        Ok(())
    }
}

/// The `caption` command prints the caption of one period of a series package.
#[derive(Args, Debug)]
pub struct CaptionCommand {
    #[arg(long, help = "Series package to read; defaults to the configured output")]
    data: Option<PathBuf>,
    #[arg(
        short = 'p',
        long,
        conflicts_with = "frame",
        help = "Index of the period to caption"
    )]
    period: Option<usize>,
    #[arg(long, help = "Frame of the animation to caption")]
    frame: Option<u32>,
    #[arg(long, default_value_t = 10, help = "Frames per period")]
    frame_step: u32,
}

impl RunCommand for CaptionCommand {
    fn run(&self, config: Config) -> SunmapCliResult<()> {
        info!("Running `caption` subcommand");
        let path = self.data.clone().unwrap_or(config.data.output_path);
        let package = BuildPackage::from_path(&path)?;
        let index = match (self.period, self.frame) {
            (Some(period), _) => period,
            (None, Some(frame)) => period_index_for_frame(frame, self.frame_step)
                .ok_or_else(|| anyhow!("--frame-step must be positive"))?,
            (None, None) => package.period_count().saturating_sub(1),
        };
        let caption = package
            .caption_text(index)
            .ok_or_else(|| anyhow!("Period {index} is past the last of {}", package.period_count()))?;
        display_caption(&caption);
        Ok(())
    }
}

/// The entrypoint for the CLI.
#[derive(Parser, Debug)]
#[command(version, about="Sunmap builds the solar series and boundary packages for the scene builder", long_about = None, name="sunmap")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
    #[arg(
        short = 'c',
        long = "config",
        help = "Config file; defaults to sunmap/config.toml in the user config directory",
        global = true
    )]
    pub config: Option<PathBuf>,
    #[arg(
        short = 'q',
        long = "quiet",
        help = "\
            Do not print progress bar to stdout. Results and logs (when `RUST_LOG`\n\
            is set) will still be printed.",
        global = true
    )]
    quiet: bool,
}

/// Commands contains the list of subcommands avaliable for use in the CLI.
/// Each command should implement the RunCommand trait and specify the list
/// of required args for that command.
#[derive(Subcommand, Debug)]
#[enum_dispatch(RunCommand)]
pub enum Commands {
    /// Aggregate the raw series and write the series package
    Data(DataCommand),
    /// Dissolve and simplify the boundaries and write the boundary package
    Geometry(GeometryCommand),
    /// Run both pipelines and check their region keys agree
    Build(BuildCommand),
    /// Check the region keys of packages already written
    Check(CheckCommand),
    /// Output the long-form records of every source
    Records(RecordsCommand),
    /// Print the caption text of one period
    Caption(CaptionCommand),
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use clap::CommandFactory;
    use sunmap::package::{RegionSeries, TotalSeries};
    use tempfile::TempDir;

    use super::*;

    fn write_package(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("data.json");
        let package = BuildPackage {
            regions: [(
                "20".parse().unwrap(),
                RegionSeries {
                    date: vec!["Jan 2015".into(), "Feb 2015".into()],
                    height: vec![0.5, 1.0],
                    color: vec![0.25, 1.0],
                    install: vec!["1,000".into(), "2,000".into()],
                    output: vec!["4.00".into(), "8.00".into()],
                },
            )]
            .into_iter()
            .collect(),
            all: TotalSeries {
                date: vec!["Jan 2015".into(), "Feb 2015".into()],
                install: vec!["1,000".into(), "2,000".into()],
                output: vec!["4.00".into(), "8.00".into()],
            },
        };
        package.write_json(&path).unwrap();
        path
    }

    #[test]
    fn test_caption_command() {
        let dir = TempDir::new().unwrap();
        let data = write_package(&dir);
        let command = CaptionCommand {
            data: Some(data.clone()),
            period: None,
            frame: Some(15),
            frame_step: 10,
        };
        assert!(command.run(Config::default()).is_ok());

        let past_the_end = CaptionCommand {
            data: Some(data),
            period: Some(2),
            frame: None,
            frame_step: 10,
        };
        assert!(past_the_end.run(Config::default()).is_err());
    }

    #[test]
    fn test_records_command() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("2015-SGU-Solar.csv"),
            "Small Unit Installation Postcode,Jan 2015 - Installations Quantity\n2000,3\n2001,4\n",
        )
        .unwrap();
        let mut config = Config::default();
        config.data.raw_dir = dir.path().to_path_buf();
        let output_file = dir.path().join("records.csv");
        let command = RecordsCommand {
            metric: MetricType::Installations,
            output_format: OutputFormat::Csv,
            output_file: Some(output_file.clone()),
            all: false,
            postcodes: false,
            quiet: true,
        };
        command.run(config).unwrap();
        let written = std::fs::read_to_string(output_file).unwrap();
        let mut lines = written.lines();
        assert_eq!(lines.next(), Some("postcode,date,source_type,install_num"));
        assert_eq!(lines.next(), Some("20,2015-01,SGU-Solar,7.0"));
    }

    #[test]
    fn output_type_should_deserialize_properly() {
        let output_format = OutputFormat::from_str("GeoJSON");
        assert_eq!(
            output_format.unwrap(),
            OutputFormat::GeoJSON,
            "geojson format should be parsed correctly"
        );
        let output_format = OutputFormat::from_str("GeoJson");
        assert_eq!(
            output_format.unwrap(),
            OutputFormat::GeoJSON,
            "parsing should be case insensitive"
        );
        let output_format = OutputFormat::from_str("shapefile");
        assert!(output_format.is_err(), "non listed formats should fail");
    }

    #[test]
    fn arguments_should_parse() {
        let cli = Cli::try_parse_from([
            "sunmap", "geometry", "--algorithm", "dp", "--tolerance", "0.01", "-q",
        ])
        .unwrap();
        match cli.command {
            Some(Commands::Geometry(command)) => {
                assert_eq!(command.algorithm, Some(SimplifyAlgorithm::DouglasPeucker));
                assert_eq!(command.tolerance, Some(0.01));
                assert!(command.quiet);
            }
            other => panic!("unexpected command {other:?}"),
        }
        let cli = Cli::try_parse_from(["sunmap", "records", "-m", "OUTPUT"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Records(RecordsCommand {
                metric: MetricType::Output,
                ..
            }))
        ));
    }

    #[test]
    fn cli() {
        Cli::command().debug_assert();
    }
}
