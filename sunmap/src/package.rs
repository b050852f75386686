//! The series package handed to the scene builder: one entry per region with raw and
//! normalised series, plus a reserved entry summing every region.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use log::{debug, info, warn};
use num_format::{Locale, ToFormattedString};
use serde::de::Error as _;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{SunmapError, SunmapResult};
use crate::period::Period;
use crate::region::RegionKey;
use crate::tabular::{LongFormRecords, MetricType};
use crate::COL;

/// Group an integer count with thousands separators, e.g. `12,345`.
pub fn format_count(n: i64) -> String {
    n.to_formatted_string(&Locale::en)
}

/// Fixed two-decimal value with thousands separators, e.g. `1,234.57`.
pub fn format_decimal(n: f64) -> String {
    let fixed = format!("{:.2}", n.abs());
    let (int_part, frac_part) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));
    let grouped = int_part
        .parse::<u64>()
        .map(|int| int.to_formatted_string(&Locale::en))
        .unwrap_or_else(|_| int_part.to_string());
    let sign = if n < 0.0 && fixed != "0.00" { "-" } else { "" };
    format!("{sign}{grouped}.{frac_part}")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionSeries {
    pub date: Vec<String>,
    pub height: Vec<f64>,
    pub color: Vec<f64>,
    pub install: Vec<String>,
    pub output: Vec<String>,
}

/// The reserved `"all"` entry. Totals are not normalised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TotalSeries {
    pub date: Vec<String>,
    pub install: Vec<String>,
    pub output: Vec<String>,
}

/// The three caption strings shown for one period.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caption {
    pub heading: String,
    pub install: String,
    pub output: String,
}

/// Map a frame of the host's playback clock to the period it displays.
pub fn period_index_for_frame(frame: u32, frame_step: u32) -> Option<usize> {
    frame.checked_div(frame_step).map(|index| index as usize)
}

#[derive(Debug, Clone, PartialEq)]
pub struct BuildPackage {
    pub regions: BTreeMap<RegionKey, RegionSeries>,
    pub all: TotalSeries,
}

fn cells_for(
    records: &LongFormRecords<RegionKey>,
    source: &str,
) -> BTreeMap<RegionKey, BTreeMap<Period, f64>> {
    let mut cells: BTreeMap<RegionKey, BTreeMap<Period, f64>> = BTreeMap::new();
    for record in records.for_source(source) {
        *cells
            .entry(record.area.clone())
            .or_default()
            .entry(record.period)
            .or_insert(0.0) += record.value;
    }
    cells
}

fn normalise(values: impl Iterator<Item = f64>, max: f64) -> Vec<f64> {
    if max > 0.0 {
        values.map(|v| v / max).collect()
    } else {
        values.map(|_| 0.0).collect()
    }
}

impl BuildPackage {
    /// Build the package of `source` from its installation and output records.
    pub fn build(
        installs: &LongFormRecords<RegionKey>,
        outputs: &LongFormRecords<RegionKey>,
        source: &str,
    ) -> SunmapResult<Self> {
        if installs.metric != MetricType::Installations || outputs.metric != MetricType::Output {
            return Err(SunmapError::Configuration(format!(
                "package needs installation and output records, got {} and {}",
                installs.metric, outputs.metric
            )));
        }
        let install_cells = cells_for(installs, source);
        if install_cells.is_empty() {
            return Err(SunmapError::Configuration(format!(
                "no installation records for source '{source}'"
            )));
        }
        let output_cells = cells_for(outputs, source);

        // The date axis shared by every entry, "all" included
        let periods: Vec<Period> = install_cells
            .values()
            .flat_map(|row| row.keys().copied())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let dates: Vec<String> = periods.iter().map(Period::display_label).collect();
        debug!("Packaging {} region(s) over {} period(s)", install_cells.len(), periods.len());

        let empty = BTreeMap::new();
        let series: Vec<(RegionKey, Vec<i64>, Vec<f64>)> = install_cells
            .iter()
            .map(|(region, installs)| {
                let outputs = output_cells.get(region).unwrap_or_else(|| {
                    debug!("No output records for region {region}");
                    &empty
                });
                let install = periods
                    .iter()
                    .map(|p| installs.get(p).copied().unwrap_or(0.0) as i64)
                    .collect();
                let output = periods
                    .iter()
                    .map(|p| outputs.get(p).copied().unwrap_or(0.0))
                    .collect();
                (region.clone(), install, output)
            })
            .collect();

        let max_install = series
            .iter()
            .flat_map(|(_, install, _)| install.iter().copied())
            .max()
            .unwrap_or(0);
        let max_output = series
            .iter()
            .flat_map(|(_, _, output)| output.iter().copied())
            .fold(0.0, f64::max);
        if max_install <= 0 {
            warn!("Maximum installation count is zero, every height is 0");
        }
        if max_output <= 0.0 {
            warn!("Maximum output is zero, every color is 0");
        }

        let regions = series
            .into_iter()
            .map(|(region, install, output)| {
                let entry = RegionSeries {
                    date: dates.clone(),
                    height: normalise(install.iter().map(|&i| i as f64), max_install as f64),
                    color: normalise(output.iter().copied(), max_output),
                    install: install.iter().map(|&i| format_count(i)).collect(),
                    output: output.iter().map(|&o| format_decimal(o / 1000.0)).collect(),
                };
                (region, entry)
            })
            .collect();

        let total = |cells: &BTreeMap<RegionKey, BTreeMap<Period, f64>>, period: &Period| {
            cells
                .values()
                .filter_map(|row| row.get(period))
                .sum::<f64>()
        };
        let all = TotalSeries {
            date: dates,
            install: periods
                .iter()
                .map(|p| format_count(total(&install_cells, p) as i64))
                .collect(),
            output: periods
                .iter()
                .map(|p| format_decimal(total(&output_cells, p) / 1000.0))
                .collect(),
        };
        Ok(Self { regions, all })
    }

    pub fn region_keys(&self) -> BTreeSet<RegionKey> {
        self.regions.keys().cloned().collect()
    }

    pub fn period_count(&self) -> usize {
        self.all.date.len()
    }

    /// Caption strings of the `"all"` entry for period `index`, `None` past the last period.
    pub fn caption_text(&self, index: usize) -> Option<Caption> {
        Some(Caption {
            heading: format!(
                "By {}\nThe quantity of solar PVs has grown to",
                self.all.date.get(index)?
            ),
            install: self.all.install.get(index)?.clone(),
            output: format!("{} MW", self.all.output.get(index)?),
        })
    }

    /// Write the package as JSON, replacing any existing file.
    pub fn write_json(&self, path: &Path) -> SunmapResult<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        info!("Writing package to {}", path.display());
        serde_json::to_writer(BufWriter::new(File::create(path)?), self)?;
        Ok(())
    }

    pub fn from_path(path: &Path) -> SunmapResult<Self> {
        let file = File::open(path)?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }
}

impl Serialize for BuildPackage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.regions.len() + 1))?;
        for (region, series) in &self.regions {
            map.serialize_entry(region.as_str(), series)?;
        }
        map.serialize_entry(COL::ALL_REGIONS, &self.all)?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for BuildPackage {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut raw = BTreeMap::<String, serde_json::Value>::deserialize(deserializer)?;
        let all = raw
            .remove(COL::ALL_REGIONS)
            .ok_or_else(|| D::Error::missing_field(COL::ALL_REGIONS))?;
        let all: TotalSeries = serde_json::from_value(all).map_err(D::Error::custom)?;
        let regions = raw
            .into_iter()
            .map(|(key, value)| {
                let region = key.parse::<RegionKey>().map_err(D::Error::custom)?;
                let series = serde_json::from_value(value).map_err(D::Error::custom)?;
                Ok((region, series))
            })
            .collect::<Result<_, D::Error>>()?;
        Ok(Self { regions, all })
    }
}
