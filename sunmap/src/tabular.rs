//! Ingest the per-source CSV time series, normalise their columns and aggregate them into
//! long-form records keyed by area and period.

use std::collections::{btree_map::Entry, BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use itertools::Itertools;
use log::{debug, info, warn};
use nonempty::NonEmpty;
use polars::prelude::*;
use regex::Regex;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::config::{ConflictRule, DataConfig};
use crate::error::{SunmapError, SunmapResult};
use crate::period::Period;
use crate::region::{AreaKey, Postcode};
use crate::COL;

/// Which metric columns of the raw files are selected.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, EnumString, Display, Serialize, Deserialize)]
#[strum(ascii_case_insensitive)]
pub enum MetricType {
    Installations,
    Output,
}

impl MetricType {
    /// Text a header must contain to be a column of this metric.
    pub fn header_token(&self) -> &'static str {
        match self {
            MetricType::Installations => "Installations",
            MetricType::Output => "Output",
        }
    }

    /// Name of the value column of the long-form records.
    pub fn value_column(&self) -> &'static str {
        match self {
            MetricType::Installations => COL::INSTALL_NUM,
            MetricType::Output => COL::TOTAL_OUTPUT,
        }
    }
}

/// Values per area and period. Cells absent from the sparse rows are zero.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesTable<K: AreaKey> {
    periods: BTreeSet<Period>,
    rows: BTreeMap<K, BTreeMap<Period, f64>>,
}

impl<K: AreaKey> Default for SeriesTable<K> {
    fn default() -> Self {
        Self {
            periods: BTreeSet::new(),
            rows: BTreeMap::new(),
        }
    }
}

impl<K: AreaKey> SeriesTable<K> {
    /// Chronologically ordered periods.
    pub fn periods(&self) -> impl Iterator<Item = &Period> + Clone {
        self.periods.iter()
    }

    pub fn areas(&self) -> impl Iterator<Item = &K> + Clone {
        self.rows.keys()
    }

    pub fn value(&self, area: &K, period: &Period) -> f64 {
        self.rows
            .get(area)
            .and_then(|row| row.get(period))
            .copied()
            .unwrap_or(0.0)
    }

    /// The full row of an area over every period of the table, zero-filled.
    pub fn series(&self, area: &K) -> Vec<f64> {
        self.periods.iter().map(|p| self.value(area, p)).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn add(&mut self, area: K, period: Period, value: f64) {
        self.periods.insert(period);
        *self
            .rows
            .entry(area)
            .or_default()
            .entry(period)
            .or_insert(0.0) += value;
    }

    /// Outer-join another table into this one. Cells present in both are resolved by `rule`,
    /// `other` being the later of the two.
    pub fn merge(&mut self, other: SeriesTable<K>, rule: ConflictRule) {
        self.periods.extend(other.periods);
        for (area, other_row) in other.rows {
            let row = self.rows.entry(area).or_default();
            for (period, value) in other_row {
                match (row.entry(period), rule) {
                    (Entry::Vacant(cell), _) => {
                        cell.insert(value);
                    }
                    (Entry::Occupied(mut cell), ConflictRule::PreferLatest) => {
                        cell.insert(value);
                    }
                    (Entry::Occupied(_), ConflictRule::PreferEarliest) => {}
                }
            }
        }
    }

    /// Replace every row by its running sum over the chronologically sorted periods.
    pub fn cumulative(mut self) -> Self {
        for row in self.rows.values_mut() {
            let mut total = 0.0;
            for period in &self.periods {
                total += row.get(period).copied().unwrap_or(0.0);
                row.insert(*period, total);
            }
        }
        self
    }

    /// Dense (area, period, value) triples, ordered by area then period.
    pub fn into_long_form(self) -> Vec<(K, Period, f64)> {
        let periods = self.periods;
        self.rows
            .into_iter()
            .flat_map(|(area, row)| {
                periods
                    .iter()
                    .map(|period| (area.clone(), *period, row.get(period).copied().unwrap_or(0.0)))
                    .collect_vec()
            })
            .collect()
    }
}

impl SeriesTable<Postcode> {
    /// Sum every postcode row into the row of its area at level `J`.
    pub fn aggregate<J: AreaKey>(self) -> SeriesTable<J> {
        let mut aggregated = SeriesTable::<J> {
            periods: self.periods,
            rows: BTreeMap::new(),
        };
        for (postcode, row) in self.rows {
            let target = aggregated.rows.entry(J::from_postcode(&postcode)).or_default();
            for (period, value) in row {
                *target.entry(period).or_insert(0.0) += value;
            }
        }
        aggregated
    }
}

/// Parse a metric cell. Empty cells are zero and thousands separators are stripped.
fn parse_cell(raw: Option<&str>) -> Option<f64> {
    let cleaned = raw.unwrap_or_default().trim().replace(',', "");
    if cleaned.is_empty() {
        return Some(0.0);
    }
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Select the metric columns of a header row, keyed by the period each one encodes.
fn metric_columns(
    path: &Path,
    names: &[String],
    identifier: &str,
    exclude: &Regex,
    metric: MetricType,
) -> SunmapResult<Vec<(String, Period)>> {
    let mut seen: BTreeMap<Period, &String> = BTreeMap::new();
    let mut columns = vec![];
    for name in names
        .iter()
        .filter(|name| name.as_str() != identifier)
        .filter(|name| !exclude.is_match(name))
        .filter(|name| name.contains(metric.header_token()))
    {
        let period = Period::from_header(name).ok_or_else(|| {
            SunmapError::data_quality(
                path.display(),
                format!("no month/year token in column '{name}'"),
            )
        })?;
        if let Some(previous) = seen.insert(period, name) {
            return Err(SunmapError::data_quality(
                path.display(),
                format!("columns '{previous}' and '{name}' both map to period {period}"),
            ));
        }
        columns.push((name.clone(), period));
    }
    Ok(columns)
}

/// Read one raw file into a postcode-keyed table of the requested metric.
pub fn read_source_file(
    path: &Path,
    metric: MetricType,
    config: &DataConfig,
) -> SunmapResult<SeriesTable<Postcode>> {
    debug!("Reading {}", path.display());
    // Every column is read as a string: identifiers and cells are normalised below
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(0))
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()?;

    let identifier = config.identifier_column.as_str();
    let names = df
        .get_column_names()
        .into_iter()
        .map(|name| name.to_string())
        .collect_vec();
    if !names.iter().any(|name| name == identifier) {
        return Err(SunmapError::data_quality(
            path.display(),
            format!("missing identifier column '{identifier}'"),
        ));
    }
    let exclude = Regex::new(&config.exclude_columns)?;
    let columns = metric_columns(path, &names, identifier, &exclude, metric)?;
    if columns.is_empty() {
        warn!("{}: no {metric} columns", path.display());
    }

    let postcodes = df
        .column(identifier)?
        .str()?
        .into_iter()
        .map(|id| id.and_then(Postcode::parse))
        .collect_vec();
    let dropped = postcodes.iter().filter(|p| p.is_none()).count();
    if dropped > 0 {
        debug!(
            "{}: dropped {dropped} row(s) without a valid postcode",
            path.display()
        );
    }

    let mut table = SeriesTable::default();
    for (name, period) in &columns {
        table.periods.insert(*period);
        for (row, (postcode, cell)) in postcodes.iter().zip(df.column(name)?.str()?).enumerate() {
            let Some(postcode) = postcode else {
                continue;
            };
            let value = parse_cell(cell).ok_or_else(|| {
                SunmapError::data_quality(
                    path.display(),
                    format!(
                        "unparseable value '{}' in column '{name}' at line {}",
                        cell.unwrap_or_default(),
                        row + 2
                    ),
                )
            })?;
            table.add(postcode.clone(), *period, value);
        }
    }
    Ok(table)
}

/// The raw files of a source: every `.csv` in `raw_dir` whose name contains the source name,
/// sorted by name.
pub fn source_files(raw_dir: &Path, source: &str) -> SunmapResult<NonEmpty<PathBuf>> {
    let entries = std::fs::read_dir(raw_dir).map_err(|err| {
        SunmapError::Configuration(format!(
            "cannot read raw directory {}: {err}",
            raw_dir.display()
        ))
    })?;
    let mut files = vec![];
    for entry in entries {
        let path = entry?.path();
        let is_csv = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
        let matches_source = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.contains(source));
        if is_csv && matches_source {
            files.push(path);
        }
    }
    files.sort();
    NonEmpty::from_vec(files).ok_or_else(|| {
        SunmapError::Configuration(format!(
            "no files for source '{source}' in {}",
            raw_dir.display()
        ))
    })
}

/// One source's series of one metric, at area level `K`.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceSeries<K: AreaKey> {
    pub source: String,
    pub metric: MetricType,
    pub table: SeriesTable<K>,
}

impl<K: AreaKey> SourceSeries<K> {
    /// `<source>-<metric>` name of the value column.
    pub fn label(&self) -> String {
        format!("{}-{}", self.source, self.metric)
    }
}

/// Read and merge every file of a source, accumulate over time if configured, then aggregate
/// to area level `K`.
pub fn make_source_series<K: AreaKey>(
    config: &DataConfig,
    source: &str,
    metric: MetricType,
) -> SunmapResult<SourceSeries<K>> {
    let files = source_files(&config.raw_dir, source)?;
    debug!("{source}: {} file(s)", files.len());
    let mut merged = SeriesTable::<Postcode>::default();
    for file in files {
        merged.merge(read_source_file(&file, metric, config)?, config.conflict);
    }
    if config.cumulative {
        merged = merged.cumulative();
    }
    Ok(SourceSeries {
        source: source.to_string(),
        metric,
        table: merged.aggregate::<K>(),
    })
}

/// One row of the long-form record set.
#[derive(Debug, Clone, PartialEq)]
pub struct LongRecord<K: AreaKey> {
    pub area: K,
    pub period: Period,
    pub source: String,
    pub value: f64,
}

/// Long-form (area, period, source, value) records of a single metric.
#[derive(Debug, Clone, PartialEq)]
pub struct LongFormRecords<K: AreaKey> {
    pub metric: MetricType,
    pub records: Vec<LongRecord<K>>,
}

impl<K: AreaKey> LongFormRecords<K> {
    pub fn sources(&self) -> BTreeSet<&str> {
        self.records.iter().map(|r| r.source.as_str()).collect()
    }

    pub fn for_source<'a>(&'a self, source: &'a str) -> impl Iterator<Item = &'a LongRecord<K>> {
        self.records.iter().filter(move |r| r.source == source)
    }

    /// Records as a polars `DataFrame` with the columns `postcode`, `date`, `source_type` and
    /// the metric's value column.
    pub fn to_dataframe(&self) -> PolarsResult<DataFrame> {
        let areas = self.records.iter().map(|r| r.area.to_string()).collect_vec();
        let dates = self.records.iter().map(|r| r.period.label()).collect_vec();
        let sources = self.records.iter().map(|r| r.source.clone()).collect_vec();
        let values = self.records.iter().map(|r| r.value).collect_vec();
        DataFrame::new(vec![
            Series::new(COL::POSTCODE, areas),
            Series::new(COL::DATE, dates),
            Series::new(COL::SOURCE_TYPE, sources),
            Series::new(self.metric.value_column(), values),
        ])
    }
}

/// Combine every configured source into long-form records. Areas or periods absent from a
/// source count as zero for it. With `include_all` a derived "All" source sums the others.
pub fn make_records<K: AreaKey>(
    config: &DataConfig,
    metric: MetricType,
) -> SunmapResult<LongFormRecords<K>> {
    let sources = NonEmpty::from_vec(config.sources.clone())
        .ok_or_else(|| SunmapError::Configuration("no sources configured".into()))?;

    let mut all_series = vec![];
    for source in &sources {
        info!("Getting data for {source} - {metric}");
        all_series.push(make_source_series::<K>(config, source, metric)?);
    }

    let keys: BTreeSet<(K, Period)> = all_series
        .iter()
        .flat_map(|series| {
            series
                .table
                .areas()
                .cartesian_product(series.table.periods())
                .map(|(area, period)| (area.clone(), *period))
        })
        .collect();

    let mut records = vec![];
    for series in &all_series {
        let label = series.label();
        let source = label
            .strip_suffix(&format!("-{metric}"))
            .unwrap_or(&label)
            .to_string();
        records.extend(keys.iter().map(|(area, period)| LongRecord {
            area: area.clone(),
            period: *period,
            source: source.clone(),
            value: series.table.value(area, period),
        }));
    }
    if config.include_all {
        records.extend(keys.iter().map(|(area, period)| LongRecord {
            area: area.clone(),
            period: *period,
            source: COL::ALL_SOURCES.to_string(),
            value: all_series
                .iter()
                .map(|series| series.table.value(area, period))
                .sum(),
        }));
    }
    Ok(LongFormRecords { metric, records })
}
