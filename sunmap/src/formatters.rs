use std::io::Write;

use enum_dispatch::enum_dispatch;
use geo::Geometry;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{SunmapError, SunmapResult};
use crate::geo::{Boundary, BoundaryPackage};
use crate::COL;

/// What the pipelines hand to a formatter: the long-form records as a `DataFrame`, or the
/// simplified boundaries.
#[derive(Debug)]
pub enum FormatterInput {
    Records(DataFrame),
    Boundaries(BoundaryPackage),
}

impl FormatterInput {
    fn boundaries(&self, format: &str) -> SunmapResult<&BoundaryPackage> {
        match self {
            FormatterInput::Boundaries(package) => Ok(package),
            FormatterInput::Records(_) => Err(SunmapError::Configuration(format!(
                "{format} output needs boundaries"
            ))),
        }
    }
}

fn feature(boundary: &Boundary, base: f64) -> geojson::Feature {
    let mut properties = serde_json::Map::new();
    properties.insert(COL::POSTCODE.into(), json!(boundary.region.as_str()));
    properties.insert(COL::BASE.into(), json!(base));
    geojson::Feature {
        bbox: None,
        geometry: Some(geojson::Geometry::from(&Geometry::MultiPolygon(
            boundary.geometry.clone(),
        ))),
        id: None,
        properties: Some(properties),
        foreign_members: None,
    }
}

/// Summary table of a boundary package: one row per region.
fn boundary_summary(package: &BoundaryPackage) -> PolarsResult<DataFrame> {
    let boundaries = &package.boundaries;
    DataFrame::new(vec![
        Series::new(
            COL::POSTCODE,
            boundaries
                .iter()
                .map(|b| b.region.to_string())
                .collect::<Vec<_>>(),
        ),
        Series::new(COL::BASE, vec![package.base; boundaries.len()]),
        Series::new(
            "parts",
            boundaries.iter().map(|b| b.part_count() as u64).collect::<Vec<_>>(),
        ),
        Series::new(
            "vertices",
            boundaries.iter().map(|b| b.vertex_count() as u64).collect::<Vec<_>>(),
        ),
        Series::new("area", boundaries.iter().map(Boundary::area).collect::<Vec<_>>()),
    ])
}

/// Writers for the pipeline outputs. `save` writes to any writer, `format` renders to a string.
#[enum_dispatch]
pub trait OutputGenerator {
    fn save(&self, writer: &mut impl Write, input: &mut FormatterInput) -> SunmapResult<()>;
    fn format(&self, input: &mut FormatterInput) -> SunmapResult<String> {
        let mut data: Vec<u8> = vec![];
        self.save(&mut data, input)?;
        String::from_utf8(data)
            .map_err(|err| SunmapError::data_quality("formatter", format!("invalid UTF-8: {err}")))
    }
}

#[enum_dispatch(OutputGenerator)]
#[derive(Serialize, Deserialize, Debug)]
pub enum OutputFormatter {
    GeoJSON(GeoJSONFormatter),
    GeoJSONSeq(GeoJSONSeqFormatter),
    Csv(CSVFormatter),
}

/// One GeoJSON feature per line.
#[derive(Serialize, Deserialize, Debug, Default)]
pub struct GeoJSONSeqFormatter;

impl OutputGenerator for GeoJSONSeqFormatter {
    fn save(&self, writer: &mut impl Write, input: &mut FormatterInput) -> SunmapResult<()> {
        let package = input.boundaries("GeoJSON sequence")?;
        for boundary in &package.boundaries {
            writeln!(writer, "{}", feature(boundary, package.base))?;
        }
        Ok(())
    }
}

/// Records as they are, boundaries as a per-region summary.
#[derive(Serialize, Deserialize, Debug, Default)]
pub struct CSVFormatter;

impl OutputGenerator for CSVFormatter {
    fn save(&self, writer: &mut impl Write, input: &mut FormatterInput) -> SunmapResult<()> {
        match input {
            FormatterInput::Records(df) => CsvWriter::new(writer).finish(df)?,
            FormatterInput::Boundaries(package) => {
                CsvWriter::new(writer).finish(&mut boundary_summary(package)?)?
            }
        }
        Ok(())
    }
}

/// A GeoJSON feature collection, with `postcode` and `base` properties on every feature.
#[derive(Serialize, Deserialize, Debug, Default)]
pub struct GeoJSONFormatter;

impl OutputGenerator for GeoJSONFormatter {
    fn format(&self, input: &mut FormatterInput) -> SunmapResult<String> {
        let package = input.boundaries("GeoJSON")?;
        let feature_collection = geojson::FeatureCollection {
            bbox: None,
            features: package
                .boundaries
                .iter()
                .map(|boundary| feature(boundary, package.base))
                .collect(),
            foreign_members: None,
        };
        Ok(feature_collection.to_string())
    }

    fn save(&self, writer: &mut impl Write, input: &mut FormatterInput) -> SunmapResult<()> {
        let result = self.format(input)?;
        writer.write_all(result.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use geo::{polygon, MultiPolygon};

    use super::*;

    fn package() -> BoundaryPackage {
        BoundaryPackage {
            base: 0.5,
            projection: crate::geo::GDA94_WKT.to_string(),
            boundaries: vec![
                Boundary {
                    region: "20".parse().unwrap(),
                    geometry: MultiPolygon::new(vec![polygon![
                        (x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 1.0, y: 1.0), (x: 0.0, y: 0.0),
                    ]]),
                },
                Boundary {
                    region: "30".parse().unwrap(),
                    geometry: MultiPolygon::new(vec![polygon![
                        (x: 1.0, y: 0.0), (x: 2.0, y: 0.0), (x: 2.0, y: 1.0), (x: 1.0, y: 0.0),
                    ]]),
                },
            ],
        }
    }

    #[test]
    fn test_geojson_formatter() {
        let formatter = OutputFormatter::GeoJSON(GeoJSONFormatter);
        let output = formatter
            .format(&mut FormatterInput::Boundaries(package()))
            .unwrap();
        let collection: geojson::FeatureCollection = output.parse::<geojson::GeoJson>()
            .unwrap()
            .try_into()
            .unwrap();
        assert_eq!(collection.features.len(), 2);
        let properties = collection.features[1].properties.as_ref().unwrap();
        assert_eq!(properties[COL::POSTCODE], json!("30"));
        assert_eq!(properties[COL::BASE], json!(0.5));
    }

    #[test]
    fn test_geojson_seq_formatter() {
        let formatter = OutputFormatter::GeoJSONSeq(GeoJSONSeqFormatter);
        let output = formatter
            .format(&mut FormatterInput::Boundaries(package()))
            .unwrap();
        assert_eq!(output.lines().count(), 2);
        for line in output.lines() {
            assert!(line.parse::<geojson::Feature>().is_ok());
        }
    }

    #[test]
    fn test_geojson_needs_boundaries() {
        let df = DataFrame::new(vec![Series::new(COL::POSTCODE, vec!["20"])]).unwrap();
        let result = OutputFormatter::GeoJSON(GeoJSONFormatter)
            .format(&mut FormatterInput::Records(df));
        assert!(matches!(result, Err(SunmapError::Configuration(_))));
    }

    #[test]
    fn test_csv_formatter() {
        let formatter = OutputFormatter::Csv(CSVFormatter);
        let df = DataFrame::new(vec![
            Series::new(COL::POSTCODE, vec!["20", "30"]),
            Series::new(COL::INSTALL_NUM, vec![25.0, 5.0]),
        ])
        .unwrap();
        let output = formatter.format(&mut FormatterInput::Records(df)).unwrap();
        assert_eq!(output.lines().next(), Some("postcode,install_num"));
        assert_eq!(output.lines().count(), 3);

        let summary = formatter
            .format(&mut FormatterInput::Boundaries(package()))
            .unwrap();
        assert_eq!(
            summary.lines().next(),
            Some("postcode,base,parts,vertices,area")
        );
        assert!(summary.lines().nth(1).unwrap().starts_with("20,0.5,1,4,"));
    }
}
