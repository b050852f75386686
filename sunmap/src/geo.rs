//! The boundary pipeline: load the zipped postal-area shapefile, drop excluded postcodes,
//! dissolve postcodes into regions and simplify the regions without opening gaps between them.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek};
use std::path::Path;

use geo::sweep::{Cross, Intersections, LineOrPoint};
use geo::{Area, BooleanOps, Coord, CoordsIter, Line, LineString, MultiPolygon, Polygon};
use itertools::Itertools;
use log::{debug, info};
use shapefile::dbase::{FieldName, FieldValue, Record, TableWriterBuilder};
use shapefile::Shape;
use zip::ZipArchive;

use crate::config::GeometryConfig;
use crate::error::{SunmapError, SunmapResult};
use crate::region::{Postcode, RegionKey};
use crate::topology::{point_key, PointKey, Topology};
use crate::COL;

/// Coordinate system of the postal-area archive, used when it ships without a `.prj`.
pub const GDA94_WKT: &str = "GEOGCS[\"GCS_GDA_1994\",DATUM[\"D_GDA_1994\",\
    SPHEROID[\"GRS_1980\",6378137.0,298.257222101]],PRIMEM[\"Greenwich\",0.0],\
    UNIT[\"Degree\",0.0174532925199433]]";

/// Distance, in degrees, within which a dissolved vertex is moved back onto an input vertex.
const VERTEX_MATCH_TOLERANCE: f64 = 1e-6;

fn find_entry<R: Read + Seek>(archive: &ZipArchive<R>, extension: &str) -> Option<String> {
    archive
        .file_names()
        .find(|name| name.to_ascii_lowercase().ends_with(extension))
        .map(str::to_string)
}

/// Read the entry of the archive with the given extension fully into memory.
fn read_entry<R: Read + Seek>(archive: &mut ZipArchive<R>, extension: &str) -> SunmapResult<Vec<u8>> {
    let name = find_entry(archive, extension).ok_or_else(|| {
        SunmapError::Configuration(format!("boundary archive has no {extension} file"))
    })?;
    let mut entry = archive.by_name(&name)?;
    let mut bytes = vec![];
    entry.read_to_end(&mut bytes)?;
    Ok(bytes)
}

fn open_archive(archive: &Path) -> SunmapResult<ZipArchive<BufReader<File>>> {
    let file = File::open(archive).map_err(|err| {
        SunmapError::Configuration(format!(
            "cannot open boundary archive {}: {err}",
            archive.display()
        ))
    })?;
    Ok(ZipArchive::new(BufReader::new(file))?)
}

/// The `.prj` of the archive, or GDA94 when it has none.
pub fn load_projection(archive: &Path) -> SunmapResult<String> {
    let mut zip = open_archive(archive)?;
    if find_entry(&zip, ".prj").is_none() {
        debug!("{} has no .prj, assuming GDA94", archive.display());
        return Ok(GDA94_WKT.to_string());
    }
    let bytes = read_entry(&mut zip, ".prj")?;
    Ok(String::from_utf8_lossy(&bytes).trim().to_string())
}

fn field_text(value: &FieldValue) -> Option<String> {
    match value {
        FieldValue::Character(Some(text)) => Some(text.trim().to_string()),
        FieldValue::Numeric(Some(number)) => Some(number.to_string()),
        _ => None,
    }
}

fn record_field<'a>(record: &'a Record, field: &str, context: &Path) -> SunmapResult<&'a FieldValue> {
    record.get(field).ok_or_else(|| {
        SunmapError::data_quality(context.display(), format!("no field '{field}'"))
    })
}

/// Load every postcode polygon of a zipped shapefile. Features without a geometry or without
/// a valid postcode are dropped.
pub fn load_boundaries(
    archive: &Path,
    code_field: &str,
) -> SunmapResult<Vec<(Postcode, MultiPolygon<f64>)>> {
    let mut zip = open_archive(archive)?;
    let shapes = shapefile::ShapeReader::new(Cursor::new(read_entry(&mut zip, ".shp")?))?;
    let table = shapefile::dbase::Reader::new(Cursor::new(read_entry(&mut zip, ".dbf")?))?;
    let mut reader = shapefile::Reader::new(shapes, table);

    let mut boundaries = vec![];
    let mut dropped = 0;
    for feature in reader.iter_shapes_and_records() {
        let (shape, record) = feature?;
        let postcode = field_text(record_field(&record, code_field, archive)?)
            .as_deref()
            .and_then(Postcode::parse);
        let geometry = match shape {
            Shape::Polygon(polygon) => MultiPolygon::<f64>::from(polygon),
            Shape::NullShape => {
                dropped += 1;
                continue;
            }
            other => {
                return Err(SunmapError::data_quality(
                    archive.display(),
                    format!("expected polygons, found {:?}", other.shapetype()),
                ))
            }
        };
        match postcode {
            Some(postcode) if !geometry.0.is_empty() => boundaries.push((postcode, geometry)),
            _ => dropped += 1,
        }
    }
    debug!("{}: dropped {dropped} feature(s)", archive.display());
    if boundaries.is_empty() {
        return Err(SunmapError::Configuration(format!(
            "no polygons in {}",
            archive.display()
        )));
    }
    Ok(boundaries)
}

/// Remove the excluded postcodes before any aggregation.
pub fn exclude(
    boundaries: Vec<(Postcode, MultiPolygon<f64>)>,
    excluded: &[String],
) -> SunmapResult<Vec<(Postcode, MultiPolygon<f64>)>> {
    let excluded = excluded
        .iter()
        .map(|code| {
            Postcode::parse(code).ok_or_else(|| {
                SunmapError::Configuration(format!("excluded postcode '{code}' is not a postcode"))
            })
        })
        .collect::<SunmapResult<BTreeSet<_>>>()?;
    let before = boundaries.len();
    let kept = boundaries
        .into_iter()
        .filter(|(postcode, _)| !excluded.contains(postcode))
        .collect_vec();
    debug!("Excluded {} postcode polygon(s)", before - kept.len());
    if kept.is_empty() {
        return Err(SunmapError::Configuration(
            "every boundary polygon is excluded".into(),
        ));
    }
    Ok(kept)
}

/// The input vertices of a dissolve, bucketed on a grid of the match tolerance.
struct VertexIndex {
    cells: HashMap<(i64, i64), Vec<Coord<f64>>>,
}

impl VertexIndex {
    fn cell(coord: Coord<f64>) -> (i64, i64) {
        (
            (coord.x / VERTEX_MATCH_TOLERANCE).floor() as i64,
            (coord.y / VERTEX_MATCH_TOLERANCE).floor() as i64,
        )
    }

    fn new<'a>(geometries: impl IntoIterator<Item = &'a MultiPolygon<f64>>) -> Self {
        let mut cells: HashMap<(i64, i64), Vec<Coord<f64>>> = HashMap::new();
        for coord in geometries.into_iter().flat_map(|geometry| geometry.coords_iter()) {
            cells.entry(Self::cell(coord)).or_default().push(coord);
        }
        Self { cells }
    }

    /// The nearest input vertex within the match tolerance, else `coord` unchanged.
    fn restore(&self, coord: Coord<f64>) -> Coord<f64> {
        let (cx, cy) = Self::cell(coord);
        (cx - 1..=cx + 1)
            .cartesian_product(cy - 1..=cy + 1)
            .filter_map(|cell| self.cells.get(&cell))
            .flatten()
            .map(|candidate| (*candidate, (candidate.x - coord.x).hypot(candidate.y - coord.y)))
            .filter(|(_, distance)| *distance <= VERTEX_MATCH_TOLERANCE)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map_or(coord, |(candidate, _)| candidate)
    }

    fn restore_ring(&self, ring: &LineString<f64>) -> LineString<f64> {
        let mut coords = ring.coords().map(|coord| self.restore(*coord)).collect_vec();
        coords.dedup();
        LineString::new(coords)
    }

    fn restore_geometry(&self, geometry: &MultiPolygon<f64>) -> MultiPolygon<f64> {
        geometry
            .iter()
            .map(|polygon| {
                Polygon::new(
                    self.restore_ring(polygon.exterior()),
                    polygon.interiors().iter().map(|ring| self.restore_ring(ring)).collect(),
                )
            })
            .collect()
    }
}

/// Union every postcode polygon into the polygon of its region. The union computes in its own
/// precision, so every output vertex is moved back onto the input vertex it came from. Borders
/// shared by two regions keep identical coordinates.
pub fn dissolve(boundaries: Vec<(Postcode, MultiPolygon<f64>)>) -> Vec<(RegionKey, MultiPolygon<f64>)> {
    let mut groups: BTreeMap<RegionKey, Vec<(Postcode, MultiPolygon<f64>)>> = BTreeMap::new();
    for (postcode, geometry) in boundaries {
        groups
            .entry(postcode.region_key())
            .or_default()
            .push((postcode, geometry));
    }
    groups
        .into_iter()
        .map(|(region, mut members)| {
            members.sort_by(|a, b| a.0.cmp(&b.0));
            debug!("Dissolving {} postcode(s) into {region}", members.len());
            let index = VertexIndex::new(members.iter().map(|(_, geometry)| geometry));
            let mut geometries = members.iter().map(|(_, geometry)| geometry);
            let Some(first) = geometries.next() else {
                return (region, MultiPolygon::new(vec![]));
            };
            let dissolved = geometries.fold(first.clone(), |acc, geometry| acc.union(geometry));
            (region, index.restore_geometry(&dissolved))
        })
        .collect()
}

fn snap(coord: Coord<f64>, tolerance: f64) -> Coord<f64> {
    Coord {
        x: (coord.x / tolerance).round() * tolerance,
        y: (coord.y / tolerance).round() * tolerance,
    }
}

/// Snap a ring to the grid, except for pinned vertices, then drop repeated vertices and spikes.
/// `None` if nothing with an area is left.
fn snap_ring(
    ring: &LineString<f64>,
    tolerance: f64,
    pinned: &HashSet<PointKey>,
) -> Option<LineString<f64>> {
    let mut coords: Vec<Coord<f64>> = vec![];
    let snapped = ring.coords().map(|c| {
        if pinned.contains(&point_key(*c)) {
            *c
        } else {
            snap(*c, tolerance)
        }
    });
    for coord in snapped {
        if coords.last() == Some(&coord) {
            continue;
        }
        if coords.len() >= 2 && coords[coords.len() - 2] == coord {
            coords.pop();
            continue;
        }
        coords.push(coord);
    }
    // The same clean-up across the closing vertex
    loop {
        let n = coords.len();
        if n >= 2 && coords[0] == coords[n - 1] {
            coords.pop();
        } else if n >= 3 && coords[n - 2] == coords[0] {
            coords.pop();
        } else if n >= 3 && coords[1] == coords[n - 1] {
            coords.remove(0);
        } else {
            break;
        }
    }
    if coords.len() < 3 {
        return None;
    }
    let ring = LineString::new(coords);
    let polygon = Polygon::new(ring, vec![]);
    (polygon.unsigned_area() > 0.0).then(|| polygon.into_inner().0)
}

/// Snap one polygon. Collapsing rings are collected when `preserve_topology` is set and dropped
/// otherwise.
fn prepass_polygon(
    polygon: &Polygon<f64>,
    tolerance: f64,
    pinned: &HashSet<PointKey>,
    preserve_topology: bool,
    collapsed: &mut Vec<Coord<f64>>,
) -> Option<Polygon<f64>> {
    let mut keep = |ring: &LineString<f64>| match snap_ring(ring, tolerance, pinned) {
        Some(snapped) => Some(snapped),
        None if preserve_topology => {
            collapsed.extend(ring.coords().copied());
            Some(ring.clone())
        }
        None => None,
    };
    let exterior = keep(polygon.exterior())?;
    let interiors = polygon.interiors().iter().filter_map(|ring| keep(ring)).collect();
    Some(Polygon::new(exterior, interiors))
}

/// Per-polygon coordinate simplification of every region. Each vertex is snapped on its own, so
/// borders shared by two regions stay identical. With `preserve_topology` the vertices of a ring
/// that would collapse keep their original coordinates, in every region that uses them;
/// otherwise the ring is dropped.
pub fn prepass(
    geometries: &[MultiPolygon<f64>],
    tolerance: f64,
    preserve_topology: bool,
) -> Vec<MultiPolygon<f64>> {
    if tolerance <= 0.0 {
        return geometries.to_vec();
    }
    let mut pinned: HashSet<PointKey> = HashSet::new();
    loop {
        let mut collapsed = vec![];
        let mut snapped = Vec::with_capacity(geometries.len());
        for geometry in geometries {
            let mut polygons = vec![];
            for polygon in geometry {
                polygons.extend(prepass_polygon(
                    polygon,
                    tolerance,
                    &pinned,
                    preserve_topology,
                    &mut collapsed,
                ));
            }
            snapped.push(MultiPolygon::new(polygons));
        }
        // Pinning only ever grows the set, so this settles
        let before = pinned.len();
        pinned.extend(collapsed.into_iter().map(point_key));
        if pinned.len() == before {
            return snapped;
        }
        debug!("Prepass pinned {} vertices of collapsing rings", pinned.len());
    }
}

/// A ring edge and its position in the ring.
#[derive(Debug, Clone)]
struct RingEdge {
    index: usize,
    line: Line<f64>,
}

impl Cross for RingEdge {
    type Scalar = f64;

    fn line(&self) -> LineOrPoint<f64> {
        self.line.into()
    }
}

/// Any two non-adjacent edges touching, found with a sweep line.
fn self_intersects(ring: &LineString<f64>) -> bool {
    let mut coords = ring.0.clone();
    coords.dedup();
    let edges = LineString::new(coords)
        .lines()
        .enumerate()
        .map(|(index, line)| RingEdge { index, line })
        .collect_vec();
    let last = edges.len().saturating_sub(1);
    let adjacent = |i: usize, j: usize| i.abs_diff(j) == 1 || i.abs_diff(j) == last;
    Intersections::from_iter(edges).any(|(a, b, _)| !adjacent(a.index, b.index))
}

/// Reject simplified output that cannot be extruded.
pub fn validate(region: &RegionKey, geometry: &MultiPolygon<f64>) -> SunmapResult<()> {
    let context = format!("simplified region {region}");
    if geometry.0.is_empty() {
        return Err(SunmapError::data_quality(context, "no polygon left"));
    }
    for ring in geometry
        .iter()
        .flat_map(|polygon| std::iter::once(polygon.exterior()).chain(polygon.interiors()))
    {
        if ring.0.len() < 4 {
            return Err(SunmapError::data_quality(
                context,
                format!("degenerate ring of {} coordinate(s)", ring.0.len()),
            ));
        }
        if self_intersects(ring) {
            return Err(SunmapError::data_quality(context, "self-intersecting ring"));
        }
        if Polygon::new(ring.clone(), vec![]).unsigned_area() <= 0.0 {
            return Err(SunmapError::data_quality(context, "ring with zero area"));
        }
    }
    Ok(())
}

/// The two-stage simplification: per-polygon prepass, then shared-arc simplification. Regions
/// keep their order and keys.
pub fn simplify_regions(
    regions: Vec<(RegionKey, MultiPolygon<f64>)>,
    config: &GeometryConfig,
) -> SunmapResult<Vec<(RegionKey, MultiPolygon<f64>)>> {
    let (keys, geometries): (Vec<RegionKey>, Vec<MultiPolygon<f64>>) =
        regions.into_iter().unzip();
    let geometries = prepass(&geometries, config.prepass_tolerance, config.preserve_topology);
    let mut topology = Topology::build(&geometries);
    topology.simplify(config.tolerance, config.algorithm);
    let simplified = topology.to_multi_polygons();
    if simplified.len() != keys.len() {
        return Err(SunmapError::data_quality(
            "topology",
            format!("{} geometries for {} regions", simplified.len(), keys.len()),
        ));
    }
    keys.into_iter()
        .zip(simplified)
        .map(|(key, geometry)| {
            validate(&key, &geometry)?;
            Ok((key, geometry))
        })
        .collect()
}

/// One region of the boundary package.
#[derive(Debug, Clone, PartialEq)]
pub struct Boundary {
    pub region: RegionKey,
    pub geometry: MultiPolygon<f64>,
}

impl Boundary {
    pub fn part_count(&self) -> usize {
        self.geometry.0.len()
    }

    pub fn vertex_count(&self) -> usize {
        self.geometry.coords_count()
    }

    pub fn area(&self) -> f64 {
        self.geometry.unsigned_area()
    }
}

/// One polygon per region with a uniform extrusion base.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundaryPackage {
    pub base: f64,
    /// WKT of the coordinate system, written as the `.prj`.
    pub projection: String,
    pub boundaries: Vec<Boundary>,
}

impl BoundaryPackage {
    pub fn build(config: &GeometryConfig) -> SunmapResult<Self> {
        info!("Loading shapefile...");
        let boundaries = load_boundaries(&config.archive, &config.code_field)?;
        let projection = load_projection(&config.archive)?;
        info!("Removing remote locations...");
        let boundaries = exclude(boundaries, &config.excluded_postcodes)?;
        info!("Performing aggregation...");
        let regions = dissolve(boundaries);
        info!("Simplifying geometry...");
        let regions = simplify_regions(regions, config)?;
        Ok(Self {
            base: config.base_height,
            projection,
            boundaries: regions
                .into_iter()
                .map(|(region, geometry)| Boundary { region, geometry })
                .collect(),
        })
    }

    pub fn region_keys(&self) -> BTreeSet<RegionKey> {
        self.boundaries.iter().map(|b| b.region.clone()).collect()
    }

    fn field_name(name: &str) -> SunmapResult<FieldName> {
        FieldName::try_from(name)
            .map_err(|err| SunmapError::Configuration(format!("bad field name '{name}': {err:?}")))
    }

    /// Write the `.shp`, `.shx`, `.dbf` and `.prj` files, replacing existing ones.
    pub fn write_shapefile(&self, path: &Path) -> SunmapResult<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        info!("Writing boundaries to {}", path.display());
        let table = TableWriterBuilder::new()
            .add_character_field(Self::field_name(COL::POSTCODE)?, 2)
            .add_numeric_field(Self::field_name(COL::BASE)?, 10, 3);
        let mut writer = shapefile::Writer::from_path(path, table)?;
        for boundary in &self.boundaries {
            let mut record = Record::default();
            record.insert(
                COL::POSTCODE.to_string(),
                FieldValue::Character(Some(boundary.region.to_string())),
            );
            record.insert(COL::BASE.to_string(), FieldValue::Numeric(Some(self.base)));
            let shape = shapefile::Polygon::from(boundary.geometry.clone());
            writer.write_shape_and_record(&shape, &record)?;
        }
        std::fs::write(path.with_extension("prj"), &self.projection)?;
        Ok(())
    }

    /// Read a package written by [`BoundaryPackage::write_shapefile`].
    pub fn from_shapefile(path: &Path) -> SunmapResult<Self> {
        let mut reader = shapefile::Reader::from_path(path)?;
        let mut base = 0.0;
        let mut boundaries = vec![];
        for feature in reader.iter_shapes_and_records() {
            let (shape, record) = feature?;
            let region = field_text(record_field(&record, COL::POSTCODE, path)?)
                .and_then(|code| code.parse::<RegionKey>().ok())
                .ok_or_else(|| SunmapError::data_quality(path.display(), "bad region key"))?;
            if let FieldValue::Numeric(Some(value)) = record_field(&record, COL::BASE, path)? {
                base = *value;
            }
            let geometry = match shape {
                Shape::Polygon(polygon) => MultiPolygon::<f64>::from(polygon),
                _ => MultiPolygon::new(vec![]),
            };
            boundaries.push(Boundary { region, geometry });
        }
        let projection = match std::fs::read_to_string(path.with_extension("prj")) {
            Ok(wkt) => wkt.trim().to_string(),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => GDA94_WKT.to_string(),
            Err(err) => return Err(err.into()),
        };
        Ok(Self {
            base,
            projection,
            boundaries,
        })
    }
}
