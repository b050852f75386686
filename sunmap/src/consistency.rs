//! The scene builder joins the two packages on their region keys, so both must carry the same
//! key set.

use std::collections::BTreeSet;

use log::warn;

use crate::error::{RegionMismatch, SunmapError, SunmapResult};
use crate::region::RegionKey;

/// Compare the region keys of the series package (without its `"all"` entry) with those of
/// the boundary package.
pub fn compare_regions(
    data_keys: &BTreeSet<RegionKey>,
    geometry_keys: &BTreeSet<RegionKey>,
) -> RegionMismatch {
    RegionMismatch {
        missing_geometry: data_keys.difference(geometry_keys).cloned().collect(),
        missing_data: geometry_keys.difference(data_keys).cloned().collect(),
    }
}

/// A mismatch is an error when `strict`, a warning otherwise.
pub fn check_regions(
    data_keys: &BTreeSet<RegionKey>,
    geometry_keys: &BTreeSet<RegionKey>,
    strict: bool,
) -> SunmapResult<RegionMismatch> {
    let mismatch = compare_regions(data_keys, geometry_keys);
    if mismatch.is_empty() {
        return Ok(mismatch);
    }
    if strict {
        return Err(SunmapError::Consistency(mismatch));
    }
    warn!("Packages disagree on region keys: {mismatch}");
    Ok(mismatch)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(codes: &[&str]) -> BTreeSet<RegionKey> {
        codes.iter().map(|c| c.parse().unwrap()).collect()
    }

    #[test]
    fn test_matching_keys() {
        let mismatch = check_regions(&keys(&["20", "30"]), &keys(&["30", "20"]), true).unwrap();
        assert!(mismatch.is_empty());
    }

    #[test]
    fn test_mismatch_both_ways() {
        let mismatch = compare_regions(&keys(&["20", "67"]), &keys(&["20", "08"]));
        assert_eq!(mismatch.missing_geometry, keys(&["67"]));
        assert_eq!(mismatch.missing_data, keys(&["08"]));
    }

    #[test]
    fn test_strictness() {
        let data = keys(&["20", "67"]);
        let geometry = keys(&["20"]);
        assert!(matches!(
            check_regions(&data, &geometry, true),
            Err(SunmapError::Consistency(_))
        ));
        let mismatch = check_regions(&data, &geometry, false).unwrap();
        assert_eq!(mismatch.missing_geometry, keys(&["67"]));
    }
}
