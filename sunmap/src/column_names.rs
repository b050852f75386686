//! This module stores the column and field names shared between the tabular pipeline, the
//! packages written to disk and the scene builder that consumes them. Note that the boundary
//! field names must stay within the 10 character limit of dBase tables!

/// Identifier column of the raw per-source CSV files.
pub const SOURCE_POSTCODE: &str = "Small Unit Installation Postcode";

/// Region code of the national postal-area boundary archive.
pub const SOURCE_BOUNDARY_CODE: &str = "POA_CODE16";

pub const POSTCODE: &str = "postcode";
pub const DATE: &str = "date";
pub const SOURCE_TYPE: &str = "source_type";
pub const INSTALL_NUM: &str = "install_num";
pub const TOTAL_OUTPUT: &str = "total_output";

/// Label of the derived column summing every source.
pub const ALL_SOURCES: &str = "All";

/// Reserved key of the package entry summing every region.
pub const ALL_REGIONS: &str = "all";

/// Extrusion base field of the boundary package.
pub const BASE: &str = "base";
