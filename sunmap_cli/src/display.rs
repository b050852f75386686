use comfy_table::{presets::NOTHING, *};
use itertools::izip;

use sunmap::error::RegionMismatch;
use sunmap::geo::BoundaryPackage;
use sunmap::package::{BuildPackage, Caption};
use sunmap::COL;

fn new_table(header: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(NOTHING)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(
            header
                .iter()
                .map(|name| Cell::new(name).add_attribute(Attribute::Bold))
                .collect::<Vec<_>>(),
        )
        .set_style(comfy_table::TableComponent::BottomBorder, '─')
        .set_style(comfy_table::TableComponent::MiddleHeaderIntersections, '─')
        .set_style(comfy_table::TableComponent::HeaderLines, '─')
        .set_style(comfy_table::TableComponent::BottomBorderIntersections, '─')
        .set_style(comfy_table::TableComponent::TopBorder, '─')
        .set_style(comfy_table::TableComponent::TopBorderIntersections, '─');
    table
}

/// Latest values of every region, followed by the total.
pub fn display_package_summary(package: &BuildPackage, max_results: Option<usize>) {
    let mut table = new_table(&["Region", "Date", "Installations", "Output (MW)", "Height", "Color"]);
    let shown = max_results.unwrap_or(package.regions.len());
    for (region, series) in package.regions.iter().take(shown) {
        let (Some(date), Some(install), Some(output), Some(height), Some(color)) = (
            series.date.last(),
            series.install.last(),
            series.output.last(),
            series.height.last(),
            series.color.last(),
        ) else {
            continue;
        };
        table.add_row(vec![
            region.to_string(),
            date.clone(),
            install.clone(),
            output.clone(),
            format!("{height:.3}"),
            format!("{color:.3}"),
        ]);
    }
    if let (Some(date), Some(install), Some(output)) = (
        package.all.date.last(),
        package.all.install.last(),
        package.all.output.last(),
    ) {
        table.add_row(vec![
            Cell::new(COL::ALL_REGIONS).add_attribute(Attribute::Bold),
            Cell::new(date),
            Cell::new(install),
            Cell::new(output),
            Cell::new(""),
            Cell::new(""),
        ]);
    }
    println!("\n{}", table);
    println!(
        "{} region(s) over {} period(s)",
        package.regions.len(),
        package.period_count()
    );
}

pub fn display_boundary_summary(package: &BoundaryPackage) {
    let mut table = new_table(&["Region", "Parts", "Vertices", "Area (deg²)"]);
    let boundaries = &package.boundaries;
    for (boundary, parts, vertices) in izip!(
        boundaries,
        boundaries.iter().map(|b| b.part_count()),
        boundaries.iter().map(|b| b.vertex_count()),
    ) {
        table.add_row(vec![
            boundary.region.to_string(),
            parts.to_string(),
            vertices.to_string(),
            format!("{:.4}", boundary.area()),
        ]);
    }
    println!("\n{}", table);
    println!(
        "{} region(s), extrusion base {}",
        boundaries.len(),
        package.base
    );
}

pub fn display_mismatch(mismatch: &RegionMismatch) {
    if mismatch.is_empty() {
        println!("Region keys match");
        return;
    }
    let mut table = new_table(&["Region", "Missing"]);
    for region in &mismatch.missing_geometry {
        table.add_row(vec![region.to_string(), "polygon".to_string()]);
    }
    for region in &mismatch.missing_data {
        table.add_row(vec![region.to_string(), "data".to_string()]);
    }
    println!("\n{}", table);
}

pub fn display_caption(caption: &Caption) {
    println!("{}\n{}\n{}", caption.heading, caption.install, caption.output);
}
