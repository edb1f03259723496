use anyhow::Result;
use rsdtm::geometric::dtm::{Dtm, DtmConfig};
use std::path::Path;

/// Example: clipped DTM mosaic of a sampling area
/// Expects `<root>/data/0_json/DTM/kaartbladindex.json` and
/// `<root>/data/1_shpfiles/AWD_sampling_area.shp` below the given root (default: ./)
fn main() -> Result<()> {
    println!("=== Example: DTM mosaic from a tile index ===\n");

    let root = std::env::args().nth(1).unwrap_or_else(|| ".".to_string());
    let config = DtmConfig::with_root(Path::new(&root));

    println!("Tile index: {:?}", config.tile_index_path);
    println!("Sampling area: {:?}\n", config.boundary_path);

    let dtm = Dtm::new(config)?.run()?;

    if let Some(report) = dtm.get_download_report() {
        println!("Downloaded tiles: {}", report.saved.len());
        for failure in &report.failed {
            println!("  - failed: {} ({})", failure.url, failure.reason);
        }
    }
    println!("Clipped rasters: {}", dtm.get_clipped_rasters().len());
    if let Some(path) = dtm.get_merged_path() {
        println!("Merged file saved to {}", path.display());
    }

    Ok(())
}
