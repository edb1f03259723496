use anyhow::Result;
use rsdtm::geometric::dtm::{Dtm, DtmConfig};
use std::path::Path;
use tracing_subscriber::EnvFilter;

fn saved_message(path: &Path) -> String {
    format!("Merged file saved to {}", path.display())
}

/// Build the DTM of the sampling area from the default data layout
/// (RUST_LOG controls the log level, info by default)
fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let dtm = Dtm::new(DtmConfig::default())?.run()?;
    if let Some(path) = dtm.get_merged_path() {
        println!("{}", saved_message(path));
    }

    Ok(())
}
