use crate::core::geo::TileIndex;
use crate::{AerialMapError, Result};

/// Placeholders every tile URL template has to carry
pub const PLACEHOLDERS: [&str; 3] = ["{x}", "{y}", "{z}"];

/// Check that `template` can produce a distinct URL for every tile.
pub fn validate_source(template: &str) -> Result<()> {
    if template.trim().is_empty() {
        return Err(AerialMapError::InvalidSource("tile source is empty".to_string()));
    }

    let missing: Vec<&str> = PLACEHOLDERS
        .iter()
        .copied()
        .filter(|placeholder| !template.contains(placeholder))
        .collect();
    if !missing.is_empty() {
        return Err(AerialMapError::InvalidSource(format!(
            "'{}' lacks {}",
            template,
            missing.join(", ")
        )));
    }
    Ok(())
}

/// Build the URL for one tile from a `{z}/{x}/{y}` style template
pub fn tile_url(template: &str, index: TileIndex, zoom: u8) -> String {
    template
        .replace("{x}", &index.x.to_string())
        .replace("{y}", &index.y.to_string())
        .replace("{z}", &zoom.to_string())
}
