use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

/// Tunables of the terrain LOD scheduler.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerrainSettings {
    /// How many update cycles an over-detailed tile must qualify for before
    /// its LOD is decreased. Higher values avoid flickering at LOD
    /// boundaries at the cost of responsiveness.
    pub lod_up_delay: u32,
    /// The visibility pass processes `leaf_count / visibility_slices` tiles
    /// per cycle, bounding the per frame cost on large trees.
    pub visibility_slices: u32,
}

impl Default for TerrainSettings {
    fn default() -> Self {
        Self {
            lod_up_delay: 2,
            visibility_slices: 6,
        }
    }
}

impl TerrainSettings {
    pub fn from_ron_str(text: &str) -> anyhow::Result<Self> {
        ron::from_str(text).context("failed to parse terrain settings")
    }

    pub fn from_ron_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read terrain settings from {path:?}"))?;

        Self::from_ron_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_settings_fall_back_to_defaults() {
        let settings = TerrainSettings::from_ron_str("(lod_up_delay: 5)").unwrap();

        assert_eq!(settings.lod_up_delay, 5);
        assert_eq!(settings.visibility_slices, TerrainSettings::default().visibility_slices);
    }

    #[test]
    fn invalid_settings_report_an_error() {
        assert!(TerrainSettings::from_ron_str("(lod_up_delay: [])").is_err());
    }
}
