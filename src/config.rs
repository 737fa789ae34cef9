//! Engine configuration, passed explicitly to [`Context::new`](crate::Context::new).

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{
    buffer::{ResampleFilter, DEFAULT_MAX_DIMENSION},
    color::WorkingSpace,
    error::{Error, Result},
    io::ExportFormat,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Largest width or height allowed for any buffer, mask or document
    pub max_dimension: u32,
    /// Memory budget of the render cache, in MiB
    pub cache_budget_mb: u64,
    /// Number of edits that can be undone
    pub history_limit: usize,
    /// Number of render workers.  0 means one per core.
    pub thread_count: usize,
    /// Side length of the square regions which are composited (and cached) independently
    pub tile_size: u32,
    /// Colour space in which layers are blended and most adjustments do their arithmetic
    pub working_space: WorkingSpace,
    /// Filter used when rendering at a zoom above 100%
    pub upscale_filter: ResampleFilter,
    pub export_format: ExportFormat,
    /// JPEG quality, 1-100
    pub export_quality: u8,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_dimension: DEFAULT_MAX_DIMENSION,
            cache_budget_mb: 1024,
            history_limit: 50,
            thread_count: 0,
            tile_size: 256,
            working_space: WorkingSpace::Linear,
            upscale_filter: ResampleFilter::Bilinear,
            export_format: ExportFormat::Jpeg,
            export_quality: 95,
        }
    }
}

impl EngineConfig {
    /// Reads a config file.  A missing file gives the default config; a file that exists but
    /// can't be parsed is an error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::warn!("No config at {:?}, using defaults", path);
                return Ok(Self::default());
            }
            Err(e) => return Err(Error::LoadError(format!("{:?}: {}", path, e))),
        };
        let config: Self = serde_json::from_str(&text)
            .map_err(|e| Error::LoadError(format!("{:?}: {}", path, e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_dimension == 0 {
            return Err(Error::param("max_dimension", "must be at least 1"));
        }
        if self.tile_size == 0 {
            return Err(Error::param("tile_size", "must be at least 1"));
        }
        if !(1..=100).contains(&self.export_quality) {
            return Err(Error::param("export_quality", "must be between 1 and 100"));
        }
        Ok(())
    }

    /// The cache budget in bytes
    pub fn cache_budget_bytes(&self) -> usize {
        (self.cache_budget_mb as usize).saturating_mul(1024 * 1024)
    }
}
