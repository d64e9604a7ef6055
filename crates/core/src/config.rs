//! Configuration for extraction, reading order and zone types.
//!
//! Configuration is read from a TOML file, then overridden from
//! `ZONEMARK_*` environment variables, then validated. The zone-type table
//! becomes an immutable [`ZoneTypeRegistry`] that is handed to the pipeline
//! and the store explicitly.

use crate::zone::ZoneKind;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use zonemark_scheduler::ConcurrencyPolicy;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid value for {0}")]
    InvalidValue(String),
    #[error("{key} {reason}")]
    OutOfRange { key: &'static str, reason: &'static str },
}

/// Settings carried by every extraction job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionSettings {
    /// Rasterization resolution for detector input
    pub dpi: u32,
    /// Pages per detector call
    pub batch_size: usize,
    /// Minimum span/region IoU for a span to count toward a zone's text
    pub overlap_iou_threshold: f64,
    pub concurrency_policy: ConcurrencyPolicy,
    pub max_concurrent_jobs: usize,
    /// Pages per submitted job; 0 submits the whole document as one job
    pub pages_per_job: u32,
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            dpi: 150,
            batch_size: 4,
            overlap_iou_threshold: 0.0,
            concurrency_policy: ConcurrencyPolicy::Queue,
            max_concurrent_jobs: 1,
            pages_per_job: 0,
        }
    }
}

impl ExtractionSettings {
    pub fn with_dpi(mut self, dpi: u32) -> Self {
        self.dpi = dpi;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_iou_threshold(mut self, threshold: f64) -> Self {
        self.overlap_iou_threshold = threshold;
        self
    }

    pub fn with_policy(mut self, policy: ConcurrencyPolicy) -> Self {
        self.concurrency_policy = policy;
        self
    }

    pub fn with_max_concurrent_jobs(mut self, jobs: usize) -> Self {
        self.max_concurrent_jobs = jobs;
        self
    }

    pub fn with_pages_per_job(mut self, pages: u32) -> Self {
        self.pages_per_job = pages;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dpi == 0 {
            return Err(ConfigError::OutOfRange { key: "dpi", reason: "must be positive" });
        }
        if self.batch_size == 0 {
            return Err(ConfigError::OutOfRange { key: "batch_size", reason: "must be at least 1" });
        }
        if !(0.0..=1.0).contains(&self.overlap_iou_threshold) {
            return Err(ConfigError::OutOfRange {
                key: "overlap_iou_threshold",
                reason: "must be within [0, 1]",
            });
        }
        if self.max_concurrent_jobs == 0 {
            return Err(ConfigError::OutOfRange {
                key: "max_concurrent_jobs",
                reason: "must be at least 1",
            });
        }
        Ok(())
    }
}

/// Column-aware ordering used when a zone is inserted by hand
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadingOrderSettings {
    /// Zones starting left of this x coordinate belong to the left column
    pub column_split_x: f64,
}

impl Default for ReadingOrderSettings {
    fn default() -> Self {
        Self { column_split_x: 200.0 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneTypeEntry {
    #[serde(rename = "type")]
    pub zone_type: String,
    pub color: String,
    #[serde(default)]
    pub shortcut_key: Option<String>,
}

impl ZoneTypeEntry {
    pub fn new(zone_type: &str, color: &str, shortcut_key: Option<&str>) -> Self {
        Self {
            zone_type: zone_type.to_owned(),
            color: color.to_owned(),
            shortcut_key: shortcut_key.map(str::to_owned),
        }
    }
}

pub fn default_zone_types() -> Vec<ZoneTypeEntry> {
    vec![
        ZoneTypeEntry::new("paragraph", "#1f77b4", Some("P")),
        ZoneTypeEntry::new("title", "#d62728", Some("T")),
        ZoneTypeEntry::new("section header", "#9467bd", Some("H")),
        ZoneTypeEntry::new("table", "#2ca02c", Some("B")),
        ZoneTypeEntry::new("image", "#8c564b", Some("I")),
        ZoneTypeEntry::new("list item", "#ff7f0e", Some("L")),
        ZoneTypeEntry::new("caption", "#e377c2", Some("C")),
        ZoneTypeEntry::new("footnote", "#7f7f7f", Some("F")),
        ZoneTypeEntry::new("formula", "#bcbd22", Some("M")),
        ZoneTypeEntry::new("page header", "#17becf", None),
        ZoneTypeEntry::new("page footer", "#17becf", None),
    ]
}

/// Read-only lookup from zone kind to display color and shortcut
#[derive(Debug, Clone)]
pub struct ZoneTypeRegistry {
    entries: Vec<ZoneTypeEntry>,
    colors: HashMap<String, String>,
    shortcuts: HashMap<String, ZoneKind>,
}

impl ZoneTypeRegistry {
    pub const FALLBACK_COLOR: &'static str = "#808080";

    pub fn new(entries: Vec<ZoneTypeEntry>) -> Self {
        let mut colors = HashMap::new();
        let mut shortcuts = HashMap::new();

        for entry in &entries {
            let kind = ZoneKind::parse(&entry.zone_type);
            colors.insert(kind.as_str().to_lowercase(), entry.color.clone());
            if let Some(key) = &entry.shortcut_key {
                shortcuts.insert(key.to_lowercase(), kind);
            }
        }

        Self { entries, colors, shortcuts }
    }

    /// Configured color for `kind`, case-insensitively, or the fallback gray
    pub fn color_for(&self, kind: &ZoneKind) -> &str {
        self.colors
            .get(&kind.as_str().to_lowercase())
            .map(String::as_str)
            .unwrap_or(Self::FALLBACK_COLOR)
    }

    pub fn kind_for_shortcut(&self, key: &str) -> Option<ZoneKind> {
        self.shortcuts.get(&key.to_lowercase()).cloned()
    }

    pub fn entries(&self) -> &[ZoneTypeEntry] {
        &self.entries
    }
}

impl Default for ZoneTypeRegistry {
    fn default() -> Self {
        Self::new(default_zone_types())
    }
}

/// Top-level configuration file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZonemarkConfig {
    pub extraction: ExtractionSettings,
    pub reading_order: ReadingOrderSettings,
    pub zone_types: Vec<ZoneTypeEntry>,
}

impl Default for ZonemarkConfig {
    fn default() -> Self {
        Self {
            extraction: ExtractionSettings::default(),
            reading_order: ReadingOrderSettings::default(),
            zone_types: default_zone_types(),
        }
    }
}

impl ZonemarkConfig {
    /// Platform config location, e.g. `~/.config/zonemark/config.toml` on Linux
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("dev", "Zonemark", "zonemark")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path.as_ref())?;
        Self::from_toml(&contents)
    }

    /// Load `path`, or the default location if it exists, then apply
    /// environment overrides and validate
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path().filter(|path| path.is_file()) {
                Some(path) => Self::from_file(path)?,
                None => Self::default(),
            },
        };

        config.apply_overrides(std::env::vars())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `ZONEMARK_*` overrides from `(key, value)` pairs
    ///
    /// Recognized keys:
    /// - `ZONEMARK_DPI`
    /// - `ZONEMARK_BATCH_SIZE`
    /// - `ZONEMARK_IOU_THRESHOLD`
    /// - `ZONEMARK_CONCURRENCY_POLICY`
    /// - `ZONEMARK_MAX_JOBS`
    /// - `ZONEMARK_PAGES_PER_JOB`
    pub fn apply_overrides<I>(&mut self, vars: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
            value.trim().parse::<T>().map_err(|_| ConfigError::InvalidValue(key.to_owned()))
        }

        let extraction = &mut self.extraction;
        for (key, value) in vars {
            match key.as_str() {
                "ZONEMARK_DPI" => extraction.dpi = parse(&key, &value)?,
                "ZONEMARK_BATCH_SIZE" => extraction.batch_size = parse(&key, &value)?,
                "ZONEMARK_IOU_THRESHOLD" => extraction.overlap_iou_threshold = parse(&key, &value)?,
                "ZONEMARK_CONCURRENCY_POLICY" => {
                    extraction.concurrency_policy = parse(&key, &value)?
                }
                "ZONEMARK_MAX_JOBS" => extraction.max_concurrent_jobs = parse(&key, &value)?,
                "ZONEMARK_PAGES_PER_JOB" => extraction.pages_per_job = parse(&key, &value)?,
                _ => {}
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.extraction.validate()
    }

    pub fn registry(&self) -> ZoneTypeRegistry {
        ZoneTypeRegistry::new(self.zone_types.clone())
    }
}
