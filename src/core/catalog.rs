//! Test parameter catalog
//!
//! Maps a configuration key (device type × test type) to the scan and
//! evaluation parameters for that fixture setup. The catalog is loaded and
//! validated once at startup and never mutated afterwards.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// Built-in parameter table shipped with the console
const BUILTIN_PARAMS: &str = include_str!("../../config/params.json");

/// Catalog errors
#[derive(Error, Debug)]
pub enum CatalogError {
    /// Key has no entry in the catalog
    #[error("Unknown configuration: {0}")]
    UnknownConfiguration(String),

    /// Device or test type label not recognised
    #[error("Unrecognised {kind}: {value}")]
    UnknownLabel {
        /// "device type" or "test type"
        kind: &'static str,
        /// Offending text
        value: String,
    },

    /// Entry violates a parameter invariant
    #[error("Invalid parameters for {key}: {reason}")]
    Invalid {
        /// Configuration key
        key: String,
        /// Violated constraint
        reason: String,
    },

    /// A mandatory configuration is absent
    #[error("Catalog is missing mandatory configuration {0}")]
    MissingMandatory(String),

    /// Catalog file could not be parsed
    #[error("Catalog parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// Catalog file could not be read
    #[error("Cannot read catalog {path}: {source}")]
    Io {
        /// File path
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },
}

/// Device under test
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DeviceType {
    /// Round element antenna
    #[serde(rename = "E-Dot")]
    EDot,
    /// Square element antenna
    #[serde(rename = "E-Sq")]
    ESq,
}

impl DeviceType {
    /// All device types
    pub fn all() -> &'static [DeviceType] {
        &[DeviceType::EDot, DeviceType::ESq]
    }

    /// Display label, as used in configuration keys
    pub fn label(&self) -> &'static str {
        match self {
            DeviceType::EDot => "E-Dot",
            DeviceType::ESq => "E-Sq",
        }
    }

    /// The other device type (the console's device button toggles)
    #[must_use]
    pub fn toggled(&self) -> Self {
        match self {
            DeviceType::EDot => DeviceType::ESq,
            DeviceType::ESq => DeviceType::EDot,
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for DeviceType {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "e-dot" | "edot" | "dot" => Ok(Self::EDot),
            "e-sq" | "esq" | "sq" => Ok(Self::ESq),
            _ => Err(CatalogError::UnknownLabel {
                kind: "device type",
                value: s.to_string(),
            }),
        }
    }
}

/// Kind of test being run
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TestType {
    /// Bare element check, evaluated and displayed only
    Element,
    /// Wet element check, evaluated and displayed only
    Wet,
    /// Final assembly test, evaluated and saved
    Final,
}

impl TestType {
    /// All test types
    pub fn all() -> &'static [TestType] {
        &[TestType::Element, TestType::Wet, TestType::Final]
    }

    /// Display label, as used in configuration keys
    pub fn label(&self) -> &'static str {
        match self {
            TestType::Element => "Element",
            TestType::Wet => "Wet",
            TestType::Final => "Final",
        }
    }

    /// Whether a completed scan of this type produces a saved plot
    pub fn saves_artifact(&self) -> bool {
        matches!(self, TestType::Final)
    }
}

impl fmt::Display for TestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for TestType {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "element" => Ok(Self::Element),
            "wet" => Ok(Self::Wet),
            "final" => Ok(Self::Final),
            _ => Err(CatalogError::UnknownLabel {
                kind: "test type",
                value: s.to_string(),
            }),
        }
    }
}

/// Configuration key, formatted as `<device>-<test>` (e.g. `E-Dot-Final`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConfigKey {
    /// Device type
    pub device: DeviceType,
    /// Test type
    pub test: TestType,
}

impl ConfigKey {
    /// Combine the two selections
    pub fn new(device: DeviceType, test: TestType) -> Self {
        Self { device, test }
    }

    /// The four combinations every catalog must provide
    pub fn mandatory() -> [ConfigKey; 4] {
        [
            ConfigKey::new(DeviceType::EDot, TestType::Element),
            ConfigKey::new(DeviceType::EDot, TestType::Final),
            ConfigKey::new(DeviceType::ESq, TestType::Element),
            ConfigKey::new(DeviceType::ESq, TestType::Final),
        ]
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.device, self.test)
    }
}

impl FromStr for ConfigKey {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        // Device labels contain a hyphen themselves, so split on the last one.
        let (device, test) = trimmed
            .rsplit_once('-')
            .ok_or_else(|| CatalogError::UnknownConfiguration(trimmed.to_string()))?;
        Ok(Self::new(device.parse()?, test.parse()?))
    }
}

/// Scan and evaluation parameters for one configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScanParams {
    /// Sweep start frequency (kHz)
    pub start_khz: u32,
    /// Sweep stop frequency (kHz)
    pub stop_khz: u32,
    /// Sweep step (kHz)
    pub step_khz: u32,
    /// Settle time per point (ms)
    pub dwell_ms: u32,
    /// Evaluation window start (kHz)
    pub vswr_start_khz: u32,
    /// Evaluation window reference point (kHz)
    pub vswr_mid_khz: u32,
    /// Evaluation window stop (kHz)
    pub vswr_stop_khz: u32,
    /// Highest acceptable VSWR inside the window
    pub vswr_max: f64,
    /// Artifact name template
    pub filename_template: String,
    /// Directory artifacts are written to
    pub file_save_path: PathBuf,
}

impl ScanParams {
    /// Check the parameter invariants
    pub fn validate(&self) -> Result<(), String> {
        if self.start_khz >= self.stop_khz {
            return Err(format!(
                "start_khz ({}) must be below stop_khz ({})",
                self.start_khz, self.stop_khz
            ));
        }
        if self.step_khz == 0 {
            return Err("step_khz must be positive".into());
        }
        if self.dwell_ms == 0 {
            return Err("dwell_ms must be positive".into());
        }
        if !(self.vswr_start_khz <= self.vswr_mid_khz && self.vswr_mid_khz <= self.vswr_stop_khz) {
            return Err(format!(
                "VSWR window must satisfy start <= mid <= stop ({} / {} / {})",
                self.vswr_start_khz, self.vswr_mid_khz, self.vswr_stop_khz
            ));
        }
        if self.vswr_start_khz < self.start_khz || self.vswr_stop_khz > self.stop_khz {
            return Err(format!(
                "VSWR window {}-{} kHz lies outside the sweep {}-{} kHz",
                self.vswr_start_khz, self.vswr_stop_khz, self.start_khz, self.stop_khz
            ));
        }
        if !self.vswr_max.is_finite() || self.vswr_max <= 1.0 {
            return Err(format!("vswr_max ({}) must be greater than 1.0", self.vswr_max));
        }
        if self.filename_template.trim().is_empty() {
            return Err("filename_template is empty".into());
        }
        Ok(())
    }

    /// Number of points in one sweep: ceil(span / step) + 1
    pub fn point_count(&self) -> usize {
        let span = u64::from(self.stop_khz.saturating_sub(self.start_khz));
        let step = u64::from(self.step_khz.max(1));
        usize::try_from(span.div_ceil(step) + 1).unwrap_or(usize::MAX)
    }

    /// Frequency of sweep point `index`, clamped to the stop frequency
    pub fn frequency_at(&self, index: usize) -> u32 {
        let offset = u64::from(self.step_khz) * index as u64;
        let freq = u64::from(self.start_khz) + offset;
        freq.min(u64::from(self.stop_khz)) as u32
    }

    /// "RUN PARAMS" status block: every field except the filename template
    pub fn run_params_text(&self) -> String {
        format!(
            "Start Frequency: {} kHz\n\
             Stop Frequency: {} kHz\n\
             Step Size: {} kHz\n\
             Dwell Time: {} ms\n\
             VSWR Start: {} kHz\n\
             VSWR Mid: {} kHz\n\
             VSWR Stop: {} kHz\n\
             VSWR Max: {}\n\
             Save Path: {}",
            self.start_khz,
            self.stop_khz,
            self.step_khz,
            self.dwell_ms,
            self.vswr_start_khz,
            self.vswr_mid_khz,
            self.vswr_stop_khz,
            self.vswr_max,
            self.file_save_path.display(),
        )
    }
}

/// Immutable table of parameter sets keyed by configuration
#[derive(Debug, Clone)]
pub struct ParameterCatalog {
    entries: BTreeMap<ConfigKey, ScanParams>,
}

impl ParameterCatalog {
    /// Catalog built from the table embedded in the binary
    pub fn builtin() -> Result<Self, CatalogError> {
        Self::from_json_str(BUILTIN_PARAMS)
    }

    /// Load a catalog file
    pub fn from_path(path: &Path) -> Result<Self, CatalogError> {
        let content = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let catalog = Self::from_json_str(&content)?;
        tracing::info!("Loaded {} configurations from {}", catalog.len(), path.display());
        Ok(catalog)
    }

    /// Parse and validate a JSON table of `key -> params`
    pub fn from_json_str(json: &str) -> Result<Self, CatalogError> {
        let raw: BTreeMap<String, ScanParams> = serde_json::from_str(json)?;
        let mut entries = BTreeMap::new();

        for (name, params) in raw {
            let key: ConfigKey = name.parse()?;
            params.validate().map_err(|reason| CatalogError::Invalid {
                key: name.clone(),
                reason,
            })?;
            if entries.insert(key, params).is_some() {
                return Err(CatalogError::Invalid {
                    key: name,
                    reason: "duplicate configuration key".into(),
                });
            }
        }

        for key in ConfigKey::mandatory() {
            if !entries.contains_key(&key) {
                return Err(CatalogError::MissingMandatory(key.to_string()));
            }
        }

        Ok(Self { entries })
    }

    /// Parameters for a configuration
    pub fn resolve(&self, key: ConfigKey) -> Result<&ScanParams, CatalogError> {
        self.entries
            .get(&key)
            .ok_or_else(|| CatalogError::UnknownConfiguration(key.to_string()))
    }

    /// Configured keys in sorted order
    pub fn keys(&self) -> impl Iterator<Item = ConfigKey> + '_ {
        self.entries.keys().copied()
    }

    /// Number of configurations
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the catalog is empty (never true for a loaded catalog)
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ScanParams {
        ScanParams {
            start_khz: 1_000,
            stop_khz: 2_000,
            step_khz: 100,
            dwell_ms: 20,
            vswr_start_khz: 1_200,
            vswr_mid_khz: 1_500,
            vswr_stop_khz: 1_800,
            vswr_max: 1.5,
            filename_template: "SERIAL".into(),
            file_save_path: PathBuf::from("out"),
        }
    }

    #[test]
    fn test_key_format_and_parse() {
        let key = ConfigKey::new(DeviceType::EDot, TestType::Final);
        assert_eq!(key.to_string(), "E-Dot-Final");
        assert_eq!("E-Dot-Final".parse::<ConfigKey>().unwrap(), key);
        assert_eq!("e-sq-element".parse::<ConfigKey>().unwrap().device, DeviceType::ESq);
        assert!("E-Dot".parse::<ConfigKey>().is_err());
        assert!("Final".parse::<ConfigKey>().is_err());
    }

    #[test]
    fn test_builtin_mandatory_keys() {
        let catalog = ParameterCatalog::builtin().unwrap();
        for key in ConfigKey::mandatory() {
            let p = catalog.resolve(key).unwrap();
            assert!(p.vswr_start_khz >= p.start_khz && p.vswr_stop_khz <= p.stop_khz);
            assert!(p.vswr_max > 1.0);
        }
        let p = catalog.resolve("E-Dot-Final".parse().unwrap()).unwrap();
        assert_eq!(p.vswr_max, 1.5);
        assert_eq!((p.vswr_start_khz, p.vswr_stop_khz), (1_616_000, 1_626_500));
    }

    #[test]
    fn test_unknown_configuration() {
        let catalog = ParameterCatalog::builtin().unwrap();
        let err = catalog
            .resolve(ConfigKey::new(DeviceType::ESq, TestType::Wet))
            .unwrap_err();
        assert!(matches!(err, CatalogError::UnknownConfiguration(k) if k == "E-Sq-Wet"));
    }

    #[test]
    fn test_validation() {
        assert!(params().validate().is_ok());

        let mut p = params();
        p.vswr_stop_khz = 2_100;
        assert!(p.validate().is_err());

        let mut p = params();
        p.vswr_max = 1.0;
        assert!(p.validate().is_err());

        let mut p = params();
        p.vswr_mid_khz = 1_100;
        assert!(p.validate().is_err());

        let mut p = params();
        p.step_khz = 0;
        assert!(p.validate().is_err());
    }

    #[test]
    fn test_point_count_rounds_up_and_clamps() {
        let p = params();
        assert_eq!(p.point_count(), 11);
        assert_eq!(p.frequency_at(10), 2_000);

        let mut p = params();
        p.step_khz = 300;
        // 0, 300, 600, 900, then clamped to 1000
        assert_eq!(p.point_count(), 5);
        assert_eq!(p.frequency_at(3), 1_900);
        assert_eq!(p.frequency_at(4), 2_000);
    }

    #[test]
    fn test_point_count_full_range_does_not_wrap() {
        let mut p = params();
        p.start_khz = 0;
        p.stop_khz = u32::MAX;
        p.step_khz = 1;
        #[cfg(target_pointer_width = "64")]
        assert_eq!(p.point_count(), 4_294_967_296);
        #[cfg(not(target_pointer_width = "64"))]
        assert_eq!(p.point_count(), usize::MAX);
        assert_eq!(p.frequency_at(p.point_count() - 1), u32::MAX);
    }

    #[test]
    fn test_run_params_text_omits_template() {
        let mut p = params();
        p.filename_template = "TEMPLATE_SERIAL".into();
        let text = p.run_params_text();
        assert!(text.contains("Dwell Time: 20 ms"));
        assert!(text.contains("VSWR Max: 1.5"));
        assert!(!text.contains("TEMPLATE_SERIAL"));
    }

    #[test]
    fn test_invalid_entry_rejects_catalog() {
        let json = r#"{"E-Dot-Element": {"start_khz": 10, "stop_khz": 5, "step_khz": 1,
            "dwell_ms": 1, "vswr_start_khz": 6, "vswr_mid_khz": 7, "vswr_stop_khz": 8,
            "vswr_max": 1.5, "filename_template": "SERIAL", "file_save_path": "x"}}"#;
        let err = ParameterCatalog::from_json_str(json).unwrap_err();
        assert!(matches!(err, CatalogError::Invalid { ref key, .. } if key == "E-Dot-Element"));
    }
}
