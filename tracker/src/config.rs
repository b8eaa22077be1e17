//! Driver configuration
//!
//! Loaded from a JSON file by an external launcher or the CLI tool:
//!
//! ```json
//! {
//!     "serial-port": "/dev/ttyUSB0",
//!     "definition-path": ["/opt/tools/roms"],
//!     "tools": [
//!         {
//!             "name": "probe",
//!             "serial-number": "12345678",
//!             "definition": "probe.rom",
//!             "tooltip": { "translation": [0.0, 0.0, 5.0] }
//!         }
//!     ]
//! }
//! ```
//!
//! An empty `serial-port` triggers port discovery. Relative `definition`
//! entries are resolved against the `definition-path` directories in
//! order.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Result, TrackerError};

fn default_period_ms() -> u64 {
    20
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TrackerConfig {
    /// Serial device path; empty or absent triggers discovery.
    #[serde(default)]
    pub serial_port: Option<String>,

    /// Directories searched for relative `.rom` definitions, in order.
    #[serde(default)]
    pub definition_path: Vec<PathBuf>,

    #[serde(default)]
    pub tools: Vec<ToolConfig>,

    /// Tracking loop period in milliseconds (50 Hz by default).
    #[serde(default = "default_period_ms")]
    pub period_ms: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            serial_port: None,
            definition_path: Vec::new(),
            tools: Vec::new(),
            period_ms: default_period_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ToolConfig {
    pub name: String,
    pub serial_number: String,

    /// `.rom` file to upload for a passive tool.
    #[serde(default)]
    pub definition: Option<PathBuf>,

    #[serde(default)]
    pub tooltip: Option<TooltipConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TooltipConfig {
    /// Tip offset in the tool frame, millimetres.
    #[serde(default)]
    pub translation: Option<[f64; 3]>,

    /// Accepted for compatibility but not supported; a configured
    /// rotation is reported as an error and never applied.
    #[serde(default)]
    pub rotation: Option<[f64; 4]>,
}

impl TrackerConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            TrackerError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        serde_json::from_str(&text)
            .map_err(|e| TrackerError::Config(format!("cannot parse {}: {e}", path.display())))
    }

    /// Resolve a tool definition against the search directories. An
    /// absolute path is used as is; a relative one is looked up in each
    /// `definition-path` entry in order.
    pub fn resolve_definition(&self, definition: &Path) -> Option<PathBuf> {
        if definition.is_absolute() {
            return definition.exists().then(|| definition.to_path_buf());
        }
        self.definition_path
            .iter()
            .map(|dir| dir.join(definition))
            .find(|candidate| candidate.exists())
    }

    pub fn period(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.period_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_full_config() {
        let text = r#"{
            "serial-port": "/dev/ttyUSB0",
            "definition-path": ["/opt/roms"],
            "tools": [
                {
                    "name": "probe",
                    "serial-number": "12345678",
                    "definition": "probe.rom",
                    "tooltip": { "translation": [0.0, 0.0, 5.0] }
                },
                { "name": "reference", "serial-number": "87654321" }
            ]
        }"#;
        let config: TrackerConfig = serde_json::from_str(text).unwrap();
        assert_eq!(config.serial_port.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(config.tools.len(), 2);
        assert_eq!(config.period_ms, 20);
        let tooltip = config.tools[0].tooltip.as_ref().unwrap();
        assert_eq!(tooltip.translation, Some([0.0, 0.0, 5.0]));
        assert_eq!(tooltip.rotation, None);
    }

    #[test]
    fn test_empty_config() {
        let config: TrackerConfig = serde_json::from_str("{}").unwrap();
        assert!(config.serial_port.is_none());
        assert!(config.tools.is_empty());
        assert_eq!(config.period_ms, 20);
    }

    #[test]
    fn test_resolve_definition() {
        let dir = tempfile::tempdir().unwrap();
        let rom = dir.path().join("probe.rom");
        std::fs::File::create(&rom)
            .unwrap()
            .write_all(b"stub")
            .unwrap();

        let config = TrackerConfig {
            definition_path: vec![PathBuf::from("/nonexistent"), dir.path().to_path_buf()],
            ..TrackerConfig::default()
        };
        assert_eq!(
            config.resolve_definition(Path::new("probe.rom")),
            Some(rom.clone())
        );
        assert_eq!(config.resolve_definition(Path::new("other.rom")), None);
        assert_eq!(config.resolve_definition(&rom), Some(rom));
    }

    #[test]
    fn test_load_rejects_bad_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tracker.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            TrackerConfig::load(&path),
            Err(TrackerError::Config(_))
        ));
    }
}
