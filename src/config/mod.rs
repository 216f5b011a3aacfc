//! Configuration module for mini-scada
//!
//! This module handles project configuration:
//! - Project files (`.toml` or `.json`) with connection, polling, store,
//!   logging and tag settings
//! - Tag list import from CSV
//! - The default workspace location
//!
//! # Workspace Location
//!
//! Unless a project names its own workspace, samples are stored in the
//! platform data directory:
//! - **Linux**: `~/.local/share/mini-scada/`
//! - **macOS**: `~/Library/Application Support/mini-scada/`
//! - **Windows**: `%APPDATA%\mini-scada\`
//!
//! # Example
//!
//! ```ignore
//! use mini_scada::config::{parse_tag_csv, ProjectFile};
//!
//! let mut project = ProjectFile::load("plant.toml")?;
//! project.tags.extend(parse_tag_csv(&std::fs::read_to_string("extra.csv")?)?);
//! project.save("plant.toml")?;
//! ```

use crate::backend::{ConnectTarget, PollingConfig, DEFAULT_PORT};
use crate::error::{Result, ScadaError, TagSpecError};
use crate::types::{Area, DataType, TagSpec};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Directory name under the platform data dir
pub const APP_DIR_NAME: &str = "mini-scada";

/// Current project file format version
pub const PROJECT_VERSION: u32 = 1;

/// Default connect and I/O timeout in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 2000;

/// Default poll interval in seconds
pub const DEFAULT_POLL_INTERVAL_SECS: f64 = 1.0;

/// Default log filter when `RUST_LOG` is unset
pub const DEFAULT_LOG_FILTER: &str = "info,mini_scada=debug";

// ==================== App Data Directory ====================

/// Default workspace directory in the platform data dir
pub fn default_workspace_dir() -> Option<PathBuf> {
    dirs_next::data_dir().map(|p| p.join(APP_DIR_NAME))
}

/// Ensure a directory exists, creating it if needed
pub fn ensure_dir(dir: &Path) -> Result<PathBuf> {
    if !dir.exists() {
        std::fs::create_dir_all(dir).map_err(|e| {
            ScadaError::Config(format!("Failed to create directory {:?}: {}", dir, e))
        })?;
    }
    Ok(dir.to_path_buf())
}

// ==================== Connection ====================

/// Which driver a project talks through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    /// ISO-on-TCP to a real controller
    #[default]
    S7,
    /// In-memory simulated controller
    Simulated,
}

/// Controller connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default)]
    pub driver: DriverKind,

    /// Host name or IP address
    #[serde(default = "default_address")]
    pub address: String,

    #[serde(default)]
    pub rack: u16,

    #[serde(default = "default_slot")]
    pub slot: u16,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Connect and I/O timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_address() -> String {
    "127.0.0.1".to_string()
}

fn default_slot() -> u16 {
    1
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            driver: DriverKind::default(),
            address: default_address(),
            rack: 0,
            slot: 1,
            port: DEFAULT_PORT,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

impl ConnectionConfig {
    pub fn target(&self) -> ConnectTarget {
        ConnectTarget::new(self.address.clone(), self.rack, self.slot).with_port(self.port)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

// ==================== Polling ====================

/// Polling settings as written in a project file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollingSettings {
    /// Seconds between cycle starts
    #[serde(default = "default_interval_secs")]
    pub interval_secs: f64,

    #[serde(default)]
    pub finish_cycle_on_stop: bool,

    /// Coalesce tags into block reads across gaps of at most this many bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coalesce_gap: Option<usize>,
}

fn default_interval_secs() -> f64 {
    DEFAULT_POLL_INTERVAL_SECS
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            finish_cycle_on_stop: false,
            coalesce_gap: None,
        }
    }
}

impl PollingSettings {
    /// Poll interval, falling back to the default for non-positive or
    /// non-finite values
    pub fn interval(&self) -> Duration {
        if self.interval_secs.is_finite() && self.interval_secs > 0.0 {
            Duration::from_secs_f64(self.interval_secs)
        } else {
            tracing::warn!(
                "Invalid poll interval {}s, using {}s",
                self.interval_secs,
                DEFAULT_POLL_INTERVAL_SECS
            );
            Duration::from_secs_f64(DEFAULT_POLL_INTERVAL_SECS)
        }
    }
}

// ==================== Store ====================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct StoreConfig {
    /// Workspace directory; the platform data dir when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<PathBuf>,
}

impl StoreConfig {
    /// Resolved workspace directory
    pub fn workspace_dir(&self) -> Result<PathBuf> {
        self.workspace
            .clone()
            .or_else(default_workspace_dir)
            .ok_or_else(|| {
                ScadaError::Config("Could not determine a workspace directory".to_string())
            })
    }
}

// ==================== Logging ====================

/// Logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directives used when `RUST_LOG` is unset
    #[serde(default = "default_log_filter")]
    pub filter: String,

    /// Also write daily-rolling log files into this directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_dir: Option<PathBuf>,

    /// Log file name prefix
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,

    /// Colored console output
    #[serde(default = "default_true")]
    pub ansi: bool,
}

fn default_log_filter() -> String {
    DEFAULT_LOG_FILTER.to_string()
}

fn default_file_prefix() -> String {
    "mini-scada.log".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            file_dir: None,
            file_prefix: default_file_prefix(),
            ansi: true,
        }
    }
}

// ==================== Project File ====================

/// Everything needed to run a polling session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectFile {
    /// Format version for future migration
    #[serde(default = "default_project_version")]
    pub version: u32,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub connection: ConnectionConfig,

    #[serde(default)]
    pub polling: PollingSettings,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Tags in poll order
    #[serde(default)]
    pub tags: Vec<TagSpec>,
}

fn default_project_version() -> u32 {
    PROJECT_VERSION
}

impl Default for ProjectFile {
    fn default() -> Self {
        Self {
            version: PROJECT_VERSION,
            name: "Untitled Project".to_string(),
            connection: ConnectionConfig::default(),
            polling: PollingSettings::default(),
            store: StoreConfig::default(),
            logging: LoggingConfig::default(),
            tags: Vec::new(),
        }
    }
}

fn is_toml(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("toml"))
}

impl ProjectFile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Load a project file; `.toml` is parsed as TOML, anything else as JSON
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ScadaError::Config(format!("Failed to read project file {:?}: {}", path, e))
        })?;

        let project = if is_toml(path) {
            Self::from_toml(&content)
        } else {
            Self::from_json(&content)
        }
        .map_err(|e| e.with_context(format!("Failed to parse project file {:?}", path)))?;

        project.validate()?;
        tracing::debug!(
            "Loaded project '{}' with {} tags from {:?}",
            project.name,
            project.tags.len(),
            path
        );
        Ok(project)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| ScadaError::Config(e.to_string()))
    }

    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).map_err(|e| ScadaError::Config(e.to_string()))
    }

    /// Save as TOML or pretty JSON depending on the extension
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            ensure_dir(parent)?;
        }

        let content = if is_toml(path) {
            toml::to_string_pretty(self)
                .map_err(|e| ScadaError::Serialization(format!("TOML: {}", e)))?
        } else {
            serde_json::to_string_pretty(self)
                .map_err(|e| ScadaError::Serialization(format!("JSON: {}", e)))?
        };

        std::fs::write(path, content).map_err(|e| {
            ScadaError::Config(format!("Failed to write project file {:?}: {}", path, e))
        })
    }

    /// Tag names must be unique
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for tag in &self.tags {
            if !seen.insert(tag.name()) {
                return Err(TagSpecError::DuplicateName(tag.name().to_string()).into());
            }
        }
        Ok(())
    }

    /// Worker parameters derived from this project
    pub fn polling_config(&self) -> PollingConfig {
        PollingConfig {
            interval: self.polling.interval(),
            finish_cycle_on_stop: self.polling.finish_cycle_on_stop,
            coalesce_gap: self.polling.coalesce_gap,
            connect_timeout: self.connection.timeout(),
        }
    }
}

// ==================== Tag CSV Import ====================

fn import_err(line: usize, message: impl Into<String>) -> TagSpecError {
    TagSpecError::Import {
        line,
        message: message.into(),
    }
}

/// Parse a tag list from CSV lines `name,area,db,byte,type[,bit]`
///
/// Blank lines and lines starting with `#` are skipped, as is a leading
/// header line whose first field is `name`. Errors carry 1-based line numbers.
pub fn parse_tag_csv(text: &str) -> std::result::Result<Vec<TagSpec>, TagSpecError> {
    let mut tags = Vec::new();
    let mut seen = HashSet::new();

    for (i, raw) in text.lines().enumerate() {
        let line_no = i + 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        if tags.is_empty() && fields[0].eq_ignore_ascii_case("name") {
            continue;
        }
        if fields.len() < 5 {
            return Err(import_err(
                line_no,
                format!("expected at least 5 fields, found {}", fields.len()),
            ));
        }

        let area: Area = fields[1]
            .parse()
            .map_err(|e: TagSpecError| import_err(line_no, e.to_string()))?;
        let block: u16 = fields[2]
            .parse()
            .map_err(|_| import_err(line_no, format!("invalid block number '{}'", fields[2])))?;
        let byte: usize = fields[3]
            .parse()
            .map_err(|_| import_err(line_no, format!("invalid byte offset '{}'", fields[3])))?;
        let data_type: DataType = fields[4]
            .parse()
            .map_err(|e: TagSpecError| import_err(line_no, e.to_string()))?;
        let bit = match fields.get(5).filter(|f| !f.is_empty()) {
            Some(f) => Some(
                f.parse::<u8>()
                    .map_err(|_| import_err(line_no, format!("invalid bit offset '{}'", f)))?,
            ),
            None => None,
        };

        let tag = TagSpec::from_parts(fields[0], area, block, byte, bit, data_type)
            .map_err(|e| import_err(line_no, e.to_string()))?;
        if !seen.insert(tag.name().to_string()) {
            return Err(import_err(
                line_no,
                format!("duplicate tag name '{}'", tag.name()),
            ));
        }
        tags.push(tag);
    }

    Ok(tags)
}

/// Read and parse a tag CSV file
pub fn load_tag_csv(path: impl AsRef<Path>) -> Result<Vec<TagSpec>> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .map_err(|e| ScadaError::Config(format!("Failed to read tag file {:?}: {}", path, e)))?;
    Ok(parse_tag_csv(&text)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let project = ProjectFile::default();
        assert_eq!(project.connection.port, 102);
        assert_eq!(project.connection.rack, 0);
        assert_eq!(project.connection.slot, 1);
        assert_eq!(project.connection.timeout_ms, 2000);
        assert_eq!(project.polling.interval_secs, 1.0);
        assert_eq!(project.logging.filter, "info,mini_scada=debug");
    }

    #[test]
    fn test_minimal_toml_fills_defaults() {
        let project = ProjectFile::from_toml(
            r#"
            name = "Tank farm"

            [connection]
            address = "192.168.0.10"

            [[tags]]
            name = "TankLevel"
            area = "DB"
            db = 1
            byte_index = 0
            data_type = "REAL"
            "#,
        )
        .unwrap();
        assert_eq!(project.name, "Tank farm");
        assert_eq!(project.connection.port, 102);
        assert_eq!(project.connection.slot, 1);
        assert_eq!(project.tags.len(), 1);
        assert_eq!(project.tags[0].data_type(), DataType::Real32);
        assert_eq!(
            project.connection.target().to_string(),
            "192.168.0.10:102 (rack 0, slot 1)"
        );
    }

    #[test]
    fn test_save_and_load_by_extension() {
        let dir = tempdir().unwrap();
        let mut project = ProjectFile::new("demo");
        project.polling.coalesce_gap = Some(8);
        project.tags.push(TagSpec::new_bool("PumpOn", Area::DataBlock, 1, 4, 0).unwrap());

        for file in ["demo.toml", "demo.json"] {
            let path = dir.path().join(file);
            project.save(&path).unwrap();
            let loaded = ProjectFile::load(&path).unwrap();
            assert_eq!(loaded, project);
        }
    }

    #[test]
    fn test_load_rejects_duplicate_tags() {
        let json = r#"{"tags": [
            {"name": "a", "byte_offset": 0, "data_type": "INT16"},
            {"name": "a", "byte_offset": 2, "data_type": "INT16"}
        ]}"#;
        let dir = tempdir().unwrap();
        let path = dir.path().join("dup.json");
        std::fs::write(&path, json).unwrap();
        assert!(ProjectFile::load(&path).is_err());
    }

    #[test]
    fn test_invalid_interval_falls_back() {
        let settings = PollingSettings {
            interval_secs: -1.0,
            ..Default::default()
        };
        assert_eq!(settings.interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_parse_tag_csv() {
        let text = "\
name,area,db,byte,type,bit
# tank
TankLevel,DB,1,0,REAL32

PumpOn,DB,1,4,BOOL,0
Start,I,0,2,BOOL,5
";
        let tags = parse_tag_csv(text).unwrap();
        assert_eq!(tags.len(), 3);
        assert_eq!(tags[1].bit_offset(), 0);
        assert_eq!(tags[2].area(), Area::Input);
        assert_eq!(tags[2].address(), "I2.5");
    }

    #[test]
    fn test_parse_tag_csv_reports_line_numbers() {
        let err = parse_tag_csv("a,DB,1,0,REAL32\n\nb,DB,1\n").unwrap_err();
        assert!(matches!(err, TagSpecError::Import { line: 3, .. }));

        let err = parse_tag_csv("a,DB,1,0,REAL32,3\n").unwrap_err();
        assert!(matches!(err, TagSpecError::Import { line: 1, .. }));

        let err = parse_tag_csv("a,ZZ,1,0,REAL32\n").unwrap_err();
        assert!(err.to_string().contains("Line 1"));
    }
}
