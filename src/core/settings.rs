//! CW-003: Worker configuration — YAML file, serde defaults, no ambient state.
//!
//! Settings are loaded once at startup and passed by reference to every
//! component; nothing reads configuration globally.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Root worker configuration (crucible.yaml).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSettings {
    /// Fallback text encoding when a job omits one
    #[serde(default = "default_encoding")]
    pub default_encoding: String,

    /// Compiler behavior switches
    #[serde(default)]
    pub compiler: CompilerSettings,

    /// Log sink configuration
    #[serde(default)]
    pub logging: LogSettings,

    /// File-system layout
    #[serde(default)]
    pub path: DirectorySettings,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            default_encoding: default_encoding(),
            compiler: CompilerSettings::default(),
            logging: LogSettings::default(),
            path: DirectorySettings::default(),
        }
    }
}

fn default_encoding() -> String {
    "utf-8".to_string()
}

/// Compiler behavior switches.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompilerSettings {
    /// Allow unsafe constructs in source units
    #[serde(default)]
    pub allow_unsafe: bool,

    /// Add well-known core library references to every job
    #[serde(default)]
    pub use_standard_libraries: bool,

    /// Serve framed messages over stdin/stdout; false = console prompt
    #[serde(default)]
    pub enable_message_stream: bool,

    /// Recompile even when an identical job was seen before
    #[serde(default)]
    pub force_recompile: bool,
}

/// Log sink configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    /// Event log file name inside the logging directory
    #[serde(default = "default_log_file")]
    pub file_name: String,

    /// Minimum level for human-readable stderr lines
    #[serde(default)]
    pub level: LogLevel,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            file_name: default_log_file(),
            level: LogLevel::default(),
        }
    }
}

fn default_log_file() -> String {
    "events.jsonl".to_string()
}

/// Stderr log threshold.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warning,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// File-system layout consumed by the resolver and log sinks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectorySettings {
    /// Working root
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// Event log directory
    #[serde(default = "default_root")]
    pub logging: PathBuf,

    /// First resolver probe tier: job-local libraries
    #[serde(default = "default_libraries")]
    pub libraries: PathBuf,

    /// Second resolver probe tier: runtime/framework libraries
    #[serde(default = "default_framework")]
    pub framework: PathBuf,
}

impl Default for DirectorySettings {
    fn default() -> Self {
        Self {
            root: default_root(),
            logging: default_root(),
            libraries: default_libraries(),
            framework: default_framework(),
        }
    }
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_libraries() -> PathBuf {
    PathBuf::from("lib")
}

fn default_framework() -> PathBuf {
    PathBuf::from("runtime")
}

impl WorkerSettings {
    /// Load settings from a YAML file. A missing file yields defaults;
    /// a malformed file is an error.
    pub fn load(path: &Path) -> Result<Self, String> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
        serde_yaml_ng::from_str(&content)
            .map_err(|e| format!("invalid settings file {}: {}", path.display(), e))
    }

    /// True when debug-level stderr lines should print.
    pub fn debug_enabled(&self) -> bool {
        self.logging.level <= LogLevel::Debug
    }

    /// Path of the JSONL event log.
    pub fn event_log_path(&self) -> PathBuf {
        self.path.logging.join(&self.logging.file_name)
    }
}
