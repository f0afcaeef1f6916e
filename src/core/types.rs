//! CW-001: Wire and job data model.
//!
//! Message envelopes exchanged with the parent process, compile job payloads,
//! and compilation results. All types derive Serialize/Deserialize; binary
//! fields travel base64-encoded inside JSON frames.

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Message envelope
// ============================================================================

/// A single framed message exchanged with the parent process.
///
/// `id` correlates a `Compile` request with its `Assembly` or `Error`
/// response. Control messages (`Ready`, `Exit`) carry id 0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Request/response correlation id
    #[serde(default)]
    pub id: i32,

    /// Typed payload
    #[serde(flatten)]
    pub body: MessageBody,
}

/// Message payload, discriminated by the `type` field on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageBody {
    /// Worker is attached and accepting jobs
    Ready,
    /// A compile request from the parent
    Compile { job: CompileJob },
    /// Compilation outcome (success or total failure, see `CompilationResult`)
    Assembly { result: CompilationResult },
    /// A job-level failure
    Error { kind: ErrorKind, message: String },
    /// Graceful shutdown request
    Exit,
}

impl Message {
    pub fn ready() -> Self {
        Self {
            id: 0,
            body: MessageBody::Ready,
        }
    }

    pub fn exit() -> Self {
        Self {
            id: 0,
            body: MessageBody::Exit,
        }
    }

    pub fn compile(id: i32, job: CompileJob) -> Self {
        Self {
            id,
            body: MessageBody::Compile { job },
        }
    }

    pub fn assembly(id: i32, result: CompilationResult) -> Self {
        Self {
            id,
            body: MessageBody::Assembly { result },
        }
    }

    pub fn error(id: i32, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            id,
            body: MessageBody::Error {
                kind,
                message: message.into(),
            },
        }
    }
}

// ============================================================================
// Compile job
// ============================================================================

/// One unit of work: sources + references + options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompileJob {
    /// Source files, unique by name; insertion order defines diagnostic order
    #[serde(default)]
    pub source_files: Vec<SourceUnit>,

    /// Binary references shipped with the job (or named on disk)
    #[serde(default)]
    pub reference_files: Vec<ReferenceUnit>,

    /// Job configuration
    #[serde(default)]
    pub options: JobOptions,
}

/// One source file within a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceUnit {
    /// File name (used for diagnostic correlation)
    pub name: String,

    /// Raw bytes, decoded per the job's `encoding` option
    #[serde(with = "bytes64", default)]
    pub data: Vec<u8>,
}

impl SourceUnit {
    pub fn new(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }
}

/// One reference file within a job.
///
/// Empty `data` with a `name` that exists on disk means "load from file".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceUnit {
    /// File name or file-system path
    pub name: String,

    /// Raw reference bytes; may be empty when `name` is an on-disk path
    #[serde(with = "bytes64", default)]
    pub data: Vec<u8>,
}

// ============================================================================
// Job options
// ============================================================================

/// Per-job configuration recognized by the engine and backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOptions {
    /// Text decoding for source bytes (e.g. "utf-8", "utf-16le", "latin-1")
    #[serde(default = "default_encoding")]
    pub encoding: String,

    /// Language version the backend should target
    #[serde(default)]
    pub language_version: LanguageVersion,

    /// Kind of artifact to emit
    #[serde(default)]
    pub output_kind: OutputKind,

    /// Architecture target
    #[serde(default)]
    pub platform: Platform,

    /// Preprocessor symbols defined for every unit
    #[serde(default)]
    pub preprocessor_symbols: Vec<String>,

    /// Add the well-known core library references before compiling
    #[serde(default = "default_true")]
    pub use_standard_libraries: bool,

    /// Emit debug symbol data alongside the binary (disables optimization)
    #[serde(default)]
    pub emit_debug_info: bool,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            encoding: default_encoding(),
            language_version: LanguageVersion::default(),
            output_kind: OutputKind::default(),
            platform: Platform::default(),
            preprocessor_symbols: Vec::new(),
            use_standard_libraries: true,
            emit_debug_info: false,
        }
    }
}

fn default_encoding() -> String {
    "utf-8".to_string()
}

fn default_true() -> bool {
    true
}

/// Language version selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LanguageVersion {
    #[default]
    Latest,
    Preview,
    V1,
    V2,
    V3,
    V4,
    V5,
    V6,
    V7,
    V8,
    V9,
    V10,
    V11,
}

impl fmt::Display for LanguageVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", format!("{:?}", self).to_lowercase())
    }
}

/// Artifact kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    #[default]
    Library,
    Executable,
    Module,
}

impl fmt::Display for OutputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Library => write!(f, "library"),
            Self::Executable => write!(f, "executable"),
            Self::Module => write!(f, "module"),
        }
    }
}

/// Architecture target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    #[default]
    Any,
    X64,
    X86,
    Arm,
    Arm64,
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => write!(f, "any"),
            Self::X64 => write!(f, "x64"),
            Self::X86 => write!(f, "x86"),
            Self::Arm => write!(f, "arm"),
            Self::Arm64 => write!(f, "arm64"),
        }
    }
}

// ============================================================================
// Compilation result
// ============================================================================

/// Outcome of one compile job.
///
/// An empty `binary` with a non-empty `diagnostics` log is the legitimate
/// "every unit failed" terminal outcome, not an error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompilationResult {
    /// Assembly name
    pub name: String,

    /// Emitted artifact bytes; empty if nothing valid survived
    #[serde(with = "bytes64", default)]
    pub binary: Vec<u8>,

    /// Debug symbol data, when `emit_debug_info` was set
    #[serde(with = "opt_bytes64", default)]
    pub symbols: Option<Vec<u8>>,

    /// Source units that survived into the final artifact
    #[serde(default)]
    pub succeeded: u32,

    /// Source units excluded due to error diagnostics
    #[serde(default)]
    pub failed: u32,

    /// Accumulated text of excluded-unit errors
    #[serde(default)]
    pub diagnostics: String,
}

impl CompilationResult {
    /// A result with no binary — total failure or nothing emitted yet.
    pub fn empty(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

// ============================================================================
// Error taxonomy
// ============================================================================

/// Job-level failure classification carried in `Error` messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed or empty job; not retried
    InvalidJob,
    /// A named reference could not be located by any resolver tier.
    /// Reserved for the wire contract: this worker reports unresolved
    /// references as diagnostics, but a backend may fail a job on one.
    UnresolvedReference,
    /// Underlying stream read/write failure. Reserved for the wire
    /// contract: this worker closes the stream instead of sending it.
    Transport,
    /// Any other failure during a job's compilation
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidJob => write!(f, "invalid_job"),
            Self::UnresolvedReference => write!(f, "unresolved_reference"),
            Self::Transport => write!(f, "transport"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

// ============================================================================
// base64 serde helpers
// ============================================================================

/// Serialize `Vec<u8>` as a base64 string inside JSON.
pub mod bytes64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(de)?;
        STANDARD
            .decode(s.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// Serialize `Option<Vec<u8>>` as an optional base64 string.
pub mod opt_bytes64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Option<Vec<u8>>, ser: S) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(b) => ser.serialize_some(&STANDARD.encode(b)),
            None => ser.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Option<Vec<u8>>, D::Error> {
        let s: Option<String> = Option::deserialize(de)?;
        match s {
            Some(s) => STANDARD
                .decode(s.as_bytes())
                .map(Some)
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
