//! CW-007: Compiler backend seam.
//!
//! The worker treats the language compiler as a black box behind
//! [`CompilerBackend`]: parse source text into a unit, emit a binary given
//! units and references, report diagnostics with location and severity.
//! The built-in [`textpack`] backend is a small deterministic implementation
//! used by the default binary and the engine tests; a real language service
//! plugs in behind the same trait.

pub mod textpack;

use crate::core::resolver::ResolvedReference;
use crate::core::types::JobOptions;
use std::fmt;
use std::sync::Arc;

/// A parsed compilation unit, tagged with its original file name for
/// diagnostic correlation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedUnit {
    /// Original file name from the job
    pub file_name: String,

    /// Decoded source text
    pub text: String,
}

/// Diagnostic severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// A backend-reported condition, optionally tied to a source location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Stable diagnostic code (e.g. "TP0002")
    pub code: String,

    pub severity: Severity,

    pub message: String,

    /// None for compilation-wide conditions not tied to any unit
    pub location: Option<SourceLocation>,
}

/// 1-based position within a named source unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    pub file_name: String,
    pub line: u32,
    pub column: u32,
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file_name, self.line, self.column)
    }
}

/// Callback the backend uses to resolve an assembly it discovers it needs
/// mid-compilation. The reference resolver implements this with the same
/// cached lookup it uses for explicit references.
pub trait MissingAssemblyResolver: Send + Sync {
    fn resolve_missing(&self, display_name: &str) -> Option<Arc<ResolvedReference>>;
}

/// Result of one emit attempt.
#[derive(Debug, Clone)]
pub enum EmitOutcome {
    /// Artifact produced from every current unit
    Success {
        binary: Vec<u8>,
        symbols: Option<Vec<u8>>,
    },
    /// Nothing emitted; diagnostics explain why
    Failure { diagnostics: Vec<Diagnostic> },
}

/// The black-box language compiler.
pub trait CompilerBackend: Send + Sync {
    /// Parse decoded source text into a unit. Syntax problems are not
    /// reported here; they surface as diagnostics at emit time.
    fn parse(&self, file_name: &str, text: &str, options: &JobOptions) -> ParsedUnit;

    /// Attempt to emit a binary from the current unit set.
    ///
    /// `Err` means the backend itself failed (not the sources); the engine
    /// reports it as an internal job error.
    fn emit(
        &self,
        assembly_name: &str,
        units: &[ParsedUnit],
        references: &[Arc<ResolvedReference>],
        options: &JobOptions,
        missing: &dyn MissingAssemblyResolver,
    ) -> Result<EmitOutcome, String>;
}
