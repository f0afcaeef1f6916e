//! CW-008: Built-in textpack backend.
//!
//! A deliberately small, deterministic compiler: each source unit is a
//! line-oriented text file with a `unit` header, `require` reference
//! declarations, and `emit` payload lines. The artifact is a TPK1 container
//! holding every surviving unit's payload. It exists so the worker binary is
//! runnable end-to-end and the retry-compile engine has a realistic backend
//! to drive in tests.
//!
//! Grammar per line (after `#` comments and blank lines are skipped):
//!   unit NAME             header, must come first, unique per compilation
//!   require NAME          reference dependency (resolver fallback applies)
//!   emit TEXT             payload line
//!   @SYM emit TEXT        payload line, only when SYM is defined
//!
//! Diagnostic codes: TP0001 missing/misplaced unit header, TP0002 unknown
//! directive, TP0003 unresolved reference, TP0004 duplicate unit name.

use super::{
    CompilerBackend, Diagnostic, EmitOutcome, MissingAssemblyResolver, ParsedUnit, Severity,
    SourceLocation,
};
use crate::core::resolver::{normalize_name, ResolvedReference};
use crate::core::types::JobOptions;
use std::collections::HashSet;
use std::sync::Arc;

/// Container magic for emitted artifacts.
pub const MAGIC: &[u8; 4] = b"TPK1";

/// The built-in deterministic backend.
#[derive(Debug, Default)]
pub struct TextPackBackend;

impl TextPackBackend {
    pub fn new() -> Self {
        Self
    }
}

/// One analyzed unit: payload lines plus their 1-based source lines.
struct AnalyzedUnit {
    unit_name: String,
    file_name: String,
    payload: Vec<String>,
    payload_lines: Vec<u32>,
}

impl CompilerBackend for TextPackBackend {
    fn parse(&self, file_name: &str, text: &str, _options: &JobOptions) -> ParsedUnit {
        ParsedUnit {
            file_name: file_name.to_string(),
            text: text.to_string(),
        }
    }

    fn emit(
        &self,
        assembly_name: &str,
        units: &[ParsedUnit],
        references: &[Arc<ResolvedReference>],
        options: &JobOptions,
        missing: &dyn MissingAssemblyResolver,
    ) -> Result<EmitOutcome, String> {
        let mut diagnostics = Vec::new();
        let mut analyzed = Vec::new();
        let mut seen_names: HashSet<String> = HashSet::new();

        for unit in units {
            match analyze_unit(unit, references, options, missing, &mut seen_names) {
                Ok(a) => analyzed.push(a),
                Err(unit_diags) => diagnostics.extend(unit_diags),
            }
        }

        if !diagnostics.is_empty() {
            return Ok(EmitOutcome::Failure { diagnostics });
        }

        let binary = pack(assembly_name, &analyzed, references)?;
        let symbols = if options.emit_debug_info {
            Some(symbol_table(&analyzed)?)
        } else {
            None
        };

        Ok(EmitOutcome::Success { binary, symbols })
    }
}

/// Analyze one unit. Returns its payload or every error diagnostic found.
fn analyze_unit(
    unit: &ParsedUnit,
    references: &[Arc<ResolvedReference>],
    options: &JobOptions,
    missing: &dyn MissingAssemblyResolver,
    seen_names: &mut HashSet<String>,
) -> Result<AnalyzedUnit, Vec<Diagnostic>> {
    let mut errors = Vec::new();
    let mut unit_name: Option<String> = None;
    let mut payload = Vec::new();
    let mut payload_lines = Vec::new();

    for (idx, raw) in unit.text.lines().enumerate() {
        let line_no = u32::try_from(idx).unwrap_or(u32::MAX).saturating_add(1);
        let trimmed = raw.trim_start();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let column = column_of(raw);

        // Conditional prefix: "@SYM rest" applies only when SYM is defined
        let (active, body) = match trimmed.strip_prefix('@') {
            Some(rest) => {
                let (sym, rest) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
                let defined = options
                    .preprocessor_symbols
                    .iter()
                    .any(|s| s.eq_ignore_ascii_case(sym));
                (defined, rest.trim_start())
            }
            None => (true, trimmed),
        };

        let (directive, rest) = body.split_once(char::is_whitespace).unwrap_or((body, ""));
        let rest = rest.trim();

        match directive {
            "unit" => {
                if unit_name.is_some() || !payload.is_empty() {
                    errors.push(error_at(
                        "TP0001",
                        format!("'unit' header must be the first directive in {}", unit.file_name),
                        unit, line_no, column,
                    ));
                } else if !seen_names.insert(rest.to_ascii_lowercase()) {
                    errors.push(error_at(
                        "TP0004",
                        format!("duplicate unit name '{}'", rest),
                        unit, line_no, column,
                    ));
                } else {
                    unit_name = Some(rest.to_string());
                }
            }
            "require" => {
                if active && resolve_requirement(rest, references, missing).is_none() {
                    errors.push(error_at(
                        "TP0003",
                        format!("unresolved reference '{}'", rest),
                        unit, line_no, column,
                    ));
                }
            }
            "emit" => {
                if unit_name.is_none() {
                    errors.push(error_at(
                        "TP0001",
                        "'emit' before 'unit' header".to_string(),
                        unit, line_no, column,
                    ));
                } else if active {
                    payload.push(rest.to_string());
                    payload_lines.push(line_no);
                }
            }
            other => {
                errors.push(error_at(
                    "TP0002",
                    format!("unknown directive '{}'", other),
                    unit, line_no, column,
                ));
            }
        }
    }

    let unit_name = match unit_name {
        Some(n) => n,
        None => {
            errors.push(error_at(
                "TP0001",
                format!("no 'unit' header in {}", unit.file_name),
                unit, 1, 1,
            ));
            return Err(errors);
        }
    };

    if errors.is_empty() {
        Ok(AnalyzedUnit {
            unit_name,
            file_name: unit.file_name.clone(),
            payload,
            payload_lines,
        })
    } else {
        Err(errors)
    }
}

fn resolve_requirement(
    name: &str,
    references: &[Arc<ResolvedReference>],
    missing: &dyn MissingAssemblyResolver,
) -> Option<Arc<ResolvedReference>> {
    let wanted = normalize_name(name);
    references
        .iter()
        .find(|r| r.name.eq_ignore_ascii_case(&wanted))
        .cloned()
        .or_else(|| missing.resolve_missing(name))
}

fn error_at(code: &str, message: String, unit: &ParsedUnit, line: u32, column: u32) -> Diagnostic {
    Diagnostic {
        code: code.to_string(),
        severity: Severity::Error,
        message,
        location: Some(SourceLocation {
            file_name: unit.file_name.clone(),
            line,
            column,
        }),
    }
}

/// 1-based column of the first non-whitespace character.
fn column_of(raw: &str) -> u32 {
    let leading = raw.len() - raw.trim_start().len();
    u32::try_from(leading).unwrap_or(u32::MAX).saturating_add(1)
}

/// TPK1 container: magic, u16 reference count, u16 unit count, then per unit
/// a length-prefixed name and payload.
fn pack(
    assembly_name: &str,
    units: &[AnalyzedUnit],
    references: &[Arc<ResolvedReference>],
) -> Result<Vec<u8>, String> {
    let mut out = Vec::new();
    out.extend_from_slice(MAGIC);

    let name_bytes = assembly_name.as_bytes();
    out.extend_from_slice(&len_u16(name_bytes.len(), "assembly name")?);
    out.extend_from_slice(name_bytes);

    out.extend_from_slice(&len_u16(references.len(), "reference count")?);
    out.extend_from_slice(&len_u16(units.len(), "unit count")?);

    for unit in units {
        let name = unit.unit_name.as_bytes();
        out.extend_from_slice(&len_u16(name.len(), "unit name")?);
        out.extend_from_slice(name);

        let payload = unit.payload.join("\n");
        let bytes = payload.as_bytes();
        let len = u32::try_from(bytes.len()).map_err(|_| "payload too large".to_string())?;
        out.extend_from_slice(&len.to_le_bytes());
        out.extend_from_slice(bytes);
    }

    Ok(out)
}

fn len_u16(len: usize, what: &str) -> Result<[u8; 2], String> {
    u16::try_from(len)
        .map(u16::to_le_bytes)
        .map_err(|_| format!("{} exceeds u16", what))
}

/// Debug symbol data: JSON map of unit name to source file and the original
/// line number of each payload line.
fn symbol_table(units: &[AnalyzedUnit]) -> Result<Vec<u8>, String> {
    let map: serde_json::Map<String, serde_json::Value> = units
        .iter()
        .map(|u| {
            (
                u.unit_name.clone(),
                serde_json::json!({ "file": u.file_name, "lines": u.payload_lines }),
            )
        })
        .collect();
    serde_json::to_vec(&serde_json::Value::Object(map))
        .map_err(|e| format!("symbol serialize error: {}", e))
}
