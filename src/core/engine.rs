//! CW-009: Retry-compile engine.
//!
//! Drives the compiler backend to a best-effort artifact: build the reference
//! set, decode and parse every source unit, then emit in a loop — each failed
//! emit excludes every unit named by an error diagnostic (all found in one
//! pass) before retrying. The loop terminates because each iteration either
//! succeeds, removes at least one unit, or stops making progress; zero units
//! remaining is a legitimate total-failure result, not an error.

use crate::backend::{CompilerBackend, EmitOutcome, ParsedUnit, Severity};
use crate::core::encoding::TextEncoding;
use crate::core::resolver::{
    is_reference_extension, ReferenceResolver, ResolvedReference, STD_REFERENCES,
};
use crate::core::settings::WorkerSettings;
use crate::core::types::{CompilationResult, CompileJob, ErrorKind};
use crate::joblog::eventlog::{self, WorkerEvent};
use indexmap::IndexMap;
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Diagnostic codes known to be benign in this embedding; they never trigger
/// unit exclusion.
const IGNORED_CODES: &[&str] = &["TP1701"];

/// Diagnostic code the engine assigns to source-byte decode failures.
const DECODE_ERROR_CODE: &str = "ENC0001";

/// A job-level failure, reported back to the parent as an `Error` message.
#[derive(Debug, Clone)]
pub struct JobError {
    pub kind: ErrorKind,
    pub message: String,
}

impl JobError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// The retry-compile engine. Holds no per-job state; one instance serves
/// every job the worker dequeues.
pub struct Engine<'a> {
    settings: &'a WorkerSettings,
    resolver: &'a ReferenceResolver,
    backend: &'a dyn CompilerBackend,
}

impl<'a> Engine<'a> {
    pub fn new(
        settings: &'a WorkerSettings,
        resolver: &'a ReferenceResolver,
        backend: &'a dyn CompilerBackend,
    ) -> Self {
        Self {
            settings,
            resolver,
            backend,
        }
    }

    /// Compile one job to completion. `id` is the originating message id;
    /// it names the artifact and tags event-log entries.
    pub fn compile(&self, id: i32, job: &CompileJob) -> Result<CompilationResult, JobError> {
        if job.source_files.is_empty() {
            return Err(JobError::new(
                ErrorKind::InvalidJob,
                "no source files provided",
            ));
        }

        if self.settings.debug_enabled() {
            eprintln!("{}", job_structure(job));
        }

        let assembly_name = format!("job-{}", id);
        let references = self.build_references(job);
        let encoding = self.job_encoding(job)?;

        // Decode and parse. A unit whose bytes cannot be decoded is excluded
        // up front, like any other per-unit failure.
        let mut units: Vec<ParsedUnit> = Vec::new();
        let mut diagnostics_log = String::new();
        let mut failed: u32 = 0;

        for source in &job.source_files {
            match encoding.decode(&source.data) {
                Ok(text) => units.push(self.backend.parse(&source.name, &text, &job.options)),
                Err(e) => {
                    diagnostics_log.push_str(&format!(
                        "[Error][{}][{}] {} | Line: 1, Pos: 1\n",
                        DECODE_ERROR_CODE, source.name, e
                    ));
                    failed += 1;
                    self.log_exclusion(id, &source.name, DECODE_ERROR_CODE, 1);
                }
            }
        }

        // Emit loop: remove every unit named by an error diagnostic, retry.
        loop {
            if units.is_empty() {
                return Ok(CompilationResult {
                    name: assembly_name,
                    binary: Vec::new(),
                    symbols: None,
                    succeeded: 0,
                    failed,
                    diagnostics: diagnostics_log,
                });
            }

            let outcome = self
                .backend
                .emit(&assembly_name, &units, &references, &job.options, self.resolver)
                .map_err(|e| JobError::new(ErrorKind::Internal, e))?;

            let diagnostics = match outcome {
                EmitOutcome::Success { binary, symbols } => {
                    return Ok(CompilationResult {
                        name: assembly_name,
                        binary,
                        symbols,
                        succeeded: count_u32(units.len()),
                        failed,
                        diagnostics: diagnostics_log,
                    });
                }
                EmitOutcome::Failure { diagnostics } => diagnostics,
            };

            let mut excluded: HashSet<String> = HashSet::new();
            for diag in &diagnostics {
                if diag.severity != Severity::Error || IGNORED_CODES.contains(&diag.code.as_str())
                {
                    continue;
                }
                let loc = match &diag.location {
                    Some(loc) if units.iter().any(|u| u.file_name == loc.file_name) => loc,
                    _ => {
                        // Compilation-wide condition: logged, removes nothing
                        eprintln!("[Error][{}] {}", diag.code, diag.message);
                        continue;
                    }
                };
                if !excluded.insert(loc.file_name.clone()) {
                    continue;
                }

                eprintln!(
                    "failed to compile {} - {} (L: {} | P: {}) | removing from job",
                    loc.file_name, diag.message, loc.line, loc.column
                );
                diagnostics_log.push_str(&format!(
                    "[Error][{}][{}] {} | Line: {}, Pos: {}\n",
                    diag.code, loc.file_name, diag.message, loc.line, loc.column
                ));
                failed += 1;
                self.log_exclusion(id, &loc.file_name, &diag.code, loc.line);
            }

            if excluded.is_empty() {
                // No per-unit progress possible. The remaining units are not
                // individually at fault; terminal failure with empty binary.
                return Ok(CompilationResult {
                    name: assembly_name,
                    binary: Vec::new(),
                    symbols: None,
                    succeeded: count_u32(units.len()),
                    failed,
                    diagnostics: diagnostics_log,
                });
            }

            units.retain(|u| !excluded.contains(&u.file_name));
        }
    }

    /// Build the reference set: std libraries first (when requested), then
    /// job references in order. Keys are case-insensitive file names; a job
    /// reference replaces an earlier entry with the same name.
    fn build_references(&self, job: &CompileJob) -> Vec<Arc<ResolvedReference>> {
        let mut references: IndexMap<String, Arc<ResolvedReference>> = IndexMap::new();

        if job.options.use_standard_libraries || self.settings.compiler.use_standard_libraries {
            for name in STD_REFERENCES {
                if let Some(handle) = self.resolver.reference(name) {
                    references.entry(name.to_ascii_lowercase()).or_insert(handle);
                } else if self.settings.debug_enabled() {
                    eprintln!("standard library reference unavailable: {}", name);
                }
            }
        }

        for reference in &job.reference_files {
            let file_name = file_name_of(&reference.name);
            if !is_reference_extension(&file_name) {
                eprintln!("ignoring unhandled project reference: {}", file_name);
                continue;
            }
            let key = file_name.to_ascii_lowercase();
            if self.settings.debug_enabled() {
                if references.contains_key(&key) {
                    eprintln!("replacing existing project reference: {}", file_name);
                } else {
                    eprintln!("adding project reference: {}", file_name);
                }
            }
            references.insert(key, Arc::new(load_reference(reference)));
        }

        references.into_values().collect()
    }

    fn job_encoding(&self, job: &CompileJob) -> Result<TextEncoding, JobError> {
        let label = if job.options.encoding.trim().is_empty() {
            &self.settings.default_encoding
        } else {
            &job.options.encoding
        };
        TextEncoding::parse(label).map_err(|e| JobError::new(ErrorKind::InvalidJob, e))
    }

    fn log_exclusion(&self, id: i32, file: &str, code: &str, line: u32) {
        let _ = eventlog::append_event(
            &self.settings.event_log_path(),
            WorkerEvent::UnitExcluded {
                job: id,
                file: file.to_string(),
                code: code.to_string(),
                line,
            },
        );
    }
}

/// Load a job reference: non-empty data is used as shipped; empty data with
/// an existing file path is read from disk.
fn load_reference(reference: &crate::core::types::ReferenceUnit) -> ResolvedReference {
    let file_name = file_name_of(&reference.name);
    if reference.data.is_empty() {
        let path = Path::new(&reference.name);
        if let Ok(data) = std::fs::read(path) {
            return ResolvedReference {
                name: file_name,
                path: Some(path.to_path_buf()),
                data,
            };
        }
    }
    ResolvedReference::from_image(file_name, reference.data.clone())
}

fn file_name_of(name: &str) -> String {
    Path::new(name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string())
}

fn count_u32(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

/// One-block debug summary of a job's shape.
fn job_structure(job: &CompileJob) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "Encoding: {}, Target: {}, Output: {}, Optimize: {}\n",
        job.options.encoding,
        job.options.language_version,
        job.options.output_kind,
        !job.options.emit_debug_info
    ));
    out.push_str(&format!("== Source Files ({}) ==\n", job.source_files.len()));
    out.push_str(
        &job.source_files
            .iter()
            .map(|s| format!("[{}] {}", s.data.len(), s.name))
            .collect::<Vec<_>>()
            .join(", "),
    );
    if !job.reference_files.is_empty() {
        out.push_str(&format!(
            "\n== Reference Files ({}) ==\n",
            job.reference_files.len()
        ));
        out.push_str(
            &job.reference_files
                .iter()
                .map(|r| format!("[{}] {}", r.data.len(), r.name))
                .collect::<Vec<_>>()
                .join(", "),
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::textpack::TextPackBackend;
    use crate::backend::{Diagnostic, MissingAssemblyResolver, SourceLocation};
    use crate::core::types::{JobOptions, ReferenceUnit, SourceUnit};
    use proptest::prelude::*;
    use std::sync::Mutex;

    fn test_settings(dir: &Path) -> WorkerSettings {
        let mut s = WorkerSettings::default();
        s.path.logging = dir.to_path_buf();
        s.path.libraries = dir.join("lib");
        s.path.framework = dir.join("runtime");
        s
    }

    fn job_of(sources: &[(&str, &str)]) -> CompileJob {
        CompileJob {
            source_files: sources
                .iter()
                .map(|(n, t)| SourceUnit::new(*n, t.as_bytes().to_vec()))
                .collect(),
            reference_files: vec![],
            options: JobOptions::default(),
        }
    }

    /// Scripted backend: a unit whose text contains "boom" fails with an
    /// error diagnostic; "benign" fails with the ignored code; "global"
    /// produces a locationless error. Success emits concatenated unit names.
    struct ScriptBackend;

    impl CompilerBackend for ScriptBackend {
        fn parse(&self, file_name: &str, text: &str, _options: &JobOptions) -> ParsedUnit {
            ParsedUnit {
                file_name: file_name.to_string(),
                text: text.to_string(),
            }
        }

        fn emit(
            &self,
            _assembly_name: &str,
            units: &[ParsedUnit],
            _references: &[Arc<ResolvedReference>],
            _options: &JobOptions,
            _missing: &dyn MissingAssemblyResolver,
        ) -> Result<EmitOutcome, String> {
            let mut diagnostics = Vec::new();
            for unit in units {
                if unit.text.contains("boom") {
                    diagnostics.push(Diagnostic {
                        code: "SB0001".to_string(),
                        severity: Severity::Error,
                        message: "boom found".to_string(),
                        location: Some(SourceLocation {
                            file_name: unit.file_name.clone(),
                            line: 1,
                            column: 1,
                        }),
                    });
                }
                if unit.text.contains("benign") {
                    diagnostics.push(Diagnostic {
                        code: "TP1701".to_string(),
                        severity: Severity::Error,
                        message: "benign embedding artifact".to_string(),
                        location: Some(SourceLocation {
                            file_name: unit.file_name.clone(),
                            line: 1,
                            column: 1,
                        }),
                    });
                }
                if unit.text.contains("global") {
                    diagnostics.push(Diagnostic {
                        code: "SB0099".to_string(),
                        severity: Severity::Error,
                        message: "configuration conflict".to_string(),
                        location: None,
                    });
                }
            }
            if diagnostics.is_empty() {
                let binary = units
                    .iter()
                    .flat_map(|u| u.file_name.bytes().chain([b'\n']))
                    .collect();
                Ok(EmitOutcome::Success {
                    binary,
                    symbols: None,
                })
            } else {
                Ok(EmitOutcome::Failure { diagnostics })
            }
        }
    }

    /// Backend that records the reference names passed to emit.
    struct CapturingBackend {
        seen: Mutex<Vec<String>>,
    }

    impl CompilerBackend for CapturingBackend {
        fn parse(&self, file_name: &str, text: &str, _options: &JobOptions) -> ParsedUnit {
            ParsedUnit {
                file_name: file_name.to_string(),
                text: text.to_string(),
            }
        }

        fn emit(
            &self,
            _assembly_name: &str,
            _units: &[ParsedUnit],
            references: &[Arc<ResolvedReference>],
            _options: &JobOptions,
            _missing: &dyn MissingAssemblyResolver,
        ) -> Result<EmitOutcome, String> {
            *self.seen.lock().unwrap() = references.iter().map(|r| r.name.clone()).collect();
            Ok(EmitOutcome::Success {
                binary: vec![1],
                symbols: None,
            })
        }
    }

    #[test]
    fn test_cw009_empty_job_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let settings = test_settings(dir.path());
        let resolver = ReferenceResolver::new(&settings.path, false);
        let backend = ScriptBackend;
        let engine = Engine::new(&settings, &resolver, &backend);

        let err = engine.compile(1, &CompileJob::default()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidJob);
        assert!(err.message.contains("no source files"));
    }

    #[test]
    fn test_cw009_all_valid_units_compile() {
        let dir = tempfile::tempdir().unwrap();
        let settings = test_settings(dir.path());
        let resolver = ReferenceResolver::new(&settings.path, false);
        let backend = ScriptBackend;
        let engine = Engine::new(&settings, &resolver, &backend);

        let job = job_of(&[("a.tp", "fine"), ("b.tp", "fine"), ("c.tp", "fine")]);
        let result = engine.compile(2, &job).unwrap();
        assert_eq!(result.succeeded, 3);
        assert_eq!(result.failed, 0);
        assert!(!result.binary.is_empty());
        assert!(result.diagnostics.is_empty());
        assert_eq!(result.name, "job-2");
    }

    #[test]
    fn test_cw009_one_failing_unit_excluded() {
        let dir = tempfile::tempdir().unwrap();
        let settings = test_settings(dir.path());
        let resolver = ReferenceResolver::new(&settings.path, false);
        let backend = ScriptBackend;
        let engine = Engine::new(&settings, &resolver, &backend);

        let job = job_of(&[("a.tp", "fine"), ("b.tp", "boom here"), ("c.tp", "fine")]);
        let result = engine.compile(3, &job).unwrap();
        assert_eq!(result.succeeded, 2);
        assert_eq!(result.failed, 1);
        let binary = String::from_utf8(result.binary).unwrap();
        assert!(binary.contains("a.tp"));
        assert!(!binary.contains("b.tp"));
        assert!(binary.contains("c.tp"));
        assert!(result.diagnostics.contains("b.tp"));
        assert!(result.diagnostics.contains("Line: 1"));
    }

    #[test]
    fn test_cw009_total_failure_is_result_not_error() {
        let dir = tempfile::tempdir().unwrap();
        let settings = test_settings(dir.path());
        let resolver = ReferenceResolver::new(&settings.path, false);
        let backend = ScriptBackend;
        let engine = Engine::new(&settings, &resolver, &backend);

        let job = job_of(&[("a.tp", "boom"), ("b.tp", "boom")]);
        let result = engine.compile(4, &job).unwrap();
        assert!(result.binary.is_empty());
        assert_eq!(result.succeeded, 0);
        assert_eq!(result.failed, 2);
        assert!(!result.diagnostics.is_empty());
    }

    #[test]
    fn test_cw009_ignored_code_never_excludes() {
        let dir = tempfile::tempdir().unwrap();
        let settings = test_settings(dir.path());
        let resolver = ReferenceResolver::new(&settings.path, false);
        let backend = ScriptBackend;
        let engine = Engine::new(&settings, &resolver, &backend);

        let job = job_of(&[("a.tp", "benign"), ("b.tp", "fine")]);
        let result = engine.compile(5, &job).unwrap();
        // No exclusion, no progress: terminal failure with both units intact
        assert!(result.binary.is_empty());
        assert_eq!(result.succeeded, 2);
        assert_eq!(result.failed, 0);
    }

    #[test]
    fn test_cw009_locationless_diagnostic_terminates() {
        let dir = tempfile::tempdir().unwrap();
        let settings = test_settings(dir.path());
        let resolver = ReferenceResolver::new(&settings.path, false);
        let backend = ScriptBackend;
        let engine = Engine::new(&settings, &resolver, &backend);

        let job = job_of(&[("a.tp", "global"), ("b.tp", "fine")]);
        let result = engine.compile(6, &job).unwrap();
        assert!(result.binary.is_empty());
        assert_eq!(result.failed, 0);
        assert_eq!(result.succeeded, 2);
    }

    #[test]
    fn test_cw009_decode_failure_excludes_up_front() {
        let dir = tempfile::tempdir().unwrap();
        let settings = test_settings(dir.path());
        let resolver = ReferenceResolver::new(&settings.path, false);
        let backend = ScriptBackend;
        let engine = Engine::new(&settings, &resolver, &backend);

        let job = CompileJob {
            source_files: vec![
                SourceUnit::new("good.tp", b"fine".to_vec()),
                SourceUnit::new("bad.tp", vec![0xFF, 0xFE, 0x00, 0xD8]),
            ],
            reference_files: vec![],
            options: JobOptions::default(),
        };
        let result = engine.compile(7, &job).unwrap();
        assert_eq!(result.succeeded, 1);
        assert_eq!(result.failed, 1);
        assert!(result.diagnostics.contains("ENC0001"));
        assert!(result.diagnostics.contains("bad.tp"));
    }

    #[test]
    fn test_cw009_unknown_encoding_is_invalid_job() {
        let dir = tempfile::tempdir().unwrap();
        let settings = test_settings(dir.path());
        let resolver = ReferenceResolver::new(&settings.path, false);
        let backend = ScriptBackend;
        let engine = Engine::new(&settings, &resolver, &backend);

        let mut job = job_of(&[("a.tp", "fine")]);
        job.options.encoding = "ebcdic".to_string();
        let err = engine.compile(8, &job).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidJob);
    }

    #[test]
    fn test_cw009_reference_set_order_and_replacement() {
        let dir = tempfile::tempdir().unwrap();
        let settings = test_settings(dir.path());
        std::fs::create_dir_all(&settings.path.libraries).unwrap();
        for name in STD_REFERENCES {
            std::fs::write(settings.path.libraries.join(name), b"std").unwrap();
        }
        let resolver = ReferenceResolver::new(&settings.path, false);
        let backend = CapturingBackend {
            seen: Mutex::new(Vec::new()),
        };
        let engine = Engine::new(&settings, &resolver, &backend);

        let mut job = job_of(&[("a.tp", "x")]);
        job.reference_files = vec![
            ReferenceUnit {
                name: "extra.rpk".to_string(),
                data: vec![1],
            },
            ReferenceUnit {
                name: "notes.txt".to_string(),
                data: vec![2],
            },
            ReferenceUnit {
                name: "Extra.rpk".to_string(),
                data: vec![3],
            },
        ];
        engine.compile(9, &job).unwrap();

        let seen = backend.seen.lock().unwrap().clone();
        // Std libs first in fixed order, then the job reference; the
        // case-colliding duplicate replaced the first, .txt was skipped
        assert_eq!(seen.len(), STD_REFERENCES.len() + 1);
        assert_eq!(&seen[..STD_REFERENCES.len()], STD_REFERENCES);
        assert_eq!(seen.last().unwrap(), "Extra.rpk");
    }

    #[test]
    fn test_cw009_reference_loaded_from_disk_when_data_empty() {
        let dir = tempfile::tempdir().unwrap();
        let settings = test_settings(dir.path());
        let resolver = ReferenceResolver::new(&settings.path, false);
        let backend = CapturingBackend {
            seen: Mutex::new(Vec::new()),
        };
        let engine = Engine::new(&settings, &resolver, &backend);

        let on_disk = dir.path().join("ondisk.rpk");
        std::fs::write(&on_disk, b"disk bytes").unwrap();

        let mut job = job_of(&[("a.tp", "x")]);
        job.options.use_standard_libraries = false;
        job.reference_files = vec![ReferenceUnit {
            name: on_disk.to_string_lossy().into_owned(),
            data: vec![],
        }];
        engine.compile(10, &job).unwrap();
        assert_eq!(*backend.seen.lock().unwrap(), vec!["ondisk.rpk"]);
    }

    #[test]
    fn test_cw009_textpack_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let settings = test_settings(dir.path());
        let resolver = ReferenceResolver::new(&settings.path, false);
        let backend = TextPackBackend::new();
        let engine = Engine::new(&settings, &resolver, &backend);

        let job = job_of(&[
            ("a.tp", "unit alpha\nemit one\n"),
            ("b.tp", "unit beta\nbroken directive\n"),
            ("c.tp", "unit gamma\nemit three\n"),
        ]);
        let result = engine.compile(11, &job).unwrap();
        assert_eq!(result.succeeded, 2);
        assert_eq!(result.failed, 1);
        let text = String::from_utf8_lossy(&result.binary).into_owned();
        assert!(text.contains("alpha"));
        assert!(!text.contains("beta"));
        assert!(text.contains("gamma"));
        assert!(result.diagnostics.contains("[TP0002]"));
        assert!(result.diagnostics.contains("b.tp"));
    }

    #[test]
    fn test_cw009_exclusions_logged_to_event_log() {
        let dir = tempfile::tempdir().unwrap();
        let settings = test_settings(dir.path());
        let resolver = ReferenceResolver::new(&settings.path, false);
        let backend = ScriptBackend;
        let engine = Engine::new(&settings, &resolver, &backend);

        let job = job_of(&[("bad.tp", "boom")]);
        engine.compile(12, &job).unwrap();

        let log = std::fs::read_to_string(settings.event_log_path()).unwrap();
        assert!(log.contains("unit_excluded"));
        assert!(log.contains("bad.tp"));
        assert!(log.contains("\"job\":12"));
    }

    proptest! {
        /// Accounting invariant: succeeded + failed always equals the number
        /// of submitted units, and the loop terminates, for any failure mix.
        #[test]
        fn test_cw009_prop_accounting(mask in proptest::collection::vec(any::<bool>(), 1..16)) {
            let dir = tempfile::tempdir().unwrap();
            let settings = test_settings(dir.path());
            let resolver = ReferenceResolver::new(&settings.path, false);
            let backend = ScriptBackend;
            let engine = Engine::new(&settings, &resolver, &backend);

            let sources: Vec<SourceUnit> = mask
                .iter()
                .enumerate()
                .map(|(i, fails)| {
                    let text = if *fails { "boom" } else { "fine" };
                    SourceUnit::new(format!("u{}.tp", i), text.as_bytes().to_vec())
                })
                .collect();
            let total = sources.len() as u32;
            let job = CompileJob { source_files: sources, reference_files: vec![], options: JobOptions::default() };

            let result = engine.compile(99, &job).unwrap();
            prop_assert_eq!(result.succeeded + result.failed, total);
            let all_fail = mask.iter().all(|b| *b);
            prop_assert_eq!(result.binary.is_empty(), all_fail);
            prop_assert_eq!(result.failed, mask.iter().filter(|b| **b).count() as u32);
        }
    }
}
