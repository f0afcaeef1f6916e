//! CW-005: Reference resolver — alias normalization, probe tiers, cache.
//!
//! Maps a reference name to a loadable reference, probing the libraries
//! directory, then the framework/runtime directory, then the builtin table
//! registered at construction. Hits are cached for the process lifetime and
//! never evicted; reference sets are small and stable per process.

use crate::backend::MissingAssemblyResolver;
use crate::core::settings::DirectorySettings;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Well-known core library references added when a job sets
/// `use_standard_libraries`.
pub const STD_REFERENCES: &[&str] = &["core.rpk", "std.rpk", "collections.rpk", "runtime.rpk"];

/// Reference file extensions accepted from a job's reference units.
pub const REFERENCE_EXTENSIONS: &[&str] = &["rpk", "pack", "bin"];

/// A resolved, loadable reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedReference {
    /// Canonical file name (cache key source)
    pub name: String,

    /// On-disk origin, when resolved from a directory tier
    pub path: Option<PathBuf>,

    /// Reference bytes
    pub data: Vec<u8>,
}

impl ResolvedReference {
    /// Build a reference from in-memory bytes (job-shipped image).
    pub fn from_image(name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            path: None,
            data,
        }
    }
}

/// Process-wide resolver with an explicit lock around the cache.
pub struct ReferenceResolver {
    libraries: PathBuf,
    framework: PathBuf,
    builtin: HashMap<String, Vec<u8>>,
    cache: Mutex<HashMap<String, Arc<ResolvedReference>>>,
    probes: AtomicU64,
    debug: bool,
}

impl ReferenceResolver {
    pub fn new(dirs: &DirectorySettings, debug: bool) -> Self {
        Self {
            libraries: dirs.libraries.clone(),
            framework: dirs.framework.clone(),
            builtin: HashMap::new(),
            cache: Mutex::new(HashMap::new()),
            probes: AtomicU64::new(0),
            debug,
        }
    }

    /// Register an in-memory reference for the third probe tier. Keys are
    /// case-insensitive file names.
    pub fn with_builtin(mut self, name: &str, data: Vec<u8>) -> Self {
        self.builtin.insert(name.to_ascii_lowercase(), data);
        self
    }

    /// Resolve a reference name to a loadable handle.
    ///
    /// Returns None for empty input or when every tier misses; a miss is not
    /// fatal — the backend surfaces it as an unresolved-reference diagnostic.
    pub fn reference(&self, name: &str) -> Option<Arc<ResolvedReference>> {
        if name.trim().is_empty() {
            return None;
        }

        let file_name = normalize_name(name);
        let key = file_name.to_ascii_lowercase();

        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(hit) = cache.get(&key) {
            return Some(Arc::clone(hit));
        }

        let resolved = match self
            .probe_dir(&self.libraries, &file_name, "libraries")
            .or_else(|| self.probe_dir(&self.framework, &file_name, "framework"))
            .or_else(|| self.probe_builtin(&key, &file_name))
        {
            Some(r) => r,
            None => {
                if self.debug {
                    eprintln!("resolver: missing reference definition {}", file_name);
                }
                return None;
            }
        };

        let resolved = Arc::new(resolved);
        cache.insert(key, Arc::clone(&resolved));
        Some(resolved)
    }

    /// Filesystem probes performed so far (cache hits perform none).
    pub fn probe_count(&self) -> u64 {
        self.probes.load(Ordering::Relaxed)
    }

    fn probe_dir(&self, dir: &Path, file_name: &str, tier: &str) -> Option<ResolvedReference> {
        self.probes.fetch_add(1, Ordering::Relaxed);
        let path = dir.join(file_name);
        let data = std::fs::read(&path).ok()?;
        if self.debug {
            eprintln!(
                "resolver: found in {} directory: [size: {}] {}",
                tier,
                data.len(),
                file_name
            );
        }
        Some(ResolvedReference {
            name: file_name.to_string(),
            path: Some(path),
            data,
        })
    }

    fn probe_builtin(&self, key: &str, file_name: &str) -> Option<ResolvedReference> {
        let data = self.builtin.get(key)?;
        if self.debug {
            eprintln!(
                "resolver: found builtin reference: [size: {}] {}",
                data.len(),
                file_name
            );
        }
        Some(ResolvedReference::from_image(file_name, data.clone()))
    }
}

impl MissingAssemblyResolver for ReferenceResolver {
    fn resolve_missing(&self, display_name: &str) -> Option<Arc<ResolvedReference>> {
        self.reference(display_name)
    }
}

/// Normalize a reference name to its canonical file name: trim, apply
/// well-known aliases, append the default extension when missing.
pub fn normalize_name(name: &str) -> String {
    let trimmed = name.trim();
    let aliased = match trimmed.to_ascii_lowercase().as_str() {
        "corelib" => "core.rpk",
        "stdlib" => "std.rpk",
        _ => trimmed,
    };
    if Path::new(aliased).extension().is_some() {
        aliased.to_string()
    } else {
        format!("{}.rpk", aliased)
    }
}

/// True when a job reference unit's extension is a recognized binary
/// reference format.
pub fn is_reference_extension(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            REFERENCE_EXTENSIONS
                .iter()
                .any(|known| known.eq_ignore_ascii_case(e))
        })
        .unwrap_or(false)
}
