//! Diagnostic collection
//!
//! Builds one compiler pass over the workspace (`cargo check` with JSON
//! messages) and groups the resulting diagnostics per source file, in source
//! walk order. A new collection always rebuilds the whole program; there is
//! no incremental mode.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use walkdir::WalkDir;

/// A compiler-reported issue at a specific location.
///
/// Immutable once produced. Diagnostics without a resolvable source position
/// are degenerate: line 0, column 0, empty content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub file: PathBuf,
    pub line: usize,
    pub column: usize,
    pub code: String,
    pub message: String,
    /// Surrounding source text sent along with the diagnostic.
    pub content: String,
}

impl Diagnostic {
    pub fn has_position(&self) -> bool {
        self.line >= 1 && self.column >= 1
    }
}

/// All diagnostics for one file, in compiler order.
#[derive(Debug, Clone)]
pub struct FileDiagnostics {
    pub file: PathBuf,
    pub diagnostics: Vec<Diagnostic>,
}

/// One finished compiler pass: per-file diagnostic groups in program order.
#[derive(Debug, Clone, Default)]
pub struct DiagnosticProgram {
    pub files: Vec<FileDiagnostics>,
}

impl DiagnosticProgram {
    pub fn total_diagnostics(&self) -> usize {
        self.files.iter().map(|f| f.diagnostics.len()).sum()
    }
}

/// Collects diagnostics for a project root.
pub struct DiagnosticCollector {
    root: PathBuf,
    manifest: Option<PathBuf>,
    ignored_dirs: Vec<String>,
}

impl DiagnosticCollector {
    pub fn new(root: &Path, manifest: Option<PathBuf>, ignored_dirs: Vec<String>) -> Self {
        Self {
            root: root.to_path_buf(),
            manifest,
            ignored_dirs,
        }
    }

    /// Run one compiler pass and group its diagnostics per file.
    ///
    /// Fails with [`Error::Config`] when no build configuration can be
    /// resolved; that is fatal for the run.
    pub fn collect(&self) -> Result<DiagnosticProgram> {
        let manifest = self.resolve_manifest()?;
        let project_dir = manifest
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());

        tracing::info!("checking {}", manifest.display());
        let stdout = run_cargo_check(&manifest)?;
        let raw = parse_message_stream(&stdout, &project_dir);

        Ok(self.group_by_file(raw))
    }

    /// Explicit manifest path if given, otherwise the nearest Cargo.toml at
    /// or above the project root.
    fn resolve_manifest(&self) -> Result<PathBuf> {
        if let Some(path) = &self.manifest {
            if path.is_file() {
                return Ok(path.clone());
            }
            return Err(Error::Config(path.clone()));
        }
        for dir in self.root.ancestors() {
            let candidate = dir.join("Cargo.toml");
            if candidate.is_file() {
                return Ok(candidate);
            }
        }
        Err(Error::Config(self.root.clone()))
    }

    /// Source files in walk order; this fixes the order files are repaired in.
    pub fn source_files(&self) -> Vec<PathBuf> {
        let mut files = Vec::new();
        for entry in WalkDir::new(&self.root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !self.should_ignore(e))
        {
            let entry = match entry {
                Ok(e) => e,
                Err(_) => continue,
            };
            if !entry.file_type().is_file() {
                continue;
            }
            if entry.path().extension().and_then(|e| e.to_str()) == Some("rs") {
                files.push(entry.path().to_path_buf());
            }
        }
        files
    }

    fn should_ignore(&self, entry: &walkdir::DirEntry) -> bool {
        entry
            .file_name()
            .to_str()
            .map(|name| self.ignored_dirs.iter().any(|d| d == name) || name.starts_with('.'))
            .unwrap_or(false)
    }

    fn path_is_ignored(&self, path: &Path) -> bool {
        path.components().any(|c| {
            c.as_os_str()
                .to_str()
                .map(|name| self.ignored_dirs.iter().any(|d| d == name))
                .unwrap_or(false)
        })
    }

    fn group_by_file(&self, raw: Vec<Diagnostic>) -> DiagnosticProgram {
        let mut by_file: HashMap<PathBuf, Vec<Diagnostic>> = HashMap::new();
        let mut seen_order: Vec<PathBuf> = Vec::new();

        for diag in raw {
            if self.path_is_ignored(&diag.file) {
                continue;
            }
            let entry = by_file.entry(diag.file.clone()).or_default();
            if entry.is_empty() {
                seen_order.push(diag.file.clone());
            }
            entry.push(diag);
        }

        // Walk order first, then any remaining files (e.g. generated code
        // outside the walked tree) in the order the compiler mentioned them.
        let mut ordered: Vec<PathBuf> = Vec::new();
        for file in self.source_files() {
            if by_file.contains_key(&file) {
                ordered.push(file);
            }
        }
        for file in seen_order {
            if !ordered.contains(&file) {
                ordered.push(file);
            }
        }

        let files = ordered
            .into_iter()
            .map(|file| {
                let mut diagnostics = by_file.remove(&file).unwrap_or_default();
                let content = fs::read_to_string(&file).unwrap_or_default();
                for diag in &mut diagnostics {
                    if diag.has_position() {
                        diag.content = content.clone();
                    }
                }
                FileDiagnostics { file, diagnostics }
            })
            .collect();

        DiagnosticProgram { files }
    }
}

fn run_cargo_check(manifest: &Path) -> Result<String> {
    // A non-zero exit just means the workspace has errors, which is the
    // whole point of the run.
    let output = Command::new("cargo")
        .arg("check")
        .arg("--quiet")
        .arg("--message-format=json")
        .arg("--manifest-path")
        .arg(manifest)
        .output()
        .map_err(|e| Error::Compiler(e.to_string()))?;
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

// Wire types for cargo's JSON message stream. Only the fields we read.
#[derive(Deserialize)]
struct CargoMessage {
    reason: String,
    target: Option<CargoTarget>,
    message: Option<RustcMessage>,
}

#[derive(Deserialize)]
struct CargoTarget {
    src_path: PathBuf,
}

#[derive(Deserialize)]
struct RustcMessage {
    level: String,
    message: String,
    code: Option<RustcCode>,
    #[serde(default)]
    spans: Vec<RustcSpan>,
}

#[derive(Deserialize)]
struct RustcCode {
    code: String,
}

#[derive(Deserialize)]
struct RustcSpan {
    file_name: PathBuf,
    line_start: usize,
    column_start: usize,
    is_primary: bool,
}

/// Parse cargo's line-delimited JSON output into diagnostics.
///
/// Content is filled in later, once per file. Span-less messages are
/// attributed to the emitting target's root source file as degenerate
/// records.
fn parse_message_stream(stdout: &str, project_dir: &Path) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();

    for line in stdout.lines() {
        let msg: CargoMessage = match serde_json::from_str(line) {
            Ok(m) => m,
            Err(_) => continue,
        };
        if msg.reason != "compiler-message" {
            continue;
        }
        let Some(rustc) = msg.message else { continue };
        if rustc.level != "error" {
            continue;
        }

        let code = rustc
            .code
            .map(|c| c.code)
            .unwrap_or_else(|| rustc.level.clone());

        match rustc.spans.iter().find(|s| s.is_primary) {
            Some(span) => {
                let file = if span.file_name.is_absolute() {
                    span.file_name.clone()
                } else {
                    project_dir.join(&span.file_name)
                };
                diagnostics.push(Diagnostic {
                    file,
                    line: span.line_start,
                    column: span.column_start,
                    code,
                    message: rustc.message,
                    content: String::new(),
                });
            }
            None => {
                let Some(target) = &msg.target else { continue };
                diagnostics.push(Diagnostic {
                    file: target.src_path.clone(),
                    line: 0,
                    column: 0,
                    code,
                    message: rustc.message,
                    content: String::new(),
                });
            }
        }
    }

    diagnostics
}
