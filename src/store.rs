//! Resolution log persistence
//!
//! Append-only JSON-array log of [`ResolvedDiagnostic`] records at
//! `<workspace>/.codemend/errors.json`. The log is the single source of
//! truth for fixed status; reads never fail, a corrupt file is treated as
//! empty, and writes go through a full read-modify-write of the list.

use crate::apply::ResolvedDiagnostic;
use std::fs;
use std::path::{Path, PathBuf};

pub const LOG_DIR: &str = ".codemend";
const LOG_FILE: &str = "errors.json";

pub struct ErrorStore {
    path: PathBuf,
}

impl ErrorStore {
    /// Store rooted in the workspace's log directory (created on demand).
    pub fn for_workspace(root: &Path) -> Self {
        Self {
            path: root.join(LOG_DIR).join(LOG_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory holding the log; also used for the workspace run lock.
    pub fn log_dir(&self) -> Option<&Path> {
        self.path.parent()
    }

    /// Append one record and persist the full list.
    pub fn append(&self, record: &ResolvedDiagnostic) -> std::io::Result<()> {
        let mut records = self.read_all();
        records.push(record.clone());
        self.write_records(&records)
    }

    /// Reset the log to an empty list.
    pub fn clear(&self) -> std::io::Result<()> {
        self.write_records(&[])
    }

    /// All records in append order. Missing, empty, or corrupt backing file
    /// yields an empty list; it never fails.
    pub fn read_all(&self) -> Vec<ResolvedDiagnostic> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(_) => return Vec::new(),
        };
        if raw.trim().is_empty() {
            return Vec::new();
        }
        match serde_json::from_str(&raw) {
            Ok(records) => records,
            Err(err) => {
                tracing::warn!(
                    "resolution log at {} is corrupt ({}); treating as empty",
                    self.path.display(),
                    err
                );
                Vec::new()
            }
        }
    }

    /// Render the current log as a Markdown report, one bullet per record.
    pub fn export_markdown(&self, show_full_path: bool) -> String {
        let records = self.read_all();
        let mut out = String::from("# Diagnostic resolution log\n\n");
        if records.is_empty() {
            out.push_str("No recorded diagnostics.\n");
            return out;
        }
        for record in &records {
            let d = &record.diagnostic;
            let path = display_path(&d.file, show_full_path);
            out.push_str(&format!(
                "- {}:{}:{} {} {} ({})\n",
                path,
                d.line,
                d.column,
                d.code,
                d.message,
                if record.fixed { "Fixed" } else { "Unfixed" }
            ));
        }
        out
    }

    fn write_records(&self, records: &[ResolvedDiagnostic]) -> std::io::Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        let content = serde_json::to_string_pretty(records)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        fs::write(&self.path, content)
    }
}

/// Full path or bare file name, per the display toggle.
pub fn display_path(path: &Path, show_full_path: bool) -> String {
    if show_full_path {
        path.display().to_string()
    } else {
        path.file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string())
    }
}
