//! Result application
//!
//! Turns a repair result into disk state and resolution records: one
//! whole-file overwrite when replacement code came back, and one
//! [`ResolvedDiagnostic`] per submitted diagnostic either way.

use crate::batch::Batch;
use crate::client::{RepairReply, RepairResult};
use crate::diagnostics::Diagnostic;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// A diagnostic plus the outcome of its repair attempt. Appended to the
/// workspace log, never mutated in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedDiagnostic {
    #[serde(flatten)]
    pub diagnostic: Diagnostic,
    pub fixed: bool,
    /// RFC-3339 UTC timestamp of the repair attempt.
    pub timestamp: String,
}

/// Outcome of applying one batch.
#[derive(Debug, Clone)]
pub struct AppliedBatch {
    pub fixed: bool,
    pub records: Vec<ResolvedDiagnostic>,
}

/// Apply a repair result for one file's batch.
///
/// `updatedCode` present: the file is overwritten in full (no line-level
/// patching) and every batch diagnostic is recorded fixed. Absent, or the
/// reply unparseable: nothing is written and the batch is recorded unfixed.
pub fn apply(file: &Path, batch: &Batch, result: &RepairResult) -> std::io::Result<AppliedBatch> {
    let reply = match result {
        RepairResult::Reply(reply) => reply,
        RepairResult::ParseFailed { .. } => {
            return Ok(resolve_batch(batch, false));
        }
    };

    log_reported_errors(file, reply);

    match &reply.updated_code {
        Some(code) => {
            fs::write(file, code)?;
            tracing::info!("updated file: {}", file.display());
            Ok(resolve_batch(batch, true))
        }
        None => {
            tracing::warn!("no update for: {}", file.display());
            Ok(resolve_batch(batch, false))
        }
    }
}

/// A non-empty `errors` list in the reply is a warning, not a failed batch.
fn log_reported_errors(file: &Path, reply: &RepairReply) {
    if reply.errors.is_empty() {
        return;
    }
    let rendered = serde_json::to_string(&reply.errors).unwrap_or_default();
    tracing::warn!(
        "repair service reported issues for {}: {}",
        file.display(),
        rendered
    );
}

fn resolve_batch(batch: &Batch, fixed: bool) -> AppliedBatch {
    let timestamp = Utc::now().to_rfc3339();
    let records = batch
        .diagnostics
        .iter()
        .map(|diagnostic| ResolvedDiagnostic {
            diagnostic: diagnostic.clone(),
            fixed,
            timestamp: timestamp.clone(),
        })
        .collect();
    AppliedBatch { fixed, records }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn batch_for(file: &Path, count: usize) -> Batch {
        let diagnostics = (1..=count)
            .map(|n| Diagnostic {
                file: file.to_path_buf(),
                line: n,
                column: 1,
                code: "E0308".into(),
                message: format!("error {n}"),
                content: "old".into(),
            })
            .collect();
        Batch {
            diagnostics,
            payload: String::new(),
        }
    }

    #[test]
    fn test_updated_code_overwrites_whole_file() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("lib.rs");
        fs::write(&file, "fn broken( {").unwrap();

        let run_start = Utc::now();
        let result = RepairResult::Reply(RepairReply {
            updated_code: Some("fn fixed() {}".into()),
            explanation: None,
            errors: Vec::new(),
        });
        let applied = apply(&file, &batch_for(&file, 2), &result).unwrap();

        assert_eq!(fs::read_to_string(&file).unwrap(), "fn fixed() {}");
        assert!(applied.fixed);
        assert_eq!(applied.records.len(), 2);
        for record in &applied.records {
            assert!(record.fixed);
            let ts = DateTime::parse_from_rfc3339(&record.timestamp).unwrap();
            assert!(ts >= run_start);
        }
    }

    #[test]
    fn test_no_updated_code_never_writes() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("lib.rs");
        fs::write(&file, "original").unwrap();

        let result = RepairResult::Reply(RepairReply {
            updated_code: None,
            explanation: Some("nothing safe to do".into()),
            errors: vec![serde_json::json!("left one issue")],
        });
        let applied = apply(&file, &batch_for(&file, 1), &result).unwrap();

        assert_eq!(fs::read_to_string(&file).unwrap(), "original");
        assert!(!applied.fixed);
        assert!(applied.records.iter().all(|r| !r.fixed));
    }

    #[test]
    fn test_parse_failure_marks_batch_unfixed() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("lib.rs");
        fs::write(&file, "original").unwrap();

        let result = RepairResult::ParseFailed {
            preview: "not json".into(),
        };
        let applied = apply(&file, &batch_for(&file, 3), &result).unwrap();

        assert_eq!(fs::read_to_string(&file).unwrap(), "original");
        assert_eq!(applied.records.len(), 3);
        assert!(applied.records.iter().all(|r| !r.fixed));
    }

    #[test]
    fn test_record_round_trips_flat_json() {
        let record = ResolvedDiagnostic {
            diagnostic: Diagnostic {
                file: PathBuf::from("src/lib.rs"),
                line: 3,
                column: 7,
                code: "E0308".into(),
                message: "mismatched types".into(),
                content: "fn main() {}".into(),
            },
            fixed: true,
            timestamp: "2026-08-23T10:00:00+00:00".into(),
        };
        let json = serde_json::to_value(&record).unwrap();
        // Flat layout, matching the on-disk log format.
        assert_eq!(json["file"], "src/lib.rs");
        assert_eq!(json["line"], 3);
        assert_eq!(json["fixed"], true);

        let back: ResolvedDiagnostic = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }
}
