//! Batch limiting
//!
//! Caps how much of a file's diagnostic list goes into a single repair
//! request: at most N diagnostics, and at most a fixed number of payload
//! characters. Files over the payload threshold are skipped, not truncated
//! further.

use crate::diagnostics::Diagnostic;
use std::path::Path;

/// The bounded subset of one file's diagnostics sent in a single request.
#[derive(Debug, Clone)]
pub struct Batch {
    pub diagnostics: Vec<Diagnostic>,
    /// Rendered prompt payload for the request body.
    pub payload: String,
}

/// Verdict from the limiter.
#[derive(Debug, Clone)]
pub enum BatchVerdict {
    Batch(Batch),
    /// Payload over the threshold. Soft skip: the file is logged and the run
    /// continues.
    Skip { payload_chars: usize },
}

#[derive(Debug, Clone, Copy)]
pub struct BatchLimiter {
    pub max_diagnostics: usize,
    pub max_payload_chars: usize,
}

impl Default for BatchLimiter {
    fn default() -> Self {
        Self {
            max_diagnostics: 5,
            max_payload_chars: 100_000,
        }
    }
}

impl BatchLimiter {
    pub fn new(max_diagnostics: usize, max_payload_chars: usize) -> Self {
        Self {
            max_diagnostics,
            max_payload_chars,
        }
    }

    /// Take the first N diagnostics and render them into one payload.
    pub fn build(&self, file: &Path, diagnostics: &[Diagnostic]) -> BatchVerdict {
        let limited: Vec<Diagnostic> = diagnostics
            .iter()
            .take(self.max_diagnostics)
            .cloned()
            .collect();

        let payload = render_payload(file, &limited);
        let payload_chars = payload.chars().count();
        if payload_chars > self.max_payload_chars {
            return BatchVerdict::Skip { payload_chars };
        }

        BatchVerdict::Batch(Batch {
            diagnostics: limited,
            payload,
        })
    }
}

fn render_payload(file: &Path, diagnostics: &[Diagnostic]) -> String {
    let error_text = diagnostics
        .iter()
        .map(|d| {
            format!(
                "{} at {}:{} - {}\nContext:\n{}",
                d.code, d.line, d.column, d.message, d.content
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    format!("File: {}\nErrors:\n{}", file.display(), error_text)
}
