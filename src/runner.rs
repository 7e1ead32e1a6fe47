//! Run controller
//!
//! Drives the pipeline one file at a time: stop check → batch limit →
//! repair → apply → persist. Diagnostics for file *i* are fully resolved
//! before file *i+1* begins; a fatal repair failure abandons the remaining
//! queue.

use crate::batch::{BatchLimiter, BatchVerdict};
use crate::client::{RepairClient, TextGenerator};
use crate::diagnostics::DiagnosticProgram;
use crate::error::{Error, Result};
use crate::store::{ErrorStore, LOG_DIR};
use crate::{apply, store};
use fs2::FileExt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Process-wide run lifecycle flag. Mutated only by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    StopRequested,
}

/// Explicit context threaded through core calls instead of ambient globals.
#[derive(Debug, Clone)]
pub struct RunContext {
    root: PathBuf,
    stop: Arc<AtomicBool>,
    show_full_path: bool,
}

impl RunContext {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            stop: Arc::new(AtomicBool::new(false)),
            show_full_path: false,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Handle for signal handlers to request a cooperative stop.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    pub fn set_show_full_path(&mut self, show: bool) {
        self.show_full_path = show;
    }

    pub fn show_full_path(&self) -> bool {
        self.show_full_path
    }
}

/// What a finished (or stopped) run looked like.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub files_processed: usize,
    pub files_fixed: usize,
    pub files_unfixed: usize,
    pub files_skipped: usize,
    pub records_persisted: usize,
    pub stopped: bool,
}

pub struct RunController<G> {
    ctx: RunContext,
    limiter: BatchLimiter,
    client: RepairClient<G>,
    store: ErrorStore,
    state: RunState,
}

impl<G: TextGenerator> RunController<G> {
    pub fn new(
        ctx: RunContext,
        limiter: BatchLimiter,
        client: RepairClient<G>,
        store: ErrorStore,
    ) -> Self {
        Self {
            ctx,
            limiter,
            client,
            store,
            state: RunState::Idle,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    pub fn store(&self) -> &ErrorStore {
        &self.store
    }

    /// Process every file group in program order.
    ///
    /// Completed files keep their persisted outcome whether the run finishes,
    /// stops cooperatively, or aborts on a fatal repair failure.
    pub async fn run(&mut self, program: DiagnosticProgram) -> Result<RunSummary> {
        let _lock = self.acquire_workspace_lock()?;
        self.state = RunState::Running;
        let mut summary = RunSummary::default();

        tracing::info!(
            "starting repair run: {} file(s), {} diagnostic(s)",
            program.files.len(),
            program.total_diagnostics()
        );

        for group in &program.files {
            if self.ctx.stop_requested() {
                self.state = RunState::StopRequested;
                summary.stopped = true;
                tracing::info!(
                    "stop requested; {} file(s) left unprocessed",
                    program.files.len() - summary.files_processed - summary.files_skipped
                );
                break;
            }
            if group.diagnostics.is_empty() {
                continue;
            }

            let shown_path = store::display_path(&group.file, self.ctx.show_full_path);
            let batch = match self.limiter.build(&group.file, &group.diagnostics) {
                BatchVerdict::Batch(batch) => batch,
                BatchVerdict::Skip { payload_chars } => {
                    tracing::warn!(
                        "skipping {shown_path}: payload too large ({payload_chars} chars)"
                    );
                    summary.files_skipped += 1;
                    continue;
                }
            };

            tracing::info!(
                "sending {shown_path} ({} diagnostic(s)) for repair",
                batch.diagnostics.len()
            );
            let outcome = match self.client.repair(&group.file, &batch).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    // Fail fast: anything non-recoverable abandons the queue.
                    tracing::error!("abandoning run: {err}");
                    self.state = RunState::Idle;
                    return Err(err);
                }
            };

            let applied = apply::apply(&group.file, &batch, &outcome.result)?;
            for record in &applied.records {
                match self.store.append(record) {
                    Ok(()) => summary.records_persisted += 1,
                    Err(err) => {
                        tracing::warn!("failed to persist record for {shown_path}: {err}");
                    }
                }
            }

            summary.files_processed += 1;
            if applied.fixed {
                summary.files_fixed += 1;
            } else {
                summary.files_unfixed += 1;
            }
        }

        self.state = RunState::Idle;
        tracing::info!(
            "run finished: {} processed, {} fixed, {} unfixed, {} skipped",
            summary.files_processed,
            summary.files_fixed,
            summary.files_unfixed,
            summary.files_skipped
        );
        Ok(summary)
    }

    /// One active run per workspace: advisory lock next to the log file.
    /// Released when the returned handle drops.
    fn acquire_workspace_lock(&self) -> Result<fs::File> {
        let dir = self.ctx.root.join(LOG_DIR);
        fs::create_dir_all(&dir)?;
        let lock_file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .open(dir.join(".lock"))?;
        lock_file.try_lock_exclusive().map_err(|_| Error::Locked)?;
        Ok(lock_file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::RetryPolicy;
    use crate::diagnostics::{Diagnostic, FileDiagnostics};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Plays back scripted replies; optionally requests a stop after each
    /// call, so the next file observes the flag.
    struct ScriptedGenerator {
        script: Mutex<VecDeque<std::result::Result<String, String>>>,
        calls: Mutex<u32>,
        stop_after_call: Option<Arc<AtomicBool>>,
    }

    impl ScriptedGenerator {
        fn new(script: Vec<std::result::Result<String, String>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: Mutex::new(0),
                stop_after_call: None,
            }
        }

        fn stopping_after_call(mut self, stop: Arc<AtomicBool>) -> Self {
            self.stop_after_call = Some(stop);
            self
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    impl TextGenerator for ScriptedGenerator {
        async fn generate(&self, _prompt: &str) -> anyhow::Result<String> {
            *self.calls.lock().unwrap() += 1;
            if let Some(stop) = &self.stop_after_call {
                stop.store(true, Ordering::SeqCst);
            }
            match self.script.lock().unwrap().pop_front() {
                Some(Ok(text)) => Ok(text),
                Some(Err(msg)) => Err(anyhow::anyhow!(msg)),
                None => Err(anyhow::anyhow!("script exhausted")),
            }
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            backoff_base: Duration::from_millis(1),
            request_delay: Duration::from_millis(0),
            retry_all_failures: false,
        }
    }

    fn workspace_with_files(contents: &[(&str, &str)]) -> (TempDir, DiagnosticProgram) {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        fs::create_dir_all(&src).unwrap();

        let files = contents
            .iter()
            .map(|(name, content)| {
                let path = src.join(name);
                fs::write(&path, content).unwrap();
                FileDiagnostics {
                    file: path.clone(),
                    diagnostics: vec![Diagnostic {
                        file: path,
                        line: 1,
                        column: 1,
                        code: "E0308".into(),
                        message: "mismatched types".into(),
                        content: content.to_string(),
                    }],
                }
            })
            .collect();

        (tmp, DiagnosticProgram { files })
    }

    fn controller(
        root: &Path,
        generator: ScriptedGenerator,
        limiter: BatchLimiter,
    ) -> RunController<ScriptedGenerator> {
        RunController::new(
            RunContext::new(root),
            limiter,
            RepairClient::new(generator, fast_policy()),
            ErrorStore::for_workspace(root),
        )
    }

    #[tokio::test]
    async fn test_two_file_scenario_fixed_then_unfixed() {
        let (tmp, program) = workspace_with_files(&[("a.rs", "fn a( {"), ("b.rs", "fn b( {")]);
        let generator = ScriptedGenerator::new(vec![
            Ok(r#"{"updatedCode":"fn a() {}"}"#.into()),
            Ok(r#"{"explanation":"no safe fix"}"#.into()),
        ]);
        let mut controller = controller(tmp.path(), generator, BatchLimiter::default());

        let summary = controller.run(program).await.unwrap();

        assert_eq!(summary.files_processed, 2);
        assert_eq!(summary.files_fixed, 1);
        assert_eq!(summary.files_unfixed, 1);
        assert!(!summary.stopped);
        assert_eq!(controller.state(), RunState::Idle);

        // File A rewritten, file B untouched.
        assert_eq!(
            fs::read_to_string(tmp.path().join("src/a.rs")).unwrap(),
            "fn a() {}"
        );
        assert_eq!(
            fs::read_to_string(tmp.path().join("src/b.rs")).unwrap(),
            "fn b( {"
        );

        // Exactly two records, in file order, fixed then unfixed.
        let records = controller.store().read_all();
        assert_eq!(records.len(), 2);
        assert!(records[0].diagnostic.file.ends_with("a.rs"));
        assert!(records[0].fixed);
        assert!(records[1].diagnostic.file.ends_with("b.rs"));
        assert!(!records[1].fixed);

        // Export renders one bullet per record, in the same order.
        let md = controller.store().export_markdown(false);
        let bullets: Vec<&str> = md.lines().filter(|l| l.starts_with("- ")).collect();
        assert_eq!(bullets.len(), 2);
        assert!(bullets[0].contains("a.rs") && bullets[0].contains("(Fixed)"));
        assert!(bullets[1].contains("b.rs") && bullets[1].contains("(Unfixed)"));
    }

    #[tokio::test]
    async fn test_stop_between_files_skips_the_rest() {
        let (tmp, program) = workspace_with_files(&[("a.rs", "fn a( {"), ("b.rs", "fn b( {")]);
        let ctx = RunContext::new(tmp.path());
        let generator = ScriptedGenerator::new(vec![Ok(r#"{"updatedCode":"fn a() {}"}"#.into())])
            .stopping_after_call(ctx.stop_handle());
        let mut controller = RunController::new(
            ctx,
            BatchLimiter::default(),
            RepairClient::new(generator, fast_policy()),
            ErrorStore::for_workspace(tmp.path()),
        );

        let summary = controller.run(program).await.unwrap();

        assert!(summary.stopped);
        assert_eq!(summary.files_processed, 1);
        // File B was never submitted; file A's outcome is already persisted.
        assert_eq!(controller.store().read_all().len(), 1);
        assert_eq!(
            fs::read_to_string(tmp.path().join("src/b.rs")).unwrap(),
            "fn b( {"
        );
    }

    #[tokio::test]
    async fn test_stop_before_start_processes_nothing() {
        let (tmp, program) = workspace_with_files(&[("a.rs", "fn a( {")]);
        let ctx = RunContext::new(tmp.path());
        ctx.request_stop();
        let generator = ScriptedGenerator::new(vec![]);
        let mut controller = RunController::new(
            ctx,
            BatchLimiter::default(),
            RepairClient::new(generator, fast_policy()),
            ErrorStore::for_workspace(tmp.path()),
        );

        let summary = controller.run(program).await.unwrap();

        assert!(summary.stopped);
        assert_eq!(summary.files_processed, 0);
        assert!(controller.store().read_all().is_empty());
    }

    #[tokio::test]
    async fn test_fatal_failure_abandons_remaining_queue() {
        let (tmp, program) = workspace_with_files(&[("a.rs", "fn a( {"), ("b.rs", "fn b( {")]);
        let generator = ScriptedGenerator::new(vec![Err("API error 500: boom".into())]);
        let mut controller = controller(tmp.path(), generator, BatchLimiter::default());

        let err = controller.run(program).await.unwrap_err();

        assert!(matches!(err, Error::Repair { .. }));
        assert_eq!(controller.state(), RunState::Idle);
        // Only one submission happened; nothing was persisted or written.
        assert_eq!(controller.client.generator().calls(), 1);
        assert!(controller.store().read_all().is_empty());
    }

    #[tokio::test]
    async fn test_oversized_file_is_skipped_not_submitted() {
        let big = "x".repeat(400);
        let (tmp, program) = workspace_with_files(&[("big.rs", &big), ("ok.rs", "fn o( {")]);
        let generator = ScriptedGenerator::new(vec![Ok(r#"{"updatedCode":"fn o() {}"}"#.into())]);
        let mut controller = controller(tmp.path(), generator, BatchLimiter::new(5, 200));

        let summary = controller.run(program).await.unwrap();

        assert_eq!(summary.files_skipped, 1);
        assert_eq!(summary.files_processed, 1);
        assert_eq!(controller.client.generator().calls(), 1);
        // Skipped file left untouched and unrecorded.
        assert_eq!(fs::read_to_string(tmp.path().join("src/big.rs")).unwrap(), big);
        assert_eq!(controller.store().read_all().len(), 1);
    }

    #[tokio::test]
    async fn test_second_run_rejected_while_lock_held() {
        let (tmp, program) = workspace_with_files(&[("a.rs", "fn a( {")]);
        let lock_dir = tmp.path().join(LOG_DIR);
        fs::create_dir_all(&lock_dir).unwrap();
        let held = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .open(lock_dir.join(".lock"))
            .unwrap();
        held.lock_exclusive().unwrap();

        let generator = ScriptedGenerator::new(vec![]);
        let mut controller = controller(tmp.path(), generator, BatchLimiter::default());
        let err = controller.run(program).await.unwrap_err();
        assert!(matches!(err, Error::Locked));
    }
}
