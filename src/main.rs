use anyhow::Result;
use clap::Parser;
use codemend::batch::BatchLimiter;
use codemend::client::{HttpGenerator, RepairClient, RetryPolicy};
use codemend::config::Config;
use codemend::diagnostics::DiagnosticCollector;
use codemend::runner::{RunContext, RunController};
use codemend::store::ErrorStore;
use codemend::view;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "codemend",
    about = "Runs the compiler over your workspace and asks an AI endpoint to fix the diagnostics it finds",
    version
)]
struct Args {
    /// Path to the project (defaults to current directory)
    #[arg(default_value = ".")]
    path: PathBuf,

    /// Explicit Cargo manifest instead of searching upward from the path
    #[arg(long)]
    manifest: Option<PathBuf>,

    /// Show full file paths instead of bare file names
    #[arg(long)]
    full_paths: bool,

    /// Print the resolution log as a tree and exit
    #[arg(long)]
    show_log: bool,

    /// Export the resolution log as Markdown ("-" or no value for stdout)
    #[arg(long, value_name = "FILE", num_args = 0..=1, default_missing_value = "-")]
    export: Option<PathBuf>,

    /// Clear the resolution log and exit
    #[arg(long)]
    clear_log: bool,

    /// Maximum diagnostics submitted per repair request
    #[arg(long)]
    max_diagnostics: Option<usize>,

    /// Retry cap for rate-limited repair calls
    #[arg(long)]
    max_retries: Option<u32>,

    /// Delay between repair requests, in milliseconds
    #[arg(long)]
    delay_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = Config::load();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.notifications.log_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    if let Some(n) = args.max_diagnostics {
        config.max_diagnostics_per_batch = n;
    }
    if let Some(n) = args.max_retries {
        config.max_retries = n;
    }
    if let Some(ms) = args.delay_ms {
        config.request_delay_ms = ms;
    }

    let root = args.path.canonicalize()?;
    let store = ErrorStore::for_workspace(&root);

    if args.clear_log {
        store.clear()?;
        println!("Resolution log cleared.");
        return Ok(());
    }

    if args.show_log {
        let mut renderer = view::StringRenderer::default();
        view::render(&view::build_tree(&store.read_all()), args.full_paths, &mut renderer);
        println!("{}", renderer.into_string());
        return Ok(());
    }

    if let Some(target) = args.export {
        let markdown = store.export_markdown(args.full_paths);
        if target == Path::new("-") {
            print!("{markdown}");
        } else {
            fs::write(&target, markdown)?;
            println!("Exported resolution log to {}", target.display());
        }
        return Ok(());
    }

    run_fix(&args, &config, &root, store).await
}

async fn run_fix(args: &Args, config: &Config, root: &Path, store: ErrorStore) -> Result<()> {
    let collector =
        DiagnosticCollector::new(root, args.manifest.clone(), config.ignored_dirs.clone());
    let program = collector.collect()?;
    if program.files.is_empty() {
        println!("No compiler errors found; nothing to repair.");
        return Ok(());
    }

    let generator = HttpGenerator::from_config(config)?;
    let client = RepairClient::new(generator, RetryPolicy::from_config(config));
    let limiter = BatchLimiter::new(config.max_diagnostics_per_batch, config.max_payload_chars);

    let mut ctx = RunContext::new(root);
    ctx.set_show_full_path(args.full_paths);

    // Ctrl-C requests a cooperative stop; the current file finishes first.
    let stop = ctx.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nStop requested; finishing the current file...");
            stop.store(true, Ordering::SeqCst);
        }
    });

    let mut controller = RunController::new(ctx, limiter, client, store);
    let summary = controller.run(program).await?;

    println!();
    println!(
        "Processed {} file(s): {} fixed, {} unfixed, {} skipped.",
        summary.files_processed, summary.files_fixed, summary.files_unfixed, summary.files_skipped
    );
    if summary.stopped {
        println!("Run stopped early on request.");
    }
    println!(
        "{} record(s) written to {}",
        summary.records_persisted,
        controller.store().path().display()
    );
    Ok(())
}
