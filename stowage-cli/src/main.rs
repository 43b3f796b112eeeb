mod cli;
mod config;
mod error;
mod input;
mod logging;
mod output;

use std::process;
use std::sync::Arc;

use clap::Parser;
use stowage_engine::{BatchRunner, BatchSummary, CancellationToken, TitleAssembler};
use tracing::{error, info, warn};

use crate::{cli::Args, error::Result};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    match run(args).await {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            error!("Application error: {}", e);
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}

/// Returns whether every title ended `Done`.
async fn run(args: Args) -> Result<bool> {
    let _log_guard = logging::init_logging(args.verbose, args.quiet, args.log_dir.as_deref())?;

    let mut config = config::load(args.config.as_deref())?;
    args.apply_overrides(&mut config);
    let ids = input::collect_ids(&args.ids, args.ids_file.as_deref())?;

    info!(
        titles = ids.len(),
        output = %config.output_dir.display(),
        exclude_vp9 = config.exclude_vp9,
        "Starting stowage"
    );
    let assembler = Arc::new(TitleAssembler::from_config(config)?);

    let token = CancellationToken::new();
    tokio::spawn({
        let token = token.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Stop requested, waiting for transfers in flight");
                token.cancel();
            }
        }
    });

    let progress = output::progress_bar(ids.len(), args.quiet || args.json);
    let runner = BatchRunner::new(assembler);
    let reports = runner
        .run(ids, &token, |report| {
            progress.inc(1);
            progress.set_message(report.id.clone());
            if !args.json {
                progress.suspend(|| println!("{report}"));
            }
        })
        .await;
    progress.finish_and_clear();

    let summary = BatchSummary::from_reports(&reports);
    if args.json {
        println!("{}", output::render_json(&reports, &summary)?);
    } else {
        println!("{}", output::summary_line(&summary));
    }

    Ok(summary.all_done())
}
