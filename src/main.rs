//! pktpull - pull packet dumps off the sniffer into a pcap file

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;

use pktpull::capture::PcapSink;
use pktpull::cli::Args;
use pktpull::log::PullJournal;
use pktpull::logger::{Logger, MultiLogger, TextLogger};
use pktpull::progress::PullProgress;
use pktpull::pull;

fn main() -> Result<()> {
    // Set up Ctrl-C handler
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupted by user. Exiting (Ctrl-C)...");
        // Exit immediately with 130 (128 + SIGINT)
        std::process::exit(130);
    })
    .context("Error setting Ctrl-C handler")?;

    let args = Args::parse();
    let cfg = args.resolve()?;

    let mut logger = MultiLogger::new();
    let progress = if args.quiet {
        None
    } else {
        let p = Arc::new(PullProgress::new(cfg.verbose));
        logger.push(p.clone());
        Some(p)
    };
    if let Some(ref path) = cfg.log_file {
        let text = TextLogger::new(path)
            .with_context(|| format!("open log file {}", path.display()))?;
        logger.push(Arc::new(text));
    }
    if let Some(ref path) = cfg.journal {
        logger.push(Arc::new(PullJournal::new(path, &cfg.address, cfg.revision)));
    }

    if progress.is_none() && !cfg.list_only {
        println!("Pulling from {} ({})", cfg.address, cfg.revision);
    }

    let mut sink = PcapSink::new(&cfg.output);
    let summary = match pull::run(&cfg, &mut sink, &logger) {
        Ok(s) => s,
        Err(e) => {
            // Dumps pulled before the failure are already committed
            drop(sink);
            if let Some(p) = &progress {
                p.finish_error(&format!("{:#}", e));
            }
            logger.error("run", &format!("{:#}", e));
            return Err(e);
        }
    };
    let written = sink.finish()?;

    if cfg.list_only && progress.is_none() {
        for e in &summary.listing {
            println!("{}\t{}", e.index, e.name);
        }
        return Ok(());
    }
    if summary.listing.is_empty() {
        println!("No packet dumps on the device");
    } else if written > 0 {
        println!(
            "{} files, {} frames -> {}",
            summary.pulled,
            written,
            cfg.output.display()
        );
    }
    if summary.failed > 0 {
        anyhow::bail!("{} file(s) failed", summary.failed);
    }
    Ok(())
}
