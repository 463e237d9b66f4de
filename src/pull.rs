//! Run driver: connect, list, select, then pull each dump into the sink.

use anyhow::{bail, Context, Result};
use std::net::TcpStream;
use std::time::Instant;

use crate::capture::FrameSink;
use crate::config::Config;
use crate::demux::{demux, FrameLayout};
use crate::logger::Logger;
use crate::net::{self, Session, Transport};
use crate::protocol::FileEntry;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PullSummary {
    /// Dumps the device announced on the first listing
    pub listing: Vec<FileEntry>,
    pub pulled: u64,
    pub failed: u64,
    pub frames: u64,
    pub bytes: u64,
}

/// Entries to pull, in listing order. Names the device doesn't list are
/// reported and dropped.
pub fn select(listing: &[FileEntry], wanted: &[String], logger: &dyn Logger) -> Vec<FileEntry> {
    if wanted.is_empty() {
        return listing.to_vec();
    }
    for name in wanted {
        if !listing.iter().any(|e| &e.name == name) {
            logger.error("select", &format!("{} is not on the device", name));
        }
    }
    listing
        .iter()
        .filter(|e| wanted.contains(&e.name))
        .cloned()
        .collect()
}

/// Request one dump, split it and append every frame to `sink`.
///
/// Nothing is appended unless the whole body demultiplexes cleanly, and the
/// sink commits once per dump. Returns `(frames, bytes)`.
pub fn pull_file<T: Transport>(
    session: &mut Session<T>,
    entry: &FileEntry,
    layout: FrameLayout,
    sink: &mut dyn FrameSink,
    logger: &dyn Logger,
) -> Result<(usize, usize)> {
    let buffer = session.request_file(entry, logger)?;
    let frames = demux(&buffer, layout).with_context(|| format!("demux {}", entry.name))?;
    for (record, frame) in frames.iter().enumerate() {
        sink.append_frame(frame)
            .with_context(|| format!("write frame {} of {}", record, entry.name))?;
        logger.frame(entry, record, frame.len());
    }
    sink.commit()
        .with_context(|| format!("commit frames of {}", entry.name))?;
    Ok((frames.len(), buffer.len()))
}

fn open_session(cfg: &Config, logger: &dyn Logger) -> Result<Session<TcpStream>> {
    let stream = net::connect(
        &cfg.address,
        cfg.connect_timeout(),
        cfg.connect_retries,
        logger,
    )?;
    logger.connected(&cfg.address);
    Ok(Session::new(stream, cfg.revision, cfg.session_timeouts()))
}

/// Pull from the device at `cfg.address`.
pub fn run(cfg: &Config, sink: &mut dyn FrameSink, logger: &dyn Logger) -> Result<PullSummary> {
    let mut connect = || open_session(cfg, logger);
    run_with(cfg, &mut connect, sink, logger)
}

/// `run` over any transport; `connect` opens a fresh session each call.
///
/// The counted server ends every transfer by closing the connection, so a
/// spent session is replaced and the listing handshake repeated before the
/// next request.
pub fn run_with<T: Transport>(
    cfg: &Config,
    connect: &mut dyn FnMut() -> Result<Session<T>>,
    sink: &mut dyn FrameSink,
    logger: &dyn Logger,
) -> Result<PullSummary> {
    let start = Instant::now();
    let mut session = connect()?;
    let listing = session.list_files(&cfg.marker, logger)?;
    let selected = select(&listing, &cfg.files, logger);
    let mut summary = PullSummary {
        listing,
        ..Default::default()
    };

    if cfg.list_only || selected.is_empty() {
        logger.done(0, 0, start.elapsed().as_secs_f64());
        return Ok(summary);
    }

    let layout = cfg.layout();
    for (n, wanted) in selected.iter().enumerate() {
        let entry = if session.is_closed() {
            session = connect()?;
            let fresh = session.list_files(&cfg.marker, logger)?;
            // Indices can shift between listings; names are stable
            match fresh.into_iter().find(|e| e.name == wanted.name) {
                Some(e) => e,
                None => {
                    logger.failed(wanted, "no longer listed");
                    summary.failed += 1;
                    if !cfg.keep_going {
                        bail!("{} disappeared from the device listing", wanted.name);
                    }
                    continue;
                }
            }
        } else {
            if n > 0 {
                session.drain_listing().context("drain listing")?;
            }
            wanted.clone()
        };

        match pull_file(&mut session, &entry, layout, sink, logger) {
            Ok((frames, bytes)) => {
                logger.pulled(&entry, frames, bytes);
                summary.pulled += 1;
                summary.frames += frames as u64;
                summary.bytes += bytes as u64;
            }
            Err(e) => {
                logger.failed(&entry, &format!("{:#}", e));
                summary.failed += 1;
                if !cfg.keep_going {
                    return Err(e);
                }
            }
        }
    }

    logger.done(summary.pulled, summary.frames, start.elapsed().as_secs_f64());
    Ok(summary)
}
