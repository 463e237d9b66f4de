//! Capture container output.
//!
//! Frames pulled from the device are raw 802.11 MAC frames; they land in a
//! classic pcap file with link type IEEE 802.11 so Wireshark and the usual
//! handshake crackers can read them directly.

use anyhow::{bail, Context, Result};
use pcap_file::pcap::{PcapHeader, PcapPacket, PcapReader, PcapWriter};
use pcap_file::{DataLink, Endianness, TsResolution};
use std::fs::File;
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tempfile::NamedTempFile;

/// Where demultiplexed frames go.
pub trait FrameSink {
    /// Append one raw link-layer frame.
    fn append_frame(&mut self, frame: &[u8]) -> Result<()>;

    /// Make every frame appended so far durable. Called once per complete dump.
    fn commit(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Collects frames in memory.
impl FrameSink for Vec<Vec<u8>> {
    fn append_frame(&mut self, frame: &[u8]) -> Result<()> {
        self.push(frame.to_vec());
        Ok(())
    }
}

pub(crate) fn capture_header() -> PcapHeader {
    PcapHeader {
        version_major: 2,
        version_minor: 4,
        ts_correction: 0,
        ts_accuracy: 0,
        snaplen: 65535,
        datalink: DataLink::IEEE802_11,
        ts_resolution: TsResolution::MicroSecond,
        endianness: Endianness::Little,
    }
}

type Writer = PcapWriter<BufWriter<NamedTempFile>>;

/// Appends frames to a pcap file, creating it on the first frame.
///
/// Frames are staged in a temporary file next to the container and `commit`
/// moves the staged copy into place. A run killed between commits keeps
/// every dump committed before it; uncommitted frames never reach the
/// container.
pub struct PcapSink {
    path: PathBuf,
    writer: Option<Writer>,
    committed: usize,
    pending: usize,
}

impl PcapSink {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            writer: None,
            committed: 0,
            pending: 0,
        }
    }

    fn open(&self) -> Result<Writer> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).ok();
        let tmp = NamedTempFile::new_in(&dir)
            .with_context(|| format!("create staging file in {}", dir.display()))?;
        let out = BufWriter::new(tmp);

        let existing = match File::open(&self.path) {
            Ok(f) => {
                if f.metadata()?.len() > 0 {
                    Some(f)
                } else {
                    None
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => {
                return Err(e).with_context(|| format!("open {}", self.path.display()))
            }
        };

        let Some(f) = existing else {
            return PcapWriter::with_header(out, capture_header())
                .with_context(|| format!("write pcap header for {}", self.path.display()));
        };

        // Carry the existing records over, keeping their header
        let mut reader = PcapReader::new(BufReader::new(f))
            .with_context(|| format!("{} is not a pcap file", self.path.display()))?;
        let header = reader.header();
        if header.datalink != DataLink::IEEE802_11 {
            bail!(
                "{} has link type {:?}, expected IEEE 802.11",
                self.path.display(),
                header.datalink
            );
        }
        let mut writer = PcapWriter::with_header(out, header)?;
        while let Some(packet) = reader.next_packet() {
            let packet = packet.with_context(|| format!("read {}", self.path.display()))?;
            writer.write_packet(&packet)?;
        }
        Ok(writer)
    }

    /// Commit anything still staged. Returns frames this sink committed.
    pub fn finish(mut self) -> Result<usize> {
        self.commit()?;
        Ok(self.committed)
    }
}

impl FrameSink for PcapSink {
    fn append_frame(&mut self, frame: &[u8]) -> Result<()> {
        if self.writer.is_none() {
            self.writer = Some(self.open()?);
        }
        let timestamp = SystemTime::now().duration_since(UNIX_EPOCH)?;
        let packet = PcapPacket {
            timestamp,
            orig_len: frame.len() as u32,
            data: frame.into(),
        };
        if let Some(writer) = self.writer.as_mut() {
            writer.write_packet(&packet)?;
        }
        self.pending += 1;
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        let Some(writer) = self.writer.take() else {
            return Ok(());
        };
        let tmp = writer
            .into_writer()
            .into_inner()
            .map_err(|e| e.into_error())
            .context("flush capture")?;
        tmp.persist(&self.path)
            .with_context(|| format!("write {}", self.path.display()))?;
        self.committed += self.pending;
        self.pending = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_frames(path: &Path) -> (PcapHeader, Vec<Vec<u8>>) {
        let mut reader = PcapReader::new(File::open(path).unwrap()).unwrap();
        let header = reader.header();
        let mut frames = Vec::new();
        while let Some(p) = reader.next_packet() {
            frames.push(p.unwrap().data.into_owned());
        }
        (header, frames)
    }

    #[test]
    fn test_creates_container_on_first_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/handshake.pcap");

        let mut sink = PcapSink::new(&path);
        sink.append_frame(b"\x88\x02beacon").unwrap();
        sink.append_frame(b"").unwrap();
        assert!(!path.exists());
        assert_eq!(sink.finish().unwrap(), 2);

        let (header, frames) = read_frames(&path);
        assert_eq!(header.datalink, DataLink::IEEE802_11);
        assert_eq!(frames, vec![b"\x88\x02beacon".to_vec(), Vec::new()]);
    }

    #[test]
    fn test_appends_to_existing_container() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.pcap");

        let mut first = PcapSink::new(&path);
        first.append_frame(b"one").unwrap();
        first.append_frame(b"two").unwrap();
        first.finish().unwrap();

        let mut second = PcapSink::new(&path);
        second.append_frame(b"three").unwrap();
        assert_eq!(second.finish().unwrap(), 1);

        let (_, frames) = read_frames(&path);
        assert_eq!(
            frames,
            vec![b"one".to_vec(), b"two".to_vec(), b"three".to_vec()]
        );
    }

    #[test]
    fn test_no_frames_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.pcap");
        let sink = PcapSink::new(&path);
        assert_eq!(sink.finish().unwrap(), 0);
        assert!(!path.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_dropped_sink_keeps_original() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.pcap");
        let mut first = PcapSink::new(&path);
        first.append_frame(b"kept").unwrap();
        first.finish().unwrap();

        let mut abandoned = PcapSink::new(&path);
        abandoned.append_frame(b"lost").unwrap();
        drop(abandoned);

        let (_, frames) = read_frames(&path);
        assert_eq!(frames, vec![b"kept".to_vec()]);
    }

    #[test]
    fn test_committed_frames_survive_abrupt_exit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.pcap");

        let mut sink = PcapSink::new(&path);
        for f in [b"f1", b"f2", b"f3"] {
            sink.append_frame(f).unwrap();
        }
        sink.commit().unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
        sink.append_frame(b"f4").unwrap();
        // process::exit runs no destructors
        std::mem::forget(sink);

        let (_, frames) = read_frames(&path);
        assert_eq!(frames, vec![b"f1".to_vec(), b"f2".to_vec(), b"f3".to_vec()]);
    }

    #[test]
    fn test_commits_accumulate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.pcap");

        let mut sink = PcapSink::new(&path);
        sink.append_frame(b"a").unwrap();
        sink.commit().unwrap();
        sink.commit().unwrap();
        sink.append_frame(b"b").unwrap();
        sink.append_frame(b"c").unwrap();
        sink.commit().unwrap();
        sink.append_frame(b"d").unwrap();
        assert_eq!(sink.finish().unwrap(), 4);

        let (_, frames) = read_frames(&path);
        assert_eq!(frames.len(), 4);
        assert_eq!(frames[3], b"d".to_vec());
    }

    #[test]
    fn test_rejects_other_link_type() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("eth.pcap");
        let header = PcapHeader {
            datalink: DataLink::ETHERNET,
            ..capture_header()
        };
        let w = PcapWriter::with_header(File::create(&path).unwrap(), header).unwrap();
        drop(w);

        let mut sink = PcapSink::new(&path);
        let err = sink.append_frame(b"x").unwrap_err();
        assert!(err.to_string().contains("link type"));
    }

    #[test]
    fn test_vec_sink_collects() {
        let mut sink: Vec<Vec<u8>> = Vec::new();
        sink.append_frame(b"ab").unwrap();
        assert_eq!(sink, vec![b"ab".to_vec()]);
    }
}
