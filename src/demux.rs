//! Frame demultiplexer for packet-dump bodies.
//!
//! A dump body is a fixed-size table of little-endian `u16` lengths followed
//! by the frames it describes, back to back:
//!
//! ```text
//! ┌────────┬────────┬─────┬────────┬─────────┬─────────┬─────┐
//! │ len 0  │ len 1  │ ... │ len N-1│ frame 0 │ frame 1 │ ... │
//! │ u16 LE │ u16 LE │     │ u16 LE │ len 0 B │ len 1 B │     │
//! └────────┴────────┴─────┴────────┴─────────┴─────────┴─────┘
//! ```
//!
//! The newest firmware counts a fixed trailer in every length; it is
//! stripped from the slice but still advances the offset.

use crate::error::{PullError, Result};
use crate::protocol::Revision;

/// Shape of one dump body.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameLayout {
    pub record_count: usize,
    pub header_size: usize,
    pub trailer_trim: usize,
}

impl FrameLayout {
    pub fn new(record_count: usize, trailer_trim: usize) -> Self {
        Self {
            record_count,
            header_size: record_count * 2,
            trailer_trim,
        }
    }

    pub fn for_revision(revision: Revision) -> Self {
        Self::new(revision.record_count(), revision.trailer_trim())
    }

    pub fn with_trailer_trim(mut self, trailer_trim: usize) -> Self {
        self.trailer_trim = trailer_trim;
        self
    }
}

/// Decode the length table at the head of `buffer`.
pub fn length_table(buffer: &[u8], layout: FrameLayout) -> Result<Vec<usize>> {
    let table_len = layout.record_count * 2;
    if buffer.len() < table_len {
        return Err(PullError::TruncatedTransfer {
            needed: table_len,
            available: buffer.len(),
        });
    }
    Ok(buffer[..table_len]
        .chunks_exact(2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]) as usize)
        .collect())
}

/// Slice `buffer` into exactly `layout.record_count` frames.
///
/// Fails with `TruncatedTransfer` when the declared lengths run past the end
/// of the buffer instead of handing back a short frame.
pub fn demux(buffer: &[u8], layout: FrameLayout) -> Result<Vec<&[u8]>> {
    let lengths = length_table(buffer, layout)?;
    let needed = layout.header_size + lengths.iter().sum::<usize>();
    if needed > buffer.len() {
        return Err(PullError::TruncatedTransfer {
            needed,
            available: buffer.len(),
        });
    }

    let mut frames = Vec::with_capacity(layout.record_count);
    let mut offset = layout.header_size;
    for (record, &len) in lengths.iter().enumerate() {
        // An empty slot stays empty whatever the trailer
        let body = if len == 0 {
            0
        } else if len < layout.trailer_trim {
            return Err(PullError::RecordShorterThanTrailer {
                record,
                len,
                trailer: layout.trailer_trim,
            });
        } else {
            len - layout.trailer_trim
        };
        frames.push(&buffer[offset..offset + body]);
        offset += len;
    }
    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Length table + payloads, the way the device writes a dump.
    fn make_dump(payloads: &[&[u8]]) -> Vec<u8> {
        let mut buf = Vec::new();
        for p in payloads {
            buf.extend_from_slice(&(p.len() as u16).to_le_bytes());
        }
        for p in payloads {
            buf.extend_from_slice(p);
        }
        buf
    }

    fn offset_of(buffer: &[u8], frame: &[u8]) -> usize {
        frame.as_ptr() as usize - buffer.as_ptr() as usize
    }

    #[test]
    fn test_six_record_scenario() {
        let mut buf = vec![4, 0, 3, 0, 5, 0, 0, 0, 0, 0, 0, 0];
        buf.extend(1..=12u8);

        let frames = demux(&buf, FrameLayout::for_revision(Revision::V2)).unwrap();

        let lens: Vec<usize> = frames.iter().map(|f| f.len()).collect();
        assert_eq!(lens, vec![4, 3, 5, 0, 0, 0]);
        let offsets: Vec<usize> = frames.iter().map(|f| offset_of(&buf, f)).collect();
        assert_eq!(offsets, vec![12, 16, 19, 24, 24, 24]);
        assert_eq!(frames[0], &[1, 2, 3, 4]);
        assert_eq!(frames[2], &[8, 9, 10, 11, 12]);
    }

    #[test]
    fn test_recovers_payloads_four_records() {
        let payloads: [&[u8]; 4] = [b"beacon", b"probe-req", b"", b"auth"];
        let buf = make_dump(&payloads);

        let layout = FrameLayout::for_revision(Revision::V1);
        assert_eq!(layout.header_size, 8);
        let frames = demux(&buf, layout).unwrap();

        assert_eq!(frames, payloads.to_vec());
    }

    #[test]
    fn test_frames_contiguous_from_header() {
        let payloads: [&[u8]; 6] = [b"a", b"bb", b"ccc", b"dddd", b"", b"ffffff"];
        let buf = make_dump(&payloads);
        let frames = demux(&buf, FrameLayout::new(6, 0)).unwrap();

        let mut expected = 12;
        for f in &frames {
            assert_eq!(offset_of(&buf, f), expected);
            expected += f.len();
        }
        assert_eq!(expected, buf.len());
    }

    #[test]
    fn test_trailer_trimmed_but_offsets_advance() {
        let payloads: [&[u8]; 6] = [
            b"eapol-1\xde\xad\xbe\xef",
            b"eapol-2\x01\x02\x03\x04",
            b"",
            b"\x00\x00\x00\x00",
            b"m4FCS!",
            b"",
        ];
        let buf = make_dump(&payloads);

        let frames = demux(&buf, FrameLayout::for_revision(Revision::V3)).unwrap();

        assert_eq!(frames[0], b"eapol-1");
        assert_eq!(frames[1], b"eapol-2");
        assert!(frames[2].is_empty());
        assert!(frames[3].is_empty());
        assert_eq!(frames[4], b"m4");
        assert!(frames[5].is_empty());
    }

    #[test]
    fn test_trailing_bytes_ignored() {
        let mut buf = make_dump(&[b"x", b"y", b"z", b"w"]);
        buf.extend_from_slice(b"leftover listing text\n");
        let frames = demux(&buf, FrameLayout::new(4, 0)).unwrap();
        assert_eq!(frames[3], b"w");
    }

    #[test]
    fn test_truncated_payload_is_error() {
        let mut buf = make_dump(&[b"abcd", b"efgh", b"ijkl", b"mnop"]);
        buf.truncate(buf.len() - 1);

        let err = demux(&buf, FrameLayout::new(4, 0)).unwrap_err();
        assert_eq!(
            err,
            PullError::TruncatedTransfer {
                needed: 24,
                available: 23
            }
        );
    }

    #[test]
    fn test_truncated_length_table_is_error() {
        let err = demux(&[1, 0, 2], FrameLayout::new(6, 0)).unwrap_err();
        assert!(matches!(err, PullError::TruncatedTransfer { needed: 12, .. }));
        assert!(demux(&[], FrameLayout::new(4, 0)).is_err());
    }

    #[test]
    fn test_length_shorter_than_trailer() {
        let buf = make_dump(&[b"frame+fcs", b"ab", b"", b"", b"", b""]);
        let err = demux(&buf, FrameLayout::new(6, 4)).unwrap_err();
        assert_eq!(
            err,
            PullError::RecordShorterThanTrailer {
                record: 1,
                len: 2,
                trailer: 4
            }
        );
    }

    #[test]
    fn test_trailer_override() {
        let layout = FrameLayout::for_revision(Revision::V3).with_trailer_trim(0);
        let buf = make_dump(&[b"abcd", b"", b"", b"", b"", b""]);
        assert_eq!(demux(&buf, layout).unwrap()[0], b"abcd");
    }
}
