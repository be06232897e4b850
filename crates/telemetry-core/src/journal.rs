//! Append-only record journal.
//!
//! The original tool's on-disk chunk format writes a header and an index
//! table that only become final once every snapshot's compressed size is
//! known, which means patching bytes at a fixed offset after the fact —
//! fine for a batch writer, fatal for a session that must keep appending
//! safely while a reader tails the same file. This format instead commits
//! each record independently: `[u32 length][bincode-encoded frame]`,
//! one after another, nothing to revisit once written. A reader can stop
//! at any prefix of the file and see only complete frames; a writer only
//! ever appends.
//!
//! Frames of a single journal are homogeneous (a process journal holds
//! only [`ProcessFrame`]s, a snapshot journal only [`SnapshotFrame`]s) —
//! callers pick the frame type via the generic parameter.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::{self, Read, Write};
use tracing::warn;

/// One process-record frame: a timestamp plus the process rows sampled at
/// that instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessFrame {
    pub timestamp: i64,
    pub processes: Vec<crate::model::ProcessInfo>,
}

/// One process-tree snapshot frame: a timestamp plus the preformatted text
/// dump of the tree at that instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotFrame {
    pub timestamp: i64,
    pub text: String,
}

/// Appends frames to a writer, one length-prefixed `bincode` blob at a
/// time. Safe to reopen an existing file in append mode and keep writing.
pub struct JournalWriter<W: Write> {
    inner: W,
}

impl<W: Write> JournalWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn append<T: Serialize>(&mut self, frame: &T) -> io::Result<()> {
        let bytes = bincode::serialize(frame)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let len = bytes.len() as u32;
        self.inner.write_all(&len.to_le_bytes())?;
        self.inner.write_all(&bytes)?;
        self.inner.flush()
    }
}

/// Outcome of reading one frame from a journal.
pub enum ReadOutcome<T> {
    Frame(T),
    /// A frame's bytes failed to decode; its length prefix was still
    /// trustworthy, so the stream resynced past it and reading can
    /// continue.
    CorruptFrameSkipped,
    /// The length prefix itself could not be trusted (truncated at EOF, or
    /// claims more bytes than remain) — nothing more can be read safely.
    Truncated,
    Eof,
}

/// Reads frames back out of a journal written by [`JournalWriter`].
pub struct JournalReader<R: Read> {
    inner: R,
}

impl<R: Read> JournalReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    pub fn read_one<T: DeserializeOwned>(&mut self) -> ReadOutcome<T> {
        let mut len_buf = [0u8; 4];
        match self.inner.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return ReadOutcome::Eof,
            Err(_) => return ReadOutcome::Truncated,
        }
        let len = u32::from_le_bytes(len_buf) as usize;

        let mut body = vec![0u8; len];
        if self.inner.read_exact(&mut body).is_err() {
            return ReadOutcome::Truncated;
        }

        match bincode::deserialize::<T>(&body) {
            Ok(frame) => ReadOutcome::Frame(frame),
            Err(e) => {
                warn!("skipping corrupt journal frame ({len} bytes): {e}");
                ReadOutcome::CorruptFrameSkipped
            }
        }
    }

    /// Reads every decodable frame, stopping (without error) at the first
    /// untrustworthy length prefix or clean EOF.
    pub fn read_all<T: DeserializeOwned>(&mut self) -> Vec<T> {
        let mut frames = Vec::new();
        loop {
            match self.read_one::<T>() {
                ReadOutcome::Frame(f) => frames.push(f),
                ReadOutcome::CorruptFrameSkipped => continue,
                ReadOutcome::Truncated | ReadOutcome::Eof => break,
            }
        }
        frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ProcessInfo;
    use std::io::Cursor;

    fn process_frame(ts: i64) -> ProcessFrame {
        ProcessFrame {
            timestamp: ts,
            processes: vec![ProcessInfo {
                pid: 42,
                name: "bash".to_string(),
                ucpu: 1.0,
                scpu: 0.5,
                mem: 4096,
            }],
        }
    }

    #[test]
    fn round_trips_multiple_frames() {
        let mut buf = Vec::new();
        {
            let mut w = JournalWriter::new(&mut buf);
            w.append(&process_frame(1)).unwrap();
            w.append(&process_frame(2)).unwrap();
        }

        let mut r = JournalReader::new(Cursor::new(buf));
        let frames: Vec<ProcessFrame> = r.read_all();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].timestamp, 1);
        assert_eq!(frames[1].timestamp, 2);
    }

    #[test]
    fn empty_journal_yields_no_frames() {
        let mut r = JournalReader::new(Cursor::new(Vec::new()));
        let frames: Vec<ProcessFrame> = r.read_all();
        assert!(frames.is_empty());
    }

    #[test]
    fn truncated_trailing_frame_is_dropped_not_erroring() {
        let mut buf = Vec::new();
        {
            let mut w = JournalWriter::new(&mut buf);
            w.append(&process_frame(1)).unwrap();
        }
        buf.extend_from_slice(&[5, 0, 0, 0]); // length prefix with no body following
        let mut r = JournalReader::new(Cursor::new(buf));
        let frames: Vec<ProcessFrame> = r.read_all();
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn corrupt_frame_body_is_skipped_and_reading_resumes() {
        let mut buf = Vec::new();
        {
            let mut w = JournalWriter::new(&mut buf);
            w.append(&process_frame(1)).unwrap();
        }
        // A frame whose length prefix is trustworthy but whose body is garbage.
        let garbage = vec![0xffu8; 6];
        buf.extend_from_slice(&(garbage.len() as u32).to_le_bytes());
        buf.extend_from_slice(&garbage);
        {
            let mut w = JournalWriter::new(&mut buf);
            w.append(&process_frame(2)).unwrap();
        }

        let mut r = JournalReader::new(Cursor::new(buf));
        let frames: Vec<ProcessFrame> = r.read_all();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].timestamp, 1);
        assert_eq!(frames[1].timestamp, 2);
    }

    #[test]
    fn snapshot_frames_round_trip_independently() {
        let mut buf = Vec::new();
        {
            let mut w = JournalWriter::new(&mut buf);
            w.append(&SnapshotFrame {
                timestamp: 10,
                text: "  PID PRIO\n".to_string(),
            })
            .unwrap();
        }
        let mut r = JournalReader::new(Cursor::new(buf));
        let frames: Vec<SnapshotFrame> = r.read_all();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].text, "  PID PRIO\n");
    }
}
