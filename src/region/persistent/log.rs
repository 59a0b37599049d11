//! Append-only region log.
//!
//! # File Format
//! ```text
//! [MAGIC: 4 bytes][VERSION: 1 byte]
//! [RECORD 1: codec frame]
//! [RECORD 2: codec frame]
//! ...
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Result as IoResult, Seek, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::geofence::{Geofence, GeofenceId};

use super::codec;

/// One logged mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionRecord {
    /// Monotonically increasing sequence number.
    pub sequence: u64,
    /// When the record was written.
    pub timestamp: DateTime<Utc>,
    /// The mutation.
    pub kind: RegionRecordKind,
}

/// Region mutations.
#[allow(missing_docs)]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RegionRecordKind {
    /// Insert or replace.
    Put { geofence: Geofence },
    /// Removal.
    Delete { geofence_id: GeofenceId },
}

/// Append-only log of region mutations. Not internally synchronized.
#[derive(Debug)]
pub struct RegionLog {
    path: PathBuf,
    writer: BufWriter<File>,
    /// Bytes of fully written frames, header included.
    committed_len: u64,
    sequence: u64,
    sync_on_write: bool,
}

impl RegionLog {
    /// Opens or creates the log and returns it with every valid record.
    ///
    /// Replay stops at the first torn or corrupt frame; the file is truncated
    /// back to the last valid frame so new appends are readable.
    pub fn open(path: &Path, sync_on_write: bool) -> IoResult<(Self, Vec<RegionRecord>)> {
        let exists = path.exists() && fs::metadata(path)?.len() >= codec::HEADER_LEN;

        let (records, valid_len) = if exists {
            replay(path)?
        } else {
            let mut file = File::create(path)?;
            codec::write_header(&mut file)?;
            if sync_on_write {
                file.sync_all()?;
            }
            (Vec::new(), codec::HEADER_LEN)
        };

        let file = OpenOptions::new().write(true).open(path)?;
        if file.metadata()?.len() > valid_len {
            warn!(path = %path.display(), valid_len, "truncating torn region log tail");
            file.set_len(valid_len)?;
        }
        drop(file);

        let file = OpenOptions::new().append(true).open(path)?;
        let sequence = records.last().map_or(0, |r| r.sequence);

        Ok((
            Self {
                path: path.to_path_buf(),
                writer: BufWriter::new(file),
                committed_len: valid_len,
                sequence,
                sync_on_write,
            },
            records,
        ))
    }

    /// Appends one mutation, returning its sequence number.
    ///
    /// A failed write is rolled back to the last complete frame, so later
    /// appends stay readable on replay.
    pub fn append(&mut self, kind: RegionRecordKind) -> IoResult<u64> {
        let candidate = self.sequence + 1;
        let record = RegionRecord {
            sequence: candidate,
            timestamp: Utc::now(),
            kind,
        };

        let encoded = codec::encode(&record)?;
        if let Err(e) = self.write_frame(&encoded) {
            if let Err(rollback) = self.discard_uncommitted() {
                warn!(
                    path = %self.path.display(),
                    error = %rollback,
                    "region log rollback failed"
                );
            }
            return Err(e);
        }

        self.committed_len += encoded.len() as u64;
        self.sequence = candidate;
        Ok(candidate)
    }

    fn write_frame(&mut self, encoded: &[u8]) -> IoResult<()> {
        self.writer.write_all(encoded)?;
        self.writer.flush()?;
        if self.sync_on_write {
            self.writer.get_ref().sync_all()?;
        }
        Ok(())
    }

    /// Drops buffered bytes and truncates the file to the committed length.
    fn discard_uncommitted(&mut self) -> IoResult<()> {
        let fresh = BufWriter::new(OpenOptions::new().append(true).open(&self.path)?);
        // `into_parts` hands back the buffer without flushing it.
        let (_, _unwritten) = std::mem::replace(&mut self.writer, fresh).into_parts();
        OpenOptions::new().write(true).open(&self.path)?.set_len(self.committed_len)?;
        warn!(
            path = %self.path.display(),
            committed_len = self.committed_len,
            "partial region log frame discarded"
        );
        Ok(())
    }

    /// Rewrites the log so it holds exactly one `Put` per live region.
    ///
    /// Writes to a sibling temp file and renames it over the log.
    pub fn compact<'a>(&mut self, live: impl IntoIterator<Item = &'a Geofence>) -> IoResult<()> {
        self.writer.flush()?;

        let tmp_path = self.path.with_extension("compact");
        let mut sequence = 0;
        let mut written = codec::HEADER_LEN;
        {
            let mut tmp = BufWriter::new(File::create(&tmp_path)?);
            codec::write_header(&mut tmp)?;
            for geofence in live {
                sequence += 1;
                let record = RegionRecord {
                    sequence,
                    timestamp: Utc::now(),
                    kind: RegionRecordKind::Put {
                        geofence: geofence.clone(),
                    },
                };
                let encoded = codec::encode(&record)?;
                tmp.write_all(&encoded)?;
                written += encoded.len() as u64;
            }
            tmp.flush()?;
            tmp.get_ref().sync_all()?;
        }

        fs::rename(&tmp_path, &self.path)?;
        let file = OpenOptions::new().append(true).open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.committed_len = written;
        self.sequence = sequence;
        Ok(())
    }

    /// Last sequence number written.
    #[must_use]
    pub const fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Log size in bytes.
    pub fn size_bytes(&self) -> IoResult<u64> {
        Ok(fs::metadata(&self.path)?.len())
    }
}

/// Reads every valid record and the byte length of the valid prefix.
fn replay(path: &Path) -> IoResult<(Vec<RegionRecord>, u64)> {
    let file = File::open(path)?;
    let file_size = file.metadata()?.len();
    let mut reader = BufReader::new(file);
    codec::read_header(&mut reader)?;

    let mut records = Vec::new();
    let mut valid_len = reader.stream_position()?;

    while valid_len < file_size {
        match codec::decode::<RegionRecord>(&mut reader) {
            Ok(record) => {
                records.push(record);
                valid_len = reader.stream_position()?;
            }
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                warn!(path = %path.display(), offset = valid_len, "torn record at end of region log");
                break;
            }
            Err(e) => {
                warn!(
                    path = %path.display(),
                    offset = valid_len,
                    error = %e,
                    "corrupt region log record; replay stops here"
                );
                break;
            }
        }
    }

    Ok((records, valid_len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    use crate::geo::LatLng;

    fn put(id: &str) -> RegionRecordKind {
        RegionRecordKind::Put {
            geofence: Geofence::circle(id, LatLng::new(0.0, 0.0), 50.0),
        }
    }

    #[test]
    fn test_append_and_replay() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("regions.log");

        {
            let (mut log, records) = RegionLog::open(&path, false).unwrap();
            assert!(records.is_empty());
            log.append(put("a")).unwrap();
            log.append(RegionRecordKind::Delete {
                geofence_id: "a".into(),
            })
            .unwrap();
            assert_eq!(log.sequence(), 2);
        }

        let (log, records) = RegionLog::open(&path, false).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].sequence, 1);
        assert!(matches!(records[1].kind, RegionRecordKind::Delete { .. }));
        assert_eq!(log.sequence(), 2);
    }

    #[test]
    fn test_torn_tail_is_dropped_and_truncated() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("regions.log");
        {
            let (mut log, _) = RegionLog::open(&path, true).unwrap();
            log.append(put("a")).unwrap();
            log.append(put("b")).unwrap();
        }

        let size = fs::metadata(&path).unwrap().len();
        OpenOptions::new().write(true).open(&path).unwrap().set_len(size - 3).unwrap();

        let (mut log, records) = RegionLog::open(&path, false).unwrap();
        assert_eq!(records.len(), 1);
        log.append(put("c")).unwrap();
        drop(log);

        let (_, records) = RegionLog::open(&path, false).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].sequence, 2);
    }

    #[test]
    fn test_partial_frame_is_rolled_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("regions.log");
        let (mut log, _) = RegionLog::open(&path, false).unwrap();
        log.append(put("a")).unwrap();
        let good = log.size_bytes().unwrap();

        // Half a frame reaches the file, then the write fails.
        let frame = codec::encode(&RegionRecord {
            sequence: 2,
            timestamp: Utc::now(),
            kind: put("lost"),
        })
        .unwrap();
        log.writer.write_all(&frame[..frame.len() / 2]).unwrap();
        log.writer.flush().unwrap();
        assert!(log.size_bytes().unwrap() > good);
        log.discard_uncommitted().unwrap();
        assert_eq!(log.size_bytes().unwrap(), good);

        log.append(put("b")).unwrap();
        log.append(put("c")).unwrap();
        drop(log);

        let (log, records) = RegionLog::open(&path, false).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(log.sequence(), 3);
        assert!(matches!(
            &records[2].kind,
            RegionRecordKind::Put { geofence } if geofence.geofence_id.as_str() == "c"
        ));
    }

    #[test]
    fn test_compact_keeps_only_live_regions() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("regions.log");
        let (mut log, _) = RegionLog::open(&path, false).unwrap();
        for i in 0..10 {
            log.append(put(&format!("r{i}"))).unwrap();
        }
        let before = log.size_bytes().unwrap();

        let live = vec![Geofence::circle("r9", LatLng::new(0.0, 0.0), 50.0)];
        log.compact(live.iter()).unwrap();
        assert!(log.size_bytes().unwrap() < before);
        assert_eq!(log.sequence(), 1);
        drop(log);

        let (_, records) = RegionLog::open(&path, false).unwrap();
        assert_eq!(records.len(), 1);
    }
}
