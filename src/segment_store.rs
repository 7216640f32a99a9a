//! Content-addressed blob store for `TimeSeriesData`: a hot in-process
//! map plus cold per-segment files. Oblivious to time semantics — the
//! index owns every range question, the store only owns bytes.
//!
//! Filenames follow `<SYMBOL>_<DATATYPE>_<start>_<end>.json`; atomic
//! writes follow `storage/meta.rs::write_meta`'s temp-file + rename.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use time::OffsetDateTime;

use crate::error::{Error, Result};
use crate::segment::{Segment, SegmentId};
use crate::types::{DataType, Instant, TimeSeriesData};

pub struct SegmentStore {
    dir: PathBuf,
    hot: HashMap<SegmentId, TimeSeriesData>,
}

impl SegmentStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            hot: HashMap::new(),
        })
    }

    /// Serializes `data` to a per-segment file, writes it atomically
    /// (temp + rename), and populates the hot map. Returns the relative
    /// filename to be recorded on the `Segment`.
    pub fn put_segment(
        &mut self,
        segment_id: &SegmentId,
        symbol: &str,
        data_type: DataType,
        t_start: Instant,
        t_end: Instant,
        data: TimeSeriesData,
    ) -> Result<String> {
        let file_name = segment_file_name(symbol, data_type, t_start, t_end);
        let final_path = self.dir.join(&file_name);
        let tmp_path = self.dir.join(format!("{file_name}.tmp"));

        let payload = serde_json::to_vec(&data)?;
        let checksum = crc32(&payload);
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)?;
        file.write_all(&checksum.to_le_bytes())?;
        file.write_all(&payload)?;
        file.sync_all()?;
        fs::rename(&tmp_path, &final_path)?;

        self.hot.insert(segment_id.clone(), data);
        Ok(file_name)
    }

    /// Returns the segment's data from the hot map if resident, otherwise
    /// deserializes it from disk and repopulates the hot map.
    pub fn get_segment(&mut self, segment: &Segment) -> Result<TimeSeriesData> {
        if let Some(data) = self.hot.get(&segment.id) {
            return Ok(data.clone());
        }

        let file_path = segment
            .file_path
            .as_ref()
            .ok_or_else(|| Error::SegmentDataMissing(segment.id.clone()))?;
        let full_path = self.dir.join(file_path);
        let bytes = match fs::read(&full_path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::SegmentDataMissing(segment.id.clone()))
            }
            Err(err) => return Err(err.into()),
        };
        if bytes.len() < 4 {
            return Err(Error::SegmentDataMissing(segment.id.clone()));
        }
        let (checksum_bytes, payload) = bytes.split_at(4);
        let expected = u32::from_le_bytes(checksum_bytes.try_into().expect("slice length"));
        if crc32(payload) != expected {
            return Err(Error::SegmentDataMissing(segment.id.clone()));
        }
        let data: TimeSeriesData = serde_json::from_slice(payload)?;
        self.hot.insert(segment.id.clone(), data.clone());
        Ok(data)
    }

    /// Removes a segment from both tiers. Tolerant of an already-absent
    /// file, since a partially completed delete must still be retriable.
    pub fn delete_segment(&mut self, segment: &Segment) -> Result<()> {
        self.hot.remove(&segment.id);
        if let Some(file_path) = &segment.file_path {
            let full_path = self.dir.join(file_path);
            match fs::remove_file(&full_path) {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    /// Drops the hot map and deletes every segment file in the cache
    /// directory (but leaves the directory itself, and non-segment files
    /// such as the index, untouched).
    pub fn clear(&mut self) -> Result<()> {
        self.hot.clear();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            let is_segment_file = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.ends_with(".json") && n != "cache_segments.json")
                .unwrap_or(false);
            if is_segment_file {
                fs::remove_file(&path)?;
            }
        }
        Ok(())
    }

    pub fn hot_segment_count(&self) -> usize {
        self.hot.len()
    }

    /// Rough in-memory footprint of the hot tier: the serialized size of
    /// each resident series, cheap enough to compute on every `stats()`
    /// call without tracking allocation sizes precisely.
    pub fn hot_bytes_est(&self) -> u64 {
        self.hot
            .values()
            .map(|d| serde_json::to_vec(d).map(|b| b.len() as u64).unwrap_or(0))
            .sum()
    }

    pub fn cold_stats(&self) -> Result<(usize, u64)> {
        let mut count = 0usize;
        let mut bytes = 0u64;
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            let is_segment_file = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.ends_with(".json") && n != "cache_segments.json")
                .unwrap_or(false);
            if is_segment_file {
                count += 1;
                bytes += entry.metadata()?.len();
            }
        }
        Ok((count, bytes))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

fn segment_file_name(symbol: &str, data_type: DataType, t_start: Instant, t_end: Instant) -> String {
    format!(
        "{symbol}_{data_type:?}_{}_{}.json",
        format_yyyymmdd(t_start),
        format_yyyymmdd(t_end)
    )
}

/// Framing checksum over a segment's serialized payload, stored as a
/// 4-byte little-endian prefix on disk so a partially written or
/// bit-rotted file surfaces as a missing segment instead of bad data.
fn crc32(payload: &[u8]) -> u32 {
    use crc32fast::Hasher;
    let mut hasher = Hasher::new();
    hasher.update(payload);
    hasher.finalize()
}

fn format_yyyymmdd(ms: Instant) -> String {
    let dt = OffsetDateTime::from_unix_timestamp(ms.div_euclid(1000))
        .unwrap_or(OffsetDateTime::UNIX_EPOCH);
    let date = dt.date();
    format!("{:04}{:02}{:02}", date.year(), date.month() as u8, date.day())
}
