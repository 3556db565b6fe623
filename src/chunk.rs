//! Size-bounded part files.
//!
//! Records are buffered until the running "joined length" reaches the
//! threshold, then written out as one part with its own header row.

use camino::Utf8PathBuf;
use csv::WriterBuilder;
use tracing::debug;

use crate::domain::PartNaming;
use crate::error::HarvestError;
use crate::store::Store;

/// A part file that has been written and persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenPart {
    pub index: usize,
    pub path: Utf8PathBuf,
    pub records: usize,
    pub joined_len: u64,
}

pub struct ChunkedWriter {
    dir: Utf8PathBuf,
    naming: PartNaming,
    headers: Vec<String>,
    threshold: u64,
    buffer: Vec<Vec<String>>,
    accumulated: u64,
    next_index: usize,
}

impl ChunkedWriter {
    pub fn new(dir: Utf8PathBuf, naming: PartNaming, headers: Vec<String>, threshold: u64) -> Self {
        Self {
            dir,
            naming,
            headers,
            threshold,
            buffer: Vec::new(),
            accumulated: 0,
            next_index: 1,
        }
    }

    /// Buffers one record, flushing a part once the threshold is reached.
    pub fn push(&mut self, record: Vec<String>) -> Result<Option<WrittenPart>, HarvestError> {
        self.accumulated += joined_len(&record);
        self.buffer.push(record);
        if self.accumulated >= self.threshold {
            return self.flush().map(Some);
        }
        Ok(None)
    }

    /// Writes whatever is still buffered as the final part.
    pub fn finish(mut self) -> Result<Option<WrittenPart>, HarvestError> {
        if self.buffer.is_empty() {
            return Ok(None);
        }
        self.flush().map(Some)
    }

    fn flush(&mut self) -> Result<WrittenPart, HarvestError> {
        let index = self.next_index;
        let path = self.dir.join(self.naming.part_file_name(index));

        let temp = Store::temp_file_for(&path)?;
        let mut writer = WriterBuilder::new().from_writer(temp);
        writer
            .write_record(&self.headers)
            .map_err(|err| HarvestError::Csv(err.to_string()))?;
        for record in &self.buffer {
            writer
                .write_record(record)
                .map_err(|err| HarvestError::Csv(err.to_string()))?;
        }
        let temp = writer
            .into_inner()
            .map_err(|err| HarvestError::Csv(err.to_string()))?;
        Store::persist(temp, &path)?;

        let part = WrittenPart {
            index,
            path,
            records: self.buffer.len(),
            joined_len: self.accumulated,
        };
        debug!(
            part = %part.path,
            records = part.records,
            joined_len = part.joined_len,
            "wrote part"
        );

        self.next_index += 1;
        self.buffer.clear();
        self.accumulated = 0;
        Ok(part)
    }
}

/// Character length of the record's values joined with commas.
///
/// This approximates serialized size: quoting, line terminators and the header
/// row are not counted.
pub fn joined_len(record: &[String]) -> u64 {
    let chars: usize = record.iter().map(|value| value.chars().count()).sum();
    (chars + record.len().saturating_sub(1)) as u64
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn record(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn joined_len_counts_chars_and_commas() {
        assert_eq!(joined_len(&record(&["1", "abc", ""])), 6);
        assert_eq!(joined_len(&record(&["é"])), 1);
        assert_eq!(joined_len(&[]), 0);
    }

    #[test]
    fn flushes_when_threshold_reached() {
        let temp = tempfile::tempdir().unwrap();
        let dir = Utf8PathBuf::from_path_buf(temp.path().join("csv")).unwrap();
        let naming = PartNaming::from_file_stem("ds_dataSet");
        let mut writer = ChunkedWriter::new(dir.clone(), naming, record(&["a", "b"]), 6);

        // "1,2" is 3 chars, so every second record closes a part.
        assert!(writer.push(record(&["1", "2"])).unwrap().is_none());
        assert!(!dir.as_std_path().exists());
        let first = writer.push(record(&["3", "4"])).unwrap().unwrap();
        assert_eq!(first.index, 1);
        assert_eq!(first.records, 2);
        assert_eq!(first.joined_len, 6);
        assert!(writer.push(record(&["5", "6"])).unwrap().is_none());
        let last = writer.finish().unwrap().unwrap();
        assert_eq!(last.index, 2);
        assert_eq!(last.records, 1);

        let content = fs::read_to_string(first.path.as_std_path()).unwrap();
        assert_eq!(content, "a,b\n1,2\n3,4\n");
        assert!(last.path.ends_with("ds_dataSet_part_2.csv"));
    }

    #[test]
    fn finish_without_records_writes_nothing() {
        let temp = tempfile::tempdir().unwrap();
        let dir = Utf8PathBuf::from_path_buf(temp.path().join("csv")).unwrap();
        let writer = ChunkedWriter::new(
            dir.clone(),
            PartNaming::from_file_stem("ds_dataSet"),
            record(&["a"]),
            10,
        );
        assert!(writer.finish().unwrap().is_none());
        assert!(!dir.as_std_path().exists());
    }
}
