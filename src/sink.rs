//! Record sinks.
//!
//! The ingestion core hands decoded COPY rows to a [`RecordSink`]; the sink
//! owns all serialization and persistence. The core notifies the sink at
//! block start (table name, column names), once per decoded row, and at
//! block end (row count).

use ahash::AHashMap;
use serde_json::{Map, Value};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;

pub const SINK_BUFFER_SIZE: usize = 256 * 1024;
pub const ROW_FLUSH_COUNT: usize = 1000;

pub trait RecordSink {
    fn begin_table(&mut self, table: &str, columns: &[String]) -> std::io::Result<()>;

    /// One decoded row, values paired positionally with the columns given to
    /// `begin_table`. `None` is an explicit null.
    fn write_row(&mut self, row: &[Option<String>]) -> std::io::Result<()>;

    fn end_table(&mut self, table: &str, rows: u64) -> std::io::Result<()>;
}

struct TableWriter {
    writer: BufWriter<File>,
    write_count: usize,
}

impl TableWriter {
    fn new(path: PathBuf) -> std::io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            writer: BufWriter::with_capacity(SINK_BUFFER_SIZE, file),
            write_count: 0,
        })
    }

    fn write_line(&mut self, line: &[u8]) -> std::io::Result<()> {
        self.writer.write_all(line)?;
        self.writer.write_all(b"\n")?;

        self.write_count += 1;
        if self.write_count >= ROW_FLUSH_COUNT {
            self.write_count = 0;
            self.writer.flush()?;
        }

        Ok(())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.write_count = 0;
        self.writer.flush()
    }
}

/// Writes one NDJSON file per table under an output directory: each row
/// becomes one JSON object mapping column name to string value or null.
/// Writers are created lazily and pooled, so repeated COPY blocks for the
/// same table append to the same file.
pub struct JsonSinkPool {
    output_dir: PathBuf,
    writers: AHashMap<String, TableWriter>,
    current: Option<(String, Vec<String>)>,
}

impl JsonSinkPool {
    pub fn new(output_dir: PathBuf) -> Self {
        Self {
            output_dir,
            writers: AHashMap::new(),
            current: None,
        }
    }

    pub fn ensure_output_dir(&self) -> std::io::Result<()> {
        fs::create_dir_all(&self.output_dir)
    }

    fn get_writer(&mut self, table: &str) -> std::io::Result<&mut TableWriter> {
        use std::collections::hash_map::Entry;

        match self.writers.entry(table.to_string()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let path = self.output_dir.join(format!("{}.ndjson", table));
                Ok(entry.insert(TableWriter::new(path)?))
            }
        }
    }

    pub fn close_all(&mut self) -> std::io::Result<()> {
        for writer in self.writers.values_mut() {
            writer.flush()?;
        }
        Ok(())
    }
}

impl RecordSink for JsonSinkPool {
    fn begin_table(&mut self, table: &str, columns: &[String]) -> std::io::Result<()> {
        self.get_writer(table)?;
        self.current = Some((table.to_string(), columns.to_vec()));
        Ok(())
    }

    fn write_row(&mut self, row: &[Option<String>]) -> std::io::Result<()> {
        let (table, columns) = self.current.clone().ok_or_else(|| {
            std::io::Error::other("row emitted outside of a COPY block")
        })?;

        let mut object = Map::with_capacity(columns.len());
        for (name, value) in columns.iter().zip(row.iter()) {
            let value = match value {
                Some(text) => Value::String(text.clone()),
                None => Value::Null,
            };
            object.insert(name.clone(), value);
        }

        let line = serde_json::to_vec(&Value::Object(object))?;
        self.get_writer(&table)?.write_line(&line)
    }

    fn end_table(&mut self, _table: &str, _rows: u64) -> std::io::Result<()> {
        self.current = None;
        Ok(())
    }
}

/// Counts rows without writing anything. Used for dry runs.
#[derive(Default)]
pub struct NullSink {
    pub rows: u64,
}

impl RecordSink for NullSink {
    fn begin_table(&mut self, _table: &str, _columns: &[String]) -> std::io::Result<()> {
        Ok(())
    }

    fn write_row(&mut self, _row: &[Option<String>]) -> std::io::Result<()> {
        self.rows += 1;
        Ok(())
    }

    fn end_table(&mut self, _table: &str, _rows: u64) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use crate::copydata::CopyRow;

    /// Collects every sink call in memory for assertions.
    #[derive(Debug, Default)]
    pub struct CollectSink {
        pub blocks: Vec<(String, Vec<String>, Vec<CopyRow>, u64)>,
        open: bool,
    }

    impl RecordSink for CollectSink {
        fn begin_table(&mut self, table: &str, columns: &[String]) -> std::io::Result<()> {
            assert!(!self.open, "nested COPY blocks");
            self.open = true;
            self.blocks
                .push((table.to_string(), columns.to_vec(), Vec::new(), 0));
            Ok(())
        }

        fn write_row(&mut self, row: &[Option<String>]) -> std::io::Result<()> {
            self.blocks.last_mut().unwrap().2.push(row.to_vec());
            Ok(())
        }

        fn end_table(&mut self, table: &str, rows: u64) -> std::io::Result<()> {
            assert!(self.open, "end_table without begin_table");
            self.open = false;
            let block = self.blocks.last_mut().unwrap();
            assert_eq!(block.0, table);
            block.3 = rows;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_json_sink_writes_ndjson() {
        let dir = TempDir::new().unwrap();
        let mut sink = JsonSinkPool::new(dir.path().to_path_buf());
        sink.ensure_output_dir().unwrap();

        let columns = vec!["id".to_string(), "name".to_string()];
        sink.begin_table("users", &columns).unwrap();
        sink.write_row(&vec![Some("1".to_string()), Some("alice".to_string())])
            .unwrap();
        sink.write_row(&vec![Some("2".to_string()), None]).unwrap();
        sink.end_table("users", 2).unwrap();
        sink.close_all().unwrap();

        let content = fs::read_to_string(dir.path().join("users.ndjson")).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["id"], "1");
        assert_eq!(first["name"], "alice");

        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["name"], serde_json::Value::Null);
    }

    #[test]
    fn test_repeated_blocks_append() {
        let dir = TempDir::new().unwrap();
        let mut sink = JsonSinkPool::new(dir.path().to_path_buf());
        sink.ensure_output_dir().unwrap();

        let columns = vec!["id".to_string()];
        for _ in 0..2 {
            sink.begin_table("t", &columns).unwrap();
            sink.write_row(&vec![Some("1".to_string())]).unwrap();
            sink.end_table("t", 1).unwrap();
        }
        sink.close_all().unwrap();

        let content = fs::read_to_string(dir.path().join("t.ndjson")).unwrap();
        assert_eq!(content.lines().count(), 2);
    }

    #[test]
    fn test_null_sink_counts() {
        let mut sink = NullSink::default();
        sink.begin_table("t", &["a".to_string()]).unwrap();
        sink.write_row(&vec![None]).unwrap();
        sink.write_row(&vec![Some("x".to_string())]).unwrap();
        sink.end_table("t", 2).unwrap();
        assert_eq!(sink.rows, 2);
    }
}
