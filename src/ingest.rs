//! Ingestion driver.
//!
//! Pulls bytes from the chunk buffer and dispatches each one to whichever
//! state machine currently owns the stream: the SQL tokenizer, or the COPY
//! data parser while a bulk-load block is open. Exactly one of the two is
//! active at any time, and the hand-off happens synchronously inside this
//! loop when a COPY statement is recognized or its end-of-data marker is
//! reached.

use crate::chunk::ChunkBuffer;
use crate::copydata::CopyParser;
use crate::error::{ExtractError, Result};
use crate::sink::RecordSink;
use crate::statement::recognize;
use crate::tokenizer::{Action, Tokenizer};
use ahash::AHashSet;
use std::io::Read;

pub const SMALL_BUFFER_SIZE: usize = 64 * 1024;
pub const MEDIUM_BUFFER_SIZE: usize = 256 * 1024;

/// A dispatch step either consumes its byte or reprocesses it under a new
/// state; more than this many reprocesses of a single byte means a state
/// machine is not making progress and the run is aborted as a bug.
const MAX_REPROCESS_STREAK: u32 = 8;

pub fn determine_buffer_size(file_size: u64) -> usize {
    if file_size > 1024 * 1024 * 1024 {
        MEDIUM_BUFFER_SIZE
    } else {
        SMALL_BUFFER_SIZE
    }
}

#[derive(Debug)]
pub struct Stats {
    pub tables_found: usize,
    pub rows_emitted: u64,
    pub statements_processed: u64,
    pub bytes_processed: u64,
    pub table_names: Vec<String>,
}

struct ActiveCopy {
    parser: CopyParser,
    /// False when the block's table is excluded by the filter: the block is
    /// still parsed and validated, but nothing reaches the sink.
    emit: bool,
}

pub struct Ingestor<R: Read> {
    reader: R,
    buffer_size: usize,
    chunks: ChunkBuffer,
    tokenizer: Tokenizer,
    copy: Option<ActiveCopy>,
    table_filter: Option<AHashSet<String>>,
    verbose: bool,
}

impl<R: Read> Ingestor<R> {
    pub fn new(reader: R, buffer_size: usize) -> Self {
        Self {
            reader,
            buffer_size,
            chunks: ChunkBuffer::new(),
            tokenizer: Tokenizer::new(),
            copy: None,
            table_filter: None,
            verbose: false,
        }
    }

    pub fn with_table_filter(mut self, filter: Option<AHashSet<String>>) -> Self {
        self.table_filter = filter;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Ingest the whole stream, blocking on the reader for refills. Returns
    /// accumulated statistics, or the first fatal error.
    pub fn run(&mut self, sink: &mut dyn RecordSink) -> Result<Stats> {
        let mut stats = Stats {
            tables_found: 0,
            rows_emitted: 0,
            statements_processed: 0,
            bytes_processed: 0,
            table_names: Vec::new(),
        };
        let mut tables_seen: AHashSet<String> = AHashSet::new();
        let mut buf = vec![0u8; self.buffer_size];

        loop {
            self.drain(sink, &mut stats, &mut tables_seen)?;

            let n = self.reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            self.chunks.push_back(buf[..n].to_vec());
        }

        // End of input: the only clean stopping point is between statements.
        if self.copy.is_some() {
            return Err(ExtractError::format(
                self.chunks.offset(),
                "unexpected end of input inside COPY data block",
            ));
        }
        if !self.tokenizer.is_idle() {
            return Err(ExtractError::format(
                self.chunks.offset(),
                "unexpected end of input mid-statement",
            ));
        }

        stats.bytes_processed = self.chunks.offset();
        Ok(stats)
    }

    /// Process every buffered byte, honoring the three-way action protocol:
    /// consume-and-advance, reprocess-same-byte, or fatal (as `Err`).
    fn drain(
        &mut self,
        sink: &mut dyn RecordSink,
        stats: &mut Stats,
        tables_seen: &mut AHashSet<String>,
    ) -> Result<()> {
        let mut reprocess_streak = 0u32;

        while let Some(chr) = self.chunks.peek_byte() {
            let offset = self.chunks.offset();

            let advanced = if self.copy.is_some() {
                self.step_copy(chr, offset, sink, stats)?
            } else {
                self.step_sql(chr, offset, sink, stats, tables_seen)?
            };

            if advanced {
                self.chunks.advance();
                reprocess_streak = 0;
            } else {
                reprocess_streak += 1;
                if reprocess_streak > MAX_REPROCESS_STREAK {
                    return Err(ExtractError::protocol(format!(
                        "byte at offset {} reprocessed {} times without progress",
                        offset, reprocess_streak
                    )));
                }
            }
        }

        Ok(())
    }

    fn step_copy(
        &mut self,
        chr: u8,
        offset: u64,
        sink: &mut dyn RecordSink,
        stats: &mut Stats,
    ) -> Result<bool> {
        let Some(active) = self.copy.as_mut() else {
            return Err(ExtractError::protocol("COPY step without an active block"));
        };

        let outcome = active.parser.feed(chr, offset)?;
        let emit = active.emit;

        if let Some(bytes) = outcome.reinject {
            self.chunks.push_front(bytes);
        }

        if let Some(row) = outcome.row {
            if emit {
                stats.rows_emitted += 1;
                sink.write_row(&row)?;
            }
        }

        if outcome.done {
            let Some(active) = self.copy.take() else {
                return Err(ExtractError::protocol("COPY block vanished mid-step"));
            };
            let spec = active.parser.spec();
            let rows = active.parser.rows_emitted();
            if self.verbose {
                eprintln!("COPY END [{}] ({} rows)", spec.table_name, rows);
            }
            if active.emit {
                sink.end_table(&spec.table_name, rows)?;
            }
        }

        Ok(outcome.action == Action::Next)
    }

    fn step_sql(
        &mut self,
        chr: u8,
        offset: u64,
        sink: &mut dyn RecordSink,
        stats: &mut Stats,
        tables_seen: &mut AHashSet<String>,
    ) -> Result<bool> {
        let step = self.tokenizer.feed(chr, offset)?;

        if let Some(statement) = step.statement {
            if !statement.is_empty() {
                stats.statements_processed += 1;
            }

            // Tokens are inspected exactly once, here, and dropped when
            // `statement` goes out of scope.
            if let Some(spec) = recognize(&statement, offset)? {
                let emit = self
                    .table_filter
                    .as_ref()
                    .map_or(true, |filter| filter.contains(&spec.table_name));

                if self.verbose {
                    eprintln!("COPY [{}]", spec.table_name);
                }

                if emit {
                    if tables_seen.insert(spec.table_name.clone()) {
                        stats.tables_found += 1;
                        stats.table_names.push(spec.table_name.clone());
                    }
                    sink.begin_table(&spec.table_name, &spec.column_names)?;
                }

                self.copy = Some(ActiveCopy {
                    parser: CopyParser::new(spec),
                    emit,
                });
            }
        }

        Ok(step.action == Action::Next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::testing::CollectSink;

    fn ingest(input: &[u8]) -> Result<(Stats, CollectSink)> {
        let mut sink = CollectSink::default();
        let mut ingestor = Ingestor::new(input, 16);
        let stats = ingestor.run(&mut sink)?;
        Ok((stats, sink))
    }

    const SIMPLE_DUMP: &[u8] = b"begin;\n\
        create table users (id integer, name text);\n\
        copy users (id, name) from stdin;\n\
        1\talice\n\
        2\t\\N\n\
        \\.\n\
        commit;\n";

    #[test]
    fn test_end_to_end_simple_dump() {
        let (stats, sink) = ingest(SIMPLE_DUMP).unwrap();

        assert_eq!(stats.tables_found, 1);
        assert_eq!(stats.rows_emitted, 2);
        assert_eq!(stats.table_names, vec!["users"]);
        assert_eq!(stats.bytes_processed, SIMPLE_DUMP.len() as u64);

        assert_eq!(sink.blocks.len(), 1);
        let (table, columns, rows, count) = &sink.blocks[0];
        assert_eq!(table, "users");
        assert_eq!(columns, &["id", "name"]);
        assert_eq!(*count, 2);
        assert_eq!(
            rows[0],
            vec![Some("1".to_string()), Some("alice".to_string())]
        );
        assert_eq!(rows[1], vec![Some("2".to_string()), None]);
    }

    #[test]
    fn test_multiple_copy_blocks() {
        let input = b"copy a (x) from stdin;\n1\n\\.\n\
            copy b (y) from stdin;\n2\n\\.\n";
        let (stats, sink) = ingest(input).unwrap();

        assert_eq!(stats.tables_found, 2);
        assert_eq!(stats.table_names, vec!["a", "b"]);
        assert_eq!(sink.blocks.len(), 2);
        assert_eq!(sink.blocks[1].0, "b");
    }

    #[test]
    fn test_non_copy_statements_produce_no_sink_calls() {
        let input = b"begin;\nset search_path = public;\ncommit;\n";
        let (stats, sink) = ingest(input).unwrap();
        assert_eq!(stats.statements_processed, 3);
        assert!(sink.blocks.is_empty());
    }

    #[test]
    fn test_table_filter_suppresses_emission() {
        let input = b"copy a (x) from stdin;\n1\n\\.\n\
            copy b (y) from stdin;\n2\n\\.\n";
        let filter: AHashSet<String> = ["b".to_string()].into_iter().collect();

        let mut sink = CollectSink::default();
        let mut ingestor = Ingestor::new(&input[..], 16).with_table_filter(Some(filter));
        let stats = ingestor.run(&mut sink).unwrap();

        assert_eq!(stats.tables_found, 1);
        assert_eq!(stats.table_names, vec!["b"]);
        assert_eq!(sink.blocks.len(), 1);
        assert_eq!(sink.blocks[0].0, "b");
    }

    #[test]
    fn test_tiny_refill_chunks() {
        // A 1-byte buffer forces a refill between every byte, exercising
        // suspension at every state boundary.
        let mut sink = CollectSink::default();
        let mut ingestor = Ingestor::new(SIMPLE_DUMP, 1);
        let stats = ingestor.run(&mut sink).unwrap();
        assert_eq!(stats.rows_emitted, 2);
    }

    #[test]
    fn test_unrecognized_keyword_is_fatal() {
        let err = ingest(b"frobnicate the database;\n").unwrap_err();
        assert!(err.to_string().contains("invalid leading keyword"));
    }

    #[test]
    fn test_truncated_copy_block_is_fatal() {
        let err = ingest(b"copy t (a) from stdin;\n1\n").unwrap_err();
        assert!(err
            .to_string()
            .contains("unexpected end of input inside COPY"));
    }

    #[test]
    fn test_truncated_statement_is_fatal() {
        let err = ingest(b"create table t (id integer)").unwrap_err();
        assert!(err.to_string().contains("mid-statement"));
    }

    #[test]
    fn test_row_count_mismatch_reports_offset() {
        let input = b"copy t (a, b) from stdin;\n1\n\\.\n";
        let err = ingest(input).unwrap_err();
        match err {
            ExtractError::Format { offset, .. } => {
                // The error points at the newline that closed the short row.
                assert_eq!(offset, 27);
            }
            other => panic!("expected format error, got {other}"),
        }
    }

    #[test]
    fn test_empty_input() {
        let (stats, sink) = ingest(b"").unwrap();
        assert_eq!(stats.statements_processed, 0);
        assert!(sink.blocks.is_empty());
    }

    #[test]
    fn test_empty_statements_are_noops() {
        let (stats, _) = ingest(b";;\n").unwrap();
        assert_eq!(stats.statements_processed, 0);
    }
}
