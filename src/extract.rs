//! File-level extraction.
//!
//! `Extractor` wires the ingestion core to the filesystem: it opens the dump
//! file, layers decompression and progress tracking over it, and routes
//! decoded rows into per-table NDJSON files (or a counting sink for dry
//! runs).

use crate::ingest::{determine_buffer_size, Ingestor, Stats};
use crate::progress::ProgressReader;
use crate::sink::{JsonSinkPool, NullSink};
use ahash::AHashSet;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Compression format detected from the input file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
    Bzip2,
    Xz,
    Zstd,
}

impl Compression {
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase());

        match ext.as_deref() {
            Some("gz" | "gzip") => Compression::Gzip,
            Some("bz2" | "bzip2") => Compression::Bzip2,
            Some("xz" | "lzma") => Compression::Xz,
            Some("zst" | "zstd") => Compression::Zstd,
            _ => Compression::None,
        }
    }

    /// Wrap a reader with the appropriate decompressor.
    pub fn wrap_reader<'a>(&self, reader: Box<dyn Read + 'a>) -> std::io::Result<Box<dyn Read + 'a>> {
        Ok(match self {
            Compression::None => reader,
            Compression::Gzip => Box::new(flate2::read::GzDecoder::new(reader)),
            Compression::Bzip2 => Box::new(bzip2::read::BzDecoder::new(reader)),
            Compression::Xz => Box::new(xz2::read::XzDecoder::new(reader)),
            Compression::Zstd => Box::new(zstd::stream::read::Decoder::new(reader)?),
        })
    }
}

impl std::fmt::Display for Compression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Compression::None => write!(f, "none"),
            Compression::Gzip => write!(f, "gzip"),
            Compression::Bzip2 => write!(f, "bzip2"),
            Compression::Xz => write!(f, "xz"),
            Compression::Zstd => write!(f, "zstd"),
        }
    }
}

#[derive(Default)]
struct ExtractorConfig {
    dry_run: bool,
    verbose: bool,
    table_filter: Option<AHashSet<String>>,
    progress_fn: Option<Box<dyn Fn(u64)>>,
}

pub struct Extractor {
    input_file: PathBuf,
    output_dir: PathBuf,
    config: ExtractorConfig,
}

impl Extractor {
    pub fn new(input_file: PathBuf, output_dir: PathBuf) -> Self {
        Self {
            input_file,
            output_dir,
            config: ExtractorConfig::default(),
        }
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.config.dry_run = dry_run;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.config.verbose = verbose;
        self
    }

    pub fn with_table_filter(mut self, tables: Vec<String>) -> Self {
        if !tables.is_empty() {
            self.config.table_filter = Some(tables.into_iter().collect());
        }
        self
    }

    pub fn with_progress<F: Fn(u64) + 'static>(mut self, f: F) -> Self {
        self.config.progress_fn = Some(Box::new(f));
        self
    }

    pub fn extract(mut self) -> anyhow::Result<Stats> {
        let file = File::open(&self.input_file)?;
        let file_size = file.metadata()?.len();
        let buffer_size = determine_buffer_size(file_size);

        let compression = Compression::from_path(&self.input_file);

        let reader: Box<dyn Read> = if let Some(cb) = self.config.progress_fn.take() {
            let progress_reader = ProgressReader::new(file, move |bytes| cb(bytes));
            compression.wrap_reader(Box::new(progress_reader))?
        } else {
            compression.wrap_reader(Box::new(file))?
        };

        let mut ingestor = Ingestor::new(reader, buffer_size)
            .with_table_filter(self.config.table_filter.take())
            .with_verbose(self.config.verbose);

        let stats = if self.config.dry_run {
            let mut sink = NullSink::default();
            ingestor.run(&mut sink)?
        } else {
            let mut sink = JsonSinkPool::new(self.output_dir.clone());
            sink.ensure_output_dir()?;
            let stats = ingestor.run(&mut sink)?;
            sink.close_all()?;
            stats
        };

        Ok(stats)
    }
}
