use crate::extract::{Compression, Extractor};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Instant;

/// JSON summary for the extract command
#[derive(Serialize)]
struct ExtractJsonOutput {
    input_file: String,
    output_dir: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    compression: Option<String>,
    dry_run: bool,
    statistics: ExtractStatistics,
    tables: Vec<String>,
}

#[derive(Serialize)]
struct ExtractStatistics {
    tables_found: usize,
    rows_emitted: u64,
    statements_processed: u64,
    bytes_processed: u64,
    elapsed_secs: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    throughput_mb_per_sec: Option<f64>,
}

pub fn run(
    file: PathBuf,
    output: PathBuf,
    tables: Option<String>,
    dry_run: bool,
    progress: bool,
    verbose: bool,
    json: bool,
) -> anyhow::Result<()> {
    if !file.exists() {
        anyhow::bail!("input file does not exist: {}", file.display());
    }

    let file_size = std::fs::metadata(&file)?.len();
    let file_size_mb = file_size as f64 / (1024.0 * 1024.0);

    let compression = Compression::from_path(&file);
    let compression_str = if compression != Compression::None {
        if !json {
            println!("Detected compression: {}", compression);
        }
        Some(compression.to_string())
    } else {
        None
    };

    if !json {
        if dry_run {
            println!(
                "Dry run: parsing dump file: {} ({:.2} MB)",
                file.display(),
                file_size_mb
            );
        } else {
            println!(
                "Extracting dump file: {} ({:.2} MB)",
                file.display(),
                file_size_mb
            );
            println!("Output directory: {}", output.display());
        }
    }

    let table_filter: Vec<String> = tables
        .map(|t| t.split(',').map(|s| s.trim().to_string()).collect())
        .unwrap_or_default();

    if !json && !table_filter.is_empty() {
        println!("Filtering to tables: {}\n", table_filter.join(", "));
    }

    let mut extractor = Extractor::new(file.clone(), output.clone())
        .with_dry_run(dry_run)
        .with_verbose(verbose);

    if !table_filter.is_empty() {
        extractor = extractor.with_table_filter(table_filter);
    }

    let start_time = Instant::now();

    let stats = if progress && !json {
        let pb = ProgressBar::new(file_size);
        pb.set_style(
            ProgressStyle::with_template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({percent}%) {msg}",
            )
            .unwrap()
            .progress_chars("█▓▒░  ")
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"),
        );
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        let pb_clone = pb.clone();
        extractor = extractor.with_progress(move |bytes| {
            pb_clone.set_position(bytes);
        });

        let stats = extractor.extract()?;
        pb.finish_with_message("done");
        stats
    } else {
        extractor.extract()?
    };

    let elapsed = start_time.elapsed();

    if json {
        let throughput = if elapsed.as_secs_f64() > 0.0 {
            Some(stats.bytes_processed as f64 / (1024.0 * 1024.0) / elapsed.as_secs_f64())
        } else {
            None
        };

        let output_json = ExtractJsonOutput {
            input_file: file.display().to_string(),
            output_dir: output.display().to_string(),
            compression: compression_str,
            dry_run,
            statistics: ExtractStatistics {
                tables_found: stats.tables_found,
                rows_emitted: stats.rows_emitted,
                statements_processed: stats.statements_processed,
                bytes_processed: stats.bytes_processed,
                elapsed_secs: elapsed.as_secs_f64(),
                throughput_mb_per_sec: throughput,
            },
            tables: stats.table_names,
        };
        println!("{}", serde_json::to_string_pretty(&output_json)?);
    } else {
        if dry_run {
            println!("\n✓ Dry run completed!");
            println!("\nWould create {} table files:", stats.tables_found);
            for name in &stats.table_names {
                println!("  - {}.ndjson", name);
            }
        } else {
            println!("\n✓ Extraction completed successfully!");
        }

        println!("\nStatistics:");
        println!("  Tables found: {}", stats.tables_found);
        println!("  Rows emitted: {}", stats.rows_emitted);
        println!("  Statements processed: {}", stats.statements_processed);
        println!(
            "  Bytes processed: {:.2} MB",
            stats.bytes_processed as f64 / (1024.0 * 1024.0)
        );
        println!("  Elapsed time: {:.3?}", elapsed);

        if elapsed.as_secs_f64() > 0.0 {
            let throughput =
                stats.bytes_processed as f64 / (1024.0 * 1024.0) / elapsed.as_secs_f64();
            println!("  Throughput: {:.2} MB/s", throughput);
        }

        if verbose && !dry_run {
            println!("\nOutput files created in: {}", output.display());
        }
    }

    Ok(())
}
