//! Entry point for the `mfutar` CLI.
//!
//! Usage:
//!   mfutar create --output archive.tar file1 dir2/
//!   mfutar extract archive.tar --output extracted/
//!   mfutar list archive.tar

use mfutar::cli::{self, Commands};
use mfutar::extractor::{archive_extract, ExtractOptions};
use mfutar::header;
use mfutar::progress::{ProgressState, ProgressTracker};
use mfutar::writer::{archive_create, CreateOptions};
use std::fs::File;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::error;

fn main() -> std::process::ExitCode {
    if let Err(e) = run() {
        if e.downcast_ref::<clap::Error>().is_none() {
            error!("{}", e);
            eprintln!("Error: {}", e);
        }
        return std::process::ExitCode::FAILURE;
    }
    std::process::ExitCode::SUCCESS
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = cli::run()?;
    cli::init_logging(args.verbose);

    match args.command {
        Commands::Create {
            inputs,
            output,
            ranks,
            chunk_size,
            block_size,
            preserve,
            dereference,
            build_index,
        } => {
            let opts = CreateOptions {
                ranks: cli::resolve_ranks(ranks),
                chunk_size,
                block_size,
                preserve,
                follow_symlinks: dereference,
                build_index,
            };
            let mut tracker = ProgressTracker::new(opts.ranks, Duration::from_millis(100));
            tracker.enable_with_callback(create_cli_progress_callback("create"));
            let summary = archive_create(&inputs, &output, &opts, Some(&tracker))?;
            tracing::info!(
                items = summary.total_items,
                bytes = summary.total_bytes,
                archive_size = summary.archive_size,
                "archive created"
            );
        }
        Commands::Extract {
            archive,
            output,
            ranks,
            chunk_size,
            block_size,
            preserve,
        } => {
            let dest_cwd = output.unwrap_or_else(|| std::env::current_dir().unwrap_or_default());
            let opts = ExtractOptions {
                ranks: cli::resolve_ranks(ranks),
                chunk_size,
                block_size,
                preserve,
                dereference: false,
            };
            let mut tracker = ProgressTracker::new(opts.ranks, Duration::from_millis(100));
            tracker.enable_with_callback(create_cli_progress_callback("extract"));
            let summary = archive_extract(&archive, &dest_cwd, &opts, Some(&tracker))?;
            tracing::info!(
                items = summary.total_items,
                bytes = summary.total_bytes,
                used_index = summary.used_index,
                "archive extracted"
            );
        }
        Commands::List { archive } => {
            list_archive(&archive)?;
        }
    }

    Ok(())
}

/// Formats a tar mtime (seconds since the epoch) the way `tar -tv` does,
/// `YYYY-MM-DD HH:MM`, falling back to the raw seconds count for values
/// `chrono` can't represent (e.g. a corrupt or adversarial header).
fn format_mtime(mtime_sec: i64) -> String {
    use chrono::{DateTime, Utc};
    match DateTime::<Utc>::from_timestamp(mtime_sec, 0) {
        Some(dt) => dt.format("%Y-%m-%d %H:%M").to_string(),
        None => mtime_sec.to_string(),
    }
}

/// Lists every entry in `archive_path` in archive order, tar-`-tv`-style.
fn list_archive(archive_path: &std::path::Path) -> Result<(), Box<dyn std::error::Error>> {
    let mut file = File::open(archive_path)?;
    let mut offset = 0u64;
    loop {
        match header::decode_next(&mut file, offset)? {
            Some(decoded) => {
                let entry = &decoded.entry;
                println!(
                    "{:o} {:>10} {} {}",
                    entry.mode,
                    entry.size,
                    format_mtime(entry.mtime_sec),
                    entry.name.display()
                );
                let next_offset = decoded.payload_offset + entry.padded_payload_len();
                use std::io::{Seek, SeekFrom};
                file.seek(SeekFrom::Start(next_offset))?;
                offset = next_offset;
            }
            None => break,
        }
    }
    Ok(())
}

/// Renders a live-updating progress bar on stderr, the same terminal
/// presentation the teacher's CLI used for long-running archive
/// operations.
fn create_cli_progress_callback(operation: &str) -> impl Fn(ProgressState) + Send + Sync + 'static {
    let operation = operation.to_string();
    let start_time = Instant::now();
    let last_update = Arc::new(Mutex::new(Instant::now()));
    let prev_len = Arc::new(Mutex::new(0usize));
    let done = Arc::new(AtomicBool::new(false));
    let done_cl = done.clone();

    move |state: ProgressState| {
        if done_cl.load(Ordering::Relaxed) {
            return;
        }
        let now = Instant::now();
        let should_update = state.progress_percent >= 100.0 || {
            let mut last = last_update.lock().unwrap();
            if now.duration_since(*last).as_millis() >= 50 {
                *last = now;
                true
            } else {
                false
            }
        };
        if !should_update {
            return;
        }

        let term_width = term_size::dimensions().map(|(w, _)| w as usize).unwrap_or(80);
        let bar_width: usize = 40;

        let build_status_line = |bw: usize| -> String {
            let filled = ((state.progress_percent / 100.0) * bw as f32) as usize;
            let empty = bw - filled;
            let progress_bar = format!("[{}{}]", "█".repeat(filled), "░".repeat(empty));
            format!(
                "[{}] {} {:.1}% | {}/{} items | {:.1} MB/s | ETA: {{ETA}}",
                operation.to_uppercase(),
                progress_bar,
                state.progress_percent,
                state.processed_items,
                state.total_items,
                state.speed_mbps,
            )
        };

        let elapsed = start_time.elapsed().as_secs_f32();
        let eta_str = if state.speed_mbps > 0.0 && state.progress_percent > 0.0 {
            let remaining_percent = 100.0 - state.progress_percent;
            let eta_seconds = (elapsed * remaining_percent) / state.progress_percent;
            if eta_seconds > 60.0 {
                format!("{:.1}m", eta_seconds / 60.0)
            } else {
                format!("{:.1}s", eta_seconds)
            }
        } else {
            "--".to_string()
        };

        let mut bar_len = bar_width;
        let status_line = loop {
            let line = build_status_line(bar_len).replace("{ETA}", &eta_str);
            if line.len() <= term_width || bar_len <= 10 {
                break line;
            }
            bar_len = if bar_len >= 4 { bar_len - 4 } else { 10 };
        };

        let mut line_to_print = status_line.clone();
        {
            let mut prev = prev_len.lock().unwrap();
            if *prev > line_to_print.len() {
                let diff = *prev - line_to_print.len();
                line_to_print.push_str(&" ".repeat(diff));
            }
            *prev = line_to_print.len();
        }
        eprint!("\r\x1B[2K{}", line_to_print);
        io::stderr().flush().ok();

        if state.progress_percent >= 100.0 {
            eprintln!();
            done_cl.store(true, Ordering::Relaxed);
        }
    }
}
