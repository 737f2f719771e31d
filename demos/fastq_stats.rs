//! Per-record base composition of a FASTQ file, computed by worker threads.
//!
//! The records are loaded up front; workers claim record indices from a
//! shared cursor, count bases, and write one tab-separated line per record
//! through a shared sink. Totals go into a shared map of counters.
//!
//! Run with: cargo run --example fastq_stats -- reads.fastq

use anyhow::{bail, Context};
use std::sync::Arc;
use workshare::{init_tracing, PoolConfig, SequenceCursor, SharedMap, SharedSink, WorkerPool};

struct FastqRecord {
    id: String,
    sequence: String,
}

fn parse_fastq(text: &str) -> anyhow::Result<Vec<FastqRecord>> {
    let lines: Vec<&str> = text.lines().filter(|l| !l.is_empty()).collect();
    if lines.len() % 4 != 0 {
        bail!("FASTQ input has {} lines, expected a multiple of 4", lines.len());
    }
    lines
        .chunks(4)
        .map(|rec| {
            let id = rec[0]
                .strip_prefix('@')
                .with_context(|| format!("record header without '@': {}", rec[0]))?;
            Ok(FastqRecord {
                id: id.split_whitespace().next().unwrap_or(id).to_string(),
                sequence: rec[1].to_string(),
            })
        })
        .collect()
}

const DEMO_INPUT: &str = "@r1\nACGTACGT\n+\nIIIIIIII\n@r2\nGGGCCC\n+\nIIIIII\n@r3\nATATNN\n+\nIIIIII\n";

fn main() -> anyhow::Result<()> {
    init_tracing("warn");

    let text = match std::env::args().nth(1) {
        Some(path) => std::fs::read_to_string(&path).with_context(|| format!("reading {path}"))?,
        None => DEMO_INPUT.to_string(),
    };
    let records = Arc::new(parse_fastq(&text)?);
    if records.is_empty() {
        return Ok(());
    }

    let cursor = SequenceCursor::new(0, records.len() as i64 - 1, 1)?;
    let totals: SharedMap<char, u64> = SharedMap::new();
    let out = SharedSink::stdout();
    let pool: WorkerPool = WorkerPool::new(PoolConfig::default().with_thread_name_prefix("fastq"))?;

    {
        let (cursor, totals, out, records) =
            (cursor.clone(), totals.clone(), out.clone(), Arc::clone(&records));
        pool.spawn_default(move |_id| {
            while let Some(index) = cursor.next() {
                let record = &records[index as usize];
                let gc = record
                    .sequence
                    .chars()
                    .filter(|c| matches!(c, 'G' | 'C'))
                    .count();
                for base in record.sequence.chars() {
                    totals.incr_by(base, 1)?;
                }
                let length = record.sequence.len().to_string();
                let gc_percent = format!(
                    "{:.1}",
                    100.0 * gc as f64 / record.sequence.len().max(1) as f64
                );
                out.write_record(
                    &[record.id.as_str(), length.as_str(), gc_percent.as_str()],
                    "\t",
                )?;
            }
            Ok(())
        })?;
    }

    pool.join_all()?;
    for (base, count) in totals.flush_sorted()? {
        out.write_line(&format!("total\t{base}\t{count}"))?;
    }
    out.flush()?;
    Ok(())
}
