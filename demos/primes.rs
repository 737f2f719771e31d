//! Find primes in a range with a pool of workers.
//!
//! Workers pull chunks from a shared cursor, publish each prime they find,
//! and a collector prints them in numeric order as batches arrive.
//!
//! Run with: cargo run --example primes -- 1 5000 [config.yaml]

use anyhow::Context;
use workshare::{
    init_tracing, Collector, PoolConfig, SequenceConfig, SequenceCursor, SharedSink, WorkerPool,
    WorkshareConfig,
};

fn is_prime(n: i64) -> bool {
    if n < 2 {
        return false;
    }
    if n % 2 == 0 {
        return n == 2;
    }
    let mut d = 3;
    while d * d <= n {
        if n % d == 0 {
            return false;
        }
        d += 2;
    }
    true
}

fn main() -> anyhow::Result<()> {
    init_tracing("info");

    let args: Vec<String> = std::env::args().skip(1).collect();
    let start: i64 = args.first().map(|s| s.parse()).transpose()?.unwrap_or(1);
    let stop: i64 = args.get(1).map(|s| s.parse()).transpose()?.unwrap_or(1000);

    let config = match args.get(2) {
        Some(path) => WorkshareConfig::from_file(path)
            .with_context(|| format!("loading {path}"))?,
        None => WorkshareConfig {
            pool: PoolConfig::default().with_thread_name_prefix("primes"),
            sequence: None,
        },
    };

    let sequence = config.sequence.clone().unwrap_or(SequenceConfig {
        start,
        stop,
        step: 1,
        chunk_size: 64,
    });
    let cursor = SequenceCursor::from_config(&sequence)?;
    let workers = config.pool.effective_workers();
    let collector = Collector::new(workers);
    let pool: WorkerPool<usize> = WorkerPool::new(config.pool)?;

    {
        let cursor = cursor.clone();
        let collector = collector.clone();
        pool.spawn_many(workers, move |id| {
            let producer = collector.producer_guard();
            let mut found = 0;
            while let Some(chunk) = cursor.next_chunk() {
                for n in chunk.into_iter().filter(|n| is_prime(*n)) {
                    producer.publish(n, id)?;
                    found += 1;
                }
            }
            Ok(found)
        })?;
    }

    let out = SharedSink::stdout();
    let report = collector.drain(|batch| {
        let line = batch
            .iter()
            .map(|(n, _)| n.to_string())
            .collect::<Vec<_>>()
            .join(" ");
        out.write_line(&line)
    })?;
    out.flush()?;

    let join_report = pool.join_all()?;
    println!(
        "{} primes in [{}, {}] from {} workers, {} batches",
        report.records,
        sequence.start,
        sequence.stop,
        join_report.joined,
        report.batches
    );
    Ok(())
}
