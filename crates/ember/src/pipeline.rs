use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, ensure, Context, Result};
use clap::Args;
use ember_contracts::EMBER_PIPELINE_REPORT_SCHEMA_VERSION;
use ember_runtime::{ChanError, TaskError, Value};
use serde::Serialize;

use crate::report::{exit_code, write_json};
use crate::GlobalArgs;

#[derive(Debug, Args)]
pub struct PipelineArgs {
    /// Number of producer tasks.
    #[arg(long, default_value_t = 4)]
    pub producers: u32,

    /// Integers sent by each producer (1..=items).
    #[arg(long, default_value_t = 1000)]
    pub items: u32,

    /// Channel capacity; 0 makes every send a rendezvous.
    #[arg(long, default_value_t = 16)]
    pub capacity: usize,

    /// Worker threads (defaults to EMBER_WORKERS or the available parallelism).
    #[arg(long)]
    pub workers: Option<usize>,
}

#[derive(Debug, Serialize)]
struct PipelineReport {
    schema_version: &'static str,
    ok: bool,
    producers: u32,
    items: u32,
    capacity: usize,
    workers: usize,
    sum: i64,
    expected: i64,
    received: u64,
    elapsed_ms: u64,
}

fn send_failed(e: ChanError) -> TaskError {
    TaskError::Failed(format!("send: {e}"))
}

pub fn cmd_pipeline(global: &GlobalArgs, args: PipelineArgs) -> Result<std::process::ExitCode> {
    ensure!(args.producers > 0, "--producers must be at least 1");
    let rt = crate::start_runtime(global, args.workers)?;
    let sched = rt.scheduler();
    let started = Instant::now();

    let chan = rt.chan_new(args.capacity);
    let ch = rt.channel(chan)?;
    let items = i64::from(args.items);
    let producers: Vec<_> = (0..args.producers)
        .map(|_| {
            let tx = ch.clone();
            sched.spawn(async move {
                for i in 1..=items {
                    tx.send(Value::Int(i)).await.map_err(send_failed)?;
                }
                Ok(Value::None)
            })
        })
        .collect();

    let received = Arc::new(AtomicU64::new(0));
    let rx = ch.clone();
    let counter = received.clone();
    let consumer = sched.spawn(async move {
        let mut sum = 0i64;
        while let Ok(v) = rx.recv().await {
            let n = v
                .as_int()
                .ok_or_else(|| TaskError::Failed(format!("unexpected {} on channel", v.kind())))?;
            sum = sum.wrapping_add(n);
            counter.fetch_add(1, Ordering::Relaxed);
        }
        Ok(Value::Int(sum))
    });

    for p in &producers {
        sched
            .block_on(p)
            .with_context(|| format!("producer task {}", p.id()))?;
    }
    rt.chan_close(chan)?;
    let sum = sched
        .block_on(&consumer)
        .context("consumer task")?
        .as_int()
        .ok_or_else(|| anyhow!("consumer returned a non-integer"))?;
    let elapsed_ms = started.elapsed().as_millis() as u64;
    rt.chan_drop(chan)?;

    // Truncation matches the consumer's wrapping sum.
    let expected = (i128::from(args.producers) * i128::from(items) * i128::from(items + 1) / 2) as i64;
    let report = PipelineReport {
        schema_version: EMBER_PIPELINE_REPORT_SCHEMA_VERSION,
        ok: sum == expected,
        producers: args.producers,
        items: args.items,
        capacity: args.capacity,
        workers: rt.config().workers,
        sum,
        expected,
        received: received.load(Ordering::Relaxed),
        elapsed_ms,
    };
    rt.shutdown();
    write_json(&report)?;
    Ok(exit_code(report.ok))
}
