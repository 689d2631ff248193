//! Chunked worker-pool backend for map processors.
//!
//! Topology: a reader thread batches records into chunks and feeds a bounded
//! channel; `max_workers` workers each rebuild the mapper from its params and
//! map whole chunks; the calling thread is the ordered sink, gating writes by
//! chunk id so output order deterministically matches input order. Bounded
//! channels on both sides keep at most about `2 x max_workers` chunks in
//! memory.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use crossbeam_channel::bounded;

use minidp_types::{CancelToken, DataEntry, Metrics, PipelineError, RunStats};

use crate::manifest::{is_nonempty_file, ManifestReader, ManifestWriter};
use crate::processor::{execution_error, write_group, MapperFactory};

struct Chunk {
    id: u64,
    start_index: u64,
    records: Vec<minidp_types::Record>,
}

struct ChunkResult {
    id: u64,
    /// One group of emitted entries per input record, in input order.
    groups: Vec<Vec<DataEntry>>,
}

/// Stream `input` through per-worker mapper instances and write the results
/// to `output` in input order.
///
/// A mapper failure fails the step with the offending record index; in-flight
/// workers observe the stop flag between records and wind down. The first
/// error wins. Cancelled runs fail with `Cancelled` after the pool drains.
pub(crate) fn process_chunked(
    name: &str,
    input: Option<&Path>,
    output: &Path,
    factory: &MapperFactory,
    max_workers: usize,
    chunksize: usize,
    cancel: &CancelToken,
) -> Result<(RunStats, Vec<Metrics>), PipelineError> {
    let mut writer = ManifestWriter::create(output)?;
    let mut stats = RunStats::default();
    let mut metrics: Vec<Metrics> = Vec::new();

    let input = match input.filter(|p| is_nonempty_file(p)) {
        Some(path) => path,
        None => {
            writer.finish()?;
            return Ok((stats, metrics));
        }
    };

    let stop = AtomicBool::new(false);
    let stop = &stop;
    let halted = move || stop.load(Ordering::Acquire) || cancel.is_cancelled();

    let (chunk_tx, chunk_rx) = bounded::<Chunk>(max_workers);
    let (result_tx, result_rx) = bounded::<Result<ChunkResult, PipelineError>>(max_workers);

    let mut first_error: Option<PipelineError> = None;

    let reader_outcome = thread::scope(|scope| -> Result<(), PipelineError> {
        let reader = scope.spawn(move || -> Result<(), PipelineError> {
            let mut chunk = Vec::with_capacity(chunksize);
            let mut chunk_id = 0u64;
            let mut index = 0u64;
            for item in ManifestReader::open(input)? {
                if halted() {
                    return Ok(());
                }
                let record = match item {
                    Ok(record) => record,
                    Err(e) => {
                        stop.store(true, Ordering::Release);
                        return Err(e);
                    }
                };
                chunk.push(record);
                index += 1;
                if chunk.len() >= chunksize {
                    let batch = Chunk {
                        id: chunk_id,
                        start_index: index - chunk.len() as u64,
                        records: std::mem::take(&mut chunk),
                    };
                    chunk_id += 1;
                    if chunk_tx.send(batch).is_err() {
                        return Ok(());
                    }
                }
            }
            if !chunk.is_empty() {
                let batch = Chunk {
                    id: chunk_id,
                    start_index: index - chunk.len() as u64,
                    records: std::mem::take(&mut chunk),
                };
                let _ = chunk_tx.send(batch);
            }
            Ok(())
        });

        for _ in 0..max_workers {
            let chunk_rx = chunk_rx.clone();
            let result_tx = result_tx.clone();
            scope.spawn(move || {
                let mut mapper = match factory() {
                    Ok(mapper) => mapper,
                    Err(e) => {
                        stop.store(true, Ordering::Release);
                        let _ = result_tx.send(Err(e));
                        return;
                    }
                };
                while let Ok(chunk) = chunk_rx.recv() {
                    if halted() {
                        break;
                    }
                    let mut groups = Vec::with_capacity(chunk.records.len());
                    let mut failure: Option<PipelineError> = None;
                    for (offset, record) in chunk.records.iter().enumerate() {
                        if halted() {
                            break;
                        }
                        match mapper.process_record(record) {
                            Ok(entries) => groups.push(entries),
                            Err(e) => {
                                failure = Some(execution_error(
                                    name,
                                    chunk.start_index + offset as u64,
                                    e,
                                ));
                                break;
                            }
                        }
                    }
                    if let Some(e) = failure {
                        stop.store(true, Ordering::Release);
                        let _ = result_tx.send(Err(e));
                        break;
                    }
                    if groups.len() != chunk.records.len() {
                        // cancelled mid-chunk; never hand back a partial group
                        break;
                    }
                    if result_tx
                        .send(Ok(ChunkResult {
                            id: chunk.id,
                            groups,
                        }))
                        .is_err()
                    {
                        break;
                    }
                }
            });
        }
        // The reader owns the only chunk sender; workers above own the result
        // senders. Dropping our handles lets both channels close naturally.
        drop(chunk_rx);
        drop(result_tx);

        let mut pending: BTreeMap<u64, Vec<Vec<DataEntry>>> = BTreeMap::new();
        let mut next_id = 0u64;
        while let Ok(result) = result_rx.recv() {
            match result {
                Err(e) => {
                    stop.store(true, Ordering::Release);
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
                Ok(chunk_result) => {
                    if first_error.is_some() {
                        continue;
                    }
                    pending.insert(chunk_result.id, chunk_result.groups);
                    while let Some(groups) = pending.remove(&next_id) {
                        next_id += 1;
                        for entries in groups {
                            stats.num_in += 1;
                            if let Err(e) =
                                write_group(entries, &mut stats, &mut writer, &mut metrics)
                            {
                                stop.store(true, Ordering::Release);
                                if first_error.is_none() {
                                    first_error = Some(e);
                                }
                                break;
                            }
                        }
                        if first_error.is_some() {
                            break;
                        }
                    }
                }
            }
        }

        match reader.join() {
            Ok(result) => result,
            Err(_) => Err(PipelineError::processor_execution(
                name,
                0,
                "manifest reader thread panicked",
            )),
        }
    });

    if let Some(e) = first_error {
        return Err(e);
    }
    reader_outcome?;
    if cancel.is_cancelled() {
        return Err(cancel.error());
    }

    writer.finish()?;
    Ok((stats, metrics))
}
