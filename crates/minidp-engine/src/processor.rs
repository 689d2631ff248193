//! Processor base contracts: the generic [`Processor`], the per-record
//! [`RecordMapper`], and the [`MapProcessor`] harness that drives mappers in
//! serial or parallel mode.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde::Deserialize;
use serde_json::Value;

use minidp_types::{DataEntry, Metrics, PipelineError, Record, RunStats};

use crate::manifest::{is_nonempty_file, ManifestReader, ManifestWriter};
use crate::parallel;
use crate::runner::RunContext;

/// Everything a registry factory needs to build a processor for one step:
/// the step id, the `type` string it was resolved from, its params, and the
/// manifest paths the runner stitched for it.
#[derive(Debug, Clone)]
pub struct ProcessorSpec {
    pub step_id: String,
    pub type_name: String,
    pub params: Value,
    pub input_manifest: Option<PathBuf>,
    pub output_manifest: PathBuf,
}

/// A pipeline step implementation.
///
/// Constructed with resolved manifest paths; reads `input_manifest`, writes
/// `output_manifest`, reports a [`RunStats`]. `prepare` runs once before
/// `process`; `finalize` runs once after, even on failure (with best-effort
/// stats).
pub trait Processor: Send {
    fn name(&self) -> &str;

    fn output_manifest(&self) -> &Path;

    fn prepare(&mut self, _ctx: &RunContext) -> Result<(), PipelineError> {
        Ok(())
    }

    fn process(&mut self, ctx: &RunContext) -> Result<RunStats, PipelineError>;

    fn finalize(&mut self, _ctx: &RunContext, _stats: &RunStats) -> Result<(), PipelineError> {
        Ok(())
    }
}

impl std::fmt::Debug for dyn Processor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Processor").field("name", &self.name()).finish()
    }
}

/// A record-at-a-time transform.
///
/// Returns the emitted entries for one input record: empty vector drops the
/// record, one entry modifies or passes it through, several entries expand
/// it. `&mut self` permits running state in serial mode; with
/// `max_workers >= 2` every worker gets a private instance rebuilt from the
/// params, so implementations must not rely on state carried across records.
pub trait RecordMapper: Send {
    fn process_record(&mut self, record: &Record) -> Result<Vec<DataEntry>, PipelineError>;
}

/// Rebuilds a mapper from its params; called once per parallel worker.
pub type MapperFactory = Arc<dyn Fn() -> Result<Box<dyn RecordMapper>, PipelineError> + Send + Sync>;

fn default_max_workers() -> usize {
    1
}

fn default_chunksize() -> usize {
    10_000
}

/// Params recognized on every map processor, parsed from the same object as
/// the mapper's own params.
#[derive(Debug, Clone, Deserialize)]
pub struct MapOptions {
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default = "default_chunksize")]
    pub in_memory_chunksize: usize,
    #[serde(default)]
    pub test_cases: Vec<MapTestCase>,
}

impl Default for MapOptions {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            in_memory_chunksize: default_chunksize(),
            test_cases: Vec::new(),
        }
    }
}

/// A self-check case: `input` must map to exactly the `output` records.
#[derive(Debug, Clone, Deserialize)]
pub struct MapTestCase {
    pub input: Record,
    pub output: Vec<Record>,
}

impl MapOptions {
    /// Parse the shared map params out of a step's params object. Unknown
    /// keys belong to the mapper and are ignored here.
    pub fn from_params(params: &Value, processor: &str) -> Result<Self, PipelineError> {
        let options: Self = match params {
            Value::Null => Self::default(),
            value => serde_json::from_value(value.clone())
                .map_err(|e| PipelineError::processor_construction(processor, e.to_string()))?,
        };
        if options.in_memory_chunksize == 0 {
            return Err(PipelineError::processor_construction(
                processor,
                "in_memory_chunksize must be at least 1",
            ));
        }
        Ok(options)
    }
}

/// Callback observing the collected per-entry metrics at finalize time.
pub type MetricsHook = Box<dyn FnMut(&RunStats, &[Metrics]) + Send>;

/// Drives a [`RecordMapper`] over a manifest: streaming and in-order in
/// serial mode, chunked over a worker pool when `max_workers >= 2`. Output
/// record order equals input record order in both modes.
pub struct MapProcessor {
    name: String,
    input_manifest: Option<PathBuf>,
    output_manifest: PathBuf,
    options: MapOptions,
    mapper: Box<dyn RecordMapper>,
    factory: MapperFactory,
    collected_metrics: Vec<Metrics>,
    metrics_hook: Option<MetricsHook>,
}

impl MapProcessor {
    pub fn new(
        spec: &ProcessorSpec,
        mapper: Box<dyn RecordMapper>,
        factory: MapperFactory,
        options: MapOptions,
    ) -> Self {
        Self {
            name: spec.step_id.clone(),
            input_manifest: spec.input_manifest.clone(),
            output_manifest: spec.output_manifest.clone(),
            options,
            mapper,
            factory,
            collected_metrics: Vec::new(),
            metrics_hook: None,
        }
    }

    /// Observe collected metrics when `finalize` runs.
    pub fn with_metrics_hook(mut self, hook: MetricsHook) -> Self {
        self.metrics_hook = Some(hook);
        self
    }

    /// Metrics gathered from every emitted entry (kept or dropped) so far.
    pub fn collected_metrics(&self) -> &[Metrics] {
        &self.collected_metrics
    }

    fn run_test_cases(&self) -> Result<(), PipelineError> {
        for (i, case) in self.options.test_cases.iter().enumerate() {
            let mut mapper = (self.factory)()?;
            let entries = mapper.process_record(&case.input).map_err(|e| {
                PipelineError::processor_construction(
                    &self.name,
                    format!("test_cases[{i}] raised: {e}"),
                )
            })?;
            let produced: Vec<&Record> = entries.iter().filter_map(|e| e.data()).collect();
            let expected: Vec<&Record> = case.output.iter().collect();
            if produced != expected {
                return Err(PipelineError::processor_construction(
                    &self.name,
                    format!(
                        "test_cases[{i}] mismatch: expected {}, got {}",
                        serde_json::to_string(&case.output).unwrap_or_default(),
                        serde_json::to_string(
                            &entries.iter().filter_map(|e| e.data()).collect::<Vec<_>>()
                        )
                        .unwrap_or_default(),
                    ),
                ));
            }
        }
        Ok(())
    }

    fn process_serial(&mut self, ctx: &RunContext) -> Result<RunStats, PipelineError> {
        let mut stats = RunStats::default();
        let mut writer = ManifestWriter::create(&self.output_manifest)?;

        let input = self
            .input_manifest
            .as_deref()
            .filter(|p| is_nonempty_file(p));
        if let Some(input) = input {
            for item in ManifestReader::open(input)? {
                ctx.cancel().check()?;
                let record = item?;
                let index = stats.num_in;
                stats.num_in += 1;
                let entries = self
                    .mapper
                    .process_record(&record)
                    .map_err(|e| execution_error(&self.name, index, e))?;
                write_group(
                    entries,
                    &mut stats,
                    &mut writer,
                    &mut self.collected_metrics,
                )?;
            }
        }

        writer.finish()?;
        Ok(stats)
    }
}

impl Processor for MapProcessor {
    fn name(&self) -> &str {
        &self.name
    }

    fn output_manifest(&self) -> &Path {
        &self.output_manifest
    }

    fn prepare(&mut self, _ctx: &RunContext) -> Result<(), PipelineError> {
        self.run_test_cases()
    }

    fn process(&mut self, ctx: &RunContext) -> Result<RunStats, PipelineError> {
        let start = Instant::now();
        let mut stats = if self.options.max_workers >= 2 {
            let (stats, metrics) = parallel::process_chunked(
                &self.name,
                self.input_manifest.as_deref(),
                &self.output_manifest,
                &self.factory,
                self.options.max_workers,
                self.options.in_memory_chunksize,
                ctx.cancel(),
            )?;
            self.collected_metrics.extend(metrics);
            stats
        } else {
            self.process_serial(ctx)?
        };
        stats.wall_time = start.elapsed();
        Ok(stats)
    }

    fn finalize(&mut self, _ctx: &RunContext, stats: &RunStats) -> Result<(), PipelineError> {
        if !self.collected_metrics.is_empty() {
            tracing::debug!(
                processor = %self.name,
                entries = self.collected_metrics.len(),
                "collected entry metrics"
            );
        }
        if let Some(hook) = self.metrics_hook.as_mut() {
            hook(stats, &self.collected_metrics);
        }
        Ok(())
    }
}

/// Tally one input record's emitted entries into the stats and write the
/// kept records, preserving emission order. Shared by the serial loop and
/// the parallel sink.
pub(crate) fn write_group(
    entries: Vec<DataEntry>,
    stats: &mut RunStats,
    writer: &mut ManifestWriter,
    metrics: &mut Vec<Metrics>,
) -> Result<(), PipelineError> {
    if entries.is_empty() {
        stats.dropped += 1;
        return Ok(());
    }
    stats.expanded += (entries.len() - 1) as u64;
    for entry in entries {
        if !entry.metrics().is_empty() {
            metrics.push(entry.metrics().clone());
        }
        match entry.into_data() {
            Some(record) => {
                writer.write(&record)?;
                stats.num_out += 1;
            }
            None => stats.dropped += 1,
        }
    }
    Ok(())
}

/// Wrap a mapper failure with the processor name and offending record index.
/// Cancellation and already-attributed execution errors pass through.
pub(crate) fn execution_error(
    processor: &str,
    record_index: u64,
    err: PipelineError,
) -> PipelineError {
    match err {
        e @ PipelineError::Cancelled { .. } | e @ PipelineError::ProcessorExecution { .. } => e,
        other => PipelineError::processor_execution(processor, record_index, other.to_string()),
    }
}
