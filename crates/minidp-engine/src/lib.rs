//! MiniDP engine: recipe interpretation, processor registry, streaming
//! manifest flow, and the pipeline runner.

pub mod config;
pub mod manifest;
pub mod parallel;
pub mod processor;
pub mod processors;
pub mod registry;
pub mod runner;

pub use minidp_types::{CancelToken, DataEntry, Metrics, PipelineError, Record, RunStats};
pub use processor::{MapOptions, MapProcessor, Processor, ProcessorSpec, RecordMapper};
pub use registry::ProcessorRegistry;
pub use runner::{PipelineRunner, RunContext, RunReport};
