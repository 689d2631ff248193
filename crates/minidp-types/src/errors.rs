//! Typed error model shared across the engine and CLI.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// All failure kinds a pipeline run can surface.
///
/// Processors report these to the runner; the runner does not recover from
/// any of them. The CLI prints the error with context and exits 1.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Recipe schema or slice-expression violation, with the JSON path of the
    /// offending field (e.g. `steps[2].type`).
    #[error("invalid recipe at '{path}': {message}")]
    RecipeValidation { path: String, message: String },

    /// A step `type` that is neither a registered short name nor a known
    /// dotted import path.
    #[error("unknown processor type '{name}'")]
    UnknownProcessor { name: String },

    /// A processor constructor rejected its params.
    #[error("processor '{processor}' rejected params: {message}")]
    ProcessorConstruction { processor: String, message: String },

    /// A manifest could not be read. `line` is 1-based; 0 means the file
    /// itself could not be opened.
    #[error("failed to read manifest {}:{line}: {message}", .path.display())]
    ManifestRead {
        path: PathBuf,
        line: u64,
        message: String,
    },

    /// A manifest could not be written.
    #[error("failed to write manifest {}: {message}", .path.display())]
    ManifestWrite { path: PathBuf, message: String },

    /// A processor failed while handling a record. `record_index` is the
    /// 0-based index into the step's input manifest.
    #[error("processor '{processor}' failed on record {record_index}: {message}")]
    ProcessorExecution {
        processor: String,
        record_index: u64,
        message: String,
    },

    /// The run was cancelled by the caller.
    #[error("run cancelled: {reason}")]
    Cancelled { reason: String },

    /// A name was registered twice in the processor registry.
    #[error("processor '{name}' is already registered")]
    DuplicateProcessor { name: String },
}

impl PipelineError {
    pub fn recipe_validation(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::RecipeValidation {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn unknown_processor(name: impl Into<String>) -> Self {
        Self::UnknownProcessor { name: name.into() }
    }

    pub fn processor_construction(
        processor: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::ProcessorConstruction {
            processor: processor.into(),
            message: message.into(),
        }
    }

    pub fn manifest_read(path: impl Into<PathBuf>, line: u64, message: impl Into<String>) -> Self {
        Self::ManifestRead {
            path: path.into(),
            line,
            message: message.into(),
        }
    }

    pub fn manifest_open(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::ManifestRead {
            path: path.into(),
            line: 0,
            message: message.into(),
        }
    }

    pub fn manifest_write(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::ManifestWrite {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn processor_execution(
        processor: impl Into<String>,
        record_index: u64,
        message: impl Into<String>,
    ) -> Self {
        Self::ProcessorExecution {
            processor: processor.into(),
            record_index,
            message: message.into(),
        }
    }

    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::Cancelled {
            reason: reason.into(),
        }
    }

    pub fn duplicate_processor(name: impl Into<String>) -> Self {
        Self::DuplicateProcessor { name: name.into() }
    }

    /// Helper for write-side I/O errors.
    pub fn write_io(path: &Path, err: &std::io::Error) -> Self {
        Self::manifest_write(path, err.to_string())
    }
}
