//! Process-wide processor registry.
//!
//! Two tiers: `builtin` maps short names registered at program start;
//! `dynamic` maps dotted import-path names populated by the host at runtime
//! (the statically-compiled stand-in for loading a constructor by module
//! path). A short name always wins over a colliding dotted path.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex};

use minidp_types::PipelineError;

use crate::processor::{Processor, ProcessorSpec};

/// Builds a processor instance for one step from its resolved spec.
pub type ProcessorFactory =
    Arc<dyn Fn(&ProcessorSpec) -> Result<Box<dyn Processor>, PipelineError> + Send + Sync>;

#[derive(Clone)]
struct Registration {
    summary: String,
    factory: ProcessorFactory,
}

/// Name → constructor mapping. Read-only after startup in the common case;
/// runtime registrations serialize behind the internal mutexes.
#[derive(Default)]
pub struct ProcessorRegistry {
    builtin: Mutex<HashMap<String, Registration>>,
    dynamic: Mutex<HashMap<String, Registration>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a short-name constructor. Errs if the name is taken.
    pub fn register(
        &self,
        name: impl Into<String>,
        summary: impl Into<String>,
        factory: ProcessorFactory,
    ) -> Result<(), PipelineError> {
        let name = name.into();
        let mut map = self.builtin.lock().unwrap_or_else(|p| p.into_inner());
        if map.contains_key(&name) {
            return Err(PipelineError::duplicate_processor(name));
        }
        map.insert(
            name,
            Registration {
                summary: summary.into(),
                factory,
            },
        );
        Ok(())
    }

    /// Register a dotted import-path constructor supplied by the host
    /// (e.g. `"myapp.processors.SplitCsv"`).
    pub fn register_dynamic(
        &self,
        path: impl Into<String>,
        summary: impl Into<String>,
        factory: ProcessorFactory,
    ) -> Result<(), PipelineError> {
        let path = path.into();
        if !path.contains('.') {
            return Err(PipelineError::processor_construction(
                &path,
                "dynamic registrations must use a dotted import path",
            ));
        }
        let mut map = self.dynamic.lock().unwrap_or_else(|p| p.into_inner());
        if map.contains_key(&path) {
            return Err(PipelineError::duplicate_processor(path));
        }
        map.insert(
            path,
            Registration {
                summary: summary.into(),
                factory,
            },
        );
        Ok(())
    }

    fn resolve(&self, type_name: &str) -> Result<ProcessorFactory, PipelineError> {
        if let Some(reg) = self
            .builtin
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(type_name)
        {
            return Ok(reg.factory.clone());
        }
        if type_name.contains('.') {
            if let Some(reg) = self
                .dynamic
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .get(type_name)
            {
                return Ok(reg.factory.clone());
            }
        }
        Err(PipelineError::unknown_processor(type_name))
    }

    /// True when the name resolves to a constructor.
    pub fn contains(&self, type_name: &str) -> bool {
        self.resolve(type_name).is_ok()
    }

    /// Construct a processor for the given spec.
    pub fn create(&self, spec: &ProcessorSpec) -> Result<Box<dyn Processor>, PipelineError> {
        let factory = self.resolve(&spec.type_name)?;
        factory(spec)
    }

    /// Registered `(name, summary)` pairs, built-ins first, each tier sorted.
    pub fn list(&self) -> Vec<(String, String)> {
        let mut entries: Vec<(String, String)> = self
            .builtin
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .map(|(name, reg)| (name.clone(), reg.summary.clone()))
            .collect();
        entries.sort();
        let mut dynamic: Vec<(String, String)> = self
            .dynamic
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .map(|(name, reg)| (name.clone(), reg.summary.clone()))
            .collect();
        dynamic.sort();
        entries.extend(dynamic);
        entries
    }
}

static GLOBAL: LazyLock<ProcessorRegistry> = LazyLock::new(|| {
    let registry = ProcessorRegistry::new();
    crate::processors::register_builtins(&registry)
        .expect("built-in processor names are unique");
    registry
});

/// The process-wide registry, seeded with all built-ins before first use.
pub fn global() -> &'static ProcessorRegistry {
    &GLOBAL
}
