//! Built-in processors and registration helpers.

pub mod common;

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use minidp_types::PipelineError;

use crate::processor::{
    MapOptions, MapProcessor, MapperFactory, Processor, ProcessorSpec, RecordMapper,
};
use crate::registry::{ProcessorFactory, ProcessorRegistry};

/// Parse a mapper's params struct out of a step's params object. Absent
/// params read as `{}`; unknown keys are left for the shared map options.
pub fn parse_mapper_params<M: DeserializeOwned>(
    processor: &str,
    params: &Value,
) -> Result<M, PipelineError> {
    let value = match params {
        Value::Null => Value::Object(serde_json::Map::new()),
        other => other.clone(),
    };
    serde_json::from_value(value)
        .map_err(|e| PipelineError::processor_construction(processor, e.to_string()))
}

/// Build a registry factory for a deserializable [`RecordMapper`] type.
///
/// The step's params are parsed once for the serial instance and re-parsed
/// by each parallel worker, so worker instances are reconstructed from
/// type+params rather than shared.
pub fn mapper_factory<M>() -> ProcessorFactory
where
    M: RecordMapper + DeserializeOwned + Send + 'static,
{
    Arc::new(|spec: &ProcessorSpec| {
        let mapper: M = parse_mapper_params(&spec.type_name, &spec.params)?;
        let options = MapOptions::from_params(&spec.params, &spec.type_name)?;
        let type_name = spec.type_name.clone();
        let params = spec.params.clone();
        let factory: MapperFactory = Arc::new(move || {
            parse_mapper_params::<M>(&type_name, &params)
                .map(|m| Box::new(m) as Box<dyn RecordMapper>)
        });
        Ok(Box::new(MapProcessor::new(spec, Box::new(mapper), factory, options))
            as Box<dyn Processor>)
    })
}

/// Register the eight built-in processors.
pub fn register_builtins(registry: &ProcessorRegistry) -> Result<(), PipelineError> {
    registry.register(
        "AddConstantFields",
        "Merge constant fields into every record, overwriting existing keys",
        mapper_factory::<common::AddConstantFields>(),
    )?;
    registry.register(
        "DropSpecifiedFields",
        "Remove the listed fields from every record",
        mapper_factory::<common::DropSpecifiedFields>(),
    )?;
    registry.register(
        "KeepOnlySpecifiedFields",
        "Keep only the listed fields in every record",
        mapper_factory::<common::KeepOnlySpecifiedFields>(),
    )?;
    registry.register(
        "RenameFields",
        "Rename fields, each rename reading the pre-rename record",
        mapper_factory::<common::RenameFields>(),
    )?;
    registry.register(
        "DuplicateFields",
        "Copy field values to new field names",
        mapper_factory::<common::DuplicateFields>(),
    )?;
    registry.register(
        "FilterByField",
        "Keep or exclude records by matching a field against a value list",
        mapper_factory::<common::FilterByField>(),
    )?;
    registry.register(
        "SortManifest",
        "Sort all records by an attribute (loads the manifest into memory)",
        Arc::new(|spec: &ProcessorSpec| {
            common::SortManifest::from_spec(spec).map(|p| Box::new(p) as Box<dyn Processor>)
        }),
    )?;
    registry.register(
        "PassThrough",
        "Emit records unchanged",
        mapper_factory::<common::PassThrough>(),
    )?;
    Ok(())
}
