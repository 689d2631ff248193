//! Generic built-in processors. Data-agnostic: they work with any record
//! shape and keep no cross-record state.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use minidp_types::{DataEntry, PipelineError, Record, RunStats};

use crate::manifest::{read_records, ManifestWriter};
use crate::processor::{Processor, ProcessorSpec, RecordMapper};
use crate::processors::parse_mapper_params;
use crate::runner::RunContext;

/// An ordered `{from: to}` field mapping with string targets.
#[derive(Debug, Clone)]
pub struct FieldMap(Vec<(String, String)>);

impl FieldMap {
    pub fn pairs(&self) -> &[(String, String)] {
        &self.0
    }
}

impl<'de> Deserialize<'de> for FieldMap {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let map = serde_json::Map::<String, Value>::deserialize(deserializer)?;
        let mut pairs = Vec::with_capacity(map.len());
        for (key, value) in map {
            match value {
                Value::String(target) => pairs.push((key, target)),
                other => {
                    return Err(serde::de::Error::custom(format!(
                        "field '{key}' must map to a string field name, got {other}"
                    )))
                }
            }
        }
        Ok(Self(pairs))
    }
}

/// Shallow-merge constant fields into every record, overwriting existing
/// keys.
#[derive(Debug, Clone, Deserialize)]
pub struct AddConstantFields {
    fields: Record,
}

impl RecordMapper for AddConstantFields {
    fn process_record(&mut self, record: &Record) -> Result<Vec<DataEntry>, PipelineError> {
        let mut out = record.clone();
        for (key, value) in &self.fields {
            out.insert(key.clone(), value.clone());
        }
        Ok(vec![DataEntry::new(out)])
    }
}

/// Remove the listed fields. Missing fields are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct DropSpecifiedFields {
    fields_to_drop: HashSet<String>,
}

impl RecordMapper for DropSpecifiedFields {
    fn process_record(&mut self, record: &Record) -> Result<Vec<DataEntry>, PipelineError> {
        let out: Record = record
            .iter()
            .filter(|(key, _)| !self.fields_to_drop.contains(key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        Ok(vec![DataEntry::new(out)])
    }
}

/// Keep only the listed fields that exist.
#[derive(Debug, Clone, Deserialize)]
pub struct KeepOnlySpecifiedFields {
    fields_to_keep: HashSet<String>,
}

impl RecordMapper for KeepOnlySpecifiedFields {
    fn process_record(&mut self, record: &Record) -> Result<Vec<DataEntry>, PipelineError> {
        let out: Record = record
            .iter()
            .filter(|(key, _)| self.fields_to_keep.contains(key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        Ok(vec![DataEntry::new(out)])
    }
}

/// Rename fields. Every rename observes the pre-rename record: all source
/// keys are removed first, then targets are inserted in params order from
/// the original values (later inserts overwrite). A chain `a->b`, `b->c`
/// over a record holding both yields `b = old a`, `c = old b`.
#[derive(Debug, Clone, Deserialize)]
pub struct RenameFields {
    rename_fields: FieldMap,
}

impl RecordMapper for RenameFields {
    fn process_record(&mut self, record: &Record) -> Result<Vec<DataEntry>, PipelineError> {
        let mut out = record.clone();
        for (old, _) in self.rename_fields.pairs() {
            out.remove(old);
        }
        for (old, new) in self.rename_fields.pairs() {
            if let Some(value) = record.get(old) {
                out.insert(new.clone(), value.clone());
            }
        }
        Ok(vec![DataEntry::new(out)])
    }
}

/// Copy the value of `src` into `dst` (deep copy) when `src` exists.
#[derive(Debug, Clone, Deserialize)]
pub struct DuplicateFields {
    duplicate_fields: FieldMap,
}

impl RecordMapper for DuplicateFields {
    fn process_record(&mut self, record: &Record) -> Result<Vec<DataEntry>, PipelineError> {
        let mut out = record.clone();
        for (src, dst) in self.duplicate_fields.pairs() {
            if let Some(value) = record.get(src) {
                out.insert(dst.clone(), value.clone());
            }
        }
        Ok(vec![DataEntry::new(out)])
    }
}

/// Keep a record iff `(record[field] in values) XOR exclude`. A missing
/// field never matches.
#[derive(Debug, Clone, Deserialize)]
pub struct FilterByField {
    field: String,
    values: Vec<Value>,
    #[serde(default)]
    exclude: bool,
}

impl RecordMapper for FilterByField {
    fn process_record(&mut self, record: &Record) -> Result<Vec<DataEntry>, PipelineError> {
        let matches = record
            .get(&self.field)
            .map(|value| self.values.contains(value))
            .unwrap_or(false);
        if matches != self.exclude {
            Ok(vec![DataEntry::new(record.clone())])
        } else {
            Ok(Vec::new())
        }
    }
}

/// Emit records unchanged.
#[derive(Debug, Clone, Deserialize)]
pub struct PassThrough {}

impl RecordMapper for PassThrough {
    fn process_record(&mut self, record: &Record) -> Result<Vec<DataEntry>, PipelineError> {
        Ok(vec![DataEntry::new(record.clone())])
    }
}

#[derive(Debug, Clone, Deserialize)]
struct SortParams {
    attribute_sort_by: String,
    #[serde(default)]
    descending: bool,
}

/// Sort the whole manifest by one attribute. Non-streaming: loads every
/// record into memory, so it implements [`Processor`] directly. Missing
/// fields sort last ascending, first descending; the sort is stable, so
/// ties keep input order.
pub struct SortManifest {
    name: String,
    input_manifest: Option<PathBuf>,
    output_manifest: PathBuf,
    attribute_sort_by: String,
    descending: bool,
}

impl SortManifest {
    pub fn from_spec(spec: &ProcessorSpec) -> Result<Self, PipelineError> {
        let params: SortParams = parse_mapper_params(&spec.type_name, &spec.params)?;
        Ok(Self {
            name: spec.step_id.clone(),
            input_manifest: spec.input_manifest.clone(),
            output_manifest: spec.output_manifest.clone(),
            attribute_sort_by: params.attribute_sort_by,
            descending: params.descending,
        })
    }
}

impl Processor for SortManifest {
    fn name(&self) -> &str {
        &self.name
    }

    fn output_manifest(&self) -> &Path {
        &self.output_manifest
    }

    fn process(&mut self, ctx: &RunContext) -> Result<RunStats, PipelineError> {
        let start = Instant::now();
        ctx.cancel().check()?;

        let mut records = match &self.input_manifest {
            Some(path) => read_records(path)?,
            None => Vec::new(),
        };
        let num_in = records.len() as u64;

        let field = self.attribute_sort_by.as_str();
        let descending = self.descending;
        records.sort_by(|a, b| match (a.get(field), b.get(field)) {
            (Some(x), Some(y)) => {
                let order = json_cmp(x, y);
                if descending {
                    order.reverse()
                } else {
                    order
                }
            }
            (None, None) => Ordering::Equal,
            (None, Some(_)) => {
                if descending {
                    Ordering::Less
                } else {
                    Ordering::Greater
                }
            }
            (Some(_), None) => {
                if descending {
                    Ordering::Greater
                } else {
                    Ordering::Less
                }
            }
        });

        let mut writer = ManifestWriter::create(&self.output_manifest)?;
        for record in &records {
            ctx.cancel().check()?;
            writer.write(record)?;
        }
        let num_out = writer.finish()?;

        Ok(RunStats {
            num_in,
            num_out,
            dropped: 0,
            expanded: 0,
            wall_time: start.elapsed(),
        })
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order over JSON values: by type rank, then within a type (numbers
/// via f64, arrays lexicographic, objects by size then serialized text).
fn json_cmp(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(0.0);
            let y = y.as_f64().unwrap_or(0.0);
            x.total_cmp(&y)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (ex, ey) in x.iter().zip(y.iter()) {
                let order = json_cmp(ex, ey);
                if order != Ordering::Equal {
                    return order;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Object(x), Value::Object(y)) => x.len().cmp(&y.len()).then_with(|| {
            let sx = serde_json::to_string(a).unwrap_or_default();
            let sy = serde_json::to_string(b).unwrap_or_default();
            sx.cmp(&sy)
        }),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}
