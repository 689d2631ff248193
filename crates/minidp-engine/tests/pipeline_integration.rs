//! Integration tests for recipe execution: stitching, step selection, stats
//! identities, ordering, and the registry's dynamic tier.

use std::path::Path;
use std::sync::{Arc, Mutex, Once};

use serde::Deserialize;
use serde_json::{json, Value};
use tempfile::tempdir;

use minidp_engine::config::parser::recipe_from_value;
use minidp_engine::config::types::Recipe;
use minidp_engine::processor::{MapOptions, MapProcessor, MapperFactory, RecordMapper};
use minidp_engine::processors::mapper_factory;
use minidp_engine::registry;
use minidp_engine::{CancelToken, DataEntry, Metrics, PipelineError, PipelineRunner, Record};

fn recipe(value: Value) -> Recipe {
    recipe_from_value(value).unwrap()
}

fn write_manifest(path: &Path, lines: &str) {
    std::fs::write(path, lines).unwrap();
}

/// Splits a string field on commas, emitting one record per piece.
#[derive(Debug, Clone, Deserialize)]
struct SplitCsv {
    field: String,
}

impl RecordMapper for SplitCsv {
    fn process_record(&mut self, record: &Record) -> Result<Vec<DataEntry>, PipelineError> {
        let Some(text) = record.get(&self.field).and_then(|v| v.as_str()) else {
            return Ok(vec![DataEntry::new(record.clone())]);
        };
        Ok(text
            .split(',')
            .map(|piece| {
                let mut out = Record::new();
                out.insert(self.field.clone(), json!(piece));
                DataEntry::new(out)
            })
            .collect())
    }
}

fn ensure_split_csv_registered() {
    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        registry::global()
            .register_dynamic(
                "demo.processors.SplitCsv",
                "split a string field on commas",
                mapper_factory::<SplitCsv>(),
            )
            .unwrap();
    });
}

#[test]
fn test_single_step_pass_through() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("in.jsonl");
    let output = dir.path().join("out.jsonl");
    write_manifest(&input, "{\"a\":1}\n{\"a\":2}\n");

    let recipe = recipe(json!({
        "name": "passthrough",
        "workspace_dir": dir.path().join("ws"),
        "input_manifest": input,
        "output_manifest": output,
        "steps": [{"type": "PassThrough"}]
    }));

    let report = PipelineRunner::new().run_recipe_report(&recipe).unwrap();

    assert_eq!(
        std::fs::read_to_string(&output).unwrap(),
        "{\"a\":1}\n{\"a\":2}\n"
    );
    assert_eq!(report.steps.len(), 1);
    let stats = &report.steps[0].stats;
    assert_eq!(stats.num_in, 2);
    assert_eq!(stats.num_out, 2);
    assert_eq!(stats.dropped, 0);
    assert_eq!(stats.expanded, 0);
    assert!(stats.is_balanced());
    assert!(report.output_manifest.is_absolute());
}

#[test]
fn test_add_drop_rename_chain() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("in.jsonl");
    let output = dir.path().join("out.jsonl");
    write_manifest(&input, "{\"text\":\"x\"}\n");

    let recipe = recipe(json!({
        "workspace_dir": dir.path().join("ws"),
        "input_manifest": input,
        "output_manifest": output,
        "steps": [
            {"type": "AddConstantFields", "params": {"fields": {"src": "w"}}},
            {"type": "DropSpecifiedFields", "params": {"fields_to_drop": ["nope"]}},
            {"type": "RenameFields", "params": {"rename_fields": {"text": "content"}}}
        ]
    }));

    let report = PipelineRunner::new().run_recipe_report(&recipe).unwrap();

    assert_eq!(
        std::fs::read_to_string(&output).unwrap(),
        "{\"src\":\"w\",\"content\":\"x\"}\n"
    );
    assert_eq!(report.steps.len(), 3);
    for step in &report.steps {
        assert_eq!(step.stats.num_in, 1);
        assert_eq!(step.stats.num_out, 1);
    }
}

#[test]
fn test_filter_include_drops_non_matching() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("in.jsonl");
    let output = dir.path().join("out.jsonl");
    write_manifest(
        &input,
        "{\"lang\":\"en\"}\n{\"lang\":\"fr\"}\n{\"lang\":\"es\"}\n",
    );

    let recipe = recipe(json!({
        "workspace_dir": dir.path().join("ws"),
        "input_manifest": input,
        "output_manifest": output,
        "steps": [{
            "type": "FilterByField",
            "params": {"field": "lang", "values": ["en", "es"], "exclude": false}
        }]
    }));

    let report = PipelineRunner::new().run_recipe_report(&recipe).unwrap();

    assert_eq!(
        std::fs::read_to_string(&output).unwrap(),
        "{\"lang\":\"en\"}\n{\"lang\":\"es\"}\n"
    );
    let stats = &report.steps[0].stats;
    assert_eq!(stats.num_in, 3);
    assert_eq!(stats.num_out, 2);
    assert_eq!(stats.dropped, 1);
    assert!(stats.is_balanced());
}

#[test]
fn test_expand_via_dynamic_processor() {
    ensure_split_csv_registered();

    let dir = tempdir().unwrap();
    let input = dir.path().join("in.jsonl");
    let output = dir.path().join("out.jsonl");
    write_manifest(&input, "{\"csv\":\"a,b,c\"}\n");

    let recipe = recipe(json!({
        "workspace_dir": dir.path().join("ws"),
        "input_manifest": input,
        "output_manifest": output,
        "steps": [{
            "type": "demo.processors.SplitCsv",
            "params": {"field": "csv"}
        }]
    }));

    let report = PipelineRunner::new().run_recipe_report(&recipe).unwrap();

    assert_eq!(
        std::fs::read_to_string(&output).unwrap(),
        "{\"csv\":\"a\"}\n{\"csv\":\"b\"}\n{\"csv\":\"c\"}\n"
    );
    let stats = &report.steps[0].stats;
    assert_eq!(stats.num_in, 1);
    assert_eq!(stats.num_out, 3);
    assert_eq!(stats.expanded, 2);
    assert_eq!(stats.dropped, 0);
    assert!(stats.is_balanced());
}

#[test]
fn test_sort_descending() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("in.jsonl");
    let output = dir.path().join("out.jsonl");
    write_manifest(
        &input,
        "{\"score\":1}\n{\"score\":3}\n{\"score\":2}\n",
    );

    let recipe = recipe(json!({
        "workspace_dir": dir.path().join("ws"),
        "input_manifest": input,
        "output_manifest": output,
        "steps": [{
            "type": "SortManifest",
            "params": {"attribute_sort_by": "score", "descending": true}
        }]
    }));

    PipelineRunner::new().run_recipe(&recipe).unwrap();

    assert_eq!(
        std::fs::read_to_string(&output).unwrap(),
        "{\"score\":3}\n{\"score\":2}\n{\"score\":1}\n"
    );
}

#[test]
fn test_sort_ascending_puts_missing_field_last() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("in.jsonl");
    let output = dir.path().join("out.jsonl");
    write_manifest(&input, "{\"other\":1}\n{\"score\":2}\n{\"score\":1}\n");

    let recipe = recipe(json!({
        "workspace_dir": dir.path().join("ws"),
        "input_manifest": input,
        "output_manifest": output,
        "steps": [{
            "type": "SortManifest",
            "params": {"attribute_sort_by": "score"}
        }]
    }));

    PipelineRunner::new().run_recipe(&recipe).unwrap();

    assert_eq!(
        std::fs::read_to_string(&output).unwrap(),
        "{\"score\":1}\n{\"score\":2}\n{\"other\":1}\n"
    );
}

#[test]
fn test_parallel_matches_serial_output() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("in.jsonl");
    let mut lines = String::new();
    for i in 0..100 {
        lines.push_str(&format!("{{\"i\":{i}}}\n"));
    }
    write_manifest(&input, &lines);

    let run = |output: &Path, extra: Value| {
        let mut params = json!({"fields": {"tag": "v"}});
        params
            .as_object_mut()
            .unwrap()
            .extend(extra.as_object().unwrap().clone());
        let recipe = recipe(json!({
            "workspace_dir": dir.path().join("ws"),
            "input_manifest": input,
            "output_manifest": output,
            "steps": [{"type": "AddConstantFields", "params": params}]
        }));
        PipelineRunner::new().run_recipe_report(&recipe).unwrap()
    };

    let serial_out = dir.path().join("serial.jsonl");
    let parallel_out = dir.path().join("parallel.jsonl");
    let serial = run(&serial_out, json!({"max_workers": 1}));
    let parallel = run(
        &parallel_out,
        json!({"max_workers": 4, "in_memory_chunksize": 3}),
    );

    let serial_bytes = std::fs::read(&serial_out).unwrap();
    let parallel_bytes = std::fs::read(&parallel_out).unwrap();
    assert_eq!(serial_bytes, parallel_bytes);
    assert_eq!(serial.steps[0].stats.num_in, 100);
    assert_eq!(
        serial.steps[0].stats.num_out,
        parallel.steps[0].stats.num_out
    );
}

#[test]
fn test_stats_chain_between_steps() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("in.jsonl");
    let output = dir.path().join("out.jsonl");
    write_manifest(
        &input,
        "{\"lang\":\"en\"}\n{\"lang\":\"fr\"}\n{\"lang\":\"es\"}\n{\"lang\":\"en\"}\n",
    );

    let recipe = recipe(json!({
        "workspace_dir": dir.path().join("ws"),
        "input_manifest": input,
        "output_manifest": output,
        "steps": [
            {"type": "FilterByField", "params": {"field": "lang", "values": ["en", "es"]}},
            {"type": "AddConstantFields", "params": {"fields": {"kept": true}}},
            {"type": "PassThrough"}
        ]
    }));

    let report = PipelineRunner::new().run_recipe_report(&recipe).unwrap();

    assert_eq!(report.steps.len(), 3);
    for window in report.steps.windows(2) {
        assert_eq!(window[0].stats.num_out, window[1].stats.num_in);
    }
    for step in &report.steps {
        assert!(step.stats.is_balanced());
    }
}

#[test]
fn test_temp_dir_removed_on_success_and_kept_on_request() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("in.jsonl");
    let output = dir.path().join("out.jsonl");
    write_manifest(&input, "{\"a\":1}\n");
    let workspace = dir.path().join("ws");

    let recipe = recipe(json!({
        "workspace_dir": workspace,
        "input_manifest": input,
        "output_manifest": output,
        "steps": [
            {"type": "PassThrough"},
            {"type": "PassThrough"}
        ]
    }));

    let report = PipelineRunner::new().run_recipe_report(&recipe).unwrap();
    let tmp_run_dir = workspace.join(".tmp").join(&report.run_id);
    assert!(!tmp_run_dir.exists(), "temp dir should be gone after success");

    let report = PipelineRunner::new()
        .keep_temps(true)
        .run_recipe_report(&recipe)
        .unwrap();
    let tmp_run_dir = workspace.join(".tmp").join(&report.run_id);
    assert!(tmp_run_dir.exists());
    assert!(tmp_run_dir.join("step_0.jsonl").exists());
}

#[test]
fn test_failed_step_keeps_temp_files_and_skips_rest() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("in.jsonl");
    write_manifest(&input, "{\"a\":1}\n");
    let workspace = dir.path().join("ws");

    let recipe = recipe(json!({
        "workspace_dir": workspace,
        "input_manifest": input,
        "steps": [
            {"type": "PassThrough"},
            {"type": "NoSuchProcessor"},
            {"type": "PassThrough"}
        ]
    }));

    let err = PipelineRunner::new().run_recipe(&recipe).unwrap_err();
    assert!(matches!(err, PipelineError::UnknownProcessor { .. }));

    // Step 0 ran and its temp output survives the failure.
    let tmp_root = workspace.join(".tmp");
    let run_dirs: Vec<_> = std::fs::read_dir(&tmp_root).unwrap().collect();
    assert_eq!(run_dirs.len(), 1);
    let run_dir = run_dirs[0].as_ref().unwrap().path();
    assert!(run_dir.join("step_0.jsonl").exists());
    assert!(!run_dir.join("step_2.jsonl").exists());
}

#[test]
fn test_step_selection_windows() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("in.jsonl");
    write_manifest(&input, "{\"a\":1}\n");

    let run_selection = |selection: Value| {
        let output = dir.path().join("out.jsonl");
        let recipe = recipe(json!({
            "workspace_dir": dir.path().join("ws"),
            "input_manifest": input,
            "output_manifest": output,
            "steps_to_run": selection,
            "steps": [
                {"type": "PassThrough", "id": "s0"},
                {"type": "PassThrough", "id": "s1"},
                {"type": "PassThrough", "id": "s2"},
                {"type": "PassThrough", "id": "s3"},
                {"type": "PassThrough", "id": "s4"}
            ]
        }));
        let report = PipelineRunner::new().run_recipe_report(&recipe).unwrap();
        report
            .steps
            .iter()
            .map(|s| s.step_id.clone())
            .collect::<Vec<_>>()
    };

    assert_eq!(run_selection(json!("all")), ["s0", "s1", "s2", "s3", "s4"]);
    assert_eq!(run_selection(json!("2:")), ["s2", "s3", "s4"]);
    assert_eq!(run_selection(json!(":3")), ["s0", "s1", "s2"]);
    assert_eq!(run_selection(json!("1:4")), ["s1", "s2", "s3"]);
    assert_eq!(run_selection(json!("2")), ["s2"]);
    assert_eq!(run_selection(json!(2)), ["s2"]);
}

#[test]
fn test_empty_selection_passes_input_through() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("in.jsonl");
    write_manifest(&input, "{\"a\":1}\n");

    let recipe = recipe(json!({
        "workspace_dir": dir.path().join("ws"),
        "input_manifest": input,
        "steps_to_run": "0:0",
        "steps": [{"type": "PassThrough"}]
    }));

    let report = PipelineRunner::new().run_recipe_report(&recipe).unwrap();
    assert!(report.steps.is_empty());
    // The tempdir path is already absolute, so it passes through unchanged.
    assert_eq!(report.output_manifest, input);
}

#[test]
fn test_disabled_step_is_transparent_in_execution() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("in.jsonl");
    let output = dir.path().join("out.jsonl");
    write_manifest(&input, "{\"a\":1}\n");

    let recipe = recipe(json!({
        "workspace_dir": dir.path().join("ws"),
        "input_manifest": input,
        "output_manifest": output,
        "steps": [
            {"type": "AddConstantFields", "params": {"fields": {"first": 1}}},
            {"type": "AddConstantFields", "enabled": false,
             "params": {"fields": {"never": true}}},
            {"type": "AddConstantFields", "params": {"fields": {"third": 3}}}
        ]
    }));

    let report = PipelineRunner::new().run_recipe_report(&recipe).unwrap();

    assert_eq!(report.steps.len(), 2);
    let text = std::fs::read_to_string(&output).unwrap();
    assert!(text.contains("\"first\":1"));
    assert!(text.contains("\"third\":3"));
    assert!(!text.contains("never"));
}

#[test]
fn test_preview_returns_first_records_of_full_run() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("in.jsonl");
    let output = dir.path().join("out.jsonl");
    let mut lines = String::new();
    for i in 0..10 {
        lines.push_str(&format!("{{\"i\":{i}}}\n"));
    }
    write_manifest(&input, &lines);

    let recipe = recipe(json!({
        "workspace_dir": dir.path().join("ws"),
        "input_manifest": input,
        "output_manifest": output,
        "steps": [{"type": "AddConstantFields", "params": {"fields": {"seen": true}}}]
    }));

    let records = PipelineRunner::new().preview_recipe(&recipe, 3).unwrap();

    assert_eq!(records.len(), 3);
    assert_eq!(records[0]["i"], json!(0));
    assert_eq!(records[2]["i"], json!(2));
    // Preview does not truncate the pipeline: the full output exists.
    assert_eq!(std::fs::read_to_string(&output).unwrap().lines().count(), 10);
}

#[test]
fn test_cancelled_run_fails_before_executing_steps() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("in.jsonl");
    write_manifest(&input, "{\"a\":1}\n");

    let recipe = recipe(json!({
        "workspace_dir": dir.path().join("ws"),
        "input_manifest": input,
        "steps": [{"type": "PassThrough"}]
    }));

    let cancel = CancelToken::new();
    cancel.cancel("shutting down");
    let err = PipelineRunner::new()
        .run_recipe_with_cancel(&recipe, cancel)
        .unwrap_err();
    assert!(matches!(err, PipelineError::Cancelled { .. }));
}

#[test]
fn test_construction_error_names_processor_and_missing_param() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("in.jsonl");
    write_manifest(&input, "{\"a\":1}\n");

    let recipe = recipe(json!({
        "workspace_dir": dir.path().join("ws"),
        "input_manifest": input,
        "steps": [{"type": "FilterByField", "params": {"field": "lang"}}]
    }));

    let err = PipelineRunner::new().run_recipe(&recipe).unwrap_err();
    match err {
        PipelineError::ProcessorConstruction { processor, message } => {
            assert_eq!(processor, "FilterByField");
            assert!(message.contains("values"), "got: {message}");
        }
        other => panic!("unexpected error: {other}"),
    }
}

/// Drops every record but reports a metric for each, to make the
/// metrics-drop path observable through finalize.
struct DropAllWithMetrics;

impl RecordMapper for DropAllWithMetrics {
    fn process_record(&mut self, record: &Record) -> Result<Vec<DataEntry>, PipelineError> {
        let mut metrics = Metrics::new();
        metrics.insert("original_keys".to_string(), json!(record.len()));
        Ok(vec![DataEntry::dropped_with_metrics(metrics)])
    }
}

#[test]
fn test_metrics_survive_dropped_entries() {
    let seen: Arc<Mutex<Vec<Metrics>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();

    registry::global()
        .register_dynamic(
            "demo.processors.DropAllWithMetrics",
            "drop everything, keep metrics",
            Arc::new(move |spec| {
                let options = MapOptions::from_params(&spec.params, &spec.type_name)?;
                let worker_factory: MapperFactory =
                    Arc::new(|| Ok(Box::new(DropAllWithMetrics) as Box<dyn RecordMapper>));
                let sink = sink.clone();
                Ok(Box::new(
                    MapProcessor::new(
                        spec,
                        Box::new(DropAllWithMetrics),
                        worker_factory,
                        options,
                    )
                    .with_metrics_hook(Box::new(move |_, metrics| {
                        sink.lock().unwrap().extend(metrics.iter().cloned());
                    })),
                ) as Box<dyn minidp_engine::Processor>)
            }),
        )
        .unwrap();

    let dir = tempdir().unwrap();
    let input = dir.path().join("in.jsonl");
    let output = dir.path().join("out.jsonl");
    write_manifest(&input, "{\"a\":1,\"b\":2}\n{\"c\":3}\n");

    let recipe = recipe(json!({
        "workspace_dir": dir.path().join("ws"),
        "input_manifest": input,
        "output_manifest": output,
        "steps": [{"type": "demo.processors.DropAllWithMetrics"}]
    }));

    let report = PipelineRunner::new().run_recipe_report(&recipe).unwrap();

    let stats = &report.steps[0].stats;
    assert_eq!(stats.num_in, 2);
    assert_eq!(stats.num_out, 0);
    assert_eq!(stats.dropped, 2);
    assert!(stats.is_balanced());
    // Nothing written, but the metrics reached the finalize hook.
    assert_eq!(std::fs::read_to_string(&output).unwrap(), "");
    let metrics = seen.lock().unwrap();
    assert_eq!(metrics.len(), 2);
    assert_eq!(metrics[0]["original_keys"], json!(2));
    assert_eq!(metrics[1]["original_keys"], json!(1));
}

#[test]
fn test_map_test_cases_self_check() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("in.jsonl");
    let output = dir.path().join("out.jsonl");
    write_manifest(&input, "{\"a\":1}\n");

    let good = recipe(json!({
        "workspace_dir": dir.path().join("ws"),
        "input_manifest": input,
        "output_manifest": output,
        "steps": [{
            "type": "AddConstantFields",
            "params": {
                "fields": {"tag": "v"},
                "test_cases": [
                    {"input": {"a": 1}, "output": [{"a": 1, "tag": "v"}]}
                ]
            }
        }]
    }));
    assert!(PipelineRunner::new().run_recipe(&good).is_ok());

    let bad = recipe(json!({
        "workspace_dir": dir.path().join("ws"),
        "input_manifest": input,
        "output_manifest": output,
        "steps": [{
            "type": "AddConstantFields",
            "params": {
                "fields": {"tag": "v"},
                "test_cases": [
                    {"input": {"a": 1}, "output": [{"a": 1, "tag": "WRONG"}]}
                ]
            }
        }]
    }));
    let err = PipelineRunner::new().run_recipe(&bad).unwrap_err();
    assert!(matches!(err, PipelineError::ProcessorConstruction { .. }));
}

#[test]
fn test_execution_error_reports_record_index() {
    /// Fails on the record whose "i" equals the configured value.
    #[derive(Debug, Clone, Deserialize)]
    struct FailOn {
        fail_at: i64,
    }

    impl RecordMapper for FailOn {
        fn process_record(&mut self, record: &Record) -> Result<Vec<DataEntry>, PipelineError> {
            if record.get("i").and_then(|v| v.as_i64()) == Some(self.fail_at) {
                return Err(PipelineError::processor_construction("FailOn", "bad record"));
            }
            Ok(vec![DataEntry::new(record.clone())])
        }
    }

    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        registry::global()
            .register_dynamic(
                "demo.processors.FailOn",
                "fail on a chosen record",
                mapper_factory::<FailOn>(),
            )
            .unwrap();
    });

    let dir = tempdir().unwrap();
    let input = dir.path().join("in.jsonl");
    write_manifest(&input, "{\"i\":0}\n{\"i\":1}\n{\"i\":2}\n");

    let recipe = recipe(json!({
        "workspace_dir": dir.path().join("ws"),
        "input_manifest": input,
        "steps": [{"type": "demo.processors.FailOn", "params": {"fail_at": 1}}]
    }));

    let err = PipelineRunner::new().run_recipe(&recipe).unwrap_err();
    match err {
        PipelineError::ProcessorExecution { record_index, .. } => assert_eq!(record_index, 1),
        other => panic!("unexpected error: {other}"),
    }
}
