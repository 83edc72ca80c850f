use std::{
    fs,
    path::Path,
};
use uuid::Uuid;
use serde_json::Value;
use log::{info, warn, error};
use anyhow::Context;

// field holding the job input when the config does not name one
pub const DEFAULT_INPUT_FIELD: &str = "url";

// one unit of work as submitted to the runner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobInput {
    // position in the submission order
    pub index: usize,

    // opaque to the runner, e.g. a url
    pub value: String,
}

impl JobInput {
    pub fn from_values(values: Vec<String>) -> Vec<JobInput> {
        values.into_iter()
            .enumerate()
            .map(|(index, value)| JobInput { index, value })
            .collect()
    }
}

// short id to tag every log line of a run
pub fn new_run_id() -> String {
    Uuid::new_v4().simple().to_string()[..4].to_string()
}

/// Load the ordered job inputs from a JSON file.
///
/// Any read or parse failure is logged and yields an empty list, so the
/// runner simply has nothing to do.
pub fn load_inputs(
    file_path: impl AsRef<Path>,
    field: &str,
) -> Vec<String> {
    let file_path = file_path.as_ref();
    info!("Loading job inputs from `{}`", file_path.display());
    match try_load_inputs(file_path, field) {
        Ok(inputs) => {
            info!("Loaded `{}` job inputs.", inputs.len());
            inputs
        },

        Err(e) => {
            error!("An error occurred while loading job inputs: `{e:#}`");
            Vec::new()
        }
    }
}

fn try_load_inputs(
    file_path: &Path,
    field: &str,
) -> anyhow::Result<Vec<String>> {
    let contents = fs::read_to_string(file_path)
        .with_context(|| format!("Failed to read `{}`", file_path.display()))?;
    let records: Vec<Value> = serde_json::from_str(&contents)
        .with_context(|| format!("`{}` is not a JSON array", file_path.display()))?;
    Ok(extract_inputs(&records, field))
}

// records are usually objects like `{"url": "..."}`, bare strings are taken as-is
pub fn extract_inputs(records: &[Value], field: &str) -> Vec<String> {
    records.iter()
        .enumerate()
        .filter_map(|(i, record)| {
            let input = match record {
                Value::String(s) => Some(s.clone()),

                Value::Object(map) => map.get(field)
                    .and_then(Value::as_str)
                    // fall back to the first string-valued field
                    .or_else(|| map.values().find_map(Value::as_str))
                    .map(str::to_string),

                _ => None,
            };
            if input.is_none() {
                warn!("Record `{i}` has no string value to use as job input, skipped.");
            }
            input
        })
        .collect()
}
