//! Structural checks for persisted pipeline artifacts
//!
//! Validates documents against the expected schema and value ranges without
//! golden files.

#![allow(dead_code)]

use serde_json::Value;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationResult {
    pub errors: Vec<String>,
}

impl ValidationResult {
    pub fn error(&mut self, msg: String) {
        self.errors.push(msg);
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

fn check_confidence(value: &Value, at: &str, result: &mut ValidationResult) {
    match value.as_f64() {
        Some(c) if (0.0..=1.0).contains(&c) => {}
        Some(c) => result.error(format!("{at}: confidence {c} outside [0, 1]")),
        None => result.error(format!("{at}: confidence is not a number")),
    }
}

/// Shared envelope of every stage artifact
pub fn validate_stage_artifact(doc: &Value, stage: &str) -> ValidationResult {
    let mut result = ValidationResult::default();

    if doc["stage"] != stage {
        result.error(format!("stage is {}, expected {stage}", doc["stage"]));
    }
    if !doc["video_id"].is_string() {
        result.error("video_id missing".to_string());
    }
    match doc["params_fingerprint"].as_str() {
        Some(fp) if fp.len() == 64 && fp.chars().all(|c| c.is_ascii_hexdigit()) => {}
        _ => result.error("params_fingerprint is not a blake3 hex digest".to_string()),
    }

    let count = |key: &str| doc[key].as_u64().unwrap_or(u64::MAX);
    let planned = count("units_planned");
    let accounted = count("units_succeeded")
        .saturating_add(count("units_failed"))
        .saturating_add(count("units_skipped"));
    if planned == u64::MAX || accounted != planned {
        result.error(format!(
            "unit counts do not add up: planned {planned}, accounted {accounted}"
        ));
    }

    match doc["entries"].as_array() {
        Some(entries) => {
            if entries.len() as u64 != count("units_succeeded") {
                result.error(format!(
                    "{} entries for {} succeeded units",
                    entries.len(),
                    count("units_succeeded")
                ));
            }
            for (i, entry) in entries.iter().enumerate() {
                if !entry["key"].is_string() {
                    result.error(format!("entries[{i}]: key missing"));
                }
            }
        }
        None => result.error("entries is not an array".to_string()),
    }

    result
}

pub fn validate_detections(doc: &Value) -> ValidationResult {
    let mut result = validate_stage_artifact(doc, "detection");
    for (i, entry) in doc["entries"].as_array().into_iter().flatten().enumerate() {
        for (j, det) in entry["value"].as_array().into_iter().flatten().enumerate() {
            let at = format!("entries[{i}].value[{j}]");
            check_confidence(&det["confidence"], &at, &mut result);
            let bbox: Vec<f64> = det["bbox"]
                .as_array()
                .into_iter()
                .flatten()
                .filter_map(Value::as_f64)
                .collect();
            if bbox.len() != 4 || bbox[0] > bbox[2] || bbox[1] > bbox[3] {
                result.error(format!("{at}: malformed bbox {}", det["bbox"]));
            }
        }
    }
    result
}

pub fn validate_actions(doc: &Value) -> ValidationResult {
    let mut result = validate_stage_artifact(doc, "actions");
    let mut previous = None;
    for (i, entry) in doc["entries"].as_array().into_iter().flatten().enumerate() {
        let at = format!("entries[{i}]");
        check_confidence(&entry["value"]["confidence"], &at, &mut result);
        let start = entry["value"]["start_seconds"].as_u64();
        if start.is_none() || start <= previous {
            result.error(format!("{at}: window starts are not increasing"));
        }
        if entry["key"] != format!("{} sec", start.unwrap_or_default()) {
            result.error(format!("{at}: key {} does not match start", entry["key"]));
        }
        previous = start;
    }
    result
}

pub fn validate_captions(doc: &Value) -> ValidationResult {
    let mut result = validate_stage_artifact(doc, "captions");
    for (i, entry) in doc["entries"].as_array().into_iter().flatten().enumerate() {
        match entry["value"]["caption"].as_str() {
            Some(text) if !text.trim().is_empty() => {}
            _ => result.error(format!("entries[{i}]: empty caption")),
        }
    }
    result
}
