use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Map, Value};

/// Reserved tool name carried by summary records. Real tools never use it.
pub const SUMMARY_TOOL_NAME: &str = "_historical_summary";

/// Outcome status of a tool call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Success,
    Error,
    /// Any status string other tools report, kept verbatim.
    #[serde(untagged)]
    Other(String),
}

impl ActionStatus {
    pub fn as_str(&self) -> &str {
        match self {
            ActionStatus::Success => "success",
            ActionStatus::Error => "error",
            ActionStatus::Other(s) => s,
        }
    }
}

/// Token counts recorded on a field the engine rewrote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldCompression {
    pub original_tokens: usize,
    pub compressed_tokens: usize,
}

/// Result of one tool or sub-agent invocation.
///
/// The `_`-prefixed keys on the wire belong to the compression engine and are
/// modelled as typed fields; every other key lands in `extra` untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ActionStatus>,
    #[serde(default, deserialize_with = "lenient_output")]
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_information: Option<String>,

    #[serde(rename = "_is_summary", default, skip_serializing_if = "is_false")]
    pub is_summary: bool,
    #[serde(rename = "_summarized_count", default, skip_serializing_if = "Option::is_none")]
    pub summarized_count: Option<usize>,
    #[serde(rename = "_chunked", default, skip_serializing_if = "is_false")]
    pub chunked: bool,
    #[serde(rename = "_compressed", default, skip_serializing_if = "is_false")]
    pub compressed: bool,
    #[serde(rename = "_original_tokens", default, skip_serializing_if = "Option::is_none")]
    pub original_tokens: Option<usize>,
    #[serde(rename = "_compressed_tokens", default, skip_serializing_if = "Option::is_none")]
    pub compressed_tokens: Option<usize>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// Null becomes empty; non-string values keep their JSON text.
fn lenient_output<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Null => String::new(),
        Value::String(s) => s,
        other => other.to_string(),
    })
}

fn lenient_string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(d)?.unwrap_or_default())
}

fn lenient_arguments<'de, D: Deserializer<'de>>(d: D) -> Result<Map<String, Value>, D::Error> {
    Ok(arguments_map(Value::deserialize(d)?))
}

fn lenient_result<'de, D: Deserializer<'de>>(d: D) -> Result<ActionResult, D::Error> {
    Ok(Option::<ActionResult>::deserialize(d)?.unwrap_or_default())
}

fn arguments_map(arguments: Value) -> Map<String, Value> {
    match arguments {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("value".into(), other);
            map
        }
    }
}

impl ActionResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            status: Some(ActionStatus::Success),
            output: output.into(),
            ..Default::default()
        }
    }

    pub fn error(info: impl Into<String>) -> Self {
        Self {
            status: Some(ActionStatus::Error),
            error_information: Some(info.into()),
            ..Default::default()
        }
    }

    /// Status string for display, `"unknown"` when the record had none.
    pub fn status_str(&self) -> &str {
        self.status.as_ref().map(ActionStatus::as_str).unwrap_or("unknown")
    }

    /// Record that `output` was rewritten from `original` to `compressed` tokens.
    pub fn mark_compressed(&mut self, marker: FieldCompression) {
        self.compressed = true;
        self.original_tokens = Some(marker.original_tokens);
        self.compressed_tokens = Some(marker.compressed_tokens);
    }

    pub fn output_compression(&self) -> Option<FieldCompression> {
        if !self.compressed {
            return None;
        }
        Some(FieldCompression {
            original_tokens: self.original_tokens?,
            compressed_tokens: self.compressed_tokens?,
        })
    }
}

/// What a record is, read from its explicit annotations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Tool,
    Summary,
    Compressed,
}

/// How a summary record's text was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryMethod {
    Llm,
    Chunked,
    Statistical,
}

impl SummaryMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            SummaryMethod::Llm => "llm_summarization",
            SummaryMethod::Chunked => "chunked_summarization",
            SummaryMethod::Statistical => "statistical",
        }
    }
}

/// One logged tool or sub-agent invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    #[serde(default, deserialize_with = "lenient_string")]
    pub tool_name: String,
    #[serde(default, deserialize_with = "lenient_arguments")]
    pub arguments: Map<String, Value>,
    #[serde(default, deserialize_with = "lenient_result")]
    pub result: ActionResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(
        rename = "_compressed_arguments",
        default,
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub compressed_arguments: BTreeMap<String, FieldCompression>,
}

impl ActionRecord {
    pub fn new(tool_name: impl Into<String>, arguments: Value, result: ActionResult) -> Self {
        Self {
            tool_name: tool_name.into(),
            arguments: arguments_map(arguments),
            result,
            timestamp: None,
            compressed_arguments: BTreeMap::new(),
        }
    }

    pub fn with_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = Some(timestamp.into());
        self
    }

    /// Build the synthetic record that stands in for `count` historical actions.
    pub fn summary(text: impl Into<String>, count: usize, method: SummaryMethod) -> Self {
        let result = ActionResult {
            status: Some(ActionStatus::Success),
            output: text.into(),
            is_summary: true,
            summarized_count: Some(count),
            chunked: method == SummaryMethod::Chunked,
            ..Default::default()
        };
        let mut arguments = Map::new();
        arguments.insert("action_count".into(), json!(count));
        arguments.insert("summary_method".into(), json!(method.as_str()));
        Self {
            tool_name: SUMMARY_TOOL_NAME.into(),
            arguments,
            result,
            timestamp: Some(chrono::Utc::now().to_rfc3339()),
            compressed_arguments: BTreeMap::new(),
        }
    }

    pub fn is_summary(&self) -> bool {
        self.tool_name == SUMMARY_TOOL_NAME && self.result.is_summary
    }

    pub fn is_compressed(&self) -> bool {
        self.result.compressed || !self.compressed_arguments.is_empty()
    }

    /// Original actions this record stands for: its `_summarized_count` for
    /// a summary, 1 otherwise.
    pub fn subsumed_count(&self) -> usize {
        if self.is_summary() {
            self.result.summarized_count.unwrap_or(1)
        } else {
            1
        }
    }

    pub fn kind(&self) -> ActionKind {
        if self.is_summary() {
            ActionKind::Summary
        } else if self.is_compressed() {
            ActionKind::Compressed
        } else {
            ActionKind::Tool
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_permissively() {
        let record: ActionRecord = serde_json::from_value(json!({"tool_name": "t1"})).unwrap();
        assert_eq!(record.tool_name, "t1");
        assert!(record.arguments.is_empty());
        assert_eq!(record.result.output, "");
        assert!(record.result.status.is_none());
        assert_eq!(record.result.status_str(), "unknown");

        let empty: ActionRecord = serde_json::from_value(json!({})).unwrap();
        assert_eq!(empty.tool_name, "");
    }

    #[test]
    fn null_and_structured_fields_are_tolerated() {
        let record: ActionRecord = serde_json::from_value(json!({
            "tool_name": null,
            "arguments": null,
            "result": {"status": "success", "output": {"rows": 3}}
        }))
        .unwrap();
        assert_eq!(record.tool_name, "");
        assert!(record.arguments.is_empty());
        assert_eq!(record.result.output, r#"{"rows":3}"#);

        let record: ActionRecord =
            serde_json::from_value(json!({"tool_name": "t", "arguments": [1, 2], "result": null}))
                .unwrap();
        assert_eq!(record.arguments["value"], json!([1, 2]));
        assert_eq!(record.result, ActionResult::default());

        let result: ActionResult = serde_json::from_value(json!({"output": null})).unwrap();
        assert_eq!(result.output, "");
        let result: ActionResult = serde_json::from_value(json!({"output": 42})).unwrap();
        assert_eq!(result.output, "42");
    }

    #[test]
    fn subsumed_count_follows_prior_summaries() {
        let summary = ActionRecord::summary("earlier work", 4, SummaryMethod::Llm);
        assert_eq!(summary.subsumed_count(), 4);
        let plain = ActionRecord::new("read", json!({}), ActionResult::success("x"));
        assert_eq!(plain.subsumed_count(), 1);
        let mut fake = plain.clone();
        fake.result.summarized_count = Some(9);
        assert_eq!(fake.subsumed_count(), 1);
    }

    #[test]
    fn unknown_status_is_kept_verbatim() {
        let result: ActionResult =
            serde_json::from_value(json!({"status": "partial", "output": "x"})).unwrap();
        assert_eq!(result.status, Some(ActionStatus::Other("partial".into())));
        assert_eq!(serde_json::to_value(&result).unwrap()["status"], "partial");

        let ok: ActionResult = serde_json::from_value(json!({"status": "success"})).unwrap();
        assert_eq!(ok.status, Some(ActionStatus::Success));
    }

    #[test]
    fn extra_result_fields_round_trip() {
        let raw = json!({
            "status": "success",
            "output": "done",
            "exit_code": 0,
            "files": ["a.rs", "b.rs"],
            "meta": {"nested": {"deep": true}}
        });
        let result: ActionResult = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(result.extra["exit_code"], 0);
        assert_eq!(serde_json::to_value(&result).unwrap(), raw);
    }

    #[test]
    fn annotations_are_omitted_when_unset() {
        let value = serde_json::to_value(ActionResult::success("ok")).unwrap();
        let obj = value.as_object().unwrap();
        assert!(obj.keys().all(|k| !k.starts_with('_')));
    }

    #[test]
    fn summary_record_carries_markers() {
        let summary = ActionRecord::summary("did things", 7, SummaryMethod::Chunked);
        assert_eq!(summary.tool_name, SUMMARY_TOOL_NAME);
        assert!(summary.is_summary());
        assert_eq!(summary.kind(), ActionKind::Summary);
        assert_eq!(summary.arguments["action_count"], 7);
        assert_eq!(summary.arguments["summary_method"], "chunked_summarization");
        assert!(summary.timestamp.is_some());

        let wire = serde_json::to_value(&summary).unwrap();
        assert_eq!(wire["result"]["_is_summary"], true);
        assert_eq!(wire["result"]["_summarized_count"], 7);
        assert_eq!(wire["result"]["_chunked"], true);
    }

    #[test]
    fn reserved_name_alone_does_not_make_a_summary() {
        let record = ActionRecord::new(SUMMARY_TOOL_NAME, json!({}), ActionResult::success("x"));
        assert!(!record.is_summary());
        assert_eq!(record.kind(), ActionKind::Tool);
    }

    #[test]
    fn compression_markers_serialize_under_reserved_keys() {
        let mut record = ActionRecord::new("read", json!({"path": "a"}), ActionResult::success("x"));
        record.result.mark_compressed(FieldCompression {
            original_tokens: 900,
            compressed_tokens: 90,
        });
        assert_eq!(record.kind(), ActionKind::Compressed);

        let wire = serde_json::to_value(&record).unwrap();
        assert_eq!(wire["result"]["_compressed"], true);
        assert_eq!(wire["result"]["_original_tokens"], 900);
        assert_eq!(wire["result"]["_compressed_tokens"], 90);

        let back: ActionRecord = serde_json::from_value(wire).unwrap();
        assert_eq!(back, record);
        assert_eq!(back.result.output_compression().unwrap().compressed_tokens, 90);
    }

    #[test]
    fn timestamp_is_preserved() {
        let raw = json!({"tool_name": "t", "timestamp": "2024-05-01T10:00:00Z"});
        let record: ActionRecord = serde_json::from_value(raw).unwrap();
        assert_eq!(record.timestamp.as_deref(), Some("2024-05-01T10:00:00Z"));
    }
}
