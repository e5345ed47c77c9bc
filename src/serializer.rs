//! Tag-delimited rendering of action records.
//!
//! The same text is used for token measurement and as the body of
//! summarization prompts, so it has to be a pure function of the records.

use serde_json::Value;

use crate::action::{ActionRecord, ActionResult};

/// Closing tag of one serialized action. Chunking splits after it.
pub const ACTION_END: &str = "</action>\n";

/// Render a single action as an `<action>` block, newline-terminated.
pub fn serialize_action(action: &ActionRecord) -> String {
    let mut out = String::from("<action>\n");
    out.push_str(&format!("  <tool_name>{}</tool_name>\n", action.tool_name));

    for (key, value) in &action.arguments {
        let rendered = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        out.push_str(&format!("  <tool_use:{key}>{rendered}</tool_use:{key}>\n"));
    }

    out.push_str("  <result>\n");
    out.push_str(&render_result(&action.result));
    out.push_str("\n  </result>\n");
    out.push_str(ACTION_END);
    out
}

/// Render a sequence of actions.
pub fn serialize_actions(actions: &[ActionRecord]) -> String {
    actions.iter().map(serialize_action).collect()
}

fn render_result(result: &ActionResult) -> String {
    serde_json::to_string_pretty(result).unwrap_or_else(|_| "{}".into())
}
