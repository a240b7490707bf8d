//! Current date and time tool.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use super::Tool;

/// Reports the current UTC date and time.
///
/// Accepts `None`, `'UTC'` or `{'timezone': 'UTC'}`; other zones are refused.
#[derive(Debug, Clone, Copy, Default)]
pub struct CurrentDatetime;

#[async_trait]
impl Tool for CurrentDatetime {
    fn name(&self) -> &str {
        "current_datetime"
    }

    fn description(&self) -> &str {
        "Get the current date and time in UTC. Input: 'UTC' or None."
    }

    async fn execute(&self, input: Value) -> anyhow::Result<String> {
        let timezone = match &input {
            Value::Null => None,
            Value::String(tz) => Some(tz.as_str()),
            Value::Object(map) => map.get("timezone").and_then(Value::as_str),
            other => anyhow::bail!("Expected a timezone string, got {}", other),
        };

        if let Some(tz) = timezone {
            if !tz.trim().is_empty() && !tz.trim().eq_ignore_ascii_case("utc") {
                anyhow::bail!("Unsupported timezone: '{}'. Only UTC is supported.", tz);
            }
        }

        Ok(format_utc(Utc::now()))
    }
}

fn format_utc(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%d %H:%M:%S UTC (%A)").to_string()
}
