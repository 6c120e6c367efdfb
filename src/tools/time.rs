//! Current time system tool

use super::{SystemTool, ToolInfo};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{FixedOffset, Utc};
use serde_json::{json, Value};

/// Reports the current date and time, optionally shifted to a UTC offset
pub struct CurrentTimeTool;

#[async_trait]
impl SystemTool for CurrentTimeTool {
    fn info(&self) -> ToolInfo {
        ToolInfo {
            name: "current_time".to_string(),
            description: "查询当前日期和时间，可指定UTC偏移小时数".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "utc_offset_hours": {
                        "type": "integer",
                        "description": "相对UTC的偏移小时数，默认0"
                    }
                }
            }),
        }
    }

    async fn invoke(&self, arguments: &str) -> Result<String> {
        let params: Value = serde_json::from_str(arguments).unwrap_or(Value::Null);
        let offset_hours = params["utc_offset_hours"].as_i64().unwrap_or(0);
        let offset = FixedOffset::east_opt((offset_hours * 3600) as i32)
            .unwrap_or_else(|| FixedOffset::east_opt(0).expect("zero offset"));
        let now = Utc::now().with_timezone(&offset);
        Ok(now.format("%Y-%m-%d %H:%M:%S %:z").to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_default_offset() {
        let output = CurrentTimeTool.invoke("{}").await.unwrap();
        assert!(output.contains("+00:00"));
    }

    #[tokio::test]
    async fn test_custom_offset() {
        let output = CurrentTimeTool
            .invoke("{\"utc_offset_hours\": 8}")
            .await
            .unwrap();
        assert!(output.contains("+08:00"));
    }

    #[tokio::test]
    async fn test_invalid_arguments_fall_back() {
        let output = CurrentTimeTool.invoke("not json").await.unwrap();
        assert!(!output.is_empty());
    }
}
