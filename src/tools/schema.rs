//! 工具参数 Schema：schemars 从参数结构体生成，jsonschema 校验模型给出的参数
//!
//! 校验失败属于 MalformedOutput，由反思流程把错误展示给模型。

use schemars::{schema_for, JsonSchema};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::tools::ToolError;

/// 生成参数结构体的 JSON Schema（去掉 $schema / title，便于直接放进 function.parameters）
pub fn schema_of<T: JsonSchema>() -> Value {
    let schema = schema_for!(T);
    let mut value = serde_json::to_value(schema).unwrap_or_else(|_| {
        serde_json::json!({ "type": "object" })
    });
    if let Some(obj) = value.as_object_mut() {
        obj.remove("$schema");
        obj.remove("title");
    }
    value
}

/// 按 schema 校验参数，返回所有违规项拼成的一行说明
pub fn validate_args(schema: &Value, args: &Value) -> Result<(), String> {
    let validator = jsonschema::validator_for(schema).map_err(|e| format!("invalid tool schema: {e}"))?;
    let errors: Vec<String> = validator.iter_errors(args).map(|e| e.to_string()).collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors.join("; "))
    }
}

/// 反序列化已校验的参数
pub fn parse_args<T: DeserializeOwned>(args: Value) -> Result<T, ToolError> {
    serde_json::from_value(args).map_err(|e| ToolError::InvalidArguments(e.to_string()))
}
