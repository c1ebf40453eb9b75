//! 工具参数 JSON Schema 生成（schemars 从参数结构体自动生成）

use schemars::{schema_for, JsonSchema};
use serde_json::Value;

/// 生成参数结构体的 JSON Schema，去掉 `$schema` / `title` 等模型不需要的顶层键
pub fn args_schema<T: JsonSchema>() -> Value {
    let schema = schema_for!(T);
    let mut value = serde_json::to_value(schema).unwrap_or_else(|_| {
        serde_json::json!({ "type": "object", "properties": {} })
    });
    if let Some(obj) = value.as_object_mut() {
        obj.remove("$schema");
        obj.remove("title");
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[allow(dead_code)]
    #[derive(JsonSchema)]
    struct SampleArgs {
        path: String,
        bytes: Option<u64>,
    }

    #[test]
    fn test_schema_lists_required_fields() {
        let schema = args_schema::<SampleArgs>();
        assert_eq!(schema["type"], "object");
        assert!(schema.get("$schema").is_none());
        assert!(schema["properties"].get("path").is_some());
        let required = schema["required"].as_array().unwrap();
        assert_eq!(required, &vec![Value::String("path".into())]);
    }
}
