//! 工具参数 JSON Schema 生成与宽松参数解析
//!
//! 参数结构体派生 JsonSchema，由 schemars 生成发送给推理引擎的 parameters；
//! 推理引擎常把数字写成字符串（"5000"），数值字段统一用 lenient_* 反序列化。

use schemars::{schema_for, JsonSchema};
use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// 参数结构体的 JSON Schema（去掉 $schema / title，仅保留 object 描述）
pub fn args_schema<T: JsonSchema>() -> Value {
    let schema = schema_for!(T);
    let mut value = serde_json::to_value(schema).unwrap_or_else(|_| serde_json::json!({"type": "object"}));
    if let Some(obj) = value.as_object_mut() {
        obj.remove("$schema");
        obj.remove("title");
    }
    value
}

/// 把工具参数解析为结构体；null 视为空对象
pub fn parse_args<T: DeserializeOwned>(args: Value) -> Result<T, String> {
    let args = if args.is_null() {
        Value::Object(Default::default())
    } else {
        args
    };
    serde_json::from_value(args).map_err(|e| format!("invalid arguments: {e}"))
}

/// 接受数字或数字字符串
pub fn lenient_f64<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
    match Value::deserialize(d)? {
        Value::Number(n) => n.as_f64().ok_or_else(|| D::Error::custom("invalid number")),
        Value::String(s) => s
            .trim()
            .replace(',', "")
            .parse::<f64>()
            .map_err(|_| D::Error::custom(format!("expected a number, got \"{s}\""))),
        other => Err(D::Error::custom(format!("expected a number, got {other}"))),
    }
}

/// 接受非负整数、整数值浮点或数字字符串
pub fn lenient_u32<'de, D: Deserializer<'de>>(d: D) -> Result<u32, D::Error> {
    let v = lenient_f64(d)?;
    if v < 0.0 || v.fract() != 0.0 || v > u32::MAX as f64 {
        return Err(D::Error::custom(format!("expected a non-negative integer, got {v}")));
    }
    Ok(v as u32)
}
