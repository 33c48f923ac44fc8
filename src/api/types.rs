use crate::error::{BridgeError, Result};
use serde_json::Value;

/// Vendor code reported when its backend cannot reach the battery
pub const CODE_NETWORK_EXCEPTION: i64 = 9007;

/// Vendor code for an expired or unknown token
pub const CODE_UNAUTHORIZED: i64 = 401;

/// Envelope `{code, msg, data}` wrapped around every vendor response
#[derive(Debug, Clone)]
pub struct Envelope {
    pub code: Option<i64>,
    pub msg: Option<String>,
    pub data: Value,
}

impl Envelope {
    pub fn from_value(body: Value) -> Self {
        let code = body.get("code").and_then(code_as_i64);
        let msg = body
            .get("msg")
            .and_then(|m| m.as_str())
            .map(|s| s.to_string());
        let data = match body {
            Value::Object(mut map) => map.remove("data").unwrap_or(Value::Null),
            _ => Value::Null,
        };
        Self { code, msg, data }
    }

    /// Success is code 0 or 200
    pub fn is_success(&self) -> bool {
        matches!(self.code, Some(0) | Some(200))
    }

    /// Unwrap the data member or classify the vendor error code
    pub fn into_data(self) -> Result<Value> {
        if self.is_success() {
            return Ok(self.data);
        }
        let msg = self.msg.unwrap_or_else(|| "no message".to_string());
        match self.code {
            Some(CODE_NETWORK_EXCEPTION) => Err(BridgeError::network(format!(
                "Vendor network exception ({}): {}",
                CODE_NETWORK_EXCEPTION, msg
            ))),
            Some(CODE_UNAUTHORIZED) => Err(BridgeError::auth(format!(
                "Vendor rejected token: {}",
                msg
            ))),
            Some(code) => Err(BridgeError::api(format!("Vendor code {}: {}", code, msg))),
            None => Err(BridgeError::data("Response envelope has no code")),
        }
    }
}

// Some gateway versions send the code as a string
fn code_as_i64(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Token from a login response, either top-level or under `data`
pub fn extract_token(body: &Value) -> Option<String> {
    body.get("token")
        .or_else(|| body.get("data").and_then(|d| d.get("token")))
        .and_then(|t| t.as_str())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
}
