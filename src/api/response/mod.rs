pub mod device_page;
pub mod home_control;
pub mod login;
pub mod plant_list;

use serde::Deserialize;
use serde_json::{Map, Value};

/// Result code of a successful call.
pub const SUCCESS: i64 = 0;
/// Result code returned once the session token is no longer accepted.
pub const TOKEN_EXPIRED: i64 = 10000;

/* Every endpoint wraps its payload as {"result": <code>, "msg": "...", "obj": <payload>} */
#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    pub result: i64,
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default = "Option::default")]
    pub obj: Option<T>,
}

impl<T> Envelope<T> {
    pub fn is_success(&self) -> bool {
        self.result == SUCCESS
    }

    pub fn message(&self) -> String {
        self.msg
            .clone()
            .unwrap_or_else(|| "(no error message received)".to_string())
    }
}

pub fn result_code(value: &Value) -> Option<i64> {
    value.get("result").and_then(Value::as_i64)
}

/// `obj` of a response as a JSON object, or an empty object when absent.
pub fn obj_map(value: &Value) -> Map<String, Value> {
    value
        .get("obj")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default()
}
