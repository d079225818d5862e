//! Per-request types: the incoming turn, the routing decision and the
//! execution trace it produces.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::operation::UNRESOLVED_OPERATION;

/// Key under which a failed execution records its error message.
pub const ERROR_MARKER_KEY: &str = "__error__";

/// A single free-form request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserTurn {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Map<String, Value>>,
}

impl UserTurn {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            context: None,
        }
    }
}

/// A classifier's routing decision.
///
/// `reason` is advisory and never validated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoutePlan {
    pub operation: String,
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(default)]
    pub reason: String,
}

impl RoutePlan {
    pub fn new(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            params: Map::new(),
            reason: reason.into(),
        }
    }

    pub fn unresolved(reason: impl Into<String>) -> Self {
        Self::new(UNRESOLVED_OPERATION, reason)
    }

    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }
}

/// The record of one executed route plan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionTrace {
    pub request: Value,
    pub response: Value,
    pub latency_ms: f64,
}

impl ExecutionTrace {
    pub fn is_error(&self) -> bool {
        is_error_response(&self.response)
    }
}

/// Build the error-marked response recorded when execution fails.
pub fn error_response(message: impl Into<String>) -> Value {
    let mut map = Map::new();
    map.insert(ERROR_MARKER_KEY.to_string(), Value::String(message.into()));
    Value::Object(map)
}

/// Whether a response carries the error marker instead of domain data.
pub fn is_error_response(response: &Value) -> bool {
    response
        .as_object()
        .map(|obj| obj.contains_key(ERROR_MARKER_KEY))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_error_response_is_marked() {
        let resp = error_response("connection refused");
        assert!(is_error_response(&resp));
        assert_eq!(resp[ERROR_MARKER_KEY], json!("connection refused"));
    }

    #[test]
    fn test_domain_response_is_not_marked() {
        assert!(!is_error_response(&json!({"employee_id": "E12345"})));
        assert!(!is_error_response(&json!("plain text")));
        assert!(!is_error_response(&Value::Null));
    }

    #[test]
    fn test_route_plan_builders() {
        let plan = RoutePlan::new("/hr/leave/balance", "keyword rule")
            .with_param("employee_id", json!("E12345"));
        assert_eq!(plan.operation, "/hr/leave/balance");
        assert_eq!(plan.params["employee_id"], json!("E12345"));

        let plan = RoutePlan::unresolved("no reply");
        assert_eq!(plan.operation, UNRESOLVED_OPERATION);
    }
}
