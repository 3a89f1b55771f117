//! JSON-RPC 2.0 queries and answers exchanged with clients.
//!
//! ```json
//! {"jsonrpc":"2.0","method":"publish","id":3,"params":{"channel":"/root/L/E","message":{...}}}
//! {"jsonrpc":"2.0","id":3,"result":0}
//! {"jsonrpc":"2.0","id":3,"error":{"code":-3,"description":"message ... already exists"}}
//! ```

use serde::{Deserialize, Serialize};

use crate::error::HubError;
use crate::message::Message;

pub const JSONRPC_VERSION: &str = "2.0";

fn jsonrpc_version() -> String {
    JSONRPC_VERSION.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelParams {
    pub channel: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageParams {
    pub channel: String,
    pub message: Message,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscribe {
    #[serde(default = "jsonrpc_version")]
    pub jsonrpc: String,
    pub id: i64,
    pub params: ChannelParams,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unsubscribe {
    #[serde(default = "jsonrpc_version")]
    pub jsonrpc: String,
    pub id: i64,
    pub params: ChannelParams,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Publish {
    #[serde(default = "jsonrpc_version")]
    pub jsonrpc: String,
    pub id: i64,
    pub params: MessageParams,
}

/// Broadcast is also what the server sends to subscribers; as a
/// notification it carries no id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Broadcast {
    #[serde(default = "jsonrpc_version")]
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub params: MessageParams,
}

impl Broadcast {
    /// Notification announcing `message` on `channel`.
    pub fn notification(channel: &str, message: Message) -> Self {
        Self {
            jsonrpc: jsonrpc_version(),
            id: None,
            params: MessageParams {
                channel: channel.to_string(),
                message,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Catchup {
    #[serde(default = "jsonrpc_version")]
    pub jsonrpc: String,
    pub id: i64,
    pub params: ChannelParams,
}

/// An inbound request, tagged by `method`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "lowercase")]
pub enum Query {
    Subscribe(Subscribe),
    Unsubscribe(Unsubscribe),
    Publish(Publish),
    Broadcast(Broadcast),
    Catchup(Catchup),
}

impl Query {
    pub fn id(&self) -> Option<i64> {
        match self {
            Query::Subscribe(q) => Some(q.id),
            Query::Unsubscribe(q) => Some(q.id),
            Query::Publish(q) => Some(q.id),
            Query::Broadcast(q) => q.id,
            Query::Catchup(q) => Some(q.id),
        }
    }

    pub fn channel(&self) -> &str {
        match self {
            Query::Subscribe(q) => &q.params.channel,
            Query::Unsubscribe(q) => &q.params.channel,
            Query::Publish(q) => &q.params.channel,
            Query::Broadcast(q) => &q.params.channel,
            Query::Catchup(q) => &q.params.channel,
        }
    }

    pub fn method(&self) -> &'static str {
        match self {
            Query::Subscribe(_) => "subscribe",
            Query::Unsubscribe(_) => "unsubscribe",
            Query::Publish(_) => "publish",
            Query::Broadcast(_) => "broadcast",
            Query::Catchup(_) => "catchup",
        }
    }

    /// Parse one request line. Unknown methods map to `InvalidMethod`.
    pub fn parse(line: &str) -> Result<Self, HubError> {
        let value: serde_json::Value = serde_json::from_str(line)
            .map_err(|e| HubError::DecodeError(format!("invalid JSON-RPC request: {e}")))?;
        let method = value
            .get("method")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .ok_or_else(|| HubError::DecodeError("missing method".into()))?;
        if !matches!(
            method.as_str(),
            "subscribe" | "unsubscribe" | "publish" | "broadcast" | "catchup"
        ) {
            return Err(HubError::InvalidMethod(method));
        }
        serde_json::from_value(value)
            .map_err(|e| HubError::DecodeError(format!("invalid {method} request: {e}")))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: i32,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnswerResult {
    General(i32),
    Messages(Vec<Message>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub jsonrpc: String,
    pub id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<AnswerResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
}

impl Answer {
    pub fn ok(id: Option<i64>) -> Self {
        Self {
            jsonrpc: jsonrpc_version(),
            id,
            result: Some(AnswerResult::General(0)),
            error: None,
        }
    }

    pub fn messages(id: Option<i64>, messages: Vec<Message>) -> Self {
        Self {
            jsonrpc: jsonrpc_version(),
            id,
            result: Some(AnswerResult::Messages(messages)),
            error: None,
        }
    }

    pub fn error(id: Option<i64>, err: &HubError) -> Self {
        Self {
            jsonrpc: jsonrpc_version(),
            id,
            result: None,
            error: Some(ErrorObject {
                code: err.code(),
                description: err.to_string(),
            }),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_catchup() {
        let line = r#"{"jsonrpc":"2.0","method":"catchup","id":7,"params":{"channel":"/root/XXX"}}"#;
        let q = Query::parse(line).unwrap();
        assert_eq!(q.method(), "catchup");
        assert_eq!(q.channel(), "/root/XXX");
        assert_eq!(q.id(), Some(7));
    }

    #[test]
    fn unknown_method_is_invalid_action() {
        let line = r#"{"jsonrpc":"2.0","method":"heartbeat","params":{}}"#;
        let err = Query::parse(line).unwrap_err();
        assert_eq!(err.code(), -1);
    }

    #[test]
    fn malformed_publish_names_the_method() {
        let line = r#"{"jsonrpc":"2.0","method":"publish","id":2,"params":{"channel":"/root/L"}}"#;
        let err = Query::parse(line).unwrap_err();
        assert!(matches!(err, HubError::DecodeError(ref d) if d.contains("publish")), "{err:?}");
    }

    #[test]
    fn broadcast_notification_shape() {
        let msg = Message {
            data: "e30=".into(),
            sender: "s".into(),
            signature: "g".into(),
            message_id: "m".into(),
            witness_signatures: vec![],
        };
        let v = serde_json::to_value(Query::Broadcast(Broadcast::notification("/root/L/E", msg)))
            .unwrap();
        assert_eq!(v["method"], "broadcast");
        assert_eq!(v["jsonrpc"], "2.0");
        assert_eq!(v["params"]["channel"], "/root/L/E");
        assert_eq!(v["params"]["message"]["message_id"], "m");
        assert!(v.get("id").is_none());
    }

    #[test]
    fn error_answer_shape() {
        let a = Answer::error(Some(4), &HubError::DuplicateMessage("m".into()));
        let v = serde_json::to_value(&a).unwrap();
        assert_eq!(v, json!({
            "jsonrpc": "2.0",
            "id": 4,
            "error": {"code": -3, "description": "message m already exists"},
        }));
    }

    #[test]
    fn ok_answer_shape() {
        let v = serde_json::to_value(Answer::ok(Some(1))).unwrap();
        assert_eq!(v, json!({"jsonrpc": "2.0", "id": 1, "result": 0}));
    }
}
