//! JSON frames exchanged with remote clients over the WebSocket.
//!
//! Every frame is an object with an `"event"` member naming its kind.
//! Requests that expect an acknowledgment carry a client-chosen `id`, echoed
//! back in the matching `ack`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use zcmweb_core::types::TypeDescriptor;
use zcmweb_core::{Message, TypeSelector};

use crate::session::{AckError, Tag};

/// Client-chosen request identifier.
pub type RequestId = u64;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event")]
pub enum ClientFrame {
    /// Fire-and-forget publish. Without `type`, `msg` must embed `__hash`.
    #[serde(rename = "client-to-server")]
    Publish {
        channel: String,
        msg: Map<String, Value>,
        #[serde(default, rename = "type")]
        ty: Option<TypeSelector>,
    },

    #[serde(rename = "subscribe")]
    Subscribe {
        id: RequestId,
        channel: String,
        #[serde(default, rename = "type")]
        ty: Option<TypeSelector>,
    },

    /// Any channel, any registered type.
    #[serde(rename = "subscribe_all")]
    SubscribeAll { id: RequestId },

    #[serde(rename = "unsubscribe")]
    Unsubscribe { id: RequestId, tag: Tag },

    #[serde(rename = "flush")]
    Flush { id: RequestId },

    #[serde(rename = "pause")]
    Pause { id: RequestId },

    #[serde(rename = "resume")]
    Resume { id: RequestId },

    #[serde(rename = "setQueueSize")]
    SetQueueSize { id: RequestId, size: u32 },
}

impl ClientFrame {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Best-effort request id from a frame that failed to parse.
pub fn recover_request_id(text: &str) -> Option<RequestId> {
    serde_json::from_str::<Value>(text)
        .ok()?
        .get("id")?
        .as_u64()
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum ServerFrame {
    /// Schema descriptors, sent once when a connection opens.
    #[serde(rename = "zcmtypes")]
    Types { types: Vec<TypeDescriptor> },

    #[serde(rename = "server-to-client")]
    Message {
        channel: String,
        msg: Message,
        #[serde(rename = "subId")]
        sub_id: Tag,
    },

    #[serde(rename = "ack")]
    Ack {
        id: RequestId,
        ok: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        tag: Option<Tag>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<AckError>,
    },

    #[serde(rename = "error")]
    Error { message: String },
}

impl ServerFrame {
    pub const fn ack(id: RequestId) -> Self {
        Self::Ack {
            id,
            ok: true,
            tag: None,
            error: None,
        }
    }

    pub const fn ack_tag(id: RequestId, tag: Tag) -> Self {
        Self::Ack {
            id,
            ok: true,
            tag: Some(tag),
            error: None,
        }
    }

    pub const fn nack(id: RequestId, error: AckError) -> Self {
        Self::Ack {
            id,
            ok: false,
            tag: None,
            error: Some(error),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;
    use zcmweb_core::TypeHash;

    use super::*;

    #[test]
    fn parses_subscribe_with_name_or_hash() {
        let by_name = ClientFrame::parse(
            r#"{"event":"subscribe","id":1,"channel":"POSE","type":"example_t"}"#,
        )
        .unwrap();
        assert_eq!(
            by_name,
            ClientFrame::Subscribe {
                id: 1,
                channel: "POSE".into(),
                ty: Some(TypeSelector::Name("example_t".into())),
            }
        );

        let by_hash = ClientFrame::parse(
            r#"{"event":"subscribe","id":2,"channel":"POSE","type":"-6917529027641081856"}"#,
        )
        .unwrap();
        let expected = TypeSelector::Hash(TypeHash(-6_917_529_027_641_081_856));
        assert!(matches!(by_hash, ClientFrame::Subscribe { ty: Some(t), .. } if t == expected));

        let untyped = ClientFrame::parse(r#"{"event":"subscribe","id":3,"channel":".*"}"#).unwrap();
        assert!(matches!(untyped, ClientFrame::Subscribe { ty: None, .. }));
    }

    #[test]
    fn parses_control_events() {
        assert_eq!(
            ClientFrame::parse(r#"{"event":"setQueueSize","id":4,"size":32}"#).unwrap(),
            ClientFrame::SetQueueSize { id: 4, size: 32 }
        );
        assert_eq!(
            ClientFrame::parse(r#"{"event":"unsubscribe","id":5,"tag":2}"#).unwrap(),
            ClientFrame::Unsubscribe { id: 5, tag: 2 }
        );
        assert_eq!(
            ClientFrame::parse(r#"{"event":"subscribe_all","id":6}"#).unwrap(),
            ClientFrame::SubscribeAll { id: 6 }
        );
    }

    #[test]
    fn unknown_event_is_rejected_but_id_recovered() {
        let text = r#"{"event":"explode","id":9}"#;
        assert!(ClientFrame::parse(text).is_err());
        assert_eq!(recover_request_id(text), Some(9));
        assert_eq!(recover_request_id("not json"), None);
    }

    #[test]
    fn delivery_frame_carries_tag_as_sub_id() {
        let msg = Message::new(TypeHash(5), json!({"x": 1}).as_object().unwrap().clone());
        let frame = ServerFrame::Message {
            channel: "POSE".into(),
            msg,
            sub_id: 3,
        };
        let value: Value = serde_json::from_str(&frame.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "event": "server-to-client",
                "channel": "POSE",
                "msg": {"__hash": 5, "x": 1},
                "subId": 3
            })
        );
    }

    #[test]
    fn ack_omits_absent_members() {
        let value = serde_json::to_value(ServerFrame::ack(7)).unwrap();
        assert_eq!(value, json!({"event": "ack", "id": 7, "ok": true}));
    }
}
