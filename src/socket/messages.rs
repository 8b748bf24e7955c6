//! Request and response shapes carried in socket frames.
//!
//! ```text
//! Send   {op?:"send",   correlationID, payload}
//! List   {op?:"list",   correlationID, group}
//! Remove {op?:"remove", correlationID, group}
//! Result {correlationID|null, status, message|null}
//! ```
//!
//! `group` is a group identifier or [`ALL_GROUPS`]. `op` is optional on the
//! wire. Requests built here always carry it, and a present `op` only
//! decodes as its own struct. That keeps the structurally identical `List`
//! and `Remove` shapes apart. A request without `op` is told apart by shape
//! alone, so an op-less `{correlationID, group}` is a `List`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::framing;
use super::IpcError;
use crate::payload::NotificationPayload;

/// Group sentinel meaning "every group".
pub const ALL_GROUPS: &str = "ALL";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum SendOp {
    Send,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum ListOp {
    List,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum RemoveOp {
    Remove,
}

/// Post a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    op: Option<SendOp>,
    /// Caller-generated token echoed in the response.
    #[serde(rename = "correlationID")]
    pub correlation_id: Uuid,
    /// Content to deliver.
    pub payload: NotificationPayload,
}

impl SendRequest {
    /// New request with a fresh correlation ID.
    pub fn new(payload: NotificationPayload) -> Self {
        Self::with_id(Uuid::new_v4(), payload)
    }

    /// New request with an explicit correlation ID.
    pub fn with_id(correlation_id: Uuid, payload: NotificationPayload) -> Self {
        Self {
            op: Some(SendOp::Send),
            correlation_id,
            payload,
        }
    }
}

/// Query delivered notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    op: Option<ListOp>,
    /// Caller-generated token echoed in the response.
    #[serde(rename = "correlationID")]
    pub correlation_id: Uuid,
    /// Group identifier or [`ALL_GROUPS`].
    pub group: String,
}

impl ListRequest {
    /// New request with a fresh correlation ID.
    pub fn new(group: impl Into<String>) -> Self {
        Self {
            op: Some(ListOp::List),
            correlation_id: Uuid::new_v4(),
            group: group.into(),
        }
    }
}

/// Clear delivered notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    op: Option<RemoveOp>,
    /// Caller-generated token echoed in the response.
    #[serde(rename = "correlationID")]
    pub correlation_id: Uuid,
    /// Group identifier or [`ALL_GROUPS`].
    pub group: String,
}

impl RemoveRequest {
    /// New request with a fresh correlation ID.
    pub fn new(group: impl Into<String>) -> Self {
        Self {
            op: Some(RemoveOp::Remove),
            correlation_id: Uuid::new_v4(),
            group: group.into(),
        }
    }
}

/// Any request the session process understands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Request {
    /// Post a notification.
    Send(SendRequest),
    /// List delivered notifications.
    List(ListRequest),
    /// Remove delivered notifications.
    Remove(RemoveRequest),
}

impl Request {
    /// Decode a raw payload by trying each request shape in turn.
    ///
    /// The order is `Send`, then `List`, then `Remove`; the first shape that
    /// decodes wins. Changing the order changes the wire protocol.
    pub fn from_frame(payload: &[u8]) -> Result<Self, IpcError> {
        if let Ok(req) = framing::decode::<SendRequest>(payload) {
            return Ok(Self::Send(req));
        }
        if let Ok(req) = framing::decode::<ListRequest>(payload) {
            return Ok(Self::List(req));
        }
        if let Ok(req) = framing::decode::<RemoveRequest>(payload) {
            return Ok(Self::Remove(req));
        }
        Err(IpcError::Protocol(format!(
            "payload of {} bytes matches no known request",
            payload.len()
        )))
    }

    /// Correlation ID of the wrapped request.
    pub fn correlation_id(&self) -> Uuid {
        match self {
            Self::Send(r) => r.correlation_id,
            Self::List(r) => r.correlation_id,
            Self::Remove(r) => r.correlation_id,
        }
    }

    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Send(_) => "send",
            Self::List(_) => "list",
            Self::Remove(_) => "remove",
        }
    }
}

impl From<SendRequest> for Request {
    fn from(req: SendRequest) -> Self {
        Self::Send(req)
    }
}

impl From<ListRequest> for Request {
    fn from(req: ListRequest) -> Self {
        Self::List(req)
    }
}

impl From<RemoveRequest> for Request {
    fn from(req: RemoveRequest) -> Self {
        Self::Remove(req)
    }
}

/// Outcome codes carried in [`Response::status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Request succeeded.
    Ok,
    /// The session is not allowed to post notifications.
    NotAuthorized,
    /// The attachment could not be resolved.
    InvalidAttachment,
    /// The sink reported a failure.
    RuntimeError,
    /// The payload failed preflight validation.
    ValidationError,
}

impl Status {
    /// Wire spelling of the status.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::NotAuthorized => "not_authorized",
            Self::InvalidAttachment => "invalid_attachment",
            Self::RuntimeError => "runtime_error",
            Self::ValidationError => "validation_error",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Response envelope, one per request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    /// Echo of the request's correlation ID.
    #[serde(rename = "correlationID", default)]
    pub correlation_id: Option<Uuid>,
    /// Outcome.
    pub status: Status,
    /// Diagnostic text, or the result table for a successful `List`.
    #[serde(default)]
    pub message: Option<String>,
}

impl Response {
    /// Successful response without a body.
    pub fn ok(correlation_id: Uuid) -> Self {
        Self {
            correlation_id: Some(correlation_id),
            status: Status::Ok,
            message: None,
        }
    }

    /// Successful response carrying a body.
    pub fn ok_with(correlation_id: Uuid, message: String) -> Self {
        Self {
            correlation_id: Some(correlation_id),
            status: Status::Ok,
            message: Some(message),
        }
    }

    /// Failed response.
    pub fn error(correlation_id: Uuid, status: Status, message: String) -> Self {
        Self {
            correlation_id: Some(correlation_id),
            status,
            message: Some(message),
        }
    }

    /// Whether the status is `ok`.
    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::InterruptionLevel;

    fn full_payload() -> NotificationPayload {
        let mut payload = NotificationPayload::new("M2").with_title("T2").with_group("g");
        payload.subtitle = Some("S".into());
        payload.sound = Some("default".into());
        payload.open_url = Some("https://example.com".into());
        payload.interruption_level = InterruptionLevel::Passive;
        payload.wait_seconds = Some(5);
        payload
    }

    fn frame_body(req: &Request) -> Vec<u8> {
        framing::encode(req).unwrap()[framing::HEADER_LEN..].to_vec()
    }

    #[test]
    fn test_send_round_trip_through_decode() {
        let req = Request::from(SendRequest::new(full_payload()));
        assert_eq!(Request::from_frame(&frame_body(&req)).unwrap(), req);
    }

    #[test]
    fn test_list_and_remove_round_trip_through_decode() {
        let list = Request::from(ListRequest::new("build"));
        let remove = Request::from(RemoveRequest::new(ALL_GROUPS));
        assert_eq!(Request::from_frame(&frame_body(&list)).unwrap(), list);
        assert_eq!(Request::from_frame(&frame_body(&remove)).unwrap(), remove);
    }

    #[test]
    fn test_shapes_are_mutually_exclusive() {
        let send = frame_body(&SendRequest::new(full_payload()).into());
        let list = frame_body(&ListRequest::new("g").into());
        let remove = frame_body(&RemoveRequest::new("g").into());

        assert!(framing::decode::<ListRequest>(&send).is_err());
        assert!(framing::decode::<RemoveRequest>(&send).is_err());
        assert!(framing::decode::<SendRequest>(&list).is_err());
        assert!(framing::decode::<RemoveRequest>(&list).is_err());
        assert!(framing::decode::<SendRequest>(&remove).is_err());
        assert!(framing::decode::<ListRequest>(&remove).is_err());
    }

    #[test]
    fn test_request_json_shape() {
        let id = Uuid::new_v4();
        let req = SendRequest::with_id(id, NotificationPayload::new("Hi"));
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["op"], "send");
        assert_eq!(value["correlationID"], id.to_string());
        assert_eq!(value["payload"]["message"], "Hi");
    }

    #[test]
    fn test_unknown_payload_is_protocol_error() {
        assert!(matches!(
            Request::from_frame(br#"{"hello":"world"}"#),
            Err(IpcError::Protocol(_))
        ));
        assert!(matches!(Request::from_frame(b"not json"), Err(IpcError::Protocol(_))));
    }

    #[test]
    fn test_op_less_send_decodes_structurally() {
        let raw = r#"{
            "correlationID": "9F3B5C1E-2D4A-4B6C-8E7F-0A1B2C3D4E5F",
            "payload": {"title": "T", "message": "Hi", "groupID": "build",
                        "interruptionLevel": "active"}
        }"#;
        match Request::from_frame(raw.as_bytes()).unwrap() {
            Request::Send(req) => {
                assert_eq!(req.payload.message, "Hi");
                assert_eq!(req.payload.group(), Some("build"));
            }
            other => panic!("expected Send, got {other:?}"),
        }
    }

    #[test]
    fn test_op_less_group_request_is_list() {
        let id = Uuid::new_v4();
        let raw = format!(r#"{{"correlationID":"{id}","group":"g"}}"#);
        let req = Request::from_frame(raw.as_bytes()).unwrap();
        assert_eq!(req.kind(), "list");
        assert_eq!(req.correlation_id(), id);
    }

    #[test]
    fn test_remove_op_selects_remove() {
        let id = Uuid::new_v4();
        let raw = format!(r#"{{"op":"remove","correlationID":"{id}","group":"g"}}"#);
        match Request::from_frame(raw.as_bytes()).unwrap() {
            Request::Remove(req) => assert_eq!(req.group, "g"),
            other => panic!("expected Remove, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_op_does_not_decode() {
        let id = Uuid::new_v4();
        let raw = format!(r#"{{"op":"purge","correlationID":"{id}","group":"g"}}"#);
        assert!(Request::from_frame(raw.as_bytes()).is_err());
    }

    #[test]
    fn test_uppercase_correlation_id_accepted() {
        let id = Uuid::new_v4();
        let raw = format!(
            r#"{{"op":"remove","correlationID":"{}","group":"g"}}"#,
            id.to_string().to_uppercase()
        );
        assert_eq!(Request::from_frame(raw.as_bytes()).unwrap().correlation_id(), id);
    }

    #[test]
    fn test_response_null_fields() {
        let raw = r#"{"correlationID":null,"status":"runtime_error","message":null}"#;
        let resp: Response = serde_json::from_str(raw).unwrap();
        assert_eq!(resp.correlation_id, None);
        assert_eq!(resp.status, Status::RuntimeError);
        assert_eq!(resp.message, None);

        let resp: Response = serde_json::from_str(r#"{"status":"ok"}"#).unwrap();
        assert!(resp.is_ok());
    }

    #[test]
    fn test_status_strings_are_distinct() {
        let all = [
            Status::Ok,
            Status::NotAuthorized,
            Status::InvalidAttachment,
            Status::RuntimeError,
            Status::ValidationError,
        ];
        let names: std::collections::HashSet<&str> = all.iter().map(|s| s.as_str()).collect();
        assert_eq!(names.len(), all.len());
        for status in all {
            assert_eq!(
                serde_json::to_value(status).unwrap(),
                serde_json::Value::String(status.as_str().to_string())
            );
        }
    }
}
