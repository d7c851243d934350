//! Wire format of channel messages and the socket framing.
//!
//! Messages are plain JSON objects with camelCase keys:
//!
//! ```text
//! Request  { request: true, callId, scopeName, funcName, args }
//! Response { callId, reply }
//! Response { callId, exception }
//! ```
//!
//! On a socket each message travels as a length-prefixed frame:
//!
//! ```text
//! [u32 BE: len][UTF-8 JSON bytes of len]
//! ```

use crate::config::TransportConfig;
use crate::exception::Exception;
use crate::{Result, SurrogateError};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// A request to run `scope_name.func_name(args...)` on the other side.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub call_id: u64,
    pub scope_name: String,
    pub func_name: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

impl Request {
    pub fn new(
        call_id: u64,
        scope_name: impl Into<String>,
        func_name: impl Into<String>,
        args: Vec<Value>,
    ) -> Self {
        Self {
            call_id,
            scope_name: scope_name.into(),
            func_name: func_name.into(),
            args,
        }
    }

    pub fn to_value(&self) -> Value {
        json!({
            "request": true,
            "callId": self.call_id,
            "scopeName": self.scope_name,
            "funcName": self.func_name,
            "args": self.args,
        })
    }
}

/// How a remote call ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Reply(Value),
    Exception(Value),
}

/// The answer to a [`Request`], matched to it by `call_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub call_id: u64,
    pub outcome: Outcome,
}

impl Response {
    /// Create a success response.
    pub fn reply(call_id: u64, reply: Value) -> Self {
        Self {
            call_id,
            outcome: Outcome::Reply(reply),
        }
    }

    /// Create an exception response.
    pub fn exception(call_id: u64, exception: &Exception) -> Self {
        Self {
            call_id,
            outcome: Outcome::Exception(exception.to_value()),
        }
    }

    pub fn to_value(&self) -> Value {
        match &self.outcome {
            Outcome::Reply(reply) => json!({ "callId": self.call_id, "reply": reply }),
            Outcome::Exception(exception) => {
                json!({ "callId": self.call_id, "exception": exception })
            }
        }
    }
}

/// Any message travelling over a channel's transport.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request(Request),
    Response(Response),
}

impl Message {
    /// Classify and decode a raw message.
    ///
    /// Anything with a truthy `request` marker is a request. Everything else
    /// is a response; a response carrying neither `reply` nor `exception` is
    /// read as an exception with a null payload.
    pub fn decode(value: Value) -> Result<Self> {
        if value.get("request").map(is_truthy).unwrap_or(false) {
            let request: Request = serde_json::from_value(value)?;
            return Ok(Message::Request(request));
        }

        let call_id = value
            .get("callId")
            .and_then(Value::as_u64)
            .ok_or_else(|| SurrogateError::Validation {
                field: "callId".to_string(),
                message: "Response is missing a numeric callId".to_string(),
            })?;

        let outcome = match value {
            Value::Object(mut obj) => match obj.remove("reply") {
                Some(reply) => Outcome::Reply(reply),
                None => Outcome::Exception(obj.remove("exception").unwrap_or(Value::Null)),
            },
            _ => Outcome::Exception(Value::Null),
        };

        Ok(Message::Response(Response { call_id, outcome }))
    }

    pub fn to_value(&self) -> Value {
        match self {
            Message::Request(request) => request.to_value(),
            Message::Response(response) => response.to_value(),
        }
    }

    pub fn call_id(&self) -> u64 {
        match self {
            Message::Request(request) => request.call_id,
            Message::Response(response) => response.call_id,
        }
    }
}

/// Call id of a message marked as a request, even when the rest of it is
/// unusable.
pub fn request_call_id(value: &Value) -> Option<u64> {
    if !value.get("request").map(is_truthy).unwrap_or(false) {
        return None;
    }
    value.get("callId").and_then(Value::as_u64)
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Read a length-prefixed frame from an async reader.
///
/// Frame format: `[4-byte BE u32 length][payload bytes]`
///
/// Returns `None` on clean EOF (peer closed connection).
pub async fn read_frame<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;

    if len > TransportConfig::MAX_MESSAGE_SIZE {
        return Err(SurrogateError::FrameTooLarge {
            size: len,
            max: TransportConfig::MAX_MESSAGE_SIZE,
        });
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;

    Ok(Some(payload))
}

/// Write a length-prefixed frame to an async writer.
///
/// Frame format: `[4-byte BE u32 length][payload bytes]`
pub async fn write_frame<W: AsyncWriteExt + Unpin>(writer: &mut W, payload: &[u8]) -> Result<()> {
    if payload.len() > TransportConfig::MAX_MESSAGE_SIZE {
        return Err(SurrogateError::FrameTooLarge {
            size: payload.len(),
            max: TransportConfig::MAX_MESSAGE_SIZE,
        });
    }
    let len = payload.len() as u32;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}
