//! Message envelopes exchanged across the frame boundary
//!
//! Three message kinds exist: `SET_GLOBALS` (host to guest),
//! `METHOD_CALL` (guest to host) and `METHOD_RESPONSE` (host to guest).
//! Inbound values that do not parse as one of them are protocol noise and
//! are dropped by the caller.

use crate::error::{BridgeError, BridgeResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use widgetbench_types::DisplayMode;

/// A message on the legacy bridge channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Envelope {
    /// Full snapshot on the first push after attach, changed keys afterwards
    SetGlobals { globals: Map<String, Value> },
    MethodCall {
        id: String,
        method: String,
        #[serde(default)]
        args: Vec<Value>,
    },
    MethodResponse {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl Envelope {
    /// Parse an inbound value. Returns `None` for anything that is not an
    /// object with a recognized `type` and well-formed fields.
    pub fn parse(value: &Value) -> Option<Self> {
        let kind = value.as_object()?.get("type")?.as_str()?;
        if !matches!(kind, "SET_GLOBALS" | "METHOD_CALL" | "METHOD_RESPONSE") {
            return None;
        }
        serde_json::from_value(value.clone()).ok()
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    pub fn response(id: impl Into<String>, outcome: BridgeResult<Value>) -> Self {
        match outcome {
            Ok(result) => Self::MethodResponse {
                id: id.into(),
                result: Some(result),
                error: None,
            },
            Err(err) => Self::MethodResponse {
                id: id.into(),
                result: None,
                error: Some(err.to_string()),
            },
        }
    }
}

/// Every method name the host answers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    CallTool,
    SetWidgetState,
    RequestDisplayMode,
    SendFollowUpMessage,
    RequestClose,
    OpenExternal,
    NotifyIntrinsicHeight,
    RequestModal,
    UploadFile,
    GetFileDownloadUrl,
}

impl Method {
    pub const ALL: [Method; 10] = [
        Method::CallTool,
        Method::SetWidgetState,
        Method::RequestDisplayMode,
        Method::SendFollowUpMessage,
        Method::RequestClose,
        Method::OpenExternal,
        Method::NotifyIntrinsicHeight,
        Method::RequestModal,
        Method::UploadFile,
        Method::GetFileDownloadUrl,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::CallTool => "callTool",
            Method::SetWidgetState => "setWidgetState",
            Method::RequestDisplayMode => "requestDisplayMode",
            Method::SendFollowUpMessage => "sendFollowUpMessage",
            Method::RequestClose => "requestClose",
            Method::OpenExternal => "openExternal",
            Method::NotifyIntrinsicHeight => "notifyIntrinsicHeight",
            Method::RequestModal => "requestModal",
            Method::UploadFile => "uploadFile",
            Method::GetFileDownloadUrl => "getFileDownloadUrl",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = BridgeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Method::ALL
            .into_iter()
            .find(|method| method.as_str() == value)
            .ok_or_else(|| BridgeError::UnsupportedMethod(value.to_string()))
    }
}

/// Options for `requestModal`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ModalOptions {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
}

/// A file-like object handed to `uploadFile`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FileUpload {
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(rename = "type", default)]
    pub mime_type: String,
    /// Optional inline contents (base64 or text, opaque to the host)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

/// A decoded guest method call with typed arguments
#[derive(Debug, Clone, PartialEq)]
pub enum MethodCall {
    CallTool { name: String, args: Map<String, Value> },
    SetWidgetState(Option<Value>),
    RequestDisplayMode(DisplayMode),
    SendFollowUpMessage { prompt: String },
    RequestClose,
    OpenExternal { href: String },
    /// Already clamped: `None` when the guest sent no usable number
    NotifyIntrinsicHeight(Option<f64>),
    RequestModal(ModalOptions),
    UploadFile(FileUpload),
    GetFileDownloadUrl { file_id: String },
}

#[derive(Deserialize)]
struct ModeArg {
    mode: DisplayMode,
}

#[derive(Deserialize)]
struct PromptArg {
    prompt: String,
}

#[derive(Deserialize)]
struct HrefArg {
    href: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileIdArg {
    file_id: String,
}

fn arg<T: serde::de::DeserializeOwned>(method: Method, args: &[Value], index: usize) -> BridgeResult<T> {
    let value = args.get(index).cloned().unwrap_or(Value::Null);
    serde_json::from_value(value)
        .map_err(|err| BridgeError::invalid_arguments(method.as_str(), err.to_string()))
}

/// Clamp a reported height to a non-negative finite number
pub fn clamp_height(value: Option<&Value>) -> Option<f64> {
    value
        .and_then(Value::as_f64)
        .filter(|height| height.is_finite())
        .map(|height| height.max(0.0))
}

impl MethodCall {
    /// Decode the positional `args` array of a `METHOD_CALL`
    pub fn parse(method: Method, args: &[Value]) -> BridgeResult<Self> {
        let call = match method {
            Method::CallTool => {
                let name: String = arg(method, args, 0)?;
                let args = match args.get(1) {
                    None | Some(Value::Null) => Map::new(),
                    Some(Value::Object(map)) => map.clone(),
                    Some(_) => {
                        return Err(BridgeError::invalid_arguments(
                            method.as_str(),
                            "tool arguments must be an object",
                        ))
                    }
                };
                MethodCall::CallTool { name, args }
            }
            Method::SetWidgetState => {
                MethodCall::SetWidgetState(args.first().cloned().filter(|v| !v.is_null()))
            }
            Method::RequestDisplayMode => {
                let ModeArg { mode } = arg(method, args, 0)?;
                MethodCall::RequestDisplayMode(mode)
            }
            Method::SendFollowUpMessage => {
                let PromptArg { prompt } = arg(method, args, 0)?;
                MethodCall::SendFollowUpMessage { prompt }
            }
            Method::RequestClose => MethodCall::RequestClose,
            Method::OpenExternal => {
                let HrefArg { href } = arg(method, args, 0)?;
                MethodCall::OpenExternal { href }
            }
            Method::NotifyIntrinsicHeight => MethodCall::NotifyIntrinsicHeight(clamp_height(args.first())),
            Method::RequestModal => {
                let options = match args.first() {
                    None | Some(Value::Null) => ModalOptions::default(),
                    Some(_) => arg(method, args, 0)?,
                };
                MethodCall::RequestModal(options)
            }
            Method::UploadFile => MethodCall::UploadFile(arg(method, args, 0)?),
            Method::GetFileDownloadUrl => {
                let FileIdArg { file_id } = arg(method, args, 0)?;
                MethodCall::GetFileDownloadUrl { file_id }
            }
        };
        Ok(call)
    }

    pub fn method(&self) -> Method {
        match self {
            MethodCall::CallTool { .. } => Method::CallTool,
            MethodCall::SetWidgetState(_) => Method::SetWidgetState,
            MethodCall::RequestDisplayMode(_) => Method::RequestDisplayMode,
            MethodCall::SendFollowUpMessage { .. } => Method::SendFollowUpMessage,
            MethodCall::RequestClose => Method::RequestClose,
            MethodCall::OpenExternal { .. } => Method::OpenExternal,
            MethodCall::NotifyIntrinsicHeight(_) => Method::NotifyIntrinsicHeight,
            MethodCall::RequestModal(_) => Method::RequestModal,
            MethodCall::UploadFile(_) => Method::UploadFile,
            MethodCall::GetFileDownloadUrl { .. } => Method::GetFileDownloadUrl,
        }
    }
}
