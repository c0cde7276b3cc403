//! # Session Envelope
//!
//! The scoring service expects a two-phase handshake sent as one JSON document:
//! a `connect` command signed at application scope, followed by a `start`
//! command signed at user scope that also carries the audio format and the
//! scoring parameters. The field names and their order are part of the wire
//! contract, so the structs below serialize in declaration order.
//!
//! ## Example (abridged):
//! ```json
//! {
//!   "connect": {"cmd": "connect", "param": {"sdk": {...}, "app": {...}}},
//!   "start": {"cmd": "start", "param": {"app": {...}, "audio": {...}, "request": {...}}}
//! }
//! ```

use super::signature::{Credentials, SignatureMaterial};
use serde::Serialize;
use serde_json::{Map, Value};

/// SDK version reported in the `connect` command.
pub const SDK_VERSION: u32 = 16777472;
/// SDK source tag reported in the `connect` command.
pub const SDK_SOURCE: u32 = 9;
/// Protocol revision reported in the `connect` command.
pub const SDK_PROTOCOL: u32 = 2;

/// Key under which the session token travels in the scoring parameters.
pub const TOKEN_ID_KEY: &str = "tokenId";
/// Key naming the scoring engine variant in the scoring parameters.
pub const CORE_TYPE_KEY: &str = "coreType";

/// Caller-supplied scoring options, passed to the service untouched apart from
/// the session token. Keys keep their insertion order when serialized.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ScoringParameters(Map<String, Value>);

impl ScoringParameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Into<Value>) {
        self.0.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// The scoring engine variant, e.g. `sent.eval.promax`.
    pub fn core_type(&self) -> Option<&str> {
        self.get(CORE_TYPE_KEY).and_then(Value::as_str)
    }

    /// The session token, if one was supplied or injected.
    pub fn token_id(&self) -> Option<&Value> {
        self.get(TOKEN_ID_KEY).filter(|value| is_set(value))
    }

    /// Keep an existing token, otherwise inject a freshly generated one.
    fn ensure_token_id(&mut self) {
        if self.token_id().is_none() {
            self.insert(TOKEN_ID_KEY, generate_token_id());
        }
    }
}

impl From<Map<String, Value>> for ScoringParameters {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Null, `false`, zero and the empty string all count as "no token supplied".
fn is_set(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().map_or(true, |n| n != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// 32 uppercase hex characters with UUIDv4 version and variant nibbles.
pub fn generate_token_id() -> String {
    uuid::Uuid::new_v4().simple().to_string().to_uppercase()
}

/// Description of the audio attached to the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioFormat {
    pub audio_type: String,
    pub sample_rate: String,
    pub channel: u8,
    pub sample_bytes: u8,
}

impl AudioFormat {
    /// Mono, 2 bytes per sample. Only the container tag and rate vary.
    pub fn new(audio_type: impl Into<String>, sample_rate: u32) -> Self {
        Self {
            audio_type: audio_type.into(),
            sample_rate: sample_rate.to_string(),
            channel: 1,
            sample_bytes: 2,
        }
    }

    /// The format produced by the audio normalizer.
    pub fn normalized_wav() -> Self {
        Self::new("wav", crate::audio::TARGET_SAMPLE_RATE)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionEnvelope {
    pub connect: ConnectCommand,
    pub start: StartCommand,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectCommand {
    pub cmd: &'static str,
    pub param: ConnectParam,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectParam {
    pub sdk: SdkInfo,
    pub app: ConnectApp,
}

#[derive(Debug, Clone, Serialize)]
pub struct SdkInfo {
    pub version: u32,
    pub source: u32,
    pub protocol: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectApp {
    pub application_id: String,
    pub sig: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StartCommand {
    pub cmd: &'static str,
    pub param: StartParam,
}

#[derive(Debug, Clone, Serialize)]
pub struct StartParam {
    pub app: StartApp,
    pub audio: AudioFormat,
    pub request: ScoringParameters,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartApp {
    pub application_id: String,
    pub sig: String,
    pub user_id: String,
    pub timestamp: String,
}

impl SessionEnvelope {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn token_id(&self) -> Option<&Value> {
        self.start.param.request.token_id()
    }
}

/// Builds signed envelopes. Holds nothing but the credentials, so one instance
/// is shared by all requests while every envelope it produces is new.
#[derive(Debug, Clone)]
pub struct SessionEnvelopeBuilder {
    credentials: Credentials,
}

impl SessionEnvelopeBuilder {
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }

    /// Sign and assemble a new envelope.
    ///
    /// Call this immediately before submission: both signatures embed the
    /// current time and the service only accepts recent timestamps.
    pub fn build(
        &self,
        user_id: &str,
        audio: AudioFormat,
        mut params: ScoringParameters,
    ) -> SessionEnvelope {
        let connect_sig = self.credentials.connect_signature();
        let start_sig = self.credentials.start_signature(user_id);
        params.ensure_token_id();

        SessionEnvelope {
            connect: self.connect_command(connect_sig),
            start: self.start_command(start_sig, user_id, audio, params),
        }
    }

    fn connect_command(&self, signature: SignatureMaterial) -> ConnectCommand {
        ConnectCommand {
            cmd: "connect",
            param: ConnectParam {
                sdk: SdkInfo {
                    version: SDK_VERSION,
                    source: SDK_SOURCE,
                    protocol: SDK_PROTOCOL,
                },
                app: ConnectApp {
                    application_id: self.credentials.app_key().to_string(),
                    sig: signature.sig,
                    timestamp: signature.timestamp,
                },
            },
        }
    }

    fn start_command(
        &self,
        signature: SignatureMaterial,
        user_id: &str,
        audio: AudioFormat,
        request: ScoringParameters,
    ) -> StartCommand {
        StartCommand {
            cmd: "start",
            param: StartParam {
                app: StartApp {
                    application_id: self.credentials.app_key().to_string(),
                    sig: signature.sig,
                    user_id: signature.user_id.unwrap_or_else(|| user_id.to_string()),
                    timestamp: signature.timestamp,
                },
                audio,
                request,
            },
        }
    }
}
