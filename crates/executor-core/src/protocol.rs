//! Wire protocol for script requests and responses.
//!
//! Requests arrive as a JSON object carrying exactly one of
//! `compileRequest`, `invokeRequest` or `releaseRequest`. They are decoded
//! into the [`ScriptRequest`] tagged union, so the processor never has to
//! inspect optional fields.
//!
//! Fields used only for diagnostics or with a sensible default are read
//! leniently. A request whose variant and script id decode but whose other
//! fields do not becomes [`ScriptRequest::Rejected`], which still gets a
//! failure response.
//!
//! Responses are built with [`RemoteResponse`] and carry exactly one of
//! the three response payloads.
//!
//! # Examples
//!
//! ```
//! use script_executor_core::{ScriptId, ScriptRequest};
//!
//! let body = br#"{"releaseRequest":{"scriptIdMSB":0,"scriptIdLSB":1}}"#;
//! let request = ScriptRequest::decode(body).unwrap();
//! assert_eq!(request.script_id(), Some(ScriptId::from_bits(0, 1)));
//! ```

use crate::{Error, RequestId, Result, ScriptError, ScriptId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

const COMPILE_KEY: &str = "compileRequest";
const INVOKE_KEY: &str = "invokeRequest";
const RELEASE_KEY: &str = "releaseRequest";

/// Failure classification sent back to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum ErrorCode {
    /// The script body could not be compiled
    CompilationError,
    /// The script failed while running
    RuntimeError,
    /// The script exceeded its time budget
    TimeoutError,
    /// The request type was not recognized
    Unrecognized,
}

impl ErrorCode {
    /// Returns the numeric wire value.
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        match self {
            Self::CompilationError => 0,
            Self::RuntimeError => 1,
            Self::TimeoutError => 2,
            Self::Unrecognized => -1,
        }
    }

    /// Returns the symbolic name used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CompilationError => "COMPILATION_ERROR",
            Self::RuntimeError => "RUNTIME_ERROR",
            Self::TimeoutError => "TIMEOUT_ERROR",
            Self::Unrecognized => "UNRECOGNIZED",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<ErrorCode> for i32 {
    fn from(code: ErrorCode) -> Self {
        code.as_i32()
    }
}

impl TryFrom<i32> for ErrorCode {
    type Error = String;

    fn try_from(value: i32) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::CompilationError),
            1 => Ok(Self::RuntimeError),
            2 => Ok(Self::TimeoutError),
            -1 => Ok(Self::Unrecognized),
            other => Err(format!("unknown error code {other}")),
        }
    }
}

/// Builds a human-readable error description.
///
/// The result is `"<name>: <message>"`. When the first line of `stack`
/// splits on `:` into exactly two parts and the right part is numeric, the
/// line number is appended as `" in at line number <N>"`.
///
/// # Examples
///
/// ```
/// use script_executor_core::protocol::error_details;
///
/// assert_eq!(error_details("Error", "boom", None), "Error: boom");
/// assert_eq!(
///     error_details("TypeError", "bad", Some("<anonymous>:4\n  at f")),
///     "TypeError: bad in at line number 4"
/// );
/// assert_eq!(
///     error_details("Error", "boom", Some("file.js:4:10")),
///     "Error: boom"
/// );
/// ```
#[must_use]
pub fn error_details(name: &str, message: &str, stack: Option<&str>) -> String {
    let mut details = format!("{name}: {message}");
    let first_line = stack.and_then(|s| s.lines().next());
    if let Some(line) = first_line
        && let [_, number] = line.split(':').collect::<Vec<_>>()[..]
    {
        let number = number.trim();
        if number.parse::<f64>().is_ok() {
            details.push_str(" in at line number ");
            details.push_str(number);
        }
    }
    details
}

/// Body of a `compileRequest`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompileRequest {
    /// Most significant half of the script id
    #[serde(rename = "scriptIdMSB")]
    pub script_id_msb: i64,
    /// Least significant half of the script id
    #[serde(rename = "scriptIdLSB")]
    pub script_id_lsb: i64,
    /// Script source
    #[serde(rename = "scriptBody")]
    pub script_body: String,
}

impl CompileRequest {
    /// Returns the script identifier.
    #[must_use]
    pub const fn script_id(&self) -> ScriptId {
        ScriptId::from_bits(self.script_id_msb, self.script_id_lsb)
    }
}

/// Body of an `invokeRequest`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvokeRequest {
    /// Most significant half of the script id
    #[serde(rename = "scriptIdMSB")]
    pub script_id_msb: i64,
    /// Least significant half of the script id
    #[serde(rename = "scriptIdLSB")]
    pub script_id_lsb: i64,
    /// Script source, used only when the script is not cached
    #[serde(rename = "scriptBody", default, skip_serializing_if = "Option::is_none")]
    pub script_body: Option<String>,
    /// Name of the invoked function, used for diagnostics
    #[serde(rename = "functionName", default, deserialize_with = "lenient_string")]
    pub function_name: String,
    /// Positional arguments exposed to the script as `args`
    #[serde(default, deserialize_with = "nullable_args")]
    pub args: Vec<Value>,
    /// Execution budget in milliseconds, `0` selects the default
    ///
    /// Negative, fractional or non-numeric values also select the default.
    #[serde(default, deserialize_with = "lenient_timeout")]
    pub timeout: u64,
}

/// `null` reads as empty, other non-strings as their JSON text.
fn lenient_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => String::new(),
        Value::String(s) => s,
        other => other.to_string(),
    })
}

fn nullable_args<'de, D>(deserializer: D) -> std::result::Result<Vec<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<Value>>::deserialize(deserializer)?.unwrap_or_default())
}

fn lenient_timeout<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Value::deserialize(deserializer)?.as_u64().unwrap_or(0))
}

impl InvokeRequest {
    /// Returns the script identifier.
    #[must_use]
    pub const fn script_id(&self) -> ScriptId {
        ScriptId::from_bits(self.script_id_msb, self.script_id_lsb)
    }
}

/// Body of a `releaseRequest`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseRequest {
    /// Most significant half of the script id
    #[serde(rename = "scriptIdMSB")]
    pub script_id_msb: i64,
    /// Least significant half of the script id
    #[serde(rename = "scriptIdLSB")]
    pub script_id_lsb: i64,
}

impl ReleaseRequest {
    /// Returns the script identifier.
    #[must_use]
    pub const fn script_id(&self) -> ScriptId {
        ScriptId::from_bits(self.script_id_msb, self.script_id_lsb)
    }
}

#[derive(Debug, Deserialize)]
struct RawRequest {
    #[serde(rename = "compileRequest", default)]
    compile_request: Option<Value>,
    #[serde(rename = "invokeRequest", default)]
    invoke_request: Option<Value>,
    #[serde(rename = "releaseRequest", default)]
    release_request: Option<Value>,
}

/// The script id fields shared by every request variant.
#[derive(Debug, Deserialize)]
struct ScriptIdFields {
    #[serde(rename = "scriptIdMSB")]
    script_id_msb: i64,
    #[serde(rename = "scriptIdLSB")]
    script_id_lsb: i64,
}

/// Request variant names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// `compileRequest`
    Compile,
    /// `invokeRequest`
    Invoke,
    /// `releaseRequest`
    Release,
}

impl RequestKind {
    /// Returns the short name used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Compile => "compile",
            Self::Invoke => "invoke",
            Self::Release => "release",
        }
    }

    const fn wire_key(self) -> &'static str {
        match self {
            Self::Compile => COMPILE_KEY,
            Self::Invoke => INVOKE_KEY,
            Self::Release => RELEASE_KEY,
        }
    }

    /// Builds the failure reported for a request of this kind whose fields
    /// could not be decoded.
    ///
    /// Compile requests fail as compilation errors, the others as
    /// `TypeError` runtime errors.
    #[must_use]
    pub fn invalid_fields(self, reason: &str) -> ScriptError {
        let message = format!("invalid {}: {reason}", self.wire_key());
        match self {
            Self::Compile => ScriptError::Compilation {
                message,
                line: None,
            },
            Self::Invoke | Self::Release => ScriptError::Runtime {
                name: "TypeError",
                message,
                line: None,
            },
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded request, holding exactly one request variant.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptRequest {
    /// Compile and cache a script
    Compile(CompileRequest),
    /// Run a script, compiling it first when it is not cached
    Invoke(InvokeRequest),
    /// Drop a script from the cache
    Release(ReleaseRequest),
    /// The variant and script id decoded, the remaining fields did not
    Rejected {
        /// Which request variant was sent
        kind: RequestKind,
        /// Script the request refers to
        script_id: ScriptId,
        /// Failure to report back
        error: ScriptError,
    },
    /// None of the known request fields was present
    Unrecognized,
}

impl ScriptRequest {
    /// Decodes a request body.
    ///
    /// A body without any of the known request fields decodes to
    /// [`ScriptRequest::Unrecognized`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::SerializationError`] if the body is not valid JSON
    /// or the script id of the request is missing or malformed, and
    /// [`Error::InvalidMessage`] if more than one request variant is
    /// present.
    pub fn decode(body: &[u8]) -> Result<Self> {
        let raw: RawRequest = serde_json::from_slice(body)?;
        match (raw.compile_request, raw.invoke_request, raw.release_request) {
            (Some(value), None, None) => {
                Self::decode_variant(RequestKind::Compile, &value, Self::Compile)
            }
            (None, Some(value), None) => {
                Self::decode_variant(RequestKind::Invoke, &value, Self::Invoke)
            }
            (None, None, Some(value)) => {
                Self::decode_variant(RequestKind::Release, &value, Self::Release)
            }
            (None, None, None) => Ok(Self::Unrecognized),
            _ => Err(Error::invalid_message(
                "request carries more than one of compileRequest, invokeRequest, releaseRequest",
            )),
        }
    }

    fn decode_variant<T: DeserializeOwned>(
        kind: RequestKind,
        value: &Value,
        wrap: fn(T) -> Self,
    ) -> Result<Self> {
        match T::deserialize(value) {
            Ok(request) => Ok(wrap(request)),
            Err(err) => {
                let ids = ScriptIdFields::deserialize(value)?;
                Ok(Self::Rejected {
                    kind,
                    script_id: ScriptId::from_bits(ids.script_id_msb, ids.script_id_lsb),
                    error: kind.invalid_fields(&err.to_string()),
                })
            }
        }
    }

    /// Encodes the request into its JSON wire form.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SerializationError`] if serialization fails and
    /// [`Error::InvalidMessage`] for a rejected request, which has no wire
    /// form.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let (key, value) = match self {
            Self::Compile(r) => (COMPILE_KEY, serde_json::to_value(r)?),
            Self::Invoke(r) => (INVOKE_KEY, serde_json::to_value(r)?),
            Self::Release(r) => (RELEASE_KEY, serde_json::to_value(r)?),
            Self::Unrecognized => return Ok(b"{}".to_vec()),
            Self::Rejected { .. } => {
                return Err(Error::invalid_message("a rejected request cannot be encoded"));
            }
        };
        let mut object = serde_json::Map::new();
        object.insert(key.to_string(), value);
        Ok(serde_json::to_vec(&object)?)
    }

    /// Returns the script identifier, if the request carries one.
    #[must_use]
    pub const fn script_id(&self) -> Option<ScriptId> {
        match self {
            Self::Compile(r) => Some(r.script_id()),
            Self::Invoke(r) => Some(r.script_id()),
            Self::Release(r) => Some(r.script_id()),
            Self::Rejected { script_id, .. } => Some(*script_id),
            Self::Unrecognized => None,
        }
    }

    /// Returns a short name of the request kind for logging.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Compile(_) => RequestKind::Compile.as_str(),
            Self::Invoke(_) => RequestKind::Invoke.as_str(),
            Self::Release(_) => RequestKind::Release.as_str(),
            Self::Rejected { kind, .. } => kind.as_str(),
            Self::Unrecognized => "unrecognized",
        }
    }
}

/// Outcome of a compile request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileResponse {
    /// Whether compilation succeeded
    pub success: bool,
    /// Failure classification, absent on success
    #[serde(rename = "errorCode", default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    /// Failure description, empty on success
    #[serde(rename = "errorDetails", default)]
    pub error_details: String,
    /// Most significant half of the script id
    #[serde(rename = "scriptIdMSB")]
    pub script_id_msb: i64,
    /// Least significant half of the script id
    #[serde(rename = "scriptIdLSB")]
    pub script_id_lsb: i64,
}

impl CompileResponse {
    /// Builds a success response echoing the script id.
    #[must_use]
    pub const fn success(script_id: ScriptId) -> Self {
        let (msb, lsb) = script_id.to_bits();
        Self {
            success: true,
            error_code: None,
            error_details: String::new(),
            script_id_msb: msb,
            script_id_lsb: lsb,
        }
    }

    /// Builds a failure response from a script error.
    #[must_use]
    pub fn failure(script_id: ScriptId, error: &ScriptError) -> Self {
        let (msb, lsb) = script_id.to_bits();
        Self {
            success: false,
            error_code: Some(error.error_code()),
            error_details: error.details(),
            script_id_msb: msb,
            script_id_lsb: lsb,
        }
    }
}

/// Outcome of an invoke request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvokeResponse {
    /// Whether the invocation succeeded
    pub success: bool,
    /// Failure classification, absent on success
    #[serde(rename = "errorCode", default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    /// Failure description, empty on success
    #[serde(rename = "errorDetails", default)]
    pub error_details: String,
    /// Script result, the empty string on failure
    pub result: Value,
}

impl InvokeResponse {
    /// Builds a success response carrying the script result.
    #[must_use]
    pub const fn success(result: Value) -> Self {
        Self {
            success: true,
            error_code: None,
            error_details: String::new(),
            result,
        }
    }

    /// Builds a failure response from a script error.
    #[must_use]
    pub fn failure(error: &ScriptError) -> Self {
        Self {
            success: false,
            error_code: Some(error.error_code()),
            error_details: error.details(),
            result: Value::String(String::new()),
        }
    }
}

/// Outcome of a release request. Release always succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseResponse {
    /// Always `true`
    pub success: bool,
    /// Most significant half of the script id
    #[serde(rename = "scriptIdMSB")]
    pub script_id_msb: i64,
    /// Least significant half of the script id
    #[serde(rename = "scriptIdLSB")]
    pub script_id_lsb: i64,
}

impl ReleaseResponse {
    /// Builds the success response echoing the script id.
    #[must_use]
    pub const fn success(script_id: ScriptId) -> Self {
        let (msb, lsb) = script_id.to_bits();
        Self {
            success: true,
            script_id_msb: msb,
            script_id_lsb: lsb,
        }
    }
}

/// Response envelope correlated with the originating request id.
///
/// # Examples
///
/// ```
/// use script_executor_core::protocol::{ReleaseResponse, RemoteResponse};
/// use script_executor_core::{RequestId, ScriptId};
///
/// let request_id = RequestId::from_bits(7, 8);
/// let response = RemoteResponse::release(request_id, ReleaseResponse::success(ScriptId::from_bits(0, 1)));
/// let json: serde_json::Value = serde_json::from_slice(&response.to_bytes().unwrap()).unwrap();
///
/// assert_eq!(json["requestIdMSB"], 7);
/// assert!(json.get("compileResponse").is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteResponse {
    /// Most significant half of the request id
    #[serde(rename = "requestIdMSB")]
    pub request_id_msb: i64,
    /// Least significant half of the request id
    #[serde(rename = "requestIdLSB")]
    pub request_id_lsb: i64,
    /// Present for compile requests
    #[serde(rename = "compileResponse", default, skip_serializing_if = "Option::is_none")]
    pub compile_response: Option<CompileResponse>,
    /// Present for invoke requests
    #[serde(rename = "invokeResponse", default, skip_serializing_if = "Option::is_none")]
    pub invoke_response: Option<InvokeResponse>,
    /// Present for release requests
    #[serde(rename = "releaseResponse", default, skip_serializing_if = "Option::is_none")]
    pub release_response: Option<ReleaseResponse>,
}

impl RemoteResponse {
    const fn empty(request_id: RequestId) -> Self {
        let (msb, lsb) = request_id.to_bits();
        Self {
            request_id_msb: msb,
            request_id_lsb: lsb,
            compile_response: None,
            invoke_response: None,
            release_response: None,
        }
    }

    /// Wraps a compile response.
    #[must_use]
    pub fn compile(request_id: RequestId, response: CompileResponse) -> Self {
        Self {
            compile_response: Some(response),
            ..Self::empty(request_id)
        }
    }

    /// Wraps an invoke response.
    #[must_use]
    pub fn invoke(request_id: RequestId, response: InvokeResponse) -> Self {
        Self {
            invoke_response: Some(response),
            ..Self::empty(request_id)
        }
    }

    /// Wraps a release response.
    #[must_use]
    pub fn release(request_id: RequestId, response: ReleaseResponse) -> Self {
        Self {
            release_response: Some(response),
            ..Self::empty(request_id)
        }
    }

    /// Returns the correlated request id.
    #[must_use]
    pub const fn request_id(&self) -> RequestId {
        RequestId::from_bits(self.request_id_msb, self.request_id_lsb)
    }

    /// Serializes the response to JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SerializationError`] if serialization fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parses a response from JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SerializationError`] if the bytes are not a valid
    /// response.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
