//! Stratum message types and JSON-RPC serialization.
//!
//! Workers talk to the relay with [`Request`]s and pools answer with
//! [`Response`]s. Both carry open-ended parameter objects, represented as
//! [`Params`], whose accessors return typed errors instead of panicking when
//! a field is missing or holds the wrong kind of value.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use super::error::{StratumError, StratumResult};

/// Method name of the login call, both from workers and towards pools.
pub const LOGIN_METHOD: &str = "login";

/// Open map of named parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Params(Map<String, Value>);

impl Params {
    /// Create an empty parameter map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a required string field.
    pub fn get_str(&self, key: &str) -> StratumResult<&str> {
        self.require(key)?
            .as_str()
            .ok_or_else(|| wrong_type(key, "a string"))
    }

    /// Get a required unsigned integer field.
    pub fn get_u64(&self, key: &str) -> StratumResult<u64> {
        self.require(key)?
            .as_u64()
            .ok_or_else(|| wrong_type(key, "an unsigned integer"))
    }

    /// Get a required boolean field.
    pub fn get_bool(&self, key: &str) -> StratumResult<bool> {
        self.require(key)?
            .as_bool()
            .ok_or_else(|| wrong_type(key, "a boolean"))
    }

    /// Get a required object field.
    pub fn get_object(&self, key: &str) -> StratumResult<&Map<String, Value>> {
        self.require(key)?
            .as_object()
            .ok_or_else(|| wrong_type(key, "an object"))
    }

    /// Get a required array field.
    pub fn get_array(&self, key: &str) -> StratumResult<&Vec<Value>> {
        self.require(key)?
            .as_array()
            .ok_or_else(|| wrong_type(key, "an array"))
    }

    /// Set a field, replacing any previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Copy every field of `other` into this map; `other` wins on collision.
    pub fn merge(&mut self, other: &Params) {
        for (key, value) in &other.0 {
            self.0.insert(key.clone(), value.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn require(&self, key: &str) -> StratumResult<&Value> {
        self.0
            .get(key)
            .ok_or_else(|| StratumError::MissingField(key.to_string()))
    }
}

impl From<Map<String, Value>> for Params {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl TryFrom<Value> for Params {
    type Error = StratumError;

    fn try_from(value: Value) -> StratumResult<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            Value::Null => Ok(Self::default()),
            _ => Err(wrong_type("params", "an object")),
        }
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

fn wrong_type(field: &str, expected: &'static str) -> StratumError {
    StratumError::WrongType {
        field: field.to_string(),
        expected,
    }
}

// Peers send `"params": null` where they mean "no parameters".
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// A Stratum call, flowing worker to pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Call identifier, echoed back by the pool in its reply
    #[serde(default)]
    pub id: Option<i64>,

    /// Method name (e.g. "login", "submit", "keepalived")
    pub method: String,

    /// Method parameters
    #[serde(default, deserialize_with = "null_as_default")]
    pub params: Params,
}

impl Request {
    /// Create a new request.
    pub fn new(id: Option<i64>, method: impl Into<String>, params: Params) -> Self {
        Self {
            id,
            method: method.into(),
            params,
        }
    }

    /// Whether this is a login call.
    pub fn is_login(&self) -> bool {
        self.method == LOGIN_METHOD
    }

    /// Set the identifier, consuming and returning the request.
    pub fn with_id(mut self, id: Option<i64>) -> Self {
        self.id = id;
        self
    }

    /// Merge `fields` into the parameters; `fields` wins on collision.
    pub fn with_fields(mut self, fields: &Params) -> Self {
        self.params.merge(fields);
        self
    }
}

/// Build the login request sent to a pool.
///
/// Parameters the worker supplied are carried over first, then `login` and
/// `pass` are forced, so they override any same-named worker field.
pub fn create_login_request(username: &str, password: &str, extra: &Params) -> Request {
    let forced: Params = [("login", username), ("pass", password)].into_iter().collect();

    Request::new(None, LOGIN_METHOD, Params::new())
        .with_fields(extra)
        .with_fields(&forced)
}

/// A message from a pool, flowing pool to worker.
///
/// Most are replies to a worker's request. When `method` is set the pool is
/// itself making a call (a new job, a difficulty change) and `params` carries
/// its arguments; see [`Response::is_call`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Identifier of the request being answered
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,

    /// Method name, for pool-initiated calls
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,

    /// Call parameters, for pool-initiated calls
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Params>,

    /// Result of the call (null on failure)
    #[serde(default)]
    pub result: Value,

    /// Error of the call (null on success)
    #[serde(default)]
    pub error: Value,

    /// JSON-RPC version tag, when the pool sends one
    #[serde(rename = "jsonrpc", default, skip_serializing_if = "Option::is_none")]
    pub rpc_version: Option<String>,
}

impl Response {
    /// Build an error reply to the request with the given id.
    pub fn error_reply(id: Option<i64>, code: ErrorCode, message: impl Into<String>) -> Self {
        let mut error = Map::new();
        error.insert("code".to_string(), Value::from(code.code()));
        error.insert("message".to_string(), Value::String(message.into()));

        Self {
            id,
            method: None,
            params: None,
            result: Value::Null,
            error: Value::Object(error),
            rpc_version: Some("2.0".to_string()),
        }
    }

    /// Whether the pool is making a call rather than replying.
    pub fn is_call(&self) -> bool {
        self.method.as_deref().is_some_and(|m| !m.is_empty())
    }

    /// The result as an object.
    pub fn result_object(&self) -> StratumResult<&Map<String, Value>> {
        match &self.result {
            Value::Object(map) => Ok(map),
            Value::Null => Err(StratumError::MissingField("result".to_string())),
            _ => Err(wrong_type("result", "an object")),
        }
    }

    /// The error as an object, or `None` when the call succeeded.
    pub fn error_object(&self) -> StratumResult<Option<&Map<String, Value>>> {
        match &self.error {
            Value::Object(map) => Ok(Some(map)),
            Value::Null => Ok(None),
            _ => Err(wrong_type("error", "an object")),
        }
    }
}

/// Error codes the relay itself reports to workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Login name not present in the configuration
    UnknownWorker,
    /// Worker bound to a pool that is not configured
    UnknownPool,
    /// Login call without a usable `login` parameter
    MalformedLogin,
    /// Pool could not be reached or refused the login
    PoolUnavailable,
}

impl ErrorCode {
    pub fn code(self) -> i64 {
        match self {
            ErrorCode::UnknownWorker => -1,
            ErrorCode::UnknownPool => -2,
            ErrorCode::MalformedLogin => -3,
            ErrorCode::PoolUnavailable => -4,
        }
    }
}
