//! Request routing, body decoding and response building.

use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{self, HeaderMap, HeaderValue};
use hyper::{Method, Response, StatusCode};
use serde_json::{Map, Value};

use crate::forwarder::ForwardError;

/// Why an `update` request could not be relayed.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("failed to read request body: {0}")]
    Body(String),

    #[error("unsupported charset `{0}`")]
    UnsupportedCharset(String),

    #[error("request body is not valid {0}")]
    Decode(&'static str),

    #[error("{0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("update payload must be a JSON object, got {0}")]
    InvalidPayload(&'static str),

    #[error(transparent)]
    Forward(#[from] ForwardError),
}

impl HandlerError {
    /// Error kind reported in the `error` field of a 500 body.
    pub fn kind(&self) -> &str {
        match self {
            HandlerError::Body(_) => "BodyReadError",
            HandlerError::UnsupportedCharset(_) => "UnsupportedCharset",
            HandlerError::Decode(_) => "DecodeError",
            HandlerError::JsonParse(_) => "JsonParse",
            HandlerError::InvalidPayload(_) => "InvalidPayload",
            HandlerError::Forward(e) => &e.kind,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Route {
    Ping,
    Update,
    NotFound,
}

/// Matches a request against `{prefix}ping` and `{prefix}update`.
pub(crate) fn route(method: &Method, path: &str, prefix: &str) -> Route {
    let Some(rest) = path.strip_prefix(prefix) else {
        return Route::NotFound;
    };
    match (method, rest) {
        (&Method::GET, "ping") => Route::Ping,
        (&Method::POST, "update") => Route::Update,
        _ => Route::NotFound,
    }
}

/// The `charset` parameter of `Content-Type`, lowercased.
pub(crate) fn charset_of(headers: &HeaderMap) -> Option<String> {
    let content_type = headers.get(header::CONTENT_TYPE)?.to_str().ok()?;
    content_type.split(';').skip(1).find_map(|param| {
        let (name, value) = param.split_once('=')?;
        name.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches('"').to_ascii_lowercase())
    })
}

/// Decodes a request body in its declared charset (UTF-8 when absent).
pub(crate) fn decode_body(body: &[u8], charset: Option<&str>) -> Result<String, HandlerError> {
    match charset.unwrap_or("utf-8") {
        "utf-8" | "utf8" => {
            String::from_utf8(body.to_vec()).map_err(|_| HandlerError::Decode("utf-8"))
        }
        "us-ascii" | "ascii" => {
            if body.is_ascii() {
                Ok(body.iter().map(|&b| b as char).collect())
            } else {
                Err(HandlerError::Decode("us-ascii"))
            }
        }
        "iso-8859-1" | "latin1" | "latin-1" => Ok(body.iter().map(|&b| b as char).collect()),
        other => Err(HandlerError::UnsupportedCharset(other.to_string())),
    }
}

/// Parses an update body, which must be a JSON object.
pub(crate) fn parse_update(text: &str) -> Result<Map<String, Value>, HandlerError> {
    match serde_json::from_str::<Value>(text)? {
        Value::Object(map) => Ok(map),
        Value::Null => Err(HandlerError::InvalidPayload("null")),
        Value::Bool(_) => Err(HandlerError::InvalidPayload("a boolean")),
        Value::Number(_) => Err(HandlerError::InvalidPayload("a number")),
        Value::String(_) => Err(HandlerError::InvalidPayload("a string")),
        Value::Array(_) => Err(HandlerError::InvalidPayload("an array")),
    }
}

pub(crate) fn json_response(status: StatusCode, body: &Value) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body.to_string())));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    response
}

pub(crate) fn error_response(err: &HandlerError) -> Response<Full<Bytes>> {
    json_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        &serde_json::json!({
            "error": err.kind(),
            "message": err.to_string(),
        }),
    )
}

pub(crate) fn not_found() -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = StatusCode::NOT_FOUND;
    response
}
