//! Normalization of incoming HTTP requests into the envelope handed to handlers.

use crate::handler::HandlerError;
use crate::model::HttpMethod;
use axum::extract::{Query, Request};
use axum::http::header::CONTENT_TYPE;
use axum::http::HeaderMap;
use serde::Serialize;
use std::collections::HashMap;

/// Request envelope passed to every endpoint handler.
#[derive(Debug, Clone, Default, Serialize)]
pub struct NormalizedRequest {
    pub method: Option<HttpMethod>,
    /// Full request path, e.g. `/api/ERP01/MM/materials/MAT001`
    pub path: String,
    /// Parameters captured from the endpoint path template
    pub path_params: HashMap<String, String>,
    pub query: HashMap<String, String>,
    /// Header names are lower-cased; multi-valued headers keep the first value
    pub headers: HashMap<String, String>,
    /// Parsed JSON body (POST/PUT with a JSON content type only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
}

impl NormalizedRequest {
    pub fn path_param(&self, name: &str) -> Option<&str> {
        self.path_params.get(name).map(String::as_str)
    }

    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }
}

/// Build the normalized envelope from a raw request.
pub async fn normalize(
    request: Request,
    method: HttpMethod,
    path_params: HashMap<String, String>,
    max_body_bytes: usize,
) -> Result<NormalizedRequest, HandlerError> {
    let (parts, body) = request.into_parts();

    let query = match parts.uri.query() {
        Some(_) => Query::<HashMap<String, String>>::try_from_uri(&parts.uri)
            .map(|Query(q)| q)
            .map_err(|e| HandlerError::bad_request(format!("Invalid query string: {}", e)))?,
        None => HashMap::new(),
    };

    let body = if method.carries_body() && is_json(&parts.headers) {
        let bytes = axum::body::to_bytes(body, max_body_bytes)
            .await
            .map_err(|e| HandlerError::bad_request(format!("Unreadable request body: {}", e)))?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            None
        } else {
            let value = serde_json::from_slice(&bytes).map_err(|e| {
                HandlerError::bad_request(format!("Request body is not valid JSON: {}", e))
            })?;
            Some(value)
        }
    } else {
        None
    };

    Ok(NormalizedRequest {
        method: Some(method),
        path: parts.uri.path().to_string(),
        path_params,
        query,
        headers: flatten_headers(&parts.headers),
        body,
    })
}

/// Flatten a header map to single-value, lower-case keyed pairs.
pub fn flatten_headers(headers: &HeaderMap) -> HashMap<String, String> {
    let mut flat = HashMap::new();
    for (name, value) in headers {
        if let Ok(value) = value.to_str() {
            flat.entry(name.as_str().to_string())
                .or_insert_with(|| value.to_string());
        }
    }
    flat
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| {
            let mime = ct.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
            mime == "application/json" || mime.ends_with("+json")
        })
        .unwrap_or(false)
}
