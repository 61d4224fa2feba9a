//! Core descriptors: systems, modules, endpoints and error simulation rules.

use crate::handler::Handler;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// A mocked backend system (e.g. an ERP instance).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct System {
    /// Registry-wide unique identifier
    pub id: String,

    pub name: String,

    #[serde(rename = "type", default)]
    pub system_type: String,

    /// Connection parameters of the real system (informational only)
    #[serde(default)]
    pub connection: HashMap<String, serde_json::Value>,
}

/// A functional module of a system, owning an ordered set of endpoints.
#[derive(Clone)]
pub struct Module {
    /// Unique within the owning system
    pub id: String,
    pub name: String,
    pub system_id: String,
    pub endpoints: Vec<Endpoint>,
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("system_id", &self.system_id)
            .field("endpoints", &self.endpoints)
            .finish()
    }
}

/// A single endpoint descriptor, the unit bound to a live route.
#[derive(Clone)]
pub struct Endpoint {
    /// Path template relative to the module, e.g. `/materials/{id}`
    pub path: String,
    pub method: HttpMethod,
    pub handler: Arc<dyn Handler>,
    pub error_rules: Vec<ErrorSimulationRule>,
}

impl Endpoint {
    pub fn new(method: HttpMethod, path: impl Into<String>, handler: Arc<dyn Handler>) -> Self {
        Self {
            path: path.into(),
            method,
            handler,
            error_rules: Vec::new(),
        }
    }

    pub fn with_rule(mut self, rule: ErrorSimulationRule) -> Self {
        self.error_rules.push(rule);
        self
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("error_rules", &self.error_rules.len())
            .finish()
    }
}

/// HTTP methods served by mock endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        }
    }

    /// Methods whose JSON body is extracted into the normalized request.
    pub fn carries_body(&self) -> bool {
        matches!(self, HttpMethod::Post | HttpMethod::Put)
    }
}

impl FromStr for HttpMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "DELETE" => Ok(HttpMethod::Delete),
            other => Err(format!("unsupported HTTP method '{}'", other)),
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category of a simulated fault. Determines status code and default body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ErrorKind {
    Timeout,
    Authorization,
    Business,
    System,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Timeout => "Timeout",
            ErrorKind::Authorization => "Authorization",
            ErrorKind::Business => "Business",
            ErrorKind::System => "System",
        }
    }

    pub fn status(&self) -> u16 {
        match self {
            ErrorKind::Timeout => 408,
            ErrorKind::Authorization => 401,
            ErrorKind::Business => 400,
            ErrorKind::System => 500,
        }
    }
}

impl FromStr for ErrorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "timeout" => Ok(ErrorKind::Timeout),
            "authorization" => Ok(ErrorKind::Authorization),
            "business" => Ok(ErrorKind::Business),
            "system" => Ok(ErrorKind::System),
            other => Err(format!("unknown error kind '{}'", other)),
        }
    }
}

impl TryFrom<String> for ErrorKind {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ErrorKind> for String {
    fn from(kind: ErrorKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A rule describing when and how an endpoint fails.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ErrorSimulationRule {
    pub error_kind: ErrorKind,

    /// Trigger probability in [0, 1]
    #[serde(default = "default_probability")]
    pub probability: f64,

    /// Suspension applied before a Timeout fault is returned
    #[serde(default)]
    pub delay_ms: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,

    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub details: serde_json::Map<String, serde_json::Value>,
}

fn default_probability() -> f64 {
    1.0
}

impl ErrorSimulationRule {
    /// A rule that always fires with the kind's defaults.
    pub fn always(kind: ErrorKind) -> Self {
        Self {
            error_kind: kind,
            probability: 1.0,
            delay_ms: 0,
            custom_message: None,
            error_code: None,
            details: serde_json::Map::new(),
        }
    }

    pub fn with_probability(mut self, probability: f64) -> Self {
        self.probability = probability;
        self
    }

    pub fn with_delay(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.probability) {
            return Err(format!(
                "probability {} is outside [0, 1]",
                self.probability
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_parsing_is_case_insensitive() {
        assert_eq!("Timeout".parse::<ErrorKind>(), Ok(ErrorKind::Timeout));
        assert_eq!("AUTHORIZATION".parse::<ErrorKind>(), Ok(ErrorKind::Authorization));
        assert_eq!(" business ".parse::<ErrorKind>(), Ok(ErrorKind::Business));
        assert!("Teapot".parse::<ErrorKind>().is_err());
    }

    #[test]
    fn test_error_kind_status_mapping() {
        assert_eq!(ErrorKind::Timeout.status(), 408);
        assert_eq!(ErrorKind::Authorization.status(), 401);
        assert_eq!(ErrorKind::Business.status(), 400);
        assert_eq!(ErrorKind::System.status(), 500);
    }

    #[test]
    fn test_parse_rule_json() {
        let rule: ErrorSimulationRule = serde_json::from_str(
            r#"{"errorKind":"system","probability":0.25,"errorCode":"E42","details":{"table":"MARA"}}"#,
        )
        .unwrap();
        assert_eq!(rule.error_kind, ErrorKind::System);
        assert_eq!(rule.probability, 0.25);
        assert_eq!(rule.error_code.as_deref(), Some("E42"));
        assert_eq!(rule.details["table"], "MARA");
        assert_eq!(rule.delay_ms, 0);
    }

    #[test]
    fn test_rule_probability_defaults_to_one() {
        let rule: ErrorSimulationRule =
            serde_json::from_str(r#"{"errorKind":"Timeout","delayMs":250}"#).unwrap();
        assert_eq!(rule.probability, 1.0);
        assert_eq!(rule.delay_ms, 250);
    }

    #[test]
    fn test_rule_validation() {
        assert!(ErrorSimulationRule::always(ErrorKind::Business).validate().is_ok());
        let rule = ErrorSimulationRule::always(ErrorKind::Business).with_probability(1.5);
        assert!(rule.validate().is_err());
        let rule = ErrorSimulationRule::always(ErrorKind::Business).with_probability(-0.1);
        assert!(rule.validate().is_err());
    }

    #[test]
    fn test_http_method_parsing() {
        assert_eq!("get".parse::<HttpMethod>(), Ok(HttpMethod::Get));
        assert_eq!("DELETE".parse::<HttpMethod>(), Ok(HttpMethod::Delete));
        assert!("TRACE".parse::<HttpMethod>().is_err());
        assert!(HttpMethod::Post.carries_body());
        assert!(!HttpMethod::Get.carries_body());
    }
}
