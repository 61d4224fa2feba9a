//! Fault injection.
//!
//! Decides per request whether to short-circuit with a simulated backend
//! failure, either forced through the override header or drawn from the
//! endpoint's probabilistic rules, and records every injected fault.

use crate::error::{MockError, Result};
use crate::model::{ErrorKind, ErrorSimulationRule};
use axum::http::{HeaderMap, HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use regex::Regex;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::Duration;
use tracing::{debug, warn};

/// Injector settings.
#[derive(Debug, Clone)]
pub struct InjectorSettings {
    pub data_root: PathBuf,
    /// Header forcing a fault, e.g. `X-Mock-Error: Timeout`
    pub override_header: String,
    /// Delay applied to a bare `Timeout` override
    pub default_timeout_delay_ms: u64,
    pub audit_enabled: bool,
}

impl InjectorSettings {
    pub fn new(data_root: impl Into<PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
            override_header: "X-Mock-Error".to_string(),
            default_timeout_delay_ms: 3000,
            audit_enabled: true,
        }
    }
}

/// The endpoint a fault decision is made for.
#[derive(Debug, Clone, Copy)]
pub struct InjectionTarget<'a> {
    pub system_id: &'a str,
    pub module_id: &'a str,
    /// Endpoint path template, e.g. `/materials/{id}`
    pub endpoint_path: &'a str,
}

/// How a fault was triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InjectionSource {
    Header,
    Rule,
}

/// A positive injection decision.
#[derive(Debug, Clone, PartialEq)]
pub struct Injection {
    pub rule: ErrorSimulationRule,
    pub source: InjectionSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Warning,
    Error,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Category {
    Network,
    Security,
    Business,
    System,
    /// Pipeline errors caused by the caller
    Request,
}

/// JSON error body returned for simulated faults and pipeline errors.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    pub severity: Severity,
    pub category: Category,
    pub details: serde_json::Map<String, serde_json::Value>,
    pub timestamp: String,
}

impl ErrorBody {
    pub fn new(
        code: impl Into<String>,
        message: impl Into<String>,
        severity: Severity,
        category: Category,
    ) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            severity,
            category,
            details: serde_json::Map::new(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// A fully built simulated fault.
#[derive(Debug, Clone)]
pub struct FaultResponse {
    pub status: StatusCode,
    pub body: ErrorBody,
    /// Suspension to apply before responding
    pub delay: Duration,
}

impl IntoResponse for FaultResponse {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

/// One audit log line per injected fault.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AuditRecord<'a> {
    timestamp: &'a str,
    system_id: &'a str,
    module_id: &'a str,
    endpoint: &'a str,
    method: &'a str,
    request_path: &'a str,
    error_kind: ErrorKind,
    error_code: &'a str,
    status: u16,
    delay_ms: u64,
    source: InjectionSource,
    message: &'a str,
}

fn kind_defaults(kind: ErrorKind) -> (&'static str, &'static str, Severity, Category) {
    match kind {
        ErrorKind::Timeout => (
            "REQUEST_TIMEOUT",
            "Request timed out while waiting for the backend system",
            Severity::Warning,
            Category::Network,
        ),
        ErrorKind::Authorization => (
            "AUTHORIZATION_FAILED",
            "Not authorized to access this resource",
            Severity::Error,
            Category::Security,
        ),
        ErrorKind::Business => (
            "BUSINESS_RULE_VIOLATION",
            "Business rule validation failed",
            Severity::Warning,
            Category::Business,
        ),
        ErrorKind::System => (
            "INTERNAL_SYSTEM_ERROR",
            "Internal system error in the backend system",
            Severity::Critical,
            Category::System,
        ),
    }
}

/// Map an endpoint path template to its rule file stem.
pub fn sanitize_path(path: &str) -> String {
    static UNSAFE: OnceLock<Regex> = OnceLock::new();
    let unsafe_chars = UNSAFE.get_or_init(|| Regex::new(r"[^A-Za-z0-9_-]+").expect("valid regex"));

    let sanitized = unsafe_chars.replace_all(path, "_");
    let trimmed = sanitized.trim_matches('_');
    if trimmed.is_empty() {
        "root".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Fault injection engine.
pub struct ErrorInjector {
    settings: InjectorSettings,
    header: HeaderName,
    rng: Mutex<StdRng>,
    injected: AtomicU64,
}

impl ErrorInjector {
    pub fn new(settings: InjectorSettings) -> Result<Self> {
        Self::with_rng(settings, StdRng::from_entropy())
    }

    /// Deterministic sampling, for reproducible runs.
    pub fn with_seed(settings: InjectorSettings, seed: u64) -> Result<Self> {
        Self::with_rng(settings, StdRng::seed_from_u64(seed))
    }

    fn with_rng(settings: InjectorSettings, rng: StdRng) -> Result<Self> {
        let header = HeaderName::try_from(settings.override_header.as_str()).map_err(|e| {
            MockError::configuration(format!(
                "invalid override header '{}': {}",
                settings.override_header, e
            ))
        })?;
        Ok(Self {
            settings,
            header,
            rng: Mutex::new(rng),
            injected: AtomicU64::new(0),
        })
    }

    pub fn settings(&self) -> &InjectorSettings {
        &self.settings
    }

    /// Total faults recorded.
    pub fn injected_count(&self) -> u64 {
        self.injected.load(Ordering::Relaxed)
    }

    /// Decide whether a request should fail.
    ///
    /// The override header wins over everything; otherwise `declared` rules
    /// and the endpoint's rule file are sampled in order, first hit wins.
    pub fn should_inject(
        &self,
        target: InjectionTarget<'_>,
        declared: &[ErrorSimulationRule],
        headers: &HeaderMap,
    ) -> Option<Injection> {
        if let Some(value) = headers.get(&self.header) {
            match value.to_str().ok().and_then(|v| self.parse_override(v)) {
                Some(rule) => {
                    return Some(Injection {
                        rule,
                        source: InjectionSource::Header,
                    })
                }
                None => warn!(
                    header = %self.header,
                    value = ?value,
                    "Ignoring unparseable error override header"
                ),
            }
        }

        let from_file = self.load_rules(target);
        declared
            .iter()
            .chain(from_file.iter())
            .find(|rule| self.sample() < rule.probability)
            .map(|rule| Injection {
                rule: rule.clone(),
                source: InjectionSource::Rule,
            })
    }

    /// Parse an override header value: a bare error kind or a JSON rule.
    ///
    /// A forced timeout without its own `delayMs` waits the default delay.
    pub fn parse_override(&self, value: &str) -> Option<ErrorSimulationRule> {
        let value = value.trim();
        let mut rule = if value.starts_with('{') {
            let mut rule: ErrorSimulationRule = serde_json::from_str(value).ok()?;
            rule.probability = 1.0;
            rule
        } else {
            ErrorSimulationRule::always(value.parse().ok()?)
        };

        if rule.error_kind == ErrorKind::Timeout && rule.delay_ms == 0 {
            rule.delay_ms = self.settings.default_timeout_delay_ms;
        }
        Some(rule)
    }

    /// Rule file for an endpoint.
    pub fn rules_file(&self, target: InjectionTarget<'_>) -> PathBuf {
        self.settings
            .data_root
            .join("errors")
            .join(target.system_id)
            .join(target.module_id)
            .join(format!("{}.json", sanitize_path(target.endpoint_path)))
    }

    /// Load the endpoint's rule file. Missing or malformed files yield no rules.
    pub fn load_rules(&self, target: InjectionTarget<'_>) -> Vec<ErrorSimulationRule> {
        let path = self.rules_file(target);
        if !path.is_file() {
            return Vec::new();
        }

        let rules: Vec<ErrorSimulationRule> = match std::fs::read(&path)
            .map_err(MockError::from)
            .and_then(|bytes| serde_json::from_slice(&bytes).map_err(MockError::from))
        {
            Ok(rules) => rules,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring malformed error rule file");
                return Vec::new();
            }
        };

        rules
            .into_iter()
            .filter(|rule| match rule.validate() {
                Ok(()) => true,
                Err(reason) => {
                    warn!(path = %path.display(), reason = %reason, "Skipping invalid error rule");
                    false
                }
            })
            .collect()
    }

    fn sample(&self) -> f64 {
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        rng.gen::<f64>()
    }

    /// Build the fault response for a rule.
    pub fn build_response(
        &self,
        rule: &ErrorSimulationRule,
        target: InjectionTarget<'_>,
    ) -> FaultResponse {
        let (code, message, severity, category) = kind_defaults(rule.error_kind);

        let mut body = ErrorBody::new(
            rule.error_code.as_deref().unwrap_or(code),
            rule.custom_message.as_deref().unwrap_or(message),
            severity,
            category,
        );
        body.details.insert("system".into(), target.system_id.into());
        body.details.insert("module".into(), target.module_id.into());
        body.details.insert("endpoint".into(), target.endpoint_path.into());
        body.details.insert("simulated".into(), true.into());
        for (k, v) in &rule.details {
            body.details.insert(k.clone(), v.clone());
        }

        let delay = match rule.error_kind {
            ErrorKind::Timeout => Duration::from_millis(rule.delay_ms),
            _ => Duration::ZERO,
        };

        FaultResponse {
            status: StatusCode::from_u16(rule.error_kind.status())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            body,
            delay,
        }
    }

    /// Log an injected fault and append it to the daily audit file.
    ///
    /// Never fails: persistence problems are logged and dropped.
    pub fn record(
        &self,
        injection: &Injection,
        target: InjectionTarget<'_>,
        method: &str,
        request_path: &str,
        response: &FaultResponse,
    ) {
        self.injected.fetch_add(1, Ordering::Relaxed);

        warn!(
            system = %target.system_id,
            module = %target.module_id,
            endpoint = %target.endpoint_path,
            method = %method,
            path = %request_path,
            kind = %injection.rule.error_kind,
            code = %response.body.code,
            status = response.status.as_u16(),
            delay_ms = response.delay.as_millis() as u64,
            source = ?injection.source,
            "Injected simulated fault"
        );

        if !self.settings.audit_enabled {
            return;
        }

        let record = AuditRecord {
            timestamp: &response.body.timestamp,
            system_id: target.system_id,
            module_id: target.module_id,
            endpoint: target.endpoint_path,
            method,
            request_path,
            error_kind: injection.rule.error_kind,
            error_code: &response.body.code,
            status: response.status.as_u16(),
            delay_ms: response.delay.as_millis() as u64,
            source: injection.source,
            message: &response.body.message,
        };

        let path = self.audit_file(&chrono::Utc::now().format("%Y-%m-%d").to_string());
        if let Err(e) = append_line(&path, &record) {
            warn!(path = %path.display(), error = %e, "Failed to write fault audit record");
        } else {
            debug!(path = %path.display(), "Fault audit record written");
        }
    }

    /// Audit file for a `yyyy-MM-dd` date.
    pub fn audit_file(&self, date: &str) -> PathBuf {
        self.settings
            .data_root
            .join("errors")
            .join("logs")
            .join(format!("error-simulation-{}.json", date))
    }
}

fn append_line<T: Serialize>(path: &Path, record: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut line = serde_json::to_vec(record)?;
    line.push(b'\n');
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    file.write_all(&line)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const TARGET: InjectionTarget<'static> = InjectionTarget {
        system_id: "ERP01",
        module_id: "MM",
        endpoint_path: "/materials/{id}",
    };

    fn injector(dir: &TempDir) -> ErrorInjector {
        let mut settings = InjectorSettings::new(dir.path());
        settings.default_timeout_delay_ms = 1500;
        ErrorInjector::with_seed(settings, 7).unwrap()
    }

    fn header(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-mock-error", value.parse().unwrap());
        headers
    }

    #[test]
    fn test_sanitize_path() {
        assert_eq!(sanitize_path("/materials/{id}"), "materials_id");
        assert_eq!(sanitize_path("/plants/{plant}/stock"), "plants_plant_stock");
        assert_eq!(sanitize_path("/"), "root");
        assert_eq!(sanitize_path("/sales-orders"), "sales-orders");
    }

    #[test]
    fn test_header_bare_kind_forces_rule() {
        let dir = TempDir::new().unwrap();
        let injector = injector(&dir);
        let never = vec![ErrorSimulationRule::always(ErrorKind::Business).with_probability(0.0)];

        let injection = injector
            .should_inject(TARGET, &never, &header("Timeout"))
            .unwrap();
        assert_eq!(injection.source, InjectionSource::Header);
        assert_eq!(injection.rule.error_kind, ErrorKind::Timeout);
        assert_eq!(injection.rule.probability, 1.0);
        assert_eq!(injection.rule.delay_ms, 1500);
    }

    #[test]
    fn test_header_json_rule_forces_probability() {
        let dir = TempDir::new().unwrap();
        let injector = injector(&dir);

        let injection = injector
            .should_inject(
                TARGET,
                &[],
                &header(r#"{"errorKind":"Business","probability":0.0,"errorCode":"M7-001"}"#),
            )
            .unwrap();
        assert_eq!(injection.rule.error_kind, ErrorKind::Business);
        assert_eq!(injection.rule.probability, 1.0);
        assert_eq!(injection.rule.error_code.as_deref(), Some("M7-001"));
    }

    #[test]
    fn test_header_json_timeout_uses_default_delay() {
        let dir = TempDir::new().unwrap();
        let injector = injector(&dir);

        let rule = injector.parse_override(r#"{"errorKind":"Timeout"}"#).unwrap();
        assert_eq!(rule.delay_ms, 1500);

        let rule = injector
            .parse_override(r#"{"errorKind":"Timeout","delayMs":40}"#)
            .unwrap();
        assert_eq!(rule.delay_ms, 40);

        let rule = injector.parse_override(r#"{"errorKind":"System"}"#).unwrap();
        assert_eq!(rule.delay_ms, 0);
    }

    #[test]
    fn test_unparseable_header_is_ignored() {
        let dir = TempDir::new().unwrap();
        let injector = injector(&dir);
        assert!(injector.should_inject(TARGET, &[], &header("Teapot")).is_none());
        assert!(injector.should_inject(TARGET, &[], &header("{broken")).is_none());
    }

    #[test]
    fn test_probability_zero_never_triggers() {
        let dir = TempDir::new().unwrap();
        let injector = injector(&dir);
        let rules = vec![ErrorSimulationRule::always(ErrorKind::System).with_probability(0.0)];

        for _ in 0..1000 {
            assert!(injector.should_inject(TARGET, &rules, &HeaderMap::new()).is_none());
        }
    }

    #[test]
    fn test_probability_one_always_triggers() {
        let dir = TempDir::new().unwrap();
        let injector = injector(&dir);
        let rules = vec![ErrorSimulationRule::always(ErrorKind::System)];

        for _ in 0..1000 {
            let injection = injector.should_inject(TARGET, &rules, &HeaderMap::new()).unwrap();
            assert_eq!(injection.source, InjectionSource::Rule);
        }
    }

    #[test]
    fn test_first_matching_rule_wins() {
        let dir = TempDir::new().unwrap();
        let injector = injector(&dir);
        let rules = vec![
            ErrorSimulationRule::always(ErrorKind::Business).with_probability(0.0),
            ErrorSimulationRule::always(ErrorKind::Authorization),
            ErrorSimulationRule::always(ErrorKind::System),
        ];

        let injection = injector.should_inject(TARGET, &rules, &HeaderMap::new()).unwrap();
        assert_eq!(injection.rule.error_kind, ErrorKind::Authorization);
    }

    #[test]
    fn test_partial_probability_is_roughly_honoured() {
        let dir = TempDir::new().unwrap();
        let injector = injector(&dir);
        let rules = vec![ErrorSimulationRule::always(ErrorKind::System).with_probability(0.3)];

        let hits = (0..10_000)
            .filter(|_| injector.should_inject(TARGET, &rules, &HeaderMap::new()).is_some())
            .count();
        assert!((2_500..3_500).contains(&hits), "hits = {}", hits);
    }

    #[test]
    fn test_rules_loaded_from_file() {
        let dir = TempDir::new().unwrap();
        let injector = injector(&dir);
        let path = injector.rules_file(TARGET);
        assert_eq!(path, dir.path().join("errors/ERP01/MM/materials_id.json"));

        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(
            &path,
            r#"[
                {"errorKind":"Business","probability":2.0},
                {"errorKind":"System","probability":1.0,"customMessage":"DB down"}
            ]"#,
        )
        .unwrap();

        let rules = injector.load_rules(TARGET);
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].error_kind, ErrorKind::System);

        let injection = injector.should_inject(TARGET, &[], &HeaderMap::new()).unwrap();
        assert_eq!(injection.rule.custom_message.as_deref(), Some("DB down"));
    }

    #[test]
    fn test_malformed_rule_file_yields_no_rules() {
        let dir = TempDir::new().unwrap();
        let injector = injector(&dir);
        let path = injector.rules_file(TARGET);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "not json").unwrap();

        assert!(injector.load_rules(TARGET).is_empty());
    }

    #[test]
    fn test_build_response_defaults() {
        let dir = TempDir::new().unwrap();
        let injector = injector(&dir);

        let response =
            injector.build_response(&ErrorSimulationRule::always(ErrorKind::Authorization), TARGET);
        assert_eq!(response.status, StatusCode::UNAUTHORIZED);
        assert_eq!(response.body.code, "AUTHORIZATION_FAILED");
        assert_eq!(response.body.severity, Severity::Error);
        assert_eq!(response.body.category, Category::Security);
        assert_eq!(response.body.details["system"], "ERP01");
        assert_eq!(response.delay, Duration::ZERO);
    }

    #[test]
    fn test_build_response_custom_values() {
        let dir = TempDir::new().unwrap();
        let injector = injector(&dir);

        let mut rule = ErrorSimulationRule::always(ErrorKind::Timeout).with_delay(250);
        rule.error_code = Some("RFC_TIMEOUT".to_string());
        rule.custom_message = Some("RFC call timed out".to_string());
        rule.details.insert("system".into(), "OVERRIDDEN".into());
        rule.details.insert("destination".into(), "ERP_PRD".into());

        let response = injector.build_response(&rule, TARGET);
        assert_eq!(response.status, StatusCode::REQUEST_TIMEOUT);
        assert_eq!(response.body.code, "RFC_TIMEOUT");
        assert_eq!(response.body.message, "RFC call timed out");
        assert_eq!(response.body.details["system"], "OVERRIDDEN");
        assert_eq!(response.body.details["destination"], "ERP_PRD");
        assert_eq!(response.delay, Duration::from_millis(250));
    }

    #[test]
    fn test_delay_only_applies_to_timeouts() {
        let dir = TempDir::new().unwrap();
        let injector = injector(&dir);
        let rule = ErrorSimulationRule::always(ErrorKind::System).with_delay(500);
        assert_eq!(injector.build_response(&rule, TARGET).delay, Duration::ZERO);
    }

    #[test]
    fn test_record_appends_audit_lines() {
        let dir = TempDir::new().unwrap();
        let injector = injector(&dir);
        let injection = Injection {
            rule: ErrorSimulationRule::always(ErrorKind::Business),
            source: InjectionSource::Rule,
        };
        let response = injector.build_response(&injection.rule, TARGET);

        injector.record(&injection, TARGET, "GET", "/api/ERP01/MM/materials/MAT001", &response);
        injector.record(&injection, TARGET, "GET", "/api/ERP01/MM/materials/MAT002", &response);

        let today = chrono::Utc::now().format("%Y-%m-%d").to_string();
        let content = std::fs::read_to_string(injector.audit_file(&today)).unwrap();
        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["errorKind"], "Business");
        assert_eq!(lines[1]["requestPath"], "/api/ERP01/MM/materials/MAT002");
        assert_eq!(injector.injected_count(), 2);
    }

    #[test]
    fn test_audit_failure_does_not_panic() {
        let dir = TempDir::new().unwrap();
        // A file where the errors directory should be
        std::fs::write(dir.path().join("errors"), "blocker").unwrap();
        let injector = injector(&dir);
        let injection = Injection {
            rule: ErrorSimulationRule::always(ErrorKind::System),
            source: InjectionSource::Header,
        };
        let response = injector.build_response(&injection.rule, TARGET);

        injector.record(&injection, TARGET, "GET", "/x", &response);
        assert_eq!(injector.injected_count(), 1);
    }

    #[test]
    fn test_invalid_override_header_name() {
        let mut settings = InjectorSettings::new("/tmp");
        settings.override_header = "bad header".to_string();
        assert!(ErrorInjector::new(settings).is_err());
    }
}
