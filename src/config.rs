//! Configuration for the mock server.
//!
//! Declares systems, modules and endpoints, plus global settings for the
//! data resolver and the error injector.

use crate::builtin::DataHandler;
use crate::injector::InjectorSettings;
use crate::matcher::PathTemplate;
use crate::model::{Endpoint, ErrorSimulationRule, HttpMethod, Module, System};
use crate::registry::ConfigSource;
use crate::resolver::ResolverConfig;
use crate::template::TemplateEngine;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

/// Main configuration file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct MockServerConfig {
    #[serde(default)]
    pub settings: GlobalSettings,

    /// Mocked backend systems
    #[serde(default)]
    pub systems: Vec<SystemConfig>,
}

impl MockServerConfig {
    /// Load configuration from a YAML file.
    ///
    /// Only the YAML structure is checked here; per-item problems are
    /// reported when the registry loads and never abort startup.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Strict validation, reporting every problem found.
    pub fn validate(&self) -> anyhow::Result<()> {
        let problems = self.problems();
        if problems.is_empty() {
            Ok(())
        } else {
            anyhow::bail!("{} problem(s): {}", problems.len(), problems.join("; "))
        }
    }

    fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if axum::http::HeaderName::try_from(self.settings.override_header.as_str()).is_err() {
            problems.push(format!(
                "invalid override header '{}'",
                self.settings.override_header
            ));
        }

        let mut system_ids = HashSet::new();
        for system in &self.systems {
            if system.id.trim().is_empty() {
                problems.push("system id cannot be empty".to_string());
            } else if !system_ids.insert(system.id.as_str()) {
                problems.push(format!("duplicate system id '{}'", system.id));
            }

            let mut module_ids = HashSet::new();
            for module in &system.modules {
                if !module_ids.insert(module.id.as_str()) {
                    problems.push(format!(
                        "duplicate module id '{}' in system '{}'",
                        module.id, system.id
                    ));
                }
                for endpoint in &module.endpoints {
                    if let Err(e) = endpoint.validate() {
                        problems.push(format!("{}/{} {}: {}", system.id, module.id, endpoint.path, e));
                    }
                }
            }
        }
        problems
    }

    /// Number of endpoints declared across all systems.
    pub fn endpoint_count(&self) -> usize {
        self.systems
            .iter()
            .flat_map(|s| &s.modules)
            .map(|m| m.endpoints.len())
            .sum()
    }
}

/// A mocked system.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SystemConfig {
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(rename = "type", default)]
    pub system_type: String,

    /// Connection parameters of the real system (informational)
    #[serde(default)]
    pub connection: HashMap<String, serde_json::Value>,

    #[serde(default)]
    pub modules: Vec<ModuleConfig>,
}

impl SystemConfig {
    fn to_system(&self) -> System {
        System {
            id: self.id.clone(),
            name: if self.name.is_empty() {
                self.id.clone()
            } else {
                self.name.clone()
            },
            system_type: self.system_type.clone(),
            connection: self.connection.clone(),
        }
    }
}

/// A module of a system.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModuleConfig {
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,
}

/// A declared endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EndpointConfig {
    /// Path template relative to the module, e.g. `/materials/{id}`
    pub path: String,

    #[serde(default = "default_method")]
    pub method: String,

    pub handler: HandlerSpec,

    #[serde(default)]
    pub error_rules: Vec<ErrorSimulationRule>,
}

fn default_method() -> String {
    "GET".to_string()
}

impl EndpointConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        PathTemplate::parse(&self.path).map_err(|e| anyhow::anyhow!(e))?;
        self.method
            .parse::<HttpMethod>()
            .map_err(|e| anyhow::anyhow!(e))?;
        self.handler.validate()?;
        for rule in &self.error_rules {
            rule.validate().map_err(|e| anyhow::anyhow!(e))?;
        }
        Ok(())
    }
}

/// Built-in, data-backed endpoint behaviour.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HandlerSpec {
    /// Resolve one entity; `key` is a template, e.g. `"{{path.id}}"`
    Resolve { key: String },
    /// Return the module's collection, filtered by query parameters
    Collection,
    /// Store the JSON request body under `key` and echo it
    Save { key: String },
    /// Fixed body; string fields may be templates
    Static { body: serde_json::Value },
}

impl HandlerSpec {
    pub fn validate(&self) -> anyhow::Result<()> {
        match self {
            HandlerSpec::Resolve { key } | HandlerSpec::Save { key } => {
                if key.trim().is_empty() {
                    anyhow::bail!("handler key cannot be empty");
                }
                TemplateEngine::check(key).map_err(|e| anyhow::anyhow!("invalid key template: {}", e))
            }
            HandlerSpec::Collection => Ok(()),
            HandlerSpec::Static { body } => TemplateEngine::check_json(body)
                .map_err(|e| anyhow::anyhow!("invalid body template: {}", e)),
        }
    }
}

/// Global settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GlobalSettings {
    /// Root of the layered mock data, rule files and audit logs
    #[serde(default = "default_data_root")]
    pub data_root: PathBuf,

    #[serde(default = "default_true")]
    pub extensions_enabled: bool,

    /// Optional profile layer between extensions and common
    #[serde(default)]
    pub profile: Option<String>,

    #[serde(default = "default_override_header")]
    pub override_header: String,

    /// Delay used when a bare `Timeout` is forced through the header
    #[serde(default = "default_timeout_delay_ms")]
    pub default_timeout_delay_ms: u64,

    #[serde(default = "default_true")]
    pub audit_enabled: bool,

    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    /// Log every matched request
    #[serde(default = "default_true")]
    pub log_requests: bool,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            data_root: default_data_root(),
            extensions_enabled: true,
            profile: None,
            override_header: default_override_header(),
            default_timeout_delay_ms: default_timeout_delay_ms(),
            audit_enabled: true,
            max_body_bytes: default_max_body_bytes(),
            log_requests: true,
        }
    }
}

impl GlobalSettings {
    pub fn resolver_config(&self) -> ResolverConfig {
        ResolverConfig {
            data_root: self.data_root.clone(),
            extensions_enabled: self.extensions_enabled,
            profile: self.profile.clone(),
        }
    }

    pub fn injector_settings(&self) -> InjectorSettings {
        InjectorSettings {
            data_root: self.data_root.clone(),
            override_header: self.override_header.clone(),
            default_timeout_delay_ms: self.default_timeout_delay_ms,
            audit_enabled: self.audit_enabled,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_data_root() -> PathBuf {
    PathBuf::from("./mock-data")
}

fn default_override_header() -> String {
    "X-Mock-Error".to_string()
}

fn default_timeout_delay_ms() -> u64 {
    3000
}

fn default_max_body_bytes() -> usize {
    1024 * 1024
}

/// [`ConfigSource`] backed by a parsed configuration file.
///
/// Endpoints that cannot be built (unknown method, broken templates) are
/// logged and left out of their module.
pub struct YamlConfigSource {
    config: MockServerConfig,
    templates: Arc<TemplateEngine>,
}

impl YamlConfigSource {
    pub fn new(config: MockServerConfig) -> Self {
        Self {
            config,
            templates: Arc::new(TemplateEngine::new()),
        }
    }

    fn build_endpoint(&self, endpoint: &EndpointConfig) -> anyhow::Result<Endpoint> {
        let method: HttpMethod = endpoint.method.parse().map_err(|e| anyhow::anyhow!("{}", e))?;
        let handler = DataHandler::new(endpoint.handler.clone(), self.templates.clone())?;

        let mut built = Endpoint::new(method, endpoint.path.clone(), Arc::new(handler));
        for rule in &endpoint.error_rules {
            match rule.validate() {
                Ok(()) => built.error_rules.push(rule.clone()),
                Err(reason) => warn!(
                    path = %endpoint.path,
                    reason = %reason,
                    "Skipping invalid error rule"
                ),
            }
        }
        Ok(built)
    }
}

impl ConfigSource for YamlConfigSource {
    fn load_systems(&self) -> anyhow::Result<Vec<System>> {
        Ok(self.config.systems.iter().map(SystemConfig::to_system).collect())
    }

    fn load_modules(&self, system_id: &str) -> anyhow::Result<Vec<Module>> {
        let system = self
            .config
            .systems
            .iter()
            .find(|s| s.id == system_id)
            .ok_or_else(|| anyhow::anyhow!("system '{}' is not configured", system_id))?;

        let modules = system
            .modules
            .iter()
            .map(|module| {
                let endpoints = module
                    .endpoints
                    .iter()
                    .filter_map(|endpoint| match self.build_endpoint(endpoint) {
                        Ok(built) => Some(built),
                        Err(e) => {
                            warn!(
                                system = %system_id,
                                module = %module.id,
                                path = %endpoint.path,
                                method = %endpoint.method,
                                error = %e,
                                "Skipping misconfigured endpoint"
                            );
                            None
                        }
                    })
                    .collect();

                Module {
                    id: module.id.clone(),
                    name: if module.name.is_empty() {
                        module.id.clone()
                    } else {
                        module.name.clone()
                    },
                    system_id: system_id.to_string(),
                    endpoints,
                }
            })
            .collect();

        Ok(modules)
    }
}
