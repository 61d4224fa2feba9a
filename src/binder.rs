//! Binds registered endpoints to routes.
//!
//! Every endpoint of every registered module becomes a route at
//! `/api/{system}/{module}{path}`. An endpoint that cannot be bound is
//! skipped and reported without affecting the others.

use crate::matcher::PathTemplate;
use crate::model::{Endpoint, HttpMethod};
use crate::registry::SystemRegistry;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Prefix of every bound route.
pub const API_PREFIX: &str = "/api";

/// An endpoint bound to its full route.
#[derive(Debug, Clone)]
pub struct BoundRoute {
    pub system_id: String,
    pub module_id: String,
    pub template: PathTemplate,
    pub endpoint: Endpoint,
}

impl BoundRoute {
    pub fn method(&self) -> HttpMethod {
        self.endpoint.method
    }

    /// Full route, e.g. `/api/ERP01/MM/materials/{id}`.
    pub fn route_path(&self) -> String {
        route_path(&self.system_id, &self.module_id, self.template.as_str())
    }
}

fn route_path(system_id: &str, module_id: &str, path: &str) -> String {
    let path = if path == "/" { "" } else { path };
    format!("{}/{}/{}{}", API_PREFIX, system_id, module_id, path)
}

/// A successful route lookup.
#[derive(Debug)]
pub struct RouteMatch<'a> {
    pub route: &'a BoundRoute,
    pub params: HashMap<String, String>,
}

/// Routes grouped by `(system, module)`, most specific first.
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: HashMap<(String, String), Vec<BoundRoute>>,
}

impl RouteTable {
    /// Find the route for a module-relative path.
    pub fn find(
        &self,
        method: HttpMethod,
        system_id: &str,
        module_id: &str,
        path: &str,
    ) -> Option<RouteMatch<'_>> {
        let candidates = self
            .routes
            .get(&(system_id.to_string(), module_id.to_string()))?;
        candidates
            .iter()
            .filter(|route| route.method() == method)
            .find_map(|route| {
                route
                    .template
                    .matches(path)
                    .map(|params| RouteMatch { route, params })
            })
    }

    /// Methods bound for a path, used to tell 404 from 405.
    pub fn allowed_methods(&self, system_id: &str, module_id: &str, path: &str) -> Vec<HttpMethod> {
        self.routes
            .get(&(system_id.to_string(), module_id.to_string()))
            .map(|routes| {
                let mut methods: Vec<HttpMethod> = Vec::new();
                for route in routes {
                    if route.template.matches(path).is_some() && !methods.contains(&route.method()) {
                        methods.push(route.method());
                    }
                }
                methods
            })
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.routes.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn routes(&self) -> impl Iterator<Item = &BoundRoute> {
        self.routes.values().flatten()
    }

    fn insert(&mut self, route: BoundRoute) -> Result<(), String> {
        let group = self
            .routes
            .entry((route.system_id.clone(), route.module_id.clone()))
            .or_default();

        let shape = route.template.shape();
        if let Some(existing) = group
            .iter()
            .find(|r| r.method() == route.method() && r.template.shape() == shape)
        {
            return Err(format!(
                "conflicts with {} {}",
                existing.method(),
                existing.route_path()
            ));
        }
        group.push(route);
        Ok(())
    }

    fn sort(&mut self) {
        for group in self.routes.values_mut() {
            // Stable: equally specific routes keep registration order
            group.sort_by(|a, b| b.template.specificity().cmp(&a.template.specificity()));
        }
    }
}

/// An endpoint that could not be bound.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BindFailure {
    pub system_id: String,
    pub module_id: String,
    pub method: String,
    pub path: String,
    pub reason: String,
}

/// Outcome of a bind pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BindReport {
    pub bound: usize,
    pub skipped: Vec<BindFailure>,
}

/// Turns the registry's endpoints into a [`RouteTable`].
pub struct EndpointBinder;

impl EndpointBinder {
    pub fn bind(registry: &SystemRegistry) -> (RouteTable, BindReport) {
        let mut table = RouteTable::default();
        let mut report = BindReport::default();

        for system in registry.list_all() {
            for module in registry.modules_for(&system.id) {
                for endpoint in &module.endpoints {
                    match Self::bind_one(&mut table, &system.id, &module.id, endpoint) {
                        Ok(()) => {
                            report.bound += 1;
                            debug!(
                                method = %endpoint.method,
                                route = %route_path(&system.id, &module.id, &endpoint.path),
                                "Bound endpoint"
                            );
                        }
                        Err(reason) => {
                            warn!(
                                system = %system.id,
                                module = %module.id,
                                method = %endpoint.method,
                                path = %endpoint.path,
                                reason = %reason,
                                "Skipping endpoint"
                            );
                            report.skipped.push(BindFailure {
                                system_id: system.id.clone(),
                                module_id: module.id.clone(),
                                method: endpoint.method.to_string(),
                                path: endpoint.path.clone(),
                                reason,
                            });
                        }
                    }
                }
            }
        }

        table.sort();
        info!(
            bound = report.bound,
            skipped = report.skipped.len(),
            "Endpoints bound"
        );
        (table, report)
    }

    fn bind_one(
        table: &mut RouteTable,
        system_id: &str,
        module_id: &str,
        endpoint: &Endpoint,
    ) -> Result<(), String> {
        for (what, id) in [("system", system_id), ("module", module_id)] {
            if id.contains('/') || id.contains('%') {
                return Err(format!("{} id '{}' is not a single path segment", what, id));
            }
        }
        let template = PathTemplate::parse(&endpoint.path).map_err(|e| e.to_string())?;
        table.insert(BoundRoute {
            system_id: system_id.to_string(),
            module_id: module_id.to_string(),
            template,
            endpoint: endpoint.clone(),
        })
    }
}

/// Split `/api/{system}/{module}{rest}` into its parts.
pub fn split_api_path(path: &str) -> Option<(&str, &str, &str)> {
    let rest = path.strip_prefix(API_PREFIX)?.strip_prefix('/')?;
    let (system_id, rest) = rest.split_once('/').unwrap_or((rest, ""));
    let (module_id, rest) = match rest.find('/') {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, "/"),
    };
    if system_id.is_empty() || module_id.is_empty() {
        return None;
    }
    Some((system_id, module_id, rest))
}
