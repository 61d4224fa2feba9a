//! Built-in handlers backed by the data resolver.

use crate::config::HandlerSpec;
use crate::error::MockError;
use crate::handler::{Handler, HandlerContext, HandlerError};
use crate::request::NormalizedRequest;
use crate::template::TemplateEngine;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Handler executing a configured [`HandlerSpec`].
pub struct DataHandler {
    spec: HandlerSpec,
    templates: Arc<TemplateEngine>,
}

impl DataHandler {
    /// Templates are compiled once here so broken ones never reach a request.
    pub fn new(spec: HandlerSpec, templates: Arc<TemplateEngine>) -> Result<Self, MockError> {
        spec.validate()
            .map_err(|e| MockError::configuration(e.to_string()))?;
        Ok(Self { spec, templates })
    }

    pub fn spec(&self) -> &HandlerSpec {
        &self.spec
    }

    fn render_key(&self, template: &str, request: &NormalizedRequest) -> Result<String, HandlerError> {
        let key = self
            .templates
            .render(template, request)
            .map_err(|e| anyhow::anyhow!("failed to render key template: {}", e))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(HandlerError::bad_request(format!(
                "key template '{}' rendered empty",
                template
            )));
        }
        Ok(key.to_string())
    }
}

#[async_trait]
impl Handler for DataHandler {
    async fn handle(
        &self,
        request: NormalizedRequest,
        ctx: HandlerContext,
    ) -> Result<Value, HandlerError> {
        match &self.spec {
            HandlerSpec::Resolve { key } => {
                let entity = self.render_key(key, &request)?;
                let value = ctx
                    .resolver
                    .resolve_in::<Value>(&ctx.system_id, &ctx.module_id, &entity)?;
                Ok(value)
            }
            HandlerSpec::Collection => {
                let mut items = ctx
                    .resolver
                    .resolve_collection::<Value>(&ctx.system_id, &ctx.module_id)?;
                if !request.query.is_empty() {
                    items.retain(|item| matches_query(item, &request.query));
                }
                debug!(
                    system = %ctx.system_id,
                    module = %ctx.module_id,
                    count = items.len(),
                    "Collection served"
                );
                Ok(Value::Array(items))
            }
            HandlerSpec::Save { key } => {
                let body = request
                    .body
                    .clone()
                    .ok_or_else(|| HandlerError::bad_request("a JSON request body is required"))?;
                let entity = self.render_key(key, &request)?;
                ctx.resolver
                    .save(&body, &ctx.system_id, &ctx.module_id, &entity)?;
                Ok(body)
            }
            HandlerSpec::Static { body } => self
                .templates
                .render_json(body, &request)
                .map_err(|e| HandlerError::Internal(anyhow::anyhow!("failed to render body: {}", e))),
        }
    }
}

/// Every query parameter must equal the item's top-level field of that name.
fn matches_query(item: &Value, query: &HashMap<String, String>) -> bool {
    query.iter().all(|(name, expected)| match item.get(name) {
        Some(Value::String(s)) => s == expected,
        Some(Value::Null) | None => false,
        Some(other) => other.to_string() == *expected,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::HttpMethod;
    use crate::resolver::{DataResolver, ResolverConfig};
    use serde_json::json;
    use std::path::Path;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, value: &Value) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, serde_json::to_vec(value).unwrap()).unwrap();
    }

    fn ctx(root: &Path) -> HandlerContext {
        HandlerContext {
            system_id: "ERP01".to_string(),
            module_id: "MM".to_string(),
            resolver: Arc::new(DataResolver::new(ResolverConfig::new(root))),
        }
    }

    fn handler(spec: HandlerSpec) -> DataHandler {
        DataHandler::new(spec, Arc::new(TemplateEngine::new())).unwrap()
    }

    fn get(id: &str) -> NormalizedRequest {
        let mut req = NormalizedRequest {
            method: Some(HttpMethod::Get),
            path: format!("/api/ERP01/MM/materials/{}", id),
            ..Default::default()
        };
        req.path_params.insert("id".to_string(), id.to_string());
        req
    }

    #[tokio::test]
    async fn test_resolve_handler() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "common/ERP01/MM/MAT001.json", &json!({"id": "MAT001"}));

        let h = handler(HandlerSpec::Resolve {
            key: "{{path.id}}".to_string(),
        });
        let value = h.handle(get("MAT001"), ctx(dir.path())).await.unwrap();
        assert_eq!(value["id"], "MAT001");

        let err = h.handle(get("MAT404"), ctx(dir.path())).await.unwrap_err();
        assert!(matches!(err, HandlerError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_empty_key_is_bad_request() {
        let dir = TempDir::new().unwrap();
        let h = handler(HandlerSpec::Resolve {
            key: "{{path.missing}}".to_string(),
        });
        let err = h.handle(get("MAT001"), ctx(dir.path())).await.unwrap_err();
        assert!(matches!(err, HandlerError::BadRequest { .. }));
    }

    #[tokio::test]
    async fn test_traversal_key_is_bad_request() {
        let dir = TempDir::new().unwrap();
        let h = handler(HandlerSpec::Resolve {
            key: "{{path.id}}".to_string(),
        });
        let err = h.handle(get("../../etc/passwd"), ctx(dir.path())).await.unwrap_err();
        assert!(matches!(err, HandlerError::BadRequest { .. }));
    }

    #[tokio::test]
    async fn test_collection_filters_by_query() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "common/ERP01/MM/list.json",
            &json!([
                {"id": "MAT001", "plant": "P100", "stock": 5},
                {"id": "MAT002", "plant": "P200", "stock": 5},
                {"id": "MAT003", "plant": "P100", "stock": 0}
            ]),
        );
        let h = handler(HandlerSpec::Collection);

        let all = h.handle(NormalizedRequest::default(), ctx(dir.path())).await.unwrap();
        assert_eq!(all.as_array().unwrap().len(), 3);

        let mut req = NormalizedRequest::default();
        req.query.insert("plant".to_string(), "P100".to_string());
        req.query.insert("stock".to_string(), "5".to_string());
        let filtered = h.handle(req, ctx(dir.path())).await.unwrap();
        assert_eq!(filtered, json!([{"id": "MAT001", "plant": "P100", "stock": 5}]));
    }

    #[tokio::test]
    async fn test_missing_collection_is_empty() {
        let dir = TempDir::new().unwrap();
        let h = handler(HandlerSpec::Collection);
        let value = h.handle(NormalizedRequest::default(), ctx(dir.path())).await.unwrap();
        assert_eq!(value, json!([]));
    }

    #[tokio::test]
    async fn test_save_then_resolve() {
        let dir = TempDir::new().unwrap();
        let context = ctx(dir.path());
        let save = handler(HandlerSpec::Save {
            key: "{{path.id}}".to_string(),
        });

        let mut req = get("MAT009");
        req.method = Some(HttpMethod::Put);
        req.body = Some(json!({"id": "MAT009", "description": "Bolt"}));
        let echoed = save.handle(req, context.clone()).await.unwrap();
        assert_eq!(echoed["description"], "Bolt");

        let resolve = handler(HandlerSpec::Resolve {
            key: "{{path.id}}".to_string(),
        });
        let value = resolve.handle(get("MAT009"), context).await.unwrap();
        assert_eq!(value["description"], "Bolt");
        assert!(dir.path().join("extensions/ERP01/MM/MAT009.json").is_file());
    }

    #[tokio::test]
    async fn test_save_requires_body() {
        let dir = TempDir::new().unwrap();
        let h = handler(HandlerSpec::Save {
            key: "{{path.id}}".to_string(),
        });
        let err = h.handle(get("MAT009"), ctx(dir.path())).await.unwrap_err();
        assert!(matches!(err, HandlerError::BadRequest { .. }));
    }

    #[tokio::test]
    async fn test_static_body() {
        let dir = TempDir::new().unwrap();
        let h = handler(HandlerSpec::Static {
            body: json!({"material": "{{path.id}}", "status": "ok"}),
        });
        let value = h.handle(get("MAT001"), ctx(dir.path())).await.unwrap();
        assert_eq!(value, json!({"material": "MAT001", "status": "ok"}));
    }

    #[test]
    fn test_broken_template_rejected_at_construction() {
        let result = DataHandler::new(
            HandlerSpec::Resolve {
                key: "{{#if path.id}}".to_string(),
            },
            Arc::new(TemplateEngine::new()),
        );
        assert!(matches!(result, Err(MockError::Configuration { .. })));
    }
}
