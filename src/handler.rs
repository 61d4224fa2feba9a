//! Endpoint handler abstraction.
//!
//! Domain handlers live outside this crate; they implement [`Handler`] and are
//! attached to endpoints supplied through an `EndpointProvider`.

use crate::error::MockError;
use crate::request::NormalizedRequest;
use crate::resolver::DataResolver;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

/// Context available to a handler for one request.
#[derive(Clone)]
pub struct HandlerContext {
    pub system_id: String,
    pub module_id: String,
    pub resolver: Arc<DataResolver>,
}

impl HandlerContext {
    /// Logical key for an entity of the current module.
    pub fn key(&self, entity: &str) -> String {
        format!("{}/{}/{}", self.system_id, self.module_id, entity)
    }
}

/// Failure outcome of a handler.
#[derive(Error, Debug)]
pub enum HandlerError {
    /// Domain-level "not found", rendered as 404
    #[error("{message}")]
    NotFound { message: String },

    #[error("{message}")]
    BadRequest { message: String },

    /// Anything else; the detail never leaves the server
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl HandlerError {
    pub fn not_found(message: impl Into<String>) -> Self {
        HandlerError::NotFound {
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        HandlerError::BadRequest {
            message: message.into(),
        }
    }
}

impl From<MockError> for HandlerError {
    fn from(err: MockError) -> Self {
        match err {
            MockError::DataNotFound { key } => {
                HandlerError::not_found(format!("No data found for '{}'", key))
            }
            MockError::InvalidKey { key, reason } => {
                HandlerError::bad_request(format!("Invalid key '{}': {}", key, reason))
            }
            other => HandlerError::Internal(other.into()),
        }
    }
}

/// An endpoint implementation.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(
        &self,
        request: NormalizedRequest,
        ctx: HandlerContext,
    ) -> Result<serde_json::Value, HandlerError>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(NormalizedRequest, HandlerContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<serde_json::Value, HandlerError>> + Send,
{
    async fn handle(
        &self,
        request: NormalizedRequest,
        ctx: HandlerContext,
    ) -> Result<serde_json::Value, HandlerError> {
        (self.0)(request, ctx).await
    }
}

/// Wrap an async closure as a handler.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn Handler>
where
    F: Fn(NormalizedRequest, HandlerContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<serde_json::Value, HandlerError>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::ResolverConfig;
    use serde_json::json;

    fn ctx() -> HandlerContext {
        HandlerContext {
            system_id: "ERP01".to_string(),
            module_id: "MM".to_string(),
            resolver: Arc::new(DataResolver::new(ResolverConfig::new("/nonexistent"))),
        }
    }

    #[test]
    fn test_context_key() {
        assert_eq!(ctx().key("MAT001"), "ERP01/MM/MAT001");
    }

    #[test]
    fn test_mock_error_mapping() {
        let err: HandlerError = MockError::DataNotFound {
            key: "ERP01/MM/X".to_string(),
        }
        .into();
        assert!(matches!(err, HandlerError::NotFound { .. }));

        let err: HandlerError = MockError::configuration("boom").into();
        assert!(matches!(err, HandlerError::Internal(_)));
    }

    #[tokio::test]
    async fn test_handler_fn() {
        let handler = handler_fn(|req: NormalizedRequest, ctx: HandlerContext| async move {
            Ok(json!({ "system": ctx.system_id, "id": req.path_param("id") }))
        });

        let mut req = NormalizedRequest::default();
        req.path_params.insert("id".to_string(), "42".to_string());

        let value = handler.handle(req, ctx()).await.unwrap();
        assert_eq!(value, json!({"system": "ERP01", "id": "42"}));
    }
}
