//! Enterprise Mock Server
//!
//! Stands in for enterprise backend systems (ERP, CRM, ...) during
//! development and testing. Systems, modules and endpoints are declared in
//! configuration; endpoint data comes from a layered directory of JSON files.
//!
//! # Features
//!
//! - **Layered Data**: `extensions` over an optional profile over `common`, cached per key
//! - **Dynamic Routes**: every endpoint is served at `/api/{system}/{module}{path}`
//! - **Fault Injection**: probabilistic rules or a forced `X-Mock-Error` header,
//!   with a daily audit log of every simulated failure
//! - **Lazy Startup**: the registry loads and binds on the first request
//! - **Pluggable Handlers**: code-defined endpoints via [`EndpointProvider`]
//!
//! # Example Configuration
//!
//! ```yaml
//! settings:
//!   data_root: ./mock-data
//! systems:
//!   - id: ERP01
//!     name: Enterprise Resource Planning
//!     modules:
//!       - id: MM
//!         endpoints:
//!           - path: /materials/{id}
//!             method: GET
//!             handler:
//!               type: resolve
//!               key: "{{path.id}}"
//!             error_rules:
//!               - errorKind: Timeout
//!                 probability: 0.05
//!                 delayMs: 2000
//! ```

pub mod binder;
pub mod builtin;
pub mod config;
pub mod error;
pub mod handler;
pub mod injector;
pub mod matcher;
pub mod model;
pub mod registry;
pub mod request;
pub mod resolver;
pub mod server;
pub mod template;

pub use binder::{BindReport, EndpointBinder, RouteTable};
pub use config::{HandlerSpec, MockServerConfig, YamlConfigSource};
pub use error::{MockError, Result};
pub use handler::{handler_fn, Handler, HandlerContext, HandlerError};
pub use injector::{ErrorInjector, InjectorSettings};
pub use model::{Endpoint, ErrorKind, ErrorSimulationRule, HttpMethod, Module, System};
pub use registry::{ConfigSource, EndpointProvider, HandlerCatalog, SystemRegistry};
pub use request::NormalizedRequest;
pub use resolver::{DataResolver, Layer, ResolverConfig};
pub use server::{MockServer, PipelineOptions, ServerStats};
