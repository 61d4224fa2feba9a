//! Handlebars templates for data keys and static bodies.
//!
//! Templates see the normalized request as `path`, `query`, `headers`,
//! `method`, `request_path` and `json`.

use crate::request::NormalizedRequest;
use handlebars::{
    handlebars_helper, Context, Handlebars, Helper, HelperResult, Output, RenderContext,
    RenderError,
};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;

handlebars_helper!(upper: |s: str| s.to_uppercase());
handlebars_helper!(lower: |s: str| s.to_lowercase());
// Zero-padded identifiers, e.g. `{{pad path.id 18}}` for material numbers
handlebars_helper!(pad: |s: str, width: u64| format!("{:0>width$}", s, width = width as usize));

/// Request view handed to templates.
#[derive(Debug, Serialize)]
struct RequestView<'a> {
    path: &'a HashMap<String, String>,
    query: &'a HashMap<String, String>,
    headers: &'a HashMap<String, String>,
    method: &'static str,
    request_path: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    json: Option<&'a Value>,
}

impl<'a> From<&'a NormalizedRequest> for RequestView<'a> {
    fn from(request: &'a NormalizedRequest) -> Self {
        Self {
            path: &request.path_params,
            query: &request.query,
            headers: &request.headers,
            method: request.method.map(|m| m.as_str()).unwrap_or_default(),
            request_path: &request.path,
            json: request.body.as_ref(),
        }
    }
}

/// Shared template renderer.
pub struct TemplateEngine {
    registry: Handlebars<'static>,
}

impl TemplateEngine {
    pub fn new() -> Self {
        let mut registry = Handlebars::new();
        registry.register_helper("upper", Box::new(upper));
        registry.register_helper("lower", Box::new(lower));
        registry.register_helper("pad", Box::new(pad));
        registry.register_helper("default", Box::new(or_default));
        registry.register_helper("now", Box::new(now));
        registry.register_helper("uuid", Box::new(uuid));
        // Output is file keys and JSON strings
        registry.register_escape_fn(handlebars::no_escape);
        Self { registry }
    }

    /// Compile-only check.
    pub fn check(template: &str) -> Result<(), String> {
        handlebars::Template::compile(template)
            .map(drop)
            .map_err(|e| e.to_string())
    }

    /// Compile-check every string in a JSON value that looks like a template.
    pub fn check_json(value: &Value) -> Result<(), String> {
        let mut first_error = None;
        visit_templates(value, &mut |s| {
            if first_error.is_none() {
                first_error = Self::check(s).err();
            }
        });
        first_error.map_or(Ok(()), Err)
    }

    pub fn render(&self, template: &str, request: &NormalizedRequest) -> Result<String, RenderError> {
        self.registry
            .render_template(template, &RequestView::from(request))
    }

    /// Render every templated string of `body`, leaving everything else as is.
    pub fn render_json(&self, body: &Value, request: &NormalizedRequest) -> Result<Value, RenderError> {
        let view = RequestView::from(request);
        let mut rendered = body.clone();
        let mut pending = vec![&mut rendered];
        while let Some(value) = pending.pop() {
            match value {
                Value::String(s) if is_template(s) => {
                    *s = self.registry.render_template(s, &view)?;
                }
                Value::Array(items) => pending.extend(items.iter_mut()),
                Value::Object(fields) => pending.extend(fields.values_mut()),
                _ => {}
            }
        }
        Ok(rendered)
    }
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn is_template(s: &str) -> bool {
    s.contains("{{")
}

fn visit_templates<'a>(value: &'a Value, f: &mut impl FnMut(&'a str)) {
    match value {
        Value::String(s) if is_template(s) => f(s),
        Value::Array(items) => items.iter().for_each(|v| visit_templates(v, f)),
        Value::Object(fields) => fields.values().for_each(|v| visit_templates(v, f)),
        _ => {}
    }
}

/// `{{default value "fallback"}}`: fallback for missing, null or empty values.
fn or_default(
    h: &Helper,
    _: &Handlebars,
    _: &Context,
    _: &mut RenderContext,
    out: &mut dyn Output,
) -> HelperResult {
    let fallback = h.param(1).and_then(|p| p.value().as_str()).unwrap_or_default();
    let rendered = match h.param(0).map(|p| p.value()) {
        None | Some(Value::Null) => fallback.to_string(),
        Some(Value::String(s)) if s.is_empty() => fallback.to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    };
    out.write(&rendered)?;
    Ok(())
}

/// `{{now}}` or `{{now "%Y%m%d"}}`, UTC.
fn now(
    h: &Helper,
    _: &Handlebars,
    _: &Context,
    _: &mut RenderContext,
    out: &mut dyn Output,
) -> HelperResult {
    let now = chrono::Utc::now();
    let rendered = match h.param(0).and_then(|p| p.value().as_str()) {
        Some(format) => now.format(format).to_string(),
        None => now.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
    };
    out.write(&rendered)?;
    Ok(())
}

/// Random version 4 UUID.
fn uuid(
    _: &Helper,
    _: &Handlebars,
    _: &Context,
    _: &mut RenderContext,
    out: &mut dyn Output,
) -> HelperResult {
    let mut bytes: [u8; 16] = rand::random();
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;

    let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
    out.write(&format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    ))?;
    Ok(())
}
