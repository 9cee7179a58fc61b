//! Handlebars rendering for configured response bodies.
//!
//! Templates see the matched request:
//!
//! | key       | value                                        |
//! |-----------|----------------------------------------------|
//! | `params`  | params extracted by the stub's matcher       |
//! | `query`   | decoded query parameters                     |
//! | `headers` | request headers, lowercased names            |
//! | `method`  | request method                               |
//! | `path`    | request path                                 |
//! | `url`     | full request URL                             |
//! | `body`    | request body, when UTF-8                     |
//! | `json`    | request body parsed as JSON, when it parses  |

use crate::request::{generate_id, PublicRequest};
use handlebars::{handlebars_helper, Handlebars, RenderError, RenderErrorReason};
use http::HeaderMap;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt::Write;

#[derive(Debug, Serialize)]
pub struct TemplateContext {
    pub params: HashMap<String, String>,
    pub query: HashMap<String, String>,
    pub headers: HashMap<String, String>,
    pub method: String,
    pub path: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json: Option<Value>,
}

impl TemplateContext {
    pub fn from_request(request: &PublicRequest) -> Self {
        let body = request.body_text().map(String::from);
        let json = body.as_deref().and_then(|b| serde_json::from_str(b).ok());

        Self {
            params: request.params.clone(),
            query: request.query_params(),
            headers: header_map(request.headers()),
            method: request.method().to_string(),
            path: request.path().to_string(),
            url: request.url().to_string(),
            body,
            json,
        }
    }
}

/// One value per header name (names are already lowercase); first value wins.
fn header_map(headers: &HeaderMap) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for (name, value) in headers {
        if let Ok(value) = value.to_str() {
            map.entry(name.as_str().to_string()).or_insert_with(|| value.to_string());
        }
    }
    map
}

handlebars_helper!(upper: |value: str| value.to_uppercase());
handlebars_helper!(lower: |value: str| value.to_lowercase());

pub struct TemplateEngine {
    handlebars: Handlebars<'static>,
}

impl TemplateEngine {
    pub fn new() -> Self {
        let mut handlebars = Handlebars::new();
        handlebars.register_helper("upper", Box::new(upper));
        handlebars.register_helper("lower", Box::new(lower));
        handlebars.register_helper("default", Box::new(default_helper));
        handlebars.register_helper("now", Box::new(now_helper));
        handlebars.register_helper("uuid", Box::new(uuid_helper));
        // Bodies are not HTML.
        handlebars.register_escape_fn(handlebars::no_escape);
        Self { handlebars }
    }

    pub fn render(&self, template: &str, ctx: &TemplateContext) -> Result<String, RenderError> {
        self.handlebars.render_template(template, ctx)
    }

    /// Render every string leaf of a JSON document that contains `{{`.
    pub fn render_json(&self, value: &Value, ctx: &TemplateContext) -> Result<Value, RenderError> {
        match value {
            Value::String(s) if s.contains("{{") => Ok(Value::String(self.render(s, ctx)?)),
            Value::Array(items) => items
                .iter()
                .map(|item| self.render_json(item, ctx))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Value::Object(map) => {
                let mut rendered = serde_json::Map::with_capacity(map.len());
                for (key, item) in map {
                    rendered.insert(key.clone(), self.render_json(item, ctx)?);
                }
                Ok(Value::Object(rendered))
            }
            _ => Ok(value.clone()),
        }
    }
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// `{{default value "fallback"}}`: fallback when value is missing, null or "".
fn default_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    let fallback = h.param(1).and_then(|v| v.value().as_str()).unwrap_or("");
    let rendered = match h.param(0).map(|v| v.value()) {
        Some(Value::Null) | None => fallback.to_string(),
        Some(Value::String(s)) if s.is_empty() => fallback.to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    };
    out.write(&rendered)?;
    Ok(())
}

/// `{{now}}` or `{{now "%Y-%m-%d"}}`, UTC.
fn now_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    let format = h
        .param(0)
        .and_then(|v| v.value().as_str())
        .unwrap_or("%Y-%m-%dT%H:%M:%S%.3fZ");

    // Unknown specifiers surface as fmt::Error; `to_string` would panic on them.
    let mut rendered = String::new();
    write!(rendered, "{}", chrono::Utc::now().format(format))
        .map_err(|_| RenderErrorReason::Other(format!("invalid time format {format:?}")))?;
    out.write(&rendered)?;
    Ok(())
}

fn uuid_helper(
    _: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    out.write(&generate_id())?;
    Ok(())
}
