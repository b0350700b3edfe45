//! Browser automation: one isolated session per URL `task_id`, cached for
//! the duration of a URL's investigation and released via RAII when the
//! investigator drops its handle (spec §5, "Shared resources").
//!
//! The browser automation surface itself is out of scope (spec §1): this
//! module only defines the trait boundary (`BrowserBackend`) and the tool
//! adapters the ReAct loop calls through.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

use crate::error::{Error, Result};
use crate::llm::ToolDefinition;
use crate::react::Tool;

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("navigation failed: {0}")]
    Navigation(String),
    #[error("element not found: {0}")]
    ElementNotFound(String),
    #[error("script evaluation failed: {0}")]
    Evaluation(String),
}

/// The opaque remote backend: navigate, click, fill a form, screenshot,
/// evaluate JS, inspect network activity. A concrete implementation wraps
/// whatever CDP/WebDriver client the deployment uses.
#[async_trait]
pub trait BrowserBackend: Send + Sync {
    async fn open(&self, task_id: &str) -> std::result::Result<Box<dyn BrowserHandle>, BrowserError>;
}

#[async_trait]
pub trait BrowserHandle: Send + Sync {
    async fn navigate(&self, url: &str) -> std::result::Result<String, BrowserError>;
    async fn click(&self, selector: &str) -> std::result::Result<(), BrowserError>;
    async fn fill_form(&self, selector: &str, value: &str) -> std::result::Result<(), BrowserError>;
    async fn screenshot(&self, output_path: &std::path::Path, forensic: bool) -> std::result::Result<(), BrowserError>;
    async fn evaluate(&self, js: &str) -> std::result::Result<String, BrowserError>;
    async fn network_requests(&self) -> std::result::Result<Vec<String>, BrowserError>;
    async fn close(&self);
}

/// Owns one URL task's isolated browser session. `Drop` closes the
/// backend handle, mirroring the teacher's RAII subprocess-handle cleanup
/// so a session is released even if the investigator's task is cancelled
/// mid-flight or panics.
pub struct BrowserSession {
    task_id: String,
    screenshot_dir: PathBuf,
    handle: Option<Box<dyn BrowserHandle>>,
}

impl BrowserSession {
    pub async fn open(backend: &dyn BrowserBackend, task_id: impl Into<String>, screenshot_dir: PathBuf) -> Result<Self> {
        let task_id = task_id.into();
        let handle = backend
            .open(&task_id)
            .await
            .map_err(|e| Error::Browser(e.to_string()))?;
        Ok(Self { task_id, screenshot_dir, handle: Some(handle) })
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    fn handle(&self) -> Result<&dyn BrowserHandle> {
        self.handle
            .as_deref()
            .ok_or_else(|| Error::Browser("browser session already closed".to_string()))
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            // Best-effort: the backend's close() is async, but Drop is not.
            // Spawn it so cleanup still happens off the panic/cancellation path.
            tokio::spawn(async move { handle.close().await });
        }
    }
}

/// Deterministic task id derivation: `"url_" + hash(url)` (spec §4.8).
pub fn task_id_for_url(url: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    format!("url_{}", hex::encode(&hasher.finalize()[..8]))
}

/// Validates that `js` looks like an arrow function, per the contractual
/// requirement in spec §4.8 / §6 ("JavaScript evaluated through `evaluate`
/// must be expressed as an arrow function string").
fn is_arrow_function(js: &str) -> bool {
    let js = js.trim();
    js.contains("=>") && (js.starts_with('(') || js.starts_with("async") || js.chars().next().is_some_and(|c| c.is_alphabetic()))
}

/// Bundles the six browser tool calls a URL investigator's ReAct loop
/// sees, all sharing one [`BrowserSession`].
pub struct BrowserTool {
    session: Arc<tokio::sync::Mutex<BrowserSession>>,
}

impl BrowserTool {
    pub fn new(session: Arc<tokio::sync::Mutex<BrowserSession>>) -> Self {
        Self { session }
    }
}

#[derive(Debug, Deserialize)]
struct NavigateArgs {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ClickArgs {
    selector: String,
}

#[derive(Debug, Deserialize)]
struct FillFormArgs {
    selector: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct ScreenshotArgs {
    #[serde(default)]
    forensic: bool,
    filename: String,
}

#[derive(Debug, Deserialize)]
struct EvaluateArgs {
    js: String,
}

macro_rules! browser_tool {
    ($name:ident) => {
        pub struct $name(pub Arc<tokio::sync::Mutex<BrowserSession>>);
    };
}

browser_tool!(NavigateTool);
browser_tool!(ClickTool);
browser_tool!(FillFormTool);
browser_tool!(ScreenshotTool);
browser_tool!(EvaluateTool);
browser_tool!(NetworkRequestsTool);

#[async_trait]
impl Tool for NavigateTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "navigate".into(),
            description: "Navigate the browser to a URL. Follows redirects.".into(),
            input_schema: serde_json::json!({"type": "object", "properties": {"url": {"type": "string"}}, "required": ["url"]}),
        }
    }

    fn mutates_remote_state(&self) -> bool {
        true
    }

    async fn call(&self, arguments: Value) -> Result<String> {
        let args: NavigateArgs = serde_json::from_value(arguments).map_err(|e| Error::tool("navigate", e.to_string()))?;
        let session = self.0.lock().await;
        session.handle()?.navigate(&args.url).await.map_err(|e| Error::Browser(e.to_string()))
    }
}

#[async_trait]
impl Tool for ClickTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "click".into(),
            description: "Click an element by CSS selector (e.g. to dismiss a cookie dialog).".into(),
            input_schema: serde_json::json!({"type": "object", "properties": {"selector": {"type": "string"}}, "required": ["selector"]}),
        }
    }

    fn mutates_remote_state(&self) -> bool {
        true
    }

    async fn call(&self, arguments: Value) -> Result<String> {
        let args: ClickArgs = serde_json::from_value(arguments).map_err(|e| Error::tool("click", e.to_string()))?;
        let session = self.0.lock().await;
        session.handle()?.click(&args.selector).await.map_err(|e| Error::Browser(e.to_string()))?;
        Ok(format!("clicked {}", args.selector))
    }
}

#[async_trait]
impl Tool for FillFormTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "fill_form".into(),
            description: "Fill a form field by CSS selector. Use fake credentials on suspected phishing forms to surface the submission endpoint.".into(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {"selector": {"type": "string"}, "value": {"type": "string"}},
                "required": ["selector", "value"]
            }),
        }
    }

    fn mutates_remote_state(&self) -> bool {
        true
    }

    async fn call(&self, arguments: Value) -> Result<String> {
        let args: FillFormArgs = serde_json::from_value(arguments).map_err(|e| Error::tool("fill_form", e.to_string()))?;
        let session = self.0.lock().await;
        session.handle()?.fill_form(&args.selector, &args.value).await.map_err(|e| Error::Browser(e.to_string()))?;
        Ok(format!("filled {}", args.selector))
    }
}

#[async_trait]
impl Tool for ScreenshotTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "screenshot".into(),
            description: "Capture a tactical (visible viewport) or forensic (full page) screenshot.".into(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {"forensic": {"type": "boolean"}, "filename": {"type": "string"}},
                "required": ["filename"]
            }),
        }
    }

    async fn call(&self, arguments: Value) -> Result<String> {
        let args: ScreenshotArgs = serde_json::from_value(arguments).map_err(|e| Error::tool("screenshot", e.to_string()))?;
        if args.filename.contains("..") || std::path::Path::new(&args.filename).is_absolute() {
            return Err(Error::tool("screenshot", "filename must be relative and non-escaping"));
        }
        let session = self.0.lock().await;
        let output_path = session.screenshot_dir.join(&args.filename);
        session.handle()?.screenshot(&output_path, args.forensic).await.map_err(|e| Error::Browser(e.to_string()))?;
        Ok(format!("saved screenshot to {}", output_path.display()))
    }
}

#[async_trait]
impl Tool for EvaluateTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "evaluate".into(),
            description: "Evaluate JavaScript in the page. Must be an arrow function, e.g. `() => document.title`.".into(),
            input_schema: serde_json::json!({"type": "object", "properties": {"js": {"type": "string"}}, "required": ["js"]}),
        }
    }

    async fn call(&self, arguments: Value) -> Result<String> {
        let args: EvaluateArgs = serde_json::from_value(arguments).map_err(|e| Error::tool("evaluate", e.to_string()))?;
        if !is_arrow_function(&args.js) {
            return Err(Error::tool(
                "evaluate",
                "js must be an arrow function string, e.g. `() => document.title`",
            ));
        }
        let session = self.0.lock().await;
        session.handle()?.evaluate(&args.js).await.map_err(|e| Error::Browser(e.to_string()))
    }
}

#[async_trait]
impl Tool for NetworkRequestsTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "network_requests".into(),
            description: "List network requests observed since the last navigation.".into(),
            input_schema: serde_json::json!({"type": "object", "properties": {}}),
        }
    }

    async fn call(&self, _arguments: Value) -> Result<String> {
        let session = self.0.lock().await;
        let requests = session.handle()?.network_requests().await.map_err(|e| Error::Browser(e.to_string()))?;
        serde_json::to_string(&requests).map_err(Error::Serialization)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arrow_functions_are_accepted() {
        assert!(is_arrow_function("() => document.title"));
        assert!(is_arrow_function("async () => { return 1; }"));
        assert!(is_arrow_function("(a, b) => a + b"));
    }

    #[test]
    fn plain_function_statements_are_rejected() {
        assert!(!is_arrow_function("function() { return document.title; }"));
        assert!(!is_arrow_function("document.title"));
    }

    #[test]
    fn task_id_is_deterministic_and_prefixed() {
        let a = task_id_for_url("https://example.com");
        let b = task_id_for_url("https://example.com");
        assert_eq!(a, b);
        assert!(a.starts_with("url_"));
    }

    #[test]
    fn task_id_differs_per_url() {
        assert_ne!(task_id_for_url("https://a.example"), task_id_for_url("https://b.example"));
    }
}
