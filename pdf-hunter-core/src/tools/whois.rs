//! WHOIS lookup: a pure function `domain -> record`, consumed as an opaque
//! trait per spec §1.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::llm::ToolDefinition;
use crate::react::Tool;

/// Well-known hosting platforms whose subdomains are disposable and thus
/// get a standing warning appended to the WHOIS summary (spec §6).
const DISPOSABLE_HOSTS: &[&str] = &["vercel.app", "herokuapp.com", "github.io", "netlify.app"];

#[async_trait]
pub trait WhoisLookup: Send + Sync {
    /// Returns a human-readable summary, or `"No WHOIS record found"`.
    async fn lookup(&self, domain: &str) -> Result<String>;
}

/// Adapts a [`WhoisLookup`] into the `domain_whois` tool call the URL
/// investigator's ReAct loop sees. Does not mutate remote state: it's a
/// read-only lookup and so is exempt from the action budget.
pub struct WhoisTool {
    lookup: std::sync::Arc<dyn WhoisLookup>,
}

impl WhoisTool {
    pub fn new(lookup: std::sync::Arc<dyn WhoisLookup>) -> Self {
        Self { lookup }
    }
}

#[derive(Debug, Deserialize)]
struct WhoisArgs {
    domain: String,
}

#[async_trait]
impl Tool for WhoisTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "domain_whois".into(),
            description: "Look up the WHOIS record for a domain.".into(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {"domain": {"type": "string"}},
                "required": ["domain"]
            }),
        }
    }

    fn mutates_remote_state(&self) -> bool {
        false
    }

    async fn call(&self, arguments: Value) -> Result<String> {
        let args: WhoisArgs =
            serde_json::from_value(arguments).map_err(|e| Error::tool("domain_whois", e.to_string()))?;

        let record = self.lookup.lookup(&args.domain).await?;

        if let Some(host) = DISPOSABLE_HOSTS.iter().find(|h| args.domain.ends_with(*h)) {
            Ok(format!(
                "{record}\n\nWARNING: {host} is a disposable hosting platform; subdomains are \
                 freely registrable and WHOIS data reflects the platform, not the publisher."
            ))
        } else {
            Ok(record)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeLookup;

    #[async_trait]
    impl WhoisLookup for FakeLookup {
        async fn lookup(&self, domain: &str) -> Result<String> {
            if domain == "unknown.example" {
                Ok("No WHOIS record found".to_string())
            } else {
                Ok(format!("Registrar: Example Inc.\nDomain: {domain}"))
            }
        }
    }

    #[tokio::test]
    async fn disposable_hosting_domain_gets_a_warning() {
        let tool = WhoisTool::new(std::sync::Arc::new(FakeLookup));
        let out = tool.call(serde_json::json!({"domain": "phish.vercel.app"})).await.unwrap();
        assert!(out.contains("WARNING"));
        assert!(out.contains("disposable"));
    }

    #[tokio::test]
    async fn ordinary_domain_has_no_warning() {
        let tool = WhoisTool::new(std::sync::Arc::new(FakeLookup));
        let out = tool.call(serde_json::json!({"domain": "example.com"})).await.unwrap();
        assert!(!out.contains("WARNING"));
    }
}
