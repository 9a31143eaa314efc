//! Discovery catalog
//!
//! Answers `tools/list`, `resources/list`, and `prompts/list` locally so
//! discovery never waits on a slow child. Populated from the tools-config
//! file at startup and lazily from the child's own initialize response.

use parking_lot::RwLock;
use serde_json::{json, Value};
use tracing::info;

use sb_config::ToolsConfigFile;
use sb_protocol::{McpPrompt, McpResource, McpTool};

/// Methods the catalog can short-circuit
pub const DISCOVERY_METHODS: &[&str] = &["tools/list", "resources/list", "prompts/list"];

#[derive(Default)]
struct CatalogData {
    tools: Vec<McpTool>,
    resources: Vec<McpResource>,
    prompts: Vec<McpPrompt>,
}

#[derive(Default)]
pub struct Catalog {
    inner: RwLock<CatalogData>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_file(file: ToolsConfigFile) -> Self {
        Self {
            inner: RwLock::new(CatalogData {
                tools: file.tools,
                resources: file.resources,
                prompts: file.prompts,
            }),
        }
    }

    /// Result object for a discovery method, when the catalog can answer it
    ///
    /// Only a non-empty list short-circuits; an empty catalog forwards to
    /// the child so a server with real dynamic tools still works.
    pub fn respond(&self, method: &str) -> Option<Value> {
        let data = self.inner.read();
        match method {
            "tools/list" if !data.tools.is_empty() => Some(json!({ "tools": data.tools })),
            "resources/list" if !data.resources.is_empty() => {
                Some(json!({ "resources": data.resources }))
            }
            "prompts/list" if !data.prompts.is_empty() => Some(json!({ "prompts": data.prompts })),
            _ => None,
        }
    }

    /// Fold the child's initialize result into any empty sections
    pub fn merge_from_initialize(&self, result: &Value) {
        let mut data = self.inner.write();
        let mut merged = 0;

        if data.tools.is_empty() {
            if let Some(tools) = result.get("tools").and_then(Value::as_array) {
                data.tools = tools
                    .iter()
                    .filter_map(|t| serde_json::from_value(t.clone()).ok())
                    .collect();
                merged += data.tools.len();
            }
        }
        if data.resources.is_empty() {
            if let Some(resources) = result.get("resources").and_then(Value::as_array) {
                data.resources = resources
                    .iter()
                    .filter_map(|r| serde_json::from_value(r.clone()).ok())
                    .collect();
                merged += data.resources.len();
            }
        }
        if data.prompts.is_empty() {
            if let Some(prompts) = result.get("prompts").and_then(Value::as_array) {
                data.prompts = prompts
                    .iter()
                    .filter_map(|p| serde_json::from_value(p.clone()).ok())
                    .collect();
                merged += data.prompts.len();
            }
        }

        if merged > 0 {
            info!("catalog populated from child initialize ({} entries)", merged);
        }
    }

    pub fn counts(&self) -> (usize, usize, usize) {
        let data = self.inner.read();
        (data.tools.len(), data.resources.len(), data.prompts.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one_tool() -> ToolsConfigFile {
        serde_json::from_str(
            r#"{"tools":[{"name":"echo","description":"e","inputSchema":{"type":"object"}}]}"#,
        )
        .unwrap()
    }

    #[test]
    fn test_short_circuit_only_when_non_empty() {
        let catalog = Catalog::from_file(one_tool());

        let result = catalog.respond("tools/list").unwrap();
        assert_eq!(result["tools"][0]["name"], "echo");

        assert!(catalog.respond("resources/list").is_none());
        assert!(catalog.respond("prompts/list").is_none());
        assert!(catalog.respond("tools/call").is_none());
    }

    #[test]
    fn test_merge_from_initialize_fills_empty_sections() {
        let catalog = Catalog::new();
        assert!(catalog.respond("tools/list").is_none());

        catalog.merge_from_initialize(&serde_json::json!({
            "protocolVersion": "2024-11-05",
            "tools": [{"name": "late", "inputSchema": {}}]
        }));

        let result = catalog.respond("tools/list").unwrap();
        assert_eq!(result["tools"][0]["name"], "late");
    }

    #[test]
    fn test_merge_never_overwrites_configured_tools() {
        let catalog = Catalog::from_file(one_tool());
        catalog.merge_from_initialize(&serde_json::json!({
            "tools": [{"name": "other", "inputSchema": {}}]
        }));

        let result = catalog.respond("tools/list").unwrap();
        assert_eq!(result["tools"].as_array().unwrap().len(), 1);
        assert_eq!(result["tools"][0]["name"], "echo");
    }
}
