//! MCP server: JSON-RPC 2.0 over stdio, exposing exactly two tools.
//!
//! `cleo_query` and `cleo_mutate` both take `{domain, operation, params}`
//! and return the dispatch envelope verbatim as text content.

use anyhow::{Context, Result};
use cleo_core::envelope::{DispatchRequest, Gateway, Source};
use cleo_dispatch::Dispatcher;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::{BufRead, Write};
use tracing::{debug, error, info};

pub async fn run(dispatcher: Dispatcher) -> Result<()> {
    info!("Starting MCP server on stdio");

    let stdin = std::io::stdin();
    let stdout = std::io::stdout();

    for line in stdin.lock().lines() {
        let line = line.context("Failed to read line from stdin")?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        debug!("Received: {}", trimmed);

        let request: JsonRpcRequest = match serde_json::from_str(trimmed) {
            Ok(request) => request,
            Err(e) => {
                error!("Failed to parse JSON-RPC request: {}", e);
                write_response(
                    &stdout,
                    &JsonRpcResponse::error(None, -32700, format!("Parse error: {e}")),
                )?;
                continue;
            }
        };

        let response = handle_request(&dispatcher, request).await;
        write_response(&stdout, &response)?;
    }

    info!("MCP server shutting down");
    Ok(())
}

#[derive(Deserialize)]
struct JsonRpcRequest {
    #[allow(dead_code)]
    jsonrpc: String,
    method: String,
    #[serde(default)]
    params: Option<Value>,
    id: Option<Value>,
}

#[derive(Serialize)]
struct JsonRpcResponse {
    jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<JsonRpcError>,
    id: Option<Value>,
}

#[derive(Serialize)]
struct JsonRpcError {
    code: i32,
    message: String,
}

impl JsonRpcResponse {
    fn ok(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    fn error(id: Option<Value>, code: i32, message: String) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(JsonRpcError { code, message }),
            id,
        }
    }
}

#[derive(Serialize)]
struct McpToolDef {
    name: String,
    description: String,
    #[serde(rename = "inputSchema")]
    input_schema: Value,
}

fn tool_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "domain": {
                "type": "string",
                "description": "Domain, e.g. tasks, session, admin"
            },
            "operation": {
                "type": "string",
                "description": "Operation within the domain, e.g. list, complete"
            },
            "params": {
                "type": "object",
                "description": "Operation parameters"
            }
        },
        "required": ["domain", "operation"]
    })
}

fn get_tools() -> Vec<McpToolDef> {
    vec![
        McpToolDef {
            name: "cleo_query".to_string(),
            description: "Read task, session, and project state".to_string(),
            input_schema: tool_schema(),
        },
        McpToolDef {
            name: "cleo_mutate".to_string(),
            description: "Apply a verified, audited state transition".to_string(),
            input_schema: tool_schema(),
        },
    ]
}

async fn handle_request(dispatcher: &Dispatcher, request: JsonRpcRequest) -> JsonRpcResponse {
    let id = request.id.clone();

    match request.method.as_str() {
        "initialize" => JsonRpcResponse::ok(
            id,
            serde_json::json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {
                    "tools": {}
                },
                "serverInfo": {
                    "name": "cleo-mcp",
                    "version": env!("CARGO_PKG_VERSION")
                }
            }),
        ),
        "notifications/initialized" => JsonRpcResponse {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: None,
            id: None,
        },
        "tools/list" => JsonRpcResponse::ok(
            id,
            serde_json::json!({
                "tools": get_tools()
            }),
        ),
        "tools/call" => match handle_tool_call(dispatcher, request.params).await {
            Ok(result) => JsonRpcResponse::ok(id, result),
            Err(e) => JsonRpcResponse::error(id, -32602, e.to_string()),
        },
        "shutdown" => JsonRpcResponse::ok(id, serde_json::json!({})),
        other => JsonRpcResponse::error(id, -32601, format!("Method not found: {other}")),
    }
}

async fn handle_tool_call(dispatcher: &Dispatcher, params: Option<Value>) -> Result<Value> {
    let params = params.context("Missing params for tools/call")?;
    let name = params
        .get("name")
        .and_then(|v| v.as_str())
        .context("Missing tool name")?;
    let arguments = params.get("arguments").cloned().unwrap_or(Value::Null);

    let gateway = match name {
        "cleo_query" => Gateway::Query,
        "cleo_mutate" => Gateway::Mutate,
        other => anyhow::bail!("Unknown tool: {other}"),
    };

    let domain = arguments
        .get("domain")
        .and_then(Value::as_str)
        .context("Missing 'domain' argument")?
        .to_string();
    let operation = arguments
        .get("operation")
        .and_then(Value::as_str)
        .context("Missing 'operation' argument")?
        .to_string();
    let call_params = arguments
        .get("params")
        .cloned()
        .unwrap_or_else(|| Value::Object(serde_json::Map::new()));

    debug!(domain, operation, "Tool call");

    let request = DispatchRequest::new(gateway, domain, operation, call_params, Source::Mcp);
    let response = dispatcher.dispatch(request).await;

    // The envelope goes back verbatim; isError mirrors the success flag
    // so clients can branch without parsing the text.
    let envelope = serde_json::to_string(&response).context("Failed to serialize envelope")?;
    Ok(serde_json::json!({
        "content": [{"type": "text", "text": envelope}],
        "isError": !response.success,
    }))
}

fn write_response(stdout: &std::io::Stdout, response: &JsonRpcResponse) -> Result<()> {
    // Notifications produce no output at all.
    if response.result.is_none() && response.error.is_none() {
        return Ok(());
    }
    let json = serde_json::to_string(response).context("Failed to serialize response")?;
    let mut handle = stdout.lock();
    writeln!(handle, "{json}").context("Failed to write response")?;
    handle.flush().context("Failed to flush stdout")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cleo_config::config::{Config, StorageEngine};
    use cleo_config::paths::ProjectPaths;
    use cleo_store::Store;
    use tempfile::tempdir;

    fn dispatcher(dir: &std::path::Path) -> Dispatcher {
        let paths = ProjectPaths::with_data_dir(dir.to_path_buf(), dir.join(".cleo"));
        let store = Store::open(paths, StorageEngine::Json);
        store.init().unwrap();
        Dispatcher::from_parts(store, Config::default())
    }

    fn rpc(method: &str, params: Value) -> JsonRpcRequest {
        JsonRpcRequest {
            jsonrpc: "2.0".into(),
            method: method.into(),
            params: Some(params),
            id: Some(serde_json::json!(1)),
        }
    }

    #[tokio::test]
    async fn test_initialize_reports_server_info() {
        let dir = tempdir().unwrap();
        let d = dispatcher(dir.path());
        let response = handle_request(&d, rpc("initialize", Value::Null)).await;
        let result = response.result.unwrap();
        assert_eq!(result["serverInfo"]["name"], "cleo-mcp");
    }

    #[tokio::test]
    async fn test_tools_list_exposes_exactly_two_tools() {
        let dir = tempdir().unwrap();
        let d = dispatcher(dir.path());
        let response = handle_request(&d, rpc("tools/list", Value::Null)).await;
        let tools = response.result.unwrap()["tools"].as_array().unwrap().clone();
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[0]["name"], "cleo_query");
        assert_eq!(tools[1]["name"], "cleo_mutate");
    }

    #[tokio::test]
    async fn test_tool_call_returns_envelope_text() {
        let dir = tempdir().unwrap();
        let d = dispatcher(dir.path());

        let response = handle_request(
            &d,
            rpc(
                "tools/call",
                serde_json::json!({
                    "name": "cleo_mutate",
                    "arguments": {
                        "domain": "tasks",
                        "operation": "add",
                        "params": {
                            "title": "Design API",
                            "description": "Write initial REST API specification"
                        }
                    }
                }),
            ),
        )
        .await;

        let result = response.result.unwrap();
        assert_eq!(result["isError"], false);
        let text = result["content"][0]["text"].as_str().unwrap();
        let envelope: Value = serde_json::from_str(text).unwrap();
        assert_eq!(envelope["success"], true);
        assert_eq!(envelope["data"]["id"], "T1");
        assert_eq!(envelope["_meta"]["source"], "mcp");
    }

    #[tokio::test]
    async fn test_unknown_domain_is_an_envelope_error_not_rpc_error() {
        let dir = tempdir().unwrap();
        let d = dispatcher(dir.path());

        let response = handle_request(
            &d,
            rpc(
                "tools/call",
                serde_json::json!({
                    "name": "cleo_query",
                    "arguments": {"domain": "bogus", "operation": "list"}
                }),
            ),
        )
        .await;

        let result = response.result.unwrap();
        assert_eq!(result["isError"], true);
        let text = result["content"][0]["text"].as_str().unwrap();
        let envelope: Value = serde_json::from_str(text).unwrap();
        assert_eq!(envelope["error"]["code"], "INVALID_DOMAIN");
        assert!(envelope["error"]["alternatives"].is_array());
    }

    #[tokio::test]
    async fn test_unknown_tool_is_an_rpc_error() {
        let dir = tempdir().unwrap();
        let d = dispatcher(dir.path());

        let response = handle_request(
            &d,
            rpc(
                "tools/call",
                serde_json::json!({"name": "cleo_explode", "arguments": {}}),
            ),
        )
        .await;
        assert!(response.result.is_none());
        assert_eq!(response.error.unwrap().code, -32602);
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let dir = tempdir().unwrap();
        let d = dispatcher(dir.path());
        let response = handle_request(&d, rpc("resources/list", Value::Null)).await;
        assert_eq!(response.error.unwrap().code, -32601);
    }
}
