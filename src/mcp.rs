use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::tools::VaultTools;

const PROTOCOL_VERSION: &str = "2024-11-05";

#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    #[serde(default)]
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Serialize)]
pub struct RpcResponse {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

#[derive(Debug, Serialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
}

#[derive(Debug, Deserialize)]
struct CallParams {
    name: String,
    #[serde(default)]
    arguments: Value,
}

/// stdio 上的 JSON-RPC 循环（每行一条消息），stdin 关闭时退出。
/// 请求并发处理，stdout 只由一个写任务持有。
pub async fn run_stdio(tools: Arc<VaultTools>) -> Result<()> {
    let stdin = tokio::io::stdin();
    let mut reader = BufReader::new(stdin).lines();
    let (tx, mut rx) = mpsc::unbounded_channel::<RpcResponse>();

    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(resp) = rx.recv().await {
            if let Err(e) = write_response(&mut stdout, &resp).await {
                warn!("failed to write response: {}", e);
                break;
            }
        }
    });

    info!("serving MCP over stdio");
    while let Some(line) = reader.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let req: RpcRequest = match serde_json::from_str(&line) {
            Ok(r) => r,
            Err(e) => {
                let _ = tx.send(rpc_error(Value::Null, -32700, format!("parse error: {e}")));
                continue;
            }
        };

        let tools = tools.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            if let Some(resp) = process_request(tools, req).await {
                let _ = tx.send(resp);
            }
        });
    }

    drop(tx);
    let _ = writer.await;
    info!("stdin closed, shutting down");
    Ok(())
}

/// Handle one request. Notifications produce no response.
pub async fn process_request(tools: Arc<VaultTools>, req: RpcRequest) -> Option<RpcResponse> {
    debug!("rpc method={}", req.method);
    let method = req.method.clone();
    match method.as_str() {
        "initialize" => Some(rpc_result(
            req.id,
            serde_json::json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {
                    "tools": {}
                },
                "serverInfo": {
                    "name": "obsidian-vault-mcp",
                    "version": env!("CARGO_PKG_VERSION")
                }
            }),
        )),
        "ping" => Some(rpc_result(req.id, serde_json::json!({}))),
        "tools/list" => Some(rpc_result(
            req.id,
            serde_json::json!({ "tools": VaultTools::definitions() }),
        )),
        "tools/call" => Some(handle_call(&tools, req).await),
        _ if req.id.is_null() => None,
        other => Some(rpc_error(
            req.id,
            -32601,
            format!("method not found: {other}"),
        )),
    }
}

async fn handle_call(tools: &VaultTools, req: RpcRequest) -> RpcResponse {
    let params: CallParams = match serde_json::from_value(req.params) {
        Ok(p) => p,
        Err(e) => return rpc_error(req.id, -32602, format!("invalid params: {e}")),
    };

    match tools.call(&params.name, params.arguments).await {
        Ok(out) => rpc_result(
            req.id,
            serde_json::json!({
                "content": [{ "type": "text", "text": out.text }],
                "isError": out.is_error
            }),
        ),
        Err(e) => {
            warn!("rejected tool call {}: {}", params.name, e);
            rpc_error(req.id, -32602, e.to_string())
        }
    }
}

async fn write_response(stdout: &mut tokio::io::Stdout, resp: &RpcResponse) -> Result<()> {
    let line = serde_json::to_string(resp).unwrap_or_else(|_| "{}".to_string());
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await?;
    Ok(())
}

fn rpc_result(id: Value, result: Value) -> RpcResponse {
    RpcResponse {
        jsonrpc: "2.0",
        id,
        result: Some(result),
        error: None,
    }
}

fn rpc_error(id: Value, code: i32, message: String) -> RpcResponse {
    RpcResponse {
        jsonrpc: "2.0",
        id,
        result: None,
        error: Some(RpcError { code, message }),
    }
}
