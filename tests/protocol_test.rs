mod helpers;

use helpers::{error_code, services, test_config, write_file, Client, SlowCompleter};
use palace::provider::CompletionProvider;
use palace::server::Services;
use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

#[tokio::test]
async fn requests_before_initialize_are_rejected() {
    let tmp = TempDir::new().unwrap();
    let services = services(tmp.path());
    let mut client = Client::connect(&services);

    let response = client.request("tools/list", json!({})).await;
    assert_eq!(error_code(&response), -32002);
    assert_eq!(response["error"]["data"]["type"], "not_initialized");

    let response = client.request("ping", json!({})).await;
    assert_eq!(error_code(&response), -32002);

    let response = client.initialize().await;
    assert!(response.get("error").is_none());
    assert!(client.request("ping", json!({})).await.get("result").is_some());
}

#[tokio::test]
async fn initialize_advertises_the_catalog() {
    let tmp = TempDir::new().unwrap();
    let services = services(tmp.path());
    let mut client = Client::connect(&services);

    let response = client.initialize().await;
    let result = &response["result"];
    assert_eq!(result["protocolVersion"], "2025-06-18");
    assert_eq!(result["serverInfo"]["name"], "palace");
    let tools = result["tools"].as_array().unwrap();
    assert_eq!(tools.len(), 12);
    let store = tools.iter().find(|t| t["name"] == "store").unwrap();
    assert_eq!(store["inputSchema"]["required"], json!(["content"]));

    let listed = client.request("tools/list", json!({})).await;
    assert_eq!(listed["result"]["tools"].as_array().unwrap().len(), 12);

    let again = client.request("initialize", json!({})).await;
    assert_eq!(error_code(&again), -32600);
}

#[tokio::test]
async fn store_then_recall_by_kind() {
    let tmp = TempDir::new().unwrap();
    let services = services(tmp.path());
    let mut client = Client::connect(&services);
    client.initialize().await;

    let stored = client
        .call_ok("store", json!({"content": "Use Redis for caching", "as": "idea"}))
        .await;
    assert_eq!(stored["kind"], "idea");
    assert_eq!(stored["scope"], "palace");

    let recalled = client.call_ok("recall", json!({"kind": "idea"})).await;
    assert_eq!(recalled["count"], 1);
    assert_eq!(recalled["records"][0]["id"], stored["id"]);

    let response = client
        .call("store", json!({"content": "Use Redis for caching", "as": "idea"}))
        .await;
    let text = response["result"]["content"][0]["text"].as_str().unwrap();
    assert!(text.contains("Use Redis for caching"));
}

#[tokio::test]
async fn validation_failures_name_the_field() {
    let tmp = TempDir::new().unwrap();
    let services = services(tmp.path());
    let mut client = Client::connect(&services);
    client.initialize().await;

    let empty = client.call("store", json!({"content": "", "as": "idea"})).await;
    assert_eq!(error_code(&empty), -32602);
    assert_eq!(empty["error"]["data"]["type"], "empty_content");

    let missing = client.call("forget", json!({})).await;
    assert_eq!(error_code(&missing), -32602);
    assert_eq!(missing["error"]["data"]["field"], "id");

    let briefing = client.call("briefing", json!({"context": "file"})).await;
    assert_eq!(error_code(&briefing), -32602);
    assert_eq!(briefing["error"]["data"]["field"], "contextPath");

    let scope = client.call("store", json!({"content": "x", "scope": "file"})).await;
    assert_eq!(scope["error"]["data"]["type"], "scope_path_required");

    // the connection survives all of the above
    assert!(client.request("ping", json!({})).await.get("result").is_some());
}

#[tokio::test]
async fn unknown_methods_and_tools() {
    let tmp = TempDir::new().unwrap();
    let services = services(tmp.path());
    let mut client = Client::connect(&services);
    client.initialize().await;

    let response = client.request("resources/list", json!({})).await;
    assert_eq!(error_code(&response), -32601);

    let response = client.call("summon", json!({})).await;
    assert_eq!(error_code(&response), -32601);

    let response = client.call("forget", json!({"id": "no-such-id"})).await;
    assert_eq!(error_code(&response), -32004);
}

#[tokio::test]
async fn malformed_lines_get_parse_errors() {
    let tmp = TempDir::new().unwrap();
    let services = services(tmp.path());
    let mut client = Client::connect(&services);

    client.send_raw("{this is not json").await;
    let response = client.recv().await;
    assert_eq!(error_code(&response), -32700);
    assert_eq!(response["id"], serde_json::Value::Null);

    let response = client.initialize().await;
    assert!(response.get("result").is_some());

    client
        .send_bytes(b"{\"jsonrpc\":\"2.0\",\"id\":99,\"method\":\"ping\",\"params\":{\"x\":\"\xff\xfe\"}}")
        .await;
    let response = client.recv().await;
    assert_eq!(error_code(&response), -32700);
    assert_eq!(response["error"]["data"]["type"], "parse_error");

    assert!(client.request("ping", json!({})).await.get("result").is_some());
}

#[tokio::test]
async fn explore_caps_results() {
    let tmp = TempDir::new().unwrap();
    let source: String = (0..60).map(|i| format!("def do_work_{i}():\n    pass\n\n")).collect();
    write_file(tmp.path(), "work.py", &source);
    let services = services(tmp.path());
    let mut client = Client::connect(&services);
    client.initialize().await;

    let report = client.call_ok("rescan", json!({})).await;
    assert_eq!(report["indexed"], 1);

    let found = client
        .call_ok("explore", json!({"query": "do_work", "limit": 100, "fuzzy": true}))
        .await;
    assert_eq!(found["count"], 50);

    let listed = client.call_ok("explore_symbols", json!({"path": "work.py", "limit": 5})).await;
    assert_eq!(listed["count"], 5);
    assert_eq!(listed["results"][0]["name"], "do_work_0");
}

#[tokio::test]
async fn shutdown_closes_the_connection() {
    let tmp = TempDir::new().unwrap();
    let services = services(tmp.path());
    let mut client = Client::connect(&services);
    client.initialize().await;

    let response = client.request("shutdown", json!({})).await;
    assert!(response.get("result").is_some());
    let finished = tokio::time::timeout(std::time::Duration::from_secs(5), client.server)
        .await
        .unwrap();
    assert!(finished.unwrap().is_ok());
}

#[tokio::test]
async fn slow_calls_time_out_but_finish_in_the_background() {
    let tmp = TempDir::new().unwrap();
    let mut config = test_config(tmp.path());
    config.server.request_timeout_ms = 50;
    config.briefing.timeout_ms = 10_000;
    let completer = Arc::new(SlowCompleter::new(Duration::from_millis(1_000)));
    let services = Services::assemble(
        config,
        None,
        Some(completer.clone() as Arc<dyn CompletionProvider>),
    )
    .unwrap();
    let mut client = Client::connect(&services);
    client.initialize().await;

    let response = client.call("briefing", json!({})).await;
    assert_eq!(error_code(&response), -32001);
    assert_eq!(response["error"]["data"]["type"], "timeout");

    // the connection keeps serving while the completion is still running
    assert!(client.request("ping", json!({})).await.get("result").is_some());
    assert_eq!(completer.finished.load(Ordering::SeqCst), 0);

    tokio::time::timeout(Duration::from_secs(10), async {
        while completer.finished.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("completion never finished");
}
