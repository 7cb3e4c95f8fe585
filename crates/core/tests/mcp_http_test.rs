use axum::{
    body::Body,
    http::{header, Request, StatusCode},
};
use querygate_core::config::AppConfig;
use querygate_core::test_utils::create_test_app_state;
use serde_json::{json, Value};
use tower::ServiceExt;

fn rpc(body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/mcp")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn tool_call(id: i64, name: &str, arguments: Value) -> Request<Body> {
    rpc(json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": "tools/call",
        "params": {"name": name, "arguments": arguments}
    }))
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_initialize_and_list_tools() {
    let (state, _executor) = create_test_app_state(AppConfig::default());
    let app = querygate_core::build_router(state);

    let response = app
        .clone()
        .oneshot(rpc(json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["result"]["serverInfo"]["name"], "querygate");

    let response = app
        .oneshot(rpc(json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"})))
        .await
        .unwrap();
    let body = json_body(response).await;
    let names: Vec<&str> = body["result"]["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    assert_eq!(
        names,
        vec!["query", "connections", "schemas", "tables", "columns", "confirm", "pending"]
    );
}

#[tokio::test]
async fn test_notification_is_accepted_without_body() {
    let (state, _executor) = create_test_app_state(AppConfig::default());
    let app = querygate_core::build_router(state);

    let response = app
        .oneshot(rpc(json!({"jsonrpc": "2.0", "method": "notifications/initialized"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
}

#[tokio::test]
async fn test_empty_body_is_rejected() {
    let (state, _executor) = create_test_app_state(AppConfig::default());
    let app = querygate_core::build_router(state);

    let request = Request::builder()
        .method("POST")
        .uri("/mcp")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["status"], "error");
    assert_eq!(body["error"]["type"], "invalid_input");
}

#[tokio::test]
async fn test_confirmation_round_trip_over_http() {
    let (state, executor) = create_test_app_state(AppConfig::default());
    let app = querygate_core::build_router(state);

    let response = app
        .clone()
        .oneshot(tool_call(
            1,
            "query",
            json!({"query": "INSERT INTO audit (note) VALUES (?)", "params": ["hello"]}),
        ))
        .await
        .unwrap();
    let body = json_body(response).await;
    let output = &body["result"]["structuredContent"];
    assert_eq!(output["confirmation_required"], true);
    assert_eq!(output["confirmation_query"], "INSERT INTO audit (note) VALUES (?)");
    assert!(output["warning"].as_str().unwrap().contains("5 minutes"));
    let token = output["confirmation_token"].as_str().unwrap().to_string();
    assert!(executor.calls().is_empty());

    let response = app
        .clone()
        .oneshot(tool_call(2, "pending", json!({})))
        .await
        .unwrap();
    let body = json_body(response).await;
    let pending = body["result"]["structuredContent"]["pending"].as_array().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0]["token"], token.as_str());

    let response = app
        .clone()
        .oneshot(tool_call(3, "confirm", json!({"token": token.clone()})))
        .await
        .unwrap();
    let body = json_body(response).await;
    assert_eq!(body["result"]["isError"], false);
    let text = body["result"]["content"][0]["text"].as_str().unwrap();
    assert!(text.contains("untrusted"));
    assert_eq!(executor.calls(), vec!["INSERT INTO audit (note) VALUES (?)"]);

    let response = app
        .oneshot(tool_call(4, "confirm", json!({"token": token})))
        .await
        .unwrap();
    let body = json_body(response).await;
    assert_eq!(body["result"]["isError"], true);
    assert_eq!(
        body["result"]["structuredContent"]["error_category"],
        "token_not_found"
    );
}

#[tokio::test]
async fn test_invalid_tool_arguments() {
    let (state, executor) = create_test_app_state(AppConfig::default());
    let app = querygate_core::build_router(state);

    let response = app
        .clone()
        .oneshot(tool_call(1, "query", json!({"query": "   "})))
        .await
        .unwrap();
    let body = json_body(response).await;
    assert_eq!(body["result"]["isError"], true);
    assert_eq!(
        body["result"]["structuredContent"]["error"],
        "query is required"
    );

    let response = app
        .oneshot(tool_call(2, "confirm", json!({"token": "not-a-uuid"})))
        .await
        .unwrap();
    let body = json_body(response).await;
    assert_eq!(body["result"]["isError"], true);
    assert!(body["result"]["structuredContent"]["error"]
        .as_str()
        .unwrap()
        .contains("not a valid confirmation token"));
    assert!(executor.calls().is_empty());
}

#[tokio::test]
async fn test_connections_hide_credentials() {
    let (state, _executor) = create_test_app_state(AppConfig::default());
    let app = querygate_core::build_router(state);

    let response = app
        .oneshot(tool_call(1, "connections", json!({})))
        .await
        .unwrap();
    let body = json_body(response).await;
    let connections = body["result"]["structuredContent"]["connections"]
        .as_array()
        .unwrap();
    assert_eq!(connections.len(), 1);
    assert_eq!(connections[0]["name"], "main");
    assert_eq!(connections[0]["type"], "Sqlite");
    assert_eq!(connections[0]["executable"], true);
    assert!(connections[0].get("password").is_none());
}

#[tokio::test]
async fn test_read_only_server_hides_confirmation_tools() {
    let config = AppConfig {
        read_only: true,
        ..AppConfig::default()
    };
    let (state, _executor) = create_test_app_state(config);
    let app = querygate_core::build_router(state);

    let response = app
        .clone()
        .oneshot(rpc(json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"})))
        .await
        .unwrap();
    let body = json_body(response).await;
    assert_eq!(body["result"]["tools"].as_array().unwrap().len(), 5);

    let response = app
        .oneshot(tool_call(2, "query", json!({"query": "UPDATE t SET a = 1"})))
        .await
        .unwrap();
    let body = json_body(response).await;
    assert_eq!(body["result"]["isError"], true);
    assert_eq!(
        body["result"]["structuredContent"]["error_category"],
        "write_not_allowed"
    );
}
