//! WhatsApp Graph API client tests against a wiremock server.

use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use mello_phone_agent::whatsapp::{WhatsAppClient, WhatsAppError};

fn client(server: &MockServer) -> WhatsAppClient {
    WhatsAppClient::new("graph-token", "123").with_base_url(server.uri())
}

#[tokio::test]
async fn test_pre_accept_then_accept() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v23.0/123/calls"))
        .and(header("authorization", "Bearer graph-token"))
        .and(body_json(json!({
            "messaging_product": "whatsapp",
            "call_id": "wacid.1",
            "action": "pre_accept",
            "session": {"sdp_type": "answer", "sdp": "v=0\r\n"}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v23.0/123/calls"))
        .and(body_json(json!({
            "messaging_product": "whatsapp",
            "call_id": "wacid.1",
            "action": "accept",
            "session": {"sdp_type": "answer", "sdp": "v=0\r\n"}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server);
    client.pre_accept("wacid.1", "v=0\r\n").await.unwrap();
    assert!(client.active_calls().is_empty());

    client.accept("wacid.1", "v=0\r\n").await.unwrap();
    assert_eq!(client.active_calls(), vec!["wacid.1".to_string()]);
}

#[tokio::test]
async fn test_terminate_forgets_call() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v23.0/123/calls"))
        .respond_with(ResponseTemplate::new(200))
        .expect(2)
        .mount(&server)
        .await;

    let client = client(&server);
    client.accept("wacid.1", "v=0").await.unwrap();
    client.terminate("wacid.1").await.unwrap();

    assert!(client.active_calls().is_empty());
}

#[tokio::test]
async fn test_api_error_keeps_call_tracked() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v23.0/123/calls"))
        .and(body_json(json!({
            "messaging_product": "whatsapp",
            "call_id": "wacid.1",
            "action": "accept",
            "session": {"sdp_type": "answer", "sdp": "v=0"}
        })))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v23.0/123/calls"))
        .and(body_json(json!({
            "messaging_product": "whatsapp",
            "call_id": "wacid.1",
            "action": "terminate"
        })))
        .respond_with(
            ResponseTemplate::new(500).set_body_string(r#"{"error":{"message":"Try again"}}"#),
        )
        .mount(&server)
        .await;

    let client = client(&server);
    client.accept("wacid.1", "v=0").await.unwrap();

    let err = client.terminate("wacid.1").await.unwrap_err();
    match err {
        WhatsAppError::Api { status, body } => {
            assert_eq!(status, 500);
            assert!(body.contains("Try again"));
        }
        other => panic!("Expected Api error, got {other:?}"),
    }

    // A failed terminate leaves the call for the shutdown sweep
    assert_eq!(client.active_calls(), vec!["wacid.1".to_string()]);
}

#[tokio::test]
async fn test_terminate_all_calls_counts_successes() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v23.0/123/calls"))
        .and(body_json(json!({
            "messaging_product": "whatsapp",
            "call_id": "wacid.bad",
            "action": "terminate"
        })))
        .respond_with(ResponseTemplate::new(400))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v23.0/123/calls"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let client = client(&server);
    client.accept("wacid.good", "v=0").await.unwrap();
    client.accept("wacid.bad", "v=0").await.unwrap();

    assert_eq!(client.terminate_all_calls().await, 1);
    assert_eq!(client.active_calls(), vec!["wacid.bad".to_string()]);
}

#[tokio::test]
async fn test_custom_api_version() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v22.0/123/calls"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server).with_api_version("v22.0");
    client.terminate("wacid.1").await.unwrap();
}

#[tokio::test]
async fn test_unreachable_graph_api() {
    let client = WhatsAppClient::new("t", "123").with_base_url("http://127.0.0.1:9");
    let err = client.terminate("wacid.1").await.unwrap_err();
    assert!(matches!(err, WhatsAppError::Http(_)));
}
