mod common;

use posthog_driver::{CaptureEvent, DriverError, FlagValue, PostHogClient};
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{PROJECT_KEY, client, config};

#[tokio::test]
async fn test_capture_event_sends_project_key() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/i/v0/e/"))
        .and(body_partial_json(json!({
            "api_key": PROJECT_KEY,
            "event": "User Signup",
            "distinct_id": "user_123",
            "properties": {"plan": "pro"}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": 1})))
        .expect(1)
        .mount(&server)
        .await;

    let ack = client(&server)
        .capture_event(CaptureEvent::new("User Signup", "user_123").with_property("plan", "pro"))
        .await
        .unwrap();
    assert!(ack.is_ok());
}

#[tokio::test]
async fn test_capture_without_project_key_makes_no_request() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let client = PostHogClient::new(config(&server, false)).unwrap();

    let err = client
        .capture_event(CaptureEvent::new("Page View", "user_1"))
        .await
        .unwrap_err();
    assert!(matches!(err, DriverError::Authentication { status: None, .. }));

    let err = client
        .capture_batch(vec![CaptureEvent::new("Page View", "user_1")])
        .await
        .unwrap_err();
    assert!(matches!(err, DriverError::Authentication { .. }));
}

#[tokio::test]
async fn test_invalid_events_fail_before_credentials() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let client = PostHogClient::new(config(&server, false)).unwrap();

    match client.capture_batch(Vec::new()).await {
        Err(DriverError::Validation { field, .. }) => assert_eq!(field, "events"),
        other => panic!("expected validation error, got {other:?}")
    }
    match client.capture_event(CaptureEvent::new("", "user_1")).await {
        Err(DriverError::Validation { field, .. }) => assert_eq!(field, "event"),
        other => panic!("expected validation error, got {other:?}")
    }
}

#[tokio::test]
async fn test_capture_batch() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/batch/"))
        .and(body_partial_json(json!({
            "api_key": PROJECT_KEY,
            "batch": [
                {"event": "Page View", "distinct_id": "user_1"},
                {"event": "Button Click", "distinct_id": "user_1"}
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "Ok"})))
        .expect(1)
        .mount(&server)
        .await;

    let ack = client(&server)
        .capture_batch(vec![
            CaptureEvent::new("Page View", "user_1").with_property("page", "/home"),
            CaptureEvent::new("Button Click", "user_1").with_property("button", "signup"),
        ])
        .await
        .unwrap();
    assert!(ack.is_ok());
}

#[tokio::test]
async fn test_capture_requires_json_ack() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/i/v0/e/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
        .mount(&server)
        .await;

    let err = client(&server)
        .capture_event(CaptureEvent::new("Page View", "user_1"))
        .await
        .unwrap_err();
    assert!(matches!(err, DriverError::Decode(_)));
}

#[tokio::test]
async fn test_evaluate_feature_flag() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/flags/"))
        .and(query_param("v", "2"))
        .and(body_partial_json(json!({"api_key": PROJECT_KEY, "distinct_id": "user_1"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "flags": {
                "new-onboarding": {"key": "new-onboarding", "enabled": true, "variant": "test"}
            }
        })))
        .expect(2)
        .mount(&server)
        .await;

    let client = client(&server);
    let value = client
        .evaluate_feature_flag("new-onboarding", "user_1", None)
        .await
        .unwrap();
    assert_eq!(value, FlagValue::Variant("test".to_string()));

    let missing = client
        .evaluate_feature_flag("unknown-flag", "user_1", None)
        .await
        .unwrap();
    assert_eq!(missing, FlagValue::Enabled(false));
}
