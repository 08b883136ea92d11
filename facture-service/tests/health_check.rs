mod common;

use common::TestApp;

#[tokio::test]
async fn health_check_works() {
    let app = TestApp::spawn().await;

    let response = app
        .client
        .get(app.url("/health"))
        .send()
        .await
        .expect("Failed to execute request");

    assert!(response.status().is_success());

    let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "facture-service");
    assert_eq!(body["store"], "memory");
}

#[tokio::test]
async fn readiness_and_metrics_respond() {
    let app = TestApp::spawn().await;

    let ready = app.client.get(app.url("/ready")).send().await.unwrap();
    assert!(ready.status().is_success());

    let metrics = app.client.get(app.url("/metrics")).send().await.unwrap();
    assert!(metrics.status().is_success());
}

#[tokio::test]
async fn responses_carry_a_request_id() {
    let app = TestApp::spawn().await;

    let response = app
        .client
        .get(app.url("/health"))
        .header("x-request-id", "req-42")
        .send()
        .await
        .unwrap();

    assert_eq!(
        response.headers().get("x-request-id").unwrap(),
        "req-42"
    );
}
