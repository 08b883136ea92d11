mod common;

use chrono::{Datelike, Utc};
use common::{TestApp, PDF_MAGIC};
use facture_service::models::OrderStatus;
use facture_service::services::OrderStore;
use reqwest::StatusCode;
use serde_json::Value;

#[tokio::test]
async fn ineligible_order_is_rejected_until_delivered() {
    let app = TestApp::spawn().await;
    let mut order = app.seed_order("ORDER-ab12", OrderStatus::Processing).await;

    let response = app.create_invoice(&order.id).await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(app.store.invoice_count().await, 0);

    order.order_status = OrderStatus::Delivered;
    app.store.put_order(order.clone()).await;

    let response = app.create_invoice(&order.id).await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let body: Value = response.json().await.unwrap();
    let year = Utc::now().year();
    assert_eq!(body["created"], true);
    assert_eq!(body["invoice"]["seq"], 1);
    assert_eq!(body["invoice"]["year"], year);
    assert_eq!(body["invoice"]["reference"], format!("FC-1-{}", year));
    assert_eq!(body["invoice"]["status"], "paid");
    assert_eq!(body["invoice"]["order_reference"], "ORDER-ab12");
    assert!(body["invoice"]["paid_at"].is_string());

    let stored = app.store.find_order(&order.id).await.unwrap().unwrap();
    assert!(stored.has_invoice);
}

#[tokio::test]
async fn pickup_orders_are_eligible() {
    let app = TestApp::spawn().await;
    let order = app.seed_order("ORDER-pk01", OrderStatus::Pickup).await;

    let response = app.create_invoice(&order.id).await;
    assert_eq!(response.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn creating_twice_returns_the_same_invoice() {
    let app = TestApp::spawn().await;
    let order = app.seed_order("ORDER-twice", OrderStatus::Delivered).await;

    let first: Value = app.create_invoice(&order.id).await.json().await.unwrap();

    let response = app.create_invoice(&order.id).await;
    assert_eq!(response.status(), StatusCode::OK);
    let second: Value = response.json().await.unwrap();

    assert_eq!(second["created"], false);
    assert_eq!(first["invoice"]["id"], second["invoice"]["id"]);
    assert_eq!(first["invoice"]["reference"], second["invoice"]["reference"]);
    assert_eq!(app.store.invoice_count().await, 1);
}

#[tokio::test]
async fn concurrent_creation_yields_dense_sequence() {
    let app = TestApp::spawn().await;
    let mut orders = Vec::new();
    for i in 0..20 {
        orders.push(
            app.seed_order(&format!("ORDER-{:03}", i), OrderStatus::Delivered)
                .await,
        );
    }

    let responses = futures::future::join_all(
        orders.iter().map(|order| app.create_invoice(&order.id)),
    )
    .await;

    let mut seqs = Vec::new();
    for response in responses {
        assert_eq!(response.status(), StatusCode::CREATED);
        let body: Value = response.json().await.unwrap();
        seqs.push(body["invoice"]["seq"].as_i64().unwrap());
    }
    seqs.sort_unstable();

    assert_eq!(seqs, (1..=20).collect::<Vec<i64>>());
    assert_eq!(app.store.counter(Utc::now().year()).await, Some(20));
}

#[tokio::test]
async fn racing_creation_for_one_order_stores_one_invoice() {
    let app = TestApp::spawn().await;
    let order = app.seed_order("ORDER-race", OrderStatus::Delivered).await;

    let responses =
        futures::future::join_all((0..8).map(|_| app.create_invoice(&order.id))).await;

    let mut ids = Vec::new();
    for response in responses {
        assert!(response.status().is_success());
        let body: Value = response.json().await.unwrap();
        ids.push(body["invoice"]["id"].as_str().unwrap().to_string());
    }
    ids.dedup();

    assert_eq!(ids.len(), 1);
    assert_eq!(app.store.invoice_count().await, 1);

    // The losers' seqs went back to the counter.
    let year = Utc::now().year();
    assert_eq!(app.store.counter(year).await, Some(1));

    let next = app.seed_order("ORDER-after-race", OrderStatus::Delivered).await;
    let body: Value = app.create_invoice(&next.id).await.json().await.unwrap();
    assert_eq!(body["invoice"]["seq"], 2);
}

#[tokio::test]
async fn unknown_order_is_not_found() {
    let app = TestApp::spawn().await;

    let response = app.create_invoice("missing-order").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn invoices_can_be_listed_fetched_and_cancelled() {
    let app = TestApp::spawn().await;
    let a = app.seed_order("ORDER-a", OrderStatus::Delivered).await;
    let b = app.seed_order("ORDER-b", OrderStatus::Delivered).await;
    app.create_invoice(&a.id).await;
    let created: Value = app.create_invoice(&b.id).await.json().await.unwrap();
    let invoice_id = created["invoice"]["id"].as_str().unwrap().to_string();

    let listed: Value = app
        .client
        .get(app.url("/invoices"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed["total"], 2);

    let fetched: Value = app
        .client
        .get(app.url(&format!("/invoices/{}", invoice_id)))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(fetched["order_reference"], "ORDER-b");

    for _ in 0..2 {
        let response = app
            .client
            .post(app.url(&format!("/invoices/{}/cancel", invoice_id)))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["status"], "cancelled");
        assert!(body["cancelled_at"].is_string());
    }

    let cancelled: Value = app
        .client
        .get(app.url("/invoices?status=cancelled"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(cancelled["total"], 1);
    assert_eq!(cancelled["invoices"][0]["id"], invoice_id.as_str());

    let missing = app
        .client
        .get(app.url("/invoices/does-not-exist"))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn invalid_listing_filters_are_rejected() {
    let app = TestApp::spawn().await;

    for query in ["month=2025-13", "status=draft", "from=2025-05-01&to=2025-04-01"] {
        let response = app
            .client
            .get(app.url(&format!("/invoices?{}", query)))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "query: {}", query);
    }
}

#[tokio::test]
async fn single_document_download() {
    let app = TestApp::spawn().await;
    let order = app.seed_order("ORDER-pdf", OrderStatus::Delivered).await;
    let created: Value = app.create_invoice(&order.id).await.json().await.unwrap();
    let reference = created["invoice"]["reference"].as_str().unwrap().to_string();

    let response = app
        .client
        .get(app.url(&format!(
            "/invoices/by-reference/{}/pdf?doc_type=bl",
            reference
        )))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "application/pdf"
    );
    let disposition = response
        .headers()
        .get("content-disposition")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(disposition.contains(&format!("BL-{}.pdf", reference)));

    let bytes = response.bytes().await.unwrap();
    assert!(bytes.starts_with(PDF_MAGIC));

    let missing = app
        .client
        .get(app.url("/invoices/by-reference/FC-999-1999/pdf"))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn engine_failure_on_single_download_is_bad_gateway() {
    let app = TestApp::spawn().await;
    let order = app.seed_order("ORDER-fail", OrderStatus::Delivered).await;
    let created: Value = app.create_invoice(&order.id).await.json().await.unwrap();
    let reference = created["invoice"]["reference"].as_str().unwrap().to_string();
    app.engine.fail_for(&reference);

    let response = app
        .client
        .get(app.url(&format!("/invoices/by-reference/{}/pdf", reference)))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}
