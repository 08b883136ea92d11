mod common;

use async_trait::async_trait;
use common::TestApp;
use facture_service::error::FactureError;
use facture_service::models::{Invoice, InvoiceSnapshot, OrderStatus};
use facture_service::services::{
    AppliedDeletion, DeletionPlan, InMemoryStore, InvoiceFilter, InvoiceStore, OrderStore, Stores,
};
use reqwest::StatusCode;
use serde_json::Value;
use std::sync::Arc;

/// Invoice store whose backend is down.
struct UnreachableInvoices;

fn outage() -> FactureError {
    FactureError::StoreUnavailable(anyhow::anyhow!("connection reset by peer"))
}

#[async_trait]
impl InvoiceStore for UnreachableInvoices {
    async fn find_invoice(&self, _id: &str) -> Result<Option<Invoice>, FactureError> {
        Err(outage())
    }

    async fn find_invoice_by_order(
        &self,
        _order_id: &str,
    ) -> Result<Option<Invoice>, FactureError> {
        Err(outage())
    }

    async fn find_invoice_by_reference(
        &self,
        _reference: &str,
    ) -> Result<Option<Invoice>, FactureError> {
        Err(outage())
    }

    async fn find_invoices(&self, _ids: &[String]) -> Result<Vec<Invoice>, FactureError> {
        Err(outage())
    }

    async fn list_invoices(&self, _filter: &InvoiceFilter) -> Result<Vec<Invoice>, FactureError> {
        Err(outage())
    }

    async fn insert_invoice(&self, _invoice: &Invoice) -> Result<(), FactureError> {
        Err(outage())
    }

    async fn replace_snapshot(
        &self,
        _invoice_id: &str,
        _snapshot: &InvoiceSnapshot,
    ) -> Result<bool, FactureError> {
        Err(outage())
    }

    async fn cancel_invoice(&self, _invoice_id: &str) -> Result<Option<Invoice>, FactureError> {
        Err(outage())
    }

    async fn apply_deletion(
        &self,
        _plan: &DeletionPlan,
    ) -> Result<AppliedDeletion, FactureError> {
        Err(outage())
    }
}

async fn notify(app: &TestApp, order_id: &str) -> reqwest::Response {
    app.client
        .post(app.url(&format!("/hooks/orders/{}/saved", order_id)))
        .send()
        .await
        .expect("Failed to execute request")
}

async fn fetch_invoice(app: &TestApp, invoice_id: &str) -> Value {
    app.client
        .get(app.url(&format!("/invoices/{}", invoice_id)))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap()
}

#[tokio::test]
async fn order_edit_is_copied_into_the_invoice() {
    let app = TestApp::spawn().await;
    let order = app.seed_order("ORDER-sync", OrderStatus::Delivered).await;
    let created: Value = app.create_invoice(&order.id).await.json().await.unwrap();
    let invoice_id = created["invoice"]["id"].as_str().unwrap().to_string();

    let mut edited = app.store.find_order(&order.id).await.unwrap().unwrap();
    edited.items[0].quantity = 3;
    app.store.put_order(edited).await;

    let response = notify(&app, &order.id).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["outcome"], "updated");

    let invoice = fetch_invoice(&app, &invoice_id).await;
    assert_eq!(invoice["snapshot"]["items"][0]["quantity"], 3);
    assert_eq!(invoice["seq"], created["invoice"]["seq"]);
    assert_eq!(invoice["reference"], created["invoice"]["reference"]);

    let body: Value = notify(&app, &order.id).await.json().await.unwrap();
    assert_eq!(body["outcome"], "unchanged");
}

#[tokio::test]
async fn cancelled_invoice_is_frozen() {
    let app = TestApp::spawn().await;
    let order = app.seed_order("ORDER-frozen", OrderStatus::Delivered).await;
    let created: Value = app.create_invoice(&order.id).await.json().await.unwrap();
    let invoice_id = created["invoice"]["id"].as_str().unwrap().to_string();

    let response = app
        .client
        .post(app.url(&format!("/invoices/{}/cancel", invoice_id)))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let mut edited = app.store.find_order(&order.id).await.unwrap().unwrap();
    edited.items[0].quantity = 7;
    app.store.put_order(edited).await;

    let body: Value = notify(&app, &order.id).await.json().await.unwrap();
    assert_eq!(body["outcome"], "frozen");

    let invoice = fetch_invoice(&app, &invoice_id).await;
    assert_eq!(invoice["status"], "cancelled");
    assert_eq!(
        invoice["snapshot"]["items"][0]["quantity"],
        created["invoice"]["snapshot"]["items"][0]["quantity"]
    );
}

#[tokio::test]
async fn order_without_invoice_is_ignored() {
    let app = TestApp::spawn().await;
    let order = app.seed_order("ORDER-plain", OrderStatus::Processing).await;

    let body: Value = notify(&app, &order.id).await.json().await.unwrap();
    assert_eq!(body["outcome"], "not_invoiced");
    assert_eq!(app.store.invoice_count().await, 0);
}

#[tokio::test]
async fn unknown_order_on_hook_is_not_found() {
    let app = TestApp::spawn().await;

    let response = notify(&app, "no-such-order").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn invoiced_order_without_invoice_yet() {
    let app = TestApp::spawn().await;
    let mut order = app.seed_order("ORDER-early", OrderStatus::Delivered).await;
    order.has_invoice = true;
    app.store.put_order(order.clone()).await;

    let response = notify(&app, &order.id).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["outcome"], "no_invoice");
    assert_eq!(app.store.invoice_count().await, 0);
}

#[tokio::test]
async fn store_outage_during_sync_does_not_fail_the_hook() {
    let store = InMemoryStore::new();
    let stores = Stores {
        invoices: Arc::new(UnreachableInvoices),
        orders: Arc::new(store.clone()),
        counters: Arc::new(store.clone()),
        directory: Arc::new(store.clone()),
    };
    let app = TestApp::spawn_with_stores(store, stores).await;

    let mut order = app.seed_order("ORDER-outage", OrderStatus::Delivered).await;
    order.has_invoice = true;
    app.store.put_order(order.clone()).await;

    let response = notify(&app, &order.id).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["order_id"], order.id.as_str());
    assert_eq!(body["outcome"], "error");
}
