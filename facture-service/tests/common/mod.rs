#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use facture_service::config::{
    ExportConfig, FactureConfig, MongoConfig, RendererConfig, StoreBackend,
};
use facture_service::models::{
    Address, ClientSnapshot, DeliveryDetails, Invoice, Order, OrderItem, OrderStatus,
};
use facture_service::rendering::{EngineError, PageOptions, RenderEngine};
use facture_service::services::{InMemoryStore, InvoiceStore, Stores};
use facture_service::{AppState, Application};
use rust_decimal::Decimal;
use service_core::config::Config as CoreConfig;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const PDF_MAGIC: &[u8] = b"%PDF-1.7\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// The engine rejects this one document.
    Render,
    /// The document does not become ready in time.
    Timeout,
    /// The engine cannot run at all.
    Unavailable,
}

/// Stand-in for the browser: returns a tiny fake PDF, or fails when the
/// document mentions one of the configured markers.
#[derive(Default)]
pub struct ScriptedEngine {
    failing: Mutex<Vec<(String, Failure)>>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl ScriptedEngine {
    pub fn fail_for(&self, marker: &str) {
        self.fail_with(marker, Failure::Render);
    }

    pub fn fail_with(&self, marker: &str, failure: Failure) {
        self.failing
            .lock()
            .unwrap()
            .push((marker.to_string(), failure));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RenderEngine for ScriptedEngine {
    async fn render_html_to_pdf(
        &self,
        html: &str,
        _css: &str,
        _page: &PageOptions,
    ) -> Result<Vec<u8>, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        tokio::time::sleep(Duration::from_millis(10)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let failure = self
            .failing
            .lock()
            .unwrap()
            .iter()
            .find(|(marker, _)| html.contains(&format!(" {}</h1>", marker)))
            .cloned();
        match failure {
            Some((marker, Failure::Render)) => Err(EngineError::Failed(format!(
                "scripted failure for {}",
                marker
            ))),
            Some((_, Failure::Timeout)) => Err(EngineError::Timeout(5)),
            Some((_, Failure::Unavailable)) => {
                Err(EngineError::Unavailable("browser crashed".to_string()))
            }
            None => {
                let mut bytes = PDF_MAGIC.to_vec();
                bytes.extend_from_slice(html.as_bytes());
                Ok(bytes)
            }
        }
    }
}

pub struct TestApp {
    pub address: String,
    pub port: u16,
    pub store: InMemoryStore,
    pub engine: Arc<ScriptedEngine>,
    pub client: reqwest::Client,
}

pub fn test_config() -> FactureConfig {
    FactureConfig {
        common: CoreConfig {
            port: 0, // Random port for testing
            ..CoreConfig::default()
        },
        store: StoreBackend::Memory,
        mongodb: MongoConfig {
            uri: "mongodb://localhost:27017".to_string(),
            database: "facture_test".to_string(),
        },
        export: ExportConfig {
            concurrency: 3,
            progress_grace_secs: 5,
            pending_ttl_secs: 5,
            heartbeat_secs: 1,
        },
        renderer: RendererConfig {
            binary: "chromium".to_string(),
            timeout_secs: 5,
            temp_dir: std::env::temp_dir(),
        },
    }
}

impl TestApp {
    pub async fn spawn() -> Self {
        let store = InMemoryStore::new();
        let stores = Stores::from_backend(store.clone());
        Self::spawn_with_stores(store, stores).await
    }

    /// Spawn against `stores`, which may swap some seams of `store` for
    /// doubles.
    pub async fn spawn_with_stores(store: InMemoryStore, stores: Stores) -> Self {
        let engine = Arc::new(ScriptedEngine::default());
        let state = AppState::new(test_config(), stores, None, engine.clone());

        let app = Application::build_with_state(state)
            .await
            .expect("Failed to build test application");
        let port = app.port();
        let address = format!("http://127.0.0.1:{}", port);

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        // Wait for HTTP server to be ready by polling health endpoint
        let client = reqwest::Client::new();
        let health_url = format!("{}/health", address);
        for _ in 0..50 {
            if client.get(&health_url).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        TestApp {
            address,
            port,
            store,
            engine,
            client,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.address, path)
    }

    /// Save an order the way the order collaborator would.
    pub async fn seed_order(&self, reference: &str, status: OrderStatus) -> Order {
        let mut order = sample_order(reference);
        order.order_status = status;
        self.store.put_order(order.clone()).await;
        order
    }

    pub async fn create_invoice(&self, order_id: &str) -> reqwest::Response {
        self.client
            .post(self.url(&format!("/orders/{}/invoice", order_id)))
            .send()
            .await
            .expect("Failed to execute request")
    }

    /// Store an invoice with explicit numbering, bypassing the allocator,
    /// and keep the year's counter in step.
    pub async fn seed_invoice(&self, order_reference: &str, year: i32, seq: i64) -> Invoice {
        let mut order = self.seed_order(order_reference, OrderStatus::Delivered).await;
        let issued_at: DateTime<Utc> = Utc
            .with_ymd_and_hms(year, 3, 1, 9, 0, 0)
            .unwrap()
            + chrono::Duration::minutes(seq);
        let invoice = Invoice::issue(&order, seq, issued_at);
        self.store.insert_invoice(&invoice).await.unwrap();

        order.has_invoice = true;
        self.store.put_order(order).await;

        let current = self.store.counter(year).await.unwrap_or(0);
        self.store.set_counter(year, current.max(seq)).await;
        invoice
    }
}

pub fn sample_order(reference: &str) -> Order {
    let mut order = Order::new(
        reference.to_string(),
        ClientSnapshot {
            client_id: "client-1".to_string(),
            first_name: "Ada".to_string(),
            last_name: "Martin".to_string(),
            email: "ada@example.com".to_string(),
            phone: Some("+33 6 00 00 00 00".to_string()),
        },
        vec![OrderItem {
            product_id: "p1".to_string(),
            reference: "SKU-1".to_string(),
            name: "Desk lamp".to_string(),
            quantity: 2,
            price: Decimal::new(2500, 2),
            tax_rate: Decimal::from(20),
            discount: Decimal::ZERO,
        }],
        "colissimo".to_string(),
        "card".to_string(),
    );
    order.delivery = Some(DeliveryDetails {
        recipient: "Ada Martin".to_string(),
        address: Address {
            line1: "1 rue de la Paix".to_string(),
            line2: None,
            postal_code: "75002".to_string(),
            city: "Paris".to_string(),
            country: "France".to_string(),
        },
    });
    order.shipping_cost = Decimal::new(490, 2);
    order
}

/// `data` payloads of the `progress` events in a finished SSE body.
pub fn progress_events(body: &str) -> Vec<serde_json::Value> {
    let mut events = Vec::new();
    let mut current = None;
    for line in body.lines() {
        if let Some(name) = line.strip_prefix("event:") {
            current = Some(name.trim().to_string());
        } else if let Some(data) = line.strip_prefix("data:") {
            if current.as_deref() == Some("progress") {
                events.push(serde_json::from_str(data.trim()).expect("progress data is JSON"));
            }
        } else if line.is_empty() {
            current = None;
        }
    }
    events
}
