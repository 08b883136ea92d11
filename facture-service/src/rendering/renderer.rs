use crate::error::FactureError;
use crate::models::{Invoice, Order};
use crate::rendering::engine::{EngineError, PageOptions, RenderEngine};
use crate::rendering::template::{DocType, DocumentModel, TemplateGenerator};
use crate::services::store::{InvoiceStore, OrderStore, PartyDirectory};
use std::sync::Arc;
use std::time::Instant;
use tracing::instrument;

/// Turns one invoice into one PDF.
#[derive(Clone)]
pub struct DocumentRenderer {
    invoices: Arc<dyn InvoiceStore>,
    orders: Arc<dyn OrderStore>,
    directory: Arc<dyn PartyDirectory>,
    template: Arc<dyn TemplateGenerator>,
    engine: Arc<dyn RenderEngine>,
    page: PageOptions,
}

impl DocumentRenderer {
    pub fn new(
        invoices: Arc<dyn InvoiceStore>,
        orders: Arc<dyn OrderStore>,
        directory: Arc<dyn PartyDirectory>,
        template: Arc<dyn TemplateGenerator>,
        engine: Arc<dyn RenderEngine>,
    ) -> Self {
        Self {
            invoices,
            orders,
            directory,
            template,
            engine,
            page: PageOptions::a4(),
        }
    }

    /// Render the invoice known by `reference`.
    ///
    /// Missing data and engine errors come back as `RenderFailed` so a batch
    /// can skip the item. Store outages and an engine that cannot start at all
    /// are returned as they are.
    #[instrument(skip(self))]
    pub async fn render(&self, reference: &str, doc_type: DocType) -> Result<Vec<u8>, FactureError> {
        let started = Instant::now();
        let result = self.render_inner(reference, doc_type).await;

        metrics::histogram!("facture_render_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        if let Err(e) = &result {
            tracing::warn!(reference = %reference, error = %e, "Document rendering failed");
            metrics::counter!("facture_render_failures_total").increment(1);
        }

        result
    }

    async fn render_inner(
        &self,
        reference: &str,
        doc_type: DocType,
    ) -> Result<Vec<u8>, FactureError> {
        let invoice = self
            .invoices
            .find_invoice_by_reference(reference)
            .await?
            .ok_or_else(|| FactureError::render_failed(reference, "invoice not found"))?;

        let order = self
            .resolve_order(&invoice)
            .await?
            .ok_or_else(|| FactureError::render_failed(reference, "originating order not found"))?;

        let company = self.directory.company().await?;
        let client = self
            .directory
            .client(&invoice.snapshot.client.client_id)
            .await?;

        let model = DocumentModel::build(&invoice, &order, &company, client.as_ref(), doc_type);
        let rendered = self.template.generate(&model);

        self.engine
            .render_html_to_pdf(&rendered.html, &rendered.css, &self.page)
            .await
            .map_err(|e| match e {
                EngineError::Unavailable(msg) => FactureError::RenderEngineUnavailable(msg),
                other => FactureError::render_failed(reference, other),
            })
    }

    /// By the order reference held on the invoice, then by the stored order id.
    async fn resolve_order(&self, invoice: &Invoice) -> Result<Option<Order>, FactureError> {
        if let Some(order) = self
            .orders
            .find_order_by_reference(&invoice.order_reference)
            .await?
        {
            return Ok(Some(order));
        }
        self.orders.find_order(&invoice.order).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ClientSnapshot, OrderStatus};
    use crate::rendering::template::HtmlTemplate;
    use crate::services::memory::InMemoryStore;
    use async_trait::async_trait;
    use chrono::Utc;

    struct EchoEngine;

    #[async_trait]
    impl RenderEngine for EchoEngine {
        async fn render_html_to_pdf(
            &self,
            html: &str,
            _css: &str,
            _page: &PageOptions,
        ) -> Result<Vec<u8>, EngineError> {
            Ok(html.as_bytes().to_vec())
        }
    }

    struct DeadEngine;

    #[async_trait]
    impl RenderEngine for DeadEngine {
        async fn render_html_to_pdf(
            &self,
            _html: &str,
            _css: &str,
            _page: &PageOptions,
        ) -> Result<Vec<u8>, EngineError> {
            Err(EngineError::Unavailable("no browser".into()))
        }
    }

    fn renderer(store: &InMemoryStore, engine: Arc<dyn RenderEngine>) -> DocumentRenderer {
        DocumentRenderer::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(HtmlTemplate),
            engine,
        )
    }

    async fn seed(store: &InMemoryStore, order_reference: &str) -> Invoice {
        let mut order = Order::new(
            "ORDER-1".into(),
            ClientSnapshot {
                client_id: "c1".into(),
                first_name: "Ada".into(),
                last_name: "Martin".into(),
                email: "ada@example.com".into(),
                phone: None,
            },
            vec![],
            "colissimo".into(),
            "card".into(),
        );
        order.order_status = OrderStatus::Delivered;
        let mut invoice = Invoice::issue(&order, 1, Utc::now());
        invoice.order_reference = order_reference.to_string();
        store.put_order(order).await;
        store.insert_invoice(&invoice).await.unwrap();
        invoice
    }

    #[tokio::test]
    async fn test_falls_back_to_order_id() {
        let store = InMemoryStore::new();
        let invoice = seed(&store, "ORDER-renamed").await;

        let bytes = renderer(&store, Arc::new(EchoEngine))
            .render(&invoice.reference, DocType::Facture)
            .await
            .unwrap();
        assert!(String::from_utf8(bytes).unwrap().contains("ORDER-1"));
    }

    #[tokio::test]
    async fn test_unknown_reference_is_per_item_failure() {
        let store = InMemoryStore::new();
        let err = renderer(&store, Arc::new(EchoEngine))
            .render("FC-99-2025", DocType::Facture)
            .await
            .unwrap_err();
        assert!(matches!(err, FactureError::RenderFailed { .. }));
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn test_unavailable_engine_is_fatal() {
        let store = InMemoryStore::new();
        let invoice = seed(&store, "ORDER-1").await;
        let err = renderer(&store, Arc::new(DeadEngine))
            .render(&invoice.reference, DocType::Bl)
            .await
            .unwrap_err();
        assert!(err.is_fatal());
    }
}
