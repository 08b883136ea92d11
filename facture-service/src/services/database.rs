//! MongoDB backend.

use crate::error::FactureError;
use crate::models::invoice::REFERENCE_PREFIX;
use crate::models::{
    ClientProfile, CompanyProfile, Invoice, InvoiceSnapshot, InvoiceStatus, Order, OrderStatus,
    SequenceCounter,
};
use crate::services::renumbering::YearRenumbering;
use crate::services::store::{
    AppliedDeletion, CounterStore, DeletionPlan, InvoiceFilter, InvoiceStore, IssueFn,
    OrderStore, PartyDirectory,
};
use async_trait::async_trait;
use backoff::future::retry;
use backoff::ExponentialBackoff;
use futures::TryStreamExt;
use mongodb::{
    bson::{self, doc, Document},
    error::{TRANSIENT_TRANSACTION_ERROR, UNKNOWN_TRANSACTION_COMMIT_RESULT},
    options::{
        FindOneAndUpdateOptions, FindOneOptions, FindOptions, Hint, IndexOptions,
        ReturnDocument, UpdateOptions,
    },
    Client as MongoClient, ClientSession, Collection, Database, IndexModel,
};
use service_core::error::AppError;
use std::time::Duration;
use tracing::instrument;

const YEAR_SEQ_INDEX: &str = "year_seq_unique";
const COMMIT_ATTEMPTS: usize = 3;

type TxResult<T> = Result<T, backoff::Error<FactureError>>;

/// Two first-of-year upserts can collide on `_id`.
fn upsert_backoff() -> ExponentialBackoff {
    ExponentialBackoff {
        initial_interval: Duration::from_millis(10),
        max_elapsed_time: Some(Duration::from_secs(2)),
        ..Default::default()
    }
}

/// Write conflicts between transactions touching the same counter.
fn transaction_backoff() -> ExponentialBackoff {
    ExponentialBackoff {
        initial_interval: Duration::from_millis(10),
        max_elapsed_time: Some(Duration::from_secs(5)),
        ..Default::default()
    }
}

fn retry_on_duplicate(err: mongodb::error::Error) -> backoff::Error<FactureError> {
    match FactureError::from(err) {
        err @ FactureError::DuplicateKey(_) => backoff::Error::transient(err),
        err => backoff::Error::permanent(err),
    }
}

/// A transaction labelled transient is run again from the start.
fn retry_on_transient(err: mongodb::error::Error) -> backoff::Error<FactureError> {
    if err.contains_label(TRANSIENT_TRANSACTION_ERROR) {
        tracing::debug!(error = %err, "Transient transaction error, retrying");
        backoff::Error::transient(FactureError::from(err))
    } else {
        backoff::Error::permanent(FactureError::from(err))
    }
}

async fn commit(session: &mut ClientSession) -> Result<(), mongodb::error::Error> {
    let mut attempts = 1;
    loop {
        match session.commit_transaction().await {
            Err(e)
                if e.contains_label(UNKNOWN_TRANSACTION_COMMIT_RESULT)
                    && attempts < COMMIT_ATTEMPTS =>
            {
                attempts += 1;
                tracing::warn!(error = %e, "Commit result unknown, retrying commit");
            }
            result => return result,
        }
    }
}

async fn abort(session: &mut ClientSession) {
    if let Err(e) = session.abort_transaction().await {
        tracing::warn!(error = %e, "Failed to abort transaction");
    }
}

#[derive(Clone)]
pub struct MongoDb {
    client: MongoClient,
    db: Database,
}

impl MongoDb {
    pub async fn connect(uri: &str, database: &str) -> Result<Self, AppError> {
        tracing::info!(database = %database, "Connecting to MongoDB");
        let client = MongoClient::with_uri_str(uri).await.map_err(|e| {
            tracing::error!("Failed to connect to MongoDB: {}", e);
            AppError::from(e)
        })?;
        let db = client.database(database);
        tracing::info!(database = %database, "Successfully connected to MongoDB database");
        Ok(Self { client, db })
    }

    pub async fn initialize_indexes(&self) -> Result<(), AppError> {
        tracing::info!("Creating MongoDB indexes for facture-service");

        let invoices = self.invoices();
        let indexes = vec![
            // Race-breaker for concurrent creation from the same order
            IndexModel::builder()
                .keys(doc! { "order": 1 })
                .options(
                    IndexOptions::builder()
                        .name("order_unique".to_string())
                        .unique(true)
                        .build(),
                )
                .build(),
            IndexModel::builder()
                .keys(doc! { "year": 1, "seq": 1 })
                .options(
                    IndexOptions::builder()
                        .name(YEAR_SEQ_INDEX.to_string())
                        .unique(true)
                        .build(),
                )
                .build(),
            IndexModel::builder()
                .keys(doc! { "reference": 1 })
                .options(
                    IndexOptions::builder()
                        .name("reference_unique".to_string())
                        .unique(true)
                        .build(),
                )
                .build(),
            IndexModel::builder()
                .keys(doc! { "issued_at": 1 })
                .options(
                    IndexOptions::builder()
                        .name("issued_at_lookup".to_string())
                        .build(),
                )
                .build(),
        ];

        invoices.create_indexes(indexes, None).await.map_err(|e| {
            tracing::error!("Failed to create indexes on invoices collection: {}", e);
            AppError::from(e)
        })?;
        tracing::info!("Created indexes on invoices.(order, year+seq, reference, issued_at)");

        let reference_index = IndexModel::builder()
            .keys(doc! { "reference": 1 })
            .options(
                IndexOptions::builder()
                    .name("order_reference_lookup".to_string())
                    .build(),
            )
            .build();
        self.orders()
            .create_index(reference_index, None)
            .await
            .map_err(|e| {
                tracing::error!("Failed to create reference index on orders collection: {}", e);
                AppError::from(e)
            })?;
        tracing::info!("Created index on orders.reference");

        Ok(())
    }

    pub async fn health_check(&self) -> Result<(), AppError> {
        self.client
            .database("admin")
            .run_command(doc! { "ping": 1 }, None)
            .await
            .map_err(|e| {
                tracing::error!("MongoDB health check failed: {}", e);
                AppError::from(e)
            })?;
        Ok(())
    }

    pub fn invoices(&self) -> Collection<Invoice> {
        self.db.collection("invoices")
    }

    pub fn orders(&self) -> Collection<Order> {
        self.db.collection("orders")
    }

    pub fn counters(&self) -> Collection<SequenceCounter> {
        self.db.collection("invoice_counters")
    }

    pub fn clients(&self) -> Collection<ClientProfile> {
        self.db.collection("clients")
    }

    pub fn company_settings(&self) -> Collection<CompanyProfile> {
        self.db.collection("company_settings")
    }

    /// Create the counter of `year` at 0 if it does not exist yet, so the
    /// transactional increment never has to insert it.
    async fn ensure_counter(&self, year: i32) -> Result<(), FactureError> {
        let options = UpdateOptions::builder().upsert(true).build();
        retry(upsert_backoff(), || async {
            self.counters()
                .update_one(
                    doc! { "_id": year },
                    doc! { "$setOnInsert": { "seq": 0_i64 } },
                    options.clone(),
                )
                .await
                .map(|_| ())
                .map_err(retry_on_duplicate)
        })
        .await
    }

    async fn issue_in(
        &self,
        session: &mut ClientSession,
        year: i32,
        issue: IssueFn<'_>,
    ) -> TxResult<Invoice> {
        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();
        let counter = self
            .counters()
            .find_one_and_update_with_session(
                doc! { "_id": year },
                doc! { "$inc": { "seq": 1_i64 } },
                options,
                session,
            )
            .await
            .map_err(retry_on_transient)?
            .ok_or_else(|| {
                backoff::Error::permanent(FactureError::StoreUnavailable(anyhow::anyhow!(
                    "Counter for {} is missing",
                    year
                )))
            })?;

        let invoice = issue(counter.seq);
        self.invoices()
            .insert_one_with_session(&invoice, None, session)
            .await
            .map_err(retry_on_transient)?;
        Ok(invoice)
    }

    async fn apply_deletion_in(
        &self,
        session: &mut ClientSession,
        plan: &DeletionPlan,
    ) -> TxResult<AppliedDeletion> {
        let mut applied = AppliedDeletion {
            deleted: self
                .invoices()
                .delete_many_with_session(
                    doc! { "_id": { "$in": plan.invoice_ids.clone() } },
                    None,
                    session,
                )
                .await
                .map_err(retry_on_transient)?
                .deleted_count,
            ..Default::default()
        };

        if !plan.order_ids.is_empty() {
            applied.orders_updated = self
                .orders()
                .update_many_with_session(
                    doc! { "_id": { "$in": plan.order_ids.clone() } },
                    doc! {
                        "$set": {
                            "has_invoice": false,
                            "order_status": OrderStatus::Cancelled.as_str(),
                            "updated_at": bson::DateTime::now(),
                        }
                    },
                    None,
                    session,
                )
                .await
                .map_err(retry_on_transient)?
                .modified_count;
        }

        for (year, deleted_seqs) in &plan.seqs_by_year {
            let Some(min_deleted) = deleted_seqs.iter().min().copied() else {
                continue;
            };

            // Walk the (year, seq) index ascending so every row moves into a
            // slot that is already free.
            let options = UpdateOptions::builder()
                .hint(Hint::Name(YEAR_SEQ_INDEX.to_string()))
                .build();
            let modified = self
                .invoices()
                .update_many_with_session(
                    doc! { "year": year, "seq": { "$gt": min_deleted } },
                    renumber_pipeline(deleted_seqs),
                    options,
                    session,
                )
                .await
                .map_err(retry_on_transient)?
                .modified_count;

            let options = FindOneOptions::builder().sort(doc! { "seq": -1 }).build();
            let counter_seq = self
                .invoices()
                .find_one_with_session(doc! { "year": year }, options, session)
                .await
                .map_err(retry_on_transient)?
                .map(|invoice| invoice.seq)
                .unwrap_or(0);

            // Writing the counter inside the transaction makes a concurrent
            // issuance for this year conflict with it instead of being
            // overwritten.
            let options = UpdateOptions::builder().upsert(true).build();
            self.counters()
                .update_one_with_session(
                    doc! { "_id": year },
                    doc! { "$set": { "seq": counter_seq } },
                    options,
                    session,
                )
                .await
                .map_err(retry_on_transient)?;

            applied.years.push(YearRenumbering {
                year: *year,
                deleted_seqs: deleted_seqs.clone(),
                modified,
                counter_seq,
            });
        }

        Ok(applied)
    }
}

fn invoice_filter_document(filter: &InvoiceFilter) -> Document {
    let mut query = Document::new();
    let mut issued_at = Document::new();
    if let Some(from) = filter.from {
        issued_at.insert("$gte", bson::DateTime::from_chrono(from));
    }
    if let Some(to) = filter.to {
        issued_at.insert("$lt", bson::DateTime::from_chrono(to));
    }
    if !issued_at.is_empty() {
        query.insert("issued_at", issued_at);
    }
    if !filter.statuses.is_empty() {
        let statuses: Vec<&str> = filter.statuses.iter().map(InvoiceStatus::as_str).collect();
        query.insert("status", doc! { "$in": statuses });
    }
    query
}

/// Update pipeline that shifts every matched invoice down by the number of
/// deleted seqs below it, then rebuilds its reference from the new seq.
fn renumber_pipeline(deleted_seqs: &[i64]) -> Vec<Document> {
    vec![
        doc! {
            "$set": {
                "seq": {
                    "$subtract": [
                        "$seq",
                        {
                            "$size": {
                                "$filter": {
                                    "input": deleted_seqs.to_vec(),
                                    "as": "deleted",
                                    "cond": { "$lt": ["$$deleted", "$seq"] }
                                }
                            }
                        }
                    ]
                }
            }
        },
        doc! {
            "$set": {
                "reference": {
                    "$concat": [
                        REFERENCE_PREFIX,
                        "-",
                        { "$toString": "$seq" },
                        "-",
                        { "$toString": "$year" }
                    ]
                },
                "updated_at": "$$NOW"
            }
        },
    ]
}

#[async_trait]
impl InvoiceStore for MongoDb {
    #[instrument(skip(self))]
    async fn find_invoice(&self, id: &str) -> Result<Option<Invoice>, FactureError> {
        Ok(self.invoices().find_one(doc! { "_id": id }, None).await?)
    }

    #[instrument(skip(self))]
    async fn find_invoice_by_order(
        &self,
        order_id: &str,
    ) -> Result<Option<Invoice>, FactureError> {
        Ok(self
            .invoices()
            .find_one(doc! { "order": order_id }, None)
            .await?)
    }

    #[instrument(skip(self))]
    async fn find_invoice_by_reference(
        &self,
        reference: &str,
    ) -> Result<Option<Invoice>, FactureError> {
        Ok(self
            .invoices()
            .find_one(doc! { "reference": reference }, None)
            .await?)
    }

    #[instrument(skip(self, ids), fields(count = ids.len()))]
    async fn find_invoices(&self, ids: &[String]) -> Result<Vec<Invoice>, FactureError> {
        let cursor = self
            .invoices()
            .find(doc! { "_id": { "$in": ids.to_vec() } }, None)
            .await?;
        Ok(cursor.try_collect().await?)
    }

    #[instrument(skip(self))]
    async fn list_invoices(&self, filter: &InvoiceFilter) -> Result<Vec<Invoice>, FactureError> {
        let options = FindOptions::builder()
            .sort(doc! { "issued_at": 1, "year": 1, "seq": 1 })
            .build();
        let cursor = self
            .invoices()
            .find(invoice_filter_document(filter), options)
            .await?;
        Ok(cursor.try_collect().await?)
    }

    #[instrument(skip(self, invoice), fields(order_id = %invoice.order, reference = %invoice.reference))]
    async fn insert_invoice(&self, invoice: &Invoice) -> Result<(), FactureError> {
        self.invoices().insert_one(invoice, None).await?;
        Ok(())
    }

    #[instrument(skip(self, snapshot))]
    async fn replace_snapshot(
        &self,
        invoice_id: &str,
        snapshot: &InvoiceSnapshot,
    ) -> Result<bool, FactureError> {
        let result = self
            .invoices()
            .update_one(
                doc! {
                    "_id": invoice_id,
                    "status": { "$ne": InvoiceStatus::Cancelled.as_str() },
                },
                doc! {
                    "$set": {
                        "snapshot": bson::to_bson(snapshot)?,
                        "updated_at": bson::DateTime::now(),
                    }
                },
                None,
            )
            .await?;
        Ok(result.matched_count > 0)
    }

    #[instrument(skip(self))]
    async fn cancel_invoice(&self, invoice_id: &str) -> Result<Option<Invoice>, FactureError> {
        let now = bson::DateTime::now();
        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();
        let cancelled = self
            .invoices()
            .find_one_and_update(
                doc! {
                    "_id": invoice_id,
                    "status": { "$ne": InvoiceStatus::Cancelled.as_str() },
                },
                doc! {
                    "$set": {
                        "status": InvoiceStatus::Cancelled.as_str(),
                        "cancelled_at": now,
                        "updated_at": now,
                    }
                },
                options,
            )
            .await?;

        match cancelled {
            Some(invoice) => Ok(Some(invoice)),
            // Already cancelled, or absent
            None => self.find_invoice(invoice_id).await,
        }
    }

    #[instrument(skip(self, plan), fields(invoices = plan.invoice_ids.len()))]
    async fn apply_deletion(&self, plan: &DeletionPlan) -> Result<AppliedDeletion, FactureError> {
        retry(transaction_backoff(), || async {
            let mut session = self
                .client
                .start_session(None)
                .await
                .map_err(retry_on_transient)?;
            session
                .start_transaction(None)
                .await
                .map_err(retry_on_transient)?;

            match self.apply_deletion_in(&mut session, plan).await {
                Ok(applied) => {
                    commit(&mut session).await.map_err(retry_on_transient)?;
                    Ok(applied)
                }
                Err(e) => {
                    abort(&mut session).await;
                    Err(e)
                }
            }
        })
        .await
    }
}

#[async_trait]
impl CounterStore for MongoDb {
    #[instrument(skip(self))]
    async fn find_and_increment(&self, year: i32) -> Result<SequenceCounter, FactureError> {
        let options = FindOneAndUpdateOptions::builder()
            .upsert(true)
            .return_document(ReturnDocument::After)
            .build();

        // The loser of a first-of-year upsert race retries and then
        // increments the document the winner created.
        let counter = retry(upsert_backoff(), || async {
            self.counters()
                .find_one_and_update(
                    doc! { "_id": year },
                    doc! { "$inc": { "seq": 1_i64 } },
                    options.clone(),
                )
                .await
                .map_err(retry_on_duplicate)
        })
        .await?;

        counter.ok_or_else(|| {
            FactureError::StoreUnavailable(anyhow::anyhow!(
                "Counter upsert for {} returned no document",
                year
            ))
        })
    }

    #[instrument(skip(self, issue))]
    async fn issue_numbered(&self, year: i32, issue: IssueFn<'_>) -> Result<Invoice, FactureError> {
        self.ensure_counter(year).await?;

        // A rejected insert aborts the transaction, which rolls the
        // increment back.
        retry(transaction_backoff(), || async {
            let mut session = self
                .client
                .start_session(None)
                .await
                .map_err(retry_on_transient)?;
            session
                .start_transaction(None)
                .await
                .map_err(retry_on_transient)?;

            match self.issue_in(&mut session, year, issue).await {
                Ok(invoice) => {
                    commit(&mut session).await.map_err(retry_on_transient)?;
                    Ok(invoice)
                }
                Err(e) => {
                    abort(&mut session).await;
                    Err(e)
                }
            }
        })
        .await
    }
}

#[async_trait]
impl OrderStore for MongoDb {
    #[instrument(skip(self))]
    async fn find_order(&self, id: &str) -> Result<Option<Order>, FactureError> {
        Ok(self.orders().find_one(doc! { "_id": id }, None).await?)
    }

    #[instrument(skip(self))]
    async fn find_order_by_reference(
        &self,
        reference: &str,
    ) -> Result<Option<Order>, FactureError> {
        Ok(self
            .orders()
            .find_one(doc! { "reference": reference }, None)
            .await?)
    }

    #[instrument(skip(self))]
    async fn set_has_invoice(
        &self,
        order_id: &str,
        has_invoice: bool,
    ) -> Result<bool, FactureError> {
        let result = self
            .orders()
            .update_one(
                doc! { "_id": order_id },
                doc! {
                    "$set": {
                        "has_invoice": has_invoice,
                        "updated_at": bson::DateTime::now(),
                    }
                },
                None,
            )
            .await?;
        Ok(result.matched_count > 0)
    }
}

#[async_trait]
impl PartyDirectory for MongoDb {
    async fn company(&self) -> Result<CompanyProfile, FactureError> {
        Ok(self
            .company_settings()
            .find_one(None, None)
            .await?
            .unwrap_or_default())
    }

    async fn client(&self, client_id: &str) -> Result<Option<ClientProfile>, FactureError> {
        Ok(self.clients().find_one(doc! { "_id": client_id }, None).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_filter_document_combines_range_and_status() {
        let filter = InvoiceFilter {
            from: Some(chrono::Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap()),
            to: Some(chrono::Utc.with_ymd_and_hms(2025, 4, 1, 0, 0, 0).unwrap()),
            statuses: vec![InvoiceStatus::Paid],
        };
        let query = invoice_filter_document(&filter);
        let issued_at = query.get_document("issued_at").unwrap();
        assert!(issued_at.contains_key("$gte"));
        assert!(issued_at.contains_key("$lt"));
        let statuses = query.get_document("status").unwrap().get_array("$in").unwrap();
        assert_eq!(statuses.len(), 1);
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        assert!(invoice_filter_document(&InvoiceFilter::default()).is_empty());
    }

    #[test]
    fn test_renumber_pipeline_shape() {
        let pipeline = renumber_pipeline(&[2, 4]);
        assert_eq!(pipeline.len(), 2);
        assert!(pipeline[0].get_document("$set").unwrap().contains_key("seq"));
        assert!(pipeline[1]
            .get_document("$set")
            .unwrap()
            .contains_key("reference"));
    }
}
