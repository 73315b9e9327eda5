//! Per-file processing state machine.
//!
//! `Unseen → Extracted → Linked | Unlinked → RelinkAttempted`
//!
//! A file is planned (read-only), optionally extracted (no database access,
//! safe to run on worker threads), then applied in one `IMMEDIATE`
//! transaction. Every write for a file commits or rolls back together.

use rusqlite::Connection;
use serde::Serialize;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::db::DatabaseError;
use crate::models::enums::{DocumentKind, ProcessingState, Scenario};
use crate::models::{DocumentRecord, ExtractedFields, RawDocument};
use crate::pipeline::extraction::{extract_document, DefaultTextLayer, ExtractionError, TextLayer};
use crate::pipeline::intake::{locator_file_name, BlobStore, FsBlobStore, IntakeError};
use crate::pipeline::reconcile::{immediate_transaction, invoice_number_of, ReconcileEngine, ReconcileError, ReconcileOutcome};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    #[error("Blob store error: {0}")]
    Intake(#[from] IntakeError),

    #[error("Extraction failed: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Reconciliation failed: {0}")]
    Reconcile(#[from] ReconcileError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Transaction failed: {0}")]
    Transaction(#[from] rusqlite::Error),

    #[error("Not a bucketed document locator: {0}")]
    NotBucketed(String),

    #[error("Document record not found: {0}")]
    DocumentNotFound(Uuid),
}

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

/// What happened to one file.
#[derive(Debug, Clone, Serialize)]
pub struct FileOutcome {
    pub locator: String,
    pub document_id: Uuid,
    pub kind: DocumentKind,
    /// States visited, starting with the one found on entry.
    pub trail: Vec<ProcessingState>,
    /// The record pointed at an order that no longer exists.
    pub orphan_healed: bool,
    /// `None` when the file was skipped without writes.
    pub reconcile: Option<ReconcileOutcome>,
}

impl FileOutcome {
    pub fn entry_state(&self) -> ProcessingState {
        self.trail.first().copied().unwrap_or(ProcessingState::Unseen)
    }

    pub fn final_state(&self) -> ProcessingState {
        self.trail.last().copied().unwrap_or(ProcessingState::Unseen)
    }

    pub fn was_skipped(&self) -> bool {
        self.reconcile.is_none()
    }

    pub fn was_extracted(&self) -> bool {
        self.trail.contains(&ProcessingState::Extracted)
    }

    pub fn scenario(&self) -> Option<Scenario> {
        self.reconcile.as_ref().map(|r| r.scenario)
    }
}

/// Work decided for one file before any extraction happens.
#[derive(Debug, Clone)]
pub struct FilePlan {
    pub locator: String,
    pub kind: DocumentKind,
    /// Existing record, already cleared of an orphaned link.
    pub record: Option<DocumentRecord>,
    pub entry: ProcessingState,
    pub orphan_healed: bool,
    pub needs_extraction: bool,
    /// Linked to a live order: nothing to do.
    pub skip: bool,
}

// ---------------------------------------------------------------------------
// Processor
// ---------------------------------------------------------------------------

pub struct DocumentProcessor {
    engine: ReconcileEngine,
    blobs: Box<dyn BlobStore>,
    text_layer: Box<dyn TextLayer>,
    config: EngineConfig,
}

impl DocumentProcessor {
    pub fn new(
        engine: ReconcileEngine,
        blobs: Box<dyn BlobStore>,
        text_layer: Box<dyn TextLayer>,
        config: EngineConfig,
    ) -> Self {
        Self {
            engine,
            blobs,
            text_layer,
            config,
        }
    }

    /// SQLite engine, filesystem blobs under `config.blob_root`, default text layer.
    pub fn from_config(config: EngineConfig) -> Self {
        Self::new(
            ReconcileEngine::sqlite(),
            Box::new(FsBlobStore::new(config.blob_root.clone())),
            Box::new(DefaultTextLayer::new()),
            config,
        )
    }

    pub fn engine(&self) -> &ReconcileEngine {
        &self.engine
    }

    pub fn blobs(&self) -> &dyn BlobStore {
        self.blobs.as_ref()
    }

    pub fn text_layer(&self) -> &dyn TextLayer {
        self.text_layer.as_ref()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Decide what a file needs. Reads only.
    pub fn plan(&self, conn: &Connection, locator: &str) -> Result<FilePlan, ProcessingError> {
        let Some(mut record) = self.engine.documents().find_document_by_locator(conn, locator)? else {
            let kind = DocumentKind::from_locator(locator)
                .ok_or_else(|| ProcessingError::NotBucketed(locator.to_string()))?;
            return Ok(FilePlan {
                locator: locator.to_string(),
                kind,
                record: None,
                entry: ProcessingState::Unseen,
                orphan_healed: false,
                needs_extraction: true,
                skip: false,
            });
        };

        let mut entry = ProcessingState::Unlinked;
        let mut orphan_healed = false;
        if let Some(order_id) = record.linked_order_id {
            entry = ProcessingState::Linked;
            if self.engine.ledger().get_order(conn, order_id)?.is_some() {
                return Ok(FilePlan {
                    locator: locator.to_string(),
                    kind: record.kind,
                    record: Some(record),
                    entry,
                    orphan_healed: false,
                    needs_extraction: false,
                    skip: true,
                });
            }
            tracing::warn!(
                document_id = %record.id,
                order_id,
                "Linked order no longer exists, relinking"
            );
            record.linked_order_id = None;
            orphan_healed = true;
        }

        Ok(FilePlan {
            locator: locator.to_string(),
            kind: record.kind,
            needs_extraction: record.cached_invoice_number.is_none(),
            record: Some(record),
            entry,
            orphan_healed,
            skip: false,
        })
    }

    /// Read a blob and extract its fields. Touches no database state.
    pub fn extract(&self, locator: &str) -> Result<ExtractedFields, ProcessingError> {
        let bytes = self.blobs.read_file(locator)?;
        let document = RawDocument {
            filename: locator_file_name(locator).to_string(),
            bytes,
        };
        Ok(extract_document(&document, self.text_layer(), &self.config)?)
    }

    /// Persist a plan: create or refresh the record and reconcile it, all in
    /// one `IMMEDIATE` transaction.
    pub fn apply(
        &self,
        conn: &Connection,
        plan: FilePlan,
        fields: Option<ExtractedFields>,
        acting_user_id: i64,
    ) -> Result<FileOutcome, ProcessingError> {
        if plan.skip {
            if let Some(record) = plan.record {
                return Ok(FileOutcome {
                    locator: plan.locator,
                    document_id: record.id,
                    kind: record.kind,
                    trail: vec![ProcessingState::Linked],
                    orphan_healed: false,
                    reconcile: None,
                });
            }
        }

        let mut trail = vec![plan.entry];
        if plan.orphan_healed {
            trail.push(ProcessingState::Unlinked);
        }

        let tx = immediate_transaction(conn)?;
        let mut record = match plan.record {
            Some(record) => record,
            None => {
                let record = DocumentRecord::new(&plan.locator, plan.kind, Some(acting_user_id));
                self.engine.documents().create_document_record(&tx, &record)?;
                record
            }
        };
        if let Some(fields) = fields {
            record.apply_extraction(fields);
            record.processed_at = chrono::Local::now().naive_local();
            trail.push(ProcessingState::Extracted);
        }
        if plan.entry != ProcessingState::Unseen {
            trail.push(ProcessingState::RelinkAttempted);
        }

        let outcome = self.engine.reconcile(&tx, &mut record)?;
        self.engine.documents().update_document_record(&tx, &record)?;
        tx.commit()?;

        trail.push(if outcome.is_linked() {
            ProcessingState::Linked
        } else {
            ProcessingState::Unlinked
        });
        tracing::debug!(
            locator = %plan.locator,
            acting_user_id,
            scenario = outcome.scenario.as_str(),
            "File processed"
        );

        Ok(FileOutcome {
            locator: plan.locator,
            document_id: record.id,
            kind: record.kind,
            trail,
            orphan_healed: plan.orphan_healed,
            reconcile: Some(outcome),
        })
    }

    /// Plan, extract if needed, and apply one bucketed file.
    pub fn process_file(
        &self,
        conn: &Connection,
        locator: &str,
        acting_user_id: i64,
    ) -> Result<FileOutcome, ProcessingError> {
        let plan = self.plan(conn, locator)?;
        let fields = if plan.needs_extraction && !plan.skip {
            Some(self.extract(locator)?)
        } else {
            None
        };
        self.apply(conn, plan, fields, acting_user_id)
    }

    /// Force reconciliation of one record, re-extracting only when it has no
    /// cached invoice number.
    pub fn relink_document(
        &self,
        conn: &Connection,
        document_id: &Uuid,
        acting_user_id: i64,
    ) -> Result<FileOutcome, ProcessingError> {
        let mut record = self
            .engine
            .documents()
            .get_document_record(conn, document_id)?
            .ok_or(ProcessingError::DocumentNotFound(*document_id))?;

        let mut trail = vec![if record.is_linked() {
            ProcessingState::Linked
        } else {
            ProcessingState::Unlinked
        }];
        if invoice_number_of(&record).is_none() {
            let fields = self.extract(&record.storage_locator)?;
            record.apply_extraction(fields);
            record.processed_at = chrono::Local::now().naive_local();
            trail.push(ProcessingState::Extracted);
        }
        trail.push(ProcessingState::RelinkAttempted);

        tracing::info!(document_id = %document_id, acting_user_id, "Relink requested");
        let outcome = self.engine.reconcile_document(conn, &mut record)?;
        trail.push(if outcome.is_linked() {
            ProcessingState::Linked
        } else {
            ProcessingState::Unlinked
        });

        Ok(FileOutcome {
            locator: record.storage_locator,
            document_id: record.id,
            kind: record.kind,
            trail,
            orphan_healed: false,
            reconcile: Some(outcome),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository;
    use crate::db::sqlite::open_memory_database;
    use crate::models::NewOrder;
    use crate::pipeline::extraction::PlainTextLayer;

    const SLIP_12244: &str = "Nº do documento 012244\nVencimento 15/03/2024\nBanco\nAutenticação";
    const USER: i64 = 42;

    struct Fixture {
        _dir: tempfile::TempDir,
        conn: Connection,
        processor: DocumentProcessor,
        order_id: i64,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let conn = open_memory_database().unwrap();
        let client_id = repository::insert_client(&conn, "Mercado X", None).unwrap();
        let order_id = repository::insert_order(
            &conn,
            &NewOrder {
                client_id,
                invoice_number: Some("12244".into()),
                ..NewOrder::default()
            },
        )
        .unwrap();
        let config = EngineConfig {
            blob_root: dir.path().to_path_buf(),
            ..EngineConfig::default()
        };
        let processor = DocumentProcessor::new(
            ReconcileEngine::sqlite(),
            Box::new(FsBlobStore::new(dir.path())),
            Box::new(PlainTextLayer),
            config,
        );
        Fixture {
            _dir: dir,
            conn,
            processor,
            order_id,
        }
    }

    fn put(f: &Fixture, locator: &str, text: &str) {
        let path = f.processor.config().blob_root.join(locator);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, text).unwrap();
    }

    #[test]
    fn unseen_file_is_extracted_and_linked() {
        let f = fixture();
        put(&f, "slips/boleto.txt", SLIP_12244);

        let outcome = f.processor.process_file(&f.conn, "slips/boleto.txt", USER).unwrap();

        assert_eq!(
            outcome.trail,
            vec![ProcessingState::Unseen, ProcessingState::Extracted, ProcessingState::Linked]
        );
        let record = repository::get_document_record(&f.conn, &outcome.document_id).unwrap().unwrap();
        assert_eq!(record.owner_user_id, Some(USER));
        assert_eq!(record.cached_invoice_number.as_deref(), Some("012244"));
        assert_eq!(record.linked_order_id, Some(f.order_id));
        let order = repository::get_order(&f.conn, f.order_id).unwrap().unwrap();
        assert_eq!(order.payment_slip_path.as_deref(), Some("slips/boleto.txt"));
        assert_eq!(order.due_date, chrono::NaiveDate::from_ymd_opt(2024, 3, 15));
    }

    #[test]
    fn linked_file_is_skipped_without_reading_the_blob() {
        let f = fixture();
        put(&f, "slips/boleto.txt", SLIP_12244);
        f.processor.process_file(&f.conn, "slips/boleto.txt", USER).unwrap();
        // A second pass must not need the blob.
        std::fs::remove_file(f.processor.config().blob_root.join("slips/boleto.txt")).unwrap();

        let outcome = f.processor.process_file(&f.conn, "slips/boleto.txt", USER).unwrap();

        assert!(outcome.was_skipped());
        assert_eq!(outcome.trail, vec![ProcessingState::Linked]);
    }

    #[test]
    fn orphaned_link_is_healed_and_relinked() {
        let f = fixture();
        put(&f, "slips/boleto.txt", SLIP_12244);
        let first = f.processor.process_file(&f.conn, "slips/boleto.txt", USER).unwrap();
        repository::delete_order(&f.conn, f.order_id).unwrap();

        let outcome = f.processor.process_file(&f.conn, "slips/boleto.txt", USER).unwrap();

        assert!(outcome.orphan_healed);
        assert!(!outcome.was_extracted());
        assert_eq!(outcome.entry_state(), ProcessingState::Linked);
        assert_eq!(outcome.final_state(), ProcessingState::Unlinked);
        assert_eq!(outcome.scenario(), Some(Scenario::NotFound));
        let record = repository::get_document_record(&f.conn, &first.document_id).unwrap().unwrap();
        assert_eq!(record.linked_order_id, None);
    }

    #[test]
    fn unlinked_with_cache_reconciles_without_extraction() {
        let f = fixture();
        put(&f, "slips/other.txt", "Nº do documento 99999\nVencimento 15/03/2024\nBanco\nFim");
        let first = f.processor.process_file(&f.conn, "slips/other.txt", USER).unwrap();
        assert_eq!(first.scenario(), Some(Scenario::NotFound));
        repository::update_order_invoice_number(&f.conn, f.order_id, Some("99999")).unwrap();

        let outcome = f.processor.process_file(&f.conn, "slips/other.txt", USER).unwrap();

        assert_eq!(
            outcome.trail,
            vec![ProcessingState::Unlinked, ProcessingState::RelinkAttempted, ProcessingState::Linked]
        );
    }

    #[test]
    fn unlinked_without_cache_is_extracted_again() {
        let f = fixture();
        put(&f, "invoices/scan.txt", "sem numero\nnada\naqui\nfim");
        let first = f.processor.process_file(&f.conn, "invoices/scan.txt", USER).unwrap();
        assert_eq!(first.scenario(), Some(Scenario::Invalid));
        put(&f, "invoices/scan.txt", "NF-e Nº 012244\nEmissão\nItens\nFim");

        let outcome = f.processor.process_file(&f.conn, "invoices/scan.txt", USER).unwrap();

        assert_eq!(
            outcome.trail,
            vec![
                ProcessingState::Unlinked,
                ProcessingState::Extracted,
                ProcessingState::RelinkAttempted,
                ProcessingState::Linked,
            ]
        );
        let order = repository::get_order(&f.conn, f.order_id).unwrap().unwrap();
        assert_eq!(order.invoice_path.as_deref(), Some("invoices/scan.txt"));
    }

    #[test]
    fn unbucketed_locator_is_rejected() {
        let f = fixture();
        assert!(matches!(
            f.processor.process_file(&f.conn, "bonus/a.txt", USER),
            Err(ProcessingError::NotBucketed(_))
        ));
    }

    #[test]
    fn missing_blob_leaves_no_record() {
        let f = fixture();
        let result = f.processor.process_file(&f.conn, "slips/missing.txt", USER);

        assert!(matches!(result, Err(ProcessingError::Intake(IntakeError::NotFound(_)))));
        assert!(repository::find_document_by_locator(&f.conn, "slips/missing.txt").unwrap().is_none());
    }

    #[test]
    fn relink_on_demand_links_after_ledger_fix() {
        let f = fixture();
        put(&f, "slips/late.txt", "Nº do documento 55555\nVencimento 15/03/2024\nBanco\nFim");
        let first = f.processor.process_file(&f.conn, "slips/late.txt", USER).unwrap();
        repository::update_order_invoice_number(&f.conn, f.order_id, Some("55555")).unwrap();

        let outcome = f.processor.relink_document(&f.conn, &first.document_id, USER).unwrap();

        assert_eq!(outcome.scenario(), Some(Scenario::Linked));
        assert_eq!(
            outcome.trail,
            vec![ProcessingState::Unlinked, ProcessingState::RelinkAttempted, ProcessingState::Linked]
        );
    }

    #[test]
    fn relink_unknown_document_fails() {
        let f = fixture();
        assert!(matches!(
            f.processor.relink_document(&f.conn, &Uuid::new_v4(), USER),
            Err(ProcessingError::DocumentNotFound(_))
        ));
    }
}
