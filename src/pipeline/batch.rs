//! Batch pass: file the staging area, then process every bucketed document.
//!
//! Extraction for files that need it runs on scoped worker threads; all
//! ledger work stays on the caller's connection, one transaction per file.
//! A pass can be stopped between files; links already committed stay.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, TryLockError};
use std::time::Instant;

use rusqlite::Connection;
use serde::Serialize;

use crate::config::{INVOICE_BUCKET, SLIP_BUCKET};
use crate::models::enums::ProcessingState;
use crate::models::ExtractedFields;
use crate::pipeline::intake::{organize_staging, primary_files, OrganizeReport};
use crate::pipeline::processor::{DocumentProcessor, FileOutcome, FilePlan, ProcessingError};

// ═══════════════════════════════════════════
// Pass lock
// ═══════════════════════════════════════════

/// At most one pass per process.
#[derive(Debug, Default)]
pub struct PassLock {
    lock: Mutex<()>,
}

/// Held for the duration of a pass. Dropping it releases the lock.
pub struct PassGuard<'a> {
    _guard: MutexGuard<'a, ()>,
}

impl PassLock {
    pub const fn new() -> Self {
        Self { lock: Mutex::new(()) }
    }

    /// Block until no other pass is running.
    pub fn acquire(&self) -> PassGuard<'_> {
        // The guarded value is `()`, so a poisoned lock carries no bad state.
        let guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        PassGuard { _guard: guard }
    }

    /// `None` when a pass is already running.
    pub fn try_acquire(&self) -> Option<PassGuard<'_>> {
        match self.lock.try_lock() {
            Ok(guard) => Some(PassGuard { _guard: guard }),
            Err(TryLockError::Poisoned(poisoned)) => Some(PassGuard {
                _guard: poisoned.into_inner(),
            }),
            Err(TryLockError::WouldBlock) => None,
        }
    }

    pub fn is_busy(&self) -> bool {
        matches!(self.lock.try_lock(), Err(TryLockError::WouldBlock))
    }
}

// ═══════════════════════════════════════════
// Pass report
// ═══════════════════════════════════════════

/// Result of one full pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PassReport {
    pub organized: OrganizeReport,
    pub files_seen: u32,
    pub files_skipped: u32,
    pub files_extracted: u32,
    pub linked: u32,
    pub unlinked: u32,
    pub orphans_healed: u32,
    pub paths_healed: u32,
    /// Stopped by the shutdown flag before every file was handled.
    pub interrupted: bool,
    pub duration_ms: u64,
    pub outcomes: Vec<FileOutcome>,
    pub errors: Vec<String>,
}

impl PassReport {
    fn record(&mut self, outcome: FileOutcome) {
        if outcome.was_skipped() {
            self.files_skipped += 1;
        } else if outcome.final_state() == ProcessingState::Linked {
            self.linked += 1;
        } else {
            self.unlinked += 1;
        }
        if outcome.was_extracted() {
            self.files_extracted += 1;
        }
        if outcome.orphan_healed {
            self.orphans_healed += 1;
        }
        if let Some(reconcile) = &outcome.reconcile {
            self.paths_healed += reconcile.healed_paths as u32;
        }
        self.outcomes.push(outcome);
    }
}

// ═══════════════════════════════════════════
// Runner
// ═══════════════════════════════════════════

/// Owns the processor, the pass lock and the stop flag.
pub struct BatchRunner {
    processor: DocumentProcessor,
    lock: PassLock,
    shutdown: AtomicBool,
}

impl BatchRunner {
    pub fn new(processor: DocumentProcessor) -> Self {
        Self {
            processor,
            lock: PassLock::new(),
            shutdown: AtomicBool::new(false),
        }
    }

    pub fn processor(&self) -> &DocumentProcessor {
        &self.processor
    }

    pub fn is_running(&self) -> bool {
        self.lock.is_busy()
    }

    /// Ask the running pass to stop before its next file.
    pub fn request_stop(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Run a pass, waiting for any pass already running to finish.
    pub fn run_pass(&self, conn: &Connection, acting_user_id: i64) -> PassReport {
        let _guard = self.lock.acquire();
        self.shutdown.store(false, Ordering::Relaxed);
        run_pass(conn, &self.processor, acting_user_id, &self.shutdown)
    }

    /// Run a pass unless one is already running.
    pub fn try_run_pass(&self, conn: &Connection, acting_user_id: i64) -> Option<PassReport> {
        let Some(_guard) = self.lock.try_acquire() else {
            tracing::debug!("Pass already running, skipping");
            return None;
        };
        self.shutdown.store(false, Ordering::Relaxed);
        Some(run_pass(conn, &self.processor, acting_user_id, &self.shutdown))
    }
}

/// One pass: organize staging, plan every bucketed file, extract in
/// parallel, then apply each file in its own transaction.
///
/// Per-file failures land in `errors`; the pass carries on.
pub fn run_pass(
    conn: &Connection,
    processor: &DocumentProcessor,
    acting_user_id: i64,
    shutdown: &AtomicBool,
) -> PassReport {
    let start = Instant::now();
    let mut report = PassReport::default();

    if shutdown.load(Ordering::Relaxed) {
        report.interrupted = true;
        return report;
    }

    // 1. Staging → buckets
    match organize_staging(processor.blobs(), processor.text_layer()) {
        Ok(organized) => {
            report.errors.extend(organized.errors.iter().cloned());
            report.organized = organized;
        }
        Err(e) => report.errors.push(format!("organize staging: {e}")),
    }

    // 2. Bucketed primaries
    let mut locators = Vec::new();
    for bucket in [INVOICE_BUCKET, SLIP_BUCKET] {
        match processor.blobs().list_dir(bucket) {
            Ok(names) => locators.extend(primary_files(&names)),
            Err(e) => report.errors.push(format!("list {bucket}: {e}")),
        }
    }
    report.files_seen = locators.len() as u32;

    // 3. Plan (reads only)
    let mut plans = Vec::with_capacity(locators.len());
    for locator in &locators {
        match processor.plan(conn, locator) {
            Ok(plan) => plans.push(plan),
            Err(e) => {
                tracing::warn!(locator = %locator, error = %e, "Could not plan file");
                report.errors.push(format!("{locator}: {e}"));
            }
        }
    }

    // 4. Extract in parallel
    let workers = processor.config().extraction_workers;
    let mut extracted = extract_all(processor, &plans, workers, shutdown);

    // 5. Apply sequentially
    let planned = plans.len();
    for (index, plan) in plans.into_iter().enumerate() {
        if shutdown.load(Ordering::Relaxed) {
            report.interrupted = true;
            tracing::info!(remaining = planned - index, "Pass stopped");
            break;
        }

        let locator = plan.locator.clone();
        let fields = if plan.needs_extraction && !plan.skip {
            match extracted[index].take() {
                Some(Ok(fields)) => Some(fields),
                Some(Err(e)) => {
                    tracing::warn!(locator = %locator, error = %e, "Extraction failed");
                    report.errors.push(format!("{locator}: {e}"));
                    continue;
                }
                None => {
                    report.errors.push(format!("{locator}: extraction did not run"));
                    continue;
                }
            }
        } else {
            None
        };

        match processor.apply(conn, plan, fields, acting_user_id) {
            Ok(outcome) => report.record(outcome),
            Err(e) => {
                tracing::warn!(locator = %locator, error = %e, "File rolled back");
                report.errors.push(format!("{locator}: {e}"));
            }
        }
    }

    report.duration_ms = start.elapsed().as_millis() as u64;
    tracing::info!(
        files = report.files_seen,
        linked = report.linked,
        unlinked = report.unlinked,
        skipped = report.files_skipped,
        errors = report.errors.len(),
        duration_ms = report.duration_ms,
        "Pass complete"
    );
    report
}

type Extraction = Option<Result<ExtractedFields, ProcessingError>>;

/// Extract every plan that needs it, `workers` files at a time. The result
/// is indexed like `plans`; `None` where nothing ran.
fn extract_all(
    processor: &DocumentProcessor,
    plans: &[FilePlan],
    workers: usize,
    shutdown: &AtomicBool,
) -> Vec<Extraction> {
    let mut results: Vec<Extraction> = plans.iter().map(|_| None).collect();
    let jobs: Vec<usize> = plans
        .iter()
        .enumerate()
        .filter(|(_, p)| p.needs_extraction && !p.skip)
        .map(|(i, _)| i)
        .collect();
    if jobs.is_empty() {
        return results;
    }

    let workers = workers.clamp(1, jobs.len());
    let next = AtomicUsize::new(0);
    let (jobs, next) = (&jobs, &next);

    let done: Vec<(usize, Result<ExtractedFields, ProcessingError>)> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..workers)
            .map(|_| {
                scope.spawn(move || {
                    let mut local = Vec::new();
                    while !shutdown.load(Ordering::Relaxed) {
                        let Some(&index) = jobs.get(next.fetch_add(1, Ordering::Relaxed)) else {
                            break;
                        };
                        local.push((index, processor.extract(&plans[index].locator)));
                    }
                    local
                })
            })
            .collect();

        let mut done = Vec::new();
        for handle in handles {
            match handle.join() {
                Ok(local) => done.extend(local),
                Err(_) => tracing::error!("Extraction worker panicked"),
            }
        }
        done
    });

    for (index, result) in done {
        results[index] = Some(result);
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::db::repository;
    use crate::db::sqlite::open_memory_database;
    use crate::models::NewOrder;
    use crate::pipeline::extraction::PlainTextLayer;
    use crate::pipeline::intake::{BlobStore, FsBlobStore};
    use crate::pipeline::reconcile::ReconcileEngine;

    const SLIP: &str = "BOLETO BANCO DO BRASIL\nNº do documento 012244\nVencimento 15/03/2024\n\
        Pagador: MERCADO X LTDA\nAutenticacao mecanica\nFim";
    const INVOICE: &str = "DANFE\nNF-e Nº 012244\nNatureza da Operação: Venda\nItens\nFim";
    const UNKNOWN: &str = "DANFE\nNF-e Nº 77777\nItens\nFim";
    const USER: i64 = 1;

    fn setup(workers: usize) -> (tempfile::TempDir, Connection, DocumentProcessor, i64) {
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
        let processor = DocumentProcessor::new(
            ReconcileEngine::sqlite(),
            Box::new(FsBlobStore::new(dir.path())),
            Box::new(PlainTextLayer),
            EngineConfig {
                blob_root: dir.path().to_path_buf(),
                extraction_workers: workers,
                ..EngineConfig::default()
            },
        );
        (dir, conn, processor, order_id)
    }

    fn stage(processor: &DocumentProcessor, name: &str, text: &str) {
        processor.blobs().put_file(name, text.as_bytes()).unwrap();
    }

    #[test]
    fn lock_is_exclusive() {
        let lock = PassLock::new();
        let guard = lock.acquire();
        assert!(lock.is_busy());
        assert!(lock.try_acquire().is_none());
        drop(guard);
        assert!(!lock.is_busy());
        assert!(lock.try_acquire().is_some());
    }

    #[test]
    fn lock_excludes_other_threads() {
        let lock = PassLock::new();
        let _guard = lock.acquire();
        std::thread::scope(|s| {
            let busy = s.spawn(|| lock.try_acquire().is_none()).join().unwrap();
            assert!(busy);
        });
    }

    #[test]
    fn full_pass_files_and_links() {
        let (_dir, conn, processor, order_id) = setup(2);
        stage(&processor, "boleto_12244.txt", SLIP);
        stage(&processor, "nf_12244.txt", INVOICE);
        stage(&processor, "nf_77777.txt", UNKNOWN);

        let report = run_pass(&conn, &processor, USER, &AtomicBool::new(false));

        assert!(report.errors.is_empty(), "{:?}", report.errors);
        assert_eq!(report.files_seen, 3);
        assert_eq!(report.files_extracted, 3);
        assert_eq!(report.linked, 2);
        assert_eq!(report.unlinked, 1);
        let order = repository::get_order(&conn, order_id).unwrap().unwrap();
        assert_eq!(order.payment_slip_path.as_deref(), Some("slips/boleto_12244.txt"));
        assert_eq!(order.invoice_path.as_deref(), Some("invoices/nf_12244.txt"));
    }

    #[test]
    fn second_pass_skips_linked_and_reuses_cache() {
        let (_dir, conn, processor, _) = setup(4);
        stage(&processor, "boleto_12244.txt", SLIP);
        stage(&processor, "nf_77777.txt", UNKNOWN);
        run_pass(&conn, &processor, USER, &AtomicBool::new(false));

        let again = run_pass(&conn, &processor, USER, &AtomicBool::new(false));

        assert_eq!(again.files_skipped, 1);
        assert_eq!(again.unlinked, 1);
        assert_eq!(again.files_extracted, 0);
        assert!(again.errors.is_empty());
    }

    #[test]
    fn stop_flag_prevents_work() {
        let (_dir, conn, processor, order_id) = setup(1);
        stage(&processor, "boleto_12244.txt", SLIP);

        let report = run_pass(&conn, &processor, USER, &AtomicBool::new(true));

        assert!(report.interrupted);
        assert!(report.outcomes.is_empty());
        let order = repository::get_order(&conn, order_id).unwrap().unwrap();
        assert_eq!(order.payment_slip_path, None);
    }

    #[test]
    fn unreadable_file_is_reported_and_pass_continues() {
        let (dir, conn, processor, _) = setup(2);
        stage(&processor, "boleto_12244.txt", SLIP);
        // Bypass the organizer: a binary blob already sitting in a bucket.
        std::fs::create_dir_all(dir.path().join("invoices")).unwrap();
        std::fs::write(dir.path().join("invoices/broken.bin"), [0u8, 1, 2, 3, 0, 0, 7]).unwrap();

        let report = run_pass(&conn, &processor, USER, &AtomicBool::new(false));

        assert_eq!(report.linked, 1);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].starts_with("invoices/broken.bin"));
    }

    #[test]
    fn runner_try_pass_returns_none_while_running() {
        let (_dir, conn, processor, _) = setup(1);
        let runner = BatchRunner::new(processor);
        let _guard = runner.lock.acquire();
        assert!(runner.is_running());
        assert!(runner.try_run_pass(&conn, USER).is_none());
    }
}
