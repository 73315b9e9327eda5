//! Intake organizer: files the staging area into buckets.
//!
//! Each primary document is checked for a bonus shipment first, then
//! classified, then moved with its sidecars into `bonus/`, `invoices/`,
//! `slips/` or `unclassified/`. A file that disappears mid-pass is counted,
//! not failed. Running the organizer twice is a no-op the second time since
//! staging is empty.

use std::collections::BTreeMap;

use serde::Serialize;

use super::format::{extension_of, is_sidecar_extension, stem_of};
use super::storage::{join_locator, locator_file_name, unique_name, BlobStore, MoveOutcome};
use super::IntakeError;
use crate::config::STAGING_DIR;
use crate::models::enums::DocumentClass;
use crate::pipeline::classify::classify;
use crate::pipeline::extraction::{detect_bonus, full_text, TextLayer};

/// Where one primary document went.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Placement {
    pub from: String,
    pub to: String,
    pub class: DocumentClass,
    pub sidecars: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct OrganizeReport {
    pub placements: Vec<Placement>,
    pub already_gone: usize,
    pub errors: Vec<String>,
}

impl OrganizeReport {
    pub fn count(&self, class: DocumentClass) -> usize {
        self.placements.iter().filter(|p| p.class == class).count()
    }

    pub fn sidecars_moved(&self) -> usize {
        self.placements.iter().map(|p| p.sidecars.len()).sum()
    }
}

/// A primary document and the sidecars that travel with it.
#[derive(Debug, Clone, PartialEq)]
struct StagedGroup {
    primary: String,
    sidecars: Vec<String>,
}

/// Group staged file names by stem.
///
/// A stem with any non-sidecar file: those are primaries, the rest follow the
/// first primary. A stem with only sidecar extensions: a `.txt` is the primary
/// (plain-text document); otherwise every file stands alone.
fn group_staged(names: &[String]) -> Vec<StagedGroup> {
    let mut by_stem: BTreeMap<String, Vec<&String>> = BTreeMap::new();
    for name in names {
        by_stem.entry(stem_of(name)).or_default().push(name);
    }

    let mut groups = Vec::new();
    for files in by_stem.into_values() {
        let (mut primaries, mut sidecars): (Vec<&String>, Vec<&String>) =
            files.into_iter().partition(|n| !is_sidecar_extension(n));

        if primaries.is_empty() {
            let (txt, rest): (Vec<&String>, Vec<&String>) = sidecars
                .into_iter()
                .partition(|n| extension_of(n).as_deref() == Some("txt"));
            if txt.is_empty() {
                primaries = rest;
                sidecars = Vec::new();
            } else {
                primaries = txt;
                sidecars = rest;
            }
        }

        let mut sidecars: Vec<String> = sidecars.into_iter().cloned().collect();
        for primary in primaries {
            groups.push(StagedGroup {
                primary: primary.clone(),
                sidecars: std::mem::take(&mut sidecars),
            });
        }
    }
    groups
}

/// Primary documents among files of one directory, sidecars dropped.
pub fn primary_files(names: &[String]) -> Vec<String> {
    group_staged(names).into_iter().map(|g| g.primary).collect()
}

/// Bonus detector first, classifier second. Unreadable text is unclassified.
fn decide_class(bytes: &[u8], layer: &dyn TextLayer, name: &str) -> DocumentClass {
    let pages = match layer.pages(bytes) {
        Ok(pages) => pages,
        Err(e) => {
            tracing::warn!(file = %name, error = %e, "No readable text, filing as unclassified");
            return DocumentClass::Unclassified;
        }
    };

    if let Some(bonus) = detect_bonus(&full_text(&pages)) {
        tracing::info!(file = %name, phrase = bonus.phrase, "Bonus shipment detected");
        return DocumentClass::BonusShipment;
    }
    pages
        .first()
        .map(|p| classify(&p.text))
        .unwrap_or(DocumentClass::Unclassified)
}

/// File every staged document into its bucket.
pub fn organize_staging(blobs: &dyn BlobStore, layer: &dyn TextLayer) -> Result<OrganizeReport, IntakeError> {
    let staged = blobs.list_dir(STAGING_DIR)?;
    let names: Vec<String> = staged
        .iter()
        .map(|l| locator_file_name(l).to_string())
        .collect();

    let mut report = OrganizeReport::default();

    for group in group_staged(&names) {
        let from = join_locator(STAGING_DIR, &group.primary);

        let bytes = match blobs.read_file(&from) {
            Ok(bytes) => bytes,
            Err(IntakeError::NotFound(_)) => {
                tracing::debug!(file = %from, "Staged file already gone");
                report.already_gone += 1;
                continue;
            }
            Err(e) => {
                tracing::warn!(file = %from, error = %e, "Cannot read staged file");
                report.errors.push(format!("{from}: {e}"));
                continue;
            }
        };

        let class = decide_class(&bytes, layer, &group.primary);
        let bucket = class.bucket();
        let dest_name = unique_name(&group.primary, |n| blobs.file_exists(&join_locator(bucket, n)));
        let to = join_locator(bucket, &dest_name);

        match blobs.move_file(&from, &to) {
            Ok(MoveOutcome::Moved) => {}
            Ok(MoveOutcome::AlreadyGone) => {
                report.already_gone += 1;
                continue;
            }
            Err(e) => {
                tracing::warn!(file = %from, error = %e, "Move failed, file stays in staging");
                report.errors.push(format!("{from}: {e}"));
                continue;
            }
        }

        let dest_stem = stem_of(&dest_name);
        let mut moved_sidecars = Vec::new();
        for sidecar in &group.sidecars {
            let sidecar_from = join_locator(STAGING_DIR, sidecar);
            let ext = extension_of(sidecar).unwrap_or_default();
            let sidecar_to = join_locator(bucket, &format!("{dest_stem}.{ext}"));
            match blobs.move_file(&sidecar_from, &sidecar_to) {
                Ok(MoveOutcome::Moved) => moved_sidecars.push(sidecar_to),
                Ok(MoveOutcome::AlreadyGone) => report.already_gone += 1,
                Err(e) => report.errors.push(format!("{sidecar_from}: {e}")),
            }
        }

        tracing::debug!(from = %from, to = %to, class = class.as_str(), "Filed document");
        report.placements.push(Placement {
            from,
            to,
            class,
            sidecars: moved_sidecars,
        });
    }

    tracing::info!(
        invoices = report.count(DocumentClass::Invoice),
        slips = report.count(DocumentClass::PaymentSlip),
        bonus = report.count(DocumentClass::BonusShipment),
        unclassified = report.count(DocumentClass::Unclassified),
        already_gone = report.already_gone,
        errors = report.errors.len(),
        "Staging organized"
    );

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::extraction::{DefaultTextLayer, PlainTextLayer};
    use crate::pipeline::intake::storage::FsBlobStore;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn store() -> (tempfile::TempDir, FsBlobStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());
        (dir, store)
    }

    #[test]
    fn sidecars_follow_primary() {
        let groups = group_staged(&names(&["nf_1.json", "nf_1.pdf", "nf_1.xml"]));
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].primary, "nf_1.pdf");
        assert_eq!(groups[0].sidecars, vec!["nf_1.json", "nf_1.xml"]);
    }

    #[test]
    fn standalone_text_is_primary() {
        let groups = group_staged(&names(&["boleto.txt", "boleto.json", "notes.xml"]));
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].primary, "boleto.txt");
        assert_eq!(groups[0].sidecars, vec!["boleto.json"]);
        assert_eq!(groups[1].primary, "notes.xml");
    }

    #[test]
    fn primary_files_of_a_bucket() {
        let primaries = primary_files(&names(&["slips/a.json", "slips/a.pdf", "slips/b.txt"]));
        assert_eq!(primaries, vec!["slips/a.pdf", "slips/b.txt"]);
    }

    #[test]
    fn files_every_class() {
        let (_dir, store) = store();
        store.put_file("boleto_12244.txt", "BOLETO\nPagador: MERCADO X".as_bytes()).unwrap();
        store.put_file("nf_12263.txt", "DANFE\nNATUREZA DA OPERAÇÃO\nVenda".as_bytes()).unwrap();
        store.put_file("nf_12263.json", b"{}").unwrap();
        store
            .put_file("nf_900.txt", "DANFE\nNatureza da Operação: Remessa em bonificação".as_bytes())
            .unwrap();
        store.put_file("contrato.txt", b"Contrato de servicos").unwrap();

        let report = organize_staging(&store, &PlainTextLayer).unwrap();

        assert_eq!(report.count(DocumentClass::PaymentSlip), 1);
        assert_eq!(report.count(DocumentClass::Invoice), 1);
        assert_eq!(report.count(DocumentClass::BonusShipment), 1);
        assert_eq!(report.count(DocumentClass::Unclassified), 1);
        assert_eq!(report.sidecars_moved(), 1);
        assert!(report.errors.is_empty());

        assert!(store.file_exists("slips/boleto_12244.txt"));
        assert!(store.file_exists("invoices/nf_12263.txt"));
        assert!(store.file_exists("invoices/nf_12263.json"));
        assert!(store.file_exists("bonus/nf_900.txt"));
        assert!(store.file_exists("unclassified/contrato.txt"));
        assert!(store.list_dir(STAGING_DIR).unwrap().is_empty());
    }

    #[test]
    fn second_run_is_a_no_op() {
        let (_dir, store) = store();
        store.put_file("boleto.txt", b"BOLETO").unwrap();
        organize_staging(&store, &PlainTextLayer).unwrap();
        let again = organize_staging(&store, &PlainTextLayer).unwrap();
        assert!(again.placements.is_empty());
        assert_eq!(again.already_gone, 0);
    }

    #[test]
    fn name_collision_gets_suffix() {
        let (dir, store) = store();
        std::fs::create_dir_all(dir.path().join("slips")).unwrap();
        std::fs::write(dir.path().join("slips/boleto.txt"), b"older").unwrap();
        store.put_file("boleto.txt", b"BOLETO novo").unwrap();

        let report = organize_staging(&store, &PlainTextLayer).unwrap();
        assert_eq!(report.placements[0].to, "slips/boleto_1.txt");
    }

    #[test]
    fn unreadable_file_is_unclassified() {
        let (_dir, store) = store();
        store.put_file("scan.jpg", &[0xFF, 0xD8, 0xFF, 0xE0, 0x00]).unwrap();
        let report = organize_staging(&store, &DefaultTextLayer::new()).unwrap();
        assert_eq!(report.placements[0].class, DocumentClass::Unclassified);
    }

    /// Lists a file that is no longer on disk.
    struct VanishingStore {
        inner: FsBlobStore,
    }

    impl BlobStore for VanishingStore {
        fn put_file(&self, filename: &str, bytes: &[u8]) -> Result<String, IntakeError> {
            self.inner.put_file(filename, bytes)
        }
        fn read_file(&self, locator: &str) -> Result<Vec<u8>, IntakeError> {
            self.inner.read_file(locator)
        }
        fn move_file(&self, from: &str, to: &str) -> Result<MoveOutcome, IntakeError> {
            self.inner.move_file(from, to)
        }
        fn file_exists(&self, locator: &str) -> bool {
            self.inner.file_exists(locator)
        }
        fn list_dir(&self, prefix: &str) -> Result<Vec<String>, IntakeError> {
            let mut listed = self.inner.list_dir(prefix)?;
            listed.push(join_locator(prefix, "ghost.pdf"));
            Ok(listed)
        }
    }

    #[test]
    fn vanished_file_is_counted_not_failed() {
        let dir = tempfile::tempdir().unwrap();
        let store = VanishingStore {
            inner: FsBlobStore::new(dir.path()),
        };
        store.put_file("boleto.txt", b"BOLETO").unwrap();

        let report = organize_staging(&store, &PlainTextLayer).unwrap();
        assert_eq!(report.already_gone, 1);
        assert_eq!(report.placements.len(), 1);
        assert!(report.errors.is_empty());
    }
}
