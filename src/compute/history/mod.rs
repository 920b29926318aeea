//! Evaluation history for one dataset.
//!
//! Keeps every evaluated candidate so repeated proposals are served from
//! memory instead of the external evaluator. Persisted as a binary
//! checkpoint, with a fallback to the plain-text log.

pub mod format;
pub mod legacy;

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::Path;

use log::{debug, info, warn};

use crate::compute::cost::{CostFunction, CostModel};
use crate::schema::Candidate;

pub use legacy::{LegacyLog, LegacyLogError};

/// Where a restored history came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreSource {
    Checkpoint,
    LegacyLog,
    Empty,
}

/// Ordered, deduplicated record of evaluated candidates.
#[derive(Debug, Clone, Default)]
pub struct History {
    dataset: usize,
    entries: Vec<Candidate>,
    last_added: usize,
}

impl History {
    pub fn new(dataset: usize) -> Self {
        Self {
            dataset,
            ..Default::default()
        }
    }

    /// Build from existing entries, dropping later duplicates.
    pub fn from_entries(dataset: usize, entries: Vec<Candidate>) -> Self {
        let mut history = Self::new(dataset);
        for entry in entries {
            history.append(entry);
        }
        history.last_added = 0;
        history
    }

    pub fn dataset(&self) -> usize {
        self.dataset
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[Candidate] {
        &self.entries
    }

    pub fn get(&self, position: usize) -> Option<&Candidate> {
        self.entries.get(position)
    }

    /// Position of the first stored entry matching `candidate` within tolerance.
    pub fn lookup(&self, candidate: &Candidate) -> Option<usize> {
        self.entries.iter().position(|e| e.matches(candidate))
    }

    /// Largest sequence index stored.
    pub fn max_sequence_index(&self) -> Option<u64> {
        self.entries.iter().filter_map(|e| e.sequence_index).max()
    }

    /// Append unless a matching entry exists. Returns whether it was stored.
    ///
    /// An entry without a sequence index receives its storage position.
    pub fn append(&mut self, mut candidate: Candidate) -> bool {
        if self.lookup(&candidate).is_some() {
            return false;
        }
        if candidate.sequence_index.is_none() {
            candidate.sequence_index = Some(self.entries.len() as u64);
        }
        self.entries.push(candidate);
        true
    }

    /// Append a tested batch, skipping members served from history.
    ///
    /// Returns the number of entries stored.
    pub fn append_batch(&mut self, batch: &[Candidate], from_history: &[bool]) -> usize {
        let mut added = 0;
        for (i, candidate) in batch.iter().enumerate() {
            if from_history.get(i).copied().unwrap_or(false) {
                continue;
            }
            if self.append(candidate.clone()) {
                added += 1;
            }
        }
        self.last_added = added;
        added
    }

    /// Entries stored by the most recent [`History::append_batch`].
    pub fn entries_last_added(&self) -> &[Candidate] {
        &self.entries[self.entries.len() - self.last_added..]
    }

    /// Re-score stored entries if the cost model changed, or always when `force`.
    ///
    /// Change is detected by re-scoring the first entry. Duds keep their
    /// sentinel cost. Returns whether costs were recomputed.
    pub fn recompute_costs<C: CostModel + ?Sized>(&mut self, cost: &C, force: bool) -> bool {
        let Some(first) = self.entries.first() else {
            return false;
        };

        let changed = !first.is_dud() && cost.cost(first, self.dataset) != first.cost;
        if !force && !changed {
            return false;
        }

        let dataset = self.dataset;
        for entry in self.entries.iter_mut().filter(|e| !e.is_dud()) {
            entry.cost = cost.cost(entry, dataset);
        }
        info!(
            "Recomputed costs of {} history entries for dataset {}",
            self.entries.len(),
            dataset
        );
        true
    }

    /// Drop entries carrying the dud sentinel. Returns how many were removed.
    pub fn remove_duds(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| !e.is_dud());
        self.last_added = 0;
        before - self.entries.len()
    }

    /// Entries sorted by ascending cost for reporting.
    pub fn reportable(&self, exclude_duds: bool) -> Vec<&Candidate> {
        let mut sorted: Vec<&Candidate> = self
            .entries
            .iter()
            .filter(|e| !(exclude_duds && e.is_unusable()))
            .collect();
        sorted.sort_by(|a, b| a.cost.total_cmp(&b.cost));
        sorted
    }

    /// Write a binary checkpoint.
    pub fn save_checkpoint(&self, path: &Path) -> io::Result<()> {
        let mut w = BufWriter::new(File::create(path)?);
        format::write_checkpoint(&mut w, &self.entries)?;
        w.flush()
    }

    /// Read a binary checkpoint.
    pub fn load_checkpoint(dataset: usize, path: &Path) -> io::Result<Self> {
        let mut r = BufReader::new(File::open(path)?);
        let entries = format::read_checkpoint(&mut r)?;
        Ok(Self::from_entries(dataset, entries))
    }

    /// Restore from the checkpoint, or from the text log when the checkpoint
    /// is absent, empty or unreadable.
    ///
    /// Costs are re-scored when the cost function differs from the one the
    /// text log recorded, or when the stored first entry no longer agrees.
    pub fn restore(
        dataset: usize,
        checkpoint_path: &Path,
        log_path: &Path,
        regions_path: &Path,
        cost: &CostFunction,
    ) -> (Self, RestoreSource) {
        if checkpoint_path.exists() {
            match Self::load_checkpoint(dataset, checkpoint_path) {
                Ok(mut history) if !history.is_empty() => {
                    info!(
                        "Restored {} entries for dataset {} from {}",
                        history.len(),
                        dataset,
                        checkpoint_path.display()
                    );
                    history.recompute_costs(cost, false);
                    return (history, RestoreSource::Checkpoint);
                }
                Ok(_) => debug!("Checkpoint {} is empty", checkpoint_path.display()),
                Err(e) => warn!(
                    "Ignoring unreadable checkpoint {}: {}",
                    checkpoint_path.display(),
                    e
                ),
            }
        }

        match LegacyLog::read(log_path, regions_path) {
            Ok(Some(log)) if !log.entries.is_empty() => {
                let force = !log.matches_cost(cost, dataset);
                let mut history = Self::from_entries(dataset, log.entries);
                info!(
                    "Rebuilt {} entries for dataset {} from {}",
                    history.len(),
                    dataset,
                    log_path.display()
                );
                history.recompute_costs(cost, force);
                (history, RestoreSource::LegacyLog)
            }
            Ok(_) => (Self::new(dataset), RestoreSource::Empty),
            Err(e) => {
                warn!("Ignoring unreadable log {}: {}", log_path.display(), e);
                (Self::new(dataset), RestoreSource::Empty)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{
        Component, ComponentClass, CostConfig, DUD_COST, Diagnostics, RegionStats, SpreadStats,
    };
    use proptest::prelude::*;
    use tempfile::tempdir;

    fn candidate(values: &[f64]) -> Candidate {
        Candidate::from_components(
            values
                .iter()
                .enumerate()
                .map(|(i, &v)| Component::new(30 + i as u32, ComponentClass::Exponent, v))
                .collect(),
        )
    }

    fn evaluated(values: &[f64], gnorm: f64) -> Candidate {
        let mut c = candidate(values);
        c.diagnostics = Diagnostics {
            regions: vec![RegionStats {
                gnorm,
                ..Default::default()
            }],
            orbital_spread: vec![SpreadStats {
                spread: 0.02,
                label: "F".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        };
        c
    }

    struct Doubled;

    impl CostModel for Doubled {
        fn cost(&self, candidate: &Candidate, _dataset: usize) -> f64 {
            2.0 * candidate.diagnostics.gnorm(0)
        }
    }

    #[test]
    fn test_append_keeps_first() {
        let mut history = History::new(0);
        let mut first = candidate(&[1.0, 2.0]);
        first.cost = 5.0;
        let mut second = candidate(&[1.0 + 1e-7, 2.0]);
        second.cost = 1.0;

        assert!(history.append(first));
        assert!(!history.append(second));
        assert_eq!(history.len(), 1);
        assert_eq!(history.entries()[0].cost, 5.0);
        assert_eq!(history.entries()[0].sequence_index, Some(0));
    }

    #[test]
    fn test_lookup() {
        let history = History::from_entries(0, vec![candidate(&[1.0]), candidate(&[2.0])]);
        assert_eq!(history.lookup(&candidate(&[2.0 + 5e-7])), Some(1));
        assert_eq!(history.lookup(&candidate(&[3.0])), None);
        assert_eq!(history.lookup(&candidate(&[1.0, 2.0])), None);
    }

    #[test]
    fn test_append_batch_skips_history_hits() {
        let mut history = History::new(0);
        let batch = vec![candidate(&[1.0]), candidate(&[2.0]), candidate(&[3.0])];

        let added = history.append_batch(&batch, &[false, true, false]);
        assert_eq!(added, 2);
        assert_eq!(history.entries_last_added().len(), 2);
        assert_eq!(history.entries_last_added()[1].values(), vec![3.0]);

        assert_eq!(history.append_batch(&batch, &[false; 3]), 1);
        assert_eq!(history.entries_last_added()[0].values(), vec![2.0]);
    }

    #[test]
    fn test_recompute_costs_idempotent() {
        let mut history = History::new(0);
        history.append(evaluated(&[1.0], 0.5));
        history.append(evaluated(&[2.0], 1.5));

        assert!(history.recompute_costs(&Doubled, false));
        let costs: Vec<f64> = history.entries().iter().map(|e| e.cost).collect();
        assert_eq!(costs, vec![1.0, 3.0]);

        assert!(!history.recompute_costs(&Doubled, false));
        assert!(history.recompute_costs(&Doubled, true));
        let again: Vec<f64> = history.entries().iter().map(|e| e.cost).collect();
        assert_eq!(costs, again);
    }

    #[test]
    fn test_recompute_skips_duds() {
        let mut history = History::new(0);
        let mut dud = evaluated(&[1.0], 0.5);
        dud.mark_failed();
        history.append(dud);
        history.append(evaluated(&[2.0], 1.5));

        assert!(history.recompute_costs(&Doubled, true));
        assert_eq!(history.entries()[0].cost, DUD_COST);
        assert_eq!(history.entries()[1].cost, 3.0);

        assert_eq!(history.remove_duds(), 1);
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn test_reportable_sorted() {
        let mut history = History::new(0);
        for (v, cost) in [(1.0, 3.0), (2.0, 1.0), (3.0, 2.0)] {
            let mut c = candidate(&[v]);
            c.cost = cost;
            history.append(c);
        }
        let mut dud = candidate(&[4.0]);
        dud.mark_failed();
        history.append(dud);

        let report = history.reportable(true);
        let costs: Vec<f64> = report.iter().map(|e| e.cost).collect();
        assert_eq!(costs, vec![1.0, 2.0, 3.0]);
        assert_eq!(history.reportable(false).len(), 4);
    }

    #[test]
    fn test_checkpoint_file_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("output.log.0.restart");

        let mut history = History::new(0);
        history.append(evaluated(&[1.0, 2.0], 0.5));
        history.append(evaluated(&[3.0, 4.0], 0.25));
        history.save_checkpoint(&path).unwrap();

        let loaded = History::load_checkpoint(0, &path).unwrap();
        assert_eq!(loaded.entries(), history.entries());
    }

    #[test]
    fn test_restore_prefers_checkpoint() {
        let dir = tempdir().unwrap();
        let checkpoint = dir.path().join("output.log.0.restart");
        let log = dir.path().join("output.log.0");
        let regions = dir.path().join("regions.log");
        let cost = CostFunction::new(&CostConfig::default());

        let mut c = evaluated(&[1.0, 2.0], 0.5);
        c.cost = cost.cost(&c, 0);
        let mut history = History::new(0);
        history.append(c);
        history.save_checkpoint(&checkpoint).unwrap();

        let (restored, source) = History::restore(0, &checkpoint, &log, &regions, &cost);
        assert_eq!(source, RestoreSource::Checkpoint);
        assert_eq!(restored.entries(), history.entries());
    }

    #[test]
    fn test_restore_falls_back_to_legacy_log() {
        let dir = tempdir().unwrap();
        let checkpoint = dir.path().join("output.log.0.restart");
        let log = dir.path().join("output.log.0");
        let regions = dir.path().join("regions.log");
        let cost = CostFunction::new(&CostConfig::default());

        let mut batch = vec![evaluated(&[1.0, 2.0], 0.5), evaluated(&[3.0, 4.0], 0.25)];
        for (i, c) in batch.iter_mut().enumerate() {
            c.sequence_index = Some(i as u64);
            c.cost = cost.cost(c, 0);
        }
        legacy::append_log_round(&log, &cost, 0, &batch).unwrap();
        legacy::append_regions(&regions, &batch, &[false, false]).unwrap();
        std::fs::write(&checkpoint, b"garbage").unwrap();

        let (restored, source) = History::restore(0, &checkpoint, &log, &regions, &cost);
        assert_eq!(source, RestoreSource::LegacyLog);
        assert_eq!(restored.len(), 2);

        // The text log loses precision on eV-scaled values only.
        for (old, new) in batch.iter().zip(restored.entries()) {
            assert_eq!(old.components, new.components);
            assert_eq!(old.sequence_index, new.sequence_index);
            assert!((old.cost - new.cost).abs() < 1e-9);
            assert!(
                (old.diagnostics.anion_spread() - new.diagnostics.anion_spread()).abs() < 1e-12
            );
        }
    }

    #[test]
    fn test_checkpoint_and_legacy_restore_agree_on_rank() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("output.log.0");
        let regions = dir.path().join("regions.log");
        let cost = CostFunction::new(&CostConfig::default());

        let mut batch = vec![evaluated(&[1.0, 2.0], 0.25), evaluated(&[3.0, 4.0], 0.5)];
        for (i, c) in batch.iter_mut().enumerate() {
            c.sequence_index = Some(i as u64);
            c.cost = cost.cost(c, 0);
            c.rank = i as u32 + 1;
        }
        let mut history = History::new(0);
        history.append_batch(&batch, &[false, false]);

        let checkpoint = dir.path().join("output.log.0.restart");
        history.save_checkpoint(&checkpoint).unwrap();
        legacy::append_log_round(&log, &cost, 0, &batch).unwrap();
        legacy::append_regions(&regions, &batch, &[false, false]).unwrap();

        let (from_checkpoint, source) = History::restore(0, &checkpoint, &log, &regions, &cost);
        assert_eq!(source, RestoreSource::Checkpoint);
        let missing = dir.path().join("missing.restart");
        let (from_log, source) = History::restore(0, &missing, &log, &regions, &cost);
        assert_eq!(source, RestoreSource::LegacyLog);

        let ranks = |h: &History| h.entries().iter().map(|e| e.rank).collect::<Vec<_>>();
        assert_eq!(ranks(&from_checkpoint), vec![1, 2]);
        assert_eq!(ranks(&from_log), ranks(&from_checkpoint));
    }

    #[test]
    fn test_restore_nothing() {
        let dir = tempdir().unwrap();
        let cost = CostFunction::new(&CostConfig::default());
        let (restored, source) = History::restore(
            0,
            &dir.path().join("a"),
            &dir.path().join("b"),
            &dir.path().join("c"),
            &cost,
        );
        assert_eq!(source, RestoreSource::Empty);
        assert!(restored.is_empty());
    }

    proptest! {
        #[test]
        fn test_no_two_entries_match(values in prop::collection::vec(
            prop::collection::vec(prop::sample::select(vec![0.5, 1.0, 1.0 + 1e-7, 2.0]), 2),
            0..30,
        )) {
            let mut history = History::new(0);
            for v in &values {
                history.append(candidate(v));
            }
            let entries = history.entries();
            for i in 0..entries.len() {
                for j in (i + 1)..entries.len() {
                    prop_assert!(!entries[i].matches(&entries[j]));
                }
            }
        }
    }
}
