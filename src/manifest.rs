use crate::results::{ImageRecord, ResultPage};
use std::collections::HashSet;

/// Deduplicated, first-seen-ordered union of every record collected during a run
#[derive(Debug, Default)]
pub struct Manifest {
    records: Vec<ImageRecord>,
    seen: HashSet<String>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a record unless its identifier is already present.
    /// The first occurrence wins; later duplicates are discarded.
    pub fn insert(&mut self, record: ImageRecord) -> bool {
        if self.contains(record.id()) {
            ::log::trace!("Discarding duplicate record {}", record.id());
            return false;
        }
        self.seen.insert(record.id().to_string());
        self.records.push(record);
        true
    }

    /// Merges a page and returns how many records were new
    pub fn merge_page(&mut self, page: &ResultPage) -> usize {
        page.records
            .iter()
            .filter(|record| self.insert((*record).clone()))
            .count()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.seen.contains(id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[ImageRecord] {
        &self.records
    }

    pub fn iter(&self) -> impl Iterator<Item = &ImageRecord> {
        self.records.iter()
    }
}
