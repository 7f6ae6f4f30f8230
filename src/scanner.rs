//! Current-maximum scan of one scope lane.

use crate::code::{parse_code, ScopeKey};
use crate::error::SeqError;
use crate::store::RecordStore;

pub struct SequenceScanner<S> {
    store: S,
    window: usize,
}

impl<S: RecordStore> SequenceScanner<S> {
    /// `window` is how many of the most recent prefix matches are inspected
    pub fn new(store: S, window: usize) -> Self {
        Self { store, window: window.max(1) }
    }

    /// Highest SEQ in use in `key`'s lane, `0` when the lane is empty.
    ///
    /// Rows that share the LIKE prefix but parse into another lane (a longer
    /// scope, a non-numeric material code) are ignored. Store errors are
    /// returned as [`SeqError::QueryFailure`] or [`SeqError::StoreRejected`],
    /// never as zero.
    pub fn current_max(&self, key: &ScopeKey) -> Result<u32, SeqError> {
        let prefix = key.prefix();
        let rows = self
            .store
            .query_by_code_prefix(key.doc_type.table(), &prefix, self.window)?;

        let max = rows
            .iter()
            .filter_map(|row| parse_code(&row.code))
            .filter(|parsed| parsed.doc_type == key.doc_type && parsed.scope == key.scope)
            .map(|parsed| parsed.sequence)
            .max()
            .unwrap_or(0);

        log::trace!("Scanned {} row(s) with prefix '{prefix}', max sequence {max}", rows.len());
        Ok(max)
    }
}
