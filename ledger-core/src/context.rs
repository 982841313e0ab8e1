//! Contexts track the mutable state of a best-chain ledger: the unspent
//! transparent outputs, the committed shielded notes with their spentness,
//! the running issuance total, and the log of applied transactions.

use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::transaction::{Amount, BcTransaction, Note, NoteId, Txo};

/// The spend status of a committed note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Spentness {
    Unspent,
    Spent,
}

/// Committed notes in commitment order, with in-place spentness updates.
///
/// An append-only vector carries the order; a map from note identity to
/// vector position and spentness carries the status. Spending a note never
/// moves it.
#[derive(Debug, Clone, Default)]
pub struct NoteMap {
    order: Vec<Note>,
    entries: HashMap<NoteId, (usize, Spentness)>,
}

impl NoteMap {
    /// Appends a note as unspent. Returns `false` if it was already present.
    fn insert_unspent(&mut self, note: Note) -> bool {
        if self.entries.contains_key(&note.id) {
            return false;
        }
        self.entries.insert(note.id, (self.order.len(), Spentness::Unspent));
        self.order.push(note);
        true
    }

    fn mark_spent(&mut self, id: NoteId) {
        if let Some((_, spentness)) = self.entries.get_mut(&id) {
            *spentness = Spentness::Spent;
        }
    }

    #[must_use]
    pub fn spentness(&self, id: NoteId) -> Option<Spentness> {
        self.entries.get(&id).map(|&(_, spentness)| spentness)
    }

    /// Notes with their spentness, in commitment order.
    pub fn iter(&self) -> impl Iterator<Item = (Note, Spentness)> + '_ {
        self.order
            .iter()
            .map(|note| (*note, self.entries[&note.id].1))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// A context for checking transactions for contextual validity.
///
/// `add_if_valid` is the sole mutation point. `Clone` yields an independent
/// snapshot (the transactions themselves are shared, which is fine because
/// they are immutable); snapshots serve as anchors for later shielded
/// spends.
#[derive(Debug, Clone, Default)]
pub struct BcContext {
    transactions: Vec<Rc<BcTransaction>>,
    utxo_set: HashSet<Txo>,
    notes: NoteMap,
    total_issuance: Amount,
}

impl BcContext {
    /// An empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Can all of `notes` be spent in this context?
    #[must_use]
    pub fn can_spend(&self, notes: &[Note]) -> bool {
        notes
            .iter()
            .all(|note| self.notes.spentness(note.id) == Some(Spentness::Unspent))
    }

    fn check(&self, tx: &BcTransaction) -> bool {
        tx.transparent_inputs()
            .iter()
            .all(|txo| self.utxo_set.contains(txo))
            && self.can_spend(tx.shielded_inputs())
    }

    /// Is `tx` contextually valid here? Every transparent input must be in
    /// the UTXO set and every shielded input committed and unspent.
    #[must_use]
    pub fn is_valid(&self, tx: &BcTransaction) -> bool {
        self.check(tx)
    }

    /// If `tx` is valid in this context, applies it atomically and returns
    /// `true`; otherwise leaves the context unchanged and returns `false`.
    pub fn add_if_valid(&mut self, tx: &Rc<BcTransaction>) -> bool {
        if !self.check(tx) {
            tracing::debug!(tx = %tx.id(), "rejecting contextually invalid transaction");
            return false;
        }
        for txo in tx.transparent_inputs() {
            self.utxo_set.remove(txo);
        }
        for txo in tx.transparent_outputs() {
            self.utxo_set.insert(*txo);
        }
        for note in tx.shielded_inputs() {
            self.notes.mark_spent(note.id);
        }
        for note in tx.shielded_outputs() {
            // Output notes are freshly created by the transaction
            // constructor, so a collision means the driver applied the same
            // transaction twice.
            assert!(
                self.notes.insert_unspent(*note),
                "note commitment {} added twice",
                note.id
            );
        }
        self.total_issuance += tx.issuance();
        self.transactions.push(Rc::clone(tx));
        true
    }

    /// Notes committed in this context with their spentness, preserving the
    /// commitment order.
    #[must_use]
    pub fn committed_notes(&self) -> Vec<(Note, Spentness)> {
        self.notes.iter().collect()
    }

    #[must_use]
    pub fn total_issuance(&self) -> Amount {
        self.total_issuance
    }

    /// The applied transactions, in application order.
    #[must_use]
    pub fn transactions(&self) -> &[Rc<BcTransaction>] {
        &self.transactions
    }

    /// The current unspent transparent outputs, in no particular order.
    pub fn utxos(&self) -> impl Iterator<Item = &Txo> {
        self.utxo_set.iter()
    }
}
