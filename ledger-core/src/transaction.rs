use std::fmt;
use std::rc::Rc;

use shared::Unique;

use crate::context::BcContext;
use crate::error::LedgerError;

/// A monetary amount. Output values and issuance are unsigned, so the
/// non-negativity rules hold by construction; fees are signed because a
/// coinbase absorbs the fees paid by its sibling transactions.
pub type Amount = u64;

/// Identity of a transaction. Stands in for a transaction hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TxId(Unique);

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx{}", self.0)
    }
}

/// A transparent transaction output, identified by the transaction that
/// created it and its index. Referencing one as an input spends it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Txo {
    pub tx: TxId,
    pub index: usize,
    pub value: Amount,
}

/// Identity of a shielded note. Stands in for both the note commitment and
/// the nullifier, which this model conflates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NoteId(Unique);

impl fmt::Display for NoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "note{}", self.0)
    }
}

/// A shielded note.
///
/// Each note has a fresh identity, modelling the unique commitment and
/// nullifier of the real protocol; no actual privacy is maintained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Note {
    pub id: NoteId,
    pub value: Amount,
}

/// A best-chain transaction, immutable once constructed.
///
/// Inputs reference outputs of previously constructed transactions: obtain
/// [`Txo`]s from [`BcTransaction::transparent_output`] and [`Note`]s from
/// [`BcTransaction::shielded_output`] rather than building them by hand.
#[derive(Debug)]
pub struct BcTransaction {
    id: TxId,
    transparent_inputs: Vec<Txo>,
    transparent_outputs: Vec<Txo>,
    shielded_inputs: Vec<Note>,
    shielded_outputs: Vec<Note>,
    fee: i64,
    anchor: Option<BcContext>,
    issuance: Amount,
}

impl BcTransaction {
    /// Constructs a transaction and checks every construction invariant:
    ///
    /// * a transaction with any inputs must have `fee >= 0` and no issuance;
    /// * inputs plus issuance must equal outputs plus fee;
    /// * shielded inputs require an anchor in which they are all unspent,
    ///   and no anchor may be supplied without shielded inputs.
    ///
    /// The anchor is snapshotted, so later changes to the caller's context
    /// do not affect this transaction.
    ///
    /// # Errors
    ///
    /// Returns a [`LedgerError`] describing the violated invariant. These are
    /// driver bugs, not recoverable conditions.
    pub fn new(
        transparent_inputs: Vec<Txo>,
        transparent_output_values: &[Amount],
        shielded_inputs: Vec<Note>,
        shielded_output_values: &[Amount],
        fee: i64,
        anchor: Option<&BcContext>,
        issuance: Amount,
    ) -> Result<Rc<Self>, LedgerError> {
        let coinbase = transparent_inputs.is_empty() && shielded_inputs.is_empty();
        if !coinbase && fee < 0 {
            return Err(LedgerError::NegativeFee);
        }
        if !coinbase && issuance != 0 {
            return Err(LedgerError::IssuanceOutsideCoinbase);
        }

        let funded = transparent_inputs
            .iter()
            .map(|txo| i128::from(txo.value))
            .sum::<i128>()
            + shielded_inputs
                .iter()
                .map(|note| i128::from(note.value))
                .sum::<i128>()
            + i128::from(issuance);
        let spent = transparent_output_values
            .iter()
            .map(|&value| i128::from(value))
            .sum::<i128>()
            + shielded_output_values
                .iter()
                .map(|&value| i128::from(value))
                .sum::<i128>()
            + i128::from(fee);
        if funded != spent {
            return Err(LedgerError::Unbalanced { funded, spent });
        }

        let anchor = match (shielded_inputs.is_empty(), anchor) {
            (true, None) => None,
            (true, Some(_)) => return Err(LedgerError::UnexpectedAnchor),
            (false, None) => return Err(LedgerError::MissingAnchor),
            (false, Some(anchor)) => {
                if !anchor.can_spend(&shielded_inputs) {
                    return Err(LedgerError::UnspendableNotes);
                }
                Some(anchor.clone())
            }
        };

        let id = TxId(Unique::fresh());
        let transparent_outputs = transparent_output_values
            .iter()
            .enumerate()
            .map(|(index, &value)| Txo { tx: id, index, value })
            .collect();
        let shielded_outputs = shielded_output_values
            .iter()
            .map(|&value| Note {
                id: NoteId(Unique::fresh()),
                value,
            })
            .collect();

        Ok(Rc::new(Self {
            id,
            transparent_inputs,
            transparent_outputs,
            shielded_inputs,
            shielded_outputs,
            fee,
            anchor,
            issuance,
        }))
    }

    /// Builds a coinbase transaction: no inputs, optionally new issuance,
    /// and a fee of negative magnitude equal to the fees paid by its block
    /// siblings.
    ///
    /// # Errors
    ///
    /// Returns an error if the amounts do not balance.
    pub fn coinbase(
        output_values: &[Amount],
        fee: i64,
        issuance: Amount,
    ) -> Result<Rc<Self>, LedgerError> {
        Self::new(Vec::new(), output_values, Vec::new(), &[], fee, None, issuance)
    }

    /// Builds a fully transparent spend.
    ///
    /// # Errors
    ///
    /// Returns an error if the amounts do not balance or the fee is negative.
    pub fn transparent(
        inputs: Vec<Txo>,
        output_values: &[Amount],
        fee: i64,
    ) -> Result<Rc<Self>, LedgerError> {
        Self::new(inputs, output_values, Vec::new(), &[], fee, None, 0)
    }

    #[must_use]
    pub fn id(&self) -> TxId {
        self.id
    }

    /// A coinbase transaction has no inputs of either kind.
    #[must_use]
    pub fn is_coinbase(&self) -> bool {
        self.transparent_inputs.is_empty() && self.shielded_inputs.is_empty()
    }

    #[must_use]
    pub fn transparent_input(&self, index: usize) -> Txo {
        self.transparent_inputs[index]
    }

    #[must_use]
    pub fn transparent_output(&self, index: usize) -> Txo {
        self.transparent_outputs[index]
    }

    #[must_use]
    pub fn shielded_input(&self, index: usize) -> Note {
        self.shielded_inputs[index]
    }

    #[must_use]
    pub fn shielded_output(&self, index: usize) -> Note {
        self.shielded_outputs[index]
    }

    #[must_use]
    pub fn transparent_inputs(&self) -> &[Txo] {
        &self.transparent_inputs
    }

    #[must_use]
    pub fn transparent_outputs(&self) -> &[Txo] {
        &self.transparent_outputs
    }

    #[must_use]
    pub fn shielded_inputs(&self) -> &[Note] {
        &self.shielded_inputs
    }

    #[must_use]
    pub fn shielded_outputs(&self) -> &[Note] {
        &self.shielded_outputs
    }

    #[must_use]
    pub fn fee(&self) -> i64 {
        self.fee
    }

    #[must_use]
    pub fn issuance(&self) -> Amount {
        self.issuance
    }

    /// The context snapshot against which the shielded inputs were proven
    /// spendable, if any.
    #[must_use]
    pub fn anchor(&self) -> Option<&BcContext> {
        self.anchor.as_ref()
    }
}

impl fmt::Display for BcTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}(t-in={}, t-out={}, s-in={}, s-out={}, fee={}, issuance={})",
            self.id,
            self.transparent_inputs.len(),
            self.transparent_outputs.len(),
            self.shielded_inputs.len(),
            self.shielded_outputs.len(),
            self.fee,
            self.issuance,
        )
    }
}
