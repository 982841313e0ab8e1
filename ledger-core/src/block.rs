use std::fmt;
use std::rc::Rc;

use shared::Unique;

use crate::context::BcContext;
use crate::error::LedgerError;
use crate::transaction::BcTransaction;

/// Unique value standing in for a best-chain block hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockHash(Unique);

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "block{}", self.0)
    }
}

/// A block in a best-chain protocol.
///
/// Blocks form a tree through parent links; the chain with the highest score
/// wins. Scores accumulate: a block's score is its parent's score plus its
/// own added score.
#[derive(Debug)]
pub struct BcBlock {
    parent: Option<Rc<BcBlock>>,
    score: u64,
    transactions: Vec<Rc<BcTransaction>>,
    hash: BlockHash,
}

impl BcBlock {
    /// Constructs a block and checks the non-contextual consensus rules.
    /// Use `parent = None` for the genesis block.
    ///
    /// # Errors
    ///
    /// Returns the violated rule; see [`BcBlock::check_noncontextual`].
    pub fn new(
        parent: Option<&Rc<BcBlock>>,
        added_score: u64,
        transactions: Vec<Rc<BcTransaction>>,
    ) -> Result<Rc<Self>, LedgerError> {
        let block = Self::new_unchecked(parent, added_score, transactions);
        block.check_noncontextual()?;
        Ok(block)
    }

    /// Constructs a block without validity checks, for modelling invalid
    /// blocks.
    #[must_use]
    pub fn new_unchecked(
        parent: Option<&Rc<BcBlock>>,
        added_score: u64,
        transactions: Vec<Rc<BcTransaction>>,
    ) -> Rc<Self> {
        let score = parent.map_or(0, |parent| parent.score) + added_score;
        Rc::new(Self {
            parent: parent.cloned(),
            score,
            transactions,
            hash: BlockHash(Unique::fresh()),
        })
    }

    /// Non-contextual consensus rules: the block is non-empty, its first
    /// transaction is a coinbase, no other transaction is, and the fees over
    /// the whole block sum to zero.
    ///
    /// # Errors
    ///
    /// Returns the first violated rule.
    pub fn check_noncontextual(&self) -> Result<(), LedgerError> {
        let Some(first) = self.transactions.first() else {
            return Err(LedgerError::EmptyBlock);
        };
        if !first.is_coinbase() {
            return Err(LedgerError::MissingCoinbase);
        }
        if self.transactions[1..].iter().any(|tx| tx.is_coinbase()) {
            return Err(LedgerError::ExtraCoinbase);
        }
        let fees: i128 = self
            .transactions
            .iter()
            .map(|tx| i128::from(tx.fee()))
            .sum();
        if fees != 0 {
            return Err(LedgerError::UnbalancedFees(fees));
        }
        Ok(())
    }

    #[must_use]
    pub fn is_noncontextually_valid(&self) -> bool {
        self.check_noncontextual().is_ok()
    }

    /// Whether this block's transactions can all be applied on top of the
    /// given parent context. The context itself is not modified.
    #[must_use]
    pub fn is_contextually_valid(&self, parent_context: &BcContext) -> bool {
        let mut context = parent_context.clone();
        self.transactions.iter().all(|tx| context.add_if_valid(tx))
    }

    #[must_use]
    pub fn parent(&self) -> Option<&Rc<BcBlock>> {
        self.parent.as_ref()
    }

    #[must_use]
    pub fn score(&self) -> u64 {
        self.score
    }

    #[must_use]
    pub fn transactions(&self) -> &[Rc<BcTransaction>] {
        &self.transactions
    }

    #[must_use]
    pub fn hash(&self) -> BlockHash {
        self.hash
    }
}

impl fmt::Display for BcBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}(score={}, txs={})",
            self.hash,
            self.score,
            self.transactions.len()
        )
    }
}
