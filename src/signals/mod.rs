//! Signal intake: validation, deduplication, counters.

pub mod ledger;
pub mod normalize;

pub use ledger::{LedgerError, SignalLedger};
pub use normalize::{normalize_symbol, signal_id, InvalidSignal};
