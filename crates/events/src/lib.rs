//! Immutable ledger records for stock movements and other costing facts.

pub mod event;
pub mod ledger;

pub use event::Event;
pub use ledger::LedgerEntry;
