pub mod ledger;
pub mod period;
pub mod transaction;

pub use ledger::{EntryId, Ledger, LedgerEntry, LedgerError, UserId};
pub use period::DateRange;
pub use transaction::{
    ForeignAmount, ParseResult, ParsedTransaction, RateQuote, DEFAULT_CONVERSION_EPSILON,
};
