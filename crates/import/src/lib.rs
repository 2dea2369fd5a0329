pub mod bank;
pub mod csv;
pub mod locale;
pub mod match_engine;
pub mod merchant;
pub mod ofx;
pub mod qif;
pub mod registry;
pub mod text;
pub(crate) mod util;

pub use bank::{BankConfig, BankConfigError, BankConfigSet, BankId, BankProfile};
pub use csv::{CsvColumnMapping, CsvImportProfile, CsvParser};
pub use locale::{parse_amount, parse_date, DecimalStyle, LocaleError};
pub use match_engine::{
    find_internal_duplicates, ConflictItem, ConflictReport, MatchCandidate, MatchConfig,
    MatchEngine, MatchScore, RecommendedAction,
};
pub use ofx::OfxParser;
pub use qif::QifParser;
pub use registry::{FormatError, ParseContext, ParserRegistry, StatementParser};
pub use text::{PlainTextSource, TextError, TextSource, TextStatementParser};
#[cfg(feature = "pdf")]
pub use text::PdfTextSource;
