use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Absolute tolerance, in base currency, between a statement amount and its
/// recomputed foreign conversion.
pub const DEFAULT_CONVERSION_EPSILON: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

/// How a statement quotes an exchange rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateQuote {
    /// Base-currency units per one foreign unit: `base = original × rate`.
    #[default]
    BasePerForeign,
    /// Foreign units per one base-currency unit: `base = original ÷ rate`.
    ForeignPerBase,
}

/// The original-currency triple captured verbatim from a statement annotation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignAmount {
    pub amount: Decimal,
    pub currency: String,
    pub rate: Decimal,
    #[serde(default)]
    pub quote: RateQuote,
}

impl ForeignAmount {
    /// Base-currency value implied by the annotation, rounded to cents.
    /// `None` when the rate is zero.
    pub fn converted(&self) -> Option<Decimal> {
        let value = match self.quote {
            RateQuote::BasePerForeign => self.amount.checked_mul(self.rate)?,
            RateQuote::ForeignPerBase => self.amount.checked_div(self.rate)?,
        };
        Some(value.round_dp(2))
    }
}

/// Canonical record every format parser converges on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedTransaction {
    pub date: NaiveDate,
    pub description: String,
    /// Always in the ledger's base currency.
    pub amount: Decimal,
    pub merchant: Option<String>,
    pub location: Option<String>,
    pub original: Option<ForeignAmount>,
    pub reference: Option<String>,
    pub notes: Option<String>,
    #[serde(default)]
    pub raw_data: BTreeMap<String, String>,
}

impl ParsedTransaction {
    pub fn new(date: NaiveDate, description: impl Into<String>, amount: Decimal) -> Self {
        Self {
            date,
            description: description.into(),
            amount,
            merchant: None,
            location: None,
            original: None,
            reference: None,
            notes: None,
            raw_data: BTreeMap::new(),
        }
    }

    /// Describes a mismatch between `amount` and the foreign annotation, if any.
    /// Signs are ignored because statements often print the original amount unsigned.
    pub fn conversion_warning(&self, epsilon: Decimal) -> Option<String> {
        let original = self.original.as_ref()?;
        let Some(expected) = original.converted() else {
            return Some(format!(
                "exchange rate {} for {} {} cannot be applied",
                original.rate, original.amount, original.currency
            ));
        };
        let delta = (self.amount.abs() - expected.abs()).abs();
        if delta > epsilon {
            Some(format!(
                "{} {} at rate {} gives {}, statement shows {}",
                original.amount, original.currency, original.rate, expected, self.amount
            ))
        } else {
            None
        }
    }
}

/// Output of a single parser run.
///
/// `success` is maintained by the mutators: it is true exactly when at least one
/// transaction was parsed and no fatal error was recorded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParseResult {
    pub success: bool,
    pub transactions: Vec<ParsedTransaction>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    fatal: bool,
}

impl ParseResult {
    pub fn new(parser: &str) -> Self {
        let mut result = Self::default();
        result.set_meta("parser", parser);
        result
    }

    /// A result that could not extract anything at all.
    pub fn failed(parser: &str, error: impl Into<String>) -> Self {
        let mut result = Self::new(parser);
        result.fatal(error);
        result
    }

    pub fn push(&mut self, tx: ParsedTransaction) {
        self.transactions.push(tx);
        self.refresh();
    }

    pub fn warn(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    /// Records a non-fatal error; transactions parsed so far still count.
    pub fn error(&mut self, error: impl Into<String>) {
        self.errors.push(error.into());
    }

    pub fn fatal(&mut self, error: impl Into<String>) {
        self.errors.push(error.into());
        self.fatal = true;
        self.refresh();
    }

    pub fn set_meta(&mut self, key: &str, value: impl ToString) {
        self.metadata.insert(key.to_string(), value.to_string());
    }

    pub fn is_fatal(&self) -> bool {
        self.fatal
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    fn refresh(&mut self) {
        self.success = !self.transactions.is_empty() && !self.fatal;
    }
}
