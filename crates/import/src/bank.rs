//! Declarative per-institution parsing overrides.
//!
//! Profiles are plain data: a [`BankConfig`] deserialized from TOML is compiled
//! once into an immutable [`BankProfile`] and shared behind an `Arc`, so parsers
//! receive it per call and never hold mutable state of their own.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tally_core::RateQuote;
use thiserror::Error;

use crate::locale::DecimalStyle;

pub const DEFAULT_LOOKAHEAD: usize = 5;

/// Opening line of a text statement block: `date description amount [currency]`.
pub const DEFAULT_TRANSACTION_PATTERN: &str = r"^(?P<date>\d{4}-\d{2}-\d{2}|\d{1,2}[./]\d{1,2}[./]?(?:\d{4}|\d{2})?)\s+(?P<description>.+?)\s+(?P<amount>[-+\x{2212}]?\d{1,3}(?:[ \x{a0}.,']\d{3})*[.,]\d{2}-?|[-+\x{2212}]?\d+[.,]\d{2}-?)(?:\s+(?P<currency>[A-Z]{3}))?$";

/// `4,83 PLN ... kurz 4,2` style annotations.
pub const DEFAULT_EXCHANGE_RATE_PATTERN: &str = r"(?P<original>[-+]?\d+(?:[ \x{a0}.,]\d{3})*(?:[.,]\d+)?)\s*(?P<currency>[A-Z]{3})\b.*?(?i:exchange rate|rate|kurz|kurs|@)\s*[:=]?\s*(?P<rate>\d+(?:[.,]\d+)?)";

pub const DEFAULT_REFERENCE_PATTERN: &str = r"(?i)^(?:ref(?:erence)?|vs|variable\s+symbol|payment\s+id|id)\b\s*[:.#]?\s*(?P<reference>[A-Za-z0-9][A-Za-z0-9/_-]{2,})";

const DEFAULT_CITIES: &[&str] = &[
    "PRAHA", "PRAGUE", "BRNO", "OSTRAVA", "PLZEN", "OLOMOUC", "LIBEREC", "BRATISLAVA", "KOSICE",
    "WARSZAWA", "KRAKOW", "WROCLAW", "WIEN", "VIENNA", "BERLIN", "MUNCHEN", "LONDON",
];

const DEFAULT_LEGAL_SUFFIXES: &[&str] = &[
    "SPOL. S R.O.", "SP. Z O.O.", "S.R.O.", "S.R.O", "SRO", "A.S.", "A.S", "GMBH", "LTD.",
    "LTD", "INC.", "INC",
];

#[derive(Error, Debug)]
pub enum BankConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid {field} pattern for bank {bank}: {source}")]
    InvalidPattern {
        bank: BankId,
        field: &'static str,
        #[source]
        source: regex::Error,
    },
}

/// Institution key. Unknown names become [`BankId::Custom`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum BankId {
    Generic,
    Csob,
    Revolut,
    Custom(String),
}

impl fmt::Display for BankId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BankId::Generic => write!(f, "generic"),
            BankId::Csob => write!(f, "csob"),
            BankId::Revolut => write!(f, "revolut"),
            BankId::Custom(name) => write!(f, "custom:{name}"),
        }
    }
}

impl FromStr for BankId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        Ok(match s.as_str() {
            "" | "generic" => BankId::Generic,
            "csob" => BankId::Csob,
            "revolut" => BankId::Revolut,
            other => BankId::Custom(other.strip_prefix("custom:").unwrap_or(other).to_string()),
        })
    }
}

impl From<String> for BankId {
    fn from(s: String) -> Self {
        match s.parse() {
            Ok(id) => id,
            Err(never) => match never {},
        }
    }
}

impl From<BankId> for String {
    fn from(id: BankId) -> Self {
        id.to_string()
    }
}

fn default_lookahead() -> usize {
    DEFAULT_LOOKAHEAD
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BankConfig {
    pub id: BankId,
    pub name: String,
    #[serde(default)]
    pub date_formats: Vec<String>,
    #[serde(default)]
    pub decimal: DecimalStyle,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub rate_quote: RateQuote,
    #[serde(default)]
    pub csv_delimiter: Option<char>,
    /// Lines matching any of these are dropped before parsing.
    #[serde(default)]
    pub ignore_patterns: Vec<String>,
    #[serde(default)]
    pub transaction_pattern: Option<String>,
    #[serde(default)]
    pub exchange_rate_pattern: Option<String>,
    #[serde(default)]
    pub reference_pattern: Option<String>,
    /// Known place names used to split `merchant + place` strings.
    #[serde(default)]
    pub cities: Vec<String>,
    #[serde(default)]
    pub legal_suffixes: Vec<String>,
    #[serde(default = "default_lookahead")]
    pub lookahead: usize,
}

impl BankConfig {
    pub fn generic() -> Self {
        BankConfig {
            id: BankId::Generic,
            name: "Generic".to_string(),
            date_formats: Vec::new(),
            decimal: DecimalStyle::Auto,
            currency: None,
            rate_quote: RateQuote::BasePerForeign,
            csv_delimiter: None,
            ignore_patterns: vec![
                r"(?i)^(?:page|strana|seite)\s+\d+".to_string(),
                r"(?i)\b(?:opening|closing|previous|new)\s+balance\b".to_string(),
                r"(?i)\b(?:po[čc][áa]te[čc]n[íi]|kone[čc]n[ýy])\s+z[ůu]statek\b".to_string(),
            ],
            transaction_pattern: None,
            exchange_rate_pattern: None,
            reference_pattern: None,
            cities: DEFAULT_CITIES.iter().map(|s| s.to_string()).collect(),
            legal_suffixes: DEFAULT_LEGAL_SUFFIXES.iter().map(|s| s.to_string()).collect(),
            lookahead: DEFAULT_LOOKAHEAD,
        }
    }

    fn csob() -> Self {
        BankConfig {
            id: BankId::Csob,
            name: "ČSOB".to_string(),
            date_formats: vec!["%d.%m.%Y".to_string()],
            decimal: DecimalStyle::Comma,
            currency: Some("CZK".to_string()),
            csv_delimiter: Some(';'),
            ignore_patterns: vec![
                r"(?i)^z[uů]statek".to_string(),
                r"(?i)^strana\s+\d+".to_string(),
                r"(?i)^datum\s+popis".to_string(),
            ],
            ..Self::generic()
        }
    }

    fn revolut() -> Self {
        BankConfig {
            id: BankId::Revolut,
            name: "Revolut".to_string(),
            date_formats: vec!["%Y-%m-%d %H:%M:%S".to_string(), "%Y-%m-%d".to_string()],
            decimal: DecimalStyle::Dot,
            rate_quote: RateQuote::ForeignPerBase,
            csv_delimiter: Some(','),
            ..Self::generic()
        }
    }
}

/// A [`BankConfig`] with every pattern compiled.
#[derive(Debug)]
pub struct BankProfile {
    pub config: BankConfig,
    pub ignore: Vec<Regex>,
    pub transaction: Regex,
    pub exchange_rate: Regex,
    pub reference: Regex,
    pub location: Option<Regex>,
}

impl BankProfile {
    pub fn compile(config: BankConfig) -> Result<Self, BankConfigError> {
        let compile = |field: &'static str, pattern: &str| {
            Regex::new(pattern).map_err(|source| BankConfigError::InvalidPattern {
                bank: config.id.clone(),
                field,
                source,
            })
        };

        let ignore = config
            .ignore_patterns
            .iter()
            .map(|p| compile("ignore", p))
            .collect::<Result<Vec<_>, _>>()?;
        let transaction = compile(
            "transaction",
            config.transaction_pattern.as_deref().unwrap_or(DEFAULT_TRANSACTION_PATTERN),
        )?;
        let exchange_rate = compile(
            "exchange_rate",
            config.exchange_rate_pattern.as_deref().unwrap_or(DEFAULT_EXCHANGE_RATE_PATTERN),
        )?;
        let reference = compile(
            "reference",
            config.reference_pattern.as_deref().unwrap_or(DEFAULT_REFERENCE_PATTERN),
        )?;
        let location = if config.cities.is_empty() {
            None
        } else {
            let cities = config
                .cities
                .iter()
                .map(|c| regex::escape(c.trim()))
                .collect::<Vec<_>>()
                .join("|");
            let pattern = format!(
                r"(?i)^(?P<merchant>.+?)[\s,]+(?P<location>(?:{cities})(?:\s+\d{{1,2}})?(?:\s+(?:CZ|CZE|SK|SVK|PL|POL|DE|DEU|AT|AUT|GB|GBR))?)$"
            );
            Some(compile("location", &pattern)?)
        };

        Ok(BankProfile {
            config,
            ignore,
            transaction,
            exchange_rate,
            reference,
            location,
        })
    }

    pub fn id(&self) -> &BankId {
        &self.config.id
    }

    pub fn is_ignored(&self, line: &str) -> bool {
        self.ignore.iter().any(|re| re.is_match(line))
    }
}

#[derive(Debug, Deserialize)]
struct BankConfigFile {
    #[serde(default)]
    bank: Vec<BankConfig>,
}

/// All known bank profiles keyed by id. Lookups for unknown ids fall back to
/// the generic profile.
#[derive(Debug, Clone)]
pub struct BankConfigSet {
    profiles: BTreeMap<BankId, Arc<BankProfile>>,
}

impl BankConfigSet {
    pub fn builtin() -> Result<Self, BankConfigError> {
        Self::from_configs([BankConfig::generic(), BankConfig::csob(), BankConfig::revolut()])
    }

    pub fn from_configs<I>(configs: I) -> Result<Self, BankConfigError>
    where
        I: IntoIterator<Item = BankConfig>,
    {
        let mut set = BankConfigSet {
            profiles: BTreeMap::new(),
        };
        for config in configs {
            set.insert(config)?;
        }
        Ok(set)
    }

    /// Built-in profiles overlaid with the `[[bank]]` tables in `toml_content`.
    pub fn from_toml(toml_content: &str) -> Result<Self, BankConfigError> {
        let file: BankConfigFile = toml::from_str(toml_content)?;
        let mut set = Self::builtin()?;
        for config in file.bank {
            set.insert(config)?;
        }
        Ok(set)
    }

    pub fn load(path: &Path) -> Result<Self, BankConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn insert(&mut self, config: BankConfig) -> Result<(), BankConfigError> {
        let profile = BankProfile::compile(config)?;
        self.profiles.insert(profile.id().clone(), Arc::new(profile));
        Ok(())
    }

    pub fn get(&self, id: &BankId) -> Option<Arc<BankProfile>> {
        self.profiles.get(id).cloned()
    }

    /// The profile for `id`, or the generic one.
    pub fn profile(&self, id: &BankId) -> Arc<BankProfile> {
        self.get(id)
            .or_else(|| self.get(&BankId::Generic))
            .unwrap_or_else(|| Arc::new(generic_profile()))
    }

    pub fn ids(&self) -> impl Iterator<Item = &BankId> {
        self.profiles.keys()
    }
}

/// The generic profile compiled from constants.
pub fn generic_profile() -> BankProfile {
    BankProfile::compile(BankConfig::generic()).expect("built-in generic profile compiles")
}
