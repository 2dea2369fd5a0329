//! Semi-structured text statements (PDF text layers and `.txt` exports).
//!
//! A line matching the bank's transaction pattern opens a block. Up to
//! `lookahead` following lines are absorbed into that block and classified as
//! exchange-rate annotation, payment reference, merchant/location or extra
//! notes, until the next opening line.

use std::str::FromStr;
use std::sync::{Arc, OnceLock};

use chrono::{Datelike, NaiveDate};
use regex::{Captures, Regex};
use rust_decimal::Decimal;
use tally_core::{
    DateRange, ForeignAmount, ParseResult, ParsedTransaction, DEFAULT_CONVERSION_EPSILON,
};
use thiserror::Error;

use crate::bank::BankProfile;
use crate::locale::{parse_amount, parse_date, parse_day_month, DecimalStyle, StatementYear};
use crate::merchant::split_merchant;
use crate::registry::{ParseContext, StatementParser};
use crate::util::normalize_line;

// ── Compiled regex cache ─────────────────────────────────────────────────────

macro_rules! re {
    ($name:ident, $pat:expr) => {
        fn $name() -> &'static Regex {
            static R: OnceLock<Regex> = OnceLock::new();
            R.get_or_init(|| Regex::new($pat).expect("invalid regex"))
        }
    };
}

re!(re_period,
    r"(?i)(?P<start>\d{1,2}\.\s?\d{1,2}\.\s?\d{4}|\d{4}-\d{2}-\d{2}|\d{1,2}/\d{1,2}/\d{4})\s*(?:-|–|to|do|až|until)\s*(?P<end>\d{1,2}\.\s?\d{1,2}\.\s?\d{4}|\d{4}-\d{2}-\d{2}|\d{1,2}/\d{1,2}/\d{4})");
re!(re_full_date,
    r"\b(?:\d{1,2}\.\s?\d{1,2}\.\s?\d{4}|\d{4}-\d{2}-\d{2}|\d{1,2}/\d{1,2}/\d{4})\b");
re!(re_leading_date,
    r"^(?:\d{4}-\d{2}-\d{2}|\d{1,2}\.\s?\d{1,2}\.(?:\s?\d{2,4})?|\d{1,2}/\d{1,2}(?:/\d{2,4})?)(?:\s|$)");
re!(re_currency_header,
    r"\b(?i:currency|měna|mena|waluta|währung)\s*:?\s*(?P<code>[A-Z]{3})\b");

#[derive(Error, Debug)]
pub enum TextError {
    #[error("No text could be extracted")]
    Empty,
    #[error("PDF text extraction failed: {0}")]
    Pdf(String),
    #[error("PDF support is not enabled in this build")]
    PdfUnsupported,
}

/// Turns statement bytes into plain text.
pub trait TextSource: Send + Sync {
    /// Recorded as `extraction_method` metadata.
    fn method(&self) -> &'static str;

    fn extract(&self, data: &[u8]) -> Result<String, TextError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextSource;

impl TextSource for PlainTextSource {
    fn method(&self) -> &'static str {
        "plain_text"
    }

    fn extract(&self, data: &[u8]) -> Result<String, TextError> {
        let text = String::from_utf8_lossy(data).into_owned();
        if text.trim().is_empty() {
            return Err(TextError::Empty);
        }
        Ok(text)
    }
}

/// Text layer of a digital PDF. Scanned images yield no text and fail with
/// [`TextError::Empty`].
#[cfg(feature = "pdf")]
#[derive(Debug, Clone, Copy, Default)]
pub struct PdfTextSource;

#[cfg(feature = "pdf")]
impl TextSource for PdfTextSource {
    fn method(&self) -> &'static str {
        "pdf_text"
    }

    fn extract(&self, data: &[u8]) -> Result<String, TextError> {
        let text =
            pdf_extract::extract_text_from_mem(data).map_err(|e| TextError::Pdf(e.to_string()))?;
        if text.trim().is_empty() {
            return Err(TextError::Empty);
        }
        Ok(text)
    }
}

fn is_pdf(data: &[u8]) -> bool {
    data.starts_with(b"%PDF-")
}

#[derive(Clone, Default)]
pub struct TextStatementParser {
    /// Overrides the signature-based choice between PDF and plain text.
    source: Option<Arc<dyn TextSource>>,
}

impl std::fmt::Debug for TextStatementParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextStatementParser")
            .field("source", &self.source.as_ref().map(|s| s.method()))
            .finish()
    }
}

impl TextStatementParser {
    pub fn with_source(source: Arc<dyn TextSource>) -> Self {
        Self {
            source: Some(source),
        }
    }

    fn extract(&self, data: &[u8]) -> Result<(String, &'static str), TextError> {
        if let Some(source) = &self.source {
            return source.extract(data).map(|t| (t, source.method()));
        }
        if is_pdf(data) {
            #[cfg(feature = "pdf")]
            {
                let source = PdfTextSource;
                return source.extract(data).map(|t| (t, source.method()));
            }
            #[cfg(not(feature = "pdf"))]
            {
                return Err(TextError::PdfUnsupported);
            }
        }
        let source = PlainTextSource;
        source.extract(data).map(|t| (t, source.method()))
    }

    /// Parses already-extracted statement text.
    pub fn parse_text(&self, text: &str, ctx: &ParseContext) -> ParseResult {
        let profile = &ctx.profile;
        let mut result = ParseResult::new(self.id());
        result.set_meta("bank", profile.id());
        result.set_meta("page_count", text.split('\u{c}').count());

        let lines: Vec<(usize, String)> = text
            .lines()
            .enumerate()
            .map(|(idx, l)| (idx + 1, normalize_line(l)))
            .filter(|(_, l)| !l.is_empty())
            .collect();
        result.set_meta("line_count", lines.len());

        let year = detect_statement_year(&lines, profile, ctx.year_hint);
        if let Some(period) = year.period {
            result.set_meta("period", period);
            result.set_meta("statement_year", period.start.year());
        } else if let Some(y) = year.year.or(year.hint) {
            result.set_meta("statement_year", y);
        }
        if let Some(currency) = detect_currency(&lines).or(profile.config.currency.clone()) {
            result.set_meta("currency", currency);
        }

        let mut i = 0;
        while i < lines.len() {
            let (line_no, line) = &lines[i];
            i += 1;
            if profile.is_ignored(line) {
                continue;
            }
            let Some(caps) = profile.transaction.captures(line) else {
                if re_leading_date().is_match(line) {
                    result.warn(format!("line {line_no}: unrecognised transaction line: {line}"));
                }
                continue;
            };

            let mut tx = match open_block(&caps, profile, &year) {
                Ok(tx) => tx,
                Err(e) => {
                    tracing::debug!(line = line_no, error = %e, "skipping statement line");
                    result.warn(format!("line {line_no}: {e}"));
                    continue;
                }
            };
            tx.raw_data.insert("line".to_string(), line.clone());
            tx.raw_data.insert("line_number".to_string(), line_no.to_string());
            if let Err(e) = take_inline_exchange(&mut tx, profile) {
                result.warn(format!("line {line_no}: {e}"));
            }

            let mut block = Block::default();
            let mut absorbed = 0;
            while i < lines.len() && absorbed < profile.config.lookahead {
                let (next_no, next) = &lines[i];
                match classify(next, profile) {
                    LineKind::Ignored => {}
                    LineKind::Exchange(caps) => match foreign_amount(&caps, tx.amount, profile) {
                        Ok(foreign) if tx.original.is_none() => tx.original = Some(foreign),
                        Ok(_) => block.extra.push(next.clone()),
                        Err(e) => result.warn(format!("line {next_no}: {e}")),
                    },
                    LineKind::Opening => break,
                    LineKind::Reference(reference) if tx.reference.is_none() => {
                        tx.reference = Some(reference)
                    }
                    LineKind::Reference(_) | LineKind::Other => {
                        if block.merchant_line.is_none() {
                            block.merchant_line = Some(next.clone());
                        } else {
                            block.extra.push(next.clone());
                        }
                    }
                }
                block.absorbed.push(next.clone());
                absorbed += 1;
                i += 1;
            }

            let merchant_source = block.merchant_line.as_deref().unwrap_or(&tx.description);
            if !merchant_source.is_empty() {
                let parts = split_merchant(merchant_source, profile);
                tx.merchant = Some(parts.merchant);
                tx.location = parts.location;
            }
            if !block.extra.is_empty() {
                tx.notes = Some(block.extra.join("; "));
            }
            if !block.absorbed.is_empty() {
                tx.raw_data.insert("lookahead".to_string(), block.absorbed.join("\n"));
            }
            if let Some(warning) = tx.conversion_warning(DEFAULT_CONVERSION_EPSILON) {
                result.warn(format!("line {line_no}: {warning}"));
            }
            result.push(tx);
        }

        if result.is_empty() {
            result.warn("No transaction lines found");
        }
        result
    }
}

impl StatementParser for TextStatementParser {
    fn id(&self) -> &'static str {
        "text"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["pdf", "txt"]
    }

    fn sniff(&self, content: &[u8]) -> bool {
        is_pdf(content)
    }

    fn parse(&self, data: &[u8], ctx: &ParseContext) -> ParseResult {
        match self.extract(data) {
            Ok((text, method)) => {
                let mut result = self.parse_text(&text, ctx);
                result.set_meta("extraction_method", method);
                result
            }
            Err(e) => {
                tracing::warn!(error = %e, "statement text extraction failed");
                ParseResult::failed(self.id(), e.to_string())
            }
        }
    }
}

#[derive(Default)]
struct Block {
    merchant_line: Option<String>,
    extra: Vec<String>,
    absorbed: Vec<String>,
}

enum LineKind<'a> {
    Ignored,
    Exchange(Captures<'a>),
    Opening,
    Reference(String),
    Other,
}

fn classify<'a>(line: &'a str, profile: &BankProfile) -> LineKind<'a> {
    if profile.is_ignored(line) {
        return LineKind::Ignored;
    }
    let opens = profile.transaction.is_match(line) || re_leading_date().is_match(line);
    if let Some(caps) = profile.exchange_rate.captures(line) {
        // An annotation line starts with its amount; a transaction line that
        // carries one starts with a date.
        let leading = caps.get(0).is_some_and(|m| m.start() == 0);
        if leading || !opens {
            return LineKind::Exchange(caps);
        }
    }
    if opens {
        return LineKind::Opening;
    }
    if let Some(caps) = profile.reference.captures(line) {
        if let Some(reference) = caps.name("reference") {
            return LineKind::Reference(reference.as_str().to_string());
        }
    }
    LineKind::Other
}

fn open_block(
    caps: &Captures<'_>,
    profile: &BankProfile,
    year: &StatementYear,
) -> Result<ParsedTransaction, String> {
    let raw_date = caps.name("date").map_or("", |m| m.as_str());
    let date = match parse_date(raw_date, &profile.config.date_formats) {
        Ok(date) => date,
        Err(e) => {
            let (day, month) = parse_day_month(raw_date).ok_or_else(|| e.to_string())?;
            if !year.is_known() {
                return Err(format!("no statement year available for date {raw_date}"));
            }
            year.resolve(day, month)
                .ok_or_else(|| format!("Invalid date format: {raw_date}"))?
        }
    };

    let raw_amount = caps.name("amount").map_or("", |m| m.as_str());
    let amount = parse_amount(raw_amount, profile.config.decimal).map_err(|e| e.to_string())?;
    let description = caps.name("description").map_or("", |m| m.as_str()).trim();

    let mut tx = ParsedTransaction::new(date, description, amount);
    if let Some(currency) = caps.name("currency") {
        tx.raw_data.insert("currency".to_string(), currency.as_str().to_string());
    }
    Ok(tx)
}

/// Moves an annotation printed inside the opening line's description into
/// `original`. The description keeps whatever surrounds it.
fn take_inline_exchange(tx: &mut ParsedTransaction, profile: &BankProfile) -> Result<(), String> {
    let Some(caps) = profile.exchange_rate.captures(&tx.description) else {
        return Ok(());
    };
    let Some(whole) = caps.get(0) else {
        return Ok(());
    };
    let foreign = foreign_amount(&caps, tx.amount, profile)?;
    let rest = format!(
        "{} {}",
        &tx.description[..whole.start()],
        &tx.description[whole.end()..]
    );
    let description = normalize_line(&rest)
        .trim_matches(|c: char| c == ',' || c == ';' || c == '-' || c.is_whitespace())
        .to_string();
    tx.raw_data
        .insert("exchange".to_string(), whole.as_str().to_string());
    tx.description = description;
    tx.original = Some(foreign);
    Ok(())
}

/// The original amount takes the sign of the base amount; annotations usually
/// print it unsigned.
fn foreign_amount(
    caps: &Captures<'_>,
    base: Decimal,
    profile: &BankProfile,
) -> Result<ForeignAmount, String> {
    let raw_original = caps.name("original").map_or("", |m| m.as_str());
    let original = parse_amount(raw_original, DecimalStyle::Auto).map_err(|e| e.to_string())?;
    let raw_rate = caps.name("rate").map_or("", |m| m.as_str());
    let rate = parse_rate(raw_rate).ok_or_else(|| format!("Invalid exchange rate: {raw_rate}"))?;
    let currency = caps.name("currency").map_or("", |m| m.as_str()).to_string();

    Ok(ForeignAmount {
        amount: if base.is_sign_negative() {
            -original.abs()
        } else {
            original.abs()
        },
        currency,
        rate,
        quote: profile.config.rate_quote,
    })
}

/// Rates are never digit-grouped, so a comma is always the decimal mark.
fn parse_rate(raw: &str) -> Option<Decimal> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| if c == ',' { '.' } else { c })
        .collect();
    Decimal::from_str(&cleaned).ok().filter(|r| !r.is_zero())
}

/// Statement period first, then the first full date printed outside a
/// transaction line, then the caller's hint.
fn detect_statement_year(
    lines: &[(usize, String)],
    profile: &BankProfile,
    hint: Option<i32>,
) -> StatementYear {
    let formats = &profile.config.date_formats;
    let header_lines = || {
        lines
            .iter()
            .map(|(_, l)| l.as_str())
            .filter(|l| !profile.transaction.is_match(l))
    };

    let period = header_lines().find_map(|l| {
        let caps = re_period().captures(l)?;
        let start = parse_date(&caps["start"], formats).ok()?;
        let end = parse_date(&caps["end"], formats).ok()?;
        Some(DateRange::new(start, end))
    });
    let year = header_lines().find_map(|l| {
        let m = re_full_date().find(l)?;
        parse_date(m.as_str(), formats).ok().map(|d: NaiveDate| d.year())
    });

    StatementYear { period, year, hint }
}

fn detect_currency(lines: &[(usize, String)]) -> Option<String> {
    lines
        .iter()
        .find_map(|(_, l)| re_currency_header().captures(l))
        .map(|caps| caps["code"].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bank::{generic_profile, BankConfig, BankProfile};
    use tally_core::RateQuote;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    const STATEMENT: &str = "ČSOB Výpis z účtu
Období: 01.05.2025 - 31.05.2025
Měna: CZK
Datum Popis Částka
02.05. Platba kartou -1 300,54
ALBERT VLTAVSKA PRAHA 5
VS: 1234567890
03.05. Platba kartou -20,29
ZABKA Z1234, KRAKOW PL
4,83 PLN kurz 4,2
Strana 1
\u{c}
05.05. Příchozí platba 25 000,00
ACME S.R.O.
Poznámka: výplata
31.05. Konečný zůstatek 50 000,00
";

    // ── block parsing ─────────────────────────────────────────────────────────

    #[test]
    fn parses_every_well_formed_block() {
        let result = TextStatementParser::default().parse(STATEMENT.as_bytes(), &ParseContext::default());
        assert!(result.success, "{:?} / {:?}", result.errors, result.warnings);
        assert_eq!(result.len(), 3, "{:?}", result.warnings);
        assert_eq!(result.metadata["extraction_method"], "plain_text");
        assert_eq!(result.metadata["page_count"], "2");
        assert_eq!(result.metadata["statement_year"], "2025");
        assert_eq!(result.metadata["currency"], "CZK");
    }

    #[test]
    fn lookahead_fills_merchant_location_and_reference() {
        let result = TextStatementParser::default().parse(STATEMENT.as_bytes(), &ParseContext::default());
        let albert = &result.transactions[0];
        assert_eq!(albert.date, date(2025, 5, 2));
        assert_eq!(albert.amount, dec("-1300.54"));
        assert_eq!(albert.description, "Platba kartou");
        assert_eq!(albert.merchant.as_deref(), Some("ALBERT VLTAVSKA"));
        assert_eq!(albert.location.as_deref(), Some("PRAHA 5"));
        assert_eq!(albert.reference.as_deref(), Some("1234567890"));

        let salary = &result.transactions[2];
        assert_eq!(salary.amount, dec("25000.00"));
        assert_eq!(salary.merchant.as_deref(), Some("ACME"));
        assert_eq!(salary.notes.as_deref(), Some("Poznámka: výplata"));
        assert!(salary.raw_data["lookahead"].contains("ACME S.R.O."));
    }

    #[test]
    fn exchange_annotation_is_captured_verbatim() {
        let result = TextStatementParser::default().parse(STATEMENT.as_bytes(), &ParseContext::default());
        let zabka = &result.transactions[1];
        let original = zabka.original.as_ref().unwrap();
        assert_eq!(original.amount, dec("-4.83"));
        assert_eq!(original.currency, "PLN");
        assert_eq!(original.rate, dec("4.2"));
        assert_eq!(original.quote, RateQuote::BasePerForeign);
        assert_eq!(zabka.amount, dec("-20.29"));
        assert_eq!(original.converted(), Some(dec("-20.29")));
        assert!(!result.warnings.iter().any(|w| w.contains("conversion")), "{:?}", result.warnings);
        assert_eq!(zabka.merchant.as_deref(), Some("ZABKA Z1234"));
        assert_eq!(zabka.location.as_deref(), Some("KRAKOW PL"));
    }

    #[test]
    fn annotated_opening_lines_each_open_a_block() {
        let text = "Period 01.05.2025 - 31.05.2025
03.05. ZABKA 4,83 PLN kurz 4,2 -20,29
04.05. BIEDRONKA 10,00 PLN kurz 4,2 -42,00
";
        let result = TextStatementParser::default().parse(text.as_bytes(), &ParseContext::default());
        assert_eq!(result.len(), 2, "{:?}", result.warnings);
        assert!(result.warnings.is_empty(), "{:?}", result.warnings);

        let zabka = &result.transactions[0];
        assert_eq!(zabka.description, "ZABKA");
        assert_eq!(zabka.amount, dec("-20.29"));
        let original = zabka.original.as_ref().unwrap();
        assert_eq!(original.amount, dec("-4.83"));
        assert_eq!(original.currency, "PLN");
        assert_eq!(zabka.raw_data["exchange"], "4,83 PLN kurz 4,2");

        let biedronka = &result.transactions[1];
        assert_eq!(biedronka.date, date(2025, 5, 4));
        assert_eq!(biedronka.description, "BIEDRONKA");
        assert_eq!(biedronka.merchant.as_deref(), Some("BIEDRONKA"));
        assert_eq!(biedronka.original.as_ref().unwrap().amount, dec("-10.00"));
        assert_eq!(biedronka.original.as_ref().unwrap().converted(), Some(dec("-42.00")));
    }

    #[test]
    fn annotation_line_starting_like_a_date_stays_an_annotation() {
        let text = "Period 01.05.2025 - 31.05.2025\n03.05. Card -20,29\n4.83 PLN rate 4.20\n";
        let result = TextStatementParser::default().parse(text.as_bytes(), &ParseContext::default());
        assert_eq!(result.len(), 1, "{:?}", result.warnings);
        assert_eq!(result.transactions[0].original.as_ref().unwrap().rate, dec("4.20"));
    }

    #[test]
    fn inconsistent_conversion_is_a_warning() {
        let text = "Period 01.05.2025 - 31.05.2025\n03.05. Card -25,00\n4,83 PLN kurz 4,2\n";
        let result = TextStatementParser::default().parse(text.as_bytes(), &ParseContext::default());
        assert_eq!(result.len(), 1);
        assert!(result.success);
        assert!(result.warnings.iter().any(|w| w.starts_with("line 2")), "{:?}", result.warnings);
    }

    #[test]
    fn foreign_per_base_quote_divides() {
        let config = BankConfig {
            rate_quote: RateQuote::ForeignPerBase,
            ..BankConfig::generic()
        };
        let ctx = ParseContext::new(Arc::new(BankProfile::compile(config).unwrap()));
        let text = "Period 01.05.2025 - 31.05.2025\n03.05. Card -1,15\n4,83 PLN rate 4,2\n";
        let result = TextStatementParser::default().parse(text.as_bytes(), &ctx);
        let tx = &result.transactions[0];
        assert_eq!(tx.original.as_ref().unwrap().converted(), Some(dec("-1.15")));
        assert!(tx.conversion_warning(DEFAULT_CONVERSION_EPSILON).is_none());
    }

    #[test]
    fn lookahead_is_bounded() {
        let config = BankConfig {
            lookahead: 1,
            ..BankConfig::generic()
        };
        let ctx = ParseContext::new(Arc::new(BankProfile::compile(config).unwrap()));
        let text = "2025-05-02 Coffee Shop -12.90 EUR\nCOFFEE SHOP PRAHA\nVS: 998877\n";
        let result = TextStatementParser::default().parse(text.as_bytes(), &ctx);
        let tx = &result.transactions[0];
        assert_eq!(tx.merchant.as_deref(), Some("COFFEE SHOP"));
        assert_eq!(tx.reference, None);
        assert_eq!(tx.raw_data["currency"], "EUR");
    }

    // ── statement year ────────────────────────────────────────────────────────

    #[test]
    fn year_comes_from_header_not_wall_clock() {
        let text = "Statement date 15.01.2019\n02.01. SHOP -5,00\n";
        let result = TextStatementParser::default().parse(text.as_bytes(), &ParseContext::default());
        assert_eq!(result.transactions[0].date, date(2019, 1, 2));
    }

    #[test]
    fn period_across_new_year() {
        let text = "Period 15.12.2024 - 14.01.2025\n20.12. SHOP -5,00\n03.01. SHOP -6,00\n";
        let result = TextStatementParser::default().parse(text.as_bytes(), &ParseContext::default());
        assert_eq!(result.transactions[0].date, date(2024, 12, 20));
        assert_eq!(result.transactions[1].date, date(2025, 1, 3));
    }

    #[test]
    fn year_hint_is_last_resort() {
        let text = "02.05. SHOP -5,00\n";
        let none = TextStatementParser::default().parse(text.as_bytes(), &ParseContext::default());
        assert!(!none.success);
        assert!(none.warnings[0].contains("no statement year"), "{:?}", none.warnings);

        let ctx = ParseContext::default().with_year_hint(Some(2023));
        let hinted = TextStatementParser::default().parse(text.as_bytes(), &ctx);
        assert_eq!(hinted.transactions[0].date, date(2023, 5, 2));
    }

    #[test]
    fn full_dates_need_no_year() {
        let text = "2025-05-02 Coffee Shop -12.90\n2025-05-03 Bakery -3.10\n";
        let result = TextStatementParser::default().parse(text.as_bytes(), &ParseContext::default());
        assert_eq!(result.len(), 2);
        assert_eq!(result.transactions[0].merchant.as_deref(), Some("Coffee Shop"));
    }

    // ── failures ──────────────────────────────────────────────────────────────

    #[test]
    fn date_line_without_amount_warns() {
        let text = "Period 01.05.2025 - 31.05.2025\n02.05. PENDING AUTHORISATION\n03.05. SHOP -1,00\n";
        let result = TextStatementParser::default().parse(text.as_bytes(), &ParseContext::default());
        assert_eq!(result.len(), 1);
        assert!(result.warnings[0].contains("unrecognised"), "{:?}", result.warnings);
    }

    #[test]
    fn empty_text_is_fatal() {
        let result = TextStatementParser::default().parse(b"  \n\n", &ParseContext::default());
        assert!(!result.success);
        assert!(result.is_fatal());
        assert!(result.is_empty());
    }

    struct FixedSource(&'static str);

    impl TextSource for FixedSource {
        fn method(&self) -> &'static str {
            "fixed"
        }

        fn extract(&self, _data: &[u8]) -> Result<String, TextError> {
            Ok(self.0.to_string())
        }
    }

    #[test]
    fn injected_source_is_used_for_pdf_bytes() {
        let parser = TextStatementParser::with_source(Arc::new(FixedSource(
            "2025-05-02 Coffee Shop -12.90\n",
        )));
        let result = parser.parse(b"%PDF-1.7 binary", &ParseContext::default());
        assert_eq!(result.len(), 1);
        assert_eq!(result.metadata["extraction_method"], "fixed");
    }

    #[cfg(not(feature = "pdf"))]
    #[test]
    fn pdf_without_feature_is_fatal() {
        let result = TextStatementParser::default().parse(b"%PDF-1.7", &ParseContext::default());
        assert!(result.is_fatal());
    }

    /// Single-page PDF with a Helvetica text layer, one text line per entry.
    #[cfg(feature = "pdf")]
    fn text_layer_pdf(lines: &[&str]) -> Vec<u8> {
        let mut content = String::from("BT\n/F1 11 Tf\n72 720 Td\n");
        for line in lines {
            content.push_str(&format!("({line}) Tj\n0 -16 Td\n"));
        }
        content.push_str("ET");

        let objects = [
            "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
            "<< /Type /Pages /Kids [3 0 R] /Count 1 >>".to_string(),
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] \
             /Resources << /Font << /F1 4 0 R >> >> /Contents 5 0 R >>"
                .to_string(),
            "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica /Encoding /WinAnsiEncoding >>"
                .to_string(),
            format!("<< /Length {} >>\nstream\n{content}\nendstream", content.len()),
        ];

        let mut pdf = b"%PDF-1.4\n".to_vec();
        let mut offsets = Vec::new();
        for (i, body) in objects.iter().enumerate() {
            offsets.push(pdf.len());
            pdf.extend_from_slice(format!("{} 0 obj\n{body}\nendobj\n", i + 1).as_bytes());
        }
        let xref = pdf.len();
        pdf.extend_from_slice(
            format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1).as_bytes(),
        );
        for offset in offsets {
            pdf.extend_from_slice(format!("{offset:010} 00000 n \n").as_bytes());
        }
        pdf.extend_from_slice(
            format!(
                "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{xref}\n%%EOF\n",
                objects.len() + 1
            )
            .as_bytes(),
        );
        pdf
    }

    #[cfg(feature = "pdf")]
    #[test]
    fn pdf_text_layer_is_extracted_and_parsed() {
        let pdf = text_layer_pdf(&[
            "Statement 01.05.2025 - 31.05.2025",
            "2025-05-02 Coffee Shop -12.90",
            "2025-05-03 Bakery -3.10",
        ]);
        let text = PdfTextSource.extract(&pdf).unwrap();
        assert!(text.contains("Coffee Shop"), "{text:?}");

        let result = TextStatementParser::default().parse(&pdf, &ParseContext::default());
        assert!(result.success, "{:?} / {:?}", result.errors, result.warnings);
        assert_eq!(result.metadata["extraction_method"], "pdf_text");
        assert_eq!(result.len(), 2, "{:?}", result.warnings);
        assert_eq!(result.transactions[0].amount, dec("-12.90"));
        assert_eq!(result.transactions[1].date, date(2025, 5, 3));
    }

    #[cfg(feature = "pdf")]
    #[test]
    fn pdf_without_text_layer_is_fatal() {
        let result = TextStatementParser::default().parse(&text_layer_pdf(&[]), &ParseContext::default());
        assert!(result.is_fatal(), "{:?}", result.errors);
    }

    #[test]
    fn rate_parsing() {
        assert_eq!(parse_rate("4,2"), Some(dec("4.2")));
        assert_eq!(parse_rate("25.125"), Some(dec("25.125")));
        assert_eq!(parse_rate("0"), None);
    }

    #[test]
    fn generic_profile_ignores_balance_lines() {
        assert!(generic_profile().is_ignored("31.05. Konečný zůstatek 50 000,00"));
    }
}
