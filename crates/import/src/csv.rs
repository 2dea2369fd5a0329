use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tally_core::{ParseResult, ParsedTransaction};
use thiserror::Error;

use crate::bank::BankProfile;
use crate::locale::{parse_amount, parse_date, LocaleError};
use crate::merchant::split_merchant;
use crate::registry::{ParseContext, StatementParser};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CsvColumnMapping {
    pub date_column: Option<usize>,
    pub description_column: Option<usize>,
    pub amount_column: Option<usize>,
    /// Money leaving the account; imported as a negative amount.
    pub debit_column: Option<usize>,
    /// Money entering the account; imported as a positive amount.
    pub credit_column: Option<usize>,
    pub currency_column: Option<usize>,
    pub reference_column: Option<usize>,
    pub memo_column: Option<usize>,
    pub date_format: Option<String>,
}

impl CsvColumnMapping {
    /// Guesses columns from header names in English, Czech, Polish and German.
    pub fn detect(headers: &[String]) -> Self {
        const ROLES: &[(Role, &[&str])] = &[
            (Role::Date, &["date", "datum", "booking date", "transaction date", "started date", "completed date", "posted", "data"]),
            (Role::Description, &["description", "popis", "payee", "name", "details", "merchant", "název", "nazev", "opis", "beschreibung"]),
            (Role::Amount, &["amount", "částka", "castka", "kwota", "betrag", "value"]),
            (Role::Debit, &["debit", "withdrawal", "paid out", "money out", "výdaj", "vydaj"]),
            (Role::Credit, &["credit", "deposit", "paid in", "money in", "příjem", "prijem"]),
            (Role::Currency, &["currency", "měna", "mena", "waluta", "währung"]),
            (Role::Reference, &["reference", "vs", "variabilní symbol", "variable symbol", "transaction id"]),
            (Role::Memo, &["memo", "notes", "note", "poznámka", "poznamka", "message", "zpráva", "zprava"]),
        ];

        let mut mapping = CsvColumnMapping::default();
        for (idx, header) in headers.iter().enumerate() {
            let header = header.trim().trim_start_matches('\u{feff}').to_lowercase();
            let role = ROLES.iter().find_map(|(role, names)| {
                let hit = names
                    .iter()
                    .any(|n| header == *n || header.starts_with(&format!("{n} ")));
                (hit && mapping.slot(*role).is_none()).then_some(*role)
            });
            if let Some(role) = role {
                *mapping.slot_mut(role) = Some(idx);
            }
        }
        mapping
    }

    fn is_usable(&self) -> bool {
        self.date_column.is_some()
            && (self.amount_column.is_some()
                || self.debit_column.is_some()
                || self.credit_column.is_some())
    }

    fn slot(&self, role: Role) -> Option<usize> {
        match role {
            Role::Date => self.date_column,
            Role::Description => self.description_column,
            Role::Amount => self.amount_column,
            Role::Debit => self.debit_column,
            Role::Credit => self.credit_column,
            Role::Currency => self.currency_column,
            Role::Reference => self.reference_column,
            Role::Memo => self.memo_column,
        }
    }

    fn slot_mut(&mut self, role: Role) -> &mut Option<usize> {
        match role {
            Role::Date => &mut self.date_column,
            Role::Description => &mut self.description_column,
            Role::Amount => &mut self.amount_column,
            Role::Debit => &mut self.debit_column,
            Role::Credit => &mut self.credit_column,
            Role::Currency => &mut self.currency_column,
            Role::Reference => &mut self.reference_column,
            Role::Memo => &mut self.memo_column,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Date,
    Description,
    Amount,
    Debit,
    Credit,
    Currency,
    Reference,
    Memo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CsvImportProfile {
    pub name: String,
    /// `None` detects columns from the header row.
    pub mapping: Option<CsvColumnMapping>,
    pub has_header: bool,
    /// `None` uses the bank's delimiter, then sniffs the first line.
    pub delimiter: Option<char>,
}

impl Default for CsvImportProfile {
    fn default() -> Self {
        Self {
            name: "Auto-detected".to_string(),
            mapping: None,
            has_header: true,
            delimiter: None,
        }
    }
}

#[derive(Error, Debug)]
pub enum CsvError {
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("Missing required column: {0}")]
    MissingColumn(String),
    #[error(transparent)]
    Locale(#[from] LocaleError),
    #[error("No column mapping: header row has no date/amount columns")]
    NoMapping,
    #[error("No data rows")]
    NoDataRows,
}

#[derive(Debug, Clone, Default)]
pub struct CsvParser {
    pub profile: CsvImportProfile,
}

impl CsvParser {
    pub fn new(profile: CsvImportProfile) -> Self {
        Self { profile }
    }
}

impl StatementParser for CsvParser {
    fn id(&self) -> &'static str {
        "csv"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["csv"]
    }

    fn sniff(&self, content: &[u8]) -> bool {
        let Some(text) = utf8_prefix(content, SNIFF_WINDOW) else {
            return false;
        };
        let first = text.lines().next().unwrap_or_default();
        !first.trim_start().starts_with('<')
            && [';', ',', '\t'].iter().any(|d| first.matches(*d).count() >= 2)
    }

    fn parse(&self, data: &[u8], ctx: &ParseContext) -> ParseResult {
        let mut result = ParseResult::new(self.id());
        result.set_meta("extraction_method", "csv");
        result.set_meta("bank", ctx.profile.id());

        let text = String::from_utf8_lossy(data);
        let text = text.trim_start_matches('\u{feff}');
        let delimiter = self
            .profile
            .delimiter
            .or(ctx.profile.config.csv_delimiter)
            .unwrap_or_else(|| sniff_delimiter(text));
        result.set_meta("delimiter", delimiter.escape_default());

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .delimiter(u8::try_from(delimiter).unwrap_or(b','))
            .from_reader(text.as_bytes());

        let mut records = reader.records();
        let mut mapping = self.profile.mapping.clone();
        if self.profile.has_header {
            match records.next() {
                Some(Ok(header)) => {
                    if mapping.is_none() {
                        let headers: Vec<String> = header.iter().map(str::to_string).collect();
                        mapping = Some(CsvColumnMapping::detect(&headers));
                    }
                }
                Some(Err(e)) => {
                    result.fatal(CsvError::from(e).to_string());
                    return result;
                }
                None => {
                    result.fatal(CsvError::NoDataRows.to_string());
                    return result;
                }
            }
        }
        let Some(mapping) = mapping.filter(CsvColumnMapping::is_usable) else {
            result.fatal(CsvError::NoMapping.to_string());
            return result;
        };

        let mut line_count = 0usize;
        for record in records {
            let record = match record {
                Ok(record) => record,
                Err(e) => {
                    let line = e.position().map_or(0, |p| p.line());
                    tracing::warn!(line, error = %e, "CSV reader stopped");
                    result.error(format!("line {line}: {e}"));
                    break;
                }
            };
            line_count += 1;
            let line = record.position().map_or(0, |p| p.line());

            if record.iter().all(|f| f.trim().is_empty()) {
                continue;
            }
            let joined = record.iter().collect::<Vec<_>>().join(" ");
            if ctx.profile.is_ignored(&joined)
                || record.iter().any(|f| ctx.profile.is_ignored(f.trim()))
            {
                continue;
            }

            match parse_row(&record, &mapping, &ctx.profile) {
                Ok(Some(tx)) => result.push(tx),
                Ok(None) => {}
                Err(e) => {
                    tracing::debug!(line, error = %e, "skipping CSV row");
                    result.warn(format!("line {line}: {e}"));
                }
            }
        }
        result.set_meta("line_count", line_count);

        if result.is_empty() && !result.is_fatal() {
            result.fatal(CsvError::NoDataRows.to_string());
        }
        result
    }
}

const SNIFF_WINDOW: usize = 4096;

/// At most `max` bytes as UTF-8. A character split by the cut is dropped.
fn utf8_prefix(content: &[u8], max: usize) -> Option<&str> {
    let head = &content[..content.len().min(max)];
    match std::str::from_utf8(head) {
        Ok(text) => Some(text),
        Err(e) if e.error_len().is_none() => std::str::from_utf8(&head[..e.valid_up_to()]).ok(),
        Err(_) => None,
    }
}

fn sniff_delimiter(text: &str) -> char {
    let first = text.lines().next().unwrap_or_default();
    [';', '\t', ',']
        .into_iter()
        .max_by_key(|d| first.matches(*d).count())
        .filter(|d| first.contains(*d))
        .unwrap_or(',')
}

/// `Ok(None)` for rows without any amount (e.g. pending or informational rows).
fn parse_row(
    record: &csv::StringRecord,
    mapping: &CsvColumnMapping,
    profile: &BankProfile,
) -> Result<Option<ParsedTransaction>, CsvError> {
    let style = profile.config.decimal;
    let field = |col: Option<usize>| {
        col.and_then(|c| record.get(c))
            .map(str::trim)
            .filter(|s| !s.is_empty())
    };

    let date_col = mapping
        .date_column
        .ok_or_else(|| CsvError::MissingColumn("date".to_string()))?;
    let raw_date = record
        .get(date_col)
        .ok_or_else(|| CsvError::MissingColumn(format!("date_column {date_col}")))?;
    let date = parse_csv_date(raw_date, mapping, profile)?;

    let amount = if mapping.amount_column.is_some() {
        match field(mapping.amount_column) {
            Some(raw) => parse_amount(raw, style)?,
            None => return Ok(None),
        }
    } else {
        let debit = field(mapping.debit_column)
            .map(|s| parse_amount(s, style))
            .transpose()?;
        let credit = field(mapping.credit_column)
            .map(|s| parse_amount(s, style))
            .transpose()?;
        match (debit, credit) {
            (Some(d), None) => -d.abs(),
            (None, Some(c)) => c.abs(),
            (Some(d), Some(c)) => c.abs() - d.abs(),
            (None, None) => return Ok(None),
        }
    };

    let description = field(mapping.description_column).unwrap_or_default().to_string();
    let mut tx = ParsedTransaction::new(date, description.clone(), amount);
    if !description.is_empty() {
        let parts = split_merchant(&description, profile);
        tx.merchant = Some(parts.merchant);
        tx.location = parts.location;
    }
    tx.reference = field(mapping.reference_column).map(str::to_string);
    tx.notes = field(mapping.memo_column).map(str::to_string);
    if let Some(currency) = field(mapping.currency_column) {
        tx.raw_data.insert("currency".to_string(), currency.to_string());
    }
    for (idx, value) in record.iter().enumerate() {
        tx.raw_data.insert(format!("col{idx}"), value.to_string());
    }
    Ok(Some(tx))
}

fn parse_csv_date(
    raw: &str,
    mapping: &CsvColumnMapping,
    profile: &BankProfile,
) -> Result<NaiveDate, CsvError> {
    let formats: Vec<&str> = mapping
        .date_format
        .as_deref()
        .into_iter()
        .chain(profile.config.date_formats.iter().map(String::as_str))
        .collect();
    Ok(parse_date(raw, &formats)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bank::{BankConfigSet, BankId};
    use rust_decimal::Decimal;
    use std::str::FromStr;
    use std::sync::Arc;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn ctx(bank: BankId) -> ParseContext {
        ParseContext::new(BankConfigSet::builtin().unwrap().profile(&bank))
    }

    // ── column detection ──────────────────────────────────────────────────────

    #[test]
    fn detect_english_headers() {
        let headers: Vec<String> = ["Date", "Description", "Amount", "Currency", "Reference"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let mapping = CsvColumnMapping::detect(&headers);
        assert_eq!(mapping.date_column, Some(0));
        assert_eq!(mapping.description_column, Some(1));
        assert_eq!(mapping.amount_column, Some(2));
        assert_eq!(mapping.currency_column, Some(3));
        assert_eq!(mapping.reference_column, Some(4));
    }

    #[test]
    fn detect_revolut_headers_takes_first_date() {
        let headers: Vec<String> =
            "Type,Product,Started Date,Completed Date,Description,Amount,Fee,Currency,State,Balance"
                .split(',')
                .map(str::to_string)
                .collect();
        let mapping = CsvColumnMapping::detect(&headers);
        assert_eq!(mapping.date_column, Some(2));
        assert_eq!(mapping.description_column, Some(4));
        assert_eq!(mapping.amount_column, Some(5));
        assert_eq!(mapping.currency_column, Some(7));
    }

    #[test]
    fn detect_czech_headers() {
        let headers: Vec<String> = ["Datum", "Popis", "Částka", "Měna", "VS", "Poznámka"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let mapping = CsvColumnMapping::detect(&headers);
        assert!(mapping.is_usable());
        assert_eq!(mapping.amount_column, Some(2));
        assert_eq!(mapping.reference_column, Some(4));
        assert_eq!(mapping.memo_column, Some(5));
    }

    #[test]
    fn delimiter_sniffing() {
        assert_eq!(sniff_delimiter("a;b;c\n1;2;3"), ';');
        assert_eq!(sniff_delimiter("a,b,c"), ',');
        assert_eq!(sniff_delimiter("a\tb\tc"), '\t');
        assert_eq!(sniff_delimiter("single"), ',');
    }

    // ── full parse ────────────────────────────────────────────────────────────

    #[test]
    fn parse_basic_csv_counts_every_row() {
        let data = b"date,description,amount\n2025-05-01,AMAZON,-49.99\n2025-05-02,Coffee Shop,-12.90\n2025-05-03,SALARY,1500.00\n";
        let result = CsvParser::default().parse(data, &ctx(BankId::Generic));
        assert!(result.success, "{:?}", result.errors);
        assert_eq!(result.len(), 3);
        assert_eq!(result.transactions[1].amount, dec("-12.90"));
        assert_eq!(result.transactions[1].description, "Coffee Shop");
        assert_eq!(result.metadata.get("line_count").map(String::as_str), Some("3"));
    }

    #[test]
    fn parse_csob_semicolon_decimal_comma() {
        let data = "Datum;Popis;Částka;Měna\n02.05.2025;ALBERT VLTAVSKA PRAHA 5;-1 300,54;CZK\n03.05.2025;Zůstatek;10 000,00;CZK\n04.05.2025;ROHLIK.CZ S.R.O.;-250,00;CZK\n";
        let result = CsvParser::default().parse(data.as_bytes(), &ctx(BankId::Csob));
        assert!(result.success, "{:?}", result.errors);
        assert_eq!(result.len(), 2, "balance row is ignored by the bank profile");
        let first = &result.transactions[0];
        assert_eq!(first.amount, dec("-1300.54"));
        assert_eq!(first.merchant.as_deref(), Some("ALBERT VLTAVSKA"));
        assert_eq!(first.location.as_deref(), Some("PRAHA 5"));
        assert_eq!(first.raw_data.get("currency").map(String::as_str), Some("CZK"));
        assert_eq!(result.transactions[1].merchant.as_deref(), Some("ROHLIK.CZ"));
    }

    #[test]
    fn debit_credit_columns_sign_convention() {
        let data = b"date,description,debit,credit\n2025-01-15,PAYMENT,,100.00\n2025-01-16,CHARGE,50.00,\n";
        let result = CsvParser::default().parse(data, &ctx(BankId::Generic));
        assert_eq!(result.len(), 2);
        assert_eq!(result.transactions[0].amount, dec("100.00"));
        assert_eq!(result.transactions[1].amount, dec("-50.00"));
    }

    #[test]
    fn malformed_rows_become_warnings() {
        let data = b"date,description,amount\n2025-05-01,OK,-1.00\nnot-a-date,BAD,-2.00\n2025-05-03,BAD AMOUNT,abc\n2025-05-04,OK2,-3.00\n";
        let result = CsvParser::default().parse(data, &ctx(BankId::Generic));
        assert!(result.success);
        assert_eq!(result.len(), 2);
        assert_eq!(result.warnings.len(), 2);
        assert!(result.warnings[0].contains("not-a-date"), "{:?}", result.warnings);
    }

    #[test]
    fn explicit_mapping_without_header() {
        let profile = CsvImportProfile {
            name: "headerless".to_string(),
            has_header: false,
            delimiter: Some(','),
            mapping: Some(CsvColumnMapping {
                date_column: Some(0),
                description_column: Some(1),
                amount_column: Some(2),
                date_format: Some("%m/%d/%Y".to_string()),
                ..Default::default()
            }),
        };
        let data = b"01/15/2024,AMAZON,49.99\n01/16/2024,STARBUCKS,-5.00\n";
        let result = CsvParser::new(profile).parse(data, &ctx(BankId::Generic));
        assert_eq!(result.len(), 2);
        assert_eq!(
            result.transactions[0].date,
            NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()
        );
    }

    #[test]
    fn header_only_is_fatal() {
        let data = b"date,description,amount\n";
        let result = CsvParser::default().parse(data, &ctx(BankId::Generic));
        assert!(!result.success);
        assert!(result.is_fatal());
    }

    #[test]
    fn unusable_header_is_fatal() {
        let data = b"foo,bar\n1,2\n";
        let ctx = ParseContext::new(Arc::new(crate::bank::generic_profile()));
        let result = CsvParser::default().parse(data, &ctx);
        assert!(!result.success);
        assert!(result.errors[0].contains("No column mapping"));
    }

    #[test]
    fn sniff_requires_delimited_first_line() {
        let parser = CsvParser::default();
        assert!(parser.sniff(b"date;desc;amount\n"));
        assert!(!parser.sniff(b"<OFX>\n"));
        assert!(!parser.sniff(b"hello world\n"));
    }

    #[test]
    fn sniff_tolerates_character_cut_at_window_edge() {
        let mut content = "Datum;Popis;Castka\n".to_string();
        while content.len() < SNIFF_WINDOW - 1 {
            content.push('x');
        }
        content.push('č');
        assert!(std::str::from_utf8(&content.as_bytes()[..SNIFF_WINDOW]).is_err());
        assert!(CsvParser::default().sniff(content.as_bytes()));
        assert!(!CsvParser::default().sniff(b"a;b;c\n\xff\xfe garbage"));
    }
}
