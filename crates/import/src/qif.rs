use chrono::NaiveDate;
use std::collections::BTreeMap;
use tally_core::{ParseResult, ParsedTransaction};

use crate::locale::{parse_amount, parse_date};
use crate::merchant::split_merchant;
use crate::registry::{ParseContext, StatementParser};

/// Quicken Interchange Format. Only cash-like account sections carry
/// transactions; category, class and memorized lists are skipped.
#[derive(Debug, Clone, Copy, Default)]
pub struct QifParser;

const TRANSACTION_TYPES: &[&str] = &["bank", "cash", "ccard", "oth a", "oth l"];

const QIF_DATE_FORMATS: &[&str] = &["%m/%d/%Y", "%m/%d/%y", "%d.%m.%Y", "%d.%m.%y", "%Y-%m-%d"];

#[derive(Default)]
struct Record {
    line: usize,
    fields: BTreeMap<char, Vec<String>>,
}

impl Record {
    fn first(&self, code: char) -> Option<&str> {
        self.fields
            .get(&code)
            .and_then(|v| v.first())
            .map(String::as_str)
            .filter(|s| !s.is_empty())
    }

    fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl StatementParser for QifParser {
    fn id(&self) -> &'static str {
        "qif"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["qif"]
    }

    fn sniff(&self, content: &[u8]) -> bool {
        let head = String::from_utf8_lossy(&content[..content.len().min(256)]);
        head.trim_start_matches('\u{feff}')
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .is_some_and(|l| {
                let l = l.to_ascii_lowercase();
                l.starts_with("!type:") || l.starts_with("!account") || l.starts_with("!option")
            })
    }

    fn parse(&self, data: &[u8], ctx: &ParseContext) -> ParseResult {
        let mut result = ParseResult::new(self.id());
        result.set_meta("extraction_method", "qif");
        result.set_meta("bank", ctx.profile.id());

        let content = String::from_utf8_lossy(data);
        let mut section: Option<String> = None;
        let mut in_account_block = false;
        let mut record = Record::default();
        let mut line_count = 0usize;

        for (idx, raw) in content.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw.trim_end_matches('\r').trim_start_matches('\u{feff}');
            if line.trim().is_empty() {
                continue;
            }
            line_count += 1;

            if let Some(header) = line.strip_prefix('!') {
                let header = header.trim().to_ascii_lowercase();
                if header == "account" {
                    in_account_block = true;
                } else if let Some(kind) = header.strip_prefix("type:") {
                    let kind = kind.trim();
                    result.set_meta("account_type", kind);
                    section = Some(kind.to_string());
                    in_account_block = false;
                }
                record = Record::default();
                continue;
            }

            if line.starts_with('^') {
                let done = std::mem::take(&mut record);
                if in_account_block {
                    in_account_block = false;
                } else if is_transaction_section(section.as_deref()) && !done.is_empty() {
                    finish_record(done, ctx, &mut result);
                }
                continue;
            }

            let mut chars = line.chars();
            let Some(code) = chars.next() else { continue };
            if record.is_empty() {
                record.line = line_no;
            }
            record
                .fields
                .entry(code.to_ascii_uppercase())
                .or_default()
                .push(chars.as_str().trim().to_string());
        }

        if !record.is_empty() && !in_account_block && is_transaction_section(section.as_deref()) {
            finish_record(record, ctx, &mut result);
        }
        result.set_meta("line_count", line_count);

        match section {
            None => result.fatal("Missing !Type: header"),
            Some(kind) if !TRANSACTION_TYPES.contains(&kind.as_str()) && result.is_empty() => {
                result.warn(format!("Unsupported QIF section type: {kind}"));
            }
            _ => {}
        }
        result
    }
}

fn is_transaction_section(section: Option<&str>) -> bool {
    section.is_some_and(|s| TRANSACTION_TYPES.contains(&s))
}

fn finish_record(record: Record, ctx: &ParseContext, result: &mut ParseResult) {
    let line = record.line;
    let Some(raw_date) = record.first('D') else {
        result.warn(format!("line {line}: record has no date"));
        return;
    };
    let date = match parse_qif_date(raw_date, &ctx.profile.config.date_formats) {
        Some(date) => date,
        None => {
            result.warn(format!("line {line}: Invalid date format: {raw_date}"));
            return;
        }
    };
    let Some(raw_amount) = record.first('T').or_else(|| record.first('U')) else {
        result.warn(format!("line {line}: record has no amount"));
        return;
    };
    let amount = match parse_amount(raw_amount, ctx.profile.config.decimal) {
        Ok(amount) => amount,
        Err(e) => {
            result.warn(format!("line {line}: {e}"));
            return;
        }
    };

    let payee = record.first('P');
    let memo = record.first('M');
    let description = payee.or(memo).unwrap_or_default().to_string();

    let mut tx = ParsedTransaction::new(date, description.clone(), amount);
    if !description.is_empty() {
        let parts = split_merchant(&description, &ctx.profile);
        tx.merchant = Some(parts.merchant);
        tx.location = parts.location;
    }
    if payee.is_some() {
        tx.notes = memo.map(str::to_string);
    }
    tx.reference = record.first('N').map(str::to_string);
    if let Some(category) = record.first('L') {
        tx.raw_data.insert("category".to_string(), category.to_string());
    }
    if let Some(cleared) = record.first('C') {
        tx.raw_data.insert("cleared".to_string(), cleared.to_string());
    }
    if let Some(address) = record.fields.get(&'A') {
        tx.raw_data.insert("address".to_string(), address.join("\n"));
    }
    if let Some(splits) = record.fields.get(&'S') {
        tx.raw_data.insert("split_count".to_string(), splits.len().to_string());
    }
    result.push(tx);
}

/// Accepts Quicken's apostrophe-year form (`1/15'24`, meaning 2024) and
/// space-padded fields (` 1/ 5/24`).
fn parse_qif_date(raw: &str, bank_formats: &[String]) -> Option<NaiveDate> {
    let mut s: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if let Some((md, year)) = s.split_once('\'') {
        let year = match year.len() {
            1 | 2 => format!("20{year:0>2}"),
            _ => year.to_string(),
        };
        s = format!("{md}/{year}");
    }
    let formats: Vec<&str> = bank_formats
        .iter()
        .map(String::as_str)
        .chain(QIF_DATE_FORMATS.iter().copied())
        .collect();
    parse_date(&s, &formats).ok()
}
