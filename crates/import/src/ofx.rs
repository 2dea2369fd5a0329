use chrono::NaiveDate;
use rust_decimal::Decimal;
use tally_core::{DateRange, ForeignAmount, ParseResult, ParsedTransaction, RateQuote};

use crate::locale::{parse_amount, DecimalStyle};
use crate::merchant::split_merchant;
use crate::registry::{ParseContext, StatementParser};

/// OFX 1.x (SGML) and OFX 2.x (XML) bank statements. QFX is the same format.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfxParser;

#[derive(Default)]
struct BuildingTrx {
    index: usize,
    trn_type: Option<String>,
    fit_id: Option<String>,
    date: Option<String>,
    amount: Option<String>,
    memo: Option<String>,
    name: Option<String>,
    check_number: Option<String>,
    currency: Option<String>,
    rate: Option<String>,
    /// `ORIGCURRENCY` means TRNAMT is already in the default currency.
    amount_is_base: bool,
}

#[derive(Default)]
struct Statement {
    account_id: Option<String>,
    bank_id: Option<String>,
    currency: Option<String>,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
}

impl StatementParser for OfxParser {
    fn id(&self) -> &'static str {
        "ofx"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["ofx", "qfx"]
    }

    fn sniff(&self, content: &[u8]) -> bool {
        let head = String::from_utf8_lossy(&content[..content.len().min(1024)]).to_uppercase();
        head.trim_start_matches('\u{feff}').trim_start().starts_with("OFXHEADER")
            || head.contains("<OFX>")
    }

    fn parse(&self, data: &[u8], ctx: &ParseContext) -> ParseResult {
        let mut result = ParseResult::new(self.id());
        result.set_meta("extraction_method", "ofx");
        result.set_meta("bank", ctx.profile.id());

        let content = String::from_utf8_lossy(data);
        if !content.to_uppercase().contains("<OFX>") {
            result.fatal("No <OFX> element found");
            return result;
        }

        let mut stmt = Statement::default();
        let mut current: Option<BuildingTrx> = None;
        let mut seen = 0usize;

        for (tag, value) in tags(&content) {
            let value = (!value.is_empty()).then(|| unescape(value));
            match tag.as_str() {
                "STMTTRN" => {
                    seen += 1;
                    current = Some(BuildingTrx {
                        index: seen,
                        ..Default::default()
                    });
                }
                "/STMTTRN" => {
                    if let Some(trx) = current.take() {
                        finish_transaction(trx, ctx, &mut result);
                    }
                }
                _ => match current.as_mut() {
                    Some(trx) => match tag.as_str() {
                        "TRNTYPE" => trx.trn_type = value,
                        "FITID" => trx.fit_id = value,
                        "DTPOSTED" => trx.date = value,
                        "TRNAMT" => trx.amount = value,
                        "MEMO" => trx.memo = value,
                        "NAME" | "PAYEE" if trx.name.is_none() => trx.name = value,
                        "CHECKNUM" => trx.check_number = value,
                        "ORIGCURRENCY" => trx.amount_is_base = true,
                        "CURRATE" => trx.rate = value,
                        "CURSYM" => trx.currency = value,
                        _ => {}
                    },
                    None => match tag.as_str() {
                        "ACCTID" => stmt.account_id = value,
                        "BANKID" => stmt.bank_id = value,
                        "CURDEF" => stmt.currency = value,
                        "DTSTART" => stmt.start = value.as_deref().and_then(parse_ofx_date),
                        "DTEND" => stmt.end = value.as_deref().and_then(parse_ofx_date),
                        _ => {}
                    },
                },
            }
        }

        // Unterminated SGML aggregate at end of file.
        if let Some(trx) = current.take() {
            finish_transaction(trx, ctx, &mut result);
        }

        match stmt.account_id {
            Some(account) => result.set_meta("account", account),
            None => result.error("Missing required field: ACCTID"),
        }
        if let Some(bank_id) = stmt.bank_id {
            result.set_meta("routing", bank_id);
        }
        if let Some(currency) = stmt.currency {
            result.set_meta("currency", currency);
        }
        match (stmt.start, stmt.end) {
            (Some(start), Some(end)) => result.set_meta("period", DateRange::new(start, end)),
            _ => result.error("Missing required field: DTSTART/DTEND"),
        }
        result.set_meta("line_count", seen);

        if seen == 0 {
            result.warn("Statement contains no STMTTRN records");
        }
        result
    }
}

fn finish_transaction(trx: BuildingTrx, ctx: &ParseContext, result: &mut ParseResult) {
    let n = trx.index;
    let Some(date) = trx.date.as_deref().and_then(parse_ofx_date) else {
        result.warn(format!("transaction {n}: missing or invalid DTPOSTED"));
        return;
    };
    let amount = match trx.amount.as_deref().map(|a| parse_amount(a, DecimalStyle::Auto)) {
        Some(Ok(amount)) => amount,
        Some(Err(e)) => {
            result.warn(format!("transaction {n}: {e}"));
            return;
        }
        None => {
            result.warn(format!("transaction {n}: missing TRNAMT"));
            return;
        }
    };

    let description = trx
        .name
        .clone()
        .or_else(|| trx.memo.clone())
        .unwrap_or_default();
    let mut tx = ParsedTransaction::new(date, description.clone(), amount);

    if let (Some(currency), Some(rate)) = (trx.currency.as_deref(), trx.rate.as_deref()) {
        match rate.replace(',', ".").parse::<Decimal>() {
            Ok(rate) if !rate.is_zero() => {
                let foreign = ForeignAmount {
                    amount: if trx.amount_is_base {
                        (amount / rate).round_dp(2)
                    } else {
                        amount
                    },
                    currency: currency.to_string(),
                    rate,
                    quote: RateQuote::BasePerForeign,
                };
                if !trx.amount_is_base {
                    if let Some(base) = foreign.converted() {
                        tx.amount = base;
                    }
                }
                tx.original = Some(foreign);
            }
            _ => result.warn(format!("transaction {n}: invalid CURRATE {rate}")),
        }
    }

    if !description.is_empty() {
        let parts = split_merchant(&description, &ctx.profile);
        tx.merchant = Some(parts.merchant);
        tx.location = parts.location;
    }
    if trx.name.is_some() {
        tx.notes = trx.memo.clone();
    }
    tx.reference = trx.fit_id.clone().or_else(|| trx.check_number.clone());

    let raw = [
        ("trntype", trx.trn_type),
        ("fitid", trx.fit_id),
        ("checknum", trx.check_number),
        ("memo", trx.memo),
    ];
    for (key, value) in raw {
        if let Some(value) = value {
            tx.raw_data.insert(key.to_string(), value);
        }
    }
    result.push(tx);
}

/// Yields `(TAG, text-after-tag)` pairs. Works for SGML, where values run to
/// the end of the line, and for XML with closing tags on the same line.
fn tags(content: &str) -> impl Iterator<Item = (String, &str)> {
    content.split('<').skip(1).filter_map(|chunk| {
        let (tag, rest) = chunk.split_once('>')?;
        Some((tag.trim().to_uppercase(), rest.trim()))
    })
}

fn unescape(value: &str) -> String {
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// `YYYYMMDD[HHMMSS[.XXX]][[offset:TZ]]`; only the date part is used.
fn parse_ofx_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if let Some(date) = s
        .get(..8)
        .and_then(|d| NaiveDate::parse_from_str(d, "%Y%m%d").ok())
    {
        return Some(date);
    }
    chrono::DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.date_naive())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    // ── unit helpers ──────────────────────────────────────────────────────────

    #[test]
    fn ofx_date_variants() {
        assert_eq!(parse_ofx_date("20240115"), Some(date(2024, 1, 15)));
        assert_eq!(parse_ofx_date("20240115120000[-5:EST]"), Some(date(2024, 1, 15)));
        assert_eq!(parse_ofx_date("20240115120000.000"), Some(date(2024, 1, 15)));
        assert_eq!(parse_ofx_date("not-a-date"), None);
        assert_eq!(parse_ofx_date(""), None);
    }

    #[test]
    fn unescape_entities() {
        assert_eq!(unescape("M&amp;S &lt;UK&gt;"), "M&S <UK>");
    }

    #[test]
    fn tags_handle_both_syntaxes() {
        let sgml: Vec<_> = tags("<NAME>ACME\n<TRNAMT>-1.00\n").collect();
        assert_eq!(sgml[0], ("NAME".to_string(), "ACME"));
        let xml: Vec<_> = tags("<NAME>ACME</NAME><TRNAMT>-1.00</TRNAMT>").collect();
        assert_eq!(xml[0], ("NAME".to_string(), "ACME"));
        assert_eq!(xml[1], ("/NAME".to_string(), ""));
        assert_eq!(xml[2], ("TRNAMT".to_string(), "-1.00"));
    }

    // ── full statement parse ──────────────────────────────────────────────────

    const SAMPLE_OFX: &str = r#"
OFXHEADER:100
DATA:OFXSGML
VERSION:102

<OFX>
<BANKMSGSRSV1>
<STMTTRNRS>
<STMTRS>
<CURDEF>USD
<BANKACCTFROM>
<BANKID>123456789
<ACCTID>000112345
<ACCTTYPE>CHECKING
</BANKACCTFROM>
<BANKTRANLIST>
<DTSTART>20240101
<DTEND>20240131
<STMTTRN>
<TRNTYPE>DEBIT
<DTPOSTED>20240115
<TRNAMT>-49.99
<FITID>TXN001
<NAME>AMAZON MARKETPLACE
<MEMO>Online purchase
</STMTTRN>
<STMTTRN>
<TRNTYPE>CREDIT
<DTPOSTED>20240120
<TRNAMT>1500.00
<FITID>TXN002
<NAME>DIRECT DEPOSIT
</STMTTRN>
</BANKTRANLIST>
</STMTRS>
</STMTTRNRS>
</BANKMSGSRSV1>
</OFX>
"#;

    #[test]
    fn parse_sgml_statement() {
        let result = OfxParser.parse(SAMPLE_OFX.as_bytes(), &ParseContext::default());
        assert!(result.success, "{:?}", result.errors);
        assert!(result.errors.is_empty());
        assert_eq!(result.len(), 2);
        assert_eq!(result.metadata["account"], "000112345");
        assert_eq!(result.metadata["currency"], "USD");
        assert_eq!(result.metadata["period"], "2024-01-01 to 2024-01-31");

        let t0 = &result.transactions[0];
        assert_eq!(t0.date, date(2024, 1, 15));
        assert_eq!(t0.amount, dec("-49.99"));
        assert_eq!(t0.description, "AMAZON MARKETPLACE");
        assert_eq!(t0.reference.as_deref(), Some("TXN001"));
        assert_eq!(t0.notes.as_deref(), Some("Online purchase"));
        assert_eq!(t0.raw_data["trntype"], "DEBIT");

        let t1 = &result.transactions[1];
        assert_eq!(t1.amount, dec("1500.00"));
        assert!(t1.notes.is_none());
    }

    #[test]
    fn parse_xml_statement_on_few_lines() {
        let xml = r#"<?xml version="1.0"?><?OFX OFXHEADER="200" VERSION="220"?>
<OFX><BANKMSGSRSV1><STMTTRNRS><STMTRS><CURDEF>EUR</CURDEF>
<BANKACCTFROM><ACCTID>DE001</ACCTID></BANKACCTFROM>
<BANKTRANLIST><DTSTART>20250501</DTSTART><DTEND>20250531</DTEND>
<STMTTRN><TRNTYPE>POS</TRNTYPE><DTPOSTED>20250502</DTPOSTED><TRNAMT>-12.90</TRNAMT><FITID>A1</FITID><NAME>Coffee Shop</NAME></STMTTRN>
<STMTTRN><TRNTYPE>POS</TRNTYPE><DTPOSTED>20250503</DTPOSTED><TRNAMT>-3.10</TRNAMT><FITID>A2</FITID><NAME>M&amp;S</NAME></STMTTRN>
</BANKTRANLIST></STMTRS></STMTTRNRS></BANKMSGSRSV1></OFX>"#;
        let result = OfxParser.parse(xml.as_bytes(), &ParseContext::default());
        assert!(result.success, "{:?}", result.errors);
        assert_eq!(result.len(), 2);
        assert_eq!(result.transactions[0].description, "Coffee Shop");
        assert_eq!(result.transactions[1].description, "M&S");
    }

    #[test]
    fn foreign_currency_aggregate_converts_to_base() {
        let ofx = r#"<OFX><CURDEF>CZK<ACCTID>1
<DTSTART>20250501<DTEND>20250531
<STMTTRN><DTPOSTED>20250502<TRNAMT>-4.83<FITID>F1<NAME>ZABKA
<CURRENCY><CURRATE>4.2<CURSYM>PLN</CURRENCY>
</STMTTRN></OFX>"#;
        let result = OfxParser.parse(ofx.as_bytes(), &ParseContext::default());
        let tx = &result.transactions[0];
        let original = tx.original.as_ref().unwrap();
        assert_eq!(original.amount, dec("-4.83"));
        assert_eq!(original.currency, "PLN");
        assert_eq!(tx.amount, dec("-20.29"));
        assert!(tx.conversion_warning(tally_core::DEFAULT_CONVERSION_EPSILON).is_none());
    }

    #[test]
    fn bad_transactions_become_warnings() {
        let ofx = r#"<OFX><ACCTID>1<DTSTART>20250501<DTEND>20250531
<STMTTRN><TRNAMT>-1.00<NAME>NO DATE</STMTTRN>
<STMTTRN><DTPOSTED>20250502<TRNAMT>abc<NAME>BAD AMOUNT</STMTTRN>
<STMTTRN><DTPOSTED>20250503<TRNAMT>-2.00<NAME>GOOD</STMTTRN>
</OFX>"#;
        let result = OfxParser.parse(ofx.as_bytes(), &ParseContext::default());
        assert!(result.success);
        assert_eq!(result.len(), 1);
        assert_eq!(result.warnings.len(), 2);
        assert!(result.warnings[0].starts_with("transaction 1"));
    }

    #[test]
    fn missing_account_and_dates_are_errors_not_panics() {
        let ofx = "<OFX><STMTTRN><DTPOSTED>20250502<TRNAMT>-2.00<NAME>X</STMTTRN></OFX>";
        let result = OfxParser.parse(ofx.as_bytes(), &ParseContext::default());
        assert_eq!(result.len(), 1);
        assert!(result.success, "missing header fields are non-fatal");
        assert_eq!(result.errors.len(), 2);
    }

    #[test]
    fn non_ofx_content_is_fatal() {
        let result = OfxParser.parse(b"date,amount\n", &ParseContext::default());
        assert!(!result.success);
        assert!(result.is_fatal());
    }
}
