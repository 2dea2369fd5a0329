use std::path::Path;
use std::sync::Arc;
use tally_core::ParseResult;
use thiserror::Error;

use crate::bank::{generic_profile, BankProfile};
use crate::csv::CsvParser;
use crate::ofx::OfxParser;
use crate::qif::QifParser;
use crate::text::TextStatementParser;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("Unsupported statement format: {filename}")]
    Unsupported { filename: String },
}

/// Per-call inputs a parser may consult. Parsers keep no state between calls.
#[derive(Debug, Clone)]
pub struct ParseContext {
    pub profile: Arc<BankProfile>,
    /// Year used for day/month-only dates when the statement header has none.
    pub year_hint: Option<i32>,
}

impl ParseContext {
    pub fn new(profile: Arc<BankProfile>) -> Self {
        Self {
            profile,
            year_hint: None,
        }
    }

    pub fn with_year_hint(mut self, year: Option<i32>) -> Self {
        self.year_hint = year;
        self
    }
}

impl Default for ParseContext {
    fn default() -> Self {
        Self::new(Arc::new(generic_profile()))
    }
}

/// A statement format. `parse` never fails: problems are reported inside the
/// returned [`ParseResult`].
pub trait StatementParser: Send + Sync {
    fn id(&self) -> &'static str;

    /// Lowercase extensions, without the dot.
    fn extensions(&self) -> &'static [&'static str];

    /// Content-signature check used when the extension is unknown.
    fn sniff(&self, content: &[u8]) -> bool;

    fn parse(&self, data: &[u8], ctx: &ParseContext) -> ParseResult;

    fn can_parse(&self, filename: &str) -> bool {
        extension_of(filename).is_some_and(|ext| self.extensions().contains(&ext.as_str()))
    }

    fn parse_file(&self, path: &Path, ctx: &ParseContext) -> ParseResult {
        match std::fs::read(path) {
            Ok(data) => self.parse(&data, ctx),
            Err(e) => ParseResult::failed(self.id(), format!("{}: {e}", path.display())),
        }
    }
}

pub fn extension_of(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
}

/// Ordered list of parsers. Resolution tries extensions in registration order,
/// then content sniffing in registration order.
#[derive(Clone, Default)]
pub struct ParserRegistry {
    parsers: Vec<Arc<dyn StatementParser>>,
}

impl ParserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// OFX, QIF, CSV and text/PDF statements.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(OfxParser));
        registry.register(Arc::new(QifParser));
        registry.register(Arc::new(CsvParser::default()));
        registry.register(Arc::new(TextStatementParser::default()));
        registry
    }

    pub fn register(&mut self, parser: Arc<dyn StatementParser>) {
        self.parsers.push(parser);
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn StatementParser>> {
        self.parsers.iter().find(|p| p.id() == id).cloned()
    }

    pub fn ids(&self) -> Vec<&'static str> {
        self.parsers.iter().map(|p| p.id()).collect()
    }

    pub fn find_parser(
        &self,
        filename: &str,
        content: Option<&[u8]>,
    ) -> Result<Arc<dyn StatementParser>, FormatError> {
        if let Some(parser) = self.parsers.iter().find(|p| p.can_parse(filename)) {
            return Ok(Arc::clone(parser));
        }
        if let Some(content) = content {
            if let Some(parser) = self.parsers.iter().find(|p| p.sniff(content)) {
                return Ok(Arc::clone(parser));
            }
        }
        Err(FormatError::Unsupported {
            filename: filename.to_string(),
        })
    }
}

impl std::fmt::Debug for ParserRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParserRegistry").field("parsers", &self.ids()).finish()
    }
}
