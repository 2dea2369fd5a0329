use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use tally_core::{DateRange, EntryId, LedgerEntry, ParsedTransaction};

use crate::util::{jaccard, keywords};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedAction {
    /// Likely already in the ledger.
    Skip,
    Review,
    New,
}

/// Weights, tolerances and decision thresholds. Both tolerance boundaries are
/// inclusive: a pair exactly `date_tolerance_days` apart, or whose relative
/// amount difference equals `amount_tolerance`, is still a candidate and
/// scores zero on that component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    pub amount_weight: f64,
    pub date_weight: f64,
    pub description_weight: f64,
    pub date_tolerance_days: u32,
    /// Relative difference `|a - b| / max(|a|, |b|)`.
    pub amount_tolerance: Decimal,
    pub skip_threshold: f64,
    pub review_threshold: f64,
    pub max_candidates: usize,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            amount_weight: 0.4,
            date_weight: 0.3,
            description_weight: 0.3,
            date_tolerance_days: 3,
            amount_tolerance: Decimal::new(10, 2),
            skip_threshold: 0.8,
            review_threshold: 0.5,
            max_candidates: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchScore {
    pub score: f64,
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchCandidate {
    pub entry_id: EntryId,
    pub entry: LedgerEntry,
    pub match_score: f64,
    pub reasons: Vec<String>,
    pub recommended_action: RecommendedAction,
}

/// One incoming transaction and what the ledger already holds that looks like it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictItem {
    pub index: usize,
    pub transaction: ParsedTransaction,
    pub candidates: Vec<MatchCandidate>,
    pub recommended_action: RecommendedAction,
    /// Set only when the caller opted into auto-skip and the best candidate
    /// cleared the skip threshold.
    pub auto_skipped: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConflictReport {
    pub items: Vec<ConflictItem>,
    pub skip_count: usize,
    pub review_count: usize,
    pub new_count: usize,
}

impl ConflictReport {
    pub fn auto_skipped(&self) -> impl Iterator<Item = usize> + '_ {
        self.items.iter().filter(|i| i.auto_skipped).map(|i| i.index)
    }
}

/// Stateless scorer. Every method is a pure function of its arguments and the
/// configuration it was built with.
#[derive(Debug, Clone, Default)]
pub struct MatchEngine {
    pub config: MatchConfig,
}

impl MatchEngine {
    pub fn new(config: MatchConfig) -> Self {
        Self { config }
    }

    pub fn action_for(&self, score: f64) -> RecommendedAction {
        if score >= self.config.skip_threshold {
            RecommendedAction::Skip
        } else if score >= self.config.review_threshold {
            RecommendedAction::Review
        } else {
            RecommendedAction::New
        }
    }

    /// Ledger date range worth fetching for `incoming`, padded by the date
    /// tolerance. `None` for an empty batch.
    pub fn search_range(&self, incoming: &[ParsedTransaction]) -> Option<DateRange> {
        DateRange::spanning(incoming.iter().map(|t| t.date), self.config.date_tolerance_days)
    }

    /// Whether `existing` falls inside the symmetric date and amount window of `incoming`.
    pub fn in_window(&self, incoming: &ParsedTransaction, existing: &LedgerEntry) -> bool {
        let days = (incoming.date - existing.date).num_days().unsigned_abs();
        if days > u64::from(self.config.date_tolerance_days) {
            return false;
        }
        match relative_difference(incoming.amount, existing.amount) {
            Some(rel) => rel <= self.config.amount_tolerance,
            None => false,
        }
    }

    pub fn score(&self, incoming: &ParsedTransaction, existing: &LedgerEntry) -> MatchScore {
        let cfg = &self.config;
        let mut reasons = Vec::new();

        let amount_score = match relative_difference(incoming.amount, existing.amount) {
            Some(rel) if rel.is_zero() => {
                reasons.push(format!("exact amount {}", existing.amount));
                1.0
            }
            Some(rel) => {
                let tolerance = cfg.amount_tolerance.to_f64().unwrap_or(0.0);
                let rel = rel.to_f64().unwrap_or(f64::MAX);
                let s = if tolerance > 0.0 {
                    (1.0 - rel / tolerance).clamp(0.0, 1.0)
                } else {
                    0.0
                };
                reasons.push(format!(
                    "amount {} vs {} differs by {:.1}%",
                    incoming.amount,
                    existing.amount,
                    rel * 100.0
                ));
                s
            }
            None => {
                reasons.push("amounts have opposite signs".to_string());
                0.0
            }
        };

        let days = (incoming.date - existing.date).num_days().unsigned_abs();
        let date_score = if days == 0 {
            reasons.push("same date".to_string());
            1.0
        } else {
            reasons.push(format!("dates {days} day(s) apart"));
            if cfg.date_tolerance_days == 0 {
                0.0
            } else {
                (1.0 - days as f64 / f64::from(cfg.date_tolerance_days)).max(0.0)
            }
        };

        let ours = incoming_keywords(incoming);
        let theirs = entry_keywords(existing);
        let similarity = jaccard(&ours, &theirs);
        let shared: Vec<&str> = ours.intersection(&theirs).map(String::as_str).collect();
        if shared.is_empty() {
            reasons.push("no shared description keywords".to_string());
        } else {
            reasons.push(format!(
                "description similarity {:.2} ({})",
                similarity,
                shared.join(", ")
            ));
        }

        let score = cfg.amount_weight * amount_score
            + cfg.date_weight * date_score
            + cfg.description_weight * similarity;
        MatchScore {
            score: score.clamp(0.0, 1.0),
            reasons,
        }
    }

    /// Scores every incoming transaction against the windowed ledger entries
    /// and keeps the best `max_candidates`. Ties go to the lower entry id.
    pub fn resolve(
        &self,
        incoming: &[ParsedTransaction],
        existing: &[LedgerEntry],
        auto_skip: bool,
    ) -> ConflictReport {
        let mut report = ConflictReport::default();

        for (index, tx) in incoming.iter().enumerate() {
            let mut candidates: Vec<MatchCandidate> = existing
                .iter()
                .filter(|entry| self.in_window(tx, entry))
                .map(|entry| {
                    let MatchScore { score, reasons } = self.score(tx, entry);
                    MatchCandidate {
                        entry_id: entry.id,
                        entry: entry.clone(),
                        match_score: score,
                        reasons,
                        recommended_action: self.action_for(score),
                    }
                })
                .collect();
            candidates.sort_by(|a, b| {
                b.match_score
                    .partial_cmp(&a.match_score)
                    .unwrap_or(Ordering::Equal)
                    .then(a.entry_id.cmp(&b.entry_id))
            });
            candidates.truncate(self.config.max_candidates);

            let action = candidates
                .first()
                .map_or(RecommendedAction::New, |c| c.recommended_action);
            match action {
                RecommendedAction::Skip => report.skip_count += 1,
                RecommendedAction::Review => report.review_count += 1,
                RecommendedAction::New => report.new_count += 1,
            }

            report.items.push(ConflictItem {
                index,
                transaction: tx.clone(),
                candidates,
                recommended_action: action,
                auto_skipped: auto_skip && action == RecommendedAction::Skip,
            });
        }
        report
    }
}

/// `None` when the amounts have opposite signs.
fn relative_difference(a: Decimal, b: Decimal) -> Option<Decimal> {
    if !a.is_zero() && !b.is_zero() && a.is_sign_negative() != b.is_sign_negative() {
        return None;
    }
    let largest = a.abs().max(b.abs());
    if largest.is_zero() {
        return Some(Decimal::ZERO);
    }
    Some((a - b).abs() / largest)
}

fn incoming_keywords(tx: &ParsedTransaction) -> BTreeSet<String> {
    keywords(
        [Some(tx.description.as_str()), tx.notes.as_deref(), tx.merchant.as_deref()]
            .into_iter()
            .flatten(),
    )
}

fn entry_keywords(entry: &LedgerEntry) -> BTreeSet<String> {
    keywords(
        [
            Some(entry.description.as_str()),
            entry.notes.as_deref(),
            entry.merchant.as_deref(),
        ]
        .into_iter()
        .flatten(),
    )
}

/// Pairs of indices inside one statement with the same date and amount and
/// descriptions at least `min_similarity` alike.
pub fn find_internal_duplicates(
    transactions: &[ParsedTransaction],
    min_similarity: f64,
) -> Vec<(usize, usize)> {
    let keyword_sets: Vec<_> = transactions.iter().map(incoming_keywords).collect();
    let mut duplicates = Vec::new();

    for i in 0..transactions.len() {
        for j in (i + 1)..transactions.len() {
            let (t1, t2) = (&transactions[i], &transactions[j]);
            if t1.date != t2.date || t1.amount != t2.amount {
                continue;
            }
            let same_text = t1.description.trim().eq_ignore_ascii_case(t2.description.trim());
            if same_text || jaccard(&keyword_sets[i], &keyword_sets[j]) >= min_similarity {
                duplicates.push((i, j));
            }
        }
    }

    duplicates
}
