use std::collections::BTreeSet;

/// Words that carry no identity in a statement description.
const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "with", "from", "card", "payment", "pos", "www", "com", "transaction",
    "platba", "kartou", "karta", "nakup", "dne", "castka", "und", "der", "die", "zakup",
];

/// Collapses runs of whitespace (including NBSP) into single spaces.
pub fn normalize_line(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Lowercase alphanumeric tokens of at least three characters, minus stop words
/// and pure numbers.
pub fn keywords<'a, I>(texts: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = &'a str>,
{
    texts
        .into_iter()
        .flat_map(|text| text.split(|c: char| !c.is_alphanumeric()))
        .map(str::to_lowercase)
        .filter(|w| w.chars().count() >= 3)
        .filter(|w| !w.chars().all(|c| c.is_ascii_digit()))
        .filter(|w| !STOP_WORDS.contains(&w.as_str()))
        .collect()
}

/// Jaccard similarity in [0.0, 1.0]. Two empty sets share no evidence and score 0.
pub fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}
