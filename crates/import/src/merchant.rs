use crate::bank::BankProfile;
use crate::util::normalize_line;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerchantParts {
    pub merchant: String,
    pub location: Option<String>,
}

/// Splits a combined `merchant + place` string using the profile's known
/// places, then strips legal-entity suffixes from the merchant half. Without a
/// place match the whole string stays the merchant.
pub fn split_merchant(raw: &str, profile: &BankProfile) -> MerchantParts {
    let line = normalize_line(raw);

    let (merchant, location) = match profile.location.as_ref().and_then(|re| re.captures(&line)) {
        Some(caps) => (
            caps.name("merchant").map_or("", |m| m.as_str()).to_string(),
            caps.name("location").map(|m| m.as_str().to_string()),
        ),
        None => (line.clone(), None),
    };

    let cleaned = strip_legal_suffixes(&merchant, &profile.config.legal_suffixes);
    MerchantParts {
        merchant: if cleaned.is_empty() { merchant } else { cleaned },
        location,
    }
}

/// Removes trailing legal-form suffixes (`S.R.O.`, `A.S.`, …) until none remain.
pub fn strip_legal_suffixes<S: AsRef<str>>(name: &str, suffixes: &[S]) -> String {
    let mut current = name.trim().trim_end_matches(',').trim_end().to_string();
    loop {
        let upper = current.to_ascii_uppercase();
        let stripped = suffixes.iter().map(|s| s.as_ref()).find_map(|suffix: &str| {
            let suffix = suffix.to_ascii_uppercase();
            let head = upper.strip_suffix(suffix.as_str())?;
            // Only a whole trailing token counts.
            if head.is_empty() || head.ends_with([' ', ',']) {
                Some(head.len())
            } else {
                None
            }
        });
        match stripped {
            Some(cut) if cut > 0 => {
                current = current[..cut].trim_end().trim_end_matches(',').trim_end().to_string();
            }
            _ => return current,
        }
    }
}
