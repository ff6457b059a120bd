//! Company-name normalization and fuzzy matching.

use std::collections::HashSet;

const LEGAL_SUFFIXES: &[&str] = &[
    "sa",
    "s/a",
    "ltda",
    "eireli",
    "me",
    "epp",
    "inc",
    "corp",
    "corporation",
    "ltd",
    "limited",
    "llc",
    "plc",
    "gmbh",
    "ag",
    "nv",
    "bv",
];

const FILLER_WORDS: &[&str] = &[
    "saneamento",
    "participacoes",
    "holding",
    "holdings",
    "group",
    "international",
    "corporation",
    "company",
    "services",
];

/// Lowercase and collapse runs of whitespace.
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Remove trailing legal-form tokens (`S.A.`, `Inc.`, `GmbH`, ...).
///
/// The first word is never removed, so "AG" on its own stays "ag".
pub fn strip_legal_suffixes(name: &str) -> String {
    let normalized = normalize_name(name);
    let mut words: Vec<&str> = normalized.split(' ').filter(|w| !w.is_empty()).collect();

    while words.len() > 1 {
        let Some(last) = words.last() else { break };
        let bare = last.trim_end_matches(',').replace('.', "");
        if LEGAL_SUFFIXES.contains(&bare.as_str()) {
            words.pop();
        } else {
            break;
        }
    }

    words
        .join(" ")
        .trim_end_matches(|c: char| c == ',' || c.is_whitespace())
        .to_string()
}

/// The distinctive part of a name: suffixes and filler words removed.
///
/// Falls back to the first two words when stripping would leave fewer than two.
pub fn core_name(name: &str) -> String {
    let stripped = strip_legal_suffixes(name);
    let words: Vec<&str> = stripped.split_whitespace().collect();
    let core: Vec<&str> = words
        .iter()
        .copied()
        .filter(|w| !FILLER_WORDS.contains(w))
        .collect();

    if core.len() < 2 && words.len() >= 2 {
        return words[..2].join(" ");
    }
    if core.is_empty() {
        return stripped;
    }
    core.join(" ")
}

/// Similarity of two company names in `[0, 1]`.
///
/// 1.0 for identical normalized names, 0.9 for identical core names,
/// otherwise token Jaccard with a 0.2 boost when the core names share a token.
pub fn similarity(a: &str, b: &str) -> f64 {
    let n1 = normalize_name(a);
    let n2 = normalize_name(b);
    if n1 == n2 {
        return 1.0;
    }

    let core1 = core_name(a);
    let core2 = core_name(b);
    if !core1.is_empty() && core1 == core2 {
        return 0.9;
    }

    let tokens1: HashSet<&str> = n1.split_whitespace().collect();
    let tokens2: HashSet<&str> = n2.split_whitespace().collect();
    if tokens1.is_empty() || tokens2.is_empty() {
        return 0.0;
    }

    let intersection = tokens1.intersection(&tokens2).count();
    let union = tokens1.union(&tokens2).count();
    let mut score = intersection as f64 / union as f64;

    let core_tokens1: HashSet<&str> = core1.split_whitespace().collect();
    let core_tokens2: HashSet<&str> = core2.split_whitespace().collect();
    if core_tokens1.intersection(&core_tokens2).next().is_some() {
        score = (score + 0.2).min(1.0);
    }

    score
}
