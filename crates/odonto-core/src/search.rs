//! Fuzzy lookup over catalog names.
//!
//! Staff type "obturacion", "resina 3m" or a half-remembered code; exact `LIKE`
//! matching misses accents and typos, so candidates are ranked by string
//! similarity instead.

use strsim::{jaro_winkler, normalized_levenshtein};

/// Lowercase and strip Spanish accents.
pub fn fold(text: &str) -> String {
    text.trim()
        .to_lowercase()
        .chars()
        .map(|c| match c {
            'á' | 'à' | 'ä' => 'a',
            'é' | 'è' | 'ë' => 'e',
            'í' | 'ì' | 'ï' => 'i',
            'ó' | 'ò' | 'ö' => 'o',
            'ú' | 'ù' | 'ü' => 'u',
            other => other,
        })
        .collect()
}

/// Similarity of two folded strings (0.0 - 1.0).
fn fuzzy_match(a: &str, b: &str) -> f64 {
    let jw = jaro_winkler(a, b);
    let lev = normalized_levenshtein(a, b);
    jw * 0.6 + lev * 0.4
}

/// Score a query against one candidate field.
///
/// Substring hits score 1.0; otherwise every query word is matched against its
/// closest field word and the scores are averaged.
pub fn score(query: &str, field: &str) -> f64 {
    let query = fold(query);
    let field = fold(field);
    if query.is_empty() {
        return 0.0;
    }
    if field.contains(&query) {
        return 1.0;
    }

    let words: Vec<&str> = field.split_whitespace().collect();
    let terms: Vec<&str> = query.split_whitespace().collect();
    let total: f64 = terms
        .iter()
        .map(|term| {
            words
                .iter()
                .map(|word| fuzzy_match(term, word))
                .fold(0.0, f64::max)
        })
        .sum();
    total / terms.len() as f64
}

/// Minimum score for a fuzzy hit.
pub const MIN_SCORE: f64 = 0.75;

/// Keep items whose best field scores at least [`MIN_SCORE`], best first.
pub fn rank<T, F>(items: Vec<T>, query: &str, fields: F) -> Vec<T>
where
    F: Fn(&T) -> Vec<&str>,
{
    let mut scored: Vec<(f64, T)> = items
        .into_iter()
        .filter_map(|item| {
            let best = fields(&item)
                .into_iter()
                .map(|f| score(query, f))
                .fold(0.0, f64::max);
            (best >= MIN_SCORE).then_some((best, item))
        })
        .collect();

    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    scored.into_iter().map(|(_, item)| item).collect()
}
