//! Fuzzy string scoring for tag autocomplete.
//!
//! Scores are on a 0-100 scale. Identical strings score 100 and the score never
//! rises as character-level divergence grows.

use similar::TextDiff;

use stratum_core::defaults::FUZZY_SCORE_CUTOFF;

/// Length ratio at which partial matching is also considered.
const PARTIAL_LENGTH_RATIO: f64 = 1.5;

/// Length ratio beyond which partial matches are discounted harder.
const LONG_LENGTH_RATIO: f64 = 8.0;

const PARTIAL_SCALE: f64 = 0.9;
const LONG_PARTIAL_SCALE: f64 = 0.6;

/// Normalized similarity `2 * matches / (len_a + len_b)` scaled to 0-100.
pub fn ratio(a: &str, b: &str) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 100.0;
    }
    f64::from(TextDiff::from_chars(a, b).ratio()) * 100.0
}

/// Best [`ratio`] of `short` against every `short`-length window of `long`.
pub fn partial_ratio(short: &str, long: &str) -> f64 {
    let long_chars: Vec<char> = long.chars().collect();
    let width = short.chars().count();
    if width == 0 || width >= long_chars.len() {
        return ratio(short, long);
    }

    let mut best = 0.0_f64;
    for start in 0..=(long_chars.len() - width) {
        let window: String = long_chars[start..start + width].iter().collect();
        let score = ratio(short, &window);
        if score > best {
            best = score;
            if best >= 100.0 {
                break;
            }
        }
    }
    best
}

/// Case-insensitive weighted similarity between a query and a candidate.
///
/// Strings of similar length use the plain ratio. When one is at least 1.5x
/// longer, the best partial window is also considered with a discount, so
/// "cat" ranks "category" close to "cats".
pub fn score(query: &str, candidate: &str) -> f64 {
    let a = query.to_lowercase();
    let b = candidate.to_lowercase();
    if a == b {
        return 100.0;
    }

    let len_a = a.chars().count();
    let len_b = b.chars().count();
    if len_a == 0 || len_b == 0 {
        return 0.0;
    }

    let base = ratio(&a, &b);
    let (short, long, len_short, len_long) = if len_a <= len_b {
        (&a, &b, len_a, len_b)
    } else {
        (&b, &a, len_b, len_a)
    };

    let length_ratio = len_long as f64 / len_short as f64;
    if length_ratio < PARTIAL_LENGTH_RATIO {
        return base;
    }

    let scale = if length_ratio >= LONG_LENGTH_RATIO {
        LONG_PARTIAL_SCALE
    } else {
        PARTIAL_SCALE
    };
    base.max(partial_ratio(short, long) * scale)
}

/// Score every candidate, keep those at or above the cutoff, best first.
///
/// Equal scores keep their input order.
pub fn rank<T>(query: &str, candidates: Vec<T>, name: impl Fn(&T) -> &str) -> Vec<(T, f64)> {
    let mut scored: Vec<(T, f64)> = candidates
        .into_iter()
        .filter_map(|c| {
            let s = score(query, name(&c));
            (s >= FUZZY_SCORE_CUTOFF).then_some((c, s))
        })
        .collect();

    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored
}
