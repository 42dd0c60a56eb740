// Canonicalization of free-text state and district names.
//
// The alias tables are configuration data, not logic: they live in
// config/*.json, versioned with the repo, and are parsed once at startup.
// When an administrative boundary changes (a district renamed or split),
// the table is updated; the matching code stays as it is.
use once_cell::sync::Lazy;
use std::collections::{HashMap, HashSet};

/// Known state spellings. A `null` value marks a known-invalid entry
/// (junk like `"100000"`); normalization maps it to the empty string and
/// the merger drops the row.
static STATE_ALIASES: Lazy<HashMap<String, Option<String>>> = Lazy::new(|| {
    serde_json::from_str(include_str!("../config/state_aliases.json"))
        .expect("state alias table is invalid JSON")
});

/// Known district spellings, keyed by the lowercased, whitespace-collapsed
/// form. Values are the canonical names used by the boundary data.
static DISTRICT_ALIASES: Lazy<HashMap<String, String>> = Lazy::new(|| {
    serde_json::from_str(include_str!("../config/district_aliases.json"))
        .expect("district alias table is invalid JSON")
});

/// Minimum similarity (0-100) for a fuzzy match to be accepted.
pub const FUZZY_MATCH_THRESHOLD: f64 = 85.0;

fn collapse_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn is_null_like(s: &str) -> bool {
    let t = s.trim();
    t.is_empty() || t.eq_ignore_ascii_case("nan") || t.eq_ignore_ascii_case("none")
}

/// Whitespace-only cleanup for the merge stage. Full district aliasing is
/// deferred to geo linking so that differently-spelled districts stay
/// distinct rows until they are deliberately collapsed there.
pub fn clean_name(raw: &str) -> String {
    if is_null_like(raw) {
        return String::new();
    }
    collapse_ws(raw)
}

/// Canonical state spelling for `raw`, or the empty string for null-like
/// or known-invalid input. Never panics.
///
/// Lookup order: exact alias hit on the trimmed input, then a retry with
/// asterisk markers stripped and whitespace collapsed, then passthrough
/// of the cleaned input (assumed already canonical).
pub fn normalize_state(raw: &str) -> String {
    if is_null_like(raw) {
        return String::new();
    }
    let trimmed = raw.trim();
    if let Some(hit) = STATE_ALIASES.get(trimmed) {
        return hit.clone().unwrap_or_default();
    }
    let cleaned = collapse_ws(&trimmed.replace('*', ""));
    if let Some(hit) = STATE_ALIASES.get(cleaned.as_str()) {
        return hit.clone().unwrap_or_default();
    }
    cleaned
}

/// Canonical district spelling for `raw`, or the empty string for
/// null-like input. Never panics.
///
/// The alias table is keyed by the lowercased collapsed form; passthrough
/// keeps the input's own casing with markers stripped.
pub fn normalize_district(raw: &str) -> String {
    if is_null_like(raw) {
        return String::new();
    }
    let collapsed = collapse_ws(raw);
    let lower = collapsed.to_lowercase();
    if let Some(hit) = DISTRICT_ALIASES.get(lower.as_str()) {
        return hit.clone();
    }
    // Trailing markers like "Washim *" miss the first lookup; retry with
    // the asterisks stripped.
    let cleaned_lower = collapse_ws(&lower.replace('*', ""));
    if let Some(hit) = DISTRICT_ALIASES.get(cleaned_lower.as_str()) {
        return hit.clone();
    }
    collapse_ws(&collapsed.replace('*', ""))
}

/// Similarity of two strings on a 0-100 scale, from Levenshtein distance
/// over the longer length. 100 means identical.
pub fn similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 100.0;
    }
    let len_a = a.chars().count();
    let len_b = b.chars().count();
    if len_a == 0 || len_b == 0 {
        return 0.0;
    }
    let max_len = len_a.max(len_b);
    let distance = levenshtein_distance(a, b);
    (1.0 - distance as f64 / max_len as f64) * 100.0
}

fn levenshtein_distance(a: &str, b: &str) -> usize {
    let chars_a: Vec<char> = a.chars().collect();
    let chars_b: Vec<char> = b.chars().collect();
    let len_a = chars_a.len();
    let len_b = chars_b.len();

    let mut matrix = vec![vec![0usize; len_b + 1]; len_a + 1];
    for (i, row) in matrix.iter_mut().enumerate() {
        row[0] = i;
    }
    for j in 0..=len_b {
        matrix[0][j] = j;
    }

    for i in 1..=len_a {
        for j in 1..=len_b {
            let cost = if chars_a[i - 1] == chars_b[j - 1] { 0 } else { 1 };
            matrix[i][j] = (matrix[i - 1][j] + 1)
                .min(matrix[i][j - 1] + 1)
                .min(matrix[i - 1][j - 1] + cost);
        }
    }

    matrix[len_a][len_b]
}

/// Best-match mapping for source names that do not already appear among
/// the targets. A match is accepted only at or above `threshold`; below
/// it the name stays unmapped rather than guessed.
pub fn fuzzy_match_names(
    sources: &[String],
    targets: &[String],
    threshold: f64,
) -> HashMap<String, String> {
    let target_set: HashSet<&str> = targets.iter().map(String::as_str).collect();
    let mut mapping = HashMap::new();

    for name in sources {
        if name.is_empty() || target_set.contains(name.as_str()) {
            continue;
        }
        let mut best: Option<(&String, f64)> = None;
        for target in targets {
            let score = similarity(&name.to_lowercase(), &target.to_lowercase());
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((target, score));
            }
        }
        if let Some((target, score)) = best {
            if score >= threshold {
                tracing::debug!(source = %name, target = %target, score, "fuzzy name match");
                mapping.insert(name.clone(), target.clone());
            }
        }
    }

    mapping
}
