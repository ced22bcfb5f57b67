//! Column header normalization, applied column-wise before any row is
//! written to a raw collection.

/// Fallback name for headers that normalize to nothing.
pub const UNNAMED_COLUMN: &str = "unnamed_column";

/// Canonicalize one header: trim, map internal whitespace to `_`, drop
/// everything outside `[A-Za-z0-9_]`, strip boundary underscores,
/// lowercase. An empty result becomes [`UNNAMED_COLUMN`].
pub fn normalize_header(raw: &str) -> String {
    let mut cleaned = String::with_capacity(raw.len());
    for ch in raw.trim().chars() {
        if ch.is_whitespace() {
            cleaned.push('_');
        } else if ch.is_ascii_alphanumeric() || ch == '_' {
            cleaned.push(ch.to_ascii_lowercase());
        }
    }
    let cleaned = cleaned.trim_matches('_');
    if cleaned.is_empty() {
        UNNAMED_COLUMN.to_string()
    } else {
        cleaned.to_string()
    }
}

/// Normalize a header row, disambiguating duplicates with `_1`, `_2`, …
/// suffixes in first-seen order. Idempotent: normalizing an already
/// normalized header list returns it unchanged.
pub fn normalize_headers<I, S>(headers: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen: Vec<String> = Vec::new();
    for header in headers {
        let mut name = normalize_header(header.as_ref());
        if seen.contains(&name) {
            let base = name.clone();
            let mut suffix = 1usize;
            while seen.contains(&name) {
                name = format!("{base}_{suffix}");
                suffix += 1;
            }
        }
        seen.push(name);
    }
    seen
}
