//! Reference extraction from formula text.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;

/// Qualified reference: `<coll>.<field>`. The collection segment must start
/// with a letter or underscore so decimal literals like `0.05` never parse
/// as references.
pub(crate) fn qualified_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"([A-Za-z_]\w*)\.(\w+)").expect("qualified reference regex"))
}

/// Derived reference: a standalone uppercase identifier of three or more
/// characters.
pub(crate) fn derived_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b([A-Z][A-Z0-9_]{2,})\b").expect("derived reference regex"))
}

/// References extracted from one formula's text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormulaRefs {
    /// Source-collection base names in first-occurrence order; the first is
    /// the formula's primary collection.
    pub collections: Vec<String>,
    /// Field names appearing in qualified references.
    pub fields: BTreeSet<String>,
    /// Derived references, uppercased.
    pub derived: BTreeSet<String>,
}

impl FormulaRefs {
    /// The formula's primary source collection, when it references one.
    pub fn primary_collection(&self) -> Option<&str> {
        self.collections.first().map(String::as_str)
    }
}

fn is_uppercase_identifier(text: &str) -> bool {
    text.chars().any(|c| c.is_ascii_uppercase())
        && !text.chars().any(|c| c.is_ascii_lowercase())
}

/// Extract the collections, qualified fields, and derived references of a
/// formula expression.
///
/// A qualified reference whose field segment is an uppercase identifier
/// (`zomato.COMMISSION_VALUE`) counts as a derived reference, not a source
/// field. Standalone uppercase identifiers that are part of some qualified
/// reference elsewhere in the text are not double-counted.
pub fn parse_formula_text(formula_text: &str) -> FormulaRefs {
    let mut refs = FormulaRefs::default();
    let mut qualified_fields: Vec<(String, String)> = Vec::new();

    for caps in qualified_re().captures_iter(formula_text) {
        let collection = caps[1].to_string();
        let field = caps[2].to_string();

        if is_uppercase_identifier(&field) || field.starts_with("CALCULATED_") {
            refs.derived.insert(field.to_uppercase());
        } else {
            if !refs.collections.contains(&collection) {
                refs.collections.push(collection.clone());
            }
            refs.fields.insert(field.clone());
        }
        qualified_fields.push((collection, field));
    }

    for caps in derived_re().captures_iter(formula_text) {
        let candidate = &caps[1];

        // Already accounted for as the field half of a qualified reference.
        if qualified_fields
            .iter()
            .any(|(_, field)| candidate.eq_ignore_ascii_case(field))
        {
            continue;
        }

        // Adjacent to a dot: the identifier is one half of a qualified
        // reference spelled with an unusual collection casing.
        let escaped = regex::escape(candidate);
        let as_field = Regex::new(&format!(r"\w+\.{escaped}\b")).expect("field-side regex");
        let as_collection = Regex::new(&format!(r"\b{escaped}\.\w+")).expect("collection-side regex");
        if as_field.is_match(formula_text) || as_collection.is_match(formula_text) {
            continue;
        }

        refs.derived.insert(candidate.to_uppercase());
    }

    refs
}
