//! Column-name normalisation for name similarity.
//!
//! Names are snake-cased (`CustomerID` → `customer_id`), lower-cased, split
//! into tokens and each token singularised, so `OrderLines.line_items` and
//! `order_line.LineItem` compare equal at the stem tier.

use inflector::Inflector;

/// Known irregular plurals that inflector doesn't handle well for database contexts.
static IRREGULAR_PLURALS: &[(&str, &str)] = &[
    ("person", "people"),
    ("child", "children"),
    ("man", "men"),
    ("woman", "women"),
    ("leaf", "leaves"),
    ("half", "halves"),
    ("analysis", "analyses"),
    ("basis", "bases"),
    ("criterion", "criteria"),
    ("datum", "data"),
    ("medium", "media"),
    ("index", "indices"),
    ("matrix", "matrices"),
    ("vertex", "vertices"),
];

/// Singularize a word, handling irregulars first then falling back to inflector.
///
/// Words ending in `ss`, `us` or `is` and tokens of three characters or
/// fewer are returned unchanged (`status`, `address`, `id`, `qty`).
///
/// ```ignore
/// assert_eq!(singularize("customers"), "customer");
/// assert_eq!(singularize("categories"), "category");
/// assert_eq!(singularize("people"), "person");
/// ```
pub fn singularize(word: &str) -> String {
    let lower = word.to_lowercase();
    if lower.len() <= 3 {
        return lower;
    }

    for (singular, plural) in IRREGULAR_PLURALS {
        if lower == *plural || lower == *singular {
            return singular.to_string();
        }
    }

    if lower.ends_with("ss") || lower.ends_with("us") || lower.ends_with("is") {
        return lower;
    }

    lower.to_singular()
}

/// Snake-case and lower-case a column name.
pub fn normalise(name: &str) -> String {
    name.trim().to_snake_case()
}

/// Lower-cased alphanumerics only: `Customer_ID`, `customerid` and
/// `customer-id` all become `customerid`.
pub fn compact(name: &str) -> String {
    name.chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Singularised tokens of a normalised name.
pub fn tokens(name: &str) -> Vec<String> {
    normalise(name)
        .split('_')
        .filter(|t| !t.is_empty())
        .map(singularize)
        .collect()
}
