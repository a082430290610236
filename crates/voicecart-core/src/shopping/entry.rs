// Shopping list entry and the sentinel defaults used by intent extraction.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Sentinel defaults
// ---------------------------------------------------------------------------

/// Category assigned when intent extraction supplies none.
pub const DEFAULT_CATEGORY: &str = "Uncategorized";

/// Brand / size placeholder meaning "no preference given".
pub const ANY: &str = "any";

/// Normalize an item name into the key used for case-insensitive matching
/// and for the remote list mirror.
pub fn normalize_key(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Whether `category` carries real information (is not the sentinel).
pub fn is_known_category(category: &str) -> bool {
    category != DEFAULT_CATEGORY
}

/// Whether a brand or size value carries real information.
pub fn is_known_attribute(value: &str) -> bool {
    value != ANY
}

// ---------------------------------------------------------------------------
// ListEntry
// ---------------------------------------------------------------------------

/// One row of the shopping list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListEntry {
    /// Display name. Unique within a list, compared case-insensitively.
    pub name: String,
    /// Units wanted. Always >= 1 while the entry exists.
    pub quantity: u32,
    pub category: String,
    pub brand: String,
    pub size: String,
    /// Line total (unit price x quantity at the last priced update), not a
    /// unit price.
    pub total_price: f64,
}

impl ListEntry {
    /// Create an entry with sentinel defaults for everything but the name.
    pub fn new(name: impl Into<String>, quantity: u32) -> Self {
        ListEntry {
            name: name.into(),
            quantity,
            category: DEFAULT_CATEGORY.to_string(),
            brand: ANY.to_string(),
            size: ANY.to_string(),
            total_price: 0.0,
        }
    }

    /// Mirror key for this entry (lowercased name).
    pub fn key(&self) -> String {
        normalize_key(&self.name)
    }

    /// Case-insensitive name comparison.
    pub fn has_name(&self, name: &str) -> bool {
        self.key() == normalize_key(name)
    }

    /// Whether `needle` (already lowercased) appears in the name, category,
    /// or brand of this entry.
    pub(crate) fn contains_term(&self, needle: &str) -> bool {
        self.name.to_lowercase().contains(needle)
            || self.category.to_lowercase().contains(needle)
            || self.brand.to_lowercase().contains(needle)
    }
}
