// Parsed shopping commands and their boundary validation.
//
// Intent extraction hands back loosely-typed JSON. Everything optional is
// defaulted here, once, so the reconciler only ever sees well-formed values.

use serde_json::Value;

use super::entry::{ANY, DEFAULT_CATEGORY};

/// Literal reply the language model gives for non-shopping input.
pub const NOT_A_SHOPPING_COMMAND: &str = "Not a shopping command.";

/// Closed set of commands the reconciler understands.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedCommand {
    Add(AddCommand),
    Remove(RemoveCommand),
    Search(SearchCommand),
    Unrecognized,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AddCommand {
    pub name: String,
    pub quantity: u32,
    pub category: String,
    /// Unit price in dollars. Zero means "unknown".
    pub price: f64,
    pub brand: String,
    pub size: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemoveCommand {
    pub name: String,
    pub quantity: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchCommand {
    pub search_term: String,
}

impl AddCommand {
    /// An add with every optional field at its default.
    pub fn new(name: impl Into<String>, quantity: u32) -> Self {
        AddCommand {
            name: name.into(),
            quantity,
            category: DEFAULT_CATEGORY.to_string(),
            price: 0.0,
            brand: ANY.to_string(),
            size: ANY.to_string(),
        }
    }

    pub fn with_price(mut self, price: f64) -> Self {
        self.price = price;
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn with_brand(mut self, brand: impl Into<String>) -> Self {
        self.brand = brand.into();
        self
    }

    pub fn with_size(mut self, size: impl Into<String>) -> Self {
        self.size = size.into();
        self
    }

    /// Unit price times quantity.
    pub fn line_total(&self) -> f64 {
        self.price * f64::from(self.quantity)
    }

    /// Clamp hand-built values into the ranges boundary parsing guarantees.
    pub(crate) fn normalized(mut self) -> Self {
        self.quantity = self.quantity.max(1);
        self.price = sanitize_price(self.price);
        self
    }
}

impl RemoveCommand {
    pub fn new(name: impl Into<String>, quantity: u32) -> Self {
        RemoveCommand {
            name: name.into(),
            quantity,
        }
    }
}

impl SearchCommand {
    pub fn new(search_term: impl Into<String>) -> Self {
        SearchCommand {
            search_term: search_term.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Boundary parsing
// ---------------------------------------------------------------------------

impl ParsedCommand {
    /// Validate a raw intent object produced by the language model.
    ///
    /// Unknown intents, non-object values, and add/remove commands without an
    /// item name all become `Unrecognized`. Optional fields fall back to
    /// their sentinel defaults; a missing or sub-1 quantity becomes 1 and a
    /// negative or non-numeric price becomes 0.
    pub fn from_intent_value(value: &Value) -> ParsedCommand {
        let Some(obj) = value.as_object() else {
            return ParsedCommand::Unrecognized;
        };

        match obj.get("intent").and_then(Value::as_str).map(str::trim) {
            Some("add_to_list") => {
                let Some(name) = text_field(value, "item") else {
                    return ParsedCommand::Unrecognized;
                };
                ParsedCommand::Add(AddCommand {
                    name,
                    quantity: quantity_field(value),
                    category: sentinel_field(value, "category", DEFAULT_CATEGORY),
                    price: price_field(value),
                    brand: sentinel_field(value, "brand", ANY),
                    size: sentinel_field(value, "size", ANY),
                })
            }
            Some("remove_from_list") => match text_field(value, "item") {
                Some(name) => ParsedCommand::Remove(RemoveCommand {
                    name,
                    quantity: quantity_field(value),
                }),
                None => ParsedCommand::Unrecognized,
            },
            Some("search_item") => {
                // Fall back to the item field; the model occasionally uses it.
                match text_field(value, "search_term").or_else(|| text_field(value, "item")) {
                    Some(term) => ParsedCommand::Search(SearchCommand { search_term: term }),
                    None => ParsedCommand::Unrecognized,
                }
            }
            _ => ParsedCommand::Unrecognized,
        }
    }
}

/// Non-empty trimmed string field.
fn text_field(value: &Value, field: &str) -> Option<String> {
    value
        .get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// String field where empty input and case variants of the sentinel both
/// collapse to the canonical sentinel.
fn sentinel_field(value: &Value, field: &str, sentinel: &str) -> String {
    match text_field(value, field) {
        Some(s) if !s.eq_ignore_ascii_case(sentinel) => s,
        _ => sentinel.to_string(),
    }
}

/// Numeric field that may arrive as a JSON number or a numeric string.
fn number_field(value: &Value, field: &str) -> Option<f64> {
    match value.get(field)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_start_matches('$').parse::<f64>().ok(),
        _ => None,
    }
}

fn quantity_field(value: &Value) -> u32 {
    match number_field(value, "quantity") {
        Some(q) if q.is_finite() && q.round() >= 1.0 => {
            // Saturating float->int cast.
            q.round() as u32
        }
        _ => 1,
    }
}

fn price_field(value: &Value) -> f64 {
    number_field(value, "price").map_or(0.0, sanitize_price)
}

fn sanitize_price(price: f64) -> f64 {
    if price.is_finite() && price > 0.0 {
        price
    } else {
        0.0
    }
}
