// Add-history records, consumed only by the recommendation service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::command::AddCommand;

/// Immutable log entry written on every successful add.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    pub name: String,
    pub quantity: u32,
    pub category: String,
    /// Line total of the incoming add, not of the merged entry.
    pub total_price: f64,
    pub brand: String,
    pub size: String,
    pub timestamp: DateTime<Utc>,
}

impl HistoryRecord {
    pub fn from_add(add: &AddCommand, timestamp: DateTime<Utc>) -> Self {
        HistoryRecord {
            name: add.name.clone(),
            quantity: add.quantity,
            category: add.category.clone(),
            total_price: add.line_total(),
            brand: add.brand.clone(),
            size: add.size.clone(),
            timestamp,
        }
    }
}
