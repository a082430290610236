// List state and the reconciler: the pure transition applied for every
// parsed command.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::command::{AddCommand, ParsedCommand, RemoveCommand, SearchCommand};
use super::entry::{is_known_attribute, is_known_category, ListEntry};
use super::history::HistoryRecord;

// ---------------------------------------------------------------------------
// ListState
// ---------------------------------------------------------------------------

/// The current shopping list, in insertion order.
///
/// At most one entry exists per case-insensitive name and every entry has a
/// quantity of at least 1. The only ways to build one are `new` (empty),
/// `hydrate` (startup), and `reconcile`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListState {
    entries: Vec<ListEntry>,
}

impl ListState {
    pub fn new() -> Self {
        ListState::default()
    }

    /// Rebuild a list from mirrored entries.
    ///
    /// A mirror written by an older client may hold case variants of the same
    /// name; those are merged into the first occurrence (quantities and line
    /// totals summed). Zero-quantity rows are dropped.
    pub fn hydrate(entries: impl IntoIterator<Item = ListEntry>) -> Self {
        let mut state = ListState::new();
        for entry in entries {
            if entry.quantity == 0 {
                warn!("Dropping zero-quantity mirrored entry '{}'", entry.name);
                continue;
            }
            match state.position(&entry.name) {
                Some(idx) => {
                    warn!(
                        "Merging duplicate mirrored entry '{}' into '{}'",
                        entry.name, state.entries[idx].name
                    );
                    let existing = &mut state.entries[idx];
                    existing.quantity = existing.quantity.saturating_add(entry.quantity);
                    existing.total_price += entry.total_price.max(0.0);
                }
                None => state.entries.push(entry),
            }
        }
        state
    }

    pub fn entries(&self) -> &[ListEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Case-insensitive lookup by name.
    pub fn get(&self, name: &str) -> Option<&ListEntry> {
        self.position(name).map(|idx| &self.entries[idx])
    }

    /// Entries whose name, category, or brand contain `term`
    /// (case-insensitive substring).
    pub fn search(&self, term: &str) -> Vec<ListEntry> {
        let needle = term.trim().to_lowercase();
        self.entries
            .iter()
            .filter(|e| e.contains_term(&needle))
            .cloned()
            .collect()
    }

    /// Sum of all line totals.
    pub fn total_price(&self) -> f64 {
        self.entries.iter().map(|e| e.total_price).sum()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.has_name(name))
    }
}

// ---------------------------------------------------------------------------
// Reconciliation outputs
// ---------------------------------------------------------------------------

/// Which slice of the list the client should display.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ListView {
    #[default]
    Full,
    Search {
        term: String,
        matches: Vec<ListEntry>,
    },
}

/// A single write to apply to the remote list mirror.
#[derive(Debug, Clone, PartialEq)]
pub enum MirrorOp {
    Set { key: String, entry: ListEntry },
    Delete { key: String },
}

impl MirrorOp {
    pub fn key(&self) -> &str {
        match self {
            MirrorOp::Set { key, .. } | MirrorOp::Delete { key } => key,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusLevel {
    Info,
    Warning,
    Error,
}

/// Human-readable outcome of one reconciliation.
#[derive(Debug, Clone, PartialEq)]
pub enum Status {
    NotAShoppingCommand,
    NoMatches,
    Found { count: usize, term: String },
    Added { quantity: u32, name: String },
    Removed { quantity: u32, name: String },
    NotInList { name: String },
}

impl Status {
    pub fn level(&self) -> StatusLevel {
        match self {
            Status::NotAShoppingCommand | Status::NotInList { .. } => StatusLevel::Warning,
            Status::NoMatches
            | Status::Found { .. }
            | Status::Added { .. }
            | Status::Removed { .. } => StatusLevel::Info,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::NotAShoppingCommand => write!(f, "Not a shopping command."),
            Status::NoMatches => write!(f, "No matching items found."),
            Status::Found { count, term } => {
                write!(f, "Found {} item(s) matching \"{}\"", count, term)
            }
            Status::Added { quantity, name } => write!(f, "Added {} {}(s)", quantity, name),
            Status::Removed { quantity, name } => write!(f, "Removed {} {}(s)", quantity, name),
            Status::NotInList { name } => write!(f, "\"{}\" is not on the list", name),
        }
    }
}

/// Everything one command produces. Side effects are described, not
/// performed: the caller decides how to mirror and record them.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    pub state: ListState,
    pub status: Status,
    /// `None` leaves the current view untouched.
    pub view: Option<ListView>,
    pub history: Option<HistoryRecord>,
    pub mirror: Option<MirrorOp>,
}

impl Reconciliation {
    fn unchanged(state: ListState, status: Status) -> Self {
        Reconciliation {
            state,
            status,
            view: None,
            history: None,
            mirror: None,
        }
    }
}

// ---------------------------------------------------------------------------
// reconcile
// ---------------------------------------------------------------------------

/// Apply `command` to `state`. Total over every command; never fails.
pub fn reconcile(state: ListState, command: ParsedCommand, now: DateTime<Utc>) -> Reconciliation {
    match command {
        ParsedCommand::Unrecognized => {
            Reconciliation::unchanged(state, Status::NotAShoppingCommand)
        }
        ParsedCommand::Search(search) => apply_search(state, search),
        ParsedCommand::Add(add) => apply_add(state, add.normalized(), now),
        ParsedCommand::Remove(remove) => apply_remove(state, remove),
    }
}

fn apply_search(state: ListState, search: SearchCommand) -> Reconciliation {
    let matches = state.search(&search.search_term);
    let status = if matches.is_empty() {
        Status::NoMatches
    } else {
        Status::Found {
            count: matches.len(),
            term: search.search_term.clone(),
        }
    };
    Reconciliation {
        state,
        status,
        view: Some(ListView::Search {
            term: search.search_term,
            matches,
        }),
        history: None,
        mirror: None,
    }
}

fn apply_add(mut state: ListState, add: AddCommand, now: DateTime<Utc>) -> Reconciliation {
    let line_total = add.line_total();

    let entry = match state.position(&add.name) {
        Some(idx) => {
            let existing = &mut state.entries[idx];
            let new_quantity = existing.quantity.saturating_add(add.quantity);
            if line_total != 0.0 {
                existing.total_price =
                    f64::from(new_quantity) * (line_total / f64::from(add.quantity));
            }
            existing.quantity = new_quantity;
            if is_known_category(&add.category) {
                existing.category = add.category.clone();
            }
            if is_known_attribute(&add.brand) {
                existing.brand = add.brand.clone();
            }
            if is_known_attribute(&add.size) {
                existing.size = add.size.clone();
            }
            existing.clone()
        }
        None => {
            let entry = ListEntry {
                name: add.name.clone(),
                quantity: add.quantity,
                category: add.category.clone(),
                brand: add.brand.clone(),
                size: add.size.clone(),
                total_price: line_total,
            };
            state.entries.push(entry.clone());
            entry
        }
    };

    Reconciliation {
        state,
        status: Status::Added {
            quantity: add.quantity,
            name: add.name.clone(),
        },
        view: Some(ListView::Full),
        history: Some(HistoryRecord::from_add(&add, now)),
        mirror: Some(MirrorOp::Set {
            key: entry.key(),
            entry,
        }),
    }
}

fn apply_remove(mut state: ListState, remove: RemoveCommand) -> Reconciliation {
    let quantity = remove.quantity.max(1);

    let Some(idx) = state.position(&remove.name) else {
        return Reconciliation {
            view: Some(ListView::Full),
            ..Reconciliation::unchanged(state, Status::NotInList { name: remove.name })
        };
    };

    let key = state.entries[idx].key();
    let mirror = if state.entries[idx].quantity > quantity {
        let existing = &mut state.entries[idx];
        existing.quantity -= quantity;
        MirrorOp::Set {
            key,
            entry: existing.clone(),
        }
    } else {
        state.entries.remove(idx);
        MirrorOp::Delete { key }
    };

    Reconciliation {
        state,
        status: Status::Removed {
            quantity,
            name: remove.name,
        },
        view: Some(ListView::Full),
        history: None,
        mirror: Some(mirror),
    }
}
