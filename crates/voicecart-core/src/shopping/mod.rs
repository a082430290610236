pub mod command;
pub mod entry;
pub mod history;
pub mod state;

pub use command::{AddCommand, ParsedCommand, RemoveCommand, SearchCommand};
pub use entry::ListEntry;
pub use history::HistoryRecord;
pub use state::{reconcile, ListState, ListView, MirrorOp, Reconciliation, Status, StatusLevel};
