mod item;
mod store;

pub use item::{short_id, Action, ItemStatus, Output, WorkItem};
pub use store::{BatchRecord, ReportStore};
