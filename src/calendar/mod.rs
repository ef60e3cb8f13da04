//! Calendar integration — remote client, sync/import flows, and config model.

pub mod client;
pub mod model;
pub mod sync;

pub use client::{CalendarClient, NewEvent, RemoteEvent};
pub use model::{CachedEvent, CalendarConfig, CalendarSlot};
pub use sync::{ImportReport, SyncReport, import_group, sync_group};
