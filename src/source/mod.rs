pub mod event;
pub mod reader;
pub mod timestamp;

pub use event::{AccessLogEvent, StoredAccessLog};
pub use reader::{Delivered, EventReader, ReadFault, ReaderSettings, StreamReader};
