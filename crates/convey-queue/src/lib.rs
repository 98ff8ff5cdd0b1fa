pub mod error;
pub mod http;
pub mod notify;
pub mod object_store;
pub mod queue;

pub use error::QueueError;
pub use http::HttpQueue;
pub use notify::{HttpNotifier, Notifier};
pub use object_store::{HttpObjectStore, ObjectStore};
pub use queue::{MessageQueue, QueueMessage, SendReceipt};
