// icinga-client: Icinga 2 events API client.
// Exposes the notification model, local filters, and the streaming consumer.

pub mod event;
pub mod filter;
pub mod stream;

pub use event::{CheckResult, Notification, State};
pub use filter::{Filter, FilterSet};
pub use stream::{Client, EventStream, StreamError};
