pub mod batch;
pub mod config;
pub mod error;
pub mod event;
pub mod forwarder;
pub mod partition;
pub mod retry;
pub mod session;
pub mod sink;
pub mod stats;

pub use config::Config;
pub use error::{Error, Result};
pub use event::{EventRecord, TranslationEvent};
pub use forwarder::Forwarder;
pub use session::{DeliveryStatus, PublishReport, PublisherSession};
