pub mod cli;
pub mod config;
pub mod error;
pub mod identity;
pub mod model;
pub mod resolver;
pub mod service;
pub mod store;

pub use config::Config;
pub use error::{CallbookError, Result};
pub use resolver::{ConversationResolver, ConversationSet};
pub use service::{ConversationService, Sources, TriggerReason};
pub use store::CallStore;
