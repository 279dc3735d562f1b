//! Domain layer shared by the webhook listener and the chat bot.
//!
//! Nothing in this crate performs I/O.

pub mod command;
pub mod dedup;
pub mod event;
pub mod responses;

pub use command::{is_spam, tokenize, BotCommand, ParsedCommand, RpsMove};
pub use dedup::DedupState;
pub use event::{EventType, Notification, PayloadError, SubscriptionSpec};
