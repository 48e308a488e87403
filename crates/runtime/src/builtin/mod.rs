//! Built-in actions and providers registered by default.

pub mod actions;
pub mod providers;

pub use actions::{IgnoreAction, ReplyAction};
pub use providers::{ActionsProvider, RecentMessagesProvider, TimeProvider};
