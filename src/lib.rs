//! Realtime chat core for the Mousaada task marketplace: conversation
//! store, optimistic send with dedup, typing and presence tracking, and the
//! conversation lifecycle.

pub mod admin;
pub mod api;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod lifecycle;
pub mod presence;
pub mod realtime;
pub mod session;
pub mod storage;
pub mod store;
pub mod typing;
pub mod utils;

pub use api::client::{ApiClient, ChatApi};
pub use api::events::{ClientEvent, PresenceStatus, ServerEvent};
pub use api::models::{Conversation, ConversationStatus, Message};
pub use config::Settings;
pub use error::{AdminError, ApiError, SendError, SendRejected};
pub use realtime::{ChannelClient, ConnectionState, ReconnectPolicy};
pub use session::{ChatSession, SessionOptions, SessionUpdate};
pub use store::{ConversationStore, ListFilter, ListQuery, SortKey};
