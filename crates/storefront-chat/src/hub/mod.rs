//! Conversation registry and broadcast hub for live chat connections

pub mod connection;
pub mod events;
pub mod registry;

pub use connection::{ConnectionHandle, ConnectionId};
pub use events::{InboundEvent, OutboundEvent};
pub use registry::{ConversationHub, LivenessConfig};
