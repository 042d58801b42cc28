pub mod client;
pub mod config;
pub mod egress;
pub mod error;
pub mod ingress;
pub mod types;

pub use client::{connect, LiveClient, LiveSession};
pub use config::{ConnectMode, SessionConfig};
pub use egress::spawn_egress;
pub use error::SessionError;
pub use ingress::spawn_ingress;
pub use types::{AudioPayload, OutboundMessage, ServerEvent};
