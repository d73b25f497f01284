// ABOUTME: Airlock channel client for talking to a ship over HTTP and server-sent events
// ABOUTME: Pokes and subscriptions over one channel, plus scries, threads, and login

pub mod auth;
mod channel;
mod command;
mod config;
mod error;
mod frame;
mod identity;
mod registry;
mod status;
mod stream;
mod transport;

pub use channel::{Airlock, ThreadRequest};
pub use command::{encode_batch, Command};
pub use config::{
    AirlockConfig, DEFAULT_ACK_THRESHOLD, DEFAULT_MAX_STREAM_ERRORS, DEFAULT_RETRY_BASE_DELAY_MS,
};
pub use error::AirlockError;
pub use frame::{parse_frame, InboundFrame};
pub use identity::{scry_url, thread_url, ChannelIdentity};
pub use registry::{PokeOutcome, SubscriptionEvent, SubscriptionHandler};
pub use status::{ChannelObserver, ConnectionStatus};
pub use stream::StreamPhase;
pub use transport::{HttpTransport, StreamSignal, Transport};
