//! Network adapters for the job record store and the job push channel.

mod http_store;
mod push_channel;

pub use http_store::{HttpJobStore, HttpJobStoreConfig};
pub use push_channel::{
    parse_push_message, PushChannelConfig, PushChannelError, WebSocketPushChannel,
};
