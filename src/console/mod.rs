pub mod channel;
pub mod command;
pub mod pool;

pub use channel::{
    ChannelConfig, CommandError, CommandResult, Marker, SessionChannel, TransportError,
};
pub use pool::{Role, SessionPool};
