//! Registry of live user connections
//!
//! The single source of truth for "is this user connected, and on which
//! transports". A user may hold several connections at once (one per device);
//! each is addressed by its own [`ConnectionId`](tether_common::ConnectionId)
//! so a late disconnect of an old socket can never evict a newer one.

mod error;
mod registry;
mod transport;

pub use error::{RegistryError, TransportError};
pub use registry::{ConnectionEntry, ConnectionRegistry};
pub use transport::{ChannelTransport, Transport};
