//! TCP proxy front.
//!
//! # Data Flow
//! ```text
//! Client → listener.rs (bounded accept, one permit per connection)
//!     → relay.rs
//!         → Balancer::dispatch(client ip)   (none → 503 and close)
//!         → connect to backend with timeout
//!         → copy_bidirectional until either side closes
//!         → Dispatch::complete(success)
//! ```

pub mod listener;
pub mod relay;

pub use listener::{ConnectionPermit, Listener, ListenerError};
pub use relay::{handle_connection, ProxyServer, RelayOutcome};
