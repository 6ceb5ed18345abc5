//! Outer pipeline: from the outermost push stream to the sinks.
//!
//! ```text
//! Producer thread → Bridge (try_send) → Router task → Sinks
//! ```
//!
//! - **Bridge**: reads each announced frame on the producer's thread and
//!   queues it without blocking
//! - **Router**: fans frames out to all sinks with retry logic

mod bridge;
mod router;

pub(crate) use bridge::{Bridge, BridgeConfig};
pub(crate) use router::{Router, RouterCommand};
