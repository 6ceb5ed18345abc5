//! Data sources: collections of streams with a shared lifecycle.
//!
//! A [`DataSource`] owns one or more streams and is driven through
//! `connect → start → stop → disconnect`. The mock implementations here are
//! used throughout the tests; the CPAL-backed [`DeviceSource`] is available
//! with the `device` feature.

#[cfg(feature = "device")]
mod device;
mod mock;

#[cfg(feature = "device")]
pub use device::{
    default_input_device_name, list_input_devices, DeviceConfig, DeviceSource, DeviceStream,
};
pub use mock::{MockDataSource, MockPullStream, MockPushStream, SignalGenerator};

use crate::error::MediaError;
use crate::stream::StreamEndpoint;

/// Content type of sources that deliver raw, unmultiplexed frames.
pub const RAW_CONTENT_TYPE: &str = "raw";

/// A set of streams with a common lifecycle.
pub trait DataSource: Send + Sync {
    /// Acquires what the source needs to produce streams.
    fn connect(&self) -> Result<(), MediaError>;

    /// Releases everything acquired by `connect`. Implies `stop`.
    fn disconnect(&self);

    /// Starts data flow on every stream.
    fn start(&self) -> Result<(), MediaError>;

    /// Pauses data flow. The source stays connected.
    fn stop(&self) -> Result<(), MediaError>;

    /// The streams currently offered by the source.
    fn streams(&self) -> Vec<StreamEndpoint>;

    /// Content type of the source.
    fn content_type(&self) -> &str {
        RAW_CONTENT_TYPE
    }
}
