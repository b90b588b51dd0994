//! Sensor references.
//!
//! A sensor is a device-provided realtime value (joint position, digital
//! input, ...). The expression model only names it; the device's driver
//! registers the fragment factory that reads it inside a net.

use rt_core::DataType;
use serde::{Deserialize, Serialize};

/// Reference to a device sensor channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SensorRef {
    /// Device identifier.
    pub device: String,
    /// Channel on the device (e.g. `"joint0.position"`).
    pub channel: String,
    /// Value type of the channel.
    pub ty: DataType,
}

impl SensorRef {
    pub fn new(device: impl Into<String>, channel: impl Into<String>, ty: DataType) -> Self {
        Self {
            device: device.into(),
            channel: channel.into(),
            ty,
        }
    }

    /// Boolean sensor (digital input, limit switch).
    pub fn digital(device: impl Into<String>, channel: impl Into<String>) -> Self {
        Self::new(device, channel, DataType::Bool)
    }

    /// Scalar sensor (joint position, force).
    pub fn scalar(device: impl Into<String>, channel: impl Into<String>) -> Self {
        Self::new(device, channel, DataType::Double)
    }

    /// `"device/channel"`, used in primitive parameters and logs.
    pub fn qualified_name(&self) -> String {
        format!("{}/{}", self.device, self.channel)
    }
}
