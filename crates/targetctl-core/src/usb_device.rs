//! Physical device transport backed by usbmuxd.
//!
//! [`UsbmuxTransport`] discovers iOS devices attached over USB (or paired
//! over the network) through Apple's `usbmuxd` daemon, using the `idevice`
//! crate. usbmuxd only lists devices running their normal OS, so every
//! enumerated device reports [`TargetState::Booted`].
//!
//! Process termination is not available over usbmuxd; the termination
//! operations return [`ProviderError::Unsupported`].
//!
//! # Example
//!
//! ```no_run
//! use targetctl_core::provider::TargetTransport;
//! use targetctl_core::usb_device::UsbmuxTransport;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = UsbmuxTransport;
//! for (handle, attributes) in transport.enumerate_targets().await? {
//!     println!("{handle}: {:?}", attributes.get("ConnectionType"));
//! }
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::net::IpAddr;

use async_trait::async_trait;
use idevice::usbmuxd::{Connection, UsbmuxdConnection};
use serde_json::Value;

use crate::attributes::{keys, Attributes};
use crate::provider::{ProviderError, TargetHandle, TargetTransport};
use crate::state::TargetState;

/// A physical iOS device discovered via usbmuxd.
#[derive(Debug, Clone)]
pub struct PhysicalDevice {
    /// Unique Device Identifier (UDID).
    pub udid: String,
    /// The usbmuxd-assigned numeric device ID.
    pub device_id: u32,
    /// How the device is connected.
    pub connection: DeviceConnection,
}

impl PhysicalDevice {
    /// Builds the attribute snapshot for this device.
    ///
    /// usbmuxd does not expose the hardware serial number, so the UDID is
    /// reported under both identity keys.
    pub fn attributes(&self) -> Attributes {
        let mut attributes = Attributes::new();
        attributes.insert(keys::UNIQUE_DEVICE_ID.into(), Value::from(self.udid.clone()));
        attributes.insert(keys::SERIAL_NUMBER.into(), Value::from(self.udid.clone()));
        attributes.insert(keys::CONNECTION_TYPE.into(), Value::from(self.connection.to_string()));
        attributes
    }
}

/// How a physical device is connected to the host.
#[derive(Debug, Clone)]
pub enum DeviceConnection {
    /// Connected via USB cable.
    Usb,
    /// Connected via the network (WiFi).
    Network(IpAddr),
    /// Unknown connection type.
    Unknown(String),
}

impl fmt::Display for DeviceConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceConnection::Usb => write!(f, "USB"),
            DeviceConnection::Network(ip) => write!(f, "Network ({ip})"),
            DeviceConnection::Unknown(s) => write!(f, "Unknown ({s})"),
        }
    }
}

impl From<Connection> for DeviceConnection {
    fn from(conn: Connection) -> Self {
        match conn {
            Connection::Usb => DeviceConnection::Usb,
            Connection::Network(ip) => DeviceConnection::Network(ip),
            Connection::Unknown(s) => DeviceConnection::Unknown(s),
        }
    }
}

/// List all physical iOS devices currently visible to usbmuxd.
pub async fn list_devices() -> Result<Vec<PhysicalDevice>, ProviderError> {
    let mut muxd = UsbmuxdConnection::default()
        .await
        .map_err(|e| ProviderError::Usbmuxd(e.to_string()))?;

    let devices = muxd
        .get_devices()
        .await
        .map_err(|e| ProviderError::Usbmuxd(e.to_string()))?;

    Ok(devices
        .into_iter()
        .map(|d| PhysicalDevice {
            udid: d.udid,
            device_id: d.device_id,
            connection: d.connection_type.into(),
        })
        .collect())
}

/// [`TargetTransport`] for physical devices attached through usbmuxd.
#[derive(Debug, Clone, Copy, Default)]
pub struct UsbmuxTransport;

impl UsbmuxTransport {
    async fn device(&self, handle: &TargetHandle) -> Result<PhysicalDevice, ProviderError> {
        list_devices()
            .await?
            .into_iter()
            .find(|d| d.udid == handle.as_str())
            .ok_or_else(|| ProviderError::TargetNotFound(handle.to_string()))
    }
}

#[async_trait]
impl TargetTransport for UsbmuxTransport {
    async fn enumerate_targets(&self) -> Result<Vec<(TargetHandle, Attributes)>, ProviderError> {
        Ok(list_devices()
            .await?
            .into_iter()
            .map(|d| (TargetHandle::new(d.udid.clone()), d.attributes()))
            .collect())
    }

    async fn query_state(&self, handle: &TargetHandle) -> Result<i64, ProviderError> {
        self.device(handle).await?;
        Ok(TargetState::Booted.native_code().unwrap_or_default())
    }

    async fn query_attributes(&self, handle: &TargetHandle) -> Result<Attributes, ProviderError> {
        Ok(self.device(handle).await?.attributes())
    }

    async fn send_termination_signal(&self, _handle: &TargetHandle, _pid: u32) -> Result<(), ProviderError> {
        Err(ProviderError::Unsupported(
            "process signals are not available over usbmuxd".to_string(),
        ))
    }

    async fn request_application_termination(
        &self,
        _handle: &TargetHandle,
        _bundle_id: &str,
    ) -> Result<(), ProviderError> {
        Err(ProviderError::Unsupported(
            "application termination is not available over usbmuxd".to_string(),
        ))
    }
}
