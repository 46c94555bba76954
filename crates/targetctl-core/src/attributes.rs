//! Identity attributes reported by a target provider.
//!
//! Attributes are an ordered `String -> JSON value` mapping. A snapshot is
//! always installed as a whole; see
//! [`TargetDescriptor::set_attributes`](crate::descriptor::TargetDescriptor::set_attributes).

use std::collections::BTreeMap;

use serde_json::Value;

/// An ordered snapshot of target attributes.
pub type Attributes = BTreeMap<String, Value>;

/// Well-known attribute keys.
pub mod keys {
    pub const CHIP_ID: &str = "ChipID";
    pub const DEVICE_CLASS: &str = "DeviceClass";
    pub const DEVICE_NAME: &str = "DeviceName";
    pub const LOCATION_ID: &str = "LocationID";
    pub const PRODUCT_TYPE: &str = "ProductType";
    pub const SERIAL_NUMBER: &str = "SerialNumber";
    pub const UNIQUE_CHIP_ID: &str = "UniqueChipID";
    pub const UNIQUE_DEVICE_ID: &str = "UniqueDeviceID";
    /// How a physical device is attached (USB, network). Not set for simulators.
    pub const CONNECTION_TYPE: &str = "ConnectionType";
}

/// Reads a string attribute, treating non-string values as absent.
pub(crate) fn string_value(attributes: &Attributes, key: &str) -> Option<String> {
    attributes
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Reads an unsigned integer attribute, treating other values as absent.
pub(crate) fn u64_value(attributes: &Attributes, key: &str) -> Option<u64> {
    attributes.get(key).and_then(Value::as_u64)
}
