//! Target descriptors.
//!
//! A [`TargetDescriptor`] wraps a provider's opaque [`TargetHandle`] together
//! with the call table used to reach it and a cached attribute snapshot.
//!
//! Reads never fail: a missing attribute is `None`, and a state query that
//! the provider cannot answer degrades to [`TargetState::Unknown`]. The
//! attribute snapshot is replaced as a whole, so readers always observe
//! either the old or the new mapping.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use targetctl_core::descriptor::TargetDescriptor;
//! use targetctl_core::provider::TargetTransport;
//! use targetctl_core::simctl::SimctlProvider;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let provider: Arc<dyn TargetTransport> = Arc::new(SimctlProvider::default());
//! for (handle, attributes) in provider.enumerate_targets().await? {
//!     let target = TargetDescriptor::new(provider.clone(), handle, attributes);
//!     println!("{:?}: {}", target.name(), target.state().await);
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::{Arc, RwLock};

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::attributes::{keys, string_value, u64_value, Attributes};
use crate::provider::{ProviderError, TargetHandle, TargetTransport};
use crate::state::{state_for_code, TargetState};

/// A discovered target: handle, call table and cached attributes.
pub struct TargetDescriptor {
    calls: Arc<dyn TargetTransport>,
    handle: TargetHandle,
    attributes: RwLock<Arc<Attributes>>,
}

/// Serializable point-in-time view of a target.
#[derive(Debug, Clone, Serialize)]
pub struct TargetSummary {
    pub handle: TargetHandle,
    pub state: TargetState,
    pub attributes: Attributes,
}

impl TargetDescriptor {
    /// Creates a descriptor. The provider is trusted to have validated the handle.
    pub fn new(calls: Arc<dyn TargetTransport>, handle: TargetHandle, attributes: Attributes) -> Self {
        Self {
            calls,
            handle,
            attributes: RwLock::new(Arc::new(attributes)),
        }
    }

    pub fn handle(&self) -> &TargetHandle {
        &self.handle
    }

    /// The call table bound at construction.
    pub fn calls(&self) -> &Arc<dyn TargetTransport> {
        &self.calls
    }

    /// Maps a provider-native code to a [`TargetState`]. See [`state_for_code`].
    pub fn state_for_code(code: i64) -> TargetState {
        state_for_code(code)
    }

    /// Queries the provider for the current state.
    ///
    /// Returns [`TargetState::Unknown`] if the provider cannot answer.
    pub async fn state(&self) -> TargetState {
        match self.calls.query_state(&self.handle).await {
            Ok(code) => state_for_code(code),
            Err(e) => {
                debug!(target_handle = %self.handle, error = %e, "state query failed");
                TargetState::Unknown
            }
        }
    }

    /// Returns the current attribute snapshot.
    pub fn attributes(&self) -> Arc<Attributes> {
        match self.attributes.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Replaces the whole attribute snapshot.
    pub fn set_attributes(&self, attributes: Attributes) {
        let snapshot = Arc::new(attributes);
        match self.attributes.write() {
            Ok(mut guard) => *guard = snapshot,
            Err(poisoned) => *poisoned.into_inner() = snapshot,
        }
    }

    /// Returns a single attribute from the current snapshot.
    pub fn attribute(&self, key: &str) -> Option<Value> {
        self.attributes().get(key).cloned()
    }

    /// Pulls a fresh attribute snapshot from the provider and installs it.
    ///
    /// On failure the previous snapshot stays in place.
    pub async fn refresh(&self) -> Result<(), ProviderError> {
        let attributes = self.calls.query_attributes(&self.handle).await?;
        debug!(target_handle = %self.handle, count = attributes.len(), "attributes refreshed");
        self.set_attributes(attributes);
        Ok(())
    }

    /// Returns `true` once an attribute snapshot has been populated.
    pub fn has_attributes(&self) -> bool {
        !self.attributes().is_empty()
    }

    pub fn serial_number(&self) -> Option<String> {
        string_value(&self.attributes(), keys::SERIAL_NUMBER)
    }

    pub fn unique_device_id(&self) -> Option<String> {
        string_value(&self.attributes(), keys::UNIQUE_DEVICE_ID)
    }

    /// The serial number, or the unique device id where the provider has no
    /// serial number (simulators).
    pub fn identity(&self) -> Option<String> {
        let attrs = self.attributes();
        string_value(&attrs, keys::SERIAL_NUMBER)
            .or_else(|| string_value(&attrs, keys::UNIQUE_DEVICE_ID))
    }

    pub fn name(&self) -> Option<String> {
        string_value(&self.attributes(), keys::DEVICE_NAME)
    }

    pub fn product_type(&self) -> Option<String> {
        string_value(&self.attributes(), keys::PRODUCT_TYPE)
    }

    pub fn device_class(&self) -> Option<String> {
        string_value(&self.attributes(), keys::DEVICE_CLASS)
    }

    pub fn chip_id(&self) -> Option<u64> {
        u64_value(&self.attributes(), keys::CHIP_ID)
    }

    pub fn unique_chip_id(&self) -> Option<u64> {
        u64_value(&self.attributes(), keys::UNIQUE_CHIP_ID)
    }

    pub fn location_id(&self) -> Option<u64> {
        u64_value(&self.attributes(), keys::LOCATION_ID)
    }

    /// Captures the handle, live state and attribute snapshot.
    pub async fn summary(&self) -> TargetSummary {
        TargetSummary {
            handle: self.handle.clone(),
            state: self.state().await,
            attributes: (*self.attributes()).clone(),
        }
    }
}

impl std::fmt::Debug for TargetDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetDescriptor")
            .field("handle", &self.handle)
            .field("attributes", &self.attributes())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Mutex;

    /// Transport double with a settable state code and attribute snapshot.
    struct StubTransport {
        code: AtomicI64,
        fail_state: bool,
        attributes: Mutex<Option<Attributes>>,
    }

    impl StubTransport {
        fn new(code: i64) -> Self {
            Self {
                code: AtomicI64::new(code),
                fail_state: false,
                attributes: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl TargetTransport for StubTransport {
        async fn enumerate_targets(&self) -> Result<Vec<(TargetHandle, Attributes)>, ProviderError> {
            Ok(vec![])
        }

        async fn query_state(&self, handle: &TargetHandle) -> Result<i64, ProviderError> {
            if self.fail_state {
                return Err(ProviderError::TargetNotFound(handle.to_string()));
            }
            Ok(self.code.load(Ordering::SeqCst))
        }

        async fn query_attributes(&self, handle: &TargetHandle) -> Result<Attributes, ProviderError> {
            self.attributes
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| ProviderError::TargetNotFound(handle.to_string()))
        }

        async fn send_termination_signal(&self, _: &TargetHandle, _: u32) -> Result<(), ProviderError> {
            Err(ProviderError::Unsupported("stub".into()))
        }

        async fn request_application_termination(&self, _: &TargetHandle, _: &str) -> Result<(), ProviderError> {
            Err(ProviderError::Unsupported("stub".into()))
        }
    }

    fn descriptor(transport: Arc<StubTransport>, attributes: Attributes) -> TargetDescriptor {
        TargetDescriptor::new(transport, TargetHandle::new("TEST-UDID"), attributes)
    }

    fn attrs(pairs: &[(&str, Value)]) -> Attributes {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn construction_stores_fields_verbatim() {
        let transport = Arc::new(StubTransport::new(4));
        let target = descriptor(transport, attrs(&[(keys::DEVICE_NAME, json!("iPhone 15"))]));

        assert_eq!(target.handle().as_str(), "TEST-UDID");
        assert_eq!(target.name().as_deref(), Some("iPhone 15"));
        assert!(target.has_attributes());
    }

    #[test]
    fn attribute_lookup_after_replacement() {
        let target = descriptor(Arc::new(StubTransport::new(4)), Attributes::new());
        assert!(!target.has_attributes());

        target.set_attributes(attrs(&[
            (keys::SERIAL_NUMBER, json!("ABC123")),
            (keys::DEVICE_CLASS, json!("iPhone")),
        ]));

        assert_eq!(target.attribute(keys::SERIAL_NUMBER), Some(json!("ABC123")));
        assert_eq!(target.attribute("unknownKey"), None);
        assert_eq!(target.device_class().as_deref(), Some("iPhone"));
    }

    #[test]
    fn replacement_is_whole_snapshot() {
        let target = descriptor(
            Arc::new(StubTransport::new(4)),
            attrs(&[(keys::DEVICE_NAME, json!("Old")), (keys::CHIP_ID, json!(1))]),
        );
        let before = target.attributes();

        target.set_attributes(attrs(&[(keys::DEVICE_NAME, json!("New"))]));

        // A previously taken snapshot is unaffected, and the old keys are gone.
        assert_eq!(before.get(keys::DEVICE_NAME), Some(&json!("Old")));
        assert_eq!(target.name().as_deref(), Some("New"));
        assert_eq!(target.chip_id(), None);
    }

    #[test]
    fn identity_falls_back_to_udid() {
        let target = descriptor(
            Arc::new(StubTransport::new(4)),
            attrs(&[(keys::UNIQUE_DEVICE_ID, json!("0000-1111"))]),
        );
        assert_eq!(target.serial_number(), None);
        assert_eq!(target.identity().as_deref(), Some("0000-1111"));

        target.set_attributes(attrs(&[
            (keys::UNIQUE_DEVICE_ID, json!("0000-1111")),
            (keys::SERIAL_NUMBER, json!("F2LXX")),
        ]));
        assert_eq!(target.identity().as_deref(), Some("F2LXX"));
    }

    #[test]
    fn numeric_accessors() {
        let target = descriptor(
            Arc::new(StubTransport::new(4)),
            attrs(&[
                (keys::CHIP_ID, json!(33056)),
                (keys::UNIQUE_CHIP_ID, json!(7_000_000_000u64)),
                (keys::LOCATION_ID, json!("not a number")),
            ]),
        );
        assert_eq!(target.chip_id(), Some(33056));
        assert_eq!(target.unique_chip_id(), Some(7_000_000_000));
        assert_eq!(target.location_id(), None);
    }

    #[tokio::test]
    async fn state_maps_native_code() {
        let transport = Arc::new(StubTransport::new(4));
        let target = descriptor(transport.clone(), Attributes::new());
        assert_eq!(target.state().await, TargetState::Booted);

        transport.code.store(999, Ordering::SeqCst);
        assert_eq!(target.state().await, TargetState::Unknown);
    }

    #[tokio::test]
    async fn state_query_failure_is_unknown() {
        let transport = Arc::new(StubTransport {
            fail_state: true,
            ..StubTransport::new(4)
        });
        let target = descriptor(transport, Attributes::new());
        assert_eq!(target.state().await, TargetState::Unknown);
    }

    #[tokio::test]
    async fn refresh_replaces_snapshot() {
        let transport = Arc::new(StubTransport::new(2));
        *transport.attributes.lock().unwrap() = Some(attrs(&[(keys::PRODUCT_TYPE, json!("iPhone16,1"))]));
        let target = descriptor(transport, attrs(&[(keys::DEVICE_NAME, json!("stale"))]));

        target.refresh().await.unwrap();

        assert_eq!(target.product_type().as_deref(), Some("iPhone16,1"));
        assert_eq!(target.name(), None);
    }

    #[tokio::test]
    async fn failed_refresh_keeps_previous_snapshot() {
        let transport = Arc::new(StubTransport::new(2));
        let target = descriptor(transport, attrs(&[(keys::DEVICE_NAME, json!("kept"))]));

        assert!(target.refresh().await.is_err());
        assert_eq!(target.name().as_deref(), Some("kept"));
    }

    #[tokio::test]
    async fn summary_serializes() {
        let target = descriptor(
            Arc::new(StubTransport::new(2)),
            attrs(&[(keys::DEVICE_NAME, json!("iPad"))]),
        );
        let summary = target.summary().await;
        let json = serde_json::to_value(&summary).unwrap();

        assert_eq!(json["handle"], json!("TEST-UDID"));
        assert_eq!(json["state"], json!("Shutdown"));
        assert_eq!(json["attributes"]["DeviceName"], json!("iPad"));
    }
}
