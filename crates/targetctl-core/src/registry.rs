//! Tracking the set of discovered targets.
//!
//! [`TargetRegistry`] owns one [`TargetDescriptor`] per target the transport
//! currently enumerates. Each [`reconcile`](TargetRegistry::reconcile) pass
//! creates descriptors for new targets, installs the fresh attribute snapshot
//! on surviving ones and drops the ones that disappeared.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use targetctl_core::registry::TargetRegistry;
//! use targetctl_core::simctl::SimctlProvider;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut registry = TargetRegistry::new(Arc::new(SimctlProvider::default()));
//! let changes = registry.reconcile().await?;
//! println!("{} targets ({} new)", registry.len(), changes.added.len());
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::descriptor::TargetDescriptor;
use crate::provider::{ProviderError, TargetHandle, TargetTransport};

/// What a [`TargetRegistry::reconcile`] pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Targets seen for the first time.
    pub added: Vec<TargetHandle>,
    /// Targets that were already known; their attributes were replaced.
    pub refreshed: Vec<TargetHandle>,
    /// Targets no longer enumerated; their descriptors were dropped.
    pub removed: Vec<TargetHandle>,
}

/// The live set of targets exposed by a transport.
pub struct TargetRegistry {
    transport: Arc<dyn TargetTransport>,
    targets: BTreeMap<TargetHandle, Arc<TargetDescriptor>>,
}

impl TargetRegistry {
    /// Creates an empty registry. Call [`reconcile`](Self::reconcile) to populate it.
    pub fn new(transport: Arc<dyn TargetTransport>) -> Self {
        Self {
            transport,
            targets: BTreeMap::new(),
        }
    }

    /// Brings the registry in line with the transport's current enumeration.
    ///
    /// On error the registry is left unchanged.
    pub async fn reconcile(&mut self) -> Result<ReconcileReport, ProviderError> {
        let enumerated = self.transport.enumerate_targets().await?;
        let mut report = ReconcileReport::default();
        let mut next = BTreeMap::new();

        for (handle, attributes) in enumerated {
            let descriptor = match self.targets.remove(&handle) {
                Some(existing) => {
                    existing.set_attributes(attributes);
                    report.refreshed.push(handle.clone());
                    existing
                }
                None => {
                    report.added.push(handle.clone());
                    Arc::new(TargetDescriptor::new(
                        self.transport.clone(),
                        handle.clone(),
                        attributes,
                    ))
                }
            };
            next.insert(handle, descriptor);
        }

        report.removed = std::mem::take(&mut self.targets).into_keys().collect();
        self.targets = next;

        if !report.added.is_empty() || !report.removed.is_empty() {
            info!(
                added = report.added.len(),
                removed = report.removed.len(),
                total = self.targets.len(),
                "target set changed"
            );
        } else {
            debug!(total = self.targets.len(), "target set unchanged");
        }

        Ok(report)
    }

    pub fn get(&self, handle: &TargetHandle) -> Option<Arc<TargetDescriptor>> {
        self.targets.get(handle).cloned()
    }

    /// Looks a target up by handle or by identity attribute (serial number or UDID).
    pub fn find(&self, query: &str) -> Option<Arc<TargetDescriptor>> {
        self.get(&TargetHandle::new(query))
            .or_else(|| self.find_by_identity(query))
    }

    pub fn find_by_identity(&self, identity: &str) -> Option<Arc<TargetDescriptor>> {
        self.targets
            .values()
            .find(|t| {
                t.identity().as_deref() == Some(identity)
                    || t.unique_device_id().as_deref() == Some(identity)
            })
            .cloned()
    }

    /// All known targets, ordered by handle.
    pub fn targets(&self) -> Vec<Arc<TargetDescriptor>> {
        self.targets.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}
