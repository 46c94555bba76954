//! Interfaces to the external target and process providers.
//!
//! The core never talks to CoreSimulator, usbmuxd or launchd directly. It
//! consumes two narrow capability traits:
//!
//! - [`TargetTransport`] - enumeration, state/attribute queries and the two
//!   termination requests. A [`TargetDescriptor`](crate::descriptor::TargetDescriptor)
//!   holds one as its call table.
//! - [`ProcessInventory`] - the live process list of a target and
//!   bundle-to-process resolution.
//!
//! Concrete implementations live in [`crate::simctl`] and
//! [`crate::usb_device`]; tests substitute in-memory doubles.

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::attributes::Attributes;

/// Errors reported by a provider.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// A provider command failed to execute successfully.
    #[error("Command execution failed: {0}")]
    CommandFailed(String),

    /// The handle does not refer to a target the provider knows about.
    #[error("Target not found: {0}")]
    TargetNotFound(String),

    /// The process a request was addressed to no longer exists.
    #[error("No such process: {0}")]
    ProcessNotFound(u32),

    /// Delivering a signal failed for a reason other than a missing process.
    #[error("Failed to signal process {pid}: {reason}")]
    Signal { pid: u32, reason: String },

    /// The provider cannot perform this operation for this kind of target.
    #[error("Operation not supported: {0}")]
    Unsupported(String),

    /// The usbmuxd daemon could not be reached or queried.
    #[error("usbmuxd error: {0}")]
    Usbmuxd(String),

    /// Failed to parse JSON output from the provider.
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// An I/O error occurred while executing a provider command.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Opaque reference to a target, issued by a provider.
///
/// The core only ever hands it back to the provider that issued it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetHandle(String);

impl TargetHandle {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The provider's token. Only providers should interpret it.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A running process on a target, as reported by a [`ProcessInventory`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessHandle {
    /// Process identifier.
    pub pid: u32,

    /// Bundle identifier, set when the process is an application.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundle_id: Option<String>,

    /// Path to the executable, when the inventory knows it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary_path: Option<PathBuf>,

    /// Service label or process name, for display.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ProcessHandle {
    /// A bare process known only by pid.
    pub fn new(pid: u32) -> Self {
        Self {
            pid,
            bundle_id: None,
            binary_path: None,
            name: None,
        }
    }

    /// An application process.
    pub fn application(pid: u32, bundle_id: impl Into<String>) -> Self {
        Self {
            bundle_id: Some(bundle_id.into()),
            ..Self::new(pid)
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_binary_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.binary_path = Some(path.into());
        self
    }

    /// Returns `true` if the inventory reported a bundle identifier.
    pub fn is_application(&self) -> bool {
        self.bundle_id.is_some()
    }
}

/// The call table used to interact with targets.
///
/// Query methods are side-effect free. The two termination methods are the
/// only operations in the crate that change a target, and both return once
/// the provider has *accepted* the request; they do not wait for the
/// process to exit.
#[async_trait]
pub trait TargetTransport: Send + Sync {
    /// Lists every target the provider can currently see, with an initial
    /// attribute snapshot for each.
    async fn enumerate_targets(&self) -> Result<Vec<(TargetHandle, Attributes)>, ProviderError>;

    /// Returns the provider-native state code for a target.
    ///
    /// Map it with [`state_for_code`](crate::state::state_for_code).
    async fn query_state(&self, handle: &TargetHandle) -> Result<i64, ProviderError>;

    /// Returns a fresh attribute snapshot for a target.
    async fn query_attributes(&self, handle: &TargetHandle) -> Result<Attributes, ProviderError>;

    /// Sends a direct termination signal to a process on the target.
    async fn send_termination_signal(
        &self,
        handle: &TargetHandle,
        pid: u32,
    ) -> Result<(), ProviderError>;

    /// Requests application-level termination of a bundle on the target.
    async fn request_application_termination(
        &self,
        handle: &TargetHandle,
        bundle_id: &str,
    ) -> Result<(), ProviderError>;
}

/// Live view of the processes running on a target.
#[async_trait]
pub trait ProcessInventory: Send + Sync {
    /// Lists the processes currently running on the target.
    async fn list_processes(&self, handle: &TargetHandle) -> Result<Vec<ProcessHandle>, ProviderError>;

    /// Returns the running application for a bundle identifier, if any.
    ///
    /// The default implementation filters [`list_processes`](Self::list_processes).
    async fn find_running_application(
        &self,
        handle: &TargetHandle,
        bundle_id: &str,
    ) -> Result<Option<ProcessHandle>, ProviderError> {
        let processes = self.list_processes(handle).await?;
        Ok(processes
            .into_iter()
            .find(|p| p.bundle_id.as_deref() == Some(bundle_id)))
    }
}
