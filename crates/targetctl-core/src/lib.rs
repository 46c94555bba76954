//! # targetctl-core
//!
//! Core library for inspecting iOS Simulator and device targets and tearing
//! down their processes on macOS.
//!
//! The crate maps provider-native target state into a small closed state
//! model and sequences process termination against a live, changing process
//! list. The providers themselves (CoreSimulator via `simctl`, usbmuxd) sit
//! behind narrow traits so the coordination logic can be driven by test
//! doubles.
//!
//! ## Modules
//!
//! - [`state`] - [`TargetState`](state::TargetState) and the native code mapping
//! - [`attributes`] - identity attribute snapshots and well-known keys
//! - [`provider`] - the [`TargetTransport`](provider::TargetTransport) and
//!   [`ProcessInventory`](provider::ProcessInventory) traits
//! - [`descriptor`] - [`TargetDescriptor`](descriptor::TargetDescriptor), a handle plus cached attributes
//! - [`registry`] - the live set of discovered targets
//! - [`termination`] - [`TerminationCoordinator`](termination::TerminationCoordinator)
//! - [`simctl`] - simulator provider built on `xcrun simctl`
//! - [`usb_device`] - physical device transport built on usbmuxd
//! - [`config`] - persistent settings in `~/.targetctl/config.json`
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use targetctl_core::registry::TargetRegistry;
//! use targetctl_core::simctl::SimctlProvider;
//! use targetctl_core::termination::TerminationCoordinator;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let provider = Arc::new(SimctlProvider::default());
//! let mut registry = TargetRegistry::new(provider.clone());
//! registry.reconcile().await?;
//!
//! for target in registry.targets() {
//!     if target.state().await.is_running() {
//!         let coordinator = TerminationCoordinator::bind(target, provider.clone());
//!         coordinator.terminate_application("com.example.app").await?;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod attributes;
pub mod config;
pub mod descriptor;
pub mod provider;
pub mod registry;
pub mod simctl;
pub mod state;
pub mod termination;
pub mod usb_device;
