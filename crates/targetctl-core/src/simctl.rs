//! Simulator provider backed by Apple's `xcrun simctl` command-line tool.
//!
//! [`SimctlProvider`] implements both [`TargetTransport`] and
//! [`ProcessInventory`] for iOS Simulators:
//!
//! - targets and their state come from `xcrun simctl list devices -j`
//! - processes come from `launchctl list` run inside the simulator via
//!   `xcrun simctl spawn`
//! - applications are terminated with `xcrun simctl terminate`
//! - other processes are sent `SIGTERM` on the host, since
//!   simulator subprocesses are ordinary host processes
//!
//! simctl commands are synchronous and run on tokio's blocking pool.
//!
//! # Requirements
//!
//! Xcode must be installed for `xcrun simctl` to be available.
//!
//! # Example
//!
//! ```no_run
//! use targetctl_core::simctl::SimctlProvider;
//!
//! let provider = SimctlProvider::default();
//! for device in provider.list_devices().unwrap() {
//!     println!("{}: {} ({})", device.name, device.udid, device.state);
//! }
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::attributes::{keys, Attributes};
use crate::config::TargetctlConfig;
use crate::provider::{ProcessHandle, ProcessInventory, ProviderError, TargetHandle, TargetTransport};
use crate::state::TargetState;

/// Label prefix launchd uses for application processes.
const APPLICATION_LABEL_PREFIX: &str = "UIKitApplication:";

/// Native code reported for simctl states outside the known set.
const UNKNOWN_STATE_CODE: i64 = -1;

/// Attribute key for the simulator runtime identifier.
pub const RUNTIME_KEY: &str = "Runtime";

/// Represents an iOS Simulator device.
///
/// This struct contains information about a simulator device as reported
/// by `xcrun simctl list devices -j`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatorDevice {
    /// The unique device identifier (UDID) for this simulator.
    pub udid: String,

    /// The human-readable name of the device (e.g., "iPhone 15 Pro").
    pub name: String,

    /// The current state of the device (e.g., "Booted", "Shutdown").
    pub state: String,

    /// The device type identifier (e.g., "com.apple.CoreSimulator.SimDeviceType.iPhone-15-Pro").
    #[serde(rename = "deviceTypeIdentifier")]
    pub device_type: Option<String>,

    /// The runtime this device belongs to (e.g., "com.apple.CoreSimulator.SimRuntime.iOS-17-0").
    #[serde(default, skip_deserializing)]
    pub runtime: Option<String>,
}

impl SimulatorDevice {
    /// The native state code for this device's simctl state string.
    pub fn state_code(&self) -> i64 {
        native_state_code(&self.state)
    }

    /// Builds the attribute snapshot for this device.
    pub fn attributes(&self) -> Attributes {
        let mut attributes = Attributes::new();
        attributes.insert(keys::UNIQUE_DEVICE_ID.into(), Value::from(self.udid.clone()));
        attributes.insert(keys::DEVICE_NAME.into(), Value::from(self.name.clone()));
        if let Some(device_type) = &self.device_type {
            attributes.insert(keys::PRODUCT_TYPE.into(), Value::from(device_type.clone()));
        }
        attributes.insert(
            keys::DEVICE_CLASS.into(),
            Value::from(device_class(self.device_type.as_deref().unwrap_or(&self.name))),
        );
        if let Some(runtime) = &self.runtime {
            attributes.insert(RUNTIME_KEY.into(), Value::from(runtime.clone()));
        }
        attributes
    }
}

#[derive(Debug, Deserialize)]
struct DeviceList {
    devices: HashMap<String, Vec<SimulatorDevice>>,
}

/// Maps a simctl state string to a native state code.
///
/// Unrecognised strings map to a code outside the table, which
/// [`state_for_code`](crate::state::state_for_code) reads as `Unknown`.
pub fn native_state_code(state: &str) -> i64 {
    let state = match state {
        "Creating" => TargetState::Creating,
        "Shutdown" => TargetState::Shutdown,
        "Booting" => TargetState::Booting,
        "Booted" => TargetState::Booted,
        "Shutting Down" => TargetState::ShuttingDown,
        _ => TargetState::Unknown,
    };
    state.native_code().unwrap_or(UNKNOWN_STATE_CODE)
}

/// Derives a device class ("iPhone", "iPad", ...) from a device type identifier or name.
fn device_class(device_type: &str) -> &'static str {
    if device_type.contains("iPhone") {
        "iPhone"
    } else if device_type.contains("iPad") {
        "iPad"
    } else if device_type.contains("Watch") {
        "Watch"
    } else if device_type.contains("Apple-TV") || device_type.contains("Apple TV") {
        "AppleTV"
    } else if device_type.contains("Vision") {
        "Vision"
    } else {
        "Simulator"
    }
}

/// Parses device list JSON into a flat vector of devices.
///
/// Takes raw JSON bytes (as returned by `simctl list devices -j`) and
/// returns every device across all runtimes, each tagged with its runtime.
///
/// # Errors
///
/// - [`ProviderError::JsonParse`] if the JSON is invalid or has unexpected structure
pub fn parse_device_list(json: &[u8]) -> Result<Vec<SimulatorDevice>, ProviderError> {
    let device_list: DeviceList = serde_json::from_slice(json)?;
    let mut devices: Vec<SimulatorDevice> = device_list
        .devices
        .into_iter()
        .flat_map(|(runtime, devices)| {
            devices.into_iter().map(move |mut d| {
                d.runtime = Some(runtime.clone());
                d
            })
        })
        .collect();
    devices.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.udid.cmp(&b.udid)));
    Ok(devices)
}

/// Extracts the bundle identifier from a launchd application label.
///
/// `UIKitApplication:com.example.app[0x1a2b][rb-legacy]` yields `com.example.app`.
pub fn bundle_id_from_label(label: &str) -> Option<&str> {
    let rest = label.strip_prefix(APPLICATION_LABEL_PREFIX)?;
    let bundle_id = rest.split('[').next().unwrap_or(rest);
    (!bundle_id.is_empty()).then_some(bundle_id)
}

/// Parses `launchctl list` output into the processes that are running.
///
/// Each line is `PID<tab>Status<tab>Label`. The header and services with no
/// pid (`-`) are skipped.
pub fn parse_launchctl_list(output: &str) -> Vec<ProcessHandle> {
    output
        .lines()
        .filter_map(|line| {
            let mut columns = line.split_whitespace();
            let pid = columns.next()?.parse::<u32>().ok()?;
            let _status = columns.next()?;
            let label = columns.next()?;

            let process = ProcessHandle::new(pid).with_name(label);
            Some(match bundle_id_from_label(label) {
                Some(bundle_id) => ProcessHandle {
                    bundle_id: Some(bundle_id.to_string()),
                    ..process
                },
                None => process,
            })
        })
        .collect()
}

/// Returns `true` if simctl's stderr says there was nothing to terminate.
fn is_not_running_message(stderr: &str) -> bool {
    let stderr = stderr.to_lowercase();
    stderr.contains("not running") || stderr.contains("found nothing to terminate")
}

/// [`TargetTransport`] and [`ProcessInventory`] for iOS Simulators via `xcrun simctl`.
#[derive(Debug, Clone)]
pub struct SimctlProvider {
    xcrun: PathBuf,
}

impl Default for SimctlProvider {
    fn default() -> Self {
        Self::new("xcrun")
    }
}

impl SimctlProvider {
    /// Creates a provider that invokes the given `xcrun` executable.
    pub fn new(xcrun: impl Into<PathBuf>) -> Self {
        Self { xcrun: xcrun.into() }
    }

    /// Creates a provider using the `xcrun` path from the config.
    pub fn from_config(config: &TargetctlConfig) -> Self {
        Self::new(config.xcrun_path.clone())
    }

    pub fn xcrun(&self) -> &Path {
        &self.xcrun
    }

    /// Runs `xcrun simctl <args>` and returns stdout.
    fn simctl(&self, args: &[&str]) -> Result<Vec<u8>, ProviderError> {
        debug!(?args, "running simctl");
        let output = Command::new(&self.xcrun).arg("simctl").args(args).output()?;

        if !output.status.success() {
            return Err(ProviderError::CommandFailed(
                String::from_utf8_lossy(&output.stderr).to_string(),
            ));
        }
        Ok(output.stdout)
    }

    /// Lists all available iOS Simulator devices.
    ///
    /// # Errors
    ///
    /// - [`ProviderError::Io`] if the command fails to execute
    /// - [`ProviderError::CommandFailed`] if simctl returns a non-zero exit code
    /// - [`ProviderError::JsonParse`] if the output cannot be parsed as JSON
    pub fn list_devices(&self) -> Result<Vec<SimulatorDevice>, ProviderError> {
        let stdout = self.simctl(&["list", "devices", "-j"])?;
        parse_device_list(&stdout)
    }

    /// Finds one device by UDID.
    pub fn device(&self, udid: &str) -> Result<SimulatorDevice, ProviderError> {
        self.list_devices()?
            .into_iter()
            .find(|d| d.udid == udid)
            .ok_or_else(|| ProviderError::TargetNotFound(udid.to_string()))
    }

    /// Lists the processes launchd reports inside a simulator.
    pub fn launchctl_list(&self, udid: &str) -> Result<Vec<ProcessHandle>, ProviderError> {
        let stdout = self.simctl(&["spawn", udid, "launchctl", "list"])?;
        Ok(parse_launchctl_list(&String::from_utf8_lossy(&stdout)))
    }

    /// Terminates an application. An application that is not running is not an error.
    pub fn terminate(&self, udid: &str, bundle_id: &str) -> Result<(), ProviderError> {
        match self.simctl(&["terminate", udid, bundle_id]) {
            Ok(_) => Ok(()),
            Err(ProviderError::CommandFailed(stderr)) if is_not_running_message(&stderr) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Sends SIGTERM to a simulator subprocess.
    ///
    /// A pid that does not exist yields [`ProviderError::ProcessNotFound`].
    #[cfg(unix)]
    pub fn kill(&self, pid: u32) -> Result<(), ProviderError> {
        use nix::errno::Errno;
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        // Pid 0 and negative values address process groups.
        let raw = match i32::try_from(pid) {
            Ok(raw) if raw > 0 => raw,
            _ => return Err(ProviderError::ProcessNotFound(pid)),
        };

        debug!(pid, "sending SIGTERM");
        match kill(Pid::from_raw(raw), Signal::SIGTERM) {
            Ok(()) => Ok(()),
            Err(Errno::ESRCH) => Err(ProviderError::ProcessNotFound(pid)),
            Err(e) => Err(ProviderError::Signal {
                pid,
                reason: e.to_string(),
            }),
        }
    }

    #[cfg(not(unix))]
    pub fn kill(&self, pid: u32) -> Result<(), ProviderError> {
        Err(ProviderError::Unsupported(format!(
            "signalling process {pid} is not supported on this platform"
        )))
    }

    /// Runs a blocking simctl operation on the blocking pool.
    async fn blocking<T, F>(&self, operation: F) -> Result<T, ProviderError>
    where
        T: Send + 'static,
        F: FnOnce(SimctlProvider) -> Result<T, ProviderError> + Send + 'static,
    {
        let provider = self.clone();
        tokio::task::spawn_blocking(move || operation(provider))
            .await
            .map_err(|e| ProviderError::CommandFailed(format!("simctl task failed: {e}")))?
    }
}

#[async_trait]
impl TargetTransport for SimctlProvider {
    async fn enumerate_targets(&self) -> Result<Vec<(TargetHandle, Attributes)>, ProviderError> {
        let devices = self.blocking(|p| p.list_devices()).await?;
        Ok(devices
            .into_iter()
            .map(|d| (TargetHandle::new(d.udid.clone()), d.attributes()))
            .collect())
    }

    async fn query_state(&self, handle: &TargetHandle) -> Result<i64, ProviderError> {
        let udid = handle.to_string();
        let device = self.blocking(move |p| p.device(&udid)).await?;
        Ok(device.state_code())
    }

    async fn query_attributes(&self, handle: &TargetHandle) -> Result<Attributes, ProviderError> {
        let udid = handle.to_string();
        let device = self.blocking(move |p| p.device(&udid)).await?;
        Ok(device.attributes())
    }

    async fn send_termination_signal(&self, _handle: &TargetHandle, pid: u32) -> Result<(), ProviderError> {
        self.kill(pid)
    }

    async fn request_application_termination(
        &self,
        handle: &TargetHandle,
        bundle_id: &str,
    ) -> Result<(), ProviderError> {
        let udid = handle.to_string();
        let bundle_id = bundle_id.to_string();
        self.blocking(move |p| p.terminate(&udid, &bundle_id)).await
    }
}

#[async_trait]
impl ProcessInventory for SimctlProvider {
    async fn list_processes(&self, handle: &TargetHandle) -> Result<Vec<ProcessHandle>, ProviderError> {
        let udid = handle.to_string();
        self.blocking(move |p| p.launchctl_list(&udid)).await
    }
}
