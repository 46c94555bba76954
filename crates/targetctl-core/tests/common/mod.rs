//! Shared test helpers for targetctl-core integration tests.
//!
//! [`MockTarget`] is an in-memory provider implementing both
//! [`TargetTransport`] and [`ProcessInventory`]. It records every
//! termination request it receives and can be scripted to exit slowly, refuse
//! to exit, reject requests, or hold requests at a gate.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Barrier;

use targetctl_core::attributes::{keys, Attributes};
use targetctl_core::config::TerminationConfig;
use targetctl_core::descriptor::TargetDescriptor;
use targetctl_core::provider::{
    ProcessHandle, ProcessInventory, ProviderError, TargetHandle, TargetTransport,
};
use targetctl_core::termination::TerminationCoordinator;

pub const SIM_UDID: &str = "A1B2C3D4-E5F6-7890-ABCD-EF1234567890";

// ---------------------------------------------------------------------------
// Recorded calls
// ---------------------------------------------------------------------------

/// A termination request received by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    Signal(u32),
    ApplicationTermination(String),
}

// ---------------------------------------------------------------------------
// MockTarget
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MockState {
    targets: Vec<(TargetHandle, Attributes)>,
    state_code: i64,
    processes: Vec<ProcessHandle>,
    calls: Vec<TransportCall>,
    list_calls: usize,
    /// Pids that ignore termination requests.
    stubborn: HashSet<u32>,
    /// Pids that have been asked to exit, with the number of inventory reads
    /// left before they disappear.
    exiting: HashMap<u32, u32>,
    exit_after_polls: u32,
    reject_requests: bool,
    /// Requests fail, but only because the process already exited.
    lose_races: bool,
    fail_enumeration: bool,
    /// Process listings fail once any termination request has been received.
    fail_inventory_after_request: bool,
    /// Delay applied to every process listing.
    list_delay: Option<Duration>,
    /// Termination requests wait here before they take effect.
    request_gate: Option<Arc<Barrier>>,
}

/// In-memory transport and process inventory for a single simulator.
#[derive(Clone, Default)]
pub struct MockTarget {
    state: Arc<Mutex<MockState>>,
}

impl MockTarget {
    /// A booted target running the given processes.
    pub fn with_processes(processes: Vec<ProcessHandle>) -> Self {
        let mock = Self::default();
        {
            let mut s = mock.state.lock().unwrap();
            s.processes = processes;
            s.state_code = 4;
            s.targets = vec![(TargetHandle::new(SIM_UDID), sim_attributes(SIM_UDID, "iPhone 15"))];
        }
        mock
    }

    pub fn handle(&self) -> TargetHandle {
        TargetHandle::new(SIM_UDID)
    }

    /// Processes take `polls` further inventory reads to disappear after a request.
    pub fn exit_after_polls(&self, polls: u32) {
        self.state.lock().unwrap().exit_after_polls = polls;
    }

    /// The pid accepts termination requests but never exits.
    pub fn make_stubborn(&self, pid: u32) {
        self.state.lock().unwrap().stubborn.insert(pid);
    }

    /// Termination requests fail at the transport.
    pub fn reject_requests(&self) {
        self.state.lock().unwrap().reject_requests = true;
    }

    /// Each request finds its process already gone: the process is removed and
    /// the request is rejected, as when a concurrent request won.
    pub fn lose_races(&self) {
        self.state.lock().unwrap().lose_races = true;
    }

    /// `enumerate_targets` fails.
    pub fn fail_enumeration(&self) {
        self.state.lock().unwrap().fail_enumeration = true;
    }

    /// Process listings fail after the first termination request.
    pub fn fail_inventory_after_request(&self) {
        self.state.lock().unwrap().fail_inventory_after_request = true;
    }

    /// Every process listing takes `delay`.
    pub fn slow_listing(&self, delay: Duration) {
        self.state.lock().unwrap().list_delay = Some(delay);
    }

    /// Holds termination requests until `parties` of them have arrived.
    pub fn gate_requests(&self, parties: usize) {
        self.state.lock().unwrap().request_gate = Some(Arc::new(Barrier::new(parties)));
    }

    /// Removes a process as if it exited on its own.
    pub fn exit(&self, pid: u32) {
        self.state.lock().unwrap().processes.retain(|p| p.pid != pid);
    }

    pub fn set_targets(&self, targets: Vec<(TargetHandle, Attributes)>) {
        self.state.lock().unwrap().targets = targets;
    }

    pub fn set_state_code(&self, code: i64) {
        self.state.lock().unwrap().state_code = code;
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn list_calls(&self) -> usize {
        self.state.lock().unwrap().list_calls
    }

    pub fn running_pids(&self) -> Vec<u32> {
        self.state.lock().unwrap().processes.iter().map(|p| p.pid).collect()
    }

    async fn pass_request_gate(&self) {
        let gate = self.state.lock().unwrap().request_gate.clone();
        if let Some(gate) = gate {
            gate.wait().await;
        }
    }

    fn begin_exit(state: &mut MockState, pid: u32) {
        if state.stubborn.contains(&pid) {
            return;
        }
        if state.exit_after_polls == 0 {
            state.processes.retain(|p| p.pid != pid);
        } else {
            let polls = state.exit_after_polls;
            state.exiting.entry(pid).or_insert(polls);
        }
    }
}

#[async_trait]
impl TargetTransport for MockTarget {
    async fn enumerate_targets(&self) -> Result<Vec<(TargetHandle, Attributes)>, ProviderError> {
        let s = self.state.lock().unwrap();
        if s.fail_enumeration {
            return Err(ProviderError::CommandFailed("CoreSimulatorService unavailable".into()));
        }
        Ok(s.targets.clone())
    }

    async fn query_state(&self, handle: &TargetHandle) -> Result<i64, ProviderError> {
        let s = self.state.lock().unwrap();
        if s.targets.iter().any(|(h, _)| h == handle) {
            Ok(s.state_code)
        } else {
            Err(ProviderError::TargetNotFound(handle.to_string()))
        }
    }

    async fn query_attributes(&self, handle: &TargetHandle) -> Result<Attributes, ProviderError> {
        self.state
            .lock()
            .unwrap()
            .targets
            .iter()
            .find(|(h, _)| h == handle)
            .map(|(_, a)| a.clone())
            .ok_or_else(|| ProviderError::TargetNotFound(handle.to_string()))
    }

    async fn send_termination_signal(&self, _handle: &TargetHandle, pid: u32) -> Result<(), ProviderError> {
        self.pass_request_gate().await;
        let mut s = self.state.lock().unwrap();
        s.calls.push(TransportCall::Signal(pid));
        if s.reject_requests {
            return Err(ProviderError::CommandFailed("operation not permitted".into()));
        }
        if s.lose_races {
            s.processes.retain(|p| p.pid != pid);
        }
        if !s.processes.iter().any(|p| p.pid == pid) {
            return Err(ProviderError::ProcessNotFound(pid));
        }
        Self::begin_exit(&mut s, pid);
        Ok(())
    }

    async fn request_application_termination(
        &self,
        _handle: &TargetHandle,
        bundle_id: &str,
    ) -> Result<(), ProviderError> {
        self.pass_request_gate().await;
        let mut s = self.state.lock().unwrap();
        s.calls.push(TransportCall::ApplicationTermination(bundle_id.to_string()));
        if s.reject_requests {
            return Err(ProviderError::CommandFailed("terminate refused".into()));
        }
        if s.lose_races {
            s.processes.retain(|p| p.bundle_id.as_deref() != Some(bundle_id));
        }
        let pids: Vec<u32> = s
            .processes
            .iter()
            .filter(|p| p.bundle_id.as_deref() == Some(bundle_id))
            .map(|p| p.pid)
            .collect();
        if pids.is_empty() {
            return Err(ProviderError::CommandFailed("found nothing to terminate".into()));
        }
        for pid in pids {
            Self::begin_exit(&mut s, pid);
        }
        Ok(())
    }
}

#[async_trait]
impl ProcessInventory for MockTarget {
    async fn list_processes(&self, _handle: &TargetHandle) -> Result<Vec<ProcessHandle>, ProviderError> {
        let delay = self.state.lock().unwrap().list_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut s = self.state.lock().unwrap();
        s.list_calls += 1;
        if s.fail_inventory_after_request && !s.calls.is_empty() {
            return Err(ProviderError::CommandFailed("launchctl: simulator went away".into()));
        }

        let mut gone = Vec::new();
        for (pid, remaining) in s.exiting.iter_mut() {
            if *remaining == 0 {
                gone.push(*pid);
            } else {
                *remaining -= 1;
            }
        }
        for pid in gone {
            s.exiting.remove(&pid);
            s.processes.retain(|p| p.pid != pid);
        }

        Ok(s.processes.clone())
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub fn sim_attributes(udid: &str, name: &str) -> Attributes {
    let mut attrs = Attributes::new();
    attrs.insert(keys::UNIQUE_DEVICE_ID.into(), json!(udid));
    attrs.insert(keys::DEVICE_NAME.into(), json!(name));
    attrs.insert(keys::DEVICE_CLASS.into(), json!("iPhone"));
    attrs
}

/// launchd, a daemon and one application.
pub fn standard_processes() -> Vec<ProcessHandle> {
    vec![
        ProcessHandle::new(1).with_name("launchd_sim"),
        ProcessHandle::new(412).with_name("com.apple.backboardd"),
        ProcessHandle::application(1337, "com.example.app")
            .with_name("UIKitApplication:com.example.app[0x1a2b][rb-legacy]"),
    ]
}

/// Fast polling so tests that wait on disappearance finish quickly.
pub fn fast_config() -> TerminationConfig {
    TerminationConfig {
        poll_interval: std::time::Duration::from_millis(5),
        timeout: std::time::Duration::from_secs(2),
    }
}

/// A coordinator bound to the mock's simulator.
pub fn coordinator(mock: &MockTarget) -> TerminationCoordinator {
    let transport: Arc<dyn TargetTransport> = Arc::new(mock.clone());
    let target = Arc::new(TargetDescriptor::new(
        transport,
        mock.handle(),
        sim_attributes(SIM_UDID, "iPhone 15"),
    ));
    TerminationCoordinator::bind(target, Arc::new(mock.clone())).with_config(fast_config())
}
