//! Terminating the subprocesses of a target.
//!
//! [`TerminationCoordinator`] is bound to one [`TargetDescriptor`] and its
//! [`ProcessInventory`]. It keeps no record of the processes it has seen:
//! every call re-reads the live inventory, so a process that exits on its
//! own between two calls is never acted on from a stale list.
//!
//! # Algorithm
//!
//! [`terminate_process`](TerminationCoordinator::terminate_process):
//!
//! 1. **Ownership** - the pid must be in the target's current process list,
//!    otherwise [`TerminationError::OwnershipMismatch`] and nothing is sent.
//! 2. **Application termination** - if the process carries a bundle id and
//!    the inventory reports that bundle running under the same pid, the
//!    provider is asked to terminate the application.
//! 3. **Signal** - otherwise a termination signal is sent to the pid.
//!
//! In both cases the call resolves only after the pid has left the
//! inventory, or fails with [`TerminationError::Timeout`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use targetctl_core::descriptor::TargetDescriptor;
//! use targetctl_core::provider::{TargetHandle, TargetTransport};
//! use targetctl_core::simctl::SimctlProvider;
//! use targetctl_core::termination::TerminationCoordinator;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let provider = Arc::new(SimctlProvider::default());
//! let handle = TargetHandle::new("A1B2C3D4-E5F6-7890-ABCD-EF1234567890");
//! let attributes = provider.query_attributes(&handle).await?;
//! let target = Arc::new(TargetDescriptor::new(provider.clone(), handle, attributes));
//!
//! let coordinator = TerminationCoordinator::bind(target, provider);
//! coordinator.terminate_application("com.example.app").await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::TerminationConfig;
use crate::descriptor::TargetDescriptor;
use crate::provider::{ProcessHandle, ProcessInventory, ProviderError, TargetHandle};

/// Errors that can occur while terminating a process or application.
#[derive(Error, Debug)]
pub enum TerminationError {
    /// The process is not in the bound target's current inventory.
    #[error("Process {pid} does not belong to target {target}")]
    OwnershipMismatch { pid: u32, target: TargetHandle },

    /// The provider failed to list processes or to deliver a request.
    #[error("Transport error: {0}")]
    Transport(#[from] ProviderError),

    /// The process was still running when the confirmation window closed.
    #[error("Process {pid} still running after {waited:?}")]
    Timeout { pid: u32, waited: Duration },

    /// The process is not a running application, so application-level
    /// termination does not apply. `terminate_process` falls back to a signal
    /// instead of returning this.
    #[error("Process {pid} is not a running application")]
    NotApplicable { pid: u32 },

    /// The caller stopped waiting.
    #[error("Termination cancelled")]
    Cancelled,

    /// The background termination task panicked or was aborted.
    #[error("Termination task failed: {0}")]
    TaskFailed(String),
}

/// Terminates the subprocesses of a single target.
pub struct TerminationCoordinator {
    target: Arc<TargetDescriptor>,
    inventory: Arc<dyn ProcessInventory>,
    config: TerminationConfig,
}

impl TerminationCoordinator {
    /// Binds a coordinator to a target and its process inventory.
    pub fn bind(target: Arc<TargetDescriptor>, inventory: Arc<dyn ProcessInventory>) -> Self {
        Self {
            target,
            inventory,
            config: TerminationConfig::default(),
        }
    }

    /// Overrides the confirmation timing.
    pub fn with_config(mut self, config: TerminationConfig) -> Self {
        self.config = config;
        self
    }

    fn handle(&self) -> &TargetHandle {
        self.target.handle()
    }

    /// Terminates a process of the bound target.
    ///
    /// Resolves once the process has left the target's inventory.
    ///
    /// # Errors
    ///
    /// - [`TerminationError::OwnershipMismatch`] if the pid is not running on this target
    /// - [`TerminationError::Transport`] if the provider rejects the request
    /// - [`TerminationError::Timeout`] if the process does not go away in time
    pub async fn terminate_process(&self, process: &ProcessHandle) -> Result<(), TerminationError> {
        self.terminate_process_until(process, &CancellationToken::new()).await
    }

    /// Terminates the running application for `bundle_id`.
    ///
    /// Succeeds immediately, without contacting the transport, if the
    /// application is not running.
    pub async fn terminate_application(&self, bundle_id: &str) -> Result<(), TerminationError> {
        self.terminate_application_until(bundle_id, &CancellationToken::new()).await
    }

    /// Runs [`terminate_process`](Self::terminate_process) on a background task.
    ///
    /// See [`TerminationHandle`] for cancellation semantics.
    pub fn spawn_terminate_process(self: &Arc<Self>, process: ProcessHandle) -> TerminationHandle {
        let coordinator = self.clone();
        TerminationHandle::spawn(move |cancel| async move {
            coordinator.terminate_process_until(&process, &cancel).await
        })
    }

    /// Runs [`terminate_application`](Self::terminate_application) on a background task.
    ///
    /// See [`TerminationHandle`] for cancellation semantics.
    pub fn spawn_terminate_application(self: &Arc<Self>, bundle_id: String) -> TerminationHandle {
        let coordinator = self.clone();
        TerminationHandle::spawn(move |cancel| async move {
            coordinator.terminate_application_until(&bundle_id, &cancel).await
        })
    }

    /// `terminate_process`, giving up with [`TerminationError::Cancelled`] if
    /// `cancel` fires before the request is sent.
    #[instrument(skip_all, fields(udid = %self.handle(), pid = process.pid))]
    async fn terminate_process_until(
        &self,
        process: &ProcessHandle,
        cancel: &CancellationToken,
    ) -> Result<(), TerminationError> {
        self.verify_ownership(process).await?;

        match self.application_bundle(process).await {
            Ok(bundle_id) => {
                self.terminate_running_application(process.pid, bundle_id, cancel)
                    .await
            }
            Err(TerminationError::NotApplicable { pid }) => {
                debug!(pid, "not a running application, signalling directly");
                self.signal_process(process, cancel).await
            }
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self, cancel), fields(udid = %self.handle()))]
    async fn terminate_application_until(
        &self,
        bundle_id: &str,
        cancel: &CancellationToken,
    ) -> Result<(), TerminationError> {
        let running = self
            .inventory
            .find_running_application(self.handle(), bundle_id)
            .await?;

        match running {
            Some(app) => self.terminate_running_application(app.pid, bundle_id, cancel).await,
            None => {
                debug!(bundle_id, "application not running, nothing to terminate");
                Ok(())
            }
        }
    }

    async fn verify_ownership(&self, process: &ProcessHandle) -> Result<(), TerminationError> {
        if self.is_running(process.pid).await? {
            Ok(())
        } else {
            warn!(pid = process.pid, "process not owned by target");
            Err(TerminationError::OwnershipMismatch {
                pid: process.pid,
                target: self.handle().clone(),
            })
        }
    }

    /// Returns the bundle id of a process that is a running application, or
    /// [`TerminationError::NotApplicable`] if it is not one.
    async fn application_bundle<'a>(&self, process: &'a ProcessHandle) -> Result<&'a str, TerminationError> {
        let Some(bundle_id) = process.bundle_id.as_deref() else {
            return Err(TerminationError::NotApplicable { pid: process.pid });
        };

        match self
            .inventory
            .find_running_application(self.handle(), bundle_id)
            .await?
        {
            Some(app) if app.pid == process.pid => Ok(bundle_id),
            _ => Err(TerminationError::NotApplicable { pid: process.pid }),
        }
    }

    async fn terminate_running_application(
        &self,
        pid: u32,
        bundle_id: &str,
        cancel: &CancellationToken,
    ) -> Result<(), TerminationError> {
        ensure_not_cancelled(cancel)?;
        info!(bundle_id, pid, "requesting application termination");
        let request = self
            .target
            .calls()
            .request_application_termination(self.handle(), bundle_id)
            .await;
        self.confirm_after_request(pid, request).await
    }

    async fn signal_process(
        &self,
        process: &ProcessHandle,
        cancel: &CancellationToken,
    ) -> Result<(), TerminationError> {
        ensure_not_cancelled(cancel)?;
        info!(pid = process.pid, "sending termination signal");
        let request = self
            .target
            .calls()
            .send_termination_signal(self.handle(), process.pid)
            .await;
        self.confirm_after_request(process.pid, request).await
    }

    /// Waits for `pid` to disappear after a termination request.
    ///
    /// A rejected request still counts as success when the process is
    /// already gone: a concurrent request for the same process got there
    /// first.
    async fn confirm_after_request(
        &self,
        pid: u32,
        request: Result<(), ProviderError>,
    ) -> Result<(), TerminationError> {
        match request {
            Ok(()) => self.wait_for_disappearance(pid).await,
            Err(ProviderError::ProcessNotFound(_)) => {
                // Gone on the host; the inventory may still lag behind.
                debug!(pid, "process already exited");
                self.wait_for_disappearance(pid).await
            }
            Err(e) => match self.is_running(pid).await {
                Ok(false) => {
                    debug!(pid, error = %e, "request rejected but process already gone");
                    Ok(())
                }
                Ok(true) => Err(e.into()),
                Err(recheck) => {
                    warn!(pid, error = %recheck, "could not re-read inventory after rejected request");
                    Err(e.into())
                }
            },
        }
    }

    async fn wait_for_disappearance(&self, pid: u32) -> Result<(), TerminationError> {
        let started = tokio::time::Instant::now();
        let deadline = started + self.config.timeout;

        loop {
            if !self.is_running(pid).await? {
                debug!(pid, elapsed = ?started.elapsed(), "process gone");
                return Ok(());
            }

            if tokio::time::Instant::now() >= deadline {
                warn!(pid, "process did not exit before timeout");
                return Err(TerminationError::Timeout {
                    pid,
                    waited: self.config.timeout,
                });
            }

            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    async fn is_running(&self, pid: u32) -> Result<bool, TerminationError> {
        let processes = self.inventory.list_processes(self.handle()).await?;
        Ok(processes.iter().any(|p| p.pid == pid))
    }
}

fn ensure_not_cancelled(cancel: &CancellationToken) -> Result<(), TerminationError> {
    if cancel.is_cancelled() {
        debug!("cancelled before the request was sent");
        return Err(TerminationError::Cancelled);
    }
    Ok(())
}

/// Handle to a termination running on a background task.
///
/// Cancelling at any point before the termination request is sent prevents
/// it from being issued at all. Once the request has been issued it cannot be retracted:
/// cancelling only releases the waiter, and the task keeps confirming the
/// teardown in the background.
pub struct TerminationHandle {
    cancel_token: CancellationToken,
    join_handle: JoinHandle<Result<(), TerminationError>>,
}

impl TerminationHandle {
    fn spawn<F, Fut>(operation: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<(), TerminationError>> + Send + 'static,
    {
        let cancel_token = CancellationToken::new();
        let token_clone = cancel_token.clone();

        let join_handle = tokio::spawn(async move {
            if token_clone.is_cancelled() {
                return Err(TerminationError::Cancelled);
            }
            operation(token_clone).await
        });

        Self {
            cancel_token,
            join_handle,
        }
    }

    /// Stops waiting for the result.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// A token that cancels this handle, for use from another task.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Returns whether the background termination has finished.
    pub fn is_finished(&self) -> bool {
        self.join_handle.is_finished()
    }

    /// Waits for the termination to resolve.
    ///
    /// Returns [`TerminationError::Cancelled`] if the handle is cancelled first.
    pub async fn wait(self) -> Result<(), TerminationError> {
        tokio::select! {
            biased;
            _ = self.cancel_token.cancelled() => Err(TerminationError::Cancelled),
            joined = self.join_handle => match joined {
                Ok(result) => result,
                Err(e) => Err(TerminationError::TaskFailed(e.to_string())),
            },
        }
    }
}
