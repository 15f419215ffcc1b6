// Sandbox polling: one state query per cycle, fixed interval, bounded attempts
use std::time::Duration;
use tracing::{info, instrument, warn};

use super::{SandboxControl, SandboxError, SandboxState};
use crate::metrics;

/// Attempt cap and interval for a polling loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub attempts: u32,
    pub interval: Duration,
}

impl PollPolicy {
    /// Sandbox state polling: 20 × 25s
    pub const SANDBOX: Self = Self {
        attempts: 20,
        interval: Duration::from_secs(25),
    };

    /// Waiting for the output object: 5 × 10s
    pub const OUTPUT: Self = Self {
        attempts: 5,
        interval: Duration::from_secs(10),
    };

    /// Total time spent sleeping when every attempt is used
    pub fn budget(&self) -> Duration {
        self.interval * self.attempts
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("Container failed with state: {state}")]
    Failed { name: String, state: SandboxState },

    #[error("Container did not complete within {} seconds ({attempts} polls)", .waited.as_secs())]
    TimedOut {
        name: String,
        attempts: u32,
        waited: Duration,
    },

    #[error("sandbox control error: {0}")]
    Control(#[from] SandboxError),
}

/// Poll until the sandbox reaches a terminal state
///
/// Each cycle is one state query followed by one sleep. Succeeded returns
/// `Ok`; Failed or Stopped is an error. A not-found answer is tolerated while
/// the control plane catches up; any other control-plane error propagates.
/// After `policy.attempts` non-terminal cycles the wait times out.
#[instrument(skip(control, policy), fields(sandbox = %name))]
pub async fn wait_for_terminal(
    control: &dyn SandboxControl,
    name: &str,
    policy: PollPolicy,
) -> Result<(), LifecycleError> {
    for attempt in 1..=policy.attempts {
        metrics::SANDBOX_POLLS.inc();

        match control.state(name).await {
            Ok(SandboxState::Succeeded) => {
                info!(attempt, "Sandbox succeeded");
                return Ok(());
            }
            Ok(state @ (SandboxState::Failed | SandboxState::Stopped)) => {
                warn!(attempt, %state, "Sandbox reached a failure state");
                return Err(LifecycleError::Failed {
                    name: name.to_string(),
                    state,
                });
            }
            Ok(state) => {
                info!(attempt, attempts = policy.attempts, %state, "Sandbox state");
            }
            Err(SandboxError::NotFound(_)) => {
                warn!(attempt, "Sandbox not found yet");
            }
            Err(e) => return Err(e.into()),
        }

        tokio::time::sleep(policy.interval).await;
    }

    Err(LifecycleError::TimedOut {
        name: name.to_string(),
        attempts: policy.attempts,
        waited: policy.budget(),
    })
}
