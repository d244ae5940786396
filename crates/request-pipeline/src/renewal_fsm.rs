//! Token renewal state machine using rust-fsm.
//!
//! ## State Diagram
//!
//! ```text
//!            Unauthorized                 Rejected / Cleared
//!   ┌──────┐ ───────────► ┌──────────┐ ─────────────────────► ┌────────┐
//!   │ Idle │              │ InFlight │                        │ Failed │
//!   └──────┘ ◄─────────── └──────────┘                        └────────┘
//!      │ ▲      Renewed                                          │  ▲
//!      │ └──────────────────── Established ──────────────────────┘  │
//!      └──────────────────────── ReplayRejected ────────────────────┘
//! ```
//!
//! `Established` (a new login) resets every state to `Idle`. `Cleared`
//! (logout) keeps `Idle` and `Failed` as they are and moves an in-flight
//! renewal to `Failed` so its result is discarded.

use client_config::RenewalSettings;
use rust_fsm::*;
use serde::{Deserialize, Serialize};
use std::time::Duration;

state_machine! {
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub renewal_machine(Idle)

    Idle => {
        Unauthorized => InFlight,
        ReplayRejected => Failed,
        Established => Idle,
        Cleared => Idle
    },
    InFlight => {
        Renewed => Idle,
        Rejected => Failed,
        Established => Idle,
        Cleared => Failed
    },
    Failed => {
        Established => Idle,
        Cleared => Failed
    }
}

pub use renewal_machine::Input as RenewalMachineInput;
pub use renewal_machine::State as RenewalMachineState;
pub use renewal_machine::StateMachine as RenewalMachine;

/// Renewal state for diagnostics and status reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenewalPhase {
    Idle,
    InFlight,
    Failed,
}

impl From<&RenewalMachineState> for RenewalPhase {
    fn from(state: &RenewalMachineState) -> Self {
        match state {
            RenewalMachineState::Idle => RenewalPhase::Idle,
            RenewalMachineState::InFlight => RenewalPhase::InFlight,
            RenewalMachineState::Failed => RenewalPhase::Failed,
        }
    }
}

/// Retry behavior for transient renewal failures.
#[derive(Debug, Clone)]
pub struct RenewalPolicy {
    /// Maximum number of attempts.
    pub max_retries: u32,
    /// Initial delay between retries in milliseconds.
    pub initial_delay_ms: u64,
    /// Maximum delay between retries in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RenewalPolicy {
    fn default() -> Self {
        Self::from(&RenewalSettings::default())
    }
}

impl From<&RenewalSettings> for RenewalPolicy {
    fn from(settings: &RenewalSettings) -> Self {
        Self {
            max_retries: settings.max_retries.max(1),
            initial_delay_ms: settings.initial_delay_ms,
            max_delay_ms: settings.max_delay_ms,
        }
    }
}

impl RenewalPolicy {
    /// Calculate the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u64.checked_pow(attempt).unwrap_or(u64::MAX);
        let delay_ms = self.initial_delay_ms.saturating_mul(factor);
        Duration::from_millis(delay_ms.min(self.max_delay_ms))
    }
}
