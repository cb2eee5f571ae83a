use serde::Serialize;
use std::fmt;

use crate::install::INSTALL_SCRIPT_URL;
use crate::version::{UpdateState, Version};

pub const MAX_COLLECT_ATTEMPTS: u8 = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LauncherState {
    CheckInstalled,
    Install,
    Update,
    CheckUpdate,
    LoadConfig,
    InspectEnv,
    ConfirmEnv,
    CollectEnv { attempt: u8 },
    Launch,
    Done,
    Failed { reason: String },
}

impl LauncherState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::CheckInstalled => "check_installed",
            Self::Install => "install",
            Self::Update => "update",
            Self::CheckUpdate => "check_update",
            Self::LoadConfig => "load_config",
            Self::InspectEnv => "inspect_env",
            Self::ConfirmEnv => "confirm_env",
            Self::CollectEnv { .. } => "collect_env",
            Self::Launch => "launch",
            Self::Done => "done",
            Self::Failed { .. } => "failed",
        }
    }
}

impl fmt::Display for LauncherState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of the step that ran for the current state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LauncherEvent {
    /// The binary answered; the version is `None` when its output was unreadable.
    InstalledFound(Option<Version>),
    InstalledMissing,
    InstallSucceeded,
    InstallFailed(String),
    UpdateFinished { ok: bool },
    UpdateChecked { status: UpdateState, apply: bool },
    ConfigLoaded,
    ConfigFailed(String),
    EnvPresent,
    EnvEmpty,
    EditRequested,
    EditDeclined,
    EnvCollected,
    EnvIncomplete(String),
    Launched,
    LaunchFailed(String),
    Aborted(String),
}

/// The launcher workflow as a total function of (state, event).
///
/// Terminal states absorb every event; any pairing not listed below fails the
/// run with a description of the unexpected event.
pub fn transition(state: &LauncherState, event: &LauncherEvent) -> LauncherState {
    use LauncherEvent as E;
    use LauncherState as S;

    match (state, event) {
        (S::Done, _) | (S::Failed { .. }, _) => state.clone(),
        (_, E::Aborted(reason)) => S::Failed {
            reason: reason.clone(),
        },

        (S::CheckInstalled, E::InstalledFound(_)) => S::CheckUpdate,
        (S::CheckInstalled, E::InstalledMissing) => S::Install,

        (S::Install, E::InstallSucceeded) => S::Update,
        (S::Install, E::InstallFailed(reason)) => S::Failed {
            reason: format!(
                "installation failed: {reason}. Install manually with `curl -fsSL {INSTALL_SCRIPT_URL} | bash` and run the launcher again"
            ),
        },

        (S::Update, E::UpdateFinished { .. }) => S::LoadConfig,

        (
            S::CheckUpdate,
            E::UpdateChecked {
                status: UpdateState::UpdateAvailable,
                apply: true,
            },
        ) => S::Update,
        (S::CheckUpdate, E::UpdateChecked { .. }) => S::LoadConfig,

        (S::LoadConfig, E::ConfigLoaded) => S::InspectEnv,
        (S::LoadConfig, E::ConfigFailed(reason)) => S::Failed {
            reason: format!("could not prepare configuration: {reason}"),
        },

        (S::InspectEnv, E::EnvEmpty) => S::CollectEnv { attempt: 1 },
        (S::InspectEnv, E::EnvPresent) => S::ConfirmEnv,

        (S::ConfirmEnv, E::EditRequested) => S::CollectEnv { attempt: 1 },
        (S::ConfirmEnv, E::EditDeclined) => S::Launch,

        (S::CollectEnv { .. }, E::EnvCollected) => S::Launch,
        (S::CollectEnv { attempt }, E::EnvIncomplete(_)) if *attempt < MAX_COLLECT_ATTEMPTS => {
            S::CollectEnv {
                attempt: attempt + 1,
            }
        }
        (S::CollectEnv { .. }, E::EnvIncomplete(reason)) => S::Failed {
            reason: format!(
                "configuration still incomplete after {MAX_COLLECT_ATTEMPTS} attempts: {reason}"
            ),
        },

        (S::Launch, E::Launched) => S::Done,
        (S::Launch, E::LaunchFailed(reason)) => S::Failed {
            reason: format!("launch failed: {reason}"),
        },

        (state, event) => S::Failed {
            reason: format!("unexpected event {event:?} in state {state}"),
        },
    }
}
