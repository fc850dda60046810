use super::{TransportEnv, TransportError, TransportKind};
use crate::config::CredentialState;
use crate::workspace::{ActivationState, Workspace};
use serde::Serialize;
use std::cell::OnceCell;

/// Why a transport was or was not considered usable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Probe {
    pub transport: TransportKind,
    pub available: bool,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    /// Usable transports in priority order, each listed once.
    pub ranked: Vec<TransportKind>,
    pub probes: Vec<Probe>,
}

/// Ranks transports for one workspace. Selection performs no writes; the only
/// remote call is a single activation lookup, made lazily and reused.
pub struct TransportSelector<'a> {
    env: TransportEnv<'a>,
}

impl<'a> TransportSelector<'a> {
    pub fn new(env: TransportEnv<'a>) -> Self {
        Self { env }
    }

    pub fn select(
        &self,
        workspace: &Workspace,
        pinned: Option<TransportKind>,
    ) -> Result<Selection, TransportError> {
        if let Some(kind) = pinned {
            return Ok(Selection {
                ranked: vec![kind],
                probes: vec![Probe {
                    transport: kind,
                    available: true,
                    reason: "pinned".to_string(),
                }],
            });
        }

        if let CredentialState::Malformed(reason) = self.env.settings.credential() {
            return Err(TransportError::UnrecoverableConfig {
                reason: format!("engine api key: {reason}"),
            });
        }

        let activation = OnceCell::new();
        let mut ranked = Vec::new();
        let mut probes = Vec::new();
        for kind in TransportKind::PRIORITY {
            let probe = self.probe(kind, workspace, &activation);
            if probe.available && !ranked.contains(&kind) {
                ranked.push(kind);
            }
            probes.push(probe);
        }

        if ranked.is_empty() {
            return Err(TransportError::NoTransportAvailable {
                name: workspace.name.to_string(),
                reasons: probes
                    .iter()
                    .map(|p| format!("{}: {}", p.transport, p.reason))
                    .collect(),
            });
        }
        Ok(Selection { ranked, probes })
    }

    fn probe(
        &self,
        kind: TransportKind,
        workspace: &Workspace,
        activation: &OnceCell<ActivationState>,
    ) -> Probe {
        let (available, reason) = match kind {
            TransportKind::TriggerEndpoint => {
                if workspace.endpoints.is_empty() {
                    (false, "no trigger endpoint recorded".to_string())
                } else if !self.env.settings.endpoints_require_active {
                    (true, "endpoint recorded".to_string())
                } else {
                    let state = *activation.get_or_init(|| self.activation_state(workspace));
                    if state == ActivationState::Active {
                        (true, "endpoint recorded and workflow active".to_string())
                    } else {
                        (false, format!("workflow activation is {state}"))
                    }
                }
            }
            TransportKind::PrivilegedApi => match self.env.settings.credential() {
                CredentialState::Usable(_) if workspace.remote_id.is_some() => {
                    (true, "api credential configured".to_string())
                }
                CredentialState::Usable(_) => {
                    (false, "workflow has no remote id".to_string())
                }
                CredentialState::Missing => (false, "no api credential configured".to_string()),
                CredentialState::Malformed(reason) => (false, reason),
            },
            TransportKind::LocalProcess => {
                if self.env.local.reachable() {
                    (true, "engine command found".to_string())
                } else {
                    (
                        false,
                        format!("engine command `{}` not found", self.env.settings.command),
                    )
                }
            }
        };
        Probe {
            transport: kind,
            available,
            reason,
        }
    }

    /// Live state when it can be asked for, the recorded state otherwise.
    fn activation_state(&self, workspace: &Workspace) -> ActivationState {
        let Some(remote_id) = workspace.remote_id.as_ref() else {
            return workspace.activation;
        };
        if !matches!(self.env.settings.credential(), CredentialState::Usable(_)) {
            return workspace.activation;
        }
        match self.env.engine.workflow_status(remote_id) {
            Ok(status) => ActivationState::from_active(status.active),
            Err(_) => workspace.activation,
        }
    }
}
