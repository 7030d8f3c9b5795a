// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Authorization gate: combines the tier/mode policy, hazard detection and
//! the session permission set into one decision per tool call.
use std::collections::HashSet;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use wren_config::{ApprovalMode, PermissionsConfig, ToolTier};

use crate::detect::{self, Hazards};
use crate::policy::{decide, GateDecision};
use crate::tier::TierTable;

/// Everything a human needs to decide about one call.  Built fresh for
/// every attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SafetyVerdict {
    pub needs_approval: bool,
    /// Refused without asking: deny list or a blocking hazard.
    pub hard_denied: bool,
    pub reason: String,
    pub tool_name: String,
    pub details: Vec<String>,
    /// Refused because of a blocking hazard in the arguments.
    pub is_hard_blocked: bool,
    pub tier: ToolTier,
    pub arguments: Value,
}

/// A human's answer to an approval prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalDecision {
    Deny,
    ApproveOnce,
    /// Approve and stop asking about this tool until the session is cleared.
    ApproveSession,
    /// As `ApproveSession`, and the caller should persist the grant.
    ApproveAlways,
}

impl From<bool> for ApprovalDecision {
    fn from(approved: bool) -> Self {
        if approved {
            ApprovalDecision::ApproveOnce
        } else {
            ApprovalDecision::Deny
        }
    }
}

/// Terminal outcome of one tool-call attempt, kept for audit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    Auto,
    AllowedOnce,
    AllowedSession,
    AllowedAlways,
    Denied,
    HardDenied,
}

impl Disposition {
    pub fn is_allowed(self) -> bool {
        !matches!(self, Disposition::Denied | Disposition::HardDenied)
    }
}

impl std::fmt::Display for Disposition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Disposition::Auto => "auto",
            Disposition::AllowedOnce => "allowed_once",
            Disposition::AllowedSession => "allowed_session",
            Disposition::AllowedAlways => "allowed_always",
            Disposition::Denied => "denied",
            Disposition::HardDenied => "hard_denied",
        };
        f.write_str(s)
    }
}

/// Human-decision capability.  Implementations may prompt on a console or
/// forward to a remote UI; they must resolve to exactly one decision.
#[async_trait]
pub trait ApprovalHandler: Send + Sync {
    async fn decide(&self, verdict: &SafetyVerdict) -> ApprovalDecision;
}

/// Result of [`ApprovalGate::authorize`].
#[derive(Debug, Clone, PartialEq)]
pub struct Authorization {
    pub disposition: Disposition,
    /// Present whenever the gate had something to say (ask or deny).
    pub verdict: Option<SafetyVerdict>,
}

impl Authorization {
    pub fn allowed(&self) -> bool {
        self.disposition.is_allowed()
    }

    /// Human-readable reason for a refusal.
    pub fn denial_reason(&self) -> Option<String> {
        if self.allowed() {
            return None;
        }
        Some(
            self.verdict
                .as_ref()
                .map(|v| v.reason.clone())
                .unwrap_or_else(|| "denied".to_string()),
        )
    }
}

pub struct ApprovalGate {
    mode: ApprovalMode,
    allowed: HashSet<String>,
    denied: HashSet<String>,
    tiers: TierTable,
    /// Session grants.  The same lock serialises approval prompts.
    session: Mutex<HashSet<String>>,
}

impl ApprovalGate {
    pub fn new(
        mode: ApprovalMode,
        allowed: HashSet<String>,
        denied: HashSet<String>,
        tiers: TierTable,
    ) -> Self {
        Self {
            mode,
            allowed,
            denied,
            tiers,
            session: Mutex::new(HashSet::new()),
        }
    }

    pub fn from_config(cfg: &PermissionsConfig) -> Self {
        Self::new(
            cfg.mode,
            cfg.allowed_tools.clone(),
            cfg.denied_tools.clone(),
            TierTable::from_config(cfg),
        )
    }

    pub fn mode(&self) -> ApprovalMode {
        self.mode
    }

    pub fn tier_of(&self, tool: &str) -> ToolTier {
        self.tiers.resolve(tool)
    }

    /// Drop every session grant.
    pub async fn clear_session(&self) {
        self.session.lock().await.clear();
        info!("session permissions cleared");
    }

    /// Names granted for this session, sorted.
    pub async fn session_grants(&self) -> Vec<String> {
        let mut names: Vec<String> = self.session.lock().await.iter().cloned().collect();
        names.sort();
        names
    }

    /// Evaluate a call against an explicit session set.
    fn evaluate(
        &self,
        tool: &str,
        args: &Value,
        session_allowed: &HashSet<String>,
    ) -> (GateDecision, SafetyVerdict) {
        let tier = self.tiers.resolve(tool);
        let hazards = detect::scan(args, tier);
        let granted = self.allowed.contains(tool) || session_allowed.contains(tool);

        let mut decision = decide(
            tool,
            tier,
            self.mode,
            &self.denied,
            &self.allowed,
            session_allowed,
        );
        let blocked = !hazards.blocking.is_empty();
        if blocked {
            decision = GateDecision::HardDeny;
        } else if decision == GateDecision::Execute && !hazards.flagged.is_empty() && !granted {
            decision = GateDecision::Ask;
        }

        let reason = self.reason(tool, tier, decision, blocked, &hazards);
        let mut details: Vec<String> = hazards
            .blocking
            .iter()
            .chain(hazards.flagged.iter())
            .map(|f| f.detail.clone())
            .collect();
        details.push(format!("tier: {tier}, mode: {}", self.mode));

        let verdict = SafetyVerdict {
            needs_approval: decision == GateDecision::Ask,
            hard_denied: decision == GateDecision::HardDeny,
            reason,
            tool_name: tool.to_string(),
            details,
            is_hard_blocked: blocked,
            tier,
            arguments: args.clone(),
        };
        (decision, verdict)
    }

    fn reason(
        &self,
        tool: &str,
        tier: ToolTier,
        decision: GateDecision,
        blocked: bool,
        hazards: &Hazards,
    ) -> String {
        if blocked {
            let labels: Vec<&str> = hazards.blocking.iter().map(|f| f.label).collect();
            return format!("blocked: {}", labels.join(", "));
        }
        match decision {
            GateDecision::HardDeny => format!("tool '{tool}' is on the deny list"),
            GateDecision::Ask if !hazards.flagged.is_empty() => {
                let labels: Vec<&str> = hazards.flagged.iter().map(|f| f.label).collect();
                format!("potentially dangerous: {}", labels.join(", "))
            }
            GateDecision::Ask => format!("'{tool}' is a {tier} tool and mode is {}", self.mode),
            GateDecision::Execute if !hazards.flagged.is_empty() => {
                let labels: Vec<&str> = hazards.flagged.iter().map(|f| f.label).collect();
                format!("granted despite: {}", labels.join(", "))
            }
            GateDecision::Execute => format!("'{tool}' may run without approval"),
        }
    }

    /// Preview the gate's view of a call without executing or prompting.
    ///
    /// Returns `None` when the call would run silently and nothing in its
    /// arguments is noteworthy.  Never waits on an open prompt: while one
    /// holds the session lock, grants are ignored and the verdict is the
    /// stricter one.
    pub async fn check(&self, tool: &str, args: &Value) -> Option<SafetyVerdict> {
        let (decision, verdict) = self.evaluate(tool, args, &HashSet::new());
        let (decision, verdict) = if decision == GateDecision::Ask {
            match self.session.try_lock() {
                Ok(session) => self.evaluate(tool, args, &session),
                Err(_) => {
                    debug!(tool_name = %tool, "prompt open; previewing without session grants");
                    (decision, verdict)
                }
            }
        } else {
            (decision, verdict)
        };
        let noteworthy = verdict.details.len() > 1;
        if decision == GateDecision::Execute && !noteworthy {
            None
        } else {
            Some(verdict)
        }
    }

    /// Decide whether a call may run, prompting `approver` if needed.
    ///
    /// Prompts are serialised: a second call that needs a decision waits
    /// until the first prompt has been answered, then re-checks the session
    /// grants before asking.  Cancellation while waiting or prompting
    /// resolves to a denial.
    pub async fn authorize(
        &self,
        tool: &str,
        args: &Value,
        approver: Option<&dyn ApprovalHandler>,
        cancel: &CancellationToken,
    ) -> Authorization {
        // Session grants only matter when the policy would otherwise ask.
        let (decision, verdict) = self.evaluate(tool, args, &HashSet::new());
        match decision {
            GateDecision::HardDeny => {
                debug!(tool_name = %tool, reason = %verdict.reason, "hard-denied");
                return Authorization {
                    disposition: Disposition::HardDenied,
                    verdict: Some(verdict),
                };
            }
            GateDecision::Execute => {
                return Authorization {
                    disposition: Disposition::Auto,
                    verdict: None,
                };
            }
            GateDecision::Ask => {}
        }

        let mut session = tokio::select! {
            guard = self.session.lock() => guard,
            _ = cancel.cancelled() => return cancelled(verdict),
        };

        let (decision, verdict) = self.evaluate(tool, args, &session);
        if decision == GateDecision::Execute {
            return Authorization {
                disposition: Disposition::Auto,
                verdict: None,
            };
        }

        let Some(approver) = approver else {
            debug!(tool_name = %tool, "no approval handler; denying");
            let mut verdict = verdict;
            verdict.reason = format!("{} (no approval handler available)", verdict.reason);
            return Authorization {
                disposition: Disposition::Denied,
                verdict: Some(verdict),
            };
        };

        // The session guard is held across the prompt and released on every
        // exit path, including cancellation and unwinding.
        let answer = tokio::select! {
            d = approver.decide(&verdict) => Some(d),
            _ = cancel.cancelled() => None,
        };
        let Some(answer) = answer else {
            return cancelled(verdict);
        };
        debug!(tool_name = %tool, ?answer, "approval answered");

        let disposition = match answer {
            ApprovalDecision::Deny => Disposition::Denied,
            ApprovalDecision::ApproveOnce => Disposition::AllowedOnce,
            ApprovalDecision::ApproveSession => {
                session.insert(tool.to_string());
                Disposition::AllowedSession
            }
            ApprovalDecision::ApproveAlways => {
                session.insert(tool.to_string());
                Disposition::AllowedAlways
            }
        };
        let mut verdict = verdict;
        if disposition == Disposition::Denied {
            verdict.reason = format!("denied by user: {}", verdict.reason);
        }
        Authorization {
            disposition,
            verdict: Some(verdict),
        }
    }
}

fn cancelled(mut verdict: SafetyVerdict) -> Authorization {
    verdict.reason = "approval cancelled".to_string();
    Authorization {
        disposition: Disposition::Denied,
        verdict: Some(verdict),
    }
}
