// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Approval prompts answered by a remote UI.
//!
//! The agent side posts an [`ApprovalPrompt`] on an mpsc channel and waits;
//! the UI answers with [`RemoteApprovalChannel::resolve`].  Unanswered
//! prompts expire and count as a denial.
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::gate::{ApprovalDecision, ApprovalHandler, SafetyVerdict};

/// A pending question for the UI.
#[derive(Debug, Clone)]
pub struct ApprovalPrompt {
    pub id: Uuid,
    pub verdict: SafetyVerdict,
}

type Pending = HashMap<Uuid, oneshot::Sender<ApprovalDecision>>;

#[derive(Clone)]
pub struct RemoteApprovalChannel {
    outbox: mpsc::Sender<ApprovalPrompt>,
    pending: Arc<Mutex<Pending>>,
    timeout: Duration,
}

impl RemoteApprovalChannel {
    /// Create the channel and the receiver the UI reads prompts from.
    pub fn new(timeout: Duration) -> (Self, mpsc::Receiver<ApprovalPrompt>) {
        let (outbox, inbox) = mpsc::channel(16);
        let chan = Self {
            outbox,
            pending: Arc::new(Mutex::new(HashMap::new())),
            timeout,
        };
        (chan, inbox)
    }

    fn pending(&self) -> MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Deliver the UI's answer.  Returns `false` when the prompt is unknown,
    /// typically because it already expired.
    pub fn resolve(&self, id: Uuid, decision: ApprovalDecision) -> bool {
        match self.pending().remove(&id) {
            Some(tx) => tx.send(decision).is_ok(),
            None => {
                debug!(%id, "approval answer for unknown or expired prompt");
                false
            }
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending().len()
    }
}

#[async_trait]
impl ApprovalHandler for RemoteApprovalChannel {
    async fn decide(&self, verdict: &SafetyVerdict) -> ApprovalDecision {
        let id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        self.pending().insert(id, tx);

        let prompt = ApprovalPrompt {
            id,
            verdict: verdict.clone(),
        };
        if self.outbox.send(prompt).await.is_err() {
            self.pending().remove(&id);
            warn!(tool_name = %verdict.tool_name, "approval UI is gone; denying");
            return ApprovalDecision::Deny;
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(decision)) => decision,
            Ok(Err(_)) => ApprovalDecision::Deny,
            Err(_) => {
                self.pending().remove(&id);
                warn!(
                    tool_name = %verdict.tool_name,
                    timeout_secs = self.timeout.as_secs(),
                    "approval request timed out; denying"
                );
                ApprovalDecision::Deny
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wren_config::ToolTier;

    use super::*;

    fn verdict() -> SafetyVerdict {
        SafetyVerdict {
            needs_approval: true,
            hard_denied: false,
            reason: "write".into(),
            tool_name: "write_file".into(),
            details: vec![],
            is_hard_blocked: false,
            tier: ToolTier::Write,
            arguments: json!({}),
        }
    }

    #[tokio::test]
    async fn ui_answer_is_returned() {
        let (chan, mut inbox) = RemoteApprovalChannel::new(Duration::from_secs(5));
        let ui = chan.clone();
        tokio::spawn(async move {
            let prompt = inbox.recv().await.unwrap();
            assert_eq!(prompt.verdict.tool_name, "write_file");
            assert!(ui.resolve(prompt.id, ApprovalDecision::ApproveSession));
        });
        assert_eq!(chan.decide(&verdict()).await, ApprovalDecision::ApproveSession);
        assert_eq!(chan.pending_count(), 0);
    }

    #[tokio::test]
    async fn timeout_denies_and_discards_prompt() {
        let (chan, mut inbox) = RemoteApprovalChannel::new(Duration::from_millis(30));
        let decision = chan.decide(&verdict()).await;
        assert_eq!(decision, ApprovalDecision::Deny);
        assert_eq!(chan.pending_count(), 0);

        let late = inbox.recv().await.unwrap();
        assert!(!chan.resolve(late.id, ApprovalDecision::ApproveOnce));
    }

    #[tokio::test]
    async fn closed_ui_denies() {
        let (chan, inbox) = RemoteApprovalChannel::new(Duration::from_secs(5));
        drop(inbox);
        assert_eq!(chan.decide(&verdict()).await, ApprovalDecision::Deny);
        assert_eq!(chan.pending_count(), 0);
    }
}
