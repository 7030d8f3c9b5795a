// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashSet;

use wren_config::{ApprovalMode, ToolTier};

/// Outcome of the tier/mode policy for one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// Run without asking anyone.
    Execute,
    /// A human has to decide.
    Ask,
    /// Refuse outright.
    HardDeny,
}

/// Pure policy decision.  First match wins:
///
/// 1. deny list → [`GateDecision::HardDeny`]
/// 2. allow list or session grant → [`GateDecision::Execute`]
/// 3. `Auto` → execute
/// 4. `AskForDangerous` → ask only for destructive tools
/// 5. `AskForWrites` / `Ask` → ask for anything at or above `Write`
pub fn decide(
    tool: &str,
    tier: ToolTier,
    mode: ApprovalMode,
    denied: &HashSet<String>,
    allowed: &HashSet<String>,
    session_allowed: &HashSet<String>,
) -> GateDecision {
    if denied.contains(tool) {
        return GateDecision::HardDeny;
    }
    if allowed.contains(tool) || session_allowed.contains(tool) {
        return GateDecision::Execute;
    }
    let ask = match mode {
        ApprovalMode::Auto => false,
        ApprovalMode::AskForDangerous => tier == ToolTier::Destructive,
        ApprovalMode::AskForWrites | ApprovalMode::Ask => tier >= ToolTier::Write,
    };
    if ask {
        GateDecision::Ask
    } else {
        GateDecision::Execute
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const TIERS: [ToolTier; 4] = [
        ToolTier::Read,
        ToolTier::Write,
        ToolTier::Execute,
        ToolTier::Destructive,
    ];
    const MODES: [ApprovalMode; 4] = [
        ApprovalMode::Auto,
        ApprovalMode::AskForDangerous,
        ApprovalMode::AskForWrites,
        ApprovalMode::Ask,
    ];

    fn set(names: &[&str]) -> HashSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn plain(tier: ToolTier, mode: ApprovalMode) -> GateDecision {
        decide("t", tier, mode, &set(&[]), &set(&[]), &set(&[]))
    }

    #[test]
    fn asking_is_monotonic_in_tier() {
        for mode in MODES {
            for (i, lo) in TIERS.iter().enumerate() {
                for hi in &TIERS[i + 1..] {
                    if plain(*lo, mode) == GateDecision::Ask {
                        assert_eq!(plain(*hi, mode), GateDecision::Ask, "{mode} {lo} -> {hi}");
                    }
                }
            }
        }
    }

    #[test]
    fn mode_table() {
        use GateDecision::{Ask, Execute};
        use ToolTier::{Destructive, Read, Write};
        assert_eq!(plain(Destructive, ApprovalMode::Auto), Execute);
        assert_eq!(plain(ToolTier::Execute, ApprovalMode::AskForDangerous), Execute);
        assert_eq!(plain(Destructive, ApprovalMode::AskForDangerous), Ask);
        assert_eq!(plain(Read, ApprovalMode::AskForWrites), Execute);
        assert_eq!(plain(Write, ApprovalMode::AskForWrites), Ask);
        assert_eq!(plain(Read, ApprovalMode::Ask), Execute);
        assert_eq!(plain(ToolTier::Execute, ApprovalMode::Ask), Ask);
    }

    #[test]
    fn denied_wins_over_allowed_and_session() {
        for mode in MODES {
            for tier in TIERS {
                let d = decide("x", tier, mode, &set(&["x"]), &set(&["x"]), &set(&["x"]));
                assert_eq!(d, GateDecision::HardDeny);
            }
        }
    }

    #[test]
    fn allowed_and_session_skip_asking() {
        let d = decide("x", ToolTier::Destructive, ApprovalMode::Ask, &set(&[]), &set(&["x"]), &set(&[]));
        assert_eq!(d, GateDecision::Execute);
        let d = decide("x", ToolTier::Destructive, ApprovalMode::Ask, &set(&[]), &set(&[]), &set(&["x"]));
        assert_eq!(d, GateDecision::Execute);
    }
}
