// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;

use wren_config::{PermissionsConfig, ToolTier};

/// Built-in classification by exact tool name.
const DEFAULT_TIERS: &[(&str, ToolTier)] = &[
    ("get_current_time", ToolTier::Read),
    ("read_file", ToolTier::Read),
    ("list_dir", ToolTier::Read),
    ("grep", ToolTier::Read),
    ("glob", ToolTier::Read),
    ("write_file", ToolTier::Write),
    ("edit_file", ToolTier::Write),
    ("bash", ToolTier::Execute),
    ("shell", ToolTier::Execute),
    ("sub_agent", ToolTier::Execute),
    ("delete_file", ToolTier::Destructive),
];

/// Resolves a tool name to its tier: override, then built-in default,
/// then the configured tier for unclassified tools.
#[derive(Debug, Clone)]
pub struct TierTable {
    overrides: HashMap<String, ToolTier>,
    unknown: ToolTier,
}

impl TierTable {
    pub fn new(overrides: HashMap<String, ToolTier>, unknown: ToolTier) -> Self {
        Self { overrides, unknown }
    }

    pub fn from_config(cfg: &PermissionsConfig) -> Self {
        Self::new(cfg.tier_overrides.clone(), cfg.external_default_tier)
    }

    pub fn builtin_tier(name: &str) -> Option<ToolTier> {
        DEFAULT_TIERS
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, t)| *t)
    }

    pub fn resolve(&self, name: &str) -> ToolTier {
        self.overrides
            .get(name)
            .copied()
            .or_else(|| Self::builtin_tier(name))
            .unwrap_or(self.unknown)
    }
}

impl Default for TierTable {
    fn default() -> Self {
        Self::new(HashMap::new(), ToolTier::Execute)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_defaults() {
        let t = TierTable::default();
        assert_eq!(t.resolve("read_file"), ToolTier::Read);
        assert_eq!(t.resolve("write_file"), ToolTier::Write);
        assert_eq!(t.resolve("bash"), ToolTier::Execute);
        assert_eq!(t.resolve("delete_file"), ToolTier::Destructive);
    }

    #[test]
    fn unknown_tool_uses_configured_tier_not_read() {
        assert_eq!(TierTable::default().resolve("mcp_fetch"), ToolTier::Execute);
        let t = TierTable::new(HashMap::new(), ToolTier::Destructive);
        assert_eq!(t.resolve("mcp_fetch"), ToolTier::Destructive);
    }

    #[test]
    fn override_beats_builtin() {
        let t = TierTable::new(
            HashMap::from([("read_file".to_string(), ToolTier::Write)]),
            ToolTier::Execute,
        );
        assert_eq!(t.resolve("read_file"), ToolTier::Write);
    }
}
