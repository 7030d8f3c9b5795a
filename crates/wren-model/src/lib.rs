// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod types;
mod provider;
mod mock;
mod yaml_mock;

use std::sync::Arc;

pub use types::*;
pub use provider::{ModelProvider, ResponseStream};
pub use mock::{tool_call_events, MockProvider, ScriptedMockProvider};
pub use yaml_mock::YamlMockProvider;

use anyhow::{bail, Context};
use wren_config::ModelConfig;

/// Construct a shared [`ModelProvider`] from configuration.
///
/// - `"mock"` → [`YamlMockProvider`] when a responses file is configured
///   (or `WREN_MOCK_RESPONSES` is set), otherwise [`MockProvider`] (echo-back)
/// - `"yaml-mock"` → [`YamlMockProvider`]; a responses file is required
pub fn from_config(cfg: &ModelConfig) -> anyhow::Result<Arc<dyn ModelProvider>> {
    let responses_path = std::env::var("WREN_MOCK_RESPONSES")
        .ok()
        .or_else(|| cfg.mock_responses_file.clone());
    match cfg.provider.as_str() {
        "mock" => match responses_path {
            Some(path) => Ok(Arc::new(YamlMockProvider::from_file(&path)?)),
            None => Ok(Arc::new(MockProvider)),
        },
        "yaml-mock" => {
            let path = responses_path
                .context("provider \"yaml-mock\" needs model.mock_responses_file")?;
            Ok(Arc::new(YamlMockProvider::from_file(&path)?))
        }
        other => bail!("unknown model provider: {other}"),
    }
}
