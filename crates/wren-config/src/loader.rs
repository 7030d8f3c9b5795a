use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::debug;

use crate::Config;

/// Ordered list of config file locations searched from lowest to highest priority.
/// Later files override earlier ones.
fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("/etc/wren/config.toml")];

    if let Some(cfg) = dirs::config_dir() {
        paths.push(cfg.join("wren/config.toml"));
    }

    paths.push(PathBuf::from(".wren/config.toml"));
    paths.push(PathBuf::from("wren.toml"));

    paths
}

fn read_layer(path: &Path) -> anyhow::Result<toml::Value> {
    let text =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

/// Load configuration by merging all discovered TOML files.
/// `extra` is an explicit path (the `--config` flag) applied last; unlike
/// the search paths it must exist.
pub fn load(extra: Option<&Path>) -> anyhow::Result<Config> {
    let mut merged = toml::Value::Table(toml::map::Map::new());

    for path in config_search_paths() {
        if path.is_file() {
            debug!(path = %path.display(), "loading config layer");
            merge_toml(&mut merged, read_layer(&path)?);
        }
    }

    if let Some(p) = extra {
        debug!(path = %p.display(), "loading explicit config");
        merge_toml(&mut merged, read_layer(p)?);
    }

    let config: Config = merged.try_into().context("invalid configuration")?;
    config.validate()?;
    Ok(config)
}

/// Record `tool` in `permissions.allowed_tools` of the TOML file at `path`,
/// creating the file and the table when missing.  Other keys are preserved.
pub fn persist_allowed_tool(path: &Path, tool: &str) -> anyhow::Result<()> {
    let mut doc = if path.is_file() {
        read_layer(path)?
    } else {
        toml::Value::Table(toml::map::Map::new())
    };

    let root = doc
        .as_table_mut()
        .context("config root is not a table")?;
    let permissions = root
        .entry("permissions")
        .or_insert_with(|| toml::Value::Table(toml::map::Map::new()))
        .as_table_mut()
        .context("[permissions] is not a table")?;
    let allowed = permissions
        .entry("allowed_tools")
        .or_insert_with(|| toml::Value::Array(Vec::new()))
        .as_array_mut()
        .context("permissions.allowed_tools is not an array")?;

    if allowed.iter().any(|v| v.as_str() == Some(tool)) {
        return Ok(());
    }
    allowed.push(toml::Value::String(tool.to_string()));

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let text = toml::to_string_pretty(&doc).context("serialising config")?;
    std::fs::write(path, text).with_context(|| format!("writing {}", path.display()))?;
    debug!(path = %path.display(), tool, "persisted tool approval");
    Ok(())
}

/// Deep-merge `src` into `dst`; src wins on scalar conflicts.
fn merge_toml(dst: &mut toml::Value, src: toml::Value) {
    match (dst, src) {
        (toml::Value::Table(d), toml::Value::Table(s)) => {
            for (k, v) in s {
                let entry = d.entry(k).or_insert(toml::Value::Table(toml::map::Map::new()));
                merge_toml(entry, v);
            }
        }
        (dst, src) => *dst = src,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ApprovalMode;

    fn val(s: &str) -> toml::Value {
        toml::from_str(s).unwrap()
    }

    #[test]
    fn merge_scalar_src_wins() {
        let mut dst = val(r#"x = 1"#);
        merge_toml(&mut dst, val(r#"x = 2"#));
        assert_eq!(dst["x"].as_integer(), Some(2));
    }

    #[test]
    fn merge_nested_tables() {
        let mut dst = val(
            r#"[permissions]
mode = "ask"
denied_tools = ["bash"]"#,
        );
        merge_toml(
            &mut dst,
            val(r#"[permissions]
mode = "auto""#),
        );
        assert_eq!(dst["permissions"]["mode"].as_str(), Some("auto"));
        assert_eq!(dst["permissions"]["denied_tools"][0].as_str(), Some("bash"));
    }

    #[test]
    fn explicit_missing_path_is_error() {
        let result = load(Some(Path::new("/tmp/wren_nonexistent_config_xyz.toml")));
        assert!(result.is_err());
    }

    #[test]
    fn explicit_path_is_applied() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.toml");
        std::fs::write(&path, "[permissions]\nmode = \"auto\"\n").unwrap();
        let cfg = load(Some(&path)).unwrap();
        assert_eq!(cfg.permissions.mode, ApprovalMode::Auto);
    }

    #[test]
    fn invalid_server_list_fails_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.toml");
        std::fs::write(
            &path,
            r#"[[mcp.servers]]
name = "x"
timeout_secs = 0
transport = { type = "http", url = "http://localhost" }
"#,
        )
        .unwrap();
        assert!(load(Some(&path)).is_err());
    }

    #[test]
    fn persist_creates_file_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/wren.toml");
        persist_allowed_tool(&path, "write_file").unwrap();
        persist_allowed_tool(&path, "write_file").unwrap();
        persist_allowed_tool(&path, "bash").unwrap();

        let cfg: Config = toml::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(cfg.permissions.allowed_tools.len(), 2);
        assert!(cfg.permissions.allowed_tools.contains("write_file"));
        assert!(cfg.permissions.allowed_tools.contains("bash"));
    }

    #[test]
    fn persist_keeps_existing_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wren.toml");
        std::fs::write(&path, "[agent]\nmax_tool_rounds = 7\n").unwrap();
        persist_allowed_tool(&path, "read_file").unwrap();

        let cfg: Config = toml::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(cfg.agent.max_tool_rounds, 7);
        assert!(cfg.permissions.allowed_tools.contains("read_file"));
    }
}
