use anyhow::{Context, Result};
use bondtun_core::TunnelConfig;
use directories::ProjectDirs;
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_FILE_NAME: &str = "bondtun.toml";

pub fn default_config_path() -> Result<PathBuf> {
    let proj = ProjectDirs::from("io", "bondtun", "bondtun")
        .context("could not determine platform config directory")?;
    Ok(proj.config_dir().join(CONFIG_FILE_NAME))
}

pub fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create config directory: {}", parent.display()))?;
    }
    Ok(())
}

pub fn load(path: &Path) -> Result<TunnelConfig> {
    if !path.exists() {
        return Ok(TunnelConfig::default());
    }
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config: {}", path.display()))?;
    let cfg: TunnelConfig = toml::from_str(&raw)
        .with_context(|| format!("failed to parse TOML: {}", path.display()))?;
    Ok(cfg)
}

pub fn save(path: &Path, cfg: &TunnelConfig, overwrite: bool) -> Result<()> {
    if path.exists() && !overwrite {
        anyhow::bail!(
            "config already exists at {} (use --force to overwrite)",
            path.display()
        );
    }
    ensure_parent_dir(path)?;
    let raw = toml::to_string_pretty(cfg).context("failed to serialize config to TOML")?;
    fs::write(path, raw).with_context(|| format!("failed to write config: {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_config_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.toml");
        let cfg = load(&path).unwrap();
        assert_eq!(cfg.base_port, TunnelConfig::default().base_port);
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bondtun.toml");

        let mut cfg = TunnelConfig::default();
        cfg.channels = 4;
        cfg.peer = Some("198.51.100.9".parse().unwrap());
        save(&path, &cfg, false).unwrap();

        // A second save without --force refuses to clobber.
        assert!(save(&path, &cfg, false).is_err());

        let back = load(&path).unwrap();
        assert_eq!(back.channels, 4);
        assert_eq!(back.peer, cfg.peer);
    }
}
