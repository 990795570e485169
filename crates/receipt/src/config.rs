//! Runtime configuration.
//!
//! Settings live in `<data_dir>/config.toml`. Every section and key is
//! optional; absent values fall back to the defaults below. A commented
//! default file is written the first time the data directory is created.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use receipt_common::paths;
use receipt_ledger::audit::audit_log_path;
use receipt_ledger::builder::DEFAULT_LATENCY_BUDGET;
use receipt_ledger::ledger::ledger_path;

const CONFIG_FILENAME: &str = "config.toml";

/// Default audit channel depth.
const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Default content for a freshly created config.toml.
const DEFAULT_CONFIG_TOML: &str = "\
# receipt configuration

[ledger]
# path = \"/custom/certificates.json\"

[keys]
# Use a hardware secure element when one is present.
prefer_hardware = true

[audit]
# log_path = \"/custom/receipt-audit.log\"
channel_capacity = 256

[builder]
# Advisory; builds over budget are logged, never rejected.
latency_budget_ms = 50
";

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    ledger: LedgerSection,
    keys: KeysSection,
    audit: AuditSection,
    builder: BuilderSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct LedgerSection {
    path: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct KeysSection {
    prefer_hardware: bool,
}

impl Default for KeysSection {
    fn default() -> Self {
        Self {
            prefer_hardware: true,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct AuditSection {
    log_path: Option<PathBuf>,
    channel_capacity: usize,
}

impl Default for AuditSection {
    fn default() -> Self {
        Self {
            log_path: None,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct BuilderSection {
    latency_budget_ms: Option<u64>,
}

/// Resolved configuration used at runtime.
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub ledger_path: PathBuf,
    pub keystore_dir: PathBuf,
    pub prefer_hardware: bool,
    pub audit_log_path: PathBuf,
    pub audit_channel_capacity: usize,
    pub latency_budget: Duration,
}

impl Config {
    /// Load `<data_dir>/config.toml`, or defaults when it is absent.
    pub fn load(data_dir: &Path) -> anyhow::Result<Self> {
        let path = config_path(data_dir);
        let file = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            parse(&raw).with_context(|| format!("invalid {}", path.display()))?
        } else {
            FileConfig::default()
        };
        Ok(Self::resolve(data_dir, file))
    }

    fn resolve(data_dir: &Path, file: FileConfig) -> Self {
        Self {
            data_dir: data_dir.to_path_buf(),
            ledger_path: file.ledger.path.unwrap_or_else(|| ledger_path(data_dir)),
            keystore_dir: paths::keystore_dir(data_dir),
            prefer_hardware: file.keys.prefer_hardware,
            audit_log_path: file
                .audit
                .log_path
                .unwrap_or_else(|| audit_log_path(data_dir)),
            audit_channel_capacity: file.audit.channel_capacity.max(1),
            latency_budget: file
                .builder
                .latency_budget_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_LATENCY_BUDGET),
        }
    }
}

fn parse(raw: &str) -> Result<FileConfig, toml::de::Error> {
    toml::from_str(raw)
}

pub fn config_path(data_dir: &Path) -> PathBuf {
    data_dir.join(CONFIG_FILENAME)
}

/// Ensure the data directory structure exists.
///
/// Creates the data directory, `keystore/`, `ledger/`, `logs/` and a
/// default `config.toml` if not already present.
pub fn ensure_data_dir(data_dir: &Path) -> anyhow::Result<()> {
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("creating data directory {}", data_dir.display()))?;

    for dir in [
        paths::keystore_dir(data_dir),
        paths::ledger_dir(data_dir),
        paths::log_dir(data_dir),
    ] {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("creating {}", dir.display()))?;
    }

    let config_path = config_path(data_dir);
    if !config_path.exists() {
        match std::fs::write(&config_path, DEFAULT_CONFIG_TOML) {
            Ok(()) => tracing::debug!(path = %config_path.display(), "Created default config"),
            Err(e) => tracing::warn!(
                path = %config_path.display(),
                error = %e,
                "Could not write default config"
            ),
        }
    }

    tracing::debug!(path = %data_dir.display(), "Data directory ready");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(name: &str) -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("receipt-config-{name}-{nanos}"))
    }

    #[test]
    fn default_config_is_valid_toml() {
        let parsed = parse(DEFAULT_CONFIG_TOML).unwrap();
        assert!(parsed.keys.prefer_hardware);
        assert_eq!(parsed.audit.channel_capacity, 256);
        assert_eq!(parsed.builder.latency_budget_ms, Some(50));
    }

    #[test]
    fn missing_file_resolves_to_data_dir_layout() {
        let dir = temp_dir("missing");
        let config = Config::load(&dir).unwrap();
        assert_eq!(config.ledger_path, ledger_path(&dir));
        assert_eq!(config.keystore_dir, paths::keystore_dir(&dir));
        assert_eq!(config.audit_log_path, audit_log_path(&dir));
        assert_eq!(config.latency_budget, DEFAULT_LATENCY_BUDGET);
        assert!(config.prefer_hardware);
    }

    #[test]
    fn overrides_are_applied() {
        let file = parse(
            r#"
            [ledger]
            path = "/srv/receipt/chain.json"
            [keys]
            prefer_hardware = false
            [audit]
            channel_capacity = 0
            [builder]
            latency_budget_ms = 120
            "#,
        )
        .unwrap();
        let config = Config::resolve(Path::new("/data"), file);
        assert_eq!(config.ledger_path, PathBuf::from("/srv/receipt/chain.json"));
        assert!(!config.prefer_hardware);
        assert_eq!(config.audit_channel_capacity, 1);
        assert_eq!(config.latency_budget, Duration::from_millis(120));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(parse("[ledger]\npaht = \"/typo\"\n").is_err());
    }

    #[test]
    fn ensure_data_dir_writes_default_config_once() {
        let dir = temp_dir("ensure");
        ensure_data_dir(&dir).unwrap();
        assert!(paths::keystore_dir(&dir).is_dir());
        assert!(paths::ledger_dir(&dir).is_dir());
        assert!(paths::log_dir(&dir).is_dir());

        std::fs::write(config_path(&dir), "[keys]\nprefer_hardware = false\n").unwrap();
        ensure_data_dir(&dir).unwrap();
        assert!(!Config::load(&dir).unwrap().prefer_hardware);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
