use crate::checks::{all_checks, CheckDef};
use crate::query::QueryLimits;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Scan configuration loaded from `iacgraph.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ScanConfig {
    /// Glob patterns of paths to skip during discovery.
    #[serde(default)]
    pub exclude: Vec<String>,

    #[serde(default)]
    pub limits: QueryLimits,

    #[serde(default)]
    pub scan: ScanSettings,

    #[serde(default)]
    pub checks: CheckSelection,

    #[serde(default)]
    pub backend: BackendConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanSettings {
    /// Units compiled in parallel.
    pub workers: usize,

    /// Wall-clock budget per scan unit.
    pub timeout_secs: u64,

    /// Fail a unit on names that resolve to nothing.
    pub strict_references: bool,

    /// Compile all templates as one namespace group.
    pub group_templates: bool,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            timeout_secs: 30,
            strict_references: true,
            group_templates: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CheckSelection {
    /// Check ids to run. Empty means every check.
    #[serde(default)]
    pub enabled: Vec<String>,

    /// Check ids to skip.
    #[serde(default)]
    pub disabled: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Memory,
    Snapshot,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BackendConfig {
    #[serde(default)]
    pub kind: BackendKind,

    /// Where snapshot files go. Defaults to a directory under the system temp dir.
    pub snapshot_dir: Option<PathBuf>,
}

impl BackendConfig {
    pub fn snapshot_dir(&self) -> PathBuf {
        self.snapshot_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("iacgraph-snapshots"))
    }
}

impl ScanConfig {
    /// Reject settings a scan cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.scan.workers == 0 {
            anyhow::bail!("[scan].workers must be at least 1");
        }
        if self.scan.timeout_secs == 0 {
            anyhow::bail!("[scan].timeout_secs must be at least 1");
        }
        if self.limits.resolve_hops == 0 || self.limits.search_hops == 0 {
            anyhow::bail!("[limits] hop budgets must be at least 1");
        }
        for (list, ids) in [
            ("enabled", &self.checks.enabled),
            ("disabled", &self.checks.disabled),
        ] {
            for id in ids {
                if all_checks().iter().any(|c| c.id == id) {
                    continue;
                }
                match suggest_check(id) {
                    Some(known) => anyhow::bail!(
                        "Unknown check '{}' in [checks].{} (did you mean '{}'?)",
                        id,
                        list,
                        known
                    ),
                    None => anyhow::bail!("Unknown check '{}' in [checks].{}", id, list),
                }
            }
        }
        Ok(())
    }

    /// Checks to run, in catalogue order.
    pub fn selected_checks(&self) -> Vec<&'static CheckDef> {
        all_checks()
            .into_iter()
            .filter(|c| {
                self.checks.enabled.is_empty() || self.checks.enabled.iter().any(|id| id == c.id)
            })
            .filter(|c| !self.checks.disabled.iter().any(|id| id == c.id))
            .collect()
    }
}

/// Closest known check id to a misspelled one.
pub fn suggest_check(id: &str) -> Option<&'static str> {
    let mut best_match = None;
    let mut best_distance = usize::MAX;

    for check in all_checks() {
        let dist = strsim::damerau_levenshtein(id, check.id);
        if dist < best_distance && dist <= 3 && dist > 0 {
            best_distance = dist;
            best_match = Some(check.id);
        }
    }
    best_match
}

/// Load scan configuration from a TOML file.
pub fn load_config(path: &Path) -> anyhow::Result<ScanConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path.display(), e))?;
    let config: ScanConfig = toml::from_str(&content)
        .map_err(|e| anyhow::anyhow!("Failed to parse config file '{}': {}", path.display(), e))?;
    config.validate()?;
    Ok(config)
}

/// Generate a default configuration file.
pub fn generate_default_config() -> String {
    r#"# iacgraph scan configuration

# Glob patterns skipped during template discovery
exclude = ["**/node_modules/**", "**/cdk.out/**"]

[limits]
# Hops followed when resolving a value through functions and references
resolve_hops = 8

# Hops searched below a resource for nested properties
search_hops = 6

[scan]
# Parallel compile workers (defaults to the number of CPUs)
# workers = 8

# Per-unit timeout; checks of a unit that runs out of time report UNKNOWN
timeout_secs = 30

# Fail a template on references to undeclared names
strict_references = true

# Compile every template into one namespace (nested stacks, shared parameters)
group_templates = false

[checks]
# Run only these checks (empty runs every check)
enabled = []

# Never run these checks
disabled = []

[backend]
# "memory" or "snapshot" (graphs written to disk and queried from there)
kind = "memory"
# snapshot_dir = ".iacgraph/snapshots"
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_parses() {
        let config: ScanConfig = toml::from_str(&generate_default_config()).unwrap();
        config.validate().unwrap();
        assert_eq!(config.limits, QueryLimits::default());
        assert_eq!(config.scan.timeout_secs, 30);
        assert!(config.scan.strict_references);
        assert!(config.scan.workers >= 1);
        assert_eq!(config.backend.kind, BackendKind::Memory);
        assert_eq!(config.exclude.len(), 2);
    }

    #[test]
    fn test_load_partial_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[scan]
timeout_secs = 5

[checks]
disabled = ["s3.object_lock_disabled"]

[backend]
kind = "snapshot"
snapshot_dir = "/tmp/snapshots"
"#
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.scan.timeout_secs, 5);
        assert!(!config.scan.group_templates);
        assert_eq!(config.limits.resolve_hops, 8);
        assert_eq!(config.backend.kind, BackendKind::Snapshot);
        assert_eq!(config.backend.snapshot_dir(), PathBuf::from("/tmp/snapshots"));
        assert_eq!(config.selected_checks().len(), all_checks().len() - 1);
    }

    #[test]
    fn test_unknown_check_is_rejected_with_suggestion() {
        let config = ScanConfig {
            checks: CheckSelection {
                enabled: vec!["ec2.unrestricted_port".into()],
                ..Default::default()
            },
            ..Default::default()
        };
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("did you mean 'ec2.unrestricted_ports'"), "{}", err);

        let config = ScanConfig {
            checks: CheckSelection {
                disabled: vec!["nothing.like.this".into()],
                ..Default::default()
            },
            ..Default::default()
        };
        let err = config.validate().unwrap_err().to_string();
        assert!(!err.contains("did you mean"));
    }

    #[test]
    fn test_enabled_checks_keep_catalogue_order() {
        let config = ScanConfig {
            checks: CheckSelection {
                enabled: vec!["s3.encryption_disabled".into(), "ec2.unrestricted_cidrs".into()],
                disabled: vec!["s3.encryption_disabled".into()],
            },
            ..Default::default()
        };
        let ids: Vec<&str> = config.selected_checks().iter().map(|c| c.id).collect();
        assert_eq!(ids, vec!["ec2.unrestricted_cidrs"]);
    }

    #[test]
    fn test_invalid_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = load_config(&dir.path().join("iacgraph.toml")).unwrap_err();
        assert!(missing.to_string().contains("Failed to read config file"));

        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[scan]\nworkers = 0\n").unwrap();
        assert!(load_config(&path).unwrap_err().to_string().contains("workers"));
    }
}
