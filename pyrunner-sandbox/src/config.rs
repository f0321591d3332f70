//! Sandbox configuration
//!
//! One configuration surface per lesson: which packages to preload, the default
//! source, the time budgets, extra import-to-package mappings and the quick-load
//! examples offered next to the editor.

use crate::error::SandboxError;
use crate::imports::{Package, PackageCatalog};
use crate::limits::Timeouts;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding the interpreter path
pub const ENV_INTERPRETER: &str = "PYRUNNER_INTERPRETER";
/// Environment variable overriding the init budget (humantime, e.g. `90s`)
pub const ENV_INIT_TIMEOUT: &str = "PYRUNNER_INIT_TIMEOUT";
/// Environment variable overriding the run budget (humantime, e.g. `5s`)
pub const ENV_RUN_TIMEOUT: &str = "PYRUNNER_RUN_TIMEOUT";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Interpreter to launch (None = discover `python3`/`python` on PATH)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interpreter: Option<PathBuf>,

    /// Try `pip install` when a requested package cannot be imported
    pub install_missing: bool,

    /// Import names loaded during initialization
    pub preload: Vec<String>,

    /// Source shown in the editor before the user types anything
    pub default_source: String,

    pub timeouts: Timeouts,

    /// Extra catalog entries (import name -> package name)
    pub packages: BTreeMap<String, String>,

    /// Quick-load snippets by name
    pub examples: BTreeMap<String, String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            interpreter: None,
            install_missing: false,
            preload: Vec::new(),
            default_source: "print('Hello, Python!')".to_string(),
            timeouts: Timeouts::default(),
            packages: BTreeMap::new(),
            examples: default_examples(),
        }
    }
}

fn default_examples() -> BTreeMap<String, String> {
    [
        ("hello", "print('Hello, Python!')"),
        (
            "loop",
            "for i in range(1, 6):\n    print(f'Line {i}')\n'done'",
        ),
        (
            "fibonacci",
            "def fib(n):\n    a, b = 0, 1\n    for _ in range(n):\n        a, b = b, a + b\n    return a\n\n[fib(i) for i in range(10)]",
        ),
        ("syntax-error", "x = 3\nif x = 3\nprint('equal')"),
        (
            "pandas",
            "import pandas as pd\ndf = pd.DataFrame({'name': ['Ada', 'Linus'], 'score': [92, 87]})\nprint(df)\ndf['score'].mean()",
        ),
    ]
    .into_iter()
    .map(|(name, source)| (name.to_string(), source.to_string()))
    .collect()
}

impl SandboxConfig {
    /// Load configuration from the default location, falling back to defaults
    /// when no file exists, then apply environment overrides
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            Self::load_from(&path)?
        } else {
            Self::default()
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            SandboxError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config = Self::from_toml(&content)?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| SandboxError::Config(format!("Failed to parse config: {}", e)))
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| SandboxError::Config(format!("Failed to serialize config: {}", e)))
    }

    /// Save configuration to a file, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                SandboxError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }
        std::fs::write(path, self.to_toml()?)
            .map_err(|e| SandboxError::Config(format!("Failed to write config: {}", e)))
    }

    /// `~/.config/pyrunner/config.toml`
    pub fn config_path() -> Result<PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| SandboxError::Config("Cannot determine home directory".to_string()))?;
        Ok(home.join(".config").join("pyrunner").join("config.toml"))
    }

    /// Environment variables take precedence over the file
    pub fn apply_env(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var(ENV_INTERPRETER) {
            if !path.trim().is_empty() {
                self.interpreter = Some(PathBuf::from(path));
            }
        }
        if let Ok(value) = std::env::var(ENV_INIT_TIMEOUT) {
            self.timeouts.init = parse_duration(ENV_INIT_TIMEOUT, &value)?;
        }
        if let Ok(value) = std::env::var(ENV_RUN_TIMEOUT) {
            self.timeouts.run = parse_duration(ENV_RUN_TIMEOUT, &value)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.timeouts.validate()?;
        if let Some(name) = self.preload.iter().find(|name| name.trim().is_empty()) {
            return Err(SandboxError::Config(format!(
                "preload entry {:?} is empty",
                name
            )));
        }
        Ok(())
    }

    /// Default catalog extended with the configured entries
    pub fn catalog(&self) -> PackageCatalog {
        PackageCatalog::default().with_entries(self.packages.clone())
    }

    /// Packages to load during initialization. Names outside the catalog are
    /// loaded under their own name.
    pub fn preload_packages(&self) -> Vec<Package> {
        let catalog = self.catalog();
        self.preload
            .iter()
            .map(|module| {
                catalog
                    .resolve(module)
                    .unwrap_or_else(|| Package::new(module.as_str(), module.as_str()))
            })
            .collect()
    }

    /// Source of a quick-load example
    pub fn example(&self, name: &str) -> Option<&str> {
        self.examples.get(name).map(String::as_str)
    }
}

/// Parse a humantime duration such as `15s` or `2m 30s`
pub fn parse_duration(key: &str, value: &str) -> Result<Duration> {
    humantime_serde::re::humantime::parse_duration(value.trim())
        .map_err(|e| SandboxError::Config(format!("{}: invalid duration {:?}: {}", key, value, e)))
}
