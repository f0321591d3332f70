//! Static import scanning
//!
//! Decides which extra packages to load before a run by matching import-like
//! lines in the submitted source. This is a best-effort text heuristic: an
//! import inside a string literal still matches, and dynamic imports
//! (`__import__`, `importlib`) are never seen.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::OnceLock;

/// A loadable package: the distribution name and the module it provides
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Package {
    /// Distribution name, used for installation and status messages
    pub name: String,
    /// Top-level import name
    pub module: String,
}

impl Package {
    pub fn new(module: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            name: name.into(),
        }
    }
}

/// Known packages that warrant an on-demand load, keyed by import name.
///
/// Modules outside the catalog (the standard library, the user's own names)
/// never trigger a load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageCatalog {
    entries: BTreeMap<String, String>,
}

const DEFAULT_PACKAGES: &[(&str, &str)] = &[
    ("numpy", "numpy"),
    ("pandas", "pandas"),
    ("matplotlib", "matplotlib"),
    ("scipy", "scipy"),
    ("sklearn", "scikit-learn"),
    ("sympy", "sympy"),
    ("networkx", "networkx"),
    ("PIL", "pillow"),
    ("bs4", "beautifulsoup4"),
    ("yaml", "pyyaml"),
    ("requests", "requests"),
    ("regex", "regex"),
];

impl Default for PackageCatalog {
    fn default() -> Self {
        Self {
            entries: DEFAULT_PACKAGES
                .iter()
                .map(|(module, name)| (module.to_string(), name.to_string()))
                .collect(),
        }
    }
}

impl PackageCatalog {
    /// An empty catalog; nothing is ever loaded on demand
    pub fn empty() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Add or replace entries (import name -> distribution name)
    pub fn with_entries<I, K, V>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.entries
            .extend(entries.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Look up the package providing a top-level module
    pub fn resolve(&self, module: &str) -> Option<Package> {
        self.entries
            .get(module)
            .map(|name| Package::new(module, name.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Packages referenced by `source`, deduplicated, in first-seen order
    pub fn scan(&self, source: &str) -> Vec<Package> {
        let mut seen = HashSet::new();
        imported_modules(source)
            .into_iter()
            .filter_map(|module| self.resolve(&module))
            .filter(|package| seen.insert(package.name.clone()))
            .collect()
    }
}

fn import_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*import\s+(.+)$").expect("import pattern is valid"))
}

fn from_import_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*from\s+([A-Za-z_][\w.]*)\s+import\b").expect("from pattern is valid")
    })
}

/// Top-level module names that appear in import statements, in order
pub fn imported_modules(source: &str) -> Vec<String> {
    let mut modules = Vec::new();

    for line in source.lines() {
        let code = line.split('#').next().unwrap_or_default();
        for statement in code.split(';') {
            if let Some(caps) = from_import_re().captures(statement) {
                modules.push(top_level(&caps[1]));
            } else if let Some(caps) = import_re().captures(statement) {
                for clause in caps[1].split(',') {
                    let target = clause.split_whitespace().next().unwrap_or_default();
                    let target = target.trim_matches(|c| c == '(' || c == ')');
                    if !target.is_empty() {
                        modules.push(top_level(target));
                    }
                }
            }
        }
    }

    modules
}

fn top_level(dotted: &str) -> String {
    dotted.split('.').next().unwrap_or(dotted).to_string()
}
