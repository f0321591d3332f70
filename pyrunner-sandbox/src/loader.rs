//! Runtime loader - one interpreter per host, packages on demand

use crate::error::SandboxError;
use crate::imports::Package;
use crate::runtime::{Interpreter, OutputSink, RunOutcome, Runtime};
use crate::Result;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell, RwLock};
use tracing::{debug, info, warn};

/// Result of a package load request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageLoad {
    /// Already recorded as loaded; nothing happened
    AlreadyLoaded,
    /// Loaded by this call
    Loaded,
}

/// Materializes the interpreter exactly once and tracks loaded packages.
///
/// Concurrent `load_core` callers share a single in-flight initialization, so a
/// host never spawns two interpreters. A failed initialization leaves the cell
/// empty.
pub struct RuntimeLoader {
    runtime: Arc<dyn Runtime>,
    sink: OutputSink,
    core: OnceCell<Mutex<Box<dyn Interpreter>>>,
    loaded: RwLock<HashSet<String>>,
}

impl RuntimeLoader {
    pub fn new(runtime: Arc<dyn Runtime>, sink: OutputSink) -> Self {
        Self {
            runtime,
            sink,
            core: OnceCell::new(),
            loaded: RwLock::new(HashSet::new()),
        }
    }

    /// Load the interpreter, or return the one already loaded
    pub async fn load_core(&self) -> Result<&Mutex<Box<dyn Interpreter>>> {
        self.core
            .get_or_try_init(|| async {
                info!(runtime = self.runtime.name(), "Loading interpreter");
                let interpreter = self.runtime.load(self.sink.clone()).await?;
                Ok::<_, SandboxError>(Mutex::new(interpreter))
            })
            .await
    }

    pub fn is_core_loaded(&self) -> bool {
        self.core.initialized()
    }

    pub async fn is_loaded(&self, package: &Package) -> bool {
        self.loaded.read().await.contains(&package.name)
    }

    /// Loaded package names, sorted
    pub async fn loaded_packages(&self) -> Vec<String> {
        let mut names: Vec<_> = self.loaded.read().await.iter().cloned().collect();
        names.sort();
        names
    }

    /// Load `package` unless it is already recorded as loaded
    pub async fn load_package(&self, package: &Package) -> Result<PackageLoad> {
        let core = self.core.get().ok_or(SandboxError::NotLoaded)?;

        // Holding the interpreter serializes loads, so the check below cannot race
        let mut interpreter = core.lock().await;
        if self.is_loaded(package).await {
            debug!(package = %package.name, "Package already loaded");
            return Ok(PackageLoad::AlreadyLoaded);
        }

        match interpreter.load_package(package).await {
            Ok(()) => {
                self.loaded.write().await.insert(package.name.clone());
                info!(package = %package.name, "Package loaded");
                Ok(PackageLoad::Loaded)
            }
            Err(e) => {
                warn!(package = %package.name, error = %e, "Package failed to load");
                Err(e)
            }
        }
    }

    /// Execute source on the loaded interpreter
    pub async fn run(&self, source: &str) -> Result<RunOutcome> {
        let core = self.core.get().ok_or(SandboxError::NotLoaded)?;
        let mut interpreter = core.lock().await;
        interpreter.run(source).await
    }
}
