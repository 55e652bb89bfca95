//! Plugin manager
//!
//! Plugins run as independent background tasks for the whole scan. They
//! may push work into the queues at any point; cleanup blocks on them so
//! nothing they enqueue is lost.

pub mod path_seeder;

use crate::error::Result;
use crate::modules::{matches_all, AuditContext, Listing};
use async_trait::async_trait;
use regex::Regex;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Static description of a plugin
#[derive(Debug, Clone)]
pub struct PluginInfo {
    pub name: &'static str,
    pub description: &'static str,
    pub authors: &'static [&'static str],
}

/// Trait that all plugins implement
#[async_trait]
pub trait Plugin: Send + Sync {
    fn info(&self) -> PluginInfo;

    /// Runs for the duration of the scan; the returned value lands in the
    /// audit store's plugin results.
    async fn run(&self, ctx: AuditContext) -> Result<serde_json::Value>;
}

/// Runs plugins in the background and collects their results
pub struct PluginManager {
    plugins: Mutex<Vec<Arc<dyn Plugin>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    results: Arc<Mutex<serde_json::Map<String, serde_json::Value>>>,
}

impl PluginManager {
    pub fn new() -> Self {
        Self {
            plugins: Mutex::new(Vec::new()),
            handles: Mutex::new(Vec::new()),
            results: Arc::new(Mutex::new(serde_json::Map::new())),
        }
    }

    pub fn with_defaults() -> Self {
        let mut manager = Self::new();
        manager.register(Arc::new(path_seeder::PathSeeder));
        manager
    }

    pub fn register(&mut self, plugin: Arc<dyn Plugin>) {
        self.plugins
            .lock()
            .expect("plugins lock poisoned")
            .push(plugin);
    }

    pub fn available(&self) -> Vec<String> {
        self.plugins
            .lock()
            .expect("plugins lock poisoned")
            .iter()
            .map(|p| p.info().name.to_string())
            .collect()
    }

    /// Spawns every plugin as a background task
    pub fn run(&self, ctx: AuditContext) {
        let plugins: Vec<Arc<dyn Plugin>> =
            self.plugins.lock().expect("plugins lock poisoned").clone();
        let mut handles = self.handles.lock().expect("handles lock poisoned");
        for plugin in plugins {
            let ctx = ctx.clone();
            let results = Arc::clone(&self.results);
            let name = plugin.info().name;
            info!("starting plugin '{name}'");
            handles.push(tokio::spawn(async move {
                match plugin.run(ctx).await {
                    Ok(value) => {
                        results
                            .lock()
                            .expect("results lock poisoned")
                            .insert(name.to_string(), value);
                    }
                    Err(e) => error!("plugin '{name}' failed: {e}"),
                }
            }));
        }
    }

    /// Blocks until every plugin task has finished
    pub async fn block(&self) {
        let handles: Vec<JoinHandle<()>> = {
            let mut guard = self.handles.lock().expect("handles lock poisoned");
            std::mem::take(&mut *guard)
        };
        for handle in handles {
            if let Err(e) = handle.await {
                if e.is_panic() {
                    error!("plugin task panicked: {e}");
                }
            }
        }
    }

    /// Snapshot of collected plugin results
    pub fn results(&self) -> serde_json::Map<String, serde_json::Value> {
        self.results.lock().expect("results lock poisoned").clone()
    }

    /// Normalized listing filtered through all supplied patterns.
    ///
    /// Listing is one-shot: it drains the manager so a subsequent scan in
    /// the same process does not double-instantiate the plugins.
    pub fn list(&self, patterns: &[String]) -> Result<Vec<Listing>> {
        for pattern in patterns {
            Regex::new(pattern)?;
        }
        let drained: Vec<Arc<dyn Plugin>> = {
            let mut plugins = self.plugins.lock().expect("plugins lock poisoned");
            std::mem::take(&mut *plugins)
        };
        let mut out = Vec::new();
        for plugin in drained {
            let info = plugin.info();
            if !matches_all(info.name, patterns)? {
                continue;
            }
            out.push(Listing {
                name: info.name.to_string(),
                description: info.description.to_string(),
                author: info.authors.iter().map(|a| a.trim().to_string()).collect(),
                path: format!("plugins/{}", info.name),
            });
        }
        Ok(out)
    }
}

impl Default for PluginManager {
    fn default() -> Self {
        Self::with_defaults()
    }
}
