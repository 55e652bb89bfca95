//! Wordlist-driven URL seeding plugin

use crate::error::Result;
use crate::modules::AuditContext;
use crate::plugins::{Plugin, PluginInfo};
use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, info};
use url::Url;

/// Pushes URLs derived from a wordlist into the audit queue.
///
/// Lines are joined against the target; comments and blanks are skipped.
pub struct PathSeeder;

#[async_trait]
impl Plugin for PathSeeder {
    fn info(&self) -> PluginInfo {
        PluginInfo {
            name: "path_seeder",
            description: "Seeds the URL queue with paths from a wordlist",
            authors: &["skopos team"],
        }
    }

    async fn run(&self, ctx: AuditContext) -> Result<serde_json::Value> {
        let Some(wordlist) = ctx.options.wordlist_path.clone() else {
            return Ok(json!({ "seeded": 0 }));
        };
        let base = Url::parse(&ctx.options.target)?;

        let content = tokio::fs::read_to_string(&wordlist).await?;
        let mut seeded = 0u64;
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match base.join(line) {
                Ok(url) => {
                    ctx.push_url(url.to_string());
                    seeded += 1;
                }
                Err(e) => debug!("skipping wordlist entry '{line}': {e}"),
            }
        }

        info!("path seeder pushed {seeded} URLs from {wordlist}");
        Ok(json!({ "seeded": seeded, "wordlist": wordlist }))
    }
}
