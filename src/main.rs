//! Skopos - Web Application Security Audit Framework CLI

use clap::{Parser, Subcommand};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use skopos::engine::AuditEngine;
use skopos::issue::Severity;
use skopos::modules::{Listing, ModuleRegistry};
use skopos::options::{Options, RedundancyRule};
use skopos::plugins::PluginManager;
use skopos::report::ReportManager;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Skopos - Web Application Security Audit Framework
#[derive(Parser)]
#[command(name = "skopos", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a security audit against a target
    Scan {
        /// Target URL to audit
        #[arg(short, long)]
        target: String,

        /// Audit only these paths; the spider never runs
        #[arg(long, value_delimiter = ',')]
        restrict_path: Option<Vec<String>>,

        /// Do not audit link elements
        #[arg(long)]
        skip_links: bool,

        /// Do not audit form elements
        #[arg(long)]
        skip_forms: bool,

        /// Do not audit cookie elements
        #[arg(long)]
        skip_cookies: bool,

        /// Do not audit header elements
        #[arg(long)]
        skip_headers: bool,

        /// Defer HTTP harvesting until whole URL batches are enqueued
        #[arg(long)]
        harvest_last: bool,

        /// Cookies as "k1=v1;k2=v2"
        #[arg(long)]
        cookie_string: Option<String>,

        /// Netscape-format cookie jar file
        #[arg(long)]
        cookie_jar: Option<PathBuf>,

        /// Custom User-Agent value
        #[arg(long)]
        user_agent: Option<String>,

        /// Record who authorized the scan in the user agent
        #[arg(long)]
        authed_by: Option<String>,

        /// Redundancy rule as "regex:count" (repeatable)
        #[arg(long)]
        redundant: Option<Vec<String>>,

        /// Concurrent HTTP request cap
        #[arg(long, default_value_t = 20)]
        http_req_limit: usize,

        /// Request timeout in seconds
        #[arg(long, default_value_t = 30)]
        timeout: u64,

        /// Maximum crawl depth
        #[arg(long, default_value_t = 3)]
        depth: u32,

        /// Maximum URLs the spider may discover
        #[arg(long, default_value_t = 500)]
        link_count: usize,

        /// Wordlist for the path seeder plugin
        #[arg(short, long)]
        wordlist: Option<String>,

        /// HTTP/HTTPS proxy URL
        #[arg(long)]
        proxy: Option<String>,

        /// Custom headers (format: "Key: Value")
        #[arg(short = 'H', long)]
        header: Option<Vec<String>>,

        /// Report output path
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Only print positives while scanning
        #[arg(long)]
        only_positives: bool,

        /// Exit with code 1 at or above this severity (critical, high, medium, low, info)
        #[arg(long)]
        fail_on: Option<String>,

        /// Path to a TOML configuration profile
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// List available audit modules, filtered by regex patterns (all must match)
    Modules {
        patterns: Vec<String>,
    },

    /// List available report formatters, filtered by regex patterns (all must match)
    Reports {
        patterns: Vec<String>,
    },

    /// List available plugins, filtered by regex patterns (all must match)
    Plugins {
        patterns: Vec<String>,
    },
}

fn print_banner() {
    let banner = format!(
        r#"
    ╔══════════════════════════════════════╗
    ║  ⌖ SKOPOS v{:<8}                  ║
    ║  Web Application Audit Framework     ║
    ╚══════════════════════════════════════╝
    "#,
        skopos::VERSION
    );
    println!("{}", banner.cyan());
}

fn init_tracing(verbose: bool) {
    let filter = if verbose { "skopos=debug" } else { "skopos=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();
}

fn print_listings(title: &str, listings: &[Listing]) {
    println!("  {}\n", title.bold());
    for listing in listings {
        println!(
            "    {} {}",
            format!("{:20}", listing.name).cyan().bold(),
            listing.description
        );
        println!(
            "    {:20} by {} ({})",
            "",
            listing.author.join(", "),
            listing.path
        );
    }
    println!();
}

fn parse_redundancy_rules(raw: &[String]) -> Vec<RedundancyRule> {
    raw.iter()
        .filter_map(|entry| {
            let (pattern, count) = entry.rsplit_once(':')?;
            let count: u64 = count.parse().ok()?;
            Some(RedundancyRule::new(pattern, count))
        })
        .collect()
}

fn fail_on_severity(threshold: &str) -> Option<Severity> {
    match threshold.to_lowercase().as_str() {
        "critical" => Some(Severity::Critical),
        "high" => Some(Severity::High),
        "medium" => Some(Severity::Medium),
        "low" => Some(Severity::Low),
        "info" => Some(Severity::Info),
        _ => {
            eprintln!(
                "  {} Invalid --fail-on value: '{}'. Use: critical, high, medium, low, info",
                "Error:".red().bold(),
                threshold
            );
            None
        }
    }
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Scan {
            target,
            restrict_path,
            skip_links,
            skip_forms,
            skip_cookies,
            skip_headers,
            harvest_last,
            cookie_string,
            cookie_jar,
            user_agent,
            authed_by,
            redundant,
            http_req_limit,
            timeout,
            depth,
            link_count,
            wordlist,
            proxy,
            header,
            output,
            only_positives,
            fail_on,
            config,
            verbose,
        } => {
            init_tracing(verbose);
            print_banner();

            let mut options = if let Some(path) = &config {
                Options::from_file(path)?
            } else {
                Options::default()
            };

            options.target = target;
            if let Some(paths) = restrict_path {
                options.restrict_paths = paths;
            }
            options.audit_links = !skip_links && options.audit_links;
            options.audit_forms = !skip_forms && options.audit_forms;
            options.audit_cookies = !skip_cookies && options.audit_cookies;
            options.audit_headers = !skip_headers && options.audit_headers;
            if harvest_last {
                options.http_harvest_last = true;
            }
            options.cookie_string = cookie_string;
            options.cookie_jar = cookie_jar;
            if let Some(ua) = user_agent {
                options.user_agent = ua;
            }
            options.authed_by = authed_by;
            if let Some(rules) = redundant {
                options.redundant = parse_redundancy_rules(&rules);
            }
            options.http_req_limit = http_req_limit;
            options.timeout_secs = timeout;
            options.depth_limit = depth;
            options.link_count_limit = link_count;
            if let Some(wordlist) = wordlist {
                options.wordlist_path = Some(wordlist);
            }
            if let Some(proxy) = proxy {
                options.proxy = Some(proxy);
            }
            if let Some(headers) = header {
                for h in headers {
                    if let Some((key, value)) = h.split_once(':') {
                        options
                            .custom_headers
                            .insert(key.trim().to_string(), value.trim().to_string());
                    }
                }
            }
            if let Some(output) = output {
                options.report_path = Some(output);
            }
            if only_positives {
                options.only_positives = true;
            }

            println!("  {} {}", "Target:".bold(), options.target.green());
            println!(
                "  {} {}",
                "Request limit:".bold(),
                options.http_req_limit.to_string().cyan()
            );
            if !options.restrict_paths.is_empty() {
                println!(
                    "  {} {}",
                    "Restricted to:".bold(),
                    options.restrict_paths.join(", ").cyan()
                );
            }
            println!();

            let engine = Arc::new(AuditEngine::new(options)?);

            let ticker = {
                let engine = Arc::clone(&engine);
                tokio::spawn(async move {
                    let pb = ProgressBar::new(100);
                    pb.set_style(
                        ProgressStyle::default_bar()
                            .template("  {spinner:.cyan} [{bar:40.cyan/blue}] {pos}% {msg}")
                            .unwrap_or_else(|_| ProgressStyle::default_bar())
                            .progress_chars("=>-"),
                    );
                    loop {
                        let stats = engine.stats(Some(2), false);
                        pb.set_position(stats.progress as u64);
                        pb.set_message(format!(
                            "{} | eta {}",
                            stats.current_url, stats.eta
                        ));
                        if engine.state() == skopos::engine::State::Done {
                            break;
                        }
                        tokio::time::sleep(std::time::Duration::from_millis(500)).await;
                    }
                    pb.finish_and_clear();
                })
            };

            engine.run(None).await?;
            let _ = ticker.await;

            let stats = engine.stats(None, true);
            println!(
                "\n  {} {} requests, {} responses, {:.1}s",
                "Totals:".bold(),
                stats.requests,
                stats.responses,
                stats.time
            );

            if let Some(threshold) = fail_on {
                if let Some(threshold_sev) = fail_on_severity(&threshold) {
                    let store = engine.audit_store(false)?;
                    let tripped = store.issues.iter().any(|i| i.severity <= threshold_sev);
                    if tripped {
                        println!(
                            "\n  {} Issues at or above {} severity detected.",
                            "FAIL:".red().bold(),
                            threshold.to_uppercase().red()
                        );
                        std::process::exit(1);
                    }
                }
            }
        }

        Commands::Modules { patterns } => {
            print_banner();
            let listings = ModuleRegistry::with_defaults().list(&patterns)?;
            print_listings("Available Audit Modules:", &listings);
        }

        Commands::Reports { patterns } => {
            print_banner();
            let listings = ReportManager::with_defaults().list(&patterns)?;
            print_listings("Available Report Formatters:", &listings);
        }

        Commands::Plugins { patterns } => {
            print_banner();
            let listings = PluginManager::with_defaults().list(&patterns)?;
            print_listings("Available Plugins:", &listings);
        }
    }

    Ok(())
}
