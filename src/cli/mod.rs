use crate::build_registry;
use crate::config::{Config, PlaylistFailurePolicy};
use crate::core::{Capability, ExtractorEngine, ExtractorRegistry, HttpFetcher, ResolveOptions};
use crate::extractors::spec_id;
use crate::subtitles::parse_timed_text;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "ytdlp-resolver")]
#[command(about = "Resolve media URLs through lazily loaded extractors")]
#[command(version)]
pub struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Resolve a URL and print the result as JSON
    Resolve {
        #[arg(value_name = "URL")]
        url: String,

        /// Maximum number of chained delegations
        #[arg(long)]
        max_depth: Option<usize>,

        /// Fail the whole playlist when one entry fails
        #[arg(long)]
        abort_on_failure: bool,

        /// Number of playlist entries resolved concurrently
        #[arg(short = 'j', long)]
        concurrent: Option<usize>,
    },
    /// List registered extractors without loading them
    List {
        #[arg(long, value_enum)]
        capability: Option<CapabilityArg>,
    },
    /// Check that every declared test URL dispatches to its extractor
    CheckTests,
    /// Parse a timed-text (LRC) file and print its entries as JSON
    Lyrics {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
    /// Print the shape id of a signature example
    SigId {
        #[arg(value_name = "EXAMPLE")]
        example: String,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum CapabilityArg {
    Search,
    Generic,
    Disabled,
    NotWorking,
}

impl From<CapabilityArg> for Capability {
    fn from(arg: CapabilityArg) -> Self {
        match arg {
            CapabilityArg::Search => Capability::Search,
            CapabilityArg::Generic => Capability::Generic,
            CapabilityArg::Disabled => Capability::Disabled,
            CapabilityArg::NotWorking => Capability::NotWorking,
        }
    }
}

impl Cli {
    pub async fn run(&self) -> Result<()> {
        let mut config = Config::load(self.config.as_deref())?;

        match &self.command {
            Command::Resolve {
                url,
                max_depth,
                abort_on_failure,
                concurrent,
            } => {
                if let Some(depth) = max_depth {
                    config.max_delegation_depth = *depth;
                }
                if *abort_on_failure {
                    config.playlist_failure_policy = PlaylistFailurePolicy::AbortOnFirstFailure;
                }
                if let Some(concurrent) = concurrent {
                    config.concurrency_limit = *concurrent;
                }
                config.validate()?;
                self.resolve(&config, url).await
            }
            Command::List { capability } => {
                let registry = build_registry(&config)?;
                list(&registry, capability.map(Capability::from));
                Ok(())
            }
            Command::CheckTests => {
                let registry = build_registry(&config)?;
                check_tests(&registry).await
            }
            Command::Lyrics { file } => {
                let text = std::fs::read_to_string(file)
                    .with_context(|| format!("reading {}", file.display()))?;
                let entries: Vec<_> = parse_timed_text(&text).collect();
                print_json(&entries)
            }
            Command::SigId { example } => {
                println!("{}", spec_id(example));
                Ok(())
            }
        }
    }

    async fn resolve(&self, config: &Config, url: &str) -> Result<()> {
        let registry = Arc::new(build_registry(config)?);
        let fetcher = Arc::new(HttpFetcher::new(config)?);
        let engine = ExtractorEngine::new(registry, fetcher, ResolveOptions::from(config));

        let cancel = CancellationToken::new();
        let on_interrupt = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling");
                on_interrupt.cancel();
            }
        });

        let resolution = engine.dispatch_and_resolve_with_cancel(url, cancel).await?;
        for failure in &resolution.soft_failures {
            warn!(
                "[{}] {}: {}",
                failure.extractor, failure.source, failure.reason
            );
        }
        print_json(&resolution)
    }
}

fn list(registry: &ExtractorRegistry, capability: Option<Capability>) {
    let descriptors = match capability {
        Some(capability) => registry.lookup_by_capability(capability),
        None => registry.descriptors(),
    };

    for descriptor in descriptors {
        let mut line = descriptor.name().to_string();
        if descriptor.has_capability(Capability::NotWorking) {
            line.push_str(" (CURRENTLY BROKEN)");
        }
        if descriptor.has_capability(Capability::Disabled) {
            line.push_str(" (disabled)");
        }
        println!("{}\t{}", line, descriptor.module());
    }
}

async fn check_tests(registry: &ExtractorRegistry) -> Result<()> {
    let mut checked = 0;
    let mut failures = Vec::new();

    for descriptor in registry.descriptors() {
        if descriptor.has_capability(Capability::Disabled) {
            info!("Skipping disabled extractor {}", descriptor.name());
            continue;
        }

        for test in registry.test_cases(descriptor.name()).await? {
            checked += 1;
            let dispatched = registry.dispatch_first(&test.url);
            match dispatched {
                Some(d) if d.name() == descriptor.name() => {
                    println!("ok      {} {}", descriptor.name(), test.url);
                }
                other => {
                    let got = other.map_or("nothing".to_string(), |d| d.name().to_string());
                    println!("FAILED  {} {} (dispatched to {})", descriptor.name(), test.url, got);
                    failures.push(test.url);
                }
            }
        }
    }

    println!("{} checked, {} failed", checked, failures.len());
    if !failures.is_empty() {
        anyhow::bail!("{} test URL(s) dispatched to the wrong extractor", failures.len());
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
