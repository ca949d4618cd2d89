use crate::core::extractor::{ExtractContext, Extractor, Target, TestCase};
use crate::core::metadata::FieldOverrides;
use crate::core::registry::{Capability, ExtractorDescriptor, ExtractorRegistry};
use crate::core::result::{DelegationMode, ExtractionResult, Reference};
use anyhow::{Context, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

static PLACEHOLDER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap());

/// One `*.toml` file in a plugin directory.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PluginManifest {
    #[serde(default, rename = "extractor")]
    pub extractors: Vec<RedirectRule>,
}

impl PluginManifest {
    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }
}

/// An extractor that only rewrites URLs it matches into a reference.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RedirectRule {
    pub name: String,
    pub pattern: String,
    /// Target URL with `{group}` placeholders for the pattern's named groups.
    pub target: String,
    #[serde(default = "default_mode")]
    pub mode: DelegationMode,
    pub extractor: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub test_urls: Vec<String>,
}

fn default_mode() -> DelegationMode {
    DelegationMode::Transparent
}

impl RedirectRule {
    fn test_cases(&self) -> Vec<TestCase> {
        self.test_urls.iter().map(TestCase::matching).collect()
    }

    fn descriptor(self, module: String) -> Result<ExtractorDescriptor> {
        let rule = self.clone();
        let mut descriptor = ExtractorDescriptor::new(self.name.clone(), &self.pattern, module, move || {
            Ok(Arc::new(RedirectExtractor::new(rule.clone())?) as Arc<dyn Extractor>)
        })?;

        if self.disabled {
            descriptor = descriptor.with_capability(Capability::Disabled);
        }
        if !self.test_urls.is_empty() {
            descriptor = descriptor.with_test_cases(self.test_cases());
        }
        Ok(descriptor)
    }
}

pub struct RedirectExtractor {
    rule: RedirectRule,
    pattern: Regex,
}

impl RedirectExtractor {
    /// Fails when a template names a group the pattern does not define.
    pub fn new(rule: RedirectRule) -> Result<Self> {
        let pattern = Regex::new(&rule.pattern)
            .with_context(|| format!("invalid pattern for {}", rule.name))?;

        let templates = [Some(&rule.target), rule.title.as_ref(), rule.description.as_ref()];
        for template in templates.into_iter().flatten() {
            for placeholder in PLACEHOLDER_RE.captures_iter(template) {
                let group = &placeholder[1];
                if !pattern.capture_names().flatten().any(|name| name == group) {
                    anyhow::bail!(
                        "{}: template uses {{{}}} but the pattern has no such group",
                        rule.name,
                        group
                    );
                }
            }
        }
        Ok(Self { rule, pattern })
    }

    fn fill(template: &str, captures: &regex::Captures) -> String {
        PLACEHOLDER_RE
            .replace_all(template, |placeholder: &regex::Captures| {
                captures
                    .name(&placeholder[1])
                    .map_or("", |m| m.as_str())
                    .to_string()
            })
            .into_owned()
    }
}

#[async_trait]
impl Extractor for RedirectExtractor {
    fn name(&self) -> &str {
        &self.rule.name
    }

    fn description(&self) -> Option<String> {
        Some(format!("Redirects to {}", self.rule.target))
    }

    fn test_cases(&self) -> Vec<TestCase> {
        self.rule.test_cases()
    }

    async fn extract(&self, target: &Target, _ctx: &ExtractContext) -> Result<ExtractionResult> {
        let captures = self
            .pattern
            .captures(target.as_str())
            .with_context(|| format!("{} does not match {}", target, self.rule.name))?;
        let redirect = Self::fill(&self.rule.target, &captures);
        debug!("[{}] {} -> {}", self.rule.name, target, redirect);

        let overrides = FieldOverrides {
            title: self.rule.title.as_deref().map(|t| Self::fill(t, &captures)),
            description: self.rule.description.as_deref().map(|d| Self::fill(d, &captures)),
            ..FieldOverrides::default()
        };

        let mut reference = Reference::new(redirect, self.rule.mode).with_overrides(overrides);
        if let Some(extractor) = &self.rule.extractor {
            reference = reference.with_extractor(extractor.clone());
        }
        Ok(reference.into())
    }
}

fn manifest_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("reading plugin directory {}", dir.display()))?
    {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "toml") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Descriptors for every rule in every manifest under `dirs`. Missing
/// directories are skipped; a malformed manifest is an error.
pub fn discover(dirs: &[PathBuf]) -> Result<Vec<ExtractorDescriptor>> {
    let mut descriptors = Vec::new();
    for dir in dirs {
        if !dir.is_dir() {
            warn!("Plugin directory {} does not exist, skipping", dir.display());
            continue;
        }

        for path in manifest_files(dir)? {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading plugin manifest {}", path.display()))?;
            let manifest = PluginManifest::from_toml(&text)
                .with_context(|| format!("parsing plugin manifest {}", path.display()))?;

            for rule in manifest.extractors {
                let module = format!("plugin:{}", path.display());
                descriptors.push(rule.descriptor(module)?);
            }
        }
    }
    Ok(descriptors)
}

pub fn register_plugins(registry: &ExtractorRegistry, dirs: &[PathBuf]) -> Result<usize> {
    let count = registry.register_all(discover(dirs)?)?;
    if count > 0 {
        info!("Registered {} plugin extractor(s)", count);
    }
    Ok(count)
}
