use crate::core::error::{RegistryError, ResolveError};
use crate::core::extractor::{Extractor, TestCase};
use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

/// Deferred constructor for an extractor implementation.
pub type Loader = Arc<dyn Fn() -> anyhow::Result<Arc<dyn Extractor>> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    /// Answers `prefix:query` style searches.
    Search,
    /// Catch-all fallback, registered after specific extractors.
    Generic,
    /// Never picked by dispatch; only reachable by explicit name.
    Disabled,
    /// Known to be broken.
    NotWorking,
}

/// The always-resident half of an extractor: everything needed to match URLs
/// and enumerate extractors without loading the implementation.
pub struct ExtractorDescriptor {
    name: String,
    pattern: Regex,
    module: String,
    capabilities: Vec<Capability>,
    description: Option<String>,
    test_cases: Option<Vec<TestCase>>,
    loader: Loader,
}

impl ExtractorDescriptor {
    pub fn new<F>(
        name: impl Into<String>,
        pattern: &str,
        module: impl Into<String>,
        loader: F,
    ) -> Result<Self, RegistryError>
    where
        F: Fn() -> anyhow::Result<Arc<dyn Extractor>> + Send + Sync + 'static,
    {
        let name = name.into();
        let pattern = Regex::new(pattern).map_err(|source| RegistryError::InvalidPattern {
            name: name.clone(),
            source,
        })?;

        Ok(Self {
            name,
            pattern,
            module: module.into(),
            capabilities: Vec::new(),
            description: None,
            test_cases: None,
            loader: Arc::new(loader),
        })
    }

    pub fn with_capability(mut self, capability: Capability) -> Self {
        if !self.capabilities.contains(&capability) {
            self.capabilities.push(capability);
        }
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_test_cases(mut self, test_cases: Vec<TestCase>) -> Self {
        self.test_cases = Some(test_cases);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    /// Where the implementation lives, for diagnostics.
    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn capabilities(&self) -> &[Capability] {
        &self.capabilities
    }

    pub fn has_capability(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    pub fn suitable(&self, url: &str) -> bool {
        self.pattern.is_match(url)
    }

    /// Value of the pattern's `id` group for `url`.
    pub fn match_id(&self, url: &str) -> Option<String> {
        self.pattern
            .captures(url)?
            .name("id")
            .map(|m| m.as_str().to_string())
    }

    fn declared_description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    fn declared_test_cases(&self) -> Option<&[TestCase]> {
        self.test_cases.as_deref()
    }
}

impl fmt::Debug for ExtractorDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractorDescriptor")
            .field("name", &self.name)
            .field("pattern", &self.pattern.as_str())
            .field("module", &self.module)
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}

struct RegistryEntry {
    descriptor: Arc<ExtractorDescriptor>,
    instance: OnceCell<Arc<dyn Extractor>>,
}

#[derive(Default)]
struct Entries {
    ordered: Vec<Arc<RegistryEntry>>,
    by_name: HashMap<String, Arc<RegistryEntry>>,
}

/// Process-wide table of descriptors and their lazily built implementations.
#[derive(Default)]
pub struct ExtractorRegistry {
    entries: RwLock<Entries>,
}

impl ExtractorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registration order is dispatch priority: register specific extractors
    /// before generic fallbacks.
    pub fn register(&self, descriptor: ExtractorDescriptor) -> Result<(), RegistryError> {
        let mut entries = self.entries.write();
        if entries.by_name.contains_key(descriptor.name()) {
            return Err(RegistryError::DuplicateName(descriptor.name().to_string()));
        }

        debug!(
            "Registered extractor {} ({})",
            descriptor.name(),
            descriptor.module()
        );
        let entry = Arc::new(RegistryEntry {
            descriptor: Arc::new(descriptor),
            instance: OnceCell::new(),
        });
        entries
            .by_name
            .insert(entry.descriptor.name().to_string(), Arc::clone(&entry));
        entries.ordered.push(entry);
        Ok(())
    }

    pub fn register_all(
        &self,
        descriptors: impl IntoIterator<Item = ExtractorDescriptor>,
    ) -> Result<usize, RegistryError> {
        let mut count = 0;
        for descriptor in descriptors {
            self.register(descriptor)?;
            count += 1;
        }
        Ok(count)
    }

    pub fn len(&self) -> usize {
        self.entries.read().ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn descriptor(&self, name: &str) -> Option<Arc<ExtractorDescriptor>> {
        self.entry(name).map(|entry| Arc::clone(&entry.descriptor))
    }

    /// All descriptors in registration order.
    pub fn descriptors(&self) -> Vec<Arc<ExtractorDescriptor>> {
        self.entries
            .read()
            .ordered
            .iter()
            .map(|entry| Arc::clone(&entry.descriptor))
            .collect()
    }

    pub fn lookup_by_capability(&self, capability: Capability) -> Vec<Arc<ExtractorDescriptor>> {
        self.descriptors()
            .into_iter()
            .filter(|descriptor| descriptor.has_capability(capability))
            .collect()
    }

    pub fn is_materialized(&self, name: &str) -> bool {
        self.entry(name)
            .map(|entry| entry.instance.initialized())
            .unwrap_or(false)
    }

    /// Get the implementation for `name`, building it on first use.
    ///
    /// Concurrent first calls build it once; a failed build is not cached.
    pub async fn resolve(&self, name: &str) -> Result<Arc<dyn Extractor>, ResolveError> {
        let entry = self
            .entry(name)
            .ok_or_else(|| ResolveError::NotFound(name.to_string()))?;

        if let Some(instance) = entry.instance.get() {
            return Ok(Arc::clone(instance));
        }

        let instance = entry
            .instance
            .get_or_try_init(|| async {
                debug!(
                    "Materializing extractor {} from {}",
                    name,
                    entry.descriptor.module()
                );
                (entry.descriptor.loader)().map_err(|source| ResolveError::LoadError {
                    name: name.to_string(),
                    source,
                })
            })
            .await?;

        Ok(Arc::clone(instance))
    }

    pub async fn description(&self, name: &str) -> Result<Option<String>, ResolveError> {
        let descriptor = self
            .descriptor(name)
            .ok_or_else(|| ResolveError::NotFound(name.to_string()))?;
        if let Some(description) = descriptor.declared_description() {
            return Ok(Some(description.to_string()));
        }

        let extractor = self.materialize_for(name, "description").await?;
        Ok(extractor.description())
    }

    /// Self-test enumeration. Answered from the descriptor when it declares
    /// its test cases, otherwise from the loaded implementation.
    pub async fn test_cases(&self, name: &str) -> Result<Vec<TestCase>, ResolveError> {
        let descriptor = self
            .descriptor(name)
            .ok_or_else(|| ResolveError::NotFound(name.to_string()))?;
        if let Some(test_cases) = descriptor.declared_test_cases() {
            return Ok(test_cases.to_vec());
        }

        let extractor = self.materialize_for(name, "test_cases").await?;
        Ok(extractor.test_cases())
    }

    async fn materialize_for(
        &self,
        name: &str,
        method: &str,
    ) -> Result<Arc<dyn Extractor>, ResolveError> {
        if !self.is_materialized(name) {
            warn_lazy_fallback_once(name, method);
        }
        self.resolve(name).await
    }

    fn entry(&self, name: &str) -> Option<Arc<RegistryEntry>> {
        self.entries.read().by_name.get(name).cloned()
    }
}

/// Set once per process, the first time a lazy descriptor could not answer a
/// request and the full implementation had to be loaded. Never reset.
static LAZY_FALLBACK_WARNED: AtomicBool = AtomicBool::new(false);

fn warn_lazy_fallback_once(name: &str, method: &str) {
    if !LAZY_FALLBACK_WARNED.swap(true, Ordering::AcqRel) {
        warn!(
            "Lazy descriptor for {} cannot answer {}; loading the full extractor. \
             Further lazy fallbacks will not be reported",
            name, method
        );
    }
}

pub fn lazy_fallback_warned() -> bool {
    LAZY_FALLBACK_WARNED.load(Ordering::Acquire)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::extractor::{ExtractContext, Target};
    use crate::core::result::ExtractionResult;
    use crate::core::MediaRecord;
    use async_trait::async_trait;
    use tokio_test::{assert_ok, block_on};

    struct Sample;

    #[async_trait]
    impl Extractor for Sample {
        fn name(&self) -> &str {
            "Sample"
        }

        fn description(&self) -> Option<String> {
            Some("loaded description".to_string())
        }

        async fn extract(&self, _target: &Target, _ctx: &ExtractContext) -> anyhow::Result<ExtractionResult> {
            Ok(ExtractionResult::Record(MediaRecord::new("1", "sample")))
        }
    }

    fn sample(name: &str) -> ExtractorDescriptor {
        ExtractorDescriptor::new(
            name,
            r"^https?://sample\.example/(?P<id>\d+)",
            "tests::sample",
            || Ok(Arc::new(Sample) as Arc<dyn Extractor>),
        )
        .unwrap()
    }

    #[test]
    fn test_duplicate_names_are_rejected() {
        let registry = ExtractorRegistry::new();
        registry.register(sample("Sample")).unwrap();

        let err = registry.register(sample("Sample")).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateName(name) if name == "Sample"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_invalid_pattern_is_rejected() {
        let err = ExtractorDescriptor::new("Bad", "(", "tests", || {
            Ok(Arc::new(Sample) as Arc<dyn Extractor>)
        })
        .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidPattern { .. }));
    }

    #[test]
    fn test_match_id_reads_named_group() {
        let descriptor = sample("Sample");
        assert_eq!(
            descriptor.match_id("https://sample.example/42?x=1").as_deref(),
            Some("42")
        );
        assert_eq!(descriptor.match_id("https://other.example/42"), None);
    }

    #[test]
    fn test_lookup_by_capability_keeps_order_and_stays_lazy() {
        let registry = ExtractorRegistry::new();
        registry
            .register(sample("A").with_capability(Capability::Search))
            .unwrap();
        registry.register(sample("B")).unwrap();
        registry
            .register(sample("C").with_capability(Capability::Search))
            .unwrap();

        let names: Vec<_> = registry
            .lookup_by_capability(Capability::Search)
            .iter()
            .map(|d| d.name().to_string())
            .collect();

        assert_eq!(names, vec!["A", "C"]);
        assert!(!registry.is_materialized("A"));
        assert!(!registry.is_materialized("C"));
    }

    #[tokio::test]
    async fn test_declared_test_cases_do_not_materialize() {
        let registry = ExtractorRegistry::new();
        registry
            .register(
                sample("Sample")
                    .with_test_cases(vec![TestCase::matching("https://sample.example/1")]),
            )
            .unwrap();

        let cases = registry.test_cases("Sample").await.unwrap();

        assert_eq!(cases.len(), 1);
        assert!(!registry.is_materialized("Sample"));
    }

    #[tokio::test]
    async fn test_undeclared_surface_falls_back_to_materializing() {
        let registry = ExtractorRegistry::new();
        registry.register(sample("Sample")).unwrap();

        let description = registry.description("Sample").await.unwrap();

        assert_eq!(description.as_deref(), Some("loaded description"));
        assert!(registry.is_materialized("Sample"));
        assert!(lazy_fallback_warned());
    }

    #[test]
    fn test_materialized_instance_is_reused() {
        let registry = ExtractorRegistry::new();
        registry.register(sample("Sample")).unwrap();

        let first = assert_ok!(block_on(registry.resolve("Sample")));
        let second = assert_ok!(block_on(registry.resolve("Sample")));

        assert!(Arc::ptr_eq(&first, &second));
        assert!(registry.is_materialized("Sample"));
    }

    #[tokio::test]
    async fn test_unknown_name_is_not_found() {
        let registry = ExtractorRegistry::new();
        let err = registry.resolve("Missing").await.err().unwrap();
        assert!(matches!(err, ResolveError::NotFound(name) if name == "Missing"));
    }
}
