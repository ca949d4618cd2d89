use crate::core::registry::{Capability, ExtractorDescriptor, ExtractorRegistry};
use std::sync::Arc;

impl ExtractorRegistry {
    /// Every descriptor whose pattern matches `url`, in registration order.
    ///
    /// Pure: only patterns are tested, nothing is materialized. Disabled
    /// descriptors never match. An empty result is not an error.
    pub fn dispatch(&self, url: &str) -> Vec<Arc<ExtractorDescriptor>> {
        self.descriptors()
            .into_iter()
            .filter(|descriptor| !descriptor.has_capability(Capability::Disabled))
            .filter(|descriptor| descriptor.suitable(url))
            .collect()
    }

    /// The highest-priority match for `url`.
    pub fn dispatch_first(&self, url: &str) -> Option<Arc<ExtractorDescriptor>> {
        self.descriptors()
            .into_iter()
            .find(|descriptor| {
                !descriptor.has_capability(Capability::Disabled) && descriptor.suitable(url)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::extractor::{ExtractContext, Extractor, Target};
    use crate::core::result::ExtractionResult;
    use async_trait::async_trait;

    struct Never;

    #[async_trait]
    impl Extractor for Never {
        fn name(&self) -> &str {
            "Never"
        }

        async fn extract(&self, _target: &Target, _ctx: &ExtractContext) -> anyhow::Result<ExtractionResult> {
            anyhow::bail!("not used")
        }
    }

    fn descriptor(name: &str, pattern: &str) -> ExtractorDescriptor {
        ExtractorDescriptor::new(name, pattern, "tests", || {
            Ok(Arc::new(Never) as Arc<dyn Extractor>)
        })
        .unwrap()
    }

    fn registry() -> ExtractorRegistry {
        let registry = ExtractorRegistry::new();
        registry
            .register(descriptor("Specific", r"^https?://video\.example/watch/\d+"))
            .unwrap();
        registry
            .register(
                descriptor("Hidden", r"^https?://video\.example/").with_capability(Capability::Disabled),
            )
            .unwrap();
        registry
            .register(descriptor("Generic", r"^https?://").with_capability(Capability::Generic))
            .unwrap();
        registry
    }

    fn names(candidates: &[Arc<ExtractorDescriptor>]) -> Vec<&str> {
        candidates.iter().map(|d| d.name()).collect()
    }

    #[test]
    fn test_dispatch_returns_matches_in_registration_order() {
        let registry = registry();
        let candidates = registry.dispatch("https://video.example/watch/12");
        assert_eq!(names(&candidates), vec!["Specific", "Generic"]);

        let first = registry.dispatch_first("https://video.example/watch/12").unwrap();
        assert_eq!(first.name(), "Specific");
    }

    #[test]
    fn test_dispatch_without_match_is_empty() {
        let registry = registry();
        assert!(registry.dispatch("ftp://video.example/watch/12").is_empty());
        assert!(registry.dispatch_first("ftp://video.example/watch/12").is_none());
    }

    #[test]
    fn test_dispatch_is_repeatable_and_side_effect_free() {
        let registry = registry();
        let first = names(&registry.dispatch("https://video.example/other")).join(",");
        for _ in 0..5 {
            let again = names(&registry.dispatch("https://video.example/other")).join(",");
            assert_eq!(again, first);
        }
        for name in ["Specific", "Hidden", "Generic"] {
            assert!(!registry.is_materialized(name));
        }
    }
}
