pub mod cli;
pub mod config;
pub mod core;
pub mod extractors;
pub mod plugins;
pub mod subtitles;
pub mod utils;

pub use crate::config::{Config, PlaylistFailurePolicy};
pub use crate::core::{
    ExtractionResult, ExtractorDescriptor, ExtractorEngine, ExtractorRegistry, MediaFormat,
    MediaRecord, Resolution, ResolveError, ResolveOptions, Resolved,
};

/// Registry with plugin extractors first and the built-in fallbacks last.
pub fn build_registry(config: &Config) -> anyhow::Result<ExtractorRegistry> {
    let registry = ExtractorRegistry::new();
    plugins::register_plugins(&registry, &config.plugin_dirs)?;
    extractors::register_builtin(&registry)?;
    Ok(registry)
}
