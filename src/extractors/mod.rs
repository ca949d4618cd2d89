pub mod direct;
pub mod hls;
pub mod js_interpreter;
pub mod signature;

pub use direct::DirectLinkExtractor;
pub use hls::HlsParser;
pub use js_interpreter::JsSignatureSolver;
pub use signature::{
    apply, render_indices, spec_id, SignatureCache, SignatureDecrypter, SignatureSolver,
    TransformProgram,
};

use crate::core::error::RegistryError;
use crate::core::registry::{ExtractorDescriptor, ExtractorRegistry};

/// Descriptors for the extractors shipped with the crate, in dispatch order.
pub fn builtin_descriptors() -> Result<Vec<ExtractorDescriptor>, RegistryError> {
    Ok(vec![DirectLinkExtractor::descriptor()?])
}

pub fn register_builtin(registry: &ExtractorRegistry) -> Result<usize, RegistryError> {
    registry.register_all(builtin_descriptors()?)
}
