pub mod collector;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod extractor;
pub mod fetcher;
pub mod metadata;
pub mod registry;
pub mod result;

pub use collector::{manifest_source, Collected, FormatCollector, ManifestParser, Source, SourceOutput};
pub use engine::{ExtractorEngine, ResolveOptions};
pub use error::{Cancelled, CollectError, CycleKind, RegistryError, ResolveError, Stage};
pub use extractor::{ExtractContext, Extractor, Target, TestCase};
pub use fetcher::{FetchRequest, FetchResponse, Fetcher, HttpFetcher};
pub use metadata::{FieldOverrides, MediaFormat, MediaRecord, Protocol, Subtitle, Thumbnail};
pub use registry::{Capability, ExtractorDescriptor, ExtractorRegistry};
pub use result::{
    Collection, DelegationMode, EntryFailure, ExtractionResult, Playlist, Reference, Resolution,
    Resolved, SoftFailure,
};
