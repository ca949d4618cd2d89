use crate::core::error::Stage;
use crate::core::metadata::{FieldOverrides, MediaRecord};
use serde::{Deserialize, Serialize};

/// What an extractor hands back to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "_type", rename_all = "snake_case")]
pub enum ExtractionResult {
    Record(MediaRecord),
    Reference(Reference),
    Collection(Collection),
}

impl ExtractionResult {
    /// Hand the URL to whichever extractor claims it; the target's record
    /// replaces ours.
    pub fn url(url: impl Into<String>) -> Self {
        ExtractionResult::Reference(Reference::new(url, DelegationMode::Opaque))
    }

    /// Delegate while keeping our identity; `overrides` beat the target's fields.
    pub fn url_transparent(url: impl Into<String>, overrides: FieldOverrides) -> Self {
        ExtractionResult::Reference(
            Reference::new(url, DelegationMode::Transparent).with_overrides(overrides),
        )
    }

    pub fn playlist(
        id: Option<String>,
        title: Option<String>,
        entries: Vec<ExtractionResult>,
    ) -> Self {
        ExtractionResult::Collection(Collection { id, title, entries })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelegationMode {
    Transparent,
    Opaque,
}

/// A pointer to another extraction target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    pub url: String,
    /// Skip dispatch and use this extractor directly.
    pub extractor: Option<String>,
    pub mode: DelegationMode,
    #[serde(default)]
    pub overrides: FieldOverrides,
}

impl Reference {
    pub fn new(url: impl Into<String>, mode: DelegationMode) -> Self {
        Self {
            url: url.into(),
            extractor: None,
            mode,
            overrides: FieldOverrides::default(),
        }
    }

    pub fn with_extractor(mut self, name: impl Into<String>) -> Self {
        self.extractor = Some(name.into());
        self
    }

    pub fn with_overrides(mut self, overrides: FieldOverrides) -> Self {
        self.overrides = overrides;
        self
    }
}

impl From<Reference> for ExtractionResult {
    fn from(reference: Reference) -> Self {
        ExtractionResult::Reference(reference)
    }
}

/// An ordered playlist of further resolution requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    pub id: Option<String>,
    pub title: Option<String>,
    pub entries: Vec<ExtractionResult>,
}

/// A result tree with every reference followed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "_type", rename_all = "snake_case")]
pub enum Resolved {
    Record(MediaRecord),
    Playlist(Playlist),
}

impl Resolved {
    pub fn as_record(&self) -> Option<&MediaRecord> {
        match self {
            Resolved::Record(record) => Some(record),
            Resolved::Playlist(_) => None,
        }
    }

    pub fn as_playlist(&self) -> Option<&Playlist> {
        match self {
            Resolved::Playlist(playlist) => Some(playlist),
            Resolved::Record(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Playlist {
    pub id: Option<String>,
    pub title: Option<String>,
    pub extractor: String,
    pub entries: Vec<Resolved>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<EntryFailure>,
}

/// A playlist member that could not be resolved and was skipped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryFailure {
    pub index: usize,
    pub stage: Stage,
    pub reason: String,
}

/// A non-fatal problem recorded next to a partial result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoftFailure {
    pub extractor: String,
    pub source: String,
    pub reason: String,
}

/// Outcome of a top-level request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub resolved: Resolved,
    #[serde(default)]
    pub soft_failures: Vec<SoftFailure>,
}
