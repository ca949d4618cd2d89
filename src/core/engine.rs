use crate::config::{Config, PlaylistFailurePolicy};
use crate::core::error::{Cancelled, CycleKind, ResolveError};
use crate::core::extractor::{ExtractContext, SoftFailureSink, Target};
use crate::core::fetcher::Fetcher;
use crate::core::registry::ExtractorRegistry;
use crate::core::result::{
    Collection, DelegationMode, EntryFailure, ExtractionResult, Playlist, Reference, Resolution,
    Resolved,
};
use futures::future::BoxFuture;
use futures::{stream, FutureExt, StreamExt};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolveOptions {
    pub max_delegation_depth: usize,
    pub playlist_failure_policy: PlaylistFailurePolicy,
    pub concurrency_limit: usize,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for ResolveOptions {
    fn from(config: &Config) -> Self {
        Self {
            max_delegation_depth: config.max_delegation_depth,
            playlist_failure_policy: config.playlist_failure_policy,
            concurrency_limit: config.concurrency_limit.max(1),
        }
    }
}

/// State shared by every recursive call of one top-level request, and by
/// nothing else.
struct RequestState {
    visited: Mutex<HashSet<(String, String)>>,
    soft_failures: SoftFailureSink,
    cancel: CancellationToken,
}

impl RequestState {
    fn new(cancel: CancellationToken) -> Self {
        Self {
            visited: Mutex::new(HashSet::new()),
            soft_failures: Arc::default(),
            cancel,
        }
    }

    fn visit(&self, extractor: &str, url: &str) -> Result<(), ResolveError> {
        let first_visit = self
            .visited
            .lock()
            .insert((extractor.to_string(), url.to_string()));
        if first_visit {
            Ok(())
        } else {
            Err(ResolveError::CyclicDelegation {
                target: url.to_string(),
                kind: CycleKind::Revisited {
                    extractor: extractor.to_string(),
                },
            })
        }
    }
}

/// The extractor a result was produced by, and the page URL when the target
/// was one.
struct Origin {
    extractor: String,
    url: Option<String>,
}

/// Drives extractors and follows their references until only records and
/// playlists of records remain.
pub struct ExtractorEngine {
    registry: Arc<ExtractorRegistry>,
    fetcher: Arc<dyn Fetcher>,
    options: ResolveOptions,
}

impl ExtractorEngine {
    pub fn new(
        registry: Arc<ExtractorRegistry>,
        fetcher: Arc<dyn Fetcher>,
        options: ResolveOptions,
    ) -> Self {
        Self {
            registry,
            fetcher,
            options,
        }
    }

    pub fn registry(&self) -> &Arc<ExtractorRegistry> {
        &self.registry
    }

    pub fn options(&self) -> &ResolveOptions {
        &self.options
    }

    pub async fn dispatch_and_resolve(&self, url: &str) -> Result<Resolution, ResolveError> {
        self.dispatch_and_resolve_with_cancel(url, CancellationToken::new())
            .await
    }

    /// Like [`dispatch_and_resolve`](Self::dispatch_and_resolve), but stops
    /// with [`ResolveError::Cancelled`] once `cancel` fires.
    pub async fn dispatch_and_resolve_with_cancel(
        &self,
        url: &str,
        cancel: CancellationToken,
    ) -> Result<Resolution, ResolveError> {
        let state = RequestState::new(cancel);
        info!("Resolving {}", url);

        let resolved = self.resolve_target(url, None, 0, &state).await?;
        let soft_failures = std::mem::take(&mut *state.soft_failures.lock());

        info!(
            "Resolved {} ({} soft failure(s))",
            url,
            soft_failures.len()
        );
        Ok(Resolution {
            resolved,
            soft_failures,
        })
    }

    fn resolve_target<'a>(
        &'a self,
        raw: &'a str,
        extractor: Option<&'a str>,
        depth: usize,
        state: &'a RequestState,
    ) -> BoxFuture<'a, Result<Resolved, ResolveError>> {
        async move {
            if state.cancel.is_cancelled() {
                return Err(ResolveError::Cancelled);
            }

            // A named extractor may be handed a bare id; dispatch needs a URL
            // and matches the string exactly as given.
            let (descriptor, target) = match extractor {
                Some(name) => {
                    let descriptor = self
                        .registry
                        .descriptor(name)
                        .ok_or_else(|| ResolveError::NotFound(name.to_string()))?;
                    (descriptor, Target::parse(raw))
                }
                None => {
                    let url = Url::parse(raw).map_err(|source| ResolveError::InvalidUrl {
                        url: raw.to_string(),
                        source,
                    })?;
                    let descriptor = self
                        .registry
                        .dispatch_first(raw)
                        .ok_or_else(|| ResolveError::NotFound(raw.to_string()))?;
                    (descriptor, Target::Url(url))
                }
            };

            let name = descriptor.name().to_string();
            debug!("[{}] Dispatched {} (depth {})", name, target, depth);

            let implementation = self.registry.resolve(&name).await?;
            state.visit(&name, target.as_str())?;
            let ctx = ExtractContext::for_request(
                name.as_str(),
                Arc::clone(&self.fetcher),
                state.cancel.clone(),
                Arc::clone(&state.soft_failures),
            )
            .with_concurrency_limit(self.options.concurrency_limit);

            debug!("[{}] Extracting {}", name, target);
            let outcome = tokio::select! {
                biased;
                _ = state.cancel.cancelled() => return Err(ResolveError::Cancelled),
                outcome = implementation.extract(&target, &ctx) => outcome,
            };
            let mut result = outcome.map_err(|source| {
                if source.is::<Cancelled>() || state.cancel.is_cancelled() {
                    ResolveError::Cancelled
                } else {
                    ResolveError::ExtractionFailed {
                        extractor: name.clone(),
                        url: target.to_string(),
                        source,
                    }
                }
            })?;

            if let (ExtractionResult::Record(record), Some(url)) = (&mut result, target.url()) {
                if record.webpage_url.is_none() {
                    record.webpage_url = Some(url.to_string());
                }
            }

            let origin = Origin {
                extractor: name,
                url: target.url().map(Url::to_string),
            };
            self.reduce(result, &origin, depth, state).await
        }
        .boxed()
    }

    fn reduce<'a>(
        &'a self,
        result: ExtractionResult,
        origin: &'a Origin,
        depth: usize,
        state: &'a RequestState,
    ) -> BoxFuture<'a, Result<Resolved, ResolveError>> {
        async move {
            match result {
                ExtractionResult::Record(mut record) => {
                    if record.extractor.is_empty() {
                        record.extractor = origin.extractor.clone();
                    }
                    debug!("[{}] Resolved record {}", origin.extractor, record.id);
                    Ok(Resolved::Record(record))
                }
                ExtractionResult::Reference(reference) => {
                    self.follow(reference, origin, depth, state).await
                }
                ExtractionResult::Collection(collection) => {
                    self.expand(collection, origin, depth, state).await
                }
            }
        }
        .boxed()
    }

    async fn follow(
        &self,
        reference: Reference,
        origin: &Origin,
        depth: usize,
        state: &RequestState,
    ) -> Result<Resolved, ResolveError> {
        let next_depth = depth + 1;
        if next_depth > self.options.max_delegation_depth {
            return Err(ResolveError::CyclicDelegation {
                target: reference.url,
                kind: CycleKind::DepthExceeded {
                    limit: self.options.max_delegation_depth,
                },
            });
        }

        debug!(
            "[{}] Merging: {:?} delegation to {}",
            origin.extractor, reference.mode, reference.url
        );
        let target = self
            .resolve_target(
                &reference.url,
                reference.extractor.as_deref(),
                next_depth,
                state,
            )
            .await?;

        Ok(merge_delegated(target, &reference, origin))
    }

    async fn expand(
        &self,
        collection: Collection,
        origin: &Origin,
        depth: usize,
        state: &RequestState,
    ) -> Result<Resolved, ResolveError> {
        let Collection { id, title, entries } = collection;
        debug!(
            "[{}] Expanding playlist with {} entries",
            origin.extractor,
            entries.len()
        );

        let members = entries
            .into_iter()
            .enumerate()
            .map(|(index, entry)| async move {
                (index, self.reduce(entry, origin, depth, state).await)
            });
        let mut outcomes = stream::iter(members).buffered(self.options.concurrency_limit.max(1));

        let mut resolved = Vec::new();
        let mut failures = Vec::new();
        while let Some((index, outcome)) = outcomes.next().await {
            match outcome {
                Ok(entry) => resolved.push(entry),
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => match self.options.playlist_failure_policy {
                    PlaylistFailurePolicy::AbortOnFirstFailure => {
                        warn!(
                            "[{}] Playlist entry {} failed, aborting: {}",
                            origin.extractor, index, e
                        );
                        return Err(e);
                    }
                    PlaylistFailurePolicy::SkipAndContinue => {
                        warn!(
                            "[{}] Skipping playlist entry {}: {}",
                            origin.extractor, index, e
                        );
                        failures.push(EntryFailure {
                            index,
                            stage: e.stage(),
                            reason: e.to_string(),
                        });
                    }
                },
            }
        }

        Ok(Resolved::Playlist(Playlist {
            id,
            title,
            extractor: origin.extractor.clone(),
            entries: resolved,
            failures,
        }))
    }
}

/// Combine a delegation target with what the delegator already knew.
///
/// Overrides win in both modes. Transparent delegation also keeps the
/// delegator's extractor label and page URL; opaque keeps the target's.
fn merge_delegated(target: Resolved, reference: &Reference, origin: &Origin) -> Resolved {
    let transparent = reference.mode == DelegationMode::Transparent;
    match target {
        Resolved::Record(mut record) => {
            if transparent {
                record.extractor = origin.extractor.clone();
                if let Some(url) = &origin.url {
                    record.webpage_url = Some(url.clone());
                }
            }
            record.apply_overrides(&reference.overrides);
            Resolved::Record(record)
        }
        Resolved::Playlist(mut playlist) => {
            if transparent {
                playlist.extractor = origin.extractor.clone();
            }
            if let Some(id) = &reference.overrides.id {
                playlist.id = Some(id.clone());
            }
            if let Some(title) = &reference.overrides.title {
                playlist.title = Some(title.clone());
            }
            Resolved::Playlist(playlist)
        }
    }
}
