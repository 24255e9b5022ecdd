// src/fetch/mod.rs

pub mod retry;
pub mod source;

pub use retry::RetryPolicy;

use crate::cache::{CacheStore, TimedCache};
use crate::error::IngestError;
use crate::process::DatasetParser;
use crate::schema::Dataset;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use reqwest::Client;
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use tokio::task::AbortHandle;
use tracing::{debug, info, instrument, warn};

/// Everything needed to load one dataset.
#[derive(Debug, Clone)]
pub struct DatasetSpec {
    pub id: String,
    pub url: String,
    /// Headers (raw or normalized) whose cells are numbers.
    pub numeric: HashSet<String>,
    /// Served when neither the source nor the cache can answer.
    pub fallback: Dataset,
}

impl DatasetSpec {
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            numeric: HashSet::new(),
            fallback: Vec::new(),
        }
    }

    pub fn numeric<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.numeric = headers.into_iter().map(Into::into).collect();
        self
    }

    pub fn fallback(mut self, fallback: Dataset) -> Self {
        self.fallback = fallback;
        self
    }
}

/// Timing knobs for [`Fetcher`].
#[derive(Debug, Clone, Copy)]
pub struct FetchSettings {
    /// Per-attempt request budget.
    pub timeout: Duration,
    /// Ceiling on one refresh, retries and backoff included.
    pub budget: Duration,
    /// How long a cached dataset counts as fresh.
    pub max_age: Duration,
    pub retry: RetryPolicy,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(12),
            budget: Duration::from_secs(12),
            max_age: Duration::from_secs(300),
            retry: RetryPolicy::default(),
        }
    }
}

/// Where a loaded dataset came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Fetched and parsed just now.
    Fresh,
    /// Served from a cache entry within `max_age`.
    Cached { written_at: DateTime<Utc> },
    /// The refresh failed; an expired cache entry was served instead.
    Stale { written_at: DateTime<Utc> },
    /// Seed data.
    Fallback,
}

#[derive(Debug, Clone)]
pub struct Loaded {
    pub dataset: Dataset,
    pub origin: Origin,
}

struct InFlight {
    generation: u64,
    abort: AbortHandle,
}

/// Deregisters a fetch when its caller finishes or stops waiting. A caller
/// that drops the load future aborts the task with it.
struct InFlightGuard<'a> {
    in_flight: &'a Mutex<HashMap<String, InFlight>>,
    id: &'a str,
    generation: u64,
    abort: AbortHandle,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.abort.abort();
        let mut in_flight = self
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if in_flight.get(self.id).map(|f| f.generation) == Some(self.generation) {
            in_flight.remove(self.id);
        }
    }
}

/// Loads datasets from their sources through a [`TimedCache`], degrading to
/// stale or seed data instead of failing.
pub struct Fetcher<S> {
    client: Client,
    cache: Arc<TimedCache<S>>,
    parser: DatasetParser,
    settings: FetchSettings,
    in_flight: Mutex<HashMap<String, InFlight>>,
    generation: AtomicU64,
}

impl<S: CacheStore + 'static> Fetcher<S> {
    pub fn new(
        client: Client,
        cache: TimedCache<S>,
        parser: DatasetParser,
        settings: FetchSettings,
    ) -> Self {
        Self {
            client,
            cache: Arc::new(cache),
            parser,
            settings,
            in_flight: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    pub fn cache(&self) -> &TimedCache<S> {
        &self.cache
    }

    pub fn settings(&self) -> &FetchSettings {
        &self.settings
    }

    /// Load one dataset. Never fails: see [`Fetcher::load_detailed`].
    pub async fn load(&self, spec: &DatasetSpec, force: bool) -> Dataset {
        self.load_detailed(spec, force).await.dataset
    }

    /// Load one dataset and report where it came from.
    ///
    /// Without `force`, a fresh cache entry answers with no network access.
    /// Otherwise the source is fetched; a successful non-empty parse is cached
    /// and returned. Any failure serves the last cached copy (unless forced,
    /// in which case that copy is dropped) or the dataset's fallback.
    #[instrument(level = "info", skip(self, spec), fields(dataset = %spec.id))]
    pub async fn load_detailed(&self, spec: &DatasetSpec, force: bool) -> Loaded {
        if !force {
            if let Some(entry) = self
                .cache
                .get_entry::<Dataset>(&spec.id, self.settings.max_age)
            {
                debug!(rows = entry.value.len(), "cache hit");
                return Loaded {
                    dataset: entry.value,
                    origin: Origin::Cached {
                        written_at: entry.written_at,
                    },
                };
            }
        }

        match self.refresh(spec).await {
            Ok(dataset) => Loaded {
                dataset,
                origin: Origin::Fresh,
            },
            Err(IngestError::Aborted) => {
                debug!("fetch aborted");
                self.degrade(spec, false)
            }
            Err(e) => {
                warn!(error = %e, "refresh failed, degrading");
                if force {
                    self.cache.clear(&spec.id);
                }
                self.degrade(spec, force)
            }
        }
    }

    /// Load every dataset concurrently. One dataset's failure never touches
    /// another's result.
    pub async fn load_all(&self, specs: &[DatasetSpec], force: bool) -> BTreeMap<String, Dataset> {
        self.load_all_detailed(specs, force)
            .await
            .into_iter()
            .map(|(id, loaded)| (id, loaded.dataset))
            .collect()
    }

    /// Like [`Fetcher::load_all`], with origins. When several specs share an
    /// id only the first is loaded.
    pub async fn load_all_detailed(
        &self,
        specs: &[DatasetSpec],
        force: bool,
    ) -> BTreeMap<String, Loaded> {
        let mut seen = HashSet::new();
        let unique: Vec<&DatasetSpec> = specs
            .iter()
            .filter(|spec| {
                let first = seen.insert(spec.id.as_str());
                if !first {
                    warn!(dataset = %spec.id, url = %spec.url, "ignoring duplicate dataset id");
                }
                first
            })
            .collect();
        let loads = unique.into_iter().map(|spec| async move {
            (spec.id.clone(), self.load_detailed(spec, force).await)
        });
        join_all(loads).await.into_iter().collect()
    }

    /// Abort the in-flight fetch for `id`, if any.
    pub fn cancel(&self, id: &str) -> bool {
        match self.lock_in_flight().remove(id) {
            Some(flight) => {
                flight.abort.abort();
                true
            }
            None => false,
        }
    }

    /// Drop the cached copy of `id` so the next load goes to the source.
    pub fn clear(&self, id: &str) {
        self.cache.clear(id);
    }

    fn degrade(&self, spec: &DatasetSpec, force: bool) -> Loaded {
        if !force {
            if let Some(entry) = self.cache.get_stale::<Dataset>(&spec.id) {
                if !entry.value.is_empty() {
                    info!(written_at = %entry.written_at, "serving stale copy");
                    return Loaded {
                        dataset: entry.value,
                        origin: Origin::Stale {
                            written_at: entry.written_at,
                        },
                    };
                }
            }
        }
        info!(rows = spec.fallback.len(), "serving fallback data");
        Loaded {
            dataset: spec.fallback.clone(),
            origin: Origin::Fallback,
        }
    }

    /// Fetch, parse and cache `spec` in a task that a newer fetch for the same
    /// id can abort. The cache write happens after the task's last await, so
    /// an aborted fetch never writes.
    async fn refresh(&self, spec: &DatasetSpec) -> Result<Dataset, IngestError> {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);

        let task = tokio::spawn(fetch_and_store(
            self.client.clone(),
            Arc::clone(&self.cache),
            self.parser,
            self.settings,
            spec.id.clone(),
            spec.url.clone(),
            spec.numeric.clone(),
        ));

        let previous = self.lock_in_flight().insert(
            spec.id.clone(),
            InFlight {
                generation,
                abort: task.abort_handle(),
            },
        );
        if let Some(previous) = previous {
            debug!(generation = previous.generation, "aborting older fetch");
            previous.abort.abort();
        }

        let _guard = InFlightGuard {
            in_flight: &self.in_flight,
            id: &spec.id,
            generation,
            abort: task.abort_handle(),
        };
        let outcome = task.await;

        match outcome {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(IngestError::Aborted),
            Err(e) => Err(IngestError::Task(e.to_string())),
        }
    }

    fn lock_in_flight(&self) -> std::sync::MutexGuard<'_, HashMap<String, InFlight>> {
        self.in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

async fn fetch_and_store<S: CacheStore>(
    client: Client,
    cache: Arc<TimedCache<S>>,
    parser: DatasetParser,
    settings: FetchSettings,
    id: String,
    url: String,
    numeric: HashSet<String>,
) -> Result<Dataset, IngestError> {
    let download =
        source::download_text_with_retry(&client, &url, settings.timeout, &settings.retry);
    let outcome = tokio::time::timeout(settings.budget, download).await;
    let body = match outcome {
        Ok(result) => result?,
        Err(_) => {
            return Err(IngestError::Timeout {
                url,
                after: settings.budget,
            })
        }
    };

    let dataset = parser.parse(&body, &numeric);
    if dataset.is_empty() {
        return Err(IngestError::EmptyParse { url });
    }

    cache.set(&id, &dataset);
    info!(dataset = %id, rows = dataset.len(), "refreshed");
    Ok(dataset)
}
