pub mod cancel;
pub mod error;
pub mod extract;
pub mod geocode;
pub mod media;
pub mod planner;
pub mod scan;

#[cfg(test)]
mod testutil;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

pub use cancel::{CancellationToken, CancelledError};
pub use error::{CacheError, ConfigError, ExtractionError, PlacementError};
pub use geocode::{
    Geocoder, GeocoderOptions, LocationCache, LocationResolver, LookupOutcome, NominatimGeocoder, ResolverStats,
    UNKNOWN_LOCATION,
};
pub use media::{Coordinates, MediaRecord, TimestampSource};
pub use planner::Placement;
pub use scan::ExtensionFilter;

/// Upper bound on the default worker count.
const MAX_DEFAULT_WORKERS: usize = 32;

fn default_file_types() -> Vec<String> {
    scan::DEFAULT_EXTENSIONS.iter().map(|s| s.to_string()).collect()
}

fn default_true() -> bool {
    true
}

/// `min(32, 2 × available parallelism)`
pub fn default_workers() -> usize {
    let cpus = std::thread::available_parallelism().map_or(1, |n| n.get());
    (cpus * 2).min(MAX_DEFAULT_WORKERS)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessOptions {
    pub input: PathBuf,
    pub output: PathBuf,
    /// Extensions to pick up, with or without the leading dot
    #[serde(default = "default_file_types")]
    pub file_types: Vec<String>,
    /// `None` picks [`default_workers`]
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default = "default_true")]
    pub use_cache: bool,
    /// `None` uses [`LocationCache::default_path`]
    #[serde(default)]
    pub cache_path: Option<PathBuf>,
    #[serde(default)]
    pub geocoder: GeocoderOptions,
}

/// Settings checked against the file system, ready to run.
#[derive(Debug, Clone)]
pub struct ValidatedOptions {
    /// Canonical input folder
    pub input: PathBuf,
    /// Canonical output folder (created if missing)
    pub output: PathBuf,
    pub filter: ExtensionFilter,
    pub workers: usize,
}

impl ProcessOptions {
    /// Options with defaults for everything but the two folders.
    pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            file_types: default_file_types(),
            workers: None,
            use_cache: true,
            cache_path: None,
            geocoder: GeocoderOptions::default(),
        }
    }

    /// Check paths and settings. Creates the output folder when it is missing;
    /// nothing else is touched.
    pub fn validate(&self) -> Result<ValidatedOptions, ConfigError> {
        let workers = self.workers.unwrap_or_else(default_workers);
        if workers == 0 {
            return Err(ConfigError::NoWorkers);
        }
        let filter = ExtensionFilter::new(&self.file_types);
        if filter.is_empty() {
            return Err(ConfigError::NoFileTypes);
        }

        if !self.input.exists() {
            return Err(ConfigError::InputMissing(self.input.clone()));
        }
        if !self.input.is_dir() {
            return Err(ConfigError::InputNotDirectory(self.input.clone()));
        }
        let input = self
            .input
            .canonicalize()
            .map_err(|_| ConfigError::InputMissing(self.input.clone()))?;

        if self.output.exists() {
            if !self.output.is_dir() {
                return Err(ConfigError::OutputNotDirectory(self.output.clone()));
            }
        } else {
            fs::create_dir_all(&self.output).map_err(|source| ConfigError::OutputUncreatable {
                path: self.output.clone(),
                source,
            })?;
        }
        let output = self
            .output
            .canonicalize()
            .map_err(|source| ConfigError::OutputUncreatable {
                path: self.output.clone(),
                source,
            })?;
        if output == input {
            return Err(ConfigError::OutputIsInput(self.output.clone()));
        }

        Ok(ValidatedOptions {
            input,
            output,
            filter,
            workers,
        })
    }
}

/// Last state a file reached before it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileStage {
    Discovered,
    Extracted,
    Resolved,
    Planned,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileFailure {
    pub source: PathBuf,
    pub stage: FileStage,
    pub error: String,
}

impl FileFailure {
    fn new(source: &Path, stage: FileStage, error: &dyn std::error::Error) -> Self {
        Self {
            source: source.to_path_buf(),
            stage,
            error: error.to_string(),
        }
    }
}

/// Run summary. `processed + skipped + failed == total_files`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessResult {
    pub total_files: u64,
    /// Copied during this run
    pub processed: u64,
    /// Identical copy already in place
    pub skipped: u64,
    pub failed: u64,
    #[serde(default)]
    pub failures: Vec<FileFailure>,
    pub cache_entries: u64,
    #[serde(default)]
    pub resolver: ResolverStats,
}

/// Control options for process execution.
#[derive(Debug, Clone, Default)]
pub struct ProcessControl {
    /// Cancellation token for stopping a run early.
    pub cancel_token: Option<CancellationToken>,
}

impl ProcessControl {
    /// Create a new ProcessControl with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create ProcessControl with a cancellation token.
    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = Some(token);
        self
    }

    fn check(&self) -> Result<(), CancelledError> {
        self.cancel_token.as_ref().map_or(Ok(()), CancellationToken::check)
    }
}

/// Type alias for progress callback: `(stage, current, total, message)`
pub type ProgressCallback<'a> = dyn Fn(&str, u64, u64, &str) + Send + Sync + 'a;

/// Minimum time between two progress events.
const PROGRESS_INTERVAL: Duration = Duration::from_millis(200);

/// Throttled progress reporter: emits at most every 200ms, plus the final event.
pub struct ThrottledProgress<'a> {
    inner: &'a ProgressCallback<'a>,
    last_emit: Mutex<Option<Instant>>,
}

impl<'a> ThrottledProgress<'a> {
    pub fn new(inner: &'a ProgressCallback<'a>) -> Self {
        Self {
            inner,
            last_emit: Mutex::new(None),
        }
    }

    pub fn report(&self, stage: &str, current: u64, total: u64, message: &str) {
        let is_done = current >= total;
        if !is_done {
            let mut last = self.last_emit.lock().unwrap_or_else(PoisonError::into_inner);
            if last.is_some_and(|t| t.elapsed() < PROGRESS_INTERVAL) {
                return;
            }
            *last = Some(Instant::now());
        }
        (self.inner)(stage, current, total, message);
    }
}

/// Run the full organization pipeline with progress reporting.
pub fn process(options: &ProcessOptions, progress_callback: &ProgressCallback<'_>) -> anyhow::Result<ProcessResult> {
    process_with_control(options, &ProcessControl::default(), progress_callback)
}

/// Run the pipeline with the HTTP geocoder and the configured cache.
pub fn process_with_control(
    options: &ProcessOptions,
    control: &ProcessControl,
    progress_callback: &ProgressCallback<'_>,
) -> anyhow::Result<ProcessResult> {
    let validated = options.validate()?;

    let cache = match (options.use_cache, options.cache_path.clone().or_else(LocationCache::default_path)) {
        (true, Some(path)) => LocationCache::open(path),
        (true, None) => {
            tracing::warn!("No home directory for the geocoding cache; caching for this run only");
            LocationCache::in_memory()
        }
        (false, _) => LocationCache::in_memory(),
    };
    let geocoder = NominatimGeocoder::from_options(&options.geocoder)?;
    let resolver = LocationResolver::new(
        Box::new(geocoder),
        cache,
        Duration::from_millis(options.geocoder.min_request_interval_ms),
    );

    run(&validated, &resolver, control, progress_callback)
}

/// Run the pipeline with a caller-supplied resolver.
pub fn process_with_resolver(
    options: &ProcessOptions,
    resolver: &LocationResolver,
    control: &ProcessControl,
    progress_callback: &ProgressCallback<'_>,
) -> anyhow::Result<ProcessResult> {
    let validated = options.validate()?;
    run(&validated, resolver, control, progress_callback)
}

/// Extract, resolve, plan and place one file.
fn organize_file(path: &Path, output: &Path, resolver: &LocationResolver) -> Result<Placement, FileFailure> {
    let record = extract::extract(path).map_err(|e| FileFailure::new(path, FileStage::Discovered, &e))?;
    tracing::debug!(
        path = %path.display(),
        captured_at = %record.captured_at,
        source = ?record.timestamp_source,
        has_gps = record.coordinates.is_some(),
        "Extracted"
    );

    let place = resolver.resolve(record.coordinates);
    let dest = planner::plan_destination(&record, &place, output);
    tracing::debug!(path = %path.display(), dest = %dest.display(), "Planned");

    planner::place_file(path, &dest).map_err(|e| FileFailure::new(path, FileStage::Planned, &e))
}

fn flush_cache(resolver: &LocationResolver) {
    if let Err(e) = resolver.flush() {
        tracing::warn!(error = %e, "Failed to save geocoding cache");
    }
}

fn run(
    options: &ValidatedOptions,
    resolver: &LocationResolver,
    control: &ProcessControl,
    progress_callback: &ProgressCallback<'_>,
) -> anyhow::Result<ProcessResult> {
    let tp = ThrottledProgress::new(progress_callback);
    control.check()?;

    tracing::info!(
        input = %options.input.display(),
        output = %options.output.display(),
        workers = options.workers,
        "Organizing media"
    );

    // Stage 1: Discover
    let exclude = options
        .output
        .starts_with(&options.input)
        .then_some(options.output.as_path());
    let files = scan::discover_files(&options.input, &options.filter, exclude);
    let total = files.len() as u64;
    tp.report("scan", total, total, "Discovered media files");
    tracing::info!(files = total, "Discovered media files");

    // Stage 2: Organize on a dedicated pool
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.workers)
        .thread_name(|i| format!("organize-{i}"))
        .build()?;
    let counter = AtomicU64::new(0);

    let outcomes: Vec<Result<Placement, FileFailure>> = pool.install(|| {
        files
            .par_iter()
            .filter_map(|path| {
                if control.check().is_err() {
                    return None;
                }
                let outcome = organize_file(path, &options.output, resolver);
                match &outcome {
                    Ok(placement) => {
                        tracing::debug!(path = %path.display(), placement = ?placement, "Placed");
                    }
                    Err(failure) => tracing::warn!(
                        path = %path.display(),
                        stage = ?failure.stage,
                        error = %failure.error,
                        "Failed to organize file"
                    ),
                }
                let current = counter.fetch_add(1, Ordering::Relaxed) + 1;
                tp.report("organize", current, total, &path.display().to_string());
                Some(outcome)
            })
            .collect()
    });

    flush_cache(resolver);

    if control.check().is_err() {
        tracing::info!(handled = outcomes.len(), total, "Run cancelled");
        return Err(CancelledError.into());
    }

    let mut result = ProcessResult {
        total_files: total,
        ..Default::default()
    };
    for outcome in outcomes {
        match outcome {
            Ok(Placement::Copied(_)) => result.processed += 1,
            Ok(Placement::AlreadyPresent(_)) => result.skipped += 1,
            Err(failure) => {
                result.failed += 1;
                result.failures.push(failure);
            }
        }
    }
    result.cache_entries = resolver.cache().len() as u64;
    result.resolver = resolver.stats();

    tracing::info!(
        total = result.total_files,
        processed = result.processed,
        skipped = result.skipped,
        failed = result.failed,
        cache_entries = result.cache_entries,
        lookups = result.resolver.lookups,
        cache_hits = result.resolver.hits,
        "Run complete"
    );
    Ok(result)
}
