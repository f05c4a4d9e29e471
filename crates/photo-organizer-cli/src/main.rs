use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Mutex;
use std::time::Instant;

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use photo_organizer_core::{
    CancellationToken, CancelledError, GeocoderOptions, ProcessControl, ProcessOptions, ProcessResult,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "photo-organizer",
    version,
    about = "Copy photos and videos into YYYY/MM-Month/DD/Place folders using their embedded date and GPS"
)]
struct Cli {
    /// Folder to read media from (searched recursively)
    #[arg(long, env = "PHOTO_ORGANIZER_INPUT")]
    input_folder: PathBuf,

    /// Folder to build the organized tree in
    #[arg(long, env = "PHOTO_ORGANIZER_OUTPUT")]
    output_folder: PathBuf,

    /// Verbose per-file logging (disables the progress bar)
    #[arg(long)]
    debug: bool,

    /// Number of worker threads [default: min(32, 2 x CPUs)]
    #[arg(long, env = "PHOTO_ORGANIZER_WORKERS")]
    workers: Option<usize>,

    /// Don't read or write the persistent geocoding cache
    #[arg(long)]
    no_cache: bool,

    /// Comma-separated extensions to process, e.g. "jpg,heic,mov"
    #[arg(long, value_delimiter = ',')]
    file_types: Option<Vec<String>>,

    /// Geocoding cache file [default: ~/.photo_organizer/geocoding_cache.json]
    #[arg(long, env = "PHOTO_ORGANIZER_CACHE_FILE")]
    cache_file: Option<PathBuf>,

    /// Reverse geocoding endpoint (Nominatim-compatible)
    #[arg(long, env = "PHOTO_ORGANIZER_GEOCODER_URL")]
    geocoder_url: Option<String>,

    /// Minimum time between geocoding requests, in milliseconds
    #[arg(long, env = "PHOTO_ORGANIZER_MIN_REQUEST_INTERVAL_MS")]
    min_request_interval_ms: Option<u64>,

    /// Timeout for one geocoding request, in seconds
    #[arg(long, env = "PHOTO_ORGANIZER_LOOKUP_TIMEOUT_SECS")]
    lookup_timeout_secs: Option<u64>,
}

impl Cli {
    fn into_options(self) -> ProcessOptions {
        let mut geocoder = GeocoderOptions::default();
        if let Some(url) = self.geocoder_url {
            geocoder.endpoint = url;
        }
        if let Some(ms) = self.min_request_interval_ms {
            geocoder.min_request_interval_ms = ms;
        }
        if let Some(secs) = self.lookup_timeout_secs {
            geocoder.timeout_secs = secs;
        }

        let mut options = ProcessOptions::new(self.input_folder, self.output_folder);
        if let Some(types) = self.file_types {
            options.file_types = types;
        }
        options.workers = self.workers;
        options.use_cache = !self.no_cache;
        options.cache_path = self.cache_file;
        options.geocoder = geocoder;
        options
    }
}

fn init_logging(debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn progress_bar() -> ProgressBar {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{bar:40}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    pb
}

fn print_summary(result: &ProcessResult, elapsed_secs: f64) {
    for failure in &result.failures {
        eprintln!("  failed: {} ({:?}): {}", failure.source.display(), failure.stage, failure.error);
    }
    eprintln!(
        "Done! {} files: {} copied, {} already present, {} failed; {} cached locations, {} lookups ({:.2}s)",
        result.total_files,
        result.processed,
        result.skipped,
        result.failed,
        result.cache_entries,
        result.resolver.lookups,
        elapsed_secs
    );
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.debug);
    let t_total = Instant::now();

    let token = CancellationToken::new();
    let handler_token = token.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        eprintln!("\nCancelling: waiting for files in progress...");
        handler_token.cancel();
    }) {
        tracing::warn!(error = %e, "Could not install Ctrl-C handler");
    }

    let show_bar = !cli.debug;
    let options = cli.into_options();
    let control = ProcessControl::new().with_cancel_token(token);

    let pb = show_bar.then(progress_bar);
    let last_stage = Mutex::new(String::new());
    let on_progress = |stage: &str, current: u64, total: u64, message: &str| {
        let Some(pb) = &pb else {
            return;
        };
        if let Ok(mut last) = last_stage.lock() {
            if *last != stage {
                pb.set_length(total);
                *last = stage.to_string();
            }
        }
        pb.set_position(current);
        pb.set_message(message.to_string());
    };

    let outcome = photo_organizer_core::process_with_control(&options, &control, &on_progress);
    if let Some(pb) = &pb {
        pb.finish_and_clear();
    }

    match outcome {
        Ok(result) => {
            print_summary(&result, t_total.elapsed().as_secs_f64());
            ExitCode::SUCCESS
        }
        Err(e) if e.downcast_ref::<CancelledError>().is_some() => {
            eprintln!("Cancelled after {:.2}s", t_total.elapsed().as_secs_f64());
            ExitCode::from(130)
        }
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
