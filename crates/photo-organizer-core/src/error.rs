use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// The file could not be opened or read.
#[derive(Error, Debug)]
#[error("cannot read {}: {source}", .path.display())]
pub struct ExtractionError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

#[derive(Error, Debug)]
pub enum PlacementError {
    #[error("no free name for {} after {attempts} attempts", .path.display())]
    CollisionExhausted { path: PathBuf, attempts: u32 },

    #[error("I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Invalid run settings; reported before any file is touched.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("input folder does not exist: {}", .0.display())]
    InputMissing(PathBuf),

    #[error("input path is not a directory: {}", .0.display())]
    InputNotDirectory(PathBuf),

    #[error("output path exists and is not a directory: {}", .0.display())]
    OutputNotDirectory(PathBuf),

    #[error("output folder must differ from the input folder: {}", .0.display())]
    OutputIsInput(PathBuf),

    #[error("cannot create output folder {}: {source}", .path.display())]
    OutputUncreatable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("worker count must be at least 1")]
    NoWorkers,

    #[error("file type filter is empty")]
    NoFileTypes,
}

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cache file {} is not valid JSON: {source}", .path.display())]
    Format {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
