use std::ffi::OsString;
use std::path::PathBuf;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Decimal places kept when coordinates are turned into a cache key.
pub const COORDINATE_PRECISION: usize = 4;

/// Signed decimal degrees (south and west are negative).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    /// Returns `None` for non-finite or out-of-range values.
    pub fn new(latitude: f64, longitude: f64) -> Option<Self> {
        let valid = latitude.is_finite()
            && longitude.is_finite()
            && (-90.0..=90.0).contains(&latitude)
            && (-180.0..=180.0).contains(&longitude);
        valid.then_some(Self { latitude, longitude })
    }

    /// Coordinates rounded to [`COORDINATE_PRECISION`] decimals.
    pub fn quantized(&self) -> Self {
        let scale = 10f64.powi(COORDINATE_PRECISION as i32);
        Self {
            latitude: (self.latitude * scale).round() / scale,
            longitude: (self.longitude * scale).round() / scale,
        }
    }

    /// Cache key, e.g. `"37.7749,-122.4194"`.
    pub fn cache_key(&self) -> String {
        let q = self.quantized();
        // -0.0 and 0.0 must share a key
        let lat = if q.latitude == 0.0 { 0.0 } else { q.latitude };
        let lon = if q.longitude == 0.0 { 0.0 } else { q.longitude };
        format!(
            "{:.prec$},{:.prec$}",
            lat,
            lon,
            prec = COORDINATE_PRECISION
        )
    }
}

/// Which rule produced [`MediaRecord::captured_at`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimestampSource {
    /// EXIF `DateTimeOriginal`/`DateTimeDigitized`, QuickTime `creationdate` key
    CaptureTag,
    /// EXIF `DateTime`, QuickTime `mvhd` creation time
    CreationTag,
    /// Last-modified time of the file itself
    FileModified,
}

#[derive(Debug, Clone)]
pub struct MediaRecord {
    /// Path of the original file
    pub source_path: PathBuf,
    /// Just the filename, byte for byte
    pub filename: OsString,
    /// Capture time as local wall-clock time
    pub captured_at: NaiveDateTime,
    pub timestamp_source: TimestampSource,
    pub coordinates: Option<Coordinates>,
}
