pub mod exif;
pub mod quicktime;

use std::ffi::OsStr;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::Path;

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, NaiveTime};

use crate::error::ExtractionError;
use crate::media::{Coordinates, MediaRecord, TimestampSource};

pub use self::exif::ExifReader;
pub use self::quicktime::QuickTimeReader;

/// Tags found inside a file, before fallback rules are applied.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmbeddedMetadata {
    /// Capture-time tag
    pub capture: Option<NaiveDateTime>,
    /// File-system-style creation tag
    pub creation: Option<NaiveDateTime>,
    pub coordinates: Option<Coordinates>,
}

/// One embedded-metadata encoding.
///
/// Implementations only fail on I/O errors. Missing, truncated or corrupt
/// metadata yields an empty (or partial) [`EmbeddedMetadata`].
pub trait MetadataReader: Send + Sync {
    fn name(&self) -> &'static str;
    fn read(&self, path: &Path) -> io::Result<EmbeddedMetadata>;
}

static EXIF_READER: ExifReader = ExifReader;
static QUICKTIME_READER: QuickTimeReader = QuickTimeReader;

const HEIF_BRANDS: &[&[u8; 4]] = &[
    b"heic", b"heix", b"hevc", b"hevx", b"heim", b"heis", b"mif1", b"msf1", b"avif",
];
const QUICKTIME_LEADING_ATOMS: &[&[u8; 4]] = &[b"moov", b"mdat", b"wide", b"free", b"skip", b"pnot"];

/// Pick a reader from the file signature, falling back to the extension.
pub fn select_reader(header: &[u8], path: &Path) -> Option<&'static dyn MetadataReader> {
    if header.starts_with(&[0xFF, 0xD8])
        || header.starts_with(b"II*\0")
        || header.starts_with(b"MM\0*")
        || header.starts_with(b"\x89PNG")
        || (header.starts_with(b"RIFF") && header.get(8..12) == Some(b"WEBP".as_slice()))
    {
        return Some(&EXIF_READER);
    }

    if let Some(kind) = header.get(4..8) {
        if kind == b"ftyp" {
            let brand = header.get(8..12).unwrap_or_default();
            if HEIF_BRANDS.iter().any(|b| b.as_slice() == brand) {
                return Some(&EXIF_READER);
            }
            return Some(&QUICKTIME_READER);
        }
        if QUICKTIME_LEADING_ATOMS.iter().any(|a| a.as_slice() == kind) {
            return Some(&QUICKTIME_READER);
        }
    }

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())?;
    match ext.as_str() {
        "jpg" | "jpeg" | "tif" | "tiff" | "dng" | "png" | "webp" | "heic" | "heif" => Some(&EXIF_READER),
        "mov" | "mp4" | "m4v" | "3gp" => Some(&QUICKTIME_READER),
        _ => None,
    }
}

fn read_header(path: &Path) -> io::Result<Vec<u8>> {
    let mut header = Vec::with_capacity(16);
    File::open(path)?.take(16).read_to_end(&mut header)?;
    Ok(header)
}

/// Extract a normalized record from a media file.
///
/// Timestamp order: capture tag, then creation tag, then the file's
/// last-modified time. Only I/O failures are errors.
pub fn extract(path: &Path) -> Result<MediaRecord, ExtractionError> {
    let fail = |source: io::Error| ExtractionError {
        path: path.to_path_buf(),
        source,
    };

    let fs_meta = fs::metadata(path).map_err(fail)?;
    if !fs_meta.is_file() {
        return Err(fail(io::Error::new(io::ErrorKind::InvalidInput, "not a regular file")));
    }

    let header = read_header(path).map_err(fail)?;
    let embedded = match select_reader(&header, path) {
        Some(reader) => {
            let embedded = reader.read(path).map_err(fail)?;
            tracing::debug!(path = %path.display(), reader = reader.name(), ?embedded, "Read embedded metadata");
            embedded
        }
        None => {
            tracing::debug!(path = %path.display(), "No metadata reader for file; using file time");
            EmbeddedMetadata::default()
        }
    };

    let (captured_at, timestamp_source) = match (embedded.capture, embedded.creation) {
        (Some(t), _) => (t, TimestampSource::CaptureTag),
        (None, Some(t)) => (t, TimestampSource::CreationTag),
        (None, None) => {
            let modified = fs_meta.modified().map_err(fail)?;
            (DateTime::<Local>::from(modified).naive_local(), TimestampSource::FileModified)
        }
    };

    let filename = path.file_name().map(OsStr::to_os_string).unwrap_or_default();

    Ok(MediaRecord {
        source_path: path.to_path_buf(),
        filename,
        captured_at,
        timestamp_source,
        coordinates: embedded.coordinates,
    })
}

/// Parse EXIF-style timestamps: `YYYY:MM:DD HH:MM:SS`, other date separators,
/// optional fractional seconds, or a bare date (midnight).
pub fn parse_exif_datetime(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim_matches(|c: char| c == '\0' || c.is_whitespace());
    // Cameras without a clock write all zeros
    if s.is_empty() || s.starts_with("0000") {
        return None;
    }

    let mut parts = s.splitn(2, [' ', 'T']);
    let date = parts.next()?.replace(['-', '/', '\\', '.'], ":");
    let date = NaiveDate::parse_from_str(&date, "%Y:%m:%d").ok()?;

    let time = parts
        .next()
        .map(str::trim)
        .and_then(|t| t.split('.').next())
        .and_then(|t| NaiveTime::parse_from_str(t.get(..8).unwrap_or(t), "%H:%M:%S").ok())
        .unwrap_or(NaiveTime::MIN);

    Some(date.and_time(time))
}
