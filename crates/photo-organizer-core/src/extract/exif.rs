use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;

use chrono::NaiveDateTime;
use exif::{Exif, In, Rational, Reader, SRational, Tag, Value};

use super::{parse_exif_datetime, EmbeddedMetadata, MetadataReader};
use crate::media::Coordinates;

/// EXIF in JPEG, TIFF/DNG, HEIF, PNG and WebP containers.
pub struct ExifReader;

impl MetadataReader for ExifReader {
    fn name(&self) -> &'static str {
        "exif"
    }

    fn read(&self, path: &Path) -> io::Result<EmbeddedMetadata> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);

        match Reader::new().read_from_container(&mut reader) {
            Ok(exif) => Ok(embedded_from_exif(&exif)),
            Err(exif::Error::Io(e)) if e.kind() != io::ErrorKind::UnexpectedEof => Err(e),
            Err(exif::Error::NotFound(_)) => {
                tracing::debug!(path = %path.display(), "No EXIF block");
                Ok(EmbeddedMetadata::default())
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Unusable EXIF data; falling back");
                Ok(EmbeddedMetadata::default())
            }
        }
    }
}

pub fn embedded_from_exif(exif: &Exif) -> EmbeddedMetadata {
    EmbeddedMetadata {
        capture: first_datetime(exif, &[Tag::DateTimeOriginal, Tag::DateTimeDigitized]),
        creation: first_datetime(exif, &[Tag::DateTime]),
        coordinates: gps_coordinates(exif),
    }
}

fn ascii_field(exif: &Exif, tag: Tag) -> Option<String> {
    let field = exif.get_field(tag, In::PRIMARY)?;
    match &field.value {
        Value::Ascii(values) => values
            .first()
            .and_then(|bytes| std::str::from_utf8(bytes).ok())
            .map(|s| s.to_string()),
        _ => None,
    }
}

fn first_datetime(exif: &Exif, tags: &[Tag]) -> Option<NaiveDateTime> {
    tags.iter()
        .filter_map(|&tag| ascii_field(exif, tag))
        .find_map(|s| parse_exif_datetime(&s))
}

/// Combine `[deg]`, `[deg, min]` or `[deg, min, sec]` into decimal degrees.
fn combine_dms(parts: &[f64]) -> Option<f64> {
    let degrees = match parts {
        [d] => *d,
        [d, m] => d + m / 60.0,
        [d, m, s, ..] => d + m / 60.0 + s / 3600.0,
        [] => return None,
    };
    degrees.is_finite().then_some(degrees)
}

fn unsigned_parts(values: &[Rational]) -> Vec<f64> {
    values
        .iter()
        .map(|r| if r.denom == 0 { f64::NAN } else { r.to_f64() })
        .collect()
}

fn signed_parts(values: &[SRational]) -> Vec<f64> {
    values
        .iter()
        .map(|r| if r.denom == 0 { f64::NAN } else { r.to_f64() })
        .collect()
}

fn gps_component(exif: &Exif, value_tag: Tag, ref_tag: Tag, negative_ref: u8) -> Option<f64> {
    let field = exif.get_field(value_tag, In::PRIMARY)?;
    let magnitude = match &field.value {
        Value::Rational(v) => combine_dms(&unsigned_parts(v))?,
        Value::SRational(v) => combine_dms(&signed_parts(v))?,
        _ => return None,
    };

    // A missing reference means north/east
    let reference = ascii_field(exif, ref_tag).and_then(|s| s.bytes().next());
    match reference {
        Some(r) if r.eq_ignore_ascii_case(&negative_ref) => Some(-magnitude.abs()),
        _ => Some(magnitude),
    }
}

pub fn gps_coordinates(exif: &Exif) -> Option<Coordinates> {
    let lat = gps_component(exif, Tag::GPSLatitude, Tag::GPSLatitudeRef, b'S')?;
    let lon = gps_component(exif, Tag::GPSLongitude, Tag::GPSLongitudeRef, b'W')?;
    Coordinates::new(lat, lon)
}
