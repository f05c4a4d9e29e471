use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use chrono::{DateTime, Local, NaiveDateTime};

use super::{parse_exif_datetime, EmbeddedMetadata, MetadataReader};
use crate::media::Coordinates;

/// Seconds between 1904-01-01 (QuickTime epoch) and 1970-01-01.
const QUICKTIME_EPOCH_OFFSET: i64 = 2_082_844_800;
const MAX_MOOV_SIZE: u64 = 64 * 1024 * 1024;

const LOCATION_KEY: &str = "com.apple.quicktime.location.ISO6709";
const CREATION_DATE_KEY: &str = "com.apple.quicktime.creationdate";
const XYZ: &[u8; 4] = &[0xA9, b'x', b'y', b'z'];

/// QuickTime / ISO base media (MOV, MP4, M4V, 3GP) atoms.
pub struct QuickTimeReader;

impl MetadataReader for QuickTimeReader {
    fn name(&self) -> &'static str {
        "quicktime"
    }

    fn read(&self, path: &Path) -> io::Result<EmbeddedMetadata> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        let mut reader = BufReader::new(file);

        let moov = match read_moov(&mut reader, len) {
            Ok(moov) => moov,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => None,
            Err(e) => return Err(e),
        };
        match moov {
            Some(moov) => Ok(parse_moov(&moov)),
            None => {
                tracing::warn!(path = %path.display(), "No usable moov atom; falling back");
                Ok(EmbeddedMetadata::default())
            }
        }
    }
}

/// Walk top-level atoms and return the body of `moov`.
fn read_moov<R: Read + Seek>(reader: &mut R, file_len: u64) -> io::Result<Option<Vec<u8>>> {
    let mut pos = 0u64;
    while pos + 8 <= file_len {
        reader.seek(SeekFrom::Start(pos))?;
        let mut head = [0u8; 8];
        reader.read_exact(&mut head)?;
        let size32 = u32::from_be_bytes([head[0], head[1], head[2], head[3]]);
        let (header_len, size) = match size32 {
            0 => (8, file_len - pos),
            1 => {
                let mut ext = [0u8; 8];
                reader.read_exact(&mut ext)?;
                (16, u64::from_be_bytes(ext))
            }
            n => (8, u64::from(n)),
        };
        if size < header_len || size > file_len - pos {
            return Ok(None);
        }

        if &head[4..8] == b"moov" {
            let body_len = size - header_len;
            if body_len > MAX_MOOV_SIZE {
                return Ok(None);
            }
            let mut body = vec![0u8; body_len as usize];
            reader.read_exact(&mut body)?;
            return Ok(Some(body));
        }
        pos += size;
    }
    Ok(None)
}

/// Child atoms of an in-memory atom body. Stops at the first malformed header.
struct Atoms<'a> {
    buf: &'a [u8],
}

impl<'a> Atoms<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }
}

impl<'a> Iterator for Atoms<'a> {
    type Item = ([u8; 4], &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        let buf = self.buf;
        if buf.len() < 8 {
            return None;
        }
        let kind = [buf[4], buf[5], buf[6], buf[7]];
        let (header_len, size) = match u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) {
            0 => (8, buf.len()),
            1 => {
                let ext = buf.get(8..16)?;
                let size = u64::from_be_bytes(ext.try_into().ok()?);
                (16, usize::try_from(size).ok()?)
            }
            n => (8, n as usize),
        };
        if size < header_len || size > buf.len() {
            self.buf = &[];
            return None;
        }
        self.buf = &buf[size..];
        Some((kind, &buf[header_len..size]))
    }
}

fn find<'a>(buf: &'a [u8], kind: &[u8; 4]) -> Option<&'a [u8]> {
    Atoms::new(buf).find(|(k, _)| k == kind).map(|(_, body)| body)
}

fn read_u32(buf: &[u8], at: usize) -> Option<u32> {
    let bytes = buf.get(at..at + 4)?;
    Some(u32::from_be_bytes(bytes.try_into().ok()?))
}

fn parse_moov(moov: &[u8]) -> EmbeddedMetadata {
    let mut meta = EmbeddedMetadata {
        creation: find(moov, b"mvhd").and_then(mvhd_creation),
        ..Default::default()
    };

    for (key, value) in find(moov, b"meta").map(mdta_items).unwrap_or_default() {
        let Ok(value) = std::str::from_utf8(&value) else {
            continue;
        };
        match key.as_str() {
            CREATION_DATE_KEY => meta.capture = parse_quicktime_date(value),
            LOCATION_KEY => meta.coordinates = parse_iso6709(value),
            _ => {}
        }
    }

    if meta.coordinates.is_none() {
        meta.coordinates = find(moov, b"udta")
            .and_then(|udta| find(udta, XYZ))
            .and_then(xyz_string)
            .and_then(|s| parse_iso6709(&s));
    }
    meta
}

/// `mvhd` creation time, as local wall-clock time. Zero means unset.
fn mvhd_creation(mvhd: &[u8]) -> Option<NaiveDateTime> {
    let secs = match mvhd.first()? {
        0 => i64::from(read_u32(mvhd, 4)?),
        1 => {
            let bytes = mvhd.get(4..12)?;
            i64::try_from(u64::from_be_bytes(bytes.try_into().ok()?)).ok()?
        }
        _ => return None,
    };
    if secs == 0 {
        return None;
    }
    let utc = DateTime::from_timestamp(secs - QUICKTIME_EPOCH_OFFSET, 0)?;
    Some(utc.with_timezone(&Local).naive_local())
}

/// `(key, value)` pairs from a `meta` atom using `mdta` keys.
fn mdta_items(meta: &[u8]) -> Vec<(String, Vec<u8>)> {
    // QuickTime `meta` has no version/flags; ISO (MP4) `meta` does
    let body = match meta.get(4..8) {
        Some(b"hdlr" | b"keys" | b"ilst") => meta,
        _ => meta.get(4..).unwrap_or_default(),
    };
    let (Some(keys), Some(ilst)) = (find(body, b"keys"), find(body, b"ilst")) else {
        return Vec::new();
    };

    let count = read_u32(keys, 4).unwrap_or(0);
    let mut names = Vec::new();
    let mut rest = keys.get(8..).unwrap_or_default();
    for _ in 0..count {
        let Some(size) = read_u32(rest, 0).map(|s| s as usize) else {
            break;
        };
        if size < 8 || size > rest.len() {
            break;
        }
        names.push(String::from_utf8_lossy(&rest[8..size]).into_owned());
        rest = &rest[size..];
    }

    Atoms::new(ilst)
        .filter_map(|(kind, item)| {
            let index = u32::from_be_bytes(kind) as usize;
            let name = names.get(index.checked_sub(1)?)?;
            let data = find(item, b"data")?;
            // type indicator (4) + locale (4)
            Some((name.clone(), data.get(8..)?.to_vec()))
        })
        .collect()
}

fn xyz_string(xyz: &[u8]) -> Option<String> {
    let len = u16::from_be_bytes([*xyz.first()?, *xyz.get(1)?]) as usize;
    let text = xyz.get(4..)?;
    let text = &text[..len.min(text.len())];
    Some(String::from_utf8_lossy(text).into_owned())
}

fn parse_quicktime_date(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    DateTime::parse_from_rfc3339(s)
        .or_else(|_| DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%z"))
        .map(|dt| dt.naive_local())
        .ok()
        .or_else(|| parse_exif_datetime(s))
}

/// One ISO 6709 component: `±DD.DDD`, `±DDMM.MMM` or `±DDMMSS.SSS`
/// (three degree digits for longitude).
fn iso6709_component(s: &str, degree_digits: usize) -> Option<f64> {
    let (sign, body) = match s.as_bytes().first()? {
        b'+' => (1.0, &s[1..]),
        b'-' => (-1.0, &s[1..]),
        _ => return None,
    };
    let int_len = body.find('.').unwrap_or(body.len());
    if int_len < degree_digits || !body[..int_len].bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let value = match int_len - degree_digits {
        0 => body.parse::<f64>().ok()?,
        2 => {
            let degrees: f64 = body[..degree_digits].parse().ok()?;
            let minutes: f64 = body[degree_digits..].parse().ok()?;
            degrees + minutes / 60.0
        }
        4 => {
            let degrees: f64 = body[..degree_digits].parse().ok()?;
            let minutes: f64 = body[degree_digits..degree_digits + 2].parse().ok()?;
            let seconds: f64 = body[degree_digits + 2..].parse().ok()?;
            degrees + minutes / 60.0 + seconds / 3600.0
        }
        _ => return None,
    };
    Some(sign * value)
}

/// Parse `+37.7749-122.4194+010.000/` (altitude and CRS suffix ignored).
pub fn parse_iso6709(s: &str) -> Option<Coordinates> {
    let s = s.trim().trim_end_matches('/');
    let starts: Vec<usize> = s
        .char_indices()
        .filter(|(_, c)| *c == '+' || *c == '-')
        .map(|(i, _)| i)
        .collect();
    if starts.len() < 2 || starts[0] != 0 {
        return None;
    }
    let lon_end = starts.get(2).copied().unwrap_or(s.len());
    let lat = iso6709_component(&s[..starts[1]], 2)?;
    let lon = iso6709_component(&s[starts[1]..lon_end], 3)?;
    Coordinates::new(lat, lon)
}
