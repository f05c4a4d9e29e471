use std::ffi::OsStr;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use filetime::FileTime;
use sha2::{Digest, Sha256};
use unicode_normalization::UnicodeNormalization;

use crate::error::PlacementError;
use crate::geocode::UNKNOWN_LOCATION;
use crate::media::MediaRecord;

/// Highest `_N` suffix tried before giving up on a name.
pub const MAX_COLLISION_SUFFIX: u32 = 9999;

/// How a planned file ended up in the output tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    /// Copied to this path during this run.
    Copied(PathBuf),
    /// An identical file was already at this path.
    AlreadyPresent(PathBuf),
}

impl Placement {
    pub fn path(&self) -> &Path {
        match self {
            Placement::Copied(p) | Placement::AlreadyPresent(p) => p,
        }
    }
}

/// Make a place name safe to use as a single directory name.
pub fn sanitize_place_name(name: &str) -> String {
    let cleaned: String = name
        .nfc()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let trimmed = cleaned.trim_matches(|c: char| c == '.' || c.is_whitespace());
    if trimmed.is_empty() {
        UNKNOWN_LOCATION.to_string()
    } else {
        trimmed.to_string()
    }
}

/// `output_root/YYYY/MM-MonthName/DD/place/filename`
pub fn plan_destination(record: &MediaRecord, place: &str, output_root: &Path) -> PathBuf {
    let dt = &record.captured_at;
    output_root
        .join(dt.format("%Y").to_string())
        .join(dt.format("%m-%B").to_string())
        .join(dt.format("%d").to_string())
        .join(sanitize_place_name(place))
        .join(&record.filename)
}

/// `photo.jpg` -> `photo_3.jpg`
fn suffixed(planned: &Path, n: u32) -> PathBuf {
    let mut name = planned.file_stem().map(OsStr::to_os_string).unwrap_or_default();
    name.push(format!("_{n}"));
    if let Some(ext) = planned.extension() {
        name.push(".");
        name.push(ext);
    }
    planned.with_file_name(name)
}

fn file_digest(path: &Path) -> io::Result<String> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Sha256::new();
    io::copy(&mut reader, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

/// Source size and lazily computed digest, compared against occupied names.
struct SourceFingerprint<'a> {
    path: &'a Path,
    size: u64,
    digest: Option<String>,
}

impl SourceFingerprint<'_> {
    fn matches(&mut self, existing: &Path) -> io::Result<bool> {
        let existing_meta = fs::metadata(existing)?;
        if !existing_meta.is_file() || existing_meta.len() != self.size {
            return Ok(false);
        }
        let digest = match &self.digest {
            Some(d) => d.clone(),
            None => {
                let d = file_digest(self.path)?;
                self.digest = Some(d.clone());
                d
            }
        };
        Ok(file_digest(existing)? == digest)
    }
}

fn copy_contents(source: &Path, dest_file: File, dest: &Path) -> io::Result<()> {
    let source_meta = fs::metadata(source)?;
    let mut reader = BufReader::new(File::open(source)?);
    let mut writer = BufWriter::new(dest_file);
    io::copy(&mut reader, &mut writer)?;
    writer.flush()?;
    drop(writer);

    fs::set_permissions(dest, source_meta.permissions())?;
    let atime = FileTime::from_last_access_time(&source_meta);
    let mtime = FileTime::from_last_modification_time(&source_meta);
    filetime::set_file_times(dest, atime, mtime)?;
    Ok(())
}

/// Copy `source` to `planned`, or to the first free `stem_N.ext` beside it.
///
/// An occupied name holding the same bytes as `source` ends the search with
/// [`Placement::AlreadyPresent`]. Existing files are never overwritten.
pub fn place_file(source: &Path, planned: &Path) -> Result<Placement, PlacementError> {
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| PlacementError::Io { path, source }
    };

    if let Some(parent) = planned.parent() {
        fs::create_dir_all(parent).map_err(io_err(parent))?;
    }
    let size = fs::metadata(source).map_err(io_err(source))?.len();
    let mut fingerprint = SourceFingerprint {
        path: source,
        size,
        digest: None,
    };

    for n in 0..=MAX_COLLISION_SUFFIX {
        let candidate = if n == 0 {
            planned.to_path_buf()
        } else {
            suffixed(planned, n)
        };

        match OpenOptions::new().write(true).create_new(true).open(&candidate) {
            Ok(file) => {
                if let Err(e) = copy_contents(source, file, &candidate) {
                    // Don't leave a truncated copy behind
                    let _ = fs::remove_file(&candidate);
                    return Err(PlacementError::Io {
                        path: candidate,
                        source: e,
                    });
                }
                return Ok(Placement::Copied(candidate));
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                if fingerprint.matches(&candidate).map_err(io_err(candidate.as_path()))? {
                    return Ok(Placement::AlreadyPresent(candidate));
                }
                tracing::debug!(path = %candidate.display(), "Name taken by different content");
            }
            Err(e) => return Err(io_err(candidate.as_path())(e)),
        }
    }

    Err(PlacementError::CollisionExhausted {
        path: planned.to_path_buf(),
        attempts: MAX_COLLISION_SUFFIX + 1,
    })
}
