//! Fixture builders for tests: minimal EXIF (TIFF) blocks wrapped in JPEG,
//! and QuickTime atom trees.

pub enum Val {
    Ascii(&'static str),
    Rationals(Vec<(u32, u32)>),
    /// Offset of another IFD in the list
    Pointer(usize),
}

pub struct Entry {
    pub tag: u16,
    pub val: Val,
}

impl Entry {
    pub fn new(tag: u16, val: Val) -> Self {
        Self { tag, val }
    }
}

pub const TAG_MAKE: u16 = 0x010F;
pub const TAG_DATE_TIME: u16 = 0x0132;
pub const TAG_EXIF_IFD: u16 = 0x8769;
pub const TAG_GPS_IFD: u16 = 0x8825;
pub const TAG_DATE_TIME_ORIGINAL: u16 = 0x9003;
pub const TAG_GPS_LAT_REF: u16 = 0x0001;
pub const TAG_GPS_LAT: u16 = 0x0002;
pub const TAG_GPS_LON_REF: u16 = 0x0003;
pub const TAG_GPS_LON: u16 = 0x0004;

fn encode(val: &Val, ifd_offsets: &[u32]) -> (u16, u32, Vec<u8>) {
    match val {
        Val::Ascii(s) => {
            let mut b = s.as_bytes().to_vec();
            b.push(0);
            (2, b.len() as u32, b)
        }
        Val::Rationals(v) => {
            let mut b = Vec::with_capacity(v.len() * 8);
            for (n, d) in v {
                b.extend_from_slice(&n.to_le_bytes());
                b.extend_from_slice(&d.to_le_bytes());
            }
            (5, v.len() as u32, b)
        }
        Val::Pointer(i) => (4, 1, ifd_offsets[*i].to_le_bytes().to_vec()),
    }
}

fn padded_len(n: usize) -> usize {
    n + (n & 1)
}

/// Little-endian TIFF with `ifds[0]` as IFD0; [`Val::Pointer`] links sub-IFDs.
pub fn build_tiff(ifds: &mut [Vec<Entry>]) -> Vec<u8> {
    for ifd in ifds.iter_mut() {
        ifd.sort_by_key(|e| e.tag);
    }

    // Pass 1: offsets. Pointer values are always 4 bytes so sizes don't depend on them.
    let placeholder = vec![0u32; ifds.len()];
    let mut ifd_offsets = Vec::with_capacity(ifds.len());
    let mut cur = 8usize;
    for ifd in ifds.iter() {
        ifd_offsets.push(cur as u32);
        cur += 2 + 12 * ifd.len() + 4;
        for e in ifd {
            let (_, _, bytes) = encode(&e.val, &placeholder);
            if bytes.len() > 4 {
                cur += padded_len(bytes.len());
            }
        }
    }

    // Pass 2: emit
    let mut out = Vec::with_capacity(cur);
    out.extend_from_slice(b"II");
    out.extend_from_slice(&42u16.to_le_bytes());
    out.extend_from_slice(&8u32.to_le_bytes());
    for ifd in ifds.iter() {
        let mut data_at = out.len() + 2 + 12 * ifd.len() + 4;
        let mut data = Vec::new();
        out.extend_from_slice(&(ifd.len() as u16).to_le_bytes());
        for e in ifd {
            let (typ, count, bytes) = encode(&e.val, &ifd_offsets);
            out.extend_from_slice(&e.tag.to_le_bytes());
            out.extend_from_slice(&typ.to_le_bytes());
            out.extend_from_slice(&count.to_le_bytes());
            if bytes.len() <= 4 {
                let mut inline = bytes.clone();
                inline.resize(4, 0);
                out.extend_from_slice(&inline);
            } else {
                out.extend_from_slice(&(data_at as u32).to_le_bytes());
                data.extend_from_slice(&bytes);
                if bytes.len() & 1 == 1 {
                    data.push(0);
                }
                data_at += padded_len(bytes.len());
            }
        }
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&data);
    }
    out
}

/// Degrees/minutes/seconds rationals for an absolute coordinate value.
pub fn dms(value: f64) -> Vec<(u32, u32)> {
    let v = value.abs();
    let deg = v.floor();
    let minutes_full = (v - deg) * 60.0;
    let min = minutes_full.floor();
    let sec = (minutes_full - min) * 60.0;
    vec![
        (deg as u32, 1),
        (min as u32, 1),
        ((sec * 10_000.0).round() as u32, 10_000),
    ]
}

pub fn wrap_jpeg(tiff: &[u8]) -> Vec<u8> {
    let mut out = vec![0xFF, 0xD8, 0xFF, 0xE1];
    out.extend_from_slice(&((2 + 6 + tiff.len()) as u16).to_be_bytes());
    out.extend_from_slice(b"Exif\0\0");
    out.extend_from_slice(tiff);
    out.extend_from_slice(&[0xFF, 0xD9]);
    out
}

/// JPEG carrying the given tags. Coordinates are signed decimal degrees.
pub fn exif_jpeg(
    original: Option<&'static str>,
    date_time: Option<&'static str>,
    gps: Option<(f64, f64)>,
) -> Vec<u8> {
    let mut ifds: Vec<Vec<Entry>> = vec![vec![Entry::new(TAG_MAKE, Val::Ascii("TestCam"))]];
    if let Some(dt) = date_time {
        ifds[0].push(Entry::new(TAG_DATE_TIME, Val::Ascii(dt)));
    }
    if let Some(dt) = original {
        let idx = ifds.len();
        ifds.push(vec![Entry::new(TAG_DATE_TIME_ORIGINAL, Val::Ascii(dt))]);
        ifds[0].push(Entry::new(TAG_EXIF_IFD, Val::Pointer(idx)));
    }
    if let Some((lat, lon)) = gps {
        let idx = ifds.len();
        ifds.push(vec![
            Entry::new(TAG_GPS_LAT_REF, Val::Ascii(if lat < 0.0 { "S" } else { "N" })),
            Entry::new(TAG_GPS_LAT, Val::Rationals(dms(lat))),
            Entry::new(TAG_GPS_LON_REF, Val::Ascii(if lon < 0.0 { "W" } else { "E" })),
            Entry::new(TAG_GPS_LON, Val::Rationals(dms(lon))),
        ]);
        ifds[0].push(Entry::new(TAG_GPS_IFD, Val::Pointer(idx)));
    }
    wrap_jpeg(&build_tiff(&mut ifds))
}

pub fn atom(kind: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + payload.len());
    out.extend_from_slice(&((8 + payload.len()) as u32).to_be_bytes());
    out.extend_from_slice(kind);
    out.extend_from_slice(payload);
    out
}

pub fn ftyp(brand: &[u8; 4]) -> Vec<u8> {
    let mut payload = brand.to_vec();
    payload.extend_from_slice(&0u32.to_be_bytes());
    payload.extend_from_slice(brand);
    atom(b"ftyp", &payload)
}

/// Version 0 `mvhd` with the given creation time (seconds since 1904-01-01 UTC).
pub fn mvhd_v0(creation: u32) -> Vec<u8> {
    let mut payload = vec![0u8; 100];
    payload[4..8].copy_from_slice(&creation.to_be_bytes());
    payload[8..12].copy_from_slice(&creation.to_be_bytes());
    payload[12..16].copy_from_slice(&600u32.to_be_bytes());
    atom(b"mvhd", &payload)
}

pub fn xyz(iso6709: &str) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&(iso6709.len() as u16).to_be_bytes());
    payload.extend_from_slice(&0x15C7u16.to_be_bytes());
    payload.extend_from_slice(iso6709.as_bytes());
    atom(b"udta", &atom(&[0xA9, b'x', b'y', b'z'], &payload))
}

/// QuickTime-style `meta` (no version field) with `mdta` keys.
pub fn mdta_meta(items: &[(&str, &str)]) -> Vec<u8> {
    let mut hdlr = vec![0u8; 8];
    hdlr.extend_from_slice(b"mdta");
    hdlr.extend_from_slice(&[0u8; 13]);

    let mut keys = vec![0u8; 4];
    keys.extend_from_slice(&(items.len() as u32).to_be_bytes());
    let mut ilst = Vec::new();
    for (i, (key, value)) in items.iter().enumerate() {
        keys.extend_from_slice(&((8 + key.len()) as u32).to_be_bytes());
        keys.extend_from_slice(b"mdta");
        keys.extend_from_slice(key.as_bytes());

        let mut data = 1u32.to_be_bytes().to_vec();
        data.extend_from_slice(&0u32.to_be_bytes());
        data.extend_from_slice(value.as_bytes());
        ilst.extend(atom(&((i + 1) as u32).to_be_bytes(), &atom(b"data", &data)));
    }

    let mut payload = atom(b"hdlr", &hdlr);
    payload.extend(atom(b"keys", &keys));
    payload.extend(atom(b"ilst", &ilst));
    atom(b"meta", &payload)
}

/// `ftyp`, a small `mdat`, then `moov` wrapping `children`.
pub fn quicktime_file(brand: &[u8; 4], children: &[Vec<u8>]) -> Vec<u8> {
    let mut out = ftyp(brand);
    out.extend(atom(b"mdat", &[0u8; 32]));
    out.extend(atom(b"moov", &children.concat()));
    out
}
