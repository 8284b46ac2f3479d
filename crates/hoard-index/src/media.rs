//! Best-effort extraction of image and audio metadata.
//!
//! Everything here is advisory: parse failures are reported as errors (or
//! `None`) and the caller demotes them to warnings, never failing the
//! blob's indexing.

use std::collections::BTreeMap;

/// Decode the pixel dimensions of a PNG, GIF, or JPEG from its header.
pub fn image_dimensions(buf: &[u8]) -> Option<(u32, u32)> {
    if buf.starts_with(&[0x89, b'P', b'N', b'G']) && buf.len() >= 24 {
        let w = u32::from_be_bytes(buf[16..20].try_into().ok()?);
        let h = u32::from_be_bytes(buf[20..24].try_into().ok()?);
        return Some((w, h));
    }
    if (buf.starts_with(b"GIF87a") || buf.starts_with(b"GIF89a")) && buf.len() >= 10 {
        let w = u16::from_le_bytes(buf[6..8].try_into().ok()?) as u32;
        let h = u16::from_le_bytes(buf[8..10].try_into().ok()?) as u32;
        return Some((w, h));
    }
    if buf.starts_with(&[0xff, 0xd8]) {
        return jpeg_dimensions(buf);
    }
    None
}

fn jpeg_dimensions(buf: &[u8]) -> Option<(u32, u32)> {
    let mut i = 2usize;
    while i + 9 <= buf.len() {
        if buf[i] != 0xff {
            return None;
        }
        let marker = buf[i + 1];
        // Standalone markers without a length.
        if (0xd0..=0xd9).contains(&marker) {
            i += 2;
            continue;
        }
        let seg_len = u16::from_be_bytes([buf[i + 2], buf[i + 3]]) as usize;
        if seg_len < 2 {
            return None;
        }
        let is_sof = matches!(marker, 0xc0..=0xcf) && !matches!(marker, 0xc4 | 0xc8 | 0xcc);
        if is_sof {
            let h = u16::from_be_bytes([buf[i + 5], buf[i + 6]]) as u32;
            let w = u16::from_be_bytes([buf[i + 7], buf[i + 8]]) as u32;
            return Some((w, h));
        }
        i += 2 + seg_len;
    }
    None
}

// ---------------------------------------------------------------------------
// EXIF
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("malformed metadata: {0}")]
    Malformed(&'static str),
}

/// EXIF fields pulled from an image prefix.
#[derive(Clone, Debug, Default)]
pub struct ExifData {
    /// Raw IFD0 + Exif-IFD tags as (tag id, formatted value).
    pub tags: Vec<(u16, String)>,
    /// Decoded GPS position, when all four GPS fields are present.
    pub gps: Option<(f64, f64)>,
}

/// Parse EXIF out of a JPEG prefix (APP1 segment) or a raw TIFF header.
pub fn parse_exif(buf: &[u8]) -> Result<ExifData, MediaError> {
    let tiff = if buf.starts_with(&[0xff, 0xd8]) {
        find_app1_exif(buf).ok_or(MediaError::Malformed("no EXIF segment"))?
    } else if buf.starts_with(b"II") || buf.starts_with(b"MM") {
        buf
    } else {
        return Err(MediaError::Malformed("not a JPEG or TIFF"));
    };
    parse_tiff(tiff)
}

fn find_app1_exif(buf: &[u8]) -> Option<&[u8]> {
    let mut i = 2usize;
    while i + 4 <= buf.len() {
        if buf[i] != 0xff {
            return None;
        }
        let marker = buf[i + 1];
        if (0xd0..=0xd9).contains(&marker) {
            i += 2;
            continue;
        }
        let seg_len = u16::from_be_bytes([*buf.get(i + 2)?, *buf.get(i + 3)?]) as usize;
        if marker == 0xe1 {
            let seg = buf.get(i + 4..i + 2 + seg_len)?;
            if let Some(tiff) = seg.strip_prefix(b"Exif\0\0") {
                return Some(tiff);
            }
        }
        i += 2 + seg_len;
    }
    None
}

struct Tiff<'a> {
    data: &'a [u8],
    big_endian: bool,
}

impl Tiff<'_> {
    fn u16_at(&self, off: usize) -> Result<u16, MediaError> {
        let b = self
            .data
            .get(off..off + 2)
            .ok_or(MediaError::Malformed("short read"))?;
        Ok(if self.big_endian {
            u16::from_be_bytes([b[0], b[1]])
        } else {
            u16::from_le_bytes([b[0], b[1]])
        })
    }

    fn u32_at(&self, off: usize) -> Result<u32, MediaError> {
        let b = self
            .data
            .get(off..off + 4)
            .ok_or(MediaError::Malformed("short read"))?;
        Ok(if self.big_endian {
            u32::from_be_bytes([b[0], b[1], b[2], b[3]])
        } else {
            u32::from_le_bytes([b[0], b[1], b[2], b[3]])
        })
    }
}

#[derive(Clone, Debug)]
struct IfdEntry {
    tag: u16,
    format: u16,
    count: u32,
    value_off: usize,
}

fn type_size(format: u16) -> usize {
    match format {
        1 | 2 | 7 => 1,
        3 => 2,
        4 | 9 => 4,
        5 | 10 => 8,
        _ => 0,
    }
}

fn read_ifd(t: &Tiff<'_>, off: usize) -> Result<Vec<IfdEntry>, MediaError> {
    let count = t.u16_at(off)? as usize;
    if count > 512 {
        return Err(MediaError::Malformed("implausible IFD entry count"));
    }
    let mut out = Vec::with_capacity(count);
    for i in 0..count {
        let e = off + 2 + i * 12;
        let tag = t.u16_at(e)?;
        let format = t.u16_at(e + 2)?;
        let count = t.u32_at(e + 4)?;
        let size = type_size(format) * count as usize;
        let value_off = if size <= 4 {
            e + 8
        } else {
            t.u32_at(e + 8)? as usize
        };
        out.push(IfdEntry {
            tag,
            format,
            count,
            value_off,
        });
    }
    Ok(out)
}

fn entry_value(t: &Tiff<'_>, e: &IfdEntry) -> Result<String, MediaError> {
    let n = e.count.min(16) as usize;
    match e.format {
        2 => {
            let raw = t
                .data
                .get(e.value_off..e.value_off + e.count as usize)
                .ok_or(MediaError::Malformed("ascii out of range"))?;
            let s: String = raw
                .iter()
                .take_while(|&&b| b != 0)
                .map(|&b| b as char)
                .collect();
            Ok(s)
        }
        3 => {
            let vals: Result<Vec<String>, _> = (0..n)
                .map(|i| t.u16_at(e.value_off + i * 2).map(|v| v.to_string()))
                .collect();
            Ok(vals?.join("|"))
        }
        1 | 4 | 9 => {
            let vals: Result<Vec<String>, _> = (0..n)
                .map(|i| {
                    t.u32_at(e.value_off + i * type_size(e.format).max(1))
                        .map(|v| v.to_string())
                })
                .collect();
            Ok(vals?.join("|"))
        }
        5 | 10 => {
            let vals: Result<Vec<String>, _> = (0..n)
                .map(|i| {
                    let num = t.u32_at(e.value_off + i * 8)?;
                    let den = t.u32_at(e.value_off + i * 8 + 4)?;
                    Ok::<_, MediaError>(format!("{num}/{den}"))
                })
                .collect();
            Ok(vals?.join("|"))
        }
        _ => Ok(String::new()),
    }
}

fn rational_at(t: &Tiff<'_>, off: usize) -> Result<f64, MediaError> {
    let num = t.u32_at(off)? as f64;
    let den = t.u32_at(off + 4)? as f64;
    if den == 0.0 {
        return Ok(0.0);
    }
    Ok(num / den)
}

fn degrees(t: &Tiff<'_>, e: &IfdEntry) -> Result<f64, MediaError> {
    if e.count < 3 {
        return Err(MediaError::Malformed("GPS coordinate needs 3 rationals"));
    }
    Ok(rational_at(t, e.value_off)?
        + rational_at(t, e.value_off + 8)? / 60.0
        + rational_at(t, e.value_off + 16)? / 3600.0)
}

fn parse_tiff(data: &[u8]) -> Result<ExifData, MediaError> {
    let big_endian = match data.get(..2) {
        Some(b"II") => false,
        Some(b"MM") => true,
        _ => return Err(MediaError::Malformed("bad TIFF byte order")),
    };
    let t = Tiff { data, big_endian };
    if t.u16_at(2)? != 42 {
        return Err(MediaError::Malformed("bad TIFF magic"));
    }
    let ifd0_off = t.u32_at(4)? as usize;
    let ifd0 = read_ifd(&t, ifd0_off)?;

    let mut out = ExifData::default();
    let mut exif_ifd_off = None;
    let mut gps_ifd_off = None;
    for e in &ifd0 {
        match e.tag {
            0x8769 => exif_ifd_off = Some(t.u32_at(e.value_off)? as usize),
            0x8825 => gps_ifd_off = Some(t.u32_at(e.value_off)? as usize),
            _ => {
                if let Ok(v) = entry_value(&t, e) {
                    if !v.is_empty() {
                        out.tags.push((e.tag, v));
                    }
                }
            }
        }
    }
    if let Some(off) = exif_ifd_off {
        for e in read_ifd(&t, off)? {
            if let Ok(v) = entry_value(&t, &e) {
                if !v.is_empty() {
                    out.tags.push((e.tag, v));
                }
            }
        }
    }
    if let Some(off) = gps_ifd_off {
        out.gps = parse_gps(&t, off)?;
    }
    Ok(out)
}

fn parse_gps(t: &Tiff<'_>, off: usize) -> Result<Option<(f64, f64)>, MediaError> {
    let entries = read_ifd(t, off)?;
    let find = |tag: u16| entries.iter().find(|e| e.tag == tag);
    let (Some(lat_ref), Some(lat), Some(long_ref), Some(long)) =
        (find(0x0001), find(0x0002), find(0x0003), find(0x0004))
    else {
        return Ok(None);
    };
    let mut lat_deg = degrees(t, lat)?;
    let mut long_deg = degrees(t, long)?;
    if entry_value(t, lat_ref)?.starts_with('S') {
        lat_deg = -lat_deg;
    }
    if entry_value(t, long_ref)?.starts_with('W') {
        long_deg = -long_deg;
    }
    Ok(Some((lat_deg, long_deg)))
}

// ---------------------------------------------------------------------------
// ID3
// ---------------------------------------------------------------------------

/// Tags and tag-free byte range of an MP3-ish stream.
#[derive(Clone, Debug, Default)]
pub struct Id3Info {
    pub tags: BTreeMap<String, String>,
    /// Offset where the audio data begins (after any ID3v2 tag).
    pub audio_start: u64,
    /// Length of the audio data, excluding an ID3v1 footer.
    pub audio_len: u64,
}

/// Parse ID3v2 (header) and ID3v1 (footer) tags. Returns `None` when the
/// blob carries neither.
pub fn parse_id3(data: &[u8]) -> Option<Id3Info> {
    let mut info = Id3Info::default();
    let mut found = false;

    if let Some(v2) = parse_id3v2(data) {
        info.audio_start = v2.1;
        info.tags = v2.0;
        found = true;
    }
    let mut trailer = 0u64;
    if let Some(v1) = parse_id3v1(data) {
        trailer = 128;
        for (k, v) in v1 {
            info.tags.entry(k).or_insert(v);
        }
        found = true;
    }
    if !found {
        return None;
    }
    info.audio_len = (data.len() as u64)
        .saturating_sub(info.audio_start)
        .saturating_sub(trailer);
    Some(info)
}

fn syncsafe(b: &[u8]) -> u32 {
    ((b[0] as u32 & 0x7f) << 21)
        | ((b[1] as u32 & 0x7f) << 14)
        | ((b[2] as u32 & 0x7f) << 7)
        | (b[3] as u32 & 0x7f)
}

fn frame_name(id: &str) -> Option<&'static str> {
    Some(match id {
        "TIT2" => "title",
        "TPE1" => "artist",
        "TALB" => "album",
        "TCON" => "genre",
        "TYER" | "TDRC" => "year",
        "TRCK" => "track",
        "TPOS" => "disc",
        _ => return None,
    })
}

fn decode_text(encoding: u8, raw: &[u8]) -> Option<String> {
    let s = match encoding {
        0 => raw.iter().map(|&b| b as char).collect::<String>(),
        3 => String::from_utf8(raw.to_vec()).ok()?,
        1 | 2 => {
            let body = raw.strip_prefix(&[0xff, 0xfe]).or_else(|| raw.strip_prefix(&[0xfe, 0xff]));
            let (body, be) = match (body, encoding) {
                (Some(b), _) => (b, raw[0] == 0xfe),
                (None, 2) => (raw, true),
                (None, _) => (raw, false),
            };
            let units: Vec<u16> = body
                .chunks_exact(2)
                .map(|c| {
                    if be {
                        u16::from_be_bytes([c[0], c[1]])
                    } else {
                        u16::from_le_bytes([c[0], c[1]])
                    }
                })
                .collect();
            String::from_utf16(&units).ok()?
        }
        _ => return None,
    };
    let trimmed = s.trim_matches(char::from(0)).trim().to_string();
    (!trimmed.is_empty()).then_some(trimmed)
}

pub(crate) fn parse_id3v2(data: &[u8]) -> Option<(BTreeMap<String, String>, u64)> {
    if data.len() < 10 || &data[..3] != b"ID3" {
        return None;
    }
    let version = data[3];
    let flags = data[5];
    let tag_size = syncsafe(&data[6..10]) as usize;
    let mut end = 10 + tag_size;
    if flags & 0x10 != 0 {
        end += 10; // footer
    }
    let mut tags = BTreeMap::new();
    let mut i = 10usize;
    // Skip the extended header, when present.
    if flags & 0x40 != 0 {
        if let Some(b) = data.get(i..i + 4) {
            let ext = if version >= 4 {
                syncsafe(b) as usize
            } else {
                u32::from_be_bytes([b[0], b[1], b[2], b[3]]) as usize + 4
            };
            i += ext;
        }
    }
    let frame_end = (10 + tag_size).min(data.len());
    while i + 10 <= frame_end {
        let id = &data[i..i + 4];
        if !id.iter().all(|b| b.is_ascii_alphanumeric()) {
            break; // padding
        }
        let size_bytes = &data[i + 4..i + 8];
        let size = if version >= 4 {
            syncsafe(size_bytes) as usize
        } else {
            u32::from_be_bytes([size_bytes[0], size_bytes[1], size_bytes[2], size_bytes[3]])
                as usize
        };
        let body = data.get(i + 10..i + 10 + size)?;
        if let (Ok(id_str), true) = (std::str::from_utf8(id), !body.is_empty()) {
            if let Some(name) = frame_name(id_str) {
                if let Some(text) = decode_text(body[0], &body[1..]) {
                    tags.insert(name.to_string(), text);
                }
            }
        }
        i += 10 + size;
    }
    Some((tags, end as u64))
}

pub(crate) fn parse_id3v1(data: &[u8]) -> Option<Vec<(String, String)>> {
    if data.len() < 128 {
        return None;
    }
    let tag = &data[data.len() - 128..];
    if &tag[..3] != b"TAG" {
        return None;
    }
    let field = |range: std::ops::Range<usize>| -> String {
        tag[range]
            .iter()
            .take_while(|&&b| b != 0)
            .map(|&b| b as char)
            .collect::<String>()
            .trim()
            .to_string()
    };
    let mut out = Vec::new();
    for (name, range) in [
        ("title", 3..33),
        ("artist", 33..63),
        ("album", 63..93),
        ("year", 93..97),
    ] {
        let v = field(range);
        if !v.is_empty() {
            out.push((name.to_string(), v));
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn png_dimensions() {
        let mut buf = vec![0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];
        buf.extend_from_slice(&13u32.to_be_bytes());
        buf.extend_from_slice(b"IHDR");
        buf.extend_from_slice(&640u32.to_be_bytes());
        buf.extend_from_slice(&480u32.to_be_bytes());
        assert_eq!(image_dimensions(&buf), Some((640, 480)));
    }

    #[test]
    fn gif_dimensions() {
        let mut buf = b"GIF89a".to_vec();
        buf.extend_from_slice(&320u16.to_le_bytes());
        buf.extend_from_slice(&200u16.to_le_bytes());
        assert_eq!(image_dimensions(&buf), Some((320, 200)));
    }

    #[test]
    fn jpeg_dimensions_via_sof0() {
        // SOI, APP0 (empty-ish), SOF0 with 100x50.
        let mut buf = vec![0xff, 0xd8];
        buf.extend_from_slice(&[0xff, 0xe0, 0x00, 0x04, 0x00, 0x00]);
        buf.extend_from_slice(&[0xff, 0xc0, 0x00, 0x0b, 0x08]);
        buf.extend_from_slice(&50u16.to_be_bytes());
        buf.extend_from_slice(&100u16.to_be_bytes());
        buf.extend_from_slice(&[0x03, 0, 0, 0]);
        assert_eq!(image_dimensions(&buf), Some((100, 50)));
    }

    #[test]
    fn garbage_has_no_dimensions() {
        assert_eq!(image_dimensions(b"not an image"), None);
    }

    fn tiff_with_gps() -> Vec<u8> {
        // Little-endian TIFF: IFD0 with one GPS-pointer entry; GPS IFD
        // with refs and coordinates 40d30m0s N, 74d0m0s W.
        let mut t = Vec::new();
        t.extend_from_slice(b"II");
        t.extend_from_slice(&42u16.to_le_bytes());
        t.extend_from_slice(&8u32.to_le_bytes()); // IFD0 at 8
        // IFD0: 1 entry
        t.extend_from_slice(&1u16.to_le_bytes());
        // GPS pointer tag 0x8825, type LONG, count 1, value = 26
        t.extend_from_slice(&0x8825u16.to_le_bytes());
        t.extend_from_slice(&4u16.to_le_bytes());
        t.extend_from_slice(&1u32.to_le_bytes());
        t.extend_from_slice(&26u32.to_le_bytes());
        t.extend_from_slice(&0u32.to_le_bytes()); // next IFD
        assert_eq!(t.len(), 26);
        // GPS IFD at 26: 4 entries
        t.extend_from_slice(&4u16.to_le_bytes());
        let rat_lat = 26 + 2 + 4 * 12 + 4; // after entries + next-IFD
        let rat_long = rat_lat + 24;
        // 0x0001 LatRef ASCII "N\0"
        t.extend_from_slice(&0x0001u16.to_le_bytes());
        t.extend_from_slice(&2u16.to_le_bytes());
        t.extend_from_slice(&2u32.to_le_bytes());
        t.extend_from_slice(b"N\0\0\0");
        // 0x0002 Lat: 3 rationals at rat_lat
        t.extend_from_slice(&0x0002u16.to_le_bytes());
        t.extend_from_slice(&5u16.to_le_bytes());
        t.extend_from_slice(&3u32.to_le_bytes());
        t.extend_from_slice(&(rat_lat as u32).to_le_bytes());
        // 0x0003 LongRef "W\0"
        t.extend_from_slice(&0x0003u16.to_le_bytes());
        t.extend_from_slice(&2u16.to_le_bytes());
        t.extend_from_slice(&2u32.to_le_bytes());
        t.extend_from_slice(b"W\0\0\0");
        // 0x0004 Long: 3 rationals at rat_long
        t.extend_from_slice(&0x0004u16.to_le_bytes());
        t.extend_from_slice(&5u16.to_le_bytes());
        t.extend_from_slice(&3u32.to_le_bytes());
        t.extend_from_slice(&(rat_long as u32).to_le_bytes());
        t.extend_from_slice(&0u32.to_le_bytes()); // next IFD
        // lat 40/1, 30/1, 0/1
        for (n, d) in [(40u32, 1u32), (30, 1), (0, 1)] {
            t.extend_from_slice(&n.to_le_bytes());
            t.extend_from_slice(&d.to_le_bytes());
        }
        // long 74/1, 0/1, 0/1
        for (n, d) in [(74u32, 1u32), (0, 1), (0, 1)] {
            t.extend_from_slice(&n.to_le_bytes());
            t.extend_from_slice(&d.to_le_bytes());
        }
        t
    }

    #[test]
    fn exif_gps_decodes() {
        let exif = parse_exif(&tiff_with_gps()).unwrap();
        let (lat, long) = exif.gps.unwrap();
        assert!((lat - 40.5).abs() < 1e-9);
        assert!((long + 74.0).abs() < 1e-9);
    }

    #[test]
    fn exif_rejects_garbage() {
        assert!(parse_exif(b"garbage data here").is_err());
    }

    fn id3v2_blob() -> Vec<u8> {
        // ID3v2.3 with one TIT2 frame, then fake audio, then ID3v1.
        let title = b"\x00My Song"; // latin1 encoding byte + text
        let mut frame = b"TIT2".to_vec();
        frame.extend_from_slice(&(title.len() as u32).to_be_bytes());
        frame.extend_from_slice(&[0, 0]);
        frame.extend_from_slice(title);
        let tag_size = frame.len();

        let mut out = b"ID3".to_vec();
        out.extend_from_slice(&[3, 0, 0]); // v2.3, no flags
        // syncsafe size
        out.extend_from_slice(&[
            ((tag_size >> 21) & 0x7f) as u8,
            ((tag_size >> 14) & 0x7f) as u8,
            ((tag_size >> 7) & 0x7f) as u8,
            (tag_size & 0x7f) as u8,
        ]);
        out.extend_from_slice(&frame);
        out.extend_from_slice(&[0xAA; 1000]); // "audio"
        // ID3v1 footer
        let mut v1 = vec![0u8; 128];
        v1[..3].copy_from_slice(b"TAG");
        v1[33..33 + 6].copy_from_slice(b"Artist");
        out.extend_from_slice(&v1);
        out
    }

    #[test]
    fn id3_v2_and_v1_merge() {
        let blob = id3v2_blob();
        let info = parse_id3(&blob).unwrap();
        assert_eq!(info.tags.get("title").unwrap(), "My Song");
        assert_eq!(info.tags.get("artist").unwrap(), "Artist");
        let expected_start = 10 + 10 + 8; // header + frame header + body
        assert_eq!(info.audio_start, expected_start as u64);
        assert_eq!(
            info.audio_len,
            blob.len() as u64 - expected_start as u64 - 128
        );
    }

    #[test]
    fn no_tags_is_none() {
        assert!(parse_id3(&[0xffu8; 512]).is_none());
    }
}
