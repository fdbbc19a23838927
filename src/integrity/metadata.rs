//! Container and embedded metadata extraction for JPEG, ISO-BMFF and PNG.
//!
//! Parsers are bounds-checked walks over the raw bytes. A length field that
//! points past the end of its parent, a bad signature or an empty file is a
//! structural error; the verifier turns it into a `read_failure` anomaly.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaFormat {
    Jpeg,
    IsoBmff,
    Png,
    Unknown,
}

impl MediaFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Jpeg => "jpeg",
            Self::IsoBmff => "iso_bmff",
            Self::Png => "png",
            Self::Unknown => "unknown",
        }
    }
}

/// Everything the heuristics look at, plus the flat field map reported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedMetadata {
    pub format: MediaFormat,
    pub fields: BTreeMap<String, String>,
    /// Embedded capture time (EXIF original, `©day`, PNG creation time)
    pub capture_time: Option<DateTime<Utc>>,
    pub container_created: Option<DateTime<Utc>>,
    pub container_modified: Option<DateTime<Utc>>,
    /// Software, encoder and creator-tool tags
    pub software: Vec<String>,
    /// XMP history actions other than `created`
    pub edit_actions: Vec<String>,
    /// EXIF for JPEG, `mvhd` for ISO-BMFF; always true for other formats
    pub has_primary_block: bool,
    pub structure_error: Option<String>,
}

impl ExtractedMetadata {
    fn new(format: MediaFormat) -> Self {
        Self {
            format,
            fields: BTreeMap::new(),
            capture_time: None,
            container_created: None,
            container_modified: None,
            software: Vec::new(),
            edit_actions: Vec::new(),
            has_primary_block: !matches!(format, MediaFormat::Jpeg | MediaFormat::IsoBmff),
            structure_error: None,
        }
    }

    fn set(&mut self, key: &str, value: impl Into<String>) {
        self.fields.insert(key.to_string(), value.into());
    }
}

const PNG_SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";

pub fn detect_format(bytes: &[u8]) -> MediaFormat {
    if bytes.starts_with(&[0xFF, 0xD8]) {
        MediaFormat::Jpeg
    } else if bytes.starts_with(PNG_SIGNATURE) {
        MediaFormat::Png
    } else if bytes.get(4..8) == Some(b"ftyp".as_slice()) {
        MediaFormat::IsoBmff
    } else {
        MediaFormat::Unknown
    }
}

pub fn extract(bytes: &[u8]) -> ExtractedMetadata {
    let format = detect_format(bytes);
    let mut meta = ExtractedMetadata::new(format);
    let result = match format {
        _ if bytes.is_empty() => Err("empty file".to_string()),
        MediaFormat::Jpeg => parse_jpeg(bytes, &mut meta),
        MediaFormat::IsoBmff => parse_bmff(bytes, &mut meta),
        MediaFormat::Png => parse_png(bytes, &mut meta),
        MediaFormat::Unknown => Ok(()),
    };
    if let Err(reason) = result {
        meta.structure_error = Some(reason);
    }
    if let Some(at) = meta.capture_time {
        meta.set("capture_time", at.to_rfc3339());
    }
    if let Some(at) = meta.container_created {
        meta.set("container.created", at.to_rfc3339());
    }
    if let Some(at) = meta.container_modified {
        meta.set("container.modified", at.to_rfc3339());
    }
    meta
}

fn be_u16(b: &[u8], at: usize) -> Option<u16> {
    Some(u16::from_be_bytes(b.get(at..at + 2)?.try_into().ok()?))
}

fn be_u32(b: &[u8], at: usize) -> Option<u32> {
    Some(u32::from_be_bytes(b.get(at..at + 4)?.try_into().ok()?))
}

fn be_u64(b: &[u8], at: usize) -> Option<u64> {
    Some(u64::from_be_bytes(b.get(at..at + 8)?.try_into().ok()?))
}

fn text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_matches(|c: char| c == '\0' || c.is_whitespace())
        .to_string()
}

// JPEG

const XMP_HEADER: &[u8] = b"http://ns.adobe.com/xap/1.0/\0";

fn parse_jpeg(bytes: &[u8], meta: &mut ExtractedMetadata) -> Result<(), String> {
    let mut pos = 2;
    loop {
        if pos >= bytes.len() {
            return Err("jpeg truncated before image data".to_string());
        }
        if bytes[pos] != 0xFF {
            return Err(format!("jpeg marker expected at offset {pos}"));
        }
        while bytes.get(pos + 1) == Some(&0xFF) {
            pos += 1;
        }
        let marker = *bytes
            .get(pos + 1)
            .ok_or_else(|| "jpeg truncated inside marker".to_string())?;
        match marker {
            0xD9 | 0xDA => return Ok(()),
            0x01 | 0xD0..=0xD7 => {
                pos += 2;
                continue;
            }
            _ => {}
        }
        let length = be_u16(bytes, pos + 2)
            .ok_or_else(|| format!("jpeg segment {marker:#04x} truncated"))?
            as usize;
        let end = pos + 2 + length;
        if length < 2 || end > bytes.len() {
            return Err(format!(
                "jpeg segment {marker:#04x} at offset {pos} runs past end of file"
            ));
        }
        let data = &bytes[pos + 4..end];
        match marker {
            0xE1 if data.starts_with(b"Exif\0\0") => {
                meta.has_primary_block = true;
                parse_exif(&data[6..], meta)?;
            }
            0xE1 if data.starts_with(XMP_HEADER) => {
                parse_xmp(&String::from_utf8_lossy(&data[XMP_HEADER.len()..]), meta);
            }
            0xC0..=0xC3 => {
                if let (Some(h), Some(w)) = (be_u16(data, 1), be_u16(data, 3)) {
                    meta.set("height", h.to_string());
                    meta.set("width", w.to_string());
                }
            }
            _ => {}
        }
        pos = end;
    }
}

struct Tiff<'a> {
    data: &'a [u8],
    little_endian: bool,
}

impl Tiff<'_> {
    fn u16(&self, at: usize) -> Option<u16> {
        let raw: [u8; 2] = self.data.get(at..at + 2)?.try_into().ok()?;
        Some(if self.little_endian {
            u16::from_le_bytes(raw)
        } else {
            u16::from_be_bytes(raw)
        })
    }

    fn u32(&self, at: usize) -> Option<u32> {
        let raw: [u8; 4] = self.data.get(at..at + 4)?.try_into().ok()?;
        Some(if self.little_endian {
            u32::from_le_bytes(raw)
        } else {
            u32::from_be_bytes(raw)
        })
    }

    /// `(tag, type, count, value offset field position)` of every IFD entry.
    fn entries(&self, offset: usize) -> Result<Vec<(u16, u16, u32, usize)>, String> {
        let count = self
            .u16(offset)
            .ok_or_else(|| format!("exif ifd at {offset} past end"))?;
        (0..count as usize)
            .map(|i| {
                let at = offset + 2 + i * 12;
                match (self.u16(at), self.u16(at + 2), self.u32(at + 4)) {
                    (Some(tag), Some(kind), Some(n)) if at + 12 <= self.data.len() => {
                        Ok((tag, kind, n, at + 8))
                    }
                    _ => Err(format!("exif ifd entry at {at} past end")),
                }
            })
            .collect()
    }

    fn value_bytes(&self, size: usize, field: usize) -> Option<&[u8]> {
        let start = if size <= 4 {
            field
        } else {
            self.u32(field)? as usize
        };
        self.data.get(start..start.checked_add(size)?)
    }

    fn ascii(&self, count: u32, field: usize) -> Option<String> {
        self.value_bytes(count as usize, field).map(text)
    }

    fn rationals(&self, count: u32, field: usize) -> Option<Vec<f64>> {
        let bytes = self.value_bytes(count as usize * 8, field)?;
        let tiff = Tiff {
            data: bytes,
            little_endian: self.little_endian,
        };
        (0..count as usize)
            .map(|i| {
                let (num, den) = (tiff.u32(i * 8)?, tiff.u32(i * 8 + 4)?);
                Some(if den == 0 { 0.0 } else { num as f64 / den as f64 })
            })
            .collect()
    }
}

const TIFF_ASCII: u16 = 2;
const TIFF_RATIONAL: u16 = 5;

fn parse_exif(data: &[u8], meta: &mut ExtractedMetadata) -> Result<(), String> {
    let little_endian = match data.get(0..4) {
        Some(b"II*\0") => true,
        Some(b"MM\0*") => false,
        _ => return Err("exif block has no tiff header".to_string()),
    };
    let tiff = Tiff { data, little_endian };
    let ifd0 = tiff.u32(4).ok_or("exif header truncated")? as usize;

    let mut exif_ifd = None;
    let mut gps_ifd = None;
    let mut modified = None;
    for (tag, kind, count, field) in tiff.entries(ifd0)? {
        let ascii = || (kind == TIFF_ASCII).then(|| tiff.ascii(count, field)).flatten();
        match tag {
            0x010F => ascii().into_iter().for_each(|v| meta.set("device.make", v)),
            0x0110 => ascii().into_iter().for_each(|v| meta.set("device.model", v)),
            0x0131 => {
                if let Some(v) = ascii() {
                    meta.set("software", v.clone());
                    meta.software.push(v);
                }
            }
            0x0132 => modified = ascii(),
            0x8769 => exif_ifd = tiff.u32(field),
            0x8825 => gps_ifd = tiff.u32(field),
            _ => {}
        }
    }

    let mut original = None;
    if let Some(offset) = exif_ifd {
        for (tag, kind, count, field) in tiff.entries(offset as usize)? {
            if tag == 0x9003 && kind == TIFF_ASCII {
                original = tiff.ascii(count, field);
            }
        }
    }

    if let Some(offset) = gps_ifd {
        meta.set("gps", "present");
        let mut refs = BTreeMap::new();
        let mut coords = BTreeMap::new();
        for (tag, kind, count, field) in tiff.entries(offset as usize)? {
            match (tag, kind) {
                (1 | 3, TIFF_ASCII) => {
                    if let Some(v) = tiff.ascii(count, field) {
                        refs.insert(tag, v);
                    }
                }
                (2 | 4, TIFF_RATIONAL) if count == 3 => {
                    if let Some(dms) = tiff.rationals(count, field) {
                        coords.insert(tag, dms[0] + dms[1] / 60.0 + dms[2] / 3600.0);
                    }
                }
                _ => {}
            }
        }
        for (tag, key, negative) in [(2u16, "gps.latitude", "S"), (4, "gps.longitude", "W")] {
            if let Some(value) = coords.get(&tag) {
                let sign = if refs.get(&(tag - 1)).is_some_and(|r| r == negative) {
                    -1.0
                } else {
                    1.0
                };
                meta.set(key, format!("{:.6}", sign * value));
            }
        }
    }

    if let Some(v) = &modified {
        meta.set("exif.modified", v.clone());
    }
    if let Some(v) = &original {
        meta.set("exif.original", v.clone());
    }
    meta.capture_time = original
        .or(modified)
        .and_then(|v| NaiveDateTime::parse_from_str(&v, "%Y:%m:%d %H:%M:%S").ok())
        .map(|naive| naive.and_utc());
    Ok(())
}

/// Values of `name` written either as an attribute or as an element.
fn xml_values(xml: &str, name: &str) -> Vec<String> {
    let mut values = Vec::new();
    let attribute = format!("{name}=\"");
    let mut rest = xml;
    while let Some(start) = rest.find(&attribute) {
        rest = &rest[start + attribute.len()..];
        if let Some(end) = rest.find('"') {
            values.push(rest[..end].to_string());
            rest = &rest[end..];
        }
    }
    let (open, close) = (format!("<{name}>"), format!("</{name}>"));
    let mut rest = xml;
    while let Some(start) = rest.find(&open) {
        rest = &rest[start + open.len()..];
        if let Some(end) = rest.find(&close) {
            values.push(rest[..end].trim().to_string());
            rest = &rest[end..];
        }
    }
    values
}

fn parse_xmp(xml: &str, meta: &mut ExtractedMetadata) {
    if xml.contains("xmpMM:History") {
        meta.set("xmp.history", "present");
    }
    if let Some(tool) = xml_values(xml, "xmp:CreatorTool").into_iter().next() {
        meta.set("xmp.creator_tool", tool.clone());
        meta.software.push(tool);
    }
    let actions = xml_values(xml, "stEvt:action");
    if !actions.is_empty() {
        meta.set("xmp.actions", actions.join(","));
    }
    meta.edit_actions
        .extend(actions.into_iter().filter(|a| a != "created"));
}

// ISO-BMFF

/// Seconds between 1904-01-01 and 1970-01-01.
const MAC_EPOCH_OFFSET: i64 = 2_082_844_800;

fn mac_time(secs: u64) -> Option<DateTime<Utc>> {
    if secs == 0 {
        return None;
    }
    let unix = i64::try_from(secs).ok()? - MAC_EPOCH_OFFSET;
    Utc.timestamp_opt(unix, 0).single()
}

/// Child boxes of `data` as `(type, payload)`.
fn boxes(data: &[u8]) -> Result<Vec<([u8; 4], &[u8])>, String> {
    let mut out = Vec::new();
    let mut pos = 0;
    while pos < data.len() {
        let size = be_u32(data, pos).ok_or("box header truncated")? as u64;
        let kind: [u8; 4] = data
            .get(pos + 4..pos + 8)
            .and_then(|k| k.try_into().ok())
            .ok_or("box header truncated")?;
        let (header, size) = match size {
            0 => (8, (data.len() - pos) as u64),
            1 => (16, be_u64(data, pos + 8).ok_or("box largesize truncated")?),
            n => (8, n),
        };
        let name = String::from_utf8_lossy(&kind).into_owned();
        if size < header as u64 {
            return Err(format!("box `{name}` at offset {pos} has invalid size {size}"));
        }
        // A 64-bit largesize can point past any real file, or past u64::MAX.
        let end = (pos as u64)
            .checked_add(size)
            .filter(|&end| end <= data.len() as u64)
            .ok_or_else(|| format!("box `{name}` at offset {pos} runs past end of its parent"))?
            as usize;
        out.push((kind, &data[pos + header..end]));
        pos = end;
    }
    Ok(out)
}

fn parse_bmff(bytes: &[u8], meta: &mut ExtractedMetadata) -> Result<(), String> {
    for (kind, payload) in boxes(bytes)? {
        match &kind {
            b"ftyp" => {
                if let Some(brand) = payload.get(0..4) {
                    meta.set("container.brand", text(brand));
                }
            }
            b"moov" => parse_moov(payload, meta)?,
            b"mdat" => meta.set("container.mdat", "present"),
            _ => {}
        }
    }
    Ok(())
}

fn parse_moov(moov: &[u8], meta: &mut ExtractedMetadata) -> Result<(), String> {
    for (kind, payload) in boxes(moov)? {
        match &kind {
            b"mvhd" => parse_mvhd(payload, meta)?,
            b"udta" => parse_udta(payload, meta)?,
            _ => {}
        }
    }
    Ok(())
}

fn parse_mvhd(mvhd: &[u8], meta: &mut ExtractedMetadata) -> Result<(), String> {
    let truncated = || "mvhd box truncated".to_string();
    let (created, modified, timescale, duration) = match mvhd.first() {
        Some(1) => (
            be_u64(mvhd, 4).ok_or_else(truncated)?,
            be_u64(mvhd, 12).ok_or_else(truncated)?,
            be_u32(mvhd, 20).ok_or_else(truncated)?,
            be_u64(mvhd, 24).ok_or_else(truncated)?,
        ),
        Some(_) => (
            be_u32(mvhd, 4).ok_or_else(truncated)? as u64,
            be_u32(mvhd, 8).ok_or_else(truncated)? as u64,
            be_u32(mvhd, 12).ok_or_else(truncated)?,
            be_u32(mvhd, 16).ok_or_else(truncated)? as u64,
        ),
        None => return Err(truncated()),
    };
    meta.has_primary_block = true;
    meta.container_created = mac_time(created);
    meta.container_modified = mac_time(modified);
    if timescale > 0 {
        meta.set("duration_secs", format!("{:.3}", duration as f64 / timescale as f64));
    }
    Ok(())
}

fn parse_udta(udta: &[u8], meta: &mut ExtractedMetadata) -> Result<(), String> {
    for (kind, payload) in boxes(udta)? {
        let value = quicktime_text(payload);
        match &kind {
            b"\xA9too" => {
                meta.set("encoder", value.clone());
                meta.software.push(value);
            }
            b"\xA9xyz" => meta.set("gps", value),
            b"\xA9day" => {
                meta.capture_time = DateTime::parse_from_rfc3339(&value)
                    .map(|at| at.with_timezone(&Utc))
                    .ok()
                    .or_else(|| {
                        NaiveDateTime::parse_from_str(&value, "%Y-%m-%d %H:%M:%S")
                            .ok()
                            .map(|naive| naive.and_utc())
                    });
                meta.set("capture_date", value);
            }
            _ => {}
        }
    }
    Ok(())
}

/// QuickTime user-data text: u16 length, u16 language, then the text.
fn quicktime_text(payload: &[u8]) -> String {
    match be_u16(payload, 0) {
        Some(len) if payload.len() >= 4 + len as usize => text(&payload[4..4 + len as usize]),
        _ => text(payload),
    }
}

// PNG

fn parse_png(bytes: &[u8], meta: &mut ExtractedMetadata) -> Result<(), String> {
    let mut pos = PNG_SIGNATURE.len();
    loop {
        let length = be_u32(bytes, pos).ok_or("png truncated before IEND")? as usize;
        let kind = bytes.get(pos + 4..pos + 8).ok_or("png chunk header truncated")?;
        let end = pos + 12 + length;
        if end > bytes.len() {
            return Err(format!(
                "png chunk `{}` at offset {pos} runs past end of file",
                String::from_utf8_lossy(kind)
            ));
        }
        let data = &bytes[pos + 8..pos + 8 + length];
        match kind {
            b"IHDR" => {
                if let (Some(w), Some(h)) = (be_u32(data, 0), be_u32(data, 4)) {
                    meta.set("width", w.to_string());
                    meta.set("height", h.to_string());
                }
            }
            b"tEXt" => {
                if let Some(split) = data.iter().position(|&b| b == 0) {
                    png_text(&text(&data[..split]), text(&data[split + 1..]), meta);
                }
            }
            b"iTXt" => {
                // keyword \0 compression-flag method language \0 translated \0 text
                let mut parts = data.splitn(2, |&b| b == 0);
                let keyword = parts.next().map(text).unwrap_or_default();
                let rest = parts.next().unwrap_or_default();
                if rest.first() == Some(&0) {
                    let value = rest.get(2..).unwrap_or_default().splitn(3, |&b| b == 0).nth(2);
                    if let Some(value) = value {
                        png_text(&keyword, text(value), meta);
                    }
                }
            }
            b"IEND" => return Ok(()),
            _ => {}
        }
        pos = end;
    }
}

fn png_text(keyword: &str, value: String, meta: &mut ExtractedMetadata) {
    match keyword {
        "Software" => {
            meta.set("software", value.clone());
            meta.software.push(value);
        }
        "Creation Time" => {
            meta.capture_time = DateTime::parse_from_rfc3339(&value)
                .or_else(|_| DateTime::parse_from_rfc2822(&value))
                .map(|at| at.with_timezone(&Utc))
                .ok();
            meta.set("png.creation_time", value);
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(marker: u8, data: &[u8]) -> Vec<u8> {
        let mut out = vec![0xFF, marker];
        out.extend_from_slice(&((data.len() + 2) as u16).to_be_bytes());
        out.extend_from_slice(data);
        out
    }

    /// Little-endian EXIF with Make, Software and an Exif IFD holding DateTimeOriginal.
    fn exif(original: &str) -> Vec<u8> {
        let mut tiff = b"II*\0".to_vec();
        tiff.extend_from_slice(&8u32.to_le_bytes());
        // IFD0 at 8: 3 entries, values after the IFD
        let values_at = 8 + 2 + 3 * 12 + 4;
        let make = b"Acme\0";
        let software = b"GIMP 2.10\0";
        let exif_ifd = values_at + make.len() + software.len();
        tiff.extend_from_slice(&3u16.to_le_bytes());
        for (tag, kind, count, value) in [
            (0x010Fu16, 2u16, make.len() as u32, values_at as u32),
            (0x0131, 2, software.len() as u32, (values_at + make.len()) as u32),
            (0x8769, 4, 1, exif_ifd as u32),
        ] {
            tiff.extend_from_slice(&tag.to_le_bytes());
            tiff.extend_from_slice(&kind.to_le_bytes());
            tiff.extend_from_slice(&count.to_le_bytes());
            tiff.extend_from_slice(&value.to_le_bytes());
        }
        tiff.extend_from_slice(&0u32.to_le_bytes());
        tiff.extend_from_slice(make);
        tiff.extend_from_slice(software);
        // Exif IFD: one entry pointing past itself
        let date_at = exif_ifd + 2 + 12 + 4;
        let date = format!("{original}\0");
        tiff.extend_from_slice(&1u16.to_le_bytes());
        tiff.extend_from_slice(&0x9003u16.to_le_bytes());
        tiff.extend_from_slice(&2u16.to_le_bytes());
        tiff.extend_from_slice(&(date.len() as u32).to_le_bytes());
        tiff.extend_from_slice(&(date_at as u32).to_le_bytes());
        tiff.extend_from_slice(&0u32.to_le_bytes());
        tiff.extend_from_slice(date.as_bytes());

        let mut app1 = b"Exif\0\0".to_vec();
        app1.extend_from_slice(&tiff);
        app1
    }

    fn jpeg(segments: &[Vec<u8>]) -> Vec<u8> {
        let mut out = vec![0xFF, 0xD8];
        for s in segments {
            out.extend_from_slice(s);
        }
        out.extend_from_slice(&[0xFF, 0xDA, 0x00, 0x02, 0x12, 0x34, 0xFF, 0xD9]);
        out
    }

    #[test]
    fn test_jpeg_exif_fields() {
        let bytes = jpeg(&[segment(0xE1, &exif("2024:03:01 08:30:00"))]);
        let meta = extract(&bytes);
        assert_eq!(meta.format, MediaFormat::Jpeg);
        assert!(meta.structure_error.is_none(), "{:?}", meta.structure_error);
        assert!(meta.has_primary_block);
        assert_eq!(meta.fields.get("device.make").map(String::as_str), Some("Acme"));
        assert_eq!(meta.software, vec!["GIMP 2.10".to_string()]);
        assert_eq!(
            meta.capture_time,
            Some(DateTime::parse_from_rfc3339("2024-03-01T08:30:00Z").unwrap().with_timezone(&Utc))
        );
    }

    #[test]
    fn test_jpeg_xmp_history() {
        let mut xmp = XMP_HEADER.to_vec();
        xmp.extend_from_slice(
            br#"<x:xmpmeta><rdf:Description xmp:CreatorTool="Adobe Photoshop 25.0"><xmpMM:History><rdf:Seq><rdf:li stEvt:action="created"/><rdf:li stEvt:action="saved"/></rdf:Seq></xmpMM:History></rdf:Description></x:xmpmeta>"#,
        );
        let meta = extract(&jpeg(&[segment(0xE1, &xmp)]));
        assert!(!meta.has_primary_block);
        assert_eq!(meta.edit_actions, vec!["saved".to_string()]);
        assert!(meta.software.iter().any(|s| s.contains("Photoshop")));
    }

    #[test]
    fn test_segment_past_end_is_structural() {
        let mut bytes = vec![0xFF, 0xD8, 0xFF, 0xE1, 0x40, 0x00];
        bytes.extend_from_slice(b"Exif");
        assert!(extract(&bytes).structure_error.is_some());
        assert!(extract(&[0xFF, 0xD8, 0x00]).structure_error.is_some());
        assert!(extract(&[]).structure_error.is_some());
    }

    #[test]
    fn test_png_text_chunks() {
        let chunk = |kind: &[u8], data: &[u8]| {
            let mut out = (data.len() as u32).to_be_bytes().to_vec();
            out.extend_from_slice(kind);
            out.extend_from_slice(data);
            out.extend_from_slice(&[0; 4]);
            out
        };
        let mut ihdr = 640u32.to_be_bytes().to_vec();
        ihdr.extend_from_slice(&480u32.to_be_bytes());
        ihdr.extend_from_slice(&[8, 2, 0, 0, 0]);
        let mut bytes = PNG_SIGNATURE.to_vec();
        bytes.extend(chunk(b"IHDR", &ihdr));
        bytes.extend(chunk(b"tEXt", b"Software\0GIMP 2.10"));
        bytes.extend(chunk(b"IEND", &[]));
        let meta = extract(&bytes);
        assert_eq!(meta.format, MediaFormat::Png);
        assert!(meta.structure_error.is_none());
        assert_eq!(meta.fields.get("width").map(String::as_str), Some("640"));
        assert_eq!(meta.software, vec!["GIMP 2.10".to_string()]);

        bytes.truncate(bytes.len() - 12);
        assert!(extract(&bytes).structure_error.is_some());
    }

    #[test]
    fn test_oversized_largesize_is_structural() {
        let mut bytes = 16u32.to_be_bytes().to_vec();
        bytes.extend_from_slice(b"ftypisom\0\0\x02\0");
        bytes.extend_from_slice(&1u32.to_be_bytes());
        bytes.extend_from_slice(b"mdat");
        bytes.extend_from_slice(&u64::MAX.to_be_bytes());
        bytes.extend_from_slice(&[0; 8]);
        let meta = extract(&bytes);
        assert_eq!(meta.format, MediaFormat::IsoBmff);
        assert!(meta.structure_error.is_some());
    }

    #[test]
    fn test_mac_epoch() {
        assert_eq!(mac_time(MAC_EPOCH_OFFSET as u64).map(|t| t.timestamp()), Some(0));
        assert_eq!(mac_time(0), None);
    }

    #[test]
    fn test_unknown_format_has_no_metadata() {
        let meta = extract(b"plain text evidence");
        assert_eq!(meta.format, MediaFormat::Unknown);
        assert!(meta.fields.is_empty());
        assert!(meta.structure_error.is_none());
    }
}
