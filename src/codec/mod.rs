//! Segmented binary feature files.
//!
//! All values are little-endian. Coordinates are stored as `i32` offsets from
//! the south-west corner of the file's extent in units of 1e-6 degrees.
//!
//! ```text
//! u32 segment count, f64 base lon, f64 base lat
//! per segment: i32 min lon, i32 min lat, i32 max lon, i32 max lat, u32 feature count
//! per feature: u8 title len, title, u8 priority, u8 source dataset, u16 coord count,
//!              coord count * (i32 lon, i32 lat)
//! ```

use crate::geometry::Bbox;
use crate::{Error, Result};
use geo_types::{Coord, LineString};
use rstar::{Envelope, AABB};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{Read, Write};
use tracing::debug;

/// Fixed-point units per degree.
pub const SCALE: f64 = 1_000_000.0;
pub const GRID_COLS: usize = 8;
pub const GRID_ROWS: usize = 4;
pub const MAX_TITLE_BYTES: usize = u8::MAX as usize;
pub const MAX_COORDINATES: usize = u16::MAX as usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceDataset {
    Travelways = 0,
    Bike = 1,
    Ice = 2,
}

impl From<SourceDataset> for u8 {
    fn from(source: SourceDataset) -> Self {
        source as u8
    }
}

impl TryFrom<u8> for SourceDataset {
    type Error = Error;

    fn try_from(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(SourceDataset::Travelways),
            1 => Ok(SourceDataset::Bike),
            2 => Ok(SourceDataset::Ice),
            other => Err(Error::UnknownSource(other)),
        }
    }
}

impl fmt::Display for SourceDataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SourceDataset::Travelways => "travelways",
            SourceDataset::Bike => "bike",
            SourceDataset::Ice => "ice",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutputFeature {
    pub title: String,
    pub priority: u8,
    pub source: SourceDataset,
    pub line: LineString<f64>,
}

/// A geographic bucket of features with the extent of its members.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub bounds: Bbox,
    pub features: Vec<OutputFeature>,
}

impl Segment {
    pub fn intersects(&self, viewport: &Bbox) -> bool {
        self.bounds.intersects(viewport)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecodedFile {
    /// South-west corner all offsets are relative to.
    pub base: Coord<f64>,
    pub segments: Vec<Segment>,
}

impl DecodedFile {
    pub fn features(&self) -> impl Iterator<Item = &OutputFeature> {
        self.segments.iter().flat_map(|segment| segment.features.iter())
    }
}

fn coords_bbox<'a, I>(coords: I) -> Option<Bbox>
where
    I: IntoIterator<Item = &'a Coord<f64>>,
{
    coords.into_iter().fold(None, |acc: Option<Bbox>, c| {
        let point = AABB::from_point([c.x, c.y]);
        Some(match acc {
            Some(acc) => acc.merged(&point),
            None => point,
        })
    })
}

fn to_fixed(value: f64, base: f64) -> Result<i32> {
    let scaled = ((value - base) * SCALE).round();
    if !scaled.is_finite() || scaled < i32::MIN as f64 || scaled > i32::MAX as f64 {
        return Err(Error::FixedPointOverflow { value, base });
    }
    Ok(scaled as i32)
}

fn from_fixed(delta: i32, base: f64) -> f64 {
    base + delta as f64 / SCALE
}

fn grid_cell(value: f64, min: f64, max: f64, count: usize) -> usize {
    if max <= min {
        return 0;
    }
    let cell = ((value - min) / (max - min) * count as f64).floor();
    if cell < 0.0 {
        0
    } else {
        (cell as usize).min(count - 1)
    }
}

fn check_count(what: &'static str, count: usize) -> Result<u32> {
    u32::try_from(count).map_err(|_| Error::CountOverflow { what, count })
}

/// Buckets `features` into the fixed grid, row-major, skipping empty cells.
///
/// Each feature goes to the cell holding its first coordinate; the returned
/// segment bounds are the tight extent of the members.
pub fn segments(features: &[OutputFeature]) -> Result<(Bbox, Vec<Segment>)> {
    if features.is_empty() {
        return Err(Error::NoFeatures);
    }
    check_count("features", features.len())?;
    for feature in features {
        if feature.line.0.is_empty() {
            return Err(Error::EmptyFeature {
                title: feature.title.clone(),
            });
        }
    }
    let global = coords_bbox(features.iter().flat_map(|f| f.line.0.iter())).ok_or(Error::NoFeatures)?;
    let [min_lon, min_lat] = global.lower();
    let [max_lon, max_lat] = global.upper();

    let mut cells: Vec<Vec<&OutputFeature>> = vec![Vec::new(); GRID_COLS * GRID_ROWS];
    for feature in features {
        let first = feature.line.0[0];
        let col = grid_cell(first.x, min_lon, max_lon, GRID_COLS);
        let row = grid_cell(first.y, min_lat, max_lat, GRID_ROWS);
        cells[row * GRID_COLS + col].push(feature);
    }

    let segments = cells
        .into_iter()
        .filter(|members| !members.is_empty())
        .map(|members| {
            let bounds = coords_bbox(members.iter().flat_map(|f| f.line.0.iter()))
                .unwrap_or(global);
            Segment {
                bounds,
                features: members.into_iter().cloned().collect(),
            }
        })
        .collect();
    Ok((global, segments))
}

fn encode_feature(buf: &mut Vec<u8>, feature: &OutputFeature, base: &Coord<f64>) -> Result<()> {
    let title = feature.title.as_bytes();
    if title.len() > MAX_TITLE_BYTES {
        return Err(Error::TitleTooLong {
            title: feature.title.clone(),
        });
    }
    let count = feature.line.0.len();
    if count > MAX_COORDINATES {
        return Err(Error::TooManyCoordinates(count));
    }
    buf.push(title.len() as u8);
    buf.extend_from_slice(title);
    buf.push(feature.priority);
    buf.push(feature.source.into());
    buf.extend_from_slice(&(count as u16).to_le_bytes());
    for coord in &feature.line.0 {
        buf.extend_from_slice(&to_fixed(coord.x, base.x)?.to_le_bytes());
        buf.extend_from_slice(&to_fixed(coord.y, base.y)?.to_le_bytes());
    }
    Ok(())
}

/// Serializes `features` into a complete file image.
pub fn encode_to_vec(features: &[OutputFeature]) -> Result<Vec<u8>> {
    let (global, segments) = segments(features)?;
    let base = Coord {
        x: global.lower()[0],
        y: global.lower()[1],
    };

    let mut buf = Vec::new();
    buf.extend_from_slice(&check_count("segments", segments.len())?.to_le_bytes());
    buf.extend_from_slice(&base.x.to_le_bytes());
    buf.extend_from_slice(&base.y.to_le_bytes());

    for segment in &segments {
        let [min_lon, min_lat] = segment.bounds.lower();
        let [max_lon, max_lat] = segment.bounds.upper();
        for value in [
            to_fixed(min_lon, base.x)?,
            to_fixed(min_lat, base.y)?,
            to_fixed(max_lon, base.x)?,
            to_fixed(max_lat, base.y)?,
        ] {
            buf.extend_from_slice(&value.to_le_bytes());
        }
        buf.extend_from_slice(&check_count("features in segment", segment.features.len())?.to_le_bytes());
        for feature in &segment.features {
            encode_feature(&mut buf, feature, &base)?;
        }
    }
    debug!(
        features = features.len(),
        segments = segments.len(),
        bytes = buf.len(),
        "encoded feature file"
    );
    Ok(buf)
}

/// Encodes and writes `features`; nothing is written when validation fails.
pub fn encode<W: Write>(features: &[OutputFeature], mut writer: W) -> Result<()> {
    let buf = encode_to_vec(features)?;
    writer.write_all(&buf)?;
    Ok(())
}

fn read_array<R: Read, const N: usize>(reader: &mut R) -> Result<[u8; N]> {
    let mut bytes = [0u8; N];
    reader.read_exact(&mut bytes)?;
    Ok(bytes)
}

fn read_u8<R: Read>(reader: &mut R) -> Result<u8> {
    Ok(read_array::<R, 1>(reader)?[0])
}

fn read_u16<R: Read>(reader: &mut R) -> Result<u16> {
    Ok(u16::from_le_bytes(read_array(reader)?))
}

fn read_u32<R: Read>(reader: &mut R) -> Result<u32> {
    Ok(u32::from_le_bytes(read_array(reader)?))
}

fn read_i32<R: Read>(reader: &mut R) -> Result<i32> {
    Ok(i32::from_le_bytes(read_array(reader)?))
}

fn read_f64<R: Read>(reader: &mut R) -> Result<f64> {
    Ok(f64::from_le_bytes(read_array(reader)?))
}

fn decode_feature<R: Read>(reader: &mut R, base: &Coord<f64>) -> Result<OutputFeature> {
    let title_len = read_u8(reader)? as usize;
    let mut title = vec![0u8; title_len];
    reader.read_exact(&mut title)?;
    let title = String::from_utf8(title)?;
    let priority = read_u8(reader)?;
    let source = SourceDataset::try_from(read_u8(reader)?)?;
    let count = read_u16(reader)? as usize;
    let mut coords = Vec::with_capacity(count);
    for _ in 0..count {
        let x = from_fixed(read_i32(reader)?, base.x);
        let y = from_fixed(read_i32(reader)?, base.y);
        coords.push(Coord { x, y });
    }
    Ok(OutputFeature {
        title,
        priority,
        source,
        line: LineString::new(coords),
    })
}

/// Decodes a file, keeping only the segments `keep` accepts.
///
/// Segments carry no byte length, so rejected segments are still parsed.
fn decode_filtered<R, F>(mut reader: R, keep: F) -> Result<DecodedFile>
where
    R: Read,
    F: Fn(&Segment) -> bool,
{
    let segment_count = read_u32(&mut reader)?;
    let base = Coord {
        x: read_f64(&mut reader)?,
        y: read_f64(&mut reader)?,
    };
    let mut segments = Vec::new();
    for _ in 0..segment_count {
        let min_lon = from_fixed(read_i32(&mut reader)?, base.x);
        let min_lat = from_fixed(read_i32(&mut reader)?, base.y);
        let max_lon = from_fixed(read_i32(&mut reader)?, base.x);
        let max_lat = from_fixed(read_i32(&mut reader)?, base.y);
        let bounds = AABB::from_corners([min_lon, min_lat], [max_lon, max_lat]);
        let feature_count = read_u32(&mut reader)?;
        let mut features = Vec::new();
        for _ in 0..feature_count {
            features.push(decode_feature(&mut reader, &base)?);
        }
        let segment = Segment { bounds, features };
        if keep(&segment) {
            segments.push(segment);
        }
    }
    Ok(DecodedFile { base, segments })
}

pub fn decode<R: Read>(reader: R) -> Result<DecodedFile> {
    decode_filtered(reader, |_| true)
}

/// Decodes only the segments whose bounds intersect `viewport`.
pub fn decode_viewport<R: Read>(reader: R, viewport: &Bbox) -> Result<DecodedFile> {
    decode_filtered(reader, |segment| segment.intersects(viewport))
}
