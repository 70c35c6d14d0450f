use crate::geometry::{self, Bbox, Projector};
use crate::{Error, Result};
use geo_types::{Coord, LineString};
use rstar::{Envelope, AABB};
use std::collections::BTreeSet;

/// A maintained line (travelway or ice route) that bicycle routes are matched against.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceLine {
    pub line: LineString<f64>,
    /// 1 is cleared first, 3 last.
    pub priority: u8,
    pub object_id: Option<u64>,
}

impl ReferenceLine {
    pub fn new(line: LineString<f64>, priority: u8, object_id: Option<u64>) -> Self {
        ReferenceLine {
            line,
            priority,
            object_id,
        }
    }
}

/// Per-line data derived with the index projector.
#[derive(Debug)]
pub(crate) struct IndexedLine {
    pub bbox: Bbox,
    pub planar: Vec<Coord<f64>>,
    pub bearing: Option<f64>,
}

/// Fixed-resolution grid over the extent of a set of reference lines.
///
/// Every cell keeps the indices of the lines whose bounding box overlaps it,
/// so a line may be listed in several cells. The index is read-only once built.
#[derive(Debug)]
pub struct SpatialIndex {
    lines: Vec<ReferenceLine>,
    indexed: Vec<IndexedLine>,
    projector: Projector,
    bounds: Bbox,
    cols: usize,
    rows: usize,
    cells: Vec<Vec<usize>>,
}

impl SpatialIndex {
    pub fn new(lines: Vec<ReferenceLine>, cols: usize, rows: usize) -> Result<Self> {
        if cols == 0 || rows == 0 {
            return Err(Error::InvalidConfig(format!(
                "grid resolution must be positive, got {}x{}",
                cols, rows
            )));
        }
        if lines.is_empty() {
            return Err(Error::EmptyReferenceSet);
        }

        let mut boxes = Vec::with_capacity(lines.len());
        for (index, line) in lines.iter().enumerate() {
            if line.priority == 0 {
                return Err(Error::InvalidReferenceLine {
                    index,
                    reason: "priority must be positive".into(),
                });
            }
            if line.line.coords().any(|c| !c.x.is_finite() || !c.y.is_finite()) {
                return Err(Error::InvalidReferenceLine {
                    index,
                    reason: "non-finite coordinate".into(),
                });
            }
            let bbox = geometry::line_bbox(&line.line).ok_or_else(|| Error::InvalidReferenceLine {
                index,
                reason: "no coordinates".into(),
            })?;
            boxes.push(bbox);
        }
        let bounds = geometry::union_bbox(&boxes).ok_or(Error::EmptyReferenceSet)?;
        let projector = Projector::for_bbox(&bounds);

        let indexed: Vec<IndexedLine> = lines
            .iter()
            .zip(boxes)
            .map(|(line, bbox)| {
                let planar = projector.project(&line.line);
                let bearing = geometry::overall_bearing(&planar);
                IndexedLine {
                    bbox,
                    planar,
                    bearing,
                }
            })
            .collect();

        let mut index = SpatialIndex {
            lines,
            indexed,
            projector,
            bounds,
            cols,
            rows,
            cells: vec![Vec::new(); cols * rows],
        };
        for line_index in 0..index.indexed.len() {
            let bbox = index.indexed[line_index].bbox;
            let ((col_min, col_max), (row_min, row_max)) = index.cell_range(&bbox);
            for row in row_min..=row_max {
                for col in col_min..=col_max {
                    index.cells[row * cols + col].push(line_index);
                }
            }
        }
        Ok(index)
    }

    pub fn lines(&self) -> &[ReferenceLine] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn projector(&self) -> &Projector {
        &self.projector
    }

    pub fn bounds(&self) -> &Bbox {
        &self.bounds
    }

    pub(crate) fn indexed(&self, line_index: usize) -> &IndexedLine {
        &self.indexed[line_index]
    }

    fn axis_cell(value: f64, min: f64, max: f64, count: usize) -> usize {
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

    /// Inclusive `(cols, rows)` ranges of the cells `bbox` overlaps, clamped to the grid.
    fn cell_range(&self, bbox: &Bbox) -> ((usize, usize), (usize, usize)) {
        let [min_x, min_y] = self.bounds.lower();
        let [max_x, max_y] = self.bounds.upper();
        let cols = (
            Self::axis_cell(bbox.lower()[0], min_x, max_x, self.cols),
            Self::axis_cell(bbox.upper()[0], min_x, max_x, self.cols),
        );
        let rows = (
            Self::axis_cell(bbox.lower()[1], min_y, max_y, self.rows),
            Self::axis_cell(bbox.upper()[1], min_y, max_y, self.rows),
        );
        (cols, rows)
    }

    /// Indices of the lines listed in any cell overlapping `bbox`, ascending.
    ///
    /// The window is used as given; callers expand it by their search radius.
    pub fn candidates(&self, bbox: &Bbox) -> Vec<usize> {
        if !self.bounds.intersects(bbox) {
            return Vec::new();
        }
        let ((col_min, col_max), (row_min, row_max)) = self.cell_range(bbox);
        let mut found = BTreeSet::new();
        for row in row_min..=row_max {
            for col in col_min..=col_max {
                found.extend(self.cells[row * self.cols + col].iter().copied());
            }
        }
        found.into_iter().collect()
    }

    /// Same as [`candidates`](Self::candidates) around a point.
    pub fn candidates_at(&self, lon: f64, lat: f64) -> Vec<usize> {
        self.candidates(&AABB::from_point([lon, lat]))
    }
}
