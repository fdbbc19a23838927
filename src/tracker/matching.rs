//! Association cost and global assignment between tracks and detections.

use std::cmp::Ordering;

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::tracker::embedding::Embedding;
use crate::tracker::frame::{Detection, ObjectClass};
use crate::tracker::rect::{Rect, iou_batch};

/// Relative weight of box overlap vs. appearance in the association cost.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassWeights {
    pub spatial: f32,
    pub appearance: f32,
}

impl ClassWeights {
    pub const fn new(spatial: f32, appearance: f32) -> Self {
        Self {
            spatial,
            appearance,
        }
    }

    /// Weights scaled to sum to one.
    pub fn normalized(&self) -> Self {
        let total = self.spatial + self.appearance;
        if total > 0.0 {
            Self::new(self.spatial / total, self.appearance / total)
        } else {
            Self::new(1.0, 0.0)
        }
    }
}

/// What the cost function needs to know about one side of a pair.
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    pub class: ObjectClass,
    pub bbox: Rect,
    pub embedding: Option<&'a Embedding>,
}

impl<'a> From<&'a Detection> for Candidate<'a> {
    fn from(det: &'a Detection) -> Self {
        Self {
            class: det.class,
            bbox: det.bbox,
            embedding: det.embedding.as_ref(),
        }
    }
}

/// Cost matrix (tracks x detections) in `[0, 1]`.
///
/// `w_s * (1 - IoU) + w_a * cosine_distance / 2`, weights chosen by class.
/// Pairs of different classes are `INFINITY`. When either side lacks a
/// usable embedding the spatial term carries the full weight.
pub fn cost_matrix(
    tracks: &[Candidate<'_>],
    detections: &[Candidate<'_>],
    weights: impl Fn(ObjectClass) -> ClassWeights,
) -> Array2<f32> {
    let track_boxes: Vec<Rect> = tracks.iter().map(|t| t.bbox).collect();
    let det_boxes: Vec<Rect> = detections.iter().map(|d| d.bbox).collect();
    let ious = iou_batch(&track_boxes, &det_boxes);

    Array2::from_shape_fn((tracks.len(), detections.len()), |(i, j)| {
        let (track, det) = (&tracks[i], &detections[j]);
        if track.class != det.class {
            return f32::INFINITY;
        }
        let spatial = 1.0 - ious[[i, j]];
        let appearance = match (track.embedding, det.embedding) {
            (Some(a), Some(b)) => a.cosine_distance(b).map(|d| d / 2.0),
            _ => None,
        };
        match appearance {
            Some(appearance) => {
                let w = weights(track.class).normalized();
                w.spatial * spatial + w.appearance * appearance
            }
            None => spatial,
        }
    })
}

/// Canonical processing order of the accepted detections.
///
/// Sorting by content makes the assignment independent of the order the
/// detector happened to emit its boxes in.
pub fn canonical_order(detections: &[Detection], accepted: &[usize]) -> Vec<usize> {
    let mut order = accepted.to_vec();
    order.sort_by(|&a, &b| compare_detections(&detections[a], &detections[b]));
    order
}

fn compare_detections(a: &Detection, b: &Detection) -> Ordering {
    a.class
        .cmp(&b.class)
        .then_with(|| compare_floats(&a.bbox.to_tlwh(), &b.bbox.to_tlwh()))
        .then_with(|| a.confidence.total_cmp(&b.confidence))
        .then_with(|| match (&a.embedding, &b.embedding) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(x), Some(y)) => compare_floats(x.as_slice(), y.as_slice()),
        })
}

fn compare_floats(a: &[f32], b: &[f32]) -> Ordering {
    a.iter()
        .zip(b)
        .map(|(x, y)| x.total_cmp(y))
        .find(|o| o.is_ne())
        .unwrap_or_else(|| a.len().cmp(&b.len()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignmentResult {
    /// `(row, column)` pairs, ascending by row
    pub matches: Vec<(usize, usize)>,
    pub unmatched_tracks: Vec<usize>,
    pub unmatched_detections: Vec<usize>,
}

const GATED: f64 = 1e6;
const TIE_BREAK: f64 = 1e-9;

/// Globally optimal assignment with rejection.
///
/// Solved with LAPJV on the `(rows + cols)` square augmentation where
/// leaving a row or a column unmatched costs `thresh / 2`; a pair is only
/// matched when its cost is at most `thresh`. Each real pair carries a
/// penalty growing with the row index so equal-cost ties resolve to the
/// lower row.
pub fn linear_assignment(cost_matrix: &Array2<f32>, thresh: f32) -> AssignmentResult {
    let (num_rows, num_cols) = cost_matrix.dim();

    if num_rows == 0 || num_cols == 0 {
        return AssignmentResult {
            matches: vec![],
            unmatched_tracks: (0..num_rows).collect(),
            unmatched_detections: (0..num_cols).collect(),
        };
    }

    let size = num_rows + num_cols;
    let reject = f64::from(thresh) / 2.0 + TIE_BREAK * (num_rows as f64 + 1.0);
    let mut augmented = Array2::<f64>::from_elem((size, size), GATED);

    for i in 0..num_rows {
        for j in 0..num_cols {
            let cost = cost_matrix[[i, j]];
            if cost.is_finite() && cost <= thresh {
                augmented[[i, j]] = f64::from(cost) + TIE_BREAK * (i as f64 + 1.0);
            }
        }
        augmented[[i, num_cols + i]] = reject;
    }
    for j in 0..num_cols {
        augmented[[num_rows + j, j]] = reject;
        for i in 0..num_rows {
            augmented[[num_rows + j, num_cols + i]] = 0.0;
        }
    }

    let mut matches = vec![];
    let mut unmatched_tracks = vec![];
    let mut detection_free = vec![true; num_cols];

    match lapjv::lapjv(&augmented) {
        Ok((row_to_col, _)) => {
            for (row, &col) in row_to_col.iter().enumerate().take(num_rows) {
                if col < num_cols && augmented[[row, col]] < GATED {
                    matches.push((row, col));
                    detection_free[col] = false;
                } else {
                    unmatched_tracks.push(row);
                }
            }
        }
        Err(e) => {
            warn!(error = ?e, rows = num_rows, cols = num_cols, "assignment solver failed");
            unmatched_tracks = (0..num_rows).collect();
        }
    }

    let unmatched_detections = detection_free
        .iter()
        .enumerate()
        .filter_map(|(j, &free)| free.then_some(j))
        .collect();

    AssignmentResult {
        matches,
        unmatched_tracks,
        unmatched_detections,
    }
}
