//! Detection shapes shared by every detector backend.

use serde::{Deserialize, Serialize};

/// Pixel bounding box of one face. `x1 < x2` and `y1 < y2` for any box
/// produced by [`BoundingBox::clamped`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl BoundingBox {
    pub fn new(x1: u32, y1: u32, x2: u32, y2: u32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Build a box from float corners, clamped to a `width` x `height` image.
    ///
    /// Returns `None` when nothing of the box is left inside the image.
    pub fn clamped(x1: f32, y1: f32, x2: f32, y2: f32, width: u32, height: u32) -> Option<Self> {
        let clamp = |v: f32, max: u32| v.round().clamp(0.0, max as f32) as u32;
        let bbox = Self {
            x1: clamp(x1, width),
            y1: clamp(y1, height),
            x2: clamp(x2, width),
            y2: clamp(y2, height),
        };
        if bbox.is_empty() {
            None
        } else {
            Some(bbox)
        }
    }

    pub fn width(&self) -> u32 {
        self.x2.saturating_sub(self.x1)
    }

    pub fn height(&self) -> u32 {
        self.y2.saturating_sub(self.y1)
    }

    pub fn area(&self) -> u64 {
        self.width() as u64 * self.height() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.area() == 0
    }

    /// Intersection over union with another box.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x1.max(other.x1);
        let y1 = self.y1.max(other.y1);
        let x2 = self.x2.min(other.x2);
        let y2 = self.y2.min(other.y2);

        if x2 <= x1 || y2 <= y1 {
            return 0.0;
        }

        let intersection = (x2 - x1) as f32 * (y2 - y1) as f32;
        let union = self.area() as f32 + other.area() as f32 - intersection;

        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }

    /// Grow the box by `margin` (fraction of its size) on every side,
    /// staying inside a `width` x `height` image.
    pub fn expand(&self, margin: f32, width: u32, height: u32) -> BoundingBox {
        let dx = self.width() as f32 * margin;
        let dy = self.height() as f32 * margin;
        Self::clamped(
            self.x1 as f32 - dx,
            self.y1 as f32 - dy,
            self.x2 as f32 + dx,
            self.y2 as f32 + dy,
            width,
            height,
        )
        .unwrap_or(*self)
    }
}

/// A 2D landmark point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn scaled(&self, sx: f32, sy: f32) -> Point {
        Point::new(self.x * sx, self.y * sy)
    }
}

/// One face found by a detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    /// Detector confidence in `[0, 1]`
    pub score: f32,
    /// Landmarks in `[0, 1]` coordinates relative to `bbox`.
    /// Empty for backends that do not produce them.
    pub landmarks: Vec<Point>,
}

impl Detection {
    pub fn new(bbox: BoundingBox, score: f32) -> Self {
        Self {
            bbox,
            score,
            landmarks: Vec::new(),
        }
    }

    pub fn with_landmarks(mut self, landmarks: Vec<Point>) -> Self {
        self.landmarks = landmarks;
        self
    }

    /// Landmarks in pixel coordinates of the crop after it was resized to
    /// `size` x `size`.
    pub fn landmarks_for_crop(&self, size: u32) -> Vec<Point> {
        let scale = size as f32;
        self.landmarks
            .iter()
            .map(|point| point.scaled(scale, scale))
            .collect()
    }
}

/// Greedy non-maximum suppression. Keeps the highest scoring detection of
/// every cluster whose IoU exceeds `iou_threshold`; result is sorted by
/// descending score.
pub fn non_max_suppression(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut kept: Vec<Detection> = Vec::with_capacity(detections.len());
    for candidate in detections {
        if kept
            .iter()
            .all(|k| k.bbox.iou(&candidate.bbox) <= iou_threshold)
        {
            kept.push(candidate);
        }
    }
    kept
}
