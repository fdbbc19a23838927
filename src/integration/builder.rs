//! Assembling detections from raw detector output.

use crate::tracker::{Detection, Embedding, ObjectClass, Rect};

/// Builds one `Detection`, accepting the box layouts common detectors emit.
#[derive(Debug, Clone)]
pub struct DetectionBuilder {
    frame_sequence: u64,
    bbox: Rect,
    class: ObjectClass,
    score: f32,
    embedding: Option<Embedding>,
    plate: Option<String>,
}

impl DetectionBuilder {
    /// Start a detection belonging to frame `frame_sequence`.
    pub fn new(frame_sequence: u64) -> Self {
        Self {
            frame_sequence,
            bbox: Rect::default(),
            class: ObjectClass::Other,
            score: 0.0,
            embedding: None,
            plate: None,
        }
    }

    /// Corners `(x1, y1)` and `(x2, y2)`.
    pub fn tlbr(mut self, x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        self.bbox = Rect::from_tlbr(x1, y1, x2, y2);
        self
    }

    /// Center plus width and height, as YOLO-style heads report boxes.
    pub fn xywh(mut self, cx: f32, cy: f32, w: f32, h: f32) -> Self {
        self.bbox = Rect::new(cx - w / 2.0, cy - h / 2.0, w, h);
        self
    }

    /// Left, top, width, height.
    pub fn tlwh(mut self, left: f32, top: f32, w: f32, h: f32) -> Self {
        self.bbox = Rect::new(left, top, w, h);
        self
    }

    pub fn class(mut self, class: ObjectClass) -> Self {
        self.class = class;
        self
    }

    /// Map a COCO class index: 0 is a person, bicycles through trucks are vehicles.
    pub fn coco_class(self, class_id: usize) -> Self {
        let class = match class_id {
            0 => ObjectClass::Person,
            1..=3 | 5 | 7 => ObjectClass::Vehicle,
            _ => ObjectClass::Other,
        };
        self.class(class)
    }

    pub fn score(mut self, score: f32) -> Self {
        self.score = score;
        self
    }

    pub fn embedding(mut self, embedding: impl Into<Embedding>) -> Self {
        self.embedding = Some(embedding.into());
        self
    }

    /// Raw OCR text of a plate read inside the box.
    pub fn plate(mut self, text: impl Into<String>) -> Self {
        self.plate = Some(text.into());
        self
    }

    pub fn build(self) -> Detection {
        let mut detection = Detection::new(self.frame_sequence, self.bbox, self.class, self.score);
        if let Some(embedding) = self.embedding {
            detection = detection.with_embedding(embedding);
        }
        if let Some(text) = &self.plate {
            detection = detection.with_plate(text);
        }
        detection
    }
}
