use std::collections::BTreeSet;

/// Axis-aligned box in normalized (0..1) frame coordinates, top-left origin.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self { x, y, w, h }
    }

    /// Box from corner coordinates.
    pub fn from_corners(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self {
            x: x1.min(x2),
            y: y1.min(y2),
            w: (x2 - x1).abs(),
            h: (y2 - y1).abs(),
        }
    }

    pub fn area(&self) -> f32 {
        self.w.max(0.0) * self.h.max(0.0)
    }

    pub fn intersection_area(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.w).min(other.x + other.w);
        let y2 = (self.y + self.h).min(other.y + other.h);

        if x2 > x1 && y2 > y1 {
            (x2 - x1) * (y2 - y1)
        } else {
            0.0
        }
    }

    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let intersection = self.intersection_area(other);
        let union = self.area() + other.area() - intersection;

        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }

    /// Pixel rectangle `(x0, y0, x1, y1)` clamped to a `width`x`height` frame,
    /// or `None` when nothing of the box is inside it.
    pub fn to_pixels(&self, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        let clamp = |v: f32, max: u32| -> u32 {
            let px = (v * max as f32).round();
            if px.is_nan() || px <= 0.0 {
                0
            } else {
                (px as u32).min(max.saturating_sub(1))
            }
        };
        let x0 = clamp(self.x, width);
        let y0 = clamp(self.y, height);
        let x1 = clamp(self.x + self.w, width);
        let y1 = clamp(self.y + self.h, height);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some((x0, y0, x1, y1))
    }
}

/// One detector output: class, confidence and box.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub class_id: u32,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl Detection {
    pub fn new(class_id: u32, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            class_id,
            confidence,
            bbox,
        }
    }

    pub fn label(&self) -> &'static str {
        coco_label(self.class_id).unwrap_or("object")
    }
}

/// Relevant-class and confidence acceptance rule.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectionFilter {
    relevant_classes: BTreeSet<u32>,
    threshold: f32,
}

impl DetectionFilter {
    pub fn new(relevant_classes: impl IntoIterator<Item = u32>, threshold: f32) -> Self {
        Self {
            relevant_classes: relevant_classes.into_iter().collect(),
            threshold,
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn relevant_classes(&self) -> &BTreeSet<u32> {
        &self.relevant_classes
    }

    /// Confidence must lie in `[threshold, 1]` (NaN never passes) and the class
    /// must be relevant.
    pub fn accepts(&self, detection: &Detection) -> bool {
        detection.confidence >= self.threshold
            && detection.confidence <= 1.0
            && self.relevant_classes.contains(&detection.class_id)
    }
}

/// Detections from exactly one frame, all of which passed a `DetectionFilter`.
///
/// The only way to build a non-empty set is `DetectionSet::filtered`, so the
/// filter invariant holds whatever the model produced.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DetectionSet {
    detections: Vec<Detection>,
}

impl DetectionSet {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Keep raw detections that pass `filter`, preserving their order.
    pub fn filtered(raw: Vec<Detection>, filter: &DetectionFilter) -> Self {
        Self {
            detections: raw.into_iter().filter(|d| filter.accepts(d)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Detection> {
        self.detections.iter()
    }

    pub fn as_slice(&self) -> &[Detection] {
        &self.detections
    }

    /// Short `label(conf)` list for log lines.
    pub fn summary(&self) -> String {
        self.detections
            .iter()
            .map(|d| format!("{}({:.2})", d.label(), d.confidence))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl<'a> IntoIterator for &'a DetectionSet {
    type Item = &'a Detection;
    type IntoIter = std::slice::Iter<'a, Detection>;

    fn into_iter(self) -> Self::IntoIter {
        self.detections.iter()
    }
}

const COCO_LABELS: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich",
    "orange", "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch",
    "potted plant", "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote",
    "keyboard", "cell phone", "microwave", "oven", "toaster", "sink", "refrigerator", "book",
    "clock", "vase", "scissors", "teddy bear", "hair drier", "toothbrush",
];

/// COCO class name for a YOLO class id.
pub fn coco_label(class_id: u32) -> Option<&'static str> {
    COCO_LABELS.get(class_id as usize).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(class_id: u32, confidence: f32) -> Detection {
        Detection::new(class_id, confidence, BoundingBox::new(0.1, 0.1, 0.2, 0.2))
    }

    #[test]
    fn filter_drops_low_confidence_and_irrelevant_classes() {
        let filter = DetectionFilter::new([0, 2], 0.5);
        let set = DetectionSet::filtered(
            vec![
                det(0, 0.9),
                det(0, 0.3),
                det(4, 0.95),
                det(2, 0.5),
                det(2, f32::NAN),
                det(2, 1.2),
            ],
            &filter,
        );
        let kept: Vec<(u32, f32)> = set.iter().map(|d| (d.class_id, d.confidence)).collect();
        assert_eq!(kept, vec![(0, 0.9), (2, 0.5)]);
        for d in &set {
            assert!(d.confidence >= filter.threshold());
            assert!(filter.relevant_classes().contains(&d.class_id));
        }
    }

    #[test]
    fn iou_of_identical_and_disjoint_boxes() {
        let a = BoundingBox::new(0.0, 0.0, 0.5, 0.5);
        let b = BoundingBox::new(0.5, 0.5, 0.5, 0.5);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
        assert_eq!(a.iou(&b), 0.0);
        let c = BoundingBox::from_corners(0.25, 0.0, 0.75, 0.5);
        assert!((a.iou(&c) - (0.125 / 0.375)).abs() < 1e-6);
    }

    #[test]
    fn pixel_rect_is_clamped() {
        let bbox = BoundingBox::new(-0.2, 0.5, 0.7, 0.9);
        assert_eq!(bbox.to_pixels(100, 50), Some((0, 25, 50, 49)));
        assert_eq!(BoundingBox::new(1.5, 0.0, 0.1, 0.1).to_pixels(100, 50), None);
    }

    #[test]
    fn labels_follow_coco_order() {
        assert_eq!(coco_label(0), Some("person"));
        assert_eq!(coco_label(7), Some("truck"));
        assert_eq!(coco_label(80), None);
        assert_eq!(det(2, 0.9).label(), "car");
        assert_eq!(det(120, 0.9).label(), "object");
    }

    #[test]
    fn summary_lists_labels_with_confidence() {
        let set = DetectionSet::filtered(
            vec![det(0, 0.87), det(7, 0.5)],
            &DetectionFilter::new([0, 7], 0.5),
        );
        assert_eq!(set.summary(), "person(0.87), truck(0.50)");
        assert_eq!(DetectionSet::empty().summary(), "");
    }
}
