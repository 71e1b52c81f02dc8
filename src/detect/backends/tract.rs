#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{BoundingBox, Detection};
use crate::frame::Frame;

/// Scores below this never leave the backend; the configured threshold is
/// applied later by `Perception`.
const CANDIDATE_FLOOR: f32 = 0.05;
const MAX_DETECTIONS: usize = 300;

/// Tract-based backend for YOLOv8-style ONNX detectors.
///
/// Expects a single output shaped `[1, 4 + classes, anchors]` (or transposed),
/// rows 0..4 holding centre x/y and width/height in input pixels. Frames are
/// stretched to the square input, so normalizing by the input edge maps boxes
/// straight back onto the source frame.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>, TypedModel>,
    input_size: u32,
    iou_threshold: f32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let size = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, size, size)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            input_size,
            iou_threshold: 0.45,
        })
    }

    /// Override the default non-maximum-suppression IoU threshold.
    pub fn with_iou_threshold(mut self, iou_threshold: f32) -> Self {
        self.iou_threshold = iou_threshold;
        self
    }

    fn build_input(&self, frame: &Frame) -> Tensor {
        let size = self.input_size;
        let resized = imageops::resize(&frame.to_rgb_image(), size, size, FilterType::Triangle);
        let size = size as usize;
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, size, size), |(_, c, y, x)| {
            resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
        });
        input.into_tensor()
    }

    fn decode(&self, outputs: TVec<TValue>) -> Result<Vec<Detection>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?
            .into_dimensionality::<tract_ndarray::Ix3>()
            .context("expected a rank-3 detector output")?;

        let (_, d1, d2) = view.dim();
        // Attributes are the short axis (84 for COCO), anchors the long one.
        let attrs_first = d1 <= d2;
        let (attrs, anchors) = if attrs_first { (d1, d2) } else { (d2, d1) };
        if attrs <= 4 {
            return Err(anyhow!("detector output has no class scores ({} rows)", attrs));
        }
        let at = |attr: usize, anchor: usize| -> f32 {
            if attrs_first {
                view[[0, attr, anchor]]
            } else {
                view[[0, anchor, attr]]
            }
        };

        let edge = self.input_size as f32;
        let mut candidates = Vec::new();
        for anchor in 0..anchors {
            let (class_id, score) = (4..attrs)
                .map(|attr| (attr - 4, at(attr, anchor)))
                .fold((0usize, f32::NEG_INFINITY), |best, cur| {
                    if cur.1 > best.1 {
                        cur
                    } else {
                        best
                    }
                });
            if !(score >= CANDIDATE_FLOOR) {
                continue;
            }
            let (cx, cy, w, h) = (
                at(0, anchor) / edge,
                at(1, anchor) / edge,
                at(2, anchor) / edge,
                at(3, anchor) / edge,
            );
            candidates.push(Detection::new(
                class_id as u32,
                score.min(1.0),
                BoundingBox::new(cx - w / 2.0, cy - h / 2.0, w, h),
            ));
        }
        Ok(non_max_suppression(candidates, self.iou_threshold, MAX_DETECTIONS))
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let input = self.build_input(frame);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.decode(outputs)
    }

    fn warm_up(&mut self) -> Result<()> {
        let blank = Frame::filled(self.input_size, self.input_size, [0, 0, 0])?;
        self.detect(&blank).map(|_| ())
    }
}

/// Greedy per-class NMS, highest confidence first.
fn non_max_suppression(
    mut candidates: Vec<Detection>,
    iou_threshold: f32,
    max_detections: usize,
) -> Vec<Detection> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<Detection> = Vec::new();
    for candidate in candidates {
        if kept.len() >= max_detections {
            break;
        }
        let suppressed = kept.iter().any(|k| {
            k.class_id == candidate.class_id && k.bbox.iou(&candidate.bbox) > iou_threshold
        });
        if !suppressed {
            kept.push(candidate);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nms_keeps_best_of_overlapping_same_class() {
        let a = Detection::new(0, 0.9, BoundingBox::new(0.1, 0.1, 0.4, 0.4));
        let b = Detection::new(0, 0.8, BoundingBox::new(0.12, 0.1, 0.4, 0.4));
        let c = Detection::new(2, 0.7, BoundingBox::new(0.12, 0.1, 0.4, 0.4));
        let kept = non_max_suppression(vec![b, a.clone(), c.clone()], 0.45, 10);
        assert_eq!(kept, vec![a, c]);
    }
}
