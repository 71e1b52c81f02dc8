use anyhow::{anyhow, Result};
use std::collections::VecDeque;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;
use crate::frame::Frame;

enum Scripted {
    Detections(Vec<Detection>),
    Failure(String),
}

/// Stub backend for testing and dry runs.
///
/// Replays scripted outputs in order, then keeps returning the fixed detections
/// (empty unless set with `with_fixed`).
#[derive(Default)]
pub struct StubBackend {
    script: VecDeque<Scripted>,
    fixed: Vec<Detection>,
    calls: u64,
}

impl StubBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return `detections` for every frame once the script is exhausted.
    pub fn with_fixed(mut self, detections: Vec<Detection>) -> Self {
        self.fixed = detections;
        self
    }

    /// Queue raw output for the next frame.
    pub fn then_detect(mut self, detections: Vec<Detection>) -> Self {
        self.script.push_back(Scripted::Detections(detections));
        self
    }

    /// Queue a model failure for the next frame.
    pub fn then_fail(mut self, message: &str) -> Self {
        self.script.push_back(Scripted::Failure(message.to_string()));
        self
    }

    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
        self.calls += 1;
        match self.script.pop_front() {
            Some(Scripted::Detections(detections)) => Ok(detections),
            Some(Scripted::Failure(message)) => Err(anyhow!(message)),
            None => Ok(self.fixed.clone()),
        }
    }
}
