use std::collections::VecDeque;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Result};

use super::OperatorSurface;
use crate::frame::Frame;
use crate::input::{parse_key_script, KeySymbol};
use crate::TeleopError;

/// Headless surface that replays a key script.
///
/// Each `poll_key` consumes one script entry (`None` means "no key this
/// iteration"). Rendered frames are recorded by size only.
#[derive(Debug, Default)]
pub struct ScriptedSurface {
    keys: VecDeque<Option<KeySymbol>>,
    quit_when_exhausted: bool,
    honor_wait: bool,
    close_after_polls: Option<u64>,
    fail_renders: bool,
    polls: u64,
    rendered: Vec<(u32, u32)>,
    open: bool,
    close_calls: u32,
}

impl ScriptedSurface {
    pub fn new(keys: impl IntoIterator<Item = Option<KeySymbol>>) -> Self {
        Self {
            keys: keys.into_iter().collect(),
            open: true,
            ..Self::default()
        }
    }

    /// Build from a comma-separated script such as `"w,,d,esc"`.
    pub fn from_script(script: &str) -> Result<Self> {
        Ok(Self::new(parse_key_script(script)?))
    }

    /// Report Escape once the script runs out instead of `None` forever.
    pub fn quit_when_exhausted(mut self) -> Self {
        self.quit_when_exhausted = true;
        self
    }

    /// Sleep for the requested wait on every poll, like a real window.
    pub fn honor_wait(mut self) -> Self {
        self.honor_wait = true;
        self
    }

    /// Behave as if the operator closed the window after `polls` polls.
    pub fn close_after_polls(mut self, polls: u64) -> Self {
        self.close_after_polls = Some(polls);
        self
    }

    /// Make every `render` fail.
    pub fn fail_renders(mut self) -> Self {
        self.fail_renders = true;
        self
    }

    pub fn render_count(&self) -> usize {
        self.rendered.len()
    }

    /// Sizes of rendered frames, in order.
    pub fn rendered_sizes(&self) -> &[(u32, u32)] {
        &self.rendered
    }

    pub fn polls(&self) -> u64 {
        self.polls
    }

    pub fn close_calls(&self) -> u32 {
        self.close_calls
    }

    pub fn remaining_keys(&self) -> usize {
        self.keys.len()
    }
}

impl OperatorSurface for ScriptedSurface {
    fn render(&mut self, frame: &Frame) -> Result<()> {
        if !self.open {
            return Err(TeleopError::SurfaceClosed.into());
        }
        if self.fail_renders {
            return Err(anyhow!("scripted render failure"));
        }
        self.rendered.push((frame.width(), frame.height()));
        Ok(())
    }

    fn poll_key(&mut self, wait: Duration) -> Result<Option<KeySymbol>> {
        if self.honor_wait && !wait.is_zero() {
            thread::sleep(wait);
        }
        self.polls += 1;
        if let Some(limit) = self.close_after_polls {
            if self.polls >= limit {
                self.open = false;
            }
        }
        Ok(match self.keys.pop_front() {
            Some(key) => key,
            None if self.quit_when_exhausted => Some(KeySymbol::Escape),
            None => None,
        })
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn close(&mut self) {
        self.close_calls += 1;
        self.open = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replays_script_then_quits() {
        let mut surface = ScriptedSurface::from_script("w,,up").unwrap().quit_when_exhausted();
        let wait = Duration::from_millis(1);
        assert_eq!(surface.poll_key(wait).unwrap(), Some(KeySymbol::Char('w')));
        assert_eq!(surface.poll_key(wait).unwrap(), None);
        assert_eq!(surface.poll_key(wait).unwrap(), Some(KeySymbol::ArrowUp));
        assert_eq!(surface.poll_key(wait).unwrap(), Some(KeySymbol::Escape));
        assert_eq!(surface.polls(), 4);
    }

    #[test]
    fn records_renders_until_closed() {
        let mut surface = ScriptedSurface::new([]);
        let frame = Frame::filled(8, 6, [0, 0, 0]).unwrap();
        surface.render(&frame).unwrap();
        assert_eq!(surface.rendered_sizes(), &[(8, 6)]);
        surface.close();
        assert!(!surface.is_open());
        assert!(surface.render(&frame).is_err());
        assert_eq!(surface.close_calls(), 1);
    }

    #[test]
    fn closes_after_poll_limit() {
        let mut surface = ScriptedSurface::new([None, None, None]).close_after_polls(2);
        surface.poll_key(Duration::ZERO).unwrap();
        assert!(surface.is_open());
        surface.poll_key(Duration::ZERO).unwrap();
        assert!(!surface.is_open());
    }
}
