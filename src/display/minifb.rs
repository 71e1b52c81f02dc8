use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use minifb::{Key, KeyRepeat, Window, WindowOptions};

use super::OperatorSurface;
use crate::frame::Frame;
use crate::input::KeySymbol;
use crate::TeleopError;

const PUMP_INTERVAL: Duration = Duration::from_millis(2);

/// Desktop window backed by minifb.
///
/// minifb only reports key presses while the window is pumped, so a press seen
/// during `render` is held for the next `poll_key`. Only the latest press is
/// held; older ones are dropped.
pub struct MinifbSurface {
    window: Option<Window>,
    pending: Option<KeySymbol>,
}

impl MinifbSurface {
    pub fn open(title: &str, width: usize, height: usize) -> Result<Self> {
        let window = Window::new(
            title,
            width,
            height,
            WindowOptions {
                resize: true,
                ..WindowOptions::default()
            },
        )
        .with_context(|| format!("failed to open window '{}'", title))?;
        log::debug!("opened {}x{} window '{}'", width, height, title);
        Ok(Self {
            window: Some(window),
            pending: None,
        })
    }

    fn collect_keys(&mut self) {
        if let Some(window) = &self.window {
            let pressed = window.get_keys_pressed(KeyRepeat::No);
            if let Some(latest) = latest_key(pressed) {
                self.pending = Some(latest);
            }
        }
    }
}

impl OperatorSurface for MinifbSurface {
    fn render(&mut self, frame: &Frame) -> Result<()> {
        let window = self.window.as_mut().ok_or(TeleopError::SurfaceClosed)?;
        let argb = frame.to_argb();
        window
            .update_with_buffer(&argb, frame.width() as usize, frame.height() as usize)
            .context("failed to update window")?;
        self.collect_keys();
        Ok(())
    }

    fn poll_key(&mut self, wait: Duration) -> Result<Option<KeySymbol>> {
        let deadline = Instant::now() + wait;
        loop {
            if let Some(key) = self.pending.take() {
                return Ok(Some(key));
            }
            match self.window.as_mut() {
                Some(window) if window.is_open() => window.update(),
                _ => return Ok(None),
            }
            self.collect_keys();
            if self.pending.is_some() {
                continue;
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            thread::sleep(PUMP_INTERVAL.min(deadline - now));
        }
    }

    fn is_open(&self) -> bool {
        self.window.as_ref().map(Window::is_open).unwrap_or(false)
    }

    fn close(&mut self) {
        if self.window.take().is_some() {
            log::debug!("window closed");
        }
        self.pending = None;
    }
}

/// Last mappable key of one pump's presses.
fn latest_key(pressed: Vec<Key>) -> Option<KeySymbol> {
    pressed.into_iter().filter_map(map_key).last()
}

/// Resolve a minifb key to a portable symbol. Modifier keys are ignored.
fn map_key(key: Key) -> Option<KeySymbol> {
    let symbol = match key {
        Key::Escape => KeySymbol::Escape,
        Key::Enter | Key::NumPadEnter => KeySymbol::Enter,
        Key::Space => KeySymbol::Space,
        Key::Up => KeySymbol::ArrowUp,
        Key::Down => KeySymbol::ArrowDown,
        Key::Left => KeySymbol::ArrowLeft,
        Key::Right => KeySymbol::ArrowRight,
        Key::LeftShift
        | Key::RightShift
        | Key::LeftCtrl
        | Key::RightCtrl
        | Key::LeftAlt
        | Key::RightAlt
        | Key::LeftSuper
        | Key::RightSuper
        | Key::CapsLock => return None,
        other => match letter_or_digit(other) {
            Some(c) => KeySymbol::Char(c),
            None => KeySymbol::Unknown(other as u32),
        },
    };
    Some(symbol)
}

fn letter_or_digit(key: Key) -> Option<char> {
    const LETTERS: [Key; 26] = [
        Key::A, Key::B, Key::C, Key::D, Key::E, Key::F, Key::G, Key::H, Key::I, Key::J, Key::K,
        Key::L, Key::M, Key::N, Key::O, Key::P, Key::Q, Key::R, Key::S, Key::T, Key::U, Key::V,
        Key::W, Key::X, Key::Y, Key::Z,
    ];
    const DIGITS: [Key; 10] = [
        Key::Key0, Key::Key1, Key::Key2, Key::Key3, Key::Key4, Key::Key5, Key::Key6, Key::Key7,
        Key::Key8, Key::Key9,
    ];
    if let Some(i) = LETTERS.iter().position(|k| *k == key) {
        return Some((b'a' + i as u8) as char);
    }
    DIGITS
        .iter()
        .position(|k| *k == key)
        .map(|i| (b'0' + i as u8) as char)
}
