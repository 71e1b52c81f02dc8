//! Operator surface: where frames are shown and keys come from.
//!
//! Platform key codes are resolved to `KeySymbol`s inside each surface, so the
//! control loop never sees raw codes.

use std::time::Duration;

use anyhow::Result;

use crate::frame::Frame;
use crate::input::KeySymbol;

#[cfg(feature = "display-minifb")]
pub mod minifb;
pub mod scripted;

#[cfg(feature = "display-minifb")]
pub use self::minifb::MinifbSurface;
pub use scripted::ScriptedSurface;

/// A window (or stand-in) the operator watches and types into.
pub trait OperatorSurface {
    /// Show `frame`, replacing whatever was shown before.
    fn render(&mut self, frame: &Frame) -> Result<()>;

    /// Wait at most `wait` for one key. `Ok(None)` when nothing was pressed.
    fn poll_key(&mut self, wait: Duration) -> Result<Option<KeySymbol>>;

    /// False once the operator closed the window.
    fn is_open(&self) -> bool;

    /// Destroy the surface. Safe to call more than once.
    fn close(&mut self);
}

impl<T: OperatorSurface + ?Sized> OperatorSurface for Box<T> {
    fn render(&mut self, frame: &Frame) -> Result<()> {
        (**self).render(frame)
    }

    fn poll_key(&mut self, wait: Duration) -> Result<Option<KeySymbol>> {
        (**self).poll_key(wait)
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }

    fn close(&mut self) {
        (**self).close()
    }
}

impl<T: OperatorSurface + ?Sized> OperatorSurface for &mut T {
    fn render(&mut self, frame: &Frame) -> Result<()> {
        (**self).render(frame)
    }

    fn poll_key(&mut self, wait: Duration) -> Result<Option<KeySymbol>> {
        (**self).poll_key(wait)
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }

    fn close(&mut self) {
        (**self).close()
    }
}
