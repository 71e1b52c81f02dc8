//! Portable key symbols and the key → intent mapping.
//!
//! Platform key codes are resolved to `KeySymbol` once, at the surface boundary.
//! Everything downstream works on symbols only.

use anyhow::{anyhow, Result};
use std::fmt;
use std::str::FromStr;

/// Platform-independent key symbol.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum KeySymbol {
    /// Printable character key (letters, digits, punctuation).
    Char(char),
    ArrowUp,
    ArrowDown,
    ArrowLeft,
    ArrowRight,
    Escape,
    Enter,
    Space,
    /// A platform code with no portable meaning.
    Unknown(u32),
}

// Extended codes reported by OpenCV-style `waitKeyEx` on Windows.
const RAW_ARROW_LEFT: i32 = 2_424_832;
const RAW_ARROW_UP: i32 = 2_490_368;
const RAW_ARROW_RIGHT: i32 = 2_555_904;
const RAW_ARROW_DOWN: i32 = 2_621_440;
const RAW_ESCAPE: i32 = 27;
const RAW_ENTER: i32 = 13;
const RAW_SPACE: i32 = 32;

impl KeySymbol {
    /// Resolve a raw `waitKey`-style code. Negative codes mean "no key pending".
    pub fn from_raw_code(code: i32) -> Option<KeySymbol> {
        let symbol = match code {
            c if c < 0 => return None,
            RAW_ESCAPE => KeySymbol::Escape,
            RAW_ENTER | 10 => KeySymbol::Enter,
            RAW_SPACE => KeySymbol::Space,
            RAW_ARROW_UP => KeySymbol::ArrowUp,
            RAW_ARROW_DOWN => KeySymbol::ArrowDown,
            RAW_ARROW_LEFT => KeySymbol::ArrowLeft,
            RAW_ARROW_RIGHT => KeySymbol::ArrowRight,
            c if (33..127).contains(&c) => KeySymbol::Char((c as u8 as char).to_ascii_lowercase()),
            c => KeySymbol::Unknown(c as u32),
        };
        Some(symbol)
    }
}

impl fmt::Display for KeySymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeySymbol::Char(c) => write!(f, "{}", c.to_ascii_uppercase()),
            KeySymbol::ArrowUp => write!(f, "Up"),
            KeySymbol::ArrowDown => write!(f, "Down"),
            KeySymbol::ArrowLeft => write!(f, "Left"),
            KeySymbol::ArrowRight => write!(f, "Right"),
            KeySymbol::Escape => write!(f, "Esc"),
            KeySymbol::Enter => write!(f, "Enter"),
            KeySymbol::Space => write!(f, "Space"),
            KeySymbol::Unknown(code) => write!(f, "key#{}", code),
        }
    }
}

/// Parses key-script tokens: single characters, `up`/`down`/`left`/`right`,
/// `esc`, `enter`, `space`, or a raw numeric code prefixed with `#`.
impl FromStr for KeySymbol {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let token = s.trim().to_ascii_lowercase();
        let symbol = match token.as_str() {
            "up" => KeySymbol::ArrowUp,
            "down" => KeySymbol::ArrowDown,
            "left" => KeySymbol::ArrowLeft,
            "right" => KeySymbol::ArrowRight,
            "esc" | "escape" => KeySymbol::Escape,
            "enter" => KeySymbol::Enter,
            "space" => KeySymbol::Space,
            t if t.starts_with('#') => {
                let code: i32 = t[1..]
                    .parse()
                    .map_err(|_| anyhow!("invalid raw key code '{}'", s))?;
                KeySymbol::from_raw_code(code)
                    .ok_or_else(|| anyhow!("raw key code '{}' means no key", s))?
            }
            t => {
                let mut chars = t.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => KeySymbol::Char(c),
                    _ => return Err(anyhow!("unrecognized key '{}'", s)),
                }
            }
        };
        Ok(symbol)
    }
}

/// What the operator asked for in one iteration. Never queued.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CommandIntent {
    MoveForward,
    MoveBackward,
    SlideLeft,
    SlideRight,
    Ascend,
    Descend,
    RotateLeft,
    RotateRight,
    Quit,
    None,
}

impl CommandIntent {
    /// Total mapping from the pending key (if any) to an intent.
    ///
    /// Letter keys match regardless of case. Ascend and Descend each have two
    /// aliases (Z / ArrowUp, X / ArrowDown).
    pub fn from_key(key: Option<KeySymbol>) -> CommandIntent {
        let Some(key) = key else {
            return CommandIntent::None;
        };
        match key {
            KeySymbol::Char(c) => match c.to_ascii_lowercase() {
                'w' => CommandIntent::MoveForward,
                's' => CommandIntent::MoveBackward,
                'a' => CommandIntent::SlideLeft,
                'd' => CommandIntent::SlideRight,
                'z' => CommandIntent::Ascend,
                'x' => CommandIntent::Descend,
                'q' => CommandIntent::RotateLeft,
                'e' => CommandIntent::RotateRight,
                _ => CommandIntent::None,
            },
            KeySymbol::ArrowUp => CommandIntent::Ascend,
            KeySymbol::ArrowDown => CommandIntent::Descend,
            KeySymbol::Escape => CommandIntent::Quit,
            KeySymbol::ArrowLeft
            | KeySymbol::ArrowRight
            | KeySymbol::Enter
            | KeySymbol::Space
            | KeySymbol::Unknown(_) => CommandIntent::None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            CommandIntent::MoveForward => "Moving Forward",
            CommandIntent::MoveBackward => "Moving Backward",
            CommandIntent::SlideLeft => "Moving Left",
            CommandIntent::SlideRight => "Moving Right",
            CommandIntent::Ascend => "Ascending",
            CommandIntent::Descend => "Descending",
            CommandIntent::RotateLeft => "Rotate Left",
            CommandIntent::RotateRight => "Rotate Right",
            CommandIntent::Quit => "Quit",
            CommandIntent::None => "Idle",
        }
    }
}

/// Operator help text, one line per binding.
pub fn controls_banner() -> &'static [&'static str] {
    &[
        "[W/S] Forward/Back",
        "[A/D] Left/Right",
        "[Q/E] Rotate Left/Right",
        "[Z/X] or [Up/Down] Ascend/Descend",
        "[ESC] Quit (land, disarm, release control)",
    ]
}

/// Parse a comma-separated key script. Empty entries mean "no key this tick".
pub fn parse_key_script(script: &str) -> Result<Vec<Option<KeySymbol>>> {
    if script.trim().is_empty() {
        return Ok(Vec::new());
    }
    script
        .split(',')
        .map(|token| {
            if token.trim().is_empty() {
                Ok(None)
            } else {
                token.parse().map(Some)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_key_pending_is_none() {
        assert_eq!(CommandIntent::from_key(None), CommandIntent::None);
        assert_eq!(KeySymbol::from_raw_code(-1), None);
    }

    #[test]
    fn unmapped_keys_are_none() {
        let unmapped = [
            KeySymbol::Char('r'),
            KeySymbol::Char('1'),
            KeySymbol::Char(' '),
            KeySymbol::ArrowLeft,
            KeySymbol::ArrowRight,
            KeySymbol::Enter,
            KeySymbol::Space,
            KeySymbol::Unknown(0),
            KeySymbol::Unknown(u32::MAX),
        ];
        for key in unmapped {
            assert_eq!(CommandIntent::from_key(Some(key)), CommandIntent::None, "{key:?}");
        }
        for c in ('a'..='z').filter(|c| !"wasdzxqe".contains(*c)) {
            assert_eq!(CommandIntent::from_key(Some(KeySymbol::Char(c))), CommandIntent::None);
        }
    }

    #[test]
    fn alias_keys_share_intents() {
        assert_eq!(CommandIntent::from_key(Some(KeySymbol::Char('z'))), CommandIntent::Ascend);
        assert_eq!(CommandIntent::from_key(Some(KeySymbol::ArrowUp)), CommandIntent::Ascend);
        assert_eq!(CommandIntent::from_key(Some(KeySymbol::Char('x'))), CommandIntent::Descend);
        assert_eq!(CommandIntent::from_key(Some(KeySymbol::ArrowDown)), CommandIntent::Descend);
    }

    #[test]
    fn letter_mapping_ignores_case() {
        assert_eq!(
            CommandIntent::from_key(Some(KeySymbol::Char('W'))),
            CommandIntent::MoveForward
        );
    }

    #[test]
    fn raw_codes_resolve_to_symbols() {
        assert_eq!(KeySymbol::from_raw_code(27), Some(KeySymbol::Escape));
        assert_eq!(KeySymbol::from_raw_code(2_490_368), Some(KeySymbol::ArrowUp));
        assert_eq!(KeySymbol::from_raw_code(2_621_440), Some(KeySymbol::ArrowDown));
        assert_eq!(KeySymbol::from_raw_code('E' as i32), Some(KeySymbol::Char('e')));
        assert_eq!(KeySymbol::from_raw_code(300), Some(KeySymbol::Unknown(300)));
    }

    #[test]
    fn key_script_parses_gaps_and_names() {
        let keys = parse_key_script("w, ,up,esc,#27").unwrap();
        assert_eq!(
            keys,
            vec![
                Some(KeySymbol::Char('w')),
                None,
                Some(KeySymbol::ArrowUp),
                Some(KeySymbol::Escape),
                Some(KeySymbol::Escape),
            ]
        );
        assert!(parse_key_script("jump").is_err());
        assert!(parse_key_script("").unwrap().is_empty());
    }
}
