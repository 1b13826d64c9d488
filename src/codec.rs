//! Report codec
//!
//! Fixed report layouts exchanged with the keypad firmware:
//!
//! | Report                | Id | Payload                          |
//! |-----------------------|----|----------------------------------|
//! | Input                 | 1  | `[bitmask]`                      |
//! | Output: LED           | 1  | `[state]`                        |
//! | Output: display line  | 2  | `[line - 1, align, text(cpl)]`   |
//! | Output: delayed clear | 3  | `[ms_lo, ms_hi]`                 |
//! | Feature: capabilities | 1  | `[flags]`                        |
//! | Feature: display      | 2  | `[lines, chars_per_line]`        |

use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use octokeyz_transport::InputReport;

use crate::button::ButtonId;
use crate::error::KeypadError;

pub const INPUT_REPORT_ID: u8 = 1;

pub const OUTPUT_LED: u8 = 1;
pub const OUTPUT_DISPLAY_LINE: u8 = 2;
pub const OUTPUT_DISPLAY_CLEAR_DELAY: u8 = 3;

pub const FEATURE_CAPABILITIES: u8 = 1;
pub const FEATURE_DISPLAY: u8 = 2;

/// Capability flag: the device has a display
pub const CAP_DISPLAY: u8 = 1 << 0;
/// Capability flag: the firmware can clear the display after a delay
pub const CAP_DISPLAY_CLEAR_DELAY: u8 = 1 << 1;

/// Number of display lines every supported display has
pub const DISPLAY_LINES: u8 = 8;

/// Button bitmask carried by an input report
///
/// Returns `None` for other report ids and empty payloads.
pub fn input_bitmask(report: &InputReport) -> Option<u8> {
    if report.id != INPUT_REPORT_ID {
        return None;
    }
    report.data.first().copied()
}

/// Direction of a button transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    Pressed,
    Released,
}

/// One button transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub button: ButtonId,
    pub kind: EdgeKind,
    pub at: Instant,
}

/// Transitions between two consecutive bitmasks, lowest button first
///
/// Bit *j* is button *j + 1*; unchanged bits yield nothing.
pub fn decode_edges(previous: u8, current: u8, at: Instant) -> impl Iterator<Item = Edge> {
    let changed = previous ^ current;
    (0..8u8).filter(move |bit| changed & (1 << bit) != 0).map(move |bit| Edge {
        button: ButtonId::from_bit(bit),
        kind: if current & (1 << bit) != 0 {
            EdgeKind::Pressed
        } else {
            EdgeKind::Released
        },
        at,
    })
}

/// Capability flags from feature report 1
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CapabilityFlags {
    pub display: bool,
    pub display_clear_delay: bool,
}

impl CapabilityFlags {
    pub fn parse(payload: &[u8]) -> Self {
        let flags = payload.first().copied().unwrap_or(0);
        Self {
            display: flags & CAP_DISPLAY != 0,
            display_clear_delay: flags & CAP_DISPLAY_CLEAR_DELAY != 0,
        }
    }
}

/// Display geometry from feature report 2
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayGeometry {
    pub lines: u8,
    pub chars_per_line: u8,
}

impl DisplayGeometry {
    /// Returns `None` if the payload is too short
    pub fn parse(payload: &[u8]) -> Option<Self> {
        match payload {
            [lines, chars_per_line, ..] => Some(Self {
                lines: *lines,
                chars_per_line: *chars_per_line,
            }),
            _ => None,
        }
    }
}

/// Display line number, 1 to 8
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DisplayLine(u8);

impl DisplayLine {
    pub const LINE_1: Self = Self(1);
    pub const LINE_8: Self = Self(8);

    pub fn new(line: u8) -> Result<Self, KeypadError> {
        if (1..=DISPLAY_LINES).contains(&line) {
            Ok(Self(line))
        } else {
            Err(KeypadError::ButtonInvalid(line))
        }
    }

    /// All display lines, top to bottom
    pub fn all() -> impl Iterator<Item = Self> {
        (1..=DISPLAY_LINES).map(Self)
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl fmt::Display for DisplayLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LINE_{}", self.0)
    }
}

/// Horizontal alignment of a display line
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DisplayLineAlign {
    #[default]
    Left = 1,
    Right = 2,
    Center = 3,
}

impl FromStr for DisplayLineAlign {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "left" => Ok(Self::Left),
            "right" => Ok(Self::Right),
            "center" | "centre" => Ok(Self::Center),
            other => Err(format!(
                "unknown alignment \"{other}\" (expected left, right or center)"
            )),
        }
    }
}

/// Payload of a display line output report
///
/// `text` is cut to `chars_per_line` bytes; shorter text is padded with
/// NUL so the payload is always `chars_per_line + 2` bytes long.
pub fn encode_display_line(
    line: DisplayLine,
    text: &str,
    align: DisplayLineAlign,
    chars_per_line: u8,
) -> Vec<u8> {
    let cpl = chars_per_line as usize;
    let text = text.as_bytes();
    let end = text.len().min(cpl);

    let mut buf = Vec::with_capacity(cpl + 2);
    buf.push(line.get() - 1);
    buf.push(align as u8);
    buf.extend_from_slice(&text[..end]);
    buf.resize(cpl + 2, 0);
    buf
}

/// Payload of a delayed display clear output report
pub fn encode_display_clear_delay(delay_ms: u16) -> [u8; 2] {
    delay_ms.to_le_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edges_match_hamming_distance() {
        let at = Instant::now();
        for previous in 0..=255u8 {
            for current in 0..=255u8 {
                let edges: Vec<_> = decode_edges(previous, current, at).collect();
                assert_eq!(edges.len() as u32, (previous ^ current).count_ones());
                for edge in edges {
                    let bit = 1u8 << (edge.button.get() - 1);
                    let expected = if current & bit != 0 {
                        EdgeKind::Pressed
                    } else {
                        EdgeKind::Released
                    };
                    assert_eq!(edge.kind, expected);
                    assert_ne!(previous & bit, current & bit);
                }
            }
        }
    }

    #[test]
    fn test_edges_in_button_order() {
        let at = Instant::now();
        let edges: Vec<_> = decode_edges(0b1000_0001, 0b0000_0110, at).collect();
        let buttons: Vec<_> = edges.iter().map(|e| e.button.get()).collect();
        assert_eq!(buttons, vec![1, 2, 3, 8]);
        assert_eq!(edges[0].kind, EdgeKind::Released);
        assert_eq!(edges[1].kind, EdgeKind::Pressed);
        assert_eq!(edges[3].kind, EdgeKind::Released);
    }

    #[test]
    fn test_input_bitmask_filters_report_id() {
        let ok = InputReport {
            id: 1,
            data: vec![0x05],
        };
        assert_eq!(input_bitmask(&ok), Some(0x05));

        let other = InputReport {
            id: 2,
            data: vec![0x05],
        };
        assert_eq!(input_bitmask(&other), None);

        let empty = InputReport { id: 1, data: vec![] };
        assert_eq!(input_bitmask(&empty), None);
    }

    #[test]
    fn test_capability_flags() {
        assert_eq!(CapabilityFlags::parse(&[]), CapabilityFlags::default());
        let both = CapabilityFlags::parse(&[0b11]);
        assert!(both.display && both.display_clear_delay);
        let display_only = CapabilityFlags::parse(&[0x01]);
        assert!(display_only.display && !display_only.display_clear_delay);
    }

    #[test]
    fn test_display_geometry() {
        assert_eq!(
            DisplayGeometry::parse(&[8, 21]),
            Some(DisplayGeometry {
                lines: 8,
                chars_per_line: 21
            })
        );
        assert_eq!(DisplayGeometry::parse(&[8]), None);
    }

    #[test]
    fn test_display_line_range() {
        assert!(DisplayLine::new(0).is_err());
        assert!(DisplayLine::new(9).is_err());
        assert_eq!(DisplayLine::new(8).unwrap(), DisplayLine::LINE_8);
        assert_eq!(DisplayLine::all().count(), 8);
    }

    #[test]
    fn test_encode_pads_short_text() {
        let buf = encode_display_line(DisplayLine::LINE_1, "hi", DisplayLineAlign::Center, 5);
        assert_eq!(buf, vec![0, 3, b'h', b'i', 0, 0, 0]);
    }

    #[test]
    fn test_encode_truncates_long_text() {
        let line = DisplayLine::new(3).unwrap();
        let buf = encode_display_line(line, "abcdefgh", DisplayLineAlign::Right, 4);
        assert_eq!(buf, vec![2, 2, b'a', b'b', b'c', b'd']);

        // Re-encoding the visible text gives the same report
        let again = encode_display_line(line, "abcd", DisplayLineAlign::Right, 4);
        assert_eq!(again, buf);
    }

    #[test]
    fn test_encode_exact_length_has_no_padding() {
        let text = "x".repeat(21);
        let buf = encode_display_line(DisplayLine::LINE_8, &text, DisplayLineAlign::Left, 21);
        assert_eq!(buf.len(), 23);
        assert!(buf[2..].iter().all(|&b| b == b'x'));
    }

    #[test]
    fn test_encode_empty_clears_line() {
        let buf = encode_display_line(DisplayLine::LINE_1, "", DisplayLineAlign::Left, 21);
        assert_eq!(buf.len(), 23);
        assert_eq!(&buf[..2], &[0, 1]);
        assert!(buf[2..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_clear_delay_little_endian() {
        assert_eq!(encode_display_clear_delay(0x1234), [0x34, 0x12]);
        assert_eq!(encode_display_clear_delay(0), [0, 0]);
    }

    #[test]
    fn test_align_parse() {
        assert_eq!("Right".parse::<DisplayLineAlign>(), Ok(DisplayLineAlign::Right));
        assert!("middle".parse::<DisplayLineAlign>().is_err());
    }
}
