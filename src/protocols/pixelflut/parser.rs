//! Pixelflut command parser.
//!
//! Operates on a single line with the `\n` terminator already stripped.
//! Keywords are case-sensitive prefixes; fields are separated by exactly one
//! space.

use crate::canvas::Color;
use thiserror::Error;

/// Parsed pixelflut command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// `PX x y`
    GetPixel { x: u32, y: u32 },
    /// `PX x y WW|RRGGBB|RRGGBBAA`, already expanded to RGBA.
    SetPixel { x: u32, y: u32, color: Color },
    /// `SIZE`
    QuerySize,
    /// `STATS`
    QueryStats,
    /// `HELP`
    QueryHelp,
    /// Unrecognized keyword.
    Unknown,
}

/// Protocol error. The message is sent to the client as `ERROR: <message>`.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("First parameter missing or invalid (should be decimal)")]
    FirstParameter,
    #[error("Second parameter missing or invalid (should be decimal)")]
    SecondParameter,
    #[error("Third parameter missing or invalid (should be hex color)")]
    ThirdParameter,
    #[error("Color must have 2, 6 or 8 hex digits")]
    ColorLength,
    #[error("Unknown command")]
    UnknownCommand,
}

/// Parse one line into a [`Command`].
///
/// Never returns `Ok(Command::Unknown)`; unknown keywords are reported as
/// [`ParseError::UnknownCommand`] so every rejection goes through one path.
pub fn parse_line(line: &[u8]) -> Result<Command, ParseError> {
    if line == b"PX" {
        return Err(ParseError::FirstParameter);
    }
    if let Some(args) = line.strip_prefix(b"PX ") {
        return parse_pixel(args);
    }
    if line.starts_with(b"SIZE") {
        return Ok(Command::QuerySize);
    }
    if line.starts_with(b"STATS") {
        return Ok(Command::QueryStats);
    }
    if line.starts_with(b"HELP") {
        return Ok(Command::QueryHelp);
    }
    Err(ParseError::UnknownCommand)
}

fn parse_pixel(args: &[u8]) -> Result<Command, ParseError> {
    let (x, used) = parse_decimal(args).ok_or(ParseError::FirstParameter)?;
    let rest = args[used..]
        .strip_prefix(b" ")
        .ok_or(ParseError::SecondParameter)?;

    let (y, used) = parse_decimal(rest).ok_or(ParseError::SecondParameter)?;
    let rest = &rest[used..];
    if rest.is_empty() {
        return Ok(Command::GetPixel { x, y });
    }

    let hex = rest.strip_prefix(b" ").ok_or(ParseError::ThirdParameter)?;
    let (value, digits) = parse_hex(hex).ok_or(ParseError::ThirdParameter)?;
    if digits != hex.len() {
        return Err(ParseError::ThirdParameter);
    }

    let color = expand_color(value, digits)?;
    Ok(Command::SetPixel { x, y, color })
}

/// Parse a leading unsigned decimal that fits `u32`.
///
/// Returns the value and the number of bytes consumed, or `None` if there
/// is no digit or the value overflows.
pub fn parse_decimal(input: &[u8]) -> Option<(u32, usize)> {
    let digits = input.iter().take_while(|b| b.is_ascii_digit()).count();
    if digits == 0 {
        return None;
    }

    let mut value: u32 = 0;
    for &b in &input[..digits] {
        value = value.checked_mul(10)?.checked_add(u32::from(b - b'0'))?;
    }
    Some((value, digits))
}

/// Parse a leading run of hex digits.
///
/// Returns the value and the digit count. Runs longer than 8 digits still
/// report their full length with a truncated value so the caller can reject
/// them by count.
pub fn parse_hex(input: &[u8]) -> Option<(u32, usize)> {
    let digits = input.iter().take_while(|b| b.is_ascii_hexdigit()).count();
    if digits == 0 {
        return None;
    }

    let value = input[..digits]
        .iter()
        .fold(0u32, |acc, &b| (acc << 4) | u32::from(hex_value(b)));
    Some((value, digits))
}

fn hex_value(b: u8) -> u8 {
    match b {
        b'0'..=b'9' => b - b'0',
        b'a'..=b'f' => b - b'a' + 10,
        b'A'..=b'F' => b - b'A' + 10,
        _ => 0,
    }
}

/// Expand a color literal by its digit count.
pub fn expand_color(value: u32, digits: usize) -> Result<Color, ParseError> {
    match digits {
        2 => Ok(Color::gray(value as u8)),
        6 => Ok(Color::from_rgb_u32(value)),
        8 => Ok(Color::from_rgba_u32(value)),
        _ => Err(ParseError::ColorLength),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_get_pixel() {
        assert_eq!(parse_line(b"PX 5 7"), Ok(Command::GetPixel { x: 5, y: 7 }));
        assert_eq!(
            parse_line(b"PX 0 4294967295"),
            Ok(Command::GetPixel { x: 0, y: u32::MAX })
        );
    }

    #[test]
    fn test_parse_set_rgb() {
        assert_eq!(
            parse_line(b"PX 5 5 FF0000"),
            Ok(Command::SetPixel {
                x: 5,
                y: 5,
                color: Color::rgba(0xFF, 0, 0, 0xFF)
            })
        );
    }

    #[test]
    fn test_parse_set_rgba() {
        assert_eq!(
            parse_line(b"PX 1 2 11223344"),
            Ok(Command::SetPixel {
                x: 1,
                y: 2,
                color: Color::rgba(0x11, 0x22, 0x33, 0x44)
            })
        );
    }

    #[test]
    fn test_parse_set_gray() {
        assert_eq!(
            parse_line(b"PX 1 2 7f"),
            Ok(Command::SetPixel {
                x: 1,
                y: 2,
                color: Color::rgba(0x7F, 0x7F, 0x7F, 0xFF)
            })
        );
    }

    #[test]
    fn test_rgb_equals_opaque_rgba() {
        assert_eq!(parse_line(b"PX 3 4 abcdef"), parse_line(b"PX 3 4 ABCDEFFF"));
    }

    #[test]
    fn test_parse_queries() {
        assert_eq!(parse_line(b"SIZE"), Ok(Command::QuerySize));
        assert_eq!(parse_line(b"STATS"), Ok(Command::QueryStats));
        assert_eq!(parse_line(b"HELP"), Ok(Command::QueryHelp));
    }

    #[test]
    fn test_keywords_match_by_prefix() {
        assert_eq!(parse_line(b"SIZE\r"), Ok(Command::QuerySize));
        assert_eq!(parse_line(b"STATS please"), Ok(Command::QueryStats));
        assert_eq!(parse_line(b"HELP\r"), Ok(Command::QueryHelp));
    }

    #[test]
    fn test_keywords_are_case_sensitive() {
        assert_eq!(parse_line(b"size"), Err(ParseError::UnknownCommand));
        assert_eq!(parse_line(b"px 1 1"), Err(ParseError::UnknownCommand));
    }

    #[test]
    fn test_unknown_and_empty() {
        assert_eq!(parse_line(b"BOGUS"), Err(ParseError::UnknownCommand));
        assert_eq!(parse_line(b""), Err(ParseError::UnknownCommand));
        assert_eq!(parse_line(b"PXX 1 1"), Err(ParseError::UnknownCommand));
    }

    #[test]
    fn test_first_parameter_errors() {
        assert_eq!(parse_line(b"PX"), Err(ParseError::FirstParameter));
        assert_eq!(parse_line(b"PX "), Err(ParseError::FirstParameter));
        assert_eq!(parse_line(b"PX -1 2"), Err(ParseError::FirstParameter));
        assert_eq!(parse_line(b"PX  1 2"), Err(ParseError::FirstParameter));
        assert_eq!(parse_line(b"PX 4294967296 0"), Err(ParseError::FirstParameter));
    }

    #[test]
    fn test_second_parameter_errors() {
        assert_eq!(parse_line(b"PX 1"), Err(ParseError::SecondParameter));
        assert_eq!(parse_line(b"PX 1 "), Err(ParseError::SecondParameter));
        assert_eq!(parse_line(b"PX 1x 2"), Err(ParseError::SecondParameter));
        assert_eq!(parse_line(b"PX 1 +2"), Err(ParseError::SecondParameter));
    }

    #[test]
    fn test_third_parameter_errors() {
        assert_eq!(parse_line(b"PX 1 2x"), Err(ParseError::ThirdParameter));
        assert_eq!(parse_line(b"PX 1 1 ZZ"), Err(ParseError::ThirdParameter));
        assert_eq!(parse_line(b"PX 1 1 "), Err(ParseError::ThirdParameter));
        assert_eq!(parse_line(b"PX 1 1  FF0000"), Err(ParseError::ThirdParameter));
        assert_eq!(parse_line(b"PX 1 1 FF0000 "), Err(ParseError::ThirdParameter));
    }

    #[test]
    fn test_carriage_return_after_color_rejected() {
        assert_eq!(parse_line(b"PX 1 1 FF0000\r"), Err(ParseError::ThirdParameter));
        assert_eq!(parse_line(b"PX 1 1\r"), Err(ParseError::ThirdParameter));
    }

    #[test]
    fn test_color_length_errors() {
        assert_eq!(parse_line(b"PX 1 1 F"), Err(ParseError::ColorLength));
        assert_eq!(parse_line(b"PX 1 1 FFF"), Err(ParseError::ColorLength));
        assert_eq!(parse_line(b"PX 1 1 FFFFFFF"), Err(ParseError::ColorLength));
        assert_eq!(parse_line(b"PX 1 1 FFFFFFFFF"), Err(ParseError::ColorLength));
    }

    #[test]
    fn test_parse_decimal() {
        assert_eq!(parse_decimal(b"123 rest"), Some((123, 3)));
        assert_eq!(parse_decimal(b"007"), Some((7, 3)));
        assert_eq!(parse_decimal(b"x"), None);
        assert_eq!(parse_decimal(b""), None);
        assert_eq!(parse_decimal(b"99999999999"), None);
    }

    #[test]
    fn test_parse_hex() {
        assert_eq!(parse_hex(b"ff"), Some((0xFF, 2)));
        assert_eq!(parse_hex(b"C0FFEE!"), Some((0xC0FFEE, 6)));
        assert_eq!(parse_hex(b"g"), None);
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(ParseError::UnknownCommand.to_string(), "Unknown command");
        assert_eq!(
            ParseError::ColorLength.to_string(),
            "Color must have 2, 6 or 8 hex digits"
        );
    }
}
