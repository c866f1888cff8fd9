//! ANSI/VT escape sequence removal.
//!
//! Firmware consoles love colour codes, cursor movement and window-title
//! updates. [`strip_ansi`] removes them so the remaining text can be shown in
//! a plain scrollback. Recognized forms:
//!
//! - CSI: `ESC [` (or 8-bit `0x9B`) parameters, intermediates, final byte
//! - OSC: `ESC ]` (or `0x9D`) terminated by BEL or ST
//! - DCS, SOS, PM, APC strings: `ESC P`, `ESC X`, `ESC ^`, `ESC _` terminated by ST
//! - nF escapes such as charset selection (`ESC ( B`)
//! - two-character escapes such as `ESC 7` and `ESC M`
//!
//! Everything else, including `\r`, `\n` and `\t`, is left untouched. A
//! sequence cut off by the end of the input is dropped.

const ESC: char = '\x1b';
const BEL: char = '\x07';
const CSI_8BIT: char = '\u{9b}';
const OSC_8BIT: char = '\u{9d}';
const ST_8BIT: char = '\u{9c}';
const DCS_8BIT: char = '\u{90}';
const SOS_8BIT: char = '\u{98}';
const PM_8BIT: char = '\u{9e}';
const APC_8BIT: char = '\u{9f}';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Ground,
    Escape,
    EscapeIntermediate,
    Csi,
    // OSC accepts BEL as terminator, DCS/SOS/PM/APC only ST
    String { bel_terminates: bool },
    StringEscape,
}

/// Remove ANSI escape sequences from `input`.
///
/// ```rust
/// use serialterm::strip_ansi;
///
/// assert_eq!(strip_ansi("\x1b[31mHello\x1b[0m"), "Hello");
/// assert_eq!(strip_ansi("plain"), "plain");
/// ```
pub fn strip_ansi(input: &str) -> String {
    if !contains_ansi(input) {
        return input.to_string();
    }

    let mut out = String::with_capacity(input.len());
    let mut state = State::Ground;
    for ch in input.chars() {
        state = step(state, ch, &mut out);
    }
    out
}

/// Whether `input` contains anything [`strip_ansi`] would act on.
pub fn contains_ansi(input: &str) -> bool {
    input.contains([
        ESC, CSI_8BIT, OSC_8BIT, DCS_8BIT, SOS_8BIT, PM_8BIT, APC_8BIT,
    ])
}

fn step(state: State, ch: char, out: &mut String) -> State {
    match state {
        State::Ground => match ch {
            ESC => State::Escape,
            CSI_8BIT => State::Csi,
            OSC_8BIT => State::String {
                bel_terminates: true,
            },
            DCS_8BIT | SOS_8BIT | PM_8BIT | APC_8BIT => State::String {
                bel_terminates: false,
            },
            _ => {
                out.push(ch);
                State::Ground
            },
        },
        State::Escape => match ch {
            '[' => State::Csi,
            ']' => State::String {
                bel_terminates: true,
            },
            'P' | 'X' | '^' | '_' => State::String {
                bel_terminates: false,
            },
            ESC => State::Escape,
            '\x20'..='\x2f' => State::EscapeIntermediate,
            '\x30'..='\x7e' => State::Ground,
            // Malformed: drop the ESC, keep the character
            _ => step(State::Ground, ch, out),
        },
        State::EscapeIntermediate => match ch {
            '\x20'..='\x2f' => State::EscapeIntermediate,
            '\x30'..='\x7e' => State::Ground,
            _ => step(State::Ground, ch, out),
        },
        State::Csi => match ch {
            '\x20'..='\x3f' => State::Csi,
            '\x40'..='\x7e' => State::Ground,
            _ => step(State::Ground, ch, out),
        },
        State::String { bel_terminates } => match ch {
            BEL if bel_terminates => State::Ground,
            ST_8BIT => State::Ground,
            ESC => State::StringEscape,
            _ => state,
        },
        State::StringEscape => match ch {
            '\\' => State::Ground,
            // String ended by the start of another escape
            _ => step(State::Escape, ch, out),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_sgr_colours() {
        assert_eq!(strip_ansi("\x1b[31mHello\x1b[0m"), "Hello");
        assert_eq!(strip_ansi("\x1b[1;32mOK\x1b[0m\r"), "OK\r");
        assert_eq!(strip_ansi("\x1b[38;5;208morange\x1b[m"), "orange");
    }

    #[test]
    fn test_plain_text_is_identity() {
        assert_eq!(strip_ansi("plain"), "plain");
        assert_eq!(strip_ansi(""), "");
        assert_eq!(strip_ansi("tab\there\r\n"), "tab\there\r\n");
        assert_eq!(strip_ansi("温度: 25°C"), "温度: 25°C");
    }

    #[test]
    fn test_strips_cursor_and_private_modes() {
        assert_eq!(strip_ansi("\x1b[2J\x1b[Hhome"), "home");
        assert_eq!(strip_ansi("\x1b[?25lhidden\x1b[?25h"), "hidden");
        assert_eq!(strip_ansi("a\x1b[2Kb"), "ab");
    }

    #[test]
    fn test_strips_osc_with_bel_and_st() {
        assert_eq!(strip_ansi("\x1b]0;my title\x07prompt$ "), "prompt$ ");
        assert_eq!(
            strip_ansi("\x1b]8;;http://example.com\x1b\\link\x1b]8;;\x1b\\"),
            "link"
        );
    }

    #[test]
    fn test_strips_dcs_until_st_only() {
        assert_eq!(strip_ansi("\x1bPq#0\x07still dcs\x1b\\after"), "after");
    }

    #[test]
    fn test_strips_short_escapes() {
        assert_eq!(strip_ansi("\x1b(Bhi"), "hi");
        assert_eq!(strip_ansi("\x1b7save\x1b8"), "save");
        assert_eq!(strip_ansi("\x1bMup"), "up");
    }

    #[test]
    fn test_strips_8bit_controls() {
        assert_eq!(strip_ansi("\u{9b}2Jclear"), "clear");
        assert_eq!(strip_ansi("\u{9d}0;t\u{9c}x"), "x");
    }

    #[test]
    fn test_truncated_sequence_is_dropped() {
        assert_eq!(strip_ansi("abc\x1b[3"), "abc");
        assert_eq!(strip_ansi("abc\x1b"), "abc");
        assert_eq!(strip_ansi("abc\x1b]0;unterminated"), "abc");
    }

    #[test]
    fn test_control_char_aborts_sequence_and_is_kept() {
        assert_eq!(strip_ansi("x\x1b[1\ny"), "x\ny");
        assert_eq!(strip_ansi("x\x1b\ny"), "x\ny");
    }

    #[test]
    fn test_string_terminated_by_new_escape() {
        assert_eq!(strip_ansi("\x1b]0;t\x1b[31mred"), "red");
    }

    #[test]
    fn test_contains_ansi() {
        assert!(contains_ansi("\x1b[0m"));
        assert!(contains_ansi("\u{9b}m"));
        assert!(!contains_ansi("plain\r\n"));
    }
}
