//! Decoding of the exception text ClickHouse returns with non-2xx responses.

use std::{fmt, sync::LazyLock};

use regex::Regex;

static SEGMENT_SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",\s+").expect("constant pattern"));

static SEGMENT_START: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*\.(?:displayText|what)\(\)").expect("constant pattern")
});

static CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:Error: )?Code: (\d+)$").expect("constant pattern"));

static DISPLAY_TEXT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^[A-Za-z_][A-Za-z0-9_]*\.displayText\(\) = ([A-Za-z0-9:]+:) (.+)")
        .expect("constant pattern")
});

static WHAT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^[A-Za-z_][A-Za-z0-9_]*\.what\(\) = (.*)").expect("constant pattern")
});

static CODE_WITH_SCOPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^(?:Error: )?Code: (\d+)\. ([A-Za-z0-9:]+:) (.+)").expect("constant pattern")
});

static SYNTAX_POSITION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"Syntax error: failed at position (\d+)(?:\s*(?:\([^)]*\)\s*)?\(line\s*(\d+),\s+col\s*(\d+)\))?",
    )
    .expect("constant pattern")
});

/// Structured form of a server exception.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServerException {
    /// Numeric ClickHouse error code.
    pub code: Option<u32>,
    /// Exception scope such as `DB::Exception:`.
    pub scope: Option<String>,
    pub message: String,
    /// Exception class reported by `e.what()`.
    pub kind: Option<String>,
    /// 1-based line of a syntax error.
    pub lineno: Option<u32>,
    /// 1-based column of a syntax error.
    pub colno: Option<u32>,
}

impl fmt::Display for ServerException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "code {code}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for ServerException {}

/// Parses raw exception bytes as sent by the server.
pub fn parse_exception_bytes(body: &[u8]) -> ServerException {
    parse_exception(&String::from_utf8_lossy(body))
}

/// Parses exception text into a [`ServerException`].
///
/// The text is a list of comma-joined segments; only segments that start
/// with an `<ident>.displayText()` or `<ident>.what()` accessor begin a
/// new segment. The first segment that yields a message ends the scan.
/// A `Code: N` segment only sets the code.
pub fn parse_exception(text: &str) -> ServerException {
    let mut exception = ServerException {
        message: text.trim().to_owned(),
        ..ServerException::default()
    };

    for segment in split_segments(text) {
        let line: String = segment.trim().lines().collect();

        if let Some(caps) = CODE.captures(&line) {
            exception.code = caps[1].parse().ok();
        }

        if let Some(caps) = DISPLAY_TEXT.captures(&line) {
            exception.scope = Some(caps[1].to_owned());
            exception.message = caps[2].to_owned();
            apply_syntax_position(&mut exception);
            return exception;
        }

        if let Some(caps) = WHAT.captures(&line) {
            exception.kind = Some(caps[1].to_owned());
            return exception;
        }

        if let Some(caps) = CODE_WITH_SCOPE.captures(&line) {
            exception.code = caps[1].parse().ok();
            exception.scope = Some(caps[2].to_owned());
            exception.message = caps[3].trim_end().to_owned();
            apply_syntax_position(&mut exception);
            return exception;
        }
    }

    exception
}

fn split_segments(text: &str) -> Vec<&str> {
    let mut segments = Vec::new();
    let mut start = 0;
    for separator in SEGMENT_SEPARATOR.find_iter(text) {
        if SEGMENT_START.is_match(&text[separator.end()..]) {
            segments.push(&text[start..separator.start()]);
            start = separator.end();
        }
    }
    segments.push(&text[start..]);
    segments
}

fn apply_syntax_position(exception: &mut ServerException) {
    let Some(caps) = SYNTAX_POSITION.captures(&exception.message) else {
        return;
    };
    let position = caps.get(1).and_then(|m| m.as_str().parse::<u32>().ok());
    let line = caps.get(2).and_then(|m| m.as_str().parse::<u32>().ok());
    let column = caps.get(3).and_then(|m| m.as_str().parse::<u32>().ok());

    exception.lineno = Some(line.unwrap_or(1));
    exception.colno = column.or(position);
}

#[cfg(test)]
mod tests {
    use super::{parse_exception, parse_exception_bytes};

    #[test]
    fn display_text_with_line_and_column() {
        let err = parse_exception(
            "Code: 62, e.displayText() = DB::Exception: Syntax error: failed at position 7 (line 1, col 8): SELECT",
        );
        assert_eq!(err.code, Some(62));
        assert_eq!(err.scope.as_deref(), Some("DB::Exception:"));
        assert_eq!(err.lineno, Some(1));
        assert_eq!(err.colno, Some(8));
        assert!(err.message.starts_with("Syntax error"));
    }

    #[test]
    fn position_without_line_falls_back_to_raw_position() {
        let err = parse_exception(
            "Code: 62, e.displayText() = DB::Exception: Syntax error: failed at position 1: ABCDEFGHIJKLMN, e.what() = DB::Exception",
        );
        assert_eq!(err.lineno, Some(1));
        assert_eq!(err.colno, Some(1));
        assert_eq!(err.kind, None);
    }

    #[test]
    fn quoted_fragment_before_line_info() {
        let err = parse_exception(
            "Code: 62, e.displayText() = DB::Exception: Syntax error: failed at position 10 ('ABCDEFGHIJKLMN') (line 2, col 3): ABCDEFGHIJKLMN",
        );
        assert_eq!(err.lineno, Some(2));
        assert_eq!(err.colno, Some(3));
    }

    #[test]
    fn multi_line_segments_are_joined() {
        let err = parse_exception(
            "Code: 60, e.displayText() = DB::Exception: Table default.xxx\n doesn't exist.",
        );
        assert_eq!(err.code, Some(60));
        assert_eq!(err.message, "Table default.xxx doesn't exist.");
        assert_eq!(err.lineno, None);
    }

    #[test]
    fn what_segment_sets_kind() {
        let err = parse_exception("Code: 999, e.what() = DB::NetException");
        assert_eq!(err.code, Some(999));
        assert_eq!(err.kind.as_deref(), Some("DB::NetException"));
    }

    #[test]
    fn commas_inside_message_do_not_split() {
        let err = parse_exception(
            "Code: 47, e.displayText() = DB::Exception: Missing columns: 'a', 'b' while processing query",
        );
        assert_eq!(err.message, "Missing columns: 'a', 'b' while processing query");
    }

    #[test]
    fn modern_layout() {
        let err = parse_exception_bytes(
            b"Code: 62. DB::Exception: Syntax error: failed at position 1 ('ABCDEFGHIJKLMN'): ABCDEFGHIJKLMN. (SYNTAX_ERROR) (version 23.8.1.1)\n",
        );
        assert_eq!(err.code, Some(62));
        assert_eq!(err.scope.as_deref(), Some("DB::Exception:"));
        assert_eq!(err.lineno, Some(1));
        assert_eq!(err.colno, Some(1));
    }

    #[test]
    fn unstructured_text_is_kept_as_message() {
        let err = parse_exception("Simulated error\n");
        assert_eq!(err.message, "Simulated error");
        assert_eq!(err.code, None);
        assert_eq!(err.to_string(), "Simulated error");
    }
}
