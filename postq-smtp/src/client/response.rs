//! SMTP reply parsing.

use super::error::{ClientError, Result};

/// A single line of an SMTP reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseLine {
    pub code: u16,
    /// `false` for `250-` continuation lines
    pub is_last: bool,
    pub message: String,
}

/// A complete, possibly multi-line, SMTP reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub code: u16,
    pub lines: Vec<String>,
}

impl Response {
    #[must_use]
    pub const fn new(code: u16, lines: Vec<String>) -> Self {
        Self { code, lines }
    }

    /// All reply lines joined by newlines.
    #[must_use]
    pub fn message(&self) -> String {
        self.lines.join("\n")
    }

    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.code >= 200 && self.code < 300
    }

    /// 354 after DATA
    #[must_use]
    pub const fn is_intermediate(&self) -> bool {
        self.code >= 300 && self.code < 400
    }

    #[must_use]
    pub const fn is_temporary_error(&self) -> bool {
        self.code >= 400 && self.code < 500
    }

    #[must_use]
    pub const fn is_permanent_error(&self) -> bool {
        self.code >= 500 && self.code < 600
    }

    #[must_use]
    pub const fn is_error(&self) -> bool {
        self.is_temporary_error() || self.is_permanent_error()
    }

    /// Turn a 4xx/5xx reply into [`ClientError::SmtpError`].
    pub fn into_result(self) -> Result<Self> {
        if self.is_error() {
            Err(ClientError::SmtpError {
                code: self.code,
                message: self.message(),
            })
        } else {
            Ok(self)
        }
    }

    /// Whether an EHLO reply advertises `keyword` (case-insensitive).
    ///
    /// The first line is the server greeting and is not considered.
    #[must_use]
    pub fn has_extension(&self, keyword: &str) -> bool {
        self.lines.iter().skip(1).any(|line| {
            line.split_whitespace()
                .next()
                .is_some_and(|ext| ext.eq_ignore_ascii_case(keyword))
        })
    }

    /// Parses a single reply line, without its line ending.
    pub fn parse_line(line: &str) -> Result<ResponseLine> {
        let code_str = line
            .get(..3)
            .ok_or_else(|| ClientError::ParseError(format!("Response line too short: '{line}'")))?;

        let code = code_str
            .parse::<u16>()
            .map_err(|_| ClientError::ParseError(format!("Invalid status code: '{code_str}'")))?;

        let is_last = match line[3..].chars().next() {
            None | Some(' ') => true,
            Some('-') => false,
            Some(c) => {
                return Err(ClientError::ParseError(format!(
                    "Invalid separator character: '{c}'"
                )));
            }
        };

        let message = line.get(4..).unwrap_or_default().to_string();

        Ok(ResponseLine {
            code,
            is_last,
            message,
        })
    }

    /// Parses a complete reply from the front of `buffer`.
    ///
    /// Returns the reply and the number of bytes consumed, or `None` when the
    /// buffer does not yet hold a complete reply.
    pub fn parse_response(buffer: &[u8]) -> Result<Option<(Self, usize)>> {
        let mut lines = Vec::new();
        let mut consumed = 0;
        let mut first_code = None;

        while let Some(end) = buffer[consumed..].iter().position(|&b| b == b'\n') {
            let raw = &buffer[consumed..consumed + end];
            consumed += end + 1;

            let text = std::str::from_utf8(raw)?;
            let text = text.strip_suffix('\r').unwrap_or(text);
            if text.is_empty() {
                continue;
            }

            let parsed = Self::parse_line(text)?;

            match first_code {
                Some(code) if code != parsed.code => {
                    return Err(ClientError::ParseError(format!(
                        "Status code mismatch in multi-line response: expected {code}, got {}",
                        parsed.code
                    )));
                }
                Some(_) => {}
                None => first_code = Some(parsed.code),
            }

            lines.push(parsed.message);

            if parsed.is_last {
                return Ok(Some((Self::new(parsed.code, lines), consumed)));
            }
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn parses_single_line() {
        let (response, consumed) = Response::parse_response(b"250 OK\r\n").unwrap().unwrap();

        assert_eq!(response, Response::new(250, vec!["OK".to_string()]));
        assert_eq!(consumed, 8);
    }

    #[test]
    fn parses_multi_line() {
        let data = b"250-mail.example.com\r\n250-STARTTLS\r\n250 HELP\r\n354 next";
        let (response, consumed) = Response::parse_response(data).unwrap().unwrap();

        assert_eq!(response.code, 250);
        assert_eq!(response.lines, vec!["mail.example.com", "STARTTLS", "HELP"]);
        assert_eq!(consumed, 46);
        assert!(response.has_extension("starttls"));
        assert!(!response.has_extension("mail.example.com"));
    }

    #[test]
    fn waits_for_more_data() {
        assert!(Response::parse_response(b"250-mail.example.com\r\n250-SIZE")
            .unwrap()
            .is_none());
        assert!(Response::parse_response(b"").unwrap().is_none());
    }

    #[test]
    fn rejects_malformed_lines() {
        assert!(Response::parse_line("25").is_err());
        assert!(Response::parse_line("abc OK").is_err());
        assert!(Response::parse_line("250_OK").is_err());
        assert!(Response::parse_response(b"250-one\r\n251 two\r\n").is_err());
    }

    #[test]
    fn bare_code_is_a_last_line() {
        let line = Response::parse_line("250").unwrap();
        assert!(line.is_last);
        assert_eq!(line.message, "");
    }

    #[test]
    fn errors_carry_the_reply_code() {
        let err = Response::new(550, vec!["No such user".to_string()])
            .into_result()
            .unwrap_err();
        assert_eq!(err.code(), Some(550));

        assert!(Response::new(354, vec![]).into_result().is_ok());
        assert!(Response::new(354, vec![]).is_intermediate());
    }
}
