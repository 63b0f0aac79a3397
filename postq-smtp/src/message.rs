//! The outgoing message handed to a transport, and its RFC 5322 rendering.

use std::fmt::Write;

use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::{DateTime, Utc};
use postq_common::encoding::encode_word;

/// Column at which base64 body lines are wrapped.
const BODY_LINE_LENGTH: usize = 76;

/// An address with an optional display name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Mailbox {
    pub email: String,
    pub name: String,
}

impl Mailbox {
    pub fn new(email: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            name: name.into(),
        }
    }

    /// `=?utf-8?B?..?= <email>`; an empty name still gets its (empty) encoded word
    #[must_use]
    pub fn header_value(&self) -> String {
        format!("{} <{}>", encode_word(&self.name), sanitize(&self.email))
    }
}

/// A message ready for a transport.
///
/// Subject and display names hold plain text; they are encoded when rendered.
/// Bcc recipients only appear in the envelope.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub from: Mailbox,
    pub to: Vec<Mailbox>,
    pub bcc: Vec<Mailbox>,
    pub reply_to: Option<String>,
    pub return_path: Option<String>,
    pub subject: String,
    pub body: String,
    pub is_plain: bool,
}

impl OutgoingMessage {
    #[must_use]
    pub fn new(from: Mailbox) -> Self {
        Self {
            from,
            ..Self::default()
        }
    }

    pub fn add_to(&mut self, email: impl Into<String>, name: impl Into<String>) {
        self.to.push(Mailbox::new(email, name));
    }

    pub fn add_bcc(&mut self, email: impl Into<String>, name: impl Into<String>) {
        self.bcc.push(Mailbox::new(email, name));
    }

    /// MAIL FROM address: the return path when set, otherwise the sender
    #[must_use]
    pub fn envelope_sender(&self) -> &str {
        self.return_path
            .as_deref()
            .filter(|path| !path.is_empty())
            .unwrap_or(&self.from.email)
    }

    /// RCPT TO addresses: primary recipients, then blind copies
    #[must_use]
    pub fn envelope_recipients(&self) -> Vec<&str> {
        self.to
            .iter()
            .chain(&self.bcc)
            .map(|mailbox| mailbox.email.as_str())
            .collect()
    }

    #[must_use]
    pub const fn content_type(&self) -> &'static str {
        if self.is_plain {
            "text/plain"
        } else {
            "text/html"
        }
    }

    /// Render with the current time and a fresh Message-ID
    #[must_use]
    pub fn render(&self) -> String {
        self.render_at(Utc::now(), ulid::Ulid::new())
    }

    /// Render headers and a base64 body with CRLF line endings.
    #[must_use]
    pub fn render_at(&self, date: DateTime<Utc>, id: ulid::Ulid) -> String {
        let mut out = String::with_capacity(512 + self.body.len() * 4 / 3);
        let domain = self
            .from
            .email
            .rsplit_once('@')
            .map_or("localhost", |(_, domain)| domain);

        // Writing to a String cannot fail
        let _ = write!(out, "Date: {}\r\n", date.to_rfc2822());
        let _ = write!(out, "Message-ID: <{id}@{}>\r\n", sanitize(domain));
        let _ = write!(out, "From: {}\r\n", self.from.header_value());

        if !self.to.is_empty() {
            let to: Vec<_> = self.to.iter().map(Mailbox::header_value).collect();
            let _ = write!(out, "To: {}\r\n", to.join(", "));
        }

        if let Some(reply_to) = self.reply_to.as_deref().filter(|r| !r.is_empty()) {
            let _ = write!(out, "Reply-To: <{}>\r\n", sanitize(reply_to));
        }

        if let Some(return_path) = self.return_path.as_deref().filter(|r| !r.is_empty()) {
            let _ = write!(out, "Return-Path: <{}>\r\n", sanitize(return_path));
        }

        let _ = write!(out, "Subject: {}\r\n", encode_word(&self.subject));
        out.push_str("MIME-Version: 1.0\r\n");
        let _ = write!(
            out,
            "Content-Type: {}; charset=utf-8\r\n",
            self.content_type()
        );
        out.push_str("Content-Transfer-Encoding: base64\r\n");
        out.push_str("\r\n");

        let encoded = STANDARD.encode(self.body.as_bytes());
        for chunk in encoded.as_bytes().chunks(BODY_LINE_LENGTH) {
            // base64 output is ASCII
            out.push_str(std::str::from_utf8(chunk).unwrap_or_default());
            out.push_str("\r\n");
        }

        out
    }
}

/// Header values never carry line breaks.
fn sanitize(value: &str) -> String {
    value.chars().filter(|c| !matches!(c, '\r' | '\n')).collect()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn message() -> OutgoingMessage {
        let mut message = OutgoingMessage::new(Mailbox::new("shop@example.com", "Shop"));
        message.add_to("a@x.test", "A");
        message.add_bcc("b@x.test", "B");
        message.subject = "Hello".to_string();
        message.body = "<p>Hi</p>".to_string();
        message
    }

    #[test]
    fn blind_copies_stay_out_of_the_headers() {
        let rendered = message().render();

        assert!(rendered.contains("To: =?utf-8?B?QQ==?= <a@x.test>\r\n"));
        assert!(!rendered.contains("b@x.test"));
        assert!(!rendered.contains("=?utf-8?B?Qg==?="));
        assert_eq!(message().envelope_recipients(), vec!["a@x.test", "b@x.test"]);
    }

    #[test]
    fn headers_are_encoded() {
        let mut msg = message();
        msg.reply_to = Some("help@example.com".to_string());
        let rendered = msg.render();

        assert!(rendered.contains("From: =?utf-8?B?U2hvcA==?= <shop@example.com>\r\n"));
        assert!(rendered.contains("Subject: =?utf-8?B?SGVsbG8=?=\r\n"));
        assert!(rendered.contains("Reply-To: <help@example.com>\r\n"));
        assert!(rendered.contains("Content-Type: text/html; charset=utf-8\r\n"));
        assert!(rendered.contains("@example.com>\r\n"));
        assert!(rendered.ends_with("\r\n\r\nPHA+SGk8L3A+\r\n"));
    }

    #[test]
    fn return_path_drives_the_envelope() {
        let mut msg = message();
        assert_eq!(msg.envelope_sender(), "shop@example.com");

        msg.return_path = Some(String::new());
        assert_eq!(msg.envelope_sender(), "shop@example.com");

        msg.return_path = Some("bounce@example.com".to_string());
        assert_eq!(msg.envelope_sender(), "bounce@example.com");
        assert!(msg.render().contains("Return-Path: <bounce@example.com>\r\n"));
    }

    #[test]
    fn body_lines_are_wrapped() {
        let mut msg = message();
        msg.is_plain = true;
        msg.body = "x".repeat(200);

        let rendered = msg.render();
        let (_, body) = rendered.split_once("\r\n\r\n").unwrap();

        assert!(body.lines().all(|line| line.len() <= BODY_LINE_LENGTH));
        let joined: String = body.lines().collect();
        assert_eq!(STANDARD.decode(joined).unwrap(), msg.body.as_bytes());
        assert!(rendered.contains("Content-Type: text/plain; charset=utf-8\r\n"));
    }

    #[test]
    fn empty_names_are_still_encoded() {
        assert_eq!(
            Mailbox::new("a@x.test", "").header_value(),
            "=?utf-8?B??= <a@x.test>"
        );
        assert_eq!(
            Mailbox::new("a@x.test\r\nBcc: evil@x.test", "").header_value(),
            "=?utf-8?B??= <a@x.testBcc: evil@x.test>"
        );
    }
}
