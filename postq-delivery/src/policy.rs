//! Failure classification: does a send failure stop the whole pass, or only
//! the message that caused it?

use crate::{error::TransportError, transport::TransportKind};

/// Reply codes that condemn the message rather than the connection.
///
/// A message rejected with one of these is given up on, and the pass carries
/// on with the next one.
pub const FINAL_CODES: [u16; 16] = [
    401, 432, 441, 450, 510, 511, 512, 513, 521, 523, 530, 541, 550, 551, 553, 555,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Stop the pass; the message stays pending.
    Fatal,
    /// Give up on this message and continue.
    Skip,
}

#[must_use]
pub fn is_final_code(code: u16) -> bool {
    FINAL_CODES.contains(&code)
}

/// Decide what a failed send means for the rest of the pass.
///
/// Only protocol failures of a networked transport can be fatal, and then
/// only when they carry no reply code or a code outside [`FINAL_CODES`].
#[must_use]
pub fn classify(error: &TransportError, kind: TransportKind) -> Verdict {
    if kind != TransportKind::Networked || !error.is_protocol() {
        return Verdict::Skip;
    }

    match error.code() {
        Some(code) if is_final_code(code) => Verdict::Skip,
        _ => Verdict::Fatal,
    }
}
