//! RFC 5322 wire format for outgoing plain-text messages.

use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine;

const LINE_WIDTH: usize = 76;

/// Build a `text/plain` UTF-8 message with a base64 body.
pub fn build_mime(to: &str, subject: &str, body: &str) -> String {
    let mut out = String::new();
    out.push_str("MIME-Version: 1.0\r\n");
    out.push_str("Content-Type: text/plain; charset=\"utf-8\"\r\n");
    out.push_str("Content-Transfer-Encoding: base64\r\n");
    out.push_str(&format!("To: {}\r\n", header_value(to)));
    out.push_str(&format!("Subject: {}\r\n", encode_subject(&header_value(subject))));
    out.push_str("\r\n");

    let encoded = STANDARD.encode(body.as_bytes());
    for chunk in encoded.as_bytes().chunks(LINE_WIDTH) {
        // base64 output is ASCII
        out.push_str(&String::from_utf8_lossy(chunk));
        out.push_str("\r\n");
    }

    out
}

/// Gmail's `raw` field: the whole message in URL-safe base64.
pub fn encode_raw(mime: &str) -> String {
    URL_SAFE.encode(mime.as_bytes())
}

/// Collapse line breaks so a value cannot start a new header.
fn header_value(value: &str) -> String {
    value
        .split(|c: char| c == '\r' || c == '\n')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Bytes of subject text per encoded-word; keeps each word within 75 chars.
const ENCODED_WORD_BYTES: usize = 45;

/// RFC 2047 encoded-words for non-ASCII subjects, folded one word per line.
///
/// Words are split on character boundaries so every word decodes on its own.
fn encode_subject(subject: &str) -> String {
    if subject.is_ascii() {
        return subject.to_string();
    }

    let mut words = Vec::new();
    let mut start = 0;
    let mut end = 0;
    for (offset, ch) in subject.char_indices() {
        let next = offset + ch.len_utf8();
        if next - start > ENCODED_WORD_BYTES {
            words.push(&subject[start..end]);
            start = end;
        }
        end = next;
    }
    words.push(&subject[start..end]);

    words
        .iter()
        .map(|word| format!("=?utf-8?B?{}?=", STANDARD.encode(word.as_bytes())))
        .collect::<Vec<_>>()
        .join("\r\n ")
}
