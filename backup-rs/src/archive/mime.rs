//! Minimal RFC 822 / MIME reader for archived messages
//!
//! Enough structure to index headers, show a text body and serve
//! attachments. Not a general MIME implementation.

use anyhow::{anyhow, Result};
use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// One part of a multipart message
#[derive(Debug, Clone)]
pub struct MessagePart {
    /// Content-Type header value
    pub content_type: String,
    /// Filename from Content-Disposition or Content-Type
    pub filename: Option<String>,
    /// Content-Transfer-Encoding, when present
    pub encoding: Option<String>,
    /// Raw part body (still encoded)
    pub body: Vec<u8>,
    /// Marked as attachment by Content-Disposition
    pub is_attachment: bool,
}

impl Default for MessagePart {
    fn default() -> Self {
        MessagePart {
            content_type: "text/plain".to_string(),
            filename: None,
            encoding: None,
            body: Vec::new(),
            is_attachment: false,
        }
    }
}

impl MessagePart {
    /// Body with the transfer encoding undone.
    pub fn decoded_body(&self) -> Result<Vec<u8>> {
        match self.encoding.as_deref().map(str::to_lowercase) {
            Some(enc) if enc.contains("base64") => decode_base64(&self.body),
            Some(enc) if enc.contains("quoted-printable") => {
                Ok(decode_quoted_printable(&self.body))
            }
            _ => Ok(self.body.clone()),
        }
    }
}

/// A parsed message: lowercased header map plus categorized parts
#[derive(Debug, Clone, Default)]
pub struct ParsedMessage {
    pub headers: HashMap<String, String>,
    pub text_body: Option<String>,
    pub html_body: Option<String>,
    pub attachments: Vec<MessagePart>,
}

impl ParsedMessage {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(String::as_str)
    }

    /// Date header parsed to UTC, when present and RFC 2822 formatted.
    pub fn date(&self) -> Option<DateTime<Utc>> {
        self.header("date")
            .and_then(|v| DateTime::parse_from_rfc2822(v.trim()).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }
}

/// Parse a raw message into headers, bodies and attachments.
pub fn parse_message(raw: &[u8]) -> ParsedMessage {
    let text = String::from_utf8_lossy(raw);
    let (header_block, body) = split_headers_body(&text);
    let headers = parse_header_block(&header_block);

    let mut message = ParsedMessage {
        headers: headers.clone(),
        ..Default::default()
    };

    let content_type = headers.get("content-type").cloned().unwrap_or_default();
    if content_type.to_lowercase().contains("multipart/") {
        if let Some(boundary) = header_parameter(&content_type, "boundary") {
            for part in split_multipart(&boundary, &body) {
                place_part(&mut message, part);
            }
            return message;
        }
    }

    // Single-part message: the whole body is the text body
    let part = MessagePart {
        content_type: if content_type.is_empty() {
            "text/plain".to_string()
        } else {
            content_type
        },
        encoding: headers.get("content-transfer-encoding").cloned(),
        body: body.into_bytes(),
        ..Default::default()
    };
    if let Ok(decoded) = part.decoded_body() {
        message.text_body = Some(String::from_utf8_lossy(&decoded).to_string());
    }
    message
}

/// Parse only the header block of a raw message.
pub fn parse_headers(raw: &[u8]) -> HashMap<String, String> {
    let text = String::from_utf8_lossy(raw);
    let (header_block, _) = split_headers_body(&text);
    parse_header_block(&header_block)
}

/// Extract the address from a `Name <addr>` style header value.
pub fn address_of(value: &str) -> String {
    if let (Some(start), Some(end)) = (value.find('<'), value.find('>')) {
        if start < end {
            return value[start + 1..end].to_string();
        }
    }
    value.trim().to_string()
}

fn split_headers_body(text: &str) -> (String, String) {
    if let Some(pos) = text.find("\r\n\r\n") {
        (text[..pos].to_string(), text[pos + 4..].to_string())
    } else if let Some(pos) = text.find("\n\n") {
        (text[..pos].to_string(), text[pos + 2..].to_string())
    } else {
        (text.to_string(), String::new())
    }
}

/// Header lines into a lowercased-name map, unfolding continuation lines.
fn parse_header_block(block: &str) -> HashMap<String, String> {
    let mut headers = HashMap::new();
    let mut current: Option<(String, String)> = None;

    for line in block.lines() {
        if line.starts_with(' ') || line.starts_with('\t') {
            if let Some((_, ref mut value)) = current {
                value.push(' ');
                value.push_str(line.trim());
            }
        } else if let Some(colon) = line.find(':') {
            if let Some((name, value)) = current.take() {
                headers.insert(name, value);
            }
            current = Some((
                line[..colon].trim().to_lowercase(),
                line[colon + 1..].trim().to_string(),
            ));
        }
    }
    if let Some((name, value)) = current {
        headers.insert(name, value);
    }

    headers
}

/// Pull a `key=value` parameter out of a structured header value.
fn header_parameter(header: &str, name: &str) -> Option<String> {
    for piece in header.split(';') {
        let piece = piece.trim();
        if piece.len() > name.len() + 1
            && piece[..name.len()].eq_ignore_ascii_case(name)
            && piece.as_bytes()[name.len()] == b'='
        {
            let value = piece[name.len() + 1..].trim_matches('"').trim_matches('\'');
            return Some(value.to_string());
        }
    }
    None
}

fn split_multipart(boundary: &str, body: &str) -> Vec<MessagePart> {
    let marker = format!("--{}", boundary);
    let mut parts = Vec::new();

    for section in body.split(&marker) {
        let section = section.trim();
        if section.is_empty() || section.starts_with("--") {
            continue;
        }

        let (header_block, part_body) = split_headers_body(section);
        let headers = parse_header_block(&header_block);

        let mut part = MessagePart {
            body: part_body.into_bytes(),
            ..Default::default()
        };

        if let Some(content_type) = headers.get("content-type") {
            part.content_type = content_type.clone();
            part.filename = header_parameter(content_type, "name");
        }
        if let Some(disposition) = headers.get("content-disposition") {
            if disposition.to_lowercase().contains("attachment") {
                part.is_attachment = true;
            }
            if let Some(filename) = header_parameter(disposition, "filename") {
                part.filename = Some(filename);
            }
        }
        part.encoding = headers.get("content-transfer-encoding").cloned();

        parts.push(part);
    }

    parts
}

fn place_part(message: &mut ParsedMessage, part: MessagePart) {
    let content_type = part.content_type.to_lowercase();
    if part.is_attachment {
        message.attachments.push(part);
    } else if content_type.contains("text/html") {
        if let Ok(decoded) = part.decoded_body() {
            message.html_body = Some(String::from_utf8_lossy(&decoded).to_string());
        }
    } else if content_type.contains("text/plain") {
        if let Ok(decoded) = part.decoded_body() {
            message.text_body = Some(String::from_utf8_lossy(&decoded).to_string());
        }
    } else {
        // Unnamed binary part, serve it as an attachment
        message.attachments.push(part);
    }
}

fn decode_base64(content: &[u8]) -> Result<Vec<u8>> {
    let cleaned: Vec<u8> = content
        .iter()
        .filter(|&&b| !b.is_ascii_whitespace())
        .copied()
        .collect();

    general_purpose::STANDARD
        .decode(&cleaned)
        .map_err(|e| anyhow!("base64 decode error: {}", e))
}

fn decode_quoted_printable(content: &[u8]) -> Vec<u8> {
    let mut result = Vec::new();
    let text = String::from_utf8_lossy(content);
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '=' {
            result.push(ch as u8);
            continue;
        }

        // Soft line break
        if chars.peek() == Some(&'\r') || chars.peek() == Some(&'\n') {
            chars.next();
            if chars.peek() == Some(&'\n') {
                chars.next();
            }
            continue;
        }

        let mut hex = String::new();
        if let Some(c1) = chars.next() {
            hex.push(c1);
        }
        if let Some(c2) = chars.next() {
            hex.push(c2);
        }

        match u8::from_str_radix(&hex, 16) {
            Ok(byte) => result.push(byte),
            Err(_) => {
                result.push(b'=');
                result.extend(hex.as_bytes());
            }
        }
    }

    result
}
