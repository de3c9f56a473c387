//! MIME parsing of raw mailbox files into [`ParsedMail`].

use mail_parser::{Addr, Address, MessageParser, MimeHeaders, PartType};

use crate::error::{PoolError, Result};
use crate::model::delivery::{truncate_bytes, DeliveryStatus};
use crate::model::mail::ParsedMail;

/// Maximum length in bytes of the plain-text snippet taken from a message.
pub const SNIPPET_BYTES: usize = 100;

/// Parse one raw message belonging to mailbox owner `user`.
///
/// Multipart messages: the first `text/html` part becomes `body_html` and
/// the first `text/plain` part the snippet. Single-part messages: the payload
/// is the snippet source, and an HTML payload is also kept as `body_html`.
pub fn parse_mail(raw: &[u8], user: &str) -> Result<ParsedMail> {
    let message_bytes = skip_from_line(raw);
    if message_bytes.iter().all(u8::is_ascii_whitespace) {
        return Err(PoolError::Parse(format!("empty message in mailbox of {user}")));
    }

    let msg = MessageParser::default()
        .parse(message_bytes)
        .ok_or_else(|| PoolError::Parse(format!("unparseable message in mailbox of {user}")))?;

    let (body_snippet, body_html) = extract_bodies(&msg);

    Ok(ParsedMail {
        user: user.to_string(),
        from: msg.from().map(format_address),
        to: msg.to().map(format_address),
        subject: msg.subject().map(str::to_string),
        date: msg.date().map(|d| d.to_rfc3339()),
        date_epoch: msg.date().map(|d| d.to_timestamp()),
        body_snippet,
        body_html,
        status: DeliveryStatus::Success,
        source: String::new(),
    })
}

/// Pick `(snippet, html)` out of a parsed message.
fn extract_bodies(msg: &mail_parser::Message<'_>) -> (String, Option<String>) {
    let Some(root) = msg.parts.first() else {
        return (String::new(), None);
    };

    if !matches!(root.body, PartType::Multipart(_)) {
        let payload = String::from_utf8_lossy(root.contents());
        let snippet = truncate_bytes(&payload, SNIPPET_BYTES).to_string();
        let html = match &root.body {
            PartType::Html(html) => Some(html.to_string()),
            _ => None,
        };
        return (snippet, html);
    }

    let mut snippet = None;
    let mut html = None;
    for part in &msg.parts {
        match &part.body {
            PartType::Html(body) if html.is_none() => html = Some(body.to_string()),
            PartType::Text(body) if snippet.is_none() && is_text_plain(part) => {
                snippet = Some(truncate_bytes(body, SNIPPET_BYTES).to_string());
            }
            _ => {}
        }
        if snippet.is_some() && html.is_some() {
            break;
        }
    }
    (snippet.unwrap_or_default(), html)
}

/// Parts without a `Content-Type` header default to `text/plain`.
fn is_text_plain(part: &mail_parser::MessagePart<'_>) -> bool {
    match part.content_type() {
        Some(ct) => {
            ct.ctype().eq_ignore_ascii_case("text")
                && ct.subtype().map_or(true, |s| s.eq_ignore_ascii_case("plain"))
        }
        None => true,
    }
}

/// Render an address header as `Name <addr>, addr2, ...`.
fn format_address(address: &Address<'_>) -> String {
    let addrs: Vec<&Addr<'_>> = match address {
        Address::List(list) => list.iter().collect(),
        Address::Group(groups) => groups.iter().flat_map(|g| g.addresses.iter()).collect(),
    };
    addrs
        .into_iter()
        .map(format_addr)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
}

fn format_addr(addr: &Addr<'_>) -> String {
    match (addr.name.as_deref(), addr.address.as_deref()) {
        (Some(name), Some(email)) if !name.is_empty() => format!("{name} <{email}>"),
        (_, Some(email)) => email.to_string(),
        (Some(name), None) => name.to_string(),
        (None, None) => String::new(),
    }
}

/// Skip a BOM and an mbox-style `From ` envelope line if present.
///
/// Some delivery agents prepend the envelope line even in Maildir files.
fn skip_from_line(data: &[u8]) -> &[u8] {
    let data = data.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(data);

    if data.starts_with(b"From ") {
        if let Some(pos) = data.iter().position(|&b| b == b'\n') {
            return &data[pos + 1..];
        }
    }
    data
}
