//! Raw message decoding.
//!
//! Gmail's `format=raw` payload is a base64url RFC 822 message. [`decode_raw`]
//! turns it into bytes and [`parse_email`] extracts what a chat post needs:
//! subject, a human date, sender display names, the RFC Message-ID, a
//! markdown-ish body and the attachments.

use mailparse::{DispositionType, MailAddr, MailHeaderMap, ParsedMail};
use tracing::debug;

use mailbridge_types::codec::decode_base64;
use mailbridge_types::error::MimeError;

/// Wrap width for HTML bodies rendered as text.
const HTML_WRAP_WIDTH: usize = 100;

/// The parts of a message that end up in a chat post.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedEmail {
    pub subject: String,
    /// Send date rendered as `January 2, 2006`; `None` when unparsable.
    pub date: Option<String>,
    /// Sender display names joined with `, `; empty when none are present.
    pub from: String,
    /// RFC Message-ID without angle brackets.
    pub message_id: Option<String>,
    pub body: String,
    pub attachments: Vec<Attachment>,
}

/// A file carried by a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

/// Decode a base64url `raw` payload.
pub fn decode_raw(raw: &str) -> Result<Vec<u8>, MimeError> {
    decode_base64(raw).map_err(|e| MimeError::Base64(e.to_string()))
}

/// Parse RFC 822 bytes into a [`ParsedEmail`].
pub fn parse_email(bytes: &[u8]) -> Result<ParsedEmail, MimeError> {
    let parsed = mailparse::parse_mail(bytes).map_err(|e| MimeError::Parse(e.to_string()))?;
    let headers = &parsed.headers;

    let subject = headers.get_first_value("Subject").unwrap_or_default();
    let date = headers
        .get_first_value("Date")
        .and_then(|raw| format_date(&raw));
    let from = headers
        .get_first_header("From")
        .map(sender_names)
        .unwrap_or_default();
    let message_id = headers
        .get_first_value("Message-ID")
        .map(|id| strip_angle_brackets(&id))
        .filter(|id| !id.is_empty());

    let mut bodies = Bodies::default();
    let mut attachments = Vec::new();
    walk_mime_parts(&parsed, &mut bodies, &mut attachments);

    let body = match bodies.html.as_deref().map(html_to_text) {
        Some(text) if !text.trim().is_empty() => text,
        _ => bodies.text.unwrap_or_default(),
    };

    debug!(
        attachments = attachments.len(),
        has_message_id = message_id.is_some(),
        "parsed raw message"
    );

    Ok(ParsedEmail {
        subject,
        date,
        from,
        message_id,
        body: body.trim().to_string(),
        attachments,
    })
}

/// Strip surrounding whitespace and `<>` from a Message-ID.
pub fn strip_angle_brackets(id: &str) -> String {
    id.trim()
        .trim_start_matches('<')
        .trim_end_matches('>')
        .trim()
        .to_string()
}

#[derive(Default)]
struct Bodies {
    text: Option<String>,
    html: Option<String>,
}

fn walk_mime_parts(part: &ParsedMail, bodies: &mut Bodies, attachments: &mut Vec<Attachment>) {
    let mime = part.ctype.mimetype.to_lowercase();

    if mime.starts_with("multipart/") {
        for sub in &part.subparts {
            walk_mime_parts(sub, bodies, attachments);
        }
        return;
    }

    let disposition = part.get_content_disposition();
    let filename = disposition
        .params
        .get("filename")
        .or_else(|| part.ctype.params.get("name"))
        .cloned();

    let is_attachment =
        disposition.disposition == DispositionType::Attachment || filename.is_some();

    if is_attachment {
        match part.get_body_raw() {
            Ok(data) => {
                let filename =
                    filename.unwrap_or_else(|| format!("attachment-{}", attachments.len() + 1));
                attachments.push(Attachment {
                    filename,
                    content_type: mime,
                    data,
                });
            }
            Err(e) => debug!(error = %e, "skipping undecodable attachment"),
        }
        return;
    }

    match mime.as_str() {
        "text/plain" if bodies.text.is_none() => bodies.text = part.get_body().ok(),
        "text/html" if bodies.html.is_none() => bodies.html = part.get_body().ok(),
        _ => {}
    }
}

fn html_to_text(html: &str) -> String {
    html2text::from_read(html.as_bytes(), HTML_WRAP_WIDTH).unwrap_or_default()
}

fn sender_names(header: &mailparse::MailHeader) -> String {
    let Ok(list) = mailparse::addrparse_header(header) else {
        return String::new();
    };
    let mut names = Vec::new();
    for addr in list.iter() {
        match addr {
            MailAddr::Single(info) => {
                if let Some(name) = info.display_name.as_deref().map(str::trim) {
                    if !name.is_empty() {
                        names.push(name.to_string());
                    }
                }
            }
            MailAddr::Group(group) => {
                for info in &group.addrs {
                    if let Some(name) = info.display_name.as_deref().map(str::trim) {
                        if !name.is_empty() {
                            names.push(name.to_string());
                        }
                    }
                }
            }
        }
    }
    names.join(", ")
}

fn format_date(raw: &str) -> Option<String> {
    const FORMAT: &str = "%B %-d, %Y";
    if let Ok(dt) = chrono::DateTime::parse_from_rfc2822(raw.trim()) {
        return Some(dt.format(FORMAT).to_string());
    }
    let ts = mailparse::dateparse(raw).ok()?;
    chrono::DateTime::from_timestamp(ts, 0).map(|dt| dt.format(FORMAT).to_string())
}
