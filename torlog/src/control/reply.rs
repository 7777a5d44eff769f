//! Control-port reply codec
//!
//! A reply is one or more lines `NNN<sep><text>\r\n` where `<sep>` is `-` for
//! a mid line, `+` for a line followed by a dot-terminated data block, and a
//! space for the final line. Status `650` marks an asynchronous event.

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, warn};

use super::ControlError;

/// Status code of asynchronous event notifications
pub const ASYNC_EVENT_CODE: u16 = 650;

/// Bytes kept from a single reply line; the rest of a longer line is discarded
const MAX_LINE_LEN: usize = 64 * 1024;

/// Kind of reply line, from its separator character
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Mid,
    Data,
    End,
}

/// One logical line of a reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyLine {
    pub code: u16,
    pub kind: LineKind,
    pub text: String,
    /// Unescaped data block for `+` lines
    pub data: Option<String>,
}

/// A complete reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub lines: Vec<ReplyLine>,
    raw: String,
}

impl Reply {
    /// Status code of the final line
    pub fn code(&self) -> u16 {
        self.lines.last().map(|l| l.code).unwrap_or_default()
    }

    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.code())
    }

    pub fn is_async(&self) -> bool {
        self.lines.first().map(|l| l.code) == Some(ASYNC_EVENT_CODE)
    }

    /// Text of the final line
    pub fn message(&self) -> &str {
        self.lines.last().map(|l| l.text.as_str()).unwrap_or_default()
    }

    /// The reply exactly as received, CRLF line endings included
    pub fn raw_content(&self) -> &str {
        &self.raw
    }
}

fn strip_eol(line: &str) -> &str {
    line.strip_suffix("\r\n")
        .or_else(|| line.strip_suffix('\n'))
        .unwrap_or(line)
}

/// Read one line into `buf`, returning the number of bytes consumed
///
/// Invalid UTF-8 is replaced rather than rejected. At most `MAX_LINE_LEN`
/// bytes are buffered; a longer line is truncated and re-terminated.
async fn read_raw_line<R: AsyncBufRead + Unpin>(reader: &mut R, buf: &mut String) -> Result<usize, ControlError> {
    buf.clear();
    let mut bytes = Vec::new();
    let mut consumed = 0;

    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            break;
        }
        let (len, found) = match available.iter().position(|&b| b == b'\n') {
            Some(i) => (i + 1, true),
            None => (available.len(), false),
        };
        let room = MAX_LINE_LEN.saturating_sub(bytes.len());
        bytes.extend_from_slice(&available[..len.min(room)]);
        AsyncBufReadExt::consume(reader, len);
        consumed += len;
        if found {
            break;
        }
    }

    if consumed > MAX_LINE_LEN {
        warn!(bytes = consumed, "read_raw_line: truncated oversized line");
        while matches!(bytes.last(), Some(b'\r' | b'\n')) {
            bytes.pop();
        }
        bytes.extend_from_slice(b"\r\n");
    }

    buf.push_str(&String::from_utf8_lossy(&bytes));
    Ok(consumed)
}

fn parse_status_line(line: &str) -> Result<ReplyLine, ControlError> {
    let bytes = line.as_bytes();
    if bytes.len() < 4 || !bytes[..3].iter().all(u8::is_ascii_digit) {
        return Err(ControlError::Protocol(format!("malformed reply line: {:?}", line)));
    }
    let code: u16 = line[..3]
        .parse()
        .map_err(|_| ControlError::Protocol(format!("bad status code: {:?}", line)))?;
    let kind = match bytes[3] {
        b'-' => LineKind::Mid,
        b'+' => LineKind::Data,
        b' ' => LineKind::End,
        other => {
            return Err(ControlError::Protocol(format!(
                "unknown reply separator {:?} in {:?}",
                other as char, line
            )));
        }
    };
    Ok(ReplyLine {
        code,
        kind,
        text: line[4..].to_string(),
        data: None,
    })
}

/// Read one complete reply
///
/// Returns `Ok(None)` on a clean EOF between replies. EOF in the middle of a
/// reply is an error.
pub async fn read_reply<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Option<Reply>, ControlError> {
    let mut lines = Vec::new();
    let mut raw = String::new();
    let mut buf = String::new();

    loop {
        if read_raw_line(reader, &mut buf).await? == 0 {
            if lines.is_empty() {
                return Ok(None);
            }
            return Err(ControlError::Closed);
        }
        raw.push_str(&buf);
        let mut line = parse_status_line(strip_eol(&buf))?;

        if line.kind == LineKind::Data {
            let mut data = String::new();
            loop {
                if read_raw_line(reader, &mut buf).await? == 0 {
                    return Err(ControlError::Closed);
                }
                raw.push_str(&buf);
                let content = strip_eol(&buf);
                if content == "." {
                    break;
                }
                let content = content.strip_prefix('.').unwrap_or(content);
                data.push_str(content);
                data.push('\n');
            }
            line.data = Some(data);
        }

        let done = line.kind == LineKind::End;
        lines.push(line);
        if done {
            break;
        }
    }

    debug!(code = lines.last().map(|l| l.code), lines = lines.len(), "read_reply: complete");
    Ok(Some(Reply { lines, raw }))
}

/// Quote a string using the control protocol QuotedString escapes
pub fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}
