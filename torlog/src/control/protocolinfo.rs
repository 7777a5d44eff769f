//! PROTOCOLINFO parsing and authentication method selection

use std::path::PathBuf;

use tracing::debug;

use super::reply::{Reply, quote};
use super::{ControlError, Credentials};

/// Authentication methods a daemon can advertise
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthMethod {
    Null,
    HashedPassword,
    Cookie,
    SafeCookie,
    Other(String),
}

impl AuthMethod {
    fn parse(s: &str) -> Self {
        match s {
            "NULL" => AuthMethod::Null,
            "HASHEDPASSWORD" => AuthMethod::HashedPassword,
            "COOKIE" => AuthMethod::Cookie,
            "SAFECOOKIE" => AuthMethod::SafeCookie,
            other => AuthMethod::Other(other.to_string()),
        }
    }
}

/// Parsed PROTOCOLINFO reply
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProtocolInfo {
    pub auth_methods: Vec<AuthMethod>,
    pub cookie_file: Option<PathBuf>,
    pub tor_version: Option<String>,
}

/// Split `KEY=VALUE KEY="quoted value"` pairs; bare words are skipped
fn keyword_args(text: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    let mut chars = text.chars().peekable();

    loop {
        while chars.peek() == Some(&' ') {
            chars.next();
        }
        if chars.peek().is_none() {
            break;
        }

        let mut key = String::new();
        while let Some(&c) = chars.peek() {
            if c == '=' || c == ' ' {
                break;
            }
            key.push(c);
            chars.next();
        }
        if chars.peek() != Some(&'=') {
            continue;
        }
        chars.next();

        let mut value = String::new();
        if chars.peek() == Some(&'"') {
            chars.next();
            while let Some(c) = chars.next() {
                match c {
                    '\\' => match chars.next() {
                        Some('n') => value.push('\n'),
                        Some('r') => value.push('\r'),
                        Some('t') => value.push('\t'),
                        Some(other) => value.push(other),
                        None => break,
                    },
                    '"' => break,
                    _ => value.push(c),
                }
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c == ' ' {
                    break;
                }
                value.push(c);
                chars.next();
            }
        }
        out.push((key, value));
    }
    out
}

impl ProtocolInfo {
    /// Parse a PROTOCOLINFO reply
    pub fn from_reply(reply: &Reply) -> Result<Self, ControlError> {
        if !reply.is_ok() {
            return Err(ControlError::Rejected {
                code: reply.code(),
                message: reply.message().to_string(),
            });
        }

        let mut info = ProtocolInfo::default();
        for line in &reply.lines {
            if let Some(rest) = line.text.strip_prefix("AUTH ") {
                for (key, value) in keyword_args(rest) {
                    match key.as_str() {
                        "METHODS" => {
                            info.auth_methods = value.split(',').filter(|m| !m.is_empty()).map(AuthMethod::parse).collect()
                        }
                        "COOKIEFILE" => info.cookie_file = Some(PathBuf::from(value)),
                        _ => {}
                    }
                }
            } else if let Some(rest) = line.text.strip_prefix("VERSION ") {
                info.tor_version = keyword_args(rest)
                    .into_iter()
                    .find(|(k, _)| k == "Tor")
                    .map(|(_, v)| v);
            }
        }

        debug!(?info, "ProtocolInfo::from_reply: parsed");
        Ok(info)
    }

    pub fn supports(&self, method: &AuthMethod) -> bool {
        self.auth_methods.contains(method)
    }

    /// Choose the AUTHENTICATE command for these methods and credentials
    ///
    /// Preference: NULL, then a configured password, then the cookie file.
    /// `read_cookie` loads the cookie bytes from a path.
    pub fn authenticate_command<F>(&self, credentials: &Credentials, read_cookie: F) -> Result<String, ControlError>
    where
        F: FnOnce(&std::path::Path) -> std::io::Result<Vec<u8>>,
    {
        if self.supports(&AuthMethod::Null) {
            debug!("authenticate_command: using NULL auth");
            return Ok("AUTHENTICATE".to_string());
        }

        if let (true, Some(password)) = (self.supports(&AuthMethod::HashedPassword), &credentials.password) {
            debug!("authenticate_command: using password auth");
            return Ok(format!("AUTHENTICATE {}", quote(password)));
        }

        if self.supports(&AuthMethod::Cookie) {
            let path = credentials
                .cookie_path
                .clone()
                .or_else(|| self.cookie_file.clone())
                .ok_or_else(|| ControlError::Authentication("daemon offered COOKIE auth without a cookie file".into()))?;
            debug!(?path, "authenticate_command: using cookie auth");
            let cookie = read_cookie(&path).map_err(|e| {
                ControlError::Authentication(format!("failed to read cookie file {}: {}", path.display(), e))
            })?;
            let hex: String = cookie.iter().map(|b| format!("{:02X}", b)).collect();
            return Ok(format!("AUTHENTICATE {}", hex));
        }

        if self.supports(&AuthMethod::HashedPassword) {
            return Err(ControlError::Authentication(
                "daemon requires a control password but none is configured".into(),
            ));
        }

        Err(ControlError::Authentication(format!(
            "no supported authentication method in {:?}",
            self.auth_methods
        )))
    }
}
