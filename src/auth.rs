//! Credentials used to talk to Slack.
//!
//! A bot or user token (`xoxb-`, `xoxp-`) works on its own. A browser session
//! token (`xoxc-`) also needs the session cookies, given either as the raw
//! value of the `d` cookie or as a Netscape `cookies.txt` export.

use std::fs;
use std::path::Path;

use crate::{AppError, Result};

/// Name of the Slack session cookie.
pub const SESSION_COOKIE: &str = "d";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub domain: String,
    pub name: String,
    pub value: String,
}

pub trait AuthProvider: Send + Sync {
    fn token(&self) -> &str;

    fn cookies(&self) -> &[Cookie];

    /// Checks the credentials before any API call is made.
    fn validate(&self) -> Result<()> {
        if self.token().is_empty() {
            return Err(AppError::MissingToken);
        }
        Ok(())
    }

    /// Value of the session cookie, if present.
    fn session_cookie(&self) -> Option<&str> {
        self.cookies()
            .iter()
            .find(|c| c.name == SESSION_COOKIE)
            .map(|c| c.value.as_str())
    }

    /// All cookies as a `Cookie` request header value.
    fn cookie_header(&self) -> Option<String> {
        let cookies = self.cookies();
        if cookies.is_empty() {
            return None;
        }
        let pairs: Vec<String> = cookies
            .iter()
            .map(|c| format!("{}={}", c.name, c.value))
            .collect();
        Some(pairs.join("; "))
    }
}

/// Token with an optional `d` cookie value.
#[derive(Debug, Clone)]
pub struct ValueAuth {
    token: String,
    cookies: Vec<Cookie>,
}

impl ValueAuth {
    pub fn new(token: impl Into<String>, cookie: Option<String>) -> Result<Self> {
        let token = token.into();
        if token.is_empty() {
            return Err(AppError::MissingToken);
        }
        let cookies = cookie
            .filter(|v| !v.is_empty())
            .map(|value| Cookie {
                domain: ".slack.com".to_string(),
                name: SESSION_COOKIE.to_string(),
                value,
            })
            .into_iter()
            .collect();
        Ok(Self { token, cookies })
    }
}

impl AuthProvider for ValueAuth {
    fn token(&self) -> &str {
        &self.token
    }

    fn cookies(&self) -> &[Cookie] {
        &self.cookies
    }
}

/// Token plus the cookies of a Netscape/Mozilla `cookies.txt` file.
#[derive(Debug, Clone)]
pub struct CookieFileAuth {
    token: String,
    cookies: Vec<Cookie>,
}

impl CookieFileAuth {
    pub fn new(token: impl Into<String>, path: &Path) -> Result<Self> {
        let token = token.into();
        if token.is_empty() {
            return Err(AppError::MissingToken);
        }
        let content = fs::read_to_string(path).map_err(|e| AppError::ReadFile {
            path: path.display().to_string(),
            source: e,
        })?;
        let cookies = parse_cookies_txt(&content).map_err(|reason| AppError::InvalidCookies {
            path: path.display().to_string(),
            reason,
        })?;
        Ok(Self { token, cookies })
    }
}

impl AuthProvider for CookieFileAuth {
    fn token(&self) -> &str {
        &self.token
    }

    fn cookies(&self) -> &[Cookie] {
        &self.cookies
    }

    fn validate(&self) -> Result<()> {
        if self.token.is_empty() {
            return Err(AppError::MissingToken);
        }
        if self.session_cookie().is_none() {
            return Err(AppError::InvalidCookies {
                path: "cookie file".to_string(),
                reason: format!("no {SESSION_COOKIE:?} cookie"),
            });
        }
        Ok(())
    }
}

const HTTP_ONLY_PREFIX: &str = "#HttpOnly_";

/// Parses the tab separated `cookies.txt` format:
/// `domain  subdomains  path  secure  expiry  name  value`.
fn parse_cookies_txt(content: &str) -> std::result::Result<Vec<Cookie>, String> {
    let mut cookies = Vec::new();
    for (lineno, raw) in content.lines().enumerate() {
        let line = raw.trim_end_matches('\r');
        let line = match line.strip_prefix(HTTP_ONLY_PREFIX) {
            Some(rest) => rest,
            None if line.trim().is_empty() || line.starts_with('#') => continue,
            None => line,
        };

        let fields: Vec<&str> = line.split('\t').collect();
        let [domain, _subdomains, _path, _secure, _expiry, name, value] = fields.as_slice() else {
            return Err(format!(
                "line {}: expected 7 tab separated fields, got {}",
                lineno + 1,
                fields.len()
            ));
        };
        if name.is_empty() {
            return Err(format!("line {}: empty cookie name", lineno + 1));
        }
        cookies.push(Cookie {
            domain: domain.to_string(),
            name: name.to_string(),
            value: value.to_string(),
        });
    }
    if cookies.is_empty() {
        return Err("no cookies found".to_string());
    }
    Ok(cookies)
}
