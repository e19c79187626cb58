//! Cookie transport used by storage plugins.
//!
//! The jar reads the cookies of the inbound request and records writes so they can
//! be flushed onto the outgoing response. Reads observe writes made earlier in the
//! same request.

use std::collections::BTreeMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};

use crate::error::{storage_error, Error, StorageErrorKind};

/// Browsers reject cookies larger than this, name and attributes included.
pub const MAX_COOKIE_SIZE: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl SameSite {
    fn as_str(&self) -> &'static str {
        match self {
            SameSite::Strict => "Strict",
            SameSite::Lax => "Lax",
            SameSite::None => "None",
        }
    }
}

/// Attributes applied to a written cookie.
#[derive(Debug, Clone, PartialEq)]
pub struct CookieOptions {
    pub expires: Option<DateTime<Utc>>,
    pub max_age: Option<i64>,
    pub path: Option<String>,
    pub domain: Option<String>,
    pub http_only: bool,
    pub secure: bool,
    pub same_site: Option<SameSite>,
}

impl Default for CookieOptions {
    fn default() -> Self {
        Self {
            expires: None,
            max_age: None,
            path: Some("/".to_string()),
            domain: None,
            http_only: true,
            secure: false,
            same_site: Some(SameSite::Lax),
        }
    }
}

impl CookieOptions {
    /// Options that make the browser drop the cookie immediately.
    pub fn expired(&self) -> Self {
        Self {
            expires: None,
            max_age: Some(0),
            ..self.clone()
        }
    }

    pub fn with_expires(mut self, expires: Option<DateTime<Utc>>) -> Self {
        self.expires = expires;
        self
    }
}

/// A pending `Set-Cookie` write.
#[derive(Debug, Clone, PartialEq)]
pub struct SetCookie {
    pub name: String,
    pub value: String,
    pub options: CookieOptions,
}

impl SetCookie {
    /// Render the value of a `Set-Cookie` header.
    pub fn header_value(&self) -> String {
        let mut header = format!("{}={}", self.name, self.value);
        let options = &self.options;

        if let Some(expires) = options.expires {
            header.push_str("; Expires=");
            header.push_str(&httpdate::fmt_http_date(to_system_time(expires)));
        }
        if let Some(max_age) = options.max_age {
            header.push_str(&format!("; Max-Age={}", max_age));
        }
        if let Some(domain) = &options.domain {
            header.push_str(&format!("; Domain={}", domain));
        }
        if let Some(path) = &options.path {
            header.push_str(&format!("; Path={}", path));
        }
        if options.secure {
            header.push_str("; Secure");
        }
        if options.http_only {
            header.push_str("; HttpOnly");
        }
        if let Some(same_site) = options.same_site {
            header.push_str(&format!("; SameSite={}", same_site.as_str()));
        }
        header
    }
}

fn to_system_time(at: DateTime<Utc>) -> SystemTime {
    let secs = at.timestamp();
    if secs >= 0 {
        UNIX_EPOCH + Duration::from_secs(secs as u64)
    } else {
        UNIX_EPOCH
    }
}

/// Request-scoped cookie reader/writer.
#[derive(Debug, Clone, Default)]
pub struct CookieJar {
    incoming: BTreeMap<String, String>,
    pending: Vec<SetCookie>,
}

impl CookieJar {
    pub fn new<I, K, V>(incoming: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            incoming: incoming
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            pending: Vec::new(),
        }
    }

    /// Parse a `Cookie` request header (`a=1; b=2`).
    pub fn from_header(header: &str) -> Self {
        Self::new(header.split(';').filter_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            Some((name.trim().to_string(), value.trim().to_string()))
        }))
    }

    /// Current value of a cookie, including writes made during this request.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.pending
            .iter()
            .rev()
            .find(|cookie| cookie.name == name)
            .map(|cookie| cookie.value.as_str())
            .or_else(|| self.incoming.get(name).map(String::as_str))
    }

    /// Record a write.
    ///
    /// Fails with `StorageErrorKind::LimitExceeded` when the rendered cookie would not
    /// fit in a browser cookie.
    pub fn set(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
        options: CookieOptions,
    ) -> Result<(), Error> {
        let cookie = SetCookie {
            name: name.into(),
            value: value.into(),
            options,
        };
        let size = cookie.header_value().len();
        if size > MAX_COOKIE_SIZE {
            return Err(storage_error(
                StorageErrorKind::LimitExceeded,
                &format!(
                    "Cookie {} is {} bytes, the limit is {}; use external storage instead",
                    cookie.name, size, MAX_COOKIE_SIZE
                ),
            ));
        }
        self.pending.push(cookie);
        Ok(())
    }

    /// All cookies visible to this request, writes applied.
    pub fn all(&self) -> Vec<(String, String)> {
        let mut merged = self.incoming.clone();
        for cookie in &self.pending {
            merged.insert(cookie.name.clone(), cookie.value.clone());
        }
        merged.into_iter().collect()
    }

    /// True when writes are waiting to be flushed onto the response.
    pub fn is_dirty(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn pending(&self) -> &[SetCookie] {
        &self.pending
    }

    pub fn into_pending(self) -> Vec<SetCookie> {
        self.pending
    }
}
