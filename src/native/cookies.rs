//! Script-visible cookies of one document.
//!
//! [`CookieAssignment`] is one `document.cookie = "..."` string taken apart;
//! [`CookieJar`] stores the accepted cookies and renders the `a=1; b=2` string
//! the getter returns. Parsing follows what browsers do for script-set cookies:
//! attribute names are case-insensitive, unknown attributes are ignored, and
//! `Max-Age` wins over `Expires`.

use std::fmt;
use std::str::FromStr;
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use time::format_description;
use time::{Duration, OffsetDateTime, PrimitiveDateTime};
use url::Url;

use crate::errors::{StorageError, StorageResult};

/// `Expires` date layout, e.g. `Wed, 21 Oct 2015 07:28:00 GMT`.
const COOKIE_DATE_FORMAT: &str =
    "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT";

/// Longest `Max-Age` a browser honours (400 days).
pub const MAX_COOKIE_LIFETIME: Duration = Duration::days(400);

/// Formats `when` as a cookie `Expires` date.
pub fn format_cookie_date(when: OffsetDateTime) -> StorageResult<String> {
    let items = format_description::parse(COOKIE_DATE_FORMAT)
        .map_err(|e| StorageError::Serialization(e.to_string()))?;
    when.to_offset(time::UtcOffset::UTC)
        .format(&items)
        .map_err(|e| StorageError::Serialization(e.to_string()))
}

/// Parses a cookie `Expires` date. Unparseable dates yield `None`.
pub fn parse_cookie_date(raw: &str) -> Option<OffsetDateTime> {
    let items = format_description::parse(COOKIE_DATE_FORMAT).ok()?;
    PrimitiveDateTime::parse(raw.trim(), &items)
        .ok()
        .map(PrimitiveDateTime::assume_utc)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl SameSite {
    pub fn as_str(&self) -> &'static str {
        match self {
            SameSite::Strict => "Strict",
            SameSite::Lax => "Lax",
            SameSite::None => "None",
        }
    }
}

impl fmt::Display for SameSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SameSite {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(SameSite::Strict),
            "lax" => Ok(SameSite::Lax),
            "none" => Ok(SameSite::None),
            other => Err(StorageError::InvalidOptions(format!("unknown SameSite value `{other}`"))),
        }
    }
}

/// One parsed cookie assignment string.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CookieAssignment {
    pub name: String,
    pub value: String,
    pub path: Option<String>,
    pub domain: Option<String>,
    pub max_age: Option<i64>,
    pub expires: Option<OffsetDateTime>,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: Option<SameSite>,
}

impl CookieAssignment {
    /// Parses `name=value; attr=...`. Returns `None` when the first segment has no
    /// `=` or the name is empty.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut parts = raw.split(';');
        let (name, value) = parts.next()?.split_once('=')?;
        let name = name.trim();
        if name.is_empty() {
            return None;
        }

        let mut assignment = CookieAssignment {
            name: name.to_string(),
            value: value.trim().to_string(),
            path: None,
            domain: None,
            max_age: None,
            expires: None,
            secure: false,
            http_only: false,
            same_site: None,
        };

        for part in parts {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let (attr, val) = match part.split_once('=') {
                Some((a, v)) => (a.trim(), Some(v.trim())),
                None => (part, None),
            };
            match (attr.to_ascii_lowercase().as_str(), val) {
                ("path", Some(v)) if v.starts_with('/') => assignment.path = Some(v.to_string()),
                ("domain", Some(v)) if !v.is_empty() => {
                    assignment.domain = Some(v.trim_start_matches('.').to_ascii_lowercase())
                }
                ("max-age", Some(v)) => assignment.max_age = v.parse().ok(),
                ("expires", Some(v)) => assignment.expires = parse_cookie_date(v),
                ("samesite", Some(v)) => assignment.same_site = v.parse().ok(),
                ("secure", _) => assignment.secure = true,
                ("httponly", _) => assignment.http_only = true,
                _ => {}
            }
        }

        Some(assignment)
    }

    /// Absolute expiry, `Max-Age` taking precedence over `Expires`.
    /// `None` is a session cookie. `Max-Age` is capped at
    /// [`MAX_COOKIE_LIFETIME`].
    pub fn expiry(&self, now: OffsetDateTime) -> Option<OffsetDateTime> {
        match self.max_age {
            Some(secs) if secs <= 0 => Some(OffsetDateTime::UNIX_EPOCH),
            Some(secs) => {
                let lifetime = Duration::seconds(secs).min(MAX_COOKIE_LIFETIME);
                now.checked_add(lifetime).or(self.expires)
            }
            None => self.expires,
        }
    }

    /// True when the assignment expires the cookie instead of setting it.
    pub fn is_removal(&self, now: OffsetDateTime) -> bool {
        self.expiry(now).is_some_and(|at| at <= now)
    }
}

/// A stored cookie.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    /// Set when no `Domain` attribute was given: only the exact host sees it.
    pub host_only: bool,
    pub path: String,
    pub secure: bool,
    pub same_site: Option<SameSite>,
    pub expires: Option<OffsetDateTime>,
}

impl Cookie {
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires.is_some_and(|at| at <= now)
    }

    fn same_slot(&self, other: &Cookie) -> bool {
        self.name == other.name && self.domain == other.domain && self.path == other.path
    }

    /// Whether a document at `url` can see this cookie.
    pub fn visible_to(&self, url: &Url) -> bool {
        let host = url.host_str().unwrap_or_default();
        let domain_ok = if self.host_only {
            host == self.domain
        } else {
            domain_matches(host, &self.domain)
        };
        domain_ok && path_matches(url.path(), &self.path) && (!self.secure || url.scheme() == "https")
    }
}

fn domain_matches(host: &str, domain: &str) -> bool {
    host == domain || host.ends_with(&format!(".{domain}"))
}

fn path_matches(request_path: &str, cookie_path: &str) -> bool {
    if request_path == cookie_path {
        return true;
    }
    request_path.starts_with(cookie_path)
        && (cookie_path.ends_with('/') || request_path[cookie_path.len()..].starts_with('/'))
}

fn default_path(url: &Url) -> String {
    url.path()
        .rsplit_once('/')
        .map_or("/", |(dir, _)| if dir.is_empty() { "/" } else { dir })
        .to_string()
}

/// What [`CookieJar::set_from_script`] did with an assignment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CookieOutcome {
    Stored,
    Deleted,
    Rejected,
}

/// Cookies of one document, in creation order.
#[derive(Debug, Default)]
pub struct CookieJar {
    cookies: RwLock<Vec<Cookie>>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a `document.cookie = raw` assignment made by a page at `url`.
    pub fn set_from_script(&self, url: &Url, raw: &str) -> CookieOutcome {
        let Some(assignment) = CookieAssignment::parse(raw) else {
            log::debug!("cookie jar: ignoring malformed cookie `{}`", raw);
            return CookieOutcome::Rejected;
        };
        let host = url.host_str().unwrap_or_default().to_ascii_lowercase();

        if assignment.http_only {
            log::debug!("cookie jar: scripts cannot set HttpOnly cookie `{}`", assignment.name);
            return CookieOutcome::Rejected;
        }
        if assignment.secure && url.scheme() != "https" {
            log::debug!("cookie jar: Secure cookie `{}` rejected on {}", assignment.name, url.scheme());
            return CookieOutcome::Rejected;
        }
        if let Some(domain) = &assignment.domain {
            if !domain_matches(&host, domain) {
                log::debug!("cookie jar: domain `{}` does not match host `{}`", domain, host);
                return CookieOutcome::Rejected;
            }
        }

        let now = OffsetDateTime::now_utc();
        let cookie = Cookie {
            name: assignment.name.clone(),
            value: assignment.value.clone(),
            domain: assignment.domain.clone().unwrap_or_else(|| host.clone()),
            host_only: assignment.domain.is_none(),
            path: assignment.path.clone().unwrap_or_else(|| default_path(url)),
            secure: assignment.secure,
            same_site: assignment.same_site,
            expires: assignment.expiry(now),
        };

        let mut cookies = self.cookies.write().unwrap_or_else(PoisonError::into_inner);
        cookies.retain(|c| !c.is_expired(now));

        if cookie.is_expired(now) {
            cookies.retain(|c| !c.same_slot(&cookie));
            return CookieOutcome::Deleted;
        }

        // Replacing keeps the original position, like creation order in browsers.
        match cookies.iter_mut().find(|c| c.same_slot(&cookie)) {
            Some(existing) => *existing = cookie,
            None => cookies.push(cookie),
        }
        CookieOutcome::Stored
    }

    /// The `document.cookie` getter value for a page at `url`.
    pub fn cookie_string(&self, url: &Url) -> String {
        let now = OffsetDateTime::now_utc();
        self.cookies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|c| !c.is_expired(now) && c.visible_to(url))
            .map(|c| format!("{}={}", c.name, c.value))
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Every unexpired cookie, regardless of visibility.
    pub fn all(&self) -> Vec<Cookie> {
        let now = OffsetDateTime::now_utc();
        self.cookies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|c| !c.is_expired(now))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.all().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.cookies.write().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

/// Splits a `document.cookie` getter string into `(name, value)` pairs.
///
/// Segments without `=` are skipped.
pub fn parse_cookie_string(raw: &str) -> Vec<(String, String)> {
    raw.split(';')
        .filter_map(|segment| {
            let (name, value) = segment.trim().split_once('=')?;
            let name = name.trim();
            (!name.is_empty()).then(|| (name.to_string(), value.trim().to_string()))
        })
        .collect()
}
