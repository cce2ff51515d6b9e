//! Cookie adapter: keys and values live in `document.cookie`.
//!
//! Names and values are percent-encoded the way `encodeURIComponent` does it, so
//! arbitrary strings survive the `name=value; ...` syntax. Removal rewrites the
//! cookie with `max-age=0`; there is no other way to delete a cookie from script.
//!
//! # Example
//! ```rust
//! use gosub_storage::adapters::CookieOptions;
//! use gosub_storage::native::SameSite;
//! # fn main() -> Result<(), gosub_storage::StorageError> {
//! let options = CookieOptions::builder()
//!     .path("/app")
//!     .secure(true)
//!     .same_site(SameSite::Strict)
//!     .max_age_seconds(3600)
//!     .build()?;
//! assert_eq!(options.path.as_deref(), Some("/app"));
//! # Ok(()) }
//! ```

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::try_join_all;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use time::OffsetDateTime;

use crate::adapters::memory::MemoryAdapter;
use crate::adapters::StorageAdapter;
use crate::errors::{StorageError, StorageResult};
use crate::native::cookies::{format_cookie_date, parse_cookie_string, SameSite};
use crate::native::window::ambient_window;
use crate::native::NativeDocument;

pub const COOKIE_STORAGE_ID: &str = "cookie-storage";
pub const COOKIE_FALLBACK_ID: &str = "cookie-fallback";

/// Characters `encodeURIComponent` leaves alone.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

fn encode_component(s: &str) -> String {
    utf8_percent_encode(s, COMPONENT).to_string()
}

/// Percent-decodes; input that does not decode to UTF-8 is returned as is.
fn decode_component(s: &str) -> String {
    match percent_decode_str(s).decode_utf8() {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => s.to_string(),
    }
}

/// Directives written with every cookie.
#[derive(Clone, Debug, Default)]
pub struct CookieOptions {
    /// Defaults to `/`.
    pub path: Option<String>,
    pub domain: Option<String>,
    pub secure: bool,
    pub same_site: Option<SameSite>,
    pub max_age_seconds: Option<i64>,
    pub expires: Option<OffsetDateTime>,
    /// Without one, the ambient window's document is used.
    pub document: Option<Arc<NativeDocument>>,
}

impl CookieOptions {
    pub fn builder() -> CookieOptionsBuilder {
        CookieOptionsBuilder::default()
    }
}

/// Builder for [`CookieOptions`].
#[derive(Debug, Clone, Default)]
pub struct CookieOptionsBuilder {
    inner: CookieOptions,
}

impl CookieOptionsBuilder {
    #[inline]
    fn map(mut self, f: impl FnOnce(&mut CookieOptions)) -> Self {
        f(&mut self.inner);
        self
    }

    pub fn path(self, path: impl Into<String>) -> Self {
        self.map(|o| o.path = Some(path.into()))
    }

    pub fn domain(self, domain: impl Into<String>) -> Self {
        self.map(|o| o.domain = Some(domain.into()))
    }

    pub fn secure(self, secure: bool) -> Self {
        self.map(|o| o.secure = secure)
    }

    pub fn same_site(self, same_site: SameSite) -> Self {
        self.map(|o| o.same_site = Some(same_site))
    }

    pub fn max_age_seconds(self, seconds: i64) -> Self {
        self.map(|o| o.max_age_seconds = Some(seconds))
    }

    pub fn expires(self, at: OffsetDateTime) -> Self {
        self.map(|o| o.expires = Some(at))
    }

    pub fn document(self, document: Arc<NativeDocument>) -> Self {
        self.map(|o| o.document = Some(document))
    }

    pub fn build(self) -> StorageResult<CookieOptions> {
        let o = &self.inner;
        if let Some(path) = &o.path {
            if !path.starts_with('/') {
                return Err(StorageError::InvalidOptions(format!("cookie path `{path}` must start with `/`")));
            }
        }
        if o.domain.as_deref().is_some_and(str::is_empty) {
            return Err(StorageError::InvalidOptions("cookie domain must not be empty".into()));
        }
        if o.same_site == Some(SameSite::None) && !o.secure {
            return Err(StorageError::InvalidOptions("SameSite=None requires secure".into()));
        }
        Ok(self.inner)
    }
}

/// Adapter over a document's cookies.
pub struct CookieAdapter {
    document: Arc<NativeDocument>,
    options: CookieOptions,
}

impl CookieAdapter {
    pub fn new(document: Arc<NativeDocument>, options: CookieOptions) -> Self {
        Self { document, options }
    }

    /// Decoded `(name, value)` pairs; a repeated name keeps its first position
    /// and its last value.
    fn read_all(&self) -> Vec<(String, String)> {
        let mut entries: Vec<(String, String)> = Vec::new();
        for (name, value) in parse_cookie_string(&self.document.cookie()) {
            let (name, value) = (decode_component(&name), decode_component(&value));
            match entries.iter_mut().find(|(n, _)| *n == name) {
                Some(entry) => entry.1 = value,
                None => entries.push((name, value)),
            }
        }
        entries
    }

    fn serialize_entry(&self, key: &str, value: &str, removing: bool) -> StorageResult<String> {
        let o = &self.options;
        let mut directives = vec![
            format!("{}={}", encode_component(key), encode_component(value)),
            format!("path={}", o.path.as_deref().unwrap_or("/")),
        ];
        if let Some(domain) = &o.domain {
            directives.push(format!("domain={domain}"));
        }
        if removing {
            directives.push("max-age=0".to_string());
        } else {
            if let Some(max_age) = o.max_age_seconds {
                directives.push(format!("max-age={max_age}"));
            }
            if let Some(expires) = o.expires {
                directives.push(format!("expires={}", format_cookie_date(expires)?));
            }
        }
        if o.secure {
            directives.push("Secure".to_string());
        }
        if let Some(same_site) = o.same_site {
            directives.push(format!("SameSite={same_site}"));
        }
        Ok(directives.join("; "))
    }
}

impl fmt::Debug for CookieAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CookieAdapter")
            .field("document", &self.document.url().as_str())
            .field("path", &self.options.path)
            .finish()
    }
}

/// Creates a cookie adapter, or a `"cookie-fallback"` memory adapter when there
/// is no document.
pub fn create_cookie_adapter(options: CookieOptions) -> Arc<dyn StorageAdapter> {
    let document = options
        .document
        .clone()
        .or_else(|| ambient_window().and_then(|w| w.document()));

    match document {
        Some(document) => Arc::new(CookieAdapter::new(document, options)),
        None => {
            log::debug!("no document, using memory adapter `{}`", COOKIE_FALLBACK_ID);
            Arc::new(MemoryAdapter::new(COOKIE_FALLBACK_ID))
        }
    }
}

#[async_trait]
impl StorageAdapter for CookieAdapter {
    fn id(&self) -> &str {
        COOKIE_STORAGE_ID
    }

    async fn read(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.read_all().into_iter().find(|(name, _)| name == key).map(|(_, value)| value))
    }

    async fn write(&self, key: &str, value: &str) -> StorageResult<()> {
        let entry = self.serialize_entry(key, value, false)?;
        self.document.set_cookie(&entry);
        Ok(())
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        let entry = self.serialize_entry(key, "", true)?;
        self.document.set_cookie(&entry);
        Ok(())
    }

    async fn clear(&self) -> StorageResult<()> {
        let keys = self.keys().await?;
        try_join_all(keys.iter().map(|key| self.remove(key))).await?;
        Ok(())
    }

    async fn keys(&self) -> StorageResult<Vec<String>> {
        Ok(self.read_all().into_iter().map(|(name, _)| name).collect())
    }
}
