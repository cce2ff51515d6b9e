use std::fmt;
use std::sync::Arc;

use url::Url;

use crate::errors::{StorageError, StorageResult};
use crate::intercept::Interceptable;
use crate::native::cookies::{CookieJar, CookieOutcome};

/// A document as far as cookies are concerned: its URL, its cookie jar and the
/// interceptable `document.cookie` accessor pair.
pub struct NativeDocument {
    url: Url,
    jar: CookieJar,
    cookie_get: Interceptable<(), String>,
    cookie_set: Interceptable<String, ()>,
}

impl NativeDocument {
    pub fn new(url: &str) -> StorageResult<Arc<Self>> {
        let url = Url::parse(url)
            .map_err(|e| StorageError::InvalidOptions(format!("invalid document url `{url}`: {e}")))?;
        Ok(Self::from_url(url))
    }

    pub fn from_url(url: Url) -> Arc<Self> {
        Arc::new(Self {
            url,
            jar: CookieJar::new(),
            cookie_get: Interceptable::new("cookie.get"),
            cookie_set: Interceptable::new("cookie.set"),
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn jar(&self) -> &CookieJar {
        &self.jar
    }

    /// `document.cookie` (getter).
    pub fn cookie(&self) -> String {
        self.cookie_get.invoke((), &|_: ()| self.raw_cookie())
    }

    /// `document.cookie = value` (setter).
    pub fn set_cookie(&self, value: &str) {
        self.cookie_set.invoke(value.to_string(), &|v: String| {
            self.raw_set_cookie(&v);
        })
    }

    /// The getter's real behavior, without interceptors.
    pub fn raw_cookie(&self) -> String {
        self.jar.cookie_string(&self.url)
    }

    /// The setter's real behavior, without interceptors.
    pub fn raw_set_cookie(&self, value: &str) -> CookieOutcome {
        self.jar.set_from_script(&self.url, value)
    }

    pub fn cookie_get_slot(&self) -> &Interceptable<(), String> {
        &self.cookie_get
    }

    pub fn cookie_set_slot(&self) -> &Interceptable<String, ()> {
        &self.cookie_set
    }

    /// Makes the `cookie` accessor non-interceptable.
    pub fn seal(&self) {
        self.cookie_get.seal();
        self.cookie_set.seal();
    }
}

impl fmt::Debug for NativeDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeDocument")
            .field("url", &self.url.as_str())
            .field("cookies", &self.jar.len())
            .field("cookie_set", &self.cookie_set)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intercept::{intercept, wrapper};
    use std::sync::Mutex;

    #[test]
    fn cookie_accessor_reads_and_writes_the_jar() {
        let doc = NativeDocument::new("https://example.com/").unwrap();
        doc.set_cookie("a=1");
        doc.set_cookie("b=2");
        assert_eq!(doc.cookie(), "a=1; b=2");

        doc.set_cookie("a=; max-age=0");
        assert_eq!(doc.cookie(), "b=2");
    }

    #[test]
    fn far_future_max_age_is_stored() {
        let doc = NativeDocument::new("https://example.com/").unwrap();
        doc.set_cookie("a=1; max-age=1000000000000");
        assert_eq!(doc.cookie(), "a=1");
    }

    #[test]
    fn invalid_url_is_rejected() {
        assert!(matches!(
            NativeDocument::new("not a url"),
            Err(StorageError::InvalidOptions(_))
        ));
    }

    #[test]
    fn setter_interceptor_wraps_real_setter() {
        let doc = NativeDocument::new("https://example.com/").unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let s = seen.clone();
        let d = Arc::downgrade(&doc);
        let hook = intercept(
            &doc,
            NativeDocument::cookie_set_slot,
            wrapper(move |raw: String, next: &dyn Fn(String)| {
                next(raw);
                if let Some(doc) = d.upgrade() {
                    s.lock().unwrap().push(doc.raw_cookie());
                }
            }),
        )
        .unwrap();

        doc.set_cookie("x=1");
        assert_eq!(*seen.lock().unwrap(), vec!["x=1".to_string()]);

        hook.restore();
        doc.set_cookie("y=2");
        assert_eq!(seen.lock().unwrap().len(), 1);
        assert_eq!(doc.cookie(), "x=1; y=2");
    }

    #[test]
    fn sealed_accessor_refuses_interception() {
        let doc = NativeDocument::new("https://example.com/").unwrap();
        doc.seal();
        let hook = intercept(
            &doc,
            NativeDocument::cookie_get_slot,
            wrapper(|_: (), _next: &dyn Fn(()) -> String| String::new()),
        );
        assert!(hook.is_none());
    }
}
