use std::sync::Arc;

use time::OffsetDateTime;

use crate::emitter::ChangeEmitter;
use crate::hijack::{install_all, HijackHandle};
use crate::intercept::{intercept, wrapper, MethodHook};
use crate::native::cookies::{parse_cookie_string, CookieAssignment};
use crate::native::NativeDocument;
use crate::types::{StorageChange, WILDCARD_KEY};

/// Source of the changes emitted by the cookie hijack.
pub const COOKIE_SOURCE: &str = "cookie";

/// Hijacks the `document.cookie` setter (and the getter when `observe_reads` is
/// set).
///
/// An assignment that expires the cookie is reported as a removal. Anything
/// else is reported with the value the jar holds after the assignment, or as a
/// removal when the jar holds nothing (the assignment was rejected). Strings
/// that are not `name=value` assignments pass through unreported.
pub fn hijack_cookie(document: &Arc<NativeDocument>, emitter: &ChangeEmitter, observe_reads: bool) -> Option<HijackHandle> {
    let mut installs: Vec<Box<dyn FnOnce() -> Option<MethodHook> + '_>> =
        vec![Box::new(|| hook_setter(document, emitter))];
    if observe_reads {
        installs.push(Box::new(|| hook_getter(document, emitter)));
    }

    match install_all(installs) {
        Some(hooks) => Some(HijackHandle::from_hooks(COOKIE_SOURCE, hooks)),
        None => {
            log::debug!("document.cookie of {} cannot be hijacked", document.url());
            None
        }
    }
}

fn hook_setter(document: &Arc<NativeDocument>, emitter: &ChangeEmitter) -> Option<MethodHook> {
    let weak = Arc::downgrade(document);
    let emitter = emitter.clone();
    intercept(
        document,
        NativeDocument::cookie_set_slot,
        wrapper(move |raw: String, next: &dyn Fn(String)| {
            let assignment = CookieAssignment::parse(&raw);
            next(raw);

            let (Some(assignment), Some(document)) = (assignment, weak.upgrade()) else {
                return;
            };
            let change = if assignment.is_removal(OffsetDateTime::now_utc()) {
                StorageChange::remove(assignment.name, COOKIE_SOURCE)
            } else {
                match current_value(&document, &assignment.name) {
                    Some(value) => StorageChange::write(assignment.name, value, COOKIE_SOURCE),
                    None => StorageChange::remove(assignment.name, COOKIE_SOURCE),
                }
            };
            emitter.emit(&change);
        }),
    )
}

fn hook_getter(document: &Arc<NativeDocument>, emitter: &ChangeEmitter) -> Option<MethodHook> {
    let emitter = emitter.clone();
    intercept(
        document,
        NativeDocument::cookie_get_slot,
        wrapper(move |_: (), next: &dyn Fn(()) -> String| {
            let cookies = next(());
            emitter.emit(&StorageChange::read(WILDCARD_KEY, Some(cookies.clone()), COOKIE_SOURCE));
            cookies
        }),
    )
}

/// The value of `name` as the getter reports it now. Empty values count as absent.
fn current_value(document: &NativeDocument, name: &str) -> Option<String> {
    parse_cookie_string(&document.raw_cookie())
        .into_iter()
        .filter(|(n, _)| n == name)
        .last()
        .map(|(_, value)| value)
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn setup(url: &str, observe_reads: bool) -> (Arc<NativeDocument>, HijackHandle, Arc<Mutex<Vec<String>>>) {
        let document = NativeDocument::new(url).unwrap();
        let emitter = ChangeEmitter::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let l = log.clone();
        emitter.subscribe_all(move |c: &StorageChange| {
            l.lock()
                .unwrap()
                .push(format!("{}:{}:{}", c.kind, c.key, c.value.as_deref().unwrap_or("")));
        });
        let handle = hijack_cookie(&document, &emitter, observe_reads).unwrap();
        (document, handle, log)
    }

    #[test]
    fn assignments_become_changes() {
        let (document, handle, log) = setup("https://example.com/", false);
        assert_eq!(handle.source(), "cookie");

        document.set_cookie("test=value");
        document.set_cookie("test=other; path=/");
        document.set_cookie("test=; max-age=0");
        document.set_cookie("garbage");

        assert_eq!(
            *log.lock().unwrap(),
            vec!["write:test:value", "write:test:other", "remove:test:"]
        );
    }

    #[test]
    fn past_and_future_expires() {
        let (document, _handle, log) = setup("https://example.com/", false);
        document.set_cookie("a=1; expires=Fri, 01 Jan 2100 00:00:00 GMT");
        document.set_cookie("a=1; expires=Thu, 01 Jan 1970 00:00:00 GMT");
        assert_eq!(*log.lock().unwrap(), vec!["write:a:1", "remove:a:"]);
        assert!(document.jar().is_empty());
    }

    #[test]
    fn far_future_max_age_is_a_write() {
        let (document, _handle, log) = setup("https://example.com/", false);
        document.set_cookie("a=1; max-age=1000000000000");
        assert_eq!(*log.lock().unwrap(), vec!["write:a:1"]);
    }

    #[test]
    fn rejected_assignment_reports_removal() {
        let (document, _handle, log) = setup("http://example.com/", false);
        document.set_cookie("token=abc; Secure");
        assert_eq!(*log.lock().unwrap(), vec!["remove:token:"]);
    }

    #[test]
    fn getter_reports_whole_cookie_string() {
        let (document, _handle, log) = setup("https://example.com/", true);
        document.set_cookie("test=value");
        let seen = document.cookie();
        assert_eq!(seen, "test=value");
        assert_eq!(*log.lock().unwrap(), vec!["write:test:value", "read:*:test=value"]);
    }

    #[test]
    fn restore_and_sealed_document() {
        let (document, handle, log) = setup("https://example.com/", true);
        handle.restore();
        document.set_cookie("a=1");
        let _ = document.cookie();
        assert!(log.lock().unwrap().is_empty());

        let sealed = NativeDocument::new("https://example.com/").unwrap();
        sealed.seal();
        assert!(hijack_cookie(&sealed, &ChangeEmitter::new(), false).is_none());
    }
}
