use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use lazy_static::lazy_static;

use crate::adapters::{LOCAL_STORAGE_ID, SESSION_STORAGE_ID};
use crate::emitter::ChangeEmitter;
use crate::errors::{StorageError, StorageResult};
use crate::hijack::{hijack_cookie, hijack_indexed_db, hijack_web_storage, HijackHandle};
use crate::listeners::Unsubscribe;
use crate::native::window::resolve_window;
use crate::native::{NativeStorage, Window};
use crate::types::StorageChange;

/// An explicitly supplied storage object to hijack, with the `source` its
/// changes carry.
#[derive(Clone, Debug)]
pub struct StorageAttachment {
    pub storage: Arc<NativeStorage>,
    pub id: String,
}

impl StorageAttachment {
    pub fn new(storage: Arc<NativeStorage>, id: impl Into<String>) -> Self {
        Self { storage, id: id.into() }
    }
}

/// What [`HijackController::start`] attaches to.
///
/// The window toggles all default to `true`. `storages` are attached in
/// addition to the window's objects.
#[derive(Clone, Debug)]
pub struct HijackOptions {
    /// Falls back to the ambient window.
    pub window: Option<Arc<Window>>,
    pub local: bool,
    pub session: bool,
    pub cookie: bool,
    pub indexed_db: bool,
    /// Report `getItem` and cookie getter calls as `read` changes.
    pub observe_reads: bool,
    pub storages: Vec<StorageAttachment>,
}

impl Default for HijackOptions {
    fn default() -> Self {
        Self {
            window: None,
            local: true,
            session: true,
            cookie: true,
            indexed_db: true,
            observe_reads: false,
            storages: Vec::new(),
        }
    }
}

impl HijackOptions {
    pub fn builder() -> HijackOptionsBuilder {
        HijackOptionsBuilder::default()
    }
}

/// Builder for [`HijackOptions`].
#[derive(Clone, Debug, Default)]
pub struct HijackOptionsBuilder {
    inner: HijackOptions,
}

impl HijackOptionsBuilder {
    #[inline]
    fn map(mut self, f: impl FnOnce(&mut HijackOptions)) -> Self {
        f(&mut self.inner);
        self
    }

    pub fn window(self, window: Arc<Window>) -> Self {
        self.map(|o| o.window = Some(window))
    }

    pub fn local(self, enabled: bool) -> Self {
        self.map(|o| o.local = enabled)
    }

    pub fn session(self, enabled: bool) -> Self {
        self.map(|o| o.session = enabled)
    }

    pub fn cookie(self, enabled: bool) -> Self {
        self.map(|o| o.cookie = enabled)
    }

    pub fn indexed_db(self, enabled: bool) -> Self {
        self.map(|o| o.indexed_db = enabled)
    }

    pub fn observe_reads(self, enabled: bool) -> Self {
        self.map(|o| o.observe_reads = enabled)
    }

    pub fn attach(self, storage: Arc<NativeStorage>, id: impl Into<String>) -> Self {
        self.map(|o| o.storages.push(StorageAttachment::new(storage, id)))
    }

    pub fn build(self) -> StorageResult<HijackOptions> {
        if self.inner.storages.iter().any(|a| a.id.is_empty()) {
            return Err(StorageError::InvalidOptions("storage attachment id must not be empty".into()));
        }
        Ok(self.inner)
    }
}

#[derive(Default)]
struct ControllerState {
    started: bool,
    handles: Vec<HijackHandle>,
}

/// Owns a set of hijacks and the emitter they report to.
///
/// Controllers are independent of each other; the free functions of this
/// module drive a process-wide [`default_controller`].
#[derive(Default)]
pub struct HijackController {
    emitter: ChangeEmitter,
    state: Mutex<ControllerState>,
}

impl HijackController {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Installs the hijacks `options` ask for. Does nothing when already
    /// started.
    ///
    /// The controller counts as started once at least one hijack is installed;
    /// with nothing to attach to it stays stopped and a later `start` tries
    /// again.
    pub fn start(&self, options: HijackOptions) -> bool {
        let mut state = self.state();
        if state.started {
            return true;
        }

        let window = resolve_window(options.window.as_ref());
        let mut attachments = options.storages.clone();

        if let Some(window) = &window {
            if options.local {
                if let Some(storage) = window.local_storage() {
                    attachments.push(StorageAttachment::new(storage, LOCAL_STORAGE_ID));
                }
            }
            if options.session {
                if let Some(storage) = window.session_storage() {
                    attachments.push(StorageAttachment::new(storage, SESSION_STORAGE_ID));
                }
            }
            if options.cookie {
                if let Some(document) = window.document() {
                    state
                        .handles
                        .extend(hijack_cookie(&document, &self.emitter, options.observe_reads));
                }
            }
            if options.indexed_db {
                if let Some(factory) = window.indexed_db() {
                    state.handles.extend(hijack_indexed_db(&factory, &self.emitter));
                }
            }
        }

        for attachment in &attachments {
            state.handles.extend(hijack_web_storage(
                &attachment.storage,
                &attachment.id,
                &self.emitter,
                options.observe_reads,
            ));
        }

        state.started = !state.handles.is_empty();
        if state.started {
            log::debug!("native hijack started with {} handle(s)", state.handles.len());
        } else {
            log::debug!("native hijack found nothing to attach to");
        }
        state.started
    }

    /// Restores every hijack in installation order.
    pub fn stop(&self) {
        let handles = {
            let mut state = self.state();
            if !state.started {
                return;
            }
            state.started = false;
            std::mem::take(&mut state.handles)
        };
        for handle in &handles {
            handle.restore();
        }
        log::debug!("native hijack stopped");
    }

    pub fn is_started(&self) -> bool {
        self.state().started
    }

    /// `source` of every installed hijack, in installation order.
    pub fn sources(&self) -> Vec<String> {
        self.state().handles.iter().map(|h| h.source().to_string()).collect()
    }

    /// Subscribes to every change the hijacks report, starting the controller
    /// against the ambient window first if needed.
    pub fn subscribe<F>(&self, listener: F) -> Unsubscribe
    where
        F: Fn(&StorageChange) + Send + Sync + 'static,
    {
        if !self.is_started() {
            self.start(HijackOptions::default());
        }
        self.emitter.subscribe_all(listener)
    }

    pub fn emitter(&self) -> &ChangeEmitter {
        &self.emitter
    }
}

impl fmt::Debug for HijackController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("HijackController")
            .field("started", &state.started)
            .field("handles", &state.handles)
            .field("subscribers", &self.emitter.len())
            .finish()
    }
}

lazy_static! {
    static ref DEFAULT_CONTROLLER: HijackController = {
        let controller = HijackController::new();
        // Attaches to the ambient window if one is installed by now.
        controller.start(HijackOptions::default());
        controller
    };
}

/// The process-wide controller behind [`start_native_hijack`],
/// [`stop_native_hijack`] and [`subscribe_storage_changes`].
pub fn default_controller() -> &'static HijackController {
    &DEFAULT_CONTROLLER
}

pub fn start_native_hijack(options: HijackOptions) -> bool {
    default_controller().start(options)
}

pub fn stop_native_hijack() {
    default_controller().stop()
}

pub fn subscribe_storage_changes<F>(listener: F) -> Unsubscribe
where
    F: Fn(&StorageChange) + Send + Sync + 'static,
{
    default_controller().subscribe(listener)
}
