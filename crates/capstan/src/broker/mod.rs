//! Cross-context intent broker: correlates one request from the embedding
//! side to its asynchronous response from the confirmation surface.
//!
//! The two sides live in independent browsing contexts, so everything
//! crossing between them is modeled as a message. Exactly one request may be
//! in flight per broker; the reference implementation silently overwrote the
//! pending slot, which is tightened here into an explicit rejection.

pub mod callback;
pub mod context;
pub mod responder;

use crate::{
    config::WindowSettings,
    errors::{CapstanError, ErrorPayload},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::sync::oneshot;
use tracing::{debug, warn};
use uuid::Uuid;

/// What travels back from the confirmation surface: either the raw result
/// fields or a rejection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ResponsePayload {
    Error { error: ErrorPayload },
    Fields(BTreeMap<String, Value>),
}

/// A validated intent request, immutable once dispatched.
#[derive(Debug, Clone)]
pub struct IntentRequest {
    pub intent: String,
    /// Registry params plus transport fields (`callback`, `network`,
    /// `horizon`, `prepare`, `pubkey`, `demo_mode`).
    pub params: BTreeMap<String, String>,
    pub app_name: String,
    pub app_description: String,
}

impl IntentRequest {
    pub fn callback(&self) -> Option<&str> {
        self.params.get("callback").map(String::as_str)
    }

    /// Serialize into the confirmation-surface query string.
    pub fn to_query(&self) -> String {
        let mut pairs: Vec<(&str, &str)> = vec![("intent", self.intent.as_str())];
        for (k, v) in &self.params {
            pairs.push((k.as_str(), v.as_str()));
        }
        pairs.push(("app_name", self.app_name.as_str()));
        pairs.push(("app_description", self.app_description.as_str()));
        callback::serialize_params(pairs)
    }
}

/// Where the confirmation surface lands on screen: fixed-size, centered over
/// the opener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceGeometry {
    pub width: u32,
    pub height: u32,
    pub left: i32,
    pub top: i32,
}

#[derive(Debug, Clone, Copy)]
pub struct ScreenInfo {
    pub width: u32,
    pub height: u32,
    pub left: i32,
    pub top: i32,
}

impl SurfaceGeometry {
    pub fn centered(window: WindowSettings, screen: ScreenInfo) -> Self {
        let left = (i64::from(screen.width) / 2 - i64::from(window.width) / 2)
            + i64::from(screen.left);
        let top = (i64::from(screen.height) / 2 - i64::from(window.height) / 2)
            + i64::from(screen.top);
        Self {
            width: window.width,
            height: window.height,
            left: i32::try_from(left).unwrap_or(0),
            top: i32::try_from(top).unwrap_or(0),
        }
    }
}

/// The embedding side's handle on the confirmation surface: open it, close
/// it, or fall back to a direct user-facing alert.
pub trait SurfaceHandle: Send + Sync {
    fn open(&self, url: &str, geometry: SurfaceGeometry) -> Result<(), CapstanError>;
    fn close(&self);
    fn alert(&self, message: &str);
}

struct PendingSlot {
    id: Uuid,
    tx: oneshot::Sender<Result<BTreeMap<String, Value>, ErrorPayload>>,
}

type SharedPending = Arc<Mutex<Option<PendingSlot>>>;

pub struct Broker {
    confirm_url: String,
    window: WindowSettings,
    screen: ScreenInfo,
    expected_origin: Option<String>,
    response_timeout: Option<Duration>,
    surface: Arc<dyn SurfaceHandle>,
    pending: SharedPending,
}

impl Broker {
    pub fn new(
        confirm_url: String,
        window: WindowSettings,
        screen: ScreenInfo,
        surface: Arc<dyn SurfaceHandle>,
    ) -> Self {
        Self {
            confirm_url,
            window,
            screen,
            expected_origin: None,
            response_timeout: None,
            surface,
            pending: Arc::new(Mutex::new(None)),
        }
    }

    /// Reject surface messages not originating from this origin.
    #[must_use]
    pub fn with_expected_origin(mut self, origin: impl Into<String>) -> Self {
        self.expected_origin = Some(origin.into());
        self
    }

    /// Bound how long a pending request may wait for its response.
    #[must_use]
    pub const fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = Some(timeout);
        self
    }

    pub fn has_pending(&self) -> bool {
        self.pending.lock().map_or(false, |p| p.is_some())
    }

    /// Open the confirmation surface for `request` and register the single
    /// pending correlation slot. Fails if another request is in flight.
    pub fn open(&self, request: &IntentRequest) -> Result<PendingIntent, CapstanError> {
        let mut slot = self
            .pending
            .lock()
            .map_err(|_e| CapstanError::Generic)?;
        if slot.is_some() {
            return Err(CapstanError::RequestPending);
        }

        let url = format!("{}?{}", self.confirm_url, request.to_query());
        let geometry = SurfaceGeometry::centered(self.window, self.screen);
        self.surface.open(&url, geometry)?;

        let id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        *slot = Some(PendingSlot { id, tx });
        drop(slot);

        debug!(%id, intent = %request.intent, "intent request dispatched");
        Ok(PendingIntent {
            id,
            rx,
            timeout: self.response_timeout,
            pending: Arc::clone(&self.pending),
        })
    }

    /// One-shot message handler for the direct cross-window delivery path.
    ///
    /// Returns `Ok(true)` when the pending slot was resolved, `Ok(false)`
    /// when the message was ignored (no pending request, or origin
    /// mismatch), and `ParentContextClosed` when the opener side already
    /// gave up on the response.
    pub fn deliver_message(
        &self,
        origin: Option<&str>,
        payload: ResponsePayload,
    ) -> Result<bool, CapstanError> {
        if let Some(expected) = &self.expected_origin {
            if origin != Some(expected.as_str()) {
                warn!(?origin, expected = %expected, "ignoring message from unexpected origin");
                return Ok(false);
            }
        }

        let taken = {
            let mut slot = self
                .pending
                .lock()
                .map_err(|_e| CapstanError::Generic)?;
            slot.take()
        };
        let Some(PendingSlot { id, tx }) = taken else {
            return Ok(false);
        };

        let outcome = match payload {
            ResponsePayload::Error { error } => tx.send(Err(error)),
            ResponsePayload::Fields(fields) => tx.send(Ok(fields)),
        };
        self.surface.close();

        if outcome.is_err() {
            return Err(CapstanError::ParentContextClosed);
        }
        debug!(%id, "intent response delivered");
        Ok(true)
    }

    /// Reject the pending request, e.g. when the surface was closed without
    /// completing. No-op if nothing is pending.
    pub fn reject_pending(&self, error: &CapstanError) -> Result<(), CapstanError> {
        let taken = {
            let mut slot = self
                .pending
                .lock()
                .map_err(|_e| CapstanError::Generic)?;
            slot.take()
        };
        if let Some(PendingSlot { tx, .. }) = taken {
            drop(tx.send(Err(error.into())));
        }
        Ok(())
    }
}

/// The caller's half of a dispatched request.
pub struct PendingIntent {
    pub id: Uuid,
    rx: oneshot::Receiver<Result<BTreeMap<String, Value>, ErrorPayload>>,
    timeout: Option<Duration>,
    pending: SharedPending,
}

impl PendingIntent {
    /// Suspend until the confirmation surface responds (or the configured
    /// timeout elapses). Callback-mode requests are never resolved here.
    pub async fn wait(self) -> Result<BTreeMap<String, Value>, ErrorPayload> {
        let received = match self.timeout {
            Some(t) => match tokio::time::timeout(t, self.rx).await {
                Ok(r) => r,
                Err(_elapsed) => {
                    // Clear the slot so the broker accepts the next request.
                    if let Ok(mut slot) = self.pending.lock() {
                        slot.take();
                    }
                    return Err(CapstanError::RequestTimeout.into());
                }
            },
            None => self.rx.await,
        };
        match received {
            Ok(result) => result,
            Err(_closed) => Err(CapstanError::ChannelClosed.into()),
        }
    }
}

/// The confirmation side's view of the opener: post the one-shot response
/// message back, or raise a terminal alert when no channel exists.
pub trait ResponseChannel {
    fn post_message(&self, payload: ResponsePayload) -> Result<(), CapstanError>;
    fn alert(&self, message: &str);
}

/// In-process bridge from the confirmation side to an opener [`Broker`].
pub struct OpenerChannel {
    broker: Arc<Broker>,
    origin: String,
}

impl OpenerChannel {
    pub const fn new(broker: Arc<Broker>, origin: String) -> Self {
        Self { broker, origin }
    }
}

impl ResponseChannel for OpenerChannel {
    fn post_message(&self, payload: ResponsePayload) -> Result<(), CapstanError> {
        self.broker.deliver_message(Some(&self.origin), payload)?;
        Ok(())
    }

    fn alert(&self, message: &str) {
        self.broker.surface.alert(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordingSurface {
        opened: Mutex<Vec<String>>,
        closed: AtomicUsize,
        alerts: Mutex<Vec<String>>,
    }

    impl SurfaceHandle for RecordingSurface {
        fn open(&self, url: &str, _geometry: SurfaceGeometry) -> Result<(), CapstanError> {
            if let Ok(mut o) = self.opened.lock() {
                o.push(url.to_owned());
            }
            Ok(())
        }

        fn close(&self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }

        fn alert(&self, message: &str) {
            if let Ok(mut a) = self.alerts.lock() {
                a.push(message.to_owned());
            }
        }
    }

    fn request() -> IntentRequest {
        let mut params = BTreeMap::new();
        params.insert("message".to_owned(), "hello".to_owned());
        IntentRequest {
            intent: "sign_msg".into(),
            params,
            app_name: "Demo App".into(),
            app_description: "No description".into(),
        }
    }

    fn broker(surface: Arc<RecordingSurface>) -> Broker {
        Broker::new(
            "https://id.capstan.dev/confirm".into(),
            WindowSettings::default(),
            ScreenInfo {
                width: 1920,
                height: 1080,
                left: 0,
                top: 0,
            },
            surface,
        )
        .with_expected_origin("https://id.capstan.dev")
    }

    #[test]
    fn geometry_centers_on_screen() {
        let g = SurfaceGeometry::centered(
            WindowSettings::default(),
            ScreenInfo {
                width: 1920,
                height: 1080,
                left: 100,
                top: 50,
            },
        );
        assert_eq!(g.width, 440);
        assert_eq!(g.height, 600);
        assert_eq!(g.left, 1920 / 2 - 440 / 2 + 100);
        assert_eq!(g.top, 1080 / 2 - 600 / 2 + 50);
    }

    #[test]
    fn request_query_carries_intent_params_and_app_metadata() {
        let q = request().to_query();
        let parsed = callback::parse_query(&q);
        assert_eq!(parsed.get("intent").map(String::as_str), Some("sign_msg"));
        assert_eq!(parsed.get("message").map(String::as_str), Some("hello"));
        assert_eq!(parsed.get("app_name").map(String::as_str), Some("Demo App"));
    }

    #[tokio::test]
    async fn resolves_pending_request_on_message() -> eyre::Result<()> {
        let surface = Arc::new(RecordingSurface::default());
        let broker = broker(Arc::clone(&surface));

        let pending = broker.open(&request()).map_err(|e| eyre::eyre!("{e}"))?;
        assert!(broker.has_pending());

        let mut fields = BTreeMap::new();
        fields.insert("pubkey".to_owned(), json!("abcd"));
        let delivered = broker
            .deliver_message(
                Some("https://id.capstan.dev"),
                ResponsePayload::Fields(fields.clone()),
            )
            .map_err(|e| eyre::eyre!("{e}"))?;
        assert!(delivered);

        let got = pending.wait().await.map_err(|e| eyre::eyre!("{e:?}"))?;
        assert_eq!(got, fields);
        assert!(!broker.has_pending());
        assert_eq!(surface.closed.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[tokio::test]
    async fn second_open_is_rejected_while_pending() -> eyre::Result<()> {
        let surface = Arc::new(RecordingSurface::default());
        let broker = broker(surface);

        let _pending = broker.open(&request()).map_err(|e| eyre::eyre!("{e}"))?;
        let second = broker.open(&request());
        assert!(matches!(second, Err(CapstanError::RequestPending)));
        Ok(())
    }

    #[tokio::test]
    async fn messages_from_wrong_origin_are_ignored() -> eyre::Result<()> {
        let surface = Arc::new(RecordingSurface::default());
        let broker = broker(surface);

        let _pending = broker.open(&request()).map_err(|e| eyre::eyre!("{e}"))?;
        let delivered = broker
            .deliver_message(
                Some("https://evil.example"),
                ResponsePayload::Fields(BTreeMap::new()),
            )
            .map_err(|e| eyre::eyre!("{e}"))?;
        assert!(!delivered);
        assert!(broker.has_pending());
        Ok(())
    }

    #[tokio::test]
    async fn user_rejection_carries_stable_error() -> eyre::Result<()> {
        let surface = Arc::new(RecordingSurface::default());
        let broker = broker(surface);

        let pending = broker.open(&request()).map_err(|e| eyre::eyre!("{e}"))?;
        broker
            .deliver_message(
                Some("https://id.capstan.dev"),
                ResponsePayload::Error {
                    error: CapstanError::RejectedByUser.into(),
                },
            )
            .map_err(|e| eyre::eyre!("{e}"))?;

        let err = pending.wait().await.err();
        assert_eq!(
            err.map(|e| (e.code, e.message)),
            Some((1, "Action was rejected by user".to_owned()))
        );
        Ok(())
    }

    #[tokio::test]
    async fn surface_close_rejects_pending() -> eyre::Result<()> {
        let surface = Arc::new(RecordingSurface::default());
        let broker = broker(surface);

        let pending = broker.open(&request()).map_err(|e| eyre::eyre!("{e}"))?;
        broker
            .reject_pending(&CapstanError::RejectedByUser)
            .map_err(|e| eyre::eyre!("{e}"))?;
        let err = pending.wait().await.err();
        assert_eq!(err.map(|e| e.code), Some(1));
        assert!(!broker.has_pending());
        Ok(())
    }

    #[tokio::test]
    async fn timeout_rejects_and_clears_slot() -> eyre::Result<()> {
        let surface = Arc::new(RecordingSurface::default());
        let broker = broker(surface).with_response_timeout(Duration::from_millis(10));

        let pending = broker.open(&request()).map_err(|e| eyre::eyre!("{e}"))?;
        let err = pending.wait().await.err();
        assert_eq!(err.map(|e| e.code), Some(CapstanError::RequestTimeout.code()));
        assert!(!broker.has_pending());

        // The broker accepts a fresh request afterwards.
        assert!(broker.open(&request()).is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn delivery_after_opener_gave_up_is_parent_closed() -> eyre::Result<()> {
        let surface = Arc::new(RecordingSurface::default());
        let broker = broker(surface);

        let pending = broker.open(&request()).map_err(|e| eyre::eyre!("{e}"))?;
        drop(pending);

        let res = broker.deliver_message(
            Some("https://id.capstan.dev"),
            ResponsePayload::Fields(BTreeMap::new()),
        );
        assert!(matches!(res, Err(CapstanError::ParentContextClosed)));
        Ok(())
    }
}
