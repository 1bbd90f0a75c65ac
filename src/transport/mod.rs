//! Outbound transports and the fallback chain that tries them in order.

pub mod http;

use std::fmt;
use std::sync::Arc;
use tracing::debug;

pub use http::{http_chain, BeaconTransport, HttpSettings, PixelTransport, XhrTransport};

/// Transport tiers, listed in fallback order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Beacon,
    Pixel,
    Xhr,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Beacon => write!(f, "beacon"),
            TransportKind::Pixel => write!(f, "pixel"),
            TransportKind::Xhr => write!(f, "xhr"),
        }
    }
}

/// Errors a single transport tier can report
#[derive(Debug, Clone, PartialEq)]
pub enum SendError {
    /// The tier cannot carry this request (disabled, URL too long, ...)
    Unavailable(String),
    Timeout,
    Http { status: u16, endpoint: String },
    Network(String),
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendError::Unavailable(reason) => write!(f, "transport unavailable: {}", reason),
            SendError::Timeout => write!(f, "request timed out"),
            SendError::Http { status, endpoint } => {
                write!(f, "HTTP {} from {}", status, endpoint)
            }
            SendError::Network(msg) => write!(f, "network error: {}", msg),
        }
    }
}

impl From<reqwest::Error> for SendError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            SendError::Timeout
        } else {
            SendError::Network(e.to_string())
        }
    }
}

/// One outbound request: target URL plus form-encoded body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundRequest {
    pub url: String,
    pub body: String,
    /// Content type for transports that POST the body.
    pub content_type: &'static str,
}

impl OutboundRequest {
    pub fn form(url: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            body: body.into(),
            content_type: "application/x-www-form-urlencoded",
        }
    }

    pub fn xml(url: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            body: body.into(),
            content_type: "text/xml",
        }
    }

    /// The body carried as query parameters, as a tracking pixel would.
    pub fn pixel_url(&self) -> String {
        if self.body.is_empty() {
            return self.url.clone();
        }
        let sep = if self.url.contains('?') { '&' } else { '?' };
        format!("{}{}{}", self.url, sep, self.body)
    }
}

/// A single delivery tier.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    async fn send(&self, request: &OutboundRequest) -> Result<(), SendError>;
}

/// Tries each transport in order until one dispatches the request.
#[derive(Clone, Default)]
pub struct FallbackChain {
    tiers: Vec<Arc<dyn Transport>>,
}

impl FallbackChain {
    pub fn new(tiers: Vec<Arc<dyn Transport>>) -> Self {
        Self { tiers }
    }

    /// Same chain restricted to the given tiers, keeping the order.
    pub fn only(&self, kinds: &[TransportKind]) -> Self {
        Self {
            tiers: self
                .tiers
                .iter()
                .filter(|t| kinds.contains(&t.kind()))
                .cloned()
                .collect(),
        }
    }

    pub fn kinds(&self) -> Vec<TransportKind> {
        self.tiers.iter().map(|t| t.kind()).collect()
    }

    /// Dispatch through the first tier that accepts the request.
    ///
    /// Returns the tier that took it, or the last error when all tiers failed.
    pub async fn dispatch(&self, request: &OutboundRequest) -> Result<TransportKind, SendError> {
        let mut last_error = SendError::Unavailable("no transports configured".to_string());

        for tier in &self.tiers {
            match tier.send(request).await {
                Ok(()) => return Ok(tier.kind()),
                Err(e) => {
                    debug!(tier = %tier.kind(), error = %e, "transport failed, falling back");
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Scripted {
        kind: TransportKind,
        result: Result<(), SendError>,
        calls: Mutex<Vec<OutboundRequest>>,
    }

    impl Scripted {
        fn new(kind: TransportKind, result: Result<(), SendError>) -> Arc<Self> {
            Arc::new(Self {
                kind,
                result,
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait::async_trait]
    impl Transport for Scripted {
        fn kind(&self) -> TransportKind {
            self.kind
        }

        async fn send(&self, request: &OutboundRequest) -> Result<(), SendError> {
            self.calls.lock().unwrap().push(request.clone());
            self.result.clone()
        }
    }

    fn request() -> OutboundRequest {
        OutboundRequest::form("http://x/l?IG=a", "TYPE=Event.ClientInst&DATA=%5B%5D")
    }

    #[tokio::test]
    async fn first_working_tier_wins() {
        let beacon = Scripted::new(TransportKind::Beacon, Ok(()));
        let pixel = Scripted::new(TransportKind::Pixel, Ok(()));
        let chain = FallbackChain::new(vec![beacon.clone(), pixel.clone()]);

        assert_eq!(chain.dispatch(&request()).await, Ok(TransportKind::Beacon));
        assert_eq!(beacon.calls.lock().unwrap().len(), 1);
        assert!(pixel.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unavailable_and_failed_tiers_fall_through() {
        let beacon = Scripted::new(
            TransportKind::Beacon,
            Err(SendError::Unavailable("disabled".into())),
        );
        let pixel = Scripted::new(TransportKind::Pixel, Err(SendError::Timeout));
        let xhr = Scripted::new(TransportKind::Xhr, Ok(()));
        let chain = FallbackChain::new(vec![beacon, pixel.clone(), xhr.clone()]);

        assert_eq!(chain.dispatch(&request()).await, Ok(TransportKind::Xhr));
        assert_eq!(pixel.calls.lock().unwrap().len(), 1);
        assert_eq!(xhr.calls.lock().unwrap()[0], request());
    }

    #[tokio::test]
    async fn all_tiers_failing_reports_last_error() {
        let beacon = Scripted::new(TransportKind::Beacon, Err(SendError::Timeout));
        let xhr = Scripted::new(
            TransportKind::Xhr,
            Err(SendError::Http {
                status: 500,
                endpoint: "x".into(),
            }),
        );
        let chain = FallbackChain::new(vec![beacon, xhr]);

        let err = chain.dispatch(&request()).await.unwrap_err();
        assert_eq!(err.to_string(), "HTTP 500 from x");
    }

    #[tokio::test]
    async fn empty_chain_is_unavailable() {
        let err = FallbackChain::default().dispatch(&request()).await.unwrap_err();
        assert!(matches!(err, SendError::Unavailable(_)));
    }

    #[test]
    fn only_filters_and_keeps_order() {
        let chain = FallbackChain::new(vec![
            Scripted::new(TransportKind::Beacon, Ok(())),
            Scripted::new(TransportKind::Pixel, Ok(())),
            Scripted::new(TransportKind::Xhr, Ok(())),
        ]);
        assert_eq!(
            chain.only(&[TransportKind::Xhr, TransportKind::Beacon]).kinds(),
            vec![TransportKind::Beacon, TransportKind::Xhr]
        );
    }

    #[test]
    fn pixel_url_appends_body_as_query() {
        assert_eq!(
            request().pixel_url(),
            "http://x/l?IG=a&TYPE=Event.ClientInst&DATA=%5B%5D"
        );
        let bare = OutboundRequest::form("http://x/l", "a=b");
        assert_eq!(bare.pixel_url(), "http://x/l?a=b");
    }
}
