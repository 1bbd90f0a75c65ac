//! HTTP implementations of the three delivery tiers.

use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::{FallbackChain, OutboundRequest, SendError, Transport, TransportKind};

/// Settings shared by the HTTP tiers.
#[derive(Clone, Debug)]
pub struct HttpSettings {
    pub timeout: Duration,
    pub beacon_enabled: bool,
    pub pixel_max_url_len: usize,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            beacon_enabled: false,
            pixel_max_url_len: 2048,
        }
    }
}

/// Build the standard beacon → pixel → XHR chain over one HTTP client.
/// Returns an error if the HTTP client fails to build (e.g., TLS configuration issues).
pub fn http_chain(settings: &HttpSettings) -> Result<FallbackChain, String> {
    let client = Client::builder()
        .timeout(settings.timeout)
        .build()
        .map_err(|e| format!("failed to build HTTP client: {}", e))?;

    let tiers: Vec<Arc<dyn Transport>> = vec![
        Arc::new(BeaconTransport::new(client.clone(), settings.beacon_enabled)),
        Arc::new(PixelTransport::new(client.clone(), settings.pixel_max_url_len)),
        Arc::new(XhrTransport::new(client)),
    ];
    Ok(FallbackChain::new(tiers))
}

/// Fire-and-forget POST. The response status is not inspected: once the
/// request has been handed to the server it counts as dispatched.
pub struct BeaconTransport {
    client: Client,
    enabled: bool,
}

impl BeaconTransport {
    pub fn new(client: Client, enabled: bool) -> Self {
        Self { client, enabled }
    }
}

#[async_trait::async_trait]
impl Transport for BeaconTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Beacon
    }

    async fn send(&self, request: &OutboundRequest) -> Result<(), SendError> {
        if !self.enabled {
            return Err(SendError::Unavailable("beacon disabled".to_string()));
        }

        let response = self
            .client
            .post(&request.url)
            .header("Content-Type", "text/plain;charset=UTF-8")
            .body(request.body.clone())
            .send()
            .await?;

        debug!(endpoint = %request.url, status = response.status().as_u16(), "beacon dispatched");
        Ok(())
    }
}

/// GET with the body carried in the query string, like an image request.
pub struct PixelTransport {
    client: Client,
    max_url_len: usize,
}

impl PixelTransport {
    pub fn new(client: Client, max_url_len: usize) -> Self {
        Self {
            client,
            max_url_len,
        }
    }
}

#[async_trait::async_trait]
impl Transport for PixelTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Pixel
    }

    async fn send(&self, request: &OutboundRequest) -> Result<(), SendError> {
        let url = request.pixel_url();
        if url.len() > self.max_url_len {
            return Err(SendError::Unavailable(format!(
                "pixel URL is {} bytes, limit {}",
                url.len(),
                self.max_url_len
            )));
        }

        let response = self.client.get(&url).send().await?;
        check_status(response.status().as_u16(), &request.url)
    }
}

/// Asynchronous POST of the request body.
pub struct XhrTransport {
    client: Client,
}

impl XhrTransport {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl Transport for XhrTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Xhr
    }

    async fn send(&self, request: &OutboundRequest) -> Result<(), SendError> {
        let response = self
            .client
            .post(&request.url)
            .header("Content-Type", request.content_type)
            .body(request.body.clone())
            .send()
            .await?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let resp_body = response
                .text()
                .await
                .unwrap_or_else(|_| "(failed to read body)".to_string());
            warn!(
                endpoint = %request.url,
                status,
                response_body = %resp_body,
                "logging endpoint returned error status"
            );
        }
        check_status(status, &request.url)
    }
}

fn check_status(status: u16, endpoint: &str) -> Result<(), SendError> {
    if (200..300).contains(&status) {
        Ok(())
    } else {
        Err(SendError::Http {
            status,
            endpoint: endpoint.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_chain_order() {
        let chain = http_chain(&HttpSettings::default()).expect("failed to create chain");
        assert_eq!(
            chain.kinds(),
            vec![TransportKind::Beacon, TransportKind::Pixel, TransportKind::Xhr]
        );
    }

    #[tokio::test]
    async fn disabled_beacon_is_unavailable() {
        let beacon = BeaconTransport::new(Client::new(), false);
        let request = OutboundRequest::form("http://127.0.0.1:9/l", "a=b");
        let err = beacon.send(&request).await.unwrap_err();
        assert!(matches!(err, SendError::Unavailable(_)));
    }

    #[tokio::test]
    async fn pixel_rejects_long_urls_without_sending() {
        let pixel = PixelTransport::new(Client::new(), 32);
        let request = OutboundRequest::form("http://127.0.0.1:9/l", "x".repeat(64));
        let err = pixel.send(&request).await.unwrap_err();
        assert!(matches!(err, SendError::Unavailable(_)));
    }

    #[test]
    fn check_status_classification() {
        assert!(check_status(200, "x").is_ok());
        assert!(check_status(204, "x").is_ok());
        assert_eq!(
            check_status(503, "x"),
            Err(SendError::Http {
                status: 503,
                endpoint: "x".into()
            })
        );
    }
}
