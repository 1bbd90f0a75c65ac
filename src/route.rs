//! Route keys and per-route endpoint resolution.

use std::fmt;

/// Batch type for ordinary instrumentation batches.
pub const CLIENT_INST_TYPE: &str = "Event.ClientInst";
/// Batch type used when a batch carries a filter flare event.
pub const FILTER_FLARE_TYPE: &str = "Event.FilterFlare";

const FILTER_FLARE_MARKER: &str = "CI.FilterFlare";
const DATA_PARAM_OVERHEAD: &str = "&TYPE=Event.ClientInst&DATA=";

/// Identifies the impression group a batch belongs to.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RouteKey(String);

impl RouteKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RouteKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Logging endpoint template.
///
/// `log_url` embeds the default route key; batches for other routes are sent
/// to the same URL with that key substituted.
#[derive(Clone, Debug)]
pub struct Endpoint {
    origin: String,
    log_url: String,
    default_route: RouteKey,
}

impl Endpoint {
    pub fn new(origin: impl Into<String>, log_url: impl Into<String>, default_route: RouteKey) -> Self {
        Self {
            origin: origin.into(),
            log_url: log_url.into(),
            default_route,
        }
    }

    pub fn default_route(&self) -> &RouteKey {
        &self.default_route
    }

    /// Full request URL for a route.
    pub fn url_for(&self, route: &RouteKey) -> String {
        if route == &self.default_route || self.default_route.as_str().is_empty() {
            format!("{}{}", self.origin, self.log_url)
        } else {
            format!(
                "{}{}",
                self.origin,
                self.log_url
                    .replacen(self.default_route.as_str(), route.as_str(), 1)
            )
        }
    }

    /// Fixed request overhead counted against the batch size bound.
    pub fn base_len(&self, route: &RouteKey) -> usize {
        self.url_for(route).len() + DATA_PARAM_OVERHEAD.len()
    }
}

/// Pick the batch type from the encoded batch contents.
pub fn batch_type(batch: &str) -> &'static str {
    if batch.contains(FILTER_FLARE_MARKER) {
        FILTER_FLARE_TYPE
    } else {
        CLIENT_INST_TYPE
    }
}

/// Request body for an encoded batch: `TYPE=..&DATA=[..]` with URL-encoded brackets.
pub fn batch_body(batch: &str) -> String {
    format!(
        "TYPE={}&DATA={}{}{}",
        batch_type(batch),
        urlencoding::encode("["),
        batch,
        urlencoding::encode("]")
    )
}

/// Derive the instrumentation origin from the page's scheme and host.
///
/// The registrable domain is the last two host labels. Secure pages keep
/// their first host label as subdomain, others are sent to `a4`. Returns
/// `None` for single-label hosts.
pub fn derive_origin(scheme: &str, host: &str) -> Option<String> {
    let mut labels = host.rsplitn(3, '.');
    let tld = labels.next()?;
    let name = labels.next().filter(|n| !n.is_empty())?;
    let domain = format!("{}.{}", name, tld);

    let scheme = scheme.trim_end_matches(':');
    let subdomain = if scheme == "https" {
        host.split('.').next().unwrap_or(host)
    } else {
        "a4"
    };
    Some(format!("{}://{}.{}", scheme, subdomain, domain))
}

/// [`derive_origin`] for a full page URL.
pub fn derive_origin_from_url(page_url: &str) -> Option<String> {
    let url = reqwest::Url::parse(page_url).ok()?;
    derive_origin(url.scheme(), url.host_str()?)
}
