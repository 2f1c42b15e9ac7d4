use anyhow::{bail, Context, Result};
use std::fmt;
use url::Url;

/// Default path of the real-time endpoint on the serving host
pub const DEFAULT_PATH: &str = "/websocket";

/// WebSocket endpoint derived from the page origin
///
/// The secure variant (`wss`) is chosen iff the origin itself is served over
/// `https`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    url: Url,
}

impl Endpoint {
    /// Build the endpoint for `path` on the host of `origin`
    pub fn from_origin(origin: &str, path: &str) -> Result<Self> {
        let mut url =
            Url::parse(origin).with_context(|| format!("Invalid origin '{}'", origin))?;

        let scheme = match url.scheme() {
            "https" | "wss" => "wss",
            "http" | "ws" => "ws",
            other => bail!("Unsupported origin scheme '{}' in '{}'", other, origin),
        };

        if url.host_str().is_none() {
            bail!("Origin '{}' has no host", origin);
        }

        // http, https, ws and wss are all "special" schemes, so the swap is allowed
        if url.set_scheme(scheme).is_err() {
            bail!("Cannot switch origin '{}' to scheme '{}'", origin, scheme);
        }

        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{}", path)
        };
        url.set_path(&path);
        url.set_query(None);
        url.set_fragment(None);

        Ok(Self { url })
    }

    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }

    pub fn is_secure(&self) -> bool {
        self.url.scheme() == "wss"
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.url.as_str())
    }
}
