// Client identity rotation
//
// YouTube answers differently depending on which player client asks
// (mobile app, embedded player, web). Backends that can impersonate several
// clients walk them in configured order until one works.

use std::future::Future;
use tracing::{debug, info, warn};

use super::errors::DownloadError;

const DESKTOP_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// A simulated player client: name understood by the backend plus its headers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    /// Player client name (yt-dlp `player_client` value)
    pub name: String,
    pub user_agent: String,
    pub headers: Vec<(String, String)>,
}

impl ClientIdentity {
    pub fn new(name: &str, user_agent: &str) -> Self {
        Self {
            name: name.to_string(),
            user_agent: user_agent.to_string(),
            headers: Vec::new(),
        }
    }

    pub fn with_header(mut self, key: &str, value: &str) -> Self {
        self.headers.push((key.to_string(), value.to_string()));
        self
    }

    /// Known profiles; unknown names get the desktop user agent
    pub fn named(name: &str) -> Self {
        match name {
            "ios" => Self::new(
                "ios",
                "com.google.ios.youtube/19.45.4 (iPhone16,2; U; CPU iOS 18_1_0 like Mac OS X;)",
            ),
            "android" => Self::new(
                "android",
                "com.google.android.youtube/19.44.38 (Linux; U; Android 11) gzip",
            ),
            "android_vr" => Self::new(
                "android_vr",
                "com.google.android.apps.youtube.vr.oculus/1.60.19 (Linux; U; Android 12L; eureka-user Build/SQ3A.220605.009.A1) gzip",
            ),
            "tv" => Self::new(
                "tv",
                "Mozilla/5.0 (ChromiumStylePlatform) Cobalt/Version",
            ),
            "web_embedded" => Self::new("web_embedded", DESKTOP_UA)
                .with_header("Referer", "https://www.youtube.com/"),
            "mweb" => Self::new(
                "mweb",
                "Mozilla/5.0 (iPad; CPU OS 16_7_10 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/16.6 Mobile/15E148 Safari/604.1,gzip(gfe)",
            ),
            other => Self::new(other, DESKTOP_UA)
                .with_header("Accept-Language", "en-us,en;q=0.5"),
        }
    }
}

/// Ordered list of identities, tried strictly in order
#[derive(Debug, Clone)]
pub struct ClientRotation {
    identities: Vec<ClientIdentity>,
}

impl ClientRotation {
    pub fn new(identities: Vec<ClientIdentity>) -> Self {
        Self { identities }
    }

    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Self {
        Self::new(
            names
                .iter()
                .map(|n| n.as_ref().trim())
                .filter(|n| !n.is_empty())
                .map(ClientIdentity::named)
                .collect(),
        )
    }

    /// Run `attempt` once per identity until one succeeds.
    /// Every attempt gets its own fresh state from the closure; on total
    /// failure the last identity's error is returned, not an aggregate.
    pub async fn run<T, F, Fut>(
        &self,
        backend: &str,
        mut attempt: F,
    ) -> Result<(T, ClientIdentity), DownloadError>
    where
        F: FnMut(ClientIdentity) -> Fut,
        Fut: Future<Output = Result<T, DownloadError>>,
    {
        let mut last_error =
            DownloadError::Transport(format!("{}: no client identities configured", backend));

        for (index, identity) in self.identities.iter().enumerate() {
            debug!(
                backend,
                client = %identity.name,
                attempt = index + 1,
                total = self.identities.len(),
                "Trying client identity"
            );

            match attempt(identity.clone()).await {
                Ok(value) => {
                    info!(backend, client = %identity.name, "Client identity succeeded");
                    return Ok((value, identity.clone()));
                }
                Err(e) => {
                    warn!(backend, client = %identity.name, error = %e, "Client identity failed");
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }
}
