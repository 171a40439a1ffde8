use std::io;

use tracing::debug;
use url::Url;

/// Capability to hand a URL to the system so the user can complete sign-in
pub trait UrlOpener: Send + Sync {
    fn open(&self, url: &Url) -> io::Result<()>;
}

/// Opens URLs in the platform's default browser
#[derive(Debug, Clone, Default)]
pub struct SystemBrowser;

impl UrlOpener for SystemBrowser {
    fn open(&self, url: &Url) -> io::Result<()> {
        debug!(host = url.host_str().unwrap_or_default(), "Opening authorization URL in system browser");
        open::that_detached(url.as_str())
    }
}
