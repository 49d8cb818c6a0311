//! Browser launcher used for the user-authorization step

use tracing::info;

use crate::{Error, Result};

/// Opens a URL in the user's browser.
pub trait BrowserLauncher: Send + Sync {
    fn open(&self, url: &str) -> Result<()>;
}

/// Launches the platform default browser (`xdg-open`, `open`, `start`).
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemBrowser;

impl BrowserLauncher for SystemBrowser {
    fn open(&self, url: &str) -> Result<()> {
        info!("opening browser for authorization");
        open::that_detached(url).map_err(|e| Error::Browser(format!("{e}")))
    }
}
