//! Test doubles for the HTTP backend and the browser

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;
use transport::{BrowserLauncher, HttpBackend, HttpReply, HttpRequest};

use crate::codec::{ParamMap, normalize_uri};

struct Scripted {
    delay: Option<Duration>,
    gate: Option<oneshot::Receiver<()>>,
    reply: transport::Result<HttpReply>,
}

/// Answers requests from a FIFO script and records what was sent.
#[derive(Default)]
pub struct ScriptedBackend {
    script: Mutex<VecDeque<Scripted>>,
    seen: Mutex<Vec<HttpRequest>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn enqueue(&self, entry: Scripted) {
        self.script.lock().unwrap().push_back(entry);
    }

    pub fn push(&self, reply: HttpReply) {
        self.enqueue(Scripted {
            delay: None,
            gate: None,
            reply: Ok(reply),
        });
    }

    pub fn push_delayed(&self, delay: Duration, reply: HttpReply) {
        self.enqueue(Scripted {
            delay: Some(delay),
            gate: None,
            reply: Ok(reply),
        });
    }

    pub fn push_error(&self, error: transport::Error) {
        self.enqueue(Scripted {
            delay: None,
            gate: None,
            reply: Err(error),
        });
    }

    /// The reply is held until the returned sender fires (or is dropped).
    pub fn push_gated(&self, reply: HttpReply) -> oneshot::Sender<()> {
        let (release, gate) = oneshot::channel();
        self.enqueue(Scripted {
            delay: None,
            gate: Some(gate),
            reply: Ok(reply),
        });
        release
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.seen.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

impl HttpBackend for ScriptedBackend {
    fn send(
        &self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = transport::Result<HttpReply>> + Send + '_>> {
        Box::pin(async move {
            self.seen.lock().unwrap().push(request);
            let entry = self.script.lock().unwrap().pop_front();
            let Some(entry) = entry else {
                return Err(transport::Error::Http("no scripted reply left".into()));
            };
            if let Some(delay) = entry.delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(gate) = entry.gate {
                let _ = gate.await;
            }
            entry.reply
        })
    }
}

type Redirect = Box<dyn Fn(&ParamMap) -> Option<String> + Send + Sync>;

/// Plays the user: records the authorization URL and, if the redirect
/// closure returns a callback URL, GETs it from a spawned task.
pub struct RedirectingBrowser {
    redirect: Redirect,
    opened: Mutex<Vec<String>>,
    pages: Arc<Mutex<Vec<(u16, String)>>>,
}

impl RedirectingBrowser {
    pub fn new(redirect: impl Fn(&ParamMap) -> Option<String> + Send + Sync + 'static) -> Self {
        Self {
            redirect: Box::new(redirect),
            opened: Mutex::new(Vec::new()),
            pages: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A user who never completes the consent screen.
    pub fn idle() -> Self {
        Self::new(|_| None)
    }

    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }

    /// Status and body of each callback page the browser was shown.
    pub fn pages(&self) -> Vec<(u16, String)> {
        self.pages.lock().unwrap().clone()
    }
}

impl BrowserLauncher for RedirectingBrowser {
    fn open(&self, url: &str) -> transport::Result<()> {
        self.opened.lock().unwrap().push(url.to_string());
        let (_, params) = normalize_uri(url);
        if let Some(callback) = (self.redirect)(&params) {
            let pages = self.pages.clone();
            tokio::spawn(async move {
                if let Ok(response) = reqwest::get(callback).await {
                    let status = response.status().as_u16();
                    let body = response.text().await.unwrap_or_default();
                    pages.lock().unwrap().push((status, body));
                }
            });
        }
        Ok(())
    }
}

/// Fails every launch.
pub struct BrokenBrowser;

impl BrowserLauncher for BrokenBrowser {
    fn open(&self, _url: &str) -> transport::Result<()> {
        Err(transport::Error::Browser("no browser available".into()))
    }
}

/// Poll `check` until it holds, yielding to the runtime between attempts.
pub async fn wait_until(mut check: impl FnMut() -> bool) {
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}
