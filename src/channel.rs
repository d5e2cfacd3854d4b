//! Request/response plumbing between the operator's control surface and the
//! execution context living in the target page.
//!
//! The execution context runs a [`ControlServer`] over a [`BatchRunner`].
//! The control surface holds a [`ControlClient`]; when it has no live
//! connection (cold page load, or the page navigated since), it asks its
//! [`Injector`] to start a fresh execution context and retries once.

use crate::error::{AutomationError, Result};
use crate::runner::BatchRunner;
use crate::store::BatchStore;
use crate::types::{Outcome, RunSettings, WorkItem};
use crate::Page;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};

const CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum ControlRequest {
    /// Process one item immediately, outside the queue.
    RunAutomation { item: WorkItem, settings: RunSettings },
    StopAutomation,
    /// Start on the persisted batch. Progress arrives as notifications only.
    StartBatch,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ControlResponse {
    pub fn success() -> Self {
        Self {
            ok: true,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(error.into()),
        }
    }

    fn from_outcome(outcome: &Outcome) -> Self {
        match outcome {
            Outcome::Completed => Self::success(),
            Outcome::SkippedNotFound { reason } | Outcome::SkippedSubstepFailed { reason } => {
                Self::failure(reason.clone())
            }
            Outcome::Cancelled => Self::failure("Automation was cancelled"),
            Outcome::Fatal { error } => Self::failure(error.clone()),
        }
    }
}

/// A request in flight. `reply` is `None` for fire-and-forget requests.
#[derive(Debug)]
pub struct Envelope {
    pub request: ControlRequest,
    pub reply: Option<oneshot::Sender<ControlResponse>>,
}

/// Serves control requests inside the execution context.
pub struct ControlServer;

impl ControlServer {
    /// Spawn the request loop as a background tokio task.
    ///
    /// The loop ends when every sender is dropped. Long-running requests are
    /// handed to their own task so `StopAutomation` is never queued behind them.
    pub fn spawn<P>(runner: Arc<BatchRunner<P>>) -> mpsc::Sender<Envelope>
    where
        P: Page + 'static,
    {
        let (tx, mut rx) = mpsc::channel::<Envelope>(CHANNEL_CAPACITY);
        tokio::spawn(async move {
            while let Some(envelope) = rx.recv().await {
                Self::handle(&runner, envelope);
            }
            tracing::debug!("control channel closed");
        });
        tx
    }

    fn handle<P>(runner: &Arc<BatchRunner<P>>, envelope: Envelope)
    where
        P: Page + 'static,
    {
        let Envelope { request, reply } = envelope;
        match request {
            ControlRequest::RunAutomation { item, settings } => {
                let runner = Arc::clone(runner);
                tokio::spawn(async move {
                    let response = match runner.run_single(item, settings).await {
                        Ok(outcome) => ControlResponse::from_outcome(&outcome),
                        Err(e) => ControlResponse::failure(e.to_string()),
                    };
                    respond(reply, response);
                });
            }
            ControlRequest::StopAutomation => {
                let response = match runner.stop() {
                    Ok(()) => ControlResponse::success(),
                    Err(e) => ControlResponse::failure(e.to_string()),
                };
                respond(reply, response);
            }
            ControlRequest::StartBatch => {
                let runner = Arc::clone(runner);
                tokio::spawn(async move {
                    if let Err(e) = runner.start().await {
                        tracing::error!(error = %e, "batch start failed");
                    }
                });
            }
        }
    }
}

fn respond(reply: Option<oneshot::Sender<ControlResponse>>, response: ControlResponse) {
    if let Some(reply) = reply {
        if reply.send(response).is_err() {
            tracing::debug!("control surface stopped waiting for the response");
        }
    }
}

/// Starts a fresh execution context in the target page and connects to it.
///
/// # Example
///
/// ```ignore
/// struct ScriptInjector { tab_id: u32 }
///
/// impl Injector for ScriptInjector {
///     async fn inject(&self) -> Result<mpsc::Sender<Envelope>> {
///         // execute the content script in the tab, then open a port to it
///     }
/// }
/// ```
pub trait Injector: Send + Sync {
    fn inject(&self) -> impl std::future::Future<Output = Result<mpsc::Sender<Envelope>>> + Send;
}

/// The control surface's end of the channel.
pub struct ControlClient<I: Injector> {
    injector: I,
    sender: Mutex<Option<mpsc::Sender<Envelope>>>,
}

impl<I: Injector> ControlClient<I> {
    /// A client with no connection yet; the first request injects.
    pub fn new(injector: I) -> Self {
        Self {
            injector,
            sender: Mutex::new(None),
        }
    }

    /// A client that tries `sender` before falling back to injection.
    pub fn connected(injector: I, sender: mpsc::Sender<Envelope>) -> Self {
        Self {
            injector,
            sender: Mutex::new(Some(sender)),
        }
    }

    pub async fn run_automation(
        &self,
        item: WorkItem,
        settings: RunSettings,
    ) -> Result<ControlResponse> {
        self.request(ControlRequest::RunAutomation { item, settings })
            .await
    }

    pub async fn stop_automation(&self) -> Result<ControlResponse> {
        self.request(ControlRequest::StopAutomation).await
    }

    /// Persist a new batch, then tell the execution context to start on it.
    pub async fn start_batch(
        &self,
        store: &BatchStore,
        items: Vec<WorkItem>,
        settings: RunSettings,
    ) -> Result<()> {
        store.replace(items, settings)?;
        self.send(ControlRequest::StartBatch, false).await?;
        Ok(())
    }

    async fn request(&self, request: ControlRequest) -> Result<ControlResponse> {
        self.send(request, true).await?.ok_or_else(|| {
            AutomationError::Channel("execution context sent no response".into())
        })
    }

    async fn send(
        &self,
        request: ControlRequest,
        wants_reply: bool,
    ) -> Result<Option<ControlResponse>> {
        let current = self
            .sender
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();

        let first = match current {
            Some(tx) => deliver(&tx, request.clone(), wants_reply).await,
            None => Err(AutomationError::Channel("not connected".into())),
        };

        match first {
            Ok(response) => Ok(response),
            Err(e) => {
                tracing::info!(error = %e, "execution context unreachable, injecting");
                let tx = self.injector.inject().await?;
                *self.sender.lock().unwrap_or_else(|e| e.into_inner()) = Some(tx.clone());
                deliver(&tx, request, wants_reply).await
            }
        }
    }
}

async fn deliver(
    tx: &mpsc::Sender<Envelope>,
    request: ControlRequest,
    wants_reply: bool,
) -> Result<Option<ControlResponse>> {
    let (reply, response) = if wants_reply {
        let (reply, response) = oneshot::channel();
        (Some(reply), Some(response))
    } else {
        (None, None)
    };

    tx.send(Envelope { request, reply })
        .await
        .map_err(|_| AutomationError::Channel("execution context is gone".into()))?;

    match response {
        Some(response) => response
            .await
            .map(Some)
            .map_err(|_| AutomationError::Channel("execution context dropped the request".into())),
        None => Ok(None),
    }
}
