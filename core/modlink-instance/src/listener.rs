//! Primary-side accept loop.
//!
//! Connections are handled one at a time: accept, read to EOF, parse,
//! dispatch, accept again. Nothing a peer sends can end the loop; only
//! [`ListenerHandle::stop`] does.

use crate::error::{InstanceError, InstanceResult};
use crate::transport::{self, Endpoint, Incoming, Listener};
use modlink_license::ActivationPayload;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub(crate) struct ListenerSettings {
    pub(crate) read_timeout: Duration,
    pub(crate) max_payload: usize,
    pub(crate) retry_delay: Duration,
}

/// Owner's handle on the accept loop.
#[derive(Debug)]
pub struct ListenerHandle {
    endpoint: Endpoint,
    shutdown: Option<oneshot::Sender<()>>,
    join: Option<JoinHandle<()>>,
}

impl ListenerHandle {
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.join.as_ref().is_some_and(|j| !j.is_finished())
    }

    /// Ends the loop and removes the endpoint.
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(join) = self.join.take() {
            if let Err(e) = join.await {
                if !e.is_cancelled() {
                    warn!(error = %e, "Listener task ended abnormally");
                }
            }
        }
        transport::cleanup(&self.endpoint);
        info!(endpoint = %self.endpoint, "Activation listener stopped");
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        if let Some(join) = self.join.take() {
            join.abort();
        }
    }
}

pub(crate) fn start<H>(
    endpoint: Endpoint,
    settings: ListenerSettings,
    handler: H,
) -> InstanceResult<ListenerHandle>
where
    H: Fn(ActivationPayload) + Send + Sync + 'static,
{
    let listener = Listener::bind(&endpoint).map_err(|source| InstanceError::Bind {
        endpoint: endpoint.to_string(),
        source,
    })?;
    info!(endpoint = %endpoint, "Listening for activations");

    let (tx, rx) = oneshot::channel();
    let join = tokio::spawn(run(
        listener,
        endpoint.clone(),
        settings,
        Arc::new(handler),
        rx,
    ));
    Ok(ListenerHandle {
        endpoint,
        shutdown: Some(tx),
        join: Some(join),
    })
}

async fn run<H>(
    listener: Listener,
    endpoint: Endpoint,
    settings: ListenerSettings,
    handler: Arc<H>,
    mut shutdown: oneshot::Receiver<()>,
) where
    H: Fn(ActivationPayload) + Send + Sync + 'static,
{
    let mut listener = Some(listener);
    loop {
        if listener.is_none() {
            match Listener::bind(&endpoint) {
                Ok(l) => {
                    info!(endpoint = %endpoint, "Re-bound activation endpoint");
                    listener = Some(l);
                }
                Err(e) => {
                    warn!(endpoint = %endpoint, error = %e, "Re-bind failed");
                    if pause(&mut shutdown, settings.retry_delay).await {
                        break;
                    }
                    continue;
                }
            }
        }
        let Some(active) = listener.as_mut() else {
            continue;
        };

        let accepted = tokio::select! {
            _ = &mut shutdown => break,
            r = active.accept() => r,
        };

        let failed = match accepted {
            Ok(stream) => !handle_connection(stream, &settings, handler.as_ref()).await,
            Err(e) => {
                warn!(error = %e, "Accept failed; re-binding");
                listener = None;
                true
            }
        };
        if failed && pause(&mut shutdown, settings.retry_delay).await {
            break;
        }
    }
    debug!("Activation listener loop exited");
}

/// Reads one payload and dispatches it. Returns false on any error.
async fn handle_connection<H>(mut stream: Incoming, settings: &ListenerSettings, handler: &H) -> bool
where
    H: Fn(ActivationPayload),
{
    let mut buf = Vec::new();
    let limit = settings.max_payload as u64 + 1;
    let read = tokio::time::timeout(
        settings.read_timeout,
        (&mut stream).take(limit).read_to_end(&mut buf),
    )
    .await;
    match read {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => {
            warn!(error = %e, "Failed to read relayed payload");
            return false;
        }
        Err(_) => {
            warn!("Timed out reading relayed payload");
            return false;
        }
    }
    if buf.len() > settings.max_payload {
        warn!(bytes = buf.len(), "Relayed payload too large; dropped");
        return false;
    }

    let text = match std::str::from_utf8(&buf) {
        Ok(t) => t.trim(),
        Err(e) => {
            warn!(error = %e, "Relayed payload is not UTF-8");
            return false;
        }
    };
    match ActivationPayload::parse(text) {
        Ok(payload) => {
            info!(username = %payload.username, "Activation received from another instance");
            handler(payload);
            true
        }
        Err(e) => {
            warn!(error = %e, "Ignoring malformed activation payload");
            false
        }
    }
}

/// Sleeps for `delay`. Returns true if shutdown was requested meanwhile.
async fn pause(shutdown: &mut oneshot::Receiver<()>, delay: Duration) -> bool {
    tokio::select! {
        _ = shutdown => true,
        _ = tokio::time::sleep(delay) => false,
    }
}
