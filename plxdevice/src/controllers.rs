//! Controller registry and timeline fan-out.
//!
//! Two kinds of controller consume timeline updates, behind one common
//! dispatch path:
//!
//! - subscribing controllers (mobile apps, companions) give us a callback
//!   URL; every update is POSTed there, and a 90 s inactivity timer forgets
//!   the record unless the controller keeps talking to us;
//! - polling controllers (the web client) park a long-poll request on the
//!   device; the record holds the one-shot channel that releases it and
//!   lives only as long as that request.
//!
//! The table mutex is held across the sequential sends of a fan-out, which
//! keeps registry mutations linearized with deliveries. Expiry timers run
//! on their own tasks and take the same mutex; resets abort and respawn the
//! timer task instead of rescheduling it, so no lock is ever needed while
//! arming one.

use std::sync::Arc;
use std::time::Duration;

use plxproto::container::{MediaContainer, Timeline};
use reqwest::header::CONTENT_TYPE;
use tokio::sync::{oneshot, Mutex};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

/// Time after which a silent subscribing controller is removed.
pub(crate) const INACTIVITY_TIMEOUT: Duration = Duration::from_secs(90);

/// Upper bound on one outbound timeline POST.
pub(crate) const DISPATCH_TIMEOUT: Duration = Duration::from_secs(10);

enum ControllerTransport {
    Subscribing {
        /// Callback base URL, `scheme://host:port/`.
        url: String,
        expiry: AbortHandle,
    },
    Polling {
        /// Consumed by the first delivery; the parked handler owns the
        /// receiving side and its lifecycle.
        delivery: Option<oneshot::Sender<MediaContainer>>,
    },
}

struct ControllerRecord {
    client_id: String,
    /// Last commandID seen from this controller, echoed on every send.
    command_id: String,
    transport: ControllerTransport,
}

struct Inner {
    records: Mutex<Vec<ControllerRecord>>,
    inactivity: Duration,
    http: reqwest::Client,
}

/// Shared, clonable handle on the controller table.
#[derive(Clone)]
pub(crate) struct ControllerRegistry {
    inner: Arc<Inner>,
}

impl ControllerRegistry {
    pub(crate) fn new() -> Self {
        Self::with_inactivity(INACTIVITY_TIMEOUT)
    }

    /// Same registry with a custom inactivity timeout (tests).
    pub(crate) fn with_inactivity(inactivity: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                records: Mutex::new(Vec::new()),
                inactivity,
                http: reqwest::Client::new(),
            }),
        }
    }

    /// Registers (or refreshes) a subscribing controller.
    ///
    /// An existing subscribing record keeps its URL; its timer restarts and
    /// its commandID is overwritten. A polling record under the same
    /// clientID is left alone: the two kinds may coexist for a misbehaving
    /// controller, each following its own lifecycle.
    pub(crate) async fn register_subscribing(&self, client_id: &str, url: String, command_id: &str) {
        let mut records = self.inner.records.lock().await;

        if let Some(rec) = records.iter_mut().find(|r| {
            r.client_id == client_id && matches!(r.transport, ControllerTransport::Subscribing { .. })
        }) {
            debug!("resetting timeout for subscribing controller {}", client_id);
            rec.command_id = command_id.to_string();
            if let ControllerTransport::Subscribing { expiry, .. } = &mut rec.transport {
                expiry.abort();
                *expiry = self.spawn_expiry(client_id);
            }
            return;
        }

        info!("🔔 adding subscribing controller {} at {}", client_id, url);
        records.push(ControllerRecord {
            client_id: client_id.to_string(),
            command_id: command_id.to_string(),
            transport: ControllerTransport::Subscribing {
                url,
                expiry: self.spawn_expiry(client_id),
            },
        });
    }

    /// Registers a polling controller for the duration of one parked
    /// request. Always creates a record; the caller is responsible for
    /// [`forget`](Self::forget) on every exit path of the handler.
    pub(crate) async fn register_polling(
        &self,
        client_id: &str,
        delivery: oneshot::Sender<MediaContainer>,
        command_id: &str,
    ) {
        let mut records = self.inner.records.lock().await;
        info!("⏳ adding polling controller {}", client_id);
        records.push(ControllerRecord {
            client_id: client_id.to_string(),
            command_id: command_id.to_string(),
            transport: ControllerTransport::Polling {
                delivery: Some(delivery),
            },
        });
    }

    /// Records the latest commandID seen from a controller. Best effort:
    /// an unknown clientID is a no-op.
    pub(crate) async fn update_command_id(&self, client_id: &str, command_id: &str) {
        let mut records = self.inner.records.lock().await;
        for rec in records.iter_mut().filter(|r| r.client_id == client_id) {
            rec.command_id = command_id.to_string();
        }
    }

    /// Removes every record with this clientID and stops their timers.
    /// After the call, no record with this clientID remains, whatever the
    /// kinds in place. The delivery channel of a polling record is left to
    /// the parked handler, which owns that lifecycle.
    pub(crate) async fn forget(&self, client_id: &str) {
        let mut records = self.inner.records.lock().await;
        records.retain(|rec| {
            if rec.client_id != client_id {
                return true;
            }
            info!("❌ forgetting controller {}", rec.client_id);
            if let ControllerTransport::Subscribing { expiry, .. } = &rec.transport {
                expiry.abort();
            }
            false
        });
    }

    /// Fans the timeline snapshot out to every registered controller, in
    /// table order. Sends are sequential under the table lock: a slow
    /// subscriber delays the others, which stays acceptable with the
    /// handful of controllers a device ever sees.
    pub(crate) async fn notify_all(&self, machine_identifier: &str, timelines: &[Timeline]) {
        let mut records = self.inner.records.lock().await;
        for rec in records.iter_mut() {
            self.dispatch(rec, machine_identifier, timelines).await;
        }
    }

    /// Sends the snapshot to one subscribing controller, typically right
    /// after its registration.
    pub(crate) async fn notify_subscriber(
        &self,
        client_id: &str,
        machine_identifier: &str,
        timelines: &[Timeline],
    ) {
        let mut records = self.inner.records.lock().await;
        if let Some(rec) = records.iter_mut().find(|r| {
            r.client_id == client_id && matches!(r.transport, ControllerTransport::Subscribing { .. })
        }) {
            self.dispatch(rec, machine_identifier, timelines).await;
        }
    }

    async fn dispatch(&self, rec: &mut ControllerRecord, machine_identifier: &str, timelines: &[Timeline]) {
        let container = MediaContainer {
            command_id: rec.command_id.clone(),
            machine_identifier: machine_identifier.to_string(),
            timelines: timelines.to_vec(),
            ..Default::default()
        };

        match &mut rec.transport {
            ControllerTransport::Subscribing { url, .. } => {
                // Le `:` avant /timeline est imposé par le protocole.
                let target = format!("{}:/timeline", url);
                let body = match container.to_xml() {
                    Ok(body) => body,
                    Err(e) => {
                        warn!("failed to encode timeline for {}: {}", rec.client_id, e);
                        return;
                    }
                };
                debug!("posting timeline to {}", target);
                let outcome = self
                    .inner
                    .http
                    .post(&target)
                    .timeout(DISPATCH_TIMEOUT)
                    .header(CONTENT_TYPE, "application/xml")
                    .header("X-Plex-Client-Identifier", machine_identifier)
                    .body(body)
                    .send()
                    .await;
                match outcome {
                    Ok(resp) if resp.status().is_success() => {}
                    Ok(resp) => {
                        // Pas de nouvelle tentative : la prochaine mise à
                        // jour portera l'état courant.
                        warn!("controller {} rejected timeline: {}", rec.client_id, resp.status());
                    }
                    Err(e) => {
                        warn!("error sending timeline to controller {}: {}", rec.client_id, e);
                    }
                }
            }
            ControllerTransport::Polling { delivery } => {
                if let Some(tx) = delivery.take() {
                    debug!("releasing parked poll for {}", rec.client_id);
                    if tx.send(container).is_err() {
                        debug!("parked poll for {} was gone before delivery", rec.client_id);
                    }
                }
            }
        }
    }

    fn spawn_expiry(&self, client_id: &str) -> AbortHandle {
        let registry = self.clone();
        let client_id = client_id.to_string();
        let after = self.inner.inactivity;
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            debug!("subscribing controller {} timed out", client_id);
            registry.forget(&client_id).await;
        })
        .abort_handle()
    }

    #[cfg(test)]
    async fn count(&self) -> usize {
        self.inner.records.lock().await.len()
    }
}
