//! Dispatcher
//!
//! Consumer loop of a replay session: pops each event once the pseudo clock
//! reaches its timestamp and hands it to the sink.

use std::sync::Arc;

use super::session::SessionShared;
use crate::application::ports::{EventSink, SinkError};
use crate::domain::replay::Due;
use crate::infrastructure::metrics;

pub(crate) struct Dispatcher {
    shared: Arc<SessionShared>,
    sink: Arc<dyn EventSink>,
}

impl Dispatcher {
    pub(crate) fn new(shared: Arc<SessionShared>, sink: Arc<dyn EventSink>) -> Self {
        Self { shared, sink }
    }

    /// Run until the session is cancelled or the sink closes.
    pub(crate) async fn run(self) {
        let shared = &self.shared;

        loop {
            // The gate keeps a seek from completing between pop and delivery.
            let gate = tokio::select! {
                () = shared.cancel.cancelled() => break,
                gate = shared.delivery_gate.lock() => gate,
            };

            let due = shared.schedule.lock().pop_due();

            match due {
                Due::Event(event) => {
                    let timestamp = event.timestamp;
                    let delivered = tokio::select! {
                        () = shared.cancel.cancelled() => break,
                        delivered = self.sink.deliver(event) => delivered,
                    };
                    drop(gate);

                    match delivered {
                        Ok(()) => {
                            metrics::record_event_delivered();
                            tracing::debug!(%timestamp, "Event delivered");
                        }
                        Err(SinkError::Rejected(reason)) => {
                            tracing::warn!(%reason, "Event dropped by sink");
                        }
                        Err(SinkError::Closed) => {
                            tracing::info!("Event sink closed, ending session");
                            shared.cancel.cancel();
                            break;
                        }
                    }
                }
                Due::NotDue { wait } => {
                    drop(gate);
                    let nap = wait.min(shared.config.poll_interval);
                    tokio::select! {
                        () = shared.cancel.cancelled() => break,
                        () = shared.queue_changed.notified() => {}
                        () = tokio::time::sleep(nap) => {}
                    }
                }
                Due::Empty => {
                    drop(gate);
                    tokio::select! {
                        () = shared.cancel.cancelled() => break,
                        () = shared.queue_changed.notified() => {}
                    }
                }
            }
        }

        tracing::debug!("Dispatcher stopped");
    }
}
