//! Broker multiplexer: one receive loop per broker feeding a shared queue.
//!
//! Each loop blocks on [`Broker::next`] and forwards messages into the
//! bounded fan-out queue. A full queue blocks the loop (backpressure, never
//! drop). A terminal broker error is pushed to the hub error stream and ends
//! that loop; there is no retry at this layer.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;

use super::{Broker, BrokerMap};
use crate::domain::{Message, ShutdownSignal};
use crate::error::HubError;

/// Spawns one receive loop per broker into `tasks`.
pub fn spawn_receive_loops(
    tasks: &mut JoinSet<()>,
    brokers: &BrokerMap,
    queue: &mpsc::Sender<Message>,
    shutdown: &ShutdownSignal,
    errors: &mpsc::UnboundedSender<HubError>,
) {
    for (name, broker) in brokers {
        tasks.spawn(receive_loop(
            name.clone(),
            Arc::clone(broker),
            queue.clone(),
            shutdown.clone(),
            errors.clone(),
        ));
    }
}

async fn receive_loop(
    name: String,
    broker: Arc<dyn Broker>,
    queue: mpsc::Sender<Message>,
    mut shutdown: ShutdownSignal,
    errors: mpsc::UnboundedSender<HubError>,
) {
    tracing::debug!(broker = %name, "broker receive loop started");
    loop {
        let message = tokio::select! {
            biased;
            () = shutdown.wait() => break,
            next = broker.next() => match next {
                Ok(message) => message,
                Err(source) => {
                    if shutdown.is_running() {
                        tracing::error!(broker = %name, error = %source, "broker receive failed");
                        let _ = errors.send(HubError::Broker { broker: name.clone(), source });
                    } else {
                        tracing::warn!(broker = %name, error = %source, "broker closed during shutdown");
                    }
                    break;
                }
            },
        };

        tokio::select! {
            biased;
            () = shutdown.wait() => break,
            sent = queue.send(message) => {
                if sent.is_err() {
                    tracing::debug!(broker = %name, "fan-out queue closed");
                    break;
                }
            }
        }
    }
    tracing::debug!(broker = %name, "broker receive loop stopped");
}
