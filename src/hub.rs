//! Hub: the composition root.
//!
//! [`Hub`] wires the broker map, topic store, connection registry, fan-out
//! pool and publish gateway together and owns their lifecycle:
//!
//! ```text
//! Running ──stop()──► Stopping ──► Stopped
//! ```
//!
//! `serve()` starts the fan-out workers and one receive loop per broker.
//! `stop()` cancels the broker loops, stops the workers, force-closes every
//! connection and waits until each has finished its own teardown.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::extract::ws::{Message, WebSocket};
use futures_util::{Stream, StreamExt};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;

use crate::access::{AccessGrant, AccessValidator, RequestContext};
use crate::broker::{BrokerMap, spawn_receive_loops};
use crate::config::WsSettings;
use crate::domain::{ConnectionId, HubState, StateCell, TopicStore};
use crate::error::HubError;
use crate::service::{PublishGateway, WorkerPool};
use crate::ws::executor::Executor;
use crate::ws::{ConnectionRegistry, SafeConnection};

/// The WebSocket pub/sub hub.
#[derive(Debug)]
pub struct Hub {
    settings: WsSettings,
    brokers: Arc<BrokerMap>,
    validator: Arc<dyn AccessValidator>,
    topics: Arc<TopicStore>,
    connections: Arc<ConnectionRegistry>,
    pool: WorkerPool,
    gateway: PublishGateway,
    state: StateCell,
    tasks: Mutex<JoinSet<()>>,
    serving: AtomicBool,
}

impl Hub {
    /// Builds a hub from its settings, broker map and access validator.
    ///
    /// Brokers present in `brokers` but not named in the settings are
    /// ignored.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Config`] if the path is empty or does not start
    /// with `/`, no broker is named, a named broker is missing from
    /// `brokers`, or the worker count or queue capacity is zero.
    pub fn new(
        settings: WsSettings,
        mut brokers: BrokerMap,
        validator: Arc<dyn AccessValidator>,
    ) -> Result<Self, HubError> {
        if !settings.path.starts_with('/') {
            return Err(HubError::Config(format!(
                "websocket path must start with '/': {:?}",
                settings.path
            )));
        }
        if settings.broker_names.is_empty() {
            return Err(HubError::Config("no brokers configured".to_string()));
        }
        if let Some(missing) = settings
            .broker_names
            .iter()
            .find(|name| !brokers.contains_key(name.as_str()))
        {
            return Err(HubError::Config(format!("broker {missing} is not available")));
        }
        if settings.workers == 0 {
            return Err(HubError::Config("worker count must be positive".to_string()));
        }
        if settings.queue_capacity == 0 {
            return Err(HubError::Config("queue capacity must be positive".to_string()));
        }

        let named: HashSet<&str> = settings.broker_names.iter().map(String::as_str).collect();
        brokers.retain(|name, _| {
            let keep = named.contains(name.as_str());
            if !keep {
                tracing::debug!(broker = %name, "ignoring unconfigured broker");
            }
            keep
        });
        let brokers = Arc::new(brokers);

        let topics = Arc::new(TopicStore::new());
        let connections = Arc::new(ConnectionRegistry::new());
        let pool = WorkerPool::new(
            settings.workers,
            settings.queue_capacity,
            Arc::clone(&topics),
            Arc::clone(&connections),
        );
        let gateway = PublishGateway::new(Arc::clone(&brokers));

        Ok(Self {
            settings,
            brokers,
            validator,
            topics,
            connections,
            pool,
            gateway,
            state: StateCell::new(),
            tasks: Mutex::new(JoinSet::new()),
            serving: AtomicBool::new(false),
        })
    }

    /// Starts the fan-out workers and the broker receive loops.
    ///
    /// The returned stream yields hub-fatal errors, such as a broker whose
    /// receive path terminated.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Config`] if called more than once, or
    /// [`HubError::Stopped`] after [`Self::stop`].
    pub async fn serve(&self) -> Result<mpsc::UnboundedReceiver<HubError>, HubError> {
        if self.state.current() != HubState::Running {
            return Err(HubError::Stopped);
        }
        if self.serving.swap(true, Ordering::AcqRel) {
            return Err(HubError::Config("hub is already serving".to_string()));
        }

        let (errors_tx, errors_rx) = mpsc::unbounded_channel();
        self.pool.start().await;
        spawn_receive_loops(
            &mut *self.tasks.lock().await,
            &self.brokers,
            &self.pool.queue_handle(),
            &self.state.signal(),
            &errors_tx,
        );
        tracing::info!(
            path = %self.settings.path,
            brokers = ?self.settings.broker_names,
            "hub serving"
        );
        Ok(errors_rx)
    }

    /// Shuts the hub down and waits for every connection to finish.
    ///
    /// Only the first call does the work; later calls return immediately.
    pub async fn stop(&self) {
        if !self.state.begin_stop() {
            tracing::debug!("hub stop already in progress");
            return;
        }
        tracing::info!("hub stopping");

        self.pool.stop().await;
        self.connections.close_all().await;
        self.connections.wait_drained().await;

        let mut tasks = self.tasks.lock().await;
        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined {
                tracing::error!(error = %err, "broker receive loop panicked");
            }
        }
        drop(tasks);

        self.state.finish_stop();
        tracing::info!("hub stopped");
    }

    /// Runs the access check for an upgrade request.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Stopped`] once shutdown began, or
    /// [`HubError::AccessDenied`] if the validator refused the request.
    pub async fn authorize(&self, ctx: &RequestContext) -> Result<AccessGrant, HubError> {
        if self.state.current() != HubState::Running {
            return Err(HubError::Stopped);
        }
        let requested = ctx.requested_topics();
        match self.validator.authorize(ctx, &requested).await {
            Ok(grant) => Ok(grant),
            Err(denied) => {
                tracing::warn!(path = %ctx.path, reason = %denied.reason, "websocket access denied");
                Err(denied.into())
            }
        }
    }

    /// Serves an upgraded socket until it closes.
    pub async fn run_connection(self: Arc<Self>, socket: WebSocket, grant: AccessGrant) {
        let (sink, stream) = socket.split();
        let conn = Arc::new(SafeConnection::new(ConnectionId::new(), Box::pin(sink)));
        if let Err(err) = self.serve_connection(conn, stream, grant).await {
            tracing::debug!(error = %err, "websocket connection ended with error");
        }
    }

    /// Registers `conn`, runs its command loop over `stream`, then tears the
    /// connection down.
    ///
    /// Teardown (unsubscribe from every topic, deregister, release the
    /// socket) runs exactly once on every exit path.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Stopped`] if the hub is shutting down, or the
    /// transport error that ended the command loop.
    pub async fn serve_connection<S>(
        &self,
        conn: Arc<SafeConnection>,
        stream: S,
        grant: AccessGrant,
    ) -> Result<(), HubError>
    where
        S: Stream<Item = Result<Message, axum::Error>> + Unpin + Send,
    {
        let id = conn.id();
        if let Err(err) = self.connections.register(Arc::clone(&conn)).await {
            conn.release().await;
            return Err(err);
        }
        tracing::info!(connection = %id, "websocket client connected");

        let mut executor = Executor::new(
            Arc::clone(&conn),
            Arc::clone(&self.topics),
            self.gateway.clone(),
            grant,
            self.state.signal(),
        );
        let result = executor.run(stream).await;

        self.topics.unsubscribe_all(id).await;
        self.connections.deregister(id).await;
        conn.release().await;
        tracing::info!(connection = %id, "websocket client disconnected");
        result
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> HubState {
        self.state.current()
    }

    /// Returns the hub settings.
    #[must_use]
    pub const fn settings(&self) -> &WsSettings {
        &self.settings
    }

    /// Returns the publish gateway.
    #[must_use]
    pub const fn gateway(&self) -> &PublishGateway {
        &self.gateway
    }

    /// Returns the topic store.
    #[must_use]
    pub fn topics(&self) -> &TopicStore {
        &self.topics
    }

    /// Returns the connection registry.
    #[must_use]
    pub fn connections(&self) -> &ConnectionRegistry {
        &self.connections
    }
}
