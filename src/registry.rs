//! Sessions by identifier, with controlled creation and teardown.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use futures_util::future::join_all;

use crate::{
    config::Config,
    error::Result,
    pipeline::Pipeline,
    recorder::{JsonLines, Recorder},
    resolver::Resolver,
    session::{Context, Session},
    sink::Connector,
    util::lock,
};

/// Identifies an independent playback context, e.g. a guild or a room.
pub type SessionId = u64;

pub struct Registry {
    context: Arc<Context>,
    sessions: Mutex<HashMap<SessionId, Arc<Session>>>,
}

impl Registry {
    /// Creates a registry, recording usage to the configured JSON lines file
    /// if there is one.
    ///
    /// # Errors
    ///
    /// Returns an error when the usage file cannot be opened.
    pub fn new(
        config: Config,
        resolver: Arc<dyn Resolver>,
        connector: Arc<dyn Connector>,
    ) -> Result<Self> {
        let recorder = match &config.usage.path {
            Some(path) => Some(Arc::new(JsonLines::open(path)?) as Arc<dyn Recorder>),
            None => None,
        };
        Ok(Self::with_recorder(config, resolver, connector, recorder))
    }

    #[must_use]
    pub fn with_recorder(
        config: Config,
        resolver: Arc<dyn Resolver>,
        connector: Arc<dyn Connector>,
        recorder: Option<Arc<dyn Recorder>>,
    ) -> Self {
        let pipeline = Pipeline::from_config(resolver, &config.resolver);
        Self {
            context: Arc::new(Context {
                config,
                pipeline,
                connector,
                recorder,
            }),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the session for `id`, creating an empty one on first use.
    pub fn get_or_create(&self, id: SessionId) -> Arc<Session> {
        let mut sessions = lock(&self.sessions);
        let session = sessions.entry(id).or_insert_with(|| {
            debug!("creating session {id}");
            Arc::new(Session::new(id, Arc::clone(&self.context)))
        });
        Arc::clone(session)
    }

    #[must_use]
    pub fn get(&self, id: SessionId) -> Option<Arc<Session>> {
        lock(&self.sessions).get(&id).cloned()
    }

    /// Tears the session down: cancels its driver and feeds, disconnects the
    /// sink and forgets the session. Returns `false` when there was none.
    pub async fn leave(&self, id: SessionId) -> bool {
        let session = lock(&self.sessions).remove(&id);
        match session {
            Some(session) => {
                session.shutdown().await;
                true
            }
            None => false,
        }
    }

    /// Reacts to membership changes on the channel of session `id`: once
    /// nobody but the jukebox is left, the session leaves. Returns whether
    /// it did.
    pub async fn participants_changed(&self, id: SessionId, remaining: usize) -> bool {
        if remaining > 0 {
            return false;
        }

        let connected = self.get(id).is_some_and(|session| session.is_connected());
        if !connected {
            return false;
        }

        info!("session {id} has no listeners left");
        self.leave(id).await
    }

    /// Tears down every session.
    pub async fn leave_all(&self) {
        let sessions: Vec<_> = lock(&self.sessions).drain().map(|(_, s)| s).collect();
        if sessions.is_empty() {
            return;
        }

        debug!("leaving {} sessions", sessions.len());
        join_all(sessions.iter().map(|session| session.shutdown())).await;
    }

    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.sessions).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        lock(&self.sessions).is_empty()
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.context.config
    }
}
