//! Glue between one [`Endpoint`] and one [`Session`].
//!
//! The controller owns the transport, the local engine handle, the mirror and
//! the sync task. Local actions and transport events go through the session,
//! and the commands it returns are executed here.

use crate::engine::LocalEngine;
use crate::state::{Command, Screen, Session};
use crate::sync::{Mirror, SyncConfig, SyncTask, Synchronizer, TickReport};
use log::{debug, warn};
use shared::BattleMode;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use transport::{Endpoint, EndpointConfig, EventReceiver, LinkConfig, TransportError, TransportEvent};

/// Drives one versus session over the network for a local engine `E`.
pub struct Controller<E> {
    session: Session,
    link: LinkConfig,
    sync: SyncConfig,
    endpoint: Option<Endpoint>,
    /// Endpoints closed locally whose outgoing queue may still be draining.
    retired: Vec<Endpoint>,
    events: Option<EventReceiver>,
    engine: Arc<Mutex<E>>,
    mirror: Mirror,
    sync_task: Option<SyncTask>,
    synchronizer: Synchronizer,
}

impl<E> Controller<E>
where
    E: LocalEngine + Send + 'static,
{
    /// Controller in role selection with default link and sync timings.
    pub fn new(engine: E) -> Self {
        Self {
            session: Session::new(),
            link: LinkConfig::default(),
            sync: SyncConfig::default(),
            endpoint: None,
            retired: Vec::new(),
            events: None,
            engine: Arc::new(Mutex::new(engine)),
            mirror: Mirror::new(),
            sync_task: None,
            synchronizer: Synchronizer::new(),
        }
    }

    pub fn with_link(mut self, link: LinkConfig) -> Self {
        self.link = link;
        self
    }

    pub fn with_sync(mut self, sync: SyncConfig) -> Self {
        self.sync = sync;
        self
    }

    /// Becomes the Server and starts listening on `bind`.
    pub async fn host(&mut self, bind: SocketAddr) -> Result<(), TransportError> {
        let commands = self.session.choose_server(bind);
        self.execute(commands).await
    }

    /// Becomes the Client and starts connecting to `peer`.
    pub async fn join(&mut self, peer: SocketAddr) -> Result<(), TransportError> {
        let commands = self.session.choose_client(peer);
        self.execute(commands).await
    }

    /// Server only: picks the mode and a fresh random seed.
    pub fn select_mode(&mut self, mode: BattleMode) {
        let seed: u64 = rand::random();
        let commands = self.session.select_mode(mode, seed);
        self.apply(commands);
    }

    pub fn mark_ready(&mut self) {
        let commands = self.session.mark_ready();
        self.apply(commands);
    }

    pub fn report_local_loss(&mut self) {
        let commands = self.session.report_local_loss();
        self.apply(commands);
    }

    /// Reports a loss if the local engine topped out during play.
    pub fn check_local_loss(&mut self) -> bool {
        if self.session.screen() != Screen::Playing || !self.lock_engine().is_game_over() {
            return false;
        }
        self.report_local_loss();
        true
    }

    /// Compares the local score against the last mirrored one.
    pub fn time_limit_expired(&mut self) {
        let local = self.lock_engine().score();
        let remote = self
            .mirror
            .with_snapshot(|snapshot| snapshot.map_or(0, |s| s.score));
        let commands = self.session.time_limit_expired(local, remote);
        self.apply(commands);
    }

    pub fn cancel(&mut self) {
        let commands = self.session.cancel();
        self.apply(commands);
    }

    pub fn return_to_menu(&mut self) {
        let commands = self.session.return_to_menu();
        self.apply(commands);
    }

    /// Runs one sync step by hand. Returns `None` outside of a game.
    pub fn push_snapshot(&mut self) -> Option<TickReport> {
        if self.session.screen() != Screen::Playing {
            return None;
        }
        let endpoint = self.endpoint.as_ref()?;
        let mut engine = self.engine.lock().unwrap_or_else(PoisonError::into_inner);
        Some(self.synchronizer.tick(&mut *engine, endpoint))
    }

    /// Waits for the next transport event and feeds it to the session.
    ///
    /// Returns `None` once there is no connection left to listen to.
    pub async fn next_event(&mut self) -> Option<TransportEvent> {
        let event = self.events.as_mut()?.recv().await?;
        if let Some(endpoint) = &self.endpoint {
            self.session.set_latency(endpoint.latency());
        }
        let commands = self.session.handle_event(event.clone());
        self.apply(commands);
        Some(event)
    }

    /// Runs session commands, opening an endpoint for `Listen` and `Connect`.
    pub async fn execute(&mut self, commands: Vec<Command>) -> Result<(), TransportError> {
        for command in commands {
            match command {
                Command::Listen(bind) => self.open(EndpointConfig::server_on(bind)).await?,
                Command::Connect(peer) => self.open(EndpointConfig::client(peer)).await?,
                other => self.apply_one(other),
            }
        }
        Ok(())
    }

    async fn open(&mut self, config: EndpointConfig) -> Result<(), TransportError> {
        self.teardown();

        let (endpoint, events) = Endpoint::new(config.with_link(self.link.clone()));
        if let Err(e) = endpoint.start().await {
            let commands = self.session.handle_event(TransportEvent::Error(e.clone()));
            self.apply(commands);
            return Err(e);
        }
        self.mirror.clear();
        self.endpoint = Some(endpoint);
        self.events = Some(events);
        Ok(())
    }

    fn apply(&mut self, commands: Vec<Command>) {
        for command in commands {
            self.apply_one(command);
        }
    }

    fn apply_one(&mut self, command: Command) {
        match command {
            Command::Send(packet) => match &self.endpoint {
                Some(endpoint) => {
                    if !endpoint.send(packet) {
                        debug!("Send skipped, link is down");
                    }
                }
                None => debug!("Send skipped, no endpoint"),
            },
            Command::StartSync => match &self.endpoint {
                Some(endpoint) => {
                    self.sync_task = Some(SyncTask::spawn(
                        &self.sync,
                        Arc::clone(&self.engine),
                        endpoint.clone(),
                    ));
                }
                None => warn!("Cannot start sync without a connection"),
            },
            Command::StopSync => {
                if let Some(task) = self.sync_task.take() {
                    task.stop();
                }
            }
            Command::ApplySnapshot(snapshot) => self.mirror.inject_complete_state(snapshot),
            Command::ApplyAttack(rows) => self.lock_engine().receive_attack_rows(rows),
            Command::Disconnect => {
                if let Some(endpoint) = self.endpoint.take() {
                    endpoint.disconnect();
                    self.retired.push(endpoint);
                }
                self.events = None;
            }
            Command::Close => self.teardown(),
            Command::Listen(_) | Command::Connect(_) => {
                warn!("{:?} needs execute(), ignored", command)
            }
        }
    }

    fn teardown(&mut self) {
        self.sync_task = None;
        self.retired.retain(Endpoint::is_flushing);
        if let Some(endpoint) = self.endpoint.take() {
            endpoint.close();
            self.retired.push(endpoint);
        }
        self.events = None;
    }

    /// Stops syncing, closes the connection and waits for every frame
    /// already queued, such as a final GAME_OVER or DISCONNECT, to be
    /// written. Call before the runtime is dropped.
    pub async fn shutdown(&mut self) {
        self.teardown();
        for endpoint in self.retired.drain(..) {
            endpoint.shutdown().await;
        }
    }

    fn lock_engine(&self) -> MutexGuard<'_, E> {
        self.engine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn mirror(&self) -> &Mirror {
        &self.mirror
    }

    pub fn engine(&self) -> Arc<Mutex<E>> {
        Arc::clone(&self.engine)
    }

    pub fn endpoint(&self) -> Option<&Endpoint> {
        self.endpoint.as_ref()
    }

    pub fn is_syncing(&self) -> bool {
        self.sync_task.is_some()
    }
}

impl<E> Drop for Controller<E> {
    fn drop(&mut self) {
        self.sync_task = None;
        if let Some(endpoint) = self.endpoint.take() {
            endpoint.close();
        }
    }
}
