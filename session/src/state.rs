//! Screen flow of one versus session.
//!
//! `Session` performs no I/O. Every input (a local action or a transport
//! event) mutates it and yields the [`Command`]s the caller has to carry out,
//! which keeps the rendezvous logic testable without sockets or timers.

use log::{debug, info, warn};
use shared::{AttackRow, BattleMode, GameSnapshot, Packet, Payload, Role};
use std::net::SocketAddr;
use std::time::Duration;
use transport::{TransportError, TransportEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    RoleSelection,
    ServerWaiting,
    ClientConnecting,
    ModeSelection,
    ReadyWaiting,
    Playing,
    GameOver,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameOverCause {
    /// The local engine topped out.
    LocalLoss,
    /// The peer sent GAME_OVER.
    RemoteReport,
    /// The round clock ran out and scores were compared.
    TimeLimit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outcome {
    pub winner: Role,
    pub cause: GameOverCause,
}

/// Side effects requested by the session.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Listen(SocketAddr),
    Connect(SocketAddr),
    Send(Packet),
    StartSync,
    StopSync,
    ApplySnapshot(GameSnapshot),
    ApplyAttack(Vec<AttackRow>),
    /// Tell the peer we are leaving, then close.
    Disconnect,
    Close,
}

#[derive(Debug, Clone)]
pub struct Session {
    role: Option<Role>,
    screen: Screen,
    mode: Option<BattleMode>,
    seed: Option<u64>,
    local_ready: bool,
    remote_ready: bool,
    outcome: Option<Outcome>,
    lagging: bool,
    latency: Option<Duration>,
    last_error: Option<TransportError>,
    games_started: u32,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    /// Fresh session on the role selection screen.
    pub fn new() -> Self {
        Self {
            role: None,
            screen: Screen::RoleSelection,
            mode: None,
            seed: None,
            local_ready: false,
            remote_ready: false,
            outcome: None,
            lagging: false,
            latency: None,
            last_error: None,
            games_started: 0,
        }
    }

    /// Takes the Server role and asks for a listener on `bind`.
    pub fn choose_server(&mut self, bind: SocketAddr) -> Vec<Command> {
        if !self.pick_role(Role::Server) {
            return Vec::new();
        }
        self.screen = Screen::ServerWaiting;
        info!("Waiting for an opponent on {}", bind);
        vec![Command::Listen(bind)]
    }

    /// Takes the Client role and asks for a connection to `peer`.
    pub fn choose_client(&mut self, peer: SocketAddr) -> Vec<Command> {
        if !self.pick_role(Role::Client) {
            return Vec::new();
        }
        self.screen = Screen::ClientConnecting;
        info!("Connecting to {}", peer);
        vec![Command::Connect(peer)]
    }

    fn pick_role(&mut self, role: Role) -> bool {
        if self.screen != Screen::RoleSelection {
            warn!(
                "Role is already {:?}, ignoring request to become {}",
                self.role, role
            );
            return false;
        }
        self.role = Some(role);
        self.last_error = None;
        true
    }

    /// Server only: pick the battle mode and announce it.
    pub fn select_mode(&mut self, mode: BattleMode, seed: u64) -> Vec<Command> {
        if self.role != Some(Role::Server) || self.screen != Screen::ModeSelection {
            warn!("Mode selection is not available on {:?}", self.screen);
            return Vec::new();
        }
        self.mode = Some(mode);
        self.seed = Some(seed);
        self.screen = Screen::ReadyWaiting;
        info!("Battle mode {:?} selected", mode);

        let mut commands = vec![Command::Send(Packet::mode_select(mode, seed))];
        self.try_start(&mut commands);
        commands
    }

    /// Marks the local player ready. Repeated calls are no-ops.
    pub fn mark_ready(&mut self) -> Vec<Command> {
        if self.screen != Screen::ReadyWaiting {
            debug!("Ready ignored on {:?}", self.screen);
            return Vec::new();
        }
        if self.local_ready {
            return Vec::new();
        }
        self.local_ready = true;

        let mut commands = vec![Command::Send(Packet::ready())];
        self.try_start(&mut commands);
        commands
    }

    /// Shared by the local click and the remote READY: whichever completes
    /// the pair starts the game.
    fn try_start(&mut self, commands: &mut Vec<Command>) {
        if self.screen != Screen::ReadyWaiting || !self.local_ready || !self.remote_ready {
            return;
        }
        self.screen = Screen::Playing;
        self.outcome = None;
        self.games_started += 1;
        info!("Both players ready, game on");

        if self.role == Some(Role::Server) {
            commands.push(Command::Send(Packet::new(Payload::GameStart)));
        }
        commands.push(Command::StartSync);
    }

    /// The local engine topped out: the other player wins.
    pub fn report_local_loss(&mut self) -> Vec<Command> {
        let Some(role) = self.playing_role() else {
            return Vec::new();
        };
        let winner = role.other();
        self.finish(winner, GameOverCause::LocalLoss);
        vec![Command::StopSync, Command::Send(Packet::game_over(winner))]
    }

    /// Decides a time-limit round locally. Ties go to the Server.
    pub fn time_limit_expired(&mut self, local_score: u64, remote_score: u64) -> Vec<Command> {
        let Some(role) = self.playing_role() else {
            return Vec::new();
        };
        let (server_score, client_score) = match role {
            Role::Server => (local_score, remote_score),
            Role::Client => (remote_score, local_score),
        };
        let winner = if server_score >= client_score {
            Role::Server
        } else {
            Role::Client
        };
        self.finish(winner, GameOverCause::TimeLimit);
        vec![Command::StopSync]
    }

    fn playing_role(&self) -> Option<Role> {
        if self.screen == Screen::Playing {
            self.role
        } else {
            None
        }
    }

    fn finish(&mut self, winner: Role, cause: GameOverCause) {
        if let Some(previous) = self.outcome {
            if previous.winner != winner {
                warn!(
                    "Conflicting game over: {} replaces {} as winner",
                    winner, previous.winner
                );
            }
        }
        self.screen = Screen::GameOver;
        self.outcome = Some(Outcome { winner, cause });
        info!("Game over, {} wins ({:?})", winner, cause);
    }

    /// Leaves the session from any screen.
    pub fn cancel(&mut self) -> Vec<Command> {
        if self.screen == Screen::RoleSelection {
            return Vec::new();
        }
        info!("Session cancelled on {:?}", self.screen);
        self.reset();
        vec![Command::StopSync, Command::Disconnect]
    }

    /// Leaves the game over screen. Same teardown as [`Session::cancel`].
    pub fn return_to_menu(&mut self) -> Vec<Command> {
        self.cancel()
    }

    /// Feeds one transport event through the state machine. Terminal events
    /// reset the session and keep the reason in [`Session::last_error`].
    pub fn handle_event(&mut self, event: TransportEvent) -> Vec<Command> {
        match event {
            TransportEvent::Connected { peer } => self.on_connected(peer),
            TransportEvent::PacketReceived(packet) => self.handle_packet(packet),
            TransportEvent::LagChanged(lagging) => {
                self.lagging = lagging;
                Vec::new()
            }
            TransportEvent::Disconnected(reason) | TransportEvent::Error(reason) => {
                self.terminate(reason)
            }
        }
    }

    fn on_connected(&mut self, peer: SocketAddr) -> Vec<Command> {
        match (self.role, self.screen) {
            (Some(Role::Server), Screen::ServerWaiting) => {
                info!("Opponent {} connected", peer);
                self.screen = Screen::ModeSelection;
                Vec::new()
            }
            (Some(Role::Client), Screen::ClientConnecting) => {
                info!("Connected to {}", peer);
                self.screen = Screen::ReadyWaiting;
                vec![Command::Send(Packet::connection_request("hello"))]
            }
            _ => {
                warn!("Unexpected connection from {} on {:?}", peer, self.screen);
                Vec::new()
            }
        }
    }

    /// Reacts to one packet from the peer. Packets that make no sense on the
    /// current screen are logged and dropped.
    pub fn handle_packet(&mut self, packet: Packet) -> Vec<Command> {
        let kind = packet.kind();
        match packet.payload {
            Payload::ConnectionRequest { message } => {
                debug!("Connection request: {}", message);
                if self.role == Some(Role::Server) {
                    vec![Command::Send(Packet::connection_accepted("welcome"))]
                } else {
                    Vec::new()
                }
            }
            Payload::ConnectionAccepted { message } => {
                debug!("Connection accepted: {}", message);
                Vec::new()
            }
            Payload::GameModeSelect { mode, random_seed } => {
                info!("Opponent selected {:?}", mode);
                self.mode = Some(mode);
                self.seed = Some(random_seed);
                Vec::new()
            }
            Payload::Ready { .. } | Payload::GameStart => {
                self.remote_ready = true;
                let mut commands = Vec::new();
                self.try_start(&mut commands);
                commands
            }
            Payload::GameState(snapshot) if self.screen == Screen::Playing => {
                vec![Command::ApplySnapshot(snapshot)]
            }
            Payload::AttackBlocks { rows } if self.screen == Screen::Playing => {
                debug!("Received {} attack rows", rows.len());
                vec![Command::ApplyAttack(rows)]
            }
            Payload::GameOver { winner } => {
                if matches!(self.screen, Screen::Playing | Screen::GameOver) {
                    self.finish(winner, GameOverCause::RemoteReport);
                    vec![Command::StopSync]
                } else {
                    debug!("Stale game over on {:?}", self.screen);
                    Vec::new()
                }
            }
            Payload::Disconnect => self.terminate(TransportError::PeerDisconnected),
            Payload::ChatMessage { message } => {
                debug!("Chat: {}", message);
                Vec::new()
            }
            Payload::GameState(_) | Payload::AttackBlocks { .. } => {
                debug!("Dropped {:?} outside of a game", kind);
                Vec::new()
            }
            Payload::Ping | Payload::Pong => Vec::new(),
        }
    }

    fn terminate(&mut self, reason: TransportError) -> Vec<Command> {
        warn!("Link ended on {:?}: {}", self.screen, reason);
        let was_active = self.screen != Screen::RoleSelection;
        self.reset();
        self.last_error = Some(reason);
        if was_active {
            vec![Command::StopSync, Command::Close]
        } else {
            Vec::new()
        }
    }

    fn reset(&mut self) {
        let last_error = self.last_error.take();
        let games_started = self.games_started;
        *self = Self {
            last_error,
            games_started,
            ..Self::new()
        };
    }

    /// Latest round trip reported by the transport.
    pub fn set_latency(&mut self, latency: Option<Duration>) {
        self.latency = latency;
    }

    /// `None` until a role is chosen, and again after a reset.
    pub fn role(&self) -> Option<Role> {
        self.role
    }

    pub fn screen(&self) -> Screen {
        self.screen
    }

    /// Battle mode of the current game, once the Server announced it.
    pub fn mode(&self) -> Option<BattleMode> {
        self.mode
    }

    /// Seed announced with the mode. Stored for a future synchronized
    /// piece sequence; nothing reads it yet.
    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    pub fn is_local_ready(&self) -> bool {
        self.local_ready
    }

    /// Whether the peer's READY has arrived for the upcoming game.
    pub fn is_remote_ready(&self) -> bool {
        self.remote_ready
    }

    /// Winner and cause of the last finished game. Cleared when a new game
    /// starts or the session resets.
    pub fn outcome(&self) -> Option<Outcome> {
        self.outcome
    }

    pub fn is_lagging(&self) -> bool {
        self.lagging
    }

    pub fn latency(&self) -> Option<Duration> {
        self.latency
    }

    /// Why the previous connection ended, if it ended badly.
    pub fn last_error(&self) -> Option<&TransportError> {
        self.last_error.as_ref()
    }

    /// Games started since the session was created. Survives resets.
    pub fn games_started(&self) -> u32 {
        self.games_started
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::PacketKind;

    fn addr() -> SocketAddr {
        "127.0.0.1:15555".parse().unwrap()
    }

    fn connected() -> TransportEvent {
        TransportEvent::Connected { peer: addr() }
    }

    fn received(payload: Payload) -> TransportEvent {
        TransportEvent::PacketReceived(Packet::new(payload))
    }

    fn sent_kinds(commands: &[Command]) -> Vec<PacketKind> {
        commands
            .iter()
            .filter_map(|command| match command {
                Command::Send(packet) => Some(packet.kind()),
                _ => None,
            })
            .collect()
    }

    fn server_in_ready_waiting() -> Session {
        let mut session = Session::new();
        assert_eq!(session.choose_server(addr()), vec![Command::Listen(addr())]);
        assert!(session.handle_event(connected()).is_empty());
        assert_eq!(session.screen(), Screen::ModeSelection);

        let commands = session.select_mode(BattleMode::Normal, 99);
        assert_eq!(sent_kinds(&commands), vec![PacketKind::GameModeSelect]);
        assert_eq!(session.screen(), Screen::ReadyWaiting);
        session
    }

    fn client_in_ready_waiting() -> Session {
        let mut session = Session::new();
        assert_eq!(session.choose_client(addr()), vec![Command::Connect(addr())]);
        let commands = session.handle_event(connected());
        assert_eq!(sent_kinds(&commands), vec![PacketKind::ConnectionRequest]);
        assert_eq!(session.screen(), Screen::ReadyWaiting);
        session
    }

    fn playing_server() -> Session {
        let mut session = server_in_ready_waiting();
        session.mark_ready();
        session.handle_event(received(Payload::Ready {
            message: "ready".into(),
        }));
        assert_eq!(session.screen(), Screen::Playing);
        session
    }

    #[test]
    fn test_local_then_remote_ready() {
        let mut session = server_in_ready_waiting();

        let commands = session.mark_ready();
        assert_eq!(sent_kinds(&commands), vec![PacketKind::Ready]);
        assert_eq!(session.screen(), Screen::ReadyWaiting);

        let commands = session.handle_event(received(Payload::Ready {
            message: "ready".into(),
        }));
        assert_eq!(session.screen(), Screen::Playing);
        assert_eq!(sent_kinds(&commands), vec![PacketKind::GameStart]);
        assert!(commands.contains(&Command::StartSync));
        assert_eq!(session.games_started(), 1);
    }

    #[test]
    fn test_remote_then_local_ready() {
        let mut session = client_in_ready_waiting();

        let commands = session.handle_event(received(Payload::Ready {
            message: "ready".into(),
        }));
        assert!(commands.is_empty());
        assert_eq!(session.screen(), Screen::ReadyWaiting);

        let commands = session.mark_ready();
        assert_eq!(session.screen(), Screen::Playing);
        assert_eq!(sent_kinds(&commands), vec![PacketKind::Ready]);
        assert_eq!(commands.last(), Some(&Command::StartSync));
        assert_eq!(session.games_started(), 1);
    }

    #[test]
    fn test_playing_entered_once() {
        let mut session = server_in_ready_waiting();
        session.mark_ready();
        session.handle_event(received(Payload::Ready {
            message: "ready".into(),
        }));

        assert!(session.mark_ready().is_empty());
        assert!(session
            .handle_event(received(Payload::Ready {
                message: "ready".into()
            }))
            .is_empty());
        assert!(session.handle_event(received(Payload::GameStart)).is_empty());
        assert_eq!(session.games_started(), 1);
    }

    #[test]
    fn test_ready_before_mode_is_remembered() {
        let mut session = Session::new();
        session.choose_server(addr());
        session.handle_event(connected());
        session.handle_event(received(Payload::Ready {
            message: "ready".into(),
        }));
        assert!(session.is_remote_ready());
        assert_eq!(session.screen(), Screen::ModeSelection);

        session.select_mode(BattleMode::Item, 1);
        let commands = session.mark_ready();
        assert_eq!(session.screen(), Screen::Playing);
        assert_eq!(
            sent_kinds(&commands),
            vec![PacketKind::Ready, PacketKind::GameStart]
        );
    }

    #[test]
    fn test_game_start_completes_rendezvous() {
        let mut session = client_in_ready_waiting();
        session.mark_ready();
        let commands = session.handle_event(received(Payload::GameStart));
        assert_eq!(commands, vec![Command::StartSync]);
        assert_eq!(session.screen(), Screen::Playing);
    }

    #[test]
    fn test_mode_arrives_at_any_time() {
        let mut session = Session::new();
        session.choose_client(addr());
        session.handle_event(received(Payload::GameModeSelect {
            mode: BattleMode::TimeLimit,
            random_seed: 7,
        }));
        assert_eq!(session.mode(), Some(BattleMode::TimeLimit));
        assert_eq!(session.seed(), Some(7));

        session.handle_event(connected());
        session.handle_event(received(Payload::GameModeSelect {
            mode: BattleMode::Item,
            random_seed: 8,
        }));
        assert_eq!(session.mode(), Some(BattleMode::Item));
    }

    #[test]
    fn test_client_cannot_select_mode() {
        let mut session = client_in_ready_waiting();
        assert!(session.select_mode(BattleMode::Item, 1).is_empty());
        assert_eq!(session.mode(), None);
    }

    #[test]
    fn test_role_is_fixed_once_chosen() {
        let mut session = Session::new();
        session.choose_server(addr());
        assert!(session.choose_client(addr()).is_empty());
        assert_eq!(session.role(), Some(Role::Server));
    }

    #[test]
    fn test_server_answers_connection_request() {
        let mut session = Session::new();
        session.choose_server(addr());
        session.handle_event(connected());
        let commands = session.handle_event(received(Payload::ConnectionRequest {
            message: "hello".into(),
        }));
        assert_eq!(sent_kinds(&commands), vec![PacketKind::ConnectionAccepted]);
    }

    #[test]
    fn test_snapshots_only_while_playing() {
        let mut session = server_in_ready_waiting();
        let snapshot = GameSnapshot::empty(10, 20);
        assert!(session
            .handle_event(received(Payload::GameState(snapshot.clone())))
            .is_empty());
        assert!(session
            .handle_event(received(Payload::AttackBlocks { rows: vec![vec![0; 10]] }))
            .is_empty());

        let mut session = playing_server();
        assert_eq!(
            session.handle_event(received(Payload::GameState(snapshot.clone()))),
            vec![Command::ApplySnapshot(snapshot)]
        );
        assert_eq!(
            session.handle_event(received(Payload::AttackBlocks { rows: vec![vec![1; 10]] })),
            vec![Command::ApplyAttack(vec![vec![1; 10]])]
        );
    }

    #[test]
    fn test_local_loss_names_the_opponent() {
        let mut session = playing_server();
        let commands = session.report_local_loss();

        assert_eq!(commands[0], Command::StopSync);
        match &commands[1] {
            Command::Send(packet) => {
                assert_eq!(packet.payload, Payload::GameOver { winner: Role::Client })
            }
            other => panic!("Unexpected command {:?}", other),
        }
        assert_eq!(
            session.outcome(),
            Some(Outcome {
                winner: Role::Client,
                cause: GameOverCause::LocalLoss
            })
        );
        assert!(session.report_local_loss().is_empty());
    }

    #[test]
    fn test_remote_game_over_is_last_writer_wins() {
        let mut session = playing_server();
        session.report_local_loss();
        let commands = session.handle_event(received(Payload::GameOver {
            winner: Role::Server,
        }));
        assert_eq!(commands, vec![Command::StopSync]);
        assert_eq!(session.screen(), Screen::GameOver);
        assert_eq!(
            session.outcome(),
            Some(Outcome {
                winner: Role::Server,
                cause: GameOverCause::RemoteReport
            })
        );
    }

    #[test]
    fn test_time_limit_ties_favor_server() {
        let mut session = playing_server();
        assert_eq!(session.time_limit_expired(300, 300), vec![Command::StopSync]);
        assert_eq!(session.outcome().map(|o| o.winner), Some(Role::Server));

        let mut session = client_in_ready_waiting();
        session.mark_ready();
        session.handle_event(received(Payload::GameStart));
        session.time_limit_expired(500, 200);
        assert_eq!(
            session.outcome(),
            Some(Outcome {
                winner: Role::Client,
                cause: GameOverCause::TimeLimit
            })
        );
    }

    #[test]
    fn test_disconnect_returns_to_role_selection() {
        let mut session = playing_server();
        let commands = session.handle_event(TransportEvent::Disconnected(
            TransportError::TimeoutDisconnected,
        ));

        assert_eq!(commands, vec![Command::StopSync, Command::Close]);
        assert_eq!(session.screen(), Screen::RoleSelection);
        assert_eq!(session.role(), None);
        assert_eq!(session.last_error(), Some(&TransportError::TimeoutDisconnected));
        assert!(!session.is_local_ready());
    }

    #[test]
    fn test_accept_timeout_while_waiting() {
        let mut session = Session::new();
        session.choose_server(addr());
        let commands = session.handle_event(TransportEvent::Error(TransportError::AcceptTimeout));
        assert_eq!(commands, vec![Command::StopSync, Command::Close]);
        assert_eq!(session.screen(), Screen::RoleSelection);

        assert_eq!(session.choose_server(addr()), vec![Command::Listen(addr())]);
        assert_eq!(session.last_error(), None);
    }

    #[test]
    fn test_cancel_sends_disconnect() {
        let mut session = client_in_ready_waiting();
        assert_eq!(session.cancel(), vec![Command::StopSync, Command::Disconnect]);
        assert_eq!(session.screen(), Screen::RoleSelection);
        assert!(session.cancel().is_empty());
    }

    #[test]
    fn test_lag_flag_follows_events() {
        let mut session = playing_server();
        session.handle_event(TransportEvent::LagChanged(true));
        assert!(session.is_lagging());
        session.handle_event(TransportEvent::LagChanged(false));
        assert!(!session.is_lagging());
    }
}
