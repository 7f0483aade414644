//! Loopback tests for the versus link
//!
//! These run real TCP connections on 127.0.0.1 and exercise the transport and
//! session layers together.

use session::{AttackQueue, Controller, LocalEngine, Screen, ScriptedEngine, SyncConfig};
use shared::{AttackRow, BattleMode, GameSnapshot, Packet};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tokio_test::assert_ok;
use transport::{
    ConnectionState, Endpoint, EndpointConfig, EventReceiver, LinkConfig, TransportError,
    TransportEvent,
};

fn loopback() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)
}

async fn next_event(events: &mut EventReceiver) -> TransportEvent {
    timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for transport event")
        .expect("event channel closed")
}

/// Engine with a fixed board that records every garbage row handed to it.
struct FixedEngine {
    snapshot: GameSnapshot,
    outgoing: AttackQueue,
    received: Vec<AttackRow>,
}

impl FixedEngine {
    fn new() -> Self {
        Self {
            snapshot: GameSnapshot::empty(10, 20),
            outgoing: AttackQueue::new(),
            received: Vec::new(),
        }
    }
}

impl LocalEngine for FixedEngine {
    fn snapshot(&self) -> GameSnapshot {
        self.snapshot.clone()
    }

    fn drain_outgoing_attack_rows(&mut self) -> Vec<AttackRow> {
        self.outgoing.drain_all()
    }

    fn receive_attack_rows(&mut self, rows: Vec<AttackRow>) {
        self.received.extend(rows);
    }
}

/// TRANSPORT LIFECYCLE TESTS
mod transport_tests {
    use super::*;

    /// No peer within the accept window: error, back to idle, restartable
    #[tokio::test]
    async fn accept_timeout_then_restart() {
        let link = LinkConfig {
            accept_timeout: Duration::from_millis(200),
            ..LinkConfig::default()
        };
        let (server, mut events) =
            Endpoint::new(EndpointConfig::server_on(loopback()).with_link(link));

        assert_ok!(server.start().await);
        assert_eq!(
            next_event(&mut events).await,
            TransportEvent::Error(TransportError::AcceptTimeout)
        );
        assert_eq!(server.state(), ConnectionState::Idle);
        assert_eq!(TransportError::AcceptTimeout.to_string(), "accept timeout");

        // The listener is gone, so a fresh start binds again
        assert_ok!(server.start().await);
        let addr = server.local_addr().unwrap();
        let (client, mut client_events) = Endpoint::new(EndpointConfig::client(addr));
        assert_ok!(client.start().await);

        assert!(matches!(
            next_event(&mut events).await,
            TransportEvent::Connected { .. }
        ));
        assert!(matches!(
            next_event(&mut client_events).await,
            TransportEvent::Connected { .. }
        ));

        server.close();
        client.close();
    }

    /// A peer that accepts but never writes is dropped exactly once
    #[tokio::test]
    async fn silent_peer_times_out_once() {
        let listener = tokio::net::TcpListener::bind(loopback()).await.unwrap();
        let addr = listener.local_addr().unwrap();

        let link = LinkConfig {
            check_interval: Duration::from_millis(10),
            lag_threshold: Duration::from_millis(50),
            silence_timeout: Duration::from_millis(300),
            ..LinkConfig::default()
        };
        let (client, mut events) = Endpoint::new(EndpointConfig::client(addr).with_link(link));
        assert_ok!(client.start().await);
        let (_silent, _) = listener.accept().await.unwrap();

        assert!(matches!(
            next_event(&mut events).await,
            TransportEvent::Connected { .. }
        ));

        sleep(Duration::from_millis(800)).await;

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        let timeouts = seen
            .iter()
            .filter(|event| **event == TransportEvent::Disconnected(TransportError::TimeoutDisconnected))
            .count();
        assert_eq!(timeouts, 1, "events: {:?}", seen);
        assert_eq!(
            seen.iter().filter(|event| matches!(event, TransportEvent::Disconnected(_))).count(),
            1
        );
        assert_eq!(seen.first(), Some(&TransportEvent::LagChanged(true)));
        assert_eq!(TransportError::TimeoutDisconnected.to_string(), "timeout");

        assert!(!client.is_connected());
        assert!(!client.send(Packet::ready()));
    }
}

/// SESSION SCENARIOS
mod session_tests {
    use super::*;

    fn manual_sync() -> SyncConfig {
        SyncConfig {
            interval: Duration::from_secs(3600),
        }
    }

    async fn pump<E: LocalEngine + Send + 'static>(controller: &mut Controller<E>) -> TransportEvent {
        timeout(Duration::from_secs(5), controller.next_event())
            .await
            .expect("timed out waiting for an event")
            .expect("event stream ended")
    }

    async fn pump_until<E, F>(controller: &mut Controller<E>, done: F)
    where
        E: LocalEngine + Send + 'static,
        F: Fn(&Controller<E>) -> bool,
    {
        while !done(controller) {
            pump(controller).await;
        }
    }

    /// Connects two controllers and walks both through the ready rendezvous.
    async fn start_match<H, G>(host_engine: H, guest_engine: G) -> (Controller<H>, Controller<G>)
    where
        H: LocalEngine + Send + 'static,
        G: LocalEngine + Send + 'static,
    {
        let mut host = Controller::new(host_engine).with_sync(manual_sync());
        assert_ok!(host.host(loopback()).await);
        let addr = host.endpoint().and_then(Endpoint::local_addr).unwrap();

        let mut guest = Controller::new(guest_engine).with_sync(manual_sync());
        assert_ok!(guest.join(addr).await);

        pump_until(&mut host, |c| c.session().screen() == Screen::ModeSelection).await;
        host.select_mode(BattleMode::Normal);
        host.mark_ready();

        pump_until(&mut guest, |c| c.session().screen() == Screen::ReadyWaiting).await;
        guest.mark_ready();

        pump_until(&mut guest, |c| c.session().screen() == Screen::Playing).await;
        pump_until(&mut host, |c| c.session().screen() == Screen::Playing).await;
        assert_eq!(host.session().games_started(), 1);
        assert_eq!(guest.session().games_started(), 1);

        (host, guest)
    }

    /// Ten manual ticks leave the guest's mirror identical to the host board
    #[tokio::test]
    async fn mirror_matches_after_ten_ticks() {
        let (mut host, mut guest) =
            start_match(ScriptedEngine::new(11), ScriptedEngine::new(12)).await;

        for _ in 0..10 {
            {
                let engine = host.engine();
                let mut engine = engine.lock().unwrap();
                for _ in 0..3 {
                    engine.step(50);
                }
            }
            let report = host.push_snapshot().expect("host is playing");
            assert!(report.state_sent);
        }

        pump_until(&mut guest, |c| c.mirror().received() >= 10).await;
        assert_eq!(guest.mirror().received(), 10);

        let expected = host.engine().lock().unwrap().snapshot();
        let mirrored = guest.mirror().snapshot().expect("mirror has a snapshot");
        assert_eq!(mirrored.board, expected.board);
        assert_eq!(mirrored, expected);
    }

    /// Rows owed by one side end up in the other side's engine
    #[tokio::test]
    async fn attack_rows_reach_the_opponent() {
        let (mut host, mut guest) = start_match(ScriptedEngine::new(3), FixedEngine::new()).await;

        let rows: Vec<AttackRow> = vec![
            (0..10).map(|x| if x == 4 { 0 } else { 0xFF80_8080 }).collect(),
            (0..10).map(|x| if x == 7 { 0 } else { 0xFF12_3456 }).collect(),
        ];
        {
            let engine = host.engine();
            let mut engine = engine.lock().unwrap();
            for row in rows.clone() {
                engine.queue_attack(row);
            }
        }

        let report = host.push_snapshot().expect("host is playing");
        assert_eq!(report.attack_rows, 2);
        assert_eq!(host.push_snapshot().map(|r| r.attack_rows), Some(0));

        pump_until(&mut guest, |c| !c.engine().lock().unwrap().received.is_empty()).await;
        assert_eq!(guest.engine().lock().unwrap().received, rows);
    }

    /// Closing one side mid-game drops the other back to role selection
    #[tokio::test]
    async fn peer_close_mid_game_ends_session_once() {
        let (mut host, guest) = start_match(ScriptedEngine::new(5), FixedEngine::new()).await;

        guest.endpoint().expect("guest is connected").close();

        let mut disconnects = Vec::new();
        while let Some(event) = timeout(Duration::from_secs(5), host.next_event())
            .await
            .expect("timed out waiting for an event")
        {
            if let TransportEvent::Disconnected(reason) = event {
                disconnects.push(reason);
            }
        }

        assert_eq!(disconnects, vec![TransportError::PeerDisconnected]);
        assert_eq!(host.session().screen(), Screen::RoleSelection);
        assert_eq!(
            host.session().last_error(),
            Some(&TransportError::PeerDisconnected)
        );
        assert!(host.endpoint().is_none());
        assert!(!host.is_syncing());
    }

    /// A local loss is announced and both sides agree on the winner
    #[tokio::test]
    async fn local_loss_is_reported_to_the_peer() {
        let (mut host, mut guest) = start_match(ScriptedEngine::new(8), FixedEngine::new()).await;

        guest.report_local_loss();
        assert_eq!(guest.session().screen(), Screen::GameOver);

        pump_until(&mut host, |c| c.session().screen() == Screen::GameOver).await;
        let host_outcome = host.session().outcome().expect("host has an outcome");
        let guest_outcome = guest.session().outcome().expect("guest has an outcome");
        assert_eq!(host_outcome.winner, guest_outcome.winner);
        assert_eq!(host_outcome.winner, shared::Role::Server);
    }

    /// The loser's runtime ends right after the loss, yet the winner still
    /// hears GAME_OVER and then a clean disconnect
    #[tokio::test]
    async fn loss_survives_loser_exiting_immediately() {
        let mut host = Controller::new(ScriptedEngine::new(21)).with_sync(manual_sync());
        assert_ok!(host.host(loopback()).await);
        let addr = host.endpoint().and_then(Endpoint::local_addr).unwrap();

        let loser = std::thread::spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            runtime.block_on(async move {
                let mut guest = Controller::new(FixedEngine::new()).with_sync(manual_sync());
                assert_ok!(guest.join(addr).await);
                pump_until(&mut guest, |c| c.session().screen() == Screen::ReadyWaiting).await;
                guest.mark_ready();
                pump_until(&mut guest, |c| c.session().screen() == Screen::Playing).await;

                guest.report_local_loss();
                guest.return_to_menu();
                guest.shutdown().await;
                assert!(guest.endpoint().is_none());
            });
            // The runtime and every task on it are gone from here on.
        });

        pump_until(&mut host, |c| c.session().screen() == Screen::ModeSelection).await;
        host.select_mode(BattleMode::Normal);
        host.mark_ready();
        pump_until(&mut host, |c| c.session().screen() == Screen::GameOver).await;

        let outcome = host.session().outcome().expect("host has an outcome");
        assert_eq!(outcome.winner, shared::Role::Server);

        let mut disconnects = Vec::new();
        while let Some(event) = timeout(Duration::from_secs(5), host.next_event())
            .await
            .expect("timed out waiting for an event")
        {
            if let TransportEvent::Disconnected(reason) = event {
                disconnects.push(reason);
            }
        }
        assert_eq!(disconnects, vec![TransportError::PeerDisconnected]);

        tokio::task::spawn_blocking(move || loser.join())
            .await
            .unwrap()
            .unwrap();
    }
}
