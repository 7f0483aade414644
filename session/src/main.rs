use clap::Parser;
use log::{info, warn};
use session::{Controller, LocalEngine, Screen, ScriptedEngine};
use shared::{BattleMode, DEFAULT_PORT};
use std::net::SocketAddr;
use std::sync::PoisonError;
use tokio::time::{interval, Duration, Instant, MissedTickBehavior};
use transport::parse_peer_addr;

/// Headless versus match between two scripted players.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Wait for an opponent
    #[arg(long, conflicts_with = "connect")]
    host: bool,

    /// Opponent address (ip or ip:port)
    #[arg(short, long)]
    connect: Option<String>,

    /// Port to listen on or connect to
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Battle mode when hosting: normal, item or timelimit
    #[arg(short, long, default_value = "normal")]
    mode: BattleMode,

    /// Round length in seconds for timelimit mode
    #[arg(long, default_value = "120")]
    time_limit: u64,

    /// Milliseconds per gravity step
    #[arg(long, default_value = "150")]
    gravity_ms: u64,

    /// Seed for the local piece sequence
    #[arg(long)]
    seed: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let seed = args.seed.unwrap_or_else(rand::random);
    let engine = ScriptedEngine::with_mode(seed, args.mode);
    let mut controller = Controller::new(engine);

    if args.host {
        let bind = SocketAddr::from(([0, 0, 0, 0], args.port));
        controller.host(bind).await?;
    } else if let Some(target) = &args.connect {
        let peer = parse_peer_addr(target, args.port)?;
        controller.join(peer).await?;
    } else {
        return Err("pass --host or --connect <ip>".into());
    }

    run_match(&mut controller, &args).await;
    // Let GAME_OVER and DISCONNECT reach the peer before the runtime exits.
    controller.shutdown().await;
    Ok(())
}

/// Drives the session until the game ends, the link drops or Ctrl+C.
async fn run_match(controller: &mut Controller<ScriptedEngine>, args: &Args) {
    let mut gravity = interval(Duration::from_millis(args.gravity_ms.max(1)));
    gravity.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut status = interval(Duration::from_secs(2));
    status.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let time_limit = Duration::from_secs(args.time_limit);
    let mut started: Option<Instant> = None;

    loop {
        tokio::select! {
            event = controller.next_event() => {
                if event.is_none() {
                    info!("Connection gone, leaving");
                    break;
                }
                if !advance_screen(controller, args.mode) {
                    break;
                }
            }
            _ = gravity.tick() => {
                if controller.session().screen() != Screen::Playing {
                    continue;
                }
                let start = *started.get_or_insert_with(Instant::now);
                {
                    let engine = controller.engine();
                    let mut engine = engine.lock().unwrap_or_else(PoisonError::into_inner);
                    engine.step(args.gravity_ms);
                }
                if controller.check_local_loss() {
                    info!("Topped out");
                } else if controller.session().mode() == Some(BattleMode::TimeLimit)
                    && start.elapsed() >= time_limit
                {
                    controller.time_limit_expired();
                }
                if !advance_screen(controller, args.mode) {
                    break;
                }
            }
            _ = status.tick() => print_status(controller),
            _ = tokio::signal::ctrl_c() => {
                println!("Received Ctrl+C, leaving the match...");
                controller.cancel();
                break;
            }
        }
    }
}

/// Performs the automatic local actions for the current screen. Returns
/// `false` once the match is over.
fn advance_screen(controller: &mut Controller<ScriptedEngine>, mode: BattleMode) -> bool {
    match controller.session().screen() {
        Screen::ModeSelection => {
            controller.select_mode(mode);
            controller.mark_ready();
            true
        }
        Screen::ReadyWaiting => {
            controller.mark_ready();
            true
        }
        Screen::GameOver => {
            if let (Some(outcome), Some(role)) =
                (controller.session().outcome(), controller.session().role())
            {
                let verdict = if outcome.winner == role { "won" } else { "lost" };
                println!("You {} ({:?})", verdict, outcome.cause);
            }
            print_status(controller);
            controller.return_to_menu();
            false
        }
        Screen::RoleSelection => {
            match controller.session().last_error() {
                Some(reason) => warn!("Session ended: {}", reason),
                None => info!("Session ended"),
            }
            false
        }
        Screen::ServerWaiting | Screen::ClientConnecting | Screen::Playing => true,
    }
}

fn print_status(controller: &Controller<ScriptedEngine>) {
    let session = controller.session();
    let local = {
        let engine = controller.engine();
        let engine = engine.lock().unwrap_or_else(PoisonError::into_inner);
        engine.score()
    };
    let remote = controller
        .mirror()
        .with_snapshot(|snapshot| snapshot.map(|s| (s.score, s.lines_cleared)));

    info!(
        "{:?} | latency {:?} | lagging {} | score {} | opponent {:?} ({} snapshots)",
        session.screen(),
        session.latency(),
        session.is_lagging(),
        local,
        remote,
        controller.mirror().received()
    );
}
