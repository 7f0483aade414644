//! The local simulation as seen by the session layer.
//!
//! The real falling-block game lives outside this crate; the session only
//! needs to read a snapshot, collect penalty rows and hand incoming ones
//! back. [`ScriptedEngine`] is a small headless stand-in used by the `duel`
//! binary and the tests.

use crate::attack::AttackQueue;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::{Argb, AttackRow, BattleMode, BlockType, Cell, GameSnapshot};
use std::collections::VecDeque;

pub const BOARD_WIDTH: usize = 10;
pub const BOARD_HEIGHT: usize = 20;

/// Color used for garbage rows.
pub const GARBAGE_COLOR: Argb = 0xFF80_8080;

pub trait LocalEngine {
    /// Full visible state right now.
    fn snapshot(&self) -> GameSnapshot;

    /// Penalty rows owed to the opponent since the last call.
    fn drain_outgoing_attack_rows(&mut self) -> Vec<AttackRow>;

    /// Garbage sent by the opponent.
    fn receive_attack_rows(&mut self, rows: Vec<AttackRow>);

    fn is_game_over(&self) -> bool {
        false
    }

    fn score(&self) -> u64 {
        self.snapshot().score
    }
}

fn shape(block: BlockType) -> &'static [(i32, i32)] {
    match block {
        BlockType::I => &[(0, 0), (1, 0), (2, 0), (3, 0)],
        BlockType::O => &[(0, 0), (1, 0), (0, 1), (1, 1)],
        BlockType::T => &[(0, 0), (1, 0), (2, 0), (1, 1)],
        BlockType::S => &[(1, 0), (2, 0), (0, 1), (1, 1)],
        BlockType::Z => &[(0, 0), (1, 0), (1, 1), (2, 1)],
        BlockType::L => &[(0, 0), (0, 1), (0, 2), (1, 2)],
        BlockType::J => &[(1, 0), (1, 1), (1, 2), (0, 2)],
        BlockType::W => &[(0, 0), (1, 0), (2, 0), (3, 0), (1, 1), (2, 1)],
        BlockType::Dot => &[(0, 0)],
    }
}

fn color(block: BlockType) -> Argb {
    match block {
        BlockType::I => 0xFF00_FFFF,
        BlockType::O => 0xFFFF_FF00,
        BlockType::T => 0xFF80_00FF,
        BlockType::S => 0xFF00_FF00,
        BlockType::Z => 0xFFFF_0000,
        BlockType::L => 0xFFFF_8000,
        BlockType::J => 0xFF00_00FF,
        BlockType::W => 0xFF40_4040,
        BlockType::Dot => 0xFFFF_FFFF,
    }
}

const LINE_SCORES: [u64; 5] = [0, 100, 300, 500, 800];
const STANDARD_BLOCKS: [BlockType; 7] = [
    BlockType::I,
    BlockType::O,
    BlockType::T,
    BlockType::S,
    BlockType::Z,
    BlockType::L,
    BlockType::J,
];

#[derive(Debug, Clone, Copy)]
struct Piece {
    block: BlockType,
    x: i32,
    y: i32,
}

impl Piece {
    fn cells(self) -> impl Iterator<Item = (i32, i32)> {
        shape(self.block)
            .iter()
            .map(move |(dx, dy)| (self.x + dx, self.y + dy))
    }

    fn width(self) -> i32 {
        shape(self.block).iter().map(|(dx, _)| dx + 1).max().unwrap_or(1)
    }
}

/// Greedy auto-player: every piece drops into the column where it lands
/// deepest. Clearing two or more lines at once sends `lines - 1` garbage
/// rows.
pub struct ScriptedEngine {
    rng: StdRng,
    mode: BattleMode,
    board: Vec<Vec<Argb>>,
    active: Option<Piece>,
    next: BlockType,
    outgoing: AttackQueue,
    incoming: VecDeque<AttackRow>,
    score: u64,
    lines: u32,
    elapsed_ms: u64,
    time_stop_charge: bool,
    game_over: bool,
}

impl ScriptedEngine {
    pub fn new(seed: u64) -> Self {
        Self::with_mode(seed, BattleMode::Normal)
    }

    pub fn with_mode(seed: u64, mode: BattleMode) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let next = Self::roll(&mut rng, mode);
        let mut engine = Self {
            rng,
            mode,
            board: vec![vec![0; BOARD_WIDTH]; BOARD_HEIGHT],
            active: None,
            next,
            outgoing: AttackQueue::new(),
            incoming: VecDeque::new(),
            score: 0,
            lines: 0,
            elapsed_ms: 0,
            time_stop_charge: false,
            game_over: false,
        };
        engine.spawn();
        engine
    }

    fn roll(rng: &mut StdRng, mode: BattleMode) -> BlockType {
        if mode == BattleMode::Item && rng.gen_ratio(1, 10) {
            if rng.gen_bool(0.5) {
                BlockType::W
            } else {
                BlockType::Dot
            }
        } else {
            STANDARD_BLOCKS[rng.gen_range(0..STANDARD_BLOCKS.len())]
        }
    }

    pub fn level(&self) -> u32 {
        self.lines / 10 + 1
    }

    /// Advances the clock by `dt_ms` and lets the active piece fall one row.
    pub fn step(&mut self, dt_ms: u64) {
        if self.game_over {
            return;
        }
        self.elapsed_ms += dt_ms;

        let Some(piece) = self.active else {
            self.spawn();
            return;
        };

        let lowered = Piece {
            y: piece.y + 1,
            ..piece
        };
        if self.fits(lowered) {
            self.active = Some(lowered);
        } else {
            self.lock(piece);
            self.spawn();
        }
    }

    /// Queues a row for the opponent directly.
    pub fn queue_attack(&mut self, row: AttackRow) {
        self.outgoing.push(row);
    }

    pub fn pending_garbage(&self) -> usize {
        self.incoming.len()
    }

    fn fits(&self, piece: Piece) -> bool {
        piece.cells().all(|(x, y)| {
            x >= 0
                && (x as usize) < BOARD_WIDTH
                && y < BOARD_HEIGHT as i32
                && (y < 0 || self.board[y as usize][x as usize] == 0)
        })
    }

    fn landing_depth(&self, piece: Piece) -> Option<i32> {
        if !self.fits(piece) {
            return None;
        }
        let mut candidate = piece;
        while self.fits(Piece {
            y: candidate.y + 1,
            ..candidate
        }) {
            candidate.y += 1;
        }
        Some(candidate.y)
    }

    fn spawn(&mut self) {
        let block = self.next;
        self.next = Self::roll(&mut self.rng, self.mode);

        let width = Piece { block, x: 0, y: 0 }.width();
        let best = (0..=(BOARD_WIDTH as i32 - width))
            .filter_map(|x| {
                let piece = Piece { block, x, y: 0 };
                self.landing_depth(piece).map(|depth| (depth, x))
            })
            .max_by_key(|(depth, x)| (*depth, -x));

        match best {
            Some((_, x)) => self.active = Some(Piece { block, x, y: 0 }),
            None => {
                self.active = None;
                self.game_over = true;
            }
        }
    }

    fn lock(&mut self, piece: Piece) {
        for (x, y) in piece.cells() {
            if y < 0 {
                self.game_over = true;
                continue;
            }
            self.board[y as usize][x as usize] = color(piece.block);
        }

        let before = self.board.len();
        self.board.retain(|row| row.iter().any(|cell| *cell == 0));
        let cleared = before - self.board.len();
        for _ in 0..cleared {
            self.board.insert(0, vec![0; BOARD_WIDTH]);
        }

        if cleared > 0 {
            self.lines += cleared as u32;
            self.score += LINE_SCORES[cleared.min(4)] * u64::from(self.level());
            if self.mode == BattleMode::Item && self.lines % 10 < cleared as u32 {
                self.time_stop_charge = true;
            }
            for _ in 1..cleared {
                let hole = self.rng.gen_range(0..BOARD_WIDTH);
                let mut row = vec![GARBAGE_COLOR; BOARD_WIDTH];
                row[hole] = 0;
                self.outgoing.push(row);
            }
        }

        self.insert_garbage();
    }

    /// Pushes queued garbage in from the bottom. Overflowing the top ends
    /// the game.
    fn insert_garbage(&mut self) {
        while let Some(mut row) = self.incoming.pop_front() {
            row.resize(BOARD_WIDTH, 0);
            let top = self.board.remove(0);
            if top.iter().any(|cell| *cell != 0) {
                self.game_over = true;
            }
            self.board.push(row);
        }
    }
}

impl LocalEngine for ScriptedEngine {
    fn snapshot(&self) -> GameSnapshot {
        let mut snapshot = GameSnapshot::empty(BOARD_WIDTH, BOARD_HEIGHT);
        for (y, row) in self.board.iter().enumerate() {
            for (x, argb) in row.iter().enumerate() {
                if *argb != 0 {
                    snapshot.board[y][x] = Cell::Fixed;
                    snapshot.colors[y][x] = *argb;
                }
            }
        }

        if let Some(piece) = self.active {
            for (x, y) in piece.cells() {
                if y >= 0 {
                    snapshot.board[y as usize][x as usize] = Cell::Falling;
                    snapshot.colors[y as usize][x as usize] = color(piece.block);
                }
            }
            snapshot.block_x = piece.x;
            snapshot.block_y = piece.y;
            snapshot.current = Some(piece.block);
        }

        snapshot.next = Some(self.next);
        snapshot.score = self.score;
        snapshot.level = self.level();
        snapshot.lines_cleared = self.lines;
        snapshot.elapsed_ms = self.elapsed_ms;
        snapshot.time_stop_charge = self.time_stop_charge;
        snapshot
    }

    fn drain_outgoing_attack_rows(&mut self) -> Vec<AttackRow> {
        self.outgoing.drain_all()
    }

    fn receive_attack_rows(&mut self, rows: Vec<AttackRow>) {
        self.incoming.extend(rows);
    }

    fn is_game_over(&self) -> bool {
        self.game_over
    }

    fn score(&self) -> u64 {
        self.score
    }
}
