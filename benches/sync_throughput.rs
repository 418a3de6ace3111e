//! Synchronization benchmarks for the grid collector server
//!
//! Measures the work done under the world lock (moves, snapshots) and the
//! cost of one broadcast tick at various player counts.
//!
//! Run with: cargo bench --bench sync_throughput

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use grid_collector_server::config::ServerConfig;
use grid_collector_server::game::state::{GameState, PlayerId};
use grid_collector_server::metrics::Metrics;
use grid_collector_server::net::game_session::GameSession;
use grid_collector_server::net::outbox::{outbox, OutboxReceiver};
use grid_collector_server::net::protocol::{encode, ClientMessage, FullState, ServerMessage};
use grid_collector_server::util::position::Direction;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use uuid::Uuid;

const BOARD_WIDTH: i32 = 64;
const BOARD_HEIGHT: i32 = 64;
const ITEM_COUNT: usize = 200;

fn config() -> ServerConfig {
    ServerConfig {
        board_width: BOARD_WIDTH,
        board_height: BOARD_HEIGHT,
        item_count: ITEM_COUNT,
        outbox_capacity: 1024,
        ..ServerConfig::default()
    }
}

/// World with `count` players; the mailboxes are kept open but never read
fn create_state_with_players(count: usize) -> (GameState, Vec<PlayerId>, Vec<OutboxReceiver>) {
    let mut state = GameState::with_seed(BOARD_WIDTH, BOARD_HEIGHT, ITEM_COUNT, 3);
    let mut ids = Vec::with_capacity(count);
    let mut receivers = Vec::with_capacity(count);
    for _ in 0..count {
        let id = Uuid::new_v4();
        let (tx, rx) = outbox(16);
        state.add_player(id, tx);
        ids.push(id);
        receivers.push(rx);
    }
    state.take_delta();
    (state, ids, receivers)
}

fn create_session_with_players(count: usize) -> (GameSession, Vec<(PlayerId, OutboxReceiver)>) {
    let config = config();
    let state = GameState::with_seed(config.board_width, config.board_height, config.item_count, 3);
    let session = GameSession::with_state(state, config, Arc::new(Metrics::new()));
    let players = (0..count).map(|_| session.join()).collect();
    session.publish_pending();
    (session, players)
}

fn drain(players: &mut [(PlayerId, OutboxReceiver)]) {
    for (_, rx) in players.iter_mut() {
        while let Ok(Some(_)) = rx.try_recv() {}
    }
}

fn bench_apply_move(c: &mut Criterion) {
    let mut group = c.benchmark_group("apply_move");
    group.sample_size(50);

    for count in [10, 50, 100, 250] {
        let (mut state, ids, _receivers) = create_state_with_players(count);
        let mut rng = StdRng::seed_from_u64(9);

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("one_each", count), &count, |b, _| {
            b.iter(|| {
                for id in &ids {
                    let dir = Direction::ALL[rng.gen_range(0..4)];
                    black_box(state.apply_move(*id, dir));
                }
                if state.game_over {
                    state.initialize_items(ITEM_COUNT);
                }
                state.take_delta();
            })
        });
    }
    group.finish();
}

fn bench_full_state(c: &mut Criterion) {
    let mut group = c.benchmark_group("full_state");
    group.sample_size(50);

    for count in [10, 50, 100, 250] {
        let (state, _ids, _receivers) = create_state_with_players(count);

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("copy_and_encode", count), &count, |b, _| {
            b.iter(|| {
                let snapshot = FullState::from_game_state(&state);
                black_box(encode(&ServerMessage::FullState(snapshot)).ok());
            })
        });
    }
    group.finish();
}

fn bench_broadcast_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("broadcast_tick");
    group.sample_size(30);

    for count in [10, 50, 100, 250] {
        let (session, mut players) = create_session_with_players(count);
        let mut rng = StdRng::seed_from_u64(17);
        let directions = ["up", "down", "left", "right"];

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("moves_then_publish", count), &count, |b, _| {
            b.iter(|| {
                for (id, _) in &players {
                    let direction = directions[rng.gen_range(0..4)].to_string();
                    session.handle_message(*id, ClientMessage::Move { direction });
                }
                session.handle_message(players[0].0, ClientMessage::ResetGameRequest);
                black_box(session.publish_pending());
                drain(&mut players);
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_apply_move, bench_full_state, bench_broadcast_tick);
criterion_main!(benches);
