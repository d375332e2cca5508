//! End-to-end tests for the multithreaded simulator.
//!
//! These drive full partition → replay → round loops over real worker
//! threads. Tests that saturate the machine's cores use `#[serial]` to
//! keep timing honest.

use parking_lot::Mutex;
use parsim_parallel::{EngineConfig, MultithreadedSimulator};
use parsim_types::{NetworkGraph, NodeId, Time};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serial_test::serial;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// The reference dumbbell from the partitioning tests: left leaves 0-3,
/// routers 4/5 joined by a 5ms link, right leaves 6-9 on 2ms leaf links.
fn dumbbell() -> NetworkGraph {
    let mut graph = NetworkGraph::new();
    let left: Vec<NodeId> = (0..4).map(|_| graph.add_node(0)).collect();
    let router_left = graph.add_node(0);
    let router_right = graph.add_node(0);
    let right: Vec<NodeId> = (0..4).map(|_| graph.add_node(0)).collect();

    for &leaf in &left {
        graph.connect(leaf, router_left, Time::millis(2));
    }
    graph.connect(router_left, router_right, Time::millis(5));
    for &leaf in &right {
        graph.connect(leaf, router_right, Time::millis(2));
    }
    graph
}

/// End-to-end path delay across the dumbbell: leaf + router + leaf link.
const PATH_DELAY: Time = Time::millis(9);

/// Run the dumbbell scenario: one event per left leaf at `1s + i us`,
/// each forwarding to its right peer across the cut. Returns per-sink
/// reception times and the total event count.
fn run_dumbbell(max_threads: usize) -> (Vec<Vec<Time>>, u64) {
    let sim = Arc::new(
        MultithreadedSimulator::new(
            Arc::new(dumbbell()),
            EngineConfig::new(max_threads).with_min_lookahead(Time::millis(5)),
        )
        .unwrap(),
    );
    let sinks: Arc<Vec<Mutex<Vec<Time>>>> =
        Arc::new((0..4).map(|_| Mutex::new(Vec::new())).collect());

    for i in 0..4u32 {
        let sim_tx = Arc::clone(&sim);
        let sinks = Arc::clone(&sinks);
        sim.schedule_with_context(i, Time::seconds(1) + Time::micros(i as i64), move || {
            let sink_node = i + 6;
            let sim_rx = Arc::clone(&sim_tx);
            let sinks = Arc::clone(&sinks);
            sim_tx.schedule_with_context(sink_node, PATH_DELAY, move || {
                sinks[i as usize].lock().push(sim_rx.now());
            });
        });
    }

    sim.run();
    let received = sinks.iter().map(|s| s.lock().clone()).collect();
    let count = sim.event_count();
    sim.destroy();
    (received, count)
}

#[test]
#[serial]
fn test_dumbbell_delivers_across_the_cut() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let (received, count) = run_dumbbell(8);
    for (i, sink) in received.iter().enumerate() {
        assert_eq!(sink.len(), 1, "sink {i} should see exactly one event");
        assert_eq!(
            sink[0],
            Time::seconds(1) + Time::micros(i as i64) + PATH_DELAY
        );
    }
    // 4 senders + 4 sink receptions.
    assert_eq!(count, 8);
}

#[test]
#[serial]
fn test_parallel_run_matches_sequential_run() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let (sequential, sequential_count) = run_dumbbell(1);
    let (parallel, parallel_count) = run_dumbbell(8);

    assert_eq!(sequential, parallel);
    assert_eq!(sequential_count, parallel_count);
}

#[test]
#[serial]
fn test_cross_lp_inbox_loses_and_duplicates_nothing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    const LPS: u32 = 8;
    const ROUNDS: u32 = 200;
    const EVENTS_PER_ROUND: u32 = 250;

    // Eight isolated nodes partition into eight LPs.
    let mut graph = NetworkGraph::new();
    for _ in 0..LPS {
        graph.add_node(0);
    }
    let sim = Arc::new(
        MultithreadedSimulator::new(Arc::new(graph), EngineConfig::new(8)).unwrap(),
    );
    let received = Arc::new(AtomicU64::new(0));

    fn pump(
        sim: &Arc<MultithreadedSimulator>,
        received: &Arc<AtomicU64>,
        node: u32,
        round: u32,
    ) {
        let mut rng = ChaCha8Rng::seed_from_u64(u64::from(node) * 10_007 + u64::from(round));
        for _ in 0..EVENTS_PER_ROUND {
            let peer = (node + rng.gen_range(1..LPS)) % LPS;
            let received = Arc::clone(received);
            sim.schedule_with_context(peer, Time::millis(1), move || {
                received.fetch_add(1, Ordering::Relaxed);
            });
        }
        if round + 1 < ROUNDS {
            let sim_next = Arc::clone(sim);
            let received = Arc::clone(received);
            sim.schedule_with_context(node, Time::millis(1), move || {
                pump(&sim_next, &received, node, round + 1);
            });
        }
    }

    for node in 0..LPS {
        let sim_seed = Arc::clone(&sim);
        let received_seed = Arc::clone(&received);
        sim.schedule_with_context(node, Time::millis(1), move || {
            pump(&sim_seed, &received_seed, node, 0);
        });
    }

    sim.run();
    assert_eq!(
        received.load(Ordering::Relaxed),
        u64::from(LPS) * u64::from(ROUNDS) * u64::from(EVENTS_PER_ROUND)
    );
    sim.destroy();
}

#[test]
#[serial]
fn test_stop_after_cuts_at_exact_time() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let mut graph = NetworkGraph::new();
    graph.add_node(0);
    let sim = Arc::new(
        MultithreadedSimulator::new(Arc::new(graph), EngineConfig::new(4)).unwrap(),
    );
    let invoked = Arc::new(Mutex::new(Vec::new()));

    for s in 1..=10i64 {
        let invoked = Arc::clone(&invoked);
        sim.schedule_with_context(0, Time::seconds(s), move || {
            invoked.lock().push(Time::seconds(s));
        });
    }
    sim.stop_after(Time::seconds(5));

    sim.run();
    let invoked = invoked.lock().clone();
    assert_eq!(
        invoked,
        (1..=5).map(Time::seconds).collect::<Vec<_>>(),
        "events at exactly the stop time run, later ones never do"
    );
    sim.destroy();
}

#[test]
#[serial]
fn test_clock_is_monotone_per_lp() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let mut graph = NetworkGraph::new();
    for _ in 0..2 {
        graph.add_node(0);
    }
    let sim = Arc::new(
        MultithreadedSimulator::new(Arc::new(graph), EngineConfig::new(2)).unwrap(),
    );
    let timelines: Arc<Vec<Mutex<Vec<Time>>>> =
        Arc::new((0..2).map(|_| Mutex::new(Vec::new())).collect());

    let mut rng = ChaCha8Rng::seed_from_u64(7);
    for _ in 0..200 {
        let node = rng.gen_range(0..2u32);
        let delay = Time::millis(rng.gen_range(1..50));
        let sim_obs = Arc::clone(&sim);
        let timelines = Arc::clone(&timelines);
        sim.schedule_with_context(node, delay, move || {
            timelines[node as usize].lock().push(sim_obs.now());
        });
    }

    sim.run();
    for timeline in timelines.iter() {
        let observed = timeline.lock();
        assert!(
            observed.windows(2).all(|w| w[0] <= w[1]),
            "per-LP observation order must be time-sorted"
        );
    }
    sim.destroy();
}
