//! MPMC channel throughput and latency benchmark.
//!
//! Usage:
//!     cargo run --release --bin mpmc_bench
//!
//! Environment variables:
//!     PRODUCERS=2     Number of producer threads (default: 2)
//!     CONSUMERS=2     Number of consumer threads (default: 2)
//!     CAPACITY=1024   Channel capacity (default: 1024)
//!     PIN_CPUS=1      Pin worker threads round-robin to cores (default: off)

use std::env;
use std::thread;
use std::time::Instant;

use sluice::{Channel, Timeout};

const ITERATIONS: usize = 1 << 20;

type Payload = u64;

fn env_usize(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn pin_to_cpu(index: usize) {
    if env::var("PIN_CPUS").is_err() {
        return;
    }
    if let Some(cores) = core_affinity::get_core_ids() {
        let core = cores[index % cores.len()];
        core_affinity::set_for_current(core);
    }
}

fn bench_throughput(producers: usize, consumers: usize, capacity: usize) {
    let chan = Channel::new(capacity);
    let per_producer = ITERATIONS / producers;
    const STOP: Payload = Payload::MAX;

    let start = Instant::now();

    let producer_threads: Vec<_> = (0..producers)
        .map(|id| {
            let tx = chan.clone();
            thread::spawn(move || {
                pin_to_cpu(id);
                for i in 0..per_producer {
                    tx.send(i as Payload, Timeout::Infinite).expect("closed");
                }
            })
        })
        .collect();

    let consumer_threads: Vec<_> = (0..consumers)
        .map(|id| {
            let rx = chan.clone();
            thread::spawn(move || {
                pin_to_cpu(producers + id);
                let mut count = 0usize;
                loop {
                    match rx.recv(Timeout::Infinite) {
                        Ok(STOP) | Err(_) => break,
                        Ok(_) => count += 1,
                    }
                }
                count
            })
        })
        .collect();

    for handle in producer_threads {
        handle.join().unwrap();
    }
    for _ in 0..consumers {
        chan.send(STOP, Timeout::Infinite).expect("closed");
    }

    let total: usize = consumer_threads
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .sum();

    let elapsed = start.elapsed();
    let rate = total as f64 / elapsed.as_secs_f64();
    println!(
        "throughput: {total} msgs in {elapsed:?} ({:.2} M msg/s, {producers}p/{consumers}c, cap {capacity})",
        rate / 1e6
    );
}

fn bench_ping_pong() {
    const ROUNDS: usize = 100_000;

    let ping = Channel::new(1);
    let pong = Channel::new(1);

    let ping_rx = ping.clone();
    let pong_tx = pong.clone();
    let echo = thread::spawn(move || {
        pin_to_cpu(1);
        for _ in 0..ROUNDS {
            let v: Payload = ping_rx.recv(Timeout::Infinite).expect("closed");
            pong_tx.send(v, Timeout::Infinite).expect("closed");
        }
    });

    pin_to_cpu(0);
    let start = Instant::now();
    for i in 0..ROUNDS {
        ping.send(i as Payload, Timeout::Infinite).expect("closed");
        let _ = pong.recv(Timeout::Infinite).expect("closed");
    }
    let elapsed = start.elapsed();

    echo.join().unwrap();

    println!(
        "ping-pong: {ROUNDS} round trips in {elapsed:?} ({:?}/rt)",
        elapsed / ROUNDS as u32
    );
}

fn main() {
    sluice::init_tracing();

    let producers = env_usize("PRODUCERS", 2);
    let consumers = env_usize("CONSUMERS", 2);
    let capacity = env_usize("CAPACITY", 1024);

    bench_throughput(producers, consumers, capacity);
    bench_ping_pong();
}
