use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Days, NaiveDate};
use ulid::Ulid;

use houndz::engine::{Engine, EngineError, EngineOptions};
use houndz::model::{BookingInput, Stay};

fn epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
}

fn day(n: u64) -> NaiveDate {
    epoch() + Days::new(n)
}

fn open_engine(name: &str) -> Engine {
    let dir = std::env::temp_dir().join(format!("houndz_bench_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    Engine::new(dir.join(name), EngineOptions::default()).expect("open engine")
}

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    if latencies.is_empty() {
        println!("  {label}: no samples");
        return;
    }
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies.last().unwrap().as_secs_f64() * 1000.0,
    );
}

async fn setup(engine: &Engine, n_suites: usize) -> (Vec<Ulid>, Ulid) {
    let mut suites = Vec::with_capacity(n_suites);
    for i in 0..n_suites {
        suites.push(engine.create_suite(&format!("Suite {i}"), "").await.unwrap().id);
    }
    let pet = engine.register_pet("Bench").await.unwrap().id;
    println!("  created {} suites", suites.len());
    (suites, pet)
}

async fn phase1_sequential() {
    let engine = open_engine("sequential.wal");
    let (suites, pet) = setup(&engine, 1).await;
    let suite = suites[0];

    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n as u64 {
        let t = Instant::now();
        engine
            .propose_booking(BookingInput::new(suite, pet, day(i * 2), day(i * 2 + 1)), None)
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} bookings in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("admission latency", &mut latencies);
}

async fn phase2_concurrent_disjoint() {
    let engine = Arc::new(open_engine("disjoint.wal"));
    let n_tasks = 10;
    let n_per_task = 200u64;
    let (suites, pet) = setup(&engine, n_tasks).await;

    let start = Instant::now();
    let mut handles = Vec::new();
    for suite in suites {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            for j in 0..n_per_task {
                engine
                    .propose_booking(BookingInput::new(suite, pet, day(j * 2), day(j * 2 + 1)), None)
                    .await
                    .unwrap();
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let elapsed = start.elapsed();
    let total = n_tasks as u64 * n_per_task;
    let ops = total as f64 / elapsed.as_secs_f64();
    println!(
        "  {n_tasks} suites x {n_per_task} bookings = {total} total in {:.2}s = {ops:.0} ops/sec",
        elapsed.as_secs_f64()
    );
}

/// Many tasks fight over the same dates on a handful of suites.
async fn phase3_contended() {
    let engine = Arc::new(open_engine("contended.wal"));
    let (suites, pet) = setup(&engine, 3).await;
    let n_tasks = 32;
    let attempts = 100u64;

    let admitted = Arc::new(AtomicUsize::new(0));
    let conflicts = Arc::new(AtomicUsize::new(0));
    let busy = Arc::new(AtomicUsize::new(0));

    let start = Instant::now();
    let mut handles = Vec::new();
    for t in 0..n_tasks {
        let engine = engine.clone();
        let suite = suites[t % suites.len()];
        let (admitted, conflicts, busy) = (admitted.clone(), conflicts.clone(), busy.clone());
        handles.push(tokio::spawn(async move {
            let mut latencies = Vec::with_capacity(attempts as usize);
            for i in 0..attempts {
                let first = (i * 7 + t as u64) % 120;
                let input = BookingInput::new(suite, pet, day(first), day(first + 3));
                let started = Instant::now();
                match engine.propose_booking(input, None).await {
                    Ok(_) => admitted.fetch_add(1, Ordering::Relaxed),
                    Err(EngineError::SuiteConflict { .. }) => conflicts.fetch_add(1, Ordering::Relaxed),
                    Err(EngineError::Busy { .. }) => busy.fetch_add(1, Ordering::Relaxed),
                    Err(e) => panic!("unexpected rejection: {e}"),
                };
                latencies.push(started.elapsed());
            }
            latencies
        }));
    }

    let mut all_latencies = Vec::new();
    for h in handles {
        all_latencies.extend(h.await.unwrap());
    }

    let elapsed = start.elapsed();
    println!(
        "  {} proposals in {:.2}s: {} admitted, {} conflicts, {} busy",
        n_tasks as u64 * attempts,
        elapsed.as_secs_f64(),
        admitted.load(Ordering::Relaxed),
        conflicts.load(Ordering::Relaxed),
        busy.load(Ordering::Relaxed),
    );
    print_latency("contended admission", &mut all_latencies);

    // Sanity: nothing double-booked.
    for suite in suites {
        let active: Vec<Stay> = engine
            .bookings_for_suite(suite)
            .await
            .unwrap()
            .iter()
            .filter(|b| b.is_active())
            .map(|b| b.stay())
            .collect();
        for w in active.windows(2) {
            assert!(!w[0].overlaps(&w[1]), "double booking: {} and {}", w[0], w[1]);
        }
    }
}

async fn phase4_read_under_load() {
    let engine = Arc::new(open_engine("read_under_load.wal"));
    let (suites, pet) = setup(&engine, 10).await;

    for &suite in &suites {
        for i in 0..50u64 {
            engine
                .propose_booking(BookingInput::new(suite, pet, day(i * 3), day(i * 3 + 1)), None)
                .await
                .unwrap();
        }
    }

    let stop = Arc::new(AtomicBool::new(false));
    let mut writer_handles = Vec::new();
    for w in 0..5u64 {
        let engine = engine.clone();
        let stop = stop.clone();
        let suite = suites[w as usize];
        writer_handles.push(tokio::spawn(async move {
            let mut i = 0u64;
            while !stop.load(Ordering::Relaxed) {
                let first = 200 + i * 2;
                let _ = engine
                    .propose_booking(BookingInput::new(suite, pet, day(first), day(first + 1)), None)
                    .await;
                i += 1;
            }
        }));
    }

    let n_readers = 10;
    let reads_per_reader = 500;
    let window = Stay::new(epoch(), day(180)).unwrap();
    let mut reader_handles = Vec::new();
    for r in 0..n_readers {
        let engine = engine.clone();
        let suite = suites[r % suites.len()];
        reader_handles.push(tokio::spawn(async move {
            let mut latencies = Vec::with_capacity(reads_per_reader);
            for _ in 0..reads_per_reader {
                let t = Instant::now();
                engine.free_stays(suite, window).await.unwrap();
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all_latencies = Vec::new();
    for h in reader_handles {
        all_latencies.extend(h.await.unwrap());
    }

    stop.store(true, Ordering::Relaxed);
    for h in writer_handles {
        let _ = h.await;
    }

    print_latency("free dates query", &mut all_latencies);
}

#[tokio::main]
async fn main() {
    println!("=== houndz stress benchmark ===\n");

    println!("[phase 1] sequential admission throughput");
    phase1_sequential().await;

    println!("\n[phase 2] concurrent admission, one suite per task");
    phase2_concurrent_disjoint().await;

    println!("\n[phase 3] contended admission on shared suites");
    phase3_contended().await;

    println!("\n[phase 4] read latency under write load");
    phase4_read_under_load().await;

    println!("\n=== benchmark complete ===");
}
