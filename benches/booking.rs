use std::sync::Arc;
use std::time::{Duration, Instant};

use ulid::Ulid;

use studiobook::engine::{Engine, EngineConfig};
use studiobook::model::*;

const START: Ms = 1_748_736_000_000; // 2025-06-01T00:00Z

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    if latencies.is_empty() {
        return;
    }
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.3}ms, p50={:.3}ms, p95={:.3}ms, p99={:.3}ms, max={:.3}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies[latencies.len() - 1].as_secs_f64() * 1000.0,
    );
}

struct Studio {
    engine: Arc<Engine>,
    client: Ulid,
    photographers: Vec<Ulid>,
    rooms: Vec<Ulid>,
}

async fn open_studio(name: &str, staff: usize) -> Studio {
    let dir = std::env::temp_dir().join("studiobook_bench");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(format!("{name}_{}.wal", Ulid::new()));
    let engine = Arc::new(
        Engine::new(path, EngineConfig::default()).unwrap(),
    );

    let client = engine
        .register_client(ClientFields {
            name: "Bench Client".into(),
            phone: "0800".into(),
            ..Default::default()
        })
        .await
        .unwrap();
    let mut photographers = Vec::with_capacity(staff);
    let mut rooms = Vec::with_capacity(staff);
    for i in 0..staff {
        photographers.push(
            engine
                .register_photographer(PhotographerFields {
                    name: format!("Photographer {i}"),
                    specialty: "Portrait".into(),
                    phone: format!("08{i:04}"),
                })
                .await
                .unwrap(),
        );
        rooms.push(
            engine
                .register_studio(StudioFields {
                    name: format!("Room {i}"),
                    location: format!("Floor {}", i / 4 + 1),
                    capacity: 6,
                })
                .await
                .unwrap(),
        );
    }
    Studio {
        engine,
        client,
        photographers,
        rooms,
    }
}

fn draft(studio: &Studio, lane: usize, at: Ms) -> SessionDraft {
    SessionDraft {
        client_id: studio.client,
        photographer_id: studio.photographers[lane],
        studio_id: studio.rooms[lane],
        scheduled_at: at,
        package: Package::Portrait,
        status: None,
        notes: None,
    }
}

/// One photographer, one room, back-to-back two-hour slots.
async fn phase1_sequential() {
    let studio = open_studio("sequential", 1).await;
    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        let at = START + (i as i64) * 2 * HOUR_MS;
        let t = Instant::now();
        let booking = studio
            .engine
            .create_session(draft(&studio, 0, at), BookingMode::Strict)
            .await
            .unwrap();
        latencies.push(t.elapsed());
        assert!(booking.conflict().is_none());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} bookings in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("write latency", &mut latencies);
}

/// Many front desks booking separate lanes of the same studio.
async fn phase2_concurrent() {
    let lanes = 10;
    let per_lane = 200;
    let studio = Arc::new(open_studio("concurrent", lanes).await);
    let start = Instant::now();

    let mut handles = Vec::new();
    for lane in 0..lanes {
        let studio = studio.clone();
        handles.push(tokio::spawn(async move {
            for j in 0..per_lane {
                let at = START + (j as i64) * 2 * HOUR_MS;
                studio
                    .engine
                    .create_session(draft(&studio, lane, at), BookingMode::Strict)
                    .await
                    .unwrap();
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let elapsed = start.elapsed();
    let total = lanes * per_lane;
    println!(
        "  {lanes} lanes x {per_lane} bookings = {total} total in {:.2}s = {:.0} ops/sec",
        elapsed.as_secs_f64(),
        total as f64 / elapsed.as_secs_f64()
    );
}

/// Every desk races for the same slot; exactly one wins.
async fn phase3_contention() {
    let studio = Arc::new(open_studio("contention", 1).await);
    let racers = 50;
    let mut handles = Vec::new();
    let start = Instant::now();
    for _ in 0..racers {
        let studio = studio.clone();
        handles.push(tokio::spawn(async move {
            studio
                .engine
                .create_session(draft(&studio, 0, START), BookingMode::Strict)
                .await
                .unwrap()
        }));
    }
    let mut committed = 0;
    for h in handles {
        if h.await.unwrap().conflict().is_none() {
            committed += 1;
        }
    }
    println!(
        "  {racers} racers, {committed} committed, {} rejected in {:.2}ms",
        racers - committed,
        start.elapsed().as_secs_f64() * 1000.0
    );
    assert_eq!(committed, 1);
}

/// Dashboard and monthly report reads while bookings keep landing.
async fn phase4_reads_under_load() {
    let lanes = 4;
    let studio = Arc::new(open_studio("reads", lanes).await);
    for lane in 0..lanes {
        for j in 0..250 {
            let at = START + (j as i64) * 2 * HOUR_MS;
            studio
                .engine
                .create_session(draft(&studio, lane, at), BookingMode::Strict)
                .await
                .unwrap();
        }
    }

    let writer = {
        let studio = studio.clone();
        tokio::spawn(async move {
            for j in 250..750 {
                let at = START + (j as i64) * 2 * HOUR_MS;
                studio
                    .engine
                    .create_session(draft(&studio, 0, at), BookingMode::Strict)
                    .await
                    .unwrap();
            }
        })
    };

    let mut dashboard = Vec::with_capacity(500);
    let mut monthly = Vec::with_capacity(500);
    for _ in 0..500 {
        let t = Instant::now();
        studio.engine.dashboard_stats().await;
        dashboard.push(t.elapsed());

        let t = Instant::now();
        studio.engine.monthly_report(2025, 6).await.unwrap();
        monthly.push(t.elapsed());
    }
    writer.await.unwrap();

    print_latency("dashboard_stats", &mut dashboard);
    print_latency("monthly_report(2025, 6)", &mut monthly);
}

fn main() {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap();

    rt.block_on(async {
        println!("phase 1: sequential bookings");
        phase1_sequential().await;
        println!("phase 2: concurrent lanes");
        phase2_concurrent().await;
        println!("phase 3: single-slot contention");
        phase3_contention().await;
        println!("phase 4: reads under write load");
        phase4_reads_under_load().await;
    });
}
