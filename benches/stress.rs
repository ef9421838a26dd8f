use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chrono::{Days, NaiveDate};
use tokio_postgres::{Config, NoTls};
use ulid::Ulid;

async fn connect_db(host: &str, port: u16, dbname: &str) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(host)
        .port(port)
        .dbname(dbname)
        .user("rideslot")
        .password("rideslot");

    let (client, conn) = config.connect(NoTls).await.expect("connect failed");
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            eprintln!("connection error: {e}");
        }
    });
    client
}

/// Connect to a fresh ledger of its own.
async fn connect(host: &str, port: u16) -> tokio_postgres::Client {
    connect_db(host, port, &format!("bench_{}", Ulid::new())).await
}

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
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

fn day(offset: u64) -> String {
    let base = NaiveDate::from_ymd_opt(2027, 1, 1).unwrap();
    base.checked_add_days(Days::new(offset)).unwrap().to_string()
}

fn booking_sql(date: &str, slot: &str, name: &str) -> String {
    format!(
        "INSERT INTO bookings (name, phone, pickup_location, dropoff_location, date, slot, trip_type, price) \
         VALUES ('{name}', '010-0000-0000', 'Seocho-gu', 'ICN T1', '{date}', '{slot}', 'HOME_TO_AIRPORT', 50000)"
    )
}

/// Open a year of days with room for every sequential write.
async fn open_year(client: &tokio_postgres::Client, capacity: u32) {
    client
        .batch_execute(&format!(
            "CALL initialize_range('{}', '{}', true, true, {capacity})",
            day(0),
            day(364)
        ))
        .await
        .unwrap();
}

async fn phase1_sequential(host: &str, port: u16) {
    let client = connect(host, port).await;
    open_year(&client, 10).await;

    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        let date = day((i / 10) as u64 % 365);
        let slot = if i % 2 == 0 { "morning" } else { "evening" };
        let t = Instant::now();
        client
            .batch_execute(&booking_sql(&date, slot, &format!("seq-{i}")))
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} bookings in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("admission latency", &mut latencies);
}

/// Many clients race for the same slot; exactly `capacity` may win.
async fn phase2_contention(host: &str, port: u16) {
    let dbname = format!("bench_{}", Ulid::new());
    let capacity = 10;
    let setup = connect_db(host, port, &dbname).await;
    setup
        .batch_execute(&format!("CALL set_capacity('{}', {capacity})", day(0)))
        .await
        .unwrap();

    let n_tasks = 50;
    let admitted = Arc::new(AtomicUsize::new(0));
    let rejected = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();
    let mut handles = Vec::new();

    for i in 0..n_tasks {
        let host = host.to_string();
        let dbname = dbname.clone();
        let admitted = admitted.clone();
        let rejected = rejected.clone();
        handles.push(tokio::spawn(async move {
            let client = connect_db(&host, port, &dbname).await;
            match client.batch_execute(&booking_sql(&day(0), "morning", &format!("race-{i}"))).await {
                Ok(()) => admitted.fetch_add(1, Ordering::Relaxed),
                Err(_) => rejected.fetch_add(1, Ordering::Relaxed),
            };
        }));
    }

    for h in handles {
        h.await.unwrap();
    }

    let won = admitted.load(Ordering::Relaxed);
    println!(
        "  {n_tasks} racers for {capacity} seats: {won} admitted, {} rejected in {:.2}s",
        rejected.load(Ordering::Relaxed),
        start.elapsed().as_secs_f64()
    );
    assert_eq!(won, capacity, "slot overbooked or underfilled");
}

async fn phase3_calendar_under_load(host: &str, port: u16) {
    let dbname = format!("bench_{}", Ulid::new());
    let setup = connect_db(host, port, &dbname).await;
    open_year(&setup, 1000).await;
    drop(setup);

    let stop = Arc::new(AtomicBool::new(false));
    let mut writer_handles = Vec::new();
    for w in 0..5 {
        let host = host.to_string();
        let dbname = dbname.clone();
        let stop = stop.clone();
        writer_handles.push(tokio::spawn(async move {
            let client = connect_db(&host, port, &dbname).await;
            let mut i = 0u64;
            while !stop.load(Ordering::Relaxed) {
                let _ = client
                    .batch_execute(&booking_sql(&day((w * 31 + i) % 365), "evening", "writer"))
                    .await;
                i += 1;
            }
        }));
    }

    let n_readers = 10;
    let reads_per_reader = 200;
    let mut reader_handles = Vec::new();
    for _ in 0..n_readers {
        let host = host.to_string();
        let dbname = dbname.clone();
        reader_handles.push(tokio::spawn(async move {
            let client = connect_db(&host, port, &dbname).await;
            let mut latencies = Vec::with_capacity(reads_per_reader);
            for _ in 0..reads_per_reader {
                let t = Instant::now();
                client
                    .simple_query(&format!(
                        "SELECT * FROM availability WHERE date BETWEEN '{}' AND '{}'",
                        day(0),
                        day(30)
                    ))
                    .await
                    .unwrap();
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

    print_latency("31-day calendar query", &mut all_latencies);
}

async fn phase4_connection_storm(host: &str, port: u16) {
    let n_conns = 50;
    let ops_per_conn = 10;

    let start = Instant::now();
    let mut handles = Vec::new();
    let success = Arc::new(AtomicUsize::new(0));

    for _ in 0..n_conns {
        let host = host.to_string();
        let success = success.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            for i in 0..ops_per_conn {
                let slot = if i % 2 == 0 { "morning" } else { "evening" };
                client
                    .batch_execute(&booking_sql(&day(i / 2), slot, "storm"))
                    .await
                    .unwrap();
            }
            success.fetch_add(1, Ordering::Relaxed);
        }));
    }

    for h in handles {
        let _ = h.await;
    }

    let elapsed = start.elapsed();
    let ok = success.load(Ordering::Relaxed);
    println!(
        "  {n_conns} connections, {ops_per_conn} ops each: {ok}/{n_conns} succeeded in {:.2}s",
        elapsed.as_secs_f64()
    );
}

#[tokio::main]
async fn main() {
    let host = std::env::var("RIDESLOT_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("RIDESLOT_PORT")
        .unwrap_or_else(|_| "5433".into())
        .parse()
        .expect("invalid RIDESLOT_PORT");

    println!("=== rideslot stress benchmark ===");
    println!("target: {host}:{port}\n");

    println!("[phase 1] sequential admission throughput");
    phase1_sequential(&host, port).await;

    println!("\n[phase 2] contention on one slot");
    phase2_contention(&host, port).await;

    println!("\n[phase 3] calendar latency under write load");
    phase3_calendar_under_load(&host, port).await;

    println!("\n[phase 4] connection storm");
    phase4_connection_storm(&host, port).await;

    println!("\n=== done ===");
}
