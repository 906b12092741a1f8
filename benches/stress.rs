use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_postgres::{Client, Config, NoTls, SimpleQueryMessage};
use ulid::Ulid;

/// Login the server treats as the listing service.
const LISTING_SERVICE: &str = "listing-service";

/// Hourly slots from 00:00 to 23:00.
const SLOTS_PER_DAY: usize = 23;

async fn connect(host: &str, port: u16, dbname: &str, user: &str) -> Client {
    let mut config = Config::new();
    config
        .host(host)
        .port(port)
        .dbname(dbname)
        .user(user)
        .password("slotbook");

    let (client, conn) = config.connect(NoTls).await.expect("connect failed");
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            eprintln!("connection error: {e}");
        }
    });
    client
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
        latencies[latencies.len() - 1].as_secs_f64() * 1000.0,
    );
}

/// A unique tenant so phases never see each other's listings.
fn fresh_tenant() -> String {
    format!("bench_{}", Ulid::new())
}

/// Day `n` as a well-formed date. Days run 01..=28 in each month.
fn nth_date(n: usize) -> String {
    format!("2030-{:02}-{:02}", (n / 28) % 12 + 1, n % 28 + 1)
}

fn nth_slot(n: usize) -> (String, String) {
    (format!("{n:02}:00"), format!("{:02}:00", n + 1))
}

/// Listings are written by the listing service only, so this opens its own
/// connection to `tenant`.
async fn create_listing(host: &str, port: u16, tenant: &str, id: &str, capacity: u32) {
    connect(host, port, tenant, LISTING_SERVICE)
        .await
        .batch_execute(&format!(
            "INSERT INTO listings (id, owner_id, open_time, close_time, slot_capacity) \
             VALUES ('{id}', 'host', '00:00', '23:00', {capacity})"
        ))
        .await
        .unwrap();
}

fn booking_sql(listing: &str, date: &str, slot: &(String, String), guests: u32) -> String {
    format!(
        "INSERT INTO bookings (listing_id, date, slot_start, slot_end, guest_count) \
         VALUES ('{listing}', '{date}', '{}', '{}', {guests})",
        slot.0, slot.1
    )
}

async fn booked_in_slot(client: &Client, listing: &str, date: &str, start: &str) -> u32 {
    let messages = client
        .simple_query(&format!(
            "SELECT * FROM availability WHERE listing_id = '{listing}' AND date = '{date}'"
        ))
        .await
        .unwrap();
    messages
        .iter()
        .find_map(|m| match m {
            SimpleQueryMessage::Row(r) if r.get("slot_start") == Some(start) => {
                r.get("booked").and_then(|b| b.parse().ok())
            }
            _ => None,
        })
        .unwrap_or(0)
}

async fn phase1_sequential(host: &str, port: u16) {
    let tenant = fresh_tenant();
    create_listing(host, port, &tenant, "seq", 10).await;
    let client = connect(host, port, &tenant, "guest").await;

    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    // One guest, so each booking needs its own (date, slot).
    for i in 0..n {
        let date = nth_date(i / SLOTS_PER_DAY);
        let slot = nth_slot(i % SLOTS_PER_DAY);
        let t = Instant::now();
        client
            .batch_execute(&booking_sql("seq", &date, &slot, 2))
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} bookings in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("write latency", &mut latencies);
}

/// Many guests race for the same slot. Exactly `capacity` single-guest
/// bookings may win; anything more is an oversell.
async fn phase2_contention(host: &str, port: u16) {
    let tenant = fresh_tenant();
    let capacity = 25;
    let n_guests = 200;
    let date = nth_date(0);
    let slot = nth_slot(19);

    let owner = connect(host, port, &tenant, "host").await;
    create_listing(host, port, &tenant, "hot", capacity).await;

    let admitted = Arc::new(AtomicUsize::new(0));
    let conflicts = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();
    let mut handles = Vec::new();

    for i in 0..n_guests {
        let host = host.to_string();
        let tenant = tenant.clone();
        let sql = booking_sql("hot", &date, &slot, 1);
        let admitted = admitted.clone();
        let conflicts = conflicts.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port, &tenant, &format!("guest{i}")).await;
            let t = Instant::now();
            match client.batch_execute(&sql).await {
                Ok(()) => admitted.fetch_add(1, Ordering::Relaxed),
                Err(e) if e.code().map(|c| c.code()) == Some("23P01") => {
                    conflicts.fetch_add(1, Ordering::Relaxed)
                }
                Err(e) => panic!("unexpected booking error: {e}"),
            };
            t.elapsed()
        }));
    }

    let mut latencies = Vec::with_capacity(n_guests);
    for h in handles {
        latencies.push(h.await.unwrap());
    }
    let elapsed = start.elapsed();

    let admitted = admitted.load(Ordering::Relaxed);
    let conflicts = conflicts.load(Ordering::Relaxed);
    let booked = booked_in_slot(&owner, "hot", &date, &slot.0).await;
    println!(
        "  {n_guests} guests, capacity {capacity}: {admitted} admitted, {conflicts} rejected in {:.2}s",
        elapsed.as_secs_f64()
    );
    println!("  availability reports {booked}/{capacity} booked");
    assert_eq!(admitted, capacity as usize, "admitted count differs from capacity");
    assert_eq!(booked, capacity, "slot oversold");
    print_latency("contended write latency", &mut latencies);
}

async fn phase3_read_under_load(host: &str, port: u16) {
    let tenant = fresh_tenant();
    let owner = connect(host, port, &tenant, "host").await;
    create_listing(host, port, &tenant, "busy", 50).await;

    let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let writes = Arc::new(AtomicUsize::new(0));
    let mut writers = Vec::new();

    for w in 0..8 {
        let host = host.to_string();
        let tenant = tenant.clone();
        let stop = stop.clone();
        let writes = writes.clone();
        writers.push(tokio::spawn(async move {
            let client = connect(&host, port, &tenant, &format!("writer{w}")).await;
            let mut i = 0;
            while !stop.load(Ordering::Relaxed) {
                let date = nth_date(i / SLOTS_PER_DAY);
                let slot = nth_slot(i % SLOTS_PER_DAY);
                if client.batch_execute(&booking_sql("busy", &date, &slot, 1)).await.is_ok() {
                    writes.fetch_add(1, Ordering::Relaxed);
                }
                i += 1;
            }
        }));
    }

    let n_reads = 1000;
    let mut availability = Vec::with_capacity(n_reads);
    let mut roster = Vec::with_capacity(n_reads / 10);
    for i in 0..n_reads {
        let date = nth_date(i % 4);
        let t = Instant::now();
        owner
            .simple_query(&format!(
                "SELECT * FROM availability WHERE listing_id = 'busy' AND date = '{date}'"
            ))
            .await
            .unwrap();
        availability.push(t.elapsed());

        if i % 10 == 0 {
            let t = Instant::now();
            owner
                .simple_query(&format!(
                    "SELECT * FROM bookings WHERE listing_id = 'busy' AND date = '{date}' LIMIT 50"
                ))
                .await
                .unwrap();
            roster.push(t.elapsed());
        }
    }

    stop.store(true, Ordering::Relaxed);
    for h in writers {
        let _ = h.await;
    }

    println!("  {} bookings written during reads", writes.load(Ordering::Relaxed));
    print_latency("availability latency", &mut availability);
    print_latency("roster page latency", &mut roster);
}

async fn phase4_connection_storm(host: &str, port: u16) {
    let n_conns = 50;
    let ops_per_conn = 10;

    let start = Instant::now();
    let mut handles = Vec::new();
    let success = Arc::new(AtomicUsize::new(0));

    for c in 0..n_conns {
        let host = host.to_string();
        let success = success.clone();
        handles.push(tokio::spawn(async move {
            let tenant = fresh_tenant();
            create_listing(&host, port, &tenant, "storm", 10).await;
            let client = connect(&host, port, &tenant, &format!("storm{c}")).await;

            for i in 0..ops_per_conn {
                let slot = nth_slot(i);
                client
                    .batch_execute(&booking_sql("storm", &nth_date(0), &slot, 1))
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
    let host = std::env::var("SLOTBOOK_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("SLOTBOOK_PORT")
        .unwrap_or_else(|_| "5433".into())
        .parse()
        .expect("invalid SLOTBOOK_PORT");

    println!("=== slotbook stress benchmark ===");
    println!("target: {host}:{port}\n");

    println!("[phase 1] sequential booking throughput");
    phase1_sequential(&host, port).await;

    println!("\n[phase 2] single-slot contention");
    phase2_contention(&host, port).await;

    println!("\n[phase 3] read latency under write load");
    phase3_read_under_load(&host, port).await;

    println!("\n[phase 4] connection storm");
    phase4_connection_storm(&host, port).await;

    println!("\n=== benchmark complete ===");
}
