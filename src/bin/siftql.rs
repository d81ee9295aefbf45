//! siftql - interactive shell for the Sift query DSL
//!
//! Runs the full engine against an in-memory backend seeded with
//! generated log events, so pipelines can be tried without a ClickHouse
//! instance. Shows the rows, the pushed-down SQL, and timing.

use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use sift_core::dsl::{Row, Value};
use sift_core::{MemoryBackend, QueryEngine, SiftError, TimeRangeSpec};

const EVENT_COUNT: usize = 2_000;
const QUERY_TIMEOUT: Duration = Duration::from_secs(30);

fn seed_events() -> Vec<Row> {
    let mut rng = rand::thread_rng();
    let hosts = ["web-01", "web-02", "db-01", "cache-01"];
    let apps = ["nginx", "api", "postgres", "redis"];
    let messages = [
        "request completed",
        "connection refused",
        "user=alice action=login",
        "disk usage at 82%",
        "slow query detected",
        "error: upstream timeout",
    ];
    let now = chrono::Utc::now().timestamp_millis();

    (0..EVENT_COUNT)
        .map(|i| {
            let mut row = Row::new();
            row.set("timestamp", Value::Int(now - (i as i64) * 500));
            row.set(
                "message",
                Value::String((*messages.choose(&mut rng).unwrap_or(&messages[0])).to_string()),
            );
            row.set("severity", Value::Int(rng.gen_range(2..=7)));
            row.set(
                "hostname",
                Value::String((*hosts.choose(&mut rng).unwrap_or(&hosts[0])).to_string()),
            );
            row.set(
                "app_name",
                Value::String((*apps.choose(&mut rng).unwrap_or(&apps[0])).to_string()),
            );
            row.set("source_type", Value::String("syslog".into()));
            row.set("bytes", Value::Int(rng.gen_range(100..50_000)));
            row.set("duration_ms", Value::Int(rng.gen_range(1..2_000)));
            row.set(
                "status_code",
                Value::Int(*[200, 200, 200, 301, 404, 500, 503].choose(&mut rng).unwrap_or(&200)),
            );
            row.set(
                "client_ip",
                Value::String(format!("10.0.{}.{}", rng.gen_range(0..4), rng.gen_range(1..255))),
            );
            row
        })
        .collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("siftql interactive shell");
    println!("Backend: in-memory, {} generated events", EVENT_COUNT);
    println!("Type a pipeline query, or 'exit' to quit.\n");

    let backend = Arc::new(MemoryBackend::new(seed_events()));
    let engine = QueryEngine::new(backend);
    let range = TimeRangeSpec::new("-24h", "now");

    loop {
        print!("sift> ");
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            break;
        }
        let query = input.trim();
        if query == "exit" || query == "quit" {
            break;
        }
        if query.is_empty() {
            continue;
        }

        let cancel = CancellationToken::new();
        let timeout_guard = cancel.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(QUERY_TIMEOUT).await;
            timeout_guard.cancel();
        });

        match engine.execute(query, &range, cancel).await {
            Ok(output) => {
                for row in &output.rows {
                    match serde_json::to_string(row) {
                        Ok(json) => println!("{}", json),
                        Err(e) => println!("<unserializable row: {}>", e),
                    }
                }
                println!(
                    "-- {} row(s) in {} ms",
                    output.rows.len(),
                    output.execution_time_ms
                );
                println!("-- sql: {}", output.sql);
            }
            Err(e @ SiftError::Parse { position, .. }) => {
                println!("{}", query);
                println!("{}^", " ".repeat(position.min(query.len())));
                println!("error: {}", e);
            }
            Err(e) => println!("error: {}", e),
        }
        timer.abort();
    }

    Ok(())
}
