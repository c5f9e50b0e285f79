//! Sandbox runner: drives the full consume pipeline end-to-end against
//! simulated sessions over the in-memory log. Useful for watching the
//! protocol behave (sequencing, dedup, state diffs) without a real browser
//! or an external message bus.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use helm_core::{ActionRequest, CommandEnvelope, CommandId, SessionId, StateUpdateEnvelope};
use helm_engine::sim::{SimExecutor, SimSnapshotter, SimWorld};
use helm_engine::{CommandConsumer, ConsumerConfig};
use helm_stream::{command_stream_key, state_stream_key, CommandLog, MemoryLog};
use helm_telemetry::{init_telemetry, MetricsBridge, TelemetryConfig};

#[derive(Parser, Debug)]
#[command(name = "helm", about = "Sandbox runner for the helm command-consumption pipeline")]
struct Args {
    /// Number of simulated sessions to drive in parallel.
    #[arg(long, default_value_t = 2)]
    sessions: usize,

    /// Commands to enqueue per session.
    #[arg(long, default_value_t = 6)]
    commands: u64,

    /// Milliseconds between enqueued commands.
    #[arg(long, default_value_t = 250)]
    interval_ms: u64,
}

fn scripted_action(seq: u64) -> ActionRequest {
    match seq % 6 {
        1 => ActionRequest::Navigate { url: "/login".into() },
        2 => ActionRequest::TypeText { selector: "#username".into(), text: "ada".into() },
        3 => ActionRequest::Click { selector: "#open-help".into() },
        4 => ActionRequest::Click { selector: "#modal-close".into() },
        5 => ActionRequest::Navigate { url: "/dashboard".into() },
        _ => ActionRequest::Back,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let telemetry = init_telemetry(TelemetryConfig {
        json_logs: false,
        log_to_sqlite: false,
        ..Default::default()
    });

    tracing::info!(sessions = args.sessions, commands = args.commands, "starting helm sandbox");

    let log: Arc<MemoryLog> = Arc::new(MemoryLog::new());
    let world = Arc::new(SimWorld::new());
    let consumer = CommandConsumer::new(
        log.clone(),
        world.clone(),
        Arc::new(SimExecutor::new(world.clone())),
        Arc::new(SimSnapshotter::new(world.clone())),
        ConsumerConfig::default(),
    );

    if let Some(recorder) = telemetry.metrics_handle() {
        MetricsBridge::new(recorder).start(consumer.subscribe());
    }

    let mut session_ids = Vec::new();
    for _ in 0..args.sessions {
        let session_id = SessionId::new();
        world.add_session(session_id.clone(), "/home");
        consumer.start_consuming(&session_id).await?;
        session_ids.push(session_id);
    }

    // Tail each session's state stream and print the published updates.
    for session_id in &session_ids {
        let log = log.clone();
        let session_id = session_id.clone();
        tokio::spawn(async move {
            let stream = state_stream_key(&session_id);
            if log.ensure_group(&stream, "sandbox_tail").await.is_err() {
                return;
            }
            loop {
                let Ok(messages) = log
                    .read_group(&stream, "sandbox_tail", "tail", 16, Duration::from_secs(1))
                    .await
                else {
                    return;
                };
                for message in messages {
                    if let Ok(update) = serde_json::from_str::<StateUpdateEnvelope>(&message.fields[0].1) {
                        let changed = update
                            .state_diff
                            .as_ref()
                            .map(|d| {
                                format!(
                                    "+{} -{} ~{} scalars:{} events:{}",
                                    d.elements_added.len(),
                                    d.elements_removed.len(),
                                    d.elements_modified.len(),
                                    d.scalar_changes.len(),
                                    d.semantic_events.len()
                                )
                            })
                            .unwrap_or_else(|| "duplicate republish".to_string());
                        tracing::info!(
                            session_id = %update.session_id,
                            sequence = update.sequence_number,
                            success = update.action_result.success,
                            diff = %changed,
                            "state update"
                        );
                    }
                    let _ = log.ack(&stream, "sandbox_tail", &message.id).await;
                }
            }
        });
    }

    // Producers: one scripted command sequence per session.
    let mut producers = Vec::new();
    for session_id in &session_ids {
        let log = log.clone();
        let session_id = session_id.clone();
        let total = args.commands;
        let interval = Duration::from_millis(args.interval_ms);
        producers.push(tokio::spawn(async move {
            for seq in 1..=total {
                let envelope = CommandEnvelope {
                    command_id: CommandId::new(),
                    session_id: session_id.clone(),
                    sequence_number: seq,
                    action: scripted_action(seq),
                    trace_context: None,
                    enqueued_at_ms: chrono::Utc::now().timestamp_millis(),
                };
                if let Err(e) = log
                    .append(&command_stream_key(&session_id), envelope.to_fields(), None)
                    .await
                {
                    tracing::error!(session_id = %session_id, error = %e, "enqueue failed");
                    return;
                }
                tokio::time::sleep(interval).await;
            }
        }));
    }

    // Run until every session has drained its script, or ctrl-c.
    let drained = {
        let consumer = &consumer;
        let session_ids = &session_ids;
        async move {
            loop {
                if session_ids
                    .iter()
                    .all(|sid| consumer.last_processed(sid) == args.commands)
                {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    };
    tokio::select! {
        _ = drained => tracing::info!("all sessions drained"),
        _ = tokio::signal::ctrl_c() => tracing::info!("interrupted"),
    }

    for producer in producers {
        producer.abort();
    }
    let stopped = consumer.stop_all().await;
    for session_id in &session_ids {
        tracing::info!(
            session_id = %session_id,
            last_sequence = consumer.last_processed(session_id),
            url = world.current_url(session_id).as_deref().unwrap_or("?"),
            "final session state"
        );
    }
    if let Some(metrics) = telemetry.metrics() {
        tracing::info!(
            processed = metrics.counter_get("commands.processed", &[("status", "ok")]),
            failed = metrics.counter_get("commands.processed", &[("status", "failed")]),
            duplicates = metrics.counter_get("commands.duplicate", &[]),
            gaps = metrics.counter_get("sequence.gaps", &[]),
            "run totals"
        );
        let _ = metrics.snapshot();
    }
    tracing::info!(stopped, "helm sandbox shut down");
    Ok(())
}
