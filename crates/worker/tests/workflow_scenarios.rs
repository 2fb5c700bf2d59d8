//! End-to-end worker scenarios against the in-memory cluster simulation

mod support;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::task::JoinHandle;

use tempo_core::bridge::CoreBridge;
use tempo_core::command::QueryResult;
use tempo_core::failure::FailureInfo;
use tempo_core::payload::Payload;
use tempo_core::retry::RetryPolicy;
use tempo_worker::registry::WorkflowMetadata;
use tempo_worker::{
    ActivityContext, ActivityError, ActivityOptions, ActivityRegistration, WfContext, Worker,
    WorkerConfig, WorkflowError, WorkflowRegistration, WorkflowState,
};

use support::{SimCluster, SimOutcome, SimUpdateOutcome};

fn decode<T: serde::de::DeserializeOwned>(payload: &Payload) -> T {
    serde_json::from_slice(&payload.data).expect("payload should decode")
}

fn spawn_worker(
    sim: &Arc<SimCluster>,
    build: impl FnOnce(tempo_worker::WorkerBuilder) -> tempo_worker::WorkerBuilder,
) -> (Arc<Worker>, JoinHandle<Result<(), tempo_worker::WorkerError>>) {
    let bridge: Arc<dyn CoreBridge> = sim.clone();
    let builder = Worker::builder(bridge, WorkerConfig::new("default", "test-queue"));
    let worker = Arc::new(build(builder).build());
    let handle = {
        let worker = worker.clone();
        tokio::spawn(async move { worker.run().await })
    };
    (worker, handle)
}

async fn with_timeout<F: std::future::Future>(fut: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(10), fut)
        .await
        .expect("test should not hang")
}

// =========================================================================
// Order workflow: signals, queries, updates
// =========================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OrderInput {
    order_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct OrderStatus {
    current_state: String,
    is_paused: bool,
    priority: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct OrderResult {
    status: String,
}

struct OrderState {
    current_state: String,
    paused: bool,
    fulfilled: bool,
    priority: String,
}

fn order_workflow() -> WorkflowRegistration {
    WorkflowRegistration::builder(
        "OrderWorkflow",
        |_input: OrderInput| OrderState {
            current_state: "processing".to_string(),
            paused: false,
            fulfilled: false,
            priority: "standard".to_string(),
        },
        |state: WorkflowState<OrderState>, ctx: WfContext| async move {
            let watch = state.clone();
            ctx.condition(move || watch.with(|s| s.fulfilled)).await?;
            state.with(|s| s.current_state = "fulfilled".to_string());
            Ok::<_, WorkflowError>(OrderResult {
                status: "fulfilled".to_string(),
            })
        },
    )
    .signal("Pause", |state: WorkflowState<OrderState>, _ctx, _: Value| {
        async move {
            state.with(|s| s.paused = true);
            Ok(())
        }
    })
    .signal("Resume", |state: WorkflowState<OrderState>, _ctx, _: Value| {
        async move {
            state.with(|s| {
                s.paused = false;
                s.fulfilled = true;
            });
            Ok(())
        }
    })
    .query("GetStatus", |state: &OrderState, _: Value| {
        Ok(OrderStatus {
            current_state: state.current_state.clone(),
            is_paused: state.paused,
            priority: state.priority.clone(),
        })
    })
    .update_with_validator(
        "SetPriority",
        |_state: &OrderState, input: &Value| {
            let priority = input["priority"].as_str().unwrap_or_default();
            if priority == "standard" || priority == "expedited" {
                Ok(())
            } else {
                Err(WorkflowError::application(
                    format!("invalid priority: {priority}"),
                    "ApplicationError",
                ))
            }
        },
        |state: WorkflowState<OrderState>, _ctx, input: Value| async move {
            let priority = input["priority"].as_str().unwrap_or_default().to_string();
            state.with(|s| s.priority = priority);
            Ok("Priority changed".to_string())
        },
    )
    .build()
}

#[tokio::test]
async fn test_signal_pause_resume() {
    let sim = SimCluster::new();
    let (worker, handle) = spawn_worker(&sim, |b| b.register_workflow(order_workflow()));

    sim.start_workflow("OrderWorkflow", "ORDER-12345", json!({"order_id": "ORDER-12345"}));

    let status: OrderStatus = match with_timeout(sim.query("ORDER-12345", "GetStatus", json!(null))).await {
        QueryResult::Answered { result } => decode(&result.expect("status payload")),
        QueryResult::Failed { failure } => panic!("query failed: {failure}"),
    };
    assert_eq!(status.current_state, "processing");
    assert!(!status.is_paused);

    sim.signal("ORDER-12345", "Pause", json!({}));
    let status: OrderStatus = match with_timeout(sim.query("ORDER-12345", "GetStatus", json!(null))).await {
        QueryResult::Answered { result } => decode(&result.expect("status payload")),
        QueryResult::Failed { failure } => panic!("query failed: {failure}"),
    };
    assert!(status.is_paused);

    sim.signal("ORDER-12345", "Resume", json!({}));
    let outcome = with_timeout(sim.outcome("ORDER-12345")).await;
    match outcome {
        SimOutcome::Completed(Some(payload)) => {
            let result: OrderResult = decode(&payload);
            assert_eq!(result.status, "fulfilled");
        }
        other => panic!("unexpected outcome: {other:?}"),
    }

    worker.shutdown().await;
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_update_validation_and_effect() {
    let sim = SimCluster::new();
    let (worker, handle) = spawn_worker(&sim, |b| b.register_workflow(order_workflow()));

    sim.start_workflow("OrderWorkflow", "ORDER-77", json!({"order_id": "ORDER-77"}));

    // Invalid priority is rejected by the validator and never accepted
    let outcome =
        with_timeout(sim.update("ORDER-77", "SetPriority", json!({"priority": "invalid"}))).await;
    match outcome {
        SimUpdateOutcome::Rejected(failure) => {
            assert!(matches!(failure.info, FailureInfo::Application { .. }));
            assert!(failure.message.contains("invalid priority"));
        }
        other => panic!("expected rejection, got {other:?}"),
    }

    // Valid priority completes and mutates state
    let outcome =
        with_timeout(sim.update("ORDER-77", "SetPriority", json!({"priority": "expedited"}))).await;
    match outcome {
        SimUpdateOutcome::Success(Some(payload)) => {
            let message: String = decode(&payload);
            assert_eq!(message, "Priority changed");
        }
        other => panic!("expected success, got {other:?}"),
    }

    let status: OrderStatus = match with_timeout(sim.query("ORDER-77", "GetStatus", json!(null))).await {
        QueryResult::Answered { result } => decode(&result.expect("status payload")),
        QueryResult::Failed { failure } => panic!("query failed: {failure}"),
    };
    assert_eq!(status.priority, "expedited");

    worker.shutdown().await;
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_metadata_query_lists_handlers() {
    let sim = SimCluster::new();
    let (worker, handle) = spawn_worker(&sim, |b| b.register_workflow(order_workflow()));

    sim.start_workflow("OrderWorkflow", "ORDER-M", json!({"order_id": "ORDER-M"}));

    let metadata: WorkflowMetadata = match with_timeout(sim.query(
        "ORDER-M",
        tempo_core::METADATA_QUERY_NAME,
        json!(null),
    ))
    .await
    {
        QueryResult::Answered { result } => decode(&result.expect("metadata payload")),
        QueryResult::Failed { failure } => panic!("metadata query failed: {failure}"),
    };

    let signal_names: Vec<_> = metadata.signals.iter().map(|d| d.name.as_str()).collect();
    assert!(signal_names.contains(&"Pause"));
    assert!(signal_names.contains(&"Resume"));
    assert_eq!(metadata.queries.len(), 1);
    assert_eq!(metadata.updates.len(), 1);

    worker.shutdown().await;
    handle.await.unwrap().unwrap();
}

// =========================================================================
// Saga compensation
// =========================================================================

#[derive(Debug, Serialize, Deserialize)]
struct BookingResult {
    status: String,
    flight_id: String,
    hotel_id: String,
}

struct BookingState;

fn travel_booking_workflow() -> WorkflowRegistration {
    WorkflowRegistration::builder(
        "TravelBookingWorkflow",
        |_: Value| BookingState,
        |_state: WorkflowState<BookingState>, ctx: WfContext| async move {
            let retry = RetryPolicy::default().with_maximum_attempts(5);
            let opts = |name: &str| {
                ActivityOptions::new(name, Duration::from_secs(5))
                    .with_retry_policy(retry.clone())
            };

            let flight_id: String = ctx.execute_activity(opts("reserve_flight"), &json!({})).await?;
            let hotel_id: String = ctx.execute_activity(opts("reserve_hotel"), &json!({})).await?;

            let charge: Result<String, WorkflowError> = ctx
                .execute_activity(opts("charge_payment"), &json!({"amount": 1999}))
                .await;

            match charge {
                Ok(_) => Ok(BookingResult {
                    status: "booked".to_string(),
                    flight_id,
                    hotel_id,
                }),
                Err(_) => {
                    // Compensate in reverse order of acquisition
                    let _: Value = ctx
                        .execute_activity(opts("cancel_hotel"), &json!({"id": hotel_id}))
                        .await?;
                    let _: Value = ctx
                        .execute_activity(opts("cancel_flight"), &json!({"id": flight_id}))
                        .await?;
                    Ok(BookingResult {
                        status: "cancelled".to_string(),
                        flight_id,
                        hotel_id,
                    })
                }
            }
        },
    )
    .build()
}

#[tokio::test]
async fn test_saga_compensation_order() {
    let sim = SimCluster::new();
    let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(vec![]));

    let reserve_flight = ActivityRegistration::new("reserve_flight", {
        move |ctx: ActivityContext, _: Value| async move {
            match ctx.info().attempt {
                1 => Err(ActivityError::application("Connection timeout").with_type("TimeoutError")),
                2 => Err(ActivityError::application("Service temporarily unavailable")
                    .with_type("ServiceError")),
                _ => Ok("FL-123".to_string()),
            }
        }
    });
    let reserve_hotel = ActivityRegistration::new("reserve_hotel", {
        move |ctx: ActivityContext, _: Value| async move {
            if ctx.info().attempt == 1 {
                Err(ActivityError::application("Connection timeout").with_type("TimeoutError"))
            } else {
                Ok("HT-456".to_string())
            }
        }
    });
    let charge_payment = ActivityRegistration::new("charge_payment", {
        move |_ctx: ActivityContext, _: Value| async move {
            Err::<Value, _>(
                ActivityError::application("insufficient funds on card")
                    .with_type("InsufficientFunds")
                    .non_retryable(),
            )
        }
    });
    let cancel_hotel = ActivityRegistration::new("cancel_hotel", {
        let log = log.clone();
        move |_ctx: ActivityContext, _: Value| {
            let log = log.clone();
            async move {
                log.lock().push("cancel_hotel".to_string());
                Ok(json!("ok"))
            }
        }
    });
    let cancel_flight = ActivityRegistration::new("cancel_flight", {
        let log = log.clone();
        move |_ctx: ActivityContext, _: Value| {
            let log = log.clone();
            async move {
                log.lock().push("cancel_flight".to_string());
                Ok(json!("ok"))
            }
        }
    });

    let (worker, handle) = spawn_worker(&sim, |b| {
        b.register_workflow(travel_booking_workflow())
            .register_activity(reserve_flight)
            .register_activity(reserve_hotel)
            .register_activity(charge_payment)
            .register_activity(cancel_hotel)
            .register_activity(cancel_flight)
    });

    sim.start_workflow("TravelBookingWorkflow", "trip-1", json!({}));

    let outcome = with_timeout(sim.outcome("trip-1")).await;
    match outcome {
        SimOutcome::Completed(Some(payload)) => {
            let result: BookingResult = decode(&payload);
            assert_eq!(result.status, "cancelled");
            assert_eq!(result.flight_id, "FL-123");
            assert_eq!(result.hotel_id, "HT-456");
        }
        other => panic!("unexpected outcome: {other:?}"),
    }

    assert_eq!(*log.lock(), vec!["cancel_hotel", "cancel_flight"]);

    worker.shutdown().await;
    handle.await.unwrap().unwrap();
}

// =========================================================================
// Continue-as-new
// =========================================================================

struct Counter {
    n: i64,
}

#[tokio::test]
async fn test_continue_as_new_chain() {
    let sim = SimCluster::new();
    let counter = WorkflowRegistration::builder(
        "CounterWorkflow",
        |n: i64| Counter { n },
        |state: WorkflowState<Counter>, ctx: WfContext| async move {
            let n = state.with(|s| s.n);
            if n < 3 {
                return Err(ctx.continue_as_new(&(n + 1)));
            }
            Ok::<_, WorkflowError>(n)
        },
    )
    .build();

    let (worker, handle) = spawn_worker(&sim, |b| b.register_workflow(counter));

    let first_run = sim.start_workflow("CounterWorkflow", "counter-1", json!(0));

    let outcome = with_timeout(sim.outcome("counter-1")).await;
    match outcome {
        SimOutcome::Completed(Some(payload)) => {
            let n: i64 = decode(&payload);
            assert_eq!(n, 3);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }

    // The id stayed constant across a chain of new runs
    let runs = sim.runs_of("counter-1");
    assert_eq!(runs.len(), 4);
    assert_ne!(runs[0], runs[3]);
    assert_eq!(runs[0], first_run);

    // Prior runs closed as continued-as-new
    for run_id in &runs[..3] {
        assert!(matches!(
            sim.run_outcome(run_id),
            Some(SimOutcome::ContinuedAsNew { .. })
        ));
    }

    worker.shutdown().await;
    handle.await.unwrap().unwrap();
}

// =========================================================================
// Ordering, timers, cancellation
// =========================================================================

struct SignalLog {
    entries: Vec<String>,
    done: bool,
}

#[tokio::test]
async fn test_signal_order_matches_history_order() {
    let sim = SimCluster::new();
    let registration = WorkflowRegistration::builder(
        "RecordingWorkflow",
        |_: Value| SignalLog {
            entries: vec![],
            done: false,
        },
        |state: WorkflowState<SignalLog>, ctx: WfContext| async move {
            let watch = state.clone();
            ctx.condition(move || watch.with(|s| s.done)).await?;
            Ok::<_, WorkflowError>(state.with(|s| s.entries.clone()))
        },
    )
    .signal("Record", |state: WorkflowState<SignalLog>, _ctx, input: String| {
        async move {
            state.with(|s| s.entries.push(input));
            Ok(())
        }
    })
    .signal("Finish", |state: WorkflowState<SignalLog>, _ctx, _: Value| {
        async move {
            state.with(|s| s.done = true);
            Ok(())
        }
    })
    .build();

    let (worker, handle) = spawn_worker(&sim, |b| b.register_workflow(registration));

    sim.start_workflow("RecordingWorkflow", "rec-1", json!({}));
    // Three signals delivered within one activation
    sim.signal_batch(
        "rec-1",
        vec![
            ("Record", json!("first")),
            ("Record", json!("second")),
            ("Record", json!("third")),
        ],
    );
    sim.signal("rec-1", "Finish", json!({}));

    let outcome = with_timeout(sim.outcome("rec-1")).await;
    match outcome {
        SimOutcome::Completed(Some(payload)) => {
            let entries: Vec<String> = decode(&payload);
            assert_eq!(entries, vec!["first", "second", "third"]);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }

    worker.shutdown().await;
    handle.await.unwrap().unwrap();
}

struct Empty;

#[tokio::test]
async fn test_timeout_elapses_and_cancels_body() {
    let sim = SimCluster::new();
    let registration = WorkflowRegistration::builder(
        "TimeoutWorkflow",
        |_: Value| Empty,
        |_state: WorkflowState<Empty>, ctx: WfContext| async move {
            let body = ctx.sleep(Duration::from_secs(3600));
            match ctx.timeout(Duration::from_secs(1), body).await {
                Ok(_) => Ok::<_, WorkflowError>("body".to_string()),
                Err(e) if e.is_cancellation() => Ok("timed-out".to_string()),
                Err(e) => Err(e),
            }
        },
    )
    .build();

    let (worker, handle) = spawn_worker(&sim, |b| b.register_workflow(registration));

    sim.start_workflow("TimeoutWorkflow", "to-1", json!({}));

    // Let both timers reach the simulator, then fire the shortest
    with_timeout(async {
        while sim.pending_timer_count() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(sim.advance_time());

    let outcome = with_timeout(sim.outcome("to-1")).await;
    match outcome {
        SimOutcome::Completed(Some(payload)) => {
            let result: String = decode(&payload);
            assert_eq!(result, "timed-out");
        }
        other => panic!("unexpected outcome: {other:?}"),
    }

    // The losing body timer was cancelled, not left pending
    assert_eq!(sim.pending_timer_count(), 0);

    worker.shutdown().await;
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_cancellation_runs_compensation() {
    let sim = SimCluster::new();
    let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(vec![]));

    let compensate = ActivityRegistration::new("compensate", {
        let log = log.clone();
        move |_ctx: ActivityContext, _: Value| {
            let log = log.clone();
            async move {
                log.lock().push("compensate".to_string());
                Ok(json!("ok"))
            }
        }
    });

    let registration = WorkflowRegistration::builder(
        "CancellableWorkflow",
        |_: Value| Empty,
        |_state: WorkflowState<Empty>, ctx: WfContext| async move {
            match ctx.sleep(Duration::from_secs(3600)).await {
                Ok(()) => Ok::<_, WorkflowError>("slept".to_string()),
                Err(e) if e.is_cancellation() => {
                    // Saga-style compensation still works after cancellation
                    let _: Value = ctx
                        .execute_activity(
                            ActivityOptions::new("compensate", Duration::from_secs(5)),
                            &json!({}),
                        )
                        .await?;
                    Ok("compensated".to_string())
                }
                Err(e) => Err(e),
            }
        },
    )
    .build();

    let (worker, handle) = spawn_worker(&sim, |b| {
        b.register_workflow(registration).register_activity(compensate)
    });

    sim.start_workflow("CancellableWorkflow", "cancel-1", json!({}));
    with_timeout(async {
        while sim.pending_timer_count() < 1 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    sim.cancel_workflow("cancel-1");

    let outcome = with_timeout(sim.outcome("cancel-1")).await;
    match outcome {
        SimOutcome::Completed(Some(payload)) => {
            let result: String = decode(&payload);
            assert_eq!(result, "compensated");
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(*log.lock(), vec!["compensate"]);

    worker.shutdown().await;
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_cancellation_rethrown_cancels_workflow() {
    let sim = SimCluster::new();
    let registration = WorkflowRegistration::builder(
        "SleepyWorkflow",
        |_: Value| Empty,
        |_state: WorkflowState<Empty>, ctx: WfContext| async move {
            ctx.sleep(Duration::from_secs(3600)).await?;
            Ok::<_, WorkflowError>("done".to_string())
        },
    )
    .build();

    let (worker, handle) = spawn_worker(&sim, |b| b.register_workflow(registration));

    sim.start_workflow("SleepyWorkflow", "sleepy-1", json!({}));
    with_timeout(async {
        while sim.pending_timer_count() < 1 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    sim.cancel_workflow("sleepy-1");

    let outcome = with_timeout(sim.outcome("sleepy-1")).await;
    assert!(matches!(outcome, SimOutcome::Cancelled));

    worker.shutdown().await;
    handle.await.unwrap().unwrap();
}

// =========================================================================
// Activities: heartbeats, async completion, unregistered types
// =========================================================================

#[tokio::test]
async fn test_heartbeats_coalesce_to_latest() {
    let sim = SimCluster::new();

    let beating = ActivityRegistration::new("beating", {
        move |ctx: ActivityContext, _: Value| async move {
            ctx.heartbeat(&1);
            // Let the first flush start (the simulated transport is slow)
            tokio::time::sleep(Duration::from_millis(120)).await;
            for i in 2..=5 {
                ctx.heartbeat(&i);
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(json!("done"))
        }
    });

    let registration = WorkflowRegistration::builder(
        "HeartbeatWorkflow",
        |_: Value| Empty,
        |_state: WorkflowState<Empty>, ctx: WfContext| async move {
            let _: Value = ctx
                .execute_activity(
                    ActivityOptions::new("beating", Duration::from_secs(30))
                        .with_heartbeat_timeout(Duration::from_secs(5)),
                    &json!({}),
                )
                .await?;
            Ok::<_, WorkflowError>("ok".to_string())
        },
    )
    .build();

    let (worker, handle) = spawn_worker(&sim, |b| {
        b.register_workflow(registration).register_activity(beating)
    });

    sim.start_workflow("HeartbeatWorkflow", "hb-1", json!({}));
    let outcome = with_timeout(sim.outcome("hb-1")).await;
    assert!(matches!(outcome, SimOutcome::Completed(_)));

    let heartbeats = sim.recorded_heartbeats();
    // Four rapid heartbeats coalesced into a single record with the latest
    assert_eq!(heartbeats.len(), 2, "expected coalescing, got {heartbeats:?}");
    let last: i64 = decode(&heartbeats[1].details[0]);
    assert_eq!(last, 5);

    worker.shutdown().await;
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_async_activity_completion() {
    let sim = SimCluster::new();

    let async_act = ActivityRegistration::new("deferred", {
        move |_ctx: ActivityContext, _: Value| async move {
            Err::<Value, _>(ActivityError::CompleteAsync)
        }
    });

    let registration = WorkflowRegistration::builder(
        "DeferredWorkflow",
        |_: Value| Empty,
        |_state: WorkflowState<Empty>, ctx: WfContext| async move {
            let result: String = ctx
                .execute_activity(
                    ActivityOptions::new("deferred", Duration::from_secs(30)),
                    &json!({}),
                )
                .await?;
            Ok::<_, WorkflowError>(result)
        },
    )
    .build();

    let (worker, handle) = spawn_worker(&sim, |b| {
        b.register_workflow(registration).register_activity(async_act)
    });

    sim.start_workflow("DeferredWorkflow", "defer-1", json!({}));

    let token = with_timeout(async {
        loop {
            if let Some(token) = sim.async_activity_tokens().first().copied() {
                return token;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;

    sim.complete_async_activity(token, json!("completed externally"));

    let outcome = with_timeout(sim.outcome("defer-1")).await;
    match outcome {
        SimOutcome::Completed(Some(payload)) => {
            let result: String = decode(&payload);
            assert_eq!(result, "completed externally");
        }
        other => panic!("unexpected outcome: {other:?}"),
    }

    worker.shutdown().await;
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_unregistered_activity_fails_with_known_names() {
    let sim = SimCluster::new();

    let known = ActivityRegistration::new("known_activity", {
        move |_ctx: ActivityContext, _: Value| async move { Ok(json!("ok")) }
    });

    let registration = WorkflowRegistration::builder(
        "LostWorkflow",
        |_: Value| Empty,
        |_state: WorkflowState<Empty>, ctx: WfContext| async move {
            let _: Value = ctx
                .execute_activity(
                    ActivityOptions::new("missing_activity", Duration::from_secs(5)),
                    &json!({}),
                )
                .await?;
            Ok::<_, WorkflowError>("unreachable".to_string())
        },
    )
    .build();

    let (worker, handle) = spawn_worker(&sim, |b| {
        b.register_workflow(registration).register_activity(known)
    });

    sim.start_workflow("LostWorkflow", "lost-1", json!({}));

    let outcome = with_timeout(sim.outcome("lost-1")).await;
    match outcome {
        SimOutcome::Failed(failure) => {
            assert!(failure.message.contains("missing_activity"));
            assert!(failure.message.contains("known_activity"));
            match failure.info {
                FailureInfo::Application { non_retryable, .. } => assert!(non_retryable),
                other => panic!("unexpected info: {other:?}"),
            }
        }
        other => panic!("unexpected outcome: {other:?}"),
    }

    worker.shutdown().await;
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_worker_shutdown_drains() {
    let sim = SimCluster::new();
    let (worker, handle) = spawn_worker(&sim, |b| b.register_workflow(order_workflow()));

    worker.shutdown().await;
    with_timeout(async { handle.await.unwrap().unwrap() }).await;
}

// =========================================================================
// Heartbeat conversion failure and worker-side interceptors
// =========================================================================

/// A codec that refuses one specific payload, standing in for a key-server
/// outage during heartbeat conversion
struct UnluckyCodec;

impl tempo_convert::PayloadCodec for UnluckyCodec {
    fn encode(
        &self,
        payloads: Vec<Payload>,
    ) -> Result<Vec<Payload>, tempo_convert::DataConverterError> {
        for payload in &payloads {
            if payload.data == b"13" {
                return Err(tempo_convert::DataConverterError::Codec(
                    "refusing to seal payload".to_string(),
                ));
            }
        }
        Ok(payloads)
    }

    fn decode(
        &self,
        payloads: Vec<Payload>,
    ) -> Result<Vec<Payload>, tempo_convert::DataConverterError> {
        Ok(payloads)
    }
}

#[tokio::test]
async fn test_heartbeat_conversion_failure_cancels_with_underlying_error() {
    let sim = SimCluster::new();

    // Heartbeat details of 13 fail the codec, which must cancel the
    // activity with the conversion error rather than a plain cancelled error
    let converter = tempo_convert::DataConverter::default().with_codec(Arc::new(UnluckyCodec));

    let beating = ActivityRegistration::new("beating", {
        move |ctx: ActivityContext, _: Value| async move {
            ctx.heartbeat(&13);
            let reason = ctx.cancelled().await;
            assert!(matches!(
                reason,
                tempo_worker::ActivityCancellationReason::HeartbeatRecordFailure(_)
            ));
            Err::<Value, _>(ActivityError::cancelled())
        }
    });

    let registration = WorkflowRegistration::builder(
        "HeartbeatFailureWorkflow",
        |_: Value| Empty,
        |_state: WorkflowState<Empty>, ctx: WfContext| async move {
            let _: Value = ctx
                .execute_activity(
                    ActivityOptions::new("beating", Duration::from_secs(30)),
                    &json!(null),
                )
                .await?;
            Ok::<_, WorkflowError>(())
        },
    )
    .build();

    let bridge: Arc<dyn CoreBridge> = sim.clone();
    let worker = Arc::new(
        Worker::builder(bridge, WorkerConfig::new("default", "test-queue"))
            .with_data_converter(converter)
            .register_workflow(registration)
            .register_activity(beating)
            .build(),
    );
    let handle = {
        let worker = worker.clone();
        tokio::spawn(async move { worker.run().await })
    };

    sim.start_workflow("HeartbeatFailureWorkflow", "hbf-1", json!(null));

    let outcome = with_timeout(sim.outcome("hbf-1")).await;
    match outcome {
        SimOutcome::Failed(failure) => {
            assert!(
                failure.message.contains("heartbeat details conversion failed"),
                "unexpected failure: {failure:?}"
            );
        }
        other => panic!("unexpected outcome: {other:?}"),
    }

    worker.shutdown().await;
    handle.await.unwrap().unwrap();
}

struct DispatchLogger {
    log: Arc<Mutex<Vec<String>>>,
}

struct DispatchLoggerInbound {
    log: Arc<Mutex<Vec<String>>>,
    next: Arc<dyn tempo_worker::interceptors::WorkflowInboundInterceptor>,
}

impl tempo_worker::interceptors::WorkflowInboundInterceptor for DispatchLoggerInbound {
    fn execute_workflow(
        &self,
        input: tempo_worker::interceptors::ExecuteWorkflowInput,
    ) -> futures::future::BoxFuture<'static, Result<Option<Payload>, WorkflowError>> {
        self.log.lock().push(format!("execute:{}", input.workflow_type));
        self.next.execute_workflow(input)
    }

    fn handle_signal(
        &self,
        input: tempo_worker::interceptors::HandleSignalInput,
    ) -> futures::future::BoxFuture<'static, Result<(), WorkflowError>> {
        self.log.lock().push(format!("signal:{}", input.signal_name));
        self.next.handle_signal(input)
    }

    fn handle_query(
        &self,
        input: tempo_worker::interceptors::HandleQueryInput,
    ) -> Result<Option<Payload>, WorkflowError> {
        self.log.lock().push(format!("query:{}", input.query_type));
        self.next.handle_query(input)
    }

    fn validate_update(
        &self,
        input: &tempo_worker::interceptors::HandleUpdateInput,
    ) -> Result<(), WorkflowError> {
        self.next.validate_update(input)
    }

    fn handle_update(
        &self,
        input: tempo_worker::interceptors::HandleUpdateInput,
    ) -> futures::future::BoxFuture<'static, Result<Option<Payload>, WorkflowError>> {
        self.log.lock().push(format!("update:{}", input.update_name));
        self.next.handle_update(input)
    }
}

impl tempo_worker::WorkerInterceptor for DispatchLogger {
    fn intercept_workflow(
        &self,
        next: Arc<dyn tempo_worker::interceptors::WorkflowInboundInterceptor>,
    ) -> Arc<dyn tempo_worker::interceptors::WorkflowInboundInterceptor> {
        Arc::new(DispatchLoggerInbound {
            log: self.log.clone(),
            next,
        })
    }
}

#[tokio::test]
async fn test_workflow_interceptor_sees_dispatch_order() {
    let sim = SimCluster::new();
    let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(vec![]));

    let (worker, handle) = spawn_worker(&sim, |b| {
        b.register_workflow(order_workflow())
            .with_interceptor(Arc::new(DispatchLogger { log: log.clone() }))
    });

    sim.start_workflow("OrderWorkflow", "ORDER-X", json!({"order_id": "ORDER-X"}));
    sim.signal("ORDER-X", "Pause", json!({}));
    match with_timeout(sim.query("ORDER-X", "GetStatus", json!(null))).await {
        QueryResult::Answered { .. } => {}
        QueryResult::Failed { failure } => panic!("query failed: {failure}"),
    }
    let _ = with_timeout(sim.update("ORDER-X", "SetPriority", json!({"priority": "expedited"})))
        .await;

    assert_eq!(
        *log.lock(),
        vec![
            "execute:OrderWorkflow",
            "signal:Pause",
            "query:GetStatus",
            "update:SetPriority"
        ]
    );

    worker.shutdown().await;
    handle.await.unwrap().unwrap();
}
