//! Periodic scheduler driver
//!
//! Ticks run on the blocking pool: conditions may take real time and actions
//! block their thread while waiting.

use anyhow::Result;
use macro_engine::Engine;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Tick `engine` every `interval_ms` until `shutdown` resolves
///
/// On shutdown any pending waits are aborted, the tick in flight is awaited
/// and every macro is stopped. Returns the number of completed ticks.
pub async fn run(engine: Arc<Engine>, shutdown: impl Future<Output = ()>) -> Result<u64> {
    let interval_ms = engine.config().interval_ms.max(1);
    let mut interval = tokio::time::interval(Duration::from_millis(interval_ms));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tokio::pin!(shutdown);
    let mut ticks = 0u64;

    info!(interval_ms, "Scheduler started");

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = interval.tick() => {
                let worker = engine.clone();
                let mut tick = tokio::task::spawn_blocking(move || worker.tick());

                tokio::select! {
                    result = &mut tick => {
                        let ran = result?;
                        ticks += 1;
                        if ran {
                            debug!(tick = ticks, "Macros executed");
                        }
                    }
                    _ = &mut shutdown => {
                        warn!("Shutdown requested during tick, aborting waits");
                        engine.abort_wait();
                        tick.await?;
                        ticks += 1;
                        break;
                    }
                }
            }
        }
    }

    stop(engine).await?;
    info!(ticks, "Scheduler stopped");

    Ok(ticks)
}

/// Abort pending waits and join every macro's threads
pub async fn stop(engine: Arc<Engine>) -> Result<()> {
    engine.abort_wait();
    tokio::task::spawn_blocking(move || engine.stop_all()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use macro_engine::{Action, Condition, EngineConfig, Segment, SegmentContext};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    struct Always;

    impl Segment for Always {}

    impl Condition for Always {
        fn check(&mut self, _ctx: &SegmentContext<'_>) -> bool {
            true
        }
    }

    struct Count(Arc<AtomicUsize>);

    impl Segment for Count {}

    impl Action for Count {
        fn perform(&mut self, _ctx: &SegmentContext<'_>) -> bool {
            self.0.fetch_add(1, Ordering::SeqCst);
            true
        }
    }

    fn engine(interval_ms: u64) -> (Arc<Engine>, Arc<AtomicUsize>) {
        let engine = Engine::new(EngineConfig {
            interval_ms,
            ..EngineConfig::default()
        });
        macro_engine::register_builtins(&engine);
        engine
            .conditions()
            .register("always", "Always", || Box::new(Always));

        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        engine
            .actions()
            .register("count", "Count", move || Box::new(Count(counter.clone())));

        (Arc::new(engine), runs)
    }

    #[tokio::test]
    async fn test_ticks_until_shutdown() {
        let (engine, runs) = engine(10);
        engine
            .load(&json!({ "macros": [{
                "name": "m",
                "conditions": [{ "id": "always", "logic": 0 }],
                "actions": [{ "id": "count" }]
            }]}))
            .unwrap();

        let ticks = run(engine.clone(), tokio::time::sleep(Duration::from_millis(100)))
            .await
            .unwrap();

        assert!(ticks > 0);
        assert!(runs.load(Ordering::SeqCst) > 0);
        assert!(!engine.is_first_interval());
    }

    #[tokio::test]
    async fn test_shutdown_aborts_running_wait() {
        let (engine, _runs) = engine(10);
        engine
            .load(&json!({ "macros": [{
                "name": "sleeper",
                "conditions": [{ "id": "always", "logic": 0 }],
                "actions": [{
                    "id": "wait",
                    "duration": { "seconds": 60, "unit": 0 }
                }]
            }]}))
            .unwrap();

        let started = Instant::now();
        run(engine.clone(), tokio::time::sleep(Duration::from_millis(50)))
            .await
            .unwrap();

        assert!(started.elapsed() < Duration::from_secs(10));
        let sleeper = engine.get("sleeper").unwrap();
        assert!(sleeper.is_done());
    }

    #[tokio::test]
    async fn test_immediate_shutdown() {
        let (engine, runs) = engine(10);
        let ticks = run(engine, std::future::ready(())).await.unwrap();

        assert!(ticks <= 1);
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }
}
