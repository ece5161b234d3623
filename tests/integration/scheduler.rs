use super::support::{data, next_event, wait_for_state, Fixture};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use zygote::hub::LocalConnector;
use zygote::runtime::{AgentRuntime, CronTrigger, Interval, JobOptions, LifecycleState};

#[tokio::test]
async fn test_interval_job_emits_into_spaces() {
    let fixture = Fixture::new();
    let token = fixture.agent("ticker", &["home"]);
    let observer_token = fixture.agent("observer", &["home"]);
    let mut observer = fixture.hub.connect(&observer_token).unwrap();

    let count = Arc::new(AtomicUsize::new(0));
    let mut runtime = AgentRuntime::new("ticker");
    let job_count = Arc::clone(&count);
    runtime
        .on_interval(Interval::seconds(1), JobOptions::id("ticker/tick"), move |agent| {
            let job_count = Arc::clone(&job_count);
            async move {
                let n = job_count.fetch_add(1, Ordering::SeqCst) + 1;
                agent.emit("tick", data(json!({"n": n})))?;
                Ok(())
            }
        })
        .unwrap();

    let mut state = runtime.state();
    let cancel = CancellationToken::new();
    let connector = LocalConnector::new(fixture.hub.clone());
    let run_cancel = cancel.clone();
    let task = tokio::spawn(async move { runtime.run(&connector, &token, run_cancel).await });
    wait_for_state(&mut state, LifecycleState::Running).await;

    let first = next_event(&mut observer.receiver).await;
    let second = next_event(&mut observer.receiver).await;
    assert_eq!(first.name, "tick");
    assert_eq!(first.meta["agent"], "ticker");
    assert_eq!(first.data["n"], 1);
    assert_eq!(second.data["n"], 2);

    cancel.cancel();
    task.await.unwrap().unwrap();
    assert_eq!(*state.borrow(), LifecycleState::Stopped);
}

#[tokio::test]
async fn test_slow_job_skips_overlapping_firings() {
    let fixture = Fixture::new();
    let token = fixture.agent("slow", &["home"]);

    let started = Arc::new(AtomicUsize::new(0));
    let finished = Arc::new(AtomicUsize::new(0));
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut runtime = AgentRuntime::new("slow");
    let (s, f, i, p) = (started.clone(), finished.clone(), in_flight.clone(), peak.clone());
    runtime
        .on_interval(
            Interval::seconds(1),
            JobOptions::id("slow/work").max_instances(1),
            move |_| {
                let (s, f, i, p) = (s.clone(), f.clone(), i.clone(), p.clone());
                async move {
                    s.fetch_add(1, Ordering::SeqCst);
                    let now = i.fetch_add(1, Ordering::SeqCst) + 1;
                    p.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_secs(3)).await;
                    i.fetch_sub(1, Ordering::SeqCst);
                    f.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            },
        )
        .unwrap();

    let cancel = CancellationToken::new();
    let connector = LocalConnector::new(fixture.hub.clone());
    let run_cancel = cancel.clone();
    let task = tokio::spawn(async move { runtime.run(&connector, &token, run_cancel).await });

    // first firing at ~1s runs until ~4s; firings at ~2s and ~3s are dropped
    tokio::time::sleep(Duration::from_millis(3300)).await;
    assert_eq!(started.load(Ordering::SeqCst), 1);
    cancel.cancel();
    task.await.unwrap().unwrap();

    assert_eq!(peak.load(Ordering::SeqCst), 1);
    assert_eq!(finished.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_cron_every_second() {
    let fixture = Fixture::new();
    let token = fixture.agent("clock", &["home"]);
    let observer_token = fixture.agent("observer", &["home"]);
    let mut observer = fixture.hub.connect(&observer_token).unwrap();

    let mut runtime = AgentRuntime::new("clock");
    runtime
        .on_cron(CronTrigger::new().second("*"), JobOptions::default(), |agent| async move {
            agent.emit("chime", data(json!({})))?;
            Ok(())
        })
        .unwrap();

    let cancel = CancellationToken::new();
    let connector = LocalConnector::new(fixture.hub.clone());
    let run_cancel = cancel.clone();
    let task = tokio::spawn(async move { runtime.run(&connector, &token, run_cancel).await });

    let first = next_event(&mut observer.receiver).await;
    let second = next_event(&mut observer.receiver).await;
    assert_eq!(first.name, "chime");
    assert!(second.time >= first.time);

    cancel.cancel();
    task.await.unwrap().unwrap();
}
