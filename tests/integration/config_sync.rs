use super::support::{data, wait_for_state, Fixture};
use proptest::prelude::*;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use zygote::frame::settings::{apply_delta, merge_server_over_client, ConfigSchema, FieldType};
use zygote::error::RuntimeError;
use zygote::hub::LocalConnector;
use zygote::runtime::{AgentRuntime, LifecycleState};
use zygote::store::Storage;
use zygote::types::Data;

fn to_data(map: BTreeMap<String, i64>) -> Data {
    map.into_iter().map(|(k, v)| (k, Value::from(v))).collect()
}

fn config_map() -> impl Strategy<Value = Data> {
    prop::collection::btree_map("[a-f]", any::<i64>(), 0..6).prop_map(to_data)
}

proptest! {
    #[test]
    fn prop_server_values_win(client in config_map(), stored in config_map()) {
        let merged = merge_server_over_client(&client, &stored);
        for (key, value) in &stored {
            prop_assert_eq!(merged.get(key), Some(value));
        }
        for (key, value) in client.iter().filter(|(k, _)| !stored.contains_key(*k)) {
            prop_assert_eq!(merged.get(key), Some(value));
        }
        prop_assert_eq!(merge_server_over_client(&client, &merged), merged);
    }

    #[test]
    fn prop_sequential_deltas_compose(base in config_map(), d1 in config_map(), d2 in config_map()) {
        let stepwise = apply_delta(&apply_delta(&base, &d1), &d2);
        let mut combined = d1.clone();
        combined.extend(d2.clone());
        prop_assert_eq!(stepwise, apply_delta(&base, &combined));
    }
}

#[tokio::test]
async fn test_config_round_trips_through_hub() {
    let fixture = Fixture::new();
    let token = fixture.agent("thermostat", &["home"]);
    let agent = fixture.storage.get_agent_by_name("thermostat").unwrap().unwrap();
    fixture
        .storage
        .update_agent_meta(&agent.uuid, data(json!({"config": {"target": 22}})))
        .unwrap();

    let schema = ConfigSchema::new()
        .field("target", FieldType::Integer, 18)
        .field("unit", FieldType::String, "celsius")
        .field("eco", FieldType::Boolean, false);
    let seen: Arc<Mutex<Vec<Data>>> = Arc::new(Mutex::new(Vec::new()));
    let record = Arc::clone(&seen);

    let mut runtime = AgentRuntime::new("thermostat").with_schema(schema);
    runtime.on_startup(std::time::Duration::ZERO, move |agent| {
        let record = Arc::clone(&record);
        async move {
            let mut seen = record.lock().await;
            seen.push(agent.config());
            seen.push(agent.config_update(data(json!({"eco": true, "target": 20}))).await?);
            seen.push(agent.config_update(data(json!({"target": 19}))).await?);
            Ok(())
        }
    });
    let mut state = runtime.state();

    let cancel = CancellationToken::new();
    let connector = LocalConnector::new(fixture.hub.clone());
    let run_cancel = cancel.clone();
    let task = tokio::spawn(async move { runtime.run(&connector, &token, run_cancel).await });
    wait_for_state(&mut state, LifecycleState::Running).await;

    for _ in 0..100 {
        if seen.lock().await.len() == 3 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    cancel.cancel();
    task.await.unwrap().unwrap();

    let seen = seen.lock().await;
    assert_eq!(seen.len(), 3);
    assert_eq!(Value::Object(seen[0].clone()), json!({"target": 22, "unit": "celsius", "eco": false}));
    assert_eq!(Value::Object(seen[1].clone()), json!({"target": 20, "unit": "celsius", "eco": true}));
    assert_eq!(Value::Object(seen[2].clone()), json!({"target": 19, "unit": "celsius", "eco": true}));

    let stored = fixture.storage.get_agent(&agent.uuid).unwrap().unwrap();
    assert_eq!(stored.meta["config"], Value::Object(seen[2].clone()));
}

#[tokio::test]
async fn test_identical_defaults_sync_identically() {
    let fixture = Fixture::new();
    let token = fixture.agent("logger", &["home"]);
    let mut results = Vec::new();

    for _ in 0..2 {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let tx = Arc::new(Mutex::new(Some(tx)));
        let mut runtime = AgentRuntime::new("logger")
            .with_schema(ConfigSchema::new().field("log_file", FieldType::String, "frames.log"));
        runtime.on_startup(std::time::Duration::ZERO, move |agent| {
            let tx = Arc::clone(&tx);
            async move {
                if let Some(tx) = tx.lock().await.take() {
                    let _ = tx.send(agent.config());
                }
                Ok(())
            }
        });

        let cancel = CancellationToken::new();
        let connector = LocalConnector::new(fixture.hub.clone());
        let run_cancel = cancel.clone();
        let token = token.clone();
        let task = tokio::spawn(async move { runtime.run(&connector, &token, run_cancel).await });
        results.push(tokio::time::timeout(std::time::Duration::from_secs(5), rx).await.unwrap().unwrap());
        cancel.cancel();
        task.await.unwrap().unwrap();
    }

    assert_eq!(results[0], results[1]);
    assert_eq!(results[0]["log_file"], "frames.log");
}

#[tokio::test]
async fn test_mistyped_update_leaves_stored_config_usable() {
    let fixture = Fixture::new();
    let token = fixture.agent("poller", &["home"]);
    let agent = fixture.storage.get_agent_by_name("poller").unwrap().unwrap();
    let schema = || ConfigSchema::new().field("interval", FieldType::Integer, 30);

    let (tx, rx) = tokio::sync::oneshot::channel();
    let tx = Arc::new(Mutex::new(Some(tx)));
    let mut runtime = AgentRuntime::new("poller").with_schema(schema());
    runtime.on_startup(std::time::Duration::ZERO, move |agent| {
        let tx = Arc::clone(&tx);
        async move {
            let outcome = agent.config_update(data(json!({"interval": "soon"}))).await;
            if let Some(tx) = tx.lock().await.take() {
                let _ = tx.send(outcome);
            }
            Ok(())
        }
    });

    let cancel = CancellationToken::new();
    let connector = LocalConnector::new(fixture.hub.clone());
    let run_cancel = cancel.clone();
    let first_token = token.clone();
    let task = tokio::spawn(async move { runtime.run(&connector, &first_token, run_cancel).await });
    let outcome = tokio::time::timeout(std::time::Duration::from_secs(5), rx)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(outcome, Err(RuntimeError::Schema(_))));
    cancel.cancel();
    task.await.unwrap().unwrap();

    let stored = fixture.storage.get_agent(&agent.uuid).unwrap().unwrap();
    assert_eq!(stored.meta["config"], json!({"interval": 30}));

    // the next start still syncs and runs
    let runtime = AgentRuntime::new("poller").with_schema(schema());
    let mut state = runtime.state();
    let cancel = CancellationToken::new();
    let connector = LocalConnector::new(fixture.hub.clone());
    let run_cancel = cancel.clone();
    let task = tokio::spawn(async move { runtime.run(&connector, &token, run_cancel).await });
    wait_for_state(&mut state, LifecycleState::Running).await;
    cancel.cancel();
    task.await.unwrap().unwrap();
}
