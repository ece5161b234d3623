use super::support::{data, wait_for_state, Fixture};
use serde_json::json;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use zygote::agents::log_to_file;
use zygote::error::{RuntimeError, TransportError};
use zygote::frame::Frame;
use zygote::hub::{HubServer, LocalConnector};
use zygote::runtime::{AgentRuntime, Connector, LifecycleState, WsConnector};
use zygote::store::Storage;

#[tokio::test]
async fn test_weather_reaches_dashboard_over_websocket() {
    let fixture = Fixture::new();
    let weather_token = fixture.agent("weather", &["home"]);
    let dashboard_token = fixture.agent("dashboard", &["home"]);

    let server = HubServer::bind(fixture.hub.clone(), "127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/", server.local_addr().unwrap());
    let server_cancel = CancellationToken::new();
    let server_task = tokio::spawn(server.serve(server_cancel.clone()));
    let cancel = CancellationToken::new();

    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel::<Frame>();
    let mut dashboard = AgentRuntime::new("dashboard");
    dashboard.on_event("weather/current", move |_, frame| {
        let seen_tx = seen_tx.clone();
        async move {
            seen_tx.send(frame)?;
            Ok(())
        }
    });
    let mut dashboard_state = dashboard.state();
    let dashboard_connector = WsConnector::new(url.clone());
    let dashboard_cancel = cancel.child_token();
    let dashboard_task =
        tokio::spawn(async move { dashboard.run(&dashboard_connector, &dashboard_token, dashboard_cancel).await });
    wait_for_state(&mut dashboard_state, LifecycleState::Running).await;

    let mut weather = AgentRuntime::new("weather");
    weather.on_startup(Duration::ZERO, |agent| async move {
        agent.emit("weather/current", data(json!({"temp": 21})))?;
        Ok(())
    });
    let weather_connector = WsConnector::new(url);
    let weather_cancel = cancel.child_token();
    let weather_task =
        tokio::spawn(async move { weather.run(&weather_connector, &weather_token, weather_cancel).await });

    let frame = tokio::time::timeout(Duration::from_secs(10), seen_rx.recv())
        .await
        .expect("dashboard never saw the weather frame")
        .unwrap();
    assert_eq!(frame.name, "weather/current");
    assert_eq!(frame.data["temp"], 21);
    assert_eq!(frame.meta["agent"], "weather");
    assert_eq!(frame.meta["space"], "home");
    assert!(frame.time.is_some());

    cancel.cancel();
    dashboard_task.await.unwrap().unwrap();
    weather_task.await.unwrap().unwrap();
    server_cancel.cancel();
    server_task.await.unwrap().unwrap();
    assert!(fixture.hub.registry().is_empty());
}

#[tokio::test]
async fn test_bad_token_is_refused_at_handshake() {
    let fixture = Fixture::new();
    fixture.agent("weather", &["home"]);
    let server = HubServer::bind(fixture.hub.clone(), "127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/", server.local_addr().unwrap());
    let cancel = CancellationToken::new();
    let server_task = tokio::spawn(server.serve(cancel.clone()));

    let connector = WsConnector::new(url.clone());
    assert!(matches!(connector.connect("not-a-token").await, Err(TransportError::Rejected)));

    let runtime = AgentRuntime::new("weather");
    let state = runtime.state();
    let result = runtime.run(&WsConnector::new(url), "not-a-token", CancellationToken::new()).await;
    assert!(matches!(result, Err(RuntimeError::Authentication)));
    assert_eq!(*state.borrow(), LifecycleState::Stopped);
    assert!(fixture.hub.registry().is_empty());

    cancel.cancel();
    server_task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_hub_shutdown_disconnects_agents() {
    let fixture = Fixture::new();
    let token = fixture.agent("hello", &["home"]);
    let server = HubServer::bind(fixture.hub.clone(), "127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/", server.local_addr().unwrap());
    let server_cancel = CancellationToken::new();
    let server_task = tokio::spawn(server.serve(server_cancel.clone()));

    let runtime = AgentRuntime::new("hello");
    let mut state = runtime.state();
    let connector = WsConnector::new(url);
    let agent_task =
        tokio::spawn(async move { runtime.run(&connector, &token, CancellationToken::new()).await });
    wait_for_state(&mut state, LifecycleState::Running).await;

    server_cancel.cancel();
    server_task.await.unwrap().unwrap();
    let result = tokio::time::timeout(Duration::from_secs(10), agent_task)
        .await
        .expect("agent did not notice the hub going away")
        .unwrap();
    assert!(matches!(result, Err(RuntimeError::Disconnected)));
    assert_eq!(*state.borrow(), LifecycleState::Stopped);
}

#[tokio::test]
async fn test_log_to_file_agent_appends_json_lines() {
    let fixture = Fixture::new();
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("frames.log");

    let logger_token = fixture.agent(log_to_file::NAME, &["home"]);
    let logger = fixture.storage.get_agent_by_name(log_to_file::NAME).unwrap().unwrap();
    fixture
        .storage
        .update_agent_meta(
            &logger.uuid,
            data(json!({"config": {"log_file": log_path.to_string_lossy()}})),
        )
        .unwrap();
    let sensor_token = fixture.agent("sensor", &["home"]);

    let runtime = log_to_file::runtime();
    let mut state = runtime.state();
    let cancel = CancellationToken::new();
    let connector = LocalConnector::new(fixture.hub.clone());
    let run_cancel = cancel.clone();
    let task = tokio::spawn(async move { runtime.run(&connector, &logger_token, run_cancel).await });
    wait_for_state(&mut state, LifecycleState::Running).await;

    let sensor = fixture.hub.connect(&sensor_token).unwrap();
    for reading in [1, 2, 3] {
        fixture.hub.dispatch(
            sensor.id,
            zygote::frame::Envelope::publish(&zygote::frame::FrameRequest::new(Frame::event(
                "sensor/reading",
                data(json!({"value": reading})),
            ))),
        );
    }

    let mut lines = Vec::new();
    for _ in 0..100 {
        let contents = tokio::fs::read_to_string(&log_path).await.unwrap_or_default();
        lines = contents.lines().map(str::to_string).collect();
        if lines.len() == 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    cancel.cancel();
    task.await.unwrap().unwrap();

    assert_eq!(lines.len(), 3);
    let mut values: Vec<i64> = lines
        .iter()
        .map(|line| {
            let frame: Frame = serde_json::from_str(line).unwrap();
            assert_eq!(frame.name, "sensor/reading");
            assert_eq!(frame.meta["agent"], "sensor");
            frame.data["value"].as_i64().unwrap()
        })
        .collect();
    values.sort();
    assert_eq!(values, vec![1, 2, 3]);
}
