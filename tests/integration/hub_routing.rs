use super::support::{data, next_event, Fixture};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use zygote::bootstrap::provision;
use zygote::error::{HubError, StorageError};
use zygote::frame::{Channel, Envelope, Frame, FrameRequest};
use zygote::hub::Hub;
use zygote::store::{AgentRecord, AuthTokenRecord, FrameRecord, MemoryStorage, SpaceRecord, Storage};
use zygote::types::{AgentId, Data, SpaceId};

/// Memory storage whose frame writes and token lookups can be made to fail
#[derive(Default)]
struct FlakyStorage {
    inner: MemoryStorage,
    fail_frames: AtomicBool,
    fail_tokens: AtomicBool,
}

impl FlakyStorage {
    fn outage(what: &str) -> StorageError {
        StorageError::Unavailable(format!("{} offline", what))
    }
}

impl Storage for FlakyStorage {
    fn create_agent(&self, name: &str, data: Data) -> Result<AgentRecord, StorageError> {
        self.inner.create_agent(name, data)
    }
    fn get_agent(&self, uuid: &AgentId) -> Result<Option<AgentRecord>, StorageError> {
        self.inner.get_agent(uuid)
    }
    fn get_agent_by_name(&self, name: &str) -> Result<Option<AgentRecord>, StorageError> {
        self.inner.get_agent_by_name(name)
    }
    fn list_agents(&self) -> Result<Vec<AgentRecord>, StorageError> {
        self.inner.list_agents()
    }
    fn update_agent_meta(&self, uuid: &AgentId, meta: Data) -> Result<AgentRecord, StorageError> {
        self.inner.update_agent_meta(uuid, meta)
    }
    fn delete_agent(&self, uuid: &AgentId) -> Result<(), StorageError> {
        self.inner.delete_agent(uuid)
    }
    fn create_space(&self, name: &str, data: Data) -> Result<SpaceRecord, StorageError> {
        self.inner.create_space(name, data)
    }
    fn get_space(&self, uuid: &SpaceId) -> Result<Option<SpaceRecord>, StorageError> {
        self.inner.get_space(uuid)
    }
    fn get_space_by_name(&self, name: &str) -> Result<Option<SpaceRecord>, StorageError> {
        self.inner.get_space_by_name(name)
    }
    fn list_spaces(&self) -> Result<Vec<SpaceRecord>, StorageError> {
        self.inner.list_spaces()
    }
    fn delete_space(&self, uuid: &SpaceId) -> Result<(), StorageError> {
        self.inner.delete_space(uuid)
    }
    fn join_space(&self, agent: &AgentId, space: &SpaceId) -> Result<(), StorageError> {
        self.inner.join_space(agent, space)
    }
    fn leave_space(&self, agent: &AgentId, space: &SpaceId) -> Result<(), StorageError> {
        self.inner.leave_space(agent, space)
    }
    fn agent_spaces(&self, agent: &AgentId) -> Result<Vec<SpaceRecord>, StorageError> {
        self.inner.agent_spaces(agent)
    }
    fn space_agents(&self, space: &SpaceId) -> Result<Vec<AgentRecord>, StorageError> {
        self.inner.space_agents(space)
    }
    fn mint_token(&self, agent: &AgentId) -> Result<AuthTokenRecord, StorageError> {
        self.inner.mint_token(agent)
    }
    fn list_tokens(&self, agent: &AgentId) -> Result<Vec<AuthTokenRecord>, StorageError> {
        self.inner.list_tokens(agent)
    }
    fn revoke_token(&self, token: &str) -> Result<(), StorageError> {
        self.inner.revoke_token(token)
    }
    fn get_agent_by_token(&self, token: &str) -> Result<Option<AgentRecord>, StorageError> {
        if self.fail_tokens.load(Ordering::SeqCst) {
            return Err(Self::outage("tokens"));
        }
        self.inner.get_agent_by_token(token)
    }
    fn create_frame(&self, record: FrameRecord) -> Result<FrameRecord, StorageError> {
        if self.fail_frames.load(Ordering::SeqCst) {
            return Err(Self::outage("frames"));
        }
        self.inner.create_frame(record)
    }
    fn list_frames_by_agent(&self, agent: &AgentId, limit: usize) -> Result<Vec<FrameRecord>, StorageError> {
        self.inner.list_frames_by_agent(agent, limit)
    }
    fn list_frames_by_space(&self, space: &SpaceId, limit: usize) -> Result<Vec<FrameRecord>, StorageError> {
        self.inner.list_frames_by_space(space, limit)
    }
}

fn flaky_hub() -> (Arc<FlakyStorage>, Arc<Hub>) {
    let storage = Arc::new(FlakyStorage::default());
    let hub = Arc::new(Hub::new(storage.clone() as Arc<dyn Storage>));
    (storage, hub)
}

fn publish(name: &str, value: serde_json::Value) -> Envelope {
    Envelope::publish(&FrameRequest::new(Frame::event(name, data(value))))
}

#[test]
fn test_persistence_failure_is_scoped_to_the_sender() {
    let (storage, hub) = flaky_hub();
    let home = ["home".to_string()];
    let weather = provision(storage.as_ref(), "weather", &home).unwrap().token;
    let dashboard = provision(storage.as_ref(), "dashboard", &home).unwrap().token;

    let mut sender = hub.connect(&weather).unwrap();
    let mut observer = hub.connect(&dashboard).unwrap();
    sender.receiver.try_recv().unwrap();
    observer.receiver.try_recv().unwrap();

    storage.fail_frames.store(true, Ordering::SeqCst);
    assert!(matches!(
        hub.handle(sender.id, publish("weather/current", json!({"temp": 19}))),
        Err(HubError::Persistence(StorageError::Unavailable(_)))
    ));
    hub.dispatch(sender.id, publish("weather/current", json!({"temp": 20})));

    let error = sender.receiver.try_recv().unwrap();
    assert_eq!(error.parse_channel(), Channel::Error);
    assert_eq!(error.payload["channel"], "event-weather/current");
    assert!(observer.receiver.try_recv().is_err());
    assert_eq!(hub.registry().len(), 2);

    storage.fail_frames.store(false, Ordering::SeqCst);
    hub.dispatch(sender.id, publish("weather/current", json!({"temp": 21})));
    let frame = observer.receiver.try_recv().unwrap();
    assert_eq!(frame.payload["data"]["temp"], 21);
}

#[test]
fn test_token_lookup_failure_rejects_without_session() {
    let (storage, hub) = flaky_hub();
    let token = provision(storage.as_ref(), "weather", &[]).unwrap().token;

    storage.fail_tokens.store(true, Ordering::SeqCst);
    assert!(matches!(hub.connect(&token), Err(HubError::Authentication(_))));
    assert!(hub.registry().is_empty());

    storage.fail_tokens.store(false, Ordering::SeqCst);
    assert!(hub.connect(&token).is_ok());
}

#[tokio::test]
async fn test_space_targeting_across_three_agents() {
    let fixture = Fixture::new();
    let sender = fixture.agent("weather", &["s1", "s2"]);
    let s1 = fixture.agent("reader-1", &["s1"]);
    let s2 = fixture.agent("reader-2", &["s2"]);
    let s3 = fixture.agent("reader-3", &["s3"]);

    let weather = fixture.hub.connect(&sender).unwrap();
    let mut r1 = fixture.hub.connect(&s1).unwrap();
    let mut r2 = fixture.hub.connect(&s2).unwrap();
    let mut r3 = fixture.hub.connect(&s3).unwrap();

    let targeted = FrameRequest::new(Frame::event("weather/alert", data(json!({"level": 2})))).to_spaces(["s1", "s3"]);
    fixture.hub.dispatch(weather.id, Envelope::publish(&targeted));

    let delivered = next_event(&mut r1.receiver).await;
    assert_eq!(delivered.meta["space"], "s1");
    assert_eq!(delivered.meta["agent"], "weather");
    for receiver in [&mut r2.receiver, &mut r3.receiver] {
        while let Ok(envelope) = receiver.try_recv() {
            assert_ne!(envelope.parse_channel(), Channel::Event("weather/alert".to_string()));
        }
    }

    let nowhere = FrameRequest::new(Frame::event("weather/alert", Data::new())).to_spaces(["s3"]);
    fixture.hub.dispatch(weather.id, Envelope::publish(&nowhere));
    let agent = fixture.storage.get_agent_by_name("weather").unwrap().unwrap();
    let stored = fixture.storage.list_frames_by_agent(&agent.uuid, 10).unwrap();
    assert_eq!(stored.len(), 2);
    assert!(stored.iter().any(|f| f.spaces.is_empty()));
}

#[test]
fn test_identity_reflects_membership_at_connect_time() {
    let fixture = Fixture::new();
    let token = fixture.agent("weather", &["home", "garden"]);
    let mut session = fixture.hub.connect(&token).unwrap();
    let identity = session.receiver.try_recv().unwrap();
    assert_eq!(identity.parse_channel(), Channel::CommandReply);
    let frame = Frame::from_payload(&identity.channel, identity.payload).unwrap();
    let identity = zygote::frame::Identity::from_frame(&frame).unwrap();
    assert_eq!(identity.name, "weather");
    assert_eq!(identity.space_names(), vec!["garden", "home"]);
}
