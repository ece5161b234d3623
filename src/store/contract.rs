//! Behaviour every `Storage` implementation must share

use super::{FrameRecord, Storage};
use crate::error::StorageError;
use crate::frame::FrameKind;
use crate::types::Data;
use chrono::{Duration, Utc};
use serde_json::json;

fn frame(name: &str, agent: uuid::Uuid, spaces: Vec<uuid::Uuid>, offset_ms: i64) -> FrameRecord {
    FrameRecord {
        uuid: uuid::Uuid::new_v4(),
        kind: FrameKind::Event,
        name: name.to_string(),
        data: Data::new(),
        meta: Data::new(),
        time: Utc::now() + Duration::milliseconds(offset_ms),
        agent: Some(agent),
        spaces,
        reply_to: None,
    }
}

pub fn exercise(storage: &dyn Storage) {
    // agents
    let alpha = storage.create_agent("alpha", Data::new()).unwrap();
    let beta = storage.create_agent("beta", Data::new()).unwrap();
    assert!(matches!(
        storage.create_agent("alpha", Data::new()),
        Err(StorageError::Conflict { entity: "agent", .. })
    ));
    assert!(matches!(
        storage.create_agent("  ", Data::new()),
        Err(StorageError::InvalidName { .. })
    ));
    assert_eq!(storage.get_agent(&alpha.uuid).unwrap().unwrap().name, "alpha");
    assert_eq!(storage.get_agent_by_name("beta").unwrap().unwrap().uuid, beta.uuid);
    assert!(storage.get_agent_by_name("gamma").unwrap().is_none());
    let names: Vec<String> = storage.list_agents().unwrap().into_iter().map(|a| a.name).collect();
    assert_eq!(names, vec!["alpha", "beta"]);

    let meta = json!({"config": {"interval": 5}}).as_object().cloned().unwrap();
    let updated = storage.update_agent_meta(&alpha.uuid, meta.clone()).unwrap();
    assert_eq!(updated.meta, meta);
    assert!(updated.updated_at >= alpha.updated_at);
    assert_eq!(storage.get_agent(&alpha.uuid).unwrap().unwrap().meta, meta);
    assert!(matches!(
        storage.update_agent_meta(&uuid::Uuid::new_v4(), Data::new()),
        Err(StorageError::NotFound { .. })
    ));

    // spaces and membership
    let home = storage.create_space("home", Data::new()).unwrap();
    let lab = storage.create_space("lab", Data::new()).unwrap();
    assert!(matches!(
        storage.create_space("home", Data::new()),
        Err(StorageError::Conflict { entity: "space", .. })
    ));
    assert_eq!(storage.get_space_by_name("lab").unwrap().unwrap().uuid, lab.uuid);

    storage.join_space(&alpha.uuid, &lab.uuid).unwrap();
    storage.join_space(&alpha.uuid, &home.uuid).unwrap();
    storage.join_space(&alpha.uuid, &home.uuid).unwrap();
    storage.join_space(&beta.uuid, &home.uuid).unwrap();
    assert!(storage.join_space(&alpha.uuid, &uuid::Uuid::new_v4()).is_err());

    let spaces: Vec<String> = storage
        .agent_spaces(&alpha.uuid)
        .unwrap()
        .into_iter()
        .map(|s| s.name)
        .collect();
    assert_eq!(spaces, vec!["home", "lab"]);
    assert_eq!(storage.space_agents(&home.uuid).unwrap().len(), 2);

    storage.leave_space(&alpha.uuid, &lab.uuid).unwrap();
    assert_eq!(storage.agent_spaces(&alpha.uuid).unwrap().len(), 1);
    assert!(storage.space_agents(&lab.uuid).unwrap().is_empty());

    // tokens
    let first = storage.mint_token(&alpha.uuid).unwrap();
    std::thread::sleep(std::time::Duration::from_millis(2));
    let second = storage.mint_token(&alpha.uuid).unwrap();
    assert_ne!(first.token, second.token);
    let tokens = storage.list_tokens(&alpha.uuid).unwrap();
    assert_eq!(tokens.len(), 2);
    assert_eq!(tokens[0].token, second.token);

    assert_eq!(
        storage.get_agent_by_token(&first.token).unwrap().unwrap().uuid,
        alpha.uuid
    );
    storage.revoke_token(&first.token).unwrap();
    assert!(storage.get_agent_by_token(&first.token).unwrap().is_none());
    assert!(storage.get_agent_by_token(&second.token).unwrap().is_some());
    assert!(storage.get_agent_by_token("nonsense").unwrap().is_none());
    assert!(storage.revoke_token("nonsense").is_err());

    // frames
    storage.create_frame(frame("old", alpha.uuid, vec![home.uuid], -20)).unwrap();
    storage.create_frame(frame("mid", beta.uuid, vec![home.uuid], -10)).unwrap();
    storage.create_frame(frame("new", alpha.uuid, vec![home.uuid, lab.uuid], 0)).unwrap();

    let by_space: Vec<String> = storage
        .list_frames_by_space(&home.uuid, 10)
        .unwrap()
        .into_iter()
        .map(|f| f.name)
        .collect();
    assert_eq!(by_space, vec!["new", "mid", "old"]);

    let limited = storage.list_frames_by_space(&home.uuid, 2).unwrap();
    assert_eq!(limited.len(), 2);
    assert_eq!(limited[0].name, "new");

    let by_agent: Vec<String> = storage
        .list_frames_by_agent(&alpha.uuid, 10)
        .unwrap()
        .into_iter()
        .map(|f| f.name)
        .collect();
    assert_eq!(by_agent, vec!["new", "old"]);
    assert_eq!(storage.list_frames_by_space(&lab.uuid, 10).unwrap().len(), 1);

    // deletion cascades
    storage.delete_agent(&beta.uuid).unwrap();
    assert!(storage.get_agent(&beta.uuid).unwrap().is_none());
    assert_eq!(storage.space_agents(&home.uuid).unwrap().len(), 1);
    storage.delete_space(&home.uuid).unwrap();
    assert!(storage.agent_spaces(&alpha.uuid).unwrap().is_empty());
}
