//! Property tests for group key distribution.
//!
//! After any sequence of create, add, remove, rotate and repair, every member
//! with a wrapped record must open it to the same raw key, and that key must
//! decrypt the most recent group message.

use std::collections::BTreeMap;

use proptest::prelude::*;
use sealpost_core::{
    CoreError, Environment, GroupKeyState, KeyStore, RemovalPolicy, decrypt_group_message,
    encrypt_group_message,
};
use sealpost_crypto::PublicKey;
use sealpost_harness::SimEnv;
use sealpost_proto::{
    GroupId, GroupMessageRequest, GroupMessageWire, MessageId, MessageType, Role, Timestamp, UserId,
};

const CREATOR: UserId = UserId(1);
const UNIVERSE: u64 = 8;

#[derive(Debug, Clone)]
enum Op {
    Add(u64),
    Remove(u64, RemovalPolicy),
    Rotate,
    Repair,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (2..=UNIVERSE).prop_map(Op::Add),
        (2..=UNIVERSE, prop_oneof![Just(RemovalPolicy::RotateKey), Just(RemovalPolicy::KeepKey)])
            .prop_map(|(user, policy)| Op::Remove(user, policy)),
        Just(Op::Rotate),
        Just(Op::Repair),
    ]
}

struct World {
    env: SimEnv,
    stores: BTreeMap<UserId, KeyStore>,
    directory: BTreeMap<UserId, PublicKey>,
}

impl World {
    fn new(seed: u64) -> Self {
        let env = SimEnv::with_seed(seed);
        let mut stores = BTreeMap::new();
        let mut directory = BTreeMap::new();
        for id in 1..=UNIVERSE {
            let store = KeyStore::generate(UserId(id), &env).unwrap();
            directory.insert(UserId(id), store.identity_public_key().unwrap());
            stores.insert(UserId(id), store);
        }
        Self { env, stores, directory }
    }
}

fn as_wire(request: &GroupMessageRequest) -> GroupMessageWire {
    GroupMessageWire {
        id: MessageId(1),
        group_id: GroupId(1),
        sender_id: CREATOR,
        key_version: request.key_version,
        ciphertext: request.ciphertext.clone(),
        nonce: request.nonce.clone(),
        message_type: request.message_type,
        timestamp: Timestamp::EPOCH,
        read_by: Vec::new(),
    }
}

#[test]
fn prop_members_agree_on_current_key() {
    proptest!(|(seed in any::<u64>(), ops in prop::collection::vec(op(), 0..12))| {
        let world = World::new(seed);
        let (mut state, mut current) = GroupKeyState::create(
            &world.env,
            &world.directory,
            GroupId(1),
            CREATOR,
            &[UserId(2), UserId(3)],
        )
        .unwrap();

        for op in ops {
            match op {
                Op::Add(user) => {
                    state.add_members(&world.env, &world.directory, &current, &[UserId(user)])
                        .unwrap();
                },
                Op::Remove(user, policy) => {
                    match state.remove_member(&world.env, &world.directory, UserId(user), policy) {
                        Ok(Some(rotated)) => current = rotated,
                        Ok(None) => {},
                        Err(CoreError::NotAMember { .. }) => {},
                        Err(err) => prop_assert!(false, "unexpected error {err}"),
                    }
                },
                Op::Rotate => current = state.rotate(&world.env, &world.directory).unwrap(),
                Op::Repair => {
                    let report = state.repair(&world.env, &world.directory, &current).unwrap();
                    prop_assert!(report.is_complete());
                },
            }
        }

        // PROPERTY: every wrapped record opens to the current key
        prop_assert_eq!(state.key_version(), current.version);
        for user in state.member_ids() {
            let held = state.unwrap_key(&world.stores[&user]).unwrap();
            prop_assert_eq!(&held, &current);
        }

        // PROPERTY: the latest message decrypts for every member
        let request =
            encrypt_group_message(&world.env, &current, b"latest", MessageType::Text).unwrap();
        for user in state.member_ids() {
            let held = state.unwrap_key(&world.stores[&user]).unwrap();
            prop_assert_eq!(decrypt_group_message(&held, &as_wire(&request)).unwrap(), b"latest");
        }

        // PROPERTY: removed users hold no record
        for id in 1..=UNIVERSE {
            let user = UserId(id);
            if !state.is_member(user) {
                let is_not_member =
                    matches!(state.unwrap_key(&world.stores[&user]), Err(CoreError::NotAMember { .. }));
                prop_assert!(is_not_member);
            }
        }
    });
}

#[test]
fn prop_repair_twice_is_equivalent() {
    proptest!(|(seed in any::<u64>(), extra in prop::collection::vec(2..=UNIVERSE, 0..5))| {
        let world = World::new(seed);
        let (mut state, key) = GroupKeyState::create(
            &world.env,
            &world.directory,
            GroupId(1),
            CREATOR,
            &[],
        )
        .unwrap();
        for user in extra {
            state.insert_pending(UserId(user), Role::Member, world.env.now());
        }

        let first = state.repair(&world.env, &world.directory, &key).unwrap();
        let after_first = state.clone();
        let second = state.repair(&world.env, &world.directory, &key).unwrap();

        // PROPERTY: same membership and version, nothing pending, same key
        prop_assert_eq!(&first.rewrapped, &second.rewrapped);
        prop_assert!(second.resolved_pending.is_empty());
        prop_assert_eq!(state.key_version(), after_first.key_version());
        prop_assert!(state.pending_members().is_empty());
        for user in state.member_ids() {
            prop_assert_eq!(state.unwrap_key(&world.stores[&user]).unwrap(), key.clone());
        }
    });
}

/// Three members, a fourth added, then one rotation.
#[test]
fn add_then_rotate_scenario() {
    let world = World::new(7);
    let (mut state, v1) = GroupKeyState::create(
        &world.env,
        &world.directory,
        GroupId(1),
        CREATOR,
        &[UserId(2), UserId(3)],
    )
    .unwrap();
    assert_eq!(state.key_version(), 1);

    state.add_members(&world.env, &world.directory, &v1, &[UserId(4)]).unwrap();
    let newcomer = state.unwrap_key(&world.stores[&UserId(4)]).unwrap();
    for id in 1..=3 {
        assert_eq!(state.unwrap_key(&world.stores[&UserId(id)]).unwrap(), newcomer);
    }

    let v2 = state.rotate(&world.env, &world.directory).unwrap();
    assert_eq!(state.key_version(), 2);
    assert_ne!(v2.key, v1.key);
    for id in 1..=4 {
        assert_eq!(state.unwrap_key(&world.stores[&UserId(id)]).unwrap(), v2);
    }
}
