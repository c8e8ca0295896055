//! End-to-end protocol scenarios.
//!
//! Each scenario runs clients and the server driver against one simulated
//! clock and checks the standard invariants after every step.

use std::time::Duration;

use sealpost_core::{CoreError, Environment, ForwardSecrecy, GroupKeyState, Rendered};
use sealpost_harness::{InvariantRegistry, SimClient, SimError, SimServer};
use sealpost_proto::{EditMessageRequest, Event, UserId};
use sealpost_server::{ServerError, ServerEvent, Storage};

const ALICE: UserId = UserId(1);
const BOB: UserId = UserId(2);
const CAROL: UserId = UserId(3);
const DAVE: UserId = UserId(4);

fn check(server: &SimServer, clients: &[&SimClient], context: &str) {
    let snapshot = server.snapshot(clients).unwrap();
    InvariantRegistry::standard().assert_all(&snapshot, context);
}

#[test]
fn independent_first_contacts_use_distinct_pre_keys() {
    let mut server = SimServer::new(11);
    let alice = SimClient::register(&mut server, ALICE, 5).unwrap();
    let bob = SimClient::register(&mut server, BOB, 5).unwrap();
    let carol = SimClient::register(&mut server, CAROL, 5).unwrap();

    let hi = bob.send(&mut server, ALICE, b"hi").unwrap();
    let hello = carol.send(&mut server, ALICE, b"hello").unwrap();

    let (ForwardSecrecy::OneTimePreKey { key_id: k1 }, ForwardSecrecy::OneTimePreKey { key_id: k2 }) =
        (hi.forward_secrecy, hello.forward_secrecy)
    else {
        panic!("both first contacts should consume a prekey");
    };
    assert_ne!(k1, k2, "a prekey must never be handed out twice");

    // Alice decrypts both with her one identity secret
    let from_bob = alice.conversation(&mut server, BOB).unwrap();
    let from_carol = alice.conversation(&mut server, CAROL).unwrap();
    assert_eq!(alice.read(&from_bob[0]), Rendered::Plaintext(b"hi".to_vec()));
    assert_eq!(alice.read(&from_carol[0]), Rendered::Plaintext(b"hello".to_vec()));

    // Bob cannot read what Carol sent to Alice
    assert_eq!(bob.read(&hello.message), Rendered::CannotDecrypt);

    assert_eq!(server.inbox(ALICE).len(), 2);
    check(&server, &[&alice, &bob, &carol], "after first contacts");
}

#[test]
fn exhausted_pre_keys_fall_back_to_identity_key() {
    let mut server = SimServer::new(12);
    let alice = SimClient::register(&mut server, ALICE, 1).unwrap();
    let bob = SimClient::register(&mut server, BOB, 0).unwrap();

    let first = bob.send(&mut server, ALICE, b"one").unwrap();
    let second = bob.send(&mut server, ALICE, b"two").unwrap();

    assert!(matches!(first.forward_secrecy, ForwardSecrecy::OneTimePreKey { .. }));
    assert_eq!(second.forward_secrecy, ForwardSecrecy::IdentityOnly);
    assert_eq!(alice.read(&second.message), Rendered::Plaintext(b"two".to_vec()));
    check(&server, &[&alice, &bob], "after fallback");
}

#[test]
fn replenished_pre_keys_are_handed_out_again() {
    let mut server = SimServer::new(13);
    let mut alice = SimClient::register(&mut server, ALICE, 1).unwrap();
    let bob = SimClient::register(&mut server, BOB, 0).unwrap();

    bob.send(&mut server, ALICE, b"one").unwrap();
    assert_eq!(alice.replenish(&mut server, 3).unwrap(), 3);

    let again = bob.send(&mut server, ALICE, b"two").unwrap();
    assert!(matches!(again.forward_secrecy, ForwardSecrecy::OneTimePreKey { .. }));
    check(&server, &[&alice, &bob], "after replenish");
}

#[test]
fn group_add_and_rotate() {
    let mut server = SimServer::new(21);
    let alice = SimClient::register(&mut server, ALICE, 2).unwrap();
    let bob = SimClient::register(&mut server, BOB, 2).unwrap();
    let carol = SimClient::register(&mut server, CAROL, 2).unwrap();
    let dave = SimClient::register(&mut server, DAVE, 2).unwrap();

    let (group, v1) = alice.create_group(&mut server, "trio", &[BOB, CAROL]).unwrap();
    assert_eq!(group.group_key_version, 1);
    assert_eq!(group.members.len(), 3);
    for member in [&bob, &carol] {
        assert_eq!(member.group_key(&mut server, group.id).unwrap(), v1);
    }
    check(&server, &[&alice, &bob, &carol, &dave], "after create");

    let grown = alice.add_members(&mut server, group.id, &v1, &[DAVE]).unwrap();
    assert_eq!(grown.group_key_version, 1);
    assert_eq!(dave.group_key(&mut server, group.id).unwrap(), v1);
    check(&server, &[&alice, &bob, &carol, &dave], "after add");

    let v2 = alice.rotate(&mut server, group.id).unwrap();
    assert_eq!(v2.version, 2);
    assert_ne!(v2.key, v1.key);
    for member in [&alice, &bob, &carol, &dave] {
        assert_eq!(member.group_key(&mut server, group.id).unwrap(), v2);
    }
    check(&server, &[&alice, &bob, &carol, &dave], "after rotate");

    let posted = carol.post(&mut server, group.id, &v2, b"new epoch").unwrap();
    assert_eq!(dave.read_group(&v2, &posted), Rendered::Plaintext(b"new epoch".to_vec()));

    // A member still holding v1 is told to refresh, never handed garbage
    assert!(matches!(
        bob.post(&mut server, group.id, &v1, b"stale").unwrap_err(),
        SimError::Server(_)
    ));
    assert_eq!(bob.read_group(&v1, &posted), Rendered::CannotDecrypt);
}

#[test]
fn stale_admin_cannot_republish_old_key_after_rotation() {
    let mut server = SimServer::new(22);
    let alice = SimClient::register(&mut server, ALICE, 2).unwrap();
    let bob = SimClient::register(&mut server, BOB, 2).unwrap();

    let (group, _) = alice.create_group(&mut server, "pair", &[BOB]).unwrap();
    let stale = GroupKeyState::from_wire(&group).unwrap();
    let v2 = alice.rotate(&mut server, group.id).unwrap();

    let err = server
        .call(|driver| driver.update_group(ALICE, group.id, &stale.key_update(false)))
        .unwrap_err();
    assert_eq!(err, ServerError::Core(CoreError::StaleGroupKey { held: 1, required: 2 }));

    assert_eq!(bob.group_key(&mut server, group.id).unwrap(), v2);
    let posted = alice.post(&mut server, group.id, &v2, b"current").unwrap();
    assert_eq!(bob.read_group(&v2, &posted), Rendered::Plaintext(b"current".to_vec()));
    check(&server, &[&alice, &bob], "after refused republish");
}

#[test]
fn scheduled_message_is_released_once() {
    let mut server = SimServer::new(31);
    let alice = SimClient::register(&mut server, ALICE, 1).unwrap();
    let bob = SimClient::register(&mut server, BOB, 1).unwrap();

    let due = server.env().now().plus(Duration::from_secs(60));
    let sent = alice.send_timed(&mut server, BOB, b"later", Some(due), None).unwrap();
    assert!(sent.message.is_scheduled);
    assert!(server.inbox(BOB).is_empty());

    server.env().advance(Duration::from_secs(10));
    assert_eq!(server.sweep(ServerEvent::DeliverySweep).unwrap(), 0);
    assert!(bob.conversation(&mut server, ALICE).unwrap().is_empty());
    check(&server, &[&alice, &bob], "before release");

    server.env().advance(Duration::from_secs(60));
    assert_eq!(server.sweep(ServerEvent::DeliverySweep).unwrap(), 1);
    assert_eq!(server.sweep(ServerEvent::DeliverySweep).unwrap(), 0);

    let pushed: Vec<_> = server
        .inbox(BOB)
        .iter()
        .filter(|event| matches!(event, Event::NewMessage(m) if m.id == sent.message.id))
        .collect();
    assert_eq!(pushed.len(), 1);

    let conversation = bob.conversation(&mut server, ALICE).unwrap();
    assert_eq!(conversation.len(), 1);
    assert!(!conversation[0].is_scheduled);
    assert_eq!(bob.read(&conversation[0]), Rendered::Plaintext(b"later".to_vec()));
    check(&server, &[&alice, &bob], "after release");
}

#[test]
fn self_destructed_message_disappears_from_every_read_path() {
    let mut server = SimServer::new(41);
    let alice = SimClient::register(&mut server, ALICE, 1).unwrap();
    let bob = SimClient::register(&mut server, BOB, 1).unwrap();

    let destruct = server.env().now().plus(Duration::from_secs(5));
    let sent = alice.send_timed(&mut server, BOB, b"burn", None, Some(destruct)).unwrap();

    server.env().advance(Duration::from_secs(1));
    assert_eq!(bob.conversation(&mut server, ALICE).unwrap().len(), 1);

    // Lazy path: the sweep has not run yet
    server.env().advance(Duration::from_secs(9));
    assert!(bob.conversation(&mut server, ALICE).unwrap().is_empty());
    assert!(alice.conversation(&mut server, BOB).unwrap().is_empty());
    let stored = server.driver().storage().load_message(sent.message.id).unwrap().unwrap();
    assert!(!stored.lifecycle.deleted);

    // Eager path: the sweep tombstones it and reads agree
    server.sweep(ServerEvent::ExpirySweep).unwrap();
    let stored = server.driver().storage().load_message(sent.message.id).unwrap().unwrap();
    assert!(stored.lifecycle.deleted);
    assert!(bob.conversation(&mut server, ALICE).unwrap().is_empty());
    check(&server, &[&alice, &bob], "after expiry");
}

#[test]
fn edits_keep_the_original_envelope() {
    let mut server = SimServer::new(51);
    let alice = SimClient::register(&mut server, ALICE, 1).unwrap();
    let bob = SimClient::register(&mut server, BOB, 1).unwrap();

    let sent = alice.send(&mut server, BOB, b"draft").unwrap();
    let replacement = alice.send(&mut server, BOB, b"final").unwrap();
    let request = EditMessageRequest { envelope: replacement.message.envelope.clone() };

    let edited = server.call(|driver| driver.edit_message(ALICE, sent.message.id, &request)).unwrap();
    assert!(edited.edited);
    assert_ne!(edited.envelope.ephemeral_public_key, sent.message.envelope.ephemeral_public_key);
    assert_eq!(bob.read(&edited), Rendered::Plaintext(b"final".to_vec()));
    assert!(server.inbox(BOB).iter().any(|e| e.name() == "message_edited"));
    check(&server, &[&alice, &bob], "after edit");
}

#[test]
fn missing_entropy_stops_registration() {
    let mut server = SimServer::new(61);
    server.env().set_entropy_available(false);

    assert_eq!(
        SimClient::register(&mut server, ALICE, 5).unwrap_err(),
        SimError::Core(CoreError::UnsupportedEnvironment)
    );
    assert!(server.driver().storage().load_identity(ALICE).unwrap().is_none());

    server.env().set_entropy_available(true);
    assert!(SimClient::register(&mut server, ALICE, 5).is_ok());
}
