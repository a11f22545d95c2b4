//! Multi-replica scenarios over the loopback room.

use syncspace_canvas::{
    CanvasSession, CanvasSnapshot, ConnectionStatus, InitOutcome, LocalIdentity, LoopbackProvider,
    LoopbackRoom, NoteTextBinding, PopColor, SyncProvider,
};

type Session = CanvasSession<LoopbackProvider>;

fn join(room: &LoopbackRoom, name: &str) -> Session {
    let session = Session::new(LocalIdentity {
        name: name.into(),
        color: PopColor::Yellow,
    });
    assert_eq!(session.init(&room.name(), |_| room.connect()), InitOutcome::Started);
    session
}

/// Pump every session until nobody has anything left to deliver.
fn settle(sessions: &[&Session]) {
    for _ in 0..10 {
        let handled: usize = sessions.iter().map(|s| s.pump()).sum();
        if handled == 0 {
            return;
        }
    }
    panic!("sessions did not settle");
}

fn note_ids(snapshot: &CanvasSnapshot) -> Vec<String> {
    snapshot.notes.iter().map(|n| n.id.to_string()).collect()
}

#[test]
fn test_concurrent_adds_converge() {
    let room = LoopbackRoom::new("board");
    let alice = join(&room, "Neon Fox");
    let bob = join(&room, "Turbo Owl");
    settle(&[&alice, &bob]);

    let a = alice.canvas().add_note(0.0, 0.0, PopColor::Blue);
    let b = bob.canvas().add_note(100.0, 0.0, PopColor::Pink);
    alice.canvas().update_note_content(&a, "from alice");
    settle(&[&alice, &bob]);

    let left = alice.canvas().snapshot();
    let right = bob.canvas().snapshot();
    assert_eq!(left, right);
    assert!(left.contains_note(&a) && left.contains_note(&b));
    assert_eq!(bob.canvas().note_content(&a), "from alice");
}

#[test]
fn test_concurrent_typing_merges() {
    let room = LoopbackRoom::new("board");
    let alice = join(&room, "Neon Fox");
    let bob = join(&room, "Turbo Owl");

    let id = alice.canvas().add_note_with_content(0.0, 0.0, PopColor::Yellow, "hello");
    settle(&[&alice, &bob]);

    let alice_text = NoteTextBinding::bind(&alice.store().unwrap(), id.clone());
    let bob_text = NoteTextBinding::bind(&bob.store().unwrap(), id.clone());
    assert_eq!(bob_text.current_text(), "hello");

    alice_text.insert(5, " world").unwrap();
    bob_text.insert(0, "Oh, ").unwrap();
    settle(&[&alice, &bob]);

    assert_eq!(alice_text.current_text(), "Oh, hello world");
    assert_eq!(bob_text.current_text(), "Oh, hello world");
}

#[test]
fn test_late_joiner_gets_full_state() {
    let room = LoopbackRoom::new("board");
    let alice = join(&room, "Neon Fox");
    let a = alice.canvas().add_note_with_content(0.0, 0.0, PopColor::Green, "first");
    let b = alice.canvas().add_note(50.0, 50.0, PopColor::Orange);
    alice.canvas().add_edge(&a, &b);
    settle(&[&alice]);

    let carol = join(&room, "Mega Panda");
    assert!(carol.is_loading());
    settle(&[&alice, &carol]);

    assert!(carol.is_synced());
    assert_eq!(carol.canvas().snapshot(), alice.canvas().snapshot());
    assert_eq!(carol.canvas().note_content(&a), "first");
    assert_eq!(carol.peers().len(), 1);
}

#[test]
fn test_delete_scenario_across_replicas() {
    let room = LoopbackRoom::new("board");
    let alice = join(&room, "Neon Fox");
    let bob = join(&room, "Turbo Owl");

    let canvas = alice.canvas();
    let n1 = canvas.add_note(100.0, 100.0, PopColor::Yellow);
    let n2 = canvas.add_note(300.0, 100.0, PopColor::Blue);
    canvas.update_note_content(&n1, "Hello");
    canvas.add_edge(&n1, &n2);
    settle(&[&alice, &bob]);
    assert_eq!(bob.canvas().snapshot().edges.len(), 1);

    bob.canvas().delete_note(&n1);
    settle(&[&alice, &bob]);

    let snapshot = alice.canvas().snapshot();
    assert_eq!(note_ids(&snapshot), vec![n2.to_string()]);
    assert!(snapshot.edges.is_empty());
    assert_eq!(snapshot, bob.canvas().snapshot());
}

#[test]
fn test_concurrent_delete_and_edge_hides_dangling_edge() {
    let room = LoopbackRoom::new("board");
    let alice = join(&room, "Neon Fox");
    let bob = join(&room, "Turbo Owl");
    let a = alice.canvas().add_note(0.0, 0.0, PopColor::Yellow);
    let b = alice.canvas().add_note(10.0, 0.0, PopColor::Yellow);
    settle(&[&alice, &bob]);

    alice.canvas().delete_note(&a);
    bob.canvas().add_edge(&a, &b);
    settle(&[&alice, &bob]);

    for session in [&alice, &bob] {
        let snapshot = session.canvas().snapshot();
        assert_eq!(note_ids(&snapshot), vec![b.to_string()]);
        assert!(snapshot.edges.is_empty());
    }
}

#[test]
fn test_offline_edits_flow_after_blip() {
    let room = LoopbackRoom::new("board");
    let alice = join(&room, "Neon Fox");
    let bob = join(&room, "Turbo Owl");
    settle(&[&alice, &bob]);
    assert_eq!(bob.connection_status(), ConnectionStatus::Connected);

    let bob_conn = bob.connection_id().unwrap();
    assert_eq!(bob_conn, 1);
    room.interrupt(bob_conn);
    settle(&[&alice, &bob]);
    assert_eq!(bob.connection_status(), ConnectionStatus::Reconnecting);

    // both sides keep working locally
    let a = alice.canvas().add_note(0.0, 0.0, PopColor::Pink);
    let b = bob.canvas().add_note(5.0, 5.0, PopColor::Purple);
    settle(&[&alice, &bob]);
    assert!(!bob.canvas().snapshot().contains_note(&a));

    room.resume(bob_conn);
    settle(&[&alice, &bob]);
    assert_eq!(bob.connection_status(), ConnectionStatus::Connected);
    let snapshot = alice.canvas().snapshot();
    assert!(snapshot.contains_note(&a) && snapshot.contains_note(&b));
    assert_eq!(snapshot, bob.canvas().snapshot());
}

#[test]
fn test_hard_drop_reports_disconnected() {
    let room = LoopbackRoom::new("board");
    let alice = join(&room, "Neon Fox");
    settle(&[&alice]);

    room.drop_peer(0);
    settle(&[&alice]);
    assert_eq!(alice.connection_status(), ConnectionStatus::Disconnected);
    assert!(alice.is_loading());

    // still usable
    let id = alice.canvas().add_note(0.0, 0.0, PopColor::Yellow);
    assert!(!id.is_empty());

    room.resume(0);
    settle(&[&alice]);
    assert_eq!(alice.connection_status(), ConnectionStatus::Connected);
    assert!(alice.is_synced());
}

#[test]
fn test_collaborative_undo_reverts_remote_change() {
    let room = LoopbackRoom::new("board");
    let alice = join(&room, "Neon Fox");
    let bob = join(&room, "Turbo Owl");

    let id = alice.canvas().add_note(0.0, 0.0, PopColor::Yellow);
    settle(&[&alice, &bob]);
    let undo = bob.undo_manager().unwrap();
    undo.stop_capturing();

    alice.canvas().update_note_position(&id, 80.0, 80.0);
    settle(&[&alice, &bob]);
    assert_eq!(bob.canvas().snapshot().note(&id).unwrap().x, 80.0);

    assert!(undo.undo());
    settle(&[&alice, &bob]);
    assert_eq!(alice.canvas().snapshot().note(&id).unwrap().x, 0.0);

    assert!(undo.redo());
    settle(&[&alice, &bob]);
    assert_eq!(alice.canvas().snapshot().note(&id).unwrap().x, 80.0);
}

#[test]
fn test_teardown_leaves_room() {
    let room = LoopbackRoom::new("board");
    let alice = join(&room, "Neon Fox");
    let bob = join(&room, "Turbo Owl");
    settle(&[&alice, &bob]);
    assert_eq!(bob.peers().len(), 1);

    alice.teardown();
    settle(&[&bob]);
    assert!(bob.peers().is_empty());
    assert_eq!(room.peer_count(), 1);
    assert!(!alice.canvas().is_ready());

    let provider = room.connect().unwrap();
    assert_eq!(provider.connection_id(), 2);
}
