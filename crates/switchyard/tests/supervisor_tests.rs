mod common;

use common::{recorder_actor_with, Recorder};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::time::Duration;
use switchyard::{
    ActorConfig, ActorId, ActorState, ActorType, InMemorySnapshotStore, PayloadType, PortConfig,
    SnapshotStore, Supervisor, SwapOutcome,
};

fn worker(id: &str) -> (switchyard::Actor, common::Probe) {
    recorder_actor_with(id, Recorder::with_type("Worker"), ActorConfig::default())
}

async fn running_supervisor() -> Supervisor {
    let supervisor = Supervisor::new("root");
    supervisor.start().await.unwrap();
    supervisor
}

#[test_log::test(tokio::test)]
async fn hot_swap_preserves_running_status() {
    let supervisor = running_supervisor().await;
    let (old, old_probe) = worker("w1");
    old.create_port(PortConfig::new("in", PayloadType::Text))
        .await
        .unwrap();
    old.start().await.unwrap();
    supervisor.register_actor(old.clone()).await.unwrap();

    let (replacement, new_probe) = worker("w1-v2");
    let outcome = supervisor
        .hot_swap_actor(&ActorId::new("w1"), replacement.clone())
        .await
        .unwrap();

    assert_eq!(outcome, SwapOutcome::Swapped);
    assert_eq!(old.state(), ActorState::Stopped);
    assert_eq!(old_probe.stops(), 1);
    assert_eq!(replacement.state(), ActorState::Running);
    assert_eq!(new_probe.starts(), 1);

    let registered = supervisor.get_actor(&ActorId::new("w1")).await.unwrap();
    assert!(registered.ptr_eq(&replacement));
    assert_eq!(
        supervisor.registry().recorded_type(&ActorId::new("w1")).await,
        Some(ActorType::new("Worker"))
    );

    supervisor.dispose().await;
    assert_eq!(replacement.state(), ActorState::Stopped);
}

#[test_log::test(tokio::test)]
async fn hot_swap_rejects_different_type() {
    let supervisor = running_supervisor().await;
    let (old, _) = worker("w1");
    old.start().await.unwrap();
    supervisor.register_actor(old.clone()).await.unwrap();

    let (intruder, _) = recorder_actor_with(
        "intruder",
        Recorder::with_type("Auditor"),
        ActorConfig::default(),
    );
    let outcome = supervisor
        .hot_swap_actor(&ActorId::new("w1"), intruder.clone())
        .await
        .unwrap();

    assert_eq!(
        outcome,
        SwapOutcome::TypeMismatch {
            expected: ActorType::new("Worker"),
            found: ActorType::new("Auditor"),
        }
    );
    let registered = supervisor.get_actor(&ActorId::new("w1")).await.unwrap();
    assert!(registered.ptr_eq(&old));
    assert!(old.is_running());
    assert_eq!(intruder.state(), ActorState::Initialized);

    supervisor.dispose().await;
    intruder.dispose().await;
}

#[tokio::test]
async fn hot_swap_of_stopped_actor_leaves_replacement_idle() {
    let supervisor = running_supervisor().await;
    let (old, _) = worker("w1");
    supervisor.register_actor(old.clone()).await.unwrap();

    let (replacement, new_probe) = worker("w1-v2");
    let outcome = supervisor
        .hot_swap_actor(&ActorId::new("w1"), replacement.clone())
        .await
        .unwrap();

    assert!(outcome.is_swapped());
    assert!(!replacement.is_running());
    assert_eq!(replacement.state(), ActorState::Initialized);
    assert_eq!(new_probe.starts(), 0);
    assert!(old.is_disposed());

    supervisor.dispose().await;
}

#[tokio::test]
async fn hot_swap_of_failed_actor_disposes_it() {
    let supervisor = running_supervisor().await;
    let (old, _) = recorder_actor_with(
        "w1",
        Recorder {
            directive: switchyard::ErrorDirective::Fail,
            ..Recorder::with_type("Worker")
        },
        ActorConfig::default(),
    );
    old.start().await.unwrap();
    let _ = old.tell(switchyard::ActorMessage::new("fail")).await;
    assert!(old.state().is_error());
    supervisor.register_actor(old.clone()).await.unwrap();

    let (replacement, _) = worker("w1-v2");
    let outcome = supervisor
        .hot_swap_actor(&ActorId::new("w1"), replacement.clone())
        .await
        .unwrap();

    assert!(outcome.is_swapped());
    assert_eq!(old.state(), ActorState::Stopped);
    assert!(old.is_disposed());
    assert_eq!(replacement.state(), ActorState::Initialized);

    supervisor.dispose().await;
}

#[test_log::test(tokio::test)]
async fn hot_swap_rejects_replacement_that_cannot_run() {
    let supervisor = running_supervisor().await;
    let (old, old_probe) = worker("w1");
    old.start().await.unwrap();
    supervisor.register_actor(old.clone()).await.unwrap();

    let (finished, _) = worker("w2");
    finished.start().await.unwrap();
    finished.stop().await.unwrap();
    let outcome = supervisor
        .hot_swap_actor(&ActorId::new("w1"), finished.clone())
        .await
        .unwrap();
    assert_eq!(
        outcome,
        SwapOutcome::NotStartable {
            state: ActorState::Stopped
        }
    );

    let (disposed, _) = worker("w3");
    disposed.dispose().await;
    let outcome = supervisor
        .hot_swap_actor(&ActorId::new("w1"), disposed)
        .await
        .unwrap();
    assert!(matches!(outcome, SwapOutcome::NotStartable { .. }));

    let outcome = supervisor
        .hot_swap_actor(&ActorId::new("w1"), old.clone())
        .await
        .unwrap();
    assert_eq!(outcome, SwapOutcome::SameActor);

    // The original actor is still registered and running
    let registered = supervisor.get_actor(&ActorId::new("w1")).await.unwrap();
    assert!(registered.ptr_eq(&old));
    assert!(old.is_running());
    assert!(!old.is_disposed());
    assert_eq!(old_probe.stops(), 0);

    supervisor.dispose().await;
}

#[tokio::test]
async fn hot_swap_of_unknown_id_is_not_found() {
    let supervisor = running_supervisor().await;
    let (replacement, _) = worker("ghost");
    let outcome = supervisor
        .hot_swap_actor(&ActorId::new("nobody"), replacement.clone())
        .await
        .unwrap();
    assert_eq!(outcome, SwapOutcome::NotFound);
    assert!(supervisor.registry().is_empty().await);

    supervisor.dispose().await;
    replacement.dispose().await;
}

#[tokio::test]
async fn registry_mutations_require_running_supervisor() {
    let supervisor = Supervisor::new("root");
    let (actor, _) = worker("w1");

    assert!(supervisor
        .register_actor(actor.clone())
        .await
        .unwrap_err()
        .is_state_error());
    assert!(supervisor
        .hot_swap_actor(&ActorId::new("w1"), actor.clone())
        .await
        .unwrap_err()
        .is_state_error());
    assert!(supervisor.start_all_actors().await.unwrap_err().is_state_error());

    supervisor.start().await.unwrap();
    supervisor.register_actor(actor.clone()).await.unwrap();
    supervisor.actor().pause("maintenance").await.unwrap();
    assert!(supervisor
        .unregister_actor(&ActorId::new("w1"))
        .await
        .unwrap_err()
        .is_state_error());

    // Lookups keep working
    assert!(supervisor.get_actor(&ActorId::new("w1")).await.is_some());

    supervisor.dispose().await;
    assert!(actor.is_disposed());
}

#[tokio::test]
async fn bulk_start_and_stop_report_per_actor_results() {
    let supervisor = running_supervisor().await;
    let (a, _) = worker("a");
    let (b, _) = worker("b");
    let (c, _) = recorder_actor_with("c", Recorder::with_type("Auditor"), ActorConfig::default());
    for actor in [&a, &b, &c] {
        supervisor.register_actor(actor.clone()).await.unwrap();
    }

    // A stopped actor cannot be started again
    c.start().await.unwrap();
    c.stop().await.unwrap();

    let started = supervisor.start_all_actors().await.unwrap();
    assert_eq!(started.succeeded, vec![ActorId::new("a"), ActorId::new("b")]);
    assert_eq!(started.failed.len(), 1);
    assert_eq!(started.failed[0].0, ActorId::new("c"));
    assert!(started.failed[0].1.is_state_error());

    let workers = supervisor.get_actors_by_type(&ActorType::new("Worker")).await;
    assert_eq!(workers.len(), 2);
    assert!(workers.iter().all(|actor| actor.is_running()));

    let stopped = supervisor.stop_all_actors().await.unwrap();
    assert!(stopped.is_complete());
    assert_eq!(stopped.succeeded.len(), 3);
    assert!(supervisor
        .get_all_actors()
        .await
        .iter()
        .all(|actor| actor.state() == ActorState::Stopped));

    supervisor.dispose().await;
}

#[tokio::test]
async fn supervisor_dispose_releases_everything() {
    let supervisor = running_supervisor().await;
    let (a, _) = worker("a");
    let (b, _) = worker("b");
    a.start().await.unwrap();
    supervisor.register_actor(a.clone()).await.unwrap();
    supervisor.register_actor(b.clone()).await.unwrap();

    supervisor.dispose().await;
    supervisor.dispose().await;

    assert!(supervisor.is_disposed());
    assert!(supervisor.registry().is_empty().await);
    assert_eq!(supervisor.state(), ActorState::Stopped);
    assert_eq!(a.state(), ActorState::Stopped);
    assert_eq!(b.state(), ActorState::Stopped);
}

#[tokio::test]
async fn snapshots_of_registered_actors() {
    let supervisor = running_supervisor().await;
    let (a, _) = worker("a");
    a.create_port(PortConfig::new("in", PayloadType::Int))
        .await
        .unwrap();
    a.set_state_value("generation", json!(2)).await;
    supervisor.register_actor(a).await.unwrap();
    let (b, _) = worker("b");
    supervisor.register_actor(b).await.unwrap();

    let store = InMemorySnapshotStore::new();
    for snapshot in supervisor.capture_snapshots().await {
        store.save(snapshot).await.unwrap();
    }
    assert_eq!(
        store.list().await.unwrap(),
        vec![ActorId::new("a"), ActorId::new("b")]
    );

    let saved = store.load(&ActorId::new("a")).await.unwrap().unwrap();
    assert_eq!(saved.actor_type, ActorType::new("Worker"));
    assert_eq!(saved.custom_state.get("generation"), Some(&json!(2)));
    assert!(saved.port("in").is_some());

    let (rebuilt, _) = worker("a-rebuilt");
    rebuilt.restore_snapshot(&saved).await.unwrap();
    rebuilt.start().await.unwrap();
    assert_eq!(rebuilt.port_names().await, vec!["in".to_string()]);

    tokio::time::timeout(Duration::from_secs(5), async {
        rebuilt.dispose().await;
        supervisor.dispose().await;
    })
    .await
    .unwrap();
}
