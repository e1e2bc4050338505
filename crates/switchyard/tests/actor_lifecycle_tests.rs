mod common;

use async_trait::async_trait;
use common::{recorder_actor, recorder_actor_with, wait_until, Recorder};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use switchyard::{
    Actor, ActorBehavior, ActorConfig, ActorContext, ActorMessage, ActorState, Disposable,
    KernelError, Lifecycle, MessagePriority, OverflowPolicy, PayloadType, PortConfig,
    ProcessingError, QueuePolicy, SendFailure,
};

const WAIT: Duration = Duration::from_secs(2);

#[test_log::test(tokio::test)]
async fn timeouts_are_isolated_per_message() {
    let config = ActorConfig::default().with_processing_timeout(Duration::from_millis(50));
    let (actor, probe) = recorder_actor_with("slowpoke", Recorder::new(), config);
    let port = actor
        .create_port(PortConfig::new("in", PayloadType::Text))
        .await
        .unwrap();
    actor.start().await.unwrap();

    for _ in 0..3 {
        port.send(ActorMessage::new("slow")).await.unwrap();
    }
    assert!(wait_until(WAIT, || probe.errors().len() == 3).await);
    assert!(probe
        .errors()
        .iter()
        .all(|e| matches!(e, ProcessingError::Timeout { port, .. } if port == "in")));
    assert_eq!(actor.metrics().failed(), 3);

    port.send(ActorMessage::new("fourth")).await.unwrap();
    assert!(wait_until(WAIT, || probe.texts() == vec!["fourth".to_string()]).await);
    assert!(actor.is_running());

    actor.dispose().await;
}

#[test_log::test(tokio::test)]
async fn failing_and_panicking_messages_do_not_kill_the_loop() {
    let (actor, probe) = recorder_actor("resilient");
    let port = actor
        .create_port(PortConfig::new("in", PayloadType::Text))
        .await
        .unwrap();
    actor.start().await.unwrap();

    for text in ["one", "fail", "two", "panic", "three"] {
        port.send(ActorMessage::new(text)).await.unwrap();
    }

    assert!(wait_until(WAIT, || probe.texts().len() == 3).await);
    assert_eq!(probe.texts(), vec!["one", "two", "three"]);

    let errors = probe.errors();
    assert_eq!(errors.len(), 2);
    assert!(matches!(errors[0], ProcessingError::Handler { .. }));
    assert!(matches!(errors[1], ProcessingError::Panicked { .. }));

    let snapshot = actor.metrics().snapshot();
    assert_eq!(snapshot.processed, 3);
    assert_eq!(snapshot.failed, 2);
    assert_eq!(snapshot.per_port.get("in"), Some(&3));

    actor.dispose().await;
}

#[tokio::test]
async fn messages_are_processed_in_fifo_order() {
    let (actor, probe) = recorder_actor("fifo");
    let port = actor
        .create_port(PortConfig::new("in", PayloadType::Int))
        .await
        .unwrap();
    actor.start().await.unwrap();

    for i in 0..100i64 {
        port.send(ActorMessage::new(i)).await.unwrap();
    }
    assert!(wait_until(WAIT, || probe.seen().len() == 100).await);

    let order: Vec<i64> = probe
        .seen()
        .iter()
        .filter_map(|seen| seen.payload.as_int())
        .collect();
    assert_eq!(order, (0..100).collect::<Vec<_>>());

    actor.dispose().await;
}

#[tokio::test]
async fn paused_actor_holds_messages_until_resumed() {
    let (actor, probe) = recorder_actor("pausable");
    let port = actor
        .create_port(PortConfig::new("in", PayloadType::Text))
        .await
        .unwrap();
    actor.start().await.unwrap();
    actor.pause("maintenance").await.unwrap();
    assert_eq!(
        actor.state(),
        ActorState::Paused {
            reason: "maintenance".to_string()
        }
    );

    port.send(ActorMessage::new("held")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(probe.seen().is_empty());

    actor.resume().await.unwrap();
    assert!(wait_until(WAIT, || probe.texts() == vec!["held".to_string()]).await);

    actor.dispose().await;
}

#[tokio::test]
async fn matching_state_requests_are_no_ops() {
    let (actor, probe) = recorder_actor("noop");

    actor.start().await.unwrap();
    actor.start().await.unwrap();
    assert_eq!(probe.starts(), 1);

    actor.pause("first").await.unwrap();
    actor.pause("second").await.unwrap();
    assert_eq!(
        actor.state(),
        ActorState::Paused {
            reason: "first".to_string()
        }
    );

    actor.resume().await.unwrap();
    actor.resume().await.unwrap();
    assert!(actor.is_running());

    actor.stop().await.unwrap();
    actor.stop().await.unwrap();
    assert_eq!(probe.stops(), 1);
}

#[tokio::test]
async fn illegal_transitions_are_state_errors() {
    let (actor, _) = recorder_actor("strict");

    for result in [
        actor.resume().await,
        actor.pause("early").await,
        actor.stop().await,
    ] {
        let err = result.unwrap_err();
        match err {
            KernelError::State(e) => assert_eq!(e.state, ActorState::Initialized),
            other => panic!("expected a state error, got {other:?}"),
        }
    }

    actor.start().await.unwrap();
    actor.stop().await.unwrap();
    assert!(actor.start().await.unwrap_err().is_state_error());
    assert!(actor.resume().await.unwrap_err().is_state_error());
    assert!(actor.pause("late").await.unwrap_err().is_state_error());
}

#[test_log::test(tokio::test)]
async fn stop_disposes_ports_and_is_terminal() {
    let (actor, probe) = recorder_actor("terminal");
    let port = actor
        .create_port(PortConfig::new("in", PayloadType::Text))
        .await
        .unwrap();
    actor.start().await.unwrap();
    actor.stop().await.unwrap();

    assert_eq!(actor.state(), ActorState::Stopped);
    assert!(port.is_disposed());
    assert!(actor.port_names().await.is_empty());
    assert_eq!(probe.stops(), 1);

    let err = port.send(ActorMessage::new("late")).await.unwrap_err();
    assert!(matches!(
        err,
        KernelError::Send(ref e) if e.reason == SendFailure::Closed
    ));

    actor.dispose().await;
    actor.dispose().await;
    assert_eq!(actor.state(), ActorState::Stopped);
    assert!(actor.is_disposed());
    assert_eq!(probe.stops(), 1);
}

#[tokio::test]
async fn concurrent_dispose_is_idempotent() {
    let (actor, probe) = recorder_actor("racy");
    actor
        .create_port(PortConfig::new("in", PayloadType::Text))
        .await
        .unwrap();
    actor.start().await.unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let actor = actor.clone();
            tokio::spawn(async move { actor.dispose().await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(actor.state(), ActorState::Stopped);
    assert_eq!(probe.stops(), 1);
}

#[tokio::test]
async fn fail_directive_moves_actor_to_error() {
    let (actor, probe) =
        recorder_actor_with("fragile", Recorder::failing_on_error(), ActorConfig::default());
    let port = actor
        .create_port(PortConfig::new("in", PayloadType::Text))
        .await
        .unwrap();
    actor.start().await.unwrap();

    port.send(ActorMessage::new("fail")).await.unwrap();
    assert!(wait_until(WAIT, || actor.state().is_error()).await);

    // Only dispose is legal from Error
    assert!(actor.start().await.unwrap_err().is_state_error());
    assert!(actor.stop().await.unwrap_err().is_state_error());
    assert!(actor.resume().await.unwrap_err().is_state_error());

    actor.dispose().await;
    assert_eq!(actor.state(), ActorState::Stopped);
    assert!(port.is_disposed());
    assert_eq!(probe.errors().len(), 1);
}

struct FailingStart;

#[async_trait]
impl ActorBehavior for FailingStart {
    async fn on_start(&self, _ctx: &ActorContext) -> anyhow::Result<()> {
        anyhow::bail!("missing dependency")
    }

    async fn on_message(&self, _ctx: &ActorContext, _message: ActorMessage) -> anyhow::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn failing_start_hook_enters_error() {
    let actor = Actor::new("broken", FailingStart);
    let err = actor.start().await.unwrap_err();
    assert!(matches!(
        err,
        KernelError::Processing(ProcessingError::Hook { ref hook, .. }) if hook == "on_start"
    ));
    assert!(actor.state().is_error());
    actor.dispose().await;
    assert_eq!(actor.state(), ActorState::Stopped);
}

#[tokio::test]
async fn replacing_a_port_disposes_the_old_one() {
    let (actor, probe) = recorder_actor("replacer");
    actor.start().await.unwrap();
    let first = actor
        .create_port(PortConfig::new("in", PayloadType::Text))
        .await
        .unwrap();
    let second = actor
        .create_port(PortConfig::new("in", PayloadType::Int))
        .await
        .unwrap();

    assert!(first.is_disposed());
    assert_eq!(actor.port_names().await, vec!["in".to_string()]);
    second.send(ActorMessage::new(5i64)).await.unwrap();
    assert!(wait_until(WAIT, || probe.seen().len() == 1).await);

    assert!(actor.remove_port("in").await);
    assert!(!actor.remove_port("in").await);
    assert!(second.is_disposed());

    actor.dispose().await;
}

#[tokio::test]
async fn bounded_fail_queue_reports_full() {
    let config = ActorConfig::default().with_default_queue(QueuePolicy::Bounded {
        capacity: 2,
        overflow: OverflowPolicy::Fail,
    });
    let (actor, _) = recorder_actor_with("tight", Recorder::new(), config);
    let port = actor
        .create_port(PortConfig::new("in", PayloadType::Text))
        .await
        .unwrap();

    // Not started, so nothing drains the queue
    port.send(ActorMessage::new("1")).await.unwrap();
    port.send(ActorMessage::new("2")).await.unwrap();
    let err = port.send(ActorMessage::new("3")).await.unwrap_err();
    assert!(matches!(
        err,
        KernelError::Send(ref e) if e.reason == SendFailure::QueueFull { capacity: 2 }
    ));

    actor.dispose().await;
}

#[tokio::test]
async fn tell_bypasses_ports_and_records_priority() {
    let (actor, probe) = recorder_actor("direct");
    actor.start().await.unwrap();

    actor
        .tell(ActorMessage::new("hi").with_priority(MessagePriority::High))
        .await
        .unwrap();
    let err = actor.tell(ActorMessage::new("fail")).await.unwrap_err();
    assert!(matches!(
        err,
        KernelError::Processing(ProcessingError::Handler { .. })
    ));

    assert_eq!(probe.seen()[0].port, None);
    let snapshot = actor.metrics().snapshot();
    assert_eq!(snapshot.per_priority.get("HIGH"), Some(&1));
    assert!(snapshot.per_port.is_empty());
    assert_eq!(probe.errors().len(), 1);

    actor.dispose().await;
}

#[tokio::test]
async fn snapshot_round_trip_restores_ports_and_state() {
    let (actor, _) = recorder_actor("original");
    actor
        .create_port(PortConfig::new("in", PayloadType::Text))
        .await
        .unwrap();
    actor
        .create_port(PortConfig::new("out", PayloadType::Json).with_queue(QueuePolicy::Unbounded))
        .await
        .unwrap();
    actor.set_state_value("count", json!(3)).await;

    let snapshot = actor.capture_snapshot().await;
    assert_eq!(
        snapshot.ports.iter().map(|p| p.name.as_str()).collect::<Vec<_>>(),
        vec!["in", "out"]
    );

    let (restored, _) = recorder_actor("restored");
    restored.restore_snapshot(&snapshot).await.unwrap();
    assert_eq!(restored.port_names().await, vec!["in".to_string(), "out".to_string()]);
    assert_eq!(
        restored.get_port("out").await.unwrap().queue_policy(),
        QueuePolicy::Unbounded
    );
    assert_eq!(restored.state_value("count").await, Some(json!(3)));

    restored.start().await.unwrap();
    let err = restored.restore_snapshot(&snapshot).await.unwrap_err();
    assert!(err.is_state_error());

    actor.dispose().await;
    restored.dispose().await;
}

struct PortBuilder {
    created: Arc<AtomicUsize>,
}

#[async_trait]
impl ActorBehavior for PortBuilder {
    async fn on_start(&self, ctx: &ActorContext) -> anyhow::Result<()> {
        ctx.set_state_value("started", json!(true)).await;
        Ok(())
    }

    async fn on_message(&self, ctx: &ActorContext, message: ActorMessage) -> anyhow::Result<()> {
        let name = message
            .payload()
            .as_text()
            .ok_or_else(|| anyhow::anyhow!("expected a port name"))?
            .to_string();
        ctx.actor()
            .create_port(PortConfig::new(name, PayloadType::Text))
            .await?;
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn hooks_can_manage_ports_through_context() {
    let created = Arc::new(AtomicUsize::new(0));
    let actor = Actor::new(
        "builder",
        PortBuilder {
            created: created.clone(),
        },
    );
    actor.start().await.unwrap();
    assert_eq!(actor.state_value("started").await, Some(json!(true)));

    actor.tell(ActorMessage::new("dynamic")).await.unwrap();
    assert_eq!(created.load(Ordering::SeqCst), 1);
    assert!(actor.get_port("dynamic").await.is_some());

    Lifecycle::stop(&actor).await.unwrap();
    assert!(!Lifecycle::is_active(&actor));
    actor.dispose().await;
}

struct StopsItself;

#[async_trait]
impl ActorBehavior for StopsItself {
    async fn on_message(&self, ctx: &ActorContext, message: ActorMessage) -> anyhow::Result<()> {
        if message.payload().as_text() == Some("stop") {
            ctx.actor().stop().await?;
        }
        Ok(())
    }
}

#[test_log::test(tokio::test)]
async fn handler_can_stop_its_own_actor() {
    let config = ActorConfig::default().with_stop_timeout(Duration::from_secs(30));
    let actor = Actor::builder(StopsItself).name("quitter").config(config).build();
    let port = actor
        .create_port(PortConfig::new("control", PayloadType::Text))
        .await
        .unwrap();
    actor.start().await.unwrap();

    port.send(ActorMessage::new("stop")).await.unwrap();

    // Far below the stop timeout: the loop is not joined from inside itself
    let mut states = actor.subscribe_state();
    tokio::time::timeout(WAIT, states.wait_for(|state| *state == ActorState::Stopped))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(actor.metrics().failed(), 0);
    actor.dispose().await;
}

#[tokio::test]
async fn start_waits_for_snapshot_restore() {
    let (source, _) = recorder_actor("source");
    for name in ["a", "b", "c", "d"] {
        source
            .create_port(PortConfig::new(name, PayloadType::Text))
            .await
            .unwrap();
    }
    let snapshot = source.capture_snapshot().await;

    let (restored, _) = recorder_actor("restored");
    let restoring = {
        let restored = restored.clone();
        let snapshot = snapshot.clone();
        tokio::spawn(async move { restored.restore_snapshot(&snapshot).await })
    };
    let starting = {
        let restored = restored.clone();
        tokio::spawn(async move { restored.start().await })
    };
    starting.await.unwrap().unwrap();

    // Either the restore ran first and is complete, or it was refused whole
    match restoring.await.unwrap() {
        Ok(()) => assert_eq!(restored.port_names().await.len(), 4),
        Err(err) => {
            assert!(err.is_state_error());
            assert!(restored.port_names().await.is_empty());
        }
    }
    assert!(restored.is_running());

    source.dispose().await;
    restored.dispose().await;
}
