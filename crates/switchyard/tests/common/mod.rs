#![allow(dead_code)]

use anyhow::bail;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use switchyard::{
    Actor, ActorBehavior, ActorConfig, ActorContext, ActorMessage, ActorType, ErrorDirective,
    Payload, ProcessingError,
};

/// A message as seen by a [`Recorder`]
#[derive(Debug, Clone, PartialEq)]
pub struct Seen {
    pub port: Option<String>,
    pub payload: Payload,
}

/// Behavior that records every message it handles.
///
/// Text payloads steer it: `"fail"` returns an error, `"panic"` panics and
/// `"slow"` sleeps for [`Recorder::SLOW`].
#[derive(Default)]
pub struct Recorder {
    pub seen: Arc<Mutex<Vec<Seen>>>,
    pub errors: Arc<Mutex<Vec<ProcessingError>>>,
    pub starts: Arc<AtomicUsize>,
    pub stops: Arc<AtomicUsize>,
    pub directive: ErrorDirective,
    pub actor_type: Option<ActorType>,
}

impl Recorder {
    pub const SLOW: Duration = Duration::from_millis(500);

    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on_error() -> Self {
        Self {
            directive: ErrorDirective::Fail,
            ..Self::default()
        }
    }

    pub fn with_type(actor_type: &str) -> Self {
        Self {
            actor_type: Some(ActorType::new(actor_type)),
            ..Self::default()
        }
    }

    pub fn probe(&self) -> Probe {
        Probe {
            seen: self.seen.clone(),
            errors: self.errors.clone(),
            starts: self.starts.clone(),
            stops: self.stops.clone(),
        }
    }

    async fn record(&self, port: Option<&str>, message: ActorMessage) -> anyhow::Result<()> {
        match message.payload().as_text() {
            Some("fail") => bail!("refusing message {}", message.correlation_id()),
            Some("panic") => panic!("asked to panic"),
            Some("slow") => tokio::time::sleep(Self::SLOW).await,
            _ => {}
        }
        self.seen.lock().unwrap().push(Seen {
            port: port.map(str::to_string),
            payload: message.into_payload(),
        });
        Ok(())
    }
}

#[async_trait]
impl ActorBehavior for Recorder {
    fn actor_type(&self) -> ActorType {
        self.actor_type
            .clone()
            .unwrap_or_else(|| ActorType::of::<Recorder>())
    }

    async fn on_start(&self, _ctx: &ActorContext) -> anyhow::Result<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn on_stop(&self, _ctx: &ActorContext) -> anyhow::Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn on_message(&self, _ctx: &ActorContext, message: ActorMessage) -> anyhow::Result<()> {
        self.record(None, message).await
    }

    async fn on_port_message(
        &self,
        _ctx: &ActorContext,
        port: &str,
        message: ActorMessage,
    ) -> anyhow::Result<()> {
        self.record(Some(port), message).await
    }

    async fn on_error(&self, _ctx: &ActorContext, error: &ProcessingError) -> ErrorDirective {
        self.errors.lock().unwrap().push(error.clone());
        self.directive
    }
}

/// Shared view into a [`Recorder`] after it has been moved into an actor
#[derive(Clone)]
pub struct Probe {
    pub seen: Arc<Mutex<Vec<Seen>>>,
    pub errors: Arc<Mutex<Vec<ProcessingError>>>,
    pub starts: Arc<AtomicUsize>,
    pub stops: Arc<AtomicUsize>,
}

impl Probe {
    pub fn seen(&self) -> Vec<Seen> {
        self.seen.lock().unwrap().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.seen()
            .into_iter()
            .filter_map(|seen| seen.payload.as_text().map(str::to_string))
            .collect()
    }

    pub fn errors(&self) -> Vec<ProcessingError> {
        self.errors.lock().unwrap().clone()
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

/// Builds an actor around a fresh [`Recorder`]
pub fn recorder_actor(id: &str) -> (Actor, Probe) {
    recorder_actor_with(id, Recorder::new(), ActorConfig::default())
}

pub fn recorder_actor_with(id: &str, recorder: Recorder, config: ActorConfig) -> (Actor, Probe) {
    let probe = recorder.probe();
    let actor = Actor::builder(recorder).id(id).name(id).config(config).build();
    (actor, probe)
}

/// Polls `condition` every few milliseconds until it holds or `timeout`
/// elapses. Returns the final value of the condition.
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

