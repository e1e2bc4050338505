//! # Actor Metrics
//!
//! Counters and timings updated by an actor's port loops. Every port loop of
//! an actor writes to the same [`ActorMetrics`], so all counters are atomics
//! and the keyed counters live in concurrent maps.

use crate::messages::MessagePriority;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct ActorMetrics {
    started_at: Instant,
    start_time: DateTime<Utc>,
    received: AtomicU64,
    processed: AtomicU64,
    failed: AtomicU64,
    total_nanos: AtomicU64,
    min_nanos: AtomicU64,
    max_nanos: AtomicU64,
    per_protocol: DashMap<String, u64>,
    per_priority: DashMap<MessagePriority, u64>,
    per_port: DashMap<String, u64>,
}

impl Default for ActorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ActorMetrics {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            start_time: Utc::now(),
            received: AtomicU64::new(0),
            processed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            total_nanos: AtomicU64::new(0),
            min_nanos: AtomicU64::new(u64::MAX),
            max_nanos: AtomicU64::new(0),
            per_protocol: DashMap::new(),
            per_priority: DashMap::new(),
            per_port: DashMap::new(),
        }
    }

    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a successfully handled message. `port` is `None` for direct
    /// sends that bypass the ports.
    pub fn record_processed(
        &self,
        port: Option<&str>,
        priority: MessagePriority,
        protocol: Option<&str>,
        elapsed: Duration,
    ) {
        let nanos = elapsed.as_nanos().min(u64::MAX as u128) as u64;
        self.processed.fetch_add(1, Ordering::Relaxed);
        self.total_nanos.fetch_add(nanos, Ordering::Relaxed);
        self.min_nanos.fetch_min(nanos, Ordering::Relaxed);
        self.max_nanos.fetch_max(nanos, Ordering::Relaxed);

        *self.per_priority.entry(priority).or_insert(0) += 1;
        if let Some(port) = port {
            *self.per_port.entry(port.to_string()).or_insert(0) += 1;
        }
        if let Some(protocol) = protocol {
            *self.per_protocol.entry(protocol.to_string()).or_insert(0) += 1;
        }
    }

    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let processed = self.processed();
        let failed = self.failed();
        let total = Duration::from_nanos(self.total_nanos.load(Ordering::Relaxed));
        let min_nanos = self.min_nanos.load(Ordering::Relaxed);

        MetricsSnapshot {
            received: self.received(),
            processed,
            failed,
            per_protocol: self
                .per_protocol
                .iter()
                .map(|entry| (entry.key().clone(), *entry.value()))
                .collect(),
            per_priority: self
                .per_priority
                .iter()
                .map(|entry| (entry.key().to_string(), *entry.value()))
                .collect(),
            per_port: self
                .per_port
                .iter()
                .map(|entry| (entry.key().clone(), *entry.value()))
                .collect(),
            avg_processing_time: if processed > 0 {
                total.div_f64(processed as f64)
            } else {
                Duration::default()
            },
            min_processing_time: (min_nanos != u64::MAX).then(|| Duration::from_nanos(min_nanos)),
            max_processing_time: Duration::from_nanos(self.max_nanos.load(Ordering::Relaxed)),
            success_rate: if processed + failed > 0 {
                (processed as f64 / (processed + failed) as f64) * 100.0
            } else {
                0.0
            },
            uptime: self.started_at.elapsed(),
            start_time: self.start_time,
        }
    }

    /// Clears every counter and timing. Uptime keeps counting from creation.
    pub fn reset(&self) {
        self.received.store(0, Ordering::Relaxed);
        self.processed.store(0, Ordering::Relaxed);
        self.failed.store(0, Ordering::Relaxed);
        self.total_nanos.store(0, Ordering::Relaxed);
        self.min_nanos.store(u64::MAX, Ordering::Relaxed);
        self.max_nanos.store(0, Ordering::Relaxed);
        self.per_protocol.clear();
        self.per_priority.clear();
        self.per_port.clear();
    }
}

/// Point-in-time copy of an actor's metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub received: u64,
    pub processed: u64,
    pub failed: u64,
    pub per_protocol: BTreeMap<String, u64>,
    pub per_priority: BTreeMap<String, u64>,
    pub per_port: BTreeMap<String, u64>,
    #[serde(with = "duration_serde")]
    pub avg_processing_time: Duration,
    #[serde(with = "option_duration_serde")]
    pub min_processing_time: Option<Duration>,
    #[serde(with = "duration_serde")]
    pub max_processing_time: Duration,
    /// Percentage of handled messages that succeeded
    pub success_rate: f64,
    #[serde(with = "duration_serde")]
    pub uptime: Duration,
    pub start_time: DateTime<Utc>,
}

impl MetricsSnapshot {
    /// Flattens the snapshot into `name -> value`. Timings are in
    /// milliseconds, keyed counters are prefixed with their group.
    pub fn to_map(&self) -> BTreeMap<String, f64> {
        let mut map = BTreeMap::new();
        map.insert("messages_received".to_string(), self.received as f64);
        map.insert("messages_processed".to_string(), self.processed as f64);
        map.insert("messages_failed".to_string(), self.failed as f64);
        map.insert("success_rate".to_string(), self.success_rate);
        map.insert(
            "avg_processing_time_ms".to_string(),
            as_millis(self.avg_processing_time),
        );
        map.insert(
            "min_processing_time_ms".to_string(),
            self.min_processing_time.map(as_millis).unwrap_or(0.0),
        );
        map.insert(
            "max_processing_time_ms".to_string(),
            as_millis(self.max_processing_time),
        );
        map.insert("uptime_secs".to_string(), self.uptime.as_secs_f64());

        for (protocol, count) in &self.per_protocol {
            map.insert(format!("protocol.{}", protocol), *count as f64);
        }
        for (priority, count) in &self.per_priority {
            map.insert(format!("priority.{}", priority), *count as f64);
        }
        for (port, count) in &self.per_port {
            map.insert(format!("port.{}", port), *count as f64);
        }
        map
    }
}

fn as_millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_nanos() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let nanos = u64::deserialize(deserializer)?;
        Ok(Duration::from_nanos(nanos))
    }
}

mod option_duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&(d.as_nanos() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let nanos: Option<u64> = Option::deserialize(deserializer)?;
        Ok(nanos.map(Duration::from_nanos))
    }
}
