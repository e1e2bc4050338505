//! Wiring-time validation of port connections.
//!
//! A connection from a source port of type `S` to a target port of type `T`
//! is accepted when one of the following holds, tried in this order:
//!
//! 1. an adapter is declared and can convert `S -> T`
//! 2. rules are declared and form an unbroken chain from `S` to `T`
//! 3. nothing is declared and `S == T`
//!
//! A declared adapter is authoritative: if it cannot convert `S -> T` the
//! rules are not consulted. Only a valid connection installs forwarding on
//! the source port.

use super::{Port, Route};
use crate::errors::{BrokenLink, ConnectionError};
use crate::id::PortId;
use crate::lifecycle::Disposable;
use crate::messages::PayloadType;
use crate::port::chain::{ConversionRule, MessageHandler, ProtocolAdapter};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// What a connection carries besides its two endpoints
#[derive(Clone, Default)]
pub struct ConnectionSpec {
    pub(crate) handlers: Vec<Arc<dyn MessageHandler>>,
    pub(crate) adapter: Option<Arc<dyn ProtocolAdapter>>,
    pub(crate) rules: Vec<Arc<dyn ConversionRule>>,
}

impl ConnectionSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_handler(mut self, handler: Arc<dyn MessageHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn with_adapter(mut self, adapter: Arc<dyn ProtocolAdapter>) -> Self {
        self.adapter = Some(adapter);
        self
    }

    pub fn with_rule(mut self, rule: Arc<dyn ConversionRule>) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn with_rules(mut self, rules: impl IntoIterator<Item = Arc<dyn ConversionRule>>) -> Self {
        self.rules.extend(rules);
        self
    }
}

impl fmt::Debug for ConnectionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSpec")
            .field(
                "handlers",
                &self.handlers.iter().map(|h| h.name()).collect::<Vec<_>>(),
            )
            .field("adapter", &self.adapter.as_ref().map(|a| a.name()))
            .field(
                "rules",
                &self.rules.iter().map(|r| r.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// How a validated connection bridges its two port types
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouteKind {
    Identity,
    Adapter { protocol: String },
    /// Every type the chain passes through, from source to target
    RuleChain { types: Vec<PayloadType> },
}

/// A proposed link between two ports
#[derive(Debug, Clone)]
pub struct PortConnection {
    pub source_id: PortId,
    pub target_id: PortId,
    pub source_type: PayloadType,
    pub target_type: PayloadType,
    pub spec: ConnectionSpec,
}

impl PortConnection {
    pub fn new(source: &Port, target: &Port, spec: ConnectionSpec) -> Self {
        Self {
            source_id: source.id(),
            target_id: target.id(),
            source_type: source.payload_type().clone(),
            target_type: target.payload_type().clone(),
            spec,
        }
    }

    /// Proves the connection sound without touching either port
    pub fn validate(&self) -> std::result::Result<RouteKind, ConnectionError> {
        let from = &self.source_type;
        let to = &self.target_type;

        if let Some(adapter) = &self.spec.adapter {
            if adapter.can_handle(from, to) {
                return Ok(RouteKind::Adapter {
                    protocol: adapter.protocol().to_string(),
                });
            }
            return Err(self.broken(BrokenLink::AdapterRejected {
                adapter: adapter.name().to_string(),
                from: from.clone(),
                to: to.clone(),
            }));
        }

        if self.spec.rules.is_empty() {
            if from == to {
                return Ok(RouteKind::Identity);
            }
            return Err(self.broken(BrokenLink::TypeMismatch {
                from: from.clone(),
                to: to.clone(),
            }));
        }

        let mut current = from.clone();
        let mut types = vec![current.clone()];
        for (index, rule) in self.spec.rules.iter().enumerate() {
            if !rule.can_handle(&current, rule.output_type()) {
                return Err(self.broken(BrokenLink::RuleRejected {
                    index,
                    rule: rule.name().to_string(),
                    input: current,
                    output: rule.output_type().clone(),
                }));
            }
            current = rule.output_type().clone();
            types.push(current.clone());
        }

        if &current != to {
            return Err(self.broken(BrokenLink::ChainEndsAt {
                produced: current,
                expected: to.clone(),
            }));
        }

        Ok(RouteKind::RuleChain { types })
    }

    fn broken(&self, link: BrokenLink) -> ConnectionError {
        ConnectionError {
            source_port: self.source_id,
            target_port: self.target_id,
            link,
        }
    }
}

/// Validates and installs forwarding from `source` to `target`.
///
/// On success both ports are sealed. On failure neither port is changed.
pub async fn connect(source: &Arc<Port>, target: &Arc<Port>, spec: ConnectionSpec) -> Result<RouteKind> {
    let connection = PortConnection::new(source, target, spec);

    for port in [source, target] {
        if port.is_disposed() {
            return Err(connection
                .broken(BrokenLink::PortClosed { port_id: port.id() })
                .into());
        }
    }

    let route = match connection.validate() {
        Ok(route) => route,
        Err(e) => {
            debug!("Rejected connection: {}", e);
            return Err(e.into());
        }
    };

    source.seal();
    target.seal();
    source
        .install_route(Route::new(target, connection.spec, route.clone()))
        .await;

    info!(
        source = %source.id(),
        target = %target.id(),
        route = ?route,
        "Ports connected"
    );
    Ok(route)
}
