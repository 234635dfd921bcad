//! Session - composes transport, correlator and event dispatcher into
//! the public [`Kb`] surface.
//!
//! Construction sequence:
//! 1. Open the transport (TCP connect; failure is synchronous).
//! 2. Ask the server for its method surface with one `methods` call -
//!    this doubles as the liveness check.
//! 3. Start the event dispatcher, only once the connection is confirmed
//!    live.
//!
//! Close order is the reverse: drain and stop the dispatcher, stop the
//! correlator (failing any still-pending call), close the transport.

use std::time::Duration;

use serde_json::{json, Value};
use tokio::net::TcpStream;

use crate::correlator::Correlator;
use crate::dispatcher::{
    spawn_dispatcher, DispatcherHandle, EventCallback, PolledEvents, DEFAULT_POLL_RATE_HZ,
};
use crate::error::{KbError, Result};
use crate::protocol::DEFAULT_PORT;
use crate::subscribe::{infer_variable, normalize_variable, EventType, SubscribeOptions};
use crate::transport::{Inbound, Transport};

/// Session configuration knobs.
#[derive(Debug, Clone)]
pub struct KbConfig {
    /// Client-side deadline for each call. `None` waits until the
    /// connection is observed closed.
    pub call_timeout: Option<Duration>,
    /// Tick interval of the event dispatcher loop.
    pub dispatch_tick: Duration,
}

impl Default for KbConfig {
    fn default() -> Self {
        Self {
            call_timeout: None,
            dispatch_tick: Duration::from_millis(1000 / DEFAULT_POLL_RATE_HZ as u64),
        }
    }
}

/// A live session with a knowledge base server.
///
/// All remote interaction goes through two primitives: [`call`](Kb::call)
/// and [`subscribe`](Kb::subscribe). The named query helpers in this
/// crate are thin sugar over `call`.
///
/// # Example
///
/// ```ignore
/// use oro_client::Kb;
///
/// let kb = Kb::connect("localhost", 6969).await?;
/// kb.add(&["alfred rdf:type Human"]).await?;
/// let evt = kb
///     .subscribe(&["?o isIn room"], Some(Box::new(|v| println!("{v}"))))
///     .await?;
/// kb.close().await?;
/// ```
pub struct Kb {
    transport: Transport,
    correlator: Correlator,
    dispatcher: DispatcherHandle,
    polled: PolledEvents,
    methods: Vec<String>,
}

impl Kb {
    /// Connect to a server with the default configuration.
    pub async fn connect(host: &str, port: u16) -> Result<Self> {
        Self::connect_with(host, port, KbConfig::default()).await
    }

    /// Connect to a server on the default port.
    pub async fn connect_default(host: &str) -> Result<Self> {
        Self::connect(host, DEFAULT_PORT).await
    }

    /// Connect to a server with an explicit configuration.
    pub async fn connect_with(host: &str, port: u16, config: KbConfig) -> Result<Self> {
        let (transport, inbound) = Transport::connect(host, port).await?;
        Self::start(transport, inbound, config).await
    }

    /// Build a session over an already-connected stream.
    pub async fn from_stream(stream: TcpStream, config: KbConfig) -> Result<Self> {
        let (transport, inbound) = Transport::from_stream(stream);
        Self::start(transport, inbound, config).await
    }

    async fn start(transport: Transport, inbound: Inbound, config: KbConfig) -> Result<Self> {
        let Inbound { responses, events } = inbound;

        let correlator = Correlator::new(
            transport.writer(),
            responses,
            transport.state(),
            config.call_timeout,
        );

        // Learn the server's method surface. Only used to answer
        // `has_method`; every call goes through the generic `call`.
        let methods = match discover_methods(&correlator).await {
            Ok(methods) => methods,
            Err(e) => {
                drop(correlator);
                let _ = transport.close().await;
                return Err(e);
            }
        };
        tracing::debug!(count = methods.len(), "server methods discovered");

        let dispatcher = spawn_dispatcher(events, config.dispatch_tick);
        let polled = dispatcher.polled();

        Ok(Self {
            transport,
            correlator,
            dispatcher,
            polled,
            methods,
        })
    }

    /// Invoke a remote method by name.
    ///
    /// At most one call is in flight per session; concurrent callers
    /// serialize on an internal lock.
    pub async fn call(&self, method: &str, args: &[Value]) -> Result<Value> {
        self.correlator.call(method, args).await
    }

    /// Method names declared by the server at connection time.
    pub fn methods(&self) -> &[String] {
        &self.methods
    }

    /// Check whether the server declared a method.
    pub fn has_method(&self, name: &str) -> bool {
        self.methods.iter().any(|m| m == name)
    }

    /// Subscribe to an event pattern with default options.
    ///
    /// A single pattern is just a one-element slice. If `callback` is
    /// supplied it is invoked with each notification payload on the
    /// dispatcher task; otherwise notifications accumulate on the
    /// [poll queue](Kb::events) until drained.
    ///
    /// Returns the server-assigned event id.
    pub async fn subscribe(
        &self,
        patterns: &[&str],
        callback: Option<EventCallback>,
    ) -> Result<String> {
        self.subscribe_with(patterns, callback, SubscribeOptions::default())
            .await
    }

    /// Subscribe with explicit event type, trigger, variable and models.
    pub async fn subscribe_with(
        &self,
        patterns: &[&str],
        callback: Option<EventCallback>,
        options: SubscribeOptions,
    ) -> Result<String> {
        let patterns: Vec<String> = patterns.iter().map(|p| p.to_string()).collect();

        let mut variable = options.variable.as_deref().map(normalize_variable);
        if variable.is_none() && options.event_type == EventType::NewInstance {
            variable = infer_variable(&patterns)?;
        }

        let args = [
            json!(options.event_type.as_str()),
            json!(options.trigger.as_str()),
            json!(variable),
            json!(patterns),
            json!(options.models),
        ];
        let event_id = match self.call("subscribe", &args).await? {
            Value::String(id) => id,
            other => {
                return Err(KbError::Protocol(format!(
                    "unexpected reply to subscribe: {}",
                    other
                )))
            }
        };
        tracing::debug!(event = %event_id, "subscription registered");

        if let Some(callback) = callback {
            self.dispatcher.register(event_id.clone(), callback);
        }

        Ok(event_id)
    }

    /// Get a handle on the poll queue of unclaimed events.
    ///
    /// The handle is independent of the session's lifetime: events still
    /// queued when the session closes stay readable through it.
    pub fn events(&self) -> PolledEvents {
        self.polled.clone()
    }

    /// Pop the oldest unclaimed event, if any.
    pub fn next_event(&self) -> Option<(String, Value)> {
        self.polled.next()
    }

    /// Number of unclaimed events waiting on the poll queue.
    pub fn pending_events(&self) -> usize {
        self.polled.len()
    }

    /// Close the session.
    ///
    /// Drains and stops the event dispatcher first, so every event
    /// already received ends up in a callback or on the poll queue; then
    /// closes the connection, failing any still-pending call.
    pub async fn close(self) -> Result<()> {
        self.dispatcher.shutdown().await;
        drop(self.correlator);
        self.transport.close().await
    }
}

/// Issue the discovery call and parse the declared method names.
async fn discover_methods(correlator: &Correlator) -> Result<Vec<String>> {
    match correlator.call("methods", &[]).await? {
        Value::Array(entries) => Ok(entries
            .iter()
            .filter_map(Value::as_str)
            .map(parse_method_name)
            .collect()),
        other => Err(KbError::Protocol(format!(
            "unexpected reply to methods: {}",
            other
        ))),
    }
}

/// Extract the bare method name from a `"name(arity)"` or `"name"`
/// signature string.
fn parse_method_name(signature: &str) -> String {
    signature
        .split('(')
        .next()
        .unwrap_or(signature)
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_method_name() {
        assert_eq!(parse_method_name("lookup(1)"), "lookup");
        assert_eq!(parse_method_name("exist"), "exist");
        assert_eq!(parse_method_name("find(4)"), "find");
        assert_eq!(parse_method_name(" revise(2) "), "revise");
    }

    #[test]
    fn test_default_config() {
        let config = KbConfig::default();
        assert!(config.call_timeout.is_none());
        assert_eq!(config.dispatch_tick, Duration::from_millis(50));
    }
}
