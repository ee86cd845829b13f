//! Scripted in-memory transport for state machine tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use serde_json::Value;
use tokio::sync::mpsc;

use crate::transport::{HubFuture, Transport};
use crate::types::TransportEvent;
use crate::ws_client::HubError;

/// Transport whose `start` results come from a script. Once the script
/// runs dry every start fails with `ConnectionClosed`.
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    starts: Mutex<VecDeque<Result<String, HubError>>>,
    events: Mutex<Option<mpsc::Sender<TransportEvent>>>,
    invocations: Mutex<Vec<(String, Value)>>,
    invoke_failures: AtomicU32,
    start_calls: AtomicU32,
    stop_calls: AtomicU32,
}

impl ScriptedTransport {
    pub(crate) fn with_ids(ids: &[&str]) -> Self {
        let transport = Self::default();
        {
            let mut starts = transport.starts.lock().unwrap();
            for id in ids {
                starts.push_back(Ok(id.to_string()));
            }
        }
        transport
    }

    /// Makes the next `n` invocations fail with a hub fault.
    pub(crate) fn fail_invocations(&self, n: u32) {
        self.invoke_failures.store(n, Ordering::SeqCst);
    }

    /// Pushes a lifecycle event as if the wire produced it.
    pub(crate) fn emit(&self, event: TransportEvent) {
        let guard = self.events.lock().unwrap();
        let tx = guard.as_ref().expect("transport was never started");
        tx.try_send(event).unwrap();
    }

    pub(crate) fn invocations(&self, method: &str) -> Vec<Value> {
        self.invocations
            .lock()
            .unwrap()
            .iter()
            .filter(|(m, _)| m == method)
            .map(|(_, p)| p.clone())
            .collect()
    }

    pub(crate) fn start_calls(&self) -> u32 {
        self.start_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn stop_calls(&self) -> u32 {
        self.stop_calls.load(Ordering::SeqCst)
    }
}

impl Transport for ScriptedTransport {
    fn start(&self, events: mpsc::Sender<TransportEvent>) -> HubFuture<'_, Result<String, HubError>> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        *self.events.lock().unwrap() = Some(events);
        let next = self
            .starts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(HubError::Closed));
        Box::pin(async move { next })
    }

    fn invoke<'a>(&'a self, method: &'a str, payload: Value) -> HubFuture<'a, Result<Value, HubError>> {
        self.invocations
            .lock()
            .unwrap()
            .push((method.to_string(), payload));
        let failing = self
            .invoke_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        Box::pin(async move {
            if failing {
                Err(HubError::Hub("hub is busy".into()))
            } else {
                Ok(Value::Bool(true))
            }
        })
    }

    fn stop(&self) -> HubFuture<'_, ()> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async {})
    }
}
