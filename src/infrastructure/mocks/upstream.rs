//! Scripted upstream handler for testing.

use crate::application::ports::{Handler, HandlerFailure};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// One scripted upstream response.
#[derive(Debug, Clone)]
pub enum ScriptedCall {
    /// Return this value
    Succeed(serde_json::Value),
    /// Fail with this message
    Fail(String),
    /// Sleep for this long before succeeding (used to trip timeouts)
    Hang(Duration),
}

/// Upstream handler that replays a scripted sequence of outcomes.
///
/// Each invocation pops the next scripted call; once the script is
/// exhausted, invocations succeed with `{"ok": true}`. The invocation
/// counter lets tests assert that a short-circuited call never reached
/// the handler.
#[derive(Debug, Default)]
pub struct ScriptedUpstream {
    script: Mutex<VecDeque<ScriptedCall>>,
    invocations: AtomicU64,
}

impl ScriptedUpstream {
    /// Create a handler with an empty script (always succeeds).
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a handler from a scripted sequence.
    pub fn with_script(script: impl IntoIterator<Item = ScriptedCall>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            invocations: AtomicU64::new(0),
        }
    }

    /// Append a step to the script.
    pub fn push(&self, call: ScriptedCall) {
        self.script
            .lock()
            .expect("ScriptedUpstream mutex poisoned")
            .push_back(call);
    }

    /// Append `n` failures with the same message.
    pub fn push_failures(&self, n: usize, message: &str) {
        for _ in 0..n {
            self.push(ScriptedCall::Fail(message.to_string()));
        }
    }

    /// Number of times the handler has been invoked.
    pub fn invocations(&self) -> u64 {
        self.invocations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Handler for ScriptedUpstream {
    async fn invoke(
        &self,
        _args: &serde_json::Value,
    ) -> Result<serde_json::Value, HandlerFailure> {
        self.invocations.fetch_add(1, Ordering::SeqCst);

        let next = self
            .script
            .lock()
            .expect("ScriptedUpstream mutex poisoned")
            .pop_front();

        match next {
            Some(ScriptedCall::Succeed(value)) => Ok(value),
            Some(ScriptedCall::Fail(message)) => Err(HandlerFailure::new(message)),
            Some(ScriptedCall::Hang(duration)) => {
                tokio::time::sleep(duration).await;
                Ok(serde_json::json!({"ok": true}))
            }
            None => Ok(serde_json::json!({"ok": true})),
        }
    }
}
