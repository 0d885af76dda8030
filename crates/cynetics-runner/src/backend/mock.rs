use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use super::{GenerationBackend, GenerationError, GenerationRequest};

/// A scripted backend for tests.
///
/// Replies are chosen by the first rule whose needle occurs in the prompt;
/// unmatched prompts get the default reply. Every call is recorded.
pub struct MockBackend {
    rules: Vec<Rule>,
    default_reply: String,
    delay: Duration,
    state: Mutex<MockState>,
}

struct Rule {
    needle: String,
    reply: String,
    /// How many matching calls fail before replies start; `None` fails forever.
    failures: Option<u32>,
}

#[derive(Default)]
struct MockState {
    prompts: Vec<String>,
    failures_served: HashMap<String, u32>,
    in_flight: usize,
    max_in_flight: usize,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            default_reply: "ok".into(),
            delay: Duration::ZERO,
            state: Mutex::new(MockState::default()),
        }
    }

    /// Reply with `reply` whenever the prompt contains `needle`.
    pub fn respond(mut self, needle: &str, reply: &str) -> Self {
        self.rules.push(Rule {
            needle: needle.into(),
            reply: reply.into(),
            failures: Some(0),
        });
        self
    }

    /// Fail the first `n` matching calls, then reply with `reply`.
    pub fn fail_first(mut self, needle: &str, n: u32, reply: &str) -> Self {
        self.rules.push(Rule {
            needle: needle.into(),
            reply: reply.into(),
            failures: Some(n),
        });
        self
    }

    /// Fail every call whose prompt contains `needle`.
    pub fn always_fail(mut self, needle: &str) -> Self {
        self.rules.push(Rule {
            needle: needle.into(),
            reply: String::new(),
            failures: None,
        });
        self
    }

    pub fn with_default(mut self, reply: &str) -> Self {
        self.default_reply = reply.into();
        self
    }

    /// Take this long to answer each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.lock().prompts.len()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.lock().prompts.clone()
    }

    pub fn calls_matching(&self, needle: &str) -> usize {
        self.lock()
            .prompts
            .iter()
            .filter(|p| p.contains(needle))
            .count()
    }

    /// Highest number of calls observed in progress at once.
    pub fn max_in_flight(&self) -> usize {
        self.lock().max_in_flight
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn script(&self, prompt: &str) -> Result<String, GenerationError> {
        let Some(rule) = self.rules.iter().find(|r| prompt.contains(&r.needle)) else {
            return Ok(self.default_reply.clone());
        };
        let mut state = self.lock();
        let served = state.failures_served.entry(rule.needle.clone()).or_insert(0);
        let fail = match rule.failures {
            None => true,
            Some(n) => *served < n,
        };
        if fail {
            *served += 1;
            return Err(GenerationError::Request(format!(
                "scripted failure for '{}'",
                rule.needle
            )));
        }
        Ok(rule.reply.clone())
    }
}

struct InFlight<'a>(&'a MockBackend);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.lock().in_flight -= 1;
    }
}

#[async_trait]
impl GenerationBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    async fn preflight_check(&self) -> Result<()> {
        Ok(())
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        {
            let mut state = self.lock();
            state.prompts.push(request.prompt.clone());
            state.in_flight += 1;
            state.max_in_flight = state.max_in_flight.max(state.in_flight);
        }
        let _guard = InFlight(self);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.script(&request.prompt)
    }
}
