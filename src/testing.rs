//! Scripted collaborators for unit tests.

use crate::delivery::{ChatSender, DeliveryError, RecipientId};
use crate::event::EpisodeMetadata;
use crate::provider::{MetadataProvider, ProviderError};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tokio::time::Instant;

/// Provider that replays a fixed list of responses, then fails permanently.
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Result<EpisodeMetadata, ProviderError>>>,
    calls: Mutex<Vec<(Instant, (u64, u32, u32))>>,
}

impl ScriptedProvider {
    pub fn new(script: Vec<Result<EpisodeMetadata, ProviderError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<(u64, u32, u32)> {
        self.calls.lock().unwrap().iter().map(|(_, c)| *c).collect()
    }

    /// Whole seconds between consecutive calls.
    pub fn call_gaps_secs(&self) -> Vec<u64> {
        let calls = self.calls.lock().unwrap();
        calls
            .windows(2)
            .map(|w| (w[1].0 - w[0].0).as_secs())
            .collect()
    }
}

#[async_trait]
impl MetadataProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn fetch_episode(
        &self,
        series_id: u64,
        season: u32,
        episode: u32,
    ) -> Result<EpisodeMetadata, ProviderError> {
        self.calls
            .lock()
            .unwrap()
            .push((Instant::now(), (series_id, season, episode)));

        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ProviderError::Failed("script exhausted".into())))
    }
}

/// Sender with a per-recipient script of failures; unscripted sends succeed.
pub struct ScriptedSender {
    failures: Mutex<HashMap<RecipientId, VecDeque<DeliveryError>>>,
    always_fail: Mutex<HashMap<RecipientId, fn() -> DeliveryError>>,
    attempts: Mutex<Vec<(Instant, RecipientId, String)>>,
}

impl ScriptedSender {
    pub fn new() -> Self {
        Self {
            failures: Mutex::new(HashMap::new()),
            always_fail: Mutex::new(HashMap::new()),
            attempts: Mutex::new(Vec::new()),
        }
    }

    /// Fail the next sends to `recipient` with these errors, in order.
    pub fn fail_next(self, recipient: RecipientId, errors: Vec<DeliveryError>) -> Self {
        self.failures
            .lock()
            .unwrap()
            .insert(recipient, errors.into());
        self
    }

    /// Fail every send to `recipient`.
    pub fn fail_always(self, recipient: RecipientId, error: fn() -> DeliveryError) -> Self {
        self.always_fail.lock().unwrap().insert(recipient, error);
        self
    }

    /// Recipients in attempt order.
    pub fn attempted(&self) -> Vec<RecipientId> {
        self.attempts.lock().unwrap().iter().map(|a| a.1).collect()
    }

    pub fn texts(&self) -> Vec<String> {
        self.attempts
            .lock()
            .unwrap()
            .iter()
            .map(|a| a.2.clone())
            .collect()
    }

    /// Whole seconds between consecutive attempts to `recipient`.
    pub fn gaps_secs(&self, recipient: RecipientId) -> Vec<u64> {
        let times: Vec<Instant> = self
            .attempts
            .lock()
            .unwrap()
            .iter()
            .filter(|a| a.1 == recipient)
            .map(|a| a.0)
            .collect();
        times.windows(2).map(|w| (w[1] - w[0]).as_secs()).collect()
    }
}

#[async_trait]
impl ChatSender for ScriptedSender {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn send_text(&self, recipient: RecipientId, text: &str) -> Result<(), DeliveryError> {
        self.attempts
            .lock()
            .unwrap()
            .push((Instant::now(), recipient, text.to_string()));

        if let Some(error) = self.always_fail.lock().unwrap().get(&recipient) {
            return Err(error());
        }

        match self
            .failures
            .lock()
            .unwrap()
            .get_mut(&recipient)
            .and_then(|queue| queue.pop_front())
        {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}
