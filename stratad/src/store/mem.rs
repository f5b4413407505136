//! An in-memory store with a controllable clock, used by the test suite.

use std::sync::{Arc, Mutex, MutexGuard};

use strata_common::prelude::*;

use super::Store;

/// State behind a [`MemStore`] handle.
#[derive(Debug)]
struct MemState {
    connectors: Vec<Connector>,
    credentials: Vec<Credential>,
    cc_pairs: Vec<ConnectorCredentialPair>,
    models: Vec<EmbeddingModel>,
    attempts: Vec<IndexAttempt>,
    next_attempt_id: i32,
    now: NaiveDateTime,
}

/// A [`Store`] held entirely in memory.
///
/// Cloning produces another handle on the same state, so a test can keep one
/// handle for fixtures and assertions while the supervisor owns another. The
/// clock only moves when [`MemStore::advance_clock`] is called, which makes
/// cadence and stall decisions deterministic.
#[derive(Clone, Debug)]
pub struct MemStore {
    state: Arc<Mutex<MemState>>,
}

impl MemStore {
    /// Create an empty store. The clock starts at the current wall time and
    /// advances only on request.
    pub fn new() -> MemStore {
        MemStore {
            state: Arc::new(Mutex::new(MemState {
                connectors: vec![],
                credentials: vec![],
                cc_pairs: vec![],
                models: vec![],
                attempts: vec![],
                next_attempt_id: 1,
                now: Utc::now().naive_utc(),
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, MemState> {
        self.state.lock().expect("mem store mutex poisoned")
    }

    /// Move the store's clock forward.
    pub fn advance_clock(&self, delta: Duration) {
        let mut state = self.state();
        state.now = state.now + delta;
    }

    /// Add a connector row.
    pub fn add_connector(&self, connector: Connector) {
        self.state().connectors.push(connector);
    }

    /// Add a credential row.
    pub fn add_credential(&self, credential: Credential) {
        self.state().credentials.push(credential);
    }

    /// Pair up a connector and a credential.
    pub fn add_cc_pair(&self, connector_id: i32, credential_id: i32) {
        self.state()
            .cc_pairs
            .push(ConnectorCredentialPair::factory(connector_id, credential_id));
    }

    /// Add an embedding model row.
    pub fn add_model(&self, model: EmbeddingModel) {
        self.state().models.push(model);
    }

    /// Insert a pre-built attempt row, e.g. one left over from a previous
    /// supervisor. Keeps the id sequence ahead of the inserted row.
    pub fn insert_attempt(&self, attempt: IndexAttempt) {
        let mut state = self.state();
        if attempt.id >= state.next_attempt_id {
            state.next_attempt_id = attempt.id + 1;
        }
        state.attempts.push(attempt);
    }

    /// Edit one attempt row in place, e.g. to simulate worker progress.
    pub fn update_attempt<F>(&self, attempt_id: i32, f: F)
    where
        F: FnOnce(&mut IndexAttempt),
    {
        let mut state = self.state();
        let attempt = state
            .attempts
            .iter_mut()
            .find(|attempt| attempt.id == attempt_id)
            .expect("no such attempt in mem store");
        f(attempt);
    }

    /// Delete a connector row, orphaning its attempts the way the real
    /// schema's `ON DELETE SET NULL` does.
    pub fn remove_connector(&self, connector_id: i32) {
        let mut state = self.state();
        state.connectors.retain(|connector| connector.id != connector_id);
        state.cc_pairs.retain(|pair| pair.connector_id != connector_id);
        for attempt in &mut state.attempts {
            if attempt.connector_id == Some(connector_id) {
                attempt.connector_id = None;
            }
        }
    }

    /// Delete a credential row, orphaning its attempts.
    pub fn remove_credential(&self, credential_id: i32) {
        let mut state = self.state();
        state.credentials.retain(|credential| credential.id != credential_id);
        state.cc_pairs.retain(|pair| pair.credential_id != credential_id);
        for attempt in &mut state.attempts {
            if attempt.credential_id == Some(credential_id) {
                attempt.credential_id = None;
            }
        }
    }

    /// Look up one attempt without going through the trait.
    pub fn get_attempt(&self, attempt_id: i32) -> Option<IndexAttempt> {
        self.state()
            .attempts
            .iter()
            .find(|attempt| attempt.id == attempt_id)
            .cloned()
    }

    /// Look up one pair without going through the trait.
    pub fn get_cc_pair(&self, connector_id: i32, credential_id: i32) -> Option<ConnectorCredentialPair> {
        self.state()
            .cc_pairs
            .iter()
            .find(|pair| {
                pair.connector_id == connector_id && pair.credential_id == credential_id
            })
            .cloned()
    }

    /// All attempts recorded against one model.
    pub fn attempts_for_model(&self, model_id: i32) -> Vec<IndexAttempt> {
        self.state()
            .attempts
            .iter()
            .filter(|attempt| attempt.embedding_model_id == model_id)
            .cloned()
            .collect()
    }

    /// The most recent attempt for one triple, by progress time.
    fn last_attempt_locked(
        state: &MemState,
        connector_id: i32,
        credential_id: i32,
        model_id: i32,
    ) -> Option<IndexAttempt> {
        state
            .attempts
            .iter()
            .filter(|attempt| {
                attempt.connector_id == Some(connector_id)
                    && attempt.credential_id == Some(credential_id)
                    && attempt.embedding_model_id == model_id
            })
            .max_by_key(|attempt| (attempt.time_updated, attempt.id))
            .cloned()
    }
}

impl Default for MemStore {
    fn default() -> Self {
        MemStore::new()
    }
}

impl Store for MemStore {
    fn list_connectors(&mut self) -> Result<Vec<Connector>> {
        Ok(self.state().connectors.clone())
    }

    fn connector(&mut self, connector_id: i32) -> Result<Option<Connector>> {
        Ok(self
            .state()
            .connectors
            .iter()
            .find(|connector| connector.id == connector_id)
            .cloned())
    }

    fn credential(&mut self, credential_id: i32) -> Result<Option<Credential>> {
        Ok(self
            .state()
            .credentials
            .iter()
            .find(|credential| credential.id == credential_id)
            .cloned())
    }

    fn list_cc_pairs(&mut self) -> Result<Vec<ConnectorCredentialPair>> {
        Ok(self.state().cc_pairs.clone())
    }

    fn update_cc_pair_status(
        &mut self,
        connector_id: i32,
        credential_id: i32,
        status: IndexingStatus,
    ) -> Result<()> {
        let mut state = self.state();
        if let Some(pair) = state.cc_pairs.iter_mut().find(|pair| {
            pair.connector_id == connector_id && pair.credential_id == credential_id
        }) {
            pair.last_attempt_status = Some(status);
        }
        Ok(())
    }

    fn resync_cc_pair(&mut self, cc_pair: &ConnectorCredentialPair) -> Result<()> {
        let mut state = self.state();
        let present_id = state
            .models
            .iter()
            .find(|model| model.status == IndexModelStatus::Present)
            .map(|model| model.id)
            .ok_or_else(|| anyhow!("no embedding model is marked as present"))?;
        let latest = MemStore::last_attempt_locked(
            &state,
            cc_pair.connector_id,
            cc_pair.credential_id,
            present_id,
        );
        let latest_success = state
            .attempts
            .iter()
            .filter(|attempt| {
                attempt.connector_id == Some(cc_pair.connector_id)
                    && attempt.credential_id == Some(cc_pair.credential_id)
                    && attempt.embedding_model_id == present_id
                    && attempt.status == IndexingStatus::Success
            })
            .map(|attempt| attempt.time_updated)
            .max();
        if let Some(pair) = state.cc_pairs.iter_mut().find(|pair| {
            pair.connector_id == cc_pair.connector_id
                && pair.credential_id == cc_pair.credential_id
        }) {
            pair.last_attempt_status = latest.map(|attempt| attempt.status);
            pair.last_successful_index_time = latest_success;
        }
        Ok(())
    }

    fn mark_all_in_progress_cc_pairs_failed(&mut self) -> Result<()> {
        for pair in &mut self.state().cc_pairs {
            if pair.last_attempt_status == Some(IndexingStatus::InProgress) {
                pair.last_attempt_status = Some(IndexingStatus::Failed);
            }
        }
        Ok(())
    }

    fn current_model(&mut self) -> Result<EmbeddingModel> {
        self.state()
            .models
            .iter()
            .find(|model| model.status == IndexModelStatus::Present)
            .cloned()
            .ok_or_else(|| anyhow!("no embedding model is marked as present"))
    }

    fn secondary_model(&mut self) -> Result<Option<EmbeddingModel>> {
        Ok(self
            .state()
            .models
            .iter()
            .find(|model| model.status == IndexModelStatus::Future)
            .cloned())
    }

    fn model(&mut self, model_id: i32) -> Result<Option<EmbeddingModel>> {
        Ok(self
            .state()
            .models
            .iter()
            .find(|model| model.id == model_id)
            .cloned())
    }

    fn set_model_status(&mut self, model_id: i32, status: IndexModelStatus) -> Result<()> {
        let mut state = self.state();
        if let Some(model) = state.models.iter_mut().find(|model| model.id == model_id) {
            model.status = status;
        }
        Ok(())
    }

    fn attempt(&mut self, attempt_id: i32) -> Result<Option<IndexAttempt>> {
        Ok(self.get_attempt(attempt_id))
    }

    fn last_attempt(
        &mut self,
        connector_id: i32,
        credential_id: i32,
        model_id: i32,
    ) -> Result<Option<IndexAttempt>> {
        let state = self.state();
        Ok(MemStore::last_attempt_locked(
            &state,
            connector_id,
            credential_id,
            model_id,
        ))
    }

    fn attempts_not_started(&mut self) -> Result<Vec<IndexAttempt>> {
        Ok(self
            .state()
            .attempts
            .iter()
            .filter(|attempt| attempt.status == IndexingStatus::NotStarted)
            .cloned()
            .collect())
    }

    fn attempts_in_progress(&mut self, connector_id: i32) -> Result<Vec<IndexAttempt>> {
        Ok(self
            .state()
            .attempts
            .iter()
            .filter(|attempt| {
                attempt.connector_id == Some(connector_id)
                    && attempt.status == IndexingStatus::InProgress
            })
            .cloned()
            .collect())
    }

    fn count_distinct_cc_pairs_attempted(&mut self, model_id: i32) -> Result<i64> {
        let state = self.state();
        let pairs: HashSet<(Option<i32>, Option<i32>)> = state
            .attempts
            .iter()
            .filter(|attempt| {
                attempt.embedding_model_id == model_id && attempt.status.is_terminal()
            })
            .map(|attempt| (attempt.connector_id, attempt.credential_id))
            .collect();
        Ok(pairs.len() as i64)
    }

    fn create_attempt(
        &mut self,
        connector_id: i32,
        credential_id: i32,
        model_id: i32,
    ) -> Result<IndexAttempt> {
        let mut state = self.state();
        let attempt = IndexAttempt {
            id: state.next_attempt_id,
            connector_id: Some(connector_id),
            credential_id: Some(credential_id),
            embedding_model_id: model_id,
            status: IndexingStatus::NotStarted,
            failure_reason: None,
            time_created: state.now,
            time_updated: state.now,
        };
        state.next_attempt_id += 1;
        state.attempts.push(attempt.clone());
        Ok(attempt)
    }

    fn mark_attempt_failed(&mut self, attempt_id: i32, failure_reason: &str) -> Result<()> {
        let mut state = self.state();
        let now = state.now;
        if let Some(attempt) = state
            .attempts
            .iter_mut()
            .find(|attempt| attempt.id == attempt_id)
        {
            // Terminal attempts stay untouched, mirroring the SQL guard.
            if !attempt.status.is_terminal() {
                attempt.status = IndexingStatus::Failed;
                attempt.failure_reason = Some(failure_reason.to_owned());
                attempt.time_updated = now;
            }
        }
        Ok(())
    }

    fn now(&mut self) -> Result<NaiveDateTime> {
        Ok(self.state().now)
    }
}
