// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! In-process implementations of the remote clients.
//!
//! [`InMemoryCloudWatchLogs`] keeps per-stream sequence tokens the way the real service
//! does, so token conflicts can be provoked by moving a stream's token from the outside.
//! Both stores accept scripted failures that are returned before the next call is
//! processed.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{
    ClientFactory, CloudWatchLogsApi, ObjectStoreApi, PutLogEventsRequest, PutLogEventsResponse,
    PutObjectRequest,
};
use crate::config::ClientProperties;
use crate::errors::ApiError;
use crate::record::Record;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct LogStream {
    batches: Vec<Vec<Record>>,
    expected_token: Option<String>,
}

#[derive(Debug, Default)]
struct LogsState {
    groups: HashMap<String, Option<u32>>,
    streams: HashMap<(String, String), LogStream>,
    token_counter: u64,
    put_calls: usize,
    closed: bool,
    put_failures: VecDeque<ApiError>,
    create_group_failures: VecDeque<ApiError>,
    create_stream_failures: VecDeque<ApiError>,
}

#[derive(Debug, Default)]
pub struct InMemoryCloudWatchLogs {
    state: Mutex<LogsState>,
}

impl InMemoryCloudWatchLogs {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Next `put_log_events` call fails with `error` without touching any stream.
    pub fn fail_next_put(&self, error: ApiError) {
        lock(&self.state).put_failures.push_back(error);
    }

    pub fn fail_next_create_log_group(&self, error: ApiError) {
        lock(&self.state).create_group_failures.push_back(error);
    }

    pub fn fail_next_create_log_stream(&self, error: ApiError) {
        lock(&self.state).create_stream_failures.push_back(error);
    }

    /// Moves the token a stream expects, as another writer would.
    pub fn set_expected_token(&self, group: &str, stream: &str, token: Option<&str>) {
        let mut state = lock(&self.state);
        if let Some(log_stream) = state.streams.get_mut(&(group.to_string(), stream.to_string())) {
            log_stream.expected_token = token.map(str::to_string);
        }
    }

    /// Every record accepted on a stream, in acceptance order.
    #[must_use]
    pub fn events(&self, group: &str, stream: &str) -> Vec<Record> {
        self.batches(group, stream).into_iter().flatten().collect()
    }

    /// Accepted batches on a stream, one entry per successful call.
    #[must_use]
    pub fn batches(&self, group: &str, stream: &str) -> Vec<Vec<Record>> {
        lock(&self.state)
            .streams
            .get(&(group.to_string(), stream.to_string()))
            .map(|s| s.batches.clone())
            .unwrap_or_default()
    }

    /// Calls to `put_log_events`, including failed ones.
    #[must_use]
    pub fn put_calls(&self) -> usize {
        lock(&self.state).put_calls
    }

    #[must_use]
    pub fn has_group(&self, group: &str) -> bool {
        lock(&self.state).groups.contains_key(group)
    }

    #[must_use]
    pub fn has_stream(&self, group: &str, stream: &str) -> bool {
        lock(&self.state)
            .streams
            .contains_key(&(group.to_string(), stream.to_string()))
    }

    #[must_use]
    pub fn retention(&self, group: &str) -> Option<u32> {
        lock(&self.state).groups.get(group).copied().flatten()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }
}

#[async_trait]
impl CloudWatchLogsApi for InMemoryCloudWatchLogs {
    async fn create_log_group(&self, log_group_name: &str) -> Result<(), ApiError> {
        let mut state = lock(&self.state);
        if let Some(error) = state.create_group_failures.pop_front() {
            return Err(error);
        }
        if state.groups.contains_key(log_group_name) {
            return Err(ApiError::ResourceAlreadyExists);
        }
        state.groups.insert(log_group_name.to_string(), None);
        Ok(())
    }

    async fn put_retention_policy(
        &self,
        log_group_name: &str,
        retention_in_days: u32,
    ) -> Result<(), ApiError> {
        let mut state = lock(&self.state);
        match state.groups.get_mut(log_group_name) {
            Some(retention) => {
                *retention = Some(retention_in_days);
                Ok(())
            }
            None => Err(ApiError::ResourceNotFound(log_group_name.to_string())),
        }
    }

    async fn create_log_stream(
        &self,
        log_group_name: &str,
        log_stream_name: &str,
    ) -> Result<(), ApiError> {
        let mut state = lock(&self.state);
        if let Some(error) = state.create_stream_failures.pop_front() {
            return Err(error);
        }
        if !state.groups.contains_key(log_group_name) {
            return Err(ApiError::ResourceNotFound(log_group_name.to_string()));
        }
        let key = (log_group_name.to_string(), log_stream_name.to_string());
        if state.streams.contains_key(&key) {
            return Err(ApiError::ResourceAlreadyExists);
        }
        state.streams.insert(key, LogStream::default());
        Ok(())
    }

    async fn put_log_events(
        &self,
        request: PutLogEventsRequest<'_>,
    ) -> Result<PutLogEventsResponse, ApiError> {
        let mut state = lock(&self.state);
        state.put_calls += 1;
        if let Some(error) = state.put_failures.pop_front() {
            return Err(error);
        }

        state.token_counter += 1;
        let next_token = format!("{:020}", state.token_counter);
        let key = (
            request.log_group_name.to_string(),
            request.log_stream_name.to_string(),
        );
        let Some(stream) = state.streams.get_mut(&key) else {
            return Err(ApiError::ResourceNotFound(format!(
                "{}/{}",
                request.log_group_name, request.log_stream_name
            )));
        };

        if stream.expected_token.as_deref() != request.sequence_token {
            return Err(ApiError::InvalidSequenceToken {
                expected_sequence_token: stream.expected_token.clone(),
            });
        }
        if request
            .log_events
            .windows(2)
            .any(|pair| pair[1].timestamp() < pair[0].timestamp())
        {
            return Err(ApiError::Service {
                code: "InvalidParameterException".to_string(),
                message: "log events in a single PutLogEvents request must be in chronological order"
                    .to_string(),
            });
        }

        stream.batches.push(request.log_events.to_vec());
        stream.expected_token = Some(next_token.clone());
        Ok(PutLogEventsResponse {
            next_sequence_token: Some(next_token),
        })
    }

    async fn close(&self) {
        lock(&self.state).closed = true;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub bucket: String,
    pub key: String,
    pub body: Vec<u8>,
    pub content_type: String,
}

#[derive(Debug, Default)]
struct ObjectsState {
    objects: Vec<StoredObject>,
    put_failures: VecDeque<ApiError>,
    closed: bool,
}

#[derive(Debug, Default)]
pub struct InMemoryObjectStore {
    state: Mutex<ObjectsState>,
}

impl InMemoryObjectStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_put(&self, error: ApiError) {
        lock(&self.state).put_failures.push_back(error);
    }

    #[must_use]
    pub fn objects(&self) -> Vec<StoredObject> {
        lock(&self.state).objects.clone()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }
}

#[async_trait]
impl ObjectStoreApi for InMemoryObjectStore {
    async fn put_object(&self, request: PutObjectRequest) -> Result<(), ApiError> {
        let mut state = lock(&self.state);
        if let Some(error) = state.put_failures.pop_front() {
            return Err(error);
        }
        // Keys are unique per bucket; a second write replaces the first.
        state
            .objects
            .retain(|o| !(o.bucket == request.bucket && o.key == request.key));
        state.objects.push(StoredObject {
            bucket: request.bucket,
            key: request.key,
            body: request.body,
            content_type: request.content_type.to_string(),
        });
        Ok(())
    }

    async fn close(&self) {
        lock(&self.state).closed = true;
    }
}

/// Hands out the same in-memory clients on every call and counts how often it was asked.
#[derive(Debug, Clone, Default)]
pub struct MemoryClients {
    pub logs: Arc<InMemoryCloudWatchLogs>,
    pub objects: Arc<InMemoryObjectStore>,
    builds: Arc<AtomicUsize>,
}

impl MemoryClients {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of clients handed out so far.
    #[must_use]
    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }
}

impl ClientFactory for MemoryClients {
    fn cloudwatch_logs(
        &self,
        _properties: &ClientProperties,
    ) -> Result<Arc<dyn CloudWatchLogsApi>, ApiError> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        Ok(self.logs.clone())
    }

    fn object_store(
        &self,
        _properties: &ClientProperties,
    ) -> Result<Arc<dyn ObjectStoreApi>, ApiError> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        Ok(self.objects.clone())
    }
}
