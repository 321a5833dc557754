//! In-memory collaborators for driving the tracker and worker in tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;

use frame_fanout::models::aggregate::{AggregateUpdate, ResultAggregate};
use frame_fanout::models::analysis::{
    DetectLabelsResponse, DetectedLabel, FaceMatch, FaceRecord, ImageRef, IndexFacesResponse,
    IndexedFace, SearchFacesResponse,
};
use frame_fanout::models::frame::{FrameLabels, FrameResult};
use frame_fanout::models::job::{
    ChangeKind, ChangeRecord, DispatchMessage, JobRecord, JobStatus, PartStatus,
};
use frame_fanout::models::progress::{Milestone, ProgressEvent, ResultNotice, StageBounds};
use frame_fanout::models::search::SearchMatch;
use frame_fanout::models::shard::ShardControl;
use frame_fanout::services::aggregate::Thresholds;
use frame_fanout::services::analysis::{AnalysisError, AnalysisService};
use frame_fanout::services::backoff::BackoffPolicy;
use frame_fanout::services::encryption::ResultCipher;
use frame_fanout::services::notifier::{Notifier, NotifyError};
use frame_fanout::services::queue::{Dispatcher, QueueError};
use frame_fanout::services::search::{SearchPlanner, SearchSettings, SearchWorker};
use frame_fanout::services::shards::ShardAllocator;
use frame_fanout::services::storage::{ObjectStore, StorageError};
use frame_fanout::services::store::{ensure_transition, Store, StoreError};
use frame_fanout::services::timeline::TimelinePublisher;
use frame_fanout::services::tracker::{ProgressTracker, TrackerSettings};
use frame_fanout::services::worker::{AnalysisWorker, WorkerSettings};

pub const BUCKET: &str = "videos";
pub const FAMILY: &str = "COLLECTIONS";

// ── Store ────────────────────────────────────────────────────────────

#[derive(Default)]
struct StoreState {
    jobs: HashMap<String, JobRecord>,
    marks: HashMap<String, u64>,
    controls: HashMap<String, ShardControl>,
    aggregates: HashMap<String, ResultAggregate>,
    frame_results: HashMap<String, Vec<FrameResult>>,
    frame_labels: HashMap<String, BTreeMap<String, FrameLabels>>,
    search_matches: HashMap<String, Vec<SearchMatch>>,
    changes: Vec<ChangeRecord>,
    unreadable: HashSet<String>,
}

/// Store with the same conditional-write semantics as the Redis one; every
/// Parts/Status write is recorded as a change.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
    pub claims: AtomicU32,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite one part, bypassing the transition rules. Simulates what a
    /// stale replica would return.
    pub fn force_part(&self, job_id: &str, item_key: &str, status: PartStatus) {
        let mut state = self.state.lock().unwrap();
        let job = state.jobs.get_mut(job_id).expect("unknown job");
        job.parts.insert(item_key.to_string(), status);
    }

    pub fn force_status(&self, job_id: &str, status: JobStatus) {
        let mut state = self.state.lock().unwrap();
        state.jobs.get_mut(job_id).expect("unknown job").status = status;
    }

    /// Make `get_job` fail for `job_id`.
    pub fn break_job(&self, job_id: &str) {
        self.state.lock().unwrap().unreadable.insert(job_id.to_string());
    }

    pub fn take_changes(&self) -> Vec<ChangeRecord> {
        std::mem::take(&mut self.state.lock().unwrap().changes)
    }

    pub fn job(&self, job_id: &str) -> JobRecord {
        self.state.lock().unwrap().jobs[job_id].clone()
    }

    pub fn part(&self, job_id: &str, item_key: &str) -> PartStatus {
        self.job(job_id).parts[item_key]
    }

    pub fn frame_results(&self, job_id: &str) -> Vec<FrameResult> {
        self.state
            .lock()
            .unwrap()
            .frame_results
            .get(job_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn set_usage(&self, family: &str, count: i64) {
        let mut state = self.state.lock().unwrap();
        state.controls.get_mut(family).expect("no control record").count = count;
    }

    pub fn has_mark(&self, job_id: &str) -> bool {
        self.state.lock().unwrap().marks.contains_key(job_id)
    }

    fn record_change(state: &mut StoreState, job_id: &str, kind: ChangeKind) {
        state.changes.push(ChangeRecord {
            job_id: job_id.to_string(),
            kind,
        });
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_job(&self, job: &JobRecord) -> Result<bool, StoreError> {
        let mut state = self.state.lock().unwrap();
        if state.jobs.contains_key(&job.id) {
            return Ok(false);
        }
        state.jobs.insert(job.id.clone(), job.clone());
        Self::record_change(&mut state, &job.id, ChangeKind::Insert);
        Ok(true)
    }

    async fn get_job(&self, job_id: &str) -> Result<Option<JobRecord>, StoreError> {
        let state = self.state.lock().unwrap();
        if state.unreadable.contains(job_id) {
            return Err(StoreError::Corrupt {
                key: job_id.to_string(),
                reason: "injected failure".to_string(),
            });
        }
        Ok(state.jobs.get(job_id).cloned())
    }

    async fn claim_item(&self, job_id: &str, item_key: &str) -> Result<bool, StoreError> {
        let mut state = self.state.lock().unwrap();
        let Some(part) = state
            .jobs
            .get_mut(job_id)
            .and_then(|job| job.parts.get_mut(item_key))
        else {
            return Ok(false);
        };
        if *part != PartStatus::Pending {
            return Ok(false);
        }
        *part = PartStatus::Processing;
        self.claims.fetch_add(1, Ordering::SeqCst);
        Self::record_change(&mut state, job_id, ChangeKind::Modify);
        Ok(true)
    }

    async fn mark_complete(&self, job_id: &str, item_key: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        if let Some(job) = state.jobs.get_mut(job_id) {
            job.parts.insert(item_key.to_string(), PartStatus::Completed);
        }
        Self::record_change(&mut state, job_id, ChangeKind::Modify);
        Ok(())
    }

    async fn transition_status(
        &self,
        job_id: &str,
        from: JobStatus,
        to: JobStatus,
    ) -> Result<bool, StoreError> {
        ensure_transition(from, to)?;
        let mut state = self.state.lock().unwrap();
        match state.jobs.get_mut(job_id) {
            Some(job) if job.status == from => job.status = to,
            _ => return Ok(false),
        }
        Self::record_change(&mut state, job_id, ChangeKind::Modify);
        Ok(true)
    }

    async fn raise_completed_mark(&self, job_id: &str, completed: u64) -> Result<u64, StoreError> {
        let mut state = self.state.lock().unwrap();
        if !state.jobs.contains_key(job_id) {
            return Ok(0);
        }
        let mark = state.marks.entry(job_id.to_string()).or_insert(0);
        *mark = (*mark).max(completed);
        Ok(*mark)
    }

    async fn shard_control(&self, family: &str) -> Result<Option<ShardControl>, StoreError> {
        Ok(self.state.lock().unwrap().controls.get(family).cloned())
    }

    async fn init_shard_control(&self, family: &str, shard_id: &str) -> Result<String, StoreError> {
        let mut state = self.state.lock().unwrap();
        let control = state
            .controls
            .entry(family.to_string())
            .or_insert_with(|| ShardControl::new(shard_id));
        Ok(control.current_shard_id.clone())
    }

    async fn rollover_shard(
        &self,
        family: &str,
        expected_current: &str,
        new_shard: &str,
    ) -> Result<String, StoreError> {
        let mut state = self.state.lock().unwrap();
        let control = state.controls.get_mut(family).ok_or_else(|| StoreError::Corrupt {
            key: family.to_string(),
            reason: "rollover without control record".to_string(),
        })?;
        if control.current_shard_id == expected_current {
            control.current_shard_id = new_shard.to_string();
            control.count = 0;
            control.shard_ids.push(new_shard.to_string());
        }
        Ok(control.current_shard_id.clone())
    }

    async fn increment_shard_usage(&self, family: &str, delta: i64) -> Result<i64, StoreError> {
        let mut state = self.state.lock().unwrap();
        let control = state.controls.get_mut(family).ok_or_else(|| StoreError::Corrupt {
            key: family.to_string(),
            reason: "increment without control record".to_string(),
        })?;
        control.count += delta;
        Ok(control.count)
    }

    async fn init_aggregate(&self, job_id: &str, shard_id: &str) -> Result<bool, StoreError> {
        let mut state = self.state.lock().unwrap();
        if state.aggregates.contains_key(job_id) {
            return Ok(false);
        }
        let fields = ResultAggregate::zeroed_fields(shard_id).into_iter().collect();
        state.aggregates.insert(
            job_id.to_string(),
            ResultAggregate::from_fields(fields, HashMap::new()),
        );
        Ok(true)
    }

    async fn aggregate_shard(&self, job_id: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .aggregates
            .get(job_id)
            .map(|a| a.shard_id.clone()))
    }

    async fn apply_aggregate(&self, job_id: &str, update: &AggregateUpdate) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        let aggregate = state.aggregates.entry(job_id.to_string()).or_default();
        for (path, delta) in update.counters() {
            *aggregate.counters.entry(path.clone()).or_insert(0) += *delta as u64;
        }
        for (label, delta) in update.labels() {
            *aggregate.detected_labels.entry(label.clone()).or_insert(0) += *delta as u64;
        }
        Ok(())
    }

    async fn get_aggregate(&self, job_id: &str) -> Result<Option<ResultAggregate>, StoreError> {
        Ok(self.state.lock().unwrap().aggregates.get(job_id).cloned())
    }

    async fn put_frame_result(&self, job_id: &str, result: &FrameResult) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        state
            .frame_results
            .entry(job_id.to_string())
            .or_default()
            .push(result.clone());
        Ok(())
    }

    async fn put_frame_labels(&self, job_id: &str, labels: &FrameLabels) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        state
            .frame_labels
            .entry(job_id.to_string())
            .or_default()
            .insert(labels.key.clone(), labels.clone());
        Ok(())
    }

    async fn frame_labels(&self, job_id: &str) -> Result<Vec<FrameLabels>, StoreError> {
        let state = self.state.lock().unwrap();
        let mut frames: Vec<FrameLabels> = state
            .frame_labels
            .get(job_id)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default();
        frames.sort_by_key(|f| f.time);
        Ok(frames)
    }

    async fn append_search_matches(&self, job_id: &str, matches: &[SearchMatch]) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        state
            .search_matches
            .entry(job_id.to_string())
            .or_default()
            .extend_from_slice(matches);
        Ok(())
    }

    async fn search_matches(&self, job_id: &str) -> Result<Vec<SearchMatch>, StoreError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .search_matches
            .get(job_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

// ── Analysis service ─────────────────────────────────────────────────

/// Scripted analysis service keyed by frame object key.
#[derive(Default)]
pub struct FakeAnalysis {
    faces: Mutex<HashMap<String, Vec<FaceRecord>>>,
    labels: Mutex<HashMap<String, Vec<DetectedLabel>>>,
    failing_faces: Mutex<HashSet<String>>,
    failing_labels: Mutex<HashSet<String>>,
    /// Throttling errors left to return per frame before indexing succeeds.
    throttled_faces: Mutex<HashMap<String, u32>>,
    /// Search results per collection.
    matches: Mutex<HashMap<String, Vec<FaceMatch>>>,
    failing_collections: Mutex<HashSet<String>>,
    /// Collection creations to reject before accepting one.
    creation_failures: AtomicU32,
    pub collections: Mutex<Vec<String>>,
    pub index_calls: AtomicU32,
    pub label_calls: AtomicU32,
    pub create_calls: AtomicU32,
    pub search_calls: AtomicU32,
    /// External image ids faces were indexed under.
    pub external_ids: Mutex<Vec<String>>,
}

impl FakeAnalysis {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_faces(&self, frame_key: &str, records: Vec<FaceRecord>) {
        self.faces.lock().unwrap().insert(frame_key.to_string(), records);
    }

    pub fn with_labels(&self, frame_key: &str, labels: Vec<DetectedLabel>) {
        self.labels.lock().unwrap().insert(frame_key.to_string(), labels);
    }

    pub fn fail_faces(&self, frame_key: &str) {
        self.failing_faces.lock().unwrap().insert(frame_key.to_string());
    }

    pub fn fail_labels(&self, frame_key: &str) {
        self.failing_labels.lock().unwrap().insert(frame_key.to_string());
    }

    /// Answer the next `times` index calls for `frame_key` with throttling.
    pub fn throttle_faces(&self, frame_key: &str, times: u32) {
        self.throttled_faces
            .lock()
            .unwrap()
            .insert(frame_key.to_string(), times);
    }

    /// Faces `collection_id` reports as similar to any searched image.
    pub fn with_matches(&self, collection_id: &str, found: &[(&str, &str, f64)]) {
        let found = found
            .iter()
            .map(|(face_id, external_image_id, similarity)| FaceMatch {
                similarity: *similarity,
                face: IndexedFace {
                    face_id: face_id.to_string(),
                    external_image_id: Some(external_image_id.to_string()),
                    confidence: 99.9,
                },
            })
            .collect();
        self.matches
            .lock()
            .unwrap()
            .insert(collection_id.to_string(), found);
    }

    pub fn fail_search(&self, collection_id: &str) {
        self.failing_collections
            .lock()
            .unwrap()
            .insert(collection_id.to_string());
    }

    pub fn reject_creations(&self, count: u32) {
        self.creation_failures.store(count, Ordering::SeqCst);
    }

    pub fn total_calls(&self) -> u32 {
        self.index_calls.load(Ordering::SeqCst) + self.label_calls.load(Ordering::SeqCst)
    }

    fn invalid_image(key: &str) -> AnalysisError {
        AnalysisError::Service {
            status: 400,
            code: "InvalidImageFormatException".to_string(),
            message: format!("cannot read {key}"),
        }
    }
}

#[async_trait]
impl AnalysisService for FakeAnalysis {
    async fn create_collection(&self, collection_id: &str) -> Result<(), AnalysisError> {
        // A real creation is a network round trip; let concurrent callers interleave.
        tokio::task::yield_now().await;
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.creation_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.creation_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(AnalysisError::Service {
                status: 400,
                code: "ResourceAlreadyExistsException".to_string(),
                message: format!("{collection_id} exists"),
            });
        }
        self.collections.lock().unwrap().push(collection_id.to_string());
        Ok(())
    }

    async fn index_faces(
        &self,
        image: &ImageRef,
        _collection_id: &str,
        external_image_id: &str,
    ) -> Result<IndexFacesResponse, AnalysisError> {
        self.index_calls.fetch_add(1, Ordering::SeqCst);
        self.external_ids
            .lock()
            .unwrap()
            .push(external_image_id.to_string());
        if self.failing_faces.lock().unwrap().contains(&image.key) {
            return Err(Self::invalid_image(&image.key));
        }
        if let Some(left) = self.throttled_faces.lock().unwrap().get_mut(&image.key) {
            if *left > 0 {
                *left -= 1;
                return Err(AnalysisError::Service {
                    status: 400,
                    code: "ThrottlingException".to_string(),
                    message: "Rate exceeded".to_string(),
                });
            }
        }
        Ok(IndexFacesResponse {
            face_records: self
                .faces
                .lock()
                .unwrap()
                .get(&image.key)
                .cloned()
                .unwrap_or_default(),
        })
    }

    async fn detect_labels(
        &self,
        image: &ImageRef,
        _min_confidence: f64,
        _max_labels: u32,
    ) -> Result<DetectLabelsResponse, AnalysisError> {
        self.label_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_labels.lock().unwrap().contains(&image.key) {
            return Err(Self::invalid_image(&image.key));
        }
        Ok(DetectLabelsResponse {
            labels: self
                .labels
                .lock()
                .unwrap()
                .get(&image.key)
                .cloned()
                .unwrap_or_default(),
        })
    }

    async fn search_faces_by_image(
        &self,
        image: &ImageRef,
        collection_id: &str,
        face_match_threshold: f64,
    ) -> Result<SearchFacesResponse, AnalysisError> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_collections.lock().unwrap().contains(collection_id) {
            return Err(Self::invalid_image(&image.key));
        }
        Ok(SearchFacesResponse {
            face_matches: self
                .matches
                .lock()
                .unwrap()
                .get(collection_id)
                .map(|found| {
                    found
                        .iter()
                        .filter(|m| m.similarity >= face_match_threshold)
                        .cloned()
                        .collect()
                })
                .unwrap_or_default(),
        })
    }
}

// ── Dispatch / notification / object store ───────────────────────────

#[derive(Default)]
pub struct RecordingDispatcher {
    pub messages: Mutex<Vec<DispatchMessage>>,
}

impl RecordingDispatcher {
    pub fn take(&self) -> Vec<DispatchMessage> {
        std::mem::take(&mut self.messages.lock().unwrap())
    }
}

#[async_trait]
impl Dispatcher for RecordingDispatcher {
    async fn dispatch(&self, message: &DispatchMessage) -> Result<(), QueueError> {
        self.messages.lock().unwrap().push(message.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub events: Mutex<Vec<ProgressEvent>>,
    pub milestones: Mutex<Vec<Milestone>>,
    pub results: Mutex<Vec<ResultNotice>>,
}

impl RecordingNotifier {
    pub fn take_events(&self) -> Vec<ProgressEvent> {
        std::mem::take(&mut self.events.lock().unwrap())
    }

    pub fn percentages(&self) -> Vec<u32> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| e.payload.percentage)
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn publish(&self, event: &ProgressEvent) -> Result<(), NotifyError> {
        if event.is_deliverable() {
            self.events.lock().unwrap().push(event.clone());
        }
        Ok(())
    }

    async fn milestone(&self, milestone: &Milestone) -> Result<(), NotifyError> {
        self.milestones.lock().unwrap().push(milestone.clone());
        Ok(())
    }

    async fn result(&self, notice: &ResultNotice) -> Result<(), NotifyError> {
        self.results.lock().unwrap().push(notice.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryObjectStore {
    pub objects: Mutex<HashMap<String, Vec<u8>>>,
    failing_puts: AtomicBool,
}

impl MemoryObjectStore {
    /// Reject every later `put`.
    pub fn fail_puts(&self) {
        self.failing_puts.store(true, Ordering::SeqCst);
    }

    pub fn insert(&self, key: &str, data: &[u8]) {
        self.objects.lock().unwrap().insert(key.to_string(), data.to_vec());
    }

    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(key).cloned()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        self.object(key)
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn put(&self, key: &str, data: &[u8], _content_type: &str) -> Result<(), StorageError> {
        if self.failing_puts.load(Ordering::SeqCst) {
            return Err(StorageError::Status {
                key: key.to_string(),
                status: 503,
            });
        }
        self.insert(key, data);
        Ok(())
    }

    fn bucket_name(&self) -> &str {
        BUCKET
    }
}

// ── Harness ──────────────────────────────────────────────────────────

pub fn test_cipher() -> ResultCipher {
    let key = base64::engine::general_purpose::STANDARD.encode([42u8; 32]);
    ResultCipher::new(&key).expect("valid test key")
}

/// Every collaborator wired the way the binaries wire them.
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub analysis: Arc<FakeAnalysis>,
    pub dispatcher: Arc<RecordingDispatcher>,
    pub notifier: Arc<RecordingNotifier>,
    pub objects: Arc<MemoryObjectStore>,
    pub cipher: Arc<ResultCipher>,
    pub shards: Arc<ShardAllocator>,
}

impl Harness {
    pub fn new(max_shard_size: i64) -> Self {
        let store = Arc::new(MemoryStore::new());
        let analysis = Arc::new(FakeAnalysis::new());
        let shards = Arc::new(ShardAllocator::new(
            store.clone(),
            analysis.clone(),
            FAMILY,
            "DVA-",
            max_shard_size,
        ));

        Self {
            store,
            analysis,
            dispatcher: Arc::new(RecordingDispatcher::default()),
            notifier: Arc::new(RecordingNotifier::default()),
            objects: Arc::new(MemoryObjectStore::default()),
            cipher: Arc::new(test_cipher()),
            shards,
        }
    }

    pub fn tracker(&self, max_concurrent_dispatches: u32) -> ProgressTracker {
        let timeline = TimelinePublisher::new(
            self.store.clone(),
            self.objects.clone(),
            self.cipher.clone(),
        );
        ProgressTracker::new(
            self.store.clone(),
            self.dispatcher.clone(),
            self.notifier.clone(),
            self.shards.clone(),
            Arc::new(timeline),
            TrackerSettings {
                max_concurrent_dispatches,
                analysis_stage: StageBounds::new(60.0, 90.0),
                search_stage: StageBounds::new(20.0, 95.0),
            },
        )
    }

    pub fn worker(&self) -> AnalysisWorker {
        AnalysisWorker::new(
            self.store.clone(),
            self.objects.clone(),
            self.analysis.clone(),
            self.shards.clone(),
            self.cipher.clone(),
            BackoffPolicy::new(2, Duration::ZERO),
            WorkerSettings {
                pool_width: 4,
                thresholds: Thresholds::default(),
                label_min_confidence: 90.0,
                max_labels: 10,
                results_prefix: "results".to_string(),
            },
        )
    }

    pub fn search_planner(&self) -> SearchPlanner {
        SearchPlanner::new(self.store.clone(), self.objects.clone(), self.shards.clone())
    }

    pub fn search_worker(&self) -> SearchWorker {
        SearchWorker::new(
            self.store.clone(),
            self.objects.clone(),
            self.analysis.clone(),
            BackoffPolicy::new(2, Duration::ZERO),
            SearchSettings {
                pool_width: 4,
                face_match_threshold: 85.0,
            },
        )
    }

    /// Insert a job and return the changes its creation produced.
    pub async fn create_job(&self, job: &JobRecord) -> Vec<ChangeRecord> {
        assert!(self.store.create_job(job).await.unwrap());
        self.store.take_changes()
    }
}
