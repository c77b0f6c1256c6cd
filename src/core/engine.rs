use crate::config::{Config, FailurePolicy};
use crate::core::comparator::{self, DiffResult, DiffSummary};
use crate::core::lister::RemoteLister;
use crate::core::progress::{
    self, ProgressChannel, ProgressEvent, ProgressReader, ProgressSink, ProgressUpdate,
    MSG_SCANNING, MSG_STOPPED,
};
use crate::core::scanner::{local_path, DirectoryScanner};
use crate::error::{Error, Result, UploadError, ValidationError};
use crate::storage::{ObjectStore, UploadProgress};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// 同时上传文件数的上限
pub const MAX_CONCURRENT_UPLOADS: usize = 4;

/// 同步配置（每次运行开始时从 Config 取快照）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// 最大并发上传数，1 表示顺序上传
    pub max_concurrent_uploads: usize,
    pub failure_policy: FailurePolicy,
    /// 是否删除远端多余对象
    pub allow_delete: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_concurrent_uploads: 1,
            failure_policy: FailurePolicy::Abort,
            allow_delete: false,
        }
    }
}

impl SyncConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_concurrent_uploads: config.max_concurrent_uploads,
            failure_policy: config.failure_policy,
            allow_delete: !config.no_delete,
        }
    }

    /// 实际使用的并发数
    pub fn concurrency(&self) -> usize {
        self.max_concurrent_uploads.clamp(1, MAX_CONCURRENT_UPLOADS)
    }
}

/// 一次同步请求
#[derive(Debug, Clone)]
pub struct SyncRequest {
    pub folder: PathBuf,
    pub bucket: String,
    pub config: SyncConfig,
}

impl SyncRequest {
    pub fn new(folder: impl Into<PathBuf>, bucket: impl Into<String>) -> Self {
        Self {
            folder: folder.into(),
            bucket: bucket.into(),
            config: SyncConfig::default(),
        }
    }

    pub fn with_config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// 从应用配置构造，缺少目录或 bucket 时返回校验错误
    pub fn from_config(config: &Config) -> std::result::Result<Self, ValidationError> {
        let folder = config
            .sync_folder
            .clone()
            .filter(|f| !f.as_os_str().is_empty())
            .ok_or(ValidationError::MissingFolder)?;
        let bucket = config
            .bucket_name
            .clone()
            .filter(|b| !b.trim().is_empty())
            .ok_or(ValidationError::MissingBucket)?;
        Ok(Self::new(folder, bucket).with_config(SyncConfig::from_config(config)))
    }

    fn validate(&self) -> std::result::Result<(), ValidationError> {
        if self.folder.as_os_str().is_empty() {
            return Err(ValidationError::MissingFolder);
        }
        if self.bucket.trim().is_empty() {
            return Err(ValidationError::MissingBucket);
        }
        if !self.folder.is_dir() {
            return Err(ValidationError::FolderNotFound(self.folder.clone()));
        }
        Ok(())
    }
}

/// 运行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Idle,
    Scanning,
    Syncing,
    Completed,
    Stopped,
    Error,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Completed | RunState::Stopped | RunState::Error)
    }
}

/// 一次同步运行的基本信息
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRun {
    pub id: Uuid,
    pub folder: PathBuf,
    pub bucket: String,
    pub provider: String,
    pub started_at: DateTime<Utc>,
}

/// 同步报告
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub run_id: Uuid,
    pub state: RunState,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub files_scanned: usize,
    pub remote_objects: usize,
    pub files_to_upload: usize,
    pub files_uploaded: usize,
    pub files_failed: usize,
    pub files_deleted: usize,
    pub total_size: u64,
    pub bytes_transferred: u64,
    pub errors: Vec<String>,
}

impl SyncReport {
    fn new(run: &SyncRun) -> Self {
        Self {
            run_id: run.id,
            state: RunState::Idle,
            started_at: run.started_at,
            finished_at: run.started_at,
            files_scanned: 0,
            remote_objects: 0,
            files_to_upload: 0,
            files_uploaded: 0,
            files_failed: 0,
            files_deleted: 0,
            total_size: 0,
            bytes_transferred: 0,
            errors: Vec::new(),
        }
    }

    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

/// 运行中的同步任务句柄
pub struct SyncHandle {
    run: SyncRun,
    cancel: CancellationToken,
    state: watch::Receiver<RunState>,
    progress: ProgressChannel,
    task: JoinHandle<SyncReport>,
}

impl SyncHandle {
    pub fn run(&self) -> &SyncRun {
        &self.run
    }

    /// 请求停止，已在传输的分块完成后生效
    pub fn stop(&self) {
        info!("请求停止同步: {}", self.run.id);
        self.cancel.cancel();
    }

    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> ProgressReader {
        self.progress.subscribe()
    }

    pub fn progress(&self) -> &ProgressChannel {
        &self.progress
    }

    /// 等待任务结束
    pub async fn wait(self) -> Result<SyncReport> {
        self.task
            .await
            .map_err(|e| Error::Task(format!("sync run {} failed: {}", self.run.id, e)))
    }
}

/// 预览结果
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Analysis {
    pub summary: DiffSummary,
    pub to_upload: Vec<String>,
    pub to_delete: Vec<String>,
}

type PairKey = (PathBuf, String);

/// 同步引擎
///
/// 维护活动运行表，同一 (目录, bucket) 同时只允许一个运行。
#[derive(Clone, Default)]
pub struct SyncEngine {
    active: Arc<Mutex<HashMap<PairKey, CancellationToken>>>,
}

impl SyncEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn pair_key(folder: &Path, bucket: &str) -> PairKey {
        let folder = std::fs::canonicalize(folder).unwrap_or_else(|_| folder.to_path_buf());
        (folder, bucket.to_string())
    }

    /// 指定目录和 bucket 是否有活动运行
    pub fn is_active(&self, folder: &Path, bucket: &str) -> bool {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&Self::pair_key(folder, bucket))
    }

    /// 停止指定目录和 bucket 的活动运行
    pub fn stop(&self, folder: &Path, bucket: &str) -> bool {
        let active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        match active.get(&Self::pair_key(folder, bucket)) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// 停止所有活动运行
    pub fn stop_all(&self) {
        let active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        for token in active.values() {
            token.cancel();
        }
    }

    /// 启动同步
    ///
    /// 参数校验同步完成，失败时不会启动任务；之后的所有结果都通过进度通道报告。
    pub fn start(
        &self,
        store: Arc<dyn ObjectStore>,
        request: SyncRequest,
    ) -> std::result::Result<SyncHandle, ValidationError> {
        request.validate()?;

        let key = Self::pair_key(&request.folder, &request.bucket);
        let cancel = CancellationToken::new();
        {
            let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
            if active.contains_key(&key) {
                return Err(ValidationError::AlreadyRunning {
                    folder: request.folder.clone(),
                    bucket: request.bucket.clone(),
                });
            }
            active.insert(key.clone(), cancel.clone());
        }

        // 任务结束（包括被中止）时释放占用
        let registry = self.active.clone();
        let slot = scopeguard::guard(key, move |key| {
            registry
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&key);
        });

        let run = SyncRun {
            id: Uuid::new_v4(),
            folder: request.folder.clone(),
            bucket: request.bucket.clone(),
            provider: store.name().to_string(),
            started_at: Utc::now(),
        };
        info!(
            "启动同步 {}: {:?} -> {} ({})",
            run.id, run.folder, run.bucket, run.provider
        );

        let (sink, progress) = progress::channel();
        let (state_tx, state_rx) = watch::channel(RunState::Idle);
        let runner = Runner {
            run: run.clone(),
            store,
            config: request.config,
            cancel: cancel.clone(),
            sink: Arc::new(sink),
            state: state_tx,
            report: SyncReport::new(&run),
        };

        let task = tokio::spawn(async move {
            let _slot = slot;
            runner.execute().await
        });

        Ok(SyncHandle {
            run,
            cancel,
            state: state_rx,
            progress,
            task,
        })
    }

    /// 预览需要上传/删除的文件，不执行任何写操作
    pub async fn analyze(
        &self,
        store: Arc<dyn ObjectStore>,
        request: &SyncRequest,
    ) -> Result<Analysis> {
        request.validate()?;

        let scanner = DirectoryScanner::new();
        let lister = RemoteLister::new(store);
        let (local, remote) = tokio::join!(
            scanner.scan(&request.folder),
            lister.list(&request.bucket, "")
        );
        let (local, remote) = (local?, remote?);

        let diff = comparator::diff(&local, &remote, request.config.allow_delete);
        let summary = comparator::summarize(&local, &remote, &diff);
        info!(
            "分析完成: 新增 {}, 变更 {}, 删除 {}",
            summary.new_count, summary.changed_count, summary.delete_count
        );

        Ok(Analysis {
            summary,
            to_upload: diff.to_upload.into_iter().collect(),
            to_delete: diff.to_delete.into_iter().collect(),
        })
    }
}

/// 传输统计
#[derive(Debug, Default)]
struct TransferStats {
    files_uploaded: AtomicUsize,
    bytes_transferred: AtomicU64,
    failures: Mutex<Vec<String>>,
    /// 累计字节的更新和进度事件的发送在同一把锁内，保证百分比单调
    emit: Mutex<()>,
}

/// 单个文件的进度回调
struct FileProgress {
    sink: Arc<ProgressSink>,
    cancel: CancellationToken,
    stats: Arc<TransferStats>,
    key: String,
    file_index: usize,
    file_size: u64,
    total_files: usize,
    total_size: u64,
    file_bytes: AtomicU64,
}

fn percent(done: u64, total: u64) -> f64 {
    if total == 0 {
        100.0
    } else {
        (done as f64 / total as f64 * 100.0).min(100.0)
    }
}

impl FileProgress {
    /// 上传成功：存储端少报的字节补齐到文件大小
    fn complete(&self) {
        if self.file_bytes.load(Ordering::SeqCst) < self.file_size {
            self.on_bytes(self.file_size);
        }
        self.stats.files_uploaded.fetch_add(1, Ordering::SeqCst);
    }

    /// 上传失败或取消：撤回该文件已计入的字节
    fn rollback(&self) {
        let _emit = self.stats.emit.lock().unwrap_or_else(|e| e.into_inner());
        let sent = self.file_bytes.swap(0, Ordering::SeqCst);
        if sent > 0 {
            self.stats
                .bytes_transferred
                .fetch_sub(sent, Ordering::SeqCst);
            debug!("撤回未完成文件的字节: {} ({} 字节)", self.key, sent);
        }
    }
}

impl UploadProgress for FileProgress {
    fn on_bytes(&self, transferred: u64) {
        let _emit = self.stats.emit.lock().unwrap_or_else(|e| e.into_inner());
        let previous = self.file_bytes.swap(transferred, Ordering::SeqCst);
        let delta = transferred.saturating_sub(previous);
        let cumulative = self.stats.bytes_transferred.fetch_add(delta, Ordering::SeqCst) + delta;

        self.sink.send(ProgressEvent::Progress(ProgressUpdate {
            percent: percent(cumulative, self.total_size),
            file_percent: percent(transferred, self.file_size),
            current_file: self.key.clone(),
            file_index: self.file_index,
            total_files: self.total_files,
            total_size: self.total_size,
            bytes_transferred: cumulative,
        }));
    }

    fn should_abort(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// 单次运行的执行体，运行在独立的 tokio 任务中
struct Runner {
    run: SyncRun,
    store: Arc<dyn ObjectStore>,
    config: SyncConfig,
    cancel: CancellationToken,
    sink: Arc<ProgressSink>,
    state: watch::Sender<RunState>,
    report: SyncReport,
}

impl Runner {
    fn set_state(&self, state: RunState) {
        debug!("同步 {} 状态: {:?}", self.run.id, state);
        self.state.send_replace(state);
    }

    /// 进入终止状态并发送唯一的终止事件
    fn finish(mut self, state: RunState, event: ProgressEvent) -> SyncReport {
        match &event {
            ProgressEvent::Error(message) => error!("同步 {} 失败: {}", self.run.id, message),
            ProgressEvent::Stopped(_) => info!("同步 {} 已停止", self.run.id),
            _ => info!(
                "同步 {} 完成: 上传 {} 个文件, {} 字节",
                self.run.id, self.report.files_uploaded, self.report.bytes_transferred
            ),
        }

        self.set_state(state);
        self.sink.send(event);
        self.report.state = state;
        self.report.finished_at = Utc::now();
        self.report
    }

    fn stopped(self) -> SyncReport {
        self.finish(RunState::Stopped, ProgressEvent::Stopped(MSG_STOPPED.to_string()))
    }

    async fn execute(mut self) -> SyncReport {
        self.set_state(RunState::Scanning);
        self.sink.send(ProgressEvent::status(MSG_SCANNING));

        let scanner = DirectoryScanner::with_cancel(self.cancel.clone());
        let lister = RemoteLister::new(self.store.clone());
        // 分页列表可能很长，停止请求到达时不等它结束
        let listing = async {
            tokio::select! {
                _ = self.cancel.cancelled() => None,
                result = lister.list(&self.run.bucket, "") => Some(result),
            }
        };
        let (local, remote) = tokio::join!(scanner.scan(&self.run.folder), listing);

        if self.cancel.is_cancelled() {
            return self.stopped();
        }
        let Some(remote) = remote else {
            return self.stopped();
        };
        let local = match local {
            Ok(local) => local,
            Err(e) => {
                let message = format!("Failed to scan {}: {}", self.run.folder.display(), e);
                return self.finish(RunState::Error, ProgressEvent::Error(message));
            }
        };
        let remote = match remote {
            Ok(remote) => remote,
            Err(e) => {
                let message = format!("Failed to list bucket {}: {}", self.run.bucket, e);
                return self.finish(RunState::Error, ProgressEvent::Error(message));
            }
        };

        let diff = comparator::diff(&local, &remote, self.config.allow_delete);
        let total_size: u64 = diff
            .to_upload
            .iter()
            .filter_map(|key| local.get(key))
            .sum();
        self.report.files_scanned = local.len();
        self.report.remote_objects = remote.len();
        self.report.files_to_upload = diff.to_upload.len();
        self.report.total_size = total_size;

        if diff.is_empty() {
            info!("没有需要同步的文件");
            return self.finish(
                RunState::Completed,
                ProgressEvent::Completed {
                    total_files: 0,
                    total_size: 0,
                },
            );
        }

        self.set_state(RunState::Syncing);
        self.sink.send(ProgressEvent::status(format!(
            "Found {} files to upload",
            diff.to_upload.len()
        )));

        let stats = self.upload_all(&diff, &local, total_size).await;
        self.report.files_uploaded = stats.files_uploaded.load(Ordering::SeqCst);
        self.report.bytes_transferred = stats.bytes_transferred.load(Ordering::SeqCst);
        let failures = std::mem::take(&mut *stats.failures.lock().unwrap_or_else(|e| e.into_inner()));
        self.report.files_failed = failures.len();
        self.report.errors.extend(failures.iter().cloned());

        if self.cancel.is_cancelled() {
            return self.stopped();
        }
        if !failures.is_empty() {
            let message = match self.config.failure_policy {
                FailurePolicy::Abort => failures[0].clone(),
                FailurePolicy::Continue => format!(
                    "{} of {} files failed to upload: {}",
                    failures.len(),
                    diff.to_upload.len(),
                    failures.join("; ")
                ),
            };
            return self.finish(RunState::Error, ProgressEvent::Error(message));
        }

        if !diff.to_delete.is_empty() {
            if let Err(message) = self.delete_orphans(&diff).await {
                if self.cancel.is_cancelled() {
                    return self.stopped();
                }
                return self.finish(RunState::Error, ProgressEvent::Error(message));
            }
        }

        let total_files = diff.to_upload.len();
        self.finish(
            RunState::Completed,
            ProgressEvent::Completed {
                total_files,
                total_size,
            },
        )
    }

    /// 上传所有差异文件
    ///
    /// 信号量限制并发；中止策略下第一个失败会阻止后续文件开始，已在传输的文件继续完成。
    async fn upload_all(
        &self,
        diff: &DiffResult,
        local: &HashMap<String, u64>,
        total_size: u64,
    ) -> Arc<TransferStats> {
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency()));
        let stats = Arc::new(TransferStats::default());
        // 只控制是否开始新文件；用户停止会同时取消它
        let batch = self.cancel.child_token();
        let total_files = diff.to_upload.len();
        let mut handles = Vec::with_capacity(total_files);

        for (index, key) in diff.to_upload.iter().enumerate() {
            if batch.is_cancelled() {
                break;
            }
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            if batch.is_cancelled() {
                break;
            }

            let file_size = local.get(key).copied().unwrap_or(0);
            let progress = FileProgress {
                sink: self.sink.clone(),
                cancel: self.cancel.clone(),
                stats: stats.clone(),
                key: key.clone(),
                file_index: index + 1,
                file_size,
                total_files,
                total_size,
                file_bytes: AtomicU64::new(0),
            };
            let store = self.store.clone();
            let bucket = self.run.bucket.clone();
            let path = local_path(&self.run.folder, key);
            let policy = self.config.failure_policy;
            let batch = batch.clone();

            handles.push(tokio::spawn(async move {
                let key = progress.key.clone();
                debug!("上传 [{}/{}]: {}", progress.file_index, total_files, key);

                match store.upload_object(&bucket, &key, &path, &progress).await {
                    Ok(()) => progress.complete(),
                    Err(UploadError::Cancelled(_)) => {
                        debug!("上传已取消: {}", key);
                        progress.rollback();
                    }
                    Err(e) => {
                        progress.rollback();
                        let detail = match &e {
                            UploadError::Transfer { source, .. } => source.to_string(),
                            other => other.to_string(),
                        };
                        let message = format!("Failed to upload {}: {}", key, detail);
                        error!("{}", message);
                        progress.sink.send(ProgressEvent::status(message.clone()));
                        progress
                            .stats
                            .failures
                            .lock()
                            .unwrap_or_else(|e| e.into_inner())
                            .push(message);
                        if policy == FailurePolicy::Abort {
                            batch.cancel();
                        }
                    }
                }

                drop(permit);
            }));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                error!("上传任务异常退出: {}", e);
                stats
                    .failures
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .push(format!("upload task failed: {}", e));
            }
        }

        stats
    }

    /// 删除远端多余对象（上传全部成功后执行）
    async fn delete_orphans(&mut self, diff: &DiffResult) -> std::result::Result<(), String> {
        info!("删除远端多余对象: {} 个", diff.to_delete.len());
        let mut failures = Vec::new();

        for key in &diff.to_delete {
            if self.cancel.is_cancelled() {
                return Err(MSG_STOPPED.to_string());
            }
            match self.store.delete_object(&self.run.bucket, key).await {
                Ok(()) => {
                    debug!("已删除: {}", key);
                    self.report.files_deleted += 1;
                }
                Err(e) => {
                    let message = format!("Failed to delete {}: {}", key, e);
                    warn!("{}", message);
                    self.sink.send(ProgressEvent::status(message.clone()));
                    failures.push(message);
                    if self.config.failure_policy == FailurePolicy::Abort {
                        break;
                    }
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            self.report.errors.extend(failures.iter().cloned());
            Err(failures.join("; "))
        }
    }
}
