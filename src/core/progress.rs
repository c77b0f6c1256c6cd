//! 同步进度通道
//!
//! 一个写端（同步任务持有的 [`ProgressSink`]），任意多个读端。终止事件
//! （完成/停止/错误）会被保留，直到调用方确认，读端即使错过广播也能取到。

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// 广播缓冲容量，读端落后太多时会丢失中间的进度事件
pub const CHANNEL_CAPACITY: usize = 1024;

pub const MSG_SCANNING: &str = "Scanning for changes...";
pub const MSG_STOPPED: &str = "Sync stopped by user";
pub const MSG_COMPLETED: &str = "Sync completed successfully";

/// 单个文件的上传进度
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    /// 全部文件的累计百分比
    pub percent: f64,
    /// 当前文件的百分比
    pub file_percent: f64,
    pub current_file: String,
    /// 当前文件序号（从 1 开始）
    pub file_index: usize,
    pub total_files: usize,
    pub total_size: u64,
    pub bytes_transferred: u64,
}

/// 进度事件
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Status(String),
    Progress(ProgressUpdate),
    Completed { total_files: usize, total_size: u64 },
    Error(String),
    Stopped(String),
}

impl ProgressEvent {
    pub fn status(message: impl Into<String>) -> Self {
        ProgressEvent::Status(message.into())
    }

    /// 是否为终止事件
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProgressEvent::Completed { .. } | ProgressEvent::Error(_) | ProgressEvent::Stopped(_)
        )
    }

    /// 转为对外的 JSON 记录
    pub fn to_record(&self) -> ProgressRecord {
        match self {
            ProgressEvent::Status(message) => ProgressRecord {
                kind: "status".to_string(),
                message: message.clone(),
                ..Default::default()
            },
            ProgressEvent::Progress(update) => ProgressRecord {
                kind: "progress".to_string(),
                message: format!("Uploading {}", file_name(&update.current_file)),
                progress: Some(round1(update.percent)),
                details: Some(ProgressDetails {
                    current_file: Some(update.current_file.clone()),
                    file_index: Some(update.file_index),
                    total_files: Some(update.total_files),
                    total_size: Some(update.total_size),
                    bytes_transferred: Some(update.bytes_transferred),
                    file_progress: Some(round1(update.file_percent)),
                    size: Some(format_size(update.total_size)),
                }),
                state: None,
            },
            ProgressEvent::Completed {
                total_files,
                total_size,
            } => ProgressRecord {
                kind: "completed".to_string(),
                message: MSG_COMPLETED.to_string(),
                progress: Some(100.0),
                details: Some(ProgressDetails {
                    total_files: Some(*total_files),
                    total_size: Some(*total_size),
                    size: Some(format_size(*total_size)),
                    ..Default::default()
                }),
                state: Some("completed".to_string()),
            },
            ProgressEvent::Error(message) => ProgressRecord {
                kind: "error".to_string(),
                message: message.clone(),
                state: Some("error".to_string()),
                ..Default::default()
            },
            ProgressEvent::Stopped(message) => ProgressRecord {
                kind: "status".to_string(),
                message: message.clone(),
                state: Some("stopped".to_string()),
                ..Default::default()
            },
        }
    }
}

/// 对外的进度记录
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRecord {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<ProgressDetails>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_files: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes_transferred: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_progress: Option<f64>,
    /// 人类可读的大小
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn file_name(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

/// 格式化字节数
pub fn format_size(size: u64) -> String {
    let mut size = size as f64;
    for unit in ["B", "KB", "MB", "GB", "TB"] {
        if size < 1024.0 {
            return format!("{:.1} {}", size, unit);
        }
        size /= 1024.0;
    }
    format!("{:.1} PB", size)
}

struct Shared {
    /// 写端关闭后置为 None，读端随之收到关闭
    sender: Mutex<Option<broadcast::Sender<ProgressEvent>>>,
    terminal: Mutex<Option<ProgressEvent>>,
    finished: AtomicBool,
}

/// 创建进度通道
pub fn channel() -> (ProgressSink, ProgressChannel) {
    let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
    let shared = Arc::new(Shared {
        sender: Mutex::new(Some(sender)),
        terminal: Mutex::new(None),
        finished: AtomicBool::new(false),
    });
    (
        ProgressSink {
            shared: shared.clone(),
        },
        ProgressChannel { shared },
    )
}

/// 写端
pub struct ProgressSink {
    shared: Arc<Shared>,
}

impl ProgressSink {
    /// 发布事件；终止事件之后的任何事件都会被丢弃
    pub fn send(&self, event: ProgressEvent) {
        if self.shared.finished.load(Ordering::SeqCst) {
            warn!("同步已结束，丢弃事件: {:?}", event);
            return;
        }

        if event.is_terminal() {
            if self.shared.finished.swap(true, Ordering::SeqCst) {
                warn!("同步已结束，丢弃事件: {:?}", event);
                return;
            }
            *self
                .shared
                .terminal
                .lock()
                .unwrap_or_else(|e| e.into_inner()) = Some(event.clone());
        }

        let sender = self.shared.sender.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(sender) = sender.as_ref() {
            // 没有读端时发送失败，属于正常情况
            let _ = sender.send(event);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.shared.finished.load(Ordering::SeqCst)
    }
}

impl Drop for ProgressSink {
    fn drop(&mut self) {
        self.shared
            .sender
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        debug!("进度通道写端已关闭");
    }
}

/// 读端工厂，可克隆
#[derive(Clone)]
pub struct ProgressChannel {
    shared: Arc<Shared>,
}

impl ProgressChannel {
    pub fn subscribe(&self) -> ProgressReader {
        let receiver = self
            .shared
            .sender
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|s| s.subscribe());
        ProgressReader {
            shared: self.shared.clone(),
            receiver,
            saw_terminal: false,
        }
    }

    /// 保留的终止事件
    pub fn terminal(&self) -> Option<ProgressEvent> {
        self.shared
            .terminal
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// 确认并清除保留的终止事件
    pub fn acknowledge(&self) -> Option<ProgressEvent> {
        self.shared
            .terminal
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }

    pub fn is_finished(&self) -> bool {
        self.shared.finished.load(Ordering::SeqCst)
    }
}

/// 读端
pub struct ProgressReader {
    shared: Arc<Shared>,
    receiver: Option<broadcast::Receiver<ProgressEvent>>,
    saw_terminal: bool,
}

impl ProgressReader {
    fn observe(&mut self, event: ProgressEvent) -> ProgressEvent {
        if event.is_terminal() {
            self.saw_terminal = true;
        }
        event
    }

    /// 通道关闭后补发错过的终止事件（每个读端最多一次）
    fn missed_terminal(&mut self) -> Option<ProgressEvent> {
        if self.saw_terminal {
            return None;
        }
        self.saw_terminal = true;
        self.terminal()
    }

    /// 非阻塞地取出当前所有事件
    pub fn drain(&mut self) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        let mut closed = self.receiver.is_none();

        if let Some(receiver) = self.receiver.as_mut() {
            loop {
                match receiver.try_recv() {
                    Ok(event) => events.push(event),
                    Err(broadcast::error::TryRecvError::Lagged(n)) => {
                        debug!("进度读端落后，跳过 {} 个事件", n);
                    }
                    Err(broadcast::error::TryRecvError::Empty) => break,
                    Err(broadcast::error::TryRecvError::Closed) => {
                        closed = true;
                        break;
                    }
                }
            }
        }

        let mut events: Vec<ProgressEvent> =
            events.into_iter().map(|e| self.observe(e)).collect();
        if closed {
            events.extend(self.missed_terminal());
        }
        events
    }

    /// 等待下一个事件，通道关闭且终止事件已交付后返回 None
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        if let Some(receiver) = self.receiver.as_mut() {
            loop {
                match receiver.recv().await {
                    Ok(event) => return Some(self.observe(event)),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        debug!("进度读端落后，跳过 {} 个事件", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
        self.missed_terminal()
    }

    /// 保留的终止事件
    pub fn terminal(&self) -> Option<ProgressEvent> {
        self.shared
            .terminal
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}
