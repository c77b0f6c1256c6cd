//! 日志模块 - 文件日志（按大小轮转）和控制台输出

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

pub const LOG_FILE: &str = "app.log";

/// 日志配置（config.json 的 `log` 段）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// 单个日志文件的最大大小（MB）
    #[serde(default = "default_max_size_mb")]
    pub max_size_mb: u32,
    /// "error", "warn", "info", "debug", "trace"
    #[serde(default = "default_level")]
    pub level: String,
}

fn default_enabled() -> bool {
    true
}

fn default_max_size_mb() -> u32 {
    5
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            max_size_mb: default_max_size_mb(),
            level: default_level(),
        }
    }
}

impl LogConfig {
    /// 从 config.json 读取，缺失或无法解析时使用默认值
    pub fn load(config_dir: &Path) -> Self {
        fs::read_to_string(config_dir.join("config.json"))
            .ok()
            .and_then(|content| serde_json::from_str::<serde_json::Value>(&content).ok())
            .and_then(|config| config.get("log").cloned())
            .and_then(|log| serde_json::from_value(log).ok())
            .unwrap_or_default()
    }

    /// 写回 config.json，其余字段保持不变
    pub fn save(&self, config_dir: &Path) -> Result<()> {
        let config_file = config_dir.join("config.json");
        let mut config: serde_json::Value = match fs::read_to_string(&config_file) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|_| serde_json::json!({})),
            Err(_) => serde_json::json!({}),
        };
        if !config.is_object() {
            config = serde_json::json!({});
        }

        config["log"] = serde_json::to_value(self)?;
        fs::create_dir_all(config_dir)?;
        fs::write(&config_file, serde_json::to_string_pretty(&config)?)?;
        Ok(())
    }

    pub fn tracing_level(&self) -> tracing::Level {
        match self.level.to_lowercase().as_str() {
            "error" => tracing::Level::ERROR,
            "warn" => tracing::Level::WARN,
            "debug" => tracing::Level::DEBUG,
            "trace" => tracing::Level::TRACE,
            _ => tracing::Level::INFO,
        }
    }
}

struct RotatingFile {
    path: PathBuf,
    max_size: u64,
    written: u64,
    writer: Option<BufWriter<File>>,
}

impl RotatingFile {
    fn open(path: &Path, max_size: u64) -> io::Result<Self> {
        let mut written = fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        if written > max_size {
            rotate(path)?;
            written = 0;
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            max_size,
            written,
            writer: Some(BufWriter::new(file)),
        })
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| io::Error::other("log writer not available"))?;
        let n = writer.write(buf)?;
        writer.flush()?;
        self.written += n as u64;

        if self.written > self.max_size {
            if let Some(mut old) = self.writer.take() {
                let _ = old.flush();
            }
            rotate(&self.path)?;
            *self = Self::open(&self.path, self.max_size)?;
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.writer.as_mut() {
            Some(writer) => writer.flush(),
            None => Ok(()),
        }
    }
}

/// `app.log` -> `app.log.old`，旧备份被覆盖
fn rotate(path: &Path) -> io::Result<()> {
    let backup = path.with_extension("log.old");
    if backup.exists() {
        fs::remove_file(&backup)?;
    }
    fs::rename(path, &backup)
}

/// 带大小限制的日志写入器
#[derive(Clone)]
pub struct SizeRotatingWriter {
    file: Arc<Mutex<RotatingFile>>,
}

impl SizeRotatingWriter {
    pub fn new(log_dir: &Path, max_size_mb: u32) -> io::Result<Self> {
        fs::create_dir_all(log_dir)?;
        let max_size = u64::from(max_size_mb.max(1)) * 1024 * 1024;
        let file = RotatingFile::open(&log_dir.join(LOG_FILE), max_size)?;
        Ok(Self {
            file: Arc::new(Mutex::new(file)),
        })
    }
}

/// 单次写入的句柄
pub struct LogWriter {
    file: Arc<Mutex<RotatingFile>>,
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file
            .lock()
            .map_err(|_| io::Error::other("log writer poisoned"))?
            .write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file
            .lock()
            .map_err(|_| io::Error::other("log writer poisoned"))?
            .flush()
    }
}

impl<'a> MakeWriter<'a> for SizeRotatingWriter {
    type Writer = LogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogWriter {
            file: self.file.clone(),
        }
    }
}

/// 初始化全局日志
///
/// 文件层始终启用（除非配置关闭）；`console` 为 true 或 debug 构建时同时输出到终端。
/// `RUST_LOG` 可以覆盖配置中的级别。
pub fn init_logging(log_dir: &Path, console: bool) {
    let config = LogConfig::load(log_dir);
    if !config.enabled {
        let _ = tracing::subscriber::set_global_default(tracing_subscriber::registry());
        return;
    }

    let mut env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(config.tracing_level()).into())
        .from_env_lossy();
    for directive in ["opendal=warn", "reqwest=warn", "hyper=warn"] {
        if let Ok(directive) = directive.parse() {
            env_filter = env_filter.add_directive(directive);
        }
    }

    let file_layer = match SizeRotatingWriter::new(log_dir, config.max_size_mb) {
        Ok(writer) => Some(
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false),
        ),
        Err(e) => {
            eprintln!("无法创建日志文件 {:?}: {}", log_dir, e);
            None
        }
    };

    let console_layer = (console || cfg!(debug_assertions) || file_layer.is_none()).then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(io::stderr)
            .with_target(false)
    });

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer);
    let _ = tracing::subscriber::set_global_default(subscriber);
}
