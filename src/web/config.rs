// Server configuration: command-line flags, each also settable from the environment

use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use log::LevelFilter;

use super::cache::CacheSettings;
use super::worker::process_manager::WorkerSpec;

#[derive(Parser, Debug, Clone)]
#[command(name = "xray_classifier_web", about = "Covid-19 Classification API")]
pub struct ServerConfig {
    /// Path to the classification model
    #[arg(short = 'c', long, env = "XRAY_MODEL_PATH")]
    pub model_path: String,

    /// Path to the lung segmentation model
    #[arg(short = 's', long, env = "XRAY_SEGMENTATION_MODEL_PATH")]
    pub segmentation_model_path: String,

    /// Directory holding uploaded images (`<id>.png`), shared with the worker
    #[arg(long, env = "XRAY_CACHE_DIR_PATH")]
    pub cache_dir_path: PathBuf,

    /// Directory holding `queue.json` and training images
    #[arg(long, env = "XRAY_TRAINING_QUEUE_DIR_PATH", default_value = "training_queue")]
    pub training_queue_dir_path: PathBuf,

    /// Disable the response cache
    #[arg(long, env = "XRAY_DISABLE_API_CACHE")]
    pub disable_api_cache: bool,

    /// Lifetime of cached classification responses, in minutes
    #[arg(long, env = "XRAY_API_CACHE_LIFETIME", default_value_t = 5)]
    pub api_cache_lifetime: u64,

    /// Lifetime of cached explanation images, in minutes (defaults to --api-cache-lifetime)
    #[arg(long, env = "XRAY_EXPLAINER_CACHE_LIFETIME")]
    pub explainer_cache_lifetime: Option<u64>,

    #[arg(short = 'p', long, env = "XRAY_PORT", default_value_t = 3000)]
    pub port: u16,

    #[arg(long, env = "XRAY_HOST", default_value = "localhost")]
    pub host: String,

    /// Interpreter used to run the worker
    #[arg(long, env = "XRAY_WORKER_PROGRAM", default_value = "python")]
    pub worker_program: String,

    /// Worker script passed to the interpreter
    #[arg(long, env = "XRAY_WORKER_SCRIPT", default_value = "server.py")]
    pub worker_script: String,

    /// Worker working directory; relative explanation paths resolve against it
    #[arg(long, env = "XRAY_WORKER_DIR")]
    pub worker_dir: Option<PathBuf>,

    /// Seconds to wait for a worker answer (0 waits forever)
    #[arg(long, env = "XRAY_WORKER_TIMEOUT", default_value_t = 300)]
    pub worker_timeout: u64,

    /// Maximum accepted image upload, in megabytes
    #[arg(long, env = "XRAY_MAX_UPLOAD_MB", default_value_t = 10)]
    pub max_upload_mb: usize,

    #[arg(long, env = "XRAY_LOG_LEVEL", default_value = "info")]
    pub log_level: LevelFilter,

    /// Also write logs to this file
    #[arg(long, env = "XRAY_LOG_FILE")]
    pub log_file: Option<String>,
}

impl ServerConfig {
    pub fn cache_settings(&self) -> CacheSettings {
        let minutes = |m: u64| Duration::from_secs(m * 60);
        CacheSettings {
            enabled: !self.disable_api_cache,
            classification_ttl: minutes(self.api_cache_lifetime),
            explanation_ttl: minutes(self.explainer_cache_lifetime.unwrap_or(self.api_cache_lifetime)),
        }
    }

    pub fn worker_spec(&self) -> WorkerSpec {
        WorkerSpec {
            program: self.worker_program.clone(),
            script: self.worker_script.clone(),
            working_dir: self.worker_dir.clone(),
            model_path: self.model_path.clone(),
            segmentation_model_path: self.segmentation_model_path.clone(),
            cache_dir_path: self.cache_dir_path.clone(),
        }
    }

    pub fn worker_timeout(&self) -> Option<Duration> {
        (self.worker_timeout > 0).then(|| Duration::from_secs(self.worker_timeout))
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb.saturating_mul(1024 * 1024)
    }

    /// Base directory for relative paths the worker reports.
    pub fn worker_base_dir(&self) -> PathBuf {
        self.worker_dir.clone().unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn listen_addr(&self) -> std::io::Result<SocketAddr> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::AddrNotAvailable,
                    format!("cannot resolve {}:{}", self.host, self.port),
                )
            })
    }
}
