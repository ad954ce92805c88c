//! Worker process lifecycle management.
//!
//! Spawns the model worker once with its fixed arguments and kills it when
//! the manager is dropped. A worker that exits is not restarted: commands it
//! had accepted cannot be replayed safely.

use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::Mutex;

use crate::web::error::WorkerError;
use crate::{sys_info, sys_warn};

/// How to launch the worker.
#[derive(Debug, Clone)]
pub struct WorkerSpec {
    pub program: String,
    pub script: String,
    pub working_dir: Option<PathBuf>,
    pub model_path: String,
    pub segmentation_model_path: String,
    pub cache_dir_path: PathBuf,
}

impl WorkerSpec {
    /// Arguments passed after the program name.
    pub fn args(&self) -> Vec<String> {
        vec![
            self.script.clone(),
            "-c".to_string(),
            self.model_path.clone(),
            "-s".to_string(),
            self.segmentation_model_path.clone(),
            "--cache-dir-path".to_string(),
            self.cache_dir_path.display().to_string(),
        ]
    }
}

/// Manages the worker child process lifecycle.
pub struct ProcessManager {
    child: Mutex<Option<Child>>,
}

impl ProcessManager {
    /// Spawn the worker process.
    pub fn spawn(spec: &WorkerSpec) -> Result<Self, WorkerError> {
        let child = spawn_worker(spec)?;
        sys_info!("[PROCESS_MGR] Worker started (pid={})", child.id());
        Ok(Self {
            child: Mutex::new(Some(child)),
        })
    }

    /// Take the child's stdin handle for writing commands.
    pub fn take_stdin(&self) -> Option<ChildStdin> {
        self.child
            .lock()
            .ok()
            .and_then(|mut guard| guard.as_mut().and_then(|c| c.stdin.take()))
    }

    /// Take the child's stdout handle for reading responses.
    pub fn take_stdout(&self) -> Option<ChildStdout> {
        self.child
            .lock()
            .ok()
            .and_then(|mut guard| guard.as_mut().and_then(|c| c.stdout.take()))
    }

    /// Whether the child is still running.
    pub fn is_alive(&self) -> bool {
        let Ok(mut guard) = self.child.lock() else {
            return false;
        };
        match guard.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Kill the worker process and reap it.
    pub fn kill(&self) {
        if let Ok(mut guard) = self.child.lock() {
            if let Some(mut child) = guard.take() {
                sys_info!("[PROCESS_MGR] Killing worker process (pid={})", child.id());
                if let Err(e) = child.kill() {
                    // Already exited.
                    sys_warn!("[PROCESS_MGR] Kill failed: {e}");
                }
                if let Err(e) = child.wait() {
                    sys_warn!("[PROCESS_MGR] Failed to reap worker: {e}");
                }
            }
        }
    }
}

impl Drop for ProcessManager {
    fn drop(&mut self) {
        self.kill();
    }
}

fn spawn_worker(spec: &WorkerSpec) -> Result<Child, WorkerError> {
    sys_info!(
        "[PROCESS_MGR] Spawning worker: {} {}",
        spec.program,
        spec.args().join(" ")
    );

    let mut command = Command::new(&spec.program);
    command
        .args(spec.args())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit()); // Worker logs go to parent's stderr
    if let Some(dir) = &spec.working_dir {
        command.current_dir(dir);
    }
    command.spawn().map_err(WorkerError::Spawn)
}
