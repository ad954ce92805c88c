//! Server-side channel to the worker process.
//!
//! Owns the stdin/stdout pipes: commands are written one per line by a
//! writer task, and the reader splits stdout into lines and hands each
//! parsed reply to the correlator. When either pipe fails the worker is
//! considered gone for good.

use std::io::{BufRead, BufReader, Read, Write};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use super::correlator::{RequestCorrelator, SharedCorrelator};
use super::ipc_types::{WorkerCommand, WorkerReply};
use super::process_manager::ProcessManager;
use crate::web::error::WorkerError;
use crate::{sys_debug, sys_error, sys_info, sys_warn};

/// Server-side handle to the worker process.
pub struct WorkerChannel {
    correlator: SharedCorrelator,
    process_manager: Arc<ProcessManager>,
}

impl WorkerChannel {
    /// Take the worker's pipes and start the IO tasks.
    pub fn connect(
        process_manager: Arc<ProcessManager>,
        timeout: Option<Duration>,
    ) -> Result<Self, WorkerError> {
        let stdin = process_manager
            .take_stdin()
            .ok_or(WorkerError::Unavailable)?;
        let stdout = process_manager
            .take_stdout()
            .ok_or(WorkerError::Unavailable)?;

        let correlator = attach(stdin, stdout, timeout);
        Ok(Self {
            correlator,
            process_manager,
        })
    }

    pub fn correlator(&self) -> SharedCorrelator {
        self.correlator.clone()
    }

    /// Running and still answering: the pipes are intact and the process
    /// has not exited.
    pub fn is_alive(&self) -> bool {
        !self.correlator.is_broken() && self.process_manager.is_alive()
    }

    /// Fail everything still waiting on the worker, then kill it.
    pub async fn shutdown(&self) {
        self.correlator.mark_broken().await;
        let pm = self.process_manager.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || pm.kill()).await {
            sys_error!("[BRIDGE] Kill task failed: {e}");
        }
    }
}

/// Wire a correlator to an arbitrary pair of pipes.
///
/// Spawns the writer task and the reader; must be called inside a tokio
/// runtime.
pub fn attach<W, R>(stdin: W, stdout: R, timeout: Option<Duration>) -> SharedCorrelator
where
    W: Write + Send + 'static,
    R: Read + Send + 'static,
{
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<WorkerCommand>();
    let correlator: SharedCorrelator = Arc::new(RequestCorrelator::new(cmd_tx, timeout));

    tokio::spawn(stdin_writer_task(cmd_rx, stdin, correlator.clone()));
    tokio::spawn(stdout_reader_task(stdout, correlator.clone()));

    correlator
}

/// Task that writes commands to the worker's stdin.
async fn stdin_writer_task<W: Write>(
    mut cmd_rx: mpsc::UnboundedReceiver<WorkerCommand>,
    mut stdin: W,
    correlator: SharedCorrelator,
) {
    while let Some(command) = cmd_rx.recv().await {
        if let Err(e) = stdin
            .write_all(command.to_line().as_bytes())
            .and_then(|()| stdin.flush())
        {
            sys_error!("[BRIDGE] Failed to write to worker stdin: {e}");
            correlator.mark_broken().await;
            break;
        }
    }
    sys_info!("[BRIDGE] Stdin writer task exiting");
}

/// Task that reads replies from the worker's stdout and dispatches them.
async fn stdout_reader_task<R: Read + Send + 'static>(stdout: R, correlator: SharedCorrelator) {
    // Pipe reads are blocking; do them on a dedicated thread.
    let (line_tx, mut line_rx) = mpsc::unbounded_channel::<String>();

    std::thread::spawn(move || {
        let mut reader = BufReader::new(stdout);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf).into_owned();
                    if line.trim().is_empty() {
                        continue;
                    }
                    if line_tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    sys_error!("[BRIDGE] Worker stdout read error: {e}");
                    break;
                }
            }
        }
        sys_info!("[BRIDGE] Stdout reader thread exiting");
    });

    while let Some(line) = line_rx.recv().await {
        dispatch_line(&correlator, &line).await;
    }

    sys_error!("[BRIDGE] Worker stdout closed, worker is gone");
    correlator.mark_broken().await;
}

/// Parse one stdout line and resolve its pending call.
pub async fn dispatch_line(correlator: &RequestCorrelator, line: &str) {
    match WorkerReply::parse(line) {
        Ok(reply) => {
            sys_debug!("[BRIDGE] Reply {} {}", reply.method, reply.argument);
            correlator.resolve(&reply.key(), &reply.result).await;
        }
        Err(e) => {
            sys_warn!("[BRIDGE] Discarding line: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::web::worker::ipc_types::{CorrelationKey, WorkerMethod};
    use std::io::Cursor;
    use std::sync::Mutex;

    /// `Write` sink the test can inspect after the writer task used it.
    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(data);
            Ok(data.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Reader that blocks until the test feeds it lines.
    struct PipeReader(std::sync::mpsc::Receiver<Vec<u8>>, Cursor<Vec<u8>>);

    impl Read for PipeReader {
        fn read(&mut self, out: &mut [u8]) -> std::io::Result<usize> {
            loop {
                let n = self.1.read(out)?;
                if n > 0 {
                    return Ok(n);
                }
                match self.0.recv() {
                    Ok(chunk) => self.1 = Cursor::new(chunk),
                    Err(_) => return Ok(0),
                }
            }
        }
    }

    #[tokio::test]
    async fn test_dispatch_line_resolves_by_key() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let c = Arc::new(RequestCorrelator::new(tx, None));
        let key = CorrelationKey::new("classify", "abc123");

        let call = tokio::spawn({
            let c = c.clone();
            async move { c.submit(WorkerMethod::Classify, "abc123").await }
        });
        rx.recv().await.unwrap();
        while c.waiter_count(&key).await == 0 {
            tokio::task::yield_now().await;
        }

        dispatch_line(&c, "not-a-reply").await;
        assert_eq!(c.pending_count().await, 1);

        dispatch_line(&c, "classify abc123 {\"COVID-19\":0.92,\"NO FINDING\":0.08}\n").await;
        assert_eq!(
            call.await.unwrap().unwrap(),
            "{\"COVID-19\":0.92,\"NO FINDING\":0.08}"
        );
    }

    #[tokio::test]
    async fn test_attach_round_trip_over_pipes() {
        let written = SharedBuf::default();
        let (feed_tx, feed_rx) = std::sync::mpsc::channel::<Vec<u8>>();
        let reader = PipeReader(feed_rx, Cursor::new(Vec::new()));
        let c = attach(written.clone(), reader, None);

        let call = tokio::spawn({
            let c = c.clone();
            async move { c.submit(WorkerMethod::ExplainLime, "img1").await }
        });

        while written.0.lock().unwrap().is_empty() {
            tokio::task::yield_now().await;
        }
        assert_eq!(
            String::from_utf8(written.0.lock().unwrap().clone()).unwrap(),
            "explain_lime img1\n"
        );

        // Split across two chunks to exercise line buffering.
        feed_tx.send(b"explain_lime img1 out/expl".to_vec()).unwrap();
        feed_tx.send(b"anation_lime_img1.png\n".to_vec()).unwrap();
        assert_eq!(
            call.await.unwrap().unwrap(),
            "out/explanation_lime_img1.png"
        );

        // Closing stdout marks the channel broken.
        drop(feed_tx);
        while !c.is_broken() {
            tokio::task::yield_now().await;
        }
        assert!(matches!(
            c.submit(WorkerMethod::Classify, "img1").await,
            Err(WorkerError::Unavailable)
        ));
    }
}
