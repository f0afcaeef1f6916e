//! CW-012: Worker application — wiring and lifecycle.
//!
//! One transport connection, one job queue, one worker thread. The main loop
//! owns shutdown: an `Exit` message, a closed stream, or parent-process death
//! all set the shared token, and the worker thread notices it between queue
//! polls. A panic inside a single job is contained and reported as an
//! `Error` response; it never takes the process down.

use crate::backend::textpack::TextPackBackend;
use crate::core::engine::Engine;
use crate::core::queue::JobQueue;
use crate::core::resolver::ReferenceResolver;
use crate::core::settings::WorkerSettings;
use crate::core::types::{ErrorKind, Message, MessageBody};
use crate::joblog::eventlog::{self, WorkerEvent};
use crate::transport::{Connection, TransportEvent};
use std::io::{BufRead, Read, Write};
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Delay before announcing readiness over a fresh stream, giving the parent
/// time to attach its reader.
pub const READY_DELAY: Duration = Duration::from_secs(2);

/// Queue poll interval; bounds shutdown latency for an idle worker.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Cooperative shutdown flag shared across threads.
#[derive(Clone, Default)]
pub struct ShutdownToken(Arc<AtomicBool>);

impl ShutdownToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// The assembled worker: settings, resolver, queue, shutdown token.
pub struct Application {
    settings: Arc<WorkerSettings>,
    resolver: Arc<ReferenceResolver>,
    queue: Arc<JobQueue>,
    shutdown: ShutdownToken,
}

impl Application {
    pub fn new(settings: WorkerSettings) -> Self {
        let resolver = ReferenceResolver::new(&settings.path, settings.debug_enabled());
        Self {
            settings: Arc::new(settings),
            resolver: Arc::new(resolver),
            queue: Arc::new(JobQueue::new()),
            shutdown: ShutdownToken::new(),
        }
    }

    pub fn shutdown_token(&self) -> ShutdownToken {
        self.shutdown.clone()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Serve framed messages over stdin/stdout until shutdown.
    pub fn serve_stdio(&self, parent_pid: Option<u32>) -> Result<(), String> {
        if let Some(pid) = parent_pid {
            watch_parent(pid, self.shutdown.clone());
        }
        self.serve(std::io::stdin(), std::io::stdout(), READY_DELAY)
    }

    /// Serve framed messages over an arbitrary duplex stream.
    pub fn serve<R, W>(&self, reader: R, writer: W, ready_delay: Duration) -> Result<(), String>
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        let log_path = self.settings.event_log_path();
        let _ = eventlog::append_event(
            &log_path,
            WorkerEvent::WorkerStarted {
                version: env!("CARGO_PKG_VERSION").to_string(),
                message_stream: true,
            },
        );

        let (conn, inbox) = Connection::spawn(reader, writer);
        let conn = Arc::new(conn);
        let worker = self.spawn_worker(Arc::clone(&conn));

        std::thread::sleep(ready_delay);
        conn.send(Message::ready());
        let _ = eventlog::append_event(&log_path, WorkerEvent::ReadySent {});

        let mut shutdown_source = "token";
        while !self.shutdown.is_set() {
            let event = match inbox.recv_timeout(POLL_INTERVAL) {
                Ok(event) => event,
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => continue,
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                    shutdown_source = "stream_closed";
                    break;
                }
            };
            match event {
                TransportEvent::Message(message) => match message.body {
                    MessageBody::Compile { job } => self.queue.push(message.id, job),
                    MessageBody::Exit => {
                        shutdown_source = "exit_message";
                        break;
                    }
                    other => {
                        if self.settings.debug_enabled() {
                            eprintln!("ignoring inbound message: {:?}", other);
                        }
                    }
                },
                TransportEvent::Error(e) => eprintln!("transport error: {}", e),
                TransportEvent::Closed => {
                    shutdown_source = "stream_closed";
                    break;
                }
            }
        }

        self.shutdown.set();
        let _ = eventlog::append_event(
            &log_path,
            WorkerEvent::Shutdown {
                source: shutdown_source.to_string(),
            },
        );
        if let Some(handle) = worker {
            let _ = handle.join();
        }
        Ok(())
    }

    /// Interactive fallback for a worker started without a parent stream.
    pub fn run_console(&self) -> Result<(), String> {
        eprintln!("worker was not started with a message stream; console mode");
        eprintln!("commands: status, exit, quit");

        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let line = line.map_err(|e| format!("console read error: {}", e))?;
            match line.trim().to_ascii_lowercase().as_str() {
                "" => {}
                "exit" | "quit" => break,
                "status" => {
                    println!(
                        "queued jobs: {}, shutting down: {}",
                        self.queue.len(),
                        self.shutdown.is_set()
                    );
                }
                other => println!("unknown command '{}'; available: status, exit, quit", other),
            }
        }
        self.shutdown.set();
        Ok(())
    }

    fn spawn_worker(&self, conn: Arc<Connection>) -> Option<JoinHandle<()>> {
        let settings = Arc::clone(&self.settings);
        let resolver = Arc::clone(&self.resolver);
        let queue = Arc::clone(&self.queue);
        let shutdown = self.shutdown.clone();

        std::thread::Builder::new()
            .name("compile-worker".to_string())
            .spawn(move || {
                let backend = TextPackBackend::new();
                let engine = Engine::new(&settings, &resolver, &backend);
                let log_path = settings.event_log_path();

                while !shutdown.is_set() {
                    let queued = match queue.pop_timeout(POLL_INTERVAL) {
                        Some(q) => q,
                        None => continue,
                    };
                    let _ = eventlog::append_event(
                        &log_path,
                        WorkerEvent::JobReceived {
                            job: queued.id,
                            sources: queued.job.source_files.len(),
                            references: queued.job.reference_files.len(),
                        },
                    );

                    let started = Instant::now();
                    let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| {
                        engine.compile(queued.id, &queued.job)
                    }));

                    match outcome {
                        Ok(Ok(result)) => {
                            let _ = eventlog::append_event(
                                &log_path,
                                WorkerEvent::JobCompleted {
                                    job: queued.id,
                                    succeeded: result.succeeded,
                                    failed: result.failed,
                                    artifact_hash: eventlog::hash_artifact(&result.binary),
                                    duration_seconds: started.elapsed().as_secs_f64(),
                                },
                            );
                            conn.send(Message::assembly(queued.id, result));
                        }
                        Ok(Err(err)) => {
                            let _ = eventlog::append_event(
                                &log_path,
                                WorkerEvent::JobFailed {
                                    job: queued.id,
                                    kind: err.kind.to_string(),
                                    error: err.message.clone(),
                                },
                            );
                            conn.send(Message::error(queued.id, err.kind, err.message));
                        }
                        Err(payload) => {
                            let message = panic_text(payload.as_ref());
                            let _ = eventlog::append_event(
                                &log_path,
                                WorkerEvent::JobFailed {
                                    job: queued.id,
                                    kind: ErrorKind::Internal.to_string(),
                                    error: message.clone(),
                                },
                            );
                            conn.send(Message::error(queued.id, ErrorKind::Internal, message));
                        }
                    }
                }
            })
            .ok()
    }
}

/// Poll for parent-process death and trigger shutdown when it disappears.
pub fn watch_parent(pid: u32, shutdown: ShutdownToken) -> Option<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("parent-watch".to_string())
        .spawn(move || {
            let proc_path = PathBuf::from(format!("/proc/{}", pid));
            while !shutdown.is_set() {
                if !proc_path.exists() {
                    eprintln!("parent process {} is gone, shutting down", pid);
                    shutdown.set();
                    return;
                }
                std::thread::sleep(Duration::from_secs(1));
            }
        })
        .ok()
}

fn panic_text(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("job panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("job panicked: {}", s)
    } else {
        "job panicked".to_string()
    }
}
