//! CW-011: Duplex message transport.
//!
//! One reader thread turns inbound frames into channel events; one writer
//! thread drains an outbound queue. `send` never blocks on I/O: it enqueues
//! and wakes the writer, which drains the entire queue per wake and flushes
//! once per batch. Outbound order is FIFO.

pub mod codec;

use crate::core::types::Message;
use codec::CodecError;
use std::collections::VecDeque;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

/// Inbound transport events delivered to the worker loop.
#[derive(Debug)]
pub enum TransportEvent {
    /// A decoded inbound message
    Message(Message),
    /// Stream or decode failure; always followed by `Closed`
    Error(String),
    /// Peer closed the stream (or it failed terminally)
    Closed,
}

struct OutboundQueue {
    queue: Mutex<VecDeque<Message>>,
    signal: Condvar,
    closed: AtomicBool,
}

/// A live duplex connection. Dropping it closes the writer side after the
/// pending queue drains.
pub struct Connection {
    outbound: Arc<OutboundQueue>,
    writer: Option<JoinHandle<()>>,
}

impl Connection {
    /// Spawn reader and writer threads over the given stream halves.
    ///
    /// The reader thread exits when the stream closes; it is detached because
    /// a blocking read cannot be interrupted portably.
    pub fn spawn<R, W>(reader: R, writer: W) -> (Self, Receiver<TransportEvent>)
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        let (events, inbox) = mpsc::channel();
        let outbound = Arc::new(OutboundQueue {
            queue: Mutex::new(VecDeque::new()),
            signal: Condvar::new(),
            closed: AtomicBool::new(false),
        });

        {
            let events = events.clone();
            std::thread::Builder::new()
                .name("transport-reader".to_string())
                .spawn(move || read_loop(reader, events))
                .ok();
        }

        let writer_handle = {
            let outbound = Arc::clone(&outbound);
            std::thread::Builder::new()
                .name("transport-writer".to_string())
                .spawn(move || write_loop(writer, outbound, events))
                .ok()
        };

        (
            Self {
                outbound,
                writer: writer_handle,
            },
            inbox,
        )
    }

    /// Enqueue an outbound message. Never blocks on I/O; messages sent after
    /// close are dropped.
    pub fn send(&self, message: Message) {
        if self.outbound.closed.load(Ordering::SeqCst) {
            return;
        }
        let mut queue = self
            .outbound
            .queue
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        queue.push_back(message);
        self.outbound.signal.notify_one();
    }

    /// Close the writer side: pending messages drain first. Idempotent.
    pub fn close(&mut self) {
        if self.outbound.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.outbound.signal.notify_all();
        if let Some(handle) = self.writer.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

fn read_loop<R: Read>(mut reader: R, events: Sender<TransportEvent>) {
    loop {
        match codec::read_frame(&mut reader) {
            Ok(message) => {
                if events.send(TransportEvent::Message(message)).is_err() {
                    return;
                }
            }
            Err(CodecError::Closed) => {
                let _ = events.send(TransportEvent::Closed);
                return;
            }
            // Any decode failure closes the connection; no further events
            Err(e) => {
                let _ = events.send(TransportEvent::Error(e.to_string()));
                let _ = events.send(TransportEvent::Closed);
                return;
            }
        }
    }
}

fn write_loop<W: Write>(
    mut writer: W,
    outbound: Arc<OutboundQueue>,
    events: Sender<TransportEvent>,
) {
    loop {
        let batch = {
            let mut queue = outbound.queue.lock().unwrap_or_else(|e| e.into_inner());
            while queue.is_empty() && !outbound.closed.load(Ordering::SeqCst) {
                queue = outbound
                    .signal
                    .wait(queue)
                    .unwrap_or_else(|e| e.into_inner());
            }
            if queue.is_empty() {
                return;
            }
            std::mem::take(&mut *queue)
        };

        for message in batch {
            if let Err(e) = codec::write_frame(&mut writer, &message) {
                let _ = events.send(TransportEvent::Error(e.to_string()));
                let _ = events.send(TransportEvent::Closed);
                return;
            }
        }
        if let Err(e) = writer.flush() {
            let _ = events.send(TransportEvent::Error(e.to_string()));
            let _ = events.send(TransportEvent::Closed);
            return;
        }
    }
}
