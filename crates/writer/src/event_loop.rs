//! The loop-thread side of the engine.
//!
//! [`EventLoop`] owns the registry for the duration of a run and reacts to
//! three event sources: control messages from other threads, completions of
//! native file operations, and the backoff wait. At most one write (or the
//! rotation that follows it) is in flight at any time; everything else waits
//! in the queue.

use crate::backoff::{Backoff, Fired};
use crate::control::{Control, ControlReceiver, QueueReceiver};
use crate::engine::{EngineState, LoopCore, Shared};
use crate::error::StreamError;
use crate::naming;
use crate::native::{self, Completion};
use crate::registry::{FileSlot, StreamCallback, StreamEvent, StreamHandle, StreamId, StreamRegistry};
use std::collections::VecDeque;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs::File;
use tokio::sync::oneshot;
use tokio::task::{self, JoinError, JoinSet};
use tracing::{debug, error, info, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Write,
    Rotate,
}

/// The single outstanding write or rotation.
#[derive(Debug, Clone, Copy)]
struct InFlight {
    task: task::Id,
    stream: StreamId,
    op: Operation,
}

pub(crate) struct EventLoop<'a> {
    shared: &'a Shared,
    queue: &'a mut QueueReceiver,
    control: &'a mut ControlReceiver,
    registry: &'a mut StreamRegistry<File>,
    backlog: &'a mut VecDeque<Control>,
    ops: JoinSet<Completion>,
    backoff: Backoff,
    in_flight: Option<InFlight>,
}

impl<'a> EventLoop<'a> {
    pub(crate) fn new(shared: &'a Shared, core: &'a mut LoopCore) -> Self {
        let LoopCore { queue, control, registry, backlog } = core;
        Self {
            shared,
            queue,
            control,
            registry,
            backlog,
            ops: JoinSet::new(),
            backoff: Backoff::new(shared.backoff_interval),
            in_flight: None,
        }
    }

    /// Drives the loop until a stop request arrives and returns its acknowledgement.
    pub(crate) async fn run(mut self) -> Option<oneshot::Sender<()>> {
        while let Some(message) = self.backlog.pop_front() {
            if let Some(ack) = self.handle_control(message) {
                self.shutdown().await;
                return Some(ack);
            }
        }

        self.drain();

        loop {
            tokio::select! {
                biased;

                message = self.control.recv() => {
                    let Some(message) = message else {
                        self.shutdown().await;
                        return None;
                    };
                    if let Some(ack) = self.handle_control(message) {
                        self.shutdown().await;
                        return Some(ack);
                    }
                },
                Some(joined) = self.ops.join_next(), if !self.ops.is_empty() => {
                    self.handle_join(joined);
                },
                fired = self.backoff.fired(), if self.backoff.is_armed() => {
                    self.handle_backoff(fired);
                },
            }
        }
    }

    fn handle_control(&mut self, message: Control) -> Option<oneshot::Sender<()>> {
        trace!(message = message.label(), "Control message received");
        match message {
            Control::Open { name, on_event } => self.open_stream(name, on_event),
            Control::Close { stream } => self.close_stream(stream),
            Control::Exists { stream, reply } => {
                let _ = reply.send(self.registry.exists(stream));
            },
            Control::Stop { ack } => return Some(ack),
        }
        None
    }

    fn handle_join(&mut self, joined: Result<Completion, JoinError>) {
        match joined {
            Ok(completion) => self.complete(completion),
            Err(err) => {
                error!(%err, "File operation task failed");
                if let Some(lost) = self.in_flight.take_if(|op| op.task == err.id()) {
                    self.abandon(lost);
                    self.drain();
                }
            },
        }
    }

    /// The task that owned the stream's file died; the stream keeps no file.
    fn abandon(&mut self, lost: InFlight) {
        if lost.op == Operation::Write {
            self.shared.settle();
        }
        if let Ok(handle) = self.registry.get_mut(lost.stream) {
            handle.file = FileSlot::Degraded;
        }
    }

    fn handle_backoff(&mut self, fired: Fired) {
        self.backoff.acknowledge(fired);
        if fired == Fired::Idle {
            debug!(streams = self.registry.len(), "First idle turn, broadcasting progress");
            self.registry.notify_all();
        }
        self.drain();
    }

    /// Pops queue entries until one can be written. Unknown and degraded
    /// streams are reported and skipped. An empty queue arms the backoff.
    fn drain(&mut self) {
        if self.in_flight.is_some() {
            return;
        }
        self.backoff.disarm();

        while let Ok(entry) = self.queue.try_recv() {
            let id = entry.stream;
            let Some(handle) = self.registry.get_mut(id).ok() else {
                self.shared.report(&StreamError::UnknownStream { id });
                self.shared.settle();
                continue;
            };
            let Some(mut file) = handle.file.take() else {
                self.shared.report(&StreamError::Degraded { id });
                self.shared.settle();
                continue;
            };

            let mut data = entry.payload;
            data.push_str(&self.shared.line_terminator);
            trace!(stream = %id, bytes = data.len(), "Issuing write");

            let task = self.ops.spawn(async move {
                let result = native::write(&mut file, data.as_bytes()).await;
                Completion::Written { id, file, result }
            });
            self.in_flight = Some(InFlight { task: task.id(), stream: id, op: Operation::Write });
            return;
        }

        self.backoff.arm();
        trace!(timer = self.backoff.uses_timer(), "Write queue empty");
    }

    fn complete(&mut self, completion: Completion) {
        match completion {
            Completion::Opened { name, on_event, path, result } => {
                self.opened(name, &on_event, path, result);
            },
            Completion::Written { id, file, result } => {
                self.in_flight = None;
                self.written(id, file, result);
            },
            Completion::Rotated { id, descriptor, closed, path, opened } => {
                self.in_flight = None;
                self.rotated(id, descriptor, closed, path, opened);
            },
            Completion::Closed { id, descriptor, result } => {
                if let Err(err) = result {
                    debug!(stream = %id, descriptor, %err, "Close failed");
                } else {
                    debug!(stream = %id, descriptor, "Stream file closed");
                }
                return;
            },
        }
        self.drain();
    }

    fn open_stream(&mut self, name: String, on_event: StreamCallback) {
        let path = naming::stream_path(&self.shared.config.path(), &name, true);
        debug!(stream = %name, path = %path.display(), "Opening stream");
        self.ops.spawn(async move {
            let result = native::open(&path).await;
            Completion::Opened { name, on_event, path, result }
        });
    }

    fn opened(
        &mut self,
        name: String,
        on_event: &StreamCallback,
        path: PathBuf,
        result: io::Result<File>,
    ) {
        match result {
            Ok(file) => {
                let descriptor = native::descriptor(&file);
                let handle = StreamHandle::new(name, descriptor, file, Arc::clone(on_event));
                let id = self.registry.add(handle);
                info!(stream = %id, descriptor, path = %path.display(), "Stream opened");
                on_event(StreamEvent::Created { id });
            },
            Err(source) => self.shared.report(&StreamError::OpenFailed { path, source }),
        }
    }

    fn close_stream(&mut self, id: StreamId) {
        let Some(handle) = self.registry.remove(id) else {
            self.shared.report(&StreamError::UnknownStream { id });
            return;
        };
        debug!(stream = %id, descriptor = handle.descriptor, "Closing stream");
        // A busy file is released by the operation that holds it.
        if let FileSlot::Ready(file) = handle.file {
            self.spawn_close(id, handle.descriptor, file);
        }
    }

    fn spawn_close(&mut self, id: StreamId, descriptor: i64, file: File) {
        self.ops.spawn(async move {
            let result = native::close(file).await;
            Completion::Closed { id, descriptor, result }
        });
    }

    fn written(&mut self, id: StreamId, file: File, result: io::Result<usize>) {
        self.shared.settle();
        let Some(handle) = self.registry.get_mut(id).ok() else {
            trace!(stream = %id, "Stream closed during write");
            self.spawn_close(id, native::descriptor(&file), file);
            return;
        };

        let written = match result {
            Ok(written) => written,
            Err(source) => {
                handle.file = FileSlot::Ready(file);
                let descriptor = handle.descriptor;
                self.shared.report(&StreamError::WriteFailed { id, descriptor, source });
                return;
            },
        };

        handle.bytes_written =
            handle.bytes_written.saturating_add(u64::try_from(written).unwrap_or(u64::MAX));
        if handle.bytes_written <= self.shared.config.max_file_size() {
            handle.file = FileSlot::Ready(file);
            return;
        }

        handle.bytes_written = 0;
        let descriptor = handle.descriptor;
        let path = naming::stream_path(&self.shared.config.path(), &handle.name, false);
        info!(stream = %id, descriptor, path = %path.display(), "Rotating stream file");

        let task = self.ops.spawn(async move {
            let closed = native::close(file).await;
            let opened = native::open(&path).await;
            Completion::Rotated { id, descriptor, closed, path, opened }
        });
        self.in_flight = Some(InFlight { task: task.id(), stream: id, op: Operation::Rotate });
    }

    fn rotated(
        &mut self,
        id: StreamId,
        descriptor: i64,
        closed: io::Result<()>,
        path: PathBuf,
        opened: io::Result<File>,
    ) {
        if let Err(source) = closed {
            self.shared.report(&StreamError::CloseFailed { id, descriptor, source });
        }

        let Some(handle) = self.registry.get_mut(id).ok() else {
            match opened {
                Ok(file) => {
                    trace!(stream = %id, "Stream closed during rotation");
                    self.spawn_close(id, native::descriptor(&file), file);
                },
                Err(err) => debug!(stream = %id, %err, "Rotation reopen failed for a closed stream"),
            }
            return;
        };

        match opened {
            Ok(file) => {
                handle.descriptor = native::descriptor(&file);
                handle.file = FileSlot::Ready(file);
                debug!(stream = %id, descriptor = handle.descriptor, "Rotation complete");
            },
            Err(source) => {
                handle.file = FileSlot::Degraded;
                self.shared.report(&StreamError::OpenFailed { path, source });
            },
        }
    }

    /// Lets in-flight operations settle, then closes every file. Close
    /// failures are swallowed so that shutdown always completes.
    async fn shutdown(&mut self) {
        self.shared.set_state(EngineState::Stopping);
        self.backoff.disarm();

        while let Some(joined) = self.ops.join_next().await {
            let completion = match joined {
                Ok(completion) => completion,
                Err(err) => {
                    if let Some(lost) = self.in_flight.take_if(|op| op.task == err.id()) {
                        self.abandon(lost);
                    }
                    continue;
                },
            };
            if matches!(completion, Completion::Written { .. }) {
                self.shared.settle();
            }
            if let Some(file) = completion.into_file() {
                let _ = native::close(file).await;
            }
        }
        self.in_flight = None;

        let mut closed = 0usize;
        for (id, handle) in self.registry.drain() {
            if let FileSlot::Ready(file) = handle.file
                && let Err(err) = native::close(file).await
            {
                debug!(stream = %id, %err, "Ignoring close failure during shutdown");
            }
            closed += 1;
        }
        info!(closed, "All streams closed");
    }
}
