use std::fmt;
use std::sync::Arc;

use anyhow::{Error, Result};
use crossbeam::channel;
use crossbeam::queue::SegQueue;
use tantivy::schema::Field;
use tantivy::{IndexWriter, Opstamp, Term};
use tokio::sync::oneshot;

use crate::batch::{Batch, BatchOp};
use crate::structures::IndexContext;

type OpPayload = (WriterOp, Option<oneshot::Sender<Result<()>>>);
type OpReceiver = channel::Receiver<OpPayload>;
type OpSender = channel::Sender<OpPayload>;
type WaitersQueue = Arc<SegQueue<oneshot::Sender<()>>>;

mod defaults {
    /// Size of the margin for the heap. A segment is closed when the remaining memory
    /// in the heap goes below MARGIN_IN_BYTES.
    pub const MARGIN_IN_BYTES: usize = 1_000_000;

    /// Tantivy requires the memory per thread to be at least 15 MB.
    pub const HEAP_SIZE_MIN: usize = 15_000_000;
    pub const HEAP_SIZE_MAX: usize = u32::MAX as usize - MARGIN_IN_BYTES;

    /// The largest buffer picked when sizing from system memory.
    pub const AUTO_BUFFER_MAX: u64 = 1_000_000_000;
}

/// Computes the writer buffer size for the given thread count.
///
/// A buffer bellow the minimum is replaced with 10% of the total memory
/// of the system, falling back to the minimum should that be more than
/// the memory currently available.
fn safe_buffer_size(writer_threads: usize, writer_buffer: usize) -> Result<usize> {
    let mut sys = sysinfo::System::new();
    sys.refresh_memory();

    let min_buffer = defaults::HEAP_SIZE_MIN * writer_threads;
    let available = sys.available_memory();
    let mut buffer = writer_buffer;

    if buffer < min_buffer {
        let target = ((sys.total_memory() as f64 * 0.10) as u64)
            .min(defaults::AUTO_BUFFER_MAX)
            .max(min_buffer as u64);

        if available < target {
            info!(
                "target buffer size of {}KB cannot be reached due \
                to not enough free memory, defaulting to {}KB",
                target / 1_000,
                min_buffer / 1_000,
            );

            buffer = min_buffer;
        } else {
            buffer = target as usize;
        }

        return Ok(buffer.min(defaults::HEAP_SIZE_MAX * writer_threads));
    }

    let buffer = buffer.min(defaults::HEAP_SIZE_MAX * writer_threads);
    if available > 0 && buffer as u64 > available {
        return Err(Error::msg(format!(
            "cannot allocate {}KB due to system not having enough free memory. (Free: {}KB)",
            buffer / 1_000,
            available / 1_000,
        )));
    }

    Ok(buffer)
}

/// A writing operation to be sent to the `IndexWriterWorker`.
pub(crate) enum WriterOp {
    /// Applies every operation of the batch and commits them.
    ApplyBatch(Batch),

    /// A simple Ping to check if the worker is alive still after creation.
    __Ping,

    /// Shutdown the handler.
    __Shutdown,
}

impl fmt::Debug for WriterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ApplyBatch(batch) => write!(f, "ApplyBatch(len={})", batch.len()),
            Self::__Ping => write!(f, "Ping"),
            Self::__Shutdown => write!(f, "Shutdown"),
        }
    }
}

/// A background task that applies write operations to the index.
///
/// This system uses the actor model receiving a stream of messages
/// and processes them in order of being sent.
///
/// Messages are ran in a new thread.
struct IndexWriterWorker {
    index_name: String,
    id_field: Field,
    waiters: WaitersQueue,
    writer: IndexWriter,
    rx: OpReceiver,
    shutdown_waker: Option<oneshot::Sender<Result<()>>>,
}

impl IndexWriterWorker {
    /// Starts processing messages until a shutdown operation is sent.
    ///
    /// This processes operations in waves before waking up waiters,
    /// this means all operations currently in the queue will be processed
    /// first before any waiters are woken up to send more data.
    fn start(mut self) {
        'outer: loop {
            while let Ok((op, waker)) = self.rx.try_recv() {
                self.handle_message(op, waker);
                if self.shutdown_waker.is_some() {
                    break 'outer;
                }
            }

            // Wake up waiters once a message has been removed.
            while let Some(waiter) = self.waiters.pop() {
                let _ = waiter.send(());
            }

            trace!(
                "[ WRITER @ {} ] parking writer until new events present",
                &self.index_name
            );
            match self.rx.recv() {
                Ok((op, waker)) => {
                    self.handle_message(op, waker);
                    if self.shutdown_waker.is_some() {
                        break;
                    }
                },
                Err(_) => {
                    info!(
                        "[ WRITER @ {} ] writer actor channel dropped, shutting down...",
                        &self.index_name
                    );
                    break;
                },
            }
        }

        // Unlock waiters so that they dont deadlock the system.
        while let Some(waiter) = self.waiters.pop() {
            let _ = waiter.send(());
        }

        let shutdown_waker = self.shutdown_waker.take();
        let res = self.writer.wait_merging_threads().map_err(Error::from);
        info!("[ WRITER @ {} ] shutdown complete!", &self.index_name);

        if let Some(waker) = shutdown_waker {
            let _ = waker.send(res);
        }
    }

    fn handle_message(
        &mut self,
        op: WriterOp,
        waker: Option<oneshot::Sender<Result<()>>>,
    ) {
        trace!(
            "[ WRITER @ {} ] handling operation: {:?}",
            &self.index_name,
            op
        );

        if let WriterOp::__Shutdown = op {
            // The waker is answered once the merging threads have finished.
            let (fallback, _) = oneshot::channel();
            self.shutdown_waker = Some(waker.unwrap_or(fallback));
            return;
        }

        let res = self.handle_op(op);
        if let Err(ref e) = res {
            error!(
                "[ WRITER @ {} ] failed to handle operation: {:?}",
                &self.index_name, e
            );
        }

        if let Some(w) = waker {
            let _ = w.send(res);
        }
    }

    fn handle_op(&mut self, op: WriterOp) -> Result<()> {
        match op {
            WriterOp::__Ping | WriterOp::__Shutdown => Ok(()),
            WriterOp::ApplyBatch(batch) => {
                let len = batch.len();
                let opstamp = match self.apply_batch(batch) {
                    Ok(opstamp) => opstamp,
                    Err(e) => {
                        self.writer.rollback()?;
                        return Err(e);
                    },
                };

                debug!(
                    "[ WRITER @ {} ][ TRANSACTION {} ] committed batch of {} operations",
                    &self.index_name, opstamp, len
                );

                Ok(())
            },
        }
    }

    fn apply_batch(&mut self, batch: Batch) -> Result<Opstamp> {
        for op in batch.into_ops() {
            match op {
                BatchOp::Index { id, document } => {
                    self.writer
                        .delete_term(Term::from_field_text(self.id_field, &id));
                    self.writer.add_document(document)?;
                },
                BatchOp::Delete { id } => {
                    self.writer
                        .delete_term(Term::from_field_text(self.id_field, &id));
                },
            }
        }

        Ok(self.writer.commit()?)
    }
}

/// A simple wrapper handler around a set of queues and a worker.
///
/// This manages creating the waiters and scheduling the operations
/// in a new thread.
pub(crate) struct Writer {
    index_name: String,
    op_sender: OpSender,
    writer_waiters: WaitersQueue,
}

impl Writer {
    /// Creates a new writer handler from a given index context.
    ///
    /// This creates a bounded queue with a capacity of 20, builds the tantivy index
    /// writer with n threads and spawns a worker in a new thread.
    pub(crate) fn create(ctx: &IndexContext) -> Result<Self> {
        let index_name = ctx.name.clone();
        let (op_sender, op_receiver) = channel::bounded::<OpPayload>(20);

        let writer = {
            let threads = ctx.settings.writer_threads;
            let buffer = safe_buffer_size(threads, ctx.settings.writer_buffer)?;

            debug!(
                "[ WRITER @ {} ] index writer setup threads={}, heap={}B ",
                &ctx.name, threads, buffer,
            );

            ctx.index.writer_with_num_threads(threads, buffer)?
        };

        let waiters = WaitersQueue::default();
        let worker = IndexWriterWorker {
            index_name: index_name.clone(),
            id_field: ctx.fields.id,
            waiters: waiters.clone(),
            writer,
            rx: op_receiver,
            shutdown_waker: None,
        };

        info!("[ WRITER @ {} ] starting writer worker.", &ctx.name);
        let handle = std::thread::Builder::new()
            .name(format!("{}-writer-worker", &ctx.name))
            .spawn(move || worker.start())
            .map_err(|_e| {
                Error::msg(format!(
                    "failed to spawn writer worker thread for index {}",
                    &ctx.name
                ))
            })?;

        if op_sender.send((WriterOp::__Ping, None)).is_err() {
            let _ = handle.join();
            return Err(Error::msg(format!(
                "writer worker for index {} exited during startup",
                &ctx.name
            )));
        }

        Ok(Self {
            index_name,
            op_sender,
            writer_waiters: waiters,
        })
    }

    /// Sends a message to the writer worker
    ///
    /// If there is space in the queue this will complete immediately
    /// otherwise this will wait until it's woken up again.
    pub(crate) async fn send_op(&self, op: WriterOp) -> Result<()> {
        let (waker, waker_waiter) = oneshot::channel();
        let mut payload: OpPayload = (op, Some(waker));
        while let Some(pending) = self.try_send(payload)? {
            debug!(
                "[ WRITER @ {} ] operation queue full, waiting for wakeup",
                &self.index_name
            );

            let (resolve, waiter) = oneshot::channel();
            self.writer_waiters.push(resolve);

            // The worker may have drained the queue and its waiters
            // before ours was pushed, in which case nothing wakes us.
            payload = match self.try_send(pending)? {
                None => break,
                Some(pending) => pending,
            };

            let _ = waiter.await;
        }

        waker_waiter
            .await
            .map_err(|_| Error::msg("writer worker dropped the operation"))?
    }

    /// Queues the payload, handing it back if the queue is full.
    fn try_send(&self, payload: OpPayload) -> Result<Option<OpPayload>> {
        match self.op_sender.try_send(payload) {
            Ok(()) => Ok(None),
            Err(channel::TrySendError::Full(payload)) => Ok(Some(payload)),
            Err(channel::TrySendError::Disconnected(_)) => {
                Err(Error::msg("writer worker has shutdown"))
            },
        }
    }

    /// Stops the worker once every queued operation has been applied.
    pub(crate) async fn shutdown(&self) -> Result<()> {
        self.send_op(WriterOp::__Shutdown).await
    }
}
