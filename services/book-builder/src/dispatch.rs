//! Round-robin dispatch of books across worker tasks
//!
//! Each registered symbol is pinned to one worker for its whole lifetime,
//! so its book is only ever touched from that worker. Workers share no
//! state; commands reach them over unbounded `mpsc` channels and every
//! event outcome is reported on a single output channel.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use types::ids::Symbol;

use crate::config::ListenerConfig;
use crate::events::BookEvent;
use crate::listener::{BookListener, ListenerOutcome};
use crate::message::{BookMessage, BookMsgType};
use crate::snapshot::{BookSnapshot, SnapshotBuilder};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("no book registered for symbol {0}")]
    UnknownSymbol(String),

    #[error("worker {0} is no longer running")]
    WorkerUnavailable(usize),
}

/// Pool settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Number of worker tasks.
    pub workers: usize,
    /// Settings for listeners created by [`DispatchPool::register`].
    pub listener: ListenerConfig,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            listener: ListenerConfig::default(),
        }
    }
}

/// What a worker reports after processing one event.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchOutput {
    pub worker: usize,
    pub symbol: Symbol,
    pub sequence: u64,
    pub outcome: ListenerOutcome,
}

enum Command {
    Register(Box<BookListener>),
    Event(BookEvent),
    Snapshot {
        symbol: Symbol,
        reply: oneshot::Sender<Option<BookSnapshot>>,
    },
    Publish {
        symbol: Symbol,
        reply: oneshot::Sender<Option<BookMessage>>,
    },
    Shutdown,
}

/// Spreads books over a fixed set of worker tasks.
pub struct DispatchPool {
    config: DispatchConfig,
    senders: Vec<mpsc::UnboundedSender<Command>>,
    handles: Vec<JoinHandle<()>>,
    assignments: HashMap<Symbol, usize>,
    next_worker: usize,
}

impl DispatchPool {
    /// Spawn the workers. Must be called from within a tokio runtime.
    ///
    /// Returns the pool and the receiver for event outcomes.
    pub fn start(config: DispatchConfig) -> (Self, mpsc::UnboundedReceiver<DispatchOutput>) {
        let workers = config.workers.max(1);
        let (out_tx, out_rx) = mpsc::unbounded_channel();

        let mut senders = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);
        for id in 0..workers {
            let (tx, rx) = mpsc::unbounded_channel();
            senders.push(tx);
            handles.push(tokio::spawn(run_worker(id, rx, out_tx.clone())));
        }
        info!(workers, "DispatchPool started");

        let pool = Self {
            config,
            senders,
            handles,
            assignments: HashMap::new(),
            next_worker: 0,
        };
        (pool, out_rx)
    }

    /// Create a listener for `symbol` with the pool's listener settings.
    pub fn register(&mut self, symbol: Symbol) -> Result<usize, DispatchError> {
        let listener = BookListener::new(symbol, self.config.listener.clone());
        self.register_listener(listener)
    }

    /// Hand a prepared listener (with its handlers) to the next worker.
    ///
    /// Returns the worker it was assigned to. Registering a symbol again
    /// replaces its listener on the same worker.
    pub fn register_listener(&mut self, listener: BookListener) -> Result<usize, DispatchError> {
        let symbol = listener.symbol().clone();
        let worker = match self.assignments.get(&symbol) {
            Some(&worker) => worker,
            None => {
                let worker = self.next_worker;
                self.next_worker = (self.next_worker + 1) % self.senders.len();
                worker
            }
        };
        self.send(worker, Command::Register(Box::new(listener)))?;
        self.assignments.insert(symbol.clone(), worker);
        debug!(symbol = %symbol, worker, "Book registered");
        Ok(worker)
    }

    /// Worker a symbol is pinned to.
    pub fn worker_for(&self, symbol: &Symbol) -> Option<usize> {
        self.assignments.get(symbol).copied()
    }

    pub fn num_workers(&self) -> usize {
        self.senders.len()
    }

    /// Queue an event for the worker owning its symbol.
    pub fn dispatch(&self, event: BookEvent) -> Result<(), DispatchError> {
        let worker = self.worker_of(&event.symbol)?;
        self.send(worker, Command::Event(event))
    }

    /// Snapshot of one book, taken after every event queued before it.
    pub async fn snapshot(&self, symbol: &Symbol) -> Result<BookSnapshot, DispatchError> {
        let worker = self.worker_of(symbol)?;
        let (reply, rx) = oneshot::channel();
        self.send(
            worker,
            Command::Snapshot {
                symbol: symbol.clone(),
                reply,
            },
        )?;
        rx.await
            .map_err(|_| DispatchError::WorkerUnavailable(worker))?
            .ok_or_else(|| DispatchError::UnknownSymbol(symbol.to_string()))
    }

    /// Drain one book's pending mutations. `None` when there is nothing to publish.
    pub async fn publish_delta(&self, symbol: &Symbol) -> Result<Option<BookMessage>, DispatchError> {
        let worker = self.worker_of(symbol)?;
        let (reply, rx) = oneshot::channel();
        self.send(
            worker,
            Command::Publish {
                symbol: symbol.clone(),
                reply,
            },
        )?;
        rx.await.map_err(|_| DispatchError::WorkerUnavailable(worker))
    }

    /// Stop every worker once it has drained its queue.
    pub async fn shutdown(self) {
        for sender in &self.senders {
            let _ = sender.send(Command::Shutdown);
        }
        for (id, handle) in self.handles.into_iter().enumerate() {
            if let Err(err) = handle.await {
                warn!(worker = id, error = %err, "Worker ended abnormally");
            }
        }
        info!("DispatchPool stopped");
    }

    fn worker_of(&self, symbol: &Symbol) -> Result<usize, DispatchError> {
        self.worker_for(symbol)
            .ok_or_else(|| DispatchError::UnknownSymbol(symbol.to_string()))
    }

    fn send(&self, worker: usize, command: Command) -> Result<(), DispatchError> {
        self.senders
            .get(worker)
            .ok_or(DispatchError::WorkerUnavailable(worker))?
            .send(command)
            .map_err(|_| DispatchError::WorkerUnavailable(worker))
    }
}

async fn run_worker(
    id: usize,
    mut commands: mpsc::UnboundedReceiver<Command>,
    output: mpsc::UnboundedSender<DispatchOutput>,
) {
    let mut books: HashMap<Symbol, BookListener> = HashMap::new();
    let mut snapshots = SnapshotBuilder::new();
    debug!(worker = id, "Worker started");

    while let Some(command) = commands.recv().await {
        match command {
            Command::Register(listener) => {
                books.insert(listener.symbol().clone(), *listener);
            }
            Command::Event(event) => {
                let Some(listener) = books.get_mut(&event.symbol) else {
                    warn!(worker = id, symbol = %event.symbol, "Event for unregistered book");
                    continue;
                };
                let symbol = event.symbol.clone();
                let sequence = event.sequence;
                let outcome = listener.on_event(event);
                // The receiver may have been dropped; outcomes are advisory.
                let _ = output.send(DispatchOutput {
                    worker: id,
                    symbol,
                    sequence,
                    outcome,
                });
            }
            Command::Snapshot { symbol, reply } => {
                let snapshot = books.get(&symbol).map(|listener| {
                    let book = listener.book();
                    snapshots.build(book, listener.last_sequence(), book.book_time())
                });
                let _ = reply.send(snapshot);
            }
            Command::Publish { symbol, reply } => {
                let message = books.get_mut(&symbol).and_then(|listener| {
                    let mut msg = BookMessage::new(BookMsgType::Update, symbol.clone());
                    msg.seq_num = listener.last_sequence();
                    listener.book_mut().populate_delta(&mut msg).then_some(msg)
                });
                let _ = reply.send(message);
            }
            Command::Shutdown => break,
        }
    }
    debug!(worker = id, books = books.len(), "Worker stopped");
}
