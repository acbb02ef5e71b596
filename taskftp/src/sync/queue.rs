//! Unbounded FIFO of worker commands.
//!
//! Many producers (the façade, the poller) and exactly one consumer (the
//! worker). The queue never reorders or merges commands.

use tokio::sync::mpsc;

/// A request for the worker. Commands carry no payload: an upload sends
/// whatever the local file holds when it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Fetch the remote file and reload the collection from it.
    Download,
    /// Store the local file remotely.
    Upload,
    /// Disconnect and stop the worker.
    Quit,
}

/// Producer handle. Cheap to clone.
#[derive(Debug, Clone)]
pub struct CommandQueue {
    tx: mpsc::UnboundedSender<Command>,
}

/// Consumer handle, owned by the worker.
#[derive(Debug)]
pub struct CommandReceiver {
    rx: mpsc::UnboundedReceiver<Command>,
}

/// Create a connected queue/receiver pair.
#[must_use]
pub fn command_queue() -> (CommandQueue, CommandReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (CommandQueue { tx }, CommandReceiver { rx })
}

impl CommandQueue {
    /// Append a command. Never blocks.
    ///
    /// If the worker has already stopped the command is dropped.
    pub fn enqueue(&self, command: Command) {
        if self.tx.send(command).is_err() {
            tracing::debug!(?command, "sync worker gone, command dropped");
        }
    }
}

impl CommandReceiver {
    /// Wait for the next command.
    ///
    /// Returns `None` once every [`CommandQueue`] has been dropped and the
    /// queue is empty.
    pub async fn dequeue(&mut self) -> Option<Command> {
        self.rx.recv().await
    }

    /// Take the next command if one is already queued.
    pub fn try_dequeue(&mut self) -> Option<Command> {
        self.rx.try_recv().ok()
    }
}
