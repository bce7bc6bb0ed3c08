use super::{DetectionSource, FrameProvider};
use crate::error::SourceFault;
use crate::perception::FrameResult;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Builds a provider on the worker thread, opening camera and model
pub type ProviderFactory =
    Arc<dyn Fn() -> Result<Box<dyn FrameProvider>, SourceFault> + Send + Sync>;

enum Command {
    Pull,
    Reopen,
}

enum Reply {
    Opened(Result<(), SourceFault>),
    Frame(Result<FrameResult, SourceFault>),
    Reopened(Result<(), SourceFault>),
}

struct Worker {
    commands: Sender<Command>,
    replies: Receiver<Reply>,
    /// A pull was sent but its reply has not been collected
    pull_pending: bool,
}

impl Worker {
    fn spawn(factory: ProviderFactory) -> Result<Self, SourceFault> {
        let (command_tx, command_rx) = mpsc::channel();
        let (reply_tx, reply_rx) = mpsc::channel();

        thread::Builder::new()
            .name("detection-worker".into())
            .spawn(move || run_worker(factory, command_rx, reply_tx))
            .map_err(|e| SourceFault::Disconnected(format!("failed to spawn worker: {}", e)))?;

        Ok(Self {
            commands: command_tx,
            replies: reply_rx,
            pull_pending: false,
        })
    }

    fn send(&self, command: Command) -> Result<(), SourceFault> {
        self.commands
            .send(command)
            .map_err(|_| SourceFault::Disconnected("detection worker exited".into()))
    }

    fn await_reply(&mut self, timeout: Duration) -> Result<Reply, SourceFault> {
        match self.replies.recv_timeout(timeout) {
            Ok(reply) => Ok(reply),
            Err(RecvTimeoutError::Timeout) => Err(SourceFault::Stalled(timeout)),
            Err(RecvTimeoutError::Disconnected) => {
                Err(SourceFault::Disconnected("detection worker exited".into()))
            }
        }
    }
}

fn run_worker(factory: ProviderFactory, commands: Receiver<Command>, replies: Sender<Reply>) {
    let mut provider = match factory() {
        Ok(provider) => {
            if replies.send(Reply::Opened(Ok(()))).is_err() {
                return;
            }
            provider
        }
        Err(fault) => {
            let _ = replies.send(Reply::Opened(Err(fault)));
            return;
        }
    };

    // Ends once the adapter drops its command sender
    while let Ok(command) = commands.recv() {
        let reply = match command {
            Command::Pull => Reply::Frame(provider.pull()),
            Command::Reopen => Reply::Reopened(provider.reopen()),
        };
        if replies.send(reply).is_err() {
            break;
        }
    }
}

/// Detection source whose every call is bounded by a timeout
///
/// Capture and inference run on a worker thread. A worker that misses its
/// deadline keeps its request: the next `next()` waits for that reply rather
/// than queuing more work. Re-acquisition reuses a responsive worker (and the
/// model it loaded) and abandons a stalled one for a fresh worker.
pub struct TimedSource {
    factory: ProviderFactory,
    frame_timeout: Duration,
    open_timeout: Duration,
    worker: Option<Worker>,
}

impl TimedSource {
    pub fn new(factory: ProviderFactory, frame_timeout: Duration, open_timeout: Duration) -> Self {
        Self {
            factory,
            frame_timeout,
            open_timeout,
            worker: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.worker.is_some()
    }

    fn start_worker(&mut self) -> Result<(), SourceFault> {
        let mut worker = Worker::spawn(Arc::clone(&self.factory))?;
        match worker.await_reply(self.open_timeout)? {
            Reply::Opened(Ok(())) => {
                self.worker = Some(worker);
                Ok(())
            }
            Reply::Opened(Err(fault)) => Err(fault),
            _ => Err(SourceFault::Disconnected("unexpected worker reply".into())),
        }
    }
}

impl DetectionSource for TimedSource {
    fn open(&mut self) -> Result<(), SourceFault> {
        self.close();
        self.start_worker()
    }

    fn next(&mut self) -> Result<FrameResult, SourceFault> {
        let worker = self
            .worker
            .as_mut()
            .ok_or_else(|| SourceFault::Disconnected("source is not open".into()))?;

        if !worker.pull_pending {
            if let Err(fault) = worker.send(Command::Pull) {
                self.worker = None;
                return Err(fault);
            }
            worker.pull_pending = true;
        }

        match worker.await_reply(self.frame_timeout) {
            Ok(Reply::Frame(result)) => {
                worker.pull_pending = false;
                result
            }
            Ok(_) => {
                self.worker = None;
                Err(SourceFault::Disconnected("unexpected worker reply".into()))
            }
            Err(fault @ SourceFault::Stalled(_)) => Err(fault),
            Err(fault) => {
                self.worker = None;
                Err(fault)
            }
        }
    }

    fn reopen(&mut self) -> Result<(), SourceFault> {
        let Some(worker) = self.worker.as_mut().filter(|w| !w.pull_pending) else {
            // Stalled or gone: start over on a fresh thread
            return self.open();
        };

        if worker.send(Command::Reopen).is_err() {
            return self.open();
        }
        match worker.await_reply(self.open_timeout) {
            Ok(Reply::Reopened(result)) => result,
            Ok(_) => {
                self.worker = None;
                Err(SourceFault::Disconnected("unexpected worker reply".into()))
            }
            Err(fault) => {
                self.worker = None;
                Err(fault)
            }
        }
    }

    fn close(&mut self) {
        // Dropping the sender lets the worker exit once its current call returns
        self.worker = None;
    }
}

impl Drop for TimedSource {
    fn drop(&mut self) {
        self.close();
    }
}
