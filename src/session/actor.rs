//! Session Actor
//!
//! One thread per session owns the [`Session`] and takes commands from a
//! mailbox. Programmatic server code reaches the components through
//! [`SessionHandle::access`], so client turns and server changes never
//! interleave.

use super::{ClientMessage, ClientResponse, Session};
use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};
use uuid::Uuid;

type Job = Box<dyn FnOnce(&mut Session) + Send>;

/// Commands understood by the session actor
enum SessionCommand {
    /// A client turn whose response goes back to the caller
    Turn {
        messages: Vec<ClientMessage>,
        reply: Sender<ClientResponse>,
    },
    /// Client messages whose response goes to the push channel; queued posts
    /// are merged into one turn
    Post(Vec<ClientMessage>),
    /// Run server code against the session
    Access(Job),
    Shutdown,
}

fn closed(message: impl Into<String>) -> Error {
    Error::SessionClosed {
        message: message.into(),
    }
}

/// Owner side of a running session actor
pub struct SessionHandle {
    id: Uuid,
    command_tx: Sender<SessionCommand>,
    response_rx: Receiver<ClientResponse>,
    worker: Option<JoinHandle<()>>,
}

impl SessionHandle {
    /// Start an actor for a fresh session
    pub fn spawn(config: SessionConfig) -> Result<Self> {
        Self::spawn_with(Session::new(config))
    }

    /// Start an actor that takes over an existing session
    pub fn spawn_with(session: Session) -> Result<Self> {
        let id = session.id();
        let (command_tx, command_rx) = crossbeam_channel::unbounded();
        let (response_tx, response_rx) = crossbeam_channel::unbounded();
        let worker = thread::Builder::new()
            .name(format!("session-{}", id.simple()))
            .spawn(move || run(session, command_rx, response_tx))?;
        info!("Session {} started", id);
        Ok(Self {
            id,
            command_tx,
            response_rx,
            worker: Some(worker),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    fn submit(&self, command: SessionCommand) -> Result<()> {
        self.command_tx
            .send(command)
            .map_err(|_| closed(format!("session {} no longer accepts commands", self.id)))
    }

    /// Run `f` on the actor thread and wait for its result
    ///
    /// Changes made here reach the client with the next turn.
    pub fn access<R, F>(&self, f: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut Session) -> R + Send + 'static,
    {
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        self.submit(SessionCommand::Access(Box::new(move |session: &mut Session| {
            let _ = reply_tx.send(f(session));
        })))?;
        reply_rx
            .recv()
            .map_err(|_| closed(format!("session {} dropped an access call", self.id)))
    }

    /// Run one client turn and wait for its response
    pub fn send(&self, messages: Vec<ClientMessage>) -> Result<ClientResponse> {
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        self.submit(SessionCommand::Turn {
            messages,
            reply: reply_tx,
        })?;
        reply_rx
            .recv()
            .map_err(|_| closed(format!("session {} dropped a turn", self.id)))
    }

    /// Queue client messages without waiting; non-empty responses arrive on
    /// [`SessionHandle::responses`]
    pub fn post(&self, messages: Vec<ClientMessage>) -> Result<()> {
        self.submit(SessionCommand::Post(messages))
    }

    /// Push channel for responses to posted messages
    pub fn responses(&self) -> &Receiver<ClientResponse> {
        &self.response_rx
    }

    /// Stop the actor and wait for it to finish
    pub fn shutdown(mut self) -> Result<()> {
        self.stop()
    }

    fn stop(&mut self) -> Result<()> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        let _ = self.command_tx.send(SessionCommand::Shutdown);
        worker
            .join()
            .map_err(|_| closed(format!("session {} panicked", self.id)))
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            warn!("{}", err);
        }
    }
}

/// Actor loop
fn run(mut session: Session, rx: Receiver<SessionCommand>, responses: Sender<ClientResponse>) {
    let batch_limit = session.config().mailbox_batch.max(1);
    let mut next: Option<SessionCommand> = None;

    loop {
        let command = match next.take() {
            Some(command) => command,
            None => match rx.recv() {
                Ok(command) => command,
                Err(_) => break,
            },
        };

        match command {
            SessionCommand::Post(mut messages) => {
                // Merge whatever else is already queued
                let mut drained = 1;
                while drained < batch_limit {
                    match rx.try_recv() {
                        Ok(SessionCommand::Post(more)) => {
                            messages.extend(more);
                            drained += 1;
                        }
                        Ok(other) => {
                            next = Some(other);
                            break;
                        }
                        Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
                    }
                }
                if drained > 1 {
                    debug!("Session {}: merged {} posts into one turn", session.id(), drained);
                }
                let response = session.handle_turn(messages);
                if !response.is_empty() {
                    let _ = responses.send(response);
                }
            }
            SessionCommand::Turn { messages, reply } => {
                let _ = reply.send(session.handle_turn(messages));
            }
            SessionCommand::Access(job) => job(&mut session),
            SessionCommand::Shutdown => break,
        }
    }

    info!(
        "Session {} stopped after {} turn(s)",
        session.id(),
        session.stats().turns
    );
}
