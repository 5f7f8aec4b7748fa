//! Commands sent to a session actor from the websocket relay and the
//! tasks the actor spawns itself.

use std::sync::Arc;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use wabridge_connector_core::{AutomationClient, ClientEvent};
use wabridge_protocol::SessionInfo;

use crate::error::RelayError;

/// Result of asking a session to start.
#[derive(Debug, Clone, PartialEq)]
pub enum StartOutcome {
    /// Client already ready; the requester gets a catch-up
    AlreadyReady(SessionInfo),
    /// A new client generation is being constructed
    Started { generation: u64 },
    /// Construction already in flight; wait for the fan-out
    AlreadyInitializing,
    /// Construction failed synchronously (also broadcast)
    Failed(RelayError),
}

/// A client borrowed for one operation, tied to the generation it came from.
#[derive(Clone)]
pub struct ClientLease {
    pub client: Arc<dyn AutomationClient>,
    pub generation: u64,
    pub cancel: CancellationToken,
}

impl std::fmt::Debug for ClientLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientLease")
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

/// A command that can be sent to a session actor.
pub enum SessionCommand {
    // -- Requests from connections --
    /// Construct and start a client unless one exists or is being built
    Start {
        reply: oneshot::Sender<StartOutcome>,
    },

    /// Borrow the client for an operation; fails with `not_ready`
    /// unless the session is ready
    Lease {
        reply: oneshot::Sender<Result<ClientLease, RelayError>>,
    },

    /// Borrow the client for logout; fails with `no_active_session`
    /// when there is no client at all
    LogoutLease {
        reply: oneshot::Sender<Result<ClientLease, RelayError>>,
    },

    /// Logout and teardown completed for `generation`
    LogoutFinished { generation: u64 },

    /// Logout of `generation` failed or timed out; the relay no longer
    /// tears the client down
    LogoutFailed { generation: u64 },

    /// An operation on `generation` exceeded its deadline
    OperationTimedOut {
        generation: u64,
        action: &'static str,
    },

    // -- From tasks the actor spawned --
    /// Lifecycle event from the client of `generation`
    ClientEvent {
        generation: u64,
        event: ClientEvent,
    },

    /// Startup of `generation` finished
    StartFinished {
        generation: u64,
        result: Result<(), StartFailure>,
    },

    // -- Lifecycle --
    /// Destroy the client and stop the actor
    Shutdown { reply: oneshot::Sender<()> },
}

/// Why a client startup did not complete
#[derive(Debug, Clone, PartialEq)]
pub enum StartFailure {
    Error(String),
    TimedOut,
}
