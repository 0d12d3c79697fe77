//! Recovery after a dropped realtime connection
//!
//! Rows pushed while the socket was down are lost, so views re-query
//! instead of reconciling the gap: wait on [`Resync::reconnected`], then call
//! the view's `load`/`reload` (`FeedController::retry`, `ChatThread::load`,
//! `Inbox::reload`).

use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};

use skillfeed_realtime::{ConnectionState, RealtimeClient};

pub const DEFAULT_RETRY_EVERY: Duration = Duration::from_secs(3);

pub struct Resync {
    realtime: RealtimeClient,
    states: broadcast::Receiver<ConnectionState>,
    retry_every: Duration,
}

impl Resync {
    pub fn new(realtime: &RealtimeClient) -> Self {
        Self {
            realtime: realtime.clone(),
            states: realtime.on_state_change(),
            retry_every: DEFAULT_RETRY_EVERY,
        }
    }

    pub fn with_retry_every(mut self, retry_every: Duration) -> Self {
        self.retry_every = retry_every;
        self
    }

    async fn dropped(&mut self) -> bool {
        loop {
            match self.states.recv().await {
                Ok(ConnectionState::Disconnected) => return true,
                Ok(_) => {}
                Err(RecvError::Lagged(_)) => {
                    if self.realtime.get_connection_state().await == ConnectionState::Disconnected {
                        return true;
                    }
                }
                Err(RecvError::Closed) => return false,
            }
        }
    }

    /// Resolves once a dropped connection is back and its channels are
    /// joined again; `false` when the client is gone.
    ///
    /// An explicit disconnect forgets every channel and is not followed by a
    /// reconnect.
    pub async fn reconnected(&mut self) -> bool {
        loop {
            if !self.dropped().await {
                return false;
            }
            debug!("realtime connection lost");
            loop {
                match self.realtime.rejoin().await {
                    Ok(0) => break,
                    Ok(joined) => {
                        info!(channels = joined, "realtime reconnected");
                        // Our own reconnect produced these transitions.
                        self.states = self.states.resubscribe();
                        return true;
                    }
                    Err(e) => {
                        warn!(error = %e, "realtime reconnect failed");
                        tokio::time::sleep(self.retry_every).await;
                    }
                }
            }
        }
    }
}
