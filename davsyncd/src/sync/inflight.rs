use std::future::Future;

use tokio_util::sync::CancellationToken;
use tracing::debug;

/// The job was aborted while (or before) a request was outstanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Aborted;

/// Owner of a job's single outstanding request.
///
/// Requests race the job's cancellation token. A request that completes
/// after cancellation is dropped here, so its result never reaches the item
/// or the journal.
#[derive(Debug)]
pub struct InFlight {
    cancel: CancellationToken,
    generation: u64,
}

impl InFlight {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            generation: 0,
        }
    }

    pub async fn run<F>(&mut self, request: F) -> Result<F::Output, Aborted>
    where
        F: Future,
    {
        if self.cancel.is_cancelled() {
            return Err(Aborted);
        }
        self.generation += 1;
        let generation = self.generation;

        let cancel = self.cancel.clone();
        let output = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            output = request => Some(output),
        };

        match output {
            Some(output) if !self.cancel.is_cancelled() => Ok(output),
            Some(_) => {
                debug!(generation, "dropping reply that arrived after abort");
                Err(Aborted)
            }
            None => {
                debug!(generation, "request cancelled");
                Err(Aborted)
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Number of requests issued so far.
    #[cfg(test)]
    fn generation(&self) -> u64 {
        self.generation
    }
}
