use crate::{sender::FlowId, time::SimTime};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Event at {now} delivered after an event at {previous}")]
    InconsistentTimestamp { previous: SimTime, now: SimTime },
    #[error("Unknown flow {0}")]
    UnknownFlow(FlowId),
    #[error("Flow {0} is already open")]
    DuplicateFlow(FlowId),
    #[error("Encounter IO error, {0}")]
    IoError(#[from] std::io::Error),
    #[cfg(feature = "serde")]
    #[error("Serde error: {0}")]
    SerdeError(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn config<S: Into<String>>(msg: S) -> Self {
        Error::InvalidConfiguration(msg.into())
    }
}

/// Guards the monotonic event order of one link or flow table.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct EventClock {
    last: Option<SimTime>,
}

impl EventClock {
    pub(crate) fn observe(&mut self, now: SimTime) -> Result<()> {
        match self.last {
            Some(previous) if now < previous => {
                tracing::error!(%previous, %now, "Event delivered out of order");
                Err(Error::InconsistentTimestamp { previous, now })
            }
            _ => {
                self.last = Some(now);
                Ok(())
            }
        }
    }
}
