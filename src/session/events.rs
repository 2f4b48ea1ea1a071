//! Session event stream.
//!
//! The session reports graph changes and completion on a broadcast channel.
//! Any number of receivers can follow it, synchronously with
//! [`EventReceiver::try_recv`] or from async code with
//! [`EventReceiver::recv`].

use crate::filter::FilterId;
use std::fmt;
use tokio::sync::broadcast;

/// Events emitted by a session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A filter was loaded, explicitly or by the graph resolver.
    FilterLoaded {
        /// Session id.
        id: FilterId,
        /// Register name.
        name: String,
        /// Inserted by the graph resolver.
        dynamic: bool,
    },

    /// A filter was destroyed.
    FilterRemoved {
        /// Session id.
        id: FilterId,
        /// Register name.
        name: String,
    },

    /// A pid was connected to a consumer.
    PidConnected {
        /// Pid name.
        pid: String,
        /// Producing filter.
        source: String,
        /// Consuming filter.
        destination: String,
    },

    /// A pid was disconnected from a consumer.
    PidDisconnected {
        /// Pid name.
        pid: String,
        /// Producing filter.
        source: String,
        /// Consuming filter.
        destination: String,
    },

    /// A chain of filters was resolved to reach a destination.
    ChainResolved {
        /// Pid name.
        pid: String,
        /// Register names of the inserted filters.
        chain: Vec<String>,
        /// Destination filter.
        destination: String,
    },

    /// A filter failed to set up and will be removed.
    SetupFailed {
        /// Filter name.
        filter: String,
        /// Failure reason.
        reason: String,
    },

    /// A fatal status was reported.
    Error {
        /// The error message.
        message: String,
        /// The filter reporting it, if known.
        filter: Option<String>,
    },

    /// A run of the session completed.
    Finished,
}

impl fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionEvent::FilterLoaded { id, name, dynamic } => {
                let kind = if *dynamic { "dynamic " } else { "" };
                write!(f, "Loaded {kind}filter {name} ({id})")
            }
            SessionEvent::FilterRemoved { id, name } => write!(f, "Removed filter {name} ({id})"),
            SessionEvent::PidConnected {
                pid,
                source,
                destination,
            } => write!(f, "Connected {source}.{pid} -> {destination}"),
            SessionEvent::PidDisconnected {
                pid,
                source,
                destination,
            } => write!(f, "Disconnected {source}.{pid} -> {destination}"),
            SessionEvent::ChainResolved {
                pid,
                chain,
                destination,
            } => write!(f, "Resolved {pid} -> [{}] -> {destination}", chain.join(", ")),
            SessionEvent::SetupFailed { filter, reason } => write!(f, "Setup of {filter} failed: {reason}"),
            SessionEvent::Error { message, filter } => match filter {
                Some(filter) => write!(f, "Error in {filter}: {message}"),
                None => write!(f, "Error: {message}"),
            },
            SessionEvent::Finished => write!(f, "Session finished"),
        }
    }
}

/// Sender for session events.
#[derive(Clone)]
pub struct EventSender {
    sender: broadcast::Sender<SessionEvent>,
}

impl EventSender {
    /// Create a sender with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Send an event.
    ///
    /// Returns the number of receivers that got it; 0 without receivers.
    pub fn send(&self, event: SessionEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    /// Send an error event.
    pub fn send_error(&self, message: impl Into<String>, filter: Option<String>) {
        self.send(SessionEvent::Error {
            message: message.into(),
            filter,
        });
    }

    /// Create a receiver.
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }
}

impl Default for EventSender {
    fn default() -> Self {
        Self::new(256)
    }
}

impl fmt::Debug for EventSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSender")
            .field("receivers", &self.sender.receiver_count())
            .finish()
    }
}

/// Receiver for session events.
pub struct EventReceiver {
    receiver: broadcast::Receiver<SessionEvent>,
}

impl EventReceiver {
    /// Receive the next event.
    ///
    /// Returns `None` once the session is dropped. Events missed because
    /// the receiver lagged are skipped.
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Receive an event without waiting.
    pub fn try_recv(&mut self) -> Option<SessionEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }

    /// Every event available now.
    pub fn drain(&mut self) -> Vec<SessionEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }

    /// Wait for the end of a run.
    ///
    /// Returns `Ok(())` on [`SessionEvent::Finished`] and `Err(message)` on
    /// the first error.
    pub async fn wait_finished(&mut self) -> Result<(), String> {
        while let Some(event) = self.recv().await {
            match event {
                SessionEvent::Finished => return Ok(()),
                SessionEvent::Error { message, filter } => {
                    return Err(match filter {
                        Some(filter) => format!("Error in {filter}: {message}"),
                        None => message,
                    });
                }
                _ => continue,
            }
        }
        Err("Event channel closed unexpectedly".to_string())
    }
}

impl fmt::Debug for EventReceiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventReceiver").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_display() {
        let event = SessionEvent::PidConnected {
            pid: "video".into(),
            source: "demux".into(),
            destination: "decoder".into(),
        };
        assert_eq!(event.to_string(), "Connected demux.video -> decoder");
        let event = SessionEvent::ChainResolved {
            pid: "video".into(),
            chain: vec!["a".into(), "b".into()],
            destination: "sink".into(),
        };
        assert_eq!(event.to_string(), "Resolved video -> [a, b] -> sink");
    }

    #[test]
    fn test_send_without_receivers() {
        let sender = EventSender::new(4);
        assert_eq!(sender.send(SessionEvent::Finished), 0);
    }

    #[test]
    fn test_try_recv_and_drain() {
        let sender = EventSender::new(8);
        let mut receiver = sender.subscribe();
        sender.send(SessionEvent::Finished);
        sender.send_error("boom", Some("src".into()));
        let events = receiver.drain();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], SessionEvent::Finished);
        assert!(receiver.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_wait_finished() {
        let sender = EventSender::new(8);
        let mut receiver = sender.subscribe();
        sender.send(SessionEvent::FilterRemoved {
            id: FilterId(1),
            name: "src".into(),
        });
        sender.send(SessionEvent::Finished);
        assert_eq!(receiver.wait_finished().await, Ok(()));

        sender.send_error("boom", Some("src".into()));
        assert_eq!(receiver.wait_finished().await, Err("Error in src: boom".to_string()));
    }
}
