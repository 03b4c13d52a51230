use crate::models::Listing;
use crate::pipeline::scoring::ScoreMethod;
use crate::pipeline::state::ChangeKind;
use tokio::sync::broadcast;

/// Emitted after a listing has been stored
#[derive(Debug, Clone)]
pub enum ListingEvent {
    Stored {
        listing: Box<Listing>,
        change: ChangeKind,
        method: ScoreMethod,
    },
}

/// Fan-out channel between the ingestion pipeline and its consumers.
///
/// Publishing never blocks; slow subscribers lag and skip events.
pub struct EventBus {
    sender: broadcast::Sender<ListingEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn publish(&self, event: ListingEvent) {
        match self.sender.send(event) {
            Ok(receivers) => {
                tracing::debug!("📡 Listing event published to {} receivers", receivers);
            }
            Err(_) => {
                tracing::trace!("No subscribers for listing event");
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ListingEvent> {
        self.sender.subscribe()
    }
}
