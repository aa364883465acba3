//! Location feed: the latest optional reading from whatever supplies the
//! user's position (browser geolocation, IP lookup, manual entry).
//!
//! Built on a `watch` channel, so readers only ever see the newest value and
//! publishing an identical reading wakes nobody.

use thiserror::Error;
use tokio::sync::watch;

use crate::geo::Location;

#[derive(Debug, Error)]
#[error("location publisher was dropped")]
pub struct FeedClosed;

/// Write side of the feed.
pub struct LocationPublisher {
    tx: watch::Sender<Option<Location>>,
}

/// Read side of the feed. Cheap to clone.
#[derive(Clone)]
pub struct LocationSource {
    rx: watch::Receiver<Option<Location>>,
}

pub fn location_feed(initial: Option<Location>) -> (LocationPublisher, LocationSource) {
    let (tx, rx) = watch::channel(initial);
    (LocationPublisher { tx }, LocationSource { rx })
}

impl LocationPublisher {
    /// Publish a new reading (or `None` when permission is withdrawn).
    /// Returns whether the reading differed from the previous one.
    pub fn publish(&self, location: Option<Location>) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == location {
                false
            } else {
                *current = location;
                true
            }
        })
    }
}

impl LocationSource {
    /// A feed that never changes.
    pub fn fixed(location: Option<Location>) -> Self {
        let (_tx, rx) = watch::channel(location);
        Self { rx }
    }

    /// The latest reading, marking it as seen.
    pub fn current(&mut self) -> Option<Location> {
        self.rx.borrow_and_update().clone()
    }

    /// Wait for a reading newer than the last one seen.
    pub async fn changed(&mut self) -> Result<(), FeedClosed> {
        self.rx.changed().await.map_err(|_| FeedClosed)
    }
}
