//! Live section feed from a tuned frontend.

use std::io;

use bytes::Bytes;
use futures::stream;
use log::{debug, warn};
use tokio::sync::broadcast;

use super::{SectionStream, TableSpec};

/// Sections of one PID received from a frontend's demultiplexer.
///
/// Only sections matching one of the subscribed tables are passed through.
pub struct LiveSectionSource {
    receiver: broadcast::Receiver<Bytes>,
    specs: Vec<TableSpec>,
}

impl LiveSectionSource {
    pub fn new(receiver: broadcast::Receiver<Bytes>, specs: Vec<TableSpec>) -> Self {
        Self { receiver, specs }
    }

    /// Receive the next subscribed section.
    ///
    /// Returns `None` once the feed is closed.
    pub async fn recv(&mut self) -> Option<Bytes> {
        loop {
            match self.receiver.recv().await {
                Ok(section) => {
                    if self.specs.iter().any(|spec| spec.matches(&section)) {
                        return Some(section);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    warn!("LiveSectionSource: lagged, {} sections dropped", count);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("LiveSectionSource: feed closed");
                    return None;
                }
            }
        }
    }

    /// Convert into a section stream.
    pub fn into_stream(self) -> SectionStream {
        Box::pin(stream::unfold(self, |mut source| async move {
            let section = source.recv().await?;
            Some((Ok::<_, io::Error>(section), source))
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_filters_by_table_id() {
        let (tx, rx) = broadcast::channel(16);
        let mut source = LiveSectionSource::new(rx, vec![TableSpec::new(900, 0xBC)]).into_stream();

        tx.send(Bytes::from_static(&[0xBD, 0x00])).unwrap();
        tx.send(Bytes::from_static(&[0xBC, 0x01])).unwrap();
        drop(tx);

        let section = source.next().await.unwrap().unwrap();
        assert_eq!(&section[..], &[0xBC, 0x01]);
        assert!(source.next().await.is_none());
    }

    #[tokio::test]
    async fn test_continues_after_lag() {
        let (tx, rx) = broadcast::channel(2);
        let mut source = LiveSectionSource::new(rx, vec![TableSpec::new(900, 0xBD)]);

        for i in 0..4u8 {
            tx.send(Bytes::from(vec![0xBD, i])).unwrap();
        }

        let section = source.recv().await.unwrap();
        assert_eq!(&section[..], &[0xBD, 2]);
    }
}
