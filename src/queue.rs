//! Ordered configuration channel: any number of producers, one worker.

use crate::config::ConfigurationRequest;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TryRecvError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("worker has stopped, request dropped")]
    WorkerStopped,
}

pub fn config_queue() -> (ConfigSender, ConfigReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ConfigSender { tx }, ConfigReceiver { rx })
}

/// Producer end. Cheap to clone; `enqueue` never blocks.
#[derive(Debug, Clone)]
pub struct ConfigSender {
    tx: mpsc::UnboundedSender<ConfigurationRequest>,
}

impl ConfigSender {
    pub fn enqueue(&self, request: ConfigurationRequest) -> Result<(), QueueError> {
        self.tx.send(request).map_err(|_| QueueError::WorkerStopped)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[derive(Debug)]
pub struct ConfigReceiver {
    rx: mpsc::UnboundedReceiver<ConfigurationRequest>,
}

impl ConfigReceiver {
    /// Next pending request, if one is already queued.
    pub fn try_next(&mut self) -> Option<ConfigurationRequest> {
        match self.rx.try_recv() {
            Ok(request) => Some(request),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Waits for the next request; `None` once every producer is gone.
    pub async fn next(&mut self) -> Option<ConfigurationRequest> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_fifo_across_producers() {
        let (sender, mut receiver) = config_queue();

        let producers: Vec<_> = (0..4u32)
            .map(|producer| {
                let sender = sender.clone();
                thread::spawn(move || {
                    for n in 0..25u32 {
                        let request = ConfigurationRequest::new(producer * 1000 + n, 1_000_000);
                        sender.enqueue(request).unwrap();
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }

        let mut received = Vec::new();
        while let Some(request) = receiver.try_next() {
            received.push(request.frequency_hz);
        }
        assert_eq!(received.len(), 100);

        // Each producer's requests keep their relative order
        for producer in 0..4u32 {
            let own: Vec<_> = received.iter().filter(|f| **f / 1000 == producer).collect();
            assert!(own.windows(2).all(|w| w[0] < w[1]));
        }
    }

    #[test]
    fn test_enqueue_after_receiver_dropped() {
        let (sender, receiver) = config_queue();
        drop(receiver);
        assert!(sender.is_closed());
        assert_eq!(
            sender.enqueue(ConfigurationRequest::new(1, 1)),
            Err(QueueError::WorkerStopped)
        );
    }
}
