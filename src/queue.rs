use std::sync::mpsc;

use crate::comment::PendingComment;
use crate::error::OverlayError;

/// Producer handle of the [`CommentQueue`]. Clone one per ingest thread.
#[derive(Debug, Clone)]
pub struct CommentSender {
    sender: mpsc::Sender<PendingComment>,
}

impl CommentSender {
    /// Never blocks. Fails only once the render side has been torn down.
    pub fn enqueue(&self, comment: PendingComment) -> Result<(), OverlayError> {
        self.sender
            .send(comment)
            .map_err(|_| OverlayError::QueueClosed)
    }
}

/// Unbounded hand-off from any number of producers to the single render
/// thread. Each producer's submission order is preserved.
#[derive(Debug)]
pub struct CommentQueue {
    sender: mpsc::Sender<PendingComment>,
    receiver: mpsc::Receiver<PendingComment>,
}

impl CommentQueue {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::channel();
        Self { sender, receiver }
    }

    pub fn sender(&self) -> CommentSender {
        CommentSender {
            sender: self.sender.clone(),
        }
    }

    pub fn enqueue(&self, comment: PendingComment) -> Result<(), OverlayError> {
        self.sender
            .send(comment)
            .map_err(|_| OverlayError::QueueClosed)
    }

    /// Removes everything queued so far, in arrival order. Never blocks.
    pub fn drain_all(&self) -> Vec<PendingComment> {
        self.receiver.try_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::CommentQueue;
    use crate::comment::{PendingComment, Rgba};
    use crate::error::OverlayError;

    fn pending(text: &str) -> PendingComment {
        PendingComment::new(text, Rgba::WHITE).unwrap()
    }

    #[test]
    fn drain_returns_fifo_then_empty() {
        let queue = CommentQueue::new();
        queue.enqueue(pending("a")).unwrap();
        queue.sender().enqueue(pending("b")).unwrap();

        let drained = queue.drain_all();
        let texts = drained.iter().map(|c| c.text()).collect::<Vec<_>>();
        assert_eq!(texts, vec!["a", "b"]);
        assert!(queue.drain_all().is_empty());
    }

    #[test]
    fn interleaved_producers_keep_their_own_order() {
        let queue = CommentQueue::new();
        let workers = (0..2)
            .map(|producer| {
                let sender = queue.sender();
                thread::spawn(move || {
                    for seq in 0..500 {
                        sender
                            .enqueue(pending(&format!("{producer}:{seq}")))
                            .unwrap();
                    }
                })
            })
            .collect::<Vec<_>>();
        for worker in workers {
            worker.join().unwrap();
        }

        let mut last_seen = [None::<u32>; 2];
        let drained = queue.drain_all();
        assert_eq!(drained.len(), 1000);
        for comment in drained {
            let (producer, seq) = comment.text().split_once(':').unwrap();
            let producer = producer.parse::<usize>().unwrap();
            let seq = seq.parse::<u32>().unwrap();
            if let Some(previous) = last_seen[producer] {
                assert!(seq > previous, "producer {producer} reordered");
            }
            last_seen[producer] = Some(seq);
        }
    }

    #[test]
    fn sender_reports_closed_queue() {
        let queue = CommentQueue::new();
        let sender = queue.sender();
        drop(queue);
        assert_eq!(sender.enqueue(pending("late")), Err(OverlayError::QueueClosed));
    }
}
