use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::broadcast;

use common::Block;

use crate::error::{Error, Result};

/// Live fan-out of archived blocks to downstream consumers.
///
/// Subscribers each see every block pushed after they subscribe; a slow
/// subscriber that overruns the channel misses blocks and is expected to
/// resynchronize from the archive. Having no subscribers at all is fine,
/// the stream is best-effort.
///
/// Pushing into a server that has been [`close`](Self::close)d fails, and
/// the plugin's consumer loop escalates that failure to a pipeline
/// shutdown: a dead downstream surface while blocks are still flowing
/// means the fan-out contract is broken.
pub struct BlockStreamServer {
    tx: broadcast::Sender<Block>,
    closed: AtomicBool,
}

impl BlockStreamServer {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            closed: AtomicBool::new(false),
        }
    }

    pub fn push_block(&self, block: Block) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::BlockStream(format!(
                "cannot push block #{}: server is closed",
                block.num
            )));
        }
        let _ = self.tx.send(block);
        Ok(())
    }

    /// Marks the server closed, typically when its serving transport goes
    /// away. Subsequent pushes fail.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Block> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl std::fmt::Debug for BlockStreamServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockStreamServer")
            .field("subscribers", &self.subscriber_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use chrono::Utc;

    fn block(num: u64) -> Block {
        Block {
            num,
            id: format!("{:x}", num),
            previous_id: format!("{:x}", num - 1),
            timestamp: Utc::now(),
            lib_num: 0,
            payload: Bytes::new(),
        }
    }

    #[tokio::test]
    async fn should_fan_out_to_every_subscriber() {
        let server = BlockStreamServer::new(8);
        let mut first = server.subscribe();
        let mut second = server.subscribe();

        server.push_block(block(1)).unwrap();
        server.push_block(block(2)).unwrap();

        assert_eq!(first.recv().await.unwrap().num, 1);
        assert_eq!(first.recv().await.unwrap().num, 2);
        assert_eq!(second.recv().await.unwrap().num, 1);
        assert_eq!(second.recv().await.unwrap().num, 2);
    }

    #[tokio::test]
    async fn should_accept_pushes_without_subscribers() {
        let server = BlockStreamServer::new(8);
        server.push_block(block(1)).unwrap();
        assert_eq!(server.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn should_reject_pushes_after_close() {
        let server = BlockStreamServer::new(8);
        server.push_block(block(1)).unwrap();

        server.close();
        assert!(server.is_closed());

        let err = server.push_block(block(2)).unwrap_err();
        assert!(matches!(err, Error::BlockStream(_)));
    }
}
