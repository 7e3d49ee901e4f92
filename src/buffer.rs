use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Create a bounded buffer between two pipeline components.
///
/// Sending waits while `capacity` items are buffered. Dropping every sender
/// ends the stream once the receiver has taken the remaining items.
pub fn channel<T: Send>(capacity: usize) -> (BufferSender<T>, BufferReceiver<T>) {
    let capacity = capacity.max(1);
    let (tx, rx) = mpsc::channel(capacity);
    let gauge = BufferGauge {
        len: Arc::new(AtomicUsize::new(0)),
        capacity,
    };
    (
        BufferSender {
            tx,
            gauge: gauge.clone(),
        },
        BufferReceiver { rx, gauge },
    )
}

/// Read-only view of a buffer's occupancy
#[derive(Debug, Clone)]
pub struct BufferGauge {
    len: Arc<AtomicUsize>,
    capacity: usize,
}

impl BufferGauge {
    /// Number of items currently buffered
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Buffer utilization as a percentage (0-100)
    pub fn utilization(&self) -> u32 {
        ((self.len() * 100) / self.capacity).min(100) as u32
    }
}

/// Error returned when the receiving side of a buffer is gone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Disconnected;

/// Producing half of a bounded buffer
#[derive(Debug)]
pub struct BufferSender<T> {
    tx: mpsc::Sender<T>,
    gauge: BufferGauge,
}

impl<T: Send> BufferSender<T> {
    /// Push an item, waiting for room if the buffer is full
    pub async fn send(&self, item: T) -> Result<(), Disconnected> {
        let permit = self.tx.reserve().await.map_err(|_| Disconnected)?;
        self.gauge.len.fetch_add(1, Ordering::AcqRel);
        permit.send(item);
        Ok(())
    }

    /// Wait until the buffer has room for at least one more item
    pub async fn ready(&self) -> Result<(), Disconnected> {
        self.tx.reserve().await.map(drop).map_err(|_| Disconnected)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub fn gauge(&self) -> BufferGauge {
        self.gauge.clone()
    }
}

/// Consuming half of a bounded buffer
#[derive(Debug)]
pub struct BufferReceiver<T> {
    rx: mpsc::Receiver<T>,
    gauge: BufferGauge,
}

impl<T: Send> BufferReceiver<T> {
    /// Take the next item, or `None` once all senders are gone and the buffer
    /// is empty
    pub async fn recv(&mut self) -> Option<T> {
        let item = self.rx.recv().await?;
        self.gauge.len.fetch_sub(1, Ordering::AcqRel);
        Some(item)
    }

    pub fn gauge(&self) -> BufferGauge {
        self.gauge.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_buffer_send_recv() {
        let (tx, mut rx) = channel(10);
        tx.send(42).await.unwrap();
        assert_eq!(tx.gauge().len(), 1);
        assert_eq!(rx.recv().await, Some(42));
        assert!(rx.gauge().is_empty());
    }

    #[tokio::test]
    async fn test_buffer_utilization() {
        let (tx, _rx) = channel(10);
        for i in 0..5 {
            tx.send(i).await.unwrap();
        }
        assert_eq!(tx.gauge().utilization(), 50);
    }

    #[tokio::test]
    async fn test_end_of_stream_after_drain() {
        let (tx, mut rx) = channel(4);
        tx.send(1).await.unwrap();
        tx.send(2).await.unwrap();
        drop(tx);
        assert_eq!(rx.recv().await, Some(1));
        assert_eq!(rx.recv().await, Some(2));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_full_buffer_waits() {
        let (tx, mut rx) = channel(1);
        tx.send(1).await.unwrap();

        let ready = tokio::time::timeout(std::time::Duration::from_millis(10), tx.ready()).await;
        assert!(ready.is_err(), "full buffer must not report room");

        rx.recv().await;
        assert!(tx.ready().await.is_ok());
    }

    #[tokio::test]
    async fn test_disconnected() {
        let (tx, rx) = channel::<u8>(2);
        drop(rx);
        assert!(tx.is_closed());
        assert_eq!(tx.send(1).await, Err(Disconnected));
    }

    #[test]
    fn test_capacity() {
        let (tx, _rx) = channel::<i32>(42);
        assert_eq!(tx.gauge().capacity(), 42);
    }
}
