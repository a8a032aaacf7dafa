//! Conduits between kernel processes.
//!
//! A conduit is a rendezvous: a send completes only once the receiving side
//! has taken the item. Each item travels through a single-slot tokio channel
//! together with a oneshot acknowledgement, which the receiver fires as it
//! takes the item. A sender that stops waiting withdraws its item, and the
//! receiver skips withdrawn items without ever handing them out.
//!
//! Halt signals are one-shot. Dropping the sender counts as a halt, which ties
//! the lifetime of every internal process to the scope that owns its signal.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

pub type HaltTx = oneshot::Sender<()>;
pub type HaltRx = oneshot::Receiver<()>;

type Parcel<T> = (T, oneshot::Sender<()>);

/// The other side of a conduit is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("conduit closed")]
pub struct Closed;

/// Sending side of a conduit. Clones queue for the receiver in turn.
#[derive(Debug)]
pub struct HandoffTx<T> {
    slot: mpsc::Sender<Parcel<T>>,
}

impl<T> Clone for HandoffTx<T> {
    fn clone(&self) -> Self {
        Self {
            slot: self.slot.clone(),
        }
    }
}

/// Receiving side of a conduit.
#[derive(Debug)]
pub struct HandoffRx<T> {
    slot: mpsc::Receiver<Parcel<T>>,
}

/// An item placed in a conduit, resolved once the receiver takes it.
///
/// Dropping an unresolved offer withdraws the item.
#[derive(Debug)]
pub struct Offer {
    taken: oneshot::Receiver<()>,
}

/// Create a conduit.
pub fn handoff<T>() -> (HandoffTx<T>, HandoffRx<T>) {
    let (tx, rx) = mpsc::channel(1);
    (HandoffTx { slot: tx }, HandoffRx { slot: rx })
}

impl<T> HandoffTx<T> {
    /// Hand `item` over, waiting until the receiver has taken it.
    ///
    /// Cancelling the returned future withdraws the item.
    pub async fn send(&self, item: T) -> Result<(), Closed> {
        let (ack, taken) = oneshot::channel();
        self.slot.send((item, ack)).await.map_err(|_| Closed)?;
        Offer { taken }.await
    }

    /// Place `item` if the conduit is free right now. The item comes back
    /// when it is not, or when the receiver is gone.
    pub fn try_offer(&self, item: T) -> Result<Offer, T> {
        let (ack, taken) = oneshot::channel();
        self.slot
            .try_send((item, ack))
            .map(|()| Offer { taken })
            .map_err(|err| err.into_inner().0)
    }

    pub fn is_closed(&self) -> bool {
        self.slot.is_closed()
    }
}

impl<T> HandoffRx<T> {
    /// Take the next item. `None` once every sender is gone.
    ///
    /// Cancel-safe: an item is only taken in the same poll that returns it.
    pub async fn recv(&mut self) -> Option<T> {
        loop {
            let (item, ack) = self.slot.recv().await?;
            if ack.send(()).is_ok() {
                return Some(item);
            }
        }
    }
}

impl Future for Offer {
    type Output = Result<(), Closed>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.taken)
            .poll(cx)
            .map(|taken| taken.map_err(|_| Closed))
    }
}

/// Create a halt signal.
pub fn halt_signal() -> (HaltTx, HaltRx) {
    oneshot::channel()
}

/// Fire a halt signal. The receiver may already be gone.
pub fn halt(signal: HaltTx) {
    let _ = signal.send(());
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn send_waits_for_the_receiver() {
        let (tx, mut rx) = handoff::<u32>();

        let send = tx.send(1);
        tokio::pin!(send);
        assert!(futures::poll!(&mut send).is_pending());
        // sitting in the slot is not enough
        assert!(futures::poll!(&mut send).is_pending());

        let (sent, received) = tokio::join!(send, rx.recv());
        assert_eq!(sent, Ok(()));
        assert_eq!(received, Some(1));
    }

    #[tokio::test]
    async fn withdrawn_items_are_never_received() {
        let (tx, mut rx) = handoff::<&'static str>();

        let patience = Duration::from_millis(20);
        let stale = tokio::time::timeout(patience, tx.send("stale")).await;
        assert!(stale.is_err());

        let fresh = tx.try_offer("fresh");
        // the withdrawn item still holds the slot
        assert_eq!(fresh.unwrap_err(), "fresh");

        let (sent, received) = tokio::join!(tx.send("fresh"), rx.recv());
        assert_eq!(sent, Ok(()));
        assert_eq!(received, Some("fresh"));
    }

    #[tokio::test]
    async fn offer_resolves_when_taken() {
        let (tx, mut rx) = handoff::<u32>();

        let offer = tx.try_offer(7).unwrap();
        assert_eq!(rx.recv().await, Some(7));
        assert_eq!(offer.await, Ok(()));
    }

    #[tokio::test]
    async fn dropped_receiver_fails_pending_sends() {
        let (tx, rx) = handoff::<u32>();

        let offer = tx.try_offer(7).unwrap();
        drop(rx);
        assert_eq!(offer.await, Err(Closed));
        assert_eq!(tx.send(8).await, Err(Closed));
        assert!(tx.is_closed());
    }

    #[tokio::test]
    async fn recv_ends_when_senders_are_gone() {
        let (tx, mut rx) = handoff::<u32>();
        drop(tx);
        assert_eq!(rx.recv().await, None);
    }
}
