//! FIFO mailbox process.
//!
//! A mailbox owns an ordered buffer and services exactly one of four
//! operations per iteration, whichever is ready (chosen at random by
//! `tokio::select!` when several are):
//!
//! - **empty**: the consumer took the empty signal offered while the buffer
//!   was empty
//! - **dequeue**: the consumer took the oldest buffered item
//! - **enqueue**: append an incoming item
//! - **halt**: stop, discarding whatever is still buffered
//!
//! At most one item is on offer to the consumer at a time, and it is always
//! the oldest one, so dequeue order is enqueue order.

use std::collections::VecDeque;
use std::future;

use tracing::{debug, trace};

use crate::conduit::{halt_signal, handoff, Closed, HaltRx, HaltTx, HandoffRx, HandoffTx, Offer};
use crate::error::KernelError;

/// The outside of a mailbox, held by its producers and consumer.
#[derive(Debug)]
pub struct MailboxHandles<T> {
    pub enqueue: HandoffTx<T>,
    pub dequeue: HandoffRx<T>,
    pub empty: HandoffRx<()>,
    pub halt: HaltTx,
}

pub struct Mailbox<T> {
    label: String,
    buffer: VecDeque<T>,
    enqueue: HandoffRx<T>,
    dequeue: HandoffTx<T>,
    empty: HandoffTx<()>,
    halt: HaltRx,
    /// The front item, on offer to the consumer.
    delivery: Option<Offer>,
    /// The empty signal, on offer to the consumer.
    idle: Option<Offer>,
}

/// Resolve a pending offer, or never when there is none.
async fn settle(offer: &mut Option<Offer>) -> Result<(), Closed> {
    match offer {
        Some(offer) => offer.await,
        None => future::pending().await,
    }
}

impl<T: Send + 'static> Mailbox<T> {
    pub fn new(label: impl Into<String>) -> (Self, MailboxHandles<T>) {
        let (enqueue_tx, enqueue_rx) = handoff();
        let (dequeue_tx, dequeue_rx) = handoff();
        let (empty_tx, empty_rx) = handoff();
        let (halt_tx, halt_rx) = halt_signal();

        let mailbox = Self {
            label: label.into(),
            buffer: VecDeque::new(),
            enqueue: enqueue_rx,
            dequeue: dequeue_tx,
            empty: empty_tx,
            halt: halt_rx,
            delivery: None,
            idle: None,
        };
        let handles = MailboxHandles {
            enqueue: enqueue_tx,
            dequeue: dequeue_rx,
            empty: empty_rx,
            halt: halt_tx,
        };
        (mailbox, handles)
    }

    pub async fn run(mut self) -> Result<(), KernelError> {
        let mut producers_open = true;
        let mut consumer_open = true;
        let mut empty_open = true;

        loop {
            if consumer_open && self.delivery.is_none() {
                if let Some(item) = self.buffer.pop_front() {
                    match self.dequeue.try_offer(item) {
                        Ok(offer) => self.delivery = Some(offer),
                        Err(item) => {
                            self.buffer.push_front(item);
                            consumer_open = false;
                        }
                    }
                }
            }
            let drained = self.delivery.is_none() && self.buffer.is_empty();
            if empty_open && drained && self.idle.is_none() {
                match self.empty.try_offer(()) {
                    Ok(offer) => self.idle = Some(offer),
                    Err(()) => empty_open = false,
                }
            }

            let delivering = self.delivery.is_some();
            let signalling = self.idle.is_some();

            tokio::select! {
                _ = &mut self.halt => break,

                taken = settle(&mut self.delivery), if delivering => {
                    self.delivery = None;
                    if taken.is_err() {
                        consumer_open = false;
                    }
                }

                taken = settle(&mut self.idle), if signalling => {
                    self.idle = None;
                    if taken.is_err() {
                        empty_open = false;
                    }
                }

                item = self.enqueue.recv(), if producers_open => match item {
                    Some(item) => {
                        self.buffer.push_back(item);
                        trace!(mailbox = %self.label, depth = self.buffer.len(), "enqueued");
                    }
                    None => producers_open = false,
                },
            }
        }

        let discarded = self.buffer.len() + usize::from(self.delivery.is_some());
        debug!(mailbox = %self.label, discarded, "mailbox halted");
        Ok(())
    }
}
