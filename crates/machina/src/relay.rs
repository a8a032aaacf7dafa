//! Pass-through process between two conduits.

use tracing::{debug, trace};

use crate::conduit::{halt_signal, HaltRx, HaltTx, HandoffRx, HandoffTx};
use crate::error::KernelError;

/// Forwards one item at a time from `input` to `output`, preserving order.
///
/// Both the receive and the forward race against halt, so a relay stuck
/// waiting for a downstream receiver still stops promptly.
pub struct Relay<T> {
    label: String,
    input: HandoffRx<T>,
    output: HandoffTx<T>,
    halt: HaltRx,
}

impl<T: Send + 'static> Relay<T> {
    pub fn new(
        label: impl Into<String>,
        input: HandoffRx<T>,
        output: HandoffTx<T>,
    ) -> (Self, HaltTx) {
        let (halt_tx, halt_rx) = halt_signal();
        let relay = Self {
            label: label.into(),
            input,
            output,
            halt: halt_rx,
        };
        (relay, halt_tx)
    }

    pub async fn run(mut self) -> Result<(), KernelError> {
        let mut forwarded: u64 = 0;

        loop {
            let item = tokio::select! {
                _ = &mut self.halt => break,
                item = self.input.recv() => match item {
                    Some(item) => item,
                    None => {
                        // upstream is gone; nothing more will come
                        let _ = (&mut self.halt).await;
                        break;
                    }
                },
            };

            tokio::select! {
                _ = &mut self.halt => break,
                delivered = self.output.send(item) => {
                    if delivered.is_err() {
                        break;
                    }
                }
            }

            forwarded += 1;
            trace!(relay = %self.label, forwarded, "forwarded");
        }

        debug!(relay = %self.label, forwarded, "relay halted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conduit::{halt, handoff};

    #[tokio::test]
    async fn forwards_in_order() {
        let (in_tx, in_rx) = handoff::<u32>();
        let (out_tx, mut out_rx) = handoff::<u32>();
        let (relay, halt_tx) = Relay::new("order", in_rx, out_tx);
        let task = tokio::spawn(relay.run());

        let producer = tokio::spawn(async move {
            for n in 0..50 {
                in_tx.send(n).await.unwrap();
            }
            in_tx
        });
        let mut seen = Vec::new();
        for _ in 0..50 {
            seen.push(out_rx.recv().await.unwrap());
        }
        let _in_tx = producer.await.unwrap();

        assert_eq!(seen, (0..50).collect::<Vec<_>>());
        halt(halt_tx);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn halts_while_waiting_for_downstream() {
        let (in_tx, in_rx) = handoff::<u32>();
        let (out_tx, mut out_rx) = handoff::<u32>();
        let (relay, halt_tx) = Relay::new("blocked", in_rx, out_tx);
        let task = tokio::spawn(relay.run());

        // the relay takes the item, then nobody takes it from the relay
        in_tx.send(1).await.unwrap();
        tokio::task::yield_now().await;
        assert!(!task.is_finished());

        halt(halt_tx);
        task.await.unwrap().unwrap();
        // the undelivered item was withdrawn
        assert_eq!(out_rx.recv().await, None);
    }

    #[tokio::test]
    async fn closed_upstream_waits_for_halt() {
        let (in_tx, in_rx) = handoff::<u32>();
        let (out_tx, _out_rx) = handoff::<u32>();
        let (relay, halt_tx) = Relay::new("idle", in_rx, out_tx);
        let task = tokio::spawn(relay.run());

        drop(in_tx);
        tokio::task::yield_now().await;
        assert!(!task.is_finished());

        halt(halt_tx);
        task.await.unwrap().unwrap();
    }
}
