//! In-process rank transport.
//!
//! Ranks living in one process exchange packets over crossbeam channels
//! and all-gather LBTS records through a slot vector guarded by a shared
//! barrier. This is the reference `RankTransport`; a real deployment
//! substitutes MPI or similar behind the same trait.

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use parsim_core::{LbtsMessage, RankTransport, TransportError};
use parsim_types::Time;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Barrier};
use tracing::trace;

/// A serialized-in-spirit inter-rank event: which node it targets, when
/// it fires, and an opaque host payload.
#[derive(Debug, Clone)]
pub struct Packet<M> {
    /// Target node (context) on the receiving rank.
    pub context: u32,
    /// Absolute firing time.
    pub ts: Time,
    /// Host payload; the receive handler turns it back into an event.
    pub payload: M,
}

/// State shared by every rank of one in-process cluster.
struct Hub {
    slots: Mutex<Vec<Option<LbtsMessage>>>,
    barrier: Barrier,
}

type PacketHandler<M> = Box<dyn FnMut(Packet<M>) + Send>;

/// One rank's endpoint of the in-process cluster.
pub struct ChannelTransport<M: Send + 'static> {
    rank: u32,
    size: u32,
    hub: Arc<Hub>,
    incoming: Receiver<Packet<M>>,
    /// Senders into every rank's mailbox; emptied by `quiesce`.
    peers: Mutex<Vec<Sender<Packet<M>>>>,
    rx: AtomicU32,
    tx: AtomicU32,
    /// Delivery hook; the host wires this to its simulator's
    /// `schedule_with_context`.
    handler: Mutex<Option<PacketHandler<M>>>,
}

impl<M: Send + 'static> ChannelTransport<M> {
    /// Build a cluster of `size` connected endpoints, indexed by rank.
    pub fn cluster(size: u32) -> Vec<ChannelTransport<M>> {
        let hub = Arc::new(Hub {
            slots: Mutex::new(vec![None; size as usize]),
            barrier: Barrier::new(size as usize),
        });

        let channels: Vec<_> = (0..size).map(|_| crossbeam_channel::unbounded()).collect();
        let senders: Vec<Sender<Packet<M>>> =
            channels.iter().map(|(tx, _)| tx.clone()).collect();

        channels
            .into_iter()
            .enumerate()
            .map(|(rank, (_, incoming))| ChannelTransport {
                rank: rank as u32,
                size,
                hub: Arc::clone(&hub),
                incoming,
                peers: Mutex::new(senders.clone()),
                rx: AtomicU32::new(0),
                tx: AtomicU32::new(0),
                handler: Mutex::new(None),
            })
            .collect()
    }

    /// Register the delivery hook invoked for every received packet.
    pub fn set_handler(&self, handler: impl FnMut(Packet<M>) + Send + 'static) {
        *self.handler.lock() = Some(Box::new(handler));
    }

    /// Post a packet to another rank. Counted in `tx_count` immediately;
    /// the receiver counts it once delivered into its simulator.
    pub fn send(&self, to_rank: u32, packet: Packet<M>) {
        self.tx.fetch_add(1, Ordering::Release);
        let peers = self.peers.lock();
        peers
            .get(to_rank as usize)
            .expect("transport quiesced or unknown rank")
            .send(packet)
            .expect("peer rank endpoint dropped");
    }
}

impl<M: Send + 'static> RankTransport for ChannelTransport<M> {
    fn receive_messages(&self) {
        let mut handler = self.handler.lock();
        while let Ok(packet) = self.incoming.try_recv() {
            self.rx.fetch_add(1, Ordering::Release);
            trace!(rank = self.rank, context = packet.context, ts = %packet.ts, "packet delivered");
            if let Some(handler) = handler.as_mut() {
                handler(packet);
            }
        }
    }

    fn test_send_complete(&self) {
        // Channel sends complete synchronously; nothing to poll.
    }

    fn rx_count(&self) -> u32 {
        self.rx.load(Ordering::Acquire)
    }

    fn tx_count(&self) -> u32 {
        self.tx.load(Ordering::Acquire)
    }

    fn rank(&self) -> u32 {
        self.rank
    }

    fn size(&self) -> u32 {
        self.size
    }

    fn allgather(&self, local: LbtsMessage) -> Result<Vec<LbtsMessage>, TransportError> {
        self.hub.slots.lock()[self.rank as usize] = Some(local);
        self.hub.barrier.wait();
        let records = {
            let slots = self.hub.slots.lock();
            slots
                .iter()
                .map(|slot| slot.ok_or_else(|| TransportError::Collective("missing rank record".into())))
                .collect::<Result<Vec<_>, _>>()?
        };
        // Keep the next round's writers out until every rank has read.
        self.hub.barrier.wait();
        Ok(records)
    }

    fn quiesce(&self) {
        // Deliver anything already in flight, then detach from the
        // cluster: the mailbox senders drop and the handler is released.
        self.receive_messages();
        self.peers.lock().clear();
        *self.handler.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_packets_flow_between_ranks() {
        let mut cluster = ChannelTransport::<u32>::cluster(2);
        let b = cluster.pop().unwrap();
        let a = cluster.pop().unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        b.set_handler(move |packet: Packet<u32>| sink.lock().push(packet.payload));

        a.send(
            1,
            Packet {
                context: 6,
                ts: Time::millis(9),
                payload: 42,
            },
        );
        assert_eq!(a.tx_count(), 1);
        assert_eq!(b.rx_count(), 0);

        b.receive_messages();
        assert_eq!(b.rx_count(), 1);
        assert_eq!(*seen.lock(), vec![42]);
    }

    #[test]
    fn test_quiesce_delivers_pending_then_detaches() {
        let mut cluster = ChannelTransport::<u32>::cluster(2);
        let b = cluster.pop().unwrap();
        let a = cluster.pop().unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        b.set_handler(move |packet: Packet<u32>| sink.lock().push(packet.payload));

        a.send(
            1,
            Packet {
                context: 6,
                ts: Time::millis(1),
                payload: 7,
            },
        );
        b.quiesce();

        // The in-flight packet was still delivered and counted.
        assert_eq!(b.rx_count(), 1);
        assert_eq!(*seen.lock(), vec![7]);
    }

    #[test]
    fn test_allgather_collects_every_rank() {
        let cluster = ChannelTransport::<()>::cluster(3);
        let handles: Vec<_> = cluster
            .into_iter()
            .map(|endpoint| {
                thread::spawn(move || {
                    let local = LbtsMessage::new(
                        0,
                        0,
                        endpoint.rank(),
                        false,
                        Time::millis(i64::from(endpoint.rank()) + 1),
                    );
                    endpoint.allgather(local).unwrap()
                })
            })
            .collect();

        for handle in handles {
            let records = handle.join().unwrap();
            assert_eq!(records.len(), 3);
            for (rank, record) in records.iter().enumerate() {
                assert_eq!(record.rank, rank as u32);
                assert_eq!(record.smallest_time(), Time::millis(rank as i64 + 1));
            }
        }
    }
}
