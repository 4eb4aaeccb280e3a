//! # Message Bus
//!
//! The transport contract between peer ranks: tagged point-to-point and
//! broadcast delivery of opaque payloads, FIFO per (sender, receiver, tag).
//! `LocalBus` is the in-process reference implementation backing the tests
//! and the demo fleet; a real deployment would put an RPC layer behind the
//! same trait.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use hashbrown::HashMap;
use parking_lot::{Condvar, Mutex};

use crate::error::{PtabError, PtabResult};
use crate::message::Tag;
use crate::types::Rank;

/// Tagged delivery between a fixed set of ranks.
///
/// Blocking receives park the calling thread until a matching message
/// arrives; there are no timeouts at this layer (the transport is assumed
/// reliable and in order).
pub trait MessageBus: Send + Sync {
    /// This endpoint's rank.
    fn rank(&self) -> Rank;

    /// Total number of ranks on the bus.
    fn ranks(&self) -> usize;

    /// Delivers `payload` to `to` on the given tag.
    fn send(&self, to: Rank, tag: Tag, payload: Bytes) -> PtabResult<()>;

    /// Sends `payload` to every rank except the caller.
    fn broadcast(&self, tag: Tag, payload: Bytes) -> PtabResult<()> {
        for rank in 0..self.ranks() {
            if rank != self.rank() {
                self.send(rank, tag, payload.clone())?;
            }
        }
        Ok(())
    }

    /// Blocks until a message with `tag` arrives from any rank.
    fn recv(&self, tag: Tag) -> PtabResult<(Rank, Bytes)>;

    /// Blocks until a message with `tag` arrives from `from` specifically.
    fn recv_from(&self, from: Rank, tag: Tag) -> PtabResult<Bytes>;

    /// Blocks until a message arrives on any of the listed tags.
    fn recv_any(&self, tags: &[Tag]) -> PtabResult<(Tag, Rank, Bytes)>;

    /// Non-blocking probe-and-receive for `tag`.
    fn try_recv(&self, tag: Tag) -> Option<(Rank, Bytes)>;
}

/// Per-rank inbox: one queue per tag behind a single lock, with a condvar
/// shared by every receive path so senders wake all waiters.
struct Mailbox {
    queues: Mutex<HashMap<Tag, VecDeque<(Rank, Bytes)>>>,
    ready: Condvar,
}

impl Mailbox {
    fn new() -> Self {
        Mailbox {
            queues: Mutex::new(HashMap::new()),
            ready: Condvar::new(),
        }
    }
}

struct Fabric {
    mailboxes: Vec<Mailbox>,
    sent: [AtomicU64; Tag::COUNT],
}

/// In-process bus endpoint.
///
/// All endpoints of one fleet share a fabric; cloning an endpoint yields
/// another handle on the same rank, which lets a worker's kernel, network,
/// and flusher threads share one mailbox.
#[derive(Clone)]
pub struct LocalBus {
    fabric: Arc<Fabric>,
    rank: Rank,
}

impl LocalBus {
    /// Creates a connected fleet of `ranks` endpoints, one per rank.
    pub fn fleet(ranks: usize) -> Vec<LocalBus> {
        let fabric = Arc::new(Fabric {
            mailboxes: (0..ranks).map(|_| Mailbox::new()).collect(),
            sent: std::array::from_fn(|_| AtomicU64::new(0)),
        });
        (0..ranks)
            .map(|rank| LocalBus {
                fabric: Arc::clone(&fabric),
                rank,
            })
            .collect()
    }

    /// Fleet-wide count of messages sent on `tag` since startup.
    ///
    /// Tests use this to observe traffic (e.g. that a cached remote read
    /// issued no second GET_REQUEST).
    pub fn sent(&self, tag: Tag) -> u64 {
        self.fabric.sent[tag.index()].load(Ordering::Relaxed)
    }

    fn mailbox(&self) -> &Mailbox {
        &self.fabric.mailboxes[self.rank]
    }
}

impl MessageBus for LocalBus {
    fn rank(&self) -> Rank {
        self.rank
    }

    fn ranks(&self) -> usize {
        self.fabric.mailboxes.len()
    }

    fn send(&self, to: Rank, tag: Tag, payload: Bytes) -> PtabResult<()> {
        let mailbox = self
            .fabric
            .mailboxes
            .get(to)
            .ok_or(PtabError::InvalidRank {
                rank: to,
                ranks: self.ranks(),
            })?;
        {
            let mut queues = mailbox.queues.lock();
            queues
                .entry(tag)
                .or_insert_with(VecDeque::new)
                .push_back((self.rank, payload));
        }
        mailbox.ready.notify_all();
        self.fabric.sent[tag.index()].fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn recv(&self, tag: Tag) -> PtabResult<(Rank, Bytes)> {
        let mailbox = self.mailbox();
        let mut queues = mailbox.queues.lock();
        loop {
            if let Some(message) = queues.get_mut(&tag).and_then(VecDeque::pop_front) {
                return Ok(message);
            }
            mailbox.ready.wait(&mut queues);
        }
    }

    fn recv_from(&self, from: Rank, tag: Tag) -> PtabResult<Bytes> {
        let mailbox = self.mailbox();
        let mut queues = mailbox.queues.lock();
        loop {
            if let Some(queue) = queues.get_mut(&tag) {
                if let Some(pos) = queue.iter().position(|(sender, _)| *sender == from) {
                    let (_, payload) = queue.remove(pos).expect("position came from iter");
                    return Ok(payload);
                }
            }
            mailbox.ready.wait(&mut queues);
        }
    }

    fn recv_any(&self, tags: &[Tag]) -> PtabResult<(Tag, Rank, Bytes)> {
        let mailbox = self.mailbox();
        let mut queues = mailbox.queues.lock();
        loop {
            for &tag in tags {
                if let Some((from, payload)) =
                    queues.get_mut(&tag).and_then(VecDeque::pop_front)
                {
                    return Ok((tag, from, payload));
                }
            }
            mailbox.ready.wait(&mut queues);
        }
    }

    fn try_recv(&self, tag: Tag) -> Option<(Rank, Bytes)> {
        let mut queues = self.mailbox().queues.lock();
        queues.get_mut(&tag).and_then(VecDeque::pop_front)
    }
}
