use std::collections::VecDeque;

use bytes::Bytes;
use rustc_hash::FxHashMap;
use tracing::trace;

use crate::sequence::SequenceId;

/// Raw bytes of received packets, retained for answering repair requests from other peers.
///
/// The history is bounded in two ways: it is trimmed explicitly once the group has delivered
///  packets (see [RetainedHistory::trim_before]), and it evicts its oldest entries if it
///  exceeds its capacity before that happens.
pub struct RetainedHistory {
    capacity: usize,
    packets: FxHashMap<SequenceId, Bytes>,
    /// insertion order, for eviction
    order: VecDeque<SequenceId>,
    /// packets before this id are never retained again after they were trimmed
    trimmed_before: Option<SequenceId>,
}
impl RetainedHistory {
    pub fn new(capacity: usize) -> RetainedHistory {
        RetainedHistory {
            capacity,
            packets: FxHashMap::default(),
            order: VecDeque::new(),
            trimmed_before: None,
        }
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    pub fn insert(&mut self, sequence_id: SequenceId, raw: Bytes) {
        if let Some(threshold) = self.trimmed_before {
            if sequence_id.is_before(threshold) {
                trace!("not retaining packet {:?}: below trimmed threshold {:?}", sequence_id, threshold);
                return;
            }
        }
        if self.packets.contains_key(&sequence_id) {
            return;
        }

        while self.order.len() >= self.capacity {
            match self.order.pop_front() {
                Some(evicted) => {
                    trace!("evicting packet {:?} from retained history", evicted);
                    self.packets.remove(&evicted);
                }
                None => break,
            }
        }

        self.packets.insert(sequence_id, raw);
        self.order.push_back(sequence_id);
    }

    pub fn get(&self, sequence_id: SequenceId) -> Option<&Bytes> {
        self.packets.get(&sequence_id)
    }

    /// discards all packets with ids before `threshold`
    pub fn trim_before(&mut self, threshold: SequenceId) {
        match self.trimmed_before {
            Some(prev) if !prev.is_before(threshold) => return,
            _ => self.trimmed_before = Some(threshold),
        }

        let packets = &mut self.packets;
        self.order.retain(|id| {
            if id.is_before(threshold) {
                packets.remove(id);
                false
            }
            else {
                true
            }
        });
    }
}
