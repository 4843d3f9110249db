use std::sync::Arc;

use bytes::Bytes;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, trace, warn};

use crate::config::RMulticastConfig;
use crate::event::Event;
use crate::packet::{fragment, BuildError, DecodeError, DependencyStamp, Packet, PacketBuilder, PacketType};
use crate::sender::{Frontier, Sender};
use crate::sequence::{SenderId, SequenceId};

#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum SendError {
    #[error("the group has no local origin")]
    NoLocalOrigin,
    #[error("message of {0} bytes exceeds the maximum message size")]
    MessageTooLarge(usize),
    #[error(transparent)]
    Build(#[from] BuildError),
}

/// The result of sending: datagrams to be put on the wire, and the events caused by delivering
///  the message locally
#[derive(Debug, Default)]
pub struct Outgoing {
    pub datagrams: Vec<Bytes>,
    pub events: Vec<Event>,
}

struct LocalOrigin {
    sender_id: SenderId,
    next_sequence_id: SequenceId,
}

/// All senders of a multicast session. Releasing a packet requires checking its dependency
///  stamps against *other* senders' delivery progress, so the group (rather than the individual
///  sender) drives delivery.
///
/// Every operation returns the events it caused. Delivery is re-evaluated for the whole group
///  whenever something changes that could unblock a packet.
pub struct SenderGroup {
    config: Arc<RMulticastConfig>,
    senders: FxHashMap<SenderId, Sender>,
    /// senders that were removed from the group, treated as failed by dependency checks
    departed: FxHashSet<SenderId>,
    local: Option<LocalOrigin>,
}

impl SenderGroup {
    pub fn new(config: Arc<RMulticastConfig>) -> anyhow::Result<SenderGroup> {
        config.validate()?;

        Ok(SenderGroup {
            config,
            senders: FxHashMap::default(),
            departed: FxHashSet::default(),
            local: None,
        })
    }

    /// A group that originates packets itself, starting at `first_sequence_id`
    pub fn with_local_origin(config: Arc<RMulticastConfig>, sender_id: SenderId, first_sequence_id: SequenceId) -> anyhow::Result<SenderGroup> {
        let mut group = SenderGroup::new(config)?;
        group.sender_mut(sender_id).update_start(first_sequence_id);
        group.local = Some(LocalOrigin {
            sender_id,
            next_sequence_id: first_sequence_id,
        });
        Ok(group)
    }

    pub fn local_sender_id(&self) -> Option<SenderId> {
        self.local.as_ref().map(|l| l.sender_id)
    }

    pub fn config(&self) -> &Arc<RMulticastConfig> {
        &self.config
    }

    pub fn sender(&self, sender_id: SenderId) -> Option<&Sender> {
        self.senders.get(&sender_id)
    }

    pub fn senders(&self) -> impl Iterator<Item = &Sender> {
        self.senders.values()
    }

    fn sender_mut(&mut self, sender_id: SenderId) -> &mut Sender {
        self.senders.entry(sender_id)
            .or_insert_with(|| {
                debug!("new sender {}", sender_id);
                Sender::new(sender_id, None, self.config.clone())
            })
    }

    /// Declares a peer. Senders are also created implicitly when their first packet arrives.
    pub fn add_sender(&mut self, sender_id: SenderId, display_name: Option<String>) -> &Sender {
        self.departed.remove(&sender_id);
        let sender = self.sender_mut(sender_id);
        if display_name.is_some() {
            sender.set_display_name(display_name);
        }
        sender
    }

    /// Forgets a peer's state. From then on, the peer is treated like a failed sender as far as
    ///  other senders' dependencies on it are concerned.
    pub fn remove_sender(&mut self, sender_id: SenderId) -> Vec<Event> {
        if self.local_sender_id() == Some(sender_id) {
            warn!("attempt to remove the local sender {} - ignoring", sender_id);
            return Vec::new();
        }

        if self.senders.remove(&sender_id).is_some() {
            debug!("removed sender {}", sender_id);
        }
        self.departed.insert(sender_id);
        self.release()
    }

    /// Parses and ingests a datagram received from the network
    pub fn push_datagram(&mut self, raw: &[u8]) -> Result<Vec<Event>, DecodeError> {
        let packet = Packet::parse(raw)?;
        Ok(self.push(packet, Bytes::copy_from_slice(raw)))
    }

    pub fn push(&mut self, packet: Packet, raw: Bytes) -> Vec<Event> {
        if self.departed.contains(&packet.sender_id) {
            trace!("packet from departed sender {} - ignoring", packet.sender_id);
            return Vec::new();
        }

        // stamps are evidence of other senders' packets, which may not have arrived yet
        let local_sender_id = self.local_sender_id();
        let mut events = Vec::new();
        for stamp in &packet.depends {
            if stamp.sender_id == packet.sender_id || Some(stamp.sender_id) == local_sender_id || self.departed.contains(&stamp.sender_id) {
                continue;
            }
            events.extend(self.sender_mut(stamp.sender_id).note_existing(stamp.sequence_id));
        }

        events.extend(self.sender_mut(packet.sender_id).push(packet, raw));
        events.extend(self.release());
        events
    }

    pub fn update_start(&mut self, sender_id: SenderId, start: SequenceId) -> Vec<Event> {
        let mut events = self.sender_mut(sender_id).update_start(start);
        events.extend(self.release());
        events
    }

    pub fn set_data_start(&mut self, sender_id: SenderId, data_start: SequenceId) {
        self.sender_mut(sender_id).set_data_start(data_start);
    }

    pub fn hold_data(&mut self, sender_id: SenderId, from: SequenceId) {
        self.sender_mut(sender_id).hold_data(from);
    }

    pub fn release_data(&mut self, sender_id: SenderId) -> Vec<Event> {
        match self.senders.get_mut(&sender_id) {
            Some(sender) => {
                sender.release_data();
                self.release()
            }
            None => Vec::new(),
        }
    }

    pub fn seen(&mut self, sender_id: SenderId, upto: SequenceId) {
        if let Some(sender) = self.senders.get_mut(&sender_id) {
            sender.seen(upto);
        }
    }

    pub fn repair_request(&mut self, sender_id: SenderId, sequence_id: SequenceId) -> Vec<Event> {
        match self.senders.get_mut(&sender_id) {
            Some(sender) => sender.repair_request(sequence_id),
            None => {
                trace!("repair request for unknown sender {} - ignoring", sender_id);
                Vec::new()
            }
        }
    }

    pub fn set_failed(&mut self, sender_id: SenderId) -> Vec<Event> {
        if self.local_sender_id() == Some(sender_id) {
            warn!("attempt to mark the local sender {} as failed - ignoring", sender_id);
            return Vec::new();
        }

        self.sender_mut(sender_id).set_failed();
        self.release()
    }

    pub fn missing_sequence_ids(&self, sender_id: SenderId) -> Vec<SequenceId> {
        self.senders.get(&sender_id)
            .map(|s| s.missing_sequence_ids())
            .unwrap_or_default()
    }

    /// Periodic housekeeping: re-requests gaps that were not repaired within a full repair tick
    ///  (at most `max` overall), and activates senders whose inferred start stayed put for a
    ///  full tick.
    pub fn on_repair_tick(&mut self, max: usize) -> Vec<Event> {
        let mut ids = self.senders.keys().cloned().collect::<Vec<_>>();
        ids.sort();

        let mut events = Vec::new();
        let mut num_requests = 0;
        for sender_id in ids {
            if let Some(sender) = self.senders.get_mut(&sender_id) {
                // the tick must advance for every sender, even if the limit is exhausted
                let due = sender.due_repairs(max.saturating_sub(num_requests));
                num_requests += due.len();
                events.extend(due.into_iter()
                    .map(|missing_sequence_id| Event::RepairRequest { origin: sender_id, missing_sequence_id }));
                sender.settle_start();
            }
        }
        events.extend(self.release());
        events
    }

    fn frontiers(&self) -> FxHashMap<SenderId, Frontier> {
        let mut result = self.senders.iter()
            .map(|(id, s)| (*id, s.frontier()))
            .collect::<FxHashMap<_, _>>();
        for id in &self.departed {
            result.insert(*id, Frontier::Failed);
        }
        result
    }

    /// Releases everything that is deliverable, repeating until a fixed point is reached: a
    ///  packet released by one sender may satisfy stamps in packets of other senders.
    fn release(&mut self) -> Vec<Event> {
        let mut ids = self.senders.keys().cloned().collect::<Vec<_>>();
        ids.sort();

        let mut frontiers = self.frontiers();
        let mut events = Vec::new();
        loop {
            let mut progressed = false;
            for sender_id in &ids {
                if let Some(sender) = self.senders.get_mut(sender_id) {
                    if sender.deliver_ready(&frontiers, &mut events) {
                        frontiers.insert(*sender_id, sender.frontier());
                        progressed = true;
                    }
                }
            }
            if !progressed {
                break;
            }
        }
        events
    }

    /// stamps for every other sender that delivered something, i.e. everything this node's
    ///  next packet may causally depend on
    fn local_dependencies(&self, local_id: SenderId) -> Vec<DependencyStamp> {
        let mut result = self.senders.values()
            .filter(|s| s.id() != local_id)
            .filter_map(|s| s.last_delivered().map(|last| DependencyStamp::new(s.id(), last)))
            .collect::<Vec<_>>();
        result.sort_by_key(|d| d.sender_id);
        result
    }

    fn local_origin(&self) -> Result<(SenderId, SequenceId), SendError> {
        self.local.as_ref()
            .map(|l| (l.sender_id, l.next_sequence_id))
            .ok_or(SendError::NoLocalOrigin)
    }

    fn builder(packet_type: PacketType, sender_id: SenderId, sequence_id: SequenceId, depends: &[DependencyStamp]) -> Result<PacketBuilder, BuildError> {
        let mut builder = PacketBuilder::new(packet_type, sender_id);
        builder.set_sequence_id(sequence_id);
        for d in depends {
            builder.add_dependency(d.sender_id, d.sequence_id)?;
        }
        Ok(builder)
    }

    /// Fragments a message and assigns consecutive sequence ids to the fragments. The packets
    ///  go through local delivery, so the message is delivered locally in causal order and
    ///  retained for repair.
    pub fn send_data(&mut self, stream_id: u16, message: Bytes) -> Result<Outgoing, SendError> {
        let (sender_id, first_sequence_id) = self.local_origin()?;
        if message.len() > self.config.max_message_size as usize {
            return Err(SendError::MessageTooLarge(message.len()));
        }

        let depends = self.local_dependencies(sender_id);
        let mut packets = Vec::new();
        let mut sequence_id = first_sequence_id;
        for data in fragment(stream_id, &message, self.config.max_payload_size) {
            let mut builder = Self::builder(PacketType::Data, sender_id, sequence_id, &depends)?;
            builder.set_data_info(data.stream_id, data.flags, data.total_size)?;
            builder.add_payload_exact(&data.payload)?;
            packets.push(builder.build()?);
            sequence_id = sequence_id.next();
        }

        debug!("sending message of {} bytes on stream {} as {} fragments", message.len(), stream_id, packets.len());
        Ok(self.emit(packets))
    }

    pub fn send_join(&mut self) -> Result<Outgoing, SendError> {
        let (sender_id, sequence_id) = self.local_origin()?;
        let depends = self.local_dependencies(sender_id);
        let packet = Self::builder(PacketType::Join, sender_id, sequence_id, &depends)?
            .build()?;
        Ok(self.emit(vec![packet]))
    }

    pub fn send_attempt_join(&mut self, proposed_sender_ids: &[SenderId]) -> Result<Outgoing, SendError> {
        let (sender_id, sequence_id) = self.local_origin()?;
        let depends = self.local_dependencies(sender_id);
        let mut builder = Self::builder(PacketType::AttemptJoin, sender_id, sequence_id, &depends)?;
        for id in proposed_sender_ids {
            builder.add_proposed_sender(*id)?;
        }
        let packet = builder.build()?;
        Ok(self.emit(vec![packet]))
    }

    fn emit(&mut self, packets: Vec<Packet>) -> Outgoing {
        let mut result = Outgoing::default();
        for packet in packets {
            if let Some(local) = &mut self.local {
                local.next_sequence_id = packet.sequence_id.next();
            }
            let raw = packet.encode();
            result.datagrams.push(raw.clone());
            result.events.extend(self.push(packet, raw));
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::PacketBody;
    use crate::sender::SenderState;
    use crate::test_util::{attempt_join_packet, complete_data, delivered_messages, repair_requests, seq, sid};
    use proptest::prelude::*;
    use rstest::rstest;

    fn new_group() -> SenderGroup {
        SenderGroup::new(Arc::new(RMulticastConfig::new())).unwrap()
    }

    /// a group whose senders' histories are declared to start at 1
    fn group_with_senders(sender_ids: &[u32]) -> SenderGroup {
        let mut group = new_group();
        for &id in sender_ids {
            group.update_start(sid(id), seq(1));
        }
        group
    }

    fn push(group: &mut SenderGroup, packet: Packet) -> Vec<Event> {
        let raw = packet.encode();
        group.push(packet, raw)
    }

    #[test]
    fn test_new_validates_config() {
        let mut config = RMulticastConfig::new();
        config.max_sequence_gap = 0;
        let config = Arc::new(config);
        assert!(SenderGroup::new(config.clone()).is_err());
        assert!(SenderGroup::with_local_origin(config, sid(1), seq(1)).is_err());
    }

    #[test]
    fn test_gap_requests_repair_once() {
        let mut group = group_with_senders(&[1]);
        let mut events = Vec::new();
        for id in [1, 2, 4, 5] {
            events.extend(push(&mut group, complete_data(1, id, vec![], &[id as u8])));
        }
        assert_eq!(repair_requests(&events), vec![(1, 3)]);
        assert_eq!(delivered_messages(&events), vec![(1, vec![1]), (1, vec![2])]);

        let events = push(&mut group, complete_data(1, 3, vec![], &[3]));
        assert_eq!(delivered_messages(&events), vec![(1, vec![3]), (1, vec![4]), (1, vec![5])]);
    }

    #[rstest]
    #[case::lower_id_first(1, 2)]
    #[case::higher_id_first(2, 1)]
    fn test_causal_delivery(#[case] first: u32, #[case] second: u32) {
        let mut group = group_with_senders(&[1, 2]);

        let events = push(&mut group, complete_data(second, 1, vec![(first, 1)], b"answer"));
        assert!(delivered_messages(&events).is_empty());
        assert_eq!(repair_requests(&events), vec![(first, 1)]);

        let events = push(&mut group, complete_data(first, 1, vec![], b"question"));
        assert_eq!(delivered_messages(&events), vec![(first, b"question".to_vec()), (second, b"answer".to_vec())]);
    }

    #[rstest]
    #[case::stamp_first(true)]
    #[case::packet_first(false)]
    fn test_stamp_below_first_seen_id(#[case] stamp_first: bool) {
        let mut group = new_group();
        let answer = complete_data(2, 1, vec![(1, 5)], b"answer");
        let six = complete_data(1, 6, vec![], b"six");

        let mut events = Vec::new();
        if stamp_first {
            events.extend(push(&mut group, answer));
            events.extend(push(&mut group, six));
        }
        else {
            events.extend(push(&mut group, six));
            events.extend(push(&mut group, answer));
        }
        assert_eq!(repair_requests(&events), vec![(1, 5)]);

        assert!(group.on_repair_tick(10).is_empty());
        let events = group.on_repair_tick(10);
        assert_eq!(repair_requests(&events), vec![(1, 5)]);
        assert!(delivered_messages(&events).is_empty());
        assert_eq!(group.sender(sid(1)).unwrap().start(), seq(5));

        let events = push(&mut group, complete_data(1, 5, vec![], b"five"));
        assert_eq!(delivered_messages(&events), vec![(1, b"five".to_vec()), (1, b"six".to_vec()), (2, b"answer".to_vec())]);
    }

    #[test]
    fn test_stamp_before_inferred_start_after_delivery() {
        let mut group = group_with_senders(&[2]);
        push(&mut group, complete_data(1, 6, vec![], b"six"));
        group.on_repair_tick(10);
        assert_eq!(delivered_messages(&group.on_repair_tick(10)), vec![(1, b"six".to_vec())]);

        let events = push(&mut group, complete_data(2, 1, vec![(1, 5)], b"answer"));
        assert!(events.is_empty());

        let events = group.update_start(sid(1), seq(6));
        assert_eq!(delivered_messages(&events), vec![(2, b"answer".to_vec())]);
    }

    #[test]
    fn test_transitive_cascade() {
        let mut group = group_with_senders(&[1, 2, 3]);
        assert!(delivered_messages(&push(&mut group, complete_data(3, 1, vec![(2, 1)], b"c"))).is_empty());
        assert!(delivered_messages(&push(&mut group, complete_data(2, 1, vec![(1, 1)], b"b"))).is_empty());

        let events = push(&mut group, complete_data(1, 1, vec![], b"a"));
        assert_eq!(delivered_messages(&events), vec![(1, b"a".to_vec()), (2, b"b".to_vec()), (3, b"c".to_vec())]);
    }

    #[test]
    fn test_failed_dependency_unblocks() {
        let mut group = group_with_senders(&[1, 2]);
        push(&mut group, complete_data(1, 1, vec![], b"a"));
        let events = push(&mut group, complete_data(2, 1, vec![(1, 5)], b"b"));
        assert!(delivered_messages(&events).is_empty());
        assert_eq!(repair_requests(&events), vec![(1, 2), (1, 3), (1, 4), (1, 5)]);

        let events = group.set_failed(sid(1));
        assert_eq!(delivered_messages(&events), vec![(2, b"b".to_vec())]);
        assert_eq!(group.sender(sid(1)).unwrap().state(), SenderState::Failed);
    }

    #[test]
    fn test_removed_dependency_unblocks() {
        let mut group = group_with_senders(&[2]);
        push(&mut group, complete_data(2, 1, vec![(1, 5)], b"b"));

        let events = group.remove_sender(sid(1));
        assert_eq!(delivered_messages(&events), vec![(2, b"b".to_vec())]);
        assert!(group.sender(sid(1)).is_none());
        assert!(push(&mut group, complete_data(1, 6, vec![], b"late")).is_empty());
        assert!(push(&mut group, complete_data(2, 2, vec![(1, 7)], b"c")).iter().all(|e| !matches!(e, Event::RepairRequest { .. })));
    }

    #[test]
    fn test_unknown_dependency_sender() {
        let mut group = group_with_senders(&[1]);
        let events = push(&mut group, complete_data(1, 1, vec![(9, 3)], b"a"));
        assert_eq!(repair_requests(&events), vec![(9, 3)]);

        group.add_sender(sid(9), Some("nine".to_string()));
        assert_eq!(group.sender(sid(9)).unwrap().state(), SenderState::Uninitialized);
        assert!(delivered_messages(&group.release_data(sid(1))).is_empty());

        let events = group.update_start(sid(9), seq(4));
        assert_eq!(delivered_messages(&events), vec![(1, b"a".to_vec())]);
        assert_eq!(group.sender(sid(9)).unwrap().display_name(), Some("nine"));
        assert!(group.missing_sequence_ids(sid(9)).is_empty());
    }

    #[test]
    fn test_hold_and_release_data() {
        let mut group = group_with_senders(&[1]);
        group.hold_data(sid(1), seq(1));

        let events = push(&mut group, attempt_join_packet(1, 1, vec![], vec![1, 2]));
        assert!(matches!(events.as_slice(), [Event::ControlDelivered { .. }]));
        assert!(push(&mut group, complete_data(1, 2, vec![], b"x")).is_empty());

        assert_eq!(delivered_messages(&group.release_data(sid(1))), vec![(1, b"x".to_vec())]);
    }

    #[rstest]
    #[case::nothing(1)]
    #[case::some(3)]
    #[case::all(6)]
    fn test_history_trimming(#[case] upto: u32) {
        let mut group = group_with_senders(&[1]);
        for id in 1..=5 {
            push(&mut group, complete_data(1, id, vec![], b"x"));
        }
        group.seen(sid(1), seq(upto));

        for id in 1..=5 {
            let events = group.repair_request(sid(1), seq(id));
            let is_repaired = matches!(events.as_slice(), [Event::RepairMessage { .. }]);
            assert_eq!(is_repaired, id >= upto, "id {}", id);
        }
    }

    #[test]
    fn test_repair_request_unknown_sender() {
        let mut group = new_group();
        assert!(group.repair_request(sid(1), seq(1)).is_empty());
    }

    #[test]
    fn test_push_datagram_malformed() {
        let mut group = new_group();
        assert!(group.push_datagram(&[]).is_err());
        assert!(group.push_datagram(&[9, 1, 0, 0, 0, 1, 0, 0, 0, 1, 0]).is_err());
        assert!(group.senders().next().is_none());
    }

    #[test]
    fn test_repair_tick() {
        let mut group = new_group();
        push(&mut group, complete_data(1, 1, vec![], b"x"));
        push(&mut group, complete_data(1, 4, vec![], b"x"));
        push(&mut group, complete_data(2, 1, vec![], b"y"));
        push(&mut group, complete_data(2, 3, vec![], b"y"));

        assert!(group.on_repair_tick(10).is_empty());

        // the inferred starts settle during the second tick
        let events = group.on_repair_tick(10);
        assert_eq!(repair_requests(&events), vec![(1, 2), (1, 3), (2, 2)]);
        assert_eq!(delivered_messages(&events), vec![(1, b"x".to_vec()), (2, b"y".to_vec())]);

        assert_eq!(repair_requests(&group.on_repair_tick(2)), vec![(1, 2), (1, 3)]);
    }

    #[test]
    fn test_send_data_stamps_dependencies() {
        let config = Arc::new(RMulticastConfig::new());
        let mut group = SenderGroup::with_local_origin(config, sid(5), seq(100)).unwrap();
        group.update_start(sid(1), seq(7));
        group.update_start(sid(2), seq(3));
        push(&mut group, complete_data(1, 7, vec![], b"a"));
        push(&mut group, complete_data(2, 3, vec![], b"b"));
        push(&mut group, complete_data(2, 5, vec![], b"gap"));

        let outgoing = group.send_data(4, Bytes::from_static(b"hello")).unwrap();
        assert_eq!(outgoing.datagrams.len(), 1);
        assert_eq!(outgoing.events, vec![Event::MessageDelivered { origin: sid(5), stream_id: 4, bytes: Bytes::from_static(b"hello") }]);

        let packet = Packet::parse(&outgoing.datagrams[0]).unwrap();
        assert_eq!(packet.sender_id, sid(5));
        assert_eq!(packet.sequence_id, seq(100));
        assert_eq!(packet.depends, vec![DependencyStamp::new(sid(1), seq(7)), DependencyStamp::new(sid(2), seq(3))]);

        let outgoing = group.send_join().unwrap();
        let packet = Packet::parse(&outgoing.datagrams[0]).unwrap();
        assert_eq!(packet.sequence_id, seq(101));
        assert_eq!(packet.body, PacketBody::Join);
    }

    #[test]
    fn test_send_attempt_join() {
        let config = Arc::new(RMulticastConfig::new());
        let mut group = SenderGroup::with_local_origin(config, sid(5), seq(1)).unwrap();

        let outgoing = group.send_attempt_join(&[sid(5), sid(6)]).unwrap();
        let packet = Packet::parse(&outgoing.datagrams[0]).unwrap();
        assert_eq!(packet.body, PacketBody::AttemptJoin { proposed_sender_ids: vec![sid(5), sid(6)] });
        assert_eq!(outgoing.events, vec![Event::ControlDelivered { origin: sid(5), packet }]);

        // repair requests for own packets are answered from the retained history
        assert_eq!(group.repair_request(sid(5), seq(1)), vec![Event::RepairMessage { origin: sid(5), packet_bytes: outgoing.datagrams[0].clone() }]);
    }

    #[test]
    fn test_send_without_local_origin() {
        let mut group = new_group();
        assert_eq!(group.send_join().unwrap_err(), SendError::NoLocalOrigin);
    }

    #[test]
    fn test_send_too_large() {
        let mut config = RMulticastConfig::new();
        config.max_message_size = 10;
        let mut group = SenderGroup::with_local_origin(Arc::new(config), sid(1), seq(1)).unwrap();
        assert_eq!(group.send_data(1, Bytes::from(vec![0u8; 11])).unwrap_err(), SendError::MessageTooLarge(11));
        assert_eq!(group.send_join().unwrap().datagrams.len(), 1);
        assert_eq!(group.sender(sid(1)).unwrap().next_output(), seq(2));
    }

    #[test]
    fn test_local_sender_cannot_fail() {
        let mut group = SenderGroup::with_local_origin(Arc::new(RMulticastConfig::new()), sid(1), seq(1)).unwrap();
        group.set_failed(sid(1));
        group.remove_sender(sid(1));
        assert_eq!(group.sender(sid(1)).unwrap().state(), SenderState::Active);
    }

    proptest! {
        #[test]
        fn test_fragments_in_any_order(len in 0usize..5000, keys in prop::collection::vec(any::<u32>(), 4), declare_start in any::<bool>()) {
            let config = Arc::new(RMulticastConfig::new());
            let message = Bytes::from((0..len).map(|i| i as u8).collect::<Vec<_>>());

            let mut origin = SenderGroup::with_local_origin(config.clone(), sid(1), seq(u32::MAX - 1)).unwrap();
            let outgoing = origin.send_data(3, message.clone()).unwrap();
            prop_assert_eq!(outgoing.datagrams.len(), len.div_ceil(1440).max(1));

            let mut datagrams = outgoing.datagrams.into_iter().enumerate().collect::<Vec<_>>();
            datagrams.sort_by_key(|(i, _)| (keys[*i % keys.len()], *i));

            let mut receiver = SenderGroup::new(config).unwrap();
            if declare_start {
                receiver.update_start(sid(1), seq(u32::MAX - 1));
            }
            let mut events = Vec::new();
            for (_, datagram) in datagrams {
                events.extend(receiver.push_datagram(&datagram).unwrap());
            }
            // without a declared start, the lowest received id becomes the start after settling
            events.extend(receiver.on_repair_tick(32));
            events.extend(receiver.on_repair_tick(32));

            prop_assert_eq!(delivered_messages(&events), vec![(1, message.to_vec())]);
            prop_assert!(receiver.missing_sequence_ids(sid(1)).is_empty());
        }
    }
}
