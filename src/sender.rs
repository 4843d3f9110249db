//! Per-origin delivery state: what was received from one peer, what was delivered, what is
//!  missing, and what is retained for answering other peers' repair requests.

pub mod history;
pub mod reassembly;

use std::sync::Arc;

use bytes::Bytes;
use rustc_hash::FxHashMap;
use tracing::{debug, info, trace, warn};

use crate::config::RMulticastConfig;
use crate::event::Event;
use crate::packet::{DependencyStamp, Packet, PacketBody};
use crate::sender::history::RetainedHistory;
use crate::sender::reassembly::Reassembly;
use crate::sequence::{SenderId, SequenceId};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SenderState {
    /// The start of the sender's history is not known yet. Packets are buffered (and their gaps
    ///  requested), but nothing is released.
    Uninitialized,
    Active,
    /// terminal: the peer is gone and will never send again
    Failed,
}

/// How far a sender's delivery has progressed, as far as other senders' dependency stamps are
///  concerned
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Frontier {
    Unknown,
    /// Everything in `from..before` is delivered. Without `from`, the start was declared and
    ///  everything before it counts as delivered as well.
    Delivered {
        from: Option<SequenceId>,
        before: SequenceId,
    },
    /// Satisfies any stamp. This gives up strict causality for the sake of not blocking the
    ///  group on a peer that will never send the packets others depend on.
    Failed,
}
impl Frontier {
    pub fn satisfies(&self, sequence_id: SequenceId) -> bool {
        match self {
            Frontier::Unknown => false,
            Frontier::Delivered { from, before } => {
                sequence_id.is_before(*before) && from.map_or(true, |from| !sequence_id.is_before(from))
            }
            Frontier::Failed => true,
        }
    }
}

/// Snapshot of all senders' frontiers in a group, used for checking dependency stamps
pub trait FrontierLookup {
    fn frontier(&self, sender_id: SenderId) -> Frontier;

    fn is_satisfied(&self, stamp: &DependencyStamp) -> bool {
        self.frontier(stamp.sender_id).satisfies(stamp.sequence_id)
    }
}
impl FrontierLookup for FxHashMap<SenderId, Frontier> {
    fn frontier(&self, sender_id: SenderId) -> Frontier {
        self.get(&sender_id).cloned().unwrap_or(Frontier::Unknown)
    }
}

pub struct Sender {
    config: Arc<RMulticastConfig>,
    id: SenderId,
    display_name: Option<String>,
    state: SenderState,

    /// The lowest id this sender's relevant history starts at. Unless it was declared through
    ///  [Sender::update_start], it is inferred from the lowest id known to exist.
    start: SequenceId,
    start_declared: bool,
    /// While the start is inferred and not settled yet: the repair tick of its last change
    start_changed_tick: Option<u64>,
    /// DATA packets before this id are consumed without being delivered
    data_start: Option<SequenceId>,
    /// The next packet to be released. Everything before it is delivered or irrelevant, so
    ///  this is the frontier other senders' dependency stamps are checked against.
    next_output: SequenceId,
    /// the id *after* the highest packet known to exist
    high_water_seen: SequenceId,
    /// DATA packets at or after this id are held back
    hold_point: Option<SequenceId>,

    /// received packets that were not released yet
    pending: FxHashMap<SequenceId, Packet>,
    /// Ids between `next_output` and `high_water_seen` that were not received. The value is
    ///  the repair tick during which the gap was detected, so that periodic re-requests give
    ///  regular repair at least one tick to arrive.
    missing: FxHashMap<SequenceId, u64>,
    repair_tick: u64,

    reassembly: Reassembly,
    history: RetainedHistory,
}

impl Sender {
    pub fn new(id: SenderId, display_name: Option<String>, config: Arc<RMulticastConfig>) -> Sender {
        let reassembly = Reassembly::new(config.max_message_size);
        let history = RetainedHistory::new(config.retained_history_size);

        Sender {
            config,
            id,
            display_name,
            state: SenderState::Uninitialized,
            start: SequenceId::ZERO,
            start_declared: false,
            start_changed_tick: None,
            data_start: None,
            next_output: SequenceId::ZERO,
            high_water_seen: SequenceId::ZERO,
            hold_point: None,
            pending: FxHashMap::default(),
            missing: FxHashMap::default(),
            repair_tick: 0,
            reassembly,
            history,
        }
    }

    pub fn id(&self) -> SenderId {
        self.id
    }

    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    pub fn set_display_name(&mut self, display_name: Option<String>) {
        self.display_name = display_name;
    }

    pub fn state(&self) -> SenderState {
        self.state
    }

    pub fn is_failed(&self) -> bool {
        self.state == SenderState::Failed
    }

    pub fn start(&self) -> SequenceId {
        self.start
    }

    pub fn is_start_declared(&self) -> bool {
        self.start_declared
    }

    pub fn data_start(&self) -> Option<SequenceId> {
        self.data_start
    }

    pub fn next_output(&self) -> SequenceId {
        self.next_output
    }

    pub fn high_water_seen(&self) -> SequenceId {
        self.high_water_seen
    }

    pub fn hold_point(&self) -> Option<SequenceId> {
        self.hold_point
    }

    pub fn num_pending(&self) -> usize {
        self.pending.len()
    }

    pub fn num_retained(&self) -> usize {
        self.history.len()
    }

    pub fn frontier(&self) -> Frontier {
        match self.state {
            SenderState::Uninitialized => Frontier::Unknown,
            SenderState::Active => Frontier::Delivered {
                from: if self.start_declared { None } else { Some(self.start) },
                before: self.next_output,
            },
            SenderState::Failed => Frontier::Failed,
        }
    }

    /// the highest id delivered since the start, if any
    pub fn last_delivered(&self) -> Option<SequenceId> {
        if self.state == SenderState::Active && self.next_output != self.start {
            Some(self.next_output.prev())
        }
        else {
            None
        }
    }

    /// outstanding gaps in ascending order
    pub fn missing_sequence_ids(&self) -> Vec<SequenceId> {
        let mut result = self.missing.keys().cloned().collect::<Vec<_>>();
        result.sort_by_key(|id| self.next_output.diff_to(*id));
        result
    }

    fn activate(&mut self, start: SequenceId) {
        debug!("sender {}: history starts at {:?}", self.id, start);
        self.state = SenderState::Active;
        self.start = start;
        self.next_output = start;
        self.high_water_seen = start;
    }

    /// Starts tracking an undeclared sender's history at the first id known to exist
    fn begin_tentative(&mut self, start: SequenceId) {
        debug!("sender {}: tentatively starting history at {:?}", self.id, start);
        self.start = start;
        self.next_output = start;
        self.high_water_seen = start;
        self.start_changed_tick = Some(self.repair_tick);
    }

    fn has_history(&self) -> bool {
        match self.state {
            SenderState::Uninitialized => self.start_changed_tick.is_some(),
            SenderState::Active => true,
            SenderState::Failed => false,
        }
    }

    /// An inferred start is a guess, which is corrected if lower ids show up before anything
    ///  was released
    fn can_move_start_back(&self) -> bool {
        self.has_history() && !self.start_declared && self.next_output == self.start
    }

    /// Declares the lowest id this sender's history begins at. Moving the start forward
    ///  abandons everything before it, which is how a permanent hole is resolved; moving it
    ///  backward is only possible as long as nothing was delivered.
    pub fn update_start(&mut self, new_start: SequenceId) -> Vec<Event> {
        match self.state {
            SenderState::Failed => {
                debug!("sender {}: ignoring start update for failed sender", self.id);
                Vec::new()
            }
            SenderState::Uninitialized => {
                self.start_declared = true;
                if self.start_changed_tick.take().is_none() {
                    self.activate(new_start);
                    return Vec::new();
                }
                // packets were buffered already: their range becomes the starting point
                self.state = SenderState::Active;
                self.move_start(new_start)
            }
            SenderState::Active => {
                self.start_declared = true;
                self.move_start(new_start)
            }
        }
    }

    fn move_start(&mut self, new_start: SequenceId) -> Vec<Event> {
        if self.next_output.is_before(new_start) {
            self.advance_start(new_start);
            Vec::new()
        }
        else if new_start.is_before(self.start) && self.next_output == self.start {
            self.rewind_start(new_start)
        }
        else {
            trace!("sender {}: start update to {:?} has no effect", self.id, new_start);
            Vec::new()
        }
    }

    fn advance_start(&mut self, new_start: SequenceId) {
        debug!("sender {}: advancing start from {:?} to {:?}", self.id, self.next_output, new_start);

        let mut skipped = self.pending.keys()
            .filter(|id| id.is_before(new_start))
            .cloned()
            .collect::<Vec<_>>();
        skipped.sort_by_key(|id| self.next_output.diff_to(*id));

        self.reassembly.abandon_all();
        for id in skipped {
            if let Some(Packet { body: PacketBody::Data(data), .. }) = self.pending.remove(&id) {
                self.reassembly.skip_fragment(&data);
            }
        }
        self.missing.retain(|id, _| !id.is_before(new_start));

        self.start = new_start;
        self.next_output = new_start;
        if self.high_water_seen.is_before(new_start) {
            self.high_water_seen = new_start;
        }
    }

    fn rewind_start(&mut self, new_start: SequenceId) -> Vec<Event> {
        let mut events = Vec::new();
        self.move_start_back(new_start, false, &mut events);
        events
    }

    /// Moves the start back to `new_start`, requesting all ids in between. Returns false if the
    ///  distance is implausibly big.
    fn move_start_back(&mut self, new_start: SequenceId, is_received: bool, events: &mut Vec<Event>) -> bool {
        let distance = new_start.diff_to(self.start) as u32;
        if distance > self.config.max_sequence_gap {
            warn!("sender {}: moving start back by {} exceeds the maximum gap - ignoring", self.id, distance);
            return false;
        }

        debug!("sender {}: moving start back from {:?} to {:?}", self.id, self.start, new_start);
        let first_missing = if is_received { new_start.next() } else { new_start };
        self.mark_missing(first_missing, self.start, events);
        self.start = new_start;
        self.next_output = new_start;
        if self.state == SenderState::Uninitialized {
            self.start_changed_tick = Some(self.repair_tick);
        }
        true
    }

    /// Raises the high-water mark to cover `sequence_id`, requesting the ids in between (and
    ///  `sequence_id` itself unless it was received). Returns false if the jump is implausibly
    ///  big.
    fn raise_high_water(&mut self, sequence_id: SequenceId, is_received: bool, events: &mut Vec<Event>) -> bool {
        let ahead = self.high_water_seen.diff_to(sequence_id);
        if ahead as u32 > self.config.max_sequence_gap {
            warn!("sender {}: {:?} is {} ahead of the highest known packet {:?} - ignoring", self.id, sequence_id, ahead, self.high_water_seen);
            return false;
        }

        let end = if is_received { sequence_id } else { sequence_id.next() };
        self.mark_missing(self.high_water_seen, end, events);
        self.high_water_seen = sequence_id.next();
        true
    }

    fn mark_missing(&mut self, from: SequenceId, to: SequenceId, events: &mut Vec<Event>) {
        for missing_id in from.to(to) {
            if self.pending.contains_key(&missing_id) || self.missing.contains_key(&missing_id) {
                continue;
            }
            debug!("sender {}: packet {:?} is missing", self.id, missing_id);
            self.missing.insert(missing_id, self.repair_tick);
            events.push(Event::RepairRequest { origin: self.id, missing_sequence_id: missing_id });
        }
    }

    pub fn set_data_start(&mut self, data_start: SequenceId) {
        debug!("sender {}: data start at {:?}", self.id, data_start);
        self.data_start = Some(data_start);
    }

    /// Ingests a single packet (in any arrival order). `raw` is the packet's wire
    ///  representation, retained for answering repair requests.
    ///
    /// This does not deliver data - that is the group's job, since it requires checking
    ///  dependencies across senders.
    pub fn push(&mut self, packet: Packet, raw: Bytes) -> Vec<Event> {
        let mut events = Vec::new();

        if packet.sender_id != self.id {
            warn!("sender {}: received packet from {} - ignoring", self.id, packet.sender_id);
            return events;
        }

        let sequence_id = packet.sequence_id;
        if self.state == SenderState::Failed {
            debug!("sender {}: ignoring packet {:?} from failed sender", self.id, sequence_id);
            return events;
        }
        if !self.has_history() {
            self.begin_tentative(sequence_id);
        }

        if self.pending.contains_key(&sequence_id) {
            trace!("sender {}: duplicate packet {:?} - ignoring", self.id, sequence_id);
            return events;
        }

        if sequence_id.is_before(self.next_output) {
            if !self.can_move_start_back() {
                trace!("sender {}: packet {:?} was delivered already - ignoring", self.id, sequence_id);
                return events;
            }
            if !self.move_start_back(sequence_id, true, &mut events) {
                return events;
            }
        }
        else if !sequence_id.is_before(self.high_water_seen) {
            if !self.raise_high_water(sequence_id, true, &mut events) {
                return events;
            }
        }
        else {
            self.missing.remove(&sequence_id);
        }

        trace!("sender {}: received {:?}", self.id, packet);
        self.history.insert(sequence_id, raw);

        if !packet.is_data() {
            events.push(Event::ControlDelivered { origin: self.id, packet: packet.clone() });
        }
        self.pending.insert(sequence_id, packet);

        events
    }

    /// Evidence that a packet exists, e.g. because another packet depends on it or another peer
    ///  asked for it. If it is not covered by what was received so far, it is requested.
    pub fn note_existing(&mut self, sequence_id: SequenceId) -> Vec<Event> {
        let mut events = Vec::new();
        if self.state == SenderState::Failed {
            return events;
        }
        if !self.has_history() {
            self.begin_tentative(sequence_id);
        }

        if sequence_id.is_before(self.next_output) {
            if self.can_move_start_back() {
                self.move_start_back(sequence_id, false, &mut events);
            }
            else if !self.start_declared && sequence_id.is_before(self.start) {
                warn!("sender {}: packet {:?} precedes the inferred start {:?} after delivery began - dependencies on it stay unsatisfied until the start is declared", self.id, sequence_id, self.start);
            }
        }
        else if !sequence_id.is_before(self.high_water_seen) {
            self.raise_high_water(sequence_id, false, &mut events);
        }
        events
    }

    /// Turns an inferred start into the actual start once it did not change for a full repair
    ///  tick. Returns true if the sender became active.
    pub fn settle_start(&mut self) -> bool {
        if self.state != SenderState::Uninitialized {
            return false;
        }
        match self.start_changed_tick {
            Some(tick) if tick + 1 < self.repair_tick => {
                debug!("sender {}: history starts at inferred id {:?}", self.id, self.start);
                self.state = SenderState::Active;
                self.start_changed_tick = None;
                true
            }
            _ => false,
        }
    }

    /// Releases pending packets in sequence order for as long as their dependency stamps are
    ///  satisfied, appending the resulting events. Returns true if anything was released.
    pub fn deliver_ready(&mut self, frontiers: &impl FrontierLookup, events: &mut Vec<Event>) -> bool {
        if self.state == SenderState::Uninitialized {
            return false;
        }

        let mut progressed = false;
        loop {
            let sequence_id = self.next_output;
            let Some(packet) = self.pending.get(&sequence_id) else {
                break;
            };

            if let Some(stamp) = packet.depends.iter().find(|s| !frontiers.is_satisfied(s)) {
                trace!("sender {}: packet {:?} waits for {:?}", self.id, sequence_id, stamp);
                break;
            }

            if packet.is_data() && self.is_held(sequence_id) {
                trace!("sender {}: data packet {:?} is held", self.id, sequence_id);
                break;
            }

            let Some(packet) = self.pending.remove(&sequence_id) else {
                break;
            };
            self.next_output = sequence_id.next();
            progressed = true;

            if let PacketBody::Data(data) = &packet.body {
                if self.is_before_data_start(sequence_id) {
                    trace!("sender {}: packet {:?} is before the data start - not delivering", self.id, sequence_id);
                    self.reassembly.skip_fragment(data);
                    continue;
                }

                let origin = self.id;
                let message = self.reassembly.on_fragment(data, |reason| {
                    warn!("sender {}: discarding message on stream {}: {}", origin, data.stream_id, reason);
                    events.push(Event::MessageDiscarded { origin, stream_id: data.stream_id, reason });
                });
                if let Some(bytes) = message {
                    debug!("sender {}: delivering message of {} bytes on stream {}", self.id, bytes.len(), data.stream_id);
                    events.push(Event::MessageDelivered { origin, stream_id: data.stream_id, bytes });
                }
            }
        }
        progressed
    }

    fn is_held(&self, sequence_id: SequenceId) -> bool {
        match self.hold_point {
            Some(hold_point) => !sequence_id.is_before(hold_point),
            None => false,
        }
    }

    fn is_before_data_start(&self, sequence_id: SequenceId) -> bool {
        match self.data_start {
            Some(data_start) => sequence_id.is_before(data_start),
            None => false,
        }
    }

    /// Data packets at or after `from` are held back until [Sender::release_data]. Control
    ///  packets are not affected.
    pub fn hold_data(&mut self, from: SequenceId) {
        debug!("sender {}: holding data from {:?}", self.id, from);
        self.hold_point = Some(from);
    }

    pub fn release_data(&mut self) {
        if self.hold_point.take().is_some() {
            debug!("sender {}: releasing held data", self.id);
        }
    }

    /// Notification that the group delivered everything before `upto`, so the retained
    ///  history for it is not needed for repair any more.
    pub fn seen(&mut self, upto: SequenceId) {
        trace!("sender {}: group delivered up to {:?}", self.id, upto);
        self.history.trim_before(upto);
    }

    /// Handles a repair request for one of this sender's packets: re-emits the packet if it is
    ///  retained, and otherwise treats the request as evidence of a packet this node may be
    ///  missing itself.
    pub fn repair_request(&mut self, sequence_id: SequenceId) -> Vec<Event> {
        if let Some(raw) = self.history.get(sequence_id) {
            trace!("sender {}: answering repair request for {:?}", self.id, sequence_id);
            return vec![Event::RepairMessage { origin: self.id, packet_bytes: raw.clone() }];
        }

        if self.state != SenderState::Failed && self.missing.contains_key(&sequence_id) {
            return vec![Event::RepairRequest { origin: self.id, missing_sequence_id: sequence_id }];
        }

        trace!("sender {}: no retained packet for repair request {:?}", self.id, sequence_id);
        self.note_existing(sequence_id)
    }

    /// Gaps that were detected at least one full repair tick ago, for periodic re-requests.
    pub fn due_repairs(&mut self, max: usize) -> Vec<SequenceId> {
        self.repair_tick += 1;
        let threshold = self.repair_tick - 1;

        let mut due = self.missing.iter()
            .filter(|(_, tick)| **tick < threshold)
            .map(|(&id, _)| id)
            .collect::<Vec<_>>();
        due.sort_by_key(|id| self.next_output.diff_to(*id));
        due.truncate(max);
        due
    }

    /// Marks the sender as permanently gone. Pending packets after the first gap can never be
    ///  released and are dropped, the contiguous rest is still delivered.
    pub fn set_failed(&mut self) {
        if self.state == SenderState::Failed {
            return;
        }
        info!("sender {} ({:?}) failed", self.id, self.display_name);
        self.state = SenderState::Failed;
        self.start_changed_tick = None;

        self.missing.clear();

        let mut id = self.next_output;
        while self.pending.contains_key(&id) {
            id = id.next();
        }
        let num_before = self.pending.len();
        self.pending.retain(|&pending_id, _| pending_id.is_before(id));
        if self.pending.len() < num_before {
            debug!("sender {}: dropping {} packets after the first gap", self.id, num_before - self.pending.len());
        }
    }
}
