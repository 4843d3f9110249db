use bytes::Bytes;

use crate::event::Event;
use crate::packet::{DataFlags, DataInfo, DependencyStamp, Packet, PacketBody};
use crate::sequence::{SenderId, SequenceId};

/// convenience method for unit test code
pub fn sid(raw: u32) -> SenderId {
    SenderId::from_raw(raw)
}

/// convenience method for unit test code
pub fn seq(raw: u32) -> SequenceId {
    SequenceId::from_raw(raw)
}

fn stamps(depends: Vec<(u32, u32)>) -> Vec<DependencyStamp> {
    depends.into_iter()
        .map(|(s, q)| DependencyStamp::new(sid(s), seq(q)))
        .collect()
}

/// A single DATA fragment. This bypasses the builder's checks, so test code can create
///  packets that a well-behaved peer would never send.
pub fn data_fragment(sender_id: u32, sequence_id: u32, depends: Vec<(u32, u32)>, stream_id: u16, flags: DataFlags, total_size: u32, payload: &[u8]) -> Packet {
    Packet {
        sender_id: sid(sender_id),
        sequence_id: seq(sequence_id),
        depends: stamps(depends),
        body: PacketBody::Data(DataInfo {
            stream_id,
            flags,
            total_size,
            payload: Bytes::copy_from_slice(payload),
        }),
    }
}

/// an unfragmented message on stream 1
pub fn complete_data(sender_id: u32, sequence_id: u32, depends: Vec<(u32, u32)>, payload: &[u8]) -> Packet {
    data_fragment(sender_id, sequence_id, depends, 1, DataFlags::COMPLETE, payload.len() as u32, payload)
}

pub fn join_packet(sender_id: u32, sequence_id: u32, depends: Vec<(u32, u32)>) -> Packet {
    Packet {
        sender_id: sid(sender_id),
        sequence_id: seq(sequence_id),
        depends: stamps(depends),
        body: PacketBody::Join,
    }
}

pub fn attempt_join_packet(sender_id: u32, sequence_id: u32, depends: Vec<(u32, u32)>, proposed: Vec<u32>) -> Packet {
    Packet {
        sender_id: sid(sender_id),
        sequence_id: seq(sequence_id),
        depends: stamps(depends),
        body: PacketBody::AttemptJoin {
            proposed_sender_ids: proposed.into_iter().map(sid).collect(),
        },
    }
}

/// extracts delivered messages as (origin, payload) pairs, in delivery order
pub fn delivered_messages(events: &[Event]) -> Vec<(u32, Vec<u8>)> {
    events.iter()
        .filter_map(|e| match e {
            Event::MessageDelivered { origin, bytes, .. } => Some((origin.to_raw(), bytes.to_vec())),
            _ => None,
        })
        .collect()
}

pub fn repair_requests(events: &[Event]) -> Vec<(u32, u32)> {
    events.iter()
        .filter_map(|e| match e {
            Event::RepairRequest { origin, missing_sequence_id } => Some((origin.to_raw(), missing_sequence_id.to_raw())),
            _ => None,
        })
        .collect()
}
