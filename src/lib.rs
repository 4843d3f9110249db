//! Reliable causal multicast for a group of peers that exchange datagrams, e.g. over UDP
//!  multicast. This crate is the protocol core: it is purely event driven and leaves sockets,
//!  membership and timers to the application (see [session] for a ready-made async wrapper).
//!
//! ## Guarantees
//!
//! * Every peer is a *sender* with its own sequence id space. Packets from one sender are
//!   delivered in sequence order, with gaps being detected and repaired by re-requesting them
//!   from the group
//! * Packets carry *dependency stamps* naming the latest packets (of other senders) their
//!   origin had delivered when sending. A packet is not delivered before all packets it depends
//!   on, so delivery is causally ordered across senders
//! * Messages bigger than a single packet are fragmented and reassembled transparently
//! * A sender that is marked as failed satisfies all dependency stamps on it, so the group is
//!   not blocked forever by a peer that went away
//!   * NB: This sacrifices strict causality for liveness
//! * Sequence ids are 32 bits and wrap around: ordering is based on the shortest circular
//!   distance, see [sequence::diff]
//!
//! ## Packet format
//!
//! All numbers are big-endian.
//!
//! ```ascii
//!  0: packet type (u8): 1 = DATA, 2 = ATTEMPT_JOIN, 3 = JOIN
//!  1: protocol version (u8), currently 1
//!  2: sender id (u32)
//!  6: sequence id (u32)
//! 10: number of dependency stamps (u8)
//! 11: dependency stamps, each a sender id (u32) followed by a sequence id (u32)
//!
//! DATA continues with:
//!  *: stream id (u16)
//!  *: flags (u8): 1 = START, 2 = END of a message
//!  *: total message size (u32)
//!  *: payload length (u16), at most 1440
//!  *: payload
//!
//! ATTEMPT_JOIN continues with:
//!  *: number of proposed senders (u8)
//!  *: proposed sender ids (u32 each)
//! ```
//!
//! JOIN has no body. Control packets (JOIN, ATTEMPT_JOIN) are reported to the application as
//!  soon as they arrive, but they occupy a slot in their sender's sequence like DATA packets.

pub mod config;
pub mod event;
pub mod packet;
pub mod sender;
pub mod sender_group;
pub mod sequence;
pub mod session;
pub mod test_util;
pub mod util;
