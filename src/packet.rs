use std::fmt::{Debug, Formatter};

use bitflags::bitflags;
use bytes::{BufMut, Bytes, BytesMut};

use crate::sequence::{SenderId, SequenceId};
use crate::util::buf_ext::{BufExt, BufferUnderflow};

/// Payload cap per DATA packet, keeping encoded packets below the path MTU used by the
///  multicast transport.
pub const MAX_PAYLOAD_SIZE: usize = 1440;

/// Count fields on the wire are single bytes
pub const MAX_LIST_LEN: usize = u8::MAX as usize;

pub const PROTOCOL_VERSION_1: u8 = 1;

bitflags! {
    #[derive(PartialEq, Eq, Copy, Clone, Debug, Default)]
    pub struct DataFlags: u8 {
        const START = 0b0000_0001;
        const END   = 0b0000_0010;

        const COMPLETE = Self::START.bits() | Self::END.bits();
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum PacketType {
    Data,
    AttemptJoin,
    Join,
}
impl PacketType {
    const ID_DATA: u8 = 1;
    const ID_ATTEMPT_JOIN: u8 = 2;
    const ID_JOIN: u8 = 3;

    pub fn id(&self) -> u8 {
        match self {
            PacketType::Data => Self::ID_DATA,
            PacketType::AttemptJoin => Self::ID_ATTEMPT_JOIN,
            PacketType::Join => Self::ID_JOIN,
        }
    }

    fn from_id(id: u8) -> Result<PacketType, DecodeError> {
        match id {
            Self::ID_DATA => Ok(PacketType::Data),
            Self::ID_ATTEMPT_JOIN => Ok(PacketType::AttemptJoin),
            Self::ID_JOIN => Ok(PacketType::Join),
            id => Err(DecodeError::UnknownType(id)),
        }
    }
}

/// Asserts that the carrying packet causally depends on `sender_id` having produced (and the
///  receiver having delivered) everything up to and including `sequence_id`.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct DependencyStamp {
    pub sender_id: SenderId,
    pub sequence_id: SequenceId,
}
impl Debug for DependencyStamp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.sender_id, self.sequence_id)
    }
}
impl DependencyStamp {
    pub fn new(sender_id: SenderId, sequence_id: SequenceId) -> DependencyStamp {
        DependencyStamp { sender_id, sequence_id }
    }
}

/// One fragment of a logical application message
#[derive(Clone, Eq, PartialEq)]
pub struct DataInfo {
    pub stream_id: u16,
    pub flags: DataFlags,
    /// size of the complete, reassembled message
    pub total_size: u32,
    pub payload: Bytes,
}
impl Debug for DataInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let start = if self.flags.contains(DataFlags::START) { "S" } else { "-" };
        let end = if self.flags.contains(DataFlags::END) { "E" } else { "-" };
        write!(f, "DATA({}:{}{}:{}/{})", self.stream_id, start, end, self.payload.len(), self.total_size)
    }
}

#[derive(Clone, Eq, PartialEq, Debug)]
pub enum PacketBody {
    Data(DataInfo),
    AttemptJoin { proposed_sender_ids: Vec<SenderId> },
    Join,
}

/// A single wire datagram. Every packet has exactly one origin and a per-origin sequence id.
#[derive(Clone, Eq, PartialEq)]
pub struct Packet {
    pub sender_id: SenderId,
    pub sequence_id: SequenceId,
    pub depends: Vec<DependencyStamp>,
    pub body: PacketBody,
}
impl Debug for Packet {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "PCKT{{{}#{}:{:?}<-{:?}}}", self.sender_id, self.sequence_id, self.body, self.depends)
    }
}

#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum DecodeError {
    #[error("truncated packet: {0}")]
    Truncated(#[from] BufferUnderflow),
    #[error("unknown packet type {0}")]
    UnknownType(u8),
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),
    #[error("packet from {0} depends on its own sender")]
    SelfDependency(SenderId),
    #[error("invalid data flags {0:#04x}")]
    InvalidFlags(u8),
    #[error("payload of {0} bytes exceeds the maximum of {}", MAX_PAYLOAD_SIZE)]
    PayloadTooLarge(usize),
    #[error("inconsistent fragment: payload of {payload_len} bytes for a message of {total_size} bytes")]
    InconsistentFragment { payload_len: usize, total_size: u32 },
    #[error("{0} trailing bytes after the end of the packet")]
    TrailingBytes(usize),
}

#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum BuildError {
    #[error("operation is not supported for {0:?} packets")]
    WrongPacketType(PacketType),
    #[error("sequence id was not set")]
    MissingSequenceId,
    #[error("data info was not set")]
    MissingDataInfo,
    #[error("a packet must not depend on its own sender {0}")]
    SelfDependency(SenderId),
    #[error("too many list entries - at most {} are supported", MAX_LIST_LEN)]
    TooManyEntries,
    #[error("payload of {0} bytes exceeds the maximum of {}", MAX_PAYLOAD_SIZE)]
    PayloadTooLarge(usize),
}

impl Packet {
    pub fn packet_type(&self) -> PacketType {
        match &self.body {
            PacketBody::Data(_) => PacketType::Data,
            PacketBody::AttemptJoin { .. } => PacketType::AttemptJoin,
            PacketBody::Join => PacketType::Join,
        }
    }

    pub fn is_data(&self) -> bool {
        matches!(self.body, PacketBody::Data(_))
    }

    pub fn data(&self) -> Option<&DataInfo> {
        match &self.body {
            PacketBody::Data(data) => Some(data),
            _ => None,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf.freeze()
    }

    pub fn encoded_len(&self) -> usize {
        let header = 2 * size_of::<u8>() + 2 * size_of::<u32>() + size_of::<u8>() + self.depends.len() * 2 * size_of::<u32>();
        header + match &self.body {
            PacketBody::Data(data) => size_of::<u16>() + size_of::<u8>() + size_of::<u32>() + size_of::<u16>() + data.payload.len(),
            PacketBody::AttemptJoin { proposed_sender_ids } => size_of::<u8>() + proposed_sender_ids.len() * size_of::<u32>(),
            PacketBody::Join => 0,
        }
    }

    /// NB: List lengths and payload size are not re-checked here. [PacketBuilder] and
    ///      [Packet::parse] enforce them, code assembling a [Packet] by hand must do the same.
    pub fn encode_into(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.packet_type().id());
        buf.put_u8(PROTOCOL_VERSION_1);
        buf.put_u32(self.sender_id.to_raw());
        buf.put_u32(self.sequence_id.to_raw());

        buf.put_u8(self.depends.len() as u8);
        for stamp in &self.depends {
            buf.put_u32(stamp.sender_id.to_raw());
            buf.put_u32(stamp.sequence_id.to_raw());
        }

        match &self.body {
            PacketBody::Data(data) => {
                buf.put_u16(data.stream_id);
                buf.put_u8(data.flags.bits());
                buf.put_u32(data.total_size);
                buf.put_u16(data.payload.len() as u16);
                buf.put_slice(&data.payload);
            }
            PacketBody::AttemptJoin { proposed_sender_ids } => {
                buf.put_u8(proposed_sender_ids.len() as u8);
                for id in proposed_sender_ids {
                    buf.put_u32(id.to_raw());
                }
            }
            PacketBody::Join => {}
        }
    }

    pub fn parse(raw: &[u8]) -> Result<Packet, DecodeError> {
        let mut buf = raw;

        let packet_type = PacketType::from_id(buf.try_read_u8()?)?;
        let version = buf.try_read_u8()?;
        if version != PROTOCOL_VERSION_1 {
            return Err(DecodeError::UnsupportedVersion(version));
        }

        let sender_id = SenderId::from_raw(buf.try_read_u32()?);
        let sequence_id = SequenceId::from_raw(buf.try_read_u32()?);

        let num_depends = buf.try_read_u8()? as usize;
        let mut depends = Vec::with_capacity(num_depends);
        for _ in 0..num_depends {
            let stamp = DependencyStamp {
                sender_id: SenderId::from_raw(buf.try_read_u32()?),
                sequence_id: SequenceId::from_raw(buf.try_read_u32()?),
            };
            if stamp.sender_id == sender_id {
                return Err(DecodeError::SelfDependency(sender_id));
            }
            depends.push(stamp);
        }

        let body = match packet_type {
            PacketType::Data => PacketBody::Data(Self::parse_data_info(&mut buf)?),
            PacketType::AttemptJoin => {
                let num_senders = buf.try_read_u8()? as usize;
                let mut proposed_sender_ids = Vec::with_capacity(num_senders);
                for _ in 0..num_senders {
                    proposed_sender_ids.push(SenderId::from_raw(buf.try_read_u32()?));
                }
                PacketBody::AttemptJoin { proposed_sender_ids }
            }
            PacketType::Join => PacketBody::Join,
        };

        if !buf.is_empty() {
            return Err(DecodeError::TrailingBytes(buf.len()));
        }

        Ok(Packet {
            sender_id,
            sequence_id,
            depends,
            body,
        })
    }

    fn parse_data_info(buf: &mut &[u8]) -> Result<DataInfo, DecodeError> {
        let stream_id = buf.try_read_u16()?;

        let raw_flags = buf.try_read_u8()?;
        let flags = DataFlags::from_bits(raw_flags)
            .ok_or(DecodeError::InvalidFlags(raw_flags))?;

        let total_size = buf.try_read_u32()?;

        let payload_len = buf.try_read_u16()? as usize;
        if payload_len > MAX_PAYLOAD_SIZE {
            return Err(DecodeError::PayloadTooLarge(payload_len));
        }

        // a single fragment can never be longer than the message, and a complete message must
        //  fit into its only fragment exactly
        if payload_len as u64 > total_size as u64
            || (flags.contains(DataFlags::COMPLETE) && payload_len as u64 != total_size as u64)
        {
            return Err(DecodeError::InconsistentFragment { payload_len, total_size });
        }

        let payload = buf.try_read_bytes(payload_len)?;

        Ok(DataInfo {
            stream_id,
            flags,
            total_size,
            payload,
        })
    }
}

/// Incremental construction of a [Packet]. Operations that do not apply to the builder's packet
///  type fail with [BuildError::WrongPacketType] instead of being silently ignored.
pub struct PacketBuilder {
    packet_type: PacketType,
    sender_id: SenderId,
    sequence_id: Option<SequenceId>,
    depends: Vec<DependencyStamp>,
    data_info: Option<(u16, DataFlags, u32)>,
    payload: BytesMut,
    proposed_sender_ids: Vec<SenderId>,
}
impl PacketBuilder {
    pub fn new(packet_type: PacketType, sender_id: SenderId) -> PacketBuilder {
        PacketBuilder {
            packet_type,
            sender_id,
            sequence_id: None,
            depends: Vec::new(),
            data_info: None,
            payload: BytesMut::new(),
            proposed_sender_ids: Vec::new(),
        }
    }

    pub fn set_sequence_id(&mut self, sequence_id: SequenceId) -> &mut Self {
        self.sequence_id = Some(sequence_id);
        self
    }

    pub fn set_data_info(&mut self, stream_id: u16, flags: DataFlags, total_size: u32) -> Result<&mut Self, BuildError> {
        self.require(PacketType::Data)?;
        self.data_info = Some((stream_id, flags, total_size));
        Ok(self)
    }

    pub fn add_dependency(&mut self, sender_id: SenderId, sequence_id: SequenceId) -> Result<&mut Self, BuildError> {
        if sender_id == self.sender_id {
            return Err(BuildError::SelfDependency(sender_id));
        }
        if self.depends.len() >= MAX_LIST_LEN {
            return Err(BuildError::TooManyEntries);
        }
        self.depends.push(DependencyStamp { sender_id, sequence_id });
        Ok(self)
    }

    /// Appends as much of `data` as fits into the packet, returning the number of bytes that
    ///  were actually appended. The caller is expected to put the rest into follow-up
    ///  fragments.
    pub fn add_payload(&mut self, data: &[u8]) -> Result<usize, BuildError> {
        self.require(PacketType::Data)?;
        let len = data.len().min(MAX_PAYLOAD_SIZE - self.payload.len());
        self.payload.put_slice(&data[..len]);
        Ok(len)
    }

    /// Like [PacketBuilder::add_payload], but fails instead of appending partially
    pub fn add_payload_exact(&mut self, data: &[u8]) -> Result<&mut Self, BuildError> {
        self.require(PacketType::Data)?;
        let new_len = self.payload.len() + data.len();
        if new_len > MAX_PAYLOAD_SIZE {
            return Err(BuildError::PayloadTooLarge(new_len));
        }
        self.payload.put_slice(data);
        Ok(self)
    }

    pub fn add_proposed_sender(&mut self, sender_id: SenderId) -> Result<&mut Self, BuildError> {
        self.require(PacketType::AttemptJoin)?;
        if self.proposed_sender_ids.len() >= MAX_LIST_LEN {
            return Err(BuildError::TooManyEntries);
        }
        self.proposed_sender_ids.push(sender_id);
        Ok(self)
    }

    pub fn build(&self) -> Result<Packet, BuildError> {
        let sequence_id = self.sequence_id.ok_or(BuildError::MissingSequenceId)?;

        let body = match self.packet_type {
            PacketType::Data => {
                let (stream_id, flags, total_size) = self.data_info.ok_or(BuildError::MissingDataInfo)?;
                PacketBody::Data(DataInfo {
                    stream_id,
                    flags,
                    total_size,
                    payload: Bytes::copy_from_slice(&self.payload),
                })
            }
            PacketType::AttemptJoin => PacketBody::AttemptJoin { proposed_sender_ids: self.proposed_sender_ids.clone() },
            PacketType::Join => PacketBody::Join,
        };

        Ok(Packet {
            sender_id: self.sender_id,
            sequence_id,
            depends: self.depends.clone(),
            body,
        })
    }

    fn require(&self, packet_type: PacketType) -> Result<(), BuildError> {
        if self.packet_type != packet_type {
            return Err(BuildError::WrongPacketType(self.packet_type));
        }
        Ok(())
    }
}

/// Splits a message into fragments of at most `max_payload` bytes, flagging the first with
///  START and the last with END. An empty message becomes a single empty fragment.
pub fn fragment(stream_id: u16, message: &Bytes, max_payload: usize) -> Vec<DataInfo> {
    let max_payload = max_payload.clamp(1, MAX_PAYLOAD_SIZE);
    let total_size = message.len() as u32;

    if message.is_empty() {
        return vec![DataInfo {
            stream_id,
            flags: DataFlags::COMPLETE,
            total_size,
            payload: Bytes::new(),
        }];
    }

    let num_fragments = message.len().div_ceil(max_payload);
    (0..num_fragments)
        .map(|i| {
            let mut flags = DataFlags::empty();
            if i == 0 {
                flags |= DataFlags::START;
            }
            if i == num_fragments - 1 {
                flags |= DataFlags::END;
            }
            let end = ((i + 1) * max_payload).min(message.len());
            DataInfo {
                stream_id,
                flags,
                total_size,
                payload: message.slice(i * max_payload..end),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn sid(raw: u32) -> SenderId {
        SenderId::from_raw(raw)
    }

    fn seq(raw: u32) -> SequenceId {
        SequenceId::from_raw(raw)
    }

    fn data_packet(flags: DataFlags, total_size: u32, payload: &[u8], depends: Vec<(u32, u32)>) -> Packet {
        Packet {
            sender_id: sid(7),
            sequence_id: seq(42),
            depends: depends.into_iter().map(|(s, q)| DependencyStamp::new(sid(s), seq(q))).collect(),
            body: PacketBody::Data(DataInfo {
                stream_id: 3,
                flags,
                total_size,
                payload: Bytes::copy_from_slice(payload),
            }),
        }
    }

    #[rstest]
    #[case::data_complete(data_packet(DataFlags::COMPLETE, 3, b"abc", vec![]))]
    #[case::data_start(data_packet(DataFlags::START, 3000, &[1u8; 1440], vec![(1, 5)]))]
    #[case::data_middle(data_packet(DataFlags::empty(), 3000, &[2u8; 100], vec![(1, 5), (2, u32::MAX)]))]
    #[case::data_end(data_packet(DataFlags::END, 3000, b"xyz", vec![]))]
    #[case::data_empty(data_packet(DataFlags::COMPLETE, 0, b"", vec![]))]
    #[case::attempt_join(Packet { sender_id: sid(1), sequence_id: seq(0), depends: vec![DependencyStamp::new(sid(2), seq(9))], body: PacketBody::AttemptJoin { proposed_sender_ids: vec![sid(3), sid(4)] }})]
    #[case::attempt_join_empty(Packet { sender_id: sid(1), sequence_id: seq(u32::MAX), depends: vec![], body: PacketBody::AttemptJoin { proposed_sender_ids: vec![] }})]
    #[case::join(Packet { sender_id: sid(u32::MAX), sequence_id: seq(17), depends: vec![DependencyStamp::new(sid(0), seq(0))], body: PacketBody::Join })]
    fn test_round_trip(#[case] packet: Packet) {
        let encoded = packet.encode();
        assert_eq!(encoded.len(), packet.encoded_len());
        let parsed = Packet::parse(&encoded).unwrap();
        assert_eq!(parsed, packet);
    }

    #[test]
    fn test_encode_wire_layout() {
        let packet = data_packet(DataFlags::COMPLETE, 2, b"hi", vec![(0x0102_0304, 5)]);
        let expected: Vec<u8> = vec![
            1, 1,
            0, 0, 0, 7,
            0, 0, 0, 42,
            1, 1, 2, 3, 4, 0, 0, 0, 5,
            0, 3,
            3,
            0, 0, 0, 2,
            0, 2, b'h', b'i',
        ];
        assert_eq!(packet.encode().as_ref(), expected.as_slice());
    }

    #[test]
    fn test_encode_attempt_join_wire_layout() {
        let packet = Packet { sender_id: sid(1), sequence_id: seq(2), depends: vec![], body: PacketBody::AttemptJoin { proposed_sender_ids: vec![sid(9)] } };
        let expected: Vec<u8> = vec![2, 1, 0,0,0,1, 0,0,0,2, 0, 1, 0,0,0,9];
        assert_eq!(packet.encode().as_ref(), expected.as_slice());
    }

    #[rstest]
    #[case::empty(vec![], "truncated")]
    #[case::unknown_type(vec![9, 1, 0,0,0,1, 0,0,0,2, 0], "unknown packet type 9")]
    #[case::bad_version(vec![3, 2, 0,0,0,1, 0,0,0,2, 0], "unsupported protocol version 2")]
    #[case::truncated_header(vec![3, 1, 0,0,0,1, 0,0], "truncated")]
    #[case::truncated_depends(vec![3, 1, 0,0,0,1, 0,0,0,2, 2, 0,0,0,5, 0,0,0,1], "truncated")]
    #[case::self_dependency(vec![3, 1, 0,0,0,1, 0,0,0,2, 1, 0,0,0,1, 0,0,0,1], "depends on its own sender")]
    #[case::trailing(vec![3, 1, 0,0,0,1, 0,0,0,2, 0, 99], "trailing")]
    #[case::bad_flags(vec![1, 1, 0,0,0,1, 0,0,0,2, 0, 0,3, 4, 0,0,0,0, 0,0], "invalid data flags")]
    #[case::payload_too_large(vec![1, 1, 0,0,0,1, 0,0,0,2, 0, 0,3, 1, 0,0,10,0, 5,161], "exceeds the maximum")]
    #[case::payload_exceeds_total(vec![1, 1, 0,0,0,1, 0,0,0,2, 0, 0,3, 1, 0,0,0,1, 0,2, 1,2], "inconsistent fragment")]
    #[case::complete_size_mismatch(vec![1, 1, 0,0,0,1, 0,0,0,2, 0, 0,3, 3, 0,0,0,5, 0,2, 1,2], "inconsistent fragment")]
    #[case::truncated_payload(vec![1, 1, 0,0,0,1, 0,0,0,2, 0, 0,3, 3, 0,0,0,5, 0,5, 1,2], "truncated")]
    #[case::truncated_attempt_join(vec![2, 1, 0,0,0,1, 0,0,0,2, 0, 2, 0,0,0,9], "truncated")]
    fn test_parse_malformed(#[case] raw: Vec<u8>, #[case] expected_msg: &str) {
        let err = Packet::parse(&raw).unwrap_err();
        assert!(err.to_string().contains(expected_msg), "{} does not contain {}", err, expected_msg);
    }

    #[test]
    fn test_parse_never_panics_on_prefixes() {
        let packet = data_packet(DataFlags::START, 3000, &[5u8; 200], vec![(1, 2), (3, 4)]);
        let encoded = packet.encode();
        for len in 0..encoded.len() {
            assert!(Packet::parse(&encoded[..len]).is_err());
        }
    }

    #[test]
    fn test_builder_data() {
        let mut builder = PacketBuilder::new(PacketType::Data, sid(1));
        builder.set_sequence_id(seq(5));
        builder.set_data_info(2, DataFlags::COMPLETE, 5).unwrap();
        builder.add_dependency(sid(2), seq(8)).unwrap();
        assert_eq!(builder.add_payload(b"hello").unwrap(), 5);

        let packet = builder.build().unwrap();
        assert_eq!(packet, Packet {
            sender_id: sid(1),
            sequence_id: seq(5),
            depends: vec![DependencyStamp::new(sid(2), seq(8))],
            body: PacketBody::Data(DataInfo { stream_id: 2, flags: DataFlags::COMPLETE, total_size: 5, payload: Bytes::from_static(b"hello") }),
        });
    }

    #[test]
    fn test_builder_payload_cap() {
        let mut builder = PacketBuilder::new(PacketType::Data, sid(1));
        assert_eq!(builder.add_payload(&[0u8; 1000]).unwrap(), 1000);
        assert_eq!(builder.add_payload(&[0u8; 1000]).unwrap(), 440);
        assert_eq!(builder.add_payload(&[0u8; 1]).unwrap(), 0);
        assert_eq!(builder.add_payload_exact(&[0u8; 1]).err(), Some(BuildError::PayloadTooLarge(1441)));
    }

    #[rstest]
    #[case::data_info_on_join(PacketType::Join)]
    #[case::data_info_on_attempt_join(PacketType::AttemptJoin)]
    fn test_builder_wrong_type_for_data(#[case] packet_type: PacketType) {
        let mut builder = PacketBuilder::new(packet_type, sid(1));
        assert_eq!(builder.set_data_info(1, DataFlags::COMPLETE, 0).err(), Some(BuildError::WrongPacketType(packet_type)));
        assert_eq!(builder.add_payload(b"x").err(), Some(BuildError::WrongPacketType(packet_type)));
    }

    #[rstest]
    #[case::data(PacketType::Data)]
    #[case::join(PacketType::Join)]
    fn test_builder_wrong_type_for_proposed_sender(#[case] packet_type: PacketType) {
        let mut builder = PacketBuilder::new(packet_type, sid(1));
        assert_eq!(builder.add_proposed_sender(sid(2)).err(), Some(BuildError::WrongPacketType(packet_type)));
    }

    #[test]
    fn test_builder_errors() {
        let mut builder = PacketBuilder::new(PacketType::Data, sid(1));
        assert_eq!(builder.build().err(), Some(BuildError::MissingSequenceId));
        builder.set_sequence_id(seq(1));
        assert_eq!(builder.build().err(), Some(BuildError::MissingDataInfo));
        assert_eq!(builder.add_dependency(sid(1), seq(1)).err(), Some(BuildError::SelfDependency(sid(1))));
    }

    #[test]
    fn test_builder_attempt_join() {
        let mut builder = PacketBuilder::new(PacketType::AttemptJoin, sid(1));
        builder.set_sequence_id(seq(3));
        builder.add_proposed_sender(sid(4)).unwrap()
            .add_proposed_sender(sid(5)).unwrap();
        let packet = builder.build().unwrap();
        assert_eq!(packet.body, PacketBody::AttemptJoin { proposed_sender_ids: vec![sid(4), sid(5)] });
    }

    #[rstest]
    #[case::empty(0, 10, vec![(DataFlags::COMPLETE, 0)])]
    #[case::single(5, 10, vec![(DataFlags::COMPLETE, 5)])]
    #[case::exact(10, 10, vec![(DataFlags::COMPLETE, 10)])]
    #[case::two(11, 10, vec![(DataFlags::START, 10), (DataFlags::END, 1)])]
    #[case::three(25, 10, vec![(DataFlags::START, 10), (DataFlags::empty(), 10), (DataFlags::END, 5)])]
    #[case::max_payload(3000, 1440, vec![(DataFlags::START, 1440), (DataFlags::empty(), 1440), (DataFlags::END, 120)])]
    fn test_fragment(#[case] len: usize, #[case] max_payload: usize, #[case] expected: Vec<(DataFlags, usize)>) {
        let message = Bytes::from((0..len).map(|i| i as u8).collect::<Vec<_>>());
        let fragments = fragment(4, &message, max_payload);

        let actual = fragments.iter()
            .map(|f| (f.flags, f.payload.len()))
            .collect::<Vec<_>>();
        assert_eq!(actual, expected);

        let mut reassembled = Vec::new();
        for f in &fragments {
            assert_eq!(f.stream_id, 4);
            assert_eq!(f.total_size as usize, len);
            reassembled.extend_from_slice(&f.payload);
        }
        assert_eq!(reassembled, message.to_vec());
    }

    #[test]
    fn test_packet_debug() {
        let packet = data_packet(DataFlags::START, 10, b"ab", vec![(1, 5)]);
        assert_eq!(format!("{:?}", packet), "PCKT{00000007#42:Data(DATA(3:S-:2/10))<-[00000001@5]}");
    }
}
