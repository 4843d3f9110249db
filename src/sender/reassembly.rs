use bytes::{BufMut, Bytes, BytesMut};
use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use crate::event::ReassemblyError;
use crate::packet::{DataFlags, DataInfo};

/// upper bound for pre-allocating assembly buffers based on a peer's declared message size
const MAX_PREALLOCATION: usize = 64*1024;

enum StreamState {
    Assembling {
        total_size: u32,
        buf: BytesMut,
    },
    /// The start of the current message is unavailable (or the message was discarded), so
    ///  fragments are dropped until the next END.
    Skipping,
}

/// Per-stream reassembly of fragmented messages for a single sender.
///
/// Fragments must be fed in sequence order - the sender's release cursor guarantees this, so
///  there is no need to buffer out-of-order fragments here.
pub struct Reassembly {
    max_message_size: u32,
    streams: FxHashMap<u16, StreamState>,
}
impl Reassembly {
    pub fn new(max_message_size: u32) -> Reassembly {
        Reassembly {
            max_message_size,
            streams: FxHashMap::default(),
        }
    }

    pub fn is_idle(&self) -> bool {
        self.streams.is_empty()
    }

    /// Returns the complete message if `data` is the last fragment of a message. Inconsistencies
    ///  are reported through `on_discard`, and the affected message is dropped.
    pub fn on_fragment(&mut self, data: &DataInfo, mut on_discard: impl FnMut(ReassemblyError)) -> Option<Bytes> {
        let is_end = data.flags.contains(DataFlags::END);

        if data.flags.contains(DataFlags::START) {
            if let Some(StreamState::Assembling { .. }) = self.streams.remove(&data.stream_id) {
                debug!("stream {}: START fragment interrupts a partially assembled message", data.stream_id);
                on_discard(ReassemblyError::Interrupted);
            }

            if data.total_size > self.max_message_size {
                debug!("stream {}: message of {} bytes exceeds the maximum message size", data.stream_id, data.total_size);
                on_discard(ReassemblyError::TooLarge { declared: data.total_size, max: self.max_message_size });
                self.skip_until_end(data.stream_id, is_end);
                return None;
            }

            if is_end {
                return self.check_complete(data.total_size, data.payload.clone(), &mut on_discard);
            }

            let mut buf = BytesMut::with_capacity((data.total_size as usize).min(MAX_PREALLOCATION));
            buf.put_slice(&data.payload);
            trace!("stream {}: started message of {} bytes", data.stream_id, data.total_size);
            self.streams.insert(data.stream_id, StreamState::Assembling { total_size: data.total_size, buf });
            return None;
        }

        match self.streams.get_mut(&data.stream_id) {
            None => {
                debug!("stream {}: fragment without START", data.stream_id);
                on_discard(ReassemblyError::MissingStart);
                self.skip_until_end(data.stream_id, is_end);
                None
            }
            Some(StreamState::Skipping) => {
                trace!("stream {}: skipping fragment", data.stream_id);
                if is_end {
                    self.streams.remove(&data.stream_id);
                }
                None
            }
            Some(StreamState::Assembling { total_size, buf }) => {
                let total_size = *total_size;
                let new_len = buf.len() + data.payload.len();
                if new_len as u64 > total_size as u64 {
                    debug!("stream {}: fragments exceed the declared message size of {}", data.stream_id, total_size);
                    on_discard(ReassemblyError::SizeMismatch { declared: total_size, actual: new_len });
                    self.skip_until_end(data.stream_id, is_end);
                    return None;
                }
                buf.put_slice(&data.payload);

                if !is_end {
                    return None;
                }
                match self.streams.remove(&data.stream_id) {
                    Some(StreamState::Assembling { buf, .. }) => self.check_complete(total_size, buf.freeze(), &mut on_discard),
                    _ => None,
                }
            }
        }
    }

    /// Consumes a fragment without assembling it, e.g. because it is below the sender's data
    ///  start. Follow-up fragments of the same message are dropped silently.
    pub fn skip_fragment(&mut self, data: &DataInfo) {
        self.skip_until_end(data.stream_id, data.flags.contains(DataFlags::END));
    }

    /// Drops all partially assembled messages, e.g. because the fragments continuing them will
    ///  never be released.
    pub fn abandon_all(&mut self) {
        for state in self.streams.values_mut() {
            *state = StreamState::Skipping;
        }
    }

    fn skip_until_end(&mut self, stream_id: u16, is_end: bool) {
        if is_end {
            self.streams.remove(&stream_id);
        }
        else {
            self.streams.insert(stream_id, StreamState::Skipping);
        }
    }

    fn check_complete(&self, total_size: u32, message: Bytes, on_discard: &mut impl FnMut(ReassemblyError)) -> Option<Bytes> {
        if message.len() as u64 != total_size as u64 {
            on_discard(ReassemblyError::SizeMismatch { declared: total_size, actual: message.len() });
            return None;
        }
        Some(message)
    }
}
