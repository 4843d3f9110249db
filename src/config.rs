use std::time::Duration;
use anyhow::bail;

use crate::packet::MAX_PAYLOAD_SIZE;

#[derive(Debug, Clone)]
pub struct RMulticastConfig {
    /// Payload bytes per DATA fragment for outgoing messages. Must not exceed
    ///  [MAX_PAYLOAD_SIZE], which receivers enforce.
    pub max_payload_size: usize,

    /// Upper bound for a reassembled message. Fragments announcing a bigger `total_size` are
    ///  discarded, which protects against a peer making us buffer unbounded data.
    pub max_message_size: u32,

    /// A packet (or dependency stamp, or repair request) whose sequence id is further than this
    ///  ahead of the id after the highest one known so far from the same origin is considered
    ///  implausible and dropped. This bounds the number of missing ids (and repair requests) a
    ///  single datagram can create.
    pub max_sequence_gap: u32,

    /// Number of packets per sender that are retained for answering repair requests. Oldest
    ///  packets are evicted first if the limit is reached before they are trimmed by `seen`.
    pub retained_history_size: usize,

    /// Outstanding gaps are re-requested at this interval. Configure to roughly 2x RTT.
    pub repair_interval: Duration,
    pub max_repairs_per_tick: usize,

    pub event_channel_capacity: usize,
    /// buffer size of the session's command channel; senders wait while it is full
    pub command_channel_capacity: usize,
}

impl RMulticastConfig {
    pub fn new() -> RMulticastConfig {
        RMulticastConfig {
            max_payload_size: MAX_PAYLOAD_SIZE,
            max_message_size: 16*1024*1024,
            max_sequence_gap: 1024,
            retained_history_size: 4096,
            repair_interval: Duration::from_millis(200),
            max_repairs_per_tick: 32,
            event_channel_capacity: 1024,
            command_channel_capacity: 1024,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_payload_size == 0 || self.max_payload_size > MAX_PAYLOAD_SIZE {
            bail!("max payload size must be between 1 and {}", MAX_PAYLOAD_SIZE);
        }
        if self.max_sequence_gap == 0 || self.max_sequence_gap > i32::MAX as u32 / 2 {
            bail!("max sequence gap is out of range");
        }
        if self.retained_history_size == 0 {
            bail!("retained history size must be positive");
        }
        if self.repair_interval.is_zero() {
            bail!("repair interval must be positive");
        }
        if self.event_channel_capacity == 0 {
            bail!("event channel capacity must be positive");
        }
        if self.command_channel_capacity == 0 {
            bail!("command channel capacity must be positive");
        }
        Ok(())
    }
}

impl Default for RMulticastConfig {
    fn default() -> Self {
        Self::new()
    }
}
