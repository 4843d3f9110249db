//! Async runtime wrapper around a [SenderGroup]: a single task owns the group, so all protocol
//!  state is mutated sequentially, and applications interact with it through a cloneable
//!  [SessionHandle].

use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use bytes::Bytes;
#[cfg(test)] use mockall::automock;
use tokio::select;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info, trace, warn};

use crate::event::{Event, EventNotifier};
use crate::sender_group::{Outgoing, SendError, SenderGroup};
use crate::sequence::{SenderId, SequenceId};

/// The network side of a session. This is where the application plugs in its multicast socket
///  (or whatever else it uses for distributing datagrams to the group).
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MulticastTransport: Send + Sync + 'static {
    /// sends a datagram to the group: either a locally originated packet or a repair message
    async fn send_datagram(&self, datagram: &[u8]);

    /// asks the group to re-send a packet this node is missing
    async fn send_repair_request(&self, origin: SenderId, missing_sequence_id: SequenceId);
}

type SendReply = oneshot::Sender<Result<(), SendError>>;

enum SessionCommand {
    Datagram(Bytes),
    SendData { stream_id: u16, message: Bytes, reply: SendReply },
    SendJoin { reply: SendReply },
    SendAttemptJoin { proposed_sender_ids: Vec<SenderId>, reply: SendReply },
    AddSender { sender_id: SenderId, display_name: Option<String> },
    RemoveSender { sender_id: SenderId },
    UpdateStart { sender_id: SenderId, start: SequenceId },
    SetDataStart { sender_id: SenderId, data_start: SequenceId },
    HoldData { sender_id: SenderId, from: SequenceId },
    ReleaseData { sender_id: SenderId },
    Seen { sender_id: SenderId, upto: SequenceId },
    RepairRequest { sender_id: SenderId, sequence_id: SequenceId },
    SetFailed { sender_id: SenderId },
}

#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    events: Arc<EventNotifier>,
}
impl SessionHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    async fn command(&self, command: SessionCommand) -> anyhow::Result<()> {
        self.commands.send(command).await
            .map_err(|_| anyhow!("session is shut down"))
    }

    async fn send_command(&self, command: impl FnOnce(SendReply) -> SessionCommand) -> anyhow::Result<()> {
        let (reply, reply_receiver) = oneshot::channel();
        self.command(command(reply)).await?;
        reply_receiver.await
            .map_err(|_| anyhow!("session is shut down"))??;
        Ok(())
    }

    /// hands a datagram received from the network to the session
    pub async fn on_datagram(&self, datagram: Bytes) -> anyhow::Result<()> {
        self.command(SessionCommand::Datagram(datagram)).await
    }

    pub async fn send_data(&self, stream_id: u16, message: Bytes) -> anyhow::Result<()> {
        self.send_command(|reply| SessionCommand::SendData { stream_id, message, reply }).await
    }

    pub async fn send_join(&self) -> anyhow::Result<()> {
        self.send_command(|reply| SessionCommand::SendJoin { reply }).await
    }

    pub async fn send_attempt_join(&self, proposed_sender_ids: Vec<SenderId>) -> anyhow::Result<()> {
        self.send_command(|reply| SessionCommand::SendAttemptJoin { proposed_sender_ids, reply }).await
    }

    pub async fn add_sender(&self, sender_id: SenderId, display_name: Option<String>) -> anyhow::Result<()> {
        self.command(SessionCommand::AddSender { sender_id, display_name }).await
    }

    pub async fn remove_sender(&self, sender_id: SenderId) -> anyhow::Result<()> {
        self.command(SessionCommand::RemoveSender { sender_id }).await
    }

    pub async fn update_start(&self, sender_id: SenderId, start: SequenceId) -> anyhow::Result<()> {
        self.command(SessionCommand::UpdateStart { sender_id, start }).await
    }

    pub async fn set_data_start(&self, sender_id: SenderId, data_start: SequenceId) -> anyhow::Result<()> {
        self.command(SessionCommand::SetDataStart { sender_id, data_start }).await
    }

    pub async fn hold_data(&self, sender_id: SenderId, from: SequenceId) -> anyhow::Result<()> {
        self.command(SessionCommand::HoldData { sender_id, from }).await
    }

    pub async fn release_data(&self, sender_id: SenderId) -> anyhow::Result<()> {
        self.command(SessionCommand::ReleaseData { sender_id }).await
    }

    pub async fn seen(&self, sender_id: SenderId, upto: SequenceId) -> anyhow::Result<()> {
        self.command(SessionCommand::Seen { sender_id, upto }).await
    }

    /// a repair request received from another peer
    pub async fn repair_request(&self, sender_id: SenderId, sequence_id: SequenceId) -> anyhow::Result<()> {
        self.command(SessionCommand::RepairRequest { sender_id, sequence_id }).await
    }

    pub async fn set_failed(&self, sender_id: SenderId) -> anyhow::Result<()> {
        self.command(SessionCommand::SetFailed { sender_id }).await
    }
}

pub struct Session {
    group: SenderGroup,
    transport: Arc<dyn MulticastTransport>,
    events: Arc<EventNotifier>,
    commands: mpsc::Receiver<SessionCommand>,
}

impl Session {
    /// Starts the session's task. The task terminates when the last [SessionHandle] is dropped.
    pub fn spawn(group: SenderGroup, transport: Arc<dyn MulticastTransport>) -> (SessionHandle, JoinHandle<()>) {
        let (send, recv) = mpsc::channel(group.config().command_channel_capacity);
        let events = Arc::new(EventNotifier::new(group.config().event_channel_capacity));

        let session = Session {
            group,
            transport,
            events: events.clone(),
            commands: recv,
        };
        let join_handle = tokio::spawn(session.do_loop());

        (SessionHandle { commands: send, events }, join_handle)
    }

    async fn do_loop(mut self) {
        info!("starting multicast session for local sender {:?}", self.group.local_sender_id());

        let config = self.group.config().clone();
        let mut repair_interval = interval(config.repair_interval);

        loop {
            select! {
                command = self.commands.recv() => {
                    match command {
                        Some(command) => self.on_command(command).await,
                        None => {
                            debug!("all session handles were dropped - shutting down");
                            break;
                        }
                    }
                }
                _ = repair_interval.tick() => {
                    let events = self.group.on_repair_tick(config.max_repairs_per_tick);
                    if !events.is_empty() {
                        debug!("repair tick caused {} events", events.len());
                    }
                    self.dispatch(events).await;
                }
            }
        }
    }

    async fn on_command(&mut self, command: SessionCommand) {
        let events = match command {
            SessionCommand::Datagram(datagram) => {
                match self.group.push_datagram(&datagram) {
                    Ok(events) => events,
                    Err(e) => {
                        warn!("received malformed datagram - dropping: {}", e);
                        return;
                    }
                }
            }
            SessionCommand::SendData { stream_id, message, reply } => {
                let result = self.group.send_data(stream_id, message);
                self.send_outgoing(result, reply).await;
                return;
            }
            SessionCommand::SendJoin { reply } => {
                let result = self.group.send_join();
                self.send_outgoing(result, reply).await;
                return;
            }
            SessionCommand::SendAttemptJoin { proposed_sender_ids, reply } => {
                let result = self.group.send_attempt_join(&proposed_sender_ids);
                self.send_outgoing(result, reply).await;
                return;
            }
            SessionCommand::AddSender { sender_id, display_name } => {
                self.group.add_sender(sender_id, display_name);
                return;
            }
            SessionCommand::RemoveSender { sender_id } => self.group.remove_sender(sender_id),
            SessionCommand::UpdateStart { sender_id, start } => self.group.update_start(sender_id, start),
            SessionCommand::SetDataStart { sender_id, data_start } => {
                self.group.set_data_start(sender_id, data_start);
                return;
            }
            SessionCommand::HoldData { sender_id, from } => {
                self.group.hold_data(sender_id, from);
                return;
            }
            SessionCommand::ReleaseData { sender_id } => self.group.release_data(sender_id),
            SessionCommand::Seen { sender_id, upto } => {
                self.group.seen(sender_id, upto);
                return;
            }
            SessionCommand::RepairRequest { sender_id, sequence_id } => self.group.repair_request(sender_id, sequence_id),
            SessionCommand::SetFailed { sender_id } => self.group.set_failed(sender_id),
        };
        self.dispatch(events).await;
    }

    async fn send_outgoing(&mut self, outgoing: Result<Outgoing, SendError>, reply: SendReply) {
        match outgoing {
            Ok(outgoing) => {
                for datagram in &outgoing.datagrams {
                    self.transport.send_datagram(datagram).await;
                }
                self.dispatch(outgoing.events).await;
                let _ = reply.send(Ok(()));
            }
            Err(e) => {
                debug!("sending failed: {}", e);
                let _ = reply.send(Err(e));
            }
        }
    }

    async fn dispatch(&self, events: Vec<Event>) {
        for event in events {
            match &event {
                Event::RepairRequest { origin, missing_sequence_id } => {
                    trace!("requesting repair for {}:{:?}", origin, missing_sequence_id);
                    self.transport.send_repair_request(*origin, *missing_sequence_id).await;
                }
                Event::RepairMessage { packet_bytes, .. } => {
                    self.transport.send_datagram(packet_bytes).await;
                }
                _ => {}
            }
            self.events.send_event(event);
        }
    }
}
