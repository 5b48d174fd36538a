//! Communication between parties.
//!
//! The [`Channel`] trait is the raw delivery substrate: it can send bytes to a party and
//! yields the next message that arrived from *any* party, in no particular order across
//! senders. [`Transport`] builds the protocol's tagged point-to-point exchange on top of it,
//! buffering messages that arrive before they are asked for.
use std::{collections::VecDeque, fmt, future::Future, time::Duration};

use serde::{Deserialize, Serialize};
use tokio::{
    sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel},
    time::timeout,
};
use tracing::trace;

/// Errors related to sending / receiving / (de-)serializing messages.
#[derive(Debug, thiserror::Error)]
#[error("{reason} (during {phase})")]
pub struct Error {
    /// The protocol exchange during which the error occurred.
    pub phase: String,
    /// The specific error that was raised.
    pub reason: ErrorKind,
}

/// The specific error that occurred when trying to send / receive a message.
#[derive(Debug, thiserror::Error)]
pub enum ErrorKind {
    /// The (serialized) message could not be received over the channel.
    #[error("message could not be received: {0}")]
    RecvError(String),
    /// The (serialized) message could not be sent over the channel.
    #[error("message could not be sent: {0}")]
    SendError(String),
    /// The message could not be serialized or deserialized.
    #[error("message could not be (de-)serialized: {0}")]
    SerdeError(String),
    /// No message from the party arrived before the receive timeout elapsed.
    #[error("no message from party {0} before the timeout elapsed")]
    PeerTimeout(usize),
    /// The party index is outside of `1..=n_parties`.
    #[error("party {0} does not take part in the computation")]
    UnknownParty(usize),
}

/// A communication channel used to send/receive messages to/from the other parties.
///
/// Parties are addressed by their index `1..=n_parties`.
pub trait Channel {
    /// The error that can occur sending messages over the channel.
    type SendError: fmt::Debug;
    /// The error that can occur receiving messages over the channel.
    type RecvError: fmt::Debug;

    /// Hands a message to the medium for delivery to the party with the given index.
    fn send_bytes_to(
        &mut self,
        party: usize,
        msg: Vec<u8>,
    ) -> impl Future<Output = Result<(), Self::SendError>> + Send;

    /// Awaits the next message delivered to this party, from any sender.
    ///
    /// A broadcast medium may also yield messages addressed to other parties.
    fn recv_bytes(&mut self) -> impl Future<Output = Result<Vec<u8>, Self::RecvError>> + Send;
}

/// A simple in-process medium using unbounded [`UnboundedSender`]s and [`UnboundedReceiver`]s.
///
/// Each party has a single inbox that all other parties write to, so messages from different
/// senders interleave arbitrarily.
#[derive(Debug)]
pub struct SimpleChannel {
    party: usize,
    peers: Vec<UnboundedSender<Vec<u8>>>,
    inbox: UnboundedReceiver<Vec<u8>>,
    fan_out: bool,
}

impl SimpleChannel {
    /// Creates point-to-point channels for N parties to communicate with each other.
    ///
    /// The channel of party `i` is at position `i - 1`.
    pub fn channels(parties: usize) -> Vec<Self> {
        Self::connect(parties, false)
    }

    /// Creates channels over a broadcast medium: every message is delivered to every party.
    pub fn broadcast_channels(parties: usize) -> Vec<Self> {
        Self::connect(parties, true)
    }

    fn connect(parties: usize, fan_out: bool) -> Vec<Self> {
        let (peers, inboxes): (Vec<_>, Vec<_>) =
            (0..parties).map(|_| unbounded_channel()).unzip();
        inboxes
            .into_iter()
            .enumerate()
            .map(|(i, inbox)| SimpleChannel {
                party: i + 1,
                peers: peers.clone(),
                inbox,
                fan_out,
            })
            .collect()
    }

    /// The index of the party this channel belongs to.
    pub fn party(&self) -> usize {
        self.party
    }
}

/// The error raised by `send` calls of a [`SimpleChannel`].
#[derive(Debug)]
pub enum SimpleSendError {
    /// There is no inbox for the party.
    NoSuchParty(usize),
    /// The inbox of the party has been dropped.
    Closed(usize),
}

/// The error raised by `recv` calls of a [`SimpleChannel`].
#[derive(Debug)]
pub enum SimpleRecvError {
    /// The channel has been closed.
    Closed,
}

impl Channel for SimpleChannel {
    type SendError = SimpleSendError;
    type RecvError = SimpleRecvError;

    async fn send_bytes_to(&mut self, p: usize, msg: Vec<u8>) -> Result<(), SimpleSendError> {
        if self.fan_out {
            for (i, peer) in self.peers.iter().enumerate() {
                peer.send(msg.clone())
                    .map_err(|_| SimpleSendError::Closed(i + 1))?;
            }
            return Ok(());
        }
        let Some(peer) = p.checked_sub(1).and_then(|i| self.peers.get(i)) else {
            return Err(SimpleSendError::NoSuchParty(p));
        };
        peer.send(msg).map_err(|_| SimpleSendError::Closed(p))
    }

    async fn recv_bytes(&mut self) -> Result<Vec<u8>, SimpleRecvError> {
        self.inbox.recv().await.ok_or(SimpleRecvError::Closed)
    }
}

/// The logical exchange a message belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tag {
    /// The sharing of the private input of the party with the given index.
    Input(usize),
    /// The degree reduction round of the MUL gate with the given id.
    Gate(usize),
    /// The reveal of the output wire of the gate with the given id.
    Output(usize),
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tag::Input(p) => write!(f, "input of party {p}"),
            Tag::Gate(g) => write!(f, "gate {g}"),
            Tag::Output(g) => write!(f, "output gate {g}"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct Envelope {
    from: usize,
    to: usize,
    tag: Tag,
    value: u64,
}

/// Reliable, tagged point-to-point exchange of field elements over a [`Channel`].
///
/// Messages from a sender that arrive while a different `(sender, tag)` is awaited are kept in
/// a per-sender FIFO queue until they are asked for. The queues are owned by the transport and
/// drained only by the single protocol flow that holds `&mut self`, so no locking is needed.
#[derive(Debug)]
pub struct Transport<C: Channel> {
    channel: C,
    party: usize,
    n_parties: usize,
    recv_timeout: Duration,
    pending: Vec<VecDeque<(Tag, u64)>>,
}

impl<C: Channel> Transport<C> {
    /// Wraps the channel of party `party` (out of `n_parties`).
    pub fn new(channel: C, party: usize, n_parties: usize, recv_timeout: Duration) -> Self {
        Self {
            channel,
            party,
            n_parties,
            recv_timeout,
            pending: vec![VecDeque::new(); n_parties],
        }
    }

    /// The index of the party owning this transport.
    pub fn party(&self) -> usize {
        self.party
    }

    /// The number of parties that can be addressed.
    pub fn n_parties(&self) -> usize {
        self.n_parties
    }

    /// The number of messages from `from` that are buffered but not yet received.
    pub fn pending(&self, from: usize) -> usize {
        from.checked_sub(1)
            .and_then(|i| self.pending.get(i))
            .map_or(0, VecDeque::len)
    }

    /// Sends `value` to party `to` as part of the exchange `tag`.
    pub async fn send(&mut self, to: usize, tag: Tag, value: u64) -> Result<(), Error> {
        self.check_party(to, tag)?;
        let envelope = Envelope {
            from: self.party,
            to,
            tag,
            value,
        };
        let msg = bincode::serialize(&envelope).map_err(|e| Error {
            phase: format!("sending {tag}"),
            reason: ErrorKind::SerdeError(format!("{e:?}")),
        })?;
        self.channel.send_bytes_to(to, msg).await.map_err(|e| Error {
            phase: tag.to_string(),
            reason: ErrorKind::SendError(format!("{e:?}")),
        })
    }

    /// Waits for the value that party `from` sent as part of the exchange `tag`.
    ///
    /// Returns immediately if the message was already buffered. Fails with
    /// [`ErrorKind::PeerTimeout`] if it does not arrive within the receive timeout.
    pub async fn receive(&mut self, from: usize, tag: Tag) -> Result<u64, Error> {
        self.check_party(from, tag)?;
        let queue = &mut self.pending[from - 1];
        let buffered = queue.iter().position(|(t, _)| *t == tag);
        if let Some((_, value)) = buffered.and_then(|pos| queue.remove(pos)) {
            return Ok(value);
        }
        match timeout(self.recv_timeout, self.wait_for(from, tag)).await {
            Ok(value) => value,
            Err(_) => Err(Error {
                phase: tag.to_string(),
                reason: ErrorKind::PeerTimeout(from),
            }),
        }
    }

    async fn wait_for(&mut self, from: usize, tag: Tag) -> Result<u64, Error> {
        loop {
            let msg = self.channel.recv_bytes().await.map_err(|e| Error {
                phase: tag.to_string(),
                reason: ErrorKind::RecvError(format!("{e:?}")),
            })?;
            let envelope: Envelope = bincode::deserialize(&msg).map_err(|e| Error {
                phase: format!("receiving {tag}"),
                reason: ErrorKind::SerdeError(format!("{e:?}")),
            })?;
            if envelope.to != self.party {
                continue;
            }
            self.check_party(envelope.from, tag)?;
            if envelope.from == from && envelope.tag == tag {
                return Ok(envelope.value);
            }
            trace!(
                party = self.party,
                from = envelope.from,
                tag = %envelope.tag,
                "buffering message"
            );
            self.pending[envelope.from - 1].push_back((envelope.tag, envelope.value));
        }
    }

    fn check_party(&self, party: usize, tag: Tag) -> Result<(), Error> {
        if party == 0 || party > self.n_parties {
            return Err(Error {
                phase: tag.to_string(),
                reason: ErrorKind::UnknownParty(party),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(10);

    fn transports(
        channels: Vec<SimpleChannel>,
        recv_timeout: Duration,
    ) -> Vec<Transport<SimpleChannel>> {
        let n = channels.len();
        channels
            .into_iter()
            .map(|ch| {
                let party = ch.party();
                Transport::new(ch, party, n, recv_timeout)
            })
            .collect()
    }

    #[tokio::test]
    async fn out_of_order_tags_are_buffered() -> Result<(), Error> {
        let mut t = transports(SimpleChannel::channels(2), TIMEOUT);
        let mut b = t.pop().unwrap();
        let mut a = t.pop().unwrap();

        a.send(2, Tag::Gate(5), 50).await?;
        a.send(2, Tag::Gate(3), 30).await?;

        assert_eq!(b.receive(1, Tag::Gate(3)).await?, 30);
        assert_eq!(b.pending(1), 1);
        assert_eq!(b.receive(1, Tag::Gate(5)).await?, 50);
        assert_eq!(b.pending(1), 0);
        Ok(())
    }

    #[tokio::test]
    async fn buffers_are_kept_per_sender() -> Result<(), Error> {
        let mut t = transports(SimpleChannel::channels(3), TIMEOUT);
        let mut c = t.pop().unwrap();
        let mut b = t.pop().unwrap();
        let mut a = t.pop().unwrap();

        a.send(2, Tag::Input(1), 11).await?;
        a.send(2, Tag::Output(9), 19).await?;
        c.send(2, Tag::Input(3), 33).await?;
        c.send(2, Tag::Output(9), 39).await?;

        assert_eq!(b.receive(3, Tag::Output(9)).await?, 39);
        assert_eq!(b.pending(1), 2);
        assert_eq!(b.pending(3), 1);
        assert_eq!(b.receive(1, Tag::Output(9)).await?, 19);
        assert_eq!(b.receive(3, Tag::Input(3)).await?, 33);
        assert_eq!(b.receive(1, Tag::Input(1)).await?, 11);
        Ok(())
    }

    #[tokio::test]
    async fn same_tag_is_delivered_in_send_order() -> Result<(), Error> {
        let mut t = transports(SimpleChannel::channels(2), TIMEOUT);
        let mut b = t.pop().unwrap();
        let mut a = t.pop().unwrap();

        a.send(2, Tag::Gate(4), 1).await?;
        a.send(2, Tag::Gate(7), 2).await?;
        a.send(2, Tag::Gate(4), 3).await?;

        assert_eq!(b.receive(1, Tag::Gate(7)).await?, 2);
        assert_eq!(b.receive(1, Tag::Gate(4)).await?, 1);
        assert_eq!(b.receive(1, Tag::Gate(4)).await?, 3);
        Ok(())
    }

    #[tokio::test]
    async fn broadcast_medium_is_filtered_by_recipient() -> Result<(), Error> {
        let mut t = transports(SimpleChannel::broadcast_channels(3), TIMEOUT);
        let mut c = t.pop().unwrap();
        let mut b = t.pop().unwrap();
        let mut a = t.pop().unwrap();

        a.send(3, Tag::Input(1), 13).await?;
        a.send(2, Tag::Input(1), 12).await?;
        a.send(1, Tag::Input(1), 11).await?;

        assert_eq!(b.receive(1, Tag::Input(1)).await?, 12);
        assert_eq!(c.receive(1, Tag::Input(1)).await?, 13);
        assert_eq!(a.receive(1, Tag::Input(1)).await?, 11);
        assert_eq!(b.pending(1), 0);
        Ok(())
    }

    #[tokio::test]
    async fn missing_peer_times_out() {
        let mut t = transports(SimpleChannel::channels(2), Duration::from_millis(20));
        let mut b = t.pop().unwrap();
        let err = b.receive(1, Tag::Gate(3)).await.unwrap_err();
        assert!(matches!(err.reason, ErrorKind::PeerTimeout(1)));
    }

    #[tokio::test]
    async fn rejects_unknown_parties() {
        let mut t = transports(SimpleChannel::channels(2), TIMEOUT);
        let mut a = t.remove(0);
        let err = a.send(3, Tag::Gate(1), 0).await.unwrap_err();
        assert!(matches!(err.reason, ErrorKind::UnknownParty(3)));
        let err = a.receive(0, Tag::Gate(1)).await.unwrap_err();
        assert!(matches!(err.reason, ErrorKind::UnknownParty(0)));
    }
}
