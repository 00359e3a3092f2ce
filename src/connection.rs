//! Per-connection protocol state machine
//!
//! [`Connection`] owns the byte cursor, frame decoder and frame encoder of
//! one WebSocket and sequences
//!
//! ```text
//! Connecting -> Open -> Closing -> Closed
//! ```
//!
//! It performs no I/O. The transport feeds it with [`Connection::receive`],
//! writes whatever [`Connection::poll_transmit`] returns, ends the socket
//! once [`Connection::wants_end`] says so, and reports timer expiry and
//! socket failures back. Application-facing output is a queue of
//! [`Event`]s drained with [`Connection::poll_event`].

use std::collections::VecDeque;
use std::io;

use bytes::{Bytes, BytesMut};
use tracing::{debug, trace, warn};

use crate::Config;
use crate::cursor::ByteCursor;
use crate::decoder::{Decoded, FrameDecoder};
use crate::encoder::FrameEncoder;
use crate::error::{CloseReason, Error, ErrorKind, Result};
use crate::message::Message;

/// Connection lifecycle state; only ever moves forward
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConnectionState {
    /// Handshake not finished yet
    Connecting,
    /// Frames flow in both directions
    Open,
    /// A close frame was sent or received
    Closing,
    /// Close handshake done, timed out, or the socket went away
    Closed,
}

/// Something the application should know about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Handshake succeeded, the connection is open
    Open,
    /// A complete data message
    Message(Message),
    /// Ping received (the pong is already queued)
    Ping(Bytes),
    /// Pong received
    Pong(Bytes),
    /// Close received from the peer, or the socket went away without one
    Close(Option<CloseReason>),
    /// The connection failed
    Error(ErrorKind),
}

/// Sans-IO WebSocket connection (server role)
pub struct Connection {
    state: ConnectionState,
    cursor: ByteCursor,
    decoder: FrameDecoder,
    encoder: FrameEncoder,
    /// Encoded frames not yet handed to the transport
    outbound: BytesMut,
    events: VecDeque<Event>,
    close_sent: bool,
    close_received: bool,
    /// Socket should be ended once `outbound` is drained
    end_requested: bool,
    /// Waiting for the peer to acknowledge our close
    close_timer_armed: bool,
    paused: bool,
}

impl Connection {
    /// Create a connection in the `Connecting` state
    pub fn new(config: &Config) -> Self {
        Self {
            state: ConnectionState::Connecting,
            cursor: ByteCursor::new(),
            decoder: FrameDecoder::new(config.max_frame_size, config.max_message_size),
            encoder: FrameEncoder::new(),
            outbound: BytesMut::with_capacity(config.write_buffer_size),
            events: VecDeque::new(),
            close_sent: false,
            close_received: false,
            end_requested: false,
            close_timer_armed: false,
            paused: false,
        }
    }

    /// Current state
    #[inline]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Check if the connection reached `Closed`
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.state == ConnectionState::Closed
    }

    /// Received bytes not decoded yet
    #[inline]
    pub fn buffered_bytes(&self) -> usize {
        self.cursor.available_bytes()
    }

    /// Encoded bytes not handed to the transport yet
    #[inline]
    pub fn outbound_len(&self) -> usize {
        self.outbound.len()
    }

    /// Events not drained yet
    #[inline]
    pub fn pending_events(&self) -> usize {
        self.events.len()
    }

    fn set_state(&mut self, next: ConnectionState) {
        debug_assert!(next >= self.state, "state regressed");
        if next > self.state {
            debug!(from = ?self.state, to = ?next, "connection state");
            self.state = next;
        }
    }

    /// Mark the handshake as complete
    pub fn open(&mut self) -> Result<()> {
        if self.state != ConnectionState::Connecting {
            return Err(Error::InvalidState("connection already opened"));
        }
        self.set_state(ConnectionState::Open);
        self.events.push_back(Event::Open);
        Ok(())
    }

    /// Feed bytes received from the socket
    ///
    /// Every frame that can be decoded from the buffered bytes is processed
    /// before this returns, unless the connection is paused. Protocol errors
    /// do not surface here: they become an error event, a close frame and a
    /// request to end the socket.
    pub fn receive(&mut self, chunk: impl Into<Bytes>) -> Result<()> {
        match self.state {
            ConnectionState::Connecting => {
                return Err(Error::InvalidState("data before handshake completed"));
            }
            ConnectionState::Closed => return Ok(()),
            _ => {}
        }

        self.cursor.append(chunk);
        if !self.paused {
            self.process();
        }
        Ok(())
    }

    /// Stop decoding; received bytes keep accumulating
    pub fn pause(&mut self) {
        self.paused = true;
    }

    /// Decode everything buffered while paused
    pub fn resume(&mut self) {
        if self.paused {
            self.paused = false;
            self.process();
        }
    }

    /// Check if decoding is paused
    #[inline]
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    fn process(&mut self) {
        while matches!(self.state, ConnectionState::Open | ConnectionState::Closing)
            && !self.decoder.is_failed()
        {
            match self.decoder.decode(&mut self.cursor) {
                Ok(Some(decoded)) => self.handle(decoded),
                Ok(None) => break,
                Err(e) => {
                    self.fail(e);
                    break;
                }
            }
        }
    }

    fn handle(&mut self, decoded: Decoded) {
        match decoded {
            Decoded::Close(reason) => self.handle_close(reason),
            other if self.state != ConnectionState::Open => {
                trace!(decoded = ?other, "discarding frame while closing");
            }
            Decoded::Message(msg) => self.events.push_back(Event::Message(msg)),
            Decoded::Ping(payload) => {
                self.encoder.pong(&mut self.outbound, &payload);
                self.events.push_back(Event::Ping(payload));
            }
            Decoded::Pong(payload) => self.events.push_back(Event::Pong(payload)),
        }
    }

    fn handle_close(&mut self, reason: Option<CloseReason>) {
        if self.close_received {
            return;
        }
        self.close_received = true;
        debug!(?reason, initiated_locally = self.close_sent, "close received");

        if !self.close_sent {
            // Peer initiated: echo the status code back
            let echo = reason.as_ref().map(|r| (r.code, ""));
            self.encoder.close(&mut self.outbound, echo);
            self.close_sent = true;
        }

        self.events.push_back(Event::Close(reason));
        self.close_timer_armed = false;
        self.end_requested = true;
        self.set_state(ConnectionState::Closing);
        self.maybe_finish();
    }

    /// Turn a decode error into a close frame and a socket end
    fn fail(&mut self, err: Error) {
        warn!(error = %err, "closing connection after protocol error");
        self.events.push_back(Event::Error(err.kind()));

        if !self.close_sent {
            let code = err.close_code().unwrap_or(CloseReason::PROTOCOL_ERROR);
            self.encoder.close(&mut self.outbound, Some((code, "")));
            self.close_sent = true;
        }

        self.close_timer_armed = false;
        self.end_requested = true;
        self.set_state(ConnectionState::Closing);
        self.maybe_finish();
    }

    fn maybe_finish(&mut self) {
        if self.end_requested && self.outbound.is_empty() {
            self.enter_closed();
        }
    }

    fn enter_closed(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }
        self.set_state(ConnectionState::Closed);
        self.end_requested = true;
        self.close_timer_armed = false;
        // Release the read side
        self.cursor = ByteCursor::new();
        self.decoder.release();
    }

    fn ensure_open(&self) -> Result<()> {
        match self.state {
            ConnectionState::Open => Ok(()),
            ConnectionState::Connecting => Err(Error::InvalidState("connection not open")),
            ConnectionState::Closing | ConnectionState::Closed => Err(Error::ConnectionClosed),
        }
    }

    /// Queue a message as a single frame
    pub fn send(&mut self, msg: &Message) -> Result<()> {
        self.ensure_open()?;
        self.encoder.message(&mut self.outbound, msg);
        Ok(())
    }

    /// Queue a message split into frames of at most `chunk_size` bytes
    pub fn send_fragmented(&mut self, msg: &Message, chunk_size: usize) -> Result<()> {
        self.ensure_open()?;
        self.encoder.fragmented(&mut self.outbound, msg, chunk_size);
        Ok(())
    }

    /// Queue a ping
    pub fn ping(&mut self, payload: &[u8]) -> Result<()> {
        self.ensure_open()?;
        self.encoder.ping(&mut self.outbound, payload);
        Ok(())
    }

    /// Start the closing handshake
    ///
    /// The close frame is queued and the caller should arm the close timer
    /// (see [`Connection::close_timer_armed`]). Closing twice is a no-op.
    pub fn close(&mut self, code: u16, reason: &str) -> Result<()> {
        match self.state {
            ConnectionState::Open => {}
            ConnectionState::Connecting => {
                return Err(Error::InvalidState("connection not open"));
            }
            ConnectionState::Closing | ConnectionState::Closed => return Ok(()),
        }

        debug!(code, reason, "closing connection");
        self.encoder.close(&mut self.outbound, Some((code, reason)));
        self.close_sent = true;
        self.close_timer_armed = true;
        self.set_state(ConnectionState::Closing);
        Ok(())
    }

    /// Check if a close we sent is waiting for the peer's acknowledgment
    #[inline]
    pub fn close_timer_armed(&self) -> bool {
        self.close_timer_armed
    }

    /// The close acknowledgment did not arrive in time
    pub fn on_close_timeout(&mut self) {
        if !self.close_timer_armed || self.state != ConnectionState::Closing {
            return;
        }
        warn!("close handshake timed out");
        self.events.push_back(Event::Error(ErrorKind::CloseTimeout));
        self.enter_closed();
    }

    /// The peer ended the socket
    pub fn on_transport_end(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }
        if !self.close_received && self.state != ConnectionState::Connecting {
            self.events
                .push_back(Event::Close(Some(CloseReason::new(CloseReason::ABNORMAL, ""))));
        }
        self.enter_closed();
    }

    /// The socket failed
    pub fn on_transport_error(&mut self, err: &io::Error) {
        if self.state == ConnectionState::Closed {
            return;
        }
        warn!(error = %err, "transport error");
        self.events.push_back(Event::Error(ErrorKind::Transport));
        self.enter_closed();
    }

    /// Take the bytes that should be written to the socket next
    pub fn poll_transmit(&mut self) -> Option<Bytes> {
        if self.outbound.is_empty() {
            return None;
        }
        let out = self.outbound.split().freeze();
        self.maybe_finish();
        Some(out)
    }

    /// Take the next application event
    pub fn poll_event(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    /// Check if the socket should be ended now
    ///
    /// True once ending was requested and all outbound bytes were taken.
    #[inline]
    pub fn wants_end(&self) -> bool {
        self.end_requested && self.outbound.is_empty()
    }
}
