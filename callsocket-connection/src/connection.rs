use std::{
    collections::VecDeque,
    future::Future,
    net::SocketAddr,
    pin::Pin,
    task::{Context, Poll},
};

use bytes::Buf;
use tokio::{
    io::{AsyncRead, AsyncWrite, ReadBuf},
    sync::mpsc,
};

use crate::{
    interrupted, Codec, Decoder, DeserializeError, Encoder, MessageReactor, ReactorStatus,
};

/// A framed, multiplexed connection. Spawn it: it is the task that drives serialization,
/// deserialization and network readiness for one stream.
///
/// Outbound messages arrive on an unbounded channel. Each is given to the reactor, encoded
/// into one frame, and queued. Frames are written whole and in order. Inbound bytes are
/// buffered until the codec can decode a complete frame, and every decoded message is
/// handed to the reactor.
///
/// The connection ends when the peer closes, on any stream error, on an undecodable or
/// oversized frame, when the reactor asks to disconnect, or when every outbound sender
/// has been dropped and the queued frames are written.
pub struct Connection<TStream, TCodec, TReactor>
where
    TStream: AsyncRead + AsyncWrite + Unpin,
    TCodec: Codec,
    TReactor: MessageReactor<
        Inbound = <TCodec as Decoder>::Message,
        Outbound = <TCodec as Encoder>::Message,
    >,
{
    stream: TStream,
    address: SocketAddr,
    codec: TCodec,
    reactor: TReactor,
    outbound_messages: mpsc::UnboundedReceiver<TReactor::LogicalOutbound>,
    outbound_closed: bool,
    send_queue: VecDeque<<TCodec as Encoder>::Serialized>,
    needs_flush: bool,
    receive_buffer: Vec<u8>,
    receive_buffer_start_offset: usize,
    receive_buffer_slice_end: usize,
    max_buffer_length: usize,
    buffer_allocation_increment: usize,
    max_queued_outbound_messages: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SerializeStatus {
    Pending,
    QueueFull,
    Closed,
}

impl<TStream, TCodec, TReactor> std::fmt::Display for Connection<TStream, TCodec, TReactor>
where
    TStream: AsyncRead + AsyncWrite + Unpin,
    TCodec: Codec,
    TReactor: MessageReactor<
        Inbound = <TCodec as Decoder>::Message,
        Outbound = <TCodec as Encoder>::Message,
    >,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let read_start = self.receive_buffer_start_offset;
        let read_end = self.receive_buffer_slice_end;
        let read_capacity = self.receive_buffer.len();
        let write_queue = self.send_queue.len();
        let write_length: usize = self.send_queue.iter().map(|b| b.remaining()).sum();
        write!(f, "Connection {}: {{read{{start: {read_start}, end: {read_end}, capacity: {read_capacity}}}, write{{queue: {write_queue}, length: {write_length}}}}}", self.address)
    }
}

impl<TStream, TCodec, TReactor> Connection<TStream, TCodec, TReactor>
where
    TStream: AsyncRead + AsyncWrite + Unpin,
    TCodec: Codec,
    TReactor: MessageReactor<
        Inbound = <TCodec as Decoder>::Message,
        Outbound = <TCodec as Encoder>::Message,
    >,
{
    /// Create a new connection around a stream.
    ///
    /// `max_buffer_length` caps the receive buffer, and so the largest inbound frame.
    /// The receive buffer grows in steps of `buffer_allocation_increment`.
    /// At most `max_queued_outbound_messages` encoded frames wait for the stream; beyond
    /// that, messages stay in the outbound channel.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        stream: TStream,
        address: SocketAddr,
        codec: TCodec,
        max_buffer_length: usize,
        buffer_allocation_increment: usize,
        max_queued_outbound_messages: usize,
        outbound_messages: mpsc::UnboundedReceiver<TReactor::LogicalOutbound>,
        reactor: TReactor,
    ) -> Self {
        log::info!("new connection {address}");
        Self {
            stream,
            address,
            codec,
            reactor,
            outbound_messages,
            outbound_closed: false,
            send_queue: Default::default(),
            needs_flush: false,
            receive_buffer: Vec::new(),
            receive_buffer_start_offset: 0,
            receive_buffer_slice_end: 0,
            max_buffer_length: max_buffer_length.max(1),
            buffer_allocation_increment: buffer_allocation_increment.max(1),
            max_queued_outbound_messages: max_queued_outbound_messages.max(1),
        }
    }

    /// The remote address of this connection.
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Serialize outbound messages into the send queue until the channel is pending
    /// or the queue is full.
    fn poll_serialize_outbound(&mut self, context: &mut Context<'_>) -> SerializeStatus {
        if self.outbound_closed {
            return SerializeStatus::Closed;
        }
        while self.send_queue.len() < self.max_queued_outbound_messages {
            match self.outbound_messages.poll_recv(context) {
                Poll::Ready(Some(message)) => {
                    let message = self.reactor.on_outbound_message(message);
                    let frame = self.codec.encode(message);
                    if !frame.has_remaining() {
                        log::warn!("{} dropping empty outbound frame", self.address);
                        self.codec.return_buffer(frame);
                        continue;
                    }
                    log::trace!(
                        "{} enqueueing outbound frame: {}b",
                        self.address,
                        frame.remaining()
                    );
                    self.send_queue.push_back(frame);
                }
                Poll::Ready(None) => {
                    log::debug!("{} outbound channel closed", self.address);
                    self.outbound_closed = true;
                    return SerializeStatus::Closed;
                }
                Poll::Pending => return SerializeStatus::Pending,
            }
        }
        log::debug!("send queue is full: {self}");
        SerializeStatus::QueueFull
    }

    /// Write queued frames to the stream, whole and in order.
    ///
    /// Ok(true) when the stream is closed for writing.
    fn poll_write_buffers(&mut self, context: &mut Context<'_>) -> std::io::Result<bool> {
        while let Some(front) = self.send_queue.front_mut() {
            if !front.has_remaining() {
                if let Some(written) = self.send_queue.pop_front() {
                    self.codec.return_buffer(written);
                }
                continue;
            }
            match Pin::new(&mut self.stream).poll_write(context, front.chunk()) {
                Poll::Ready(Ok(0)) => {
                    log::info!("{} write stream was closed", self.address);
                    return Ok(true);
                }
                Poll::Ready(Ok(written)) => {
                    front.advance(written);
                    self.needs_flush = true;
                }
                Poll::Ready(Err(e)) if interrupted(&e) => {
                    log::trace!("{} write interrupted - trying again", self.address);
                }
                Poll::Ready(Err(e)) => return Err(e),
                Poll::Pending => return Ok(false),
            }
        }
        if self.needs_flush {
            match Pin::new(&mut self.stream).poll_flush(context) {
                Poll::Ready(Ok(())) => self.needs_flush = false,
                Poll::Ready(Err(e)) => return Err(e),
                Poll::Pending => (),
            }
        }
        Ok(false)
    }

    /// Read from the stream until it is pending, dispatching every complete frame.
    ///
    /// Ok(true) when the remote end closed the connection or the reactor disconnected.
    fn poll_read_inbound(&mut self, context: &mut Context<'_>) -> std::io::Result<bool> {
        loop {
            if self.receive_buffer_slice_end == self.receive_buffer.len()
                && !self.make_room_to_read()
            {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!(
                        "inbound frame does not fit in the max buffer length of {}b",
                        self.max_buffer_length
                    ),
                ));
            }
            let mut read_buffer =
                ReadBuf::new(&mut self.receive_buffer[self.receive_buffer_slice_end..]);
            match Pin::new(&mut self.stream).poll_read(context, &mut read_buffer) {
                Poll::Ready(Ok(())) => {
                    let bytes_read = read_buffer.filled().len();
                    if bytes_read == 0 {
                        log::info!(
                            "{} connection was shut down as recv returned 0",
                            self.address
                        );
                        return Ok(true);
                    }
                    self.receive_buffer_slice_end += bytes_read;
                    if self.dispatch_messages_from_read_queue()? {
                        return Ok(true);
                    }
                }
                Poll::Ready(Err(e)) if interrupted(&e) => {
                    log::trace!("{} read interrupted - trying again", self.address);
                }
                Poll::Ready(Err(e)) => return Err(e),
                Poll::Pending => return Ok(false),
            }
        }
    }

    /// Compact the unread bytes to the front, or grow the buffer. False when neither is possible.
    fn make_room_to_read(&mut self) -> bool {
        if 0 < self.receive_buffer_start_offset {
            let length = self.receive_buffer_slice_end - self.receive_buffer_start_offset;
            log::debug!(
                "{} rotating {length}b of buffer to make room for the rest of a frame",
                self.address
            );
            self.receive_buffer.copy_within(
                self.receive_buffer_start_offset..self.receive_buffer_slice_end,
                0,
            );
            self.receive_buffer_start_offset = 0;
            self.receive_buffer_slice_end = length;
            return true;
        }
        if self.receive_buffer.len() < self.max_buffer_length {
            let new_length = (self.receive_buffer.len() + self.buffer_allocation_increment)
                .min(self.max_buffer_length);
            log::trace!("{} growing receive buffer to {new_length}b", self.address);
            self.receive_buffer.resize(new_length, 0);
            return true;
        }
        false
    }

    /// Ok(true) when the reactor asked to disconnect.
    fn dispatch_messages_from_read_queue(&mut self) -> std::io::Result<bool> {
        while self.receive_buffer_start_offset < self.receive_buffer_slice_end {
            let buffer =
                &self.receive_buffer[self.receive_buffer_start_offset..self.receive_buffer_slice_end];
            match self.codec.decode(buffer) {
                Ok((0, _)) => {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        "decoder consumed no bytes",
                    ));
                }
                Ok((length, message)) => {
                    self.receive_buffer_start_offset += length;
                    if self.reactor.on_inbound_message(message) == ReactorStatus::Disconnect {
                        log::debug!("{} reactor requested disconnect", self.address);
                        return Ok(true);
                    }
                }
                Err(DeserializeError::IncompleteBuffer { next_message_size }) => {
                    if self.max_buffer_length < next_message_size {
                        return Err(std::io::Error::new(
                            std::io::ErrorKind::InvalidData,
                            format!(
                                "tried to receive a frame that is too long - max: {}b, requested: {next_message_size}b",
                                self.max_buffer_length
                            ),
                        ));
                    }
                    log::trace!(
                        "{} waiting for the rest of a frame of length {next_message_size}",
                        self.address
                    );
                    break;
                }
                Err(DeserializeError::InvalidBuffer) => {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        "frame was invalid - broken stream",
                    ));
                }
                Err(DeserializeError::SkipMessage { distance }) => {
                    if self.receive_buffer_slice_end - self.receive_buffer_start_offset < distance {
                        log::trace!("{} cannot skip yet, need to read more", self.address);
                        break;
                    }
                    log::debug!("{} skipping frame of length {distance}", self.address);
                    self.receive_buffer_start_offset += distance;
                }
            }
        }
        if self.receive_buffer_start_offset == self.receive_buffer_slice_end {
            self.receive_buffer_start_offset = 0;
            self.receive_buffer_slice_end = 0;
        }
        Ok(false)
    }
}

impl<TStream, TCodec, TReactor> Drop for Connection<TStream, TCodec, TReactor>
where
    TStream: AsyncRead + AsyncWrite + Unpin,
    TCodec: Codec,
    TReactor: MessageReactor<
        Inbound = <TCodec as Decoder>::Message,
        Outbound = <TCodec as Encoder>::Message,
    >,
{
    fn drop(&mut self) {
        log::debug!("{} connection dropped", self.address)
    }
}

/// safety: no unsafe code in here, and nothing is structurally pinned
impl<TStream, TCodec, TReactor> Unpin for Connection<TStream, TCodec, TReactor>
where
    TStream: AsyncRead + AsyncWrite + Unpin,
    TCodec: Codec,
    TReactor: MessageReactor<
        Inbound = <TCodec as Decoder>::Message,
        Outbound = <TCodec as Encoder>::Message,
    >,
{
}

impl<TStream, TCodec, TReactor> Future for Connection<TStream, TCodec, TReactor>
where
    TStream: AsyncRead + AsyncWrite + Unpin,
    TCodec: Codec,
    TReactor: MessageReactor<
        Inbound = <TCodec as Decoder>::Message,
        Outbound = <TCodec as Encoder>::Message,
    >,
{
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, context: &mut Context<'_>) -> Poll<Self::Output> {
        let connection = &mut *self;
        loop {
            let serialize_status = connection.poll_serialize_outbound(context);
            match connection.poll_write_buffers(context) {
                Ok(false) => (),
                Ok(true) => return Poll::Ready(()),
                Err(e) => {
                    log::warn!("{} dropping connection: write failed {e:?}", connection.address);
                    return Poll::Ready(());
                }
            }
            match serialize_status {
                SerializeStatus::QueueFull
                    if connection.send_queue.len() < connection.max_queued_outbound_messages =>
                {
                    // the writer made room, so there may be more to serialize
                    continue;
                }
                SerializeStatus::Closed
                    if connection.send_queue.is_empty() && !connection.needs_flush =>
                {
                    log::debug!("{} outbound drained after close", connection.address);
                    return Poll::Ready(());
                }
                _ => break,
            }
        }

        match connection.poll_read_inbound(context) {
            Ok(false) => Poll::Pending,
            Ok(true) => Poll::Ready(()),
            Err(e) => {
                log::warn!("{} dropping connection after read: {e:?}", connection.address);
                Poll::Ready(())
            }
        }
    }
}
