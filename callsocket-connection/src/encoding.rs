use crate::DeserializeError;

/// A codec combines an encoder and decoder for one connection.
///
/// You can make a codec via a tuple of `(Encoder, Decoder)` or
/// by implementing one yourself.
///
/// ## Buffer lifecycles
/// `Decoder::decode()` produces a message from inbound bytes. `Encoder::encode()`
/// produces outbound bytes from a logical message. After the encoded bytes are
/// written, `Encoder::return_buffer()` is called with the serialized buffer so you
/// can reuse or drop it.
///
/// The encoder's encode->return_buffer cycle is independent of the decoder. Pooling
/// outbound buffers is easy: wrap a `Serialize` in a `PooledEncoder`.
pub trait Codec: Encoder + Decoder {}

impl<E, D> Codec for (E, D)
where
    E: Encoder,
    D: Decoder,
{
}
impl<E, D> Encoder for (E, D)
where
    E: Encoder,
    D: Decoder,
{
    type Message = E::Message;
    type Serialized = E::Serialized;
    fn encode(&mut self, message: Self::Message) -> Self::Serialized {
        self.0.encode(message)
    }

    fn return_buffer(&mut self, buffer: Self::Serialized) {
        self.0.return_buffer(buffer);
    }
}
impl<E, D> Decoder for (E, D)
where
    E: Encoder,
    D: Decoder,
{
    type Message = D::Message;
    fn decode(
        &mut self,
        buffer: impl bytes::Buf,
    ) -> std::result::Result<(usize, Self::Message), DeserializeError> {
        self.1.decode(buffer)
    }
}

/// An encoder takes messages and produces outbound frames.
pub trait Encoder {
    /// The message type consumed by this encoder.
    type Message;

    /// The frame type this encoder produces. One serialized value is one frame:
    /// it is written to the stream completely before the next one starts.
    ///
    /// If you want to write to raw vectors, consider wrapping your serializer
    /// with [crate::PooledEncoder] and using that instead.
    type Serialized: bytes::Buf + Send + 'static;

    /// Encode a message into a frame.
    fn encode(&mut self, message: Self::Message) -> Self::Serialized;

    /// Buffers are sent back to the encoder once the frame is written.
    /// You can reset and reuse your buffer, if appropriate.
    fn return_buffer(&mut self, _buffer: Self::Serialized) {
        // drop by default
    }
}

/// A decoder takes inbound bytes and produces messages.
pub trait Decoder {
    /// The message type produced by this decoder.
    type Message;

    /// Decode one frame from the front of the buffer, or tell why you can't.
    ///
    /// Return the number of bytes the frame occupied. You must not consume more
    /// bytes than the frame you decode.
    fn decode(
        &mut self,
        buffer: impl bytes::Buf,
    ) -> std::result::Result<(usize, Self::Message), DeserializeError>;
}
