use std::marker::PhantomData;

use bytes::Buf;
use callsocket::DeserializeError;

use crate::PREFIX_LENGTH;

/// A decoder that takes a serde deserializable T and implements
/// `callsocket::Decoder`. You can use this with a `callsocket`
/// Connection or rpc.
#[derive(Debug)]
pub struct MessagePackDecoder<T> {
    _phantom: PhantomData<T>,
}

impl<T> Default for MessagePackDecoder<T> {
    fn default() -> Self {
        Self {
            _phantom: PhantomData,
        }
    }
}

impl<T> callsocket::Decoder for MessagePackDecoder<T>
where
    T: serde::de::DeserializeOwned + std::fmt::Debug,
{
    type Message = T;

    fn decode(
        &mut self,
        mut buffer: impl bytes::Buf,
    ) -> std::result::Result<(usize, Self::Message), DeserializeError> {
        if buffer.remaining() < PREFIX_LENGTH {
            return Err(DeserializeError::IncompleteBuffer {
                next_message_size: PREFIX_LENGTH,
            });
        }
        let mut prefix = [0; PREFIX_LENGTH];
        buffer.copy_to_slice(&mut prefix);
        let length = match rmp::decode::read_u32(&mut prefix.as_slice()) {
            Ok(length) => length as usize,
            Err(e) => {
                log::error!("decode length error: {e:?}");
                return Err(DeserializeError::InvalidBuffer);
            }
        };
        let frame_length = PREFIX_LENGTH + length;
        if buffer.remaining() < length {
            return Err(DeserializeError::IncompleteBuffer {
                next_message_size: frame_length,
            });
        }

        // the length prefix was good, so the stream stays in sync past a bad body
        rmp_serde::decode::from_read(buffer.take(length).reader())
            .map_err(|e| {
                log::error!("skipping undecodable frame of length {length}: {e:?}");
                DeserializeError::SkipMessage {
                    distance: frame_length,
                }
            })
            .map(|message| {
                log::trace!("decoded {frame_length}b: {message:?}");
                (frame_length, message)
            })
    }
}

#[cfg(test)]
mod test {
    use callsocket::{Decoder, DeserializeError, Encoder, PooledEncoder};

    use crate::{MessagePackDecoder, MessagePackSerializer};

    fn frame(message: &str) -> Vec<u8> {
        let mut encoder = PooledEncoder::new(MessagePackSerializer::<String>::default());
        encoder.encode(message.to_string()).to_vec()
    }

    #[test]
    fn partial_frames_ask_for_the_whole_frame() {
        let frame = frame("hello there");
        let mut decoder = MessagePackDecoder::<String>::default();

        match decoder.decode(&frame[..3]) {
            Err(DeserializeError::IncompleteBuffer { next_message_size }) => {
                assert_eq!(5, next_message_size, "first the prefix is needed")
            }
            other => panic!("expected incomplete buffer, got {other:?}"),
        }
        match decoder.decode(&frame[..frame.len() - 1]) {
            Err(DeserializeError::IncompleteBuffer { next_message_size }) => {
                assert_eq!(frame.len(), next_message_size, "then the whole frame")
            }
            other => panic!("expected incomplete buffer, got {other:?}"),
        }
    }

    #[test]
    fn back_to_back_frames_decode_one_at_a_time() {
        let mut stream = frame("first");
        let first_length = stream.len();
        stream.extend(frame("second"));
        let mut decoder = MessagePackDecoder::<String>::default();

        let (consumed, first) = decoder.decode(&stream[..]).expect("first frame");
        assert_eq!(first_length, consumed);
        assert_eq!("first", first);
        let (_, second) = decoder
            .decode(&stream[consumed..])
            .expect("second frame");
        assert_eq!("second", second);
    }

    #[test]
    fn a_bad_prefix_is_invalid() {
        let mut decoder = MessagePackDecoder::<String>::default();
        assert!(matches!(
            decoder.decode(&[0xc0, 1, 2, 3, 4, 5][..]),
            Err(DeserializeError::InvalidBuffer)
        ));
    }

    #[test]
    fn a_mistyped_body_is_skipped_whole() {
        let mut stream = frame("not a number");
        let skipped_length = stream.len();
        stream.extend(frame("also not a number"));
        let mut decoder = MessagePackDecoder::<u64>::default();

        match decoder.decode(&stream[..]) {
            Err(DeserializeError::SkipMessage { distance }) => {
                assert_eq!(skipped_length, distance, "exactly the bad frame")
            }
            other => panic!("expected a skipped frame, got {other:?}"),
        }
    }
}
