use std::marker::PhantomData;

use crate::PREFIX_LENGTH;

/// A serializer that takes a serde serializable T and implements
/// `callsocket::Serialize`. Wrap it in a `callsocket::PooledEncoder` to
/// use it with a Connection.
#[derive(Debug)]
pub struct MessagePackSerializer<T> {
    _phantom: PhantomData<T>,
}

impl<T> Default for MessagePackSerializer<T> {
    fn default() -> Self {
        Self {
            _phantom: PhantomData,
        }
    }
}

impl<T> callsocket::Serialize for MessagePackSerializer<T>
where
    T: serde::Serialize + std::fmt::Debug,
{
    type Message = T;

    fn serialize_into_buffer(&mut self, message: Self::Message, buffer: &mut Vec<u8>) {
        log::trace!("encoding {message:?}");
        // reserve length prefix
        buffer.extend_from_slice(&[0; PREFIX_LENGTH]);
        if let Err(e) = rmp_serde::encode::write_named(buffer, &message) {
            log::error!("unable to encode {message:?}: {e:?}");
            buffer.clear();
            return;
        }
        let Ok(length) = u32::try_from(buffer.len() - PREFIX_LENGTH) else {
            log::error!("message is too long to frame: {}b", buffer.len());
            buffer.clear();
            return;
        };
        let mut prefix = &mut buffer[..PREFIX_LENGTH];
        if let Err(e) = rmp::encode::write_u32(&mut prefix, length) {
            log::error!("unable to write frame length: {e:?}");
            buffer.clear();
        }
    }
}
