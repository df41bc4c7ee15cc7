/// Errors that can occur when deserializing a frame.
#[derive(Debug, thiserror::Error)]
pub enum DeserializeError {
    /// The frame is not complete yet. The buffer is retained and you will be
    /// called again once more bytes have arrived.
    #[error("Need more bytes to decode the next frame")]
    IncompleteBuffer {
        /// How many bytes the whole frame needs, counted from the start of the
        /// buffer you were offered. Frames longer than the connection's maximum
        /// buffer length close the connection.
        next_message_size: usize,
    },
    /// The stream is broken. The connection is closed.
    #[error("Bad buffer")]
    InvalidBuffer,
    /// The frame is well-formed but should not be delivered.
    #[error("Skip message")]
    SkipMessage {
        /// How many bytes to skip. You may be called again with the same frame
        /// if not all of it has been read yet.
        distance: usize,
    },
}
