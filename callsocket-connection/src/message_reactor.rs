/// A message reactor is a stateful object that processes inbound messages.
/// You receive &mut self, and you receive your messages by value.
///
/// A message reactor may be a server which defers a task per message, or a client which
/// matches response correlation ids to a table of pending calls.
///
/// Your message reactor and your connection share their fate - when one drops or
/// disconnects, the other does too.
pub trait MessageReactor: Send + 'static {
    /// Messages inbound from the remote.
    type Inbound;
    /// Messages outbound to a remote.
    type Outbound;
    /// Messages in-memory, delivered to the reactor before serialization.
    type LogicalOutbound;

    /// Called from the connection's driver task when messages are received.
    ///
    /// You must take the message quickly: Blocking here will block every other
    /// call sharing the connection.
    fn on_inbound_message(&mut self, message: Self::Inbound) -> ReactorStatus;

    /// Called from the connection's driver task before a message is encoded.
    ///
    /// You can use this to track outbound messages, or for logging.
    fn on_outbound_message(&mut self, message: Self::LogicalOutbound) -> Self::Outbound;
}

/// What the connection should do after processing an inbound message.
#[derive(Debug, PartialEq, Eq)]
pub enum ReactorStatus {
    /// Continue processing messages.
    Continue,
    /// Disconnect the connection.
    Disconnect,
}
