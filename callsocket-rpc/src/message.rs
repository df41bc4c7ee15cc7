use rmpv::Value;

use crate::Fault;

/// A call, as it crosses the wire.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Request {
    /// The `handler.method` to invoke.
    pub call: String,
    /// Positional arguments.
    pub args: Vec<Value>,
    /// The shared secret, when the client has one.
    pub token: Option<String>,
    /// Correlation id, unique among this connection's pending calls.
    pub cb_id: String,
}

/// The reply to a call, echoing the call's correlation id.
///
/// `obj` is either the returned value or an [`ExceptionEnvelope`] map.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Response {
    /// The result, or a marshaled fault.
    pub obj: Value,
    /// The correlation id of the request this answers.
    pub cb_id: String,
}

impl Response {
    /// Build the reply for `cb_id`, marshaling a fault if there is one.
    pub fn reply(cb_id: String, result: Result<Value, Fault>) -> Self {
        let obj = match result {
            Ok(value) => value,
            Err(fault) => fault.to_envelope().into_value(),
        };
        Self { obj, cb_id }
    }

    /// Split into the correlation id and the call's outcome, reconstructing a fault when
    /// `obj` is an exception envelope.
    pub fn into_reply(self) -> (String, Result<Value, Fault>) {
        let result = match ExceptionEnvelope::from_value(&self.obj) {
            Some(envelope) => Err(Fault::from_envelope(envelope)),
            None => Ok(self.obj),
        };
        (self.cb_id, result)
    }
}

/// The wire form of a fault.
///
/// A payload is an exception envelope only if it is a map carrying all three keys with the
/// right types. Anything else is a plain value.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ExceptionEnvelope {
    /// The fault message.
    pub exception: String,
    /// The origin trace.
    pub backtrace: Vec<String>,
    /// The fault kind's wire key.
    #[serde(rename = "type")]
    pub r#type: String,
}

impl ExceptionEnvelope {
    /// Encode as a `{exception, backtrace, type}` map.
    pub fn into_value(self) -> Value {
        Value::Map(vec![
            (Value::from("exception"), Value::from(self.exception)),
            (
                Value::from("backtrace"),
                Value::Array(self.backtrace.into_iter().map(Value::from).collect()),
            ),
            (Value::from("type"), Value::from(self.r#type)),
        ])
    }

    /// Recognize an exception envelope.
    pub fn from_value(value: &Value) -> Option<Self> {
        let Value::Map(entries) = value else {
            return None;
        };
        let field = |name: &str| {
            entries
                .iter()
                .find(|(key, _)| key.as_str() == Some(name))
                .map(|(_, value)| value)
        };
        let exception = field("exception")?.as_str()?.to_string();
        let r#type = field("type")?.as_str()?.to_string();
        let backtrace = field("backtrace")?
            .as_array()?
            .iter()
            .map(|line| line.as_str().map(str::to_string))
            .collect::<Option<Vec<_>>>()?;
        Some(Self {
            exception,
            backtrace,
            r#type,
        })
    }
}

/// An inbound envelope that may not have the expected shape.
///
/// A frame that is valid MessagePack but not a well-formed envelope is kept as `Malformed`,
/// with its correlation id when one can be read, so a reactor can answer or fail that one call
/// instead of dropping the connection.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded<T> {
    /// A well-formed envelope.
    Valid(T),
    /// A value that is not an envelope.
    Malformed {
        /// The `cb_id` string, if the value is a map carrying one.
        cb_id: Option<String>,
        /// Why the value did not convert.
        error: String,
    },
}

impl<T: serde::de::DeserializeOwned> Decoded<T> {
    /// Convert a decoded value into an envelope.
    pub fn from_value(value: Value) -> Self {
        let cb_id = match &value {
            Value::Map(entries) => entries
                .iter()
                .find(|(key, _)| key.as_str() == Some("cb_id"))
                .and_then(|(_, cb_id)| cb_id.as_str())
                .map(str::to_string),
            _ => None,
        };
        match rmpv::ext::from_value(value) {
            Ok(envelope) => Self::Valid(envelope),
            Err(e) => Self::Malformed {
                cb_id,
                error: e.to_string(),
            },
        }
    }
}

impl<'de, T: serde::de::DeserializeOwned> serde::Deserialize<'de> for Decoded<T> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        Value::deserialize(deserializer).map(Self::from_value)
    }
}

#[cfg(test)]
mod test {
    use callsocket::{Decoder, Encoder};
    use callsocket_messagepack::MessagePackCodec;
    use rmpv::Value;

    use super::{Decoded, ExceptionEnvelope, Request, Response};
    use crate::{Fault, FaultKind};

    #[test]
    fn requests_cross_the_wire_intact() {
        let request = Request {
            call: "bench.foo".to_string(),
            args: vec![
                Value::from(1),
                Value::from("two"),
                Value::Array(vec![Value::Nil, Value::from(3.5)]),
            ],
            token: Some("secret".to_string()),
            cb_id: "17".to_string(),
        };

        let mut codec = MessagePackCodec::<Request, Request>::default();
        let frame = codec.encode(request.clone());
        let (consumed, decoded) = codec.decode(&frame[..]).expect("decodes");
        assert_eq!(frame.len(), consumed);
        assert_eq!(request, decoded);
    }

    #[test]
    fn faults_cross_the_wire_inside_responses() {
        let fault = Fault::remote_exception("boom").with_trace("bench.explode");
        let response = Response::reply("3".to_string(), Err(fault.clone()));

        let mut codec = MessagePackCodec::<Response, Response>::default();
        let frame = codec.encode(response);
        let (_, decoded) = codec.decode(&frame[..]).expect("decodes");

        let (cb_id, result) = decoded.into_reply();
        assert_eq!("3", cb_id);
        assert_eq!(Err(fault), result);
    }

    #[test]
    fn only_complete_envelopes_are_faults() {
        let partial = Value::Map(vec![
            (Value::from("exception"), Value::from("not really")),
            (Value::from("type"), Value::from("RemoteException")),
        ]);
        assert_eq!(None, ExceptionEnvelope::from_value(&partial));

        let response = Response {
            obj: partial.clone(),
            cb_id: "1".to_string(),
        };
        assert_eq!(Ok(partial), response.into_reply().1);
    }

    #[test]
    fn mistyped_envelopes_are_plain_values() {
        let mistyped = Value::Map(vec![
            (Value::from("exception"), Value::from("message")),
            (Value::from("backtrace"), Value::from("not an array")),
            (Value::from("type"), Value::from("RemoteException")),
        ]);
        assert_eq!(None, ExceptionEnvelope::from_value(&mistyped));
    }

    #[test]
    fn envelopes_convert_to_maps_and_back() {
        let envelope = Fault::authentication("Token missing or invalid.").to_envelope();
        let value = envelope.clone().into_value();

        assert_eq!(Some(envelope), ExceptionEnvelope::from_value(&value));
        assert_eq!(
            FaultKind::Authentication,
            Fault::from_envelope(ExceptionEnvelope::from_value(&value).expect("an envelope"))
                .kind()
        );
    }

    #[test]
    fn misshapen_requests_keep_their_correlation_id() {
        let misshapen = Value::Map(vec![
            (Value::from("call"), Value::from(5)),
            (Value::from("args"), Value::Array(Vec::new())),
            (Value::from("token"), Value::Nil),
            (Value::from("cb_id"), Value::from("1")),
        ]);

        let mut codec = MessagePackCodec::<Value, Decoded<Request>>::default();
        let frame = codec.encode(misshapen);
        let (consumed, decoded) = codec.decode(&frame[..]).expect("still a frame");
        assert_eq!(frame.len(), consumed);
        match decoded {
            Decoded::Malformed { cb_id, .. } => assert_eq!(Some("1".to_string()), cb_id),
            Decoded::Valid(request) => panic!("unexpectedly valid: {request:?}"),
        }
    }

    #[test]
    fn values_without_a_correlation_id_are_anonymous() {
        assert!(matches!(
            Decoded::<Response>::from_value(Value::from("just a string")),
            Decoded::Malformed { cb_id: None, .. }
        ));
        assert!(matches!(
            Decoded::<Response>::from_value(Value::Map(vec![(
                Value::from("cb_id"),
                Value::from(7)
            )])),
            Decoded::Malformed { cb_id: None, .. }
        ));
    }

    #[test]
    fn well_formed_envelopes_are_valid() {
        let response = Response::reply("9".to_string(), Ok(Value::from("fine")));

        let mut codec = MessagePackCodec::<Response, Decoded<Response>>::default();
        let frame = codec.encode(response.clone());
        let (_, decoded) = codec.decode(&frame[..]).expect("decodes");
        assert_eq!(Decoded::Valid(response), decoded);
    }
}
