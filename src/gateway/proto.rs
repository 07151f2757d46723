// This file is manually edited rather than generated: wiring a protoc
// step into the build for such a small schema is not worth it.
//
// The schema mirrors the gateway's internal RPC envelope. Both requests
// and responses are a ParentMessage; the envelope carries the sender and
// recipient participants, a delivery channel, and either a config-file
// transfer or a signed named query.
//
// The code uses the crate PROST for protobuf serialization/deserialization.

#[derive(Clone, PartialEq, prost::Message)]
pub struct ParentMessage {
    #[prost(message, optional, tag = "1")]
    pub message: Option<MessageEnvelope>,
    #[prost(message, optional, tag = "2")]
    pub tail: Option<Tail>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct MessageEnvelope {
    #[prost(int32, tag = "1")]
    pub delivery_channel: i32,
    #[prost(message, optional, tag = "2")]
    pub sender: Option<Participant>,
    #[prost(message, optional, tag = "3")]
    pub recipient: Option<Participant>,
    #[prost(message, optional, tag = "15")]
    pub config: Option<ConfigType>,
    #[prost(message, optional, tag = "16")]
    pub payload: Option<QueryType>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Participant {
    #[prost(oneof = "participant::Id", tags = "1, 2")]
    pub id: Option<participant::Id>,
}

pub mod participant {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Id {
        /// Device identification number of the gateway.
        #[prost(string, tag = "1")]
        Din(String),
        /// The local caller on the device network.
        #[prost(int32, tag = "2")]
        Local(i32),
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Tail {
    #[prost(int32, tag = "1")]
    pub value: i32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ConfigType {
    #[prost(oneof = "config_type::Config", tags = "1, 2")]
    pub config: Option<config_type::Config>,
}

pub mod config_type {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Config {
        #[prost(message, tag = "1")]
        Send(super::PayloadConfigSend),
        #[prost(message, tag = "2")]
        Recv(super::PayloadConfigRecv),
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct PayloadConfigSend {
    #[prost(int32, tag = "1")]
    pub num: i32,
    #[prost(string, tag = "2")]
    pub file: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct PayloadConfigRecv {
    #[prost(message, optional, tag = "1")]
    pub file: Option<ConfigString>,
    #[prost(int32, tag = "2")]
    pub code: i32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ConfigString {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "100")]
    pub text: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct QueryType {
    #[prost(message, optional, tag = "1")]
    pub send: Option<PayloadQuerySend>,
    #[prost(message, optional, tag = "2")]
    pub recv: Option<PayloadString>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct PayloadQuerySend {
    #[prost(enumeration = "Format", tag = "1")]
    pub request_format: i32,
    #[prost(message, optional, tag = "2")]
    pub payload: Option<PayloadString>,
    #[prost(message, optional, tag = "3")]
    pub body: Option<StringValue>,
    #[prost(bytes = "vec", tag = "4")]
    pub signature: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct PayloadString {
    #[prost(int32, tag = "1")]
    pub value: i32,
    #[prost(string, tag = "2")]
    pub text: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct StringValue {
    #[prost(string, tag = "1")]
    pub value: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum Format {
    Unknown = 0,
    Json = 1,
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn test_envelope_round_trip() {
        let pm = ParentMessage {
            message: Some(MessageEnvelope {
                delivery_channel: 1,
                sender: Some(Participant {
                    id: Some(participant::Id::Local(1)),
                }),
                recipient: Some(Participant {
                    id: Some(participant::Id::Din("1232100-00-E--TG123456789ABC".to_string())),
                }),
                config: None,
                payload: Some(QueryType {
                    send: Some(PayloadQuerySend {
                        request_format: Format::Json as i32,
                        payload: Some(PayloadString {
                            value: 1,
                            text: "query DeviceControllerQuery { control }".to_string(),
                        }),
                        body: Some(StringValue {
                            value: "{}".to_string(),
                        }),
                        signature: vec![0xde, 0xad],
                    }),
                    recv: None,
                }),
            }),
            tail: Some(Tail { value: 1 }),
        };

        let bytes = pm.encode_to_vec();
        let decoded = ParentMessage::decode(bytes.as_slice()).unwrap();
        let envelope = decoded.message.unwrap();
        assert_eq!(envelope.delivery_channel, 1);
        match envelope.recipient.unwrap().id.unwrap() {
            participant::Id::Din(din) => assert_eq!(din, "1232100-00-E--TG123456789ABC"),
            other => panic!("unexpected recipient: {:?}", other),
        }
        let send = envelope.payload.unwrap().send.unwrap();
        assert_eq!(send.request_format, Format::Json as i32);
        assert!(send.payload.unwrap().text.contains("DeviceControllerQuery"));
    }
}
