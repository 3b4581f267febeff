//! Packet constructors and typed variant extraction

use bytes::Bytes;
use tracing::error;

use crate::error::ProtocolViolation;
use crate::pb::{packet::Union, ConnectRequest, ConnectResponse, HttpError, Packet};

impl Packet {
    pub fn connect_request(host_port: impl Into<String>) -> Self {
        Self {
            union: Some(Union::ConnectRequest(ConnectRequest {
                host_port: host_port.into(),
            })),
        }
    }

    /// `error: None` signals that the target was dialed successfully
    pub fn connect_response(error: Option<HttpError>) -> Self {
        Self {
            union: Some(Union::ConnectResponse(ConnectResponse { error })),
        }
    }

    pub fn payload(data: impl Into<Vec<u8>>) -> Self {
        Self {
            union: Some(Union::Payload(data.into())),
        }
    }

    /// Name of the populated variant
    pub fn kind(&self) -> &'static str {
        match &self.union {
            Some(Union::ConnectRequest(_)) => ConnectRequest::NAME,
            Some(Union::ConnectResponse(_)) => ConnectResponse::NAME,
            Some(Union::Payload(_)) => Payload::NAME,
            None => "empty packet",
        }
    }
}

impl HttpError {
    pub fn new(status_code: u16, message: impl Into<String>) -> Self {
        Self {
            status_code: i32::from(status_code),
            message: message.into(),
        }
    }
}

/// Raw tunnel bytes carried by a `Payload` packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload(pub Bytes);

/// A packet variant that a protocol stage can require
pub trait PacketVariant: Sized {
    const NAME: &'static str;

    /// Take the variant out of the union, or hand the union back untouched
    fn from_union(union: Union) -> Result<Self, Union>;
}

impl PacketVariant for ConnectRequest {
    const NAME: &'static str = "ConnectRequest";

    fn from_union(union: Union) -> Result<Self, Union> {
        match union {
            Union::ConnectRequest(req) => Ok(req),
            other => Err(other),
        }
    }
}

impl PacketVariant for ConnectResponse {
    const NAME: &'static str = "ConnectResponse";

    fn from_union(union: Union) -> Result<Self, Union> {
        match union {
            Union::ConnectResponse(resp) => Ok(resp),
            other => Err(other),
        }
    }
}

impl PacketVariant for Payload {
    const NAME: &'static str = "Payload";

    fn from_union(union: Union) -> Result<Self, Union> {
        match union {
            Union::Payload(data) => Ok(Payload(Bytes::from(data))),
            other => Err(other),
        }
    }
}

/// Extract the variant the current protocol stage expects.
///
/// Any other variant (or an empty packet) is a protocol violation.
pub fn extract<T: PacketVariant>(packet: Packet) -> Result<T, ProtocolViolation> {
    let got = packet.kind();
    match packet.union.map(T::from_union) {
        Some(Ok(variant)) => Ok(variant),
        _ => {
            let violation = ProtocolViolation {
                expected: T::NAME,
                got,
            };
            error!(%violation, "unexpected packet");
            Err(violation)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_matching_variant() {
        let req: ConnectRequest = extract(Packet::connect_request("example.com:443")).unwrap();
        assert_eq!(req.host_port, "example.com:443");

        let resp: ConnectResponse = extract(Packet::connect_response(None)).unwrap();
        assert!(resp.error.is_none());

        let Payload(data) = extract(Packet::payload(b"hello".to_vec())).unwrap();
        assert_eq!(&data[..], b"hello");
    }

    #[test]
    fn test_extract_wrong_variant() {
        let err = extract::<ConnectResponse>(Packet::payload(b"data".to_vec())).unwrap_err();
        assert_eq!(err.expected, "ConnectResponse");
        assert_eq!(err.got, "Payload");

        let err = extract::<Payload>(Packet::connect_request("a:1")).unwrap_err();
        assert_eq!(err.expected, "Payload");
        assert_eq!(err.got, "ConnectRequest");
    }

    #[test]
    fn test_extract_empty_packet() {
        let err = extract::<ConnectRequest>(Packet { union: None }).unwrap_err();
        assert_eq!(err.got, "empty packet");
    }

    #[test]
    fn test_connect_response_with_error() {
        let packet = Packet::connect_response(Some(HttpError::new(503, "connection refused")));
        let resp: ConnectResponse = extract(packet).unwrap();
        let err = resp.error.unwrap();
        assert_eq!(err.status_code, 503);
        assert_eq!(err.message, "connection refused");
    }
}
