//! # Message Protocol
//!
//! Defines the wire format shared by every proxy and dispatcher:
//!
//! ```text
//! request  : {"method": "request_token", "params": [12, 3]}
//! success  : {"result": null}
//! failure  : {"error": {"name": "NotFoundError", "args": [99]}}
//! ```
//!
//! Each message is one JSON object on one line. A connection carries exactly one
//! request and one response, then closes.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use super::error::{Error, Result};

// ============================================================================
// ADDRESSES
// ============================================================================

/// Host + port of a reachable endpoint.
///
/// On the wire an address is the two-element array `["host", port]`. When
/// deserializing (configuration files, CLI) the text form `"host:port"` is
/// accepted as well.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "AddressRepr", into = "(String, u16)")]
pub struct Address {
    pub host: String,
    pub port: u16,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum AddressRepr {
    Pair(String, u16),
    Text(String),
}

impl Address {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl TryFrom<AddressRepr> for Address {
    type Error = String;

    fn try_from(repr: AddressRepr) -> std::result::Result<Self, Self::Error> {
        match repr {
            AddressRepr::Pair(host, port) => Ok(Address::new(host, port)),
            AddressRepr::Text(text) => text.parse(),
        }
    }
}

impl From<Address> for (String, u16) {
    fn from(address: Address) -> Self {
        (address.host, address.port)
    }
}

impl FromStr for Address {
    type Err = String;

    fn from_str(text: &str) -> std::result::Result<Self, Self::Err> {
        let (host, port) = text
            .rsplit_once(':')
            .ok_or_else(|| format!("expected host:port, got '{text}'"))?;
        let port = port
            .parse::<u16>()
            .map_err(|e| format!("invalid port in '{text}': {e}"))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        Ok(Address::new(host, port))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

// ============================================================================
// REQUEST / RESPONSE
// ============================================================================

/// A remote call: the operation name and its positional arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub method: String,
    #[serde(default)]
    pub params: Vec<Value>,
}

/// Error payload carried by a failed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireError {
    pub name: String,
    pub args: Value,
}

/// Outcome of a remote call.
///
/// Externally tagged, so `Result(v)` is `{"result": v}` and `Error(e)` is
/// `{"error": e}` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Response {
    #[serde(rename = "result")]
    Result(Value),
    #[serde(rename = "error")]
    Error(WireError),
}

impl Request {
    pub fn new(method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }
}

impl Response {
    /// Turn the response into the caller's view: the result value or a
    /// [`Error::Remote`] holding the remote name and arguments.
    pub fn into_result(self) -> Result<Value> {
        match self {
            Response::Result(value) => Ok(value),
            Response::Error(error) => Err(Error::from(error)),
        }
    }
}

impl From<Result<Value>> for Response {
    fn from(outcome: Result<Value>) -> Self {
        match outcome {
            Ok(value) => Response::Result(value),
            Err(error) => Response::Error(error.to_wire()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_round_trip_with_empty_params() {
        let request = Request::new("display_peers", vec![]);
        let line = serde_json::to_string(&request).unwrap();
        assert_eq!(line, r#"{"method":"display_peers","params":[]}"#);
        assert_eq!(serde_json::from_str::<Request>(&line).unwrap(), request);
    }

    #[test]
    fn request_without_params_field_decodes_as_empty() {
        let request: Request = serde_json::from_str(r#"{"method":"check"}"#).unwrap();
        assert!(request.params.is_empty());
    }

    #[test]
    fn request_round_trip_with_nested_params() {
        let request = Request::new(
            "obtain_token",
            vec![json!({"1": 4, "2": 0, "3": 7}), json!([["a", 1], {"b": null}])],
        );
        let decoded: Request =
            serde_json::from_str(&serde_json::to_string(&request).unwrap()).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn null_result_is_a_success() {
        let response: Response = serde_json::from_str(r#"{"result":null}"#).unwrap();
        assert_eq!(response, Response::Result(Value::Null));
        assert_eq!(response.into_result().unwrap(), Value::Null);
    }

    #[test]
    fn error_response_keeps_arbitrary_args() {
        let response = Response::Error(WireError {
            name: "ProtocolError".to_string(),
            args: json!({"reason": ["nested", 1, {"deep": true}]}),
        });
        let line = serde_json::to_string(&response).unwrap();
        assert!(line.starts_with(r#"{"error":{"name":"ProtocolError""#));

        let decoded: Response = serde_json::from_str(&line).unwrap();
        match decoded.into_result() {
            Err(Error::Remote { name, args }) => {
                assert_eq!(name, "ProtocolError");
                assert_eq!(args["reason"][2]["deep"], json!(true));
            }
            other => panic!("expected a remote error, got {other:?}"),
        }
    }

    #[test]
    fn garbage_is_a_communication_error() {
        let err = Error::from(serde_json::from_str::<Response>("not json").unwrap_err());
        assert!(matches!(err, Error::Communication(_)));
    }

    #[test]
    fn address_wire_form_is_a_pair() {
        let address = Address::new("10.0.0.5", 40123);
        let encoded = serde_json::to_value(&address).unwrap();
        assert_eq!(encoded, json!(["10.0.0.5", 40123]));
        let decoded: Address = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, address);
    }

    #[test]
    fn address_accepts_text_form() {
        let decoded: Address = serde_json::from_value(json!("localhost:9000")).unwrap();
        assert_eq!(decoded, Address::new("localhost", 9000));
        assert_eq!("[::1]:80".parse::<Address>().unwrap(), Address::new("::1", 80));
        assert!("no-port".parse::<Address>().is_err());
    }
}
