//! Request deserialization for the dispatch loop.

use serde::de::DeserializeOwned;
use serde_json::Value;

use drover_daemon_types::{RpcMethod, RpcRequest};

use super::errors::DispatchError;

/// A parsed request whose method name is known.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ParsedRequest {
    pub(crate) method: RpcMethod,
    pub(crate) params: Value,
}

impl ParsedRequest {
    /// Parses a JSONL line into a request.
    ///
    /// Trailing whitespace (including the newline delimiter) is trimmed
    /// before parsing.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::Malformed` if the line is empty or is not a
    /// request envelope, and `DispatchError::UnknownMethod` if the method is
    /// not one the daemon answers.
    pub(crate) fn parse(line: &[u8]) -> Result<Self, DispatchError> {
        let trimmed = line.trim_ascii_end();
        if trimmed.is_empty() {
            return Err(DispatchError::malformed("empty request line"));
        }
        let request: RpcRequest =
            serde_json::from_slice(trimmed).map_err(DispatchError::from_json_error)?;
        let name = request.method.trim();
        let method = name
            .parse::<RpcMethod>()
            .map_err(|_| DispatchError::unknown_method(name))?;
        Ok(Self {
            method,
            params: request.params,
        })
    }
}

/// Deserializes a method's parameters; `null` is treated as `{}`.
pub(crate) fn params<T>(method: RpcMethod, params: Value) -> Result<T, DispatchError>
where
    T: DeserializeOwned,
{
    let params = if params.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        params
    };
    serde_json::from_value(params).map_err(|source| DispatchError::InvalidParams {
        method: method.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use drover_daemon_types::{IdParams, SubscribeParams};
    use rstest::rstest;
    use serde_json::json;

    #[test]
    fn parses_request_with_params() {
        let request = ParsedRequest::parse(br#"{"method":"stopProcessId","params":{"id":4}}"#)
            .unwrap_or_else(|error| panic!("parse: {error}"));
        assert_eq!(request.method, RpcMethod::StopProcessId);
        let parsed: IdParams = params(request.method, request.params)
            .unwrap_or_else(|error| panic!("params: {error}"));
        assert_eq!(parsed.id, 4);
    }

    #[test]
    fn missing_params_default_to_null() {
        let request = ParsedRequest::parse(b"{\"method\":\"ping\"}  \n")
            .unwrap_or_else(|error| panic!("parse: {error}"));
        assert_eq!(request.method, RpcMethod::Ping);
        assert!(request.params.is_null());
    }

    #[rstest]
    #[case(b"".as_slice())]
    #[case(b"   \n".as_slice())]
    #[case(b"not json".as_slice())]
    #[case(br#"{"params":{}}"#.as_slice())]
    fn rejects_malformed_lines(#[case] line: &[u8]) {
        assert!(matches!(
            ParsedRequest::parse(line),
            Err(DispatchError::Malformed { .. })
        ));
    }

    #[test]
    fn rejects_unknown_methods() {
        let error = ParsedRequest::parse(br#"{"method":"frobnicate"}"#)
            .err()
            .unwrap_or_else(|| panic!("unknown method accepted"));
        assert!(matches!(error, DispatchError::UnknownMethod { method } if method == "frobnicate"));
    }

    #[test]
    fn null_params_fill_defaults() {
        let parsed: SubscribeParams = params(RpcMethod::Subscribe, Value::Null)
            .unwrap_or_else(|error| panic!("params: {error}"));
        assert!(parsed.topics.is_empty());
    }

    #[test]
    fn mistyped_params_are_rejected() {
        let result: Result<IdParams, _> = params(RpcMethod::StopProcessId, json!({"id": "four"}));
        assert!(matches!(
            result,
            Err(DispatchError::InvalidParams { method, .. }) if method == "stopProcessId"
        ));
    }
}
