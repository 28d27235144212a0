use reqwest::StatusCode;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::ApiError;

/// Success envelope handed back to callers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Response payload as received: JSON when the content type says so,
/// raw text otherwise.
#[derive(Clone, Debug, PartialEq)]
pub enum ResponseBody {
    Json(Value),
    Text(String),
}

impl ResponseBody {
    /// Classifies a body by content type. JSON that fails to parse is kept as
    /// text; typed callers then see the mismatch when decoding the envelope.
    pub(crate) fn parse(content_type: Option<&str>, text: String) -> Self {
        let is_json = content_type.is_some_and(|value| value.contains("application/json"));
        if !is_json {
            return Self::Text(text);
        }
        if text.trim().is_empty() {
            return Self::Json(Value::Null);
        }
        match serde_json::from_str(&text) {
            Ok(value) => Self::Json(value),
            Err(_) => Self::Text(text),
        }
    }

    fn field(&self, name: &str) -> Option<&str> {
        match self {
            Self::Json(value) => value.get(name).and_then(Value::as_str),
            Self::Text(_) => None,
        }
    }

    /// Message for a failed response: `message`, then `error`, then a status
    /// fallback.
    pub(crate) fn error_message(&self, status: StatusCode) -> String {
        self.field("message")
            .or_else(|| self.field("error"))
            .map(str::to_owned)
            .unwrap_or_else(|| format!("HTTP error: {}", status.as_u16()))
    }

    /// Decodes the payload into `T`.
    ///
    /// An empty text body (204 No Content, bare 200) decodes as JSON `null`
    /// first, so `()` and `Option<T>` work; `String` still receives `""`.
    pub(crate) fn into_envelope<T: DeserializeOwned>(self) -> Result<ApiResponse<T>, ApiError> {
        let message = self.field("message").map(str::to_owned);
        let data = match self {
            Self::Json(value) => decode_value(value)?,
            Self::Text(text) if text.trim().is_empty() => {
                serde_json::from_value::<T>(Value::Null)
                    .or_else(|_| decode_value(Value::String(text)))?
            }
            Self::Text(text) => decode_value(Value::String(text))?,
        };
        Ok(ApiResponse {
            success: true,
            data,
            message,
        })
    }
}

fn decode_value<T: DeserializeOwned>(value: Value) -> Result<T, ApiError> {
    serde_json::from_value::<T>(value)
        .map_err(|err| ApiError::Decode(format!("unexpected response shape: {err}")))
}

#[cfg(test)]
mod tests {
    use reqwest::StatusCode;
    use serde::Deserialize;
    use serde_json::json;

    use super::ResponseBody;
    use crate::ApiError;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Balance {
        total: f64,
    }

    #[test]
    fn json_content_type_is_parsed() {
        let body = ResponseBody::parse(
            Some("application/json; charset=utf-8"),
            r#"{"total": 10.5}"#.to_owned(),
        );
        assert_eq!(body, ResponseBody::Json(json!({"total": 10.5})));
    }

    #[test]
    fn other_content_types_stay_text() {
        let body = ResponseBody::parse(Some("text/plain"), "pong".to_owned());
        assert_eq!(body, ResponseBody::Text("pong".to_owned()));

        let body = ResponseBody::parse(None, "{}".to_owned());
        assert_eq!(body, ResponseBody::Text("{}".to_owned()));
    }

    #[test]
    fn empty_json_body_is_null() {
        let body = ResponseBody::parse(Some("application/json"), String::new());
        assert_eq!(body, ResponseBody::Json(serde_json::Value::Null));
    }

    #[test]
    fn malformed_json_stays_text() {
        let body = ResponseBody::parse(Some("application/json"), "{nope".to_owned());
        assert_eq!(body, ResponseBody::Text("{nope".to_owned()));

        let err = body.into_envelope::<Balance>().expect_err("must fail");
        assert!(matches!(err, ApiError::Decode(_)));
    }

    #[test]
    fn error_message_prefers_message_then_error() {
        let status = StatusCode::BAD_REQUEST;
        let body = ResponseBody::Json(json!({"message": "a", "error": "b"}));
        assert_eq!(body.error_message(status), "a");
        let body = ResponseBody::Json(json!({"error": "b"}));
        assert_eq!(body.error_message(status), "b");
        let body = ResponseBody::Text("oops".to_owned());
        assert_eq!(body.error_message(status), "HTTP error: 400");
    }

    #[test]
    fn envelope_carries_top_level_message() {
        let body = ResponseBody::Json(json!({"total": 3.0, "message": "ok"}));
        let envelope = body.into_envelope::<Balance>().expect("must decode");
        assert!(envelope.success);
        assert_eq!(envelope.data, Balance { total: 3.0 });
        assert_eq!(envelope.message.as_deref(), Some("ok"));
    }

    #[test]
    fn text_body_decodes_into_string() {
        let envelope = ResponseBody::Text("pong".to_owned())
            .into_envelope::<String>()
            .expect("must decode");
        assert_eq!(envelope.data, "pong");
        assert_eq!(envelope.message, None);
    }

    #[test]
    fn empty_text_body_decodes_into_unit_and_option() {
        ResponseBody::Text(String::new())
            .into_envelope::<()>()
            .expect("unit must decode");

        let envelope = ResponseBody::Text(" ".to_owned())
            .into_envelope::<Option<Balance>>()
            .expect("option must decode");
        assert_eq!(envelope.data, None);

        let envelope = ResponseBody::Text(String::new())
            .into_envelope::<String>()
            .expect("string must decode");
        assert_eq!(envelope.data, "");
    }
}
