use bytes::Bytes;
use serde_json::Value;

/// Item written to the outbound half of a record channel.
#[derive(Clone, Debug, PartialEq)]
pub enum Record {
    /// Structured row encoded with the channel's row encoder.
    Row(Value),
    /// Pre-formatted text; a trailing newline is added when missing.
    Text(String),
    /// Raw bytes forwarded untouched.
    Bytes(Bytes),
}

impl Record {
    pub fn row(value: impl Into<Value>) -> Self {
        Self::Row(value.into())
    }

    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    pub fn bytes(value: impl Into<Bytes>) -> Self {
        Self::Bytes(value.into())
    }
}

impl From<Value> for Record {
    fn from(value: Value) -> Self {
        Self::Row(value)
    }
}

impl From<Vec<Value>> for Record {
    fn from(values: Vec<Value>) -> Self {
        Self::Row(Value::Array(values))
    }
}

impl From<String> for Record {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for Record {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<Bytes> for Record {
    fn from(value: Bytes) -> Self {
        Self::Bytes(value)
    }
}

impl From<Vec<u8>> for Record {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value.into())
    }
}

impl From<&'static [u8]> for Record {
    fn from(value: &'static [u8]) -> Self {
        Self::Bytes(Bytes::from_static(value))
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use serde_json::json;

    use crate::Record;

    #[test]
    fn conversions_pick_the_right_form() {
        assert_eq!(Record::from("8"), Record::Text("8".to_owned()));
        assert_eq!(Record::from(json!([1, "a"])), Record::Row(json!([1, "a"])));
        assert_eq!(
            Record::from(vec![json!(1), json!(null)]),
            Record::Row(json!([1, null]))
        );
        assert_eq!(
            Record::from(b"42".as_slice()),
            Record::Bytes(Bytes::from_static(b"42"))
        );
    }

    #[test]
    fn helper_constructors() {
        assert_eq!(Record::row(7), Record::Row(json!(7)));
        assert_eq!(Record::text("x"), Record::Text("x".to_owned()));
        assert_eq!(Record::bytes(vec![1u8]), Record::Bytes(Bytes::from(vec![1u8])));
    }
}
