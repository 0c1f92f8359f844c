// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use snafu::ResultExt;

use crate::{
    Result,
    error::{DecodeSnafu, EncodeSnafu, NotAnObjectSnafu},
};

/// One queue entry: a JSON object.
pub type Record = Map<String, Value>;

/// Serialize `value` into a [`Record`].
///
/// Anything that does not serialize to a JSON object is rejected here, so a
/// bad payload fails at the call site instead of inside the queue.
pub fn to_record<T: Serialize + ?Sized>(value: &T) -> Result<Record> {
    match serde_json::to_value(value).context(EncodeSnafu)? {
        Value::Object(map) => Ok(map),
        other => NotAnObjectSnafu {
            kind: value_kind(&other),
        }
        .fail(),
    }
}

/// Decode a [`Record`] into a typed value.
pub fn from_record<T: DeserializeOwned>(record: Record) -> Result<T> {
    serde_json::from_value(Value::Object(record)).context(DecodeSnafu)
}

const fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use serde_json::json;
    use test_case::test_case;

    use super::*;

    #[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
    struct Event {
        name: String,
        seq:  u32,
    }

    #[test]
    fn test_struct_round_trips_through_record() {
        let event = Event {
            name: "click".to_string(),
            seq:  7,
        };
        let record = to_record(&event).unwrap();
        assert_eq!(record.get("seq"), Some(&json!(7)));
        assert_eq!(from_record::<Event>(record).unwrap(), event);
    }

    #[test_case(json!(null), "null" ; "null")]
    #[test_case(json!(3), "number" ; "number")]
    #[test_case(json!("text"), "string" ; "string")]
    #[test_case(json!([1, 2]), "array" ; "array")]
    fn test_non_object_rejected(value: Value, kind: &str) {
        let err = to_record(&value).unwrap_err();
        assert!(matches!(err, crate::QueueError::NotAnObject { kind: k, .. } if k == kind));
    }

    #[test]
    fn test_decode_mismatch() {
        let record = to_record(&json!({ "name": 1 })).unwrap();
        assert!(matches!(
            from_record::<Event>(record),
            Err(crate::QueueError::Decode { .. })
        ));
    }
}
