//! Payload serialization. Calls carry opaque postcard-encoded bytes.

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{Error, Result};

/// A request or response type that can cross a channel.
pub trait Message: Serialize + DeserializeOwned + Send + 'static {}

impl<T> Message for T where T: Serialize + DeserializeOwned + Send + 'static {}

/// Serializes a message into an owned payload.
pub fn encode<M: Serialize>(message: &M) -> Result<Bytes> {
	postcard::to_stdvec(message)
		.map(Bytes::from)
		.map_err(Error::Encode)
}

/// Deserializes a payload produced by [`encode`].
pub fn decode<M: DeserializeOwned>(payload: &[u8]) -> Result<M> {
	postcard::from_bytes(payload).map_err(Error::Decode)
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;
	use proptest::prelude::*;
	use serde::Deserialize;

	use super::*;

	#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
	struct Record {
		name: String,
		age: i32,
		tags: Vec<u16>,
		note: Option<String>,
	}

	proptest! {
		#[test]
		fn prop_decode_inverts_encode(
			name in ".*",
			age in any::<i32>(),
			tags in proptest::collection::vec(any::<u16>(), 0..16),
			note in proptest::option::of(".{0,32}"),
		) {
			let record = Record { name, age, tags, note };
			let payload = encode(&record).unwrap();
			let decoded: Record = decode(&payload).unwrap();
			prop_assert_eq!(decoded, record);
		}
	}

	#[test]
	fn truncated_payload_is_a_decode_error() {
		let record = Record {
			name: "ss".into(),
			age: -11,
			tags: vec![1, 2, 3],
			note: None,
		};
		let payload = encode(&record).unwrap();
		let err = decode::<Record>(&payload[..payload.len() - 2]).unwrap_err();
		assert!(matches!(err, Error::Decode(_)), "{err}");
	}

	#[test]
	fn empty_struct_round_trips() {
		#[derive(Debug, PartialEq, Serialize, Deserialize)]
		struct Empty {}

		let payload = encode(&Empty {}).unwrap();
		assert_eq!(payload.len(), 0);
		assert_eq!(decode::<Empty>(&payload).unwrap(), Empty {});
	}
}
