//! Provides the serializer / deserializer pairs used by remote stores.
//!
//! A remote store like the [RedisStore](crate::store::redis::RedisStore) only handles bytes.
//! A [Codec] therefore explicitly describes how a value is turned into bytes and back. Built-in
//! defaults only exist for primitive payloads (**String** and **Vec<u8>**). Structured records
//! like an [Account](crate::entity::Account) have to opt into a format explicitly, e.g. via
//! [Codec::json](Codec::json).
//!
//! # Examples
//! ```
//! # use ems_plat::store::codec::Codec;
//! # use ems_plat::entity::Account;
//! let codec = Codec::<Account>::json();
//! let bytes = codec.encode(&Account::new("202105", "secret")).unwrap();
//! assert_eq!(codec.decode(&bytes).unwrap().student_id, "202105");
//!
//! // Strings are stored as plain UTF-8...
//! let codec = Codec::<String>::default();
//! assert_eq!(codec.encode(&"Hello".to_owned()).unwrap(), b"Hello".to_vec());
//! assert_eq!(codec.decode(&[0xff, 0xfe]).is_err(), true);
//! ```
use std::sync::Arc;

use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::Serialize;

type Encoder<V> = Arc<dyn Fn(&V) -> anyhow::Result<Vec<u8>> + Send + Sync>;
type Decoder<V> = Arc<dyn Fn(&[u8]) -> anyhow::Result<V> + Send + Sync>;

/// Turns values into bytes and back.
pub struct Codec<V> {
    encoder: Encoder<V>,
    decoder: Decoder<V>,
}

impl<V> Clone for Codec<V> {
    fn clone(&self) -> Self {
        Codec {
            encoder: self.encoder.clone(),
            decoder: self.decoder.clone(),
        }
    }
}

impl<V> Codec<V> {
    /// Creates a codec from the given serializer and deserializer.
    pub fn new<E, D>(encoder: E, decoder: D) -> Self
    where
        E: Fn(&V) -> anyhow::Result<Vec<u8>> + Send + Sync + 'static,
        D: Fn(&[u8]) -> anyhow::Result<V> + Send + Sync + 'static,
    {
        Codec {
            encoder: Arc::new(encoder),
            decoder: Arc::new(decoder),
        }
    }

    /// Serializes the given value.
    pub fn encode(&self, value: &V) -> anyhow::Result<Vec<u8>> {
        (self.encoder)(value)
    }

    /// Deserializes a value from the given bytes.
    pub fn decode(&self, data: &[u8]) -> anyhow::Result<V> {
        (self.decoder)(data)
    }
}

impl<V> Codec<V>
where
    V: Serialize + DeserializeOwned + 'static,
{
    /// Stores values as JSON documents.
    pub fn json() -> Self {
        Codec::new(
            |value: &V| serde_json::to_vec(value).context("Failed to serialize a value as JSON"),
            |data: &[u8]| serde_json::from_slice(data).context("Failed to parse a JSON value"),
        )
    }
}

impl Default for Codec<String> {
    fn default() -> Self {
        Codec::new(
            |value: &String| Ok(value.as_bytes().to_vec()),
            |data: &[u8]| {
                String::from_utf8(data.to_vec()).context("A stored value is not valid UTF-8")
            },
        )
    }
}

impl Default for Codec<Vec<u8>> {
    fn default() -> Self {
        Codec::new(|value: &Vec<u8>| Ok(value.clone()), |data: &[u8]| Ok(data.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use crate::entity::{TaskEntity, Timestamped};
    use crate::store::codec::Codec;

    #[test]
    fn json_keeps_all_timestamps() {
        let codec = Codec::<TaskEntity<Vec<String>>>::json();

        let mut record = TaskEntity::new();
        record.update(vec!["Linear Algebra".to_owned(), "Compilers".to_owned()]);
        record.mark_submitted();

        let restored = codec.decode(&codec.encode(&record).unwrap()).unwrap();
        assert_eq!(restored.update_time(), record.update_time());
        assert_eq!(restored, record);
    }

    #[test]
    fn custom_codecs_are_used_as_given() {
        let codec = Codec::new(
            |value: &u32| Ok(value.to_be_bytes().to_vec()),
            |data: &[u8]| {
                let bytes: [u8; 4] = data
                    .try_into()
                    .map_err(|_| anyhow::anyhow!("Expected four bytes"))?;
                Ok(u32::from_be_bytes(bytes))
            },
        );

        assert_eq!(codec.clone().encode(&258).unwrap(), vec![0, 0, 1, 2]);
        assert_eq!(codec.decode(&[0, 0, 1, 2]).unwrap(), 258);
        assert_eq!(codec.decode(&[1]).is_err(), true);
    }
}
