//! Structs shared between the explorer client, the storage layer and the crawler.

use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeMap;

lazy_static! {
    /// Characters that would let a contract name escape its shard directory or confuse the filesystem.
    static ref UNSAFE_NAME_CHARS: Regex = Regex::new(r"[/\\\x00]").unwrap();

    static ref ADDRESS: Regex = Regex::new(r"^0[xX][0-9a-fA-F]+$").unwrap();
}

/// A verified contract as listed by the explorer.
///
/// Serialized as one flat JSON object, i.e. `{"address": .., "name": .., "compiler": .., ...}` where every
/// column besides the address and name ends up in `raw`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ContractRecord {
    pub address: String,
    pub name: String,

    #[serde(flatten)]
    pub raw: BTreeMap<String, String>,
}

impl ContractRecord {
    pub fn new(address: impl Into<String>, name: impl Into<String>) -> Self {
        ContractRecord {
            address: address.into(),
            name: name.into(),
            raw: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.raw.insert(key.into(), value.into());
        self
    }

    /// Address in its storage form, lowercase hex without the `0x` prefix.
    pub fn storage_address(&self) -> String {
        let address = self.address.trim();
        let address = address
            .strip_prefix("0x")
            .or_else(|| address.strip_prefix("0X"))
            .unwrap_or(address);

        address.to_lowercase()
    }

    /// Shard key, the first byte of the address in hex.
    ///
    /// Addresses shorter than two characters are left-padded with `0`, e.g. `0x1` is stored in `01` and an
    /// empty address in `00`.
    pub fn shard(&self) -> String {
        let shard: String = self.storage_address().chars().take(2).collect();
        format!("{shard:0>2}")
    }

    /// Contract name with path separators replaced, safe to embed into a single path component.
    pub fn sanitized_name(&self) -> String {
        UNSAFE_NAME_CHARS.replace_all(&self.name, "_").into_owned()
    }
}

/// Returns true if `address` looks like a hex address with a `0x` prefix.
pub fn is_hex_address(address: &str) -> bool {
    ADDRESS.is_match(address)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_address_is_lowercase_without_prefix() {
        let record = ContractRecord::new("0xAABBCC", "Foo");
        assert_eq!(record.storage_address(), "aabbcc");
        assert_eq!(record.shard(), "aa");
    }

    #[test]
    fn shard_of_short_address_is_padded() {
        assert_eq!(ContractRecord::new("0x1", "X").shard(), "01");
        assert_eq!(ContractRecord::new("0x", "X").shard(), "00");
        assert_eq!(ContractRecord::new("", "X").shard(), "00");
        assert_eq!(ContractRecord::new("0x01", "X").shard(), "01");
    }

    #[test]
    fn sanitized_name_has_no_separators() {
        let record = ContractRecord::new("0x01", "Foo/Bar\\Baz");
        assert_eq!(record.sanitized_name(), "Foo_Bar_Baz");
    }

    #[test]
    fn serializes_flat() {
        let record = ContractRecord::new("0x01", "Token").with_field("compiler", "Solidity");
        let line = serde_json::to_string(&record).unwrap();
        assert_eq!(line, r#"{"address":"0x01","name":"Token","compiler":"Solidity"}"#);

        let parsed: ContractRecord = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn hex_address() {
        assert!(is_hex_address("0x4a25e19e0765ef63d7196728ac3c3f3119199555"));
        assert!(!is_hex_address("4a25e19e"));
        assert!(!is_hex_address("0xzz"));
    }
}
