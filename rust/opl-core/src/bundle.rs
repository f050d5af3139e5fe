//! Executable bundles: a main program plus named data files.
//!
//! ```text
//! main_len | main_bytes | (name_len | name_utf8 | data_len | data)*
//! ```

use crate::bytecode::DecodeError;
use crate::wire::{put_framed, ByteReader};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bundle {
    pub main: Vec<u8>,
    pub files: BTreeMap<String, Vec<u8>>,
}

impl Bundle {
    pub fn new(main: Vec<u8>) -> Self {
        Self {
            main,
            files: BTreeMap::new(),
        }
    }

    pub fn with_file(mut self, name: impl Into<String>, data: Vec<u8>) -> Self {
        self.files.insert(name.into(), data);
        self
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        put_framed(&mut out, &self.main);
        for (name, data) in &self.files {
            put_framed(&mut out, name.as_bytes());
            put_framed(&mut out, data);
        }
        out
    }

    /// Decode a bundle. Duplicate file names keep the last entry.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut reader = ByteReader::new(bytes);
        let main = reader.framed("bundle main program")?.to_vec();
        let mut files = BTreeMap::new();
        while !reader.is_empty() {
            let offset = reader.position();
            let name = reader.framed("bundle file name")?;
            let name = std::str::from_utf8(name).map_err(|_| DecodeError::InvalidUtf8 {
                what: "bundle file name",
                offset,
            })?;
            let data = reader.framed("bundle file data")?;
            files.insert(name.to_string(), data.to_vec());
        }
        Ok(Self { main, files })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundle_round_trip() {
        let bundle = Bundle::new(vec![1, 2, 3])
            .with_file("data.txt", b"hello".to_vec())
            .with_file("empty", Vec::new());
        let decoded = Bundle::decode(&bundle.encode()).unwrap();
        assert_eq!(decoded, bundle);
    }

    #[test]
    fn bundle_without_files() {
        let bytes = Bundle::new(Vec::new()).encode();
        assert_eq!(bytes, vec![0, 0, 0, 0]);
        assert!(Bundle::decode(&bytes).unwrap().files.is_empty());
    }

    #[test]
    fn truncated_file_entry_fails() {
        let mut bytes = Bundle::new(vec![9]).with_file("a", vec![1, 2]).encode();
        bytes.pop();
        assert!(Bundle::decode(&bytes).is_err());
    }

    #[test]
    fn non_utf8_name_fails() {
        let mut bytes = Vec::new();
        put_framed(&mut bytes, &[]);
        put_framed(&mut bytes, &[0xFF]);
        put_framed(&mut bytes, &[]);
        assert!(matches!(
            Bundle::decode(&bytes),
            Err(DecodeError::InvalidUtf8 { .. })
        ));
    }
}
