use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};

/// Opaque client-generated identifier correlating a request with every
/// later inbound event, queue record, and transfer session it produces.
/// Allocated before any transmission; never reused.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct CorrelationId(pub String);

impl CorrelationId {
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<String> for CorrelationId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for CorrelationId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.0.as_str())
    }
}

/// Generates correlation ids from 128 bits of OS randomness. Stateless;
/// safe to call from any thread.
#[derive(Clone, Copy, Debug, Default)]
pub struct IdGenerator;

impl IdGenerator {
    pub fn new_id(&self) -> CorrelationId {
        let mut bytes = [0u8; 16];
        OsRng.fill_bytes(&mut bytes);
        CorrelationId(hex::encode(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn ids_are_unique_and_hex() {
        let gen = IdGenerator;
        let mut seen = HashSet::new();
        for _ in 0..1_000 {
            let id = gen.new_id();
            assert_eq!(id.as_str().len(), 32);
            assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit()));
            assert!(seen.insert(id), "generator produced a duplicate id");
        }
    }
}
