//! Wipeable holder for user-entered credentials.

use std::fmt;
use zeroize::Zeroize;

/// Holds the raw bytes of a credential while an unlock attempt runs.
///
/// `wipe` overwrites the storage itself, not just the length, so slices
/// handed out earlier through `view` cannot be used to recover the content
/// once they are re-borrowed. The buffer is also wiped on drop.
#[derive(Default)]
pub struct SecretBuffer {
    bytes: Vec<u8>,
    wipes: usize,
}

impl SecretBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a buffer holding `raw`.
    pub fn from_string(raw: String) -> Self {
        let mut buffer = Self::new();
        buffer.bytes = raw.into_bytes();
        buffer
    }

    /// Replace the content with `raw`.
    ///
    /// Any previous content is overwritten before it is released.
    pub fn set(&mut self, raw: &[u8]) {
        self.bytes.zeroize();
        self.bytes.extend_from_slice(raw);
    }

    /// Read-only access to the current content.
    pub fn view(&self) -> &[u8] {
        &self.bytes
    }

    /// Overwrite and clear the content.
    ///
    /// Calling this on an already wiped buffer does nothing.
    pub fn wipe(&mut self) {
        if self.is_wiped() {
            return;
        }
        self.bytes.zeroize();
        self.wipes += 1;
    }

    /// Whether the buffer has been wiped since content was last set.
    pub fn is_wiped(&self) -> bool {
        self.bytes.is_empty() && self.wipes > 0
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Number of times content has been cleared by `wipe`.
    pub fn wipe_count(&self) -> usize {
        self.wipes
    }
}

impl Drop for SecretBuffer {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl fmt::Debug for SecretBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretBuffer([REDACTED; {} bytes])", self.bytes.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_view() {
        let mut secret = SecretBuffer::new();
        secret.set(b"hunter2");
        assert_eq!(secret.view(), b"hunter2");
        assert!(!secret.is_wiped());
    }

    #[test]
    fn test_wipe_clears_storage() {
        let mut secret = SecretBuffer::from_string("hunter2".to_string());
        secret.wipe();

        assert!(secret.is_empty());
        assert!(secret.is_wiped());
        assert_eq!(secret.view(), b"");
        assert_eq!(secret.wipe_count(), 1);
    }

    #[test]
    fn test_wipe_is_idempotent() {
        let mut secret = SecretBuffer::from_string("pw".to_string());
        secret.wipe();
        secret.wipe();
        secret.wipe();
        assert_eq!(secret.wipe_count(), 1);
    }

    #[test]
    fn test_set_after_wipe_starts_new_round() {
        let mut secret = SecretBuffer::from_string("first".to_string());
        secret.wipe();
        secret.set(b"second");
        assert!(!secret.is_wiped());
        assert_eq!(secret.view(), b"second");
        secret.wipe();
        assert_eq!(secret.wipe_count(), 2);
    }

    #[test]
    fn test_debug_redacts() {
        let secret = SecretBuffer::from_string("topsecret".to_string());
        let debug = format!("{:?}", secret);
        assert!(!debug.contains("topsecret"));
        assert!(debug.contains("REDACTED"));
    }

    proptest::proptest! {
        #[test]
        fn prop_wipe_always_empties(raw in proptest::collection::vec(proptest::num::u8::ANY, 0..64)) {
            let mut secret = SecretBuffer::new();
            secret.set(&raw);
            secret.wipe();
            proptest::prop_assert!(secret.is_empty());
        }
    }
}
