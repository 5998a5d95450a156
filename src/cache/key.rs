//! Content fingerprints keying the audio cache.

use sha2::{Digest, Sha256};
use unicode_normalization::UnicodeNormalization;

/// The synthesis parameters that shape audio output. Together with the
/// sentence text they fully determine a cache key.
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceSpec {
    /// Engine name ("piper", "gtts").
    pub engine: String,
    /// Speaker/voice id; empty when the engine default is used.
    pub voice: String,
    /// Speed multiplier, quantized to a bucket before hashing.
    pub speed: f32,
}

impl VoiceSpec {
    pub fn new(engine: &str, voice: Option<&str>, speed: f32) -> Self {
        Self {
            engine: engine.to_owned(),
            voice: voice.unwrap_or_default().to_owned(),
            speed,
        }
    }

    /// Speed quantized to two decimals so nearby speeds share cache
    /// entries.
    pub fn speed_bucket(&self) -> i64 {
        (f64::from(self.speed) * 100.0).round() as i64
    }
}

/// A 256-bit content hash of `(normalized_text, engine, voice,
/// speed_bucket)`. A pure function of its inputs: identical inputs produce
/// identical keys on every platform. Printed as 64 hex digits, which is
/// also the on-disk filename stem.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Compute the fingerprint for a sentence under a voice spec.
    ///
    /// Text is whitespace-trimmed and NFC-normalized first; fields are
    /// length-prefixed so no two input tuples collide by concatenation.
    pub fn compute(text: &str, spec: &VoiceSpec) -> Self {
        let normalized: String = text.trim().nfc().collect();

        let mut hasher = Sha256::new();
        for field in [
            normalized.as_str(),
            spec.engine.as_str(),
            spec.voice.as_str(),
        ] {
            hasher.update((field.len() as u64).to_le_bytes());
            hasher.update(field.as_bytes());
        }
        hasher.update(spec.speed_bucket().to_le_bytes());

        let digest = hasher.finalize();
        let mut key = [0u8; 32];
        key.copy_from_slice(&digest);
        Self(key)
    }

    /// Hex form; used as the L2 filename stem.
    pub fn to_hex(&self) -> String {
        let mut s = String::with_capacity(64);
        for b in self.0 {
            use std::fmt::Write as _;
            let _ = write!(s, "{b:02x}");
        }
        s
    }
}

impl std::fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Fingerprint({}…)", &self.to_hex()[..12])
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> VoiceSpec {
        VoiceSpec::new("piper", Some("amy"), 1.0)
    }

    #[test]
    fn identical_inputs_identical_keys() {
        let a = Fingerprint::compute("Hello world.", &spec());
        let b = Fingerprint::compute("Hello world.", &spec());
        assert_eq!(a, b);
        assert_eq!(a.to_hex(), b.to_hex());
    }

    #[test]
    fn text_changes_the_key() {
        let a = Fingerprint::compute("Hello world.", &spec());
        let b = Fingerprint::compute("Hello there.", &spec());
        assert_ne!(a, b);
    }

    #[test]
    fn engine_voice_and_speed_change_the_key() {
        let base = Fingerprint::compute("Hello.", &spec());
        let other_engine = Fingerprint::compute("Hello.", &VoiceSpec::new("gtts", Some("amy"), 1.0));
        let other_voice = Fingerprint::compute("Hello.", &VoiceSpec::new("piper", Some("joe"), 1.0));
        let other_speed = Fingerprint::compute("Hello.", &VoiceSpec::new("piper", Some("amy"), 1.5));
        assert_ne!(base, other_engine);
        assert_ne!(base, other_voice);
        assert_ne!(base, other_speed);
    }

    #[test]
    fn whitespace_trimming_before_hash() {
        let a = Fingerprint::compute("  Hello world.  ", &spec());
        let b = Fingerprint::compute("Hello world.", &spec());
        assert_eq!(a, b);
    }

    #[test]
    fn nfc_normalization_before_hash() {
        // "é" composed vs. "e" + combining acute.
        let a = Fingerprint::compute("caf\u{e9}", &spec());
        let b = Fingerprint::compute("cafe\u{301}", &spec());
        assert_eq!(a, b);
    }

    #[test]
    fn nearby_speeds_share_a_bucket() {
        let a = Fingerprint::compute("Hello.", &VoiceSpec::new("piper", None, 1.0));
        let b = Fingerprint::compute("Hello.", &VoiceSpec::new("piper", None, 1.0001));
        assert_eq!(a, b);
        let c = Fingerprint::compute("Hello.", &VoiceSpec::new("piper", None, 1.01));
        assert_ne!(a, c);
    }

    #[test]
    fn field_boundaries_do_not_collide() {
        // ("ab", "c") must differ from ("a", "bc").
        let a = Fingerprint::compute("ab", &VoiceSpec::new("c", None, 1.0));
        let b = Fingerprint::compute("a", &VoiceSpec::new("bc", None, 1.0));
        assert_ne!(a, b);
    }

    #[test]
    fn hex_is_64_lowercase_digits() {
        let hex = Fingerprint::compute("x", &spec()).to_hex();
        assert_eq!(hex.len(), 64);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
}
