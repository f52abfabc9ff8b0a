use anyhow::bail;
use std::fmt::Display;
use std::hash::Hasher;

/// A location on the linear keyspace, represented by a real number in the interval [0, 1).
///
/// Unlike a ring, the keyspace does not wrap around: the distance between two
/// positions is the plain absolute difference.
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, Copy)]
pub struct Position(f32);

impl Position {
    /// Callers guarantee the range; use [`TryFrom`] for untrusted values.
    pub fn new(position: f32) -> Self {
        debug_assert!(
            (0.0..1.0).contains(&position),
            "Position must be in the range [0, 1)"
        );
        Position(position)
    }

    /// Maps a key onto the keyspace.
    ///
    /// The first 24 bits of the blake3 digest of the UTF-8 key are scaled into
    /// [0, 1), so every key lands on an exactly representable `f32`.
    pub fn from_key(key: &str) -> Self {
        let digest = blake3::hash(key.as_bytes());
        let bytes = digest.as_bytes();
        let prefix = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) >> 8;
        Position(prefix as f32 / (1u32 << 24) as f32)
    }

    pub fn distance(&self, other: impl std::borrow::Borrow<Position>) -> f32 {
        (self.0 - other.borrow().0).abs()
    }

    /// Point halfway between both positions.
    pub fn midpoint(&self, other: impl std::borrow::Borrow<Position>) -> f32 {
        (self.0 + other.borrow().0) * 0.5
    }

    pub fn as_f32(&self) -> f32 {
        self.0
    }
}

impl Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl PartialEq for Position {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_bits() == other.0.to_bits()
    }
}

/// Equality compares bit patterns, which stays reflexive even for NaN.
impl Eq for Position {}

impl Ord for Position {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl PartialOrd for Position {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl std::hash::Hash for Position {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u32(self.0.to_bits());
    }
}

impl TryFrom<f32> for Position {
    type Error = anyhow::Error;

    fn try_from(value: f32) -> Result<Self, Self::Error> {
        if !(0.0..1.0).contains(&value) {
            bail!("expected a value in [0.0, 1.0), received {}", value)
        } else {
            Ok(Position(value))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_positions_are_stable_and_in_range() {
        for key in ["x", "", "hello world", "ключ"] {
            let pos = Position::from_key(key);
            assert_eq!(pos, Position::from_key(key));
            assert!((0.0..1.0).contains(&pos.as_f32()), "{key} -> {pos}");
        }
        assert_ne!(Position::from_key("a"), Position::from_key("b"));
    }

    #[test]
    fn distance_does_not_wrap() {
        let low = Position::new(0.1);
        let high = Position::new(0.9);
        assert!((low.distance(high) - 0.8).abs() < 1e-6);
        assert_eq!(low.distance(high), high.distance(low));
        assert_eq!(Position::new(0.25).midpoint(Position::new(0.75)), 0.5);
    }

    #[test]
    fn rejects_out_of_range() {
        assert!(Position::try_from(1.5).is_err());
        assert!(Position::try_from(1.0).is_err());
        assert!(Position::try_from(-0.25).is_err());
        assert!(Position::try_from(f32::NAN).is_err());
        assert_eq!(Position::try_from(0.0).unwrap().as_f32(), 0.0);
        assert_eq!(Position::try_from(0.5).unwrap().as_f32(), 0.5);
    }

    #[test]
    fn equality_is_reflexive_for_every_bit_pattern() {
        let odd = Position(f32::NAN);
        assert_eq!(odd, odd);
        assert_ne!(Position(0.0), Position(-0.0));
    }
}
