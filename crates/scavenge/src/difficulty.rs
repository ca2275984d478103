use super::*;

/// Difficulty mask published with each challenge.
///
/// A hash meets the difficulty when the big-endian `u32` formed by its first
/// four bytes has no bit set outside the mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, DeserializeFromStr, SerializeDisplay)]
pub struct Difficulty(u32);

impl Difficulty {
    pub const EASIEST: Self = Self(u32::MAX);

    pub fn mask(self) -> u32 {
        self.0
    }

    pub fn is_met_by_prefix(self, prefix: u32) -> bool {
        (prefix | self.0) == self.0
    }

    /// Checks a hex-encoded hash. Hashes shorter than four bytes or with a
    /// malformed prefix never meet the difficulty.
    pub fn is_met_by(self, hash: &str) -> bool {
        let Some(prefix) = hash.get(..8) else {
            return false;
        };

        match u32::from_str_radix(prefix, 16) {
            Ok(value) => self.is_met_by_prefix(value),
            Err(_) => false,
        }
    }

    /// Number of leading zero bits every qualifying hash must carry.
    pub fn zero_bits(self) -> u32 {
        self.0.leading_zeros()
    }
}

impl From<u32> for Difficulty {
    fn from(mask: u32) -> Self {
        Self(mask)
    }
}

impl FromStr for Difficulty {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();

        if s.len() != 8 {
            return DifficultyLengthSnafu { input: s }.fail();
        }

        let mask = u32::from_str_radix(s, 16).context(DifficultyHexSnafu { input: s })?;

        Ok(Self(mask))
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:08X}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display() {
        let difficulty = "000FFFFF".parse::<Difficulty>().unwrap();
        assert_eq!(difficulty.mask(), 0x000F_FFFF);
        assert_eq!(difficulty.to_string(), "000FFFFF");
        assert_eq!("000fffff".parse::<Difficulty>().unwrap(), difficulty);
    }

    #[test]
    fn rejects_bad_input() {
        assert!("FFFF".parse::<Difficulty>().is_err());
        assert!("0000FFFFF".parse::<Difficulty>().is_err());
        assert!("0000ZZZZ".parse::<Difficulty>().is_err());
    }

    #[test]
    fn mask_rule() {
        let difficulty = Difficulty::from(0x0000_FFFF);

        assert!(difficulty.is_met_by("0000abcd00112233"));
        assert!(difficulty.is_met_by("00000000"));
        assert!(!difficulty.is_met_by("0001abcd00112233"));
        assert!(!difficulty.is_met_by("ffffffff"));
    }

    #[test]
    fn mask_with_holes() {
        let difficulty = Difficulty::from(0x00F0_FFFF);

        assert!(difficulty.is_met_by("00f01234"));
        assert!(!difficulty.is_met_by("000f1234"));
    }

    #[test]
    fn short_or_malformed_hash_never_meets() {
        let difficulty = Difficulty::EASIEST;

        assert!(!difficulty.is_met_by("ffff"));
        assert!(!difficulty.is_met_by("zzzzzzzz"));
        assert!(difficulty.is_met_by("ffffffff"));
    }

    #[test]
    fn zero_bits() {
        assert_eq!(Difficulty::from(0x0000_FFFF).zero_bits(), 16);
        assert_eq!(Difficulty::EASIEST.zero_bits(), 0);
    }

    #[test]
    fn serde_as_string() {
        let difficulty: Difficulty = serde_json::from_str("\"0000FFFF\"").unwrap();
        assert_eq!(difficulty.mask(), 0xFFFF);
        assert_eq!(serde_json::to_string(&difficulty).unwrap(), "\"0000FFFF\"");
    }
}
