use super::*;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, DeserializeFromStr, SerializeDisplay,
)]
pub struct Nonce(u64);

impl Nonce {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(self) -> u64 {
        self.0
    }

    pub fn checked_add(self, n: u64) -> Option<Self> {
        self.0.checked_add(n).map(Self)
    }
}

impl FromStr for Nonce {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() || s.len() > NONCE_HEX_LEN {
            return NonceLengthSnafu { input: s }.fail();
        }

        let value = u64::from_str_radix(s, 16).context(NonceHexSnafu { input: s })?;

        Ok(Self(value))
    }
}

impl fmt::Display for Nonce {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl From<u64> for Nonce {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<Nonce> for u64 {
    fn from(nonce: Nonce) -> u64 {
        nonce.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn some_nonces() {
        assert_eq!(Nonce::from(0x42).to_string(), "0000000000000042");
        assert_eq!(Nonce::from(u64::MAX).to_string(), "ffffffffffffffff");
        assert_eq!("42".parse::<Nonce>().unwrap(), Nonce::from(0x42));
        assert_eq!(
            "ffffffffffffffff".parse::<Nonce>().unwrap(),
            Nonce::from(u64::MAX)
        );
    }

    #[test]
    fn rejects_bad_nonces() {
        assert!("".parse::<Nonce>().is_err());
        assert!("00000000000000000".parse::<Nonce>().is_err());
        assert!("xyz".parse::<Nonce>().is_err());
    }

    #[test]
    fn checked_add_overflows() {
        assert_eq!(Nonce::from(1).checked_add(1), Some(Nonce::from(2)));
        assert_eq!(Nonce::from(u64::MAX).checked_add(1), None);
    }
}
