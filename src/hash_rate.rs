use {
    super::*,
    std::{
        iter::Sum,
        ops::{Add, AddAssign},
    },
};

const SI_PREFIXES: &[(&str, f64)] = &[
    ("", 1.0),
    ("K", 1e3),
    ("M", 1e6),
    ("G", 1e9),
    ("T", 1e12),
];

/// Hashes per second. Serialized as a plain number, displayed with an SI prefix.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Deserialize, Serialize)]
#[serde(transparent)]
pub struct HashRate(pub f64);

impl HashRate {
    pub const ZERO: Self = Self(0.0);

    /// Rate for `hashes` computed over `elapsed`. Zero below one millisecond.
    pub fn from_count(hashes: u64, elapsed: Duration) -> Self {
        if elapsed < Duration::from_millis(1) {
            return Self::ZERO;
        }

        Self(hashes as f64 / elapsed.as_secs_f64())
    }

    pub fn as_f64(self) -> f64 {
        self.0
    }
}

impl fmt::Display for HashRate {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let value = self.0;

        if value == 0.0 {
            return write!(f, "0 H/s");
        }

        let (prefix, divisor) = SI_PREFIXES
            .iter()
            .rev()
            .find(|(_, div)| value.abs() >= *div)
            .unwrap_or(&SI_PREFIXES[0]);

        let scaled = value / divisor;
        let s = format!("{scaled:.3}");
        let trimmed = s.trim_end_matches('0').trim_end_matches('.');

        write!(f, "{trimmed} {prefix}H/s")
    }
}

impl Add for HashRate {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl AddAssign for HashRate {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl Sum for HashRate {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, Add::add)
    }
}
