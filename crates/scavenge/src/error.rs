use super::*;

pub type Result<T, E = ParseError> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ParseError {
    #[snafu(display("invalid difficulty `{input}`: expected 8 hex digits"))]
    DifficultyLength { input: String },

    #[snafu(display("invalid difficulty `{input}`: {source}"))]
    DifficultyHex {
        input: String,
        source: std::num::ParseIntError,
    },

    #[snafu(display("invalid nonce `{input}`: {source}"))]
    NonceHex {
        input: String,
        source: std::num::ParseIntError,
    },

    #[snafu(display("invalid nonce `{input}`: expected at most 16 hex digits"))]
    NonceLength { input: String },

    #[snafu(display("challenge id must not be empty"))]
    EmptyChallengeId,
}
