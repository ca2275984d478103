use {
    derive_more::Display,
    error::{
        DifficultyHexSnafu, DifficultyLengthSnafu, EmptyChallengeIdSnafu, NonceHexSnafu,
        NonceLengthSnafu,
    },
    serde::{Deserialize, Serialize},
    serde_json::Value,
    serde_with::{DeserializeFromStr, SerializeDisplay},
    snafu::{ResultExt, Snafu},
    std::{
        fmt::{self, Formatter},
        str::FromStr,
    },
};

pub use {
    challenge::{Challenge, ChallengeCode, ChallengeId, ChallengeResponse},
    compute::{
        AshConfig, BatchHashRequest, BatchHashResponse, HashRequest, HashResponse, HealthResponse,
        InitRequest, InitResponse, KillWorkersResponse,
    },
    difficulty::Difficulty,
    error::{ParseError, Result},
    nonce::Nonce,
    preimage::Preimage,
    reward::{ApiErrorBody, RegistrationReceipt, SolutionReceipt, TermsResponse},
};

mod challenge;
mod compute;
mod difficulty;
mod error;
mod nonce;
mod preimage;
mod reward;

/// Length of a hex-encoded nonce at the start of every preimage.
pub const NONCE_HEX_LEN: usize = 16;
