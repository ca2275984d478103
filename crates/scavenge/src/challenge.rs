use super::*;

#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Display, DeserializeFromStr, SerializeDisplay,
)]
pub struct ChallengeId(String);

impl ChallengeId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for ChallengeId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() {
            return EmptyChallengeIdSnafu.fail();
        }

        Ok(Self(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    pub challenge_id: ChallengeId,
    pub difficulty: Difficulty,
    pub no_pre_mine: String,
    pub latest_submission: String,
    pub no_pre_mine_hour: String,
}

impl Challenge {
    pub fn preimage(&self, nonce: Nonce, address: &str) -> Preimage {
        Preimage::new(nonce, address, self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeCode {
    #[display("before")]
    Before,
    #[display("active")]
    Active,
    #[display("after")]
    After,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChallengeResponse {
    pub code: ChallengeCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub challenge: Option<Challenge>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starts_at: Option<String>,
}

impl ChallengeResponse {
    /// The challenge, if upstream reports an active round.
    pub fn active(self) -> Option<Challenge> {
        match self.code {
            ChallengeCode::Active => self.challenge,
            ChallengeCode::Before | ChallengeCode::After => None,
        }
    }
}
