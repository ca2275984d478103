use super::*;

/// Hash input for one nonce:
/// `nonce ‖ address ‖ challenge_id ‖ difficulty ‖ no_pre_mine ‖ latest_submission ‖ no_pre_mine_hour`,
/// with the nonce as 16 lowercase hex digits and the difficulty as 8 uppercase hex digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Display)]
pub struct Preimage(String);

impl Preimage {
    pub fn new(nonce: Nonce, address: &str, challenge: &Challenge) -> Self {
        let mut preimage = String::with_capacity(
            NONCE_HEX_LEN
                + address.len()
                + challenge.challenge_id.as_str().len()
                + 8
                + challenge.no_pre_mine.len()
                + challenge.latest_submission.len()
                + challenge.no_pre_mine_hour.len(),
        );

        preimage.push_str(&nonce.to_string());
        preimage.push_str(address);
        preimage.push_str(challenge.challenge_id.as_str());
        preimage.push_str(&challenge.difficulty.to_string());
        preimage.push_str(&challenge.no_pre_mine);
        preimage.push_str(&challenge.latest_submission);
        preimage.push_str(&challenge.no_pre_mine_hour);

        Self(preimage)
    }

    /// Rewrites the nonce prefix in place, leaving the rest of the preimage untouched.
    pub fn with_nonce(mut self, nonce: Nonce) -> Self {
        self.0.replace_range(..NONCE_HEX_LEN, &nonce.to_string());
        self
    }

    pub fn nonce(&self) -> Result<Nonce> {
        self.0.get(..NONCE_HEX_LEN).unwrap_or(&self.0).parse()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl AsRef<str> for Preimage {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
