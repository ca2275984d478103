use {super::*, ledger::timestamp};

#[derive(Debug, Parser)]
pub(crate) struct Retry {
    #[arg(long, help = "Resubmit the solution found for <ADDRESS>.")]
    pub(crate) address: String,
    #[arg(long, help = "Resubmit against challenge <CHALLENGE_ID>.")]
    pub(crate) challenge_id: ChallengeId,
    #[arg(long, help = "Resubmit hex <NONCE>.")]
    pub(crate) nonce: Nonce,
    #[arg(
        long,
        help = "Record <HASH> with the receipt when no failure was logged for this solution."
    )]
    pub(crate) hash: Option<String>,
}

impl Retry {
    pub(crate) async fn run(self, settings: Settings) -> Result {
        let pipeline = retry_pipeline(&settings)?;

        let nonce = self.nonce.to_string();

        let recorded = pipeline
            .ledger()
            .errors()
            .await?
            .into_iter()
            .rev()
            .find(|entry| entry.matches(&self.address, self.challenge_id.as_str(), &nonce));

        let entry = match (recorded, self.hash) {
            (Some(entry), _) => entry,
            (None, Some(hash)) => ErrorEntry {
                ts: timestamp(Utc::now()),
                address: self.address,
                address_index: None,
                challenge_id: self.challenge_id.to_string(),
                nonce,
                hash,
                error: "manual retry".into(),
                status: None,
                response: None,
            },
            (None, None) => bail!(
                "no failed submission recorded for nonce {nonce} on challenge {}; pass --hash to submit it anyway",
                self.challenge_id
            ),
        };

        print_json(&pipeline.retry(&entry).await?)
    }
}
