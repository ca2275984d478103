use {
    super::*,
    anyhow::Context,
    dashmap::mapref::entry::Entry,
    ledger::timestamp,
    reward::{RewardClient, RewardError},
    worker::Candidate,
};

/// Terminal result of one submission attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Accepted(Receipt),
    Rejected { status: u16, message: String },
    Failed { status: Option<u16>, message: String },
    Duplicate,
    Stale,
}

impl Outcome {
    pub const ACCEPTED: &'static str = "accepted";
    pub const REJECTED: &'static str = "rejected";
    pub const FAILED: &'static str = "failed";
    pub const DUPLICATE: &'static str = "duplicate";
    pub const STALE: &'static str = "stale";

    pub fn label(&self) -> &'static str {
        match self {
            Self::Accepted(_) => Self::ACCEPTED,
            Self::Rejected { .. } => Self::REJECTED,
            Self::Failed { .. } => Self::FAILED,
            Self::Duplicate => Self::DUPLICATE,
            Self::Stale => Self::STALE,
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }

    /// Upstream gave a verdict, or the attempt was recorded for a later retry.
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            Self::Accepted(_) | Self::Rejected { .. } | Self::Failed { .. }
        )
    }

    fn message(&self) -> Option<String> {
        match self {
            Self::Accepted(_) => None,
            Self::Rejected { message, .. } | Self::Failed { message, .. } => Some(message.clone()),
            Self::Duplicate => Some("address already submitted for this challenge".into()),
            Self::Stale => Some("challenge changed before submission".into()),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RetrySummary {
    pub succeeded: usize,
    pub failed: usize,
}

/// Removes the in-flight marker when the submission finishes.
struct InFlight<'a> {
    map: &'a DashMap<(String, ChallengeId), ()>,
    key: (String, ChallengeId),
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.map.remove(&self.key);
    }
}

/// Submits candidates to the reward API and records every result.
pub struct SubmissionPipeline {
    reward: RewardClient,
    ledger: Arc<dyn Ledger>,
    tracker: Arc<ChallengeTracker>,
    bus: EventBus,
    in_flight: DashMap<(String, ChallengeId), ()>,
    settled: DashMap<(String, ChallengeId), ()>,
}

impl SubmissionPipeline {
    pub fn new(
        reward: RewardClient,
        ledger: Arc<dyn Ledger>,
        tracker: Arc<ChallengeTracker>,
        bus: EventBus,
    ) -> Self {
        Self {
            reward,
            ledger,
            tracker,
            bus,
            in_flight: DashMap::new(),
            settled: DashMap::new(),
        }
    }

    pub fn ledger(&self) -> &Arc<dyn Ledger> {
        &self.ledger
    }

    pub async fn submit(&self, candidate: &Candidate) -> Outcome {
        let outcome = self.attempt(candidate).await;

        match &outcome {
            Outcome::Accepted(_) => info!(
                address = short(&candidate.address),
                challenge = %candidate.challenge_id,
                nonce = %candidate.nonce,
                "Solution accepted"
            ),
            Outcome::Rejected { status, message } => warn!(
                address = short(&candidate.address),
                challenge = %candidate.challenge_id,
                "Solution rejected ({status}): {message}"
            ),
            Outcome::Failed { message, .. } => warn!(
                address = short(&candidate.address),
                challenge = %candidate.challenge_id,
                "Solution submission failed: {message}"
            ),
            Outcome::Duplicate | Outcome::Stale => debug!(
                address = short(&candidate.address),
                challenge = %candidate.challenge_id,
                "Solution dropped as {}",
                outcome.label()
            ),
        }

        self.bus.emit(MiningEvent::SolutionResult {
            address: candidate.address.clone(),
            address_index: candidate.address_index,
            challenge_id: candidate.challenge_id.clone(),
            nonce: candidate.nonce,
            outcome: outcome.label().into(),
            success: outcome.is_accepted(),
            message: outcome.message(),
            is_dev_fee: candidate.is_dev_fee,
        });

        outcome
    }

    async fn attempt(&self, candidate: &Candidate) -> Outcome {
        if self.tracker.epoch() != candidate.epoch {
            return Outcome::Stale;
        }

        let key = (candidate.address.clone(), candidate.challenge_id.clone());

        match self.in_flight.entry(key.clone()) {
            Entry::Occupied(_) => return Outcome::Duplicate,
            Entry::Vacant(entry) => {
                entry.insert(());
            }
        }

        let in_flight = InFlight {
            map: &self.in_flight,
            key,
        };

        if candidate.once_per_challenge && self.settled.contains_key(&in_flight.key) {
            return Outcome::Duplicate;
        }

        let outcome = self.send(candidate).await;

        if outcome.is_final() {
            self.settled
                .retain(|(_, challenge_id), _| *challenge_id == candidate.challenge_id);
            self.settled.insert(in_flight.key.clone(), ());
        }

        outcome
    }

    async fn send(&self, candidate: &Candidate) -> Outcome {

        self.bus.emit(MiningEvent::SolutionSubmit {
            address: candidate.address.clone(),
            address_index: candidate.address_index,
            challenge_id: candidate.challenge_id.clone(),
            nonce: candidate.nonce,
            is_dev_fee: candidate.is_dev_fee,
        });

        match self
            .reward
            .submit_solution(&candidate.address, &candidate.challenge_id, candidate.nonce)
            .await
        {
            Ok(solution) => {
                let receipt = Receipt {
                    ts: timestamp(Utc::now()),
                    address: candidate.address.clone(),
                    address_index: Some(candidate.address_index),
                    challenge_id: candidate.challenge_id.to_string(),
                    nonce: candidate.nonce.to_string(),
                    hash: candidate.hash.clone(),
                    crypto_receipt: Some(solution.crypto_receipt),
                    is_dev_fee: candidate.is_dev_fee,
                };

                if let Err(err) = self.ledger.log_receipt(&receipt).await {
                    error!("Failed to record receipt: {err:#}");
                }

                Outcome::Accepted(receipt)
            }
            Err(err) => {
                self.record_error(candidate, &err).await;

                if err.is_rejection()
                    && let Some(status) = err.status()
                {
                    Outcome::Rejected {
                        status,
                        message: err.reason(),
                    }
                } else {
                    Outcome::Failed {
                        status: err.status(),
                        message: err.reason(),
                    }
                }
            }
        }
    }

    async fn record_error(&self, candidate: &Candidate, err: &RewardError) {
        let entry = ErrorEntry {
            ts: timestamp(Utc::now()),
            address: candidate.address.clone(),
            address_index: Some(candidate.address_index),
            challenge_id: candidate.challenge_id.to_string(),
            nonce: candidate.nonce.to_string(),
            hash: candidate.hash.clone(),
            error: err.reason(),
            status: err.status(),
            response: err.response(),
        };

        if let Err(err) = self.ledger.log_error(&entry).await {
            error!("Failed to record submission error: {err:#}");
        }
    }

    /// Resubmit one recorded failure. On success the receipt is logged and
    /// the error entry removed.
    pub async fn retry(&self, entry: &ErrorEntry) -> Result<Receipt> {
        let challenge_id = entry
            .challenge_id
            .parse::<ChallengeId>()
            .context("invalid challenge id in error entry")?;

        let nonce = entry
            .nonce
            .parse::<Nonce>()
            .context("invalid nonce in error entry")?;

        let solution = self
            .reward
            .submit_solution(&entry.address, &challenge_id, nonce)
            .await
            .with_context(|| {
                format!(
                    "failed to resubmit nonce {nonce} for {} on challenge {challenge_id}",
                    short(&entry.address)
                )
            })?;

        let receipt = Receipt {
            ts: timestamp(Utc::now()),
            address: entry.address.clone(),
            address_index: entry.address_index,
            challenge_id: entry.challenge_id.clone(),
            nonce: entry.nonce.clone(),
            hash: entry.hash.clone(),
            crypto_receipt: Some(solution.crypto_receipt),
            is_dev_fee: false,
        };

        self.ledger.log_receipt(&receipt).await?;
        self.ledger
            .remove_error(&entry.address, &entry.challenge_id, &entry.nonce)
            .await?;

        info!(
            "Resubmitted nonce {nonce} for {} on challenge {challenge_id}",
            short(&entry.address)
        );

        Ok(receipt)
    }

    /// Resubmit every failure recorded within `window`, once per
    /// `(address, challenge_id, nonce)`.
    pub async fn retry_failed(&self, window: Duration) -> Result<RetrySummary> {
        let window = ChronoDuration::from_std(window).context("retry window out of range")?;
        let cutoff = Utc::now() - window;

        let mut seen = HashSet::new();
        let entries = self
            .ledger
            .errors()
            .await?
            .into_iter()
            .filter(|entry| entry.time().is_some_and(|time| time >= cutoff))
            .filter(|entry| {
                seen.insert((
                    entry.address.clone(),
                    entry.challenge_id.clone(),
                    entry.nonce.clone(),
                ))
            })
            .collect::<Vec<_>>();

        info!("Retrying {} failed submissions", entries.len());

        let mut summary = RetrySummary::default();

        for entry in &entries {
            match self.retry(entry).await {
                Ok(_) => summary.succeeded += 1,
                Err(err) => {
                    warn!("{err:#}");
                    summary.failed += 1;
                }
            }
        }

        Ok(summary)
    }
}
