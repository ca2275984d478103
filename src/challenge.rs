use {
    super::*,
    reward::{RewardClient, RewardError},
    scavenge::ChallengeCode,
    snafu::{OptionExt, ResultExt},
};

/// A challenge together with the epoch it was observed in.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveChallenge {
    pub challenge: Challenge,
    pub epoch: u64,
    pub observed_at: DateTime<Utc>,
}

impl ActiveChallenge {
    pub fn id(&self) -> &ChallengeId {
        &self.challenge.challenge_id
    }
}

/// Current challenge and epoch. Epoch 0 means no challenge was seen yet.
pub struct ChallengeTracker {
    epoch: AtomicU64,
    last: Mutex<Option<Arc<ActiveChallenge>>>,
    tx: watch::Sender<Option<Arc<ActiveChallenge>>>,
    compute: Option<ComputeClient>,
}

impl ChallengeTracker {
    pub fn new(compute: Option<ComputeClient>) -> Self {
        let (tx, _) = watch::channel(None);

        Self {
            epoch: AtomicU64::new(0),
            last: Mutex::new(None),
            tx,
            compute,
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    pub fn current(&self) -> Option<Arc<ActiveChallenge>> {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<ActiveChallenge>>> {
        self.tx.subscribe()
    }

    /// Record `challenge` as current. Returns true when this started a new epoch.
    pub fn observe(&self, challenge: Challenge) -> bool {
        let mut last = self.last.lock();

        if let Some(previous) = last.as_ref()
            && previous.challenge.challenge_id == challenge.challenge_id
        {
            // Same round coming back after a clear.
            let previous = previous.clone();
            self.tx.send_if_modified(|current| {
                if current.is_none() {
                    *current = Some(previous);
                    true
                } else {
                    false
                }
            });
            return false;
        }

        let epoch = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        let had_previous = last.is_some();

        let active = Arc::new(ActiveChallenge {
            challenge,
            epoch,
            observed_at: Utc::now(),
        });

        info!(
            challenge = %active.id(),
            epoch,
            difficulty = %active.challenge.difficulty,
            "New challenge"
        );

        *last = Some(active.clone());
        self.tx.send_replace(Some(active));
        drop(last);

        if had_previous && let Some(compute) = self.compute.clone() {
            tokio::spawn(async move { compute.kill_workers().await });
        }

        true
    }

    /// Upstream has no active round. The epoch is left alone.
    pub fn clear(&self) -> bool {
        self.tx.send_if_modified(|current| current.take().is_some())
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum PollError {
    #[snafu(display("failed to fetch challenge"))]
    Fetch { source: RewardError },

    #[snafu(display("reward API reported an active round without a challenge"))]
    MissingChallenge,

    #[snafu(display("failed to initialize hash server for challenge {challenge_id}"))]
    Reinit {
        challenge_id: ChallengeId,
        source: ComputeError,
    },
}

/// Feeds the tracker from `GET /challenge`, re-initializing the hash server
/// whenever the seed changes.
pub struct ChallengePoller {
    tracker: Arc<ChallengeTracker>,
    reward: RewardClient,
    compute: ComputeClient,
    interval: Duration,
    bus: EventBus,
    seed: Option<String>,
}

impl ChallengePoller {
    pub fn new(
        tracker: Arc<ChallengeTracker>,
        reward: RewardClient,
        compute: ComputeClient,
        interval: Duration,
        bus: EventBus,
    ) -> Self {
        Self {
            tracker,
            reward,
            compute,
            interval,
            bus,
            seed: None,
        }
    }

    pub async fn poll_once(&mut self) -> Result<Option<Arc<ActiveChallenge>>, PollError> {
        let response = self.reward.challenge().await.context(FetchSnafu)?;

        match response.code {
            ChallengeCode::Active => {
                let challenge = response.challenge.context(MissingChallengeSnafu)?;

                if self.seed.as_deref() != Some(challenge.no_pre_mine.as_str()) {
                    self.compute
                        .init(&challenge.no_pre_mine)
                        .await
                        .context(ReinitSnafu {
                            challenge_id: challenge.challenge_id.clone(),
                        })?;
                    self.seed = Some(challenge.no_pre_mine.clone());
                }

                self.tracker.observe(challenge);

                Ok(self.tracker.current())
            }
            code @ (ChallengeCode::Before | ChallengeCode::After) => {
                if self.tracker.clear() {
                    info!("Challenge round ended, pausing");
                }

                match (code, response.starts_at) {
                    (ChallengeCode::Before, Some(starts_at)) => {
                        info!("Mining has not started yet, starts at {starts_at}");
                    }
                    _ => debug!("No active challenge ({code})"),
                }

                Ok(None)
            }
        }
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // The caller already polled once.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(err) = self.poll_once().await {
                        warn!("Challenge poll failed: {err}");
                        self.bus.emit(MiningEvent::error(err.to_string(), None));
                    }
                }
            }
        }

        debug!("Challenge poller stopped");
    }
}
