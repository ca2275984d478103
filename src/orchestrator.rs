use {
    super::*,
    challenge::{ChallengePoller, PollError},
    config::ConfigError,
    pool::{AddressBoard, PoolContext, WorkerPool},
    reward::RewardClient,
    snafu::ResultExt,
};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum OrchestratorError {
    #[snafu(display("mining is running, stop it first"))]
    Running,

    #[snafu(display("configuration update in progress"))]
    Configuring,

    #[snafu(display("no registered addresses to mine with"))]
    NoAddresses,

    #[snafu(display("invalid mining configuration"))]
    Config { source: ConfigError },

    #[snafu(display("failed to load the first challenge"))]
    Poll { source: PollError },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "lowercase")]
pub enum Lifecycle {
    #[display("stopped")]
    Stopped,
    #[display("configuring")]
    Configuring,
    #[display("running")]
    Running,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressView {
    pub index: usize,
    pub bech32: String,
    pub registered: bool,
    pub is_dev_fee: bool,
    pub solved_current_challenge: bool,
    pub total_solutions: u64,
}

struct Run {
    cancel: CancellationToken,
    pool: WorkerPool,
    poller: JoinHandle<()>,
}

/// Owns the mining lifecycle: registration, challenge polling and the worker pool.
pub struct Orchestrator {
    store: Arc<ConfigStore>,
    wallet: Arc<dyn Wallet>,
    ledger: Arc<dyn Ledger>,
    compute: ComputeClient,
    reward: RewardClient,
    tracker: Arc<ChallengeTracker>,
    pipeline: Arc<SubmissionPipeline>,
    stats: Arc<Stats>,
    bus: EventBus,
    poll_interval: Duration,
    lifecycle: Mutex<Lifecycle>,
    addresses: Mutex<Vec<Address>>,
    run: tokio::sync::Mutex<Option<Run>>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<ConfigStore>,
        wallet: Arc<dyn Wallet>,
        ledger: Arc<dyn Ledger>,
        compute: ComputeClient,
        reward: RewardClient,
        bus: EventBus,
        poll_interval: Duration,
    ) -> Self {
        let tracker = Arc::new(ChallengeTracker::new(Some(compute.clone())));
        let pipeline = Arc::new(SubmissionPipeline::new(
            reward.clone(),
            ledger.clone(),
            tracker.clone(),
            bus.clone(),
        ));

        let stats = Arc::new(Stats::new());
        let addresses = wallet.addresses();
        stats.set_addresses(&addresses);

        Self {
            store,
            wallet,
            ledger,
            compute,
            reward,
            tracker,
            pipeline,
            stats,
            bus,
            poll_interval,
            lifecycle: Mutex::new(Lifecycle::Stopped),
            addresses: Mutex::new(addresses),
            run: tokio::sync::Mutex::new(None),
        }
    }

    pub fn lifecycle(&self) -> Lifecycle {
        *self.lifecycle.lock()
    }

    pub fn config(&self) -> MiningConfig {
        self.store.get()
    }

    pub fn stats(&self) -> &Arc<Stats> {
        &self.stats
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn tracker(&self) -> &Arc<ChallengeTracker> {
        &self.tracker
    }

    pub fn pipeline(&self) -> &Arc<SubmissionPipeline> {
        &self.pipeline
    }

    pub async fn start(&self) -> Result<(), OrchestratorError> {
        let mut run = self.run.lock().await;

        {
            let mut lifecycle = self.lifecycle.lock();
            match *lifecycle {
                Lifecycle::Running => return RunningSnafu.fail(),
                Lifecycle::Configuring => return ConfiguringSnafu.fail(),
                Lifecycle::Stopped => *lifecycle = Lifecycle::Running,
            }
        }

        match self.launch().await {
            Ok(launched) => {
                *run = Some(launched);
                self.bus
                    .emit(MiningEvent::status(Lifecycle::Running.to_string(), "Mining started"));
                Ok(())
            }
            Err(err) => {
                *self.lifecycle.lock() = Lifecycle::Stopped;
                self.bus.emit(MiningEvent::error(err.to_string(), None));
                Err(err)
            }
        }
    }

    async fn launch(&self) -> Result<Run, OrchestratorError> {
        let config = self.store.get();
        config.validate().context(ConfigSnafu)?;

        self.bus
            .emit(MiningEvent::status("starting", "Registering addresses"));

        if !self.compute.health_check().await {
            warn!("Hash server at {} is not healthy", self.compute.url());
        }

        let addresses = self.register().await;
        self.stats.set_addresses(&addresses);
        *self.addresses.lock() = addresses.clone();

        snafu::ensure!(
            addresses.iter().any(|address| address.registered),
            NoAddressesSnafu
        );

        let receipts = self.ledger.receipts().await.unwrap_or_else(|err| {
            warn!("Failed to read receipts: {err:#}");
            Vec::new()
        });

        let board = Arc::new(AddressBoard::new(addresses, &receipts));

        let mut poller = ChallengePoller::new(
            self.tracker.clone(),
            self.reward.clone(),
            self.compute.clone(),
            self.poll_interval,
            self.bus.clone(),
        );

        match poller.poll_once().await {
            Ok(Some(active)) => info!("Mining challenge {} (epoch {})", active.id(), active.epoch),
            Ok(None) => info!("Waiting for an active challenge"),
            Err(err @ PollError::Reinit { .. }) => return Err(err).context(PollSnafu),
            Err(err) => warn!("First challenge poll failed: {err}"),
        }

        let cancel = CancellationToken::new();

        let ctx = PoolContext {
            compute: self.compute.clone(),
            tracker: self.tracker.clone(),
            pipeline: self.pipeline.clone(),
            bus: self.bus.clone(),
        };

        let pool = WorkerPool::start(&ctx, &config, board, &cancel);
        let poller = tokio::spawn(poller.run(cancel.clone()));

        Ok(Run {
            cancel,
            pool,
            poller,
        })
    }

    /// Register every address not yet registered in this process. Failures
    /// leave the address unregistered so it is never assigned.
    async fn register(&self) -> Vec<Address> {
        let mut addresses = self.addresses.lock().clone();

        let total = addresses
            .iter()
            .filter(|address| !address.registered)
            .count();

        if total == 0 {
            return addresses;
        }

        info!("Registering {total} addresses");

        let terms = match self.reward.terms().await {
            Ok(terms) => Some(terms.message),
            Err(err) => {
                warn!("Failed to fetch terms: {err}");
                None
            }
        };

        for (current, address) in addresses
            .iter_mut()
            .filter(|address| !address.registered)
            .enumerate()
        {
            let result = match &terms {
                Some(message) => self.register_one(address, message).await,
                None => Err(anyhow!("terms and conditions unavailable")),
            };

            let (success, message) = match result {
                Ok(()) => {
                    address.registered = true;
                    (true, "registered".to_string())
                }
                Err(err) => {
                    warn!(
                        address = short(&address.bech32),
                        "Registration failed: {err:#}"
                    );
                    (false, format!("{err:#}"))
                }
            };

            self.bus.emit(MiningEvent::RegistrationProgress {
                current: current + 1,
                total,
                address: address.bech32.clone(),
                success,
                message,
            });
        }

        addresses
    }

    async fn register_one(&self, address: &Address, message: &str) -> Result {
        let signature = self.wallet.sign(address.index, message)?;

        self.reward
            .register(&address.bech32, &signature.signature, &signature.public_key)
            .await?;

        Ok(())
    }

    /// Stop the pool and wait for it. Returns false if nothing was running.
    pub async fn stop(&self) -> bool {
        let Some(run) = self.run.lock().await.take() else {
            return false;
        };

        run.cancel.cancel();
        run.pool.stop().await;

        if let Err(err) = run.poller.await {
            error!("Challenge poller failed: {err}");
        }

        *self.lifecycle.lock() = Lifecycle::Stopped;

        self.bus
            .emit(MiningEvent::status(Lifecycle::Stopped.to_string(), "Mining stopped"));

        info!("Mining stopped");

        true
    }

    pub fn update_configuration(
        &self,
        update: &ConfigUpdate,
    ) -> Result<MiningConfig, OrchestratorError> {
        {
            let mut lifecycle = self.lifecycle.lock();
            match *lifecycle {
                Lifecycle::Running => return RunningSnafu.fail(),
                Lifecycle::Configuring => return ConfiguringSnafu.fail(),
                Lifecycle::Stopped => *lifecycle = Lifecycle::Configuring,
            }
        }

        let result = self.store.update(update).context(ConfigSnafu);

        *self.lifecycle.lock() = Lifecycle::Stopped;

        if let Ok(config) = &result {
            info!("Saved mining configuration to {}", self.store.path().display());
            debug!("{config:?}");
        }

        result
    }

    pub async fn addresses_view(&self) -> Vec<AddressView> {
        let receipts = self.ledger.receipts().await.unwrap_or_else(|err| {
            warn!("Failed to read receipts: {err:#}");
            Vec::new()
        });

        let current = self.tracker.current();

        let mut totals = HashMap::<&str, u64>::new();
        let mut solved = HashSet::<&str>::new();

        for receipt in &receipts {
            *totals.entry(receipt.address.as_str()).or_default() += 1;

            if current
                .as_ref()
                .is_some_and(|active| active.id().as_str() == receipt.challenge_id)
            {
                solved.insert(receipt.address.as_str());
            }
        }

        self.addresses
            .lock()
            .iter()
            .map(|address| AddressView {
                index: address.index,
                bech32: address.bech32.clone(),
                registered: address.registered,
                is_dev_fee: address.is_dev_fee,
                solved_current_challenge: solved.contains(address.bech32.as_str()),
                total_solutions: totals
                    .get(address.bech32.as_str())
                    .copied()
                    .unwrap_or_default(),
            })
            .collect()
    }
}
