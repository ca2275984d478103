use {
    super::*,
    grouping::Group,
    worker::{Assignment, Solved, Worker},
};

#[derive(Debug, Default)]
struct Board {
    epoch: u64,
    claimed: HashSet<usize>,
    solved: HashMap<ChallengeId, HashSet<usize>>,
}

/// Which addresses are claimed by a group or already solved, per challenge.
#[derive(Debug)]
pub(crate) struct AddressBoard {
    addresses: Vec<Address>,
    inner: Mutex<Board>,
}

impl AddressBoard {
    /// Seed solved addresses from previously recorded receipts.
    pub(crate) fn new(mut addresses: Vec<Address>, receipts: &[Receipt]) -> Self {
        addresses.sort_by_key(|address| address.index);

        let by_bech32 = addresses
            .iter()
            .map(|address| (address.bech32.as_str(), address.index))
            .collect::<HashMap<_, _>>();

        let mut solved = HashMap::<ChallengeId, HashSet<usize>>::new();
        for receipt in receipts {
            let (Some(index), Ok(challenge_id)) = (
                by_bech32.get(receipt.address.as_str()),
                receipt.challenge_id.parse::<ChallengeId>(),
            ) else {
                continue;
            };

            solved.entry(challenge_id).or_default().insert(*index);
        }

        Self {
            addresses,
            inner: Mutex::new(Board {
                solved,
                ..Default::default()
            }),
        }
    }

    pub(crate) fn eligible(&self) -> usize {
        self.addresses
            .iter()
            .filter(|address| address.registered)
            .count()
    }

    /// Claim the lowest-index registered address nobody is mining or has solved.
    pub(crate) fn claim(&self, challenge: &ActiveChallenge) -> Option<Address> {
        let mut board = self.inner.lock();

        if board.epoch != challenge.epoch {
            board.epoch = challenge.epoch;
            board.claimed.clear();
        }

        let solved = board.solved.get(challenge.id()).cloned().unwrap_or_default();

        let address = self.addresses.iter().find(|address| {
            address.registered
                && !solved.contains(&address.index)
                && !board.claimed.contains(&address.index)
        })?;

        board.claimed.insert(address.index);

        Some(address.clone())
    }

    pub(crate) fn release(&self, challenge: &ActiveChallenge, index: usize) {
        let mut board = self.inner.lock();
        if board.epoch == challenge.epoch {
            board.claimed.remove(&index);
        }
    }

    pub(crate) fn mark_solved(&self, challenge_id: &ChallengeId, index: usize) {
        self.inner
            .lock()
            .solved
            .entry(challenge_id.clone())
            .or_default()
            .insert(index);
    }

    #[cfg(test)]
    pub(crate) fn is_solved(&self, challenge_id: &ChallengeId, index: usize) -> bool {
        self.inner
            .lock()
            .solved
            .get(challenge_id)
            .is_some_and(|solved| solved.contains(&index))
    }
}

/// Shared handles the pool hands to every worker.
#[derive(Clone)]
pub(crate) struct PoolContext {
    pub(crate) compute: ComputeClient,
    pub(crate) tracker: Arc<ChallengeTracker>,
    pub(crate) pipeline: Arc<SubmissionPipeline>,
    pub(crate) bus: EventBus,
}

/// Hands addresses to one group's workers.
struct GroupDriver {
    group: Group,
    board: Arc<AddressBoard>,
    tx: watch::Sender<Option<Assignment>>,
    generation: u64,
}

impl GroupDriver {
    fn current(&self) -> Option<Assignment> {
        self.tx.borrow().clone()
    }

    fn publish(&mut self, next: Option<Assignment>) {
        self.tx.send_replace(next);
    }

    fn claim(&mut self, challenge: Arc<ActiveChallenge>) -> Option<Assignment> {
        let Some(address) = self.board.claim(&challenge) else {
            info!(
                group = self.group.id,
                challenge = %challenge.id(),
                "No unsolved addresses left, waiting for the next challenge"
            );
            return None;
        };

        self.generation += 1;

        info!(
            group = self.group.id,
            address = short(&address.bech32),
            challenge = %challenge.id(),
            "Assigned {} workers to address {}",
            self.group.size(),
            address.index
        );

        Some(Assignment {
            address,
            challenge,
            generation: self.generation,
        })
    }

    fn on_challenge(&mut self, active: Option<Arc<ActiveChallenge>>) {
        let current = self.current();

        if let (Some(current), Some(active)) = (&current, &active)
            && current.challenge.epoch == active.epoch
        {
            return;
        }

        if let Some(current) = &current {
            self.board.release(&current.challenge, current.address.index);
        }

        match active {
            Some(active) => {
                let next = self.claim(active);
                self.publish(next);
            }
            None if current.is_some() => self.publish(None),
            None => {}
        }
    }

    fn on_solved(&mut self, solved: Solved) {
        let Some(current) = self.current() else {
            return;
        };

        if current.generation != solved.generation {
            return;
        }

        self.board
            .mark_solved(current.challenge.id(), solved.address_index);

        let next = self.claim(current.challenge.clone());
        self.publish(next);
    }

    async fn run(
        mut self,
        mut challenges: watch::Receiver<Option<Arc<ActiveChallenge>>>,
        mut solved: mpsc::UnboundedReceiver<Solved>,
        cancel: CancellationToken,
    ) {
        loop {
            let active = challenges.borrow_and_update().clone();
            self.on_challenge(active);

            tokio::select! {
                _ = cancel.cancelled() => break,
                changed = challenges.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                Some(message) = solved.recv() => self.on_solved(message),
            }
        }

        if let Some(current) = self.current() {
            self.board.release(&current.challenge, current.address.index);
        }
    }
}

/// Announce each new epoch once.
async fn announce(
    mut challenges: watch::Receiver<Option<Arc<ActiveChallenge>>>,
    bus: EventBus,
    addresses: usize,
    workers: usize,
    cancel: CancellationToken,
) {
    let mut announced = 0;

    loop {
        if let Some(active) = challenges.borrow_and_update().clone()
            && active.epoch > announced
        {
            announced = active.epoch;
            bus.emit(MiningEvent::MiningStart {
                challenge_id: active.id().clone(),
                epoch: active.epoch,
                difficulty: active.challenge.difficulty,
                addresses,
                workers,
            });
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = challenges.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
}

/// Worker tasks and the group drivers that feed them.
pub(crate) struct WorkerPool {
    cancel: CancellationToken,
    tasks: JoinSet<()>,
}

impl WorkerPool {
    pub(crate) fn start(
        ctx: &PoolContext,
        config: &MiningConfig,
        board: Arc<AddressBoard>,
        cancel: &CancellationToken,
    ) -> Self {
        let cancel = cancel.child_token();
        let mut tasks = JoinSet::new();
        let groups = grouping::plan(config);

        info!(
            "Starting {} workers in {} groups, batch size {}",
            config.worker_threads,
            groups.len(),
            config.batch_size()
        );

        tasks.spawn(announce(
            ctx.tracker.subscribe(),
            ctx.bus.clone(),
            board.eligible(),
            config.worker_threads,
            cancel.clone(),
        ));

        for group in groups {
            let (tx, rx) = watch::channel(None);
            let (solved_tx, solved_rx) = mpsc::unbounded_channel();

            for (rank, id) in group.workers.clone().enumerate() {
                let worker = Worker {
                    id,
                    rank,
                    group_size: group.size(),
                    batch_size: config.batch_size(),
                    continue_after_solution: config.continue_after_solution,
                    assignments: rx.clone(),
                    solved: solved_tx.clone(),
                    compute: ctx.compute.clone(),
                    tracker: ctx.tracker.clone(),
                    pipeline: ctx.pipeline.clone(),
                    bus: ctx.bus.clone(),
                };

                tasks.spawn(worker.run(cancel.clone()));
            }

            let driver = GroupDriver {
                group,
                board: board.clone(),
                tx,
                generation: 0,
            };

            tasks.spawn(driver.run(ctx.tracker.subscribe(), solved_rx, cancel.clone()));
        }

        Self { cancel, tasks }
    }

    /// Cancel every task and wait for in-flight work to unwind.
    pub(crate) async fn stop(mut self) {
        self.cancel.cancel();

        while let Some(result) = self.tasks.join_next().await {
            if let Err(err) = result {
                error!("Worker task failed: {err}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::testing::{FakeCompute, FakeReward, address, challenge},
        pretty_assertions::assert_eq,
        reward::RewardClient,
    };

    fn active(id: &str, epoch: u64) -> ActiveChallenge {
        ActiveChallenge {
            challenge: challenge(id, "0000FFFF"),
            epoch,
            observed_at: Utc::now(),
        }
    }

    fn receipt(address: &str, challenge_id: &str) -> Receipt {
        Receipt {
            ts: "2025-11-02T10:00:00.000Z".into(),
            address: address.into(),
            address_index: None,
            challenge_id: challenge_id.into(),
            nonce: "00".into(),
            hash: "00".into(),
            crypto_receipt: None,
            is_dev_fee: false,
        }
    }

    #[test]
    fn claims_in_index_order() {
        let board = AddressBoard::new(vec![address(2), address(0), address(1)], &[]);
        let challenge = active("a", 1);

        assert_eq!(board.claim(&challenge).unwrap().index, 0);
        assert_eq!(board.claim(&challenge).unwrap().index, 1);
        assert_eq!(board.claim(&challenge).unwrap().index, 2);
        assert_eq!(board.claim(&challenge), None);
    }

    #[test]
    fn skips_unregistered_and_solved() {
        let mut unregistered = address(0);
        unregistered.registered = false;

        let board = AddressBoard::new(
            vec![unregistered, address(1), address(2)],
            &[receipt(&address(1).bech32, "a")],
        );

        assert_eq!(board.eligible(), 2);
        assert!(board.is_solved(&"a".parse().unwrap(), 1));
        assert_eq!(board.claim(&active("a", 1)).unwrap().index, 2);
        assert_eq!(board.claim(&active("b", 2)).unwrap().index, 1);
    }

    #[test]
    fn new_epoch_resets_claims() {
        let board = AddressBoard::new(vec![address(0)], &[]);

        assert!(board.claim(&active("a", 1)).is_some());
        assert_eq!(board.claim(&active("a", 1)), None);
        assert_eq!(board.claim(&active("b", 2)).unwrap().index, 0);
    }

    #[test]
    fn release_returns_address() {
        let board = AddressBoard::new(vec![address(0)], &[]);
        let challenge = active("a", 1);

        let claimed = board.claim(&challenge).unwrap();
        board.release(&challenge, claimed.index);
        assert_eq!(board.claim(&challenge), Some(claimed));
    }

    #[tokio::test]
    async fn groups_move_to_next_address_when_solved() {
        let dir = tempfile::tempdir().unwrap();

        // Every address solves on nonce 7.
        let compute = FakeCompute::new(|preimage| {
            if preimage.starts_with("0000000000000007") {
                "0000000000000000".into()
            } else {
                "ffffffffffffffff".into()
            }
        });
        let reward = FakeReward::new(None);

        let tracker = Arc::new(ChallengeTracker::new(None));
        let bus = EventBus::default();
        let ctx = PoolContext {
            compute: ComputeClient::new(&compute.spawn().await, Default::default()).unwrap(),
            tracker: tracker.clone(),
            pipeline: Arc::new(SubmissionPipeline::new(
                RewardClient::new(&reward.spawn().await).unwrap(),
                Arc::new(FileLedger::new(dir.path()).unwrap()),
                tracker.clone(),
                bus.clone(),
            )),
            bus: bus.clone(),
        };

        let config = MiningConfig {
            worker_threads: 2,
            batch_size: Some(50),
            worker_grouping_mode: GroupingMode::AllOnOne,
            ..Default::default()
        };

        let board = Arc::new(AddressBoard::new((0..3).map(address).collect(), &[]));
        let mut events = bus.subscribe();

        tracker.observe(challenge("a", "0000FFFF"));

        let cancel = CancellationToken::new();
        let pool = WorkerPool::start(&ctx, &config, board.clone(), &cancel);

        timeout(Duration::from_secs(10), async {
            while reward.submissions().len() < 3 {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        pool.stop().await;

        let mut addresses = reward
            .submissions()
            .into_iter()
            .map(|submission| submission.address)
            .collect::<Vec<_>>();
        addresses.sort();

        assert_eq!(
            addresses,
            (0..3).map(|i| address(i).bech32).collect::<Vec<_>>()
        );

        for i in 0..3 {
            assert!(board.is_solved(&"a".parse().unwrap(), i));
        }

        let start = timeout(Duration::from_secs(1), async {
            loop {
                if let MiningEvent::MiningStart { epoch, workers, .. } = events.recv().await.unwrap()
                {
                    return (epoch, workers);
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(start, (1, 2));
    }

    #[tokio::test]
    async fn late_batch_for_a_solved_address_is_discarded() {
        let dir = tempfile::tempdir().unwrap();

        // Every hash for address 0 is a hit; rank 1's first batch lands late.
        let compute = FakeCompute::new(|preimage| {
            if preimage.contains("addr_test1qq0000") {
                "0000000000000000".into()
            } else {
                "ffffffffffffffff".into()
            }
        });
        compute
            .batch_delays
            .lock()
            .insert("0000000000000032".into(), Duration::from_millis(500));

        let reward = FakeReward::new(None);

        let tracker = Arc::new(ChallengeTracker::new(None));
        let bus = EventBus::default();
        let ctx = PoolContext {
            compute: ComputeClient::new(&compute.spawn().await, Default::default()).unwrap(),
            tracker: tracker.clone(),
            pipeline: Arc::new(SubmissionPipeline::new(
                RewardClient::new(&reward.spawn().await).unwrap(),
                Arc::new(FileLedger::new(dir.path()).unwrap()),
                tracker.clone(),
                bus.clone(),
            )),
            bus,
        };

        let config = MiningConfig {
            worker_threads: 2,
            batch_size: Some(50),
            worker_grouping_mode: GroupingMode::AllOnOne,
            ..Default::default()
        };

        let board = Arc::new(AddressBoard::new((0..3).map(address).collect(), &[]));

        tracker.observe(challenge("a", "0000FFFF"));

        let cancel = CancellationToken::new();
        let pool = WorkerPool::start(&ctx, &config, board.clone(), &cancel);

        timeout(Duration::from_secs(10), async {
            while reward.submissions().is_empty() {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        sleep(Duration::from_millis(800)).await;

        pool.stop().await;

        let nonces = reward
            .submissions()
            .into_iter()
            .filter(|submission| submission.address == address(0).bech32)
            .map(|submission| submission.nonce)
            .collect::<Vec<_>>();

        assert_eq!(nonces, vec!["0000000000000000".to_string()]);
        assert!(board.is_solved(&"a".parse().unwrap(), 0));
    }
}
