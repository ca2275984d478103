use {
    super::*,
    system::CpuSampler,
    tokio::sync::broadcast::error::RecvError,
    worker::{WorkerSnapshot, WorkerStatus},
};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub active_addresses: usize,
    pub total_addresses: usize,
    pub solutions_found: u64,
    pub solutions_this_hour: u64,
    pub solutions_previous_hour: u64,
    pub solutions_today: u64,
    pub solutions_yesterday: u64,
    pub dev_fee_solutions: u64,
    pub submissions: u64,
    pub failures: u64,
    pub errors: u64,
    pub hash_rate: HashRate,
    pub total_hashes: u64,
    pub active_workers: usize,
    pub cpu_usage: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub challenge_id: Option<ChallengeId>,
    pub uptime_secs: u64,
}

#[derive(Debug)]
struct AddressInfo {
    registered: bool,
    is_dev_fee: bool,
}

#[derive(Debug)]
struct Inner {
    addresses: HashMap<String, AddressInfo>,
    seen: HashSet<(String, ChallengeId, Nonce)>,
    solutions: VecDeque<DateTime<Local>>,
    solutions_found: u64,
    dev_fee_solutions: u64,
    submissions: u64,
    failures: u64,
    errors: u64,
    workers: HashMap<usize, WorkerSnapshot>,
    total_hashes: u64,
    cpu_usage: f64,
    challenge_id: Option<ChallengeId>,
}

/// Live counters folded from the event stream.
#[derive(Debug)]
pub struct Stats {
    started: Instant,
    inner: Mutex<Inner>,
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

impl Stats {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            inner: Mutex::new(Inner {
                addresses: HashMap::new(),
                seen: HashSet::new(),
                solutions: VecDeque::new(),
                solutions_found: 0,
                dev_fee_solutions: 0,
                submissions: 0,
                failures: 0,
                errors: 0,
                workers: HashMap::new(),
                total_hashes: 0,
                cpu_usage: 0.0,
                challenge_id: None,
            }),
        }
    }

    pub fn set_addresses(&self, addresses: &[Address]) {
        self.inner.lock().addresses = addresses
            .iter()
            .map(|address| {
                (
                    address.bech32.clone(),
                    AddressInfo {
                        registered: address.registered,
                        is_dev_fee: address.is_dev_fee,
                    },
                )
            })
            .collect();
    }

    pub fn set_cpu_usage(&self, usage: f64) {
        self.inner.lock().cpu_usage = usage;
    }

    pub fn record(&self, event: &MiningEvent) {
        self.record_at(event, Local::now());
    }

    pub(crate) fn record_at(&self, event: &MiningEvent, now: DateTime<Local>) {
        let mut inner = self.inner.lock();

        match event {
            MiningEvent::RegistrationProgress {
                address, success, ..
            } => {
                if *success && let Some(info) = inner.addresses.get_mut(address) {
                    info.registered = true;
                }
            }
            MiningEvent::MiningStart { challenge_id, .. } => {
                inner.challenge_id = Some(challenge_id.clone());
            }
            MiningEvent::HashProgress { hashes, .. } => {
                inner.total_hashes += hashes;
            }
            MiningEvent::SolutionSubmit { .. } => {
                inner.submissions += 1;
            }
            MiningEvent::SolutionResult {
                address,
                challenge_id,
                nonce,
                success,
                is_dev_fee,
                outcome,
                ..
            } => {
                if *success {
                    let key = (address.clone(), challenge_id.clone(), *nonce);
                    if !inner.seen.insert(key) {
                        return;
                    }

                    if *is_dev_fee {
                        inner.dev_fee_solutions += 1;
                    } else {
                        inner.solutions_found += 1;
                        inner.solutions.push_back(now);
                    }
                } else if outcome != Outcome::DUPLICATE && outcome != Outcome::STALE {
                    inner.failures += 1;
                }
            }
            MiningEvent::WorkerUpdate(snapshot) => {
                inner.workers.insert(snapshot.worker_id, snapshot.clone());
            }
            MiningEvent::Status { state, .. } => {
                if state == "stopped" {
                    inner.workers.clear();
                }
            }
            MiningEvent::Error { .. } => {
                inner.errors += 1;
            }
            MiningEvent::Stats(_) => {}
        }

        // Only today and yesterday are ever reported.
        let horizon = now - ChronoDuration::days(2);
        while inner.solutions.front().is_some_and(|time| *time < horizon) {
            inner.solutions.pop_front();
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        self.snapshot_at(Local::now())
    }

    pub(crate) fn snapshot_at(&self, now: DateTime<Local>) -> StatsSnapshot {
        let inner = self.inner.lock();

        let hour = |time: &DateTime<Local>| (time.date_naive(), time.hour());
        let this_hour = hour(&now);
        let previous_hour = hour(&(now - ChronoDuration::hours(1)));
        let today = now.date_naive();
        let yesterday = today.pred_opt();

        let count = |predicate: &dyn Fn(&DateTime<Local>) -> bool| {
            inner.solutions.iter().filter(|&time| predicate(time)).count() as u64
        };

        let live = inner
            .workers
            .values()
            .filter(|worker| matches!(worker.status, WorkerStatus::Mining));

        StatsSnapshot {
            active_addresses: inner
                .addresses
                .values()
                .filter(|info| info.registered && !info.is_dev_fee)
                .count(),
            total_addresses: inner
                .addresses
                .values()
                .filter(|info| !info.is_dev_fee)
                .count(),
            solutions_found: inner.solutions_found,
            solutions_this_hour: count(&|time| hour(time) == this_hour),
            solutions_previous_hour: count(&|time| hour(time) == previous_hour),
            solutions_today: count(&|time| time.date_naive() == today),
            solutions_yesterday: count(&|time| Some(time.date_naive()) == yesterday),
            dev_fee_solutions: inner.dev_fee_solutions,
            submissions: inner.submissions,
            failures: inner.failures,
            errors: inner.errors,
            hash_rate: live.clone().map(|worker| worker.hash_rate).sum(),
            total_hashes: inner.total_hashes,
            active_workers: live.count(),
            cpu_usage: inner.cpu_usage,
            challenge_id: inner.challenge_id.clone(),
            uptime_secs: self.started.elapsed().as_secs(),
        }
    }

    pub fn workers(&self) -> Vec<WorkerSnapshot> {
        let mut workers = self
            .inner
            .lock()
            .workers
            .values()
            .cloned()
            .collect::<Vec<_>>();
        workers.sort_by_key(|worker| worker.worker_id);
        workers
    }

    /// Fold events from `bus` until cancelled, publishing a snapshot every
    /// `STATS_INTERVAL`.
    pub fn spawn(self: Arc<Self>, bus: EventBus, cancel: CancellationToken) -> JoinHandle<()> {
        let mut events = bus.subscribe();

        tokio::spawn(async move {
            let mut ticker = interval(STATS_INTERVAL);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut cpu = CpuSampler::new();

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = events.recv() => match event {
                        Ok(event) => self.record(&event),
                        Err(RecvError::Lagged(missed)) => {
                            warn!("Stats fell behind, skipped {missed} events");
                        }
                        Err(RecvError::Closed) => break,
                    },
                    _ = ticker.tick() => {
                        self.set_cpu_usage(cpu.sample());
                        bus.emit(MiningEvent::Stats(self.snapshot()));
                    }
                }
            }
        })
    }
}
