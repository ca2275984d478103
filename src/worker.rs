use super::*;

const ERROR_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    #[default]
    #[display("idle")]
    Idle,
    #[display("mining")]
    Mining,
    #[display("submitting")]
    Submitting,
    #[display("completed")]
    Completed,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerSnapshot {
    pub worker_id: usize,
    pub address_index: usize,
    pub address: String,
    pub status: WorkerStatus,
    pub hashes_computed: u64,
    pub hash_rate: HashRate,
    pub solutions_found: u64,
    pub epoch: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub challenge_id: Option<ChallengeId>,
    pub start_time: i64,
    pub last_update_time: i64,
}

/// A hash that met the difficulty, bound to the epoch it was computed in.
#[derive(Clone, Debug, PartialEq)]
pub struct Candidate {
    pub address: String,
    pub address_index: usize,
    pub is_dev_fee: bool,
    pub challenge_id: ChallengeId,
    pub epoch: u64,
    pub nonce: Nonce,
    pub preimage: Preimage,
    pub hash: String,
    /// Refuse the submission once this address has a final outcome for the challenge.
    pub once_per_challenge: bool,
}

/// What a group currently wants its workers to mine.
#[derive(Clone, Debug)]
pub(crate) struct Assignment {
    pub(crate) address: Address,
    pub(crate) challenge: Arc<ActiveChallenge>,
    pub(crate) generation: u64,
}

/// Sent to the group when a worker is done with its address.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Solved {
    pub(crate) generation: u64,
    pub(crate) address_index: usize,
}

#[derive(Debug, PartialEq)]
enum Exit {
    Cancelled,
    Reassigned,
    Completed,
}

pub(crate) struct Worker {
    pub(crate) id: usize,
    pub(crate) rank: usize,
    pub(crate) group_size: usize,
    pub(crate) batch_size: usize,
    pub(crate) continue_after_solution: bool,
    pub(crate) assignments: watch::Receiver<Option<Assignment>>,
    pub(crate) solved: mpsc::UnboundedSender<Solved>,
    pub(crate) compute: ComputeClient,
    pub(crate) tracker: Arc<ChallengeTracker>,
    pub(crate) pipeline: Arc<SubmissionPipeline>,
    pub(crate) bus: EventBus,
}

impl Worker {
    /// First nonce of batch `k`. Workers in a group stripe disjoint ranges.
    fn batch_start(&self, k: u64) -> Option<u64> {
        let batch_size = self.batch_size as u64;
        k.checked_mul(self.group_size as u64)?
            .checked_add(self.rank as u64)?
            .checked_mul(batch_size)
    }

    pub(crate) async fn run(mut self, cancel: CancellationToken) {
        let mut snapshot = WorkerSnapshot {
            worker_id: self.id,
            ..Default::default()
        };

        loop {
            let assignment = self.assignments.borrow_and_update().clone();

            let exit = match assignment {
                Some(assignment) => self.mine(&assignment, &mut snapshot, &cancel).await,
                None => Exit::Reassigned,
            };

            if exit == Exit::Cancelled {
                break;
            }

            if exit == Exit::Reassigned {
                self.idle(&mut snapshot);
            }

            // Our epoch may have moved on before the group published a new assignment.
            if self.assignments.has_changed().unwrap_or(false) {
                continue;
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                changed = self.assignments.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        self.idle(&mut snapshot);
        debug!(worker = self.id, "Worker stopped");
    }

    fn idle(&self, snapshot: &mut WorkerSnapshot) {
        if snapshot.status == WorkerStatus::Idle {
            return;
        }

        snapshot.status = WorkerStatus::Idle;
        snapshot.hash_rate = HashRate::ZERO;
        snapshot.last_update_time = unix_millis(Utc::now());
        self.bus.emit(MiningEvent::WorkerUpdate(snapshot.clone()));
    }

    fn is_current(&self, assignment: &Assignment) -> bool {
        self.tracker.epoch() == assignment.challenge.epoch
            && self
                .assignments
                .borrow()
                .as_ref()
                .is_some_and(|current| current.generation == assignment.generation)
    }

    async fn mine(
        &mut self,
        assignment: &Assignment,
        snapshot: &mut WorkerSnapshot,
        cancel: &CancellationToken,
    ) -> Exit {
        let challenge = &assignment.challenge.challenge;
        let address = &assignment.address;
        let started = Instant::now();
        let now = unix_millis(Utc::now());

        *snapshot = WorkerSnapshot {
            worker_id: self.id,
            address_index: address.index,
            address: address.bech32.clone(),
            status: WorkerStatus::Mining,
            hashes_computed: 0,
            hash_rate: HashRate::ZERO,
            solutions_found: snapshot.solutions_found,
            epoch: assignment.challenge.epoch,
            challenge_id: Some(challenge.challenge_id.clone()),
            start_time: now,
            last_update_time: now,
        };
        self.bus.emit(MiningEvent::WorkerUpdate(snapshot.clone()));

        debug!(
            worker = self.id,
            address = short(&address.bech32),
            challenge = %challenge.challenge_id,
            "Mining"
        );

        let mut k = 0;

        loop {
            if cancel.is_cancelled() {
                return Exit::Cancelled;
            }

            if !self.is_current(assignment) {
                return Exit::Reassigned;
            }

            let Some(first) = self.batch_start(k) else {
                warn!(worker = self.id, "Nonce space exhausted");
                return Exit::Completed;
            };

            let nonces = (first..)
                .take(self.batch_size)
                .map(Nonce::new)
                .collect::<Vec<_>>();

            let preimages = nonces
                .iter()
                .map(|nonce| challenge.preimage(*nonce, &address.bech32))
                .collect::<Vec<_>>();

            let result = tokio::select! {
                _ = cancel.cancelled() => return Exit::Cancelled,
                result = self.compute.hash_batch(&preimages) => result,
            };

            let hashes = match result {
                Ok(hashes) => hashes,
                Err(err) => {
                    warn!(worker = self.id, "Batch failed: {err}");
                    self.bus.emit(MiningEvent::error(
                        format!("worker {} batch failed: {err}", self.id),
                        Some(self.id),
                    ));

                    tokio::select! {
                        _ = cancel.cancelled() => return Exit::Cancelled,
                        _ = sleep(ERROR_BACKOFF) => {}
                    }
                    continue;
                }
            };

            if !self.is_current(assignment) {
                debug!(worker = self.id, "Discarding batch from a previous assignment");
                return Exit::Reassigned;
            }

            k += 1;

            snapshot.hashes_computed += hashes.len() as u64;
            snapshot.hash_rate = HashRate::from_count(snapshot.hashes_computed, started.elapsed());
            snapshot.last_update_time = unix_millis(Utc::now());

            self.bus.emit(MiningEvent::HashProgress {
                worker_id: self.id,
                address_index: address.index,
                hashes: hashes.len() as u64,
                total_hashes: snapshot.hashes_computed,
            });
            self.bus.emit(MiningEvent::WorkerUpdate(snapshot.clone()));

            let Some(hit) = hashes
                .iter()
                .position(|hash| challenge.difficulty.is_met_by(hash))
            else {
                continue;
            };

            let candidate = Candidate {
                address: address.bech32.clone(),
                address_index: address.index,
                is_dev_fee: address.is_dev_fee,
                challenge_id: challenge.challenge_id.clone(),
                epoch: assignment.challenge.epoch,
                nonce: nonces[hit],
                preimage: preimages[hit].clone(),
                hash: hashes[hit].clone(),
                once_per_challenge: !self.continue_after_solution,
            };

            info!(
                worker = self.id,
                address = short(&address.bech32),
                challenge = %challenge.challenge_id,
                nonce = %candidate.nonce,
                "Found solution"
            );

            snapshot.status = WorkerStatus::Submitting;
            self.bus.emit(MiningEvent::WorkerUpdate(snapshot.clone()));

            let outcome = self.pipeline.submit(&candidate).await;

            if outcome.is_accepted() {
                snapshot.solutions_found += 1;
            }

            if outcome == Outcome::Stale {
                return Exit::Reassigned;
            }

            if !self.continue_after_solution && outcome.is_final() {
                snapshot.status = WorkerStatus::Completed;
                snapshot.hash_rate = HashRate::ZERO;
                snapshot.last_update_time = unix_millis(Utc::now());
                self.bus.emit(MiningEvent::WorkerUpdate(snapshot.clone()));

                self.solved
                    .send(Solved {
                        generation: assignment.generation,
                        address_index: address.index,
                    })
                    .ok();

                return Exit::Completed;
            }

            snapshot.status = WorkerStatus::Mining;
            self.bus.emit(MiningEvent::WorkerUpdate(snapshot.clone()));
        }
    }
}
