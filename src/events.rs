use {super::*, worker::WorkerSnapshot};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MiningEvent {
    RegistrationProgress {
        current: usize,
        total: usize,
        address: String,
        success: bool,
        message: String,
    },
    MiningStart {
        challenge_id: ChallengeId,
        epoch: u64,
        difficulty: Difficulty,
        addresses: usize,
        workers: usize,
    },
    HashProgress {
        worker_id: usize,
        address_index: usize,
        hashes: u64,
        total_hashes: u64,
    },
    SolutionSubmit {
        address: String,
        address_index: usize,
        challenge_id: ChallengeId,
        nonce: Nonce,
        is_dev_fee: bool,
    },
    SolutionResult {
        address: String,
        address_index: usize,
        challenge_id: ChallengeId,
        nonce: Nonce,
        outcome: String,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        is_dev_fee: bool,
    },
    WorkerUpdate(WorkerSnapshot),
    Status {
        state: String,
        message: String,
    },
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        worker_id: Option<usize>,
    },
    Stats(StatsSnapshot),
}

impl MiningEvent {
    /// Event type as it appears in the `type` field.
    pub fn name(&self) -> &'static str {
        match self {
            Self::RegistrationProgress { .. } => "registration_progress",
            Self::MiningStart { .. } => "mining_start",
            Self::HashProgress { .. } => "hash_progress",
            Self::SolutionSubmit { .. } => "solution_submit",
            Self::SolutionResult { .. } => "solution_result",
            Self::WorkerUpdate(_) => "worker_update",
            Self::Status { .. } => "status",
            Self::Error { .. } => "error",
            Self::Stats(_) => "stats",
        }
    }

    pub fn status(state: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Status {
            state: state.into(),
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>, worker_id: Option<usize>) -> Self {
        Self::Error {
            message: message.into(),
            worker_id,
        }
    }
}

/// Fan-out of engine events to the reporting surface and the stats aggregator.
#[derive(Clone, Debug)]
pub struct EventBus {
    tx: broadcast::Sender<MiningEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EVENT_CHANNEL_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn emit(&self, event: MiningEvent) {
        // No subscribers is fine.
        self.tx.send(event).ok();
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MiningEvent> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use {super::*, pretty_assertions::assert_eq};

    #[test]
    fn serialized_type_matches_name() {
        let events = [
            MiningEvent::RegistrationProgress {
                current: 1,
                total: 2,
                address: "addr1".into(),
                success: true,
                message: "registered".into(),
            },
            MiningEvent::HashProgress {
                worker_id: 0,
                address_index: 0,
                hashes: 300,
                total_hashes: 600,
            },
            MiningEvent::status("running", "Mining started"),
            MiningEvent::error("boom", Some(3)),
            MiningEvent::Stats(StatsSnapshot::default()),
        ];

        for event in events {
            let json = serde_json::to_value(&event).unwrap();
            assert_eq!(json["type"], event.name());
            assert_eq!(
                serde_json::from_value::<MiningEvent>(json).unwrap(),
                event
            );
        }
    }

    #[test]
    fn solution_result_shape() {
        let event = MiningEvent::SolutionResult {
            address: "addr1".into(),
            address_index: 4,
            challenge_id: "**D07C10".parse().unwrap(),
            nonce: Nonce::new(0x42),
            outcome: "accepted".into(),
            success: true,
            message: None,
            is_dev_fee: false,
        };

        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            serde_json::json!({
                "type": "solution_result",
                "address": "addr1",
                "address_index": 4,
                "challenge_id": "**D07C10",
                "nonce": "0000000000000042",
                "outcome": "accepted",
                "success": true,
                "is_dev_fee": false,
            })
        );
    }

    #[tokio::test]
    async fn emit_without_subscribers() {
        let bus = EventBus::new(4);
        bus.emit(MiningEvent::status("idle", "nobody listening"));

        let mut rx = bus.subscribe();
        bus.emit(MiningEvent::status("running", "hello"));
        assert_eq!(rx.recv().await.unwrap().name(), "status");
    }
}
