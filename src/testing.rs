use {
    super::*,
    axum::{extract::Path as UrlPath, routing::post},
};

/// Serve `router` on an ephemeral port, returning its base url.
pub(crate) async fn serve(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    format!("http://{addr}")
}

pub(crate) fn challenge(id: &str, difficulty: &str) -> Challenge {
    Challenge {
        challenge_id: id.parse().unwrap(),
        difficulty: difficulty.parse().unwrap(),
        no_pre_mine: "fd651ac2725e3b9d804cc8df1e2a9b4f".into(),
        latest_submission: "2099-01-01T00:00:00Z".into(),
        no_pre_mine_hour: "548571128".into(),
    }
}

pub(crate) fn address(index: usize) -> Address {
    Address {
        index,
        bech32: format!("addr_test1qq{index:04}"),
        registered: true,
        is_dev_fee: false,
    }
}

pub(crate) type HashFn = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// In-process stand-in for the hash server.
#[derive(Clone)]
pub(crate) struct FakeCompute {
    pub(crate) hash: HashFn,
    pub(crate) inits: Arc<Mutex<Vec<String>>>,
    pub(crate) batches: Arc<AtomicUsize>,
    pub(crate) kills: Arc<AtomicUsize>,
    /// One-shot delays for the batch whose first nonce matches the key.
    pub(crate) batch_delays: Arc<Mutex<HashMap<String, Duration>>>,
}

impl FakeCompute {
    pub(crate) fn new(hash: impl Fn(&str) -> String + Send + Sync + 'static) -> Self {
        Self {
            hash: Arc::new(hash),
            inits: Default::default(),
            batches: Default::default(),
            kills: Default::default(),
            batch_delays: Default::default(),
        }
    }

    pub(crate) async fn spawn(&self) -> String {
        let router = Router::new()
            .route(
                "/init",
                post(
                    |State(fake): State<FakeCompute>, Json(request): Json<Value>| async move {
                        fake.inits.lock().push(
                            request["no_pre_mine"]
                                .as_str()
                                .unwrap_or_default()
                                .to_string(),
                        );
                        Json(serde_json::json!({"worker_pid": 1}))
                    },
                ),
            )
            .route(
                "/hash",
                post(
                    |State(fake): State<FakeCompute>,
                     Json(request): Json<scavenge::HashRequest>| async move {
                        Json(scavenge::HashResponse {
                            hash: (fake.hash)(&request.preimage),
                        })
                    },
                ),
            )
            .route(
                "/hash-batch",
                post(
                    |State(fake): State<FakeCompute>,
                     Json(request): Json<scavenge::BatchHashRequest>| async move {
                        fake.batches.fetch_add(1, Ordering::SeqCst);

                        let delay = request.preimages.first().and_then(|preimage| {
                            fake.batch_delays
                                .lock()
                                .remove(preimage.get(..16).unwrap_or_default())
                        });

                        if let Some(delay) = delay {
                            sleep(delay).await;
                        }

                        Json(scavenge::BatchHashResponse {
                            hashes: request.preimages.iter().map(|p| (fake.hash)(p)).collect(),
                        })
                    },
                ),
            )
            .route(
                "/health",
                get(|| async { Json(serde_json::json!({"status": "ok", "romInitialized": true})) }),
            )
            .route(
                "/kill-workers",
                post(|State(fake): State<FakeCompute>| async move {
                    fake.kills.fetch_add(1, Ordering::SeqCst);
                    Json(serde_json::json!({"message": "killed"}))
                }),
            )
            .with_state(self.clone());

        serve(router).await
    }
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Submission {
    pub(crate) address: String,
    pub(crate) challenge_id: String,
    pub(crate) nonce: String,
}

/// In-process stand-in for the reward API.
#[derive(Clone)]
pub(crate) struct FakeReward {
    pub(crate) challenge: Arc<Mutex<Value>>,
    pub(crate) submissions: Arc<Mutex<Vec<Submission>>>,
    pub(crate) registrations: Arc<Mutex<Vec<String>>>,
    pub(crate) solution_status: Arc<Mutex<StatusCode>>,
    pub(crate) solution_delay: Arc<Mutex<Duration>>,
}

impl FakeReward {
    pub(crate) fn new(challenge: Option<&Challenge>) -> Self {
        let fake = Self {
            challenge: Arc::new(Mutex::new(Value::Null)),
            submissions: Default::default(),
            registrations: Default::default(),
            solution_status: Arc::new(Mutex::new(StatusCode::OK)),
            solution_delay: Default::default(),
        };
        fake.set_challenge(challenge);
        fake
    }

    pub(crate) fn set_challenge(&self, challenge: Option<&Challenge>) {
        *self.challenge.lock() = match challenge {
            Some(challenge) => serde_json::json!({"code": "active", "challenge": challenge}),
            None => serde_json::json!({"code": "before", "starts_at": "2099-01-01T00:00:00Z"}),
        };
    }

    pub(crate) fn submissions(&self) -> Vec<Submission> {
        self.submissions.lock().clone()
    }

    pub(crate) async fn spawn(&self) -> String {
        let router = Router::new()
            .route(
                "/challenge",
                get(|State(fake): State<FakeReward>| async move {
                    Json(fake.challenge.lock().clone())
                }),
            )
            .route(
                "/solution/{address}/{challenge_id}/{nonce}",
                post(
                    |State(fake): State<FakeReward>,
                     UrlPath((address, challenge_id, nonce)): UrlPath<(String, String, String)>| async move {
                        let delay = *fake.solution_delay.lock();
                        if !delay.is_zero() {
                            sleep(delay).await;
                        }

                        fake.submissions.lock().push(Submission {
                            address,
                            challenge_id,
                            nonce,
                        });

                        let status = *fake.solution_status.lock();
                        if status.is_success() {
                            (
                                status,
                                Json(serde_json::json!({"crypto_receipt": {"signature": "sig"}})),
                            )
                        } else {
                            (
                                status,
                                Json(serde_json::json!({"message": "Solution rejected", "statusCode": status.as_u16()})),
                            )
                        }
                    },
                ),
            )
            .route(
                "/TandC",
                get(|| async {
                    Json(serde_json::json!({
                        "version": "1-0",
                        "content": "terms",
                        "message": "I agree to abide by the terms"
                    }))
                }),
            )
            .route(
                "/register/{address}/{signature}/{public_key}",
                post(
                    |State(fake): State<FakeReward>,
                     UrlPath((address, _signature, _public_key)): UrlPath<(String, String, String)>| async move {
                        fake.registrations.lock().push(address);
                        Json(serde_json::json!({"registrationReceipt": {"ok": true}}))
                    },
                ),
            )
            .with_state(self.clone());

        serve(router).await
    }
}
