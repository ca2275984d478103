use {
    super::*,
    backon::{ExponentialBuilder, Retryable},
    scavenge::{
        AshConfig, BatchHashRequest, BatchHashResponse, HashRequest, HashResponse, HealthResponse,
        InitRequest, InitResponse,
    },
    serde::de::DeserializeOwned,
    snafu::ResultExt,
};

const INIT_TIMEOUT: Duration = Duration::from_secs(120);
const KILL_WORKERS_TIMEOUT: Duration = Duration::from_secs(5);
const MIN_BATCH_TIMEOUT: Duration = Duration::from_secs(30);
const BATCH_TIMEOUT_PER_HASH: Duration = Duration::from_millis(20);
const MAX_JITTER_MS: u64 = 100;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ComputeError {
    #[snafu(display("failed to initialize hash server"))]
    Init { source: Box<ComputeError> },

    #[snafu(display("request to {endpoint} failed"))]
    Request {
        endpoint: &'static str,
        source: reqwest::Error,
    },

    #[snafu(display("{endpoint} returned {status}: {body}"))]
    Status {
        endpoint: &'static str,
        status: u16,
        body: String,
    },

    #[snafu(display("invalid response from {endpoint}"))]
    Decode {
        endpoint: &'static str,
        source: reqwest::Error,
    },

    #[snafu(display("expected {expected} hashes, got {actual}"))]
    LengthMismatch { expected: usize, actual: usize },

    #[snafu(display("hash request pool closed"))]
    Closed {
        source: tokio::sync::AcquireError,
    },
}

impl ComputeError {
    /// Connection failures, timeouts and 503 are worth another attempt. Batch
    /// requests also retry 408.
    pub fn is_transient(&self, batch: bool) -> bool {
        match self {
            Self::Request { source, .. } => {
                source.is_connect() || source.is_timeout() || source.is_request()
            }
            Self::Status { status, .. } => *status == 503 || (batch && *status == 408),
            _ => false,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Init { source } => source.status(),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ClientOptions {
    pub max_connections: usize,
    pub max_retries: usize,
    pub retry_delay: Duration,
    pub request_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            max_connections: 50,
            max_retries: 3,
            retry_delay: Duration::from_millis(100),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Pooled client for the external hash server.
#[derive(Clone, Debug)]
pub struct ComputeClient {
    base_url: String,
    client: reqwest::Client,
    permits: Arc<Semaphore>,
    options: ClientOptions,
}

impl ComputeClient {
    pub fn new(url: &str, options: ClientOptions) -> Result<Self> {
        Url::parse(url).map_err(|err| anyhow!("invalid hash server url `{url}`: {err}"))?;

        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .pool_max_idle_per_host(options.max_connections)
            .pool_idle_timeout(Duration::from_secs(30))
            .tcp_keepalive(Duration::from_secs(30))
            .build()
            .map_err(|err| anyhow!("failed to build hash server client: {err}"))?;

        Ok(Self {
            base_url: url.trim_end_matches('/').to_string(),
            client,
            permits: Arc::new(Semaphore::new(options.max_connections.max(1))),
            options,
        })
    }

    pub fn url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.options.retry_delay)
            .with_factor(2.0)
            .with_max_delay(Duration::from_secs(30))
            .with_max_times(self.options.max_retries.saturating_sub(1))
    }

    async fn post<Req, Resp>(
        &self,
        client: &reqwest::Client,
        endpoint: &'static str,
        body: &Req,
        request_timeout: Duration,
    ) -> Result<Resp, ComputeError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let response = client
            .post(self.endpoint(endpoint))
            .timeout(request_timeout)
            .json(body)
            .send()
            .await
            .context(RequestSnafu { endpoint })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return StatusSnafu {
                endpoint,
                status: status.as_u16(),
                body,
            }
            .fail();
        }

        response.json().await.context(DecodeSnafu { endpoint })
    }

    /// Load the challenge seed into the backend. Uses a dedicated connection
    /// since ROM generation can take minutes.
    pub async fn init(&self, no_pre_mine: &str) -> Result<InitResponse, ComputeError> {
        let request = InitRequest {
            no_pre_mine: no_pre_mine.into(),
            ash_config: AshConfig::default(),
        };

        let attempt = async {
            let client = reqwest::Client::builder()
                .user_agent(USER_AGENT)
                .pool_max_idle_per_host(0)
                .build()
                .context(RequestSnafu { endpoint: "/init" })?;

            self.post::<_, InitResponse>(&client, "/init", &request, INIT_TIMEOUT)
                .await
        };

        let response = attempt.await.map_err(Box::new).context(InitSnafu)?;

        info!(
            "Hash server initialized with seed {}{}",
            short(no_pre_mine),
            response
                .worker_pid
                .map(|pid| format!(" (worker pid {pid})"))
                .unwrap_or_default()
        );

        Ok(response)
    }

    pub async fn hash(&self, preimage: &Preimage) -> Result<String, ComputeError> {
        let request = HashRequest {
            preimage: preimage.as_str().into(),
        };

        let op = || async {
            let _permit = self.permits.acquire().await.context(ClosedSnafu)?;
            self.post::<_, HashResponse>(
                &self.client,
                "/hash",
                &request,
                self.options.request_timeout,
            )
            .await
        };

        let response = op
            .retry(self.backoff())
            .sleep(sleep)
            .when(|err: &ComputeError| err.is_transient(false))
            .notify(|err: &ComputeError, duration: Duration| {
                debug!("Retrying /hash in {duration:?}: {err}");
            })
            .await?;

        Ok(response.hash)
    }

    /// Hash every preimage in one request. The returned hashes are in input order.
    pub async fn hash_batch(&self, preimages: &[Preimage]) -> Result<Vec<String>, ComputeError> {
        if preimages.is_empty() {
            return Ok(Vec::new());
        }

        let request = BatchHashRequest {
            preimages: preimages.iter().map(|p| p.as_str().to_owned()).collect(),
        };

        let request_timeout = MIN_BATCH_TIMEOUT.max(BATCH_TIMEOUT_PER_HASH * preimages.len() as u32);

        let op = || async {
            let _permit = self.permits.acquire().await.context(ClosedSnafu)?;
            self.post::<_, BatchHashResponse>(&self.client, "/hash-batch", &request, request_timeout)
                .await
        };

        let response = op
            .retry(self.backoff())
            .sleep(|delay| sleep(delay + jitter()))
            .when(|err: &ComputeError| err.is_transient(true))
            .notify(|err: &ComputeError, duration: Duration| {
                debug!("Retrying /hash-batch in {duration:?}: {err}");
            })
            .await?;

        snafu::ensure!(
            response.hashes.len() == preimages.len(),
            LengthMismatchSnafu {
                expected: preimages.len(),
                actual: response.hashes.len(),
            }
        );

        Ok(response.hashes)
    }

    pub async fn health(&self) -> Result<HealthResponse, ComputeError> {
        let endpoint = "/health";

        let response = self
            .client
            .get(self.endpoint(endpoint))
            .timeout(self.options.request_timeout)
            .send()
            .await
            .context(RequestSnafu { endpoint })?;

        let status = response.status();
        if !status.is_success() {
            return StatusSnafu {
                endpoint,
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            }
            .fail();
        }

        response.json().await.context(DecodeSnafu { endpoint })
    }

    pub async fn health_check(&self) -> bool {
        match self.health().await {
            Ok(health) => health.is_ok(),
            Err(err) => {
                debug!("Hash server health check failed: {err}");
                false
            }
        }
    }

    pub async fn is_ready(&self) -> bool {
        self.health()
            .await
            .map(|health| health.is_ready())
            .unwrap_or(false)
    }

    /// Ask the backend to abandon in-flight hashing. Never fails.
    pub async fn kill_workers(&self) {
        let endpoint = "/kill-workers";

        let client = match reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .pool_max_idle_per_host(0)
            .build()
        {
            Ok(client) => client,
            Err(err) => {
                warn!("Failed to build client for {endpoint}: {err}");
                return;
            }
        };

        match self
            .post::<_, Value>(&client, endpoint, &serde_json::json!({}), KILL_WORKERS_TIMEOUT)
            .await
        {
            Ok(_) => info!("Hash server workers killed"),
            Err(err) if err.status() == Some(404) => {
                info!("Hash server has no {endpoint} endpoint, assuming older backend");
            }
            Err(err) => warn!("Failed to kill hash server workers: {err}"),
        }
    }
}

fn jitter() -> Duration {
    Duration::from_millis(rand::random_range(0..=MAX_JITTER_MS))
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::testing::serve,
        axum::routing::post,
        pretty_assertions::assert_eq,
        scavenge::NONCE_HEX_LEN,
    };

    fn fast_options() -> ClientOptions {
        ClientOptions {
            retry_delay: Duration::from_millis(1),
            ..Default::default()
        }
    }

    fn preimages(n: usize) -> Vec<Preimage> {
        let challenge = crate::testing::challenge("**D07C10", "0000FFFF");
        (0..n as u64)
            .map(|nonce| challenge.preimage(Nonce::new(nonce), "addr_test1"))
            .collect()
    }

    async fn counting_server(status: StatusCode) -> (String, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();

        let router = Router::new().route(
            "/hash-batch",
            post(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    (status, "nope")
                }
            }),
        );

        (serve(router).await, hits)
    }

    #[tokio::test]
    async fn retry_bound_on_constant_503() {
        let (url, hits) = counting_server(StatusCode::SERVICE_UNAVAILABLE).await;
        let client = ComputeClient::new(&url, fast_options()).unwrap();

        let err = client.hash_batch(&preimages(2)).await.unwrap_err();

        assert_eq!(err.status(), Some(503));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn batch_retries_408() {
        let (url, hits) = counting_server(StatusCode::REQUEST_TIMEOUT).await;
        let client = ComputeClient::new(
            &url,
            ClientOptions {
                max_retries: 2,
                ..fast_options()
            },
        )
        .unwrap();

        client.hash_batch(&preimages(1)).await.unwrap_err();

        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn bad_request_is_not_retried() {
        let (url, hits) = counting_server(StatusCode::BAD_REQUEST).await;
        let client = ComputeClient::new(&url, fast_options()).unwrap();

        let err = client.hash_batch(&preimages(3)).await.unwrap_err();

        assert_eq!(err.status(), Some(400));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn single_hash_does_not_retry_408() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let router = Router::new().route(
            "/hash",
            post(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    StatusCode::REQUEST_TIMEOUT
                }
            }),
        );
        let client = ComputeClient::new(&serve(router).await, fast_options()).unwrap();

        client.hash(&preimages(1)[0]).await.unwrap_err();

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn connection_refused_is_retried_then_fails() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = ComputeClient::new(&format!("http://{addr}"), fast_options()).unwrap();
        let err = client.hash_batch(&preimages(1)).await.unwrap_err();

        assert!(err.is_transient(true), "{err}");
    }

    #[tokio::test]
    async fn batch_preserves_order() {
        // Each hash echoes the nonce of its preimage so order is observable.
        let router = Router::new().route(
            "/hash-batch",
            post(|Json(request): Json<BatchHashRequest>| async move {
                Json(BatchHashResponse {
                    hashes: request
                        .preimages
                        .iter()
                        .map(|p| p[..NONCE_HEX_LEN].to_string())
                        .collect(),
                })
            }),
        );
        let client = ComputeClient::new(&serve(router).await, fast_options()).unwrap();

        for n in [0, 1, 17, rand::random_range(0..=5000), 5000] {
            let input = preimages(n);
            let hashes = client.hash_batch(&input).await.unwrap();
            assert_eq!(hashes.len(), n);
            for (preimage, hash) in input.iter().zip(&hashes) {
                assert_eq!(preimage.nonce().unwrap().to_string(), *hash);
            }
        }
    }

    #[tokio::test]
    async fn empty_batch_makes_no_request() {
        let (url, hits) = counting_server(StatusCode::OK).await;
        let client = ComputeClient::new(&url, fast_options()).unwrap();

        assert_eq!(client.hash_batch(&[]).await.unwrap(), Vec::<String>::new());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn length_mismatch() {
        let router = Router::new().route(
            "/hash-batch",
            post(|| async {
                Json(BatchHashResponse {
                    hashes: vec!["00".into()],
                })
            }),
        );
        let client = ComputeClient::new(&serve(router).await, fast_options()).unwrap();

        assert!(matches!(
            client.hash_batch(&preimages(2)).await,
            Err(ComputeError::LengthMismatch {
                expected: 2,
                actual: 1
            })
        ));
    }

    #[tokio::test]
    async fn health_and_readiness() {
        let router = Router::new().route(
            "/health",
            get(|| async { Json(serde_json::json!({"status": "ok", "romInitialized": false})) }),
        );
        let client = ComputeClient::new(&serve(router).await, fast_options()).unwrap();

        assert!(client.health_check().await);
        assert!(!client.is_ready().await);
    }

    #[tokio::test]
    async fn health_check_is_false_when_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = ComputeClient::new(&format!("http://{addr}"), fast_options()).unwrap();
        assert!(!client.health_check().await);
        assert!(!client.is_ready().await);
    }

    #[tokio::test]
    async fn kill_workers_tolerates_missing_endpoint() {
        let client = ComputeClient::new(&serve(Router::new()).await, fast_options()).unwrap();
        client.kill_workers().await;
    }

    #[tokio::test]
    async fn init_failure_is_init_error() {
        let router = Router::new().route(
            "/init",
            post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "rom failed") }),
        );
        let client = ComputeClient::new(&serve(router).await, fast_options()).unwrap();

        let err = client.init("seed").await.unwrap_err();
        assert!(matches!(err, ComputeError::Init { .. }));
        assert_eq!(err.status(), Some(500));
    }

    #[tokio::test]
    async fn init_sends_ash_config() {
        let router = Router::new().route(
            "/init",
            post(|Json(request): Json<Value>| async move {
                assert_eq!(request["no_pre_mine"], "seed");
                assert_eq!(request["ashConfig"]["nbLoops"], 8);
                assert_eq!(request["ashConfig"]["rom_size"], 1_073_741_824u64);
                Json(serde_json::json!({"worker_pid": 42}))
            }),
        );
        let client = ComputeClient::new(&serve(router).await, fast_options()).unwrap();

        assert_eq!(client.init("seed").await.unwrap().worker_pid, Some(42));
    }

    #[test]
    fn invalid_url() {
        assert!(ComputeClient::new("not a url", ClientOptions::default()).is_err());
    }
}
