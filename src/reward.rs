use {
    super::*,
    backon::{ExponentialBuilder, Retryable},
    scavenge::{ApiErrorBody, RegistrationReceipt, SolutionReceipt, TermsResponse},
    serde::de::DeserializeOwned,
    snafu::ResultExt,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const SUBMIT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum RewardError {
    #[snafu(display("request to {endpoint} failed"))]
    Request {
        endpoint: String,
        source: reqwest::Error,
    },

    #[snafu(display("{endpoint} returned {status}: {}", reason.as_deref().unwrap_or(body.as_str())))]
    Status {
        endpoint: String,
        status: u16,
        body: String,
        reason: Option<String>,
    },

    #[snafu(display("invalid response from {endpoint}"))]
    Decode {
        endpoint: String,
        source: reqwest::Error,
    },
}

impl RewardError {
    /// Connection failures, timeouts, 408 and 503 are retried in place.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Request { source, .. } => source.is_connect() || source.is_timeout(),
            Self::Status { status, .. } => matches!(status, 408 | 503),
            Self::Decode { .. } => false,
        }
    }

    /// Upstream refused the request outright.
    pub fn is_rejection(&self) -> bool {
        match self {
            Self::Status { status, .. } => (400..500).contains(status) && *status != 408 && *status != 429,
            _ => false,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Upstream's explanation if it gave one, otherwise the error itself.
    pub fn reason(&self) -> String {
        match self {
            Self::Status {
                reason: Some(reason),
                ..
            } => reason.clone(),
            Self::Status { body, .. } if !body.is_empty() => body.clone(),
            _ => self.to_string(),
        }
    }

    /// Parsed error body, when upstream sent JSON.
    pub fn response(&self) -> Option<Value> {
        match self {
            Self::Status { body, .. } => serde_json::from_str(body).ok(),
            _ => None,
        }
    }
}

/// Client for the upstream reward API.
#[derive(Clone, Debug)]
pub struct RewardClient {
    base_url: Url,
    client: reqwest::Client,
    max_retries: usize,
    retry_delay: Duration,
}

impl RewardClient {
    pub fn new(url: &str) -> Result<Self> {
        let base_url = Url::parse(url).map_err(|err| anyhow!("invalid reward API url `{url}`: {err}"))?;

        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|err| anyhow!("failed to build reward API client: {err}"))?;

        Ok(Self {
            base_url,
            client,
            max_retries: 3,
            retry_delay: Duration::from_millis(500),
        })
    }

    pub fn with_retries(self, max_retries: usize, retry_delay: Duration) -> Self {
        Self {
            max_retries,
            retry_delay,
            ..self
        }
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        endpoint: &str,
    ) -> Result<T, RewardError> {
        let response = request.send().await.context(RequestSnafu { endpoint })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let reason = serde_json::from_str::<ApiErrorBody>(&body)
                .ok()
                .and_then(|error| error.reason().map(str::to_string));

            return StatusSnafu {
                endpoint,
                status: status.as_u16(),
                body,
                reason,
            }
            .fail();
        }

        response.json().await.context(DecodeSnafu { endpoint })
    }

    pub async fn challenge(&self) -> Result<ChallengeResponse, RewardError> {
        let request = self
            .client
            .get(self.url(&["challenge"]))
            .timeout(REQUEST_TIMEOUT);

        self.send(request, "/challenge").await
    }

    pub async fn submit_solution(
        &self,
        address: &str,
        challenge_id: &ChallengeId,
        nonce: Nonce,
    ) -> Result<SolutionReceipt, RewardError> {
        let nonce = nonce.to_string();
        let url = self.url(&["solution", address, challenge_id.as_str(), &nonce]);

        let op = || async {
            let request = self
                .client
                .post(url.clone())
                .timeout(SUBMIT_TIMEOUT)
                .json(&serde_json::json!({}));

            self.send::<SolutionReceipt>(request, "/solution").await
        };

        op.retry(
            ExponentialBuilder::default()
                .with_min_delay(self.retry_delay)
                .with_max_times(self.max_retries.saturating_sub(1)),
        )
        .sleep(sleep)
        .when(RewardError::is_retriable)
        .notify(|err: &RewardError, duration: Duration| {
            warn!(
                "Retrying submission for {} in {duration:?}: {err}",
                short(address)
            );
        })
        .await
    }

    pub async fn terms(&self) -> Result<TermsResponse, RewardError> {
        let request = self.client.get(self.url(&["TandC"])).timeout(REQUEST_TIMEOUT);
        self.send(request, "/TandC").await
    }

    pub async fn register(
        &self,
        address: &str,
        signature: &str,
        public_key: &str,
    ) -> Result<RegistrationReceipt, RewardError> {
        let request = self
            .client
            .post(self.url(&["register", address, signature, public_key]))
            .timeout(REQUEST_TIMEOUT)
            .json(&serde_json::json!({}));

        self.send(request, "/register").await
    }
}
