use {
    super::*,
    anyhow::Context,
    tokio::{fs::OpenOptions, io::AsyncWriteExt},
};

pub const RECEIPTS_FILE: &str = "receipts.jsonl";
pub const ERRORS_FILE: &str = "errors.jsonl";

pub(crate) fn timestamp(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(ts: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(ts)
        .ok()
        .map(|time| time.with_timezone(&Utc))
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Receipt {
    pub ts: String,
    pub address: String,
    #[serde(rename = "addressIndex", default, skip_serializing_if = "Option::is_none")]
    pub address_index: Option<usize>,
    pub challenge_id: String,
    pub nonce: String,
    pub hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crypto_receipt: Option<Value>,
    #[serde(rename = "isDevFee", default)]
    pub is_dev_fee: bool,
}

impl Receipt {
    pub fn time(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.ts)
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct ErrorEntry {
    pub ts: String,
    pub address: String,
    #[serde(rename = "addressIndex", default, skip_serializing_if = "Option::is_none")]
    pub address_index: Option<usize>,
    pub challenge_id: String,
    pub nonce: String,
    pub hash: String,
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
}

impl ErrorEntry {
    pub fn time(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.ts)
    }

    pub fn matches(&self, address: &str, challenge_id: &str, nonce: &str) -> bool {
        self.address == address && self.challenge_id == challenge_id && self.nonce == nonce
    }
}

#[async_trait]
pub trait Ledger: Send + Sync {
    async fn log_receipt(&self, receipt: &Receipt) -> Result;

    async fn log_error(&self, entry: &ErrorEntry) -> Result;

    /// Drop every error entry for `(address, challenge_id, nonce)`.
    async fn remove_error(&self, address: &str, challenge_id: &str, nonce: &str) -> Result;

    async fn receipts(&self) -> Result<Vec<Receipt>>;

    async fn errors(&self) -> Result<Vec<ErrorEntry>>;
}

/// Append-only JSON lines in the data directory.
pub struct FileLedger {
    receipts: PathBuf,
    errors: PathBuf,
    lock: tokio::sync::Mutex<()>,
}

impl FileLedger {
    pub fn new(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create data dir `{}`", dir.display()))?;

        Ok(Self {
            receipts: dir.join(RECEIPTS_FILE),
            errors: dir.join(ERRORS_FILE),
            lock: tokio::sync::Mutex::new(()),
        })
    }

    async fn append<T: Serialize>(&self, path: &Path, record: &T) -> Result {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let _guard = self.lock.lock().await;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .with_context(|| format!("failed to open `{}`", path.display()))?;

        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        Ok(())
    }

    async fn read<T: serde::de::DeserializeOwned>(&self, path: &Path) -> Result<Vec<T>> {
        let contents = match tokio::fs::read_to_string(path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err).with_context(|| format!("failed to read `{}`", path.display()));
            }
        };

        Ok(contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str(line) {
                Ok(record) => Some(record),
                Err(err) => {
                    warn!("Skipping malformed line in {}: {err}", path.display());
                    None
                }
            })
            .collect())
    }
}

#[async_trait]
impl Ledger for FileLedger {
    async fn log_receipt(&self, receipt: &Receipt) -> Result {
        self.append(&self.receipts, receipt).await
    }

    async fn log_error(&self, entry: &ErrorEntry) -> Result {
        self.append(&self.errors, entry).await
    }

    async fn remove_error(&self, address: &str, challenge_id: &str, nonce: &str) -> Result {
        let _guard = self.lock.lock().await;

        let contents = match tokio::fs::read_to_string(&self.errors).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err.into()),
        };

        // Malformed lines are kept as they are.
        let remaining = contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter(|line| {
                serde_json::from_str::<ErrorEntry>(line)
                    .map(|entry| !entry.matches(address, challenge_id, nonce))
                    .unwrap_or(true)
            })
            .map(|line| format!("{line}\n"))
            .collect::<String>();

        tokio::fs::write(&self.errors, remaining)
            .await
            .with_context(|| format!("failed to rewrite `{}`", self.errors.display()))?;

        debug!(
            "Removed error for {} challenge {}",
            short(address),
            short(challenge_id)
        );

        Ok(())
    }

    async fn receipts(&self) -> Result<Vec<Receipt>> {
        self.read(&self.receipts).await
    }

    async fn errors(&self) -> Result<Vec<ErrorEntry>> {
        self.read(&self.errors).await
    }
}
