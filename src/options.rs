use super::*;

#[derive(Clone, Default, Debug, Parser)]
pub struct Options {
    #[arg(long, help = "Load configuration from <CONFIG>.")]
    pub config: Option<PathBuf>,

    #[arg(long, alias = "datadir", help = "Store receipts and config in <DATA_DIR>.")]
    pub data_dir: Option<PathBuf>,

    #[arg(long, help = "Connect to the hash server at <COMPUTE_URL>.")]
    pub compute_url: Option<String>,

    #[arg(long, help = "Submit solutions to the reward API at <API_URL>.")]
    pub api_url: Option<String>,

    #[arg(long, help = "Load mining addresses from <WALLET_FILE>.")]
    pub wallet_file: Option<PathBuf>,

    #[arg(long, help = "Serve the live event stream on <HTTP_PORT>.")]
    pub http_port: Option<u16>,

    #[arg(long, help = "Poll the reward API for a new challenge every <CHALLENGE_POLL_INTERVAL> seconds.")]
    pub challenge_poll_interval: Option<u64>,

    #[arg(long, help = "Open at most <MAX_CONNECTIONS> concurrent requests to the hash server.")]
    pub max_connections: Option<usize>,

    #[arg(long, help = "Attempt each hash request at most <MAX_RETRIES> times.")]
    pub max_retries: Option<usize>,

    #[arg(long, help = "Back off <RETRY_DELAY_MS> milliseconds before the first retry.")]
    pub retry_delay_ms: Option<u64>,
}
