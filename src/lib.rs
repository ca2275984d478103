use {
    anyhow::{Error, anyhow, bail, ensure},
    arguments::Arguments,
    async_trait::async_trait,
    axum::{
        Json, Router,
        extract::State,
        http::StatusCode,
        response::{
            IntoResponse, Response,
            sse::{self, KeepAlive, Sse},
        },
        routing::get,
    },
    challenge::{ActiveChallenge, ChallengeTracker},
    chrono::{DateTime, Duration as ChronoDuration, Local, SecondsFormat, Timelike, Utc},
    clap::{Args, Parser, ValueEnum},
    compute::{ComputeClient, ComputeError},
    config::{ConfigStore, ConfigUpdate, GroupingMode, MiningConfig},
    dashmap::DashMap,
    derive_more::Display,
    events::{EventBus, MiningEvent},
    futures::stream::{self, Stream},
    hash_rate::HashRate,
    ledger::{ErrorEntry, FileLedger, Ledger, Receipt},
    parking_lot::Mutex,
    reqwest::Url,
    scavenge::{Challenge, ChallengeId, ChallengeResponse, Difficulty, Nonce, Preimage},
    serde::{Deserialize, Serialize},
    serde_json::Value,
    settings::Settings,
    snafu::Snafu,
    stats::{Stats, StatsSnapshot},
    std::{
        collections::{BTreeMap, HashMap, HashSet, VecDeque},
        env,
        fmt::{self, Formatter},
        fs, io,
        net::SocketAddr,
        path::{Path, PathBuf},
        process,
        str::FromStr,
        sync::{
            Arc,
            atomic::{AtomicU64, Ordering},
        },
        time::{Duration, Instant},
    },
    submit::{Outcome, SubmissionPipeline},
    tokio::{
        net::TcpListener,
        runtime::Runtime,
        sync::{Semaphore, broadcast, mpsc, watch},
        task::{JoinHandle, JoinSet},
        time::{MissedTickBehavior, interval, sleep},
    },
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, info, warn},
    tracing_appender::non_blocking,
    tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt},
    wallet::{Address, FileWallet, Wallet},
};

#[cfg(test)]
use {std::sync::atomic::AtomicUsize, tokio::time::timeout};

mod arguments;
pub mod challenge;
pub mod compute;
pub mod config;
pub mod events;
mod grouping;
pub mod hash_rate;
mod http;
pub mod ledger;
mod logs;
pub mod orchestrator;
mod options;
mod pool;
pub mod reward;
pub mod settings;
mod signal;
pub mod stats;
mod subcommand;
pub mod submit;
mod system;
#[cfg(test)]
mod testing;
pub mod wallet;
pub mod worker;

pub const USER_AGENT: &str = "fetcher/0.3.0";
pub const DEFAULT_COMPUTE_URL: &str = "http://127.0.0.1:9001";
pub const DEFAULT_HTTP_PORT: u16 = 3001;
pub const EVENT_CHANNEL_CAPACITY: usize = 10_000;
pub const STATS_INTERVAL: Duration = Duration::from_secs(5);

type Result<T = (), E = Error> = std::result::Result<T, E>;

fn unix_millis(time: DateTime<Utc>) -> i64 {
    time.timestamp_millis()
}

fn short(s: &str) -> &str {
    s.get(..20).unwrap_or(s)
}

pub fn main() {
    let _guard = logs::init();

    let args = Arguments::parse();

    Runtime::new()
        .expect("Failed to create tokio runtime")
        .block_on(async {
            let cancel_token = signal::setup_signal_handler();

            match args.run(cancel_token).await {
                Err(err) => {
                    eprintln!("error: {err}");

                    for (i, cause) in err.chain().skip(1).enumerate() {
                        if i == 0 {
                            eprintln!();
                            eprintln!("because:");
                        }
                        eprintln!("- {cause}");
                    }

                    if env::var_os("RUST_BACKTRACE")
                        .map(|val| val == "1")
                        .unwrap_or_default()
                    {
                        eprintln!();
                        eprintln!("{}", err.backtrace());
                    }
                    process::exit(1);
                }
                Ok(_) => {
                    process::exit(0);
                }
            }
        });
}
