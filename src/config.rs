use {super::*, snafu::ResultExt};

pub const CONFIG_FILE: &str = "mining-config.json";
pub const DEFAULT_BATCH_SIZE: usize = 300;
pub const AUTO_WORKERS_PER_ADDRESS: usize = 5;

const WORKER_THREADS: (usize, usize) = (1, 256);
const BATCH_SIZE: (usize, usize) = (50, 10_000);
const WORKERS_PER_ADDRESS: (usize, usize) = (1, 256);

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ConfigError {
    #[snafu(display("{field} must be between {min} and {max}, got {value}"))]
    OutOfRange {
        field: &'static str,
        value: usize,
        min: usize,
        max: usize,
    },

    #[snafu(display("failed to write mining config `{}`", path.display()))]
    Write { path: PathBuf, source: io::Error },

    #[snafu(display("failed to serialize mining config"))]
    Serialize { source: serde_json::Error },
}

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize, ValueEnum, Display,
)]
#[serde(rename_all = "kebab-case")]
pub enum GroupingMode {
    #[default]
    #[display("auto")]
    Auto,
    #[display("all-on-one")]
    AllOnOne,
    #[display("grouped")]
    Grouped,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MiningConfig {
    pub worker_threads: usize,
    pub batch_size: Option<usize>,
    pub worker_grouping_mode: GroupingMode,
    pub workers_per_address: usize,
    pub continue_after_solution: bool,
}

impl Default for MiningConfig {
    fn default() -> Self {
        Self {
            worker_threads: 11,
            batch_size: None,
            worker_grouping_mode: GroupingMode::Auto,
            workers_per_address: AUTO_WORKERS_PER_ADDRESS,
            continue_after_solution: false,
        }
    }
}

impl MiningConfig {
    pub fn batch_size(&self) -> usize {
        self.batch_size.unwrap_or(DEFAULT_BATCH_SIZE)
    }

    /// Workers per group after the grouping mode is applied.
    pub fn effective_workers_per_address(&self) -> usize {
        match self.worker_grouping_mode {
            GroupingMode::Auto => AUTO_WORKERS_PER_ADDRESS,
            GroupingMode::AllOnOne => self.worker_threads,
            GroupingMode::Grouped => self.workers_per_address,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check("workerThreads", self.worker_threads, WORKER_THREADS)?;
        if let Some(batch_size) = self.batch_size {
            check("batchSize", batch_size, BATCH_SIZE)?;
        }
        check(
            "workersPerAddress",
            self.workers_per_address,
            WORKERS_PER_ADDRESS,
        )
    }
}

fn check(field: &'static str, value: usize, (min, max): (usize, usize)) -> Result<(), ConfigError> {
    snafu::ensure!(
        (min..=max).contains(&value),
        OutOfRangeSnafu {
            field,
            value,
            min,
            max
        }
    );
    Ok(())
}

/// A partial configuration. Absent fields keep their current value.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, Args)]
#[serde(rename_all = "camelCase")]
pub struct ConfigUpdate {
    #[arg(long, help = "Run <WORKER_THREADS> concurrent workers.")]
    pub worker_threads: Option<usize>,

    #[arg(long, help = "Request <BATCH_SIZE> hashes per batch.")]
    pub batch_size: Option<usize>,

    #[arg(long, value_enum, help = "Distribute workers across addresses with <WORKER_GROUPING_MODE>.")]
    pub worker_grouping_mode: Option<GroupingMode>,

    #[arg(long, help = "Assign <WORKERS_PER_ADDRESS> workers to each address in grouped mode.")]
    pub workers_per_address: Option<usize>,

    #[arg(long, help = "Keep mining an address after it has a solution for the current challenge.")]
    pub continue_after_solution: Option<bool>,
}

impl ConfigUpdate {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn apply(&self, config: &MiningConfig) -> Result<MiningConfig, ConfigError> {
        if let Some(worker_threads) = self.worker_threads {
            check("workerThreads", worker_threads, WORKER_THREADS)?;
        }
        if let Some(batch_size) = self.batch_size {
            check("batchSize", batch_size, BATCH_SIZE)?;
        }
        if let Some(workers_per_address) = self.workers_per_address {
            check("workersPerAddress", workers_per_address, WORKERS_PER_ADDRESS)?;
        }

        Ok(MiningConfig {
            worker_threads: self.worker_threads.unwrap_or(config.worker_threads),
            batch_size: self.batch_size.or(config.batch_size),
            worker_grouping_mode: self
                .worker_grouping_mode
                .unwrap_or(config.worker_grouping_mode),
            workers_per_address: self
                .workers_per_address
                .unwrap_or(config.workers_per_address),
            continue_after_solution: self
                .continue_after_solution
                .unwrap_or(config.continue_after_solution),
        })
    }
}

/// Mining configuration persisted as JSON in the data directory.
#[derive(Debug)]
pub struct ConfigStore {
    path: PathBuf,
    current: Mutex<MiningConfig>,
}

impl ConfigStore {
    pub fn open(data_dir: &Path) -> Self {
        let path = data_dir.join(CONFIG_FILE);
        let current = Self::read(&path);
        Self {
            path,
            current: Mutex::new(current),
        }
    }

    fn read(path: &Path) -> MiningConfig {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return MiningConfig::default();
            }
            Err(err) => {
                warn!("Failed to read {}: {err}, using defaults", path.display());
                return MiningConfig::default();
            }
        };

        match serde_json::from_str::<MiningConfig>(&contents) {
            Ok(config) => match config.validate() {
                Ok(()) => config,
                Err(err) => {
                    warn!("Ignoring {}: {err}", path.display());
                    MiningConfig::default()
                }
            },
            Err(err) => {
                warn!("Failed to parse {}: {err}, using defaults", path.display());
                MiningConfig::default()
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self) -> MiningConfig {
        self.current.lock().clone()
    }

    pub fn update(&self, update: &ConfigUpdate) -> Result<MiningConfig, ConfigError> {
        let mut current = self.current.lock();
        let next = update.apply(&current)?;
        self.save(&next)?;
        *current = next.clone();
        Ok(next)
    }

    fn save(&self, config: &MiningConfig) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(config).context(SerializeSnafu)?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).context(WriteSnafu {
                path: parent.to_path_buf(),
            })?;
        }

        fs::write(&self.path, json).context(WriteSnafu {
            path: self.path.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use {super::*, pretty_assertions::assert_eq};

    #[test]
    fn defaults() {
        let config = MiningConfig::default();
        assert_eq!(config.worker_threads, 11);
        assert_eq!(config.batch_size(), 300);
        assert_eq!(config.worker_grouping_mode, GroupingMode::Auto);
        assert_eq!(config.workers_per_address, 5);
        assert!(!config.continue_after_solution);
    }

    #[test]
    fn grouping_mode_serde() {
        assert_eq!(
            serde_json::to_string(&GroupingMode::AllOnOne).unwrap(),
            "\"all-on-one\""
        );
        assert_eq!(
            serde_json::from_str::<GroupingMode>("\"grouped\"").unwrap(),
            GroupingMode::Grouped
        );
        assert_eq!(GroupingMode::AllOnOne.to_string(), "all-on-one");
    }

    #[test]
    fn parses_persisted_file() {
        let config: MiningConfig = serde_json::from_str(
            r#"{"workerThreads":4,"batchSize":null,"workerGroupingMode":"grouped","workersPerAddress":2}"#,
        )
        .unwrap();

        assert_eq!(
            config,
            MiningConfig {
                worker_threads: 4,
                batch_size: None,
                worker_grouping_mode: GroupingMode::Grouped,
                workers_per_address: 2,
                continue_after_solution: false,
            }
        );
    }

    #[test]
    fn update_merges_present_fields() {
        let update = ConfigUpdate {
            batch_size: Some(1000),
            ..Default::default()
        };
        let next = update.apply(&MiningConfig::default()).unwrap();
        assert_eq!(next.batch_size(), 1000);
        assert_eq!(next.worker_threads, 11);
    }

    #[test]
    fn update_rejects_out_of_range() {
        for update in [
            ConfigUpdate {
                worker_threads: Some(0),
                ..Default::default()
            },
            ConfigUpdate {
                worker_threads: Some(257),
                ..Default::default()
            },
            ConfigUpdate {
                batch_size: Some(49),
                ..Default::default()
            },
            ConfigUpdate {
                batch_size: Some(10_001),
                ..Default::default()
            },
            ConfigUpdate {
                workers_per_address: Some(0),
                ..Default::default()
            },
        ] {
            assert!(
                matches!(
                    update.apply(&MiningConfig::default()),
                    Err(ConfigError::OutOfRange { .. })
                ),
                "{update:?}"
            );
        }
    }

    #[test]
    fn effective_workers_per_address() {
        let mut config = MiningConfig {
            worker_threads: 12,
            workers_per_address: 3,
            ..Default::default()
        };
        assert_eq!(config.effective_workers_per_address(), 5);

        config.worker_grouping_mode = GroupingMode::Grouped;
        assert_eq!(config.effective_workers_per_address(), 3);

        config.worker_grouping_mode = GroupingMode::AllOnOne;
        assert_eq!(config.effective_workers_per_address(), 12);
    }

    #[test]
    fn store_defaults_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::open(dir.path());
        assert_eq!(store.get(), MiningConfig::default());
    }

    #[test]
    fn store_defaults_when_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILE), "{not json").unwrap();
        let store = ConfigStore::open(dir.path());
        assert_eq!(store.get(), MiningConfig::default());
    }

    #[test]
    fn store_persists_updates() {
        let dir = tempfile::tempdir().unwrap();

        let store = ConfigStore::open(dir.path());
        store
            .update(&ConfigUpdate {
                worker_threads: Some(3),
                worker_grouping_mode: Some(GroupingMode::AllOnOne),
                ..Default::default()
            })
            .unwrap();

        let reopened = ConfigStore::open(dir.path());
        assert_eq!(reopened.get().worker_threads, 3);
        assert_eq!(
            reopened.get().worker_grouping_mode,
            GroupingMode::AllOnOne
        );
    }

    #[test]
    fn failed_update_leaves_config_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::open(dir.path());
        assert!(
            store
                .update(&ConfigUpdate {
                    batch_size: Some(1),
                    ..Default::default()
                })
                .is_err()
        );
        assert_eq!(store.get(), MiningConfig::default());
        assert!(!dir.path().join(CONFIG_FILE).exists());
    }
}
