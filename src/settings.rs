use {super::*, anyhow::Context};

pub const DEFAULT_API_URL: &str = "https://scavenger.prod.gd.midnighttge.io";

/// TOML config file structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub data_dir: Option<PathBuf>,
    pub compute_url: Option<String>,
    pub api_url: Option<String>,
    pub wallet_file: Option<PathBuf>,
    pub http_port: Option<u16>,
    pub challenge_poll_interval: Option<u64>,
    pub compute: Option<ComputeSection>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ComputeSection {
    pub url: Option<String>,
    pub max_connections: Option<usize>,
    pub max_retries: Option<usize>,
    pub retry_delay_ms: Option<u64>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Settings {
    pub data_dir: Option<PathBuf>,
    pub config: Option<PathBuf>,
    pub compute_url: Option<String>,
    pub api_url: Option<String>,
    pub wallet_file: Option<PathBuf>,
    pub http_port: Option<u16>,
    pub challenge_poll_interval: Option<u64>,
    pub max_connections: Option<usize>,
    pub max_retries: Option<usize>,
    pub retry_delay_ms: Option<u64>,
}

impl Settings {
    /// Load settings from all sources with proper priority
    pub fn load(options: crate::options::Options) -> Result<Self> {
        let mut env = BTreeMap::<String, String>::new();

        for (var, value) in std::env::vars_os() {
            let Some(var) = var.to_str() else {
                continue;
            };

            let Some(key) = var.strip_prefix("FETCHER_") else {
                continue;
            };

            env.insert(
                key.into(),
                value.into_string().map_err(|value| {
                    anyhow!(
                        "environment variable `{var}` not valid unicode: `{}`",
                        value.to_string_lossy()
                    )
                })?,
            );
        }

        Self::merge(options, env)
    }

    pub fn merge(options: crate::options::Options, env: BTreeMap<String, String>) -> Result<Self> {
        let settings = Self::from_options(&options);

        let settings = settings.or(Self::from_env(&env)?);

        let config = if let Some(config_path) = Self::find_config_path(&settings) {
            toml::from_str(&fs::read_to_string(&config_path).context(anyhow!(
                "failed to open config file `{}`",
                config_path.display()
            ))?)
            .context(anyhow!(
                "failed to deserialize config file `{}`",
                config_path.display()
            ))?
        } else {
            Config::default()
        };

        let settings = settings.or(Self::from_config(&config)).or_defaults()?;

        Self::validate(&settings)?;

        Ok(settings)
    }

    fn find_config_path(settings: &Self) -> Option<PathBuf> {
        if let Some(path) = &settings.config {
            return Some(path.clone());
        }

        if let Some(dir) = &settings.data_dir {
            let path = dir.join("fetcher.toml");
            if path.exists() {
                return Some(path);
            }
        }

        // ~/.config/fetcher/fetcher.toml
        if let Some(config_dir) = dirs::config_dir() {
            let path = config_dir.join("fetcher").join("fetcher.toml");
            if path.exists() {
                return Some(path);
            }
        }

        None
    }

    pub fn from_options(options: &crate::options::Options) -> Self {
        Self {
            data_dir: options.data_dir.clone(),
            config: options.config.clone(),
            compute_url: options.compute_url.clone(),
            api_url: options.api_url.clone(),
            wallet_file: options.wallet_file.clone(),
            http_port: options.http_port,
            challenge_poll_interval: options.challenge_poll_interval,
            max_connections: options.max_connections,
            max_retries: options.max_retries,
            retry_delay_ms: options.retry_delay_ms,
        }
    }

    pub fn from_env(env: &BTreeMap<String, String>) -> Result<Self> {
        let get_string = |key: &str| env.get(key).cloned();

        let get_path = |key: &str| env.get(key).map(PathBuf::from);

        fn parse<T: FromStr>(env: &BTreeMap<String, String>, key: &str) -> Result<Option<T>>
        where
            T::Err: std::error::Error + Send + Sync + 'static,
        {
            env.get(key)
                .map(|value| value.parse::<T>())
                .transpose()
                .with_context(|| {
                    format!(
                        "failed to parse environment variable FETCHER_{key} as {}",
                        std::any::type_name::<T>()
                    )
                })
        }

        Ok(Self {
            data_dir: get_path("DATA_DIR"),
            config: get_path("CONFIG"),
            compute_url: get_string("COMPUTE_URL"),
            api_url: get_string("API_URL"),
            wallet_file: get_path("WALLET_FILE"),
            http_port: parse(env, "HTTP_PORT")?,
            challenge_poll_interval: parse(env, "CHALLENGE_POLL_INTERVAL")?,
            max_connections: parse(env, "MAX_CONNECTIONS")?,
            max_retries: parse(env, "MAX_RETRIES")?,
            retry_delay_ms: parse(env, "RETRY_DELAY_MS")?,
        })
    }

    pub fn from_config(config: &Config) -> Self {
        let compute = config.compute.as_ref();

        Self {
            data_dir: config.data_dir.clone(),
            config: None,
            // [compute] section overrides the top-level key
            compute_url: compute
                .and_then(|c| c.url.clone())
                .or(config.compute_url.clone()),
            api_url: config.api_url.clone(),
            wallet_file: config.wallet_file.clone(),
            http_port: config.http_port,
            challenge_poll_interval: config.challenge_poll_interval,
            max_connections: compute.and_then(|c| c.max_connections),
            max_retries: compute.and_then(|c| c.max_retries),
            retry_delay_ms: compute.and_then(|c| c.retry_delay_ms),
        }
    }

    /// Merge self with another Settings, self takes priority
    pub fn or(self, other: Self) -> Self {
        Self {
            data_dir: self.data_dir.or(other.data_dir),
            config: self.config.or(other.config),
            compute_url: self.compute_url.or(other.compute_url),
            api_url: self.api_url.or(other.api_url),
            wallet_file: self.wallet_file.or(other.wallet_file),
            http_port: self.http_port.or(other.http_port),
            challenge_poll_interval: self
                .challenge_poll_interval
                .or(other.challenge_poll_interval),
            max_connections: self.max_connections.or(other.max_connections),
            max_retries: self.max_retries.or(other.max_retries),
            retry_delay_ms: self.retry_delay_ms.or(other.retry_delay_ms),
        }
    }

    fn or_defaults(self) -> Result<Self> {
        let data_dir = match self.data_dir {
            Some(dir) => dir,
            None => dirs::data_dir()
                .ok_or_else(|| anyhow!("could not get data dir"))?
                .join("fetcher"),
        };

        let wallet_file = self
            .wallet_file
            .unwrap_or_else(|| data_dir.join("wallet.json"));

        Ok(Self {
            config: self.config,
            compute_url: Some(
                self.compute_url
                    .unwrap_or_else(|| DEFAULT_COMPUTE_URL.into()),
            ),
            api_url: Some(self.api_url.unwrap_or_else(|| DEFAULT_API_URL.into())),
            wallet_file: Some(wallet_file),
            http_port: Some(self.http_port.unwrap_or(DEFAULT_HTTP_PORT)),
            challenge_poll_interval: Some(self.challenge_poll_interval.unwrap_or(5)),
            max_connections: Some(self.max_connections.unwrap_or(50)),
            max_retries: Some(self.max_retries.unwrap_or(3)),
            retry_delay_ms: Some(self.retry_delay_ms.unwrap_or(100)),
            data_dir: Some(data_dir),
        })
    }

    fn validate(settings: &Self) -> Result<()> {
        for (name, url) in [
            ("compute", &settings.compute_url),
            ("reward API", &settings.api_url),
        ] {
            if let Some(url) = url {
                Url::parse(url).with_context(|| format!("invalid {name} url `{url}`"))?;
            }
        }

        ensure!(
            settings.max_connections != Some(0),
            "max connections must be at least 1"
        );
        ensure!(
            settings.max_retries != Some(0),
            "max retries must be at least 1"
        );
        ensure!(
            settings.challenge_poll_interval != Some(0),
            "challenge poll interval must be at least 1 second"
        );

        Ok(())
    }

    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_default()
    }

    pub fn compute_url(&self) -> &str {
        self.compute_url.as_deref().unwrap_or(DEFAULT_COMPUTE_URL)
    }

    pub fn api_url(&self) -> &str {
        self.api_url.as_deref().unwrap_or(DEFAULT_API_URL)
    }

    pub fn wallet_file(&self) -> PathBuf {
        self.wallet_file
            .clone()
            .unwrap_or_else(|| self.data_dir().join("wallet.json"))
    }

    pub fn http_port(&self) -> u16 {
        self.http_port.unwrap_or(DEFAULT_HTTP_PORT)
    }

    pub fn challenge_poll_interval(&self) -> Duration {
        Duration::from_secs(self.challenge_poll_interval.unwrap_or(5))
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections.unwrap_or(50)
    }

    pub fn max_retries(&self) -> usize {
        self.max_retries.unwrap_or(3)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms.unwrap_or(100))
    }

    pub fn compute_client(&self) -> Result<ComputeClient> {
        ComputeClient::new(
            self.compute_url(),
            compute::ClientOptions {
                max_connections: self.max_connections(),
                max_retries: self.max_retries(),
                retry_delay: self.retry_delay(),
                ..Default::default()
            },
        )
    }

    pub fn reward_client(&self) -> Result<reward::RewardClient> {
        reward::RewardClient::new(self.api_url())
    }
}
