use {super::*, orchestrator::Orchestrator};

#[derive(Debug, Parser)]
pub(crate) struct Mine {
    #[command(flatten)]
    pub(crate) config: ConfigUpdate,
    #[arg(long, help = "Do not serve the reporting API and live event stream.")]
    pub(crate) no_http: bool,
}

impl Mine {
    pub(crate) async fn run(self, settings: Settings, cancel_token: CancellationToken) -> Result {
        let data_dir = settings.data_dir();

        let ledger = Arc::new(FileLedger::new(&data_dir)?);
        let store = Arc::new(ConfigStore::open(&data_dir));
        let wallet = Arc::new(FileWallet::load(&settings.wallet_file())?);
        let bus = EventBus::default();

        let orchestrator = Arc::new(Orchestrator::new(
            store,
            wallet,
            ledger,
            settings.compute_client()?,
            settings.reward_client()?,
            bus.clone(),
            settings.challenge_poll_interval(),
        ));

        if !self.config.is_empty() {
            let config = orchestrator.update_configuration(&self.config)?;
            info!(
                "Mining with {} workers, batch size {}, {} grouping",
                config.worker_threads,
                config.batch_size(),
                config.worker_grouping_mode
            );
        }

        let stats = orchestrator
            .stats()
            .clone()
            .spawn(bus, cancel_token.clone());

        let http = if self.no_http {
            None
        } else {
            Some(http::spawn(orchestrator.clone(), settings.http_port(), cancel_token.clone()).await?)
        };

        if let Err(err) = orchestrator.start().await {
            cancel_token.cancel();
            return Err(err.into());
        }

        cancel_token.cancelled().await;

        info!("Shutting down");

        orchestrator.stop().await;

        stats.await.ok();

        if let Some(http) = http {
            http.await.ok();
        }

        Ok(())
    }
}
