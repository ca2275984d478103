use {
    super::*,
    system::{Recommendations, SystemSpecs},
};

#[derive(Debug, Parser)]
pub(crate) struct Status {}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Report {
    compute_url: String,
    healthy: bool,
    ready: bool,
    config: MiningConfig,
    system: SystemSpecs,
    recommendations: Recommendations,
}

impl Status {
    pub(crate) async fn run(self, settings: Settings) -> Result {
        let compute = settings.compute_client()?;

        let healthy = compute.health_check().await;
        let ready = healthy && compute.is_ready().await;

        let system = SystemSpecs::detect();

        print_json(&Report {
            compute_url: compute.url().to_string(),
            healthy,
            ready,
            config: ConfigStore::open(&settings.data_dir()).get(),
            recommendations: system::recommendations(&system),
            system,
        })
    }
}
