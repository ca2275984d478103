use super::*;

#[derive(Debug, Parser)]
pub(crate) struct RetryFailed {
    #[arg(
        long,
        default_value_t = 24,
        help = "Resubmit failures recorded in the last <HOURS> hours."
    )]
    pub(crate) hours: u64,
}

impl RetryFailed {
    pub(crate) async fn run(self, settings: Settings) -> Result {
        let pipeline = retry_pipeline(&settings)?;

        let summary = pipeline
            .retry_failed(Duration::from_secs(self.hours * 60 * 60))
            .await?;

        info!(
            "Retried failed submissions: {} succeeded, {} failed",
            summary.succeeded, summary.failed
        );

        print_json(&summary)
    }
}
