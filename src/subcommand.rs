use super::*;

mod configure;
mod mine;
mod retry;
mod retry_failed;
mod status;

#[derive(Debug, Parser)]
pub(crate) enum Subcommand {
    #[command(about = "Mine the active challenge and serve live events")]
    Mine(mine::Mine),
    #[command(about = "Show or update the persisted mining configuration")]
    Configure(configure::Configure),
    #[command(about = "Resubmit a single failed solution")]
    Retry(retry::Retry),
    #[command(about = "Resubmit every failed solution recorded recently")]
    RetryFailed(retry_failed::RetryFailed),
    #[command(about = "Report hash server health and hardware recommendations")]
    Status(status::Status),
}

impl Subcommand {
    pub(crate) async fn run(self, settings: Settings, cancel_token: CancellationToken) -> Result {
        match self {
            Self::Mine(mine) => mine.run(settings, cancel_token).await,
            Self::Configure(configure) => configure.run(settings),
            Self::Retry(retry) => retry.run(settings).await,
            Self::RetryFailed(retry_failed) => retry_failed.run(settings).await,
            Self::Status(status) => status.run(settings).await,
        }
    }
}

/// Submission pipeline for offline retries: no compute client and no live
/// challenge, so every recorded failure is eligible.
fn retry_pipeline(settings: &Settings) -> Result<SubmissionPipeline> {
    let ledger = Arc::new(FileLedger::new(&settings.data_dir())?);

    Ok(SubmissionPipeline::new(
        settings.reward_client()?,
        ledger,
        Arc::new(ChallengeTracker::new(None)),
        EventBus::default(),
    ))
}

fn print_json<T: Serialize>(value: &T) -> Result {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
