use {
    super::*,
    orchestrator::{AddressView, Orchestrator, OrchestratorError},
    std::convert::Infallible,
    tokio::sync::broadcast::error::RecvError,
    worker::WorkerSnapshot,
};

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

struct ApiError {
    status: StatusCode,
    message: String,
}

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        let status = match err {
            OrchestratorError::Running | OrchestratorError::Configuring => StatusCode::CONFLICT,
            OrchestratorError::Config { .. } => StatusCode::BAD_REQUEST,
            OrchestratorError::NoAddresses | OrchestratorError::Poll { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let message = match std::error::Error::source(&err) {
            Some(source) => format!("{err}: {source}"),
            None => err.to_string(),
        };

        Self { status, message }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorBody {
                error: self.message,
            }),
        )
            .into_response()
    }
}

pub(crate) fn router(orchestrator: Arc<Orchestrator>) -> Router {
    Router::new()
        .route("/events", get(events))
        .route("/api/stats", get(stats))
        .route("/api/workers", get(workers))
        .route("/api/addresses", get(addresses))
        .route("/api/config", get(config).post(update_config))
        .with_state(orchestrator)
}

/// Serve the reporting API on `port` until `cancel` fires.
pub(crate) async fn spawn(
    orchestrator: Arc<Orchestrator>,
    port: u16,
    cancel: CancellationToken,
) -> Result<JoinHandle<()>> {
    let addr = SocketAddr::from(([127, 0, 0, 1], port));

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|err| anyhow!("failed to bind reporting server to {addr}: {err}"))?;

    info!("Serving live events on http://{addr}/events");

    let router = router(orchestrator);

    Ok(tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, router)
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await
        {
            error!("Reporting server error: {err}");
        }
    }))
}

async fn events(
    State(orchestrator): State<Arc<Orchestrator>>,
) -> Sse<impl Stream<Item = Result<sse::Event, Infallible>>> {
    let rx = orchestrator.bus().subscribe();

    let stream = stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let message = sse::Event::default()
                        .event(event.name())
                        .json_data(&event)
                        .unwrap_or_else(|err| {
                            sse::Event::default()
                                .event("error")
                                .data(format!("failed to encode event: {err}"))
                        });

                    return Some((Ok(message), rx));
                }
                Err(RecvError::Lagged(missed)) => {
                    debug!("Event stream client skipped {missed} events");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keepalive"),
    )
}

async fn stats(State(orchestrator): State<Arc<Orchestrator>>) -> Json<StatsSnapshot> {
    Json(orchestrator.stats().snapshot())
}

async fn workers(State(orchestrator): State<Arc<Orchestrator>>) -> Json<Vec<WorkerSnapshot>> {
    Json(orchestrator.stats().workers())
}

async fn addresses(State(orchestrator): State<Arc<Orchestrator>>) -> Json<Vec<AddressView>> {
    Json(orchestrator.addresses_view().await)
}

async fn config(State(orchestrator): State<Arc<Orchestrator>>) -> Json<MiningConfig> {
    Json(orchestrator.config())
}

async fn update_config(
    State(orchestrator): State<Arc<Orchestrator>>,
    Json(update): Json<ConfigUpdate>,
) -> Result<Json<MiningConfig>, ApiError> {
    Ok(Json(orchestrator.update_configuration(&update)?))
}
