use chrono::{Duration as ChronoDuration, Utc};
use funding_radar::{
    ContractState, CycleOutcome, EngineConfig, Observation, OpportunityFilter, Page, RadarEngine,
    SortBy,
    store::{InMemoryContractRegistry, InMemoryObservationStore},
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::{
    net::{TcpListener, TcpStream},
    sync::broadcast,
    time::interval,
};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

/// Request envelope from query clients.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum ClientRequest {
    /// Paginated, filterable opportunity query.
    Query {
        #[serde(default)]
        filter: OpportunityFilter,
        #[serde(default)]
        sort: SortBy,
        #[serde(default)]
        page: Page,
    },
    /// Per-instrument statistics feed.
    Stats,
    /// Last bulk-cycle telemetry.
    Telemetry,
}

/// Statistics feed broadcast to subscribed clients after each bulk cycle.
#[derive(Debug, Clone, Serialize)]
struct StatsUpdate {
    r#type: &'static str,
    snapshot_version: u64,
    instruments: usize,
    opportunities: usize,
}

#[tokio::main]
async fn main() {
    init_logging();

    info!("Starting funding-radar server");

    let config = EngineConfig::from_env();
    let observations_path =
        std::env::var("RADAR_OBS_PATH").unwrap_or_else(|_| "observations.jsonl".to_string());

    let store = Arc::new(InMemoryObservationStore::new());
    let registry = Arc::new(InMemoryContractRegistry::new());
    match load_observation_log(&observations_path).await {
        Ok(observations) => {
            info!(
                path = %observations_path,
                count = observations.len(),
                "loaded observation log"
            );
            seed_registry(&registry, &observations, config.staleness_secs);
            store.extend(observations);
        }
        Err(error) => {
            // keep serving with an empty universe; the first query simply
            // returns no opportunities
            error!(path = %observations_path, %error, "failed to load observation log");
        }
    }

    let engine = match RadarEngine::new(config.clone(), store, registry) {
        Ok(engine) => Arc::new(engine),
        Err(error) => {
            error!(%error, "invalid engine configuration");
            return;
        }
    };

    // Broadcast channel for statistics feed updates
    let buffer_size = std::env::var("RADAR_WS_BUFFER_SIZE")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(1_000);
    let (tx, _rx) = broadcast::channel::<StatsUpdate>(buffer_size);
    let tx = Arc::new(tx);

    // WebSocket server, configurable via RADAR_WS_ADDR (default 0.0.0.0:9100)
    let server_addr_str =
        std::env::var("RADAR_WS_ADDR").unwrap_or_else(|_| "0.0.0.0:9100".to_string());
    let server_addr = server_addr_str
        .parse::<SocketAddr>()
        .unwrap_or_else(|_| "0.0.0.0:9100".parse().unwrap());
    {
        let engine = engine.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            start_websocket_server(server_addr, engine, tx).await;
        });
    }
    info!("WebSocket server listening on ws://{}", server_addr);

    // Initial full pass so queries have data before the first tick fires
    if let Err(error) = engine.run_instrument_tick(funding_radar::TickCadence::Slow).await {
        warn!(%error, "initial statistics tick failed");
    }
    match engine.run_bulk_cycle().await {
        Ok(CycleOutcome::Completed(telemetry)) => {
            let _ = tx.send(StatsUpdate {
                r#type: "stats_update",
                snapshot_version: telemetry.snapshot_version,
                instruments: telemetry.instruments_live,
                opportunities: telemetry.opportunities,
            });
        }
        Ok(CycleOutcome::Deferred) => {}
        Err(error) => warn!(%error, "initial bulk cycle failed"),
    }

    // Fast tick: active-zone instruments
    {
        let engine = engine.clone();
        let period = config.fast_tick;
        tokio::spawn(async move {
            let mut timer = interval(period);
            loop {
                timer.tick().await;
                match engine.run_instrument_tick(funding_radar::TickCadence::Fast).await {
                    Ok(refreshed) if refreshed > 0 => {
                        debug!(refreshed, "fast tick refreshed active instruments")
                    }
                    Ok(_) => {}
                    // store outage: skip this tick, retry on the next one
                    Err(error) => warn!(%error, "fast tick skipped"),
                }
            }
        });
    }

    // Slow tick: stable-zone instruments
    {
        let engine = engine.clone();
        let period = config.slow_tick;
        tokio::spawn(async move {
            let mut timer = interval(period);
            loop {
                timer.tick().await;
                match engine.run_instrument_tick(funding_radar::TickCadence::Slow).await {
                    Ok(refreshed) if refreshed > 0 => {
                        debug!(refreshed, "slow tick refreshed stable instruments")
                    }
                    Ok(_) => {}
                    Err(error) => warn!(%error, "slow tick skipped"),
                }
            }
        });
    }

    // Bulk pair-spread cycle on its own cadence
    {
        let engine = engine.clone();
        let tx = tx.clone();
        let period = config.bulk_cadence;
        tokio::spawn(async move {
            let mut timer = interval(period);
            loop {
                timer.tick().await;
                match engine.run_bulk_cycle().await {
                    Ok(CycleOutcome::Completed(telemetry)) => {
                        let _ = tx.send(StatsUpdate {
                            r#type: "stats_update",
                            snapshot_version: telemetry.snapshot_version,
                            instruments: telemetry.instruments_live,
                            opportunities: telemetry.opportunities,
                        });
                    }
                    Ok(CycleOutcome::Deferred) => {
                        debug!("bulk cycle trigger deferred, previous pass still running")
                    }
                    Err(error) => warn!(%error, "bulk cycle skipped"),
                }
            }
        });
    }

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(error) => error!(%error, "failed to listen for shutdown signal"),
    }
}

/// Parse a JSONL observation log produced by the external collector.
async fn load_observation_log(path: &str) -> Result<Vec<Observation>, std::io::Error> {
    let raw = tokio::fs::read_to_string(path).await?;
    let mut observations = Vec::new();
    let mut skipped = 0usize;
    for line in raw.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Observation>(line) {
            Ok(observation) => observations.push(observation),
            Err(_) => skipped += 1,
        }
    }
    if skipped > 0 {
        warn!(skipped, "skipped malformed observation log lines");
    }
    Ok(observations)
}

/// Derive the contract registry from the latest observation per instrument.
///
/// The real registry is upserted by the collection scheduler; this server
/// reconstructs an equivalent snapshot from the log, flagging instruments
/// whose last observation is older than the staleness window.
fn seed_registry(
    registry: &InMemoryContractRegistry,
    observations: &[Observation],
    staleness_secs: i64,
) {
    let now = Utc::now();
    let mut latest: std::collections::HashMap<_, &Observation> = std::collections::HashMap::new();
    for observation in observations {
        latest
            .entry(observation.key())
            .and_modify(|current| {
                if observation.time > current.time {
                    *current = observation;
                }
            })
            .or_insert(observation);
    }

    for (key, observation) in latest {
        let is_stale = now - observation.time
            > ChronoDuration::seconds(staleness_secs.max(0))
                + ChronoDuration::hours(observation.funding_interval_hours.ceil() as i64);
        registry.upsert(ContractState {
            key,
            base_asset: observation.base_asset.clone(),
            quote_asset: observation.quote_asset.clone(),
            current_rate: observation.funding_rate,
            funding_interval_hours: observation.funding_interval_hours,
            mark_price: observation.mark_price,
            open_interest: observation.open_interest,
            last_updated: observation.time,
            is_stale,
        });
    }
}

/// Accept WebSocket query clients.
async fn start_websocket_server(
    addr: SocketAddr,
    engine: Arc<RadarEngine>,
    tx: Arc<broadcast::Sender<StatsUpdate>>,
) {
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(error) => {
            error!(%addr, %error, "failed to bind WebSocket server");
            return;
        }
    };

    info!("WebSocket server bound to {}", addr);

    while let Ok((stream, peer_addr)) = listener.accept().await {
        info!("New WebSocket connection from {}", peer_addr);
        let engine = engine.clone();
        let tx = tx.clone();
        tokio::spawn(handle_client(stream, peer_addr, engine, tx));
    }
}

/// Handle one WebSocket client: answer query requests, forward feed updates.
async fn handle_client(
    stream: TcpStream,
    peer_addr: SocketAddr,
    engine: Arc<RadarEngine>,
    tx: Arc<broadcast::Sender<StatsUpdate>>,
) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(error) => {
            error!("WebSocket handshake failed for {}: {}", peer_addr, error);
            return;
        }
    };

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let mut rx = tx.subscribe();

    let welcome = serde_json::json!({
        "type": "welcome",
        "message": "Connected to funding-radar",
        "snapshot_version": engine.current_snapshot().version,
        "timestamp": Utc::now()
    });
    if let Ok(msg) = serde_json::to_string(&welcome) {
        let _ = ws_sender.send(Message::Text(msg.into())).await;
    }

    loop {
        tokio::select! {
            update = rx.recv() => match update {
                Ok(update) => {
                    if let Ok(json) = serde_json::to_string(&update) {
                        if ws_sender.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Client {} lagged, skipped {} updates", peer_addr, skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            incoming = ws_receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let response = handle_request(&engine, &text);
                    if ws_sender.send(Message::Text(response.into())).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(Message::Ping(_))) => {
                    debug!("Received ping from {}", peer_addr);
                }
                Some(Ok(_)) => {}
                Some(Err(error)) => {
                    error!("WebSocket error for {}: {}", peer_addr, error);
                    break;
                }
            },
        }
    }

    info!("WebSocket connection closed for {}", peer_addr);
}

/// Dispatch one JSON request against the engine.
fn handle_request(engine: &RadarEngine, text: &str) -> String {
    let request = match serde_json::from_str::<ClientRequest>(text) {
        Ok(request) => request,
        Err(error) => {
            return error_response(&format!("invalid request: {error}"));
        }
    };

    let payload = match request {
        ClientRequest::Query { filter, sort, page } => {
            let response = engine.query(&filter, sort, page);
            serde_json::json!({
                "type": "query_result",
                "total": response.total,
                "offset": response.offset,
                "limit": response.limit,
                "cache_hit": response.cache_hit,
                "cache_degraded": engine.cache().is_degraded(),
                "items": response.items,
            })
        }
        ClientRequest::Stats => serde_json::json!({
            "type": "stats",
            "items": engine.statistics_feed(),
        }),
        ClientRequest::Telemetry => serde_json::json!({
            "type": "telemetry",
            "telemetry": engine.telemetry(),
        }),
    };
    serde_json::to_string(&payload).unwrap_or_else(|_| error_response("serialization failed"))
}

fn error_response(message: &str) -> String {
    serde_json::json!({ "type": "error", "message": message }).to_string()
}

/// Initialize logging
fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}
