// ===============================
// src/main.rs
// ===============================
/*
 # plan for one group (ids are printed in the "group created" log lines)
curl -s localhost:8080/groups/<group_id>/balances

 # cache behaviour & mutation flow
curl -s localhost:9898/metrics | egrep '^balance_cache_(hits|misses|errors)'
curl -s localhost:9898/metrics | grep '^ledger_mutations_total'

*/
/*
=============================================================================
Project : splitledger — async group-expense ledger & debt settlement engine
Module  : main.rs
Version : 0.1.0
Author  : Kukuh Tripamungkas Wicaksono (Kukuh TW)
Email   : kukuhtw@gmail.com
WhatsApp: https://wa.me/628129893706
LinkedIn: https://id.linkedin.com/in/kukuhtw
License : MIT (see LICENSE)

Summary : Keeps shared-expense ledgers per group, nets member balances,
          simplifies debts into a minimal list of payments, caches plans
          with safe degradation, verifies payment callbacks, exposes
          Prometheus metrics, and journals ledger events as JSONL.

(c) 2025 Kukuh TW. All rights reserved where applicable.
=============================================================================
*/
use std::sync::Arc;

use tokio::{
    select,
    sync::mpsc,
    time::{interval, Duration, MissedTickBehavior},
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use splitledger::cache::{AnyBackend, BalanceCache, MemoryBackend, NullBackend};
use splitledger::config::{self, CacheMode};
use splitledger::domain::LedgerEvent;
use splitledger::gateway::MutationGateway;
use splitledger::metrics::{
    self, BALANCE_REQUESTS, CACHE_HITS, CACHE_PURGED, CONFIG_CACHE_MODE, CONFIG_CACHE_TTL, GROUPS,
};
use splitledger::money::format2;
use splitledger::service::BalanceService;
use splitledger::store::{InMemoryStore, LedgerStore};
use splitledger::{feed, http, recorder};

#[tokio::main]
async fn main() {
    // ---- Logging (RUST_LOG, default info) ----
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // ---- Config ----
    let args = config::load();

    // ---- Metrics ----
    metrics::init();
    CONFIG_CACHE_MODE.with_label_values(&[args.cache_mode.as_str()]).set(1);
    CONFIG_CACHE_TTL.set(args.cache.ttl.as_secs() as i64);

    info!(
        http_port = args.http_port,
        metrics_port = args.metrics_port,
        cache_mode = args.cache_mode.as_str(),
        cache_ttl_s = args.cache.ttl.as_secs(),
        cache_timeout_ms = args.cache.op_timeout.as_millis() as u64,
        epsilon = %format2(args.simplify.epsilon()),
        record_file = ?args.record_file,
        payments = args.payment_secret.is_some(),
        mock_feed = args.mock.enabled,
        "startup config"
    );

    // ---- Store (+ journal replay) ----
    let store = Arc::new(InMemoryStore::new());
    if let (true, Some(path)) = (args.replay_on_start, args.record_file.as_deref()) {
        match recorder::replay(store.as_ref(), path).await {
            Ok(stats) => info!(
                applied = stats.applied,
                malformed = stats.malformed,
                rejected = stats.rejected,
                "journal replayed"
            ),
            Err(e) => error!(?e, %path, "journal replay failed, starting empty"),
        }
    }

    // ---- Cache ----
    let backend = match args.cache_mode {
        CacheMode::Memory => AnyBackend::Memory(MemoryBackend::new()),
        CacheMode::Off => AnyBackend::Null(NullBackend),
    };
    let cache = Arc::new(BalanceCache::new(backend, args.cache.clone()));

    if cache.backend().memory().is_some() {
        let cache = cache.clone();
        let every = args.cache_sweep;
        tokio::spawn(async move {
            let mut tick = interval(every);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                if let Some(mem) = cache.backend().memory() {
                    let n = mem.purge_expired().await;
                    if n > 0 {
                        CACHE_PURGED.inc_by(n as u64);
                        tracing::debug!(purged = n, "cache sweep");
                    }
                }
            }
        });
    }

    // ---- Recorder (optional) ----
    let mut gateway = MutationGateway::new(store.clone(), cache.clone()).with_epsilon(args.simplify.epsilon());
    if let Some(path) = args.record_file.clone() {
        let (rec_tx, rec_rx) = mpsc::channel::<LedgerEvent>(8192);
        tokio::spawn(recorder::run(rec_rx, path));
        gateway = gateway.with_journal(rec_tx);
    }
    let gateway = Arc::new(gateway);
    let service = Arc::new(BalanceService::new(store.clone(), cache.clone(), args.simplify.clone()));

    // ---- HTTP ----
    tokio::spawn(http::serve(args.http_port, Some(service.clone())));
    if args.metrics_port != args.http_port {
        tokio::spawn(http::serve::<InMemoryStore, AnyBackend>(args.metrics_port, None));
    }

    // ---- Mock feed ----
    if args.mock.enabled {
        let mut groups = Vec::new();
        for id in store.group_ids().await {
            if let Ok(Some(g)) = store.group(&id).await {
                groups.push((g.id, g.members));
            }
        }
        if groups.is_empty() {
            groups = feed::seed_groups(gateway.as_ref(), args.mock.groups, args.mock.members).await;
        }
        info!(groups = groups.len(), every_ms = args.mock.interval.as_millis() as u64, "mock feed starting");
        tokio::spawn(feed::run_mock(
            gateway.clone(),
            service.clone(),
            groups,
            args.payment_secret.clone(),
            args.mock.interval,
        ));
    }

    // ---- Heartbeat ----
    let mut last_requests = BALANCE_REQUESTS.get();
    let mut last_hits = CACHE_HITS.get();

    loop {
        select! {
            _ = tokio::signal::ctrl_c() => {
                info!("ctrl-c, shutting down");
                break;
            }
            _ = tokio::time::sleep(Duration::from_secs(1)) => {
                let groups = store.group_ids().await.len();
                GROUPS.set(groups as i64);
                let (requests, hits) = (BALANCE_REQUESTS.get(), CACHE_HITS.get());
                info!(
                    groups,
                    requests = requests - last_requests,
                    cache_hits = hits - last_hits,
                    "heartbeat"
                );
                last_requests = requests;
                last_hits = hits;
            }
        }
    }
}
