// ===============================
// src/metrics.rs
// ===============================
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};

// Single custom registry (we register everything here)
pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

// -------- Read path --------
pub static BALANCE_REQUESTS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("balance_requests_total", "group balance requests").unwrap()
});

pub static BALANCE_COMPUTES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("balance_computes_total", "balance recomputations (cache misses served)").unwrap()
});

// Compute latency: snapshot fetch + calculator + simplifier (milliseconds)
pub static COMPUTE_LATENCY_MS: Lazy<Histogram> = Lazy::new(|| {
    Histogram::with_opts(
        HistogramOpts::new("balance_compute_latency_ms", "Latency of a balance recomputation (ms)")
            .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 50.0]),
    )
    .unwrap()
});

pub static INSTRUCTIONS: Lazy<Histogram> = Lazy::new(|| {
    Histogram::with_opts(
        HistogramOpts::new("settlement_instructions", "instructions per computed plan")
            .buckets(vec![0.0, 1.0, 2.0, 4.0, 8.0, 16.0, 32.0]),
    )
    .unwrap()
});

pub static SKIPPED_REFS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("ledger_skipped_refs_total", "ledger entries referencing non-members").unwrap()
});

pub static IGNORED_SETTLEMENTS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("ledger_ignored_settlements_total", "non-success settlements ignored").unwrap()
});

// -------- Cache --------
pub static CACHE_HITS: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("balance_cache_hits_total", "balance cache hits").unwrap());

pub static CACHE_MISSES: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("balance_cache_misses_total", "balance cache misses").unwrap());

pub static CACHE_INVALIDATIONS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("balance_cache_invalidations_total", "balance cache invalidations").unwrap()
});

pub static CACHE_ERRORS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("balance_cache_errors_total", "cache operations degraded to miss/no-op"),
        &["op"],
    )
    .unwrap()
});

pub static CACHE_PURGED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("balance_cache_purged_total", "expired entries removed by the sweeper").unwrap()
});

// -------- Mutations --------
pub static MUTATIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(Opts::new("ledger_mutations_total", "committed ledger mutations"), &["kind"])
        .unwrap()
});

pub static REJECTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("ledger_mutation_rejects_total", "mutations rejected at the gateway"),
        &["reason"],
    )
    .unwrap()
});

pub static PAYMENT_CONFIRMATIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("payment_confirmations_total", "payment confirmations by outcome"),
        &["outcome"],
    )
    .unwrap()
});

pub static GROUPS: Lazy<IntGauge> =
    Lazy::new(|| IntGauge::new("ledger_groups", "groups currently in the store").unwrap());

// ---- Config visibility ----
pub static CONFIG_CACHE_MODE: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(Opts::new("config_cache_mode", "cache mode (label: mode)"), &["mode"]).unwrap()
});

pub static CONFIG_CACHE_TTL: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("config_cache_ttl_seconds", "balance cache ttl (seconds)").unwrap()
});

pub fn init() {
    // Register all metrics to the custom registry; repeat calls are harmless.
    for m in [
        REGISTRY.register(Box::new(BALANCE_REQUESTS.clone())),
        REGISTRY.register(Box::new(BALANCE_COMPUTES.clone())),
        REGISTRY.register(Box::new(COMPUTE_LATENCY_MS.clone())),
        REGISTRY.register(Box::new(INSTRUCTIONS.clone())),
        REGISTRY.register(Box::new(SKIPPED_REFS.clone())),
        REGISTRY.register(Box::new(IGNORED_SETTLEMENTS.clone())),
        REGISTRY.register(Box::new(CACHE_HITS.clone())),
        REGISTRY.register(Box::new(CACHE_MISSES.clone())),
        REGISTRY.register(Box::new(CACHE_INVALIDATIONS.clone())),
        REGISTRY.register(Box::new(CACHE_ERRORS.clone())),
        REGISTRY.register(Box::new(CACHE_PURGED.clone())),
        REGISTRY.register(Box::new(MUTATIONS.clone())),
        REGISTRY.register(Box::new(REJECTS.clone())),
        REGISTRY.register(Box::new(PAYMENT_CONFIRMATIONS.clone())),
        REGISTRY.register(Box::new(GROUPS.clone())),
        // Config visibility
        REGISTRY.register(Box::new(CONFIG_CACHE_MODE.clone())),
        REGISTRY.register(Box::new(CONFIG_CACHE_TTL.clone())),
    ] {
        let _ = m;
    }
}

// Encode all metrics in Prometheus text format
pub fn encode_metrics() -> Vec<u8> {
    let encoder = TextEncoder::new();
    let families = REGISTRY.gather();
    let mut buf = Vec::new();
    if encoder.encode(&families, &mut buf).is_err() || buf.is_empty() {
        buf.extend_from_slice(b"# no metrics\n");
    }
    buf
}
