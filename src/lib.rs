// ===============================
// src/lib.rs
// ===============================
//
// splitledger: group-expense ledger with balance netting, debt simplification
// and a cache-aside read path.
//
//   gateway  --(commit)--> store --(snapshot)--> balance -> simplify --> service
//      |                                                                  |
//      +--(invalidate)--> cache <------------------(get / set)------------+
//      +--(LedgerEvent)--> recorder (JSONL journal, replay at startup)
//
pub mod balance;
pub mod cache;
pub mod config;
pub mod domain;
pub mod feed;
pub mod gateway;
pub mod http;
pub mod metrics;
pub mod money;
pub mod payment;
pub mod recorder;
pub mod service;
pub mod simplify;
pub mod store;
