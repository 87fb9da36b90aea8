// ===============================
// src/recorder.rs
// ===============================
//
// Ledger journal (JSONL):
// - every committed LedgerEvent is appended as one line
// - BufWriter, flushed every second and every 1000 events
// - parent directory is created if missing
// - on write failure the file is reopened once and the write retried
// - replay() rebuilds an in-memory store from the journal at startup
//
// ENV: `RECORD_FILE=/path/to/ledger.jsonl` enables it (see config.rs).
//
use std::io;
use std::path::Path;

use tokio::{
    fs::{self, File, OpenOptions},
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter},
    sync::mpsc,
    time::{interval, Duration, MissedTickBehavior},
};
use tracing::{error, info, warn};

use crate::domain::LedgerEvent;
use crate::store::{LedgerStore, StoreError};

const FLUSH_EVERY_N_EVENTS: u32 = 1000;

async fn open_writer(path: &str) -> io::Result<BufWriter<File>> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            if let Err(e) = fs::create_dir_all(parent).await {
                error!(?e, %path, "recorder: create_dir_all failed");
            }
        }
    }
    let file = OpenOptions::new().create(true).append(true).open(path).await?;
    Ok(BufWriter::new(file))
}

async fn write_line(writer: &mut BufWriter<File>, line: &str) -> io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await
}

pub async fn run(mut rx: mpsc::Receiver<LedgerEvent>, path: String) {
    let mut writer = match open_writer(&path).await {
        Ok(w) => w,
        Err(e) => {
            error!(?e, %path, "recorder: open failed, journal disabled");
            return;
        }
    };
    info!(%path, "recorder: started");

    let mut tick = interval(Duration::from_secs(1));
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut since_last_flush: u32 = 0;

    loop {
        tokio::select! {
            maybe_ev = rx.recv() => {
                let Some(ev) = maybe_ev else {
                    let _ = writer.flush().await;
                    info!("recorder: channel closed, stopped");
                    break;
                };
                let line = match serde_json::to_string(&ev) {
                    Ok(s) => s,
                    Err(e) => {
                        error!(?e, kind = ev.kind(), "recorder: serialize error, skip event");
                        continue;
                    }
                };
                if let Err(e) = write_line(&mut writer, &line).await {
                    error!(?e, "recorder: write failed, attempting reopen");
                    writer = match open_writer(&path).await {
                        Ok(w) => w,
                        Err(e2) => {
                            error!(?e2, "recorder: reopen failed, journal stopped");
                            return;
                        }
                    };
                    if let Err(e2) = write_line(&mut writer, &line).await {
                        error!(?e2, kind = ev.kind(), "recorder: write failed again after reopen, drop event");
                        continue;
                    }
                }

                since_last_flush += 1;
                if since_last_flush >= FLUSH_EVERY_N_EVENTS {
                    let _ = writer.flush().await;
                    since_last_flush = 0;
                }
            }

            _ = tick.tick() => {
                let _ = writer.flush().await;
                since_last_flush = 0;
            }
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReplayStats {
    pub applied: usize,
    pub malformed: usize,
    pub rejected: usize,
}

pub async fn apply<S: LedgerStore>(store: &S, ev: LedgerEvent) -> Result<(), StoreError> {
    match ev {
        LedgerEvent::GroupCreated { group } => store.create_group(group).await,
        LedgerEvent::MemberAdded { group, member } => store.add_member(&group, member).await,
        LedgerEvent::ExpenseAdded { expense } => store.insert_expense(expense).await,
        LedgerEvent::ExpenseDeleted { expense, .. } => store.delete_expense(&expense).await.map(|_| ()),
        LedgerEvent::SettlementRecorded { settlement } => store.insert_settlement(settlement).await,
        LedgerEvent::GroupDeleted { group } => store.delete_group(&group).await.map(|_| ()),
    }
}

/// Re-apply a journal to `store`. A missing file is an empty journal.
pub async fn replay<S: LedgerStore>(store: &S, path: &str) -> io::Result<ReplayStats> {
    let file = match File::open(path).await {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(ReplayStats::default()),
        Err(e) => return Err(e),
    };
    let mut lines = BufReader::new(file).lines();
    let mut stats = ReplayStats::default();
    let mut lineno = 0usize;

    while let Some(line) = lines.next_line().await? {
        lineno += 1;
        if line.trim().is_empty() {
            continue;
        }
        let ev: LedgerEvent = match serde_json::from_str(&line) {
            Ok(ev) => ev,
            Err(e) => {
                warn!(%path, line = lineno, error = %e, "replay: malformed line skipped");
                stats.malformed += 1;
                continue;
            }
        };
        let kind = ev.kind();
        match apply(store, ev).await {
            Ok(()) => stats.applied += 1,
            Err(e) => {
                warn!(%path, line = lineno, kind, error = %e, "replay: event rejected by store");
                stats.rejected += 1;
            }
        }
    }

    info!(%path, applied = stats.applied, malformed = stats.malformed, rejected = stats.rejected, "replay: done");
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Expense, ExpenseId, GroupId, GroupRecord, MemberId, SplitShare, Tag};
    use crate::store::InMemoryStore;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn tmp_path(name: &str) -> String {
        let dir = std::env::temp_dir().join(format!("splitledger-{}", uuid::Uuid::new_v4().simple()));
        dir.join(name).to_string_lossy().into_owned()
    }

    fn group() -> GroupRecord {
        GroupRecord {
            id: "g".into(),
            name: "trip".into(),
            members: vec![MemberId::new("A"), MemberId::new("B")],
            simplify_debts: true,
            created_at: Utc::now(),
        }
    }

    fn expense() -> Expense {
        Expense {
            id: ExpenseId::new("e1"),
            group: "g".into(),
            description: "fuel".into(),
            amount: dec!(40.10),
            payer: "A".into(),
            tag: Tag::Travel,
            splits: vec![SplitShare::new("A", dec!(20.05)), SplitShare::new("B", dec!(20.05))],
            date: Utc::now(),
        }
    }

    #[tokio::test]
    async fn journal_then_replay_rebuilds_store() {
        let path = tmp_path("ledger.jsonl");
        let (tx, rx) = mpsc::channel(16);
        let task = tokio::spawn(run(rx, path.clone()));

        tx.send(LedgerEvent::GroupCreated { group: group() }).await.unwrap();
        tx.send(LedgerEvent::ExpenseAdded { expense: expense() }).await.unwrap();
        drop(tx);
        task.await.unwrap();

        let store = InMemoryStore::new();
        let stats = replay(&store, &path).await.unwrap();
        assert_eq!(stats, ReplayStats { applied: 2, malformed: 0, rejected: 0 });

        let snap = store.snapshot(&GroupId::new("g")).await.unwrap().unwrap();
        assert_eq!(snap.members.len(), 2);
        assert_eq!(snap.expenses.len(), 1);
        assert_eq!(snap.expenses[0].id, ExpenseId::new("e1"));
        assert_eq!(snap.expenses[0].amount, dec!(40.10));
        assert_eq!(snap.expenses[0].splits[1].amount_owed, dec!(20.05));
    }

    #[tokio::test]
    async fn replay_skips_garbage_and_counts_rejections() {
        let path = tmp_path("ledger.jsonl");
        let parent = Path::new(&path).parent().unwrap().to_path_buf();
        fs::create_dir_all(&parent).await.unwrap();
        let good = serde_json::to_string(&LedgerEvent::GroupCreated { group: group() }).unwrap();
        let body = format!("{good}\nnot json\n\n{good}\n");
        fs::write(&path, body).await.unwrap();

        let store = InMemoryStore::new();
        let stats = replay(&store, &path).await.unwrap();
        assert_eq!(stats, ReplayStats { applied: 1, malformed: 1, rejected: 1 });
    }

    #[tokio::test]
    async fn missing_journal_is_empty() {
        let store = InMemoryStore::new();
        let stats = replay(&store, &tmp_path("absent.jsonl")).await.unwrap();
        assert_eq!(stats, ReplayStats::default());
    }
}
