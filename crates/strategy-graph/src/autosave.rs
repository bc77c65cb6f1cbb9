//! Batched background saving
//!
//! Editors produce a record on every validated change. Rather than writing
//! each one, records are queued on a channel and a background task writes
//! the latest record per strategy id once per interval. Queued records for
//! the same id coalesce, so a burst of edits costs one write.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::events::EventError;
use crate::persistence::{KeyValueBackend, StrategyRepository};
use crate::serialization::StrategyRecord;

enum AutosaveCommand {
    Save(Box<StrategyRecord>),
    Flush(oneshot::Sender<usize>),
}

/// Handle to a running autosave task
pub struct AutosaveHandle {
    sender: mpsc::UnboundedSender<AutosaveCommand>,
    task: JoinHandle<usize>,
}

/// Spawn the autosave loop on the current tokio runtime
pub fn spawn_autosave<B>(repository: Arc<StrategyRepository<B>>, interval: Duration) -> AutosaveHandle
where
    B: KeyValueBackend + 'static,
{
    let interval = interval.max(Duration::from_millis(1));
    let (sender, receiver) = mpsc::unbounded_channel();
    log::info!("Starting autosave with {}ms interval", interval.as_millis());
    let task = tokio::spawn(run(repository, interval, receiver));
    AutosaveHandle { sender, task }
}

impl AutosaveHandle {
    /// Queue a record; it replaces any queued record with the same id
    pub fn queue(&self, record: StrategyRecord) -> Result<(), EventError> {
        self.sender
            .send(AutosaveCommand::Save(Box::new(record)))
            .map_err(|_| EventError::channel_closed())
    }

    /// Write everything queued now. Returns the number of records written.
    pub async fn flush(&self) -> Result<usize, EventError> {
        let (reply, written) = oneshot::channel();
        self.sender
            .send(AutosaveCommand::Flush(reply))
            .map_err(|_| EventError::channel_closed())?;
        written.await.map_err(|_| EventError::channel_closed())
    }

    /// Flush and stop. Returns the total number of records written.
    pub async fn shutdown(self) -> usize {
        drop(self.sender);
        match self.task.await {
            Ok(total) => total,
            Err(e) => {
                log::warn!("Autosave task ended abnormally: {}", e);
                0
            }
        }
    }
}

async fn run<B: KeyValueBackend>(
    repository: Arc<StrategyRepository<B>>,
    interval: Duration,
    mut receiver: mpsc::UnboundedReceiver<AutosaveCommand>,
) -> usize {
    let mut pending: BTreeMap<String, StrategyRecord> = BTreeMap::new();
    let mut total = 0;
    // First write one full interval after start
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                total += write_pending(&repository, &mut pending);
            }
            command = receiver.recv() => match command {
                Some(AutosaveCommand::Save(record)) => {
                    pending.insert(record.id.clone(), *record);
                }
                Some(AutosaveCommand::Flush(reply)) => {
                    let written = write_pending(&repository, &mut pending);
                    total += written;
                    let _ = reply.send(written);
                }
                None => {
                    total += write_pending(&repository, &mut pending);
                    log::info!("Autosave stopped after {} write(s)", total);
                    return total;
                }
            }
        }
    }
}

fn write_pending<B: KeyValueBackend>(
    repository: &StrategyRepository<B>,
    pending: &mut BTreeMap<String, StrategyRecord>,
) -> usize {
    let mut written = 0;
    for (id, record) in std::mem::take(pending) {
        match repository.save(&record) {
            Ok(_) => written += 1,
            Err(e) => log::warn!("Autosave of strategy '{}' failed: {}", id, e),
        }
    }
    if written > 0 {
        log::debug!("Autosaved {} strategy record(s)", written);
    }
    written
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::persistence::MemoryBackend;
    use crate::serialization::export_strategy;

    fn repository() -> Arc<StrategyRepository<MemoryBackend>> {
        Arc::new(StrategyRepository::new(
            MemoryBackend::new(),
            EngineConfig::default(),
        ))
    }

    fn record(name: &str) -> StrategyRecord {
        export_strategy(&[], &[], name)
    }

    #[tokio::test]
    async fn test_queued_records_coalesce_by_id() {
        let repo = repository();
        let handle = spawn_autosave(repo.clone(), Duration::from_secs(3600));

        let mut first = record("v1");
        handle.queue(first.clone()).unwrap();
        first.name = "v2".into();
        handle.queue(first.clone()).unwrap();
        first.name = "v3".into();
        handle.queue(first.clone()).unwrap();
        handle.queue(record("other")).unwrap();

        assert_eq!(handle.flush().await.unwrap(), 2);
        assert_eq!(repo.load(&first.id).unwrap().unwrap().name, "v3");
        assert_eq!(repo.list().unwrap().len(), 2);

        assert_eq!(handle.flush().await.unwrap(), 0);
        assert_eq!(handle.shutdown().await, 2);
    }

    #[tokio::test]
    async fn test_interval_writes_without_flush() {
        let repo = repository();
        let handle = spawn_autosave(repo.clone(), Duration::from_millis(10));
        let rec = record("ticked");
        handle.queue(rec.clone()).unwrap();

        let mut saved = false;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if repo.load(&rec.id).unwrap().is_some() {
                saved = true;
                break;
            }
        }
        assert!(saved);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_flushes_pending() {
        let repo = repository();
        let handle = spawn_autosave(repo.clone(), Duration::from_secs(3600));
        let rec = record("late");
        handle.queue(rec.clone()).unwrap();

        assert_eq!(handle.shutdown().await, 1);
        assert!(repo.load(&rec.id).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_failed_saves_are_skipped() {
        let repo = repository();
        let handle = spawn_autosave(repo.clone(), Duration::from_secs(3600));
        let mut bad = record("bad");
        bad.id = String::new();
        handle.queue(bad).unwrap();
        handle.queue(record("good")).unwrap();

        assert_eq!(handle.flush().await.unwrap(), 1);
        handle.shutdown().await;
    }
}
