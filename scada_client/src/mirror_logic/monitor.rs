use lib_scada::core::ConnectionState;
use lib_scada::stores::{AlarmStore, TagStore};
use lib_scada::{Mirror, MirrorError, SnapshotChannel};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::interval;

/// One-line summary of the mirror contents.
pub fn stats_line(state: ConnectionState, tags: &TagStore, alarms: &AlarmStore) -> String {
    let stats = alarms.stats();
    let buckets = alarms.by_severity().counts();
    format!(
        "stream={:?} tags={} critical_tags={} alarms={} active={} acknowledged={} \
         by_severity=[C:{} H:{} M:{} L:{}]",
        state,
        tags.len(),
        tags.critical_tags().len(),
        stats.total,
        stats.active,
        stats.acknowledged,
        buckets[0],
        buckets[1],
        buckets[2],
        buckets[3],
    )
}

/// Logs mirror stats every `every` and reloads the snapshot when the mirror
/// has missed pushes or the last load failed.
pub async fn run<S: SnapshotChannel>(
    mirror: Arc<Mirror>,
    source: Arc<S>,
    every: Duration,
    mut needs_reload: bool,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut check_interval = interval(every);

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                log::info!("Monitor service received shutdown signal.");
                break;
            }
            _ = check_interval.tick() => {
                let state = mirror.connection().state();
                log::info!("{}", stats_line(state, mirror.tags(), mirror.alarms()));

                if mirror.take_stale() {
                    log::warn!("Mirror may have missed updates. Reloading snapshot.");
                    needs_reload = true;
                }
                // The snapshot channel does not depend on the stream being up.
                if needs_reload {
                    match mirror.load_snapshot(source.as_ref()).await {
                        Ok(summary) => {
                            log::info!("Snapshot reloaded: {:?}", summary);
                            needs_reload = false;
                        }
                        Err(MirrorError::Unauthorized) => {
                            log::error!("Snapshot reload rejected: session is no longer authorized.");
                        }
                        Err(e) => log::warn!("Snapshot reload failed: {}. Retrying on next tick.", e),
                    }
                }
            }
        }
    }
}
