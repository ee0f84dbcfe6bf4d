//! The dispatcher that drives every stored entry through its lifecycle.

use crate::collab::Collaborators;
use crate::common::EntryId;
use crate::config::HeraldConfig;
use crate::entry::ScheduleEntry;
use crate::events::HeraldEvent;
use crate::lifecycle::{Trigger, TriggerContext, TriggerOutcome};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, error, info, trace, warn};

/// Counts from one pass over the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Entries listed by the store.
    pub scanned: usize,
    /// Triggers that ran and had something to do.
    pub fired: usize,
    /// Entries skipped because an earlier run is still in flight.
    pub busy: usize,
    /// Entries whose run exceeded the lookup timeout.
    pub timed_out: usize,
}

/// The main Herald engine.
///
/// Holds the configuration and collaborators and polls the store for due
/// entries. The handle is cheap to clone and share across tasks.
#[derive(Clone)]
pub struct HeraldEngine {
    config: Arc<HeraldConfig>,
    collab: Collaborators,
    event_sender: broadcast::Sender<HeraldEvent>,
    in_flight: Arc<Mutex<HashSet<EntryId>>>,
}

/// Releases an entry from the in-flight set when its run finishes, however
/// it finishes.
struct InFlight {
    set: Arc<Mutex<HashSet<EntryId>>>,
    id: EntryId,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if let Ok(mut set) = self.set.lock() {
            set.remove(&self.id);
        }
    }
}

// Core implementation block for internal logic.
impl HeraldEngine {
    pub fn new(config: HeraldConfig, collab: Collaborators) -> Self {
        let (event_sender, _) = broadcast::channel(256);
        Self {
            config: Arc::new(config),
            collab,
            event_sender,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Runs the dispatcher until a shutdown signal is received.
    pub async fn run(&self) -> anyhow::Result<()> {
        info!("HeraldEngine starting up...");
        let (shutdown_tx, _) = broadcast::channel(1);

        let dispatcher = self.clone();
        let dispatcher_shutdown_rx = shutdown_tx.subscribe();
        let handle = tokio::spawn(async move { dispatcher.dispatcher_loop(dispatcher_shutdown_rx).await });

        info!(
            "Engine scanning every {:?}. Press Ctrl+C to shut down.",
            self.config.scan_interval()
        );
        tokio::signal::ctrl_c().await?;

        info!("Shutdown signal received. Stopping the dispatcher...");
        if shutdown_tx.send(()).is_err() {
            error!("Failed to send shutdown signal. The dispatcher may not terminate gracefully.");
        }
        if let Err(e) = handle.await {
            error!("Dispatcher task failed: {}", e);
        }
        self.event_sender.send(HeraldEvent::EngineShutdown).ok();
        info!("HeraldEngine has shut down.");
        Ok(())
    }

    #[doc(hidden)]
    async fn dispatcher_loop(self, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.config.scan_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        self.event_sender
            .send(HeraldEvent::EngineStarted { at: Utc::now() })
            .ok();
        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => break,
                _ = ticker.tick() => {
                    let report = self.scan(Utc::now()).await;
                    trace!("Scan finished: {:?}", report);
                }
            }
        }
    }

    /// Checks every stored entry against `now` and runs its due triggers.
    ///
    /// Entries run concurrently on blocking workers, each bounded by the
    /// lookup timeout. A run that outlives it is reported as timed out and
    /// leaves its entry untouched. An entry whose previous run has not
    /// finished is skipped, so at most one run per entry is ever active.
    pub async fn scan(&self, now: DateTime<Utc>) -> ScanReport {
        let mut report = ScanReport::default();
        let ids = match self.collab.store.ids() {
            Ok(ids) => ids,
            Err(e) => {
                error!("Failed to list entries: {}", e);
                self.event_sender
                    .send(HeraldEvent::ScanFailed {
                        reason: e.to_string(),
                    })
                    .ok();
                return report;
            }
        };
        report.scanned = ids.len();

        let mut runs = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(guard) = self.claim(id) else {
                debug!("Entry {} is still being processed, skipping", id);
                report.busy += 1;
                continue;
            };
            let engine = self.clone();
            let timeout = self.config.lookup_timeout();
            let deadline = Instant::now() + timeout;
            runs.push((
                id,
                tokio::spawn(async move {
                    let work = tokio::task::spawn_blocking(move || {
                        let _guard = guard;
                        engine.process_entry(id, now, deadline)
                    });
                    tokio::time::timeout(timeout, work).await
                }),
            ));
        }

        for (id, run) in runs {
            match run.await {
                Ok(Ok(Ok(fired))) => report.fired += fired,
                Ok(Ok(Err(e))) => error!("Processing of entry {} panicked: {}", id, e),
                Ok(Err(_)) => {
                    warn!("Entry {} did not finish within {:?}", id, self.config.lookup_timeout());
                    report.timed_out += 1;
                    self.event_sender.send(HeraldEvent::TimedOut { id }).ok();
                }
                Err(e) => error!("Dispatch of entry {} failed: {}", id, e),
            }
        }
        report
    }

    fn claim(&self, id: EntryId) -> Option<InFlight> {
        let mut set = self.in_flight.lock().ok()?;
        set.insert(id).then(|| InFlight {
            set: self.in_flight.clone(),
            id,
        })
    }

    /// Runs every due trigger of one entry in dispatch order. The entry is
    /// reloaded before each trigger, so a removal ends the run. Nothing runs
    /// once `deadline` has passed. Returns how many triggers did something.
    #[doc(hidden)]
    fn process_entry(&self, id: EntryId, now: DateTime<Utc>, deadline: Instant) -> usize {
        let mut fired = 0;
        for trigger in Trigger::ORDER {
            if Instant::now() >= deadline {
                debug!("Entry {} ran out of time before {:?}", id, trigger);
                break;
            }
            let Some(mut entry) = self.load(id) else {
                break;
            };
            if !entry.is_due(trigger, now) {
                continue;
            }
            let ctx = TriggerContext::new(&self.config, &self.collab, entry.channel(), now)
                .with_deadline(deadline);
            let outcome = entry.fire(trigger, &ctx);
            debug!("Entry {} {:?} -> {:?}", id, trigger, outcome);
            self.event_sender
                .send(HeraldEvent::Triggered { id, trigger, outcome })
                .ok();
            match outcome {
                TriggerOutcome::MessageMissing => break,
                TriggerOutcome::NothingDue => {}
                _ => fired += 1,
            }
        }
        fired
    }

    fn load(&self, id: EntryId) -> Option<ScheduleEntry> {
        let record = match self.collab.store.load(id) {
            Ok(Some(record)) => record,
            Ok(None) => return None,
            Err(e) => {
                error!("Failed to load entry {}: {}", id, e);
                return None;
            }
        };
        let zone = self.config.settings_for(&record.channel_id).timezone;
        match ScheduleEntry::from_record(record, zone) {
            Ok(entry) => Some(entry),
            Err(e) => {
                error!("Entry {} cannot be rehydrated: {}", id, e);
                None
            }
        }
    }
}

// Public API implementation block.
impl HeraldEngine {
    pub fn config(&self) -> &HeraldConfig {
        &self.config
    }

    pub fn collaborators(&self) -> &Collaborators {
        &self.collab
    }

    /// Subscribes to the `HeraldEvent` stream.
    pub fn subscribe_events(&self) -> broadcast::Receiver<HeraldEvent> {
        self.event_sender.subscribe()
    }

    pub fn scan_interval(&self) -> Duration {
        self.config.scan_interval()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::{Directory, MessageHandle};
    use crate::common::{ChannelRef, GuildRef, MessageRef};
    use crate::config::ChannelSettings;
    use crate::error::BackingMessageMissing;
    use crate::lifecycle::Transition;
    use crate::memory::{collaborators, publish, MemoryPlatform, MemoryStore};
    use chrono::{Duration as ChronoDuration, TimeZone};
    use chrono_tz::Tz;

    struct Fixture {
        engine: HeraldEngine,
        store: Arc<MemoryStore>,
        platform: Arc<MemoryPlatform>,
        schedule: ChannelRef,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let platform = Arc::new(MemoryPlatform::new());
        let guild = GuildRef::new("1");
        let schedule = platform.add_channel(&guild, "10", "schedule");
        platform.add_channel(&guild, "20", "announcements");
        let config = HeraldConfig {
            defaults: ChannelSettings {
                reminders: Vec::new(),
                start_announce_target: Some("announcements".to_string()),
                end_announce_target: Some("announcements".to_string()),
                ..ChannelSettings::default()
            },
            ..HeraldConfig::default()
        };
        let engine = HeraldEngine::new(config, collaborators(store.clone(), platform.clone()));
        Fixture {
            engine,
            store,
            platform,
            schedule,
        }
    }

    /// Answers lookups like the platform, only slower.
    struct SlowDirectory {
        platform: Arc<MemoryPlatform>,
        delay: Duration,
    }

    impl Directory for SlowDirectory {
        fn message(
            &self,
            guild: &GuildRef,
            channel: &ChannelRef,
            message: &MessageRef,
        ) -> Result<MessageHandle, BackingMessageMissing> {
            std::thread::sleep(self.delay);
            self.platform.message(guild, channel, message)
        }

        fn channel_by_id(&self, guild: &GuildRef, id: &str) -> Option<ChannelRef> {
            self.platform.channel_by_id(guild, id)
        }

        fn channels_by_name(&self, guild: &GuildRef, name: &str) -> Vec<ChannelRef> {
            self.platform.channels_by_name(guild, name)
        }
    }

    fn publish_at(f: &Fixture, start: DateTime<Utc>, minutes: i64) -> ScheduleEntry {
        let entry = ScheduleEntry::draft(
            f.schedule.clone(),
            GuildRef::new("1"),
            "Standup",
            start.with_timezone(&Tz::UTC),
            (start + ChronoDuration::minutes(minutes)).with_timezone(&Tz::UTC),
        )
        .build(&f.engine.config().defaults, start - ChronoDuration::hours(1))
        .unwrap();
        publish(&f.store, &f.platform, &f.engine.config().defaults, entry).unwrap()
    }

    #[tokio::test]
    async fn scan_runs_due_triggers_in_order() {
        let f = fixture();
        let start = Utc.with_ymd_and_hms(2026, 10, 19, 9, 0, 0).unwrap();
        let entry = publish_at(&f, start, 15);
        let id = entry.id().unwrap();
        let mut events = f.engine.subscribe_events();

        let report = f.engine.scan(start + ChronoDuration::minutes(1)).await;
        assert_eq!(report.fired, 1);
        assert_eq!(
            events.recv().await.unwrap(),
            HeraldEvent::Triggered {
                id,
                trigger: Trigger::Start,
                outcome: TriggerOutcome::Started { announced: true }
            }
        );
        assert!(f.store.get(id).unwrap().has_started);

        let report = f.engine.scan(start + ChronoDuration::minutes(16)).await;
        assert_eq!(report.fired, 1);
        assert_eq!(
            events.recv().await.unwrap(),
            HeraldEvent::Triggered {
                id,
                trigger: Trigger::End,
                outcome: TriggerOutcome::Ended {
                    announced: true,
                    transition: Transition::Removed
                }
            }
        );
        assert!(f.store.is_empty());
        assert_eq!(f.platform.take_sent().len(), 2);
    }

    #[tokio::test]
    async fn start_and_end_in_one_scan() {
        let f = fixture();
        let start = Utc.with_ymd_and_hms(2026, 10, 19, 9, 0, 0).unwrap();
        publish_at(&f, start, 5);

        let report = f.engine.scan(start + ChronoDuration::minutes(10)).await;
        assert_eq!(report.scanned, 1);
        assert_eq!(report.fired, 2);
        assert!(f.store.is_empty());
    }

    #[tokio::test]
    async fn missing_message_leaves_entry_stored() {
        let f = fixture();
        let start = Utc.with_ymd_and_hms(2026, 10, 19, 9, 0, 0).unwrap();
        let entry = publish_at(&f, start, 5);
        f.platform.remove_message(entry.message().unwrap());

        let report = f.engine.scan(start + ChronoDuration::minutes(10)).await;
        assert_eq!(report.fired, 0);
        assert_eq!(f.store.len(), 1);
        assert!(f.platform.sent().is_empty());
    }

    #[tokio::test]
    async fn busy_entries_are_skipped() {
        let f = fixture();
        let start = Utc.with_ymd_and_hms(2026, 10, 19, 9, 0, 0).unwrap();
        let entry = publish_at(&f, start, 5);
        let guard = f.engine.claim(entry.id().unwrap()).unwrap();

        let report = f.engine.scan(start + ChronoDuration::minutes(1)).await;
        assert_eq!(report.busy, 1);
        assert_eq!(report.fired, 0);

        drop(guard);
        let report = f.engine.scan(start + ChronoDuration::minutes(1)).await;
        assert_eq!(report.busy, 0);
        assert_eq!(report.fired, 1);
    }

    #[tokio::test]
    async fn timed_out_run_leaves_the_entry_untouched() {
        let f = fixture();
        let start = Utc.with_ymd_and_hms(2026, 10, 19, 9, 0, 0).unwrap();
        let id = publish_at(&f, start, 15).id().unwrap();

        let config = HeraldConfig {
            lookup_timeout_ms: 50,
            ..f.engine.config().clone()
        };
        let collab = Collaborators {
            directory: Arc::new(SlowDirectory {
                platform: f.platform.clone(),
                delay: Duration::from_millis(300),
            }),
            ..collaborators(f.store.clone(), f.platform.clone())
        };
        let engine = HeraldEngine::new(config, collab);
        let mut events = engine.subscribe_events();

        let report = engine.scan(start + ChronoDuration::minutes(1)).await;
        assert_eq!(report.timed_out, 1);
        assert_eq!(report.fired, 0);
        assert_eq!(events.recv().await.unwrap(), HeraldEvent::TimedOut { id });

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(!f.store.get(id).unwrap().has_started);
        assert!(f.platform.sent().is_empty());

        let report = engine.scan(start + ChronoDuration::minutes(2)).await;
        assert_eq!(report.busy, 0);
        assert_eq!(report.timed_out, 1);
    }

    #[tokio::test]
    async fn nothing_due_fires_nothing() {
        let f = fixture();
        let start = Utc.with_ymd_and_hms(2026, 10, 19, 9, 0, 0).unwrap();
        publish_at(&f, start, 5);
        let report = f.engine.scan(start - ChronoDuration::minutes(1)).await;
        assert_eq!(report, ScanReport { scanned: 1, ..ScanReport::default() });
    }
}
