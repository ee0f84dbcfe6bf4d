use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Timelike, Utc};
use colored::Colorize;
use herald::collab::Collaborators;
use herald::memory::{collaborators, publish, MemoryPlatform, MemoryStore};
use herald::prelude::*;
use herald::{ENGINE_NAME, VERSION as LIB_VERSION};
use rustyline::highlight::Highlighter;
use rustyline::Editor;
use rustyline_derive::{Completer, Helper, Hinter, Validator};
use std::borrow::Cow;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const SHELL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// A custom helper struct for rustyline that enables syntax highlighting.
#[derive(Completer, Helper, Hinter, Validator)]
struct CommandHighlighter;

impl Highlighter for CommandHighlighter {
    fn highlight<'l>(&self, line: &'l str, _pos: usize) -> Cow<'l, str> {
        if let Some((command, rest)) = line.split_once(' ') {
            Cow::Owned(format!("{} {}", command.yellow().bold(), rest.yellow()))
        } else {
            Cow::Owned(line.yellow().bold().to_string())
        }
    }
    fn highlight_char(&self, _line: &str, _pos: usize, _forced: bool) -> bool {
        true
    }
}

fn print_banner() {
    if env::var("QUIET_MODE").is_ok() {
        return;
    }
    let rule = "-".repeat(72);
    println!("{}", rule.dimmed());
    println!("{}", format!("  {} shell", ENGINE_NAME).cyan().bold());
    println!("          Shell   v{:<8} Library   v{:<8}", SHELL_VERSION, LIB_VERSION);
    println!(
        "{}",
        "  This software is provided 'as is', without warranty of any kind.\n  Distributed under the MIT OR Apache-2.0 license. Use at your own risk."
            .dimmed()
    );
    println!("{}", rule.dimmed());
}

/// Shell state: the simulated clock and the in-memory platform.
struct Session {
    now: DateTime<Utc>,
    engine: HeraldEngine,
    store: Arc<MemoryStore>,
    platform: Arc<MemoryPlatform>,
    guild: GuildRef,
    schedule: ChannelRef,
}

impl Session {
    fn config(&self) -> &HeraldConfig {
        self.engine.config()
    }

    fn collab(&self) -> &Collaborators {
        self.engine.collaborators()
    }

    fn settings(&self) -> &ChannelSettings {
        self.config().settings_for(&self.schedule)
    }

    fn zone(&self) -> chrono_tz::Tz {
        self.settings().timezone
    }

    fn load(&self, id: &str) -> Result<ScheduleEntry> {
        let id = EntryId(id.parse().map_err(|_| anyhow!("'{}' is not an entry id", id))?);
        let record = self.store.get(id).ok_or_else(|| anyhow!("no entry #{}", id))?;
        Ok(ScheduleEntry::from_record(record, self.zone())?)
    }

    fn create(&self, args: &[&str]) -> Result<()> {
        let [date, time, minutes, repeat, title @ ..] = args else {
            bail!("Usage: create <YYYY-MM-DD> <HH:MM> <MINUTES> <REPEAT> <TITLE...>");
        };
        if title.is_empty() {
            bail!("a title is required");
        }
        let local = NaiveDateTime::parse_from_str(&format!("{date} {time}"), "%Y-%m-%d %H:%M")?;
        let start = self
            .zone()
            .from_local_datetime(&local)
            .earliest()
            .ok_or_else(|| anyhow!("{} {} does not exist in {}", date, time, self.zone()))?;
        let minutes: i64 = minutes.parse()?;
        let draft = ScheduleEntry::draft(
            self.schedule.clone(),
            self.guild.clone(),
            title.join(" "),
            start,
            start + Duration::minutes(minutes),
        )
        .repeat(parse_repeat(repeat)?);
        let entry = publish(
            &self.store,
            &self.platform,
            self.settings(),
            draft.build(self.settings(), self.now)?,
        )?;
        if let Some(id) = entry.id() {
            println!("--> Created entry #{}", id);
        }
        Ok(())
    }

    fn announce(&self, args: &[&str]) -> Result<()> {
        let [id, target, spec, message @ ..] = args else {
            bail!("Usage: announce <ID> <TARGET> <TIME-SPEC> <MESSAGE...>");
        };
        let mut entry = self.load(id)?;
        let ctx = TriggerContext::new(self.config(), self.collab(), &self.schedule, self.now);
        let mut added = None;
        entry.update(&ctx, |edit| {
            added = Some(edit.add_override(*target, *spec, message.join(" "))?);
            Ok(())
        })?;
        if let Some(added) = added {
            println!("--> Added announcement ({}) to entry #{}", added, id);
        }
        Ok(())
    }

    fn unannounce(&self, args: &[&str]) -> Result<()> {
        let [id, override_id] = args else {
            bail!("Usage: unannounce <ID> <ANNOUNCEMENT-ID>");
        };
        let override_id = OverrideId(override_id.parse()?);
        let mut entry = self.load(id)?;
        let ctx = TriggerContext::new(self.config(), self.collab(), &self.schedule, self.now);
        let mut removed = false;
        entry.update(&ctx, |edit| {
            removed = edit.remove_override(override_id);
            Ok(())
        })?;
        if removed {
            println!("--> Removed announcement ({})", override_id);
        } else {
            println!("--> Entry #{} has no announcement ({})", id, override_id);
        }
        Ok(())
    }

    /// Moves the simulated clock and scans once per minute passed.
    async fn advance(&mut self, minutes: i64) {
        for _ in 0..minutes.max(0) {
            self.now += Duration::minutes(1);
            self.engine.scan(self.now).await;
        }
        println!("--> Clock is now {}", self.now.with_timezone(&self.zone()));
    }

    fn list(&self) -> Result<()> {
        let ids = self.collab().store.ids()?;
        if ids.is_empty() {
            println!("No entries.");
        }
        for id in ids {
            let entry = self.load(&id.to_string())?;
            let state = if entry.has_started() { "started".green() } else { "pending".normal() };
            println!(
                "  #{:<3} {:<24} {}  [{}] {}",
                id,
                entry.title(),
                entry.starts_at().format("%Y-%m-%d %H:%M"),
                state,
                entry.repeat_rule()
            );
        }
        Ok(())
    }
}

fn parse_repeat(text: &str) -> Result<RepeatRule> {
    let text = text.to_lowercase();
    if text == "yearly" {
        return Ok(RepeatRule::Yearly);
    }
    if let Some(interval) = text.strip_prefix("every:") {
        if let Some(days) = interval.strip_suffix('d') {
            return Ok(RepeatRule::every_days(days.parse()?)?);
        }
        if let Some(minutes) = interval.strip_suffix('m') {
            return Ok(RepeatRule::every_minutes(minutes.parse()?)?);
        }
        bail!("interval '{}' must end in 'd' or 'm'", interval);
    }
    WeekdaySet::parse(&text)
        .map(RepeatRule::weekdays)
        .ok_or_else(|| anyhow!("cannot read repeat '{}'", text))
}

fn spawn_event_listener(engine: &HeraldEngine) {
    let mut events = engine.subscribe_events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let HeraldEvent::Triggered { outcome: TriggerOutcome::NothingDue, .. } = event {
                continue;
            }
            println!("<-- [EVENT] {:?}", event);
        }
    });
}

fn print_help() {
    println!("Available commands:");
    println!("  create <DATE> <HH:MM> <MIN> <REPEAT> <TITLE>  - Schedules an entry. REPEAT is none, daily,");
    println!("                                                  weekdays (mo,we), every:<N>d, every:<N>m or yearly.");
    println!("  list                                          - Shows every stored entry.");
    println!("  show <ID>                                     - Prints an entry's display.");
    println!("  announce <ID> <TARGET> <SPEC> <MESSAGE>       - Adds a custom announcement (SPEC like start-30m).");
    println!("  unannounce <ID> <ANNOUNCEMENT>                - Removes a custom announcement.");
    println!("  advance <MINUTES>                             - Moves the clock forward, scanning each minute.");
    println!("  now                                           - Prints the simulated clock.");
    println!("  sent                                          - Prints and clears messages sent to channels.");
    println!("  lose <ID>                                     - Deletes an entry's backing message.");
    println!("  exit                                          - Quits the shell.");
}

#[tokio::main]
async fn main() -> Result<()> {
    print_banner();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_target(false)
        .init();

    let path = env::args().nth(1).map(PathBuf::from);
    let mut config = HeraldConfig::load(path.as_deref())?;
    config.defaults.start_announce_target.get_or_insert_with(|| "announcements".to_string());
    config.defaults.end_announce_target.get_or_insert_with(|| "announcements".to_string());
    config.defaults.remind_target.get_or_insert_with(|| "reminders".to_string());

    let store = Arc::new(MemoryStore::new());
    let platform = Arc::new(MemoryPlatform::new());
    let guild = GuildRef::new("1");
    let schedule = platform.add_channel(&guild, "100", "schedule");
    platform.add_channel(&guild, "200", "announcements");
    platform.add_channel(&guild, "300", "reminders");

    let engine = HeraldEngine::new(config, collaborators(store.clone(), platform.clone()));
    spawn_event_listener(&engine);

    let now = Utc::now();
    let mut session = Session {
        now: now - Duration::seconds(i64::from(now.second())),
        engine,
        store,
        platform,
        guild,
        schedule,
    };

    tracing::debug!("Simulated clock starts at {}", session.now);

    let mut rl = Editor::new()?;
    rl.set_helper(Some(CommandHighlighter));

    println!("{} is ready. Type 'help' for commands or 'exit' to quit.", ENGINE_NAME.cyan());

    loop {
        let prompt = format!("{}", ">> ".cyan().bold());
        let line = match rl.readline(&prompt) {
            Ok(line) => line,
            Err(_) => {
                println!("Exiting heraldshell...");
                break;
            }
        };
        rl.add_history_entry(line.as_str())?;
        let args = line.split_whitespace().collect::<Vec<_>>();
        let Some((command, rest)) = args.split_first() else {
            continue;
        };

        let result = match *command {
            "create" => session.create(rest),
            "list" => session.list(),
            "show" => match rest {
                [id] => session.load(id).map(|entry| println!("{}", entry.describe(session.settings()))),
                _ => Err(anyhow!("Usage: show <ID>")),
            },
            "announce" => session.announce(rest),
            "unannounce" => session.unannounce(rest),
            "advance" => match rest.first().map(|m| m.parse::<i64>()) {
                Some(Ok(minutes)) => {
                    session.advance(minutes).await;
                    Ok(())
                }
                _ => Err(anyhow!("Usage: advance <MINUTES>")),
            },
            "now" => {
                println!("{}", session.now.with_timezone(&session.zone()));
                Ok(())
            }
            "sent" => {
                for message in session.platform.take_sent() {
                    println!("  #{}: {}", message.channel, message.content);
                }
                Ok(())
            }
            "lose" => match rest {
                [id] => session.load(id).map(|entry| {
                    if let Some(message) = entry.message() {
                        session.platform.remove_message(message);
                        println!("--> Message {} is gone", message);
                    }
                }),
                _ => Err(anyhow!("Usage: lose <ID>")),
            },
            "help" => {
                print_help();
                Ok(())
            }
            "exit" => break,
            _ => Err(anyhow!("Unknown command: '{}'. Type 'help'.", line.trim())),
        };
        if let Err(e) = result {
            println!("{} {}", "Error:".red().bold(), e);
        }
    }

    Ok(())
}
