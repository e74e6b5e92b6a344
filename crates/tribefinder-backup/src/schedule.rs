//! Scheduled backups: due check, checkpoint and retention

use crate::backup::{create_backup_at, sweep_old_backups};
use crate::config::BackupConfig;
use crate::error::BackupResult;
use crate::settings::SettingsStore;
use crate::tools::ToolRunner;
use chrono::{DateTime, Duration, SecondsFormat, TimeZone, Utc};
use serde::Serialize;
use tracing::{info, warn};

/// Settings key holding the completion time of the last scheduled backup
pub const CHECKPOINT_KEY: &str = "lastAutoBackupAt";
/// Settings key holding the interval between scheduled backups, in hours
pub const INTERVAL_KEY: &str = "autoBackupIntervalHours";
/// Interval used when the setting is absent or unreadable
pub const DEFAULT_INTERVAL_HOURS: f64 = 24.0;

/// Whether a scheduled backup should run now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Due {
    /// Interval is zero or negative
    Disabled,
    /// Last run is more recent than the interval
    NotYet { next_due: DateTime<Utc> },
    /// No checkpoint, or the interval has elapsed
    Now,
}

/// Why a scheduled run did nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkipReason {
    Disabled,
    NotDue,
}

/// Result line printed by the scheduled job
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledRun {
    pub ok: bool,
    /// Filename of the archive created by this run
    pub created: Option<String>,
    pub deleted_old: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<SkipReason>,
}

impl ScheduledRun {
    fn skipped(reason: SkipReason) -> Self {
        Self {
            ok: true,
            created: None,
            deleted_old: 0,
            skipped: Some(reason),
        }
    }
}

/// Read the configured interval in hours
///
/// # Errors
/// Returns an error if the settings store cannot be read
pub fn interval_hours(settings: &dyn SettingsStore) -> BackupResult<f64> {
    let raw = settings.find_unique(INTERVAL_KEY)?;
    Ok(match raw.as_deref().map(str::trim) {
        None | Some("") => DEFAULT_INTERVAL_HOURS,
        Some(value) => match value.parse::<f64>() {
            Ok(hours) if hours.is_finite() => hours,
            _ => {
                warn!(value, "unreadable backup interval, using default");
                DEFAULT_INTERVAL_HOURS
            }
        },
    })
}

/// Parse a checkpoint written as RFC 3339 or as epoch milliseconds
#[must_use]
pub fn parse_checkpoint(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Some(at.with_timezone(&Utc));
    }
    raw.parse::<i64>()
        .ok()
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
}

/// Format a checkpoint value
#[must_use]
pub fn format_checkpoint(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Decide whether a scheduled backup is due at `now`
///
/// An unparseable checkpoint counts as no checkpoint.
///
/// # Errors
/// Returns an error if the settings store cannot be read
pub fn check_due(settings: &dyn SettingsStore, now: DateTime<Utc>) -> BackupResult<Due> {
    let hours = interval_hours(settings)?;
    if hours <= 0.0 {
        return Ok(Due::Disabled);
    }

    let Some(last) = settings
        .find_unique(CHECKPOINT_KEY)?
        .as_deref()
        .and_then(parse_checkpoint)
    else {
        return Ok(Due::Now);
    };

    let Some(next_due) = interval_millis(hours)
        .and_then(Duration::try_milliseconds)
        .and_then(|interval| last.checked_add_signed(interval))
    else {
        warn!(hours, "backup interval exceeds the calendar range, never due");
        return Ok(Due::NotYet {
            next_due: DateTime::<Utc>::MAX_UTC,
        });
    };

    if now >= next_due {
        Ok(Due::Now)
    } else {
        Ok(Due::NotYet { next_due })
    }
}

/// Interval in whole milliseconds, `None` when it does not fit an `i64`
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn interval_millis(hours: f64) -> Option<i64> {
    let ms = (hours * 3_600_000.0).round();
    (ms < i64::MAX as f64).then(|| ms as i64)
}

/// Run one tick of the scheduled job
///
/// When due, builds an archive named after `now`, records the completion
/// time as the checkpoint, then deletes all but the newest `config.retention`
/// archives.
///
/// # Errors
/// Returns an error if the settings cannot be read or written, the build
/// fails, or the backups directory cannot be listed
pub fn run_scheduled(
    config: &BackupConfig,
    tools: &dyn ToolRunner,
    settings: &dyn SettingsStore,
    now: DateTime<Utc>,
) -> BackupResult<ScheduledRun> {
    match check_due(settings, now)? {
        Due::Disabled => {
            info!("scheduled backups are disabled");
            return Ok(ScheduledRun::skipped(SkipReason::Disabled));
        }
        Due::NotYet { next_due } => {
            info!(next_due = %format_checkpoint(next_due), "scheduled backup not due yet");
            return Ok(ScheduledRun::skipped(SkipReason::NotDue));
        }
        Due::Now => {}
    }

    let created = create_backup_at(config, tools, settings, now)?;
    let completed = Utc::now().max(now);
    settings.upsert(CHECKPOINT_KEY, &format_checkpoint(completed))?;

    let deleted = sweep_old_backups(&config.backups_dir, config.retention)?;

    Ok(ScheduledRun {
        ok: true,
        created: Some(created.filename),
        deleted_old: deleted.len(),
        skipped: None,
    })
}
