//! Trial countdown presentation
//!
//! Derived, never persisted. [`TrialCountdown`] is a pure snapshot of the
//! time left in a trial; [`TrialBanner`] holds the per-session flags that
//! decide what the banner shows; [`CountdownTicker`] refreshes a snapshot on
//! a timer for as long as it is mounted.

use std::time::Duration as StdDuration;

use serde::Serialize;
use time::{Duration, OffsetDateTime};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::models::Organization;
use crate::trial::TRIAL_LENGTH_DAYS;

/// Days-left threshold under which the one-time warning fires
pub const WARNING_THRESHOLD_DAYS: i64 = 3;

const SECONDS_PER_DAY: i64 = 86_400;

/// Remaining trial time at one instant
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TrialCountdown {
    pub days: i64,
    pub hours: i64,
    pub minutes: i64,
    pub seconds: i64,
    /// Whole days remaining, rounded up
    pub days_left: i64,
    /// Share of the trial still remaining, 0..=100
    pub progress: f64,
    pub expired: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub trial_end_date: OffsetDateTime,
}

impl TrialCountdown {
    pub fn compute(start: OffsetDateTime, end: OffsetDateTime, now: OffsetDateTime) -> Self {
        let remaining = (end - now).whole_seconds().max(0);

        let total = (end - start).as_seconds_f64();
        let elapsed = (now - start).as_seconds_f64();
        let progress = if total > 0.0 {
            (100.0 - elapsed / total * 100.0).clamp(0.0, 100.0)
        } else {
            0.0
        };

        Self {
            days: remaining / SECONDS_PER_DAY,
            hours: (remaining % SECONDS_PER_DAY) / 3600,
            minutes: (remaining % 3600) / 60,
            seconds: remaining % 60,
            days_left: (remaining + SECONDS_PER_DAY - 1) / SECONDS_PER_DAY,
            progress,
            expired: now >= end,
            trial_end_date: end,
        }
    }

    /// Snapshot for an organization's stored trial window. A missing start
    /// date is assumed to be a full trial length before the end.
    pub fn for_organization(org: &Organization, now: OffsetDateTime) -> Option<Self> {
        let end = org.trial_end_date?;
        let start = org
            .trial_start_date
            .unwrap_or(end - Duration::days(TRIAL_LENGTH_DAYS));
        Some(Self::compute(start, end, now))
    }

    pub fn in_warning_window(&self) -> bool {
        !self.expired && self.days_left > 0 && self.days_left <= WARNING_THRESHOLD_DAYS
    }
}

/// What the trial banner should display
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "view", rename_all = "snake_case")]
pub enum BannerView {
    Hidden,
    Countdown {
        snapshot: TrialCountdown,
        /// True only on the first render inside the warning window
        show_warning: bool,
        dismissible: bool,
    },
    /// Trial over; the app is locked until the organization pays
    Blocking { snapshot: TrialCountdown },
}

/// Banner state for a single session. Flags live on the instance, so two
/// sessions never share a dismissal or a warning.
#[derive(Debug, Clone)]
pub struct TrialBanner {
    start: OffsetDateTime,
    end: OffsetDateTime,
    warning_shown: bool,
    dismissed: bool,
}

impl TrialBanner {
    pub fn new(start: OffsetDateTime, end: OffsetDateTime) -> Self {
        Self {
            start,
            end,
            warning_shown: false,
            dismissed: false,
        }
    }

    /// `None` when the organization has no trial window to show
    pub fn for_organization(org: &Organization) -> Option<Self> {
        let end = org.trial_end_date?;
        let start = org
            .trial_start_date
            .unwrap_or(end - Duration::days(TRIAL_LENGTH_DAYS));
        Some(Self::new(start, end))
    }

    pub fn render(&mut self, now: OffsetDateTime) -> BannerView {
        let snapshot = TrialCountdown::compute(self.start, self.end, now);

        if snapshot.expired {
            return BannerView::Blocking { snapshot };
        }
        if self.dismissed {
            return BannerView::Hidden;
        }

        let show_warning = snapshot.in_warning_window() && !self.warning_shown;
        if show_warning {
            self.warning_shown = true;
        }

        BannerView::Countdown {
            snapshot,
            show_warning,
            dismissible: true,
        }
    }

    /// Hide the countdown for the rest of this session. Has no effect on
    /// the blocking view.
    pub fn dismiss(&mut self) {
        self.dismissed = true;
    }

    pub fn is_dismissed(&self) -> bool {
        self.dismissed
    }
}

/// Periodically recomputes a [`TrialCountdown`] while mounted
pub struct CountdownTicker {
    receiver: watch::Receiver<TrialCountdown>,
    handle: Option<JoinHandle<()>>,
}

impl CountdownTicker {
    pub const DEFAULT_PERIOD: StdDuration = StdDuration::from_secs(60);

    /// Start the timer. Must be called inside a tokio runtime.
    pub fn mount(start: OffsetDateTime, end: OffsetDateTime, period: StdDuration) -> Self {
        let initial = TrialCountdown::compute(start, end, OffsetDateTime::now_utc());
        let (sender, receiver) = watch::channel(initial);

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately; the initial value covers it
            interval.tick().await;

            loop {
                interval.tick().await;
                let snapshot = TrialCountdown::compute(start, end, OffsetDateTime::now_utc());
                if sender.send(snapshot).is_err() {
                    break;
                }
                if snapshot.expired {
                    break;
                }
            }
        });

        Self {
            receiver,
            handle: Some(handle),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<TrialCountdown> {
        self.receiver.clone()
    }

    pub fn current(&self) -> TrialCountdown {
        *self.receiver.borrow()
    }

    pub fn is_mounted(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop the timer. Subscribers see the channel close.
    pub fn unmount(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for CountdownTicker {
    fn drop(&mut self) {
        self.unmount();
    }
}
