use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::now_ms;
use super::store::Store;
use super::{Engine, EngineError};

/// Lowercased search term, or `None` when blank (blank matches everything).
fn normalize_term(term: &str) -> Result<Option<String>, EngineError> {
    let term = term.trim();
    if term.len() > MAX_SEARCH_TERM_LEN {
        return Err(EngineError::TooLong {
            field: "search",
            max: MAX_SEARCH_TERM_LEN,
        });
    }
    Ok((!term.is_empty()).then(|| term.to_lowercase()))
}

fn matches(term: &Option<String>, fields: &[&str]) -> bool {
    match term {
        None => true,
        Some(t) => fields.iter().any(|f| f.to_lowercase().contains(t.as_str())),
    }
}

fn by_name<T>(mut rows: Vec<T>, key: impl Fn(&T) -> (&str, Ulid)) -> Vec<T> {
    rows.sort_by_cached_key(|row| {
        let (name, id) = key(row);
        (name.to_lowercase(), id)
    });
    rows
}

fn detailed<'a>(store: &Store, sessions: impl Iterator<Item = &'a Session>) -> Vec<SessionDetail> {
    sessions.filter_map(|s| store.detail(s)).collect()
}

impl Engine {
    // ── Single lookups ───────────────────────────────────────

    pub async fn client(&self, id: Ulid) -> Option<Client> {
        self.store.read().await.client(&id).cloned()
    }

    pub async fn photographer(&self, id: Ulid) -> Option<Photographer> {
        self.store.read().await.photographer(&id).cloned()
    }

    pub async fn studio(&self, id: Ulid) -> Option<Studio> {
        self.store.read().await.studio(&id).cloned()
    }

    pub async fn session(&self, id: Ulid) -> Option<Session> {
        self.store.read().await.session(&id).cloned()
    }

    pub async fn session_detail(&self, id: Ulid) -> Option<SessionDetail> {
        let store = self.store.read().await;
        store.session(&id).and_then(|s| store.detail(s))
    }

    // ── Lists and search ─────────────────────────────────────

    pub async fn list_clients(&self) -> Vec<Client> {
        let store = self.store.read().await;
        by_name(store.clients().cloned().collect(), |c| (&c.name, c.id))
    }

    pub async fn list_photographers(&self) -> Vec<Photographer> {
        let store = self.store.read().await;
        by_name(store.photographers().cloned().collect(), |p| (&p.name, p.id))
    }

    pub async fn list_studios(&self) -> Vec<Studio> {
        let store = self.store.read().await;
        by_name(store.studios().cloned().collect(), |s| (&s.name, s.id))
    }

    /// Case-insensitive substring match on name or phone.
    pub async fn search_clients(&self, term: &str) -> Result<Vec<Client>, EngineError> {
        let term = normalize_term(term)?;
        let store = self.store.read().await;
        let hits = store
            .clients()
            .filter(|c| matches(&term, &[&c.name, &c.phone]))
            .cloned()
            .collect();
        Ok(by_name(hits, |c| (&c.name, c.id)))
    }

    /// Case-insensitive substring match on name or phone.
    pub async fn search_photographers(&self, term: &str) -> Result<Vec<Photographer>, EngineError> {
        let term = normalize_term(term)?;
        let store = self.store.read().await;
        let hits = store
            .photographers()
            .filter(|p| matches(&term, &[&p.name, &p.phone]))
            .cloned()
            .collect();
        Ok(by_name(hits, |p| (&p.name, p.id)))
    }

    /// Case-insensitive substring match on name or location.
    pub async fn search_studios(&self, term: &str) -> Result<Vec<Studio>, EngineError> {
        let term = normalize_term(term)?;
        let store = self.store.read().await;
        let hits = store
            .studios()
            .filter(|s| matches(&term, &[&s.name, &s.location]))
            .cloned()
            .collect();
        Ok(by_name(hits, |s| (&s.name, s.id)))
    }

    /// Every session, newest first.
    pub async fn sessions_with_details(&self) -> Vec<SessionDetail> {
        let store = self.store.read().await;
        detailed(&store, store.sessions_ascending().rev())
    }

    /// Newest first, narrowed by status and free text.
    pub async fn search_sessions(
        &self,
        filter: &SessionFilter,
    ) -> Result<Vec<SessionDetail>, EngineError> {
        let term = normalize_term(filter.text.as_deref().unwrap_or(""))?;
        let store = self.store.read().await;
        Ok(store
            .sessions_ascending()
            .rev()
            .filter(|s| filter.status.is_none_or(|status| s.status == status))
            .filter_map(|s| store.detail(s))
            .filter(|d| {
                matches(
                    &term,
                    &[
                        &d.client_name,
                        &d.photographer_name,
                        &d.studio_name,
                        &d.studio_location,
                        d.session.package.as_str(),
                    ],
                )
            })
            .collect())
    }

    // ── Schedules and aggregates ─────────────────────────────

    /// Booked sessions in `[now, now + hours]`, soonest first.
    pub async fn upcoming_sessions(&self, hours: u32) -> Result<Vec<SessionDetail>, EngineError> {
        self.upcoming_sessions_at(now_ms(), hours).await
    }

    pub async fn upcoming_sessions_at(
        &self,
        now: Ms,
        hours: u32,
    ) -> Result<Vec<SessionDetail>, EngineError> {
        if hours > MAX_UPCOMING_HOURS {
            return Err(EngineError::LimitExceeded("upcoming window too wide"));
        }
        let end = now.saturating_add(i64::from(hours) * HOUR_MS);
        let store = self.store.read().await;
        Ok(detailed(
            &store,
            store
                .sessions_between(now, end.saturating_add(1))
                .filter(|s| s.is_booked()),
        ))
    }

    pub async fn dashboard_stats(&self) -> DashboardStats {
        self.dashboard_stats_at(now_ms()).await
    }

    /// Counts as of `now`; "this month" is the studio-local month containing `now`.
    pub async fn dashboard_stats_at(&self, now: Ms) -> DashboardStats {
        let calendar = self.calendar();
        let month = calendar
            .year_month_of(now)
            .and_then(|(y, m)| calendar.month_range(y, m));
        let store = self.store.read().await;

        let mut stats = DashboardStats {
            total_clients: store.client_count(),
            total_photographers: store.photographer_count(),
            total_studios: store.studio_count(),
            ..Default::default()
        };
        for session in store.sessions_ascending() {
            match session.status {
                SessionStatus::Booked => stats.booked += 1,
                SessionStatus::Completed => stats.completed += 1,
                SessionStatus::Cancelled => stats.cancelled += 1,
            }
        }
        if let Some((start, end)) = month {
            stats.this_month = store.sessions_between(start, end).count();
        }
        stats
    }

    /// Every session in the studio-local month, oldest first.
    pub async fn monthly_report(
        &self,
        year: i32,
        month: u32,
    ) -> Result<Vec<SessionDetail>, EngineError> {
        let (start, end) = self
            .calendar()
            .month_range(year, month)
            .ok_or_else(|| EngineError::Invalid(format!("no such month: {year}-{month:02}")))?;
        let store = self.store.read().await;
        Ok(detailed(&store, store.sessions_between(start, end)))
    }

    /// Every session on the inclusive local dates `[start, end]`, oldest first.
    /// A reversed range is empty.
    pub async fn period_report(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<SessionDetail>, EngineError> {
        if end < start {
            return Ok(Vec::new());
        }
        if (end - start).num_days() >= MAX_PERIOD_DAYS {
            return Err(EngineError::LimitExceeded("report period too long"));
        }
        let (from, to) = self
            .calendar()
            .date_range(start, end)
            .ok_or_else(|| EngineError::Invalid(format!("invalid period {start}..{end}")))?;
        let store = self.store.read().await;
        Ok(detailed(&store, store.sessions_between(from, to)))
    }
}
