use std::collections::{BTreeSet, HashMap};

use ulid::Ulid;

use crate::model::*;

/// In-memory state of one tenant, rebuilt from the WAL on startup.
#[derive(Debug, Default)]
pub struct Store {
    clients: HashMap<Ulid, Client>,
    photographers: HashMap<Ulid, Photographer>,
    studios: HashMap<Ulid, Studio>,
    sessions: HashMap<Ulid, Session>,
    /// Every session, any status, ordered by `(scheduled_at, id)`.
    timeline: BTreeSet<(Ms, Ulid)>,
    photographer_slots: HashMap<Ulid, BookedSlots>,
    studio_slots: HashMap<Ulid, BookedSlots>,
    /// Sessions (any status) referencing a client, photographer or studio.
    references: HashMap<Ulid, usize>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Lookups ──────────────────────────────────────────────

    pub fn client(&self, id: &Ulid) -> Option<&Client> {
        self.clients.get(id)
    }

    pub fn photographer(&self, id: &Ulid) -> Option<&Photographer> {
        self.photographers.get(id)
    }

    pub fn studio(&self, id: &Ulid) -> Option<&Studio> {
        self.studios.get(id)
    }

    pub fn session(&self, id: &Ulid) -> Option<&Session> {
        self.sessions.get(id)
    }

    pub fn clients(&self) -> impl Iterator<Item = &Client> {
        self.clients.values()
    }

    pub fn photographers(&self) -> impl Iterator<Item = &Photographer> {
        self.photographers.values()
    }

    pub fn studios(&self) -> impl Iterator<Item = &Studio> {
        self.studios.values()
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn photographer_count(&self) -> usize {
        self.photographers.len()
    }

    pub fn studio_count(&self) -> usize {
        self.studios.len()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// All sessions in ascending time order.
    pub fn sessions_ascending(&self) -> impl DoubleEndedIterator<Item = &Session> {
        self.timeline.iter().filter_map(|(_, id)| self.sessions.get(id))
    }

    /// Sessions with `start <= scheduled_at < end`, ascending.
    pub fn sessions_between(&self, start: Ms, end: Ms) -> impl Iterator<Item = &Session> {
        let lo = (start, Ulid::nil());
        let range = if start < end {
            self.timeline.range(lo..(end, Ulid::nil()))
        } else {
            self.timeline.range(lo..lo)
        };
        range.filter_map(|(_, id)| self.sessions.get(id))
    }

    pub fn photographer_slots(&self, id: &Ulid) -> Option<&BookedSlots> {
        self.photographer_slots.get(id)
    }

    pub fn studio_slots(&self, id: &Ulid) -> Option<&BookedSlots> {
        self.studio_slots.get(id)
    }

    /// Number of sessions that point at this client, photographer or studio.
    pub fn reference_count(&self, id: &Ulid) -> usize {
        self.references.get(id).copied().unwrap_or(0)
    }

    /// Join a session with the display names of what it references.
    /// `None` if a referenced entity is gone.
    pub fn detail(&self, session: &Session) -> Option<SessionDetail> {
        let client = self.clients.get(&session.client_id)?;
        let photographer = self.photographers.get(&session.photographer_id)?;
        let studio = self.studios.get(&session.studio_id)?;
        Some(SessionDetail {
            session: session.clone(),
            client_name: client.name.clone(),
            photographer_name: photographer.name.clone(),
            studio_name: studio.name.clone(),
            studio_location: studio.location.clone(),
        })
    }

    // ── Event application ────────────────────────────────────

    pub fn apply_event(&mut self, event: &Event) {
        match event {
            Event::ClientRegistered(c) | Event::ClientUpdated(c) => {
                self.clients.insert(c.id, c.clone());
            }
            Event::ClientDeleted { id } => {
                self.clients.remove(id);
            }
            Event::PhotographerRegistered(p) | Event::PhotographerUpdated(p) => {
                self.photographers.insert(p.id, p.clone());
            }
            Event::PhotographerDeleted { id } => {
                self.photographers.remove(id);
                self.photographer_slots.remove(id);
            }
            Event::StudioRegistered(s) | Event::StudioUpdated(s) => {
                self.studios.insert(s.id, s.clone());
            }
            Event::StudioDeleted { id } => {
                self.studios.remove(id);
                self.studio_slots.remove(id);
            }
            Event::SessionBooked(s) | Event::SessionUpdated(s) => {
                self.remove_session(&s.id);
                self.insert_session(s.clone());
            }
            Event::SessionDeleted { id } => {
                self.remove_session(id);
            }
        }
    }

    fn insert_session(&mut self, session: Session) {
        self.timeline.insert((session.scheduled_at, session.id));
        for parent in [session.client_id, session.photographer_id, session.studio_id] {
            *self.references.entry(parent).or_insert(0) += 1;
        }
        if session.is_booked() {
            let slot = Slot {
                at: session.scheduled_at,
                session_id: session.id,
            };
            self.photographer_slots
                .entry(session.photographer_id)
                .or_default()
                .insert(slot);
            self.studio_slots
                .entry(session.studio_id)
                .or_default()
                .insert(slot);
        }
        self.sessions.insert(session.id, session);
    }

    fn remove_session(&mut self, id: &Ulid) -> Option<Session> {
        let session = self.sessions.remove(id)?;
        self.timeline.remove(&(session.scheduled_at, session.id));
        for parent in [session.client_id, session.photographer_id, session.studio_id] {
            if let Some(n) = self.references.get_mut(&parent) {
                *n -= 1;
                if *n == 0 {
                    self.references.remove(&parent);
                }
            }
        }
        if session.is_booked() {
            if let Some(slots) = self.photographer_slots.get_mut(&session.photographer_id) {
                slots.remove(session.id);
            }
            if let Some(slots) = self.studio_slots.get_mut(&session.studio_id) {
                slots.remove(session.id);
            }
        }
        Some(session)
    }

    /// Minimal event list that recreates the current state. Parents come first.
    pub fn snapshot(&self) -> Vec<Event> {
        let mut events = Vec::with_capacity(
            self.clients.len() + self.photographers.len() + self.studios.len() + self.sessions.len(),
        );
        events.extend(self.clients.values().cloned().map(Event::ClientRegistered));
        events.extend(
            self.photographers
                .values()
                .cloned()
                .map(Event::PhotographerRegistered),
        );
        events.extend(self.studios.values().cloned().map(Event::StudioRegistered));
        events.extend(self.sessions_ascending().cloned().map(Event::SessionBooked));
        events
    }
}
