use std::fmt;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. The only stored time type.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;
pub const HOUR_MS: Ms = 60 * MINUTE_MS;

/// Closed interval `[start, end]` around a candidate booking time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub start: Ms,
    pub end: Ms,
}

impl Window {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start <= end, "Window start must not be after end");
        Self { start, end }
    }

    /// `[at - radius, at + radius]`.
    pub fn around(at: Ms, radius: Ms) -> Self {
        Self::new(at.saturating_sub(radius), at.saturating_add(radius))
    }

    pub fn contains(&self, t: Ms) -> bool {
        self.start <= t && t <= self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Client,
    Photographer,
    Studio,
    Session,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EntityKind::Client => "client",
            EntityKind::Photographer => "photographer",
            EntityKind::Studio => "studio",
            EntityKind::Session => "session",
        })
    }
}

// ── Entities ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    pub id: Ulid,
    pub name: String,
    pub phone: String,
    pub email: Option<String>,
    pub address: Option<String>,
    pub created_at: Ms,
    pub updated_at: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Photographer {
    pub id: Ulid,
    pub name: String,
    pub specialty: String,
    pub phone: String,
    pub created_at: Ms,
    pub updated_at: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Studio {
    pub id: Ulid,
    pub name: String,
    pub location: String,
    pub capacity: u32,
    pub created_at: Ms,
    pub updated_at: Ms,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionStatus {
    Booked,
    Completed,
    Cancelled,
}

impl SessionStatus {
    pub const ALL: [SessionStatus; 3] = [
        SessionStatus::Booked,
        SessionStatus::Completed,
        SessionStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Booked => "Booked",
            SessionStatus::Completed => "Completed",
            SessionStatus::Cancelled => "Cancelled",
        }
    }

    /// Case-insensitive parse of the three status labels.
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Package category. The named ones are what the studio sells today; anything
/// else is kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Package {
    Wedding,
    Prewedding,
    Portrait,
    Family,
    Corporate,
    Product,
    Event,
    Fashion,
    Graduation,
    Birthday,
    Other(String),
}

impl Package {
    pub const KNOWN: [Package; 10] = [
        Package::Wedding,
        Package::Prewedding,
        Package::Portrait,
        Package::Family,
        Package::Corporate,
        Package::Product,
        Package::Event,
        Package::Fashion,
        Package::Graduation,
        Package::Birthday,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            Package::Wedding => "Wedding",
            Package::Prewedding => "Prewedding",
            Package::Portrait => "Portrait",
            Package::Family => "Family",
            Package::Corporate => "Corporate",
            Package::Product => "Product",
            Package::Event => "Event",
            Package::Fashion => "Fashion",
            Package::Graduation => "Graduation",
            Package::Birthday => "Birthday",
            Package::Other(label) => label,
        }
    }
}

impl From<&str> for Package {
    fn from(s: &str) -> Self {
        let s = s.trim();
        Self::KNOWN
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s))
            .unwrap_or_else(|| Package::Other(s.to_string()))
    }
}

impl fmt::Display for Package {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: Ulid,
    pub client_id: Ulid,
    pub photographer_id: Ulid,
    pub studio_id: Ulid,
    pub scheduled_at: Ms,
    pub package: Package,
    pub status: SessionStatus,
    pub notes: Option<String>,
    pub created_at: Ms,
    pub updated_at: Ms,
}

impl Session {
    pub fn is_booked(&self) -> bool {
        self.status == SessionStatus::Booked
    }
}

// ── Write inputs (no id, no timestamps) ─────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClientFields {
    pub name: String,
    pub phone: String,
    pub email: Option<String>,
    pub address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PhotographerFields {
    pub name: String,
    pub specialty: String,
    pub phone: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudioFields {
    pub name: String,
    pub location: String,
    pub capacity: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDraft {
    pub client_id: Ulid,
    pub photographer_id: Ulid,
    pub studio_id: Ulid,
    pub scheduled_at: Ms,
    pub package: Package,
    /// `None` books the session (status Booked).
    pub status: Option<SessionStatus>,
    pub notes: Option<String>,
}

impl From<&Client> for ClientFields {
    fn from(c: &Client) -> Self {
        Self {
            name: c.name.clone(),
            phone: c.phone.clone(),
            email: c.email.clone(),
            address: c.address.clone(),
        }
    }
}

impl From<&Photographer> for PhotographerFields {
    fn from(p: &Photographer) -> Self {
        Self {
            name: p.name.clone(),
            specialty: p.specialty.clone(),
            phone: p.phone.clone(),
        }
    }
}

impl From<&Studio> for StudioFields {
    fn from(s: &Studio) -> Self {
        Self {
            name: s.name.clone(),
            location: s.location.clone(),
            capacity: s.capacity,
        }
    }
}

impl From<&Session> for SessionDraft {
    fn from(s: &Session) -> Self {
        Self {
            client_id: s.client_id,
            photographer_id: s.photographer_id,
            studio_id: s.studio_id,
            scheduled_at: s.scheduled_at,
            package: s.package.clone(),
            status: Some(s.status),
            notes: s.notes.clone(),
        }
    }
}

// ── Calendar slots ───────────────────────────────────────────────

/// A Booked session occupying a photographer's or studio's calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub at: Ms,
    pub session_id: Ulid,
}

/// Booked sessions of one photographer or studio, sorted by time.
#[derive(Debug, Clone, Default)]
pub struct BookedSlots {
    slots: Vec<Slot>,
}

impl BookedSlots {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Insert maintaining sort order by `at`.
    pub fn insert(&mut self, slot: Slot) {
        let pos = self.slots.partition_point(|s| s.at <= slot.at);
        self.slots.insert(pos, slot);
    }

    pub fn remove(&mut self, session_id: Ulid) -> Option<Slot> {
        let pos = self.slots.iter().position(|s| s.session_id == session_id)?;
        Some(self.slots.remove(pos))
    }

    /// Slots whose time falls inside the closed window.
    pub fn within(&self, window: &Window) -> impl Iterator<Item = &Slot> {
        let lo = self.slots.partition_point(|s| s.at < window.start);
        let hi = self.slots.partition_point(|s| s.at <= window.end);
        self.slots[lo..hi].iter()
    }
}

// ── Outcomes ─────────────────────────────────────────────────────

/// Why a candidate booking cannot take its slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Conflict {
    Photographer { photographer_id: Ulid, session_id: Ulid },
    Studio { studio_id: Ulid, session_id: Ulid },
}

impl Conflict {
    /// The already-booked session that holds the slot.
    pub fn session_id(&self) -> Ulid {
        match self {
            Conflict::Photographer { session_id, .. } | Conflict::Studio { session_id, .. } => {
                *session_id
            }
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Conflict::Photographer { .. } => "photographer",
            Conflict::Studio { .. } => "studio",
        }
    }
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Conflict::Photographer { session_id, .. } => write!(
                f,
                "photographer already booked at that time (session {session_id})"
            ),
            Conflict::Studio { session_id, .. } => {
                write!(f, "studio already in use at that time (session {session_id})")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingMode {
    /// Reject on conflict.
    Strict,
    /// Commit even when the slot is taken.
    Force,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Booking {
    Committed {
        id: Ulid,
        /// The conflict a forced booking went through, if any.
        overridden: Option<Conflict>,
    },
    Rejected(Conflict),
}

impl Booking {
    pub fn id(&self) -> Option<Ulid> {
        match self {
            Booking::Committed { id, .. } => Some(*id),
            Booking::Rejected(_) => None,
        }
    }

    pub fn conflict(&self) -> Option<Conflict> {
        match self {
            Booking::Committed { overridden, .. } => *overridden,
            Booking::Rejected(c) => Some(*c),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    Removed,
    NotFound,
    /// Blocked by the reference guard.
    InUse { sessions: usize },
}

impl Removal {
    pub fn is_removed(&self) -> bool {
        matches!(self, Removal::Removed)
    }
}

/// The event types. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ClientRegistered(Client),
    ClientUpdated(Client),
    ClientDeleted { id: Ulid },
    PhotographerRegistered(Photographer),
    PhotographerUpdated(Photographer),
    PhotographerDeleted { id: Ulid },
    StudioRegistered(Studio),
    StudioUpdated(Studio),
    StudioDeleted { id: Ulid },
    SessionBooked(Session),
    SessionUpdated(Session),
    SessionDeleted { id: Ulid },
}

// ── Query result types ───────────────────────────────────────────

/// A session joined with the display fields of the entities it references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionDetail {
    pub session: Session,
    pub client_name: String,
    pub photographer_name: String,
    pub studio_name: String,
    pub studio_location: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct DashboardStats {
    pub total_clients: usize,
    pub total_photographers: usize,
    pub total_studios: usize,
    pub booked: usize,
    pub completed: usize,
    pub cancelled: usize,
    pub this_month: usize,
}

impl DashboardStats {
    pub fn total_sessions(&self) -> usize {
        self.booked + self.completed + self.cancelled
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionFilter {
    pub status: Option<SessionStatus>,
    /// Matched case-insensitively against client, photographer and studio names,
    /// studio location and package.
    pub text: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(at: Ms) -> Slot {
        Slot {
            at,
            session_id: Ulid::new(),
        }
    }

    #[test]
    fn window_is_closed() {
        let w = Window::around(10 * HOUR_MS, HOUR_MS);
        assert!(w.contains(9 * HOUR_MS));
        assert!(w.contains(11 * HOUR_MS));
        assert!(!w.contains(11 * HOUR_MS + 1));
        assert!(!w.contains(9 * HOUR_MS - 1));
    }

    #[test]
    fn slots_stay_sorted() {
        let mut slots = BookedSlots::new();
        slots.insert(slot(300));
        slots.insert(slot(100));
        slots.insert(slot(200));
        let ats: Vec<Ms> = slots.within(&Window::new(0, 1000)).map(|s| s.at).collect();
        assert_eq!(ats, vec![100, 200, 300]);
    }

    #[test]
    fn within_includes_both_bounds() {
        let mut slots = BookedSlots::new();
        for at in [99, 100, 150, 200, 201] {
            slots.insert(slot(at));
        }
        let ats: Vec<Ms> = slots.within(&Window::new(100, 200)).map(|s| s.at).collect();
        assert_eq!(ats, vec![100, 150, 200]);
    }

    #[test]
    fn within_empty_and_disjoint() {
        let mut slots = BookedSlots::new();
        assert_eq!(slots.within(&Window::new(0, 1000)).count(), 0);
        slots.insert(slot(5000));
        assert_eq!(slots.within(&Window::new(0, 1000)).count(), 0);
        assert_eq!(slots.within(&Window::new(6000, 7000)).count(), 0);
    }

    #[test]
    fn remove_by_session() {
        let mut slots = BookedSlots::new();
        let a = slot(100);
        let b = slot(100);
        slots.insert(a);
        slots.insert(b);
        assert_eq!(slots.remove(a.session_id), Some(a));
        assert_eq!(slots.len(), 1);
        assert!(slots.remove(Ulid::new()).is_none());
        assert_eq!(slots.within(&Window::new(100, 100)).next(), Some(&b));
    }

    #[test]
    fn package_parsing_is_open() {
        assert_eq!(Package::from("wedding"), Package::Wedding);
        assert_eq!(Package::from(" Graduation "), Package::Graduation);
        assert_eq!(
            Package::from("Maternity"),
            Package::Other("Maternity".into())
        );
        assert_eq!(Package::from("Maternity").as_str(), "Maternity");
    }

    #[test]
    fn status_parsing() {
        assert_eq!(SessionStatus::parse("booked"), Some(SessionStatus::Booked));
        assert_eq!(SessionStatus::parse("Cancelled"), Some(SessionStatus::Cancelled));
        assert_eq!(SessionStatus::parse("done"), None);
    }

    #[test]
    fn conflict_accessors() {
        let sid = Ulid::new();
        let c = Conflict::Studio {
            studio_id: Ulid::new(),
            session_id: sid,
        };
        assert_eq!(c.session_id(), sid);
        assert_eq!(c.label(), "studio");
        assert!(c.to_string().contains("studio already in use"));
        assert_eq!(Booking::Rejected(c).id(), None);
        assert_eq!(Booking::Rejected(c).conflict(), Some(c));
    }

    #[test]
    fn dashboard_total() {
        let stats = DashboardStats {
            booked: 2,
            completed: 3,
            cancelled: 1,
            ..Default::default()
        };
        assert_eq!(stats.total_sessions(), 6);
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::SessionBooked(Session {
            id: Ulid::new(),
            client_id: Ulid::new(),
            photographer_id: Ulid::new(),
            studio_id: Ulid::new(),
            scheduled_at: 1_748_772_000_000,
            package: Package::Other("Maternity".into()),
            status: SessionStatus::Booked,
            notes: Some("bring props".into()),
            created_at: 1,
            updated_at: 1,
        });
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
