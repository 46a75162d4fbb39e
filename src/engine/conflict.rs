use ulid::Ulid;

use crate::model::*;

use super::store::Store;
use super::EngineError;

pub fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as Ms)
}

pub(crate) fn validate_timestamp(at: Ms) -> Result<(), EngineError> {
    use crate::limits::*;
    if !(MIN_VALID_TIMESTAMP_MS..=MAX_VALID_TIMESTAMP_MS).contains(&at) {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    Ok(())
}

/// First Booked session holding the photographer, then the studio, inside
/// `[at - radius, at + radius]`. `exclude` is the session being edited.
pub(crate) fn find_conflict(
    store: &Store,
    photographer_id: Ulid,
    studio_id: Ulid,
    at: Ms,
    radius: Ms,
    exclude: Option<Ulid>,
) -> Option<Conflict> {
    let window = Window::around(at, radius);
    let taken = |slots: Option<&BookedSlots>| {
        slots.and_then(|slots| {
            slots
                .within(&window)
                .find(|slot| Some(slot.session_id) != exclude)
                .map(|slot| slot.session_id)
        })
    };

    if let Some(session_id) = taken(store.photographer_slots(&photographer_id)) {
        return Some(Conflict::Photographer {
            photographer_id,
            session_id,
        });
    }
    if let Some(session_id) = taken(store.studio_slots(&studio_id)) {
        return Some(Conflict::Studio {
            studio_id,
            session_id,
        });
    }
    None
}
