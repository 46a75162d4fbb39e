use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{find_conflict, now_ms, validate_timestamp};
use super::store::Store;
use super::{Engine, EngineError};

/// Trimmed, non-empty, bounded.
fn required(field: &'static str, value: &str, max: usize) -> Result<String, EngineError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(EngineError::Missing(field));
    }
    if value.len() > max {
        return Err(EngineError::TooLong { field, max });
    }
    Ok(value.to_string())
}

/// Trimmed; blank becomes `None`.
fn optional(
    field: &'static str,
    value: Option<&str>,
    max: usize,
) -> Result<Option<String>, EngineError> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(v) if v.len() > max => Err(EngineError::TooLong { field, max }),
        Some(v) => Ok(Some(v.to_string())),
    }
}

fn validate_client(fields: &ClientFields) -> Result<ClientFields, EngineError> {
    Ok(ClientFields {
        name: required("name", &fields.name, MAX_NAME_LEN)?,
        phone: required("phone", &fields.phone, MAX_PHONE_LEN)?,
        email: optional("email", fields.email.as_deref(), MAX_CONTACT_LEN)?,
        address: optional("address", fields.address.as_deref(), MAX_CONTACT_LEN)?,
    })
}

fn validate_photographer(fields: &PhotographerFields) -> Result<PhotographerFields, EngineError> {
    Ok(PhotographerFields {
        name: required("name", &fields.name, MAX_NAME_LEN)?,
        specialty: required("specialty", &fields.specialty, MAX_NAME_LEN)?,
        phone: required("phone", &fields.phone, MAX_PHONE_LEN)?,
    })
}

fn validate_studio(fields: &StudioFields) -> Result<StudioFields, EngineError> {
    if fields.capacity == 0 {
        return Err(EngineError::Invalid("capacity must be greater than zero".into()));
    }
    Ok(StudioFields {
        name: required("name", &fields.name, MAX_NAME_LEN)?,
        location: required("location", &fields.location, MAX_NAME_LEN)?,
        capacity: fields.capacity,
    })
}

/// Field checks plus referential integrity against the current store.
fn validate_draft(store: &Store, draft: &SessionDraft) -> Result<SessionDraft, EngineError> {
    validate_timestamp(draft.scheduled_at)?;
    if store.client(&draft.client_id).is_none() {
        return Err(EngineError::NotFound {
            kind: EntityKind::Client,
            id: draft.client_id,
        });
    }
    if store.photographer(&draft.photographer_id).is_none() {
        return Err(EngineError::NotFound {
            kind: EntityKind::Photographer,
            id: draft.photographer_id,
        });
    }
    if store.studio(&draft.studio_id).is_none() {
        return Err(EngineError::NotFound {
            kind: EntityKind::Studio,
            id: draft.studio_id,
        });
    }
    let package = Package::from(required("package", draft.package.as_str(), MAX_NAME_LEN)?.as_str());
    Ok(SessionDraft {
        package,
        notes: optional("notes", draft.notes.as_deref(), MAX_NOTES_LEN)?,
        ..draft.clone()
    })
}

impl Engine {
    // ── Clients ──────────────────────────────────────────────

    pub async fn register_client(&self, fields: ClientFields) -> Result<Ulid, EngineError> {
        let fields = validate_client(&fields)?;
        let mut store = self.store.write().await;
        if store.client_count() >= MAX_CLIENTS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many clients"));
        }
        let now = now_ms();
        let client = Client {
            id: Ulid::new(),
            name: fields.name,
            phone: fields.phone,
            email: fields.email,
            address: fields.address,
            created_at: now,
            updated_at: now,
        };
        let id = client.id;
        self.persist_and_apply(&mut store, Event::ClientRegistered(client))
            .await?;
        Ok(id)
    }

    /// `Ok(false)` when no client has this id.
    pub async fn update_client(&self, id: Ulid, fields: ClientFields) -> Result<bool, EngineError> {
        self.modify_client(id, move |current| *current = fields).await
    }

    /// Edit the stored fields in place. `edit` runs under the write lock, so
    /// concurrent partial updates never overwrite each other.
    pub async fn modify_client(
        &self,
        id: Ulid,
        edit: impl FnOnce(&mut ClientFields),
    ) -> Result<bool, EngineError> {
        let mut store = self.store.write().await;
        let Some(current) = store.client(&id) else {
            return Ok(false);
        };
        let mut fields = ClientFields::from(current);
        edit(&mut fields);
        let fields = validate_client(&fields)?;
        let client = Client {
            name: fields.name,
            phone: fields.phone,
            email: fields.email,
            address: fields.address,
            updated_at: now_ms(),
            ..current.clone()
        };
        self.persist_and_apply(&mut store, Event::ClientUpdated(client))
            .await?;
        Ok(true)
    }

    pub async fn delete_client(&self, id: Ulid) -> Result<Removal, EngineError> {
        self.remove_guarded(EntityKind::Client, id).await
    }

    // ── Photographers ────────────────────────────────────────

    pub async fn register_photographer(
        &self,
        fields: PhotographerFields,
    ) -> Result<Ulid, EngineError> {
        let fields = validate_photographer(&fields)?;
        let mut store = self.store.write().await;
        if store.photographer_count() >= MAX_PHOTOGRAPHERS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many photographers"));
        }
        let now = now_ms();
        let photographer = Photographer {
            id: Ulid::new(),
            name: fields.name,
            specialty: fields.specialty,
            phone: fields.phone,
            created_at: now,
            updated_at: now,
        };
        let id = photographer.id;
        self.persist_and_apply(&mut store, Event::PhotographerRegistered(photographer))
            .await?;
        Ok(id)
    }

    pub async fn update_photographer(
        &self,
        id: Ulid,
        fields: PhotographerFields,
    ) -> Result<bool, EngineError> {
        self.modify_photographer(id, move |current| *current = fields).await
    }

    pub async fn modify_photographer(
        &self,
        id: Ulid,
        edit: impl FnOnce(&mut PhotographerFields),
    ) -> Result<bool, EngineError> {
        let mut store = self.store.write().await;
        let Some(current) = store.photographer(&id) else {
            return Ok(false);
        };
        let mut fields = PhotographerFields::from(current);
        edit(&mut fields);
        let fields = validate_photographer(&fields)?;
        let photographer = Photographer {
            name: fields.name,
            specialty: fields.specialty,
            phone: fields.phone,
            updated_at: now_ms(),
            ..current.clone()
        };
        self.persist_and_apply(&mut store, Event::PhotographerUpdated(photographer))
            .await?;
        Ok(true)
    }

    pub async fn delete_photographer(&self, id: Ulid) -> Result<Removal, EngineError> {
        self.remove_guarded(EntityKind::Photographer, id).await
    }

    // ── Studios ──────────────────────────────────────────────

    pub async fn register_studio(&self, fields: StudioFields) -> Result<Ulid, EngineError> {
        let fields = validate_studio(&fields)?;
        let mut store = self.store.write().await;
        if store.studio_count() >= MAX_STUDIOS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many studios"));
        }
        let now = now_ms();
        let studio = Studio {
            id: Ulid::new(),
            name: fields.name,
            location: fields.location,
            capacity: fields.capacity,
            created_at: now,
            updated_at: now,
        };
        let id = studio.id;
        self.persist_and_apply(&mut store, Event::StudioRegistered(studio))
            .await?;
        Ok(id)
    }

    pub async fn update_studio(&self, id: Ulid, fields: StudioFields) -> Result<bool, EngineError> {
        self.modify_studio(id, move |current| *current = fields).await
    }

    pub async fn modify_studio(
        &self,
        id: Ulid,
        edit: impl FnOnce(&mut StudioFields),
    ) -> Result<bool, EngineError> {
        let mut store = self.store.write().await;
        let Some(current) = store.studio(&id) else {
            return Ok(false);
        };
        let mut fields = StudioFields::from(current);
        edit(&mut fields);
        let fields = validate_studio(&fields)?;
        let studio = Studio {
            name: fields.name,
            location: fields.location,
            capacity: fields.capacity,
            updated_at: now_ms(),
            ..current.clone()
        };
        self.persist_and_apply(&mut store, Event::StudioUpdated(studio))
            .await?;
        Ok(true)
    }

    pub async fn delete_studio(&self, id: Ulid) -> Result<Removal, EngineError> {
        self.remove_guarded(EntityKind::Studio, id).await
    }

    /// Delete a client, photographer or studio unless a session still points at it.
    async fn remove_guarded(&self, kind: EntityKind, id: Ulid) -> Result<Removal, EngineError> {
        let mut store = self.store.write().await;
        let (exists, event) = match kind {
            EntityKind::Client => (store.client(&id).is_some(), Event::ClientDeleted { id }),
            EntityKind::Photographer => (
                store.photographer(&id).is_some(),
                Event::PhotographerDeleted { id },
            ),
            EntityKind::Studio => (store.studio(&id).is_some(), Event::StudioDeleted { id }),
            EntityKind::Session => {
                return Err(EngineError::Invalid("sessions are not reference-guarded".into()));
            }
        };
        if !exists {
            return Ok(Removal::NotFound);
        }
        let sessions = store.reference_count(&id);
        if sessions > 0 {
            debug!("refusing to delete {kind} {id}: referenced by {sessions} sessions");
            return Ok(Removal::InUse { sessions });
        }
        self.persist_and_apply(&mut store, event).await?;
        info!("deleted {kind} {id}");
        Ok(Removal::Removed)
    }

    // ── Sessions ─────────────────────────────────────────────

    /// Would a booking at `at` collide with a Booked session of this
    /// photographer or studio? Photographer conflicts are reported first.
    pub async fn check_conflict(
        &self,
        photographer_id: Ulid,
        studio_id: Ulid,
        at: Ms,
        exclude: Option<Ulid>,
    ) -> Result<Option<Conflict>, EngineError> {
        validate_timestamp(at)?;
        let store = self.store.read().await;
        Ok(find_conflict(
            &store,
            photographer_id,
            studio_id,
            at,
            self.config.conflict_radius,
            exclude,
        ))
    }

    pub async fn create_session(
        &self,
        draft: SessionDraft,
        mode: BookingMode,
    ) -> Result<Booking, EngineError> {
        let mut store = self.store.write().await;
        if store.session_count() >= MAX_SESSIONS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many sessions"));
        }
        let draft = validate_draft(&store, &draft)?;
        let id = Ulid::new();
        let overridden = match self.gate(&store, &draft, None, mode) {
            Ok(overridden) => overridden,
            Err(conflict) => return Ok(Booking::Rejected(conflict)),
        };

        let now = now_ms();
        let session = Session {
            id,
            client_id: draft.client_id,
            photographer_id: draft.photographer_id,
            studio_id: draft.studio_id,
            scheduled_at: draft.scheduled_at,
            package: draft.package,
            status: draft.status.unwrap_or(SessionStatus::Booked),
            notes: draft.notes,
            created_at: now,
            updated_at: now,
        };
        self.persist_and_apply(&mut store, Event::SessionBooked(session))
            .await?;
        Ok(Booking::Committed { id, overridden })
    }

    /// Overwrite every field of an existing session. The session's own slot
    /// never counts against it.
    pub async fn update_session(
        &self,
        id: Ulid,
        draft: SessionDraft,
        mode: BookingMode,
    ) -> Result<Booking, EngineError> {
        self.modify_session(id, mode, move |current| *current = draft)
            .await
    }

    /// Like `update_session`, but `edit` patches the stored draft under the
    /// write lock.
    pub async fn modify_session(
        &self,
        id: Ulid,
        mode: BookingMode,
        edit: impl FnOnce(&mut SessionDraft),
    ) -> Result<Booking, EngineError> {
        let mut store = self.store.write().await;
        let Some(current) = store.session(&id).cloned() else {
            return Err(EngineError::NotFound {
                kind: EntityKind::Session,
                id,
            });
        };
        let mut draft = SessionDraft::from(&current);
        edit(&mut draft);
        let draft = validate_draft(&store, &draft)?;
        let overridden = match self.gate(&store, &draft, Some(id), mode) {
            Ok(overridden) => overridden,
            Err(conflict) => return Ok(Booking::Rejected(conflict)),
        };

        let session = Session {
            client_id: draft.client_id,
            photographer_id: draft.photographer_id,
            studio_id: draft.studio_id,
            scheduled_at: draft.scheduled_at,
            package: draft.package,
            status: draft.status.unwrap_or(current.status),
            notes: draft.notes,
            updated_at: now_ms(),
            ..current
        };
        self.persist_and_apply(&mut store, Event::SessionUpdated(session))
            .await?;
        Ok(Booking::Committed { id, overridden })
    }

    /// Move a session through its lifecycle. Only a move back to Booked is
    /// conflict-checked, and `mode` decides what a clash does there.
    pub async fn set_session_status(
        &self,
        id: Ulid,
        status: SessionStatus,
        mode: BookingMode,
    ) -> Result<Booking, EngineError> {
        let mut store = self.store.write().await;
        let Some(current) = store.session(&id).cloned() else {
            return Err(EngineError::NotFound {
                kind: EntityKind::Session,
                id,
            });
        };
        if current.status == status {
            return Ok(Booking::Committed { id, overridden: None });
        }
        let mut overridden = None;
        if status == SessionStatus::Booked {
            let draft = SessionDraft::from(&current);
            match self.gate(&store, &draft, Some(id), mode) {
                Ok(conflict) => overridden = conflict,
                Err(conflict) => return Ok(Booking::Rejected(conflict)),
            }
        }
        let session = Session {
            status,
            updated_at: now_ms(),
            ..current
        };
        self.persist_and_apply(&mut store, Event::SessionUpdated(session))
            .await?;
        info!("session {id} is now {status}");
        Ok(Booking::Committed { id, overridden })
    }

    /// Unconditional. `Ok(false)` when the id is unknown.
    pub async fn delete_session(&self, id: Ulid) -> Result<bool, EngineError> {
        let mut store = self.store.write().await;
        if store.session(&id).is_none() {
            return Ok(false);
        }
        self.persist_and_apply(&mut store, Event::SessionDeleted { id })
            .await?;
        Ok(true)
    }

    /// Apply the conflict rule. `Ok` carries the conflict a forced booking
    /// overrides; `Err` is a strict rejection.
    fn gate(
        &self,
        store: &Store,
        draft: &SessionDraft,
        exclude: Option<Ulid>,
        mode: BookingMode,
    ) -> Result<Option<Conflict>, Conflict> {
        let found = find_conflict(
            store,
            draft.photographer_id,
            draft.studio_id,
            draft.scheduled_at,
            self.config.conflict_radius,
            exclude,
        );
        match (found, mode) {
            (None, _) => Ok(None),
            (Some(conflict), BookingMode::Strict) => {
                debug!("booking rejected: {conflict}");
                metrics::counter!(crate::observability::BOOKINGS_REJECTED_TOTAL, "resource" => conflict.label())
                    .increment(1);
                Err(conflict)
            }
            (Some(conflict), BookingMode::Force) => {
                warn!("forcing booking over conflict: {conflict}");
                metrics::counter!(crate::observability::BOOKINGS_FORCED_TOTAL, "resource" => conflict.label())
                    .increment(1);
                Ok(Some(conflict))
            }
        }
    }

    // ── Maintenance ──────────────────────────────────────────

    /// Rewrite the WAL with only the events needed to recreate the current state.
    /// Holds the read lock throughout so no write lands between snapshot and swap.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let store = self.store.read().await;
        let events = store.snapshot();
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.wal_tx
            .send(super::WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        let result = rx
            .await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()));
        drop(store);
        result
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = tokio::sync::oneshot::channel();
        if self
            .wal_tx
            .send(super::WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
