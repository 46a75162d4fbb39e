use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::data::DataRow;
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use tracing::warn;
use ulid::Ulid;

use crate::auth::StudioAuthSource;
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability::{command_label, QUERIES_TOTAL, QUERY_DURATION_SECONDS};
use crate::report::ReportError;
use crate::sql::{self, Command, Lookup, Shape};
use crate::tenant::TenantManager;

pub struct StudioHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<StudioQueryParser>,
}

impl StudioHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(StudioQueryParser),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.tenant_manager
            .get_or_create(&db)
            .map_err(|e| user_error("08006", format!("tenant error: {e}")))
    }

    /// Parse, run and time one statement.
    async fn run<C: ClientInfo>(&self, client: &C, query: &str) -> PgWireResult<Response> {
        let engine = self.resolve_engine(client)?;
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        let label = command_label(&cmd);
        let start = Instant::now();
        let result = self.execute_command(&engine, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(start.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(&self, engine: &Engine, cmd: Command) -> PgWireResult<Response> {
        let calendar = engine.calendar();
        match cmd {
            Command::InsertClient { fields, returning } => {
                let id = engine.register_client(fields).await.map_err(engine_err)?;
                Ok(inserted(id, returning))
            }
            Command::InsertPhotographer { fields, returning } => {
                let id = engine
                    .register_photographer(fields)
                    .await
                    .map_err(engine_err)?;
                Ok(inserted(id, returning))
            }
            Command::InsertStudio { fields, returning } => {
                let id = engine.register_studio(fields).await.map_err(engine_err)?;
                Ok(inserted(id, returning))
            }
            Command::InsertSession {
                args,
                mode,
                returning,
            } => {
                let draft = args.into_draft(&calendar).map_err(sql_err)?;
                let booking = engine
                    .create_session(draft, mode)
                    .await
                    .map_err(engine_err)?;
                Ok(inserted(committed(booking)?, returning))
            }
            Command::UpdateClient { id, patch } => {
                let ok = engine
                    .modify_client(id, move |fields| patch.apply(fields))
                    .await
                    .map_err(engine_err)?;
                Ok(updated(ok))
            }
            Command::UpdatePhotographer { id, patch } => {
                let ok = engine
                    .modify_photographer(id, move |fields| patch.apply(fields))
                    .await
                    .map_err(engine_err)?;
                Ok(updated(ok))
            }
            Command::UpdateStudio { id, patch } => {
                let ok = engine
                    .modify_studio(id, move |fields| patch.apply(fields))
                    .await
                    .map_err(engine_err)?;
                Ok(updated(ok))
            }
            Command::UpdateSession { id, patch, mode } => {
                let result = match patch.status_only() {
                    Some(status) => engine.set_session_status(id, status, mode).await,
                    None => {
                        let edit = patch.resolve(&calendar).map_err(sql_err)?;
                        engine
                            .modify_session(id, mode, move |draft| edit.apply(draft))
                            .await
                    }
                };
                match result {
                    Err(EngineError::NotFound {
                        kind: EntityKind::Session,
                        ..
                    }) => Ok(updated(false)),
                    other => {
                        committed(other.map_err(engine_err)?)?;
                        Ok(updated(true))
                    }
                }
            }
            Command::Delete { kind, id } => {
                let removal = match kind {
                    EntityKind::Client => engine.delete_client(id).await,
                    EntityKind::Photographer => engine.delete_photographer(id).await,
                    EntityKind::Studio => engine.delete_studio(id).await,
                    EntityKind::Session => engine.delete_session(id).await.map(|removed| {
                        if removed {
                            Removal::Removed
                        } else {
                            Removal::NotFound
                        }
                    }),
                }
                .map_err(engine_err)?;
                match removal {
                    Removal::Removed => Ok(Response::Execution(Tag::new("DELETE").with_rows(1))),
                    Removal::NotFound => Ok(Response::Execution(Tag::new("DELETE").with_rows(0))),
                    Removal::InUse { sessions } => Err(user_error(
                        "23503",
                        format!("{kind} {id} is still referenced by {sessions} session(s)"),
                    )),
                }
            }
            Command::SelectClients(lookup) => {
                let clients = match lookup {
                    Lookup::All => engine.list_clients().await,
                    Lookup::Id(id) => engine.client(id).await.into_iter().collect(),
                    Lookup::Search(term) => engine.search_clients(&term).await.map_err(engine_err)?,
                };
                rows(client_schema(), clients, |enc, c| {
                    enc.encode_field(&c.id.to_string())?;
                    enc.encode_field(&c.name)?;
                    enc.encode_field(&c.phone)?;
                    enc.encode_field(&c.email)?;
                    enc.encode_field(&c.address)?;
                    enc.encode_field(&c.created_at)?;
                    enc.encode_field(&c.updated_at)
                })
            }
            Command::SelectPhotographers(lookup) => {
                let photographers = match lookup {
                    Lookup::All => engine.list_photographers().await,
                    Lookup::Id(id) => engine.photographer(id).await.into_iter().collect(),
                    Lookup::Search(term) => engine
                        .search_photographers(&term)
                        .await
                        .map_err(engine_err)?,
                };
                rows(photographer_schema(), photographers, |enc, p| {
                    enc.encode_field(&p.id.to_string())?;
                    enc.encode_field(&p.name)?;
                    enc.encode_field(&p.specialty)?;
                    enc.encode_field(&p.phone)?;
                    enc.encode_field(&p.created_at)?;
                    enc.encode_field(&p.updated_at)
                })
            }
            Command::SelectStudios(lookup) => {
                let studios = match lookup {
                    Lookup::All => engine.list_studios().await,
                    Lookup::Id(id) => engine.studio(id).await.into_iter().collect(),
                    Lookup::Search(term) => engine.search_studios(&term).await.map_err(engine_err)?,
                };
                rows(studio_schema(), studios, |enc, s| {
                    enc.encode_field(&s.id.to_string())?;
                    enc.encode_field(&s.name)?;
                    enc.encode_field(&s.location)?;
                    enc.encode_field(&i64::from(s.capacity))?;
                    enc.encode_field(&s.created_at)?;
                    enc.encode_field(&s.updated_at)
                })
            }
            Command::SelectSessions { id, filter } => {
                let details = match id {
                    Some(id) => engine.session_detail(id).await.into_iter().collect(),
                    None => engine.search_sessions(&filter).await.map_err(engine_err)?,
                };
                session_rows(engine, details)
            }
            Command::SelectUpcoming { hours } => {
                let details = engine.upcoming_sessions(hours).await.map_err(engine_err)?;
                session_rows(engine, details)
            }
            Command::SelectMonthlyReport { year, month } => {
                let details = engine
                    .monthly_report(year, month)
                    .await
                    .map_err(engine_err)?;
                session_rows(engine, details)
            }
            Command::SelectPeriodReport { start, end } => {
                let details = engine.period_report(start, end).await.map_err(engine_err)?;
                session_rows(engine, details)
            }
            Command::SelectDashboard => {
                let stats = engine.dashboard_stats().await;
                rows(dashboard_schema(), [stats], |enc, s| {
                    for n in [
                        s.total_clients,
                        s.total_photographers,
                        s.total_studios,
                        s.booked,
                        s.completed,
                        s.cancelled,
                        s.total_sessions(),
                        s.this_month,
                    ] {
                        enc.encode_field(&(n as i64))?;
                    }
                    Ok(())
                })
            }
            Command::SelectConflicts {
                photographer_id,
                studio_id,
                scheduled_at,
                exclude,
            } => {
                let at = scheduled_at.resolve(&calendar).map_err(sql_err)?;
                let conflict = engine
                    .check_conflict(photographer_id, studio_id, at, exclude)
                    .await
                    .map_err(engine_err)?;
                rows(conflict_schema(), [conflict], |enc, c| {
                    enc.encode_field(&c.is_some())?;
                    enc.encode_field(&c.map(|c| c.label().to_string()))?;
                    enc.encode_field(&c.map(|c| c.session_id().to_string()))?;
                    enc.encode_field(&c.map(|c| c.to_string()))
                })
            }
            Command::SelectReportDocument(scope) => {
                let doc = self
                    .tenant_manager
                    .reports()
                    .generate(engine, scope)
                    .await
                    .map_err(|e| match e {
                        ReportError::Engine(e) => engine_err(e),
                        other => user_error("XX000", other.to_string()),
                    })?;
                let json = doc
                    .to_json()
                    .map_err(|e| user_error("XX000", format!("report encoding failed: {e}")))?;
                rows(report_schema(), [(doc, json)], |enc, (doc, json)| {
                    enc.encode_field(&doc.title)?;
                    enc.encode_field(&(doc.rows.len() as i64))?;
                    enc.encode_field(&json)
                })
            }
        }
    }
}

/// Commit or surface the conflict as SQLSTATE 23P01 (exclusion_violation).
fn committed(booking: Booking) -> PgWireResult<Ulid> {
    match booking {
        Booking::Committed { id, overridden } => {
            if let Some(conflict) = overridden {
                warn!("session {id} booked over conflict: {conflict}");
            }
            Ok(id)
        }
        Booking::Rejected(conflict) => Err(user_error("23P01", conflict.to_string())),
    }
}

fn inserted(id: Ulid, returning: bool) -> Response {
    if !returning {
        return Response::Execution(Tag::new("INSERT").with_rows(1));
    }
    let schema = Arc::new(vec![text_field("id")]);
    let mut encoder = DataRowEncoder::new(schema.clone());
    let row = encoder
        .encode_field(&id.to_string())
        .map(|()| encoder.take_row());
    Response::Query(QueryResponse::new(schema, stream::iter(vec![row])))
}

fn updated(ok: bool) -> Response {
    Response::Execution(Tag::new("UPDATE").with_rows(usize::from(ok)))
}

fn rows<T>(
    schema: Vec<FieldInfo>,
    items: impl IntoIterator<Item = T>,
    encode: impl Fn(&mut DataRowEncoder, T) -> PgWireResult<()>,
) -> PgWireResult<Response> {
    let schema = Arc::new(schema);
    let rows: Vec<PgWireResult<DataRow>> = items
        .into_iter()
        .map(|item| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode(&mut encoder, item)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn session_rows(engine: &Engine, details: Vec<SessionDetail>) -> PgWireResult<Response> {
    let calendar = engine.calendar();
    rows(session_schema(), details, |enc, d| {
        let s = &d.session;
        enc.encode_field(&s.id.to_string())?;
        enc.encode_field(&s.client_id.to_string())?;
        enc.encode_field(&s.photographer_id.to_string())?;
        enc.encode_field(&s.studio_id.to_string())?;
        enc.encode_field(&s.scheduled_at)?;
        enc.encode_field(&calendar.format(s.scheduled_at))?;
        enc.encode_field(&s.package.to_string())?;
        enc.encode_field(&s.status.to_string())?;
        enc.encode_field(&s.notes)?;
        enc.encode_field(&d.client_name)?;
        enc.encode_field(&d.photographer_name)?;
        enc.encode_field(&d.studio_name)?;
        enc.encode_field(&d.studio_location)
    })
}

// ── Schemas ──────────────────────────────────────────────────────

fn field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn text_field(name: &str) -> FieldInfo {
    field(name, Type::VARCHAR)
}

fn client_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("name"),
        text_field("phone"),
        text_field("email"),
        text_field("address"),
        field("created_at", Type::INT8),
        field("updated_at", Type::INT8),
    ]
}

fn photographer_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("name"),
        text_field("specialty"),
        text_field("phone"),
        field("created_at", Type::INT8),
        field("updated_at", Type::INT8),
    ]
}

fn studio_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("name"),
        text_field("location"),
        field("capacity", Type::INT8),
        field("created_at", Type::INT8),
        field("updated_at", Type::INT8),
    ]
}

fn session_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("client_id"),
        text_field("photographer_id"),
        text_field("studio_id"),
        field("scheduled_at", Type::INT8),
        text_field("scheduled_local"),
        text_field("package"),
        text_field("status"),
        text_field("notes"),
        text_field("client_name"),
        text_field("photographer_name"),
        text_field("studio_name"),
        text_field("studio_location"),
    ]
}

fn dashboard_schema() -> Vec<FieldInfo> {
    [
        "total_clients",
        "total_photographers",
        "total_studios",
        "booked",
        "completed",
        "cancelled",
        "total_sessions",
        "this_month",
    ]
    .into_iter()
    .map(|name| field(name, Type::INT8))
    .collect()
}

fn conflict_schema() -> Vec<FieldInfo> {
    vec![
        field("conflict", Type::BOOL),
        text_field("resource"),
        text_field("session_id"),
        text_field("message"),
    ]
}

fn report_schema() -> Vec<FieldInfo> {
    vec![
        text_field("title"),
        field("rows", Type::INT8),
        text_field("document"),
    ]
}

fn schema_for(sql: &str) -> Vec<FieldInfo> {
    match sql::describe(sql) {
        Shape::ReturningId => vec![text_field("id")],
        Shape::NoRows => vec![],
        Shape::Rows(table) => match table.as_str() {
            "clients" => client_schema(),
            "photographers" => photographer_schema(),
            "studios" => studio_schema(),
            "sessions" | "upcoming_sessions" | "monthly_report" | "period_report" => {
                session_schema()
            }
            "dashboard" => dashboard_schema(),
            "conflicts" => conflict_schema(),
            "report_documents" => report_schema(),
            _ => vec![],
        },
    }
}

#[async_trait]
impl SimpleQueryHandler for StudioHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(vec![self.run(client, query).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct StudioQueryParser;

#[async_trait]
impl QueryParser for StudioQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(schema_for(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for StudioHandler {
    type Statement = String;
    type QueryParser = StudioQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let sql = substitute_params(portal);
        self.run(client, &sql).await
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(
            param_types,
            schema_for(&target.statement),
        ))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(schema_for(
            &target.statement.statement,
        )))
    }
}

/// Highest `$N` placeholder in the statement.
fn count_params(sql: &str) -> usize {
    let bytes = sql.as_bytes();
    let mut max = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'$' {
            i += 1;
            continue;
        }
        i += 1;
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if let Ok(n) = sql[start..i].parse::<usize>() {
            max = max.max(n);
        }
    }
    max
}

/// Inline bound text parameters as quoted literals, highest index first so
/// `$1` does not clobber `$10`.
fn substitute_params(portal: &Portal<String>) -> String {
    let mut result = portal.statement.statement.to_string();
    for (i, param) in portal.parameters.iter().enumerate().rev() {
        let placeholder = format!("${}", i + 1);
        let value = match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes);
                format!("'{}'", text.replace('\'', "''"))
            }
            None => "NULL".to_string(),
        };
        result = result.replace(&placeholder, &value);
    }
    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct StudioFactory {
    handler: Arc<StudioHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<StudioAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl StudioFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        let auth_source = StudioAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(StudioHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for StudioFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    tenant_manager: Arc<TenantManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let factory = Arc::new(StudioFactory::new(tenant_manager, password));
    pgwire::tokio::process_socket(socket, tls, factory).await?;
    Ok(())
}

// ── Errors ───────────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        message,
    )))
}

fn engine_err(e: EngineError) -> PgWireError {
    let code = match &e {
        EngineError::NotFound { .. } => "P0002",
        EngineError::Missing(_) => "23502",
        EngineError::TooLong { .. } => "22001",
        EngineError::Invalid(_) => "22023",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::WalError(_) => "58030",
    };
    if e.is_storage() {
        tracing::error!("storage failure: {e}");
    }
    user_error(code, e.to_string())
}

fn sql_err(e: sql::SqlError) -> PgWireError {
    user_error("42601", e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_highest_placeholder() {
        assert_eq!(count_params("SELECT * FROM clients"), 0);
        assert_eq!(count_params("INSERT INTO clients VALUES ($1, $2)"), 2);
        assert_eq!(count_params("SELECT * FROM sessions WHERE id = $10 AND x = $2"), 10);
    }

    #[test]
    fn describes_result_columns() {
        assert_eq!(schema_for("SELECT * FROM dashboard").len(), 8);
        assert_eq!(schema_for("SELECT * FROM monthly_report WHERE year = $1 AND month = $2").len(), 13);
        assert_eq!(schema_for("INSERT INTO studios VALUES ($1, $2, $3) RETURNING id").len(), 1);
        assert!(schema_for("DELETE FROM sessions WHERE id = $1").is_empty());
    }

    #[test]
    fn rejection_maps_to_exclusion_violation() {
        let conflict = Conflict::Studio {
            studio_id: Ulid::new(),
            session_id: Ulid::new(),
        };
        let err = committed(Booking::Rejected(conflict)).unwrap_err();
        assert!(matches!(err, PgWireError::UserError(_)));
        assert!(format!("{err:?}").contains("23P01"));
    }
}
