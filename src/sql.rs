use chrono::{NaiveDate, NaiveDateTime};
use sqlparser::ast::{
    self, AssignmentTarget, BinaryOperator, Expr, FromTable, ObjectNamePart, SetExpr, Statement,
    TableFactor, TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::calendar::{parse_date, parse_local_datetime, Calendar};
use crate::model::*;
use crate::report::ReportScope;

const DEFAULT_UPCOMING_HOURS: u32 = 24;

/// A booking time as written by the client: unix ms, or studio-local wall clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum When {
    Unix(Ms),
    Local(NaiveDateTime),
}

impl When {
    pub fn resolve(self, calendar: &Calendar) -> Result<Ms, SqlError> {
        match self {
            When::Unix(ms) => Ok(ms),
            When::Local(local) => calendar
                .to_ms(local)
                .ok_or_else(|| SqlError::Parse(format!("unrepresentable time {local}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    All,
    Id(Ulid),
    Search(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionArgs {
    pub client_id: Ulid,
    pub photographer_id: Ulid,
    pub studio_id: Ulid,
    pub scheduled_at: When,
    pub package: String,
    pub status: Option<SessionStatus>,
    pub notes: Option<String>,
}

impl SessionArgs {
    pub fn into_draft(self, calendar: &Calendar) -> Result<SessionDraft, SqlError> {
        Ok(SessionDraft {
            client_id: self.client_id,
            photographer_id: self.photographer_id,
            studio_id: self.studio_id,
            scheduled_at: self.scheduled_at.resolve(calendar)?,
            package: Package::from(self.package.as_str()),
            status: self.status,
            notes: self.notes,
        })
    }
}

// ── UPDATE patches: `None` keeps the stored value ────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientPatch {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<Option<String>>,
    pub address: Option<Option<String>>,
}

impl ClientPatch {
    pub fn apply(self, fields: &mut ClientFields) {
        if let Some(v) = self.name {
            fields.name = v;
        }
        if let Some(v) = self.phone {
            fields.phone = v;
        }
        if let Some(v) = self.email {
            fields.email = v;
        }
        if let Some(v) = self.address {
            fields.address = v;
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhotographerPatch {
    pub name: Option<String>,
    pub specialty: Option<String>,
    pub phone: Option<String>,
}

impl PhotographerPatch {
    pub fn apply(self, fields: &mut PhotographerFields) {
        if let Some(v) = self.name {
            fields.name = v;
        }
        if let Some(v) = self.specialty {
            fields.specialty = v;
        }
        if let Some(v) = self.phone {
            fields.phone = v;
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StudioPatch {
    pub name: Option<String>,
    pub location: Option<String>,
    pub capacity: Option<u32>,
}

impl StudioPatch {
    pub fn apply(self, fields: &mut StudioFields) {
        if let Some(v) = self.name {
            fields.name = v;
        }
        if let Some(v) = self.location {
            fields.location = v;
        }
        if let Some(v) = self.capacity {
            fields.capacity = v;
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionPatch {
    pub client_id: Option<Ulid>,
    pub photographer_id: Option<Ulid>,
    pub studio_id: Option<Ulid>,
    pub scheduled_at: Option<When>,
    pub package: Option<String>,
    pub status: Option<SessionStatus>,
    pub notes: Option<Option<String>>,
}

impl SessionPatch {
    /// `SET status = ...` and nothing else: a lifecycle move.
    pub fn status_only(&self) -> Option<SessionStatus> {
        let rest = SessionPatch {
            status: None,
            ..self.clone()
        };
        if rest == SessionPatch::default() {
            self.status
        } else {
            None
        }
    }

    /// Pin textual times to the studio calendar, ready to merge.
    pub fn resolve(self, calendar: &Calendar) -> Result<SessionEdit, SqlError> {
        Ok(SessionEdit {
            scheduled_at: self.scheduled_at.map(|w| w.resolve(calendar)).transpose()?,
            client_id: self.client_id,
            photographer_id: self.photographer_id,
            studio_id: self.studio_id,
            package: self.package,
            status: self.status,
            notes: self.notes,
        })
    }
}

/// A [`SessionPatch`] with its time resolved. Merging can no longer fail.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionEdit {
    pub client_id: Option<Ulid>,
    pub photographer_id: Option<Ulid>,
    pub studio_id: Option<Ulid>,
    pub scheduled_at: Option<Ms>,
    pub package: Option<String>,
    pub status: Option<SessionStatus>,
    pub notes: Option<Option<String>>,
}

impl SessionEdit {
    pub fn apply(self, draft: &mut SessionDraft) {
        if let Some(v) = self.client_id {
            draft.client_id = v;
        }
        if let Some(v) = self.photographer_id {
            draft.photographer_id = v;
        }
        if let Some(v) = self.studio_id {
            draft.studio_id = v;
        }
        if let Some(v) = self.scheduled_at {
            draft.scheduled_at = v;
        }
        if let Some(v) = self.package {
            draft.package = Package::from(v.as_str());
        }
        if let Some(v) = self.status {
            draft.status = Some(v);
        }
        if let Some(v) = self.notes {
            draft.notes = v;
        }
    }
}

/// Parsed command from SQL input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    InsertClient {
        fields: ClientFields,
        returning: bool,
    },
    InsertPhotographer {
        fields: PhotographerFields,
        returning: bool,
    },
    InsertStudio {
        fields: StudioFields,
        returning: bool,
    },
    InsertSession {
        args: SessionArgs,
        mode: BookingMode,
        returning: bool,
    },
    UpdateClient {
        id: Ulid,
        patch: ClientPatch,
    },
    UpdatePhotographer {
        id: Ulid,
        patch: PhotographerPatch,
    },
    UpdateStudio {
        id: Ulid,
        patch: StudioPatch,
    },
    UpdateSession {
        id: Ulid,
        patch: SessionPatch,
        mode: BookingMode,
    },
    Delete {
        kind: EntityKind,
        id: Ulid,
    },
    SelectClients(Lookup),
    SelectPhotographers(Lookup),
    SelectStudios(Lookup),
    SelectSessions {
        id: Option<Ulid>,
        filter: SessionFilter,
    },
    SelectUpcoming {
        hours: u32,
    },
    SelectDashboard,
    SelectMonthlyReport {
        year: i32,
        month: u32,
    },
    SelectPeriodReport {
        start: NaiveDate,
        end: NaiveDate,
    },
    SelectConflicts {
        photographer_id: Ulid,
        studio_id: Ulid,
        scheduled_at: When,
        exclude: Option<Ulid>,
    },
    SelectReportDocument(ReportScope),
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(stmt) = stmts.first() else {
        return Err(SqlError::Empty);
    };

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(table, assignments, selection),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// What a statement returns, worked out without binding its parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shape {
    /// Rows shaped like the named table or view.
    Rows(String),
    /// A single `id` column.
    ReturningId,
    NoRows,
}

pub fn describe(sql: &str) -> Shape {
    let dialect = PostgreSqlDialect {};
    let Ok(stmts) = Parser::parse_sql(&dialect, sql) else {
        return Shape::NoRows;
    };
    match stmts.first() {
        Some(Statement::Insert(insert)) if insert.returning.is_some() => Shape::ReturningId,
        Some(Statement::Query(query)) => match query.body.as_ref() {
            SetExpr::Select(select) => select
                .from
                .first()
                .and_then(|from| table_factor_name(&from.relation).ok())
                .map_or(Shape::NoRows, Shape::Rows),
            _ => Shape::NoRows,
        },
        _ => Shape::NoRows,
    }
}

// ── INSERT ──────────────────────────────────────────────────────

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;
    let returning = insert.returning.is_some();
    let arg = |i: usize| values.get(i);

    match table.as_str() {
        "clients" => {
            arity("clients", &values, 2)?;
            let fields = ClientFields {
                name: parse_text(&values[0])?,
                phone: parse_text(&values[1])?,
                email: arg(2).map(parse_text_or_null).transpose()?.flatten(),
                address: arg(3).map(parse_text_or_null).transpose()?.flatten(),
            };
            Ok(Command::InsertClient { fields, returning })
        }
        "photographers" => {
            arity("photographers", &values, 3)?;
            let fields = PhotographerFields {
                name: parse_text(&values[0])?,
                specialty: parse_text(&values[1])?,
                phone: parse_text(&values[2])?,
            };
            Ok(Command::InsertPhotographer { fields, returning })
        }
        "studios" => {
            arity("studios", &values, 3)?;
            let fields = StudioFields {
                name: parse_text(&values[0])?,
                location: parse_text(&values[1])?,
                capacity: parse_u32(&values[2])?,
            };
            Ok(Command::InsertStudio { fields, returning })
        }
        "sessions" => {
            arity("sessions", &values, 5)?;
            let args = SessionArgs {
                client_id: parse_ulid(&values[0])?,
                photographer_id: parse_ulid(&values[1])?,
                studio_id: parse_ulid(&values[2])?,
                scheduled_at: parse_when(&values[3])?,
                package: parse_text(&values[4])?,
                status: arg(5).map(parse_status_or_null).transpose()?.flatten(),
                notes: arg(6).map(parse_text_or_null).transpose()?.flatten(),
            };
            let force = arg(7).map(parse_bool).transpose()?.unwrap_or(false);
            Ok(Command::InsertSession {
                args,
                mode: booking_mode(force),
                returning,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn arity(table: &'static str, values: &[Expr], min: usize) -> Result<(), SqlError> {
    if values.len() < min {
        return Err(SqlError::WrongArity(table, min, values.len()));
    }
    Ok(())
}

fn booking_mode(force: bool) -> BookingMode {
    if force {
        BookingMode::Force
    } else {
        BookingMode::Strict
    }
}

// ── UPDATE ──────────────────────────────────────────────────────

fn parse_update(
    table: &ast::TableWithJoins,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(&table.relation)?;
    let id = extract_where_id(selection)?;
    let mut set = Vec::with_capacity(assignments.len());
    for assignment in assignments {
        let column = match &assignment.target {
            AssignmentTarget::ColumnName(name) => object_name_last(name)
                .ok_or_else(|| SqlError::Parse("empty column name".into()))?,
            AssignmentTarget::Tuple(_) => {
                return Err(SqlError::Unsupported("tuple assignment".into()));
            }
        };
        set.push((column, &assignment.value));
    }
    if set.is_empty() {
        return Err(SqlError::Parse("UPDATE without SET".into()));
    }

    match table.as_str() {
        "clients" => {
            let mut patch = ClientPatch::default();
            for (column, value) in set {
                match column.as_str() {
                    "name" => patch.name = Some(parse_text(value)?),
                    "phone" => patch.phone = Some(parse_text(value)?),
                    "email" => patch.email = Some(parse_text_or_null(value)?),
                    "address" => patch.address = Some(parse_text_or_null(value)?),
                    _ => return Err(SqlError::UnknownColumn(column)),
                }
            }
            Ok(Command::UpdateClient { id, patch })
        }
        "photographers" => {
            let mut patch = PhotographerPatch::default();
            for (column, value) in set {
                match column.as_str() {
                    "name" => patch.name = Some(parse_text(value)?),
                    "specialty" => patch.specialty = Some(parse_text(value)?),
                    "phone" => patch.phone = Some(parse_text(value)?),
                    _ => return Err(SqlError::UnknownColumn(column)),
                }
            }
            Ok(Command::UpdatePhotographer { id, patch })
        }
        "studios" => {
            let mut patch = StudioPatch::default();
            for (column, value) in set {
                match column.as_str() {
                    "name" => patch.name = Some(parse_text(value)?),
                    "location" => patch.location = Some(parse_text(value)?),
                    "capacity" => patch.capacity = Some(parse_u32(value)?),
                    _ => return Err(SqlError::UnknownColumn(column)),
                }
            }
            Ok(Command::UpdateStudio { id, patch })
        }
        "sessions" => {
            let mut patch = SessionPatch::default();
            let mut force = false;
            for (column, value) in set {
                match column.as_str() {
                    "client_id" => patch.client_id = Some(parse_ulid(value)?),
                    "photographer_id" => patch.photographer_id = Some(parse_ulid(value)?),
                    "studio_id" => patch.studio_id = Some(parse_ulid(value)?),
                    "scheduled_at" => patch.scheduled_at = Some(parse_when(value)?),
                    "package" => patch.package = Some(parse_text(value)?),
                    "status" => patch.status = Some(parse_status(value)?),
                    "notes" => patch.notes = Some(parse_text_or_null(value)?),
                    "force" => force = parse_bool(value)?,
                    _ => return Err(SqlError::UnknownColumn(column)),
                }
            }
            Ok(Command::UpdateSession {
                id,
                patch,
                mode: booking_mode(force),
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── DELETE ──────────────────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;
    let kind = match table.as_str() {
        "clients" => EntityKind::Client,
        "photographers" => EntityKind::Photographer,
        "studios" => EntityKind::Studio,
        "sessions" => EntityKind::Session,
        _ => return Err(SqlError::UnknownTable(table)),
    };
    Ok(Command::Delete { kind, id })
}

// ── SELECT ──────────────────────────────────────────────────────

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };
    let Some(from) = select.from.first() else {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    };
    let table = table_factor_name(&from.relation)?;

    let mut filters = Vec::new();
    if let Some(selection) = &select.selection {
        collect_filters(selection, &mut filters)?;
    }
    let filters = Filters(filters);

    match table.as_str() {
        "clients" => Ok(Command::SelectClients(filters.lookup()?)),
        "photographers" => Ok(Command::SelectPhotographers(filters.lookup()?)),
        "studios" => Ok(Command::SelectStudios(filters.lookup()?)),
        "sessions" => {
            filters.only(&["id", "status", "search"])?;
            Ok(Command::SelectSessions {
                id: filters.eq("id").map(parse_ulid).transpose()?,
                filter: SessionFilter {
                    status: filters.eq("status").map(parse_status).transpose()?,
                    text: filters.eq("search").map(parse_text).transpose()?,
                },
            })
        }
        "upcoming_sessions" => {
            filters.only(&["hours"])?;
            let hours = filters.eq("hours").map(parse_u32).transpose()?;
            Ok(Command::SelectUpcoming {
                hours: hours.unwrap_or(DEFAULT_UPCOMING_HOURS),
            })
        }
        "dashboard" => {
            filters.only(&[])?;
            Ok(Command::SelectDashboard)
        }
        "monthly_report" => {
            let (year, month) = filters.year_month()?;
            Ok(Command::SelectMonthlyReport { year, month })
        }
        "period_report" => {
            let (start, end) = filters.date_range()?;
            Ok(Command::SelectPeriodReport { start, end })
        }
        "report_documents" => {
            let scope = if filters.eq("year").is_some() {
                let (year, month) = filters.year_month()?;
                ReportScope::Month { year, month }
            } else {
                let (start, end) = filters.date_range()?;
                ReportScope::Period { start, end }
            };
            Ok(Command::SelectReportDocument(scope))
        }
        "conflicts" => {
            filters.only(&["photographer_id", "studio_id", "scheduled_at", "exclude_id"])?;
            Ok(Command::SelectConflicts {
                photographer_id: parse_ulid(filters.required("photographer_id")?)?,
                studio_id: parse_ulid(filters.required("studio_id")?)?,
                scheduled_at: parse_when(filters.required("scheduled_at")?)?,
                exclude: filters.eq("exclude_id").map(parse_exclusion).transpose()?.flatten(),
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// One `column <op> value` conjunct of a WHERE clause.
struct Filter<'a> {
    column: String,
    op: BinaryOperator,
    value: &'a Expr,
}

fn collect_filters<'a>(expr: &'a Expr, out: &mut Vec<Filter<'a>>) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_filters(inner, out),
        Expr::BinaryOp {
            left,
            op: BinaryOperator::And,
            right,
        } => {
            collect_filters(left, out)?;
            collect_filters(right, out)
        }
        Expr::BinaryOp { left, op, right }
            if matches!(
                op,
                BinaryOperator::Eq | BinaryOperator::GtEq | BinaryOperator::LtEq
            ) =>
        {
            let column = expr_column_name(left)
                .ok_or_else(|| SqlError::Unsupported(format!("filter on {left}")))?;
            out.push(Filter {
                column,
                op: op.clone(),
                value: right,
            });
            Ok(())
        }
        other => Err(SqlError::Unsupported(format!("filter {other}"))),
    }
}

struct Filters<'a>(Vec<Filter<'a>>);

impl<'a> Filters<'a> {
    fn find(&self, column: &str, op: BinaryOperator) -> Option<&'a Expr> {
        self.0
            .iter()
            .find(|f| f.column == column && f.op == op)
            .map(|f| f.value)
    }

    fn eq(&self, column: &str) -> Option<&'a Expr> {
        self.find(column, BinaryOperator::Eq)
    }

    fn required(&self, column: &'static str) -> Result<&'a Expr, SqlError> {
        self.eq(column).ok_or(SqlError::MissingFilter(column))
    }

    fn only(&self, allowed: &[&str]) -> Result<(), SqlError> {
        match self.0.iter().find(|f| !allowed.contains(&f.column.as_str())) {
            Some(f) => Err(SqlError::UnknownColumn(f.column.clone())),
            None => Ok(()),
        }
    }

    fn lookup(&self) -> Result<Lookup, SqlError> {
        self.only(&["id", "search"])?;
        if let Some(id) = self.eq("id") {
            return Ok(Lookup::Id(parse_ulid(id)?));
        }
        match self.eq("search") {
            Some(term) => Ok(Lookup::Search(parse_text(term)?)),
            None => Ok(Lookup::All),
        }
    }

    fn year_month(&self) -> Result<(i32, u32), SqlError> {
        self.only(&["year", "month"])?;
        let year = parse_i64(self.required("year")?)?;
        let year = i32::try_from(year).map_err(|_| SqlError::Parse(format!("bad year {year}")))?;
        Ok((year, parse_u32(self.required("month")?)?))
    }

    /// `date >= 'a' AND date <= 'b'`, or `start_date = 'a' AND end_date = 'b'`.
    fn date_range(&self) -> Result<(NaiveDate, NaiveDate), SqlError> {
        self.only(&["date", "start_date", "end_date"])?;
        let start = self
            .find("date", BinaryOperator::GtEq)
            .or_else(|| self.eq("start_date"))
            .ok_or(SqlError::MissingFilter("date >="))?;
        let end = self
            .find("date", BinaryOperator::LtEq)
            .or_else(|| self.eq("end_date"))
            .ok_or(SqlError::MissingFilter("date <="))?;
        Ok((parse_date_expr(start)?, parse_date_expr(end)?))
    }
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    match tables_with_joins.first() {
        Some(first) => table_factor_name(&first.relation),
        None => Err(SqlError::Parse("DELETE without table".into())),
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [row] => Ok(row.clone()),
            [] => Err(SqlError::Parse("empty VALUES".into())),
            _ => Err(SqlError::Unsupported("multi-row INSERT".into())),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: BinaryOperator::Eq,
            right,
        } if expr_column_name(left).as_deref() == Some("id") => parse_ulid(right),
        _ => Err(SqlError::MissingFilter("id")),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn is_null(expr: &Expr) -> bool {
    matches!(extract_value(expr), Some(Value::Null))
}

fn parse_text(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) | Some(Value::Number(s, _)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected text, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_text_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    if is_null(expr) {
        return Ok(None);
    }
    parse_text(expr).map(Some)
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = parse_text(expr)?;
    Ulid::from_string(s.trim()).map_err(|e| SqlError::Parse(format!("bad ULID {s:?}: {e}")))
}

/// NULL, blank and zero all mean "exclude nothing".
fn parse_exclusion(expr: &Expr) -> Result<Option<Ulid>, SqlError> {
    if is_null(expr) {
        return Ok(None);
    }
    match parse_text(expr)?.trim() {
        "" | "0" => Ok(None),
        _ => parse_ulid(expr).map(Some),
    }
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        return Ok(-parse_i64(expr)?);
    }
    let s = parse_text(expr)?;
    s.trim()
        .parse()
        .map_err(|e| SqlError::Parse(format!("bad integer {s:?}: {e}")))
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of range")))
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    match extract_value(expr) {
        Some(Value::Boolean(b)) => Ok(*b),
        Some(Value::Null) => Ok(false),
        Some(Value::SingleQuotedString(s)) => match s.to_lowercase().as_str() {
            "true" | "t" | "1" | "yes" => Ok(true),
            "false" | "f" | "0" | "no" => Ok(false),
            _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
        },
        Some(Value::Number(n, _)) => Ok(n != "0"),
        Some(value) => Err(SqlError::Parse(format!("expected bool, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_status(expr: &Expr) -> Result<SessionStatus, SqlError> {
    let s = parse_text(expr)?;
    SessionStatus::parse(&s).ok_or_else(|| SqlError::Parse(format!("unknown status {s:?}")))
}

fn parse_status_or_null(expr: &Expr) -> Result<Option<SessionStatus>, SqlError> {
    if is_null(expr) {
        return Ok(None);
    }
    parse_status(expr).map(Some)
}

/// Integer literal or numeric string: unix ms. Anything else: local wall clock.
fn parse_when(expr: &Expr) -> Result<When, SqlError> {
    if let Ok(ms) = parse_i64(expr) {
        return Ok(When::Unix(ms));
    }
    let s = parse_text(expr)?;
    parse_local_datetime(&s)
        .map(When::Local)
        .ok_or_else(|| SqlError::Parse(format!("bad timestamp {s:?} (want ms or YYYY-MM-DD HH:MM)")))
}

fn parse_date_expr(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_text(expr)?;
    parse_date(&s).ok_or_else(|| SqlError::Parse(format!("bad date {s:?} (want YYYY-MM-DD)")))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(String),
    WrongArity(&'static str, usize, usize),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownColumn(c) => write!(f, "unknown column: {c}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected at least {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";

    fn id() -> Ulid {
        Ulid::from_string(ID).unwrap()
    }

    #[test]
    fn insert_client_optional_columns() {
        let cmd = parse_sql("INSERT INTO clients VALUES ('Ayu', '0811', NULL, 'Jl. Mawar 3')").unwrap();
        assert_eq!(
            cmd,
            Command::InsertClient {
                fields: ClientFields {
                    name: "Ayu".into(),
                    phone: "0811".into(),
                    email: None,
                    address: Some("Jl. Mawar 3".into()),
                },
                returning: false,
            }
        );
    }

    #[test]
    fn insert_studio_returning() {
        let cmd = parse_sql("INSERT INTO studios VALUES ('Room A', 'Floor 1', 6) RETURNING id").unwrap();
        match cmd {
            Command::InsertStudio { fields, returning } => {
                assert_eq!(fields.capacity, 6);
                assert!(returning);
            }
            _ => panic!("expected InsertStudio, got {cmd:?}"),
        }
    }

    #[test]
    fn insert_session_with_local_time() {
        let sql = format!(
            "INSERT INTO sessions VALUES ('{ID}', '{ID}', '{ID}', '2025-06-01 10:00', 'wedding')"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertSession { args, mode, returning } => {
                assert_eq!(args.client_id, id());
                assert_eq!(
                    args.scheduled_at,
                    When::Local(parse_local_datetime("2025-06-01 10:00").unwrap())
                );
                assert_eq!(args.status, None);
                assert_eq!(mode, BookingMode::Strict);
                assert!(!returning);
                let draft = args.into_draft(&Calendar::utc()).unwrap();
                assert_eq!(draft.scheduled_at, 1_748_772_000_000);
                assert_eq!(draft.package, Package::Wedding);
            }
            other => panic!("expected InsertSession, got {other:?}"),
        }
    }

    #[test]
    fn insert_session_forced_with_status_and_notes() {
        let sql = format!(
            "INSERT INTO sessions VALUES ('{ID}', '{ID}', '{ID}', 1748772000000, 'Family', 'completed', 'bring props', true)"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertSession { args, mode, .. } => {
                assert_eq!(args.scheduled_at, When::Unix(1_748_772_000_000));
                assert_eq!(args.status, Some(SessionStatus::Completed));
                assert_eq!(args.notes.as_deref(), Some("bring props"));
                assert_eq!(mode, BookingMode::Force);
            }
            other => panic!("expected InsertSession, got {other:?}"),
        }
    }

    #[test]
    fn insert_session_too_few_values() {
        let sql = format!("INSERT INTO sessions VALUES ('{ID}', '{ID}')");
        assert!(matches!(
            parse_sql(&sql),
            Err(SqlError::WrongArity("sessions", 5, 2))
        ));
    }

    #[test]
    fn update_session_status_only() {
        let sql = format!("UPDATE sessions SET status = 'Cancelled' WHERE id = '{ID}'");
        match parse_sql(&sql).unwrap() {
            Command::UpdateSession { id: got, patch, mode } => {
                assert_eq!(got, id());
                assert_eq!(patch.status_only(), Some(SessionStatus::Cancelled));
                assert_eq!(mode, BookingMode::Strict);
            }
            other => panic!("expected UpdateSession, got {other:?}"),
        }
    }

    #[test]
    fn update_session_reschedule() {
        let sql = format!(
            "UPDATE sessions SET scheduled_at = '2025-06-01 13:00', notes = NULL, force = true WHERE id = '{ID}'"
        );
        match parse_sql(&sql).unwrap() {
            Command::UpdateSession { patch, mode, .. } => {
                assert_eq!(patch.status_only(), None);
                assert_eq!(patch.notes, Some(None));
                assert_eq!(mode, BookingMode::Force);
            }
            other => panic!("expected UpdateSession, got {other:?}"),
        }
    }

    #[test]
    fn update_studio_patch_applies() {
        let sql = format!("UPDATE studios SET capacity = 12 WHERE id = '{ID}'");
        let Command::UpdateStudio { patch, .. } = parse_sql(&sql).unwrap() else {
            panic!("expected UpdateStudio");
        };
        let mut fields = StudioFields {
            name: "Room A".into(),
            location: "Floor 1".into(),
            capacity: 4,
        };
        patch.apply(&mut fields);
        assert_eq!(fields.capacity, 12);
        assert_eq!(fields.name, "Room A");
    }

    #[test]
    fn update_unknown_column() {
        let sql = format!("UPDATE clients SET shoe_size = 42 WHERE id = '{ID}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownColumn(_))));
    }

    #[test]
    fn delete_by_kind() {
        let sql = format!("DELETE FROM photographers WHERE id = '{ID}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::Delete {
                kind: EntityKind::Photographer,
                id: id(),
            }
        );
        assert!(matches!(
            parse_sql("DELETE FROM studios"),
            Err(SqlError::MissingFilter("id"))
        ));
    }

    #[test]
    fn select_entities() {
        assert_eq!(
            parse_sql("SELECT * FROM clients").unwrap(),
            Command::SelectClients(Lookup::All)
        );
        assert_eq!(
            parse_sql("SELECT * FROM studios WHERE search = 'loft'").unwrap(),
            Command::SelectStudios(Lookup::Search("loft".into()))
        );
        let sql = format!("SELECT * FROM photographers WHERE id = '{ID}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectPhotographers(Lookup::Id(id()))
        );
    }

    #[test]
    fn select_sessions_filtered() {
        let cmd = parse_sql("SELECT * FROM sessions WHERE status = 'booked' AND search = 'ayu'").unwrap();
        assert_eq!(
            cmd,
            Command::SelectSessions {
                id: None,
                filter: SessionFilter {
                    status: Some(SessionStatus::Booked),
                    text: Some("ayu".into()),
                },
            }
        );
    }

    #[test]
    fn select_upcoming_defaults_to_a_day() {
        assert_eq!(
            parse_sql("SELECT * FROM upcoming_sessions").unwrap(),
            Command::SelectUpcoming { hours: 24 }
        );
        assert_eq!(
            parse_sql("SELECT * FROM upcoming_sessions WHERE hours = 72").unwrap(),
            Command::SelectUpcoming { hours: 72 }
        );
    }

    #[test]
    fn select_reports() {
        assert_eq!(
            parse_sql("SELECT * FROM monthly_report WHERE year = 2025 AND month = 6").unwrap(),
            Command::SelectMonthlyReport { year: 2025, month: 6 }
        );
        let cmd = parse_sql(
            "SELECT * FROM period_report WHERE date >= '2025-06-01' AND date <= '2025-06-30'",
        )
        .unwrap();
        assert_eq!(
            cmd,
            Command::SelectPeriodReport {
                start: NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
                end: NaiveDate::from_ymd_opt(2025, 6, 30).unwrap(),
            }
        );
        assert!(matches!(
            parse_sql("SELECT * FROM monthly_report WHERE year = 2025"),
            Err(SqlError::MissingFilter("month"))
        ));
        assert_eq!(
            parse_sql("SELECT * FROM report_documents WHERE year = 2025 AND month = 6").unwrap(),
            Command::SelectReportDocument(ReportScope::Month { year: 2025, month: 6 })
        );
    }

    #[test]
    fn select_conflicts() {
        let sql = format!(
            "SELECT * FROM conflicts WHERE photographer_id = '{ID}' AND studio_id = '{ID}' AND scheduled_at = '2025-06-01 10:30'"
        );
        match parse_sql(&sql).unwrap() {
            Command::SelectConflicts { exclude, scheduled_at, .. } => {
                assert_eq!(exclude, None);
                assert!(matches!(scheduled_at, When::Local(_)));
            }
            other => panic!("expected SelectConflicts, got {other:?}"),
        }
    }

    #[test]
    fn blank_or_zero_exclusion_is_none() {
        for blank in ["''", "'  '", "0", "NULL"] {
            let sql = format!(
                "SELECT * FROM conflicts WHERE photographer_id = '{ID}' AND studio_id = '{ID}' AND scheduled_at = 1748772000000 AND exclude_id = {blank}"
            );
            match parse_sql(&sql).unwrap() {
                Command::SelectConflicts { exclude, .. } => assert_eq!(exclude, None, "{blank}"),
                other => panic!("expected SelectConflicts, got {other:?}"),
            }
        }
        let sql = format!(
            "SELECT * FROM conflicts WHERE photographer_id = '{ID}' AND studio_id = '{ID}' AND scheduled_at = 1748772000000 AND exclude_id = '{ID}'"
        );
        let Command::SelectConflicts { exclude, .. } = parse_sql(&sql).unwrap() else {
            panic!("expected SelectConflicts");
        };
        assert_eq!(exclude, Some(id()));
    }

    #[test]
    fn session_patch_resolves_local_time() {
        let sql = format!(
            "UPDATE sessions SET scheduled_at = '2025-06-01 13:00', package = 'family' WHERE id = '{ID}'"
        );
        let Command::UpdateSession { patch, .. } = parse_sql(&sql).unwrap() else {
            panic!("expected UpdateSession");
        };
        let calendar = Calendar::with_offset_minutes(7 * 60).unwrap();
        let edit = patch.resolve(&calendar).unwrap();
        // 13:00 in UTC+7 is 06:00 UTC.
        assert_eq!(edit.scheduled_at, Some(1_748_757_600_000));

        let mut draft = SessionDraft {
            client_id: id(),
            photographer_id: id(),
            studio_id: id(),
            scheduled_at: 0,
            package: Package::Wedding,
            status: Some(SessionStatus::Booked),
            notes: Some("keep".into()),
        };
        edit.apply(&mut draft);
        assert_eq!(draft.package, Package::Family);
        assert_eq!(draft.notes.as_deref(), Some("keep"));
        assert_eq!(draft.scheduled_at, 1_748_757_600_000);
    }

    #[test]
    fn describe_with_placeholders() {
        assert_eq!(
            describe("SELECT * FROM sessions WHERE id = $1"),
            Shape::Rows("sessions".into())
        );
        assert_eq!(
            describe("INSERT INTO clients VALUES ($1, $2) RETURNING id"),
            Shape::ReturningId
        );
        assert_eq!(describe("DELETE FROM clients WHERE id = $1"), Shape::NoRows);
    }

    #[test]
    fn errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
        assert!(matches!(
            parse_sql("SELECT * FROM invoices"),
            Err(SqlError::UnknownTable(_))
        ));
        assert!(matches!(
            parse_sql("SELECT * FROM dashboard WHERE x = 1"),
            Err(SqlError::UnknownColumn(_))
        ));
        assert!(parse_sql("INSERT INTO clients VALUES ('Ayu', '0811'), ('Bo', '0812')").is_err());
    }
}
