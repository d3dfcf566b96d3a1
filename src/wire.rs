use std::fmt::Debug;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::NaiveTime;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{AuthSource, DefaultServerParameterProvider, LoginInfo, Password, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldInfo, QueryResponse,
    Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use tracing::debug;
use ulid::Ulid;

use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command, SqlError};
use crate::tenant::TenantManager;

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    tenant_manager: Arc<TenantManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = Arc::new(MaitreFactory::new(tenant_manager, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Auth ─────────────────────────────────────────────────────────

/// One shared password for every user and database.
#[derive(Debug)]
pub struct MaitreAuthSource {
    password: String,
}

impl MaitreAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for MaitreAuthSource {
    async fn get_password(&self, _login: &LoginInfo) -> PgWireResult<Password> {
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}

// ── Result sets ──────────────────────────────────────────────────

/// Shape of the rows a statement returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResultSet {
    Restaurants,
    AvailableSlots,
    Tables,
    Bookings,
    Waitlist,
    BookingOutcome,
    WalkIn,
    Promotion,
}

impl ResultSet {
    fn columns(self) -> Vec<(&'static str, Type)> {
        match self {
            ResultSet::Restaurants => vec![
                ("id", Type::VARCHAR),
                ("name", Type::VARCHAR),
                ("slug", Type::VARCHAR),
                ("slot_duration_minutes", Type::INT8),
            ],
            ResultSet::AvailableSlots => vec![("time", Type::VARCHAR), ("available", Type::BOOL)],
            ResultSet::Tables => vec![
                ("id", Type::VARCHAR),
                ("table_number", Type::INT8),
                ("capacity", Type::INT8),
                ("status", Type::VARCHAR),
            ],
            ResultSet::Bookings => vec![
                ("id", Type::VARCHAR),
                ("table_id", Type::VARCHAR),
                ("date", Type::VARCHAR),
                ("time", Type::VARCHAR),
                ("party_size", Type::INT8),
                ("status", Type::VARCHAR),
                ("customer", Type::VARCHAR),
                ("notes", Type::VARCHAR),
                ("is_walk_in", Type::BOOL),
                ("assignment_method", Type::VARCHAR),
                ("was_on_waitlist", Type::BOOL),
            ],
            ResultSet::Waitlist => vec![
                ("id", Type::VARCHAR),
                ("date", Type::VARCHAR),
                ("time", Type::VARCHAR),
                ("party_size", Type::INT8),
                ("status", Type::VARCHAR),
                ("priority_order", Type::INT8),
                ("customer", Type::VARCHAR),
                ("booking_id", Type::VARCHAR),
            ],
            ResultSet::BookingOutcome => vec![
                ("outcome", Type::VARCHAR),
                ("id", Type::VARCHAR),
                ("table_id", Type::VARCHAR),
                ("priority_order", Type::INT8),
            ],
            ResultSet::WalkIn => vec![
                ("id", Type::VARCHAR),
                ("table_id", Type::VARCHAR),
                ("date", Type::VARCHAR),
                ("time", Type::VARCHAR),
                ("party_size", Type::INT8),
            ],
            ResultSet::Promotion => vec![
                ("outcome", Type::VARCHAR),
                ("booking_id", Type::VARCHAR),
                ("table_id", Type::VARCHAR),
            ],
        }
    }

    fn schema(self, format: &Format) -> Vec<FieldInfo> {
        self.columns()
            .into_iter()
            .enumerate()
            .map(|(idx, (name, ty))| FieldInfo::new(name.into(), None, None, ty, format.format_for(idx)))
            .collect()
    }

    /// Rows a not-yet-bound statement will produce, judged from its verb and
    /// target table. Placeholders keep the text from parsing as SQL values.
    fn for_statement(sql: &str) -> Option<Self> {
        let lower = sql.to_lowercase();
        let words: Vec<&str> = lower
            .split(|c: char| c.is_whitespace() || matches!(c, '(' | ')' | ',' | ';'))
            .filter(|w| !w.is_empty())
            .collect();
        let target = words
            .windows(2)
            .find(|w| w[0] == "from" || w[0] == "into")
            .map(|w| w[1].trim_matches('"'))?;
        match (*words.first()?, target) {
            ("select", "restaurants") => Some(ResultSet::Restaurants),
            ("select", "available_slots") => Some(ResultSet::AvailableSlots),
            ("select", "tables" | "candidate_tables") => Some(ResultSet::Tables),
            ("select", "bookings") => Some(ResultSet::Bookings),
            ("select", "waitlist") => Some(ResultSet::Waitlist),
            ("insert", "bookings") => Some(ResultSet::BookingOutcome),
            ("insert", "walk_ins") => Some(ResultSet::WalkIn),
            ("insert", "waitlist_promotions") => Some(ResultSet::Promotion),
            _ => None,
        }
    }
}

fn rows_response<T>(
    set: ResultSet,
    format: &Format,
    items: impl IntoIterator<Item = T>,
    encode: impl Fn(&mut DataRowEncoder, T) -> PgWireResult<()>,
) -> Response {
    let schema = Arc::new(set.schema(format));
    let rows: Vec<PgWireResult<_>> = items
        .into_iter()
        .map(|item| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode(&mut encoder, item)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

fn fmt_time(t: NaiveTime) -> String {
    t.format("%H:%M").to_string()
}

fn encode_table(encoder: &mut DataRowEncoder, table: Table) -> PgWireResult<()> {
    encoder.encode_field(&table.id.to_string())?;
    encoder.encode_field(&i64::from(table.table_number))?;
    encoder.encode_field(&i64::from(table.capacity))?;
    encoder.encode_field(&table.status.to_string())
}

fn encode_booking(encoder: &mut DataRowEncoder, b: Booking) -> PgWireResult<()> {
    encoder.encode_field(&b.id.to_string())?;
    encoder.encode_field(&b.table_id.map(|t| t.to_string()))?;
    encoder.encode_field(&b.date.to_string())?;
    encoder.encode_field(&fmt_time(b.time))?;
    encoder.encode_field(&i64::from(b.party_size))?;
    encoder.encode_field(&b.status.to_string())?;
    encoder.encode_field(&b.customer)?;
    encoder.encode_field(&b.notes)?;
    encoder.encode_field(&b.is_walk_in)?;
    encoder.encode_field(&b.assignment_method.to_string())?;
    encoder.encode_field(&b.was_on_waitlist)
}

fn encode_entry(encoder: &mut DataRowEncoder, e: WaitlistEntry) -> PgWireResult<()> {
    encoder.encode_field(&e.id.to_string())?;
    encoder.encode_field(&e.date.to_string())?;
    encoder.encode_field(&fmt_time(e.time))?;
    encoder.encode_field(&i64::from(e.party_size))?;
    encoder.encode_field(&e.status.to_string())?;
    encoder.encode_field(&i64::from(e.priority_order))?;
    encoder.encode_field(&e.customer)?;
    encoder.encode_field(&e.booking_id.map(|b| b.to_string()))
}

/// One `(outcome, id, table_id, priority_order)` row.
struct OutcomeRow {
    outcome: &'static str,
    id: Ulid,
    table_id: Option<Ulid>,
    priority_order: Option<u32>,
}

impl OutcomeRow {
    fn from_request(id: Ulid, outcome: RequestOutcome) -> Self {
        match outcome {
            RequestOutcome::Confirmed { booking_id, table_id } => OutcomeRow {
                outcome: "confirmed",
                id: booking_id,
                table_id: Some(table_id),
                priority_order: None,
            },
            RequestOutcome::Waitlisted {
                entry_id,
                priority_order,
            } => OutcomeRow {
                outcome: "waitlisted",
                id: entry_id,
                table_id: None,
                priority_order: Some(priority_order),
            },
            RequestOutcome::Closed => OutcomeRow {
                outcome: "closed",
                id,
                table_id: None,
                priority_order: None,
            },
        }
    }
}

// ── Handler ──────────────────────────────────────────────────────

pub struct MaitreHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<MaitreQueryParser>,
}

impl MaitreHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(MaitreQueryParser),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.tenant_manager.get_or_create(&db).map_err(|e| {
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "ERROR".into(),
                "08006".into(),
                format!("tenant error: {e}"),
            )))
        })
    }

    /// Parse, run and record metrics for one statement.
    async fn run(&self, engine: &Engine, sql_text: &str, format: &Format) -> PgWireResult<Response> {
        let cmd = sql::parse_sql(sql_text).map_err(sql_err)?;
        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(engine, cmd, format).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        debug!(command = label, status, "query executed");
        result
    }

    async fn execute_command(&self, engine: &Engine, cmd: Command, format: &Format) -> PgWireResult<Response> {
        match cmd {
            Command::InsertRestaurant {
                id,
                name,
                slug,
                slot_duration_minutes,
            } => {
                engine
                    .create_restaurant(id, name, slug, slot_duration_minutes)
                    .await
                    .map_err(engine_err)?;
                Ok(inserted())
            }
            Command::InsertOperatingHours { restaurant_id, hours } => {
                engine
                    .set_weekly_hours(restaurant_id, hours)
                    .await
                    .map_err(engine_err)?;
                Ok(inserted())
            }
            Command::InsertDateOverride {
                restaurant_id,
                date,
                hours,
            } => {
                engine
                    .set_date_override(restaurant_id, date, hours)
                    .await
                    .map_err(engine_err)?;
                Ok(inserted())
            }
            Command::DeleteDateOverride { restaurant_id, date } => {
                engine
                    .remove_date_override(restaurant_id, date)
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::InsertTable {
                id,
                restaurant_id,
                table_number,
                capacity,
            } => {
                engine
                    .add_table(id, restaurant_id, table_number, capacity)
                    .await
                    .map_err(engine_err)?;
                Ok(inserted())
            }
            Command::InsertBooking {
                id,
                restaurant_id,
                date,
                time,
                party_size,
                customer,
                notes,
                pending,
            } => {
                let row = if pending {
                    let booking = engine
                        .create_pending_booking(id, restaurant_id, date, time, party_size, customer, notes)
                        .await
                        .map_err(engine_err)?;
                    OutcomeRow {
                        outcome: "pending",
                        id: booking.id,
                        table_id: None,
                        priority_order: None,
                    }
                } else {
                    let outcome = engine
                        .request_booking(id, restaurant_id, date, time, party_size, customer, notes)
                        .await
                        .map_err(engine_err)?;
                    OutcomeRow::from_request(id, outcome)
                };
                Ok(rows_response(ResultSet::BookingOutcome, format, [row], |enc, row| {
                    enc.encode_field(&row.outcome.to_string())?;
                    enc.encode_field(&row.id.to_string())?;
                    enc.encode_field(&row.table_id.map(|t| t.to_string()))?;
                    enc.encode_field(&row.priority_order.map(i64::from))
                }))
            }
            Command::InsertBookingTransition { booking_id, status } => {
                engine
                    .update_booking_status(booking_id, status)
                    .await
                    .map_err(engine_err)?;
                Ok(inserted())
            }
            Command::InsertTableAssignment { booking_id, table_id } => {
                engine
                    .assign_table_manually(booking_id, table_id)
                    .await
                    .map_err(engine_err)?;
                Ok(inserted())
            }
            Command::InsertWaitlistPromotion { entry_id } => {
                let promotion = engine
                    .promote_waitlist_entry(entry_id)
                    .await
                    .map_err(engine_err)?;
                let (outcome, booking_id, table_id) = match promotion {
                    Promotion::Promoted { booking_id, table_id } => ("promoted", Some(booking_id), Some(table_id)),
                    Promotion::AlreadyPromoted { booking_id } => ("already_promoted", Some(booking_id), None),
                    Promotion::StillWaiting => ("waiting", None, None),
                };
                Ok(rows_response(ResultSet::Promotion, format, [()], |enc, ()| {
                    enc.encode_field(&outcome.to_string())?;
                    enc.encode_field(&booking_id.map(|b| b.to_string()))?;
                    enc.encode_field(&table_id.map(|t| t.to_string()))
                }))
            }
            Command::DeleteWaitlistEntry { id } => {
                engine.cancel_waitlist_entry(id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::InsertWalkIn { table_id, party_size } => {
                let at = chrono::Local::now().naive_local();
                let booking = engine
                    .mark_table_occupied(Ulid::new(), table_id, party_size, at)
                    .await
                    .map_err(engine_err)?;
                Ok(rows_response(ResultSet::WalkIn, format, [booking], |enc, b| {
                    enc.encode_field(&b.id.to_string())?;
                    enc.encode_field(&b.table_id.map(|t| t.to_string()))?;
                    enc.encode_field(&b.date.to_string())?;
                    enc.encode_field(&fmt_time(b.time))?;
                    enc.encode_field(&i64::from(b.party_size))
                }))
            }
            Command::InsertTableRelease { table_id } => {
                engine.mark_table_available(table_id).await.map_err(engine_err)?;
                Ok(inserted())
            }
            Command::InsertTableMaintenance { table_id, enabled } => {
                engine
                    .set_table_maintenance(table_id, enabled)
                    .await
                    .map_err(engine_err)?;
                Ok(inserted())
            }
            Command::SelectRestaurants => {
                let restaurants = engine.list_restaurants().await;
                Ok(rows_response(ResultSet::Restaurants, format, restaurants, |enc, r| {
                    enc.encode_field(&r.id.to_string())?;
                    enc.encode_field(&r.name)?;
                    enc.encode_field(&r.slug)?;
                    enc.encode_field(&i64::from(r.slot_duration_minutes))
                }))
            }
            Command::SelectAvailableSlots {
                restaurant_id,
                date,
                party_size,
            } => {
                let slots = engine
                    .get_available_slots(restaurant_id, date, party_size)
                    .await
                    .map_err(engine_err)?;
                Ok(rows_response(ResultSet::AvailableSlots, format, slots, |enc, slot| {
                    enc.encode_field(&fmt_time(slot.time))?;
                    enc.encode_field(&slot.available)
                }))
            }
            Command::SelectCandidateTables {
                restaurant_id,
                date,
                time,
                party_size,
            } => {
                let tables = engine
                    .find_candidate_tables(restaurant_id, date, time, party_size)
                    .await
                    .map_err(engine_err)?;
                Ok(rows_response(ResultSet::Tables, format, tables, encode_table))
            }
            Command::SelectTables { restaurant_id } => {
                let tables = engine.list_tables(restaurant_id).await.map_err(engine_err)?;
                Ok(rows_response(ResultSet::Tables, format, tables, encode_table))
            }
            Command::SelectBookings { restaurant_id, date } => {
                let bookings = engine
                    .list_bookings(restaurant_id, date)
                    .await
                    .map_err(engine_err)?;
                Ok(rows_response(ResultSet::Bookings, format, bookings, encode_booking))
            }
            Command::SelectWaitlist { restaurant_id, date } => {
                let entries = engine
                    .list_waitlist(restaurant_id, date)
                    .await
                    .map_err(engine_err)?;
                Ok(rows_response(ResultSet::Waitlist, format, entries, encode_entry))
            }
        }
    }
}

fn inserted() -> Response {
    Response::Execution(Tag::new("INSERT").with_rows(1))
}

#[async_trait]
impl SimpleQueryHandler for MaitreHandler {
    async fn do_query<C>(
        &self,
        client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let response = self.run(&engine, query, &Format::UnifiedText).await?;
        Ok(vec![response])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct MaitreQueryParser;

#[async_trait]
impl QueryParser for MaitreQueryParser {
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
        column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        let format = column_format.unwrap_or(&Format::UnifiedText);
        Ok(ResultSet::for_statement(stmt).map_or_else(Vec::new, |set| set.schema(format)))
    }
}

#[async_trait]
impl ExtendedQueryHandler for MaitreHandler {
    type Statement = String;
    type QueryParser = MaitreQueryParser;

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
        let engine = self.resolve_engine(client)?;
        let sql_text = substitute_params(portal);
        self.run(&engine, &sql_text, &portal.result_column_format).await
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
        let fields = ResultSet::for_statement(&target.statement)
            .map_or_else(Vec::new, |set| set.schema(&Format::UnifiedText));
        Ok(DescribeStatementResponse::new(param_types, fields))
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
        let fields = ResultSet::for_statement(&target.statement.statement)
            .map_or_else(Vec::new, |set| set.schema(&target.result_column_format));
        Ok(DescribePortalResponse::new(fields))
    }
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let mut max = 0usize;
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            i += 1;
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i > start
                && let Ok(n) = sql[start..i].parse::<usize>()
            {
                max = max.max(n);
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
/// Highest index first, so `$1` never clobbers the prefix of `$10`.
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

pub struct MaitreFactory {
    handler: Arc<MaitreHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<MaitreAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl MaitreFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        let auth_source = MaitreAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(MaitreHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for MaitreFactory {
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

// ── Errors ───────────────────────────────────────────────────────

/// Engine failures surface as `P0001`; lock contention as `40001` so
/// drivers treat it like any other retryable serialization failure.
fn sqlstate(e: &EngineError) -> &'static str {
    if e.is_transient() { "40001" } else { "P0001" }
}

fn engine_err(e: EngineError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        sqlstate(&e).into(),
        e.to_string(),
    )))
}

fn sql_err(e: SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}
