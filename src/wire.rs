use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::Sink;
use futures::stream;
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
use pgwire::messages::PgWireBackendMessage;
use pgwire::messages::data::DataRow;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::auth::RideSlotAuthSource;
use crate::day::DateLike;
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability::{QUERIES_TOTAL, QUERY_DURATION_SECONDS, command_label};
use crate::sql::{self, Command, ResultShape, SqlError};
use crate::tenant::TenantManager;

pub struct RideSlotHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<RideSlotQueryParser>,
}

impl RideSlotHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(RideSlotQueryParser),
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
                format!("ledger error: {e}"),
            )))
        })
    }

    async fn run(&self, engine: &Engine, sql_text: &str) -> PgWireResult<Response> {
        let cmd = sql::parse_sql(sql_text).map_err(sql_err)?;
        let label = command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(engine, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(&self, engine: &Engine, cmd: Command) -> PgWireResult<Response> {
        match cmd {
            Command::InsertBooking { date, slot, request } => {
                let date = date.parse::<DateLike>().map_err(|e| engine_err(e.into()))?;
                let booking = engine.attempt_book(date, slot, request).await.map_err(engine_err)?;
                booking_response(vec![booking])
            }
            Command::SelectBookingsByDay { date } => {
                let day = engine.parse_day(&date).map_err(engine_err)?;
                booking_response(engine.list_by_day(day).await)
            }
            Command::SelectBooking { number } => match engine.get_booking(&number).await {
                Ok(booking) => booking_response(vec![booking]),
                Err(EngineError::NotFound(_)) => booking_response(Vec::new()),
                Err(e) => Err(engine_err(e)),
            },
            Command::SelectRecentBookings { limit } => {
                booking_response(engine.list_recent(limit).await.map_err(engine_err)?)
            }
            Command::SelectAvailability { date } => {
                let day = engine.parse_day(&date).map_err(engine_err)?;
                availability_response(vec![engine.get_or_default(day).await])
            }
            Command::SelectCalendar { start, end } => {
                let start = engine.parse_day(&start).map_err(engine_err)?;
                let end = engine.parse_day(&end).map_err(engine_err)?;
                availability_response(engine.calendar(start, end).await.map_err(engine_err)?)
            }
            Command::InsertAvailability {
                date,
                morning_open,
                evening_open,
                max_per_slot,
            } => {
                let day = engine.parse_day(&date).map_err(engine_err)?;
                let record = AvailabilityRecord {
                    morning_open,
                    evening_open,
                    max_per_slot: max_per_slot.unwrap_or(engine.settings().default_max_per_slot),
                };
                let view = engine.create_availability(day, record).await.map_err(engine_err)?;
                availability_response(vec![view])
            }
            Command::InitializeRange {
                start,
                end,
                morning_open,
                evening_open,
                max_per_slot,
            } => {
                let start = engine.parse_day(&start).map_err(engine_err)?;
                let end = engine.parse_day(&end).map_err(engine_err)?;
                let defaults = AvailabilityRecord {
                    morning_open,
                    evening_open,
                    max_per_slot: max_per_slot.unwrap_or(engine.settings().default_max_per_slot),
                };
                let report = engine.initialize_range(start, end, defaults).await.map_err(engine_err)?;
                range_response(report)
            }
            Command::SetSlot { date, slot, open } => {
                let day = engine.parse_day(&date).map_err(engine_err)?;
                let view = engine
                    .upsert_availability(day, AvailabilityPatch::slot(slot, open))
                    .await
                    .map_err(engine_err)?;
                availability_response(vec![view])
            }
            Command::SetCapacity { date, max_per_slot } => {
                let day = engine.parse_day(&date).map_err(engine_err)?;
                let view = engine
                    .upsert_availability(day, AvailabilityPatch::capacity(max_per_slot))
                    .await
                    .map_err(engine_err)?;
                availability_response(vec![view])
            }
            Command::Transition { number, status } => {
                let booking = engine.transition_booking(&number, status).await.map_err(engine_err)?;
                booking_response(vec![booking])
            }
            Command::RepairDuplicates => {
                repair_response(engine.repair_duplicates().await.map_err(engine_err)?)
            }
            Command::Compact => {
                engine.compact_wal().await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("CALL")))
            }
        }
    }
}

// ── Result sets ──────────────────────────────────────────────────

fn text_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn typed_field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![
        text_field("date"),
        typed_field("morning_available", Type::BOOL),
        typed_field("evening_available", Type::BOOL),
        typed_field("max_bookings", Type::INT4),
        typed_field("current_bookings", Type::INT4),
        typed_field("morning_bookings", Type::INT4),
        typed_field("evening_bookings", Type::INT4),
        text_field("status"),
        text_field("color"),
    ]
}

fn booking_schema() -> Vec<FieldInfo> {
    vec![
        text_field("number"),
        text_field("date"),
        text_field("slot"),
        text_field("name"),
        text_field("phone"),
        text_field("email"),
        text_field("pickup_location"),
        text_field("dropoff_location"),
        text_field("trip_type"),
        typed_field("price", Type::INT8),
        text_field("status"),
        typed_field("created_at", Type::INT8),
    ]
}

fn range_schema() -> Vec<FieldInfo> {
    vec![typed_field("created", Type::INT4), typed_field("skipped", Type::INT4)]
}

fn repair_schema() -> Vec<FieldInfo> {
    vec![
        text_field("date"),
        typed_field("merged", Type::INT4),
        typed_field("morning_available", Type::BOOL),
        typed_field("evening_available", Type::BOOL),
        typed_field("max_bookings", Type::INT4),
    ]
}

fn as_i32<T: TryInto<i32>>(n: T) -> i32 {
    n.try_into().unwrap_or(i32::MAX)
}

fn query_response(schema: Arc<Vec<FieldInfo>>, rows: Vec<PgWireResult<DataRow>>) -> PgWireResult<Response> {
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn availability_response(views: Vec<AvailabilityView>) -> PgWireResult<Response> {
    let schema = Arc::new(availability_schema());
    let rows = views
        .into_iter()
        .map(|view| {
            let status = view.status();
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&view.day.to_string())?;
            encoder.encode_field(&view.record.morning_open)?;
            encoder.encode_field(&view.record.evening_open)?;
            encoder.encode_field(&as_i32(view.record.max_per_slot))?;
            encoder.encode_field(&as_i32(view.current_bookings()))?;
            encoder.encode_field(&as_i32(view.morning_active))?;
            encoder.encode_field(&as_i32(view.evening_active))?;
            encoder.encode_field(&status.as_str().to_string())?;
            encoder.encode_field(&status.color().to_string())?;
            Ok(encoder.take_row())
        })
        .collect();
    query_response(schema, rows)
}

fn booking_response(bookings: Vec<BookingRecord>) -> PgWireResult<Response> {
    let schema = Arc::new(booking_schema());
    let rows = bookings
        .into_iter()
        .map(|b| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&b.number)?;
            encoder.encode_field(&b.day.to_string())?;
            encoder.encode_field(&b.slot.as_str().to_string())?;
            encoder.encode_field(&b.name)?;
            encoder.encode_field(&b.phone)?;
            encoder.encode_field(&b.email)?;
            encoder.encode_field(&b.pickup_location)?;
            encoder.encode_field(&b.dropoff_location)?;
            encoder.encode_field(&b.trip_type.as_str().to_string())?;
            encoder.encode_field(&b.price)?;
            encoder.encode_field(&b.status.as_str().to_string())?;
            encoder.encode_field(&b.created_at)?;
            Ok(encoder.take_row())
        })
        .collect();
    query_response(schema, rows)
}

fn range_response(report: RangeReport) -> PgWireResult<Response> {
    let schema = Arc::new(range_schema());
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&as_i32(report.created))?;
    encoder.encode_field(&as_i32(report.skipped))?;
    query_response(schema, vec![Ok(encoder.take_row())])
}

fn repair_response(reports: Vec<RepairReport>) -> PgWireResult<Response> {
    let schema = Arc::new(repair_schema());
    let rows = reports
        .into_iter()
        .map(|r| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&r.day.to_string())?;
            encoder.encode_field(&as_i32(r.merged))?;
            encoder.encode_field(&r.record.morning_open)?;
            encoder.encode_field(&r.record.evening_open)?;
            encoder.encode_field(&as_i32(r.record.max_per_slot))?;
            Ok(encoder.take_row())
        })
        .collect();
    query_response(schema, rows)
}

/// Result columns a statement will produce. Decided from the parsed
/// statement so it works before parameters are bound.
fn result_schema(sql_text: &str) -> Vec<FieldInfo> {
    match sql::result_shape(sql_text) {
        ResultShape::Bookings => booking_schema(),
        ResultShape::Availability => availability_schema(),
        ResultShape::RangeReport => range_schema(),
        ResultShape::RepairReport => repair_schema(),
        ResultShape::Empty => vec![],
    }
}

#[async_trait]
impl SimpleQueryHandler for RideSlotHandler {
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
        Ok(vec![self.run(&engine, query).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct RideSlotQueryParser;

#[async_trait]
impl QueryParser for RideSlotQueryParser {
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
        Ok(result_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for RideSlotHandler {
    type Statement = String;
    type QueryParser = RideSlotQueryParser;

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
        self.run(&engine, &sql_text).await
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
        Ok(DescribeStatementResponse::new(param_types, result_schema(&target.statement)))
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
        Ok(DescribePortalResponse::new(result_schema(&target.statement.statement)))
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
fn substitute_params(portal: &Portal<String>) -> String {
    bind_params(&portal.statement.statement, &portal.parameters)
}

/// Single left-to-right pass: each `$n` outside a quoted literal becomes its
/// quoted value or NULL. Substituted text is never rescanned. Placeholders
/// past the bound parameters are left as written.
fn bind_params<B: AsRef<[u8]>>(sql: &str, params: &[Option<B>]) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut chars = sql.char_indices().peekable();
    let mut in_literal = false;

    while let Some((_, c)) = chars.next() {
        if in_literal {
            out.push(c);
            if c == '\'' {
                // '' is an escaped quote, not the end of the literal
                if let Some(&(_, '\'')) = chars.peek() {
                    chars.next();
                    out.push('\'');
                } else {
                    in_literal = false;
                }
            }
            continue;
        }
        match c {
            '\'' => {
                in_literal = true;
                out.push(c);
            }
            '$' => {
                let mut digits = String::new();
                while let Some(&(_, d)) = chars.peek() {
                    if !d.is_ascii_digit() {
                        break;
                    }
                    digits.push(d);
                    chars.next();
                }
                let bound = digits
                    .parse::<usize>()
                    .ok()
                    .and_then(|n| n.checked_sub(1))
                    .and_then(|i| params.get(i));
                match bound {
                    Some(Some(bytes)) => {
                        let text = String::from_utf8_lossy(bytes.as_ref());
                        out.push('\'');
                        out.push_str(&text.replace('\'', "''"));
                        out.push('\'');
                    }
                    Some(None) => out.push_str("NULL"),
                    None => {
                        out.push('$');
                        out.push_str(&digits);
                    }
                }
            }
            _ => out.push(c),
        }
    }
    out
}

// ── Factory ──────────────────────────────────────────────────────

pub struct RideSlotFactory {
    handler: Arc<RideSlotHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<RideSlotAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl RideSlotFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        let auth_source = RideSlotAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(RideSlotHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for RideSlotFactory {
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
) -> std::io::Result<()> {
    let factory = RideSlotFactory::new(tenant_manager, password);
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

/// SQLSTATE for each engine error. Rejections get their own class so
/// clients can tell "slot full" from "slot closed" without parsing text.
fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::SlotClosed { .. } => "RS001",
        EngineError::SlotFull { .. } => "RS002",
        EngineError::InvalidDate(_) => "22007",
        EngineError::InvalidInput(_) => "22023",
        EngineError::DuplicateDay(_) | EngineError::Conflict(_) => "23505",
        EngineError::NotFound(_) => "02000",
        EngineError::InvalidTransition { .. } | EngineError::CapacityBelowOccupancy { .. } => "55000",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::Transient(_) => "58030",
    }
}

/// Client-facing text: the application code, then the reason.
fn error_message(e: &EngineError) -> String {
    format!("{}: {e}", e.code())
}

fn engine_err(e: EngineError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        sqlstate(&e).into(),
        error_message(&e),
    )))
}

fn sql_err(e: SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::day::DayKey;

    #[test]
    fn rejections_have_distinct_states() {
        let day = DayKey::ymd(2026, 3, 10);
        let closed = EngineError::SlotClosed { day, slot: Slot::Evening };
        let full = EngineError::SlotFull { day, slot: Slot::Morning, max: 10 };
        assert_eq!(sqlstate(&closed), "RS001");
        assert_eq!(sqlstate(&full), "RS002");
        assert_ne!(sqlstate(&EngineError::InvalidDate("x".into())), sqlstate(&EngineError::InvalidInput("x".into())));
        assert_eq!(sqlstate(&EngineError::Transient("io".into())), "58030");
    }

    #[test]
    fn error_message_carries_code() {
        let day = DayKey::ymd(2026, 3, 10);
        let e = EngineError::SlotClosed { day, slot: Slot::Evening };
        assert_eq!(error_message(&e), "SLOT_CLOSED: evening slot unavailable for 2026-03-10");
        let e = EngineError::SlotFull { day, slot: Slot::Morning, max: 10 };
        assert!(error_message(&e).starts_with("SLOT_FULL: "));
    }

    #[test]
    fn schema_from_statement_text() {
        assert_eq!(result_schema("SELECT * FROM availability WHERE date = $1").len(), 9);
        assert_eq!(result_schema("INSERT INTO bookings (name) VALUES ($1)").len(), 12);
        assert_eq!(result_schema("CALL cancel_booking($1)").len(), 12);
        assert_eq!(result_schema("call set_capacity($1, $2)").len(), 9);
        assert_eq!(result_schema("CALL initialize_range($1, $2)").len(), 2);
        assert_eq!(result_schema("CALL repair_duplicates()").len(), 5);
        assert!(result_schema("CALL compact()").is_empty());
    }

    #[test]
    fn schema_ignores_names_in_selected_columns() {
        assert_eq!(result_schema("SELECT current_bookings FROM availability WHERE date = $1").len(), 9);
        assert_eq!(
            result_schema("SELECT * FROM bookings WHERE pickup_location = 'availability'").len(),
            12
        );
    }

    fn bound(values: &[Option<&str>]) -> Vec<Option<Vec<u8>>> {
        values.iter().map(|v| v.map(|s| s.as_bytes().to_vec())).collect()
    }

    #[test]
    fn bound_values_are_not_rescanned() {
        let params = bound(&[Some("Parking lot $2"), Some("x")]);
        assert_eq!(
            bind_params("CALL f($1, $2)", &params),
            "CALL f('Parking lot $2', 'x')"
        );
    }

    #[test]
    fn placeholders_inside_literals_are_kept() {
        let params = bound(&[Some("Kim")]);
        assert_eq!(
            bind_params("SELECT '$1', 'it''s $1', $1", &params),
            "SELECT '$1', 'it''s $1', 'Kim'"
        );
    }

    #[test]
    fn multi_digit_placeholders_bind_whole() {
        let values: Vec<String> = (1..=10).map(|i| format!("v{i}")).collect();
        let params: Vec<Option<Vec<u8>>> = values.iter().map(|v| Some(v.as_bytes().to_vec())).collect();
        assert_eq!(bind_params("$10 $1", &params), "'v10' 'v1'");
        assert_eq!(bind_params("$11 $", &params), "$11 $");
    }

    #[test]
    fn null_and_quotes_bind_safely() {
        let params = bound(&[None, Some("O'Brien")]);
        assert_eq!(bind_params("VALUES ($1, $2)", &params), "VALUES (NULL, 'O''Brien')");
    }

    #[test]
    fn count_params_finds_highest() {
        assert_eq!(count_params("SELECT * FROM bookings WHERE number = $1"), 1);
        assert_eq!(count_params("CALL initialize_range($2, $10, $1)"), 10);
        assert_eq!(count_params("CALL compact()"), 0);
    }
}
