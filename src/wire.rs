use std::fmt::Debug;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::auth::{session_guest, SlotbookAuthSource, DISPLAY_NAME_KEY};
use crate::engine::{Engine, EngineError, ErrorKind};
use crate::limits::MAX_USER_NAME_LEN;
use crate::model::*;
use crate::observability::{command_label, QUERIES_TOTAL, QUERY_DURATION_SECONDS};
use crate::sql::{self, Command, SqlError};
use crate::tenant::TenantManager;

/// Settings shared by every connection.
#[derive(Debug, Clone)]
pub struct WireConfig {
    /// Shared password checked at startup.
    pub password: String,
    /// The one login allowed to write the listing mirror.
    pub listing_service_user: String,
}

pub struct SlotbookHandler {
    tenant_manager: Arc<TenantManager>,
    config: Arc<WireConfig>,
    query_parser: Arc<SlotbookQueryParser>,
}

impl SlotbookHandler {
    pub fn new(tenant_manager: Arc<TenantManager>, config: Arc<WireConfig>) -> Self {
        Self {
            tenant_manager,
            config,
            query_parser: Arc::new(SlotbookQueryParser),
        }
    }

    fn listing_writer<'a>(&self, user_id: &'a str) -> ListingWriter<'a> {
        if !user_id.is_empty() && user_id == self.config.listing_service_user {
            ListingWriter::Service
        } else {
            ListingWriter::User(user_id)
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

    /// Parse, execute and record one statement. Rows are encoded in
    /// `format`, as requested by the client.
    async fn run_sql<C: ClientInfo>(
        &self,
        client: &mut C,
        query: &str,
        format: &Format,
    ) -> PgWireResult<Response> {
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        let label = command_label(&cmd);
        let started = Instant::now();

        let result = self.execute_command(client, cmd, format).await;

        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command<C: ClientInfo>(
        &self,
        client: &mut C,
        cmd: Command,
        format: &Format,
    ) -> PgWireResult<Response> {
        let engine = self.resolve_engine(client)?;
        let guest = session_guest(client.metadata());

        match cmd {
            Command::SetDisplayName { name } => {
                if name.len() > MAX_USER_NAME_LEN {
                    return Err(engine_err(EngineError::LimitExceeded("display name too long")));
                }
                client.metadata_mut().insert(DISPLAY_NAME_KEY.to_string(), name);
                Ok(Response::Execution(Tag::new("SET")))
            }
            Command::UpsertListing { listing } => {
                let writer = self.listing_writer(&guest.user_id);
                engine.upsert_listing(writer, listing).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::RemoveListing { id } => {
                let writer = self.listing_writer(&guest.user_id);
                engine.remove_listing(writer, &id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::SelectAvailability { listing_id, date } => {
                let availability = engine
                    .get_availability(&listing_id, &date)
                    .await
                    .map_err(engine_err)?;
                availability_response(&availability, format)
            }
            Command::InsertBooking { request } => {
                let reservation = engine
                    .create_reservation(request, guest)
                    .await
                    .map_err(engine_err)?;
                booking_response(&reservation, format)
            }
            Command::SelectRoster {
                listing_id,
                date,
                cursor,
                limit,
            } => {
                let page = engine
                    .list_roster(&guest.user_id, &listing_id, date.as_deref(), limit, cursor.as_deref())
                    .await
                    .map_err(engine_err)?;
                roster_response(&page, format)
            }
            Command::SelectMyBookings => {
                let mine = engine
                    .list_user_reservations(&guest.user_id)
                    .map_err(engine_err)?;
                my_bookings_response(&mine, format)
            }
        }
    }
}

// ── Result encoding ──────────────────────────────────────────────

/// Column name and type, before a wire format is chosen.
type Column = (&'static str, Type);

/// Field descriptions for `columns`, each in the format the client asked
/// for. tokio-postgres, for one, binds every result column as binary.
fn describe(columns: &[Column], format: &Format) -> Vec<FieldInfo> {
    columns
        .iter()
        .enumerate()
        .map(|(i, (name, ty))| {
            FieldInfo::new((*name).into(), None, None, ty.clone(), format.format_for(i))
        })
        .collect()
}

fn availability_columns() -> Vec<Column> {
    vec![
        ("listing_id", Type::VARCHAR),
        ("date", Type::VARCHAR),
        ("slot_capacity", Type::INT8),
        ("slot_start", Type::VARCHAR),
        ("slot_end", Type::VARCHAR),
        ("booked", Type::INT8),
        ("remaining", Type::INT8),
        ("is_full", Type::BOOL),
    ]
}

/// Extra columns appended to reservation rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RowShape {
    Booking,
    /// Every roster row carries the page's `next_cursor`.
    Roster,
    /// The caller's bookings carry the listing's hours, NULL once the
    /// listing is gone from the mirror.
    MyBookings,
}

fn reservation_columns(shape: RowShape) -> Vec<Column> {
    let mut columns = vec![
        ("booking_id", Type::VARCHAR),
        ("listing_id", Type::VARCHAR),
        ("listing_date", Type::VARCHAR),
        ("date", Type::VARCHAR),
        ("slot_start", Type::VARCHAR),
        ("slot_end", Type::VARCHAR),
        ("guest_count", Type::INT8),
        ("user_id", Type::VARCHAR),
        ("user_name", Type::VARCHAR),
        ("status", Type::VARCHAR),
        ("created_at", Type::VARCHAR),
    ];
    match shape {
        RowShape::Booking => {}
        RowShape::Roster => columns.push(("next_cursor", Type::VARCHAR)),
        RowShape::MyBookings => {
            columns.push(("listing_open_time", Type::VARCHAR));
            columns.push(("listing_close_time", Type::VARCHAR));
        }
    }
    columns
}

fn availability_response(availability: &Availability, format: &Format) -> PgWireResult<Response> {
    let schema = Arc::new(describe(&availability_columns(), format));
    let listing_id = &availability.listing_id;
    let date = availability.date.to_string();
    let capacity = i64::from(availability.slot_capacity);

    let rows: Vec<PgWireResult<_>> = availability
        .slots
        .iter()
        .map(|slot| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(listing_id)?;
            encoder.encode_field(&date)?;
            encoder.encode_field(&capacity)?;
            encoder.encode_field(&slot.slot.start.to_string())?;
            encoder.encode_field(&slot.slot.end.to_string())?;
            encoder.encode_field(&i64::from(slot.booked))?;
            encoder.encode_field(&i64::from(slot.remaining))?;
            encoder.encode_field(&slot.is_full)?;
            Ok(encoder.take_row())
        })
        .collect();

    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn encode_reservation(encoder: &mut DataRowEncoder, r: &Reservation) -> PgWireResult<()> {
    encoder.encode_field(&r.booking_id.to_string())?;
    encoder.encode_field(&r.listing_id)?;
    encoder.encode_field(&r.listing_date())?;
    encoder.encode_field(&r.date.to_string())?;
    encoder.encode_field(&r.slot.start.to_string())?;
    encoder.encode_field(&r.slot.end.to_string())?;
    encoder.encode_field(&i64::from(r.guest_count))?;
    encoder.encode_field(&r.user_id)?;
    encoder.encode_field(&r.user_name)?;
    encoder.encode_field(&r.status.as_str().to_string())?;
    encoder.encode_field(&format_ms(r.created_at))
}

fn booking_response(reservation: &Reservation, format: &Format) -> PgWireResult<Response> {
    let schema = Arc::new(describe(&reservation_columns(RowShape::Booking), format));
    let mut encoder = DataRowEncoder::new(schema.clone());
    encode_reservation(&mut encoder, reservation)?;
    let rows = vec![Ok(encoder.take_row())];
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn roster_response(page: &ReservationPage, format: &Format) -> PgWireResult<Response> {
    let schema = Arc::new(describe(&reservation_columns(RowShape::Roster), format));
    let rows: Vec<PgWireResult<_>> = page
        .items
        .iter()
        .map(|r| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode_reservation(&mut encoder, r)?;
            encoder.encode_field(&page.next_cursor)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn my_bookings_response(bookings: &[BookingWithListing], format: &Format) -> PgWireResult<Response> {
    let schema = Arc::new(describe(&reservation_columns(RowShape::MyBookings), format));
    let rows: Vec<PgWireResult<_>> = bookings
        .iter()
        .map(|b| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode_reservation(&mut encoder, &b.reservation)?;
            encoder.encode_field(&b.listing.as_ref().map(|l| l.open_time.clone()))?;
            encoder.encode_field(&b.listing.as_ref().map(|l| l.close_time.clone()))?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

/// Row shape of a statement, from its text alone. Used to describe prepared
/// statements before any parameter is bound.
fn result_schema(sql: &str, format: &Format) -> Vec<FieldInfo> {
    let upper = sql.to_uppercase();
    let head = upper.trim_start();
    let columns = if upper.contains("AVAILABILITY") {
        availability_columns()
    } else if upper.contains("MY_BOOKINGS") {
        reservation_columns(RowShape::MyBookings)
    } else if upper.contains("BOOKINGS") && head.starts_with("SELECT") {
        reservation_columns(RowShape::Roster)
    } else if upper.contains("BOOKINGS") && head.starts_with("INSERT") {
        reservation_columns(RowShape::Booking)
    } else {
        vec![]
    };
    describe(&columns, format)
}

#[async_trait]
impl SimpleQueryHandler for SlotbookHandler {
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
        tracing::debug!("simple query: {query}");
        Ok(vec![self.run_sql(client, query, &Format::UnifiedText).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct SlotbookQueryParser;

#[async_trait]
impl QueryParser for SlotbookQueryParser {
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
        Ok(result_schema(stmt, column_format.unwrap_or(&Format::UnifiedText)))
    }
}

#[async_trait]
impl ExtendedQueryHandler for SlotbookHandler {
    type Statement = String;
    type QueryParser = SlotbookQueryParser;

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
        let sql = substitute_params(&portal.statement.statement, &portal.parameters);
        tracing::debug!("extended query: {sql}");
        self.run_sql(client, &sql, &portal.result_column_format).await
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
        // No portal yet, so no requested format: describe as text.
        Ok(DescribeStatementResponse::new(
            param_types,
            result_schema(&target.statement, &Format::UnifiedText),
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
        Ok(DescribePortalResponse::new(result_schema(
            &target.statement.statement,
            &target.result_column_format,
        )))
    }
}

/// Walk `sql` and hand every `$N` placeholder outside string literals to
/// `on_param`, copying everything else to `out`.
fn scan_placeholders(sql: &str, out: &mut String, mut on_param: impl FnMut(usize, &mut String)) {
    let mut chars = sql.char_indices().peekable();
    let mut in_string = false;
    while let Some((i, c)) = chars.next() {
        if c == '\'' {
            in_string = !in_string;
        }
        if c != '$' || in_string {
            out.push(c);
            continue;
        }
        let start = i + 1;
        let mut end = start;
        while let Some(&(j, d)) = chars.peek() {
            if !d.is_ascii_digit() {
                break;
            }
            end = j + 1;
            chars.next();
        }
        match sql[start..end].parse::<usize>() {
            Ok(n) => on_param(n, out),
            Err(_) => out.push('$'),
        }
    }
}

/// Highest `$N` placeholder in the statement.
fn count_params(sql: &str) -> usize {
    let mut max = 0;
    scan_placeholders(sql, &mut String::new(), |n, _| max = max.max(n));
    max
}

/// Inline bound text-format parameters as SQL literals, so the statement
/// parses exactly as the simple protocol would see it.
fn substitute_params(sql: &str, params: &[Option<Bytes>]) -> String {
    let mut out = String::with_capacity(sql.len());
    scan_placeholders(sql, &mut out, |n, out| {
        match n.checked_sub(1).and_then(|i| params.get(i)) {
            Some(Some(bytes)) => {
                let text = String::from_utf8_lossy(bytes);
                out.push('\'');
                out.push_str(&text.replace('\'', "''"));
                out.push('\'');
            }
            _ => out.push_str("NULL"),
        }
    });
    out
}

// ── Factory ──────────────────────────────────────────────────────

pub struct SlotbookFactory {
    handler: Arc<SlotbookHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<SlotbookAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl SlotbookFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, config: Arc<WireConfig>) -> Self {
        Self {
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                SlotbookAuthSource::new(config.password.clone()),
                DefaultServerParameterProvider::default(),
            )),
            handler: Arc::new(SlotbookHandler::new(tenant_manager, config)),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for SlotbookFactory {
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
    config: Arc<WireConfig>,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = Arc::new(SlotbookFactory::new(tenant_manager, config));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Error mapping ────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        message,
    )))
}

pub fn sqlstate(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::InvalidInput => "22023",
        ErrorKind::NotFound => "P0002",
        ErrorKind::CapacityExceeded => "23P01",
        ErrorKind::DuplicateBooking => "23505",
        ErrorKind::Unauthorized => "28000",
        ErrorKind::Forbidden => "42501",
        ErrorKind::LimitExceeded => "54000",
        ErrorKind::Unavailable => "58030",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    user_error(sqlstate(e.kind()), e.to_string())
}

fn sql_err(e: SqlError) -> PgWireError {
    user_error("42601", e.to_string())
}
