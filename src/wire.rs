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
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::access::{self, Principal};
use crate::auth::HotelierAuthSource;
use crate::engine::{retry_transient, Engine, EngineError};
use crate::model::*;
use crate::observability::{command_label, AUTH_FAILURES_TOTAL, QUERIES_TOTAL, QUERY_DURATION_SECONDS};
use crate::sql::{self, Command, ResultShape};
use crate::tenant::PropertyManager;

pub struct HotelierHandler {
    properties: Arc<PropertyManager>,
    staff_users: Vec<String>,
    query_parser: Arc<HotelierQueryParser>,
}

impl HotelierHandler {
    pub fn new(properties: Arc<PropertyManager>, staff_users: Vec<String>) -> Self {
        Self {
            properties,
            staff_users,
            query_parser: Arc::new(HotelierQueryParser),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.properties.get_or_create(&db).map_err(|e| {
            metrics::counter!(AUTH_FAILURES_TOTAL).increment(1);
            user_error("08006", format!("property error: {e}"))
        })
    }

    async fn run<C: ClientInfo>(
        &self,
        client: &C,
        cmds: Vec<Command>,
        format: Option<&Format>,
    ) -> PgWireResult<Vec<Response>> {
        let engine = self.resolve_engine(client)?;
        let login = client.metadata().get("user").cloned();

        let mut responses = Vec::with_capacity(cmds.len());
        for cmd in cmds {
            let label = command_label(&cmd);
            let started = Instant::now();
            // Resolved per statement: a batch may register the guest first.
            let who = Principal::resolve(&engine, login.as_deref(), &self.staff_users);
            let result = match access::authorize(&engine, &who, cmd).await {
                Ok(cmd) => self.execute_command(&engine, who.role, cmd, format).await,
                Err(e) => Err(engine_err(e)),
            };
            metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
                .record(started.elapsed().as_secs_f64());
            let status = if result.is_ok() { "ok" } else { "error" };
            metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status)
                .increment(1);
            responses.push(result?);
        }
        Ok(responses)
    }

    async fn execute_command(
        &self,
        engine: &Engine,
        role: ActorRole,
        cmd: Command,
        format: Option<&Format>,
    ) -> PgWireResult<Response> {
        let attempts = self.properties.settings().retry_attempts;

        match cmd {
            Command::InsertUser { id, name } => {
                retry_transient(attempts, || engine.register_user(id, name.clone()))
                    .await
                    .map_err(engine_err)?;
                Ok(tag("INSERT", 1))
            }
            Command::InsertRoomType { room_type } => {
                retry_transient(attempts, || engine.create_room_type(room_type.clone()))
                    .await
                    .map_err(engine_err)?;
                Ok(tag("INSERT", 1))
            }
            Command::UpdateRoomType { id, patch } => {
                retry_transient(attempts, || engine.update_room_type(id, patch.clone()))
                    .await
                    .map_err(engine_err)?;
                Ok(tag("UPDATE", 1))
            }
            Command::InsertRoom {
                id,
                room_type_id,
                number,
                active,
            } => {
                retry_transient(attempts, || {
                    engine.create_room(id, room_type_id, number.clone(), active)
                })
                .await
                .map_err(engine_err)?;
                Ok(tag("INSERT", 1))
            }
            Command::SetRoomActive { id, active } => {
                retry_transient(attempts, || engine.set_room_active(id, active))
                    .await
                    .map_err(engine_err)?;
                Ok(tag("UPDATE", 1))
            }
            Command::DeleteRoom { id } => {
                retry_transient(attempts, || engine.delete_room(id))
                    .await
                    .map_err(engine_err)?;
                Ok(tag("DELETE", 1))
            }
            Command::InsertBooking {
                id,
                user_id,
                request,
                returning,
            } => {
                let admission = retry_transient(attempts, || {
                    engine.create_booking(id, user_id, request.clone())
                })
                .await
                .map_err(engine_err)?;
                if returning {
                    let schema = Arc::new(schema_for(ResultShape::Admission, format));
                    Ok(query_rows(schema, &[admission], encode_admission))
                } else {
                    Ok(tag("INSERT", 1))
                }
            }
            Command::AssignRoom { id, room_id } => {
                retry_transient(attempts, || engine.assign_room(id, room_id))
                    .await
                    .map_err(engine_err)?;
                Ok(tag("UPDATE", 1))
            }
            Command::SetBookingStatus { id, status } => {
                retry_transient(attempts, || engine.change_status(id, status, role))
                    .await
                    .map_err(engine_err)?;
                Ok(tag("UPDATE", 1))
            }
            Command::UpdateBooking { id, patch } => {
                retry_transient(attempts, || engine.update_booking(id, patch.clone()))
                    .await
                    .map_err(engine_err)?;
                Ok(tag("UPDATE", 1))
            }
            Command::DeleteBooking { id } => {
                retry_transient(attempts, || engine.delete_booking(id))
                    .await
                    .map_err(engine_err)?;
                Ok(tag("DELETE", 1))
            }
            Command::InsertReview {
                booking_id,
                rating,
                comment,
            } => {
                retry_transient(attempts, || {
                    engine.submit_review(booking_id, rating, comment.clone())
                })
                .await
                .map_err(engine_err)?;
                Ok(tag("INSERT", 1))
            }
            Command::InsertRoomImage { image } => {
                retry_transient(attempts, || engine.add_room_image(image.clone()))
                    .await
                    .map_err(engine_err)?;
                Ok(tag("INSERT", 1))
            }
            Command::SetThumbnail { id } => {
                retry_transient(attempts, || engine.set_thumbnail(id))
                    .await
                    .map_err(engine_err)?;
                Ok(tag("UPDATE", 1))
            }
            Command::SelectAvailability {
                room_type_id,
                check_in,
                check_out,
                exclude_booking_id,
            } => {
                let availability = retry_transient(attempts, || {
                    engine.check_availability(room_type_id, check_in, check_out, exclude_booking_id)
                })
                .await
                .map_err(engine_err)?;
                let schema = Arc::new(schema_for(ResultShape::Availability, format));
                let span = availability.span;
                Ok(query_rows(schema, &availability.rooms, |enc, room| {
                    enc.encode_field(&room.id.to_string())?;
                    enc.encode_field(&room.number)?;
                    enc.encode_field(&room.room_type_id.to_string())?;
                    enc.encode_field(&span.start.to_string())?;
                    enc.encode_field(&span.end.to_string())
                }))
            }
            Command::SelectBookings { filter } => {
                let bookings = retry_transient(attempts, || engine.list_bookings(&filter))
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(schema_for(ResultShape::Bookings, format));
                Ok(query_rows(schema, &bookings, encode_booking))
            }
            Command::SelectBookingDetail { id } => {
                let detail = retry_transient(attempts, || engine.booking_detail(id, role))
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(schema_for(ResultShape::BookingDetail, format));
                Ok(query_rows(schema, &[detail], |enc, d| {
                    encode_booking(enc, &d.booking)?;
                    enc.encode_field(&d.can_cancel)?;
                    enc.encode_field(&d.can_review)?;
                    enc.encode_field(&d.days_until_check_in)
                }))
            }
            Command::SelectRooms { room_type_id } => {
                let rooms = retry_transient(attempts, || engine.list_rooms(room_type_id))
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(schema_for(ResultShape::Rooms, format));
                Ok(query_rows(schema, &rooms, |enc, room| {
                    enc.encode_field(&room.id.to_string())?;
                    enc.encode_field(&room.room_type_id.to_string())?;
                    enc.encode_field(&room.number)?;
                    enc.encode_field(&room.active)
                }))
            }
            Command::SelectRoomTypes => {
                let schema = Arc::new(schema_for(ResultShape::RoomTypes, format));
                Ok(query_rows(schema, &engine.list_room_types(), |enc, rt| {
                    enc.encode_field(&rt.id.to_string())?;
                    enc.encode_field(&rt.name)?;
                    enc.encode_field(&to_i64(rt.price))?;
                    enc.encode_field(&i64::from(rt.max_adults))?;
                    enc.encode_field(&i64::from(rt.max_children))?;
                    enc.encode_field(&i64::from(rt.quantity))
                }))
            }
            Command::SelectRoomImages { room_type_id } => {
                let schema = Arc::new(schema_for(ResultShape::RoomImages, format));
                Ok(query_rows(schema, &engine.list_images(room_type_id), |enc, img| {
                    enc.encode_field(&img.id.to_string())?;
                    enc.encode_field(&img.room_type_id.to_string())?;
                    enc.encode_field(&img.path)?;
                    enc.encode_field(&img.is_thumbnail)
                }))
            }
        }
    }
}

// ── Result rows ──────────────────────────────────────────────────

fn tag(command: &str, rows: usize) -> Response {
    Response::Execution(Tag::new(command).with_rows(rows))
}

fn to_i64(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

fn query_rows<T>(
    schema: Arc<Vec<FieldInfo>>,
    items: &[T],
    encode: impl Fn(&mut DataRowEncoder, &T) -> PgWireResult<()>,
) -> Response {
    let rows: Vec<PgWireResult<_>> = items
        .iter()
        .map(|item| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode(&mut encoder, item)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

fn encode_booking(enc: &mut DataRowEncoder, b: &Booking) -> PgWireResult<()> {
    enc.encode_field(&b.id.to_string())?;
    enc.encode_field(&b.user_id.to_string())?;
    enc.encode_field(&b.room_type_id.to_string())?;
    enc.encode_field(&b.room_id.map(|r| r.to_string()))?;
    enc.encode_field(&b.status.to_string())?;
    enc.encode_field(&b.span.start.to_string())?;
    enc.encode_field(&b.span.end.to_string())?;
    enc.encode_field(&b.nights())?;
    enc.encode_field(&i64::from(b.adults))?;
    enc.encode_field(&i64::from(b.children))?;
    enc.encode_field(&b.phone)?;
    enc.encode_field(&to_i64(b.total_price))?;
    enc.encode_field(&b.is_paid)?;
    enc.encode_field(&b.is_reviewed)
}

fn encode_admission(enc: &mut DataRowEncoder, a: &Admission) -> PgWireResult<()> {
    enc.encode_field(&a.booking.id.to_string())?;
    enc.encode_field(&a.booking.status.to_string())?;
    enc.encode_field(&to_i64(a.booking.total_price))?;
    enc.encode_field(&a.nights)?;
    enc.encode_field(&i64::try_from(a.available_rooms).unwrap_or(i64::MAX))
}

fn booking_columns() -> Vec<(&'static str, Type)> {
    vec![
        ("id", Type::VARCHAR),
        ("user_id", Type::VARCHAR),
        ("room_type_id", Type::VARCHAR),
        ("room_id", Type::VARCHAR),
        ("status", Type::VARCHAR),
        ("check_in", Type::VARCHAR),
        ("check_out", Type::VARCHAR),
        ("nights", Type::INT8),
        ("adults", Type::INT8),
        ("children", Type::INT8),
        ("phone", Type::VARCHAR),
        ("total_price", Type::INT8),
        ("is_paid", Type::BOOL),
        ("is_reviewed", Type::BOOL),
    ]
}

/// Column layout for each row shape. `format` carries the client's requested
/// result formats on the extended protocol; text otherwise.
fn schema_for(shape: ResultShape, format: Option<&Format>) -> Vec<FieldInfo> {
    let columns = match shape {
        ResultShape::Availability => vec![
            ("room_id", Type::VARCHAR),
            ("number", Type::VARCHAR),
            ("room_type_id", Type::VARCHAR),
            ("check_in", Type::VARCHAR),
            ("check_out", Type::VARCHAR),
        ],
        ResultShape::Bookings => booking_columns(),
        ResultShape::BookingDetail => {
            let mut columns = booking_columns();
            columns.extend([
                ("can_cancel", Type::BOOL),
                ("can_review", Type::BOOL),
                ("days_until_check_in", Type::INT8),
            ]);
            columns
        }
        ResultShape::Rooms => vec![
            ("id", Type::VARCHAR),
            ("room_type_id", Type::VARCHAR),
            ("number", Type::VARCHAR),
            ("active", Type::BOOL),
        ],
        ResultShape::RoomTypes => vec![
            ("id", Type::VARCHAR),
            ("name", Type::VARCHAR),
            ("price", Type::INT8),
            ("max_adults", Type::INT8),
            ("max_children", Type::INT8),
            ("quantity", Type::INT8),
        ],
        ResultShape::RoomImages => vec![
            ("id", Type::VARCHAR),
            ("room_type_id", Type::VARCHAR),
            ("path", Type::VARCHAR),
            ("is_thumbnail", Type::BOOL),
        ],
        ResultShape::Admission => vec![
            ("id", Type::VARCHAR),
            ("status", Type::VARCHAR),
            ("total_price", Type::INT8),
            ("nights", Type::INT8),
            ("available_rooms", Type::INT8),
        ],
    };
    columns
        .into_iter()
        .enumerate()
        .map(|(idx, (name, ty))| {
            let field_format = format.map_or(FieldFormat::Text, |f| f.format_for(idx));
            FieldInfo::new(name.into(), None, None, ty, field_format)
        })
        .collect()
}

fn describe_schema(sql: &str, format: Option<&Format>) -> Vec<FieldInfo> {
    sql::describe(sql)
        .map(|shape| schema_for(shape, format))
        .unwrap_or_default()
}

#[async_trait]
impl SimpleQueryHandler for HotelierHandler {
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
        let cmds = sql::parse_batch(query).map_err(sql_err)?;
        self.run(client, cmds, None).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct HotelierQueryParser;

#[async_trait]
impl QueryParser for HotelierQueryParser {
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
        Ok(describe_schema(stmt, column_format))
    }
}

#[async_trait]
impl ExtendedQueryHandler for HotelierHandler {
    type Statement = String;
    type QueryParser = HotelierQueryParser;

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
        let cmds = sql::parse_batch(&sql).map_err(sql_err)?;
        if cmds.len() > 1 {
            return Err(user_error(
                "42601",
                "cannot insert multiple commands into a prepared statement".into(),
            ));
        }
        let responses = self
            .run(client, cmds, Some(&portal.result_column_format))
            .await?;
        responses
            .into_iter()
            .next()
            .ok_or_else(|| user_error("42601", "empty query".into()))
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
            describe_schema(&target.statement, None),
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
        Ok(DescribePortalResponse::new(describe_schema(
            &target.statement.statement,
            Some(&target.result_column_format),
        )))
    }
}

/// Count the highest $N parameter placeholder in the SQL string.
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

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    let params: Vec<Option<String>> = portal
        .parameters
        .iter()
        .map(|p| p.as_ref().map(|bytes| String::from_utf8_lossy(bytes).into_owned()))
        .collect();
    bind_params(&portal.statement.statement, &params)
}

/// Replace placeholders highest first so `$1` never eats the prefix of `$10`.
fn bind_params(sql: &str, params: &[Option<String>]) -> String {
    let mut result = sql.to_string();
    for (i, param) in params.iter().enumerate().rev() {
        let placeholder = format!("${}", i + 1);
        let value = match param {
            Some(text) => format!("'{}'", text.replace('\'', "''")),
            None => "NULL".to_string(),
        };
        result = result.replace(&placeholder, &value);
    }
    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct HotelierFactory {
    handler: Arc<HotelierHandler>,
    auth_handler: Arc<
        CleartextPasswordAuthStartupHandler<HotelierAuthSource, DefaultServerParameterProvider>,
    >,
    noop: Arc<NoopHandler>,
}

impl HotelierFactory {
    pub fn new(
        properties: Arc<PropertyManager>,
        password: String,
        staff_users: Vec<String>,
    ) -> Self {
        let auth_source = HotelierAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(HotelierHandler::new(properties, staff_users)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for HotelierFactory {
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
    factory: Arc<HotelierFactory>,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    pgwire::tokio::process_socket(socket, tls, factory).await
}

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        message,
    )))
}

fn engine_err(e: EngineError) -> PgWireError {
    tracing::debug!("request refused: {e}");
    user_error(e.sqlstate(), e.to_string())
}

fn sql_err(e: sql::SqlError) -> PgWireError {
    user_error("42601", e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_highest_placeholder() {
        assert_eq!(count_params("SELECT * FROM rooms"), 0);
        assert_eq!(
            count_params("UPDATE bookings SET status = $2 WHERE id = $1"),
            2
        );
        assert_eq!(count_params("SELECT $10, $3"), 10);
        assert_eq!(count_params("SELECT '$'"), 0);
    }

    #[test]
    fn binds_quoted_params_highest_first() {
        let sql = "SELECT * FROM bookings WHERE id = $1 AND user_id = $10";
        let mut params: Vec<Option<String>> = vec![None; 10];
        params[0] = Some("a".into());
        params[9] = Some("o'brien".into());
        assert_eq!(
            bind_params(sql, &params),
            "SELECT * FROM bookings WHERE id = 'a' AND user_id = 'o''brien'"
        );
        assert_eq!(
            bind_params("UPDATE bookings SET room_id = $1 WHERE id = $2", &[None, Some("x".into())]),
            "UPDATE bookings SET room_id = NULL WHERE id = 'x'"
        );
    }

    #[test]
    fn schemas_follow_statement_shape() {
        let names = |sql: &str| -> Vec<String> {
            describe_schema(sql, None)
                .iter()
                .map(|f| f.name().to_string())
                .collect()
        };
        assert_eq!(
            names("SELECT * FROM rooms WHERE room_type_id = $1"),
            ["id", "room_type_id", "number", "active"]
        );
        assert_eq!(names("SELECT * FROM bookings").len(), 14);
        assert!(names("UPDATE bookings SET status = $1 WHERE id = $2").is_empty());
        assert_eq!(
            names("INSERT INTO bookings VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING *")[4],
            "available_rooms"
        );
    }
}
