use sqlparser::ast::{
    self, AssignmentTarget, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor,
    TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertUser {
        id: Ulid,
        name: String,
    },
    InsertRoomType {
        room_type: RoomType,
    },
    UpdateRoomType {
        id: Ulid,
        patch: RoomTypePatch,
    },
    InsertRoom {
        id: Ulid,
        room_type_id: Ulid,
        number: String,
        active: bool,
    },
    SetRoomActive {
        id: Ulid,
        active: bool,
    },
    DeleteRoom {
        id: Ulid,
    },
    InsertBooking {
        id: Ulid,
        user_id: Ulid,
        request: StayRequest,
        /// `RETURNING ...` was given: answer with the admission row.
        returning: bool,
    },
    AssignRoom {
        id: Ulid,
        room_id: Option<Ulid>,
    },
    SetBookingStatus {
        id: Ulid,
        status: BookingStatus,
    },
    UpdateBooking {
        id: Ulid,
        patch: BookingPatch,
    },
    DeleteBooking {
        id: Ulid,
    },
    InsertReview {
        booking_id: Ulid,
        rating: u8,
        comment: Option<String>,
    },
    InsertRoomImage {
        image: RoomImage,
    },
    SetThumbnail {
        id: Ulid,
    },
    SelectAvailability {
        room_type_id: Ulid,
        check_in: Day,
        check_out: Day,
        exclude_booking_id: Option<Ulid>,
    },
    SelectBookings {
        filter: BookingFilter,
    },
    SelectBookingDetail {
        id: Ulid,
    },
    SelectRooms {
        room_type_id: Option<Ulid>,
    },
    SelectRoomTypes,
    SelectRoomImages {
        room_type_id: Option<Ulid>,
    },
}

/// Row shape a statement answers with, known before parameters are bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultShape {
    Availability,
    Bookings,
    BookingDetail,
    Rooms,
    RoomTypes,
    RoomImages,
    Admission,
}

impl ResultShape {
    fn for_table(table: &str) -> Option<Self> {
        match table {
            "availability" => Some(ResultShape::Availability),
            "bookings" => Some(ResultShape::Bookings),
            "booking_details" => Some(ResultShape::BookingDetail),
            "rooms" => Some(ResultShape::Rooms),
            "room_types" => Some(ResultShape::RoomTypes),
            "room_images" => Some(ResultShape::RoomImages),
            _ => None,
        }
    }
}

/// Default column order for `INSERT ... VALUES` without a column list.
fn insert_columns(table: &str) -> Option<&'static [&'static str]> {
    Some(match table {
        "users" => &["id", "name"],
        "room_types" => &["id", "name", "price", "max_adults", "max_children", "quantity"],
        "rooms" => &["id", "room_type_id", "number", "active"],
        "bookings" => &[
            "id",
            "user_id",
            "room_type_id",
            "check_in",
            "check_out",
            "adults",
            "children",
            "phone",
        ],
        "reviews" => &["booking_id", "rating", "comment"],
        "room_images" => &["id", "room_type_id", "path", "is_thumbnail"],
        _ => return None,
    })
}

/// Parse a single statement. Trailing statements are ignored.
pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    parse_batch(sql)?.into_iter().next().ok_or(SqlError::Empty)
}

/// Parse every `;`-separated statement, as sent by a simple query.
pub fn parse_batch(sql: &str) -> Result<Vec<Command>, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }
    stmts.iter().map(parse_statement).collect()
}

fn parse_statement(stmt: &Statement) -> Result<Command, SqlError> {
    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(&table.relation, assignments, selection),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// Result shape of `sql` without evaluating any values, so `$n` placeholders are fine.
pub fn describe(sql: &str) -> Option<ResultShape> {
    let stmts = Parser::parse_sql(&PostgreSqlDialect {}, sql).ok()?;
    match stmts.first()? {
        Statement::Query(query) => {
            let SetExpr::Select(select) = query.body.as_ref() else {
                return None;
            };
            let table = table_factor_name(&select.from.first()?.relation).ok()?;
            ResultShape::for_table(&table)
        }
        Statement::Insert(insert) if insert.returning.is_some() => {
            (insert_table_name(insert).ok()? == "bookings").then_some(ResultShape::Admission)
        }
        _ => None,
    }
}

// ── Column views ──────────────────────────────────────────────

/// Column → expression view over one VALUES row, SET list or WHERE conjunction.
struct Fields<'a> {
    pairs: Vec<(String, &'a Expr)>,
}

impl<'a> Fields<'a> {
    fn get(&self, col: &str) -> Option<&'a Expr> {
        self.pairs.iter().find(|(c, _)| c == col).map(|(_, e)| *e)
    }

    fn req(&self, col: &'static str) -> Result<&'a Expr, SqlError> {
        self.get(col).ok_or(SqlError::MissingColumn(col))
    }

    fn opt<T>(
        &self,
        col: &str,
        parse: impl Fn(&Expr) -> Result<T, SqlError>,
    ) -> Result<Option<T>, SqlError> {
        self.get(col).map(parse).transpose()
    }

    fn only(&self, allowed: &[&str]) -> Result<(), SqlError> {
        match self.pairs.iter().find(|(c, _)| !allowed.contains(&c.as_str())) {
            Some((c, _)) => Err(SqlError::UnknownColumn(c.clone())),
            None => Ok(()),
        }
    }

    fn has(&self, col: &str) -> bool {
        self.get(col).is_some()
    }
}

fn insert_fields<'a>(table: &str, insert: &'a ast::Insert) -> Result<Fields<'a>, SqlError> {
    let rows = extract_insert_rows(insert)?;
    if rows.len() != 1 {
        return Err(SqlError::Unsupported(format!(
            "multi-row INSERT into {table}"
        )));
    }
    let row = &rows[0];
    let columns: Vec<String> = if insert.columns.is_empty() {
        let defaults = insert_columns(table).ok_or_else(|| SqlError::UnknownTable(table.into()))?;
        if row.len() > defaults.len() {
            return Err(SqlError::WrongArity(table.to_string(), defaults.len(), row.len()));
        }
        defaults.iter().map(|c| c.to_string()).collect()
    } else {
        insert.columns.iter().map(|i| i.value.to_lowercase()).collect()
    };
    if columns.len() != row.len() {
        return Err(SqlError::WrongArity(table.to_string(), columns.len(), row.len()));
    }
    Ok(Fields {
        pairs: columns.into_iter().zip(row.iter()).collect(),
    })
}

fn where_fields(selection: &Option<Expr>) -> Result<Fields<'_>, SqlError> {
    let mut pairs = Vec::new();
    if let Some(expr) = selection {
        collect_filters(expr, &mut pairs)?;
    }
    Ok(Fields { pairs })
}

/// Flatten an AND chain. `col = v` keys as `col`; range bounds key as `col>=` and `col<=`.
fn collect_filters<'a>(expr: &'a Expr, out: &mut Vec<(String, &'a Expr)>) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_filters(inner, out),
        Expr::BinaryOp { left, op, right } => {
            let suffix = match op {
                ast::BinaryOperator::And => {
                    collect_filters(left, out)?;
                    return collect_filters(right, out);
                }
                ast::BinaryOperator::Eq => "",
                ast::BinaryOperator::GtEq => ">=",
                ast::BinaryOperator::LtEq => "<=",
                other => return Err(SqlError::Unsupported(format!("operator {other} in WHERE"))),
            };
            let col = expr_column_name(left)
                .ok_or_else(|| SqlError::Unsupported(format!("filter on {left}")))?;
            out.push((format!("{col}{suffix}"), right.as_ref()));
            Ok(())
        }
        other => Err(SqlError::Unsupported(format!("WHERE {other}"))),
    }
}

// ── INSERT ────────────────────────────────────────────────────

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let f = insert_fields(&table, insert)?;
    if let Some(cols) = insert_columns(&table) {
        f.only(cols)?;
    }

    match table.as_str() {
        "users" => Ok(Command::InsertUser {
            id: parse_ulid(f.req("id")?)?,
            name: parse_text(f.req("name")?)?,
        }),
        "room_types" => Ok(Command::InsertRoomType {
            room_type: RoomType {
                id: parse_ulid(f.req("id")?)?,
                name: parse_text(f.req("name")?)?,
                price: parse_unsigned(f.req("price")?, "price")?,
                max_adults: parse_unsigned(f.req("max_adults")?, "max_adults")?,
                max_children: f
                    .opt("max_children", |e| parse_unsigned(e, "max_children"))?
                    .unwrap_or(0),
                quantity: f
                    .opt("quantity", |e| parse_unsigned(e, "quantity"))?
                    .unwrap_or(1),
            },
        }),
        "rooms" => Ok(Command::InsertRoom {
            id: parse_ulid(f.req("id")?)?,
            room_type_id: parse_ulid(f.req("room_type_id")?)?,
            number: parse_text(f.req("number")?)?,
            active: f.opt("active", parse_bool)?.unwrap_or(true),
        }),
        "bookings" => Ok(Command::InsertBooking {
            id: parse_ulid(f.req("id")?)?,
            user_id: parse_ulid(f.req("user_id")?)?,
            request: StayRequest {
                room_type_id: parse_ulid(f.req("room_type_id")?)?,
                check_in: parse_date(f.req("check_in")?)?,
                check_out: parse_date(f.req("check_out")?)?,
                adults: parse_unsigned(f.req("adults")?, "adults")?,
                children: f
                    .opt("children", |e| parse_unsigned(e, "children"))?
                    .unwrap_or(0),
                phone: parse_text(f.req("phone")?)?,
            },
            returning: insert.returning.is_some(),
        }),
        "reviews" => Ok(Command::InsertReview {
            booking_id: parse_ulid(f.req("booking_id")?)?,
            rating: parse_unsigned(f.req("rating")?, "rating")?,
            comment: f.opt("comment", parse_text_or_null)?.flatten(),
        }),
        "room_images" => Ok(Command::InsertRoomImage {
            image: RoomImage {
                id: parse_ulid(f.req("id")?)?,
                room_type_id: parse_ulid(f.req("room_type_id")?)?,
                path: parse_text(f.req("path")?)?,
                is_thumbnail: f.opt("is_thumbnail", parse_bool)?.unwrap_or(false),
            },
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── UPDATE ────────────────────────────────────────────────────

fn parse_update(
    relation: &TableFactor,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(relation)?;
    let id = extract_where_id(selection)?;
    let mut pairs = Vec::with_capacity(assignments.len());
    for a in assignments {
        let col = match &a.target {
            AssignmentTarget::ColumnName(name) => object_name_last(name),
            AssignmentTarget::Tuple(_) => None,
        }
        .ok_or_else(|| SqlError::Unsupported("tuple assignment".into()))?;
        pairs.push((col, &a.value));
    }
    let f = Fields { pairs };

    match table.as_str() {
        "room_types" => {
            f.only(&["name", "price", "max_adults", "max_children", "quantity"])?;
            Ok(Command::UpdateRoomType {
                id,
                patch: RoomTypePatch {
                    name: f.opt("name", parse_text)?,
                    price: f.opt("price", |e| parse_unsigned(e, "price"))?,
                    max_adults: f.opt("max_adults", |e| parse_unsigned(e, "max_adults"))?,
                    max_children: f.opt("max_children", |e| parse_unsigned(e, "max_children"))?,
                    quantity: f.opt("quantity", |e| parse_unsigned(e, "quantity"))?,
                },
            })
        }
        "rooms" => {
            f.only(&["active"])?;
            Ok(Command::SetRoomActive {
                id,
                active: parse_bool(f.req("active")?)?,
            })
        }
        "bookings" => parse_booking_update(id, &f),
        "room_images" => {
            f.only(&["is_thumbnail"])?;
            if parse_bool(f.req("is_thumbnail")?)? {
                Ok(Command::SetThumbnail { id })
            } else {
                Err(SqlError::Unsupported(
                    "is_thumbnail can only be set to true; set another image instead".into(),
                ))
            }
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_booking_update(id: Ulid, f: &Fields<'_>) -> Result<Command, SqlError> {
    if f.has("room_id") {
        f.only(&["room_id"])?;
        return Ok(Command::AssignRoom {
            id,
            room_id: parse_ulid_or_null(f.req("room_id")?)?,
        });
    }
    if f.has("status") {
        f.only(&["status"])?;
        return Ok(Command::SetBookingStatus {
            id,
            status: parse_status(f.req("status")?)?,
        });
    }
    f.only(&[
        "check_in",
        "check_out",
        "phone",
        "adults",
        "children",
        "total_price",
        "is_paid",
    ])?;
    Ok(Command::UpdateBooking {
        id,
        patch: BookingPatch {
            check_in: f.opt("check_in", parse_date)?,
            check_out: f.opt("check_out", parse_date)?,
            phone: f.opt("phone", parse_text)?,
            adults: f.opt("adults", |e| parse_unsigned(e, "adults"))?,
            children: f.opt("children", |e| parse_unsigned(e, "children"))?,
            total_price: f.opt("total_price", |e| parse_unsigned(e, "total_price"))?,
            is_paid: f.opt("is_paid", parse_bool)?,
        },
    })
}

// ── DELETE / SELECT ───────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "rooms" => Ok(Command::DeleteRoom { id }),
        "bookings" => Ok(Command::DeleteBooking { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };
    let Some(from) = select.from.first() else {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    };
    let table = table_factor_name(&from.relation)?;
    let f = where_fields(&select.selection)?;

    match table.as_str() {
        "availability" => {
            f.only(&["room_type_id", "check_in", "check_out", "exclude_booking_id"])?;
            Ok(Command::SelectAvailability {
                room_type_id: parse_ulid(
                    f.get("room_type_id")
                        .ok_or(SqlError::MissingFilter("room_type_id"))?,
                )?,
                check_in: parse_date(f.get("check_in").ok_or(SqlError::MissingFilter("check_in"))?)?,
                check_out: parse_date(
                    f.get("check_out").ok_or(SqlError::MissingFilter("check_out"))?,
                )?,
                exclude_booking_id: f.opt("exclude_booking_id", parse_ulid_or_null)?.flatten(),
            })
        }
        "bookings" => {
            f.only(&[
                "id",
                "user_id",
                "room_id",
                "room_type_id",
                "status",
                "check_in>=",
                "check_out<=",
            ])?;
            Ok(Command::SelectBookings {
                filter: BookingFilter {
                    id: f.opt("id", parse_ulid)?,
                    user_id: f.opt("user_id", parse_ulid)?,
                    room_id: f.opt("room_id", parse_ulid)?,
                    room_type_id: f.opt("room_type_id", parse_ulid)?,
                    status: f.opt("status", parse_status)?,
                    check_in_from: f.opt("check_in>=", parse_date)?,
                    check_out_until: f.opt("check_out<=", parse_date)?,
                },
            })
        }
        "booking_details" => {
            f.only(&["id"])?;
            Ok(Command::SelectBookingDetail {
                id: parse_ulid(f.get("id").ok_or(SqlError::MissingFilter("id"))?)?,
            })
        }
        "rooms" => {
            f.only(&["room_type_id"])?;
            Ok(Command::SelectRooms {
                room_type_id: f.opt("room_type_id", parse_ulid)?,
            })
        }
        "room_types" => {
            f.only(&[])?;
            Ok(Command::SelectRoomTypes)
        }
        "room_images" => {
            f.only(&["room_type_id"])?;
            Ok(Command::SelectRoomImages {
                room_type_id: f.opt("room_type_id", parse_ulid)?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
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

fn extract_insert_rows(insert: &ast::Insert) -> Result<&[Vec<Expr>], SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) if !values.rows.is_empty() => Ok(&values.rows),
        SetExpr::Values(_) => Err(SqlError::Parse("empty VALUES".into())),
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let f = where_fields(selection)?;
    f.only(&["id"])?;
    parse_ulid(f.get("id").ok_or(SqlError::MissingFilter("id"))?)
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
        Expr::Nested(inner) => extract_value(inner),
        _ => None,
    }
}

fn value_of(expr: &Expr) -> Result<&Value, SqlError> {
    extract_value(expr).ok_or_else(|| SqlError::Parse(format!("expected value, got {expr}")))
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    match value_of(expr)? {
        Value::SingleQuotedString(s) | Value::Number(s, _) => {
            Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID {s:?}: {e}")))
        }
        other => Err(SqlError::Parse(format!("expected ULID string, got {other}"))),
    }
}

fn parse_ulid_or_null(expr: &Expr) -> Result<Option<Ulid>, SqlError> {
    match value_of(expr)? {
        Value::Null => Ok(None),
        _ => parse_ulid(expr).map(Some),
    }
}

fn parse_text(expr: &Expr) -> Result<String, SqlError> {
    match value_of(expr)? {
        Value::SingleQuotedString(s) => Ok(s.clone()),
        Value::Number(s, _) => Ok(s.clone()),
        other => Err(SqlError::Parse(format!("expected string, got {other}"))),
    }
}

fn parse_text_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    match value_of(expr)? {
        Value::Null => Ok(None),
        _ => parse_text(expr).map(Some),
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
    match value_of(expr)? {
        Value::Number(s, _) | Value::SingleQuotedString(s) => s
            .trim()
            .parse()
            .map_err(|e| SqlError::Parse(format!("bad integer {s:?}: {e}"))),
        other => Err(SqlError::Parse(format!("expected number, got {other}"))),
    }
}

fn parse_unsigned<T: TryFrom<i64>>(expr: &Expr, col: &str) -> Result<T, SqlError> {
    let v = parse_i64(expr)?;
    T::try_from(v).map_err(|_| SqlError::Parse(format!("{col}: {v} out of range")))
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    match value_of(expr)? {
        Value::Boolean(b) => Ok(*b),
        Value::SingleQuotedString(s) => match s.to_lowercase().as_str() {
            "true" | "t" | "1" => Ok(true),
            "false" | "f" | "0" => Ok(false),
            _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
        },
        Value::Number(n, _) => Ok(n != "0"),
        other => Err(SqlError::Parse(format!("expected bool, got {other}"))),
    }
}

fn parse_date(expr: &Expr) -> Result<Day, SqlError> {
    match value_of(expr)? {
        Value::SingleQuotedString(s) => Day::parse_from_str(s.trim(), "%Y-%m-%d")
            .map_err(|e| SqlError::Parse(format!("bad date {s:?} (want YYYY-MM-DD): {e}"))),
        other => Err(SqlError::Parse(format!("expected 'YYYY-MM-DD', got {other}"))),
    }
}

fn parse_status(expr: &Expr) -> Result<BookingStatus, SqlError> {
    parse_text(expr)?.parse().map_err(SqlError::Parse)
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug, PartialEq)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(String),
    WrongArity(String, usize, usize),
    MissingColumn(&'static str),
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
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingColumn(col) => write!(f, "missing column: {col}"),
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}

#[cfg(test)]
mod tests {
    use super::*;

    const A: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";
    const B: &str = "01BX5ZZKBKACTAV9WEVGEMMVRZ";
    const C: &str = "01BX5ZZKBKACTAV9WEVGEMMVS0";

    fn ulid(s: &str) -> Ulid {
        Ulid::from_string(s).unwrap()
    }

    fn day(s: &str) -> Day {
        Day::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn insert_user_and_room_type() {
        let cmd = parse_sql(&format!("INSERT INTO users (id, name) VALUES ('{A}', 'Ada')")).unwrap();
        assert_eq!(
            cmd,
            Command::InsertUser {
                id: ulid(A),
                name: "Ada".into()
            }
        );

        let cmd = parse_sql(&format!(
            "INSERT INTO room_types VALUES ('{A}', 'Deluxe', 100, 2, 1, 5)"
        ))
        .unwrap();
        assert_eq!(
            cmd,
            Command::InsertRoomType {
                room_type: RoomType {
                    id: ulid(A),
                    name: "Deluxe".into(),
                    price: 100,
                    max_adults: 2,
                    max_children: 1,
                    quantity: 5,
                }
            }
        );
    }

    #[test]
    fn insert_room_defaults_active() {
        let cmd = parse_sql(&format!(
            "INSERT INTO rooms (id, room_type_id, number) VALUES ('{A}', '{B}', '101')"
        ))
        .unwrap();
        assert_eq!(
            cmd,
            Command::InsertRoom {
                id: ulid(A),
                room_type_id: ulid(B),
                number: "101".into(),
                active: true
            }
        );
    }

    #[test]
    fn insert_booking_with_named_columns_in_any_order() {
        let sql = format!(
            "INSERT INTO bookings (phone, id, user_id, room_type_id, check_out, check_in, adults) \
             VALUES ('555-0100', '{A}', '{B}', '{C}', '2025-03-04', '2025-03-01', 2)"
        );
        let cmd = parse_sql(&sql).unwrap();
        assert_eq!(
            cmd,
            Command::InsertBooking {
                id: ulid(A),
                user_id: ulid(B),
                request: StayRequest {
                    room_type_id: ulid(C),
                    check_in: day("2025-03-01"),
                    check_out: day("2025-03-04"),
                    adults: 2,
                    children: 0,
                    phone: "555-0100".into(),
                },
                returning: false,
            }
        );
        assert_eq!(describe(&sql), None);

        let returning = format!("{sql} RETURNING *");
        assert!(matches!(
            parse_sql(&returning),
            Ok(Command::InsertBooking { returning: true, .. })
        ));
        assert_eq!(describe(&returning), Some(ResultShape::Admission));
    }

    #[test]
    fn insert_rejects_bad_input() {
        assert!(matches!(
            parse_sql(&format!("INSERT INTO users (id) VALUES ('{A}')")),
            Err(SqlError::MissingColumn("name"))
        ));
        assert!(matches!(
            parse_sql(&format!("INSERT INTO users (id, name, age) VALUES ('{A}', 'x', 3)")),
            Err(SqlError::UnknownColumn(c)) if c == "age"
        ));
        assert!(matches!(
            parse_sql(&format!("INSERT INTO users (id, name) VALUES ('{A}')")),
            Err(SqlError::WrongArity(..))
        ));
        assert!(matches!(
            parse_sql(&format!(
                "INSERT INTO bookings VALUES ('{A}', '{B}', '{C}', '03/01/2025', '2025-03-04', 2, 0, '5')"
            )),
            Err(SqlError::Parse(_))
        ));
        assert!(matches!(
            parse_sql(&format!("INSERT INTO reviews VALUES ('{A}', 300, NULL)")),
            Err(SqlError::Parse(_))
        ));
        assert!(matches!(
            parse_sql("INSERT INTO guests (id) VALUES ('x')"),
            Err(SqlError::UnknownTable(_))
        ));
    }

    #[test]
    fn insert_review_and_image() {
        assert_eq!(
            parse_sql(&format!("INSERT INTO reviews VALUES ('{A}', 5, NULL)")).unwrap(),
            Command::InsertReview {
                booking_id: ulid(A),
                rating: 5,
                comment: None
            }
        );
        assert_eq!(
            parse_sql(&format!(
                "INSERT INTO room_images (id, room_type_id, path, is_thumbnail) VALUES ('{A}', '{B}', '/a.jpg', true)"
            ))
            .unwrap(),
            Command::InsertRoomImage {
                image: RoomImage {
                    id: ulid(A),
                    room_type_id: ulid(B),
                    path: "/a.jpg".into(),
                    is_thumbnail: true
                }
            }
        );
    }

    #[test]
    fn booking_updates_route_by_column() {
        assert_eq!(
            parse_sql(&format!("UPDATE bookings SET room_id = '{B}' WHERE id = '{A}'")).unwrap(),
            Command::AssignRoom {
                id: ulid(A),
                room_id: Some(ulid(B))
            }
        );
        assert_eq!(
            parse_sql(&format!("UPDATE bookings SET room_id = NULL WHERE id = '{A}'")).unwrap(),
            Command::AssignRoom {
                id: ulid(A),
                room_id: None
            }
        );
        assert_eq!(
            parse_sql(&format!("UPDATE bookings SET status = 'checked-in' WHERE id = '{A}'"))
                .unwrap(),
            Command::SetBookingStatus {
                id: ulid(A),
                status: BookingStatus::CheckedIn
            }
        );
        assert_eq!(
            parse_sql(&format!(
                "UPDATE bookings SET check_in = '2025-03-02', is_paid = true WHERE id = '{A}'"
            ))
            .unwrap(),
            Command::UpdateBooking {
                id: ulid(A),
                patch: BookingPatch {
                    check_in: Some(day("2025-03-02")),
                    is_paid: Some(true),
                    ..Default::default()
                }
            }
        );
        assert!(matches!(
            parse_sql(&format!(
                "UPDATE bookings SET status = 'cancelled', phone = '1' WHERE id = '{A}'"
            )),
            Err(SqlError::UnknownColumn(_))
        ));
        assert!(matches!(
            parse_sql(&format!("UPDATE bookings SET status = 'gone' WHERE id = '{A}'")),
            Err(SqlError::Parse(_))
        ));
        assert!(matches!(
            parse_sql("UPDATE bookings SET is_paid = true"),
            Err(SqlError::MissingFilter("id"))
        ));
    }

    #[test]
    fn catalog_updates() {
        assert_eq!(
            parse_sql(&format!("UPDATE rooms SET active = false WHERE id = '{A}'")).unwrap(),
            Command::SetRoomActive {
                id: ulid(A),
                active: false
            }
        );
        assert_eq!(
            parse_sql(&format!("UPDATE room_types SET price = 120 WHERE id = '{A}'")).unwrap(),
            Command::UpdateRoomType {
                id: ulid(A),
                patch: RoomTypePatch {
                    price: Some(120),
                    ..Default::default()
                }
            }
        );
        assert_eq!(
            parse_sql(&format!("UPDATE room_images SET is_thumbnail = true WHERE id = '{A}'"))
                .unwrap(),
            Command::SetThumbnail { id: ulid(A) }
        );
        assert!(parse_sql(&format!(
            "UPDATE room_images SET is_thumbnail = false WHERE id = '{A}'"
        ))
        .is_err());
    }

    #[test]
    fn deletes() {
        assert_eq!(
            parse_sql(&format!("DELETE FROM rooms WHERE id = '{A}'")).unwrap(),
            Command::DeleteRoom { id: ulid(A) }
        );
        assert_eq!(
            parse_sql(&format!("DELETE FROM bookings WHERE id = '{A}'")).unwrap(),
            Command::DeleteBooking { id: ulid(A) }
        );
        assert!(matches!(
            parse_sql(&format!("DELETE FROM users WHERE id = '{A}'")),
            Err(SqlError::UnknownTable(_))
        ));
    }

    #[test]
    fn select_availability() {
        let sql = format!(
            "SELECT * FROM availability WHERE room_type_id = '{A}' AND check_in = '2025-03-01' AND check_out = '2025-03-04'"
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectAvailability {
                room_type_id: ulid(A),
                check_in: day("2025-03-01"),
                check_out: day("2025-03-04"),
                exclude_booking_id: None
            }
        );
        assert_eq!(describe(&sql), Some(ResultShape::Availability));

        let excluding = format!("{sql} AND exclude_booking_id = '{B}'");
        assert!(matches!(
            parse_sql(&excluding),
            Ok(Command::SelectAvailability { exclude_booking_id: Some(id), .. }) if id == ulid(B)
        ));

        assert!(matches!(
            parse_sql(&format!("SELECT * FROM availability WHERE room_type_id = '{A}'")),
            Err(SqlError::MissingFilter("check_in"))
        ));
        assert!(matches!(
            parse_sql(&format!(
                "SELECT * FROM availability WHERE room_type_id = '{A}' AND check_in >= '2025-03-01'"
            )),
            Err(SqlError::Unsupported(_))
        ));
    }

    #[test]
    fn select_bookings_filters() {
        assert_eq!(
            parse_sql("SELECT * FROM bookings").unwrap(),
            Command::SelectBookings {
                filter: BookingFilter::default()
            }
        );
        assert_eq!(
            parse_sql(&format!(
                "SELECT * FROM bookings WHERE user_id = '{A}' AND status = 'confirmed'"
            ))
            .unwrap(),
            Command::SelectBookings {
                filter: BookingFilter {
                    user_id: Some(ulid(A)),
                    status: Some(BookingStatus::Confirmed),
                    ..Default::default()
                }
            }
        );
        assert!(matches!(
            parse_sql("SELECT * FROM bookings WHERE phone = '1'"),
            Err(SqlError::UnknownColumn(_))
        ));
    }

    #[test]
    fn select_bookings_by_date_range() {
        assert_eq!(
            parse_sql(
                "SELECT * FROM bookings WHERE check_in >= '2025-03-01' AND check_out <= '2025-03-31'"
            )
            .unwrap(),
            Command::SelectBookings {
                filter: BookingFilter {
                    check_in_from: Some(day("2025-03-01")),
                    check_out_until: Some(day("2025-03-31")),
                    ..Default::default()
                }
            }
        );
        // Only the range forms the filter knows about.
        assert!(matches!(
            parse_sql("SELECT * FROM bookings WHERE check_in <= '2025-03-01'"),
            Err(SqlError::UnknownColumn(_))
        ));
        assert!(matches!(
            parse_sql("SELECT * FROM rooms WHERE room_type_id >= 'x'"),
            Err(SqlError::UnknownColumn(_))
        ));
        assert!(matches!(
            parse_sql("SELECT * FROM bookings WHERE check_in > '2025-03-01'"),
            Err(SqlError::Unsupported(_))
        ));
    }

    #[test]
    fn select_booking_detail() {
        let sql = format!("SELECT * FROM booking_details WHERE id = '{A}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectBookingDetail { id: ulid(A) }
        );
        assert_eq!(describe(&sql), Some(ResultShape::BookingDetail));
        assert_eq!(
            parse_sql("SELECT * FROM booking_details"),
            Err(SqlError::MissingFilter("id"))
        );
    }

    #[test]
    fn select_catalog() {
        assert_eq!(
            parse_sql("SELECT * FROM room_types").unwrap(),
            Command::SelectRoomTypes
        );
        assert_eq!(
            parse_sql(&format!("SELECT * FROM rooms WHERE room_type_id = '{A}'")).unwrap(),
            Command::SelectRooms {
                room_type_id: Some(ulid(A))
            }
        );
        assert_eq!(
            parse_sql("SELECT * FROM room_images").unwrap(),
            Command::SelectRoomImages { room_type_id: None }
        );
        assert_eq!(describe("SELECT * FROM rooms"), Some(ResultShape::Rooms));
        assert_eq!(
            describe("SELECT * FROM bookings WHERE id = $1"),
            Some(ResultShape::Bookings)
        );
        assert_eq!(describe("DELETE FROM rooms WHERE id = $1"), None);
    }

    #[test]
    fn batches_parse_every_statement() {
        let cmds = parse_batch(&format!(
            "INSERT INTO users VALUES ('{A}', 'Ada'); DELETE FROM bookings WHERE id = '{B}';"
        ))
        .unwrap();
        assert_eq!(cmds.len(), 2);
        assert!(matches!(cmds[1], Command::DeleteBooking { .. }));

        assert!(parse_batch(&format!(
            "INSERT INTO users VALUES ('{A}', 'Ada'); DROP TABLE users"
        ))
        .is_err());
    }

    #[test]
    fn empty_and_unsupported() {
        assert_eq!(parse_sql(""), Err(SqlError::Empty));
        assert!(matches!(
            parse_sql("CREATE TABLE x (id INT)"),
            Err(SqlError::Unsupported(_))
        ));
    }
}
