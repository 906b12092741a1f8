use sqlparser::ast::{
    self, Expr, FromTable, LimitClause, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject,
    Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

use crate::model::*;

const LISTING_COLUMNS: [&str; 5] = ["id", "owner_id", "open_time", "close_time", "slot_capacity"];
const BOOKING_COLUMNS: [&str; 5] = ["listing_id", "date", "slot_start", "slot_end", "guest_count"];

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    UpsertListing {
        listing: Listing,
    },
    RemoveListing {
        id: String,
    },
    SelectAvailability {
        listing_id: String,
        date: String,
    },
    InsertBooking {
        request: BookingRequest,
    },
    SelectRoster {
        listing_id: String,
        date: Option<String>,
        cursor: Option<String>,
        limit: Option<i64>,
    },
    SelectMyBookings,
    SetDisplayName {
        name: String,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let trimmed = sql.trim().trim_end_matches(';').trim_end();
    if let Some(rest) = trimmed
        .get(..4)
        .filter(|kw| kw.eq_ignore_ascii_case("SET "))
        .map(|_| &trimmed[4..])
    {
        return parse_set(rest);
    }

    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(stmt) = stmts.first() else {
        return Err(SqlError::Empty);
    };

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// `SET display_name = 'Ana'` or `SET display_name TO 'Ana'`.
fn parse_set(rest: &str) -> Result<Command, SqlError> {
    let rest = rest.trim();
    let (name, value) = match rest.split_once('=') {
        Some((n, v)) => (n.trim(), v.trim()),
        None => {
            let mut parts = rest.splitn(2, char::is_whitespace);
            let n = parts.next().unwrap_or_default();
            let v = parts.next().unwrap_or_default().trim();
            let v = v
                .get(..3)
                .filter(|kw| kw.eq_ignore_ascii_case("TO "))
                .map(|_| v[3..].trim())
                .ok_or_else(|| SqlError::Parse(format!("malformed SET: {rest}")))?;
            (n, v)
        }
    };
    if !name.eq_ignore_ascii_case("display_name") {
        return Err(SqlError::Unsupported(format!("SET {name}")));
    }
    let name = match value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')) {
        Some(quoted) => quoted.replace("''", "'"),
        None => value.to_string(),
    };
    Ok(Command::SetDisplayName { name })
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;

    match table.as_str() {
        "listings" => {
            let row = NamedRow::new(insert, &values, &LISTING_COLUMNS)?;
            Ok(Command::UpsertListing {
                listing: Listing {
                    id: row.text("id")?,
                    owner_id: row.text("owner_id")?,
                    open_time: row.text("open_time")?,
                    close_time: row.text("close_time")?,
                    slot_capacity: parse_i64_expr(row.expr("slot_capacity")?)?,
                },
            })
        }
        "bookings" => {
            let row = NamedRow::new(insert, &values, &BOOKING_COLUMNS)?;
            Ok(Command::InsertBooking {
                request: BookingRequest {
                    listing_id: row.text("listing_id")?,
                    date: row.text("date")?,
                    slot_start: row.text("slot_start")?,
                    slot_end: row.text("slot_end")?,
                    guest_count: loose_integer(row.expr("guest_count")?),
                },
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// VALUES matched up with their column names: the explicit column list when
/// given, else the table's declared column order.
struct NamedRow<'a> {
    columns: Vec<String>,
    values: &'a [Expr],
}

impl<'a> NamedRow<'a> {
    fn new(insert: &ast::Insert, values: &'a [Expr], declared: &[&'static str]) -> Result<Self, SqlError> {
        let columns: Vec<String> = if insert.columns.is_empty() {
            declared.iter().map(|c| c.to_string()).collect()
        } else {
            insert.columns.iter().map(|c| c.value.to_lowercase()).collect()
        };
        if columns.len() != values.len() {
            return Err(SqlError::WrongArity("VALUES", columns.len(), values.len()));
        }
        Ok(Self { columns, values })
    }

    fn expr(&self, column: &'static str) -> Result<&'a Expr, SqlError> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|i| &self.values[i])
            .ok_or(SqlError::MissingColumn(column))
    }

    fn text(&self, column: &'static str) -> Result<String, SqlError> {
        parse_text_expr(self.expr(column)?)
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    match table.as_str() {
        "listings" => {
            let mut filters = Filters::default();
            if let Some(selection) = &delete.selection {
                filters.collect(selection)?;
            }
            Ok(Command::RemoveListing {
                id: filters.id.ok_or(SqlError::MissingFilter("id"))?,
            })
        }
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

    let mut filters = Filters::default();
    if let Some(selection) = &select.selection {
        filters.collect(selection)?;
    }

    // Missing filters become empty values so the engine reports them as
    // invalid input rather than a syntax error.
    match table.as_str() {
        "availability" => Ok(Command::SelectAvailability {
            listing_id: filters.listing_id.unwrap_or_default(),
            date: filters.date.unwrap_or_default(),
        }),
        "bookings" => Ok(Command::SelectRoster {
            listing_id: filters.listing_id.unwrap_or_default(),
            date: filters.date,
            cursor: filters.cursor,
            limit: query_limit(query),
        }),
        "my_bookings" => Ok(Command::SelectMyBookings),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// `LIMIT n`, when `n` is an integer. Anything else falls back to the default
/// page size downstream.
fn query_limit(query: &ast::Query) -> Option<i64> {
    match query.limit_clause.as_ref()? {
        LimitClause::LimitOffset { limit, .. } => limit.as_ref().and_then(loose_integer),
        LimitClause::OffsetCommaLimit { limit, .. } => loose_integer(limit),
    }
}

/// Equality filters collected from an AND-chain WHERE clause.
#[derive(Default)]
struct Filters {
    id: Option<String>,
    listing_id: Option<String>,
    date: Option<String>,
    cursor: Option<String>,
}

impl Filters {
    fn collect(&mut self, expr: &Expr) -> Result<(), SqlError> {
        match expr {
            Expr::Nested(inner) => self.collect(inner),
            Expr::BinaryOp {
                left,
                op: ast::BinaryOperator::And,
                right,
            } => {
                self.collect(left)?;
                self.collect(right)
            }
            Expr::BinaryOp {
                left,
                op: ast::BinaryOperator::Eq,
                right,
            } => {
                let slot = match expr_column_name(left).as_deref() {
                    Some("id") => &mut self.id,
                    Some("listing_id") => &mut self.listing_id,
                    Some("date") => &mut self.date,
                    Some("cursor") => &mut self.cursor,
                    Some(other) => return Err(SqlError::Unsupported(format!("filter on {other}"))),
                    None => return Err(SqlError::Parse(format!("expected column, got {left}"))),
                };
                *slot = Some(parse_text_expr(right)?);
                Ok(())
            }
            other => Err(SqlError::Unsupported(format!("WHERE {other}"))),
        }
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

/// A literal as text. Booking fields are validated by the engine, so any
/// string or number is passed through and NULL becomes empty.
fn parse_text_expr(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) | Some(Value::Number(s, _)) => Ok(s.clone()),
        Some(Value::Null) => Ok(String::new()),
        Some(other) => Err(SqlError::Parse(format!("expected string, got {other}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    loose_integer(expr).ok_or_else(|| SqlError::Parse(format!("expected integer, got {expr}")))
}

/// An integer literal, quoted or not, possibly negated. Anything else
/// (fractions, words, NULL) is `None`.
fn loose_integer(expr: &Expr) -> Option<i64> {
    match expr {
        Expr::UnaryOp {
            op: ast::UnaryOperator::Minus,
            expr,
        } => loose_integer(expr).and_then(i64::checked_neg),
        Expr::Nested(inner) => loose_integer(inner),
        _ => match extract_value(expr)? {
            Value::Number(s, _) | Value::SingleQuotedString(s) => s.trim().parse().ok(),
            _ => None,
        },
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    WrongArity(&'static str, usize, usize),
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

    fn booking_request(sql: &str) -> BookingRequest {
        match parse_sql(sql).unwrap() {
            Command::InsertBooking { request } => request,
            other => panic!("expected InsertBooking, got {other:?}"),
        }
    }

    #[test]
    fn parse_upsert_listing() {
        let sql = "INSERT INTO listings (id, owner_id, open_time, close_time, slot_capacity) \
                   VALUES ('lst_1', 'host_1', '09:00', '12:00', 10)";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::UpsertListing {
                listing: Listing {
                    id: "lst_1".into(),
                    owner_id: "host_1".into(),
                    open_time: "09:00".into(),
                    close_time: "12:00".into(),
                    slot_capacity: 10,
                },
            }
        );
    }

    #[test]
    fn listing_capacity_kept_raw() {
        let sql = "INSERT INTO listings VALUES ('lst_1', 'host_1', '12:00', '09:00', -3)";
        match parse_sql(sql).unwrap() {
            Command::UpsertListing { listing } => {
                assert_eq!(listing.slot_capacity, -3);
                assert_eq!(listing.open_time, "12:00");
            }
            other => panic!("expected UpsertListing, got {other:?}"),
        }
        let sql = "INSERT INTO listings VALUES ('lst_1', 'host_1', '09:00', '12:00', 'lots')";
        assert!(matches!(parse_sql(sql), Err(SqlError::Parse(_))));
    }

    #[test]
    fn parse_remove_listing() {
        let cmd = parse_sql("DELETE FROM listings WHERE id = 'lst_1'").unwrap();
        assert_eq!(cmd, Command::RemoveListing { id: "lst_1".into() });
        assert!(matches!(
            parse_sql("DELETE FROM listings"),
            Err(SqlError::MissingFilter("id"))
        ));
    }

    #[test]
    fn parse_insert_booking_by_column_name() {
        let req = booking_request(
            "INSERT INTO bookings (guest_count, slot_end, slot_start, date, listing_id) \
             VALUES (4, '10:00', '09:00', '2025-06-01', 'lst_1')",
        );
        assert_eq!(
            req,
            BookingRequest {
                listing_id: "lst_1".into(),
                date: "2025-06-01".into(),
                slot_start: "09:00".into(),
                slot_end: "10:00".into(),
                guest_count: Some(4),
            }
        );
    }

    #[test]
    fn booking_guest_count_is_loose() {
        let base = "INSERT INTO bookings VALUES ('lst_1', '2025-06-01', '09:00', '10:00', ";
        assert_eq!(booking_request(&format!("{base}'3')")).guest_count, Some(3));
        assert_eq!(booking_request(&format!("{base}-2)")).guest_count, Some(-2));
        assert_eq!(booking_request(&format!("{base}2.5)")).guest_count, None);
        assert_eq!(booking_request(&format!("{base}'abc')")).guest_count, None);
        assert_eq!(booking_request(&format!("{base}NULL)")).guest_count, None);
    }

    #[test]
    fn booking_fields_pass_through_unvalidated() {
        let req = booking_request("INSERT INTO bookings VALUES (NULL, 'junk', '9:00', '10:30', 1)");
        assert_eq!(req.listing_id, "");
        assert_eq!(req.date, "junk");
        assert_eq!(req.slot_start, "9:00");
    }

    #[test]
    fn booking_arity_mismatch() {
        let sql = "INSERT INTO bookings (listing_id, date) VALUES ('lst_1')";
        assert!(matches!(parse_sql(sql), Err(SqlError::WrongArity(_, 2, 1))));
        let sql = "INSERT INTO bookings (listing_id, date) VALUES ('lst_1', '2025-06-01')";
        assert!(matches!(parse_sql(sql), Err(SqlError::MissingColumn("slot_start"))));
    }

    #[test]
    fn parse_select_availability() {
        let sql = "SELECT * FROM availability WHERE listing_id = 'lst_1' AND date = '2025-06-01'";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::SelectAvailability {
                listing_id: "lst_1".into(),
                date: "2025-06-01".into(),
            }
        );
        // Missing filters reach the engine as empty values.
        assert_eq!(
            parse_sql("SELECT * FROM availability").unwrap(),
            Command::SelectAvailability {
                listing_id: String::new(),
                date: String::new(),
            }
        );
    }

    #[test]
    fn parse_roster_with_cursor_and_limit() {
        let sql = "SELECT * FROM bookings WHERE listing_id = 'lst_1' AND (date = '2025-06-01' AND cursor = 'abc') LIMIT 5";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::SelectRoster {
                listing_id: "lst_1".into(),
                date: Some("2025-06-01".into()),
                cursor: Some("abc".into()),
                limit: Some(5),
            }
        );
        match parse_sql("SELECT * FROM bookings WHERE listing_id = 'lst_1'").unwrap() {
            Command::SelectRoster { date, cursor, limit, .. } => {
                assert_eq!((date, cursor, limit), (None, None, None));
            }
            other => panic!("expected SelectRoster, got {other:?}"),
        }
    }

    #[test]
    fn unknown_filter_rejected() {
        let sql = "SELECT * FROM bookings WHERE listing_id = 'lst_1' AND user_id = 'x'";
        assert!(matches!(parse_sql(sql), Err(SqlError::Unsupported(_))));
        let sql = "SELECT * FROM bookings WHERE listing_id = 'a' OR listing_id = 'b'";
        assert!(matches!(parse_sql(sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_my_bookings() {
        assert_eq!(parse_sql("SELECT * FROM my_bookings;").unwrap(), Command::SelectMyBookings);
    }

    #[test]
    fn parse_set_display_name() {
        assert_eq!(
            parse_sql("SET display_name = 'Ana Lima';").unwrap(),
            Command::SetDisplayName { name: "Ana Lima".into() }
        );
        assert_eq!(
            parse_sql("set DISPLAY_NAME to 'O''Brien'").unwrap(),
            Command::SetDisplayName { name: "O'Brien".into() }
        );
        assert!(matches!(parse_sql("SET search_path = public"), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_unknown_table_errors() {
        assert!(matches!(
            parse_sql("SELECT * FROM ratings"),
            Err(SqlError::UnknownTable(t)) if t == "ratings"
        ));
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }
}
