use std::str::FromStr;

use sqlparser::ast::{
    self, Expr, FunctionArg, FunctionArgExpr, FunctionArguments, LimitClause, ObjectNamePart, SetExpr,
    Statement, TableFactor, TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

use crate::limits::DEFAULT_RECENT_LIMIT;
use crate::model::*;

/// Parsed command from SQL input. Dates stay textual here; the engine
/// normalizes them against its reference timezone.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertBooking {
        date: String,
        slot: Slot,
        request: BookingRequest,
    },
    SelectBookingsByDay {
        date: String,
    },
    SelectBooking {
        number: String,
    },
    SelectRecentBookings {
        limit: usize,
    },
    SelectAvailability {
        date: String,
    },
    SelectCalendar {
        start: String,
        end: String,
    },
    InsertAvailability {
        date: String,
        morning_open: bool,
        evening_open: bool,
        /// `None` means the ledger's default capacity.
        max_per_slot: Option<u32>,
    },
    InitializeRange {
        start: String,
        end: String,
        morning_open: bool,
        evening_open: bool,
        max_per_slot: Option<u32>,
    },
    SetSlot {
        date: String,
        slot: Slot,
        open: bool,
    },
    SetCapacity {
        date: String,
        max_per_slot: u32,
    },
    Transition {
        number: String,
        status: BookingStatus,
    },
    RepairDuplicates,
    Compact,
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(stmt) = stmts.first() else {
        return Err(SqlError::Empty);
    };

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Query(query) => parse_select(query),
        Statement::Call(function) => parse_call(function),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// Column layout a statement answers with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultShape {
    Bookings,
    Availability,
    RangeReport,
    RepairReport,
    Empty,
}

/// Decide the result layout from the statement's target table or procedure.
/// Works on statements with unbound `$n` placeholders, which parse as
/// ordinary expressions.
pub fn result_shape(sql: &str) -> ResultShape {
    let dialect = PostgreSqlDialect {};
    let Ok(stmts) = Parser::parse_sql(&dialect, sql) else {
        return ResultShape::Empty;
    };
    let target = match stmts.first() {
        Some(Statement::Insert(insert)) => insert_table_name(insert).ok(),
        Some(Statement::Query(query)) => match query.body.as_ref() {
            SetExpr::Select(select) => select
                .from
                .first()
                .and_then(|from| table_factor_name(&from.relation).ok()),
            _ => None,
        },
        Some(Statement::Call(function)) => object_name_last(&function.name),
        _ => None,
    };
    match target.as_deref() {
        Some("bookings" | "confirm_booking" | "cancel_booking" | "complete_booking") => {
            ResultShape::Bookings
        }
        Some("availability" | "set_slot" | "set_capacity") => ResultShape::Availability,
        Some("initialize_range") => ResultShape::RangeReport,
        Some("repair_duplicates") => ResultShape::RepairReport,
        _ => ResultShape::Empty,
    }
}

// ── INSERT ────────────────────────────────────────────────────

const BOOKING_COLUMNS: [&str; 9] = [
    "name",
    "phone",
    "email",
    "pickup_location",
    "dropoff_location",
    "pickup_date",
    "pickup_time",
    "trip_type",
    "price",
];

const AVAILABILITY_COLUMNS: [&str; 4] = ["date", "morning_open", "evening_open", "max_per_slot"];

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    match table.as_str() {
        "bookings" => {
            let row = named_row(insert, "bookings", &BOOKING_COLUMNS, booking_column)?;
            let request = BookingRequest {
                name: parse_text(row.require("name")?)?,
                phone: parse_text(row.require("phone")?)?,
                email: row.get("email").map(parse_text_or_null).transpose()?.flatten(),
                pickup_location: parse_text(row.require("pickup_location")?)?,
                dropoff_location: parse_text(row.require("dropoff_location")?)?,
                trip_type: parse_enum(row.require("trip_type")?)?,
                price: parse_i64(row.require("price")?)?,
            };
            Ok(Command::InsertBooking {
                date: parse_text(row.require("pickup_date")?)?,
                slot: parse_enum(row.require("pickup_time")?)?,
                request,
            })
        }
        "availability" => {
            let row = named_row(insert, "availability", &AVAILABILITY_COLUMNS, availability_column)?;
            Ok(Command::InsertAvailability {
                date: parse_text(row.require("date")?)?,
                morning_open: row.get("morning_open").map(parse_bool).transpose()?.unwrap_or(true),
                evening_open: row.get("evening_open").map(parse_bool).transpose()?.unwrap_or(true),
                max_per_slot: row.get("max_per_slot").map(parse_u32_or_null).transpose()?.flatten(),
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn booking_column(name: &str) -> Option<&'static str> {
    match name {
        "date" | "pickup_date" => Some("pickup_date"),
        "slot" | "pickup_time" => Some("pickup_time"),
        other => BOOKING_COLUMNS.iter().copied().find(|c| *c == other),
    }
}

fn availability_column(name: &str) -> Option<&'static str> {
    match name {
        "morning_available" => Some("morning_open"),
        "evening_available" => Some("evening_open"),
        "max_bookings" => Some("max_per_slot"),
        other => AVAILABILITY_COLUMNS.iter().copied().find(|c| *c == other),
    }
}

/// One VALUES row keyed by canonical column name.
struct Row {
    cells: Vec<(&'static str, Expr)>,
}

impl Row {
    fn get(&self, column: &str) -> Option<&Expr> {
        self.cells.iter().find(|(c, _)| *c == column).map(|(_, e)| e)
    }

    fn require(&self, column: &'static str) -> Result<&Expr, SqlError> {
        self.get(column).ok_or(SqlError::MissingColumn(column))
    }
}

/// Pair the single VALUES row with its columns. Without a column list the
/// values are taken positionally in `default_columns` order.
fn named_row(
    insert: &ast::Insert,
    table: &'static str,
    default_columns: &[&'static str],
    canonical: fn(&str) -> Option<&'static str>,
) -> Result<Row, SqlError> {
    let values = extract_single_row(insert)?;
    let columns: Vec<&'static str> = if insert.columns.is_empty() {
        if values.len() > default_columns.len() {
            return Err(SqlError::WrongArity(table, default_columns.len(), values.len()));
        }
        default_columns[..values.len()].to_vec()
    } else {
        let mut out = Vec::with_capacity(insert.columns.len());
        for ident in &insert.columns {
            let name = ident.value.to_lowercase();
            out.push(canonical(&name).ok_or(SqlError::UnknownColumn(name))?);
        }
        if out.len() != values.len() {
            return Err(SqlError::WrongArity(table, out.len(), values.len()));
        }
        out
    };
    Ok(Row {
        cells: columns.into_iter().zip(values).collect(),
    })
}

// ── SELECT ────────────────────────────────────────────────────

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };
    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;

    let mut filters = Filters::default();
    if let Some(selection) = &select.selection {
        collect_filters(selection, &mut filters)?;
    }

    match table.as_str() {
        "bookings" => {
            if filters.from.is_some() || filters.to.is_some() {
                return Err(SqlError::Unsupported("date range filter on bookings".into()));
            }
            if let Some(number) = filters.number {
                return Ok(Command::SelectBooking { number });
            }
            if let Some(date) = filters.date {
                return Ok(Command::SelectBookingsByDay { date });
            }
            let limit = match query_limit(query)? {
                Some(n) => usize::try_from(n).map_err(|_| SqlError::Parse(format!("bad LIMIT {n}")))?,
                None => DEFAULT_RECENT_LIMIT,
            };
            Ok(Command::SelectRecentBookings { limit })
        }
        "availability" => match (filters.date, filters.from, filters.to) {
            (Some(date), _, _) => Ok(Command::SelectAvailability { date }),
            (None, Some(start), Some(end)) => Ok(Command::SelectCalendar { start, end }),
            (None, Some(_), None) => Err(SqlError::MissingFilter("date <=")),
            (None, None, _) => Err(SqlError::MissingFilter("date")),
        },
        _ => Err(SqlError::UnknownTable(table)),
    }
}

#[derive(Default)]
struct Filters {
    date: Option<String>,
    from: Option<String>,
    to: Option<String>,
    number: Option<String>,
}

fn collect_filters(expr: &Expr, filters: &mut Filters) -> Result<(), SqlError> {
    let unsupported = || SqlError::Unsupported(format!("filter {expr}"));
    match expr {
        Expr::Nested(inner) => collect_filters(inner, filters)?,
        Expr::BinaryOp { left, op, right } => match op {
            ast::BinaryOperator::And => {
                collect_filters(left, filters)?;
                collect_filters(right, filters)?;
            }
            ast::BinaryOperator::Eq => match expr_column_name(left).as_deref() {
                Some("date" | "pickup_date") => filters.date = Some(parse_text(right)?),
                Some("number" | "booking_number") => filters.number = Some(parse_text(right)?),
                _ => return Err(unsupported()),
            },
            ast::BinaryOperator::GtEq if is_date_column(left) => {
                filters.from = Some(parse_text(right)?);
            }
            ast::BinaryOperator::LtEq if is_date_column(left) => {
                filters.to = Some(parse_text(right)?);
            }
            _ => return Err(unsupported()),
        },
        Expr::Between { expr, negated: false, low, high } if is_date_column(expr) => {
            filters.from = Some(parse_text(low)?);
            filters.to = Some(parse_text(high)?);
        }
        _ => return Err(unsupported()),
    }
    Ok(())
}

fn is_date_column(expr: &Expr) -> bool {
    matches!(expr_column_name(expr).as_deref(), Some("date" | "pickup_date"))
}

fn query_limit(query: &ast::Query) -> Result<Option<i64>, SqlError> {
    match &query.limit_clause {
        Some(LimitClause::LimitOffset { limit: Some(limit), .. }) => Ok(Some(parse_i64(limit)?)),
        Some(LimitClause::OffsetCommaLimit { limit, .. }) => Ok(Some(parse_i64(limit)?)),
        _ => Ok(None),
    }
}

// ── CALL ──────────────────────────────────────────────────────

fn parse_call(function: &ast::Function) -> Result<Command, SqlError> {
    let name = object_name_last(&function.name).ok_or_else(|| SqlError::Parse("empty procedure name".into()))?;
    let args = call_args(&function.args)?;
    let arity = |expected: usize| {
        if args.len() == expected {
            Ok(())
        } else {
            Err(SqlError::WrongArity(procedure_label(&name), expected, args.len()))
        }
    };

    match name.as_str() {
        "initialize_range" => {
            if !matches!(args.len(), 2..=5) {
                return Err(SqlError::WrongArity("initialize_range", 5, args.len()));
            }
            Ok(Command::InitializeRange {
                start: parse_text(args[0])?,
                end: parse_text(args[1])?,
                morning_open: args.get(2).map(|e| parse_bool(e)).transpose()?.unwrap_or(true),
                evening_open: args.get(3).map(|e| parse_bool(e)).transpose()?.unwrap_or(true),
                max_per_slot: args.get(4).map(|e| parse_u32_or_null(e)).transpose()?.flatten(),
            })
        }
        "set_slot" => {
            arity(3)?;
            Ok(Command::SetSlot {
                date: parse_text(args[0])?,
                slot: parse_enum(args[1])?,
                open: parse_bool(args[2])?,
            })
        }
        "set_capacity" => {
            arity(2)?;
            Ok(Command::SetCapacity {
                date: parse_text(args[0])?,
                max_per_slot: parse_u32(args[1])?,
            })
        }
        "confirm_booking" | "cancel_booking" | "complete_booking" => {
            arity(1)?;
            let status = match name.as_str() {
                "confirm_booking" => BookingStatus::Confirmed,
                "cancel_booking" => BookingStatus::Cancelled,
                _ => BookingStatus::Completed,
            };
            Ok(Command::Transition {
                number: parse_text(args[0])?,
                status,
            })
        }
        "repair_duplicates" => {
            arity(0)?;
            Ok(Command::RepairDuplicates)
        }
        "compact" => {
            arity(0)?;
            Ok(Command::Compact)
        }
        _ => Err(SqlError::UnknownProcedure(name.clone())),
    }
}

fn procedure_label(name: &str) -> &'static str {
    match name {
        "set_slot" => "set_slot",
        "set_capacity" => "set_capacity",
        "confirm_booking" => "confirm_booking",
        "cancel_booking" => "cancel_booking",
        "complete_booking" => "complete_booking",
        "repair_duplicates" => "repair_duplicates",
        "compact" => "compact",
        _ => "procedure",
    }
}

fn call_args(args: &FunctionArguments) -> Result<Vec<&Expr>, SqlError> {
    match args {
        FunctionArguments::None => Ok(Vec::new()),
        FunctionArguments::List(list) => list
            .args
            .iter()
            .map(|arg| match arg {
                FunctionArg::Unnamed(FunctionArgExpr::Expr(e)) => Ok(e),
                other => Err(SqlError::Unsupported(format!("argument {other}"))),
            })
            .collect(),
        FunctionArguments::Subquery(_) => Err(SqlError::Unsupported("subquery argument".into())),
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

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_single_row(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [] => Err(SqlError::Parse("empty VALUES".into())),
            [row] => Ok(row.clone()),
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

fn parse_text(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) | Some(Value::Number(s, _)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_text_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => Ok(Some(parse_text(expr)?)),
    }
}

fn parse_enum<T: FromStr<Err = ParseEnumError>>(expr: &Expr) -> Result<T, SqlError> {
    parse_text(expr)?.parse().map_err(|e: ParseEnumError| SqlError::Parse(e.to_string()))
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => s
                .trim()
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad integer {s:?}: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr}")))
    }
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

fn parse_u32_or_null(expr: &Expr) -> Result<Option<u32>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => Ok(Some(parse_u32(expr)?)),
    }
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Boolean(b) => Ok(*b),
            Value::SingleQuotedString(s) => match s.to_lowercase().as_str() {
                "true" | "t" | "1" | "open" | "yes" => Ok(true),
                "false" | "f" | "0" | "closed" | "no" => Ok(false),
                _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
            },
            Value::Number(n, _) => Ok(n != "0"),
            _ => Err(SqlError::Parse(format!("expected bool, got {value}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr}")))
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug, PartialEq)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(String),
    UnknownProcedure(String),
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
            SqlError::UnknownColumn(c) => write!(f, "unknown column: {c}"),
            SqlError::UnknownProcedure(p) => write!(f, "unknown procedure: {p}"),
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

    #[test]
    fn unknown_predicates_are_rejected() {
        for sql in [
            "SELECT * FROM bookings WHERE status = 'CANCELLED'",
            "SELECT * FROM bookings WHERE date > '2026-03-10'",
            "SELECT * FROM bookings WHERE date = '2026-03-10' OR date = '2026-03-11'",
            "SELECT * FROM availability WHERE date NOT BETWEEN '2026-03-01' AND '2026-03-31'",
            "SELECT * FROM bookings WHERE date >= '2026-03-01' AND date <= '2026-03-31'",
        ] {
            assert!(matches!(parse_sql(sql), Err(SqlError::Unsupported(_))), "{sql}");
        }
    }

    #[test]
    fn result_shape_follows_target_table() {
        assert_eq!(
            result_shape("SELECT current_bookings FROM availability WHERE date = $1"),
            ResultShape::Availability
        );
        assert_eq!(result_shape("SELECT * FROM bookings WHERE number = $1"), ResultShape::Bookings);
        assert_eq!(
            result_shape("INSERT INTO bookings (name, price) VALUES ($1, $2)"),
            ResultShape::Bookings
        );
        assert_eq!(result_shape("CALL cancel_booking($1)"), ResultShape::Bookings);
        assert_eq!(result_shape("CALL set_slot($1, 'evening', false)"), ResultShape::Availability);
        assert_eq!(result_shape("CALL initialize_range($1, $2)"), ResultShape::RangeReport);
        assert_eq!(result_shape("CALL repair_duplicates()"), ResultShape::RepairReport);
        assert_eq!(result_shape("CALL compact()"), ResultShape::Empty);
        assert_eq!(result_shape("SELEKT"), ResultShape::Empty);
    }

    const BOOKING_SQL: &str = "INSERT INTO bookings \
        (name, phone, email, pickup_location, dropoff_location, pickup_date, pickup_time, trip_type, price) \
        VALUES ('Kim Minji', '010-1234-5678', NULL, 'Seocho-gu', 'ICN T1', '2026-03-10', 'morning', 'HOME_TO_AIRPORT', 65000)";

    #[test]
    fn parse_insert_booking() {
        let cmd = parse_sql(BOOKING_SQL).unwrap();
        match cmd {
            Command::InsertBooking { date, slot, request } => {
                assert_eq!(date, "2026-03-10");
                assert_eq!(slot, Slot::Morning);
                assert_eq!(request.name, "Kim Minji");
                assert_eq!(request.email, None);
                assert_eq!(request.trip_type, TripType::HomeToAirport);
                assert_eq!(request.price, 65000);
            }
            _ => panic!("expected InsertBooking, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_booking_column_order_and_aliases() {
        let sql = "INSERT INTO bookings (price, slot, date, trip_type, name, phone, pickup_location, dropoff_location, email) \
                   VALUES (40000, 'EVENING', '2026-03-11T08:00:00+09:00', 'airport-to-home', 'Lee', '010', 'GMP', 'Home', 'lee@example.com')";
        let cmd = parse_sql(sql).unwrap();
        match cmd {
            Command::InsertBooking { date, slot, request } => {
                assert_eq!(date, "2026-03-11T08:00:00+09:00");
                assert_eq!(slot, Slot::Evening);
                assert_eq!(request.trip_type, TripType::AirportToHome);
                assert_eq!(request.email.as_deref(), Some("lee@example.com"));
            }
            _ => panic!("expected InsertBooking, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_booking_positional() {
        let sql = "INSERT INTO bookings VALUES ('Park', '010', NULL, 'A', 'B', '2026-03-12', 'morning', 'HOME_TO_AIRPORT', 1)";
        assert!(matches!(parse_sql(sql).unwrap(), Command::InsertBooking { .. }));
    }

    #[test]
    fn parse_insert_booking_errors() {
        let missing = "INSERT INTO bookings (name, phone) VALUES ('a', 'b')";
        assert_eq!(parse_sql(missing), Err(SqlError::MissingColumn("pickup_location")));

        let bad_slot = BOOKING_SQL.replace("'morning'", "'noon'");
        assert!(matches!(parse_sql(&bad_slot), Err(SqlError::Parse(_))));

        let unknown = "INSERT INTO bookings (name, colour) VALUES ('a', 'red')";
        assert_eq!(parse_sql(unknown), Err(SqlError::UnknownColumn("colour".into())));

        let arity = "INSERT INTO bookings (name, phone) VALUES ('a')";
        assert_eq!(parse_sql(arity), Err(SqlError::WrongArity("bookings", 2, 1)));
    }

    #[test]
    fn parse_insert_availability() {
        let sql = "INSERT INTO availability (date, morning_open, evening_open, max_per_slot) VALUES ('2026-03-10', true, false, 6)";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::InsertAvailability {
                date: "2026-03-10".into(),
                morning_open: true,
                evening_open: false,
                max_per_slot: Some(6),
            }
        );

        let defaults = "INSERT INTO availability (date) VALUES ('2026-03-11')";
        assert_eq!(
            parse_sql(defaults).unwrap(),
            Command::InsertAvailability {
                date: "2026-03-11".into(),
                morning_open: true,
                evening_open: true,
                max_per_slot: None,
            }
        );
    }

    #[test]
    fn parse_select_bookings() {
        assert_eq!(
            parse_sql("SELECT * FROM bookings WHERE date = '2026-03-10'").unwrap(),
            Command::SelectBookingsByDay { date: "2026-03-10".into() }
        );
        assert_eq!(
            parse_sql("SELECT * FROM bookings WHERE number = 'RS-260310-ABCDEF'").unwrap(),
            Command::SelectBooking { number: "RS-260310-ABCDEF".into() }
        );
        assert_eq!(
            parse_sql("SELECT * FROM bookings ORDER BY created_at DESC LIMIT 5").unwrap(),
            Command::SelectRecentBookings { limit: 5 }
        );
        assert_eq!(
            parse_sql("SELECT * FROM bookings").unwrap(),
            Command::SelectRecentBookings { limit: DEFAULT_RECENT_LIMIT }
        );
    }

    #[test]
    fn parse_select_availability() {
        assert_eq!(
            parse_sql("SELECT * FROM availability WHERE date = '2026-03-10'").unwrap(),
            Command::SelectAvailability { date: "2026-03-10".into() }
        );
        let range = Command::SelectCalendar { start: "2026-03-01".into(), end: "2026-03-31".into() };
        assert_eq!(
            parse_sql("SELECT * FROM availability WHERE date >= '2026-03-01' AND date <= '2026-03-31'").unwrap(),
            range
        );
        assert_eq!(
            parse_sql("SELECT * FROM availability WHERE date BETWEEN '2026-03-01' AND '2026-03-31'").unwrap(),
            range
        );
        assert_eq!(
            parse_sql("SELECT * FROM availability WHERE date >= '2026-03-01'"),
            Err(SqlError::MissingFilter("date <="))
        );
        assert_eq!(parse_sql("SELECT * FROM availability"), Err(SqlError::MissingFilter("date")));
    }

    #[test]
    fn parse_calls() {
        assert_eq!(
            parse_sql("CALL initialize_range('2026-03-01', '2026-03-31')").unwrap(),
            Command::InitializeRange {
                start: "2026-03-01".into(),
                end: "2026-03-31".into(),
                morning_open: true,
                evening_open: true,
                max_per_slot: None,
            }
        );
        assert_eq!(
            parse_sql("CALL initialize_range('2026-03-01', '2026-03-31', true, false, 4)").unwrap(),
            Command::InitializeRange {
                start: "2026-03-01".into(),
                end: "2026-03-31".into(),
                morning_open: true,
                evening_open: false,
                max_per_slot: Some(4),
            }
        );
        assert_eq!(
            parse_sql("CALL set_slot('2026-03-10', 'evening', false)").unwrap(),
            Command::SetSlot { date: "2026-03-10".into(), slot: Slot::Evening, open: false }
        );
        assert_eq!(
            parse_sql("CALL set_capacity('2026-03-10', 12)").unwrap(),
            Command::SetCapacity { date: "2026-03-10".into(), max_per_slot: 12 }
        );
        assert_eq!(
            parse_sql("CALL cancel_booking('RS-260310-ABCDEF')").unwrap(),
            Command::Transition { number: "RS-260310-ABCDEF".into(), status: BookingStatus::Cancelled }
        );
        assert_eq!(parse_sql("CALL repair_duplicates()").unwrap(), Command::RepairDuplicates);
        assert_eq!(parse_sql("CALL compact()").unwrap(), Command::Compact);
    }

    #[test]
    fn parse_call_errors() {
        assert_eq!(
            parse_sql("CALL set_capacity('2026-03-10')"),
            Err(SqlError::WrongArity("set_capacity", 2, 1))
        );
        assert_eq!(
            parse_sql("CALL set_capacity('2026-03-10', -1)"),
            Err(SqlError::Parse("-1 out of u32 range".into()))
        );
        assert_eq!(parse_sql("CALL launch()"), Err(SqlError::UnknownProcedure("launch".into())));
    }

    #[test]
    fn parse_unknown_table_errors() {
        assert_eq!(
            parse_sql("SELECT * FROM drivers WHERE date = '2026-03-10'"),
            Err(SqlError::UnknownTable("drivers".into()))
        );
    }

    #[test]
    fn parse_unsupported_and_empty() {
        assert!(matches!(parse_sql("DELETE FROM bookings WHERE number = 'x'"), Err(SqlError::Unsupported(_))));
        assert_eq!(parse_sql(""), Err(SqlError::Empty));
        assert!(matches!(parse_sql("SELEKT"), Err(SqlError::Parse(_))));
    }
}
