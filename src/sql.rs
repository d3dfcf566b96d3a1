use chrono::{NaiveDate, NaiveTime};
use sqlparser::ast::{self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::calendar::{DateOverride, WeeklyHours};
use crate::model::BookingStatus;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertRestaurant {
        id: Ulid,
        name: String,
        slug: String,
        slot_duration_minutes: u32,
    },
    InsertOperatingHours {
        restaurant_id: Ulid,
        hours: WeeklyHours,
    },
    InsertDateOverride {
        restaurant_id: Ulid,
        date: NaiveDate,
        hours: DateOverride,
    },
    DeleteDateOverride {
        restaurant_id: Ulid,
        date: NaiveDate,
    },
    InsertTable {
        id: Ulid,
        restaurant_id: Ulid,
        table_number: u32,
        capacity: u32,
    },
    InsertBooking {
        id: Ulid,
        restaurant_id: Ulid,
        date: NaiveDate,
        time: NaiveTime,
        party_size: u32,
        customer: Option<String>,
        notes: Option<String>,
        /// Staff-entered request that waits for confirmation without a table.
        pending: bool,
    },
    InsertBookingTransition {
        booking_id: Ulid,
        status: BookingStatus,
    },
    InsertTableAssignment {
        booking_id: Ulid,
        table_id: Ulid,
    },
    InsertWaitlistPromotion {
        entry_id: Ulid,
    },
    DeleteWaitlistEntry {
        id: Ulid,
    },
    InsertWalkIn {
        table_id: Ulid,
        party_size: Option<u32>,
    },
    InsertTableRelease {
        table_id: Ulid,
    },
    InsertTableMaintenance {
        table_id: Ulid,
        enabled: bool,
    },
    SelectRestaurants,
    SelectAvailableSlots {
        restaurant_id: Ulid,
        date: NaiveDate,
        party_size: u32,
    },
    SelectCandidateTables {
        restaurant_id: Ulid,
        date: NaiveDate,
        time: NaiveTime,
        party_size: u32,
    },
    SelectTables {
        restaurant_id: Ulid,
    },
    SelectBookings {
        restaurant_id: Ulid,
        date: Option<NaiveDate>,
    },
    SelectWaitlist {
        restaurant_id: Ulid,
        date: Option<NaiveDate>,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;

    match table.as_str() {
        "restaurants" => {
            expect_arity("restaurants", 4, &values)?;
            Ok(Command::InsertRestaurant {
                id: parse_ulid(&values[0])?,
                name: parse_text(&values[1])?,
                slug: parse_text(&values[2])?,
                slot_duration_minutes: parse_u32(&values[3])?,
            })
        }
        "operating_hours" => {
            expect_arity("operating_hours", 4, &values)?;
            let weekday = parse_u32(&values[1])?;
            let weekday = u8::try_from(weekday)
                .map_err(|_| SqlError::Parse(format!("{weekday} is not a weekday")))?;
            Ok(Command::InsertOperatingHours {
                restaurant_id: parse_ulid(&values[0])?,
                hours: WeeklyHours {
                    weekday,
                    opens_at: parse_time_or_midnight(&values[2])?,
                    closes_at: parse_time_or_midnight(&values[3])?,
                    is_closed: optional_bool(&values, 4)?,
                },
            })
        }
        "closed_dates" => {
            expect_arity("closed_dates", 2, &values)?;
            Ok(Command::InsertDateOverride {
                restaurant_id: parse_ulid(&values[0])?,
                date: parse_date(&values[1])?,
                hours: DateOverride::Closed,
            })
        }
        "custom_hours" => {
            expect_arity("custom_hours", 4, &values)?;
            Ok(Command::InsertDateOverride {
                restaurant_id: parse_ulid(&values[0])?,
                date: parse_date(&values[1])?,
                hours: DateOverride::Custom {
                    opens_at: parse_time_or_midnight(&values[2])?,
                    closes_at: parse_time_or_midnight(&values[3])?,
                    is_closed: optional_bool(&values, 4)?,
                },
            })
        }
        "tables" => {
            expect_arity("tables", 4, &values)?;
            Ok(Command::InsertTable {
                id: parse_ulid(&values[0])?,
                restaurant_id: parse_ulid(&values[1])?,
                table_number: parse_u32(&values[2])?,
                capacity: parse_u32(&values[3])?,
            })
        }
        "bookings" => {
            expect_arity("bookings", 5, &values)?;
            let pending = match values.get(7).map(parse_text_or_null).transpose()?.flatten() {
                None => false,
                Some(s) => match s.parse::<BookingStatus>() {
                    Ok(BookingStatus::Pending) => true,
                    Ok(BookingStatus::Confirmed) => false,
                    _ => {
                        return Err(SqlError::Parse(format!(
                            "new bookings start pending or confirmed, not {s:?}"
                        )));
                    }
                },
            };
            Ok(Command::InsertBooking {
                id: parse_ulid(&values[0])?,
                restaurant_id: parse_ulid(&values[1])?,
                date: parse_date(&values[2])?,
                time: parse_time(&values[3])?,
                party_size: parse_u32(&values[4])?,
                customer: values.get(5).map(parse_text_or_null).transpose()?.flatten(),
                notes: values.get(6).map(parse_text_or_null).transpose()?.flatten(),
                pending,
            })
        }
        "booking_transitions" => {
            expect_arity("booking_transitions", 2, &values)?;
            let status = parse_text(&values[1])?;
            Ok(Command::InsertBookingTransition {
                booking_id: parse_ulid(&values[0])?,
                status: status
                    .parse()
                    .map_err(|e| SqlError::Parse(format!("{e}")))?,
            })
        }
        "table_assignments" => {
            expect_arity("table_assignments", 2, &values)?;
            Ok(Command::InsertTableAssignment {
                booking_id: parse_ulid(&values[0])?,
                table_id: parse_ulid(&values[1])?,
            })
        }
        "waitlist_promotions" => {
            expect_arity("waitlist_promotions", 1, &values)?;
            Ok(Command::InsertWaitlistPromotion {
                entry_id: parse_ulid(&values[0])?,
            })
        }
        "walk_ins" => {
            expect_arity("walk_ins", 1, &values)?;
            let party_size = match values.get(1) {
                Some(expr) if !is_null(expr) => Some(parse_u32(expr)?),
                _ => None,
            };
            Ok(Command::InsertWalkIn {
                table_id: parse_ulid(&values[0])?,
                party_size,
            })
        }
        "table_releases" => {
            expect_arity("table_releases", 1, &values)?;
            Ok(Command::InsertTableRelease {
                table_id: parse_ulid(&values[0])?,
            })
        }
        "table_maintenance" => {
            expect_arity("table_maintenance", 2, &values)?;
            Ok(Command::InsertTableMaintenance {
                table_id: parse_ulid(&values[0])?,
                enabled: parse_bool(&values[1])?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;

    match table.as_str() {
        "waitlist" => Ok(Command::DeleteWaitlistEntry {
            id: extract_where_id(&delete.selection)?,
        }),
        "closed_dates" | "custom_hours" => {
            let filters = Filters::from_selection(delete.selection.as_ref())?;
            Ok(Command::DeleteDateOverride {
                restaurant_id: parse_ulid(filters.required("restaurant_id")?)?,
                date: parse_date(filters.required("date")?)?,
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

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;
    let filters = Filters::from_selection(select.selection.as_ref())?;

    match table.as_str() {
        "restaurants" => Ok(Command::SelectRestaurants),
        "available_slots" => Ok(Command::SelectAvailableSlots {
            restaurant_id: parse_ulid(filters.required("restaurant_id")?)?,
            date: parse_date(filters.required("date")?)?,
            party_size: parse_u32(filters.required("party_size")?)?,
        }),
        "candidate_tables" => Ok(Command::SelectCandidateTables {
            restaurant_id: parse_ulid(filters.required("restaurant_id")?)?,
            date: parse_date(filters.required("date")?)?,
            time: parse_time(filters.required("time")?)?,
            party_size: parse_u32(filters.required("party_size")?)?,
        }),
        "tables" => Ok(Command::SelectTables {
            restaurant_id: parse_ulid(filters.required("restaurant_id")?)?,
        }),
        "bookings" => Ok(Command::SelectBookings {
            restaurant_id: parse_ulid(filters.required("restaurant_id")?)?,
            date: filters.optional("date").map(parse_date).transpose()?,
        }),
        "waitlist" => Ok(Command::SelectWaitlist {
            restaurant_id: parse_ulid(filters.required("restaurant_id")?)?,
            date: filters.optional("date").map(parse_date).transpose()?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// `column = value` terms of a WHERE clause joined by AND.
struct Filters<'a> {
    terms: Vec<(String, &'a Expr)>,
}

impl<'a> Filters<'a> {
    fn from_selection(selection: Option<&'a Expr>) -> Result<Self, SqlError> {
        let mut terms = Vec::new();
        if let Some(expr) = selection {
            collect_equalities(expr, &mut terms)?;
        }
        Ok(Self { terms })
    }

    fn optional(&self, column: &str) -> Option<&'a Expr> {
        self.terms
            .iter()
            .find(|(col, _)| col == column)
            .map(|(_, expr)| *expr)
    }

    fn required(&self, column: &'static str) -> Result<&'a Expr, SqlError> {
        self.optional(column).ok_or(SqlError::MissingFilter(column))
    }
}

fn collect_equalities<'a>(expr: &'a Expr, out: &mut Vec<(String, &'a Expr)>) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_equalities(inner, out),
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::And,
            right,
        } => {
            collect_equalities(left, out)?;
            collect_equalities(right, out)
        }
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            let col = expr_column_name(left)
                .ok_or_else(|| SqlError::Unsupported(format!("filter on {left}")))?;
            out.push((col, right.as_ref()));
            Ok(())
        }
        other => Err(SqlError::Unsupported(format!("filter {other}"))),
    }
}

// ── Helpers ───────────────────────────────────────────────────

fn expect_arity(table: &'static str, at_least: usize, values: &[Expr]) -> Result<(), SqlError> {
    if values.len() < at_least {
        return Err(SqlError::WrongArity(table, at_least, values.len()));
    }
    Ok(())
}

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
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
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

/// Values of a single-row INSERT.
fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
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

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            if expr_column_name(left).as_deref() == Some("id") {
                parse_ulid(right)
            } else {
                Err(SqlError::MissingFilter("id"))
            }
        }
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
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_text_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    if is_null(expr) {
        Ok(None)
    } else {
        parse_text(expr).map(Some)
    }
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = parse_text(expr)?;
    Ulid::from_string(&s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
}

fn parse_date(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_text(expr)?;
    NaiveDate::parse_from_str(&s, "%Y-%m-%d").map_err(|e| SqlError::Parse(format!("bad date {s:?}: {e}")))
}

/// Accepts `HH:MM` and `HH:MM:SS`.
fn parse_time(expr: &Expr) -> Result<NaiveTime, SqlError> {
    let s = parse_text(expr)?;
    NaiveTime::parse_from_str(&s, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(&s, "%H:%M"))
        .map_err(|e| SqlError::Parse(format!("bad time {s:?}: {e}")))
}

/// Hours rows for a closed day may leave their times NULL.
fn parse_time_or_midnight(expr: &Expr) -> Result<NaiveTime, SqlError> {
    if is_null(expr) {
        Ok(NaiveTime::default())
    } else {
        parse_time(expr)
    }
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad integer: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Boolean(b) => Ok(*b),
            Value::SingleQuotedString(s) => match s.to_lowercase().as_str() {
                "true" | "t" | "1" => Ok(true),
                "false" | "f" | "0" => Ok(false),
                _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
            },
            Value::Number(n, _) => Ok(n != "0"),
            _ => Err(SqlError::Parse(format!("expected bool, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

/// Trailing boolean column; absent or NULL means false.
fn optional_bool(values: &[Expr], idx: usize) -> Result<bool, SqlError> {
    match values.get(idx) {
        Some(expr) if !is_null(expr) => parse_bool(expr),
        _ => Ok(false),
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum SqlError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("empty query")]
    Empty,
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("unknown table: {0}")]
    UnknownTable(String),
    #[error("{0}: expected {1} values, got {2}")]
    WrongArity(&'static str, usize, usize),
    #[error("missing filter: {0}")]
    MissingFilter(&'static str),
}
