//! tools.rs
//!
//! Каталог инструментов, которые ассистент может вызывать, и диспетчер,
//! который превращает tool call модели в вызов книги бронирований.
//!
//! Аргументы tool call'а - недоверенный JSON от модели. Для инструментов,
//! привязанных к личности (`identity_bound`), диспетчер перезаписывает
//! user_id аутентифицированным id ДО разбора аргументов: модель никогда
//! не выбирает, от чьего имени действует.

use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::PgPool;
use thiserror::Error;

use crate::services::ledger;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    Unknown(String),
    #[error("Invalid arguments for {tool}: {message}")]
    InvalidArguments { tool: String, message: String },
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Одна запись каталога: имя, описание и schema параметров для модели.
/// Добавление инструмента = новая запись здесь + ветка в execute.
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: fn() -> Value,
    /// user_id подставляется из аутентифицированной сессии
    pub identity_bound: bool,
}

pub const TOOLS: &[ToolSpec] = &[
    ToolSpec {
        name: "list_performances",
        description: "Get a list of theater performances by date",
        parameters: list_performances_params,
        identity_bound: false,
    },
    ToolSpec {
        name: "book_ticket",
        description: "Book a ticket for a performance",
        parameters: book_ticket_params,
        identity_bound: true,
    },
    ToolSpec {
        name: "cancel_booking",
        description: "Cancel a seat booking",
        parameters: cancel_booking_params,
        identity_bound: true,
    },
    ToolSpec {
        name: "my_list_performances",
        description: "View a list of performances for which you have booked tickets.",
        parameters: my_list_performances_params,
        identity_bound: true,
    },
];

fn list_performances_params() -> Value {
    json!({
        "type": "object",
        "properties": {
            "start_date": {"type": "string", "format": "date"},
            "end_date": {"type": "string", "format": "date"}
        }
    })
}

fn book_ticket_params() -> Value {
    json!({
        "type": "object",
        "properties": {
            "performance_id": {"type": "integer"},
            "seat_code": {
                "type": "string",
                "description": "Seat code in XX-Y format, e.g., 3-B or 17-H"
            }
        },
        "required": ["performance_id", "seat_code"]
    })
}

fn cancel_booking_params() -> Value {
    json!({
        "type": "object",
        "properties": {
            "performance_id": {"type": "integer"},
            "seat_code": {
                "type": "string",
                "description": "Seat code in XX-Y format"
            }
        },
        "required": ["performance_id", "seat_code"]
    })
}

fn my_list_performances_params() -> Value {
    json!({
        "type": "object",
        "properties": {
            "start_date": {
                "type": "string",
                "format": "date",
                "description": "Start date of the period (YYYY-MM-DD format)"
            },
            "end_date": {
                "type": "string",
                "format": "date",
                "description": "End date of the period (YYYY-MM-DD format)"
            }
        }
    })
}

pub fn resolve(name: &str) -> Option<&'static ToolSpec> {
    TOOLS.iter().find(|t| t.name == name)
}

/// Конфигурация всех инструментов в формате chat completions API.
pub fn tool_configs() -> Vec<Value> {
    TOOLS
        .iter()
        .map(|t| {
            json!({
                "type": "function",
                "function": {
                    "name": t.name,
                    "description": t.description,
                    "parameters": (t.parameters)()
                }
            })
        })
        .collect()
}

/// Перезапись (не merge) user_id доверенным значением.
fn bind_identity(args: &mut Value, user_id: i64) {
    if let Some(map) = args.as_object_mut() {
        map.insert("user_id".to_string(), json!(user_id));
    }
}

#[derive(Debug, Deserialize)]
struct PeriodArgs {
    #[serde(default)]
    start_date: Option<NaiveDate>,
    #[serde(default)]
    end_date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
struct MyPeriodArgs {
    user_id: i64,
    #[serde(default)]
    start_date: Option<NaiveDate>,
    #[serde(default)]
    end_date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
struct SeatArgs {
    performance_id: i64,
    seat_code: String,
    user_id: i64,
}

fn decode<T: serde::de::DeserializeOwned>(tool: &str, args: Value) -> Result<T, ToolError> {
    serde_json::from_value(args).map_err(|e| ToolError::InvalidArguments {
        tool: tool.to_string(),
        message: e.to_string(),
    })
}

/// Выполнить один tool call: найти инструмент, подставить личность,
/// разобрать аргументы, вызвать обработчик. Результат - текст для
/// транскрипта; ошибки БД пробрасываются наверх как есть.
pub async fn dispatch_tool_call(
    pool: &PgPool,
    user_id: i64,
    name: &str,
    raw_arguments: &str,
) -> Result<String, ToolError> {
    let spec = resolve(name).ok_or_else(|| ToolError::Unknown(name.to_string()))?;

    let mut args: Value =
        serde_json::from_str(raw_arguments).map_err(|e| ToolError::InvalidArguments {
            tool: name.to_string(),
            message: e.to_string(),
        })?;

    if spec.identity_bound {
        bind_identity(&mut args, user_id);
    }

    match spec.name {
        "list_performances" => {
            let a: PeriodArgs = decode(name, args)?;
            Ok(ledger::list_performances(pool, a.start_date, a.end_date).await?)
        }
        "my_list_performances" => {
            let a: MyPeriodArgs = decode(name, args)?;
            Ok(ledger::my_list_performances(pool, a.user_id, a.start_date, a.end_date).await?)
        }
        "book_ticket" => {
            let a: SeatArgs = decode(name, args)?;
            Ok(ledger::book_ticket(pool, a.performance_id, &a.seat_code, a.user_id).await?)
        }
        "cancel_booking" => {
            let a: SeatArgs = decode(name, args)?;
            Ok(ledger::cancel_booking(pool, a.performance_id, &a.seat_code, a.user_id).await?)
        }
        _ => Err(ToolError::Unknown(name.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_has_exactly_four_tools() {
        let names: Vec<_> = TOOLS.iter().map(|t| t.name).collect();
        assert_eq!(
            names,
            vec![
                "list_performances",
                "book_ticket",
                "cancel_booking",
                "my_list_performances"
            ]
        );
    }

    #[test]
    fn identity_bound_tools_match_contract() {
        for t in TOOLS {
            let expected = matches!(
                t.name,
                "book_ticket" | "cancel_booking" | "my_list_performances"
            );
            assert_eq!(t.identity_bound, expected, "tool {}", t.name);
        }
    }

    #[test]
    fn unknown_tool_does_not_resolve() {
        assert!(resolve("drop_all_tables").is_none());
        assert!(resolve("list_performances").is_some());
    }

    #[test]
    fn configs_are_function_shaped() {
        for config in tool_configs() {
            assert_eq!(config["type"], "function");
            let function = &config["function"];
            assert!(function["name"].is_string());
            assert!(function["description"].is_string());
            assert_eq!(function["parameters"]["type"], "object");
        }
    }

    #[test]
    fn booking_tools_require_performance_and_seat() {
        for name in ["book_ticket", "cancel_booking"] {
            let params = (resolve(name).unwrap().parameters)();
            let required: Vec<_> = params["required"]
                .as_array()
                .unwrap()
                .iter()
                .map(|v| v.as_str().unwrap())
                .collect();
            assert_eq!(required, vec!["performance_id", "seat_code"]);
        }
    }

    #[test]
    fn spoofed_user_id_is_overwritten() {
        let mut args = json!({"performance_id": 7, "seat_code": "3-B", "user_id": 999});
        bind_identity(&mut args, 1);
        assert_eq!(args["user_id"], json!(1));
    }

    #[test]
    fn missing_user_id_is_injected() {
        let mut args = json!({"performance_id": 7, "seat_code": "3-B"});
        bind_identity(&mut args, 42);
        assert_eq!(args["user_id"], json!(42));
    }

    #[test]
    fn period_args_accept_missing_bounds() {
        let a: PeriodArgs = decode("list_performances", json!({})).unwrap();
        assert!(a.start_date.is_none() && a.end_date.is_none());

        let a: PeriodArgs =
            decode("list_performances", json!({"start_date": "2026-08-06"})).unwrap();
        assert_eq!(a.start_date.unwrap().to_string(), "2026-08-06");
    }

    #[test]
    fn bad_date_is_invalid_arguments() {
        let err = decode::<PeriodArgs>("list_performances", json!({"start_date": "tomorrow"}))
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments { .. }));
    }
}
