//! ledger.rs
//!
//! Книга бронирований: все операции над спектаклями и местами, которые
//! доступны ассистенту через инструменты.
//!
//! Ключевые моменты:
//! 1.  Все операции возвращают готовый человекочитаемый текст, а не коды -
//!     потребитель этих строк не фронтенд, а языковая модель.
//! 2.  Код места нормализуется в верхний регистр до любого обращения к БД,
//!     поэтому "3-b" и "3-B" - одно и то же место.
//! 3.  Гонка двух бронирований одного места разрешается constraint'ом
//!     UNIQUE (performance_id, seat_code): предварительная проверка - только
//!     быстрый путь для внятного сообщения, финальный арбитр - сама БД.

use chrono::NaiveDate;
use regex::Regex;
use sqlx::PgPool;
use std::sync::LazyLock;

use crate::models::{Booking, Performance};

// Ряд 1-20, буква A-Q (после приведения к верхнему регистру)
static SEAT_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(1[0-9]|20|[1-9])-[A-Q]$").expect("seat code regex is valid"));

/// Синтаксическая проверка кода места. Чистая функция, регистр не важен.
pub fn is_valid_seat(code: &str) -> bool {
    SEAT_CODE.is_match(&code.trim().to_uppercase())
}

fn normalize_seat(code: &str) -> String {
    code.trim().to_uppercase()
}

/// Список спектаклей за период, отсортированный по дате.
/// Открытые границы периода означают "без ограничения" с этой стороны.
pub async fn list_performances(
    pool: &PgPool,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
) -> Result<String, sqlx::Error> {
    let performances = sqlx::query_as::<_, Performance>(
        r#"
        SELECT id, date, title, author, actors
        FROM performances
        WHERE ($1::date IS NULL OR date >= $1)
          AND ($2::date IS NULL OR date <= $2)
        ORDER BY date
        "#,
    )
    .bind(start_date)
    .bind(end_date)
    .fetch_all(pool)
    .await?;

    if performances.is_empty() {
        return Ok("No performances found for the specified period.".to_string());
    }

    Ok(performances
        .iter()
        .map(|p| format!("{}. {} - {}", p.id, p.title, p.date))
        .collect::<Vec<_>>()
        .join("\n"))
}

/// Спектакли, на которые у пользователя есть бронь (inner join по bookings).
pub async fn my_list_performances(
    pool: &PgPool,
    user_id: i64,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
) -> Result<String, sqlx::Error> {
    let performances = sqlx::query_as::<_, Performance>(
        r#"
        SELECT p.id, p.date, p.title, p.author, p.actors
        FROM performances p
        JOIN bookings b ON b.performance_id = p.id
        WHERE b.user_id = $1
          AND ($2::date IS NULL OR p.date >= $2)
          AND ($3::date IS NULL OR p.date <= $3)
        ORDER BY p.date
        "#,
    )
    .bind(user_id)
    .bind(start_date)
    .bind(end_date)
    .fetch_all(pool)
    .await?;

    if performances.is_empty() {
        return Ok("You have no booked performances for the selected dates.".to_string());
    }

    Ok(performances
        .iter()
        .map(|p| {
            format!(
                "{}: {} — {}",
                p.date,
                p.title,
                p.author.as_deref().unwrap_or("Author Unknown")
            )
        })
        .collect::<Vec<_>>()
        .join("\n"))
}

/// Свободно ли место. Быстрый путь перед book: даёт внятное сообщение,
/// но ничего не гарантирует - гарантию даёт constraint при insert.
pub async fn check_seat_available(
    pool: &PgPool,
    performance_id: i64,
    seat_code: &str,
) -> Result<(bool, String), sqlx::Error> {
    let seat_code = normalize_seat(seat_code);
    let existing = sqlx::query_as::<_, Booking>(
        "SELECT id, user_id, performance_id, seat_code
         FROM bookings
         WHERE performance_id = $1 AND seat_code = $2",
    )
    .bind(performance_id)
    .bind(&seat_code)
    .fetch_optional(pool)
    .await?;

    if existing.is_some() {
        Ok((false, format!("Ticket for seat {seat_code} is already taken.")))
    } else {
        Ok((true, format!("Seat {seat_code} is available.")))
    }
}

/// Бронирование места. Синтаксис -> доступность -> insert.
/// Проигравший гонку insert получает то же сообщение "already taken",
/// что и при обычной занятости места.
pub async fn book_ticket(
    pool: &PgPool,
    performance_id: i64,
    seat_code: &str,
    user_id: i64,
) -> Result<String, sqlx::Error> {
    if !is_valid_seat(seat_code) {
        return Ok(format!(
            "Invalid seat format: {seat_code}. Use format 3-B or 17-H."
        ));
    }
    let seat_code = normalize_seat(seat_code);

    let (is_free, message) = check_seat_available(pool, performance_id, &seat_code).await?;
    if !is_free {
        return Ok(message);
    }

    let inserted = sqlx::query(
        "INSERT INTO bookings (performance_id, seat_code, user_id) VALUES ($1, $2, $3)",
    )
    .bind(performance_id)
    .bind(&seat_code)
    .bind(user_id)
    .execute(pool)
    .await;

    match inserted {
        Ok(_) => Ok(format!("Ticket for seat {seat_code} successfully booked.")),
        // Гонка: оба прошли проверку, второй insert упёрся в UNIQUE
        Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
            Ok(format!("Ticket for seat {seat_code} is already taken."))
        }
        Err(e) => Err(e),
    }
}

/// Отмена брони. Удаляет только точную тройку (спектакль, место, владелец);
/// чужая или несуществующая бронь дают одинаковый ответ "not found",
/// чтобы не раскрывать брони других пользователей.
pub async fn cancel_booking(
    pool: &PgPool,
    performance_id: i64,
    seat_code: &str,
    user_id: i64,
) -> Result<String, sqlx::Error> {
    let seat_code = normalize_seat(seat_code);

    let deleted = sqlx::query(
        "DELETE FROM bookings WHERE performance_id = $1 AND seat_code = $2 AND user_id = $3",
    )
    .bind(performance_id)
    .bind(&seat_code)
    .bind(user_id)
    .execute(pool)
    .await?;

    if deleted.rows_affected() == 0 {
        Ok(format!("Booking for seat {seat_code} not found."))
    } else {
        Ok(format!("Booking for seat {seat_code} successfully cancelled."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn accepts_boundary_rows_and_letters() {
        assert!(is_valid_seat("1-A"));
        assert!(is_valid_seat("20-Q"));
        assert!(is_valid_seat("10-H"));
    }

    #[test]
    fn accepts_lowercase() {
        assert!(is_valid_seat("3-b"));
        assert!(is_valid_seat("17-h"));
    }

    #[test]
    fn rejects_out_of_range() {
        assert!(!is_valid_seat("0-A"));
        assert!(!is_valid_seat("21-A"));
        assert!(!is_valid_seat("3-R"));
        assert!(!is_valid_seat("3-Z"));
    }

    #[test]
    fn rejects_malformed() {
        assert!(!is_valid_seat(""));
        assert!(!is_valid_seat("3B"));
        assert!(!is_valid_seat("3--B"));
        assert!(!is_valid_seat("03-B"));
        assert!(!is_valid_seat("3-BB"));
        assert!(!is_valid_seat("B-3"));
        assert!(!is_valid_seat("3-"));
        assert!(!is_valid_seat("-B"));
    }

    #[test]
    fn normalizes_to_upper() {
        assert_eq!(normalize_seat(" 3-b "), "3-B");
    }

    proptest! {
        // Вся сетка 20 x 17 принимается в любом регистре
        #[test]
        fn accepts_entire_seat_grid(row in 1u32..=20, idx in 0u8..17, lower in any::<bool>()) {
            let letter = (b'A' + idx) as char;
            let letter = if lower { letter.to_ascii_lowercase() } else { letter };
            let seat = format!("{}-{}", row, letter);
            prop_assert!(is_valid_seat(&seat));
        }

        #[test]
        fn rejects_rows_above_twenty(row in 21u32..10_000, idx in 0u8..17) {
            let letter = (b'A' + idx) as char;
            let seat = format!("{}-{}", row, letter);
            prop_assert!(!is_valid_seat(&seat));
        }

        #[test]
        fn rejects_letters_after_q(row in 1u32..=20, idx in 17u8..26) {
            let letter = (b'A' + idx) as char;
            let seat = format!("{}-{}", row, letter);
            prop_assert!(!is_valid_seat(&seat));
        }
    }
}
