//! Заполнение базы тестовыми данными: два пользователя, месяц спектаклей
//! (один в день) и несколько броней. Повторный запуск безопасен.

use chrono::{Duration, Utc};
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use theater_assistant::services::auth::hash_password;

const REPERTOIRE: &[(&str, &str, &str)] = &[
    (
        "The Cherry Orchard",
        "Anton Chekhov",
        "M. Petrova, A. Ivanov, D. Sokolov",
    ),
    ("Hamlet", "William Shakespeare", "K. Orlov, E. Vasileva"),
    ("The Seagull", "Anton Chekhov", "N. Fedorova, P. Volkov"),
    ("Woe from Wit", "Alexander Griboyedov", "S. Morozov, T. Belova"),
    ("The Government Inspector", "Nikolai Gogol", "I. Kozlov, L. Pavlova"),
];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await?;

    sqlx::migrate!("./src/migrations").run(&pool).await?;

    // Пользователи
    for (username, email) in [("alice", "alice@example.com"), ("bob", "bob@example.com")] {
        sqlx::query(
            "INSERT INTO users (username, email, password_hash)
             VALUES ($1, $2, $3)
             ON CONFLICT DO NOTHING",
        )
        .bind(username)
        .bind(email)
        .bind(hash_password("password123")?)
        .execute(&pool)
        .await?;
    }

    let user_ids: Vec<i64> = sqlx::query_scalar("SELECT id FROM users ORDER BY id")
        .fetch_all(&pool)
        .await?;

    // Спектакли на четыре недели вперёд, один в день
    let today = Utc::now().date_naive();
    for day_offset in 0..28i64 {
        let (title, author, actors) = REPERTOIRE[day_offset as usize % REPERTOIRE.len()];
        let performance_id: i64 = sqlx::query_scalar(
            "INSERT INTO performances (date, title, author, actors)
             VALUES ($1, $2, $3, $4)
             RETURNING id",
        )
        .bind(today + Duration::days(day_offset))
        .bind(title)
        .bind(author)
        .bind(actors)
        .fetch_one(&pool)
        .await?;

        // Пара броней на каждый спектакль, места раскиданы по сетке
        for n in 0..(1 + day_offset % 3) {
            let seed = day_offset * 3 + n;
            let row = seed * 7 % 20 + 1;
            let letter = (b'A' + (seed * 5 % 17) as u8) as char;
            let user_id = user_ids[seed as usize % user_ids.len()];

            sqlx::query(
                "INSERT INTO bookings (performance_id, seat_code, user_id)
                 VALUES ($1, $2, $3)
                 ON CONFLICT (performance_id, seat_code) DO NOTHING",
            )
            .bind(performance_id)
            .bind(format!("{row}-{letter}"))
            .bind(user_id)
            .execute(&pool)
            .await?;
        }
    }

    info!("The database has been successfully filled.");
    Ok(())
}
