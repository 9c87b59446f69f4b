//! auth.rs
//!
//! Выпуск и проверка JWT-токенов доступа плюс хеширование паролей.
//!
//! Токен - HS256, sub = id пользователя, срок жизни из конфига. Протухший,
//! но корректно подписанный токен различается от невалидного: HTTP-слой
//! перевыпускает его (silent refresh), WebSocket-слой - нет.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, errors::ErrorKind, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
}

/// Результат проверки токена.
#[derive(Debug, PartialEq)]
pub enum TokenCheck {
    /// Подпись и срок действия в порядке, внутри - id пользователя.
    Valid(i64),
    /// Подпись в порядке, но срок истёк. HTTP-путь может перевыпустить.
    Expired(i64),
    /// Всё остальное: битая подпись, мусор вместо sub и т.д.
    Invalid,
}

pub fn create_access_token(user_id: i64, secret: &str, expires_in_hours: i64) -> String {
    let claims = Claims {
        sub: user_id.to_string(),
        exp: (Utc::now() + Duration::hours(expires_in_hours)).timestamp(),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .expect("JWT encoding cannot fail with HS256")
}

pub fn inspect_token(token: &str, secret: &str) -> TokenCheck {
    let key = DecodingKey::from_secret(secret.as_bytes());

    match decode::<Claims>(token, &key, &Validation::default()) {
        Ok(data) => match data.claims.sub.parse::<i64>() {
            Ok(id) => TokenCheck::Valid(id),
            Err(_) => TokenCheck::Invalid,
        },
        Err(e) if matches!(e.kind(), ErrorKind::ExpiredSignature) => {
            // Подпись сошлась, истёк только срок - декодируем ещё раз без
            // проверки exp, чтобы достать sub для перевыпуска
            let mut validation = Validation::default();
            validation.validate_exp = false;
            match decode::<Claims>(token, &key, &validation) {
                Ok(data) => match data.claims.sub.parse::<i64>() {
                    Ok(id) => TokenCheck::Expired(id),
                    Err(_) => TokenCheck::Invalid,
                },
                Err(_) => TokenCheck::Invalid,
            }
        }
        Err(_) => TokenCheck::Invalid,
    }
}

pub fn hash_password(password: &str) -> Result<String, bcrypt::BcryptError> {
    bcrypt::hash(password, bcrypt::DEFAULT_COST)
}

pub fn verify_password(password: &str, password_hash: &str) -> bool {
    bcrypt::verify(password, password_hash).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret";

    #[test]
    fn token_round_trip() {
        let token = create_access_token(42, SECRET, 24);
        assert_eq!(inspect_token(&token, SECRET), TokenCheck::Valid(42));
    }

    #[test]
    fn expired_token_keeps_subject() {
        // Отрицательный срок жизни -> exp в прошлом
        let token = create_access_token(7, SECRET, -1);
        assert_eq!(inspect_token(&token, SECRET), TokenCheck::Expired(7));
    }

    #[test]
    fn wrong_secret_is_invalid() {
        let token = create_access_token(42, SECRET, 24);
        assert_eq!(inspect_token(&token, "other-secret"), TokenCheck::Invalid);
    }

    #[test]
    fn garbage_is_invalid() {
        assert_eq!(inspect_token("not-a-jwt", SECRET), TokenCheck::Invalid);
    }

    #[test]
    fn password_hash_verifies() {
        let hash = hash_password("s3cret-pass").unwrap();
        assert!(verify_password("s3cret-pass", &hash));
        assert!(!verify_password("wrong", &hash));
    }
}
