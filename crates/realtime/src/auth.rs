use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Passenger,
    Driver,
    Admin,
}

impl Role {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "passenger" => Some(Self::Passenger),
            "driver" => Some(Self::Driver),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: String,
    pub exp: usize,
}

#[derive(Debug, Clone)]
pub struct AuthContext {
    /// `None` for guest passengers.
    pub user_id: Option<String>,
    pub role: Role,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("missing token")]
    MissingToken,
    #[error("invalid token")]
    InvalidToken,
    #[error("role not permitted on this namespace")]
    Forbidden,
}

#[derive(Clone)]
pub struct Authenticator {
    key: DecodingKey,
}

impl Authenticator {
    pub fn new(secret: &str) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    fn claims(&self, token: &str) -> Result<Claims, AuthError> {
        decode::<Claims>(token, &self.key, &Validation::default())
            .map(|data| data.claims)
            .map_err(|_| AuthError::InvalidToken)
    }

    /// Passenger sockets may connect as guests; a present token must still
    /// be valid.
    pub fn passenger(&self, token: Option<&str>) -> Result<AuthContext, AuthError> {
        match token {
            None => Ok(AuthContext {
                user_id: None,
                role: Role::Passenger,
            }),
            Some(token) => {
                let claims = self.claims(token)?;
                Ok(AuthContext {
                    user_id: Some(claims.sub),
                    role: Role::parse(&claims.role).unwrap_or(Role::Passenger),
                })
            }
        }
    }

    pub fn driver(&self, token: Option<&str>) -> Result<AuthContext, AuthError> {
        let claims = self.claims(token.ok_or(AuthError::MissingToken)?)?;
        match Role::parse(&claims.role) {
            Some(Role::Driver) => Ok(AuthContext {
                user_id: Some(claims.sub),
                role: Role::Driver,
            }),
            _ => Err(AuthError::Forbidden),
        }
    }

    pub fn admin(&self, token: Option<&str>) -> Result<AuthContext, AuthError> {
        let claims = self.claims(token.ok_or(AuthError::MissingToken)?)?;
        match Role::parse(&claims.role) {
            Some(Role::Admin) => Ok(AuthContext {
                user_id: Some(claims.sub),
                role: Role::Admin,
            }),
            _ => Err(AuthError::Forbidden),
        }
    }
}

#[cfg(test)]
mod tests {
    use jsonwebtoken::{encode, EncodingKey, Header};

    use super::*;

    fn token(secret: &str, role: &str) -> String {
        let claims = Claims {
            sub: "u1".to_owned(),
            role: role.to_owned(),
            exp: (utility::time::epoch_ms() / 1000 + 3600) as usize,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn guest_passenger_is_allowed() {
        let auth = Authenticator::new("secret");
        let context = auth.passenger(None).unwrap();
        assert_eq!(context.role, Role::Passenger);
        assert!(context.user_id.is_none());
    }

    #[test]
    fn driver_requires_driver_role() {
        let auth = Authenticator::new("secret");
        let driver_token = token("secret", "driver");
        assert!(auth.driver(Some(&driver_token)).is_ok());

        let passenger_token = token("secret", "passenger");
        assert!(matches!(
            auth.driver(Some(&passenger_token)),
            Err(AuthError::Forbidden)
        ));
        assert!(matches!(auth.driver(None), Err(AuthError::MissingToken)));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let auth = Authenticator::new("secret");
        let forged = token("other-secret", "admin");
        assert!(matches!(
            auth.admin(Some(&forged)),
            Err(AuthError::InvalidToken)
        ));
    }

    #[test]
    fn admin_role_is_enforced() {
        let auth = Authenticator::new("secret");
        let admin_token = token("secret", "admin");
        assert!(auth.admin(Some(&admin_token)).is_ok());
        let driver_token = token("secret", "driver");
        assert!(matches!(
            auth.admin(Some(&driver_token)),
            Err(AuthError::Forbidden)
        ));
    }
}
