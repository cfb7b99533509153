use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use uuid::Uuid;

use crate::config::JwtConfig;
use crate::error::{AppError, Result};
use crate::models::{Claims, CurrentUser, UserRole};

/// Bearer token issuing and validation
pub struct AuthService;

impl AuthService {
    /// Issue an HS256 token for `subject` signed with the current secret
    pub fn issue_token(
        config: &JwtConfig,
        subject: &str,
        role: UserRole,
        valid_hours: i64,
    ) -> Result<String> {
        let now = Utc::now();
        let exp = Duration::try_hours(valid_hours)
            .and_then(|validity| now.checked_add_signed(validity))
            .ok_or_else(|| {
                AppError::BadRequest(format!("Token validity of {} hours is out of range", valid_hours))
            })?;

        let claims = Claims {
            sub: subject.to_string(),
            role: role.as_str().to_string(),
            jti: Uuid::new_v4().to_string(),
            exp: exp.timestamp().max(0) as usize,
            iat: now.timestamp() as usize,
        };

        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(config.secret.as_bytes()),
        )?;

        Ok(token)
    }

    /// Validate a token against the current secret, then any previous ones
    pub fn validate_token(token: &str, config: &JwtConfig) -> Result<Claims> {
        let mut validation = Validation::default();
        validation.validate_exp = true;

        let keys = std::iter::once(config.secret.as_str())
            .chain(config.previous_secrets.iter().map(|s| s.as_str()));

        for secret in keys {
            if let Ok(token_data) = decode::<Claims>(
                token,
                &DecodingKey::from_secret(secret.as_bytes()),
                &validation,
            ) {
                return Ok(token_data.claims);
            }
        }

        Err(AppError::Unauthorized("Invalid token".to_string()))
    }

    /// Validate a token and turn its claims into the request identity
    pub fn authenticate(token: &str, config: &JwtConfig) -> Result<CurrentUser> {
        let claims = Self::validate_token(token, config)?;
        if claims.sub.is_empty() {
            return Err(AppError::Unauthorized("Token has no subject".to_string()));
        }
        let role = UserRole::from_str(&claims.role)
            .ok_or_else(|| AppError::Unauthorized(format!("Unknown role '{}'", claims.role)))?;
        Ok(CurrentUser {
            id: claims.sub,
            role,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jwt(secret: &str, previous: &[&str]) -> JwtConfig {
        JwtConfig {
            secret: secret.to_string(),
            previous_secrets: previous.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_issue_and_authenticate() {
        let config = jwt("current", &[]);
        let token = AuthService::issue_token(&config, "worker-1", UserRole::Worker, 1).unwrap();

        let user = AuthService::authenticate(&token, &config).unwrap();
        assert_eq!(user.id, "worker-1");
        assert_eq!(user.role, UserRole::Worker);
        assert!(user.can_convert());
        assert!(!user.is_admin());
    }

    #[test]
    fn test_previous_secret_still_accepted() {
        let old = jwt("old", &[]);
        let token = AuthService::issue_token(&old, "alice", UserRole::User, 1).unwrap();

        let rotated = jwt("new", &["old"]);
        assert_eq!(AuthService::validate_token(&token, &rotated).unwrap().sub, "alice");

        let forgotten = jwt("new", &[]);
        assert!(matches!(
            AuthService::validate_token(&token, &forgotten),
            Err(AppError::Unauthorized(_))
        ));
    }

    #[test]
    fn test_expired_token_rejected() {
        let config = jwt("current", &[]);
        let token = AuthService::issue_token(&config, "alice", UserRole::Admin, -2).unwrap();
        assert!(AuthService::authenticate(&token, &config).is_err());
    }

    #[test]
    fn test_out_of_range_validity_rejected() {
        let config = jwt("current", &[]);
        assert!(matches!(
            AuthService::issue_token(&config, "alice", UserRole::User, i64::MAX),
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(
            AuthService::issue_token(&config, "alice", UserRole::User, i64::MIN),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn test_unknown_role_claim_rejected() {
        let config = jwt("current", &[]);
        let claims = Claims {
            sub: "mallory".to_string(),
            role: "superuser".to_string(),
            jti: Uuid::new_v4().to_string(),
            exp: (Utc::now().timestamp() + 3600) as usize,
            iat: Utc::now().timestamp() as usize,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(config.secret.as_bytes()),
        )
        .unwrap();

        assert!(matches!(
            AuthService::authenticate(&token, &config),
            Err(AppError::Unauthorized(_))
        ));
    }
}
