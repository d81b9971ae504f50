// src/session.rs
//
// The one session object of the client. It is built once at start-up from
// storage; `login` and `logout` are the only operations that change it.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::api_client::RrhhClient;
use crate::attendance::EmployeeId;
use crate::clock::Clock;
use crate::error::{Result, RrhhError};
use crate::storage::{get_json, set_json, KeyValueStore};

pub const AUTH_TOKEN_KEY: &str = "auth_token";
pub const AUTH_EXPIRES_KEY: &str = "auth_expires";
pub const USER_DATA_KEY: &str = "user_data";
pub const REMEMBERED_USER_KEY: &str = "remembered_user";

pub const ROLE_ADMIN: &str = "ADMIN";
pub const ROLE_EMPLEADO: &str = "EMPLEADO";

pub const PUBLIC_ROUTES: [&str; 2] = ["/login", "/forgot-password"];

const CLAIM_ROLE: &str = "http://schemas.microsoft.com/ws/2008/06/identity/claims/role";
const CLAIM_NAME: &str = "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/name";
const CLAIM_NAME_ID: &str =
    "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/nameidentifier";

#[derive(Clone, Serialize)]
pub struct LoginCredentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for LoginCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginCredentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResponse {
    pub token: String,
    #[serde(default)]
    pub expiration: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserData {
    pub user_id: i64,
    pub username: String,
    #[serde(default)]
    pub employee_id: Option<EmployeeId>,
    #[serde(default)]
    pub employee_code: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub department_id: Option<i64>,
    #[serde(default)]
    pub position_id: Option<i64>,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub role_ids: Vec<i64>,
}

fn claim_str<'a>(payload: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|key| payload.get(*key))
        .find_map(|value| value.as_str())
        .filter(|s| !s.trim().is_empty())
}

fn claim_i64(payload: &Value, keys: &[&str]) -> Option<i64> {
    keys.iter()
        .filter_map(|key| payload.get(*key))
        .find_map(|value| match value {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        })
}

// Zero means "not set" in these claims.
fn claim_id(payload: &Value, key: &str) -> Option<i64> {
    claim_i64(payload, &[key]).filter(|id| *id != 0)
}

/// Reads the user claims from a JWT payload. The signature is not checked; the
/// backend verifies the token on every request.
pub fn decode_jwt(token: &str) -> Result<UserData> {
    let payload_segment = token
        .split('.')
        .nth(1)
        .ok_or_else(|| RrhhError::InvalidToken("token has no payload segment".to_string()))?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload_segment.trim_end_matches('='))
        .map_err(|e| RrhhError::InvalidToken(format!("payload is not base64url: {}", e)))?;
    let payload: Value = serde_json::from_slice(&bytes)?;

    let user_id = claim_i64(&payload, &["UserId", CLAIM_NAME_ID])
        .ok_or_else(|| RrhhError::InvalidToken("missing user id claim".to_string()))?;
    let username = claim_str(&payload, &[CLAIM_NAME, "Username"])
        .unwrap_or_default()
        .to_string();

    let roles = match payload.get(CLAIM_ROLE) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        Some(Value::String(role)) => vec![role.clone()],
        _ => Vec::new(),
    };

    let role_ids = match payload.get("RoleId") {
        Some(Value::Number(n)) => n.as_i64().into_iter().collect(),
        Some(Value::String(s)) => s
            .split(',')
            .filter_map(|part| part.trim().parse().ok())
            .collect(),
        _ => Vec::new(),
    };

    Ok(UserData {
        user_id,
        username,
        employee_id: claim_id(&payload, "EmployeeId"),
        employee_code: claim_str(&payload, &["EmployeeCode"]).map(str::to_string),
        full_name: claim_str(&payload, &["FullName"]).map(str::to_string),
        email: claim_str(&payload, &["Email"]).map(str::to_string),
        department_id: claim_id(&payload, "DepartmentId"),
        position_id: claim_id(&payload, "PositionId"),
        roles,
        role_ids,
    })
}

fn parse_expiration(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Local).naive_local());
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f").ok()
}

/// Landing page for a user's primary role.
pub fn home_route_for(roles: &[String]) -> &'static str {
    match roles.first().map(String::as_str) {
        Some(ROLE_ADMIN) => "/admin",
        Some(ROLE_EMPLEADO) => "/empleado",
        _ => "/",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteDecision {
    Allow,
    Redirect(&'static str),
}

pub fn is_public_route(path: &str) -> bool {
    PUBLIC_ROUTES
        .iter()
        .any(|route| path == *route || path.starts_with(&format!("{}/", route)))
}

pub fn guard_route(path: &str, authenticated: bool) -> RouteDecision {
    let public = is_public_route(path);
    if public && authenticated {
        RouteDecision::Redirect("/")
    } else if !public && !authenticated {
        RouteDecision::Redirect("/login")
    } else {
        RouteDecision::Allow
    }
}

#[derive(Debug, Clone)]
struct ActiveSession {
    token: String,
    expires_at: Option<NaiveDateTime>,
    user: UserData,
}

pub struct SessionContext {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    client: RrhhClient,
    active: Option<ActiveSession>,
}

impl SessionContext {
    /// Restores a stored session. Expired or unreadable sessions are cleared.
    pub fn bootstrap(
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        client: RrhhClient,
    ) -> Result<Self> {
        let mut context = Self {
            store,
            clock,
            client,
            active: None,
        };

        match context.load_stored()? {
            Some(session) if !context.is_expired(&session) => {
                debug!("Restored session for user '{}'", session.user.username);
                context.client.set_bearer_token(Some(session.token.clone()));
                context.active = Some(session);
            }
            Some(session) => {
                info!("Stored session for '{}' has expired", session.user.username);
                context.clear_stored()?;
            }
            None => {
                context.clear_stored()?;
            }
        }
        Ok(context)
    }

    fn load_stored(&self) -> Result<Option<ActiveSession>> {
        let Some(token) = self.store.get(AUTH_TOKEN_KEY)? else {
            return Ok(None);
        };
        let user = match get_json::<UserData>(self.store.as_ref(), USER_DATA_KEY) {
            Ok(Some(user)) => user,
            Ok(None) => match decode_jwt(&token) {
                Ok(user) => user,
                Err(e) => {
                    warn!("Stored token could not be decoded: {}", e);
                    return Ok(None);
                }
            },
            Err(e) => {
                warn!("Stored user data is unreadable: {}", e);
                return Ok(None);
            }
        };
        let expires_at = self
            .store
            .get(AUTH_EXPIRES_KEY)?
            .as_deref()
            .and_then(parse_expiration);
        Ok(Some(ActiveSession {
            token,
            expires_at,
            user,
        }))
    }

    fn clear_stored(&self) -> Result<()> {
        self.store.remove(AUTH_TOKEN_KEY)?;
        self.store.remove(USER_DATA_KEY)?;
        self.store.remove(AUTH_EXPIRES_KEY)?;
        Ok(())
    }

    fn is_expired(&self, session: &ActiveSession) -> bool {
        session
            .expires_at
            .map_or(false, |expires_at| expires_at < self.clock.now())
    }

    pub async fn login(&mut self, credentials: LoginCredentials, remember: bool) -> Result<UserData> {
        info!("Logging in as '{}'", credentials.username);
        let response = self.client.login(&credentials).await?;
        let user = decode_jwt(&response.token)?;

        self.store.set(AUTH_TOKEN_KEY, &response.token)?;
        match response.expiration.as_deref() {
            Some(expiration) => self.store.set(AUTH_EXPIRES_KEY, expiration)?,
            None => self.store.remove(AUTH_EXPIRES_KEY)?,
        }
        set_json(self.store.as_ref(), USER_DATA_KEY, &user)?;

        if remember {
            self.store.set(REMEMBERED_USER_KEY, &credentials.username)?;
        } else {
            self.store.remove(REMEMBERED_USER_KEY)?;
        }

        self.client.set_bearer_token(Some(response.token.clone()));
        self.active = Some(ActiveSession {
            token: response.token,
            expires_at: response.expiration.as_deref().and_then(parse_expiration),
            user: user.clone(),
        });
        info!("Logged in as '{}' with roles {:?}", user.username, user.roles);
        Ok(user)
    }

    /// Tells the backend (best effort) and always clears local session data.
    pub async fn logout(&mut self) -> Result<()> {
        if self.active.is_some() {
            if let Err(e) = self.client.logout().await {
                warn!("Server-side logout failed: {}", e);
            }
        }
        self.client.set_bearer_token(None);
        self.active = None;
        self.clear_stored()?;
        info!("Session cleared");
        Ok(())
    }

    pub fn is_authenticated(&self) -> bool {
        self.active
            .as_ref()
            .map_or(false, |session| !self.is_expired(session))
    }

    pub fn user(&self) -> Option<&UserData> {
        self.active.as_ref().map(|session| &session.user)
    }

    pub fn roles(&self) -> &[String] {
        self.user().map(|u| u.roles.as_slice()).unwrap_or(&[])
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles().iter().any(|r| r == role)
    }

    pub fn has_any_role(&self, roles: &[&str]) -> bool {
        self.roles().iter().any(|r| roles.contains(&r.as_str()))
    }

    pub fn employee_id(&self) -> Option<EmployeeId> {
        self.user().and_then(|u| u.employee_id)
    }

    pub fn expires_at(&self) -> Option<NaiveDateTime> {
        self.active.as_ref().and_then(|s| s.expires_at)
    }

    /// Sessions without a known expiry count as expiring.
    pub fn is_expiring_soon(&self, minutes: i64) -> bool {
        match self.expires_at() {
            Some(expires_at) => expires_at - self.clock.now() < Duration::minutes(minutes),
            None => true,
        }
    }

    pub fn home_route(&self) -> &'static str {
        if self.is_authenticated() {
            home_route_for(self.roles())
        } else {
            "/login"
        }
    }

    pub fn guard(&self, path: &str) -> RouteDecision {
        guard_route(path, self.is_authenticated())
    }

    pub fn remembered_username(&self) -> Result<Option<String>> {
        self.store.get(REMEMBERED_USER_KEY)
    }

    pub fn client(&self) -> &RrhhClient {
        &self.client
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_token(payload: serde_json::Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let body = URL_SAFE_NO_PAD.encode(payload.to_string().as_bytes());
        format!("{}.{}.signature", header, body)
    }

    #[test]
    fn decodes_aspnet_identity_claims() {
        let token = encode_token(serde_json::json!({
            CLAIM_NAME_ID: "14",
            CLAIM_NAME: "mrojas",
            CLAIM_ROLE: ["EMPLEADO", "SUPERVISOR"],
            "EmployeeId": "7",
            "EmployeeCode": "EMP-007",
            "FullName": "María Rojas",
            "DepartmentId": "0",
            "RoleId": "2,5"
        }));
        let user = decode_jwt(&token).unwrap();
        assert_eq!(user.user_id, 14);
        assert_eq!(user.username, "mrojas");
        assert_eq!(user.employee_id, Some(7));
        assert_eq!(user.employee_code.as_deref(), Some("EMP-007"));
        assert_eq!(user.department_id, None);
        assert_eq!(user.roles, vec!["EMPLEADO", "SUPERVISOR"]);
        assert_eq!(user.role_ids, vec![2, 5]);
    }

    #[test]
    fn single_role_claim_and_plain_names() {
        let token = encode_token(serde_json::json!({
            "UserId": 3,
            "Username": "admin",
            CLAIM_ROLE: "ADMIN"
        }));
        let user = decode_jwt(&token).unwrap();
        assert_eq!(user.user_id, 3);
        assert_eq!(user.username, "admin");
        assert_eq!(user.roles, vec!["ADMIN"]);
        assert_eq!(user.employee_id, None);
        assert_eq!(home_route_for(&user.roles), "/admin");
    }

    #[test]
    fn malformed_tokens_are_rejected() {
        assert!(matches!(
            decode_jwt("no-dots-here"),
            Err(RrhhError::InvalidToken(_))
        ));
        assert!(decode_jwt("a.%%%.c").is_err());
        let no_user = encode_token(serde_json::json!({ "Username": "x" }));
        assert!(matches!(decode_jwt(&no_user), Err(RrhhError::InvalidToken(_))));
    }

    #[test]
    fn route_guard_redirects() {
        assert_eq!(guard_route("/login", true), RouteDecision::Redirect("/"));
        assert_eq!(guard_route("/login", false), RouteDecision::Allow);
        assert_eq!(guard_route("/forgot-password/step2", false), RouteDecision::Allow);
        assert_eq!(guard_route("/admin/nominas", false), RouteDecision::Redirect("/login"));
        assert_eq!(guard_route("/admin/nominas", true), RouteDecision::Allow);
        assert!(!is_public_route("/loginx"));
    }

    #[test]
    fn home_route_by_primary_role() {
        assert_eq!(home_route_for(&["EMPLEADO".to_string()]), "/empleado");
        assert_eq!(
            home_route_for(&["SUPERVISOR".to_string(), "ADMIN".to_string()]),
            "/"
        );
        assert_eq!(home_route_for(&[]), "/");
    }

    #[test]
    fn credentials_debug_hides_password() {
        let creds = LoginCredentials {
            username: "mrojas".to_string(),
            password: "hunter2".to_string(),
        };
        let printed = format!("{:?}", creds);
        assert!(printed.contains("mrojas"));
        assert!(!printed.contains("hunter2"));
    }
}
