// src/api_client.rs

use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::attendance::{AttendanceApi, EmployeeId, EstadoAsistenciaResponse, MarcarRequest, MarcarResponse};
use crate::config::ClientConfig;
use crate::directory::{AsistenciaRecord, AttendanceFilter, Departamento, Empleado, Puesto, Rol};
use crate::error::{Result, RrhhError};
use crate::payroll::{
    BiweeklyPeriod, DetalleNomina, GenerarNominaQuincenalRequest, NominaDto, ResumenNominaQuincenal,
};
use crate::payroll_gate::PayrollApi;
use crate::session::{AuthResponse, LoginCredentials};

// Error bodies differ between controllers; take whichever field is present.
#[derive(Debug, Deserialize)]
struct ErrorPayload {
    message: Option<String>,
    mensaje: Option<String>,
    error: Option<String>,
    title: Option<String>,
}

fn error_message_from_body(body: &str) -> String {
    match serde_json::from_str::<ErrorPayload>(body) {
        Ok(parsed) => parsed
            .message
            .or(parsed.mensaje)
            .or(parsed.error)
            .or(parsed.title)
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| body.to_string()),
        Err(_) => body.to_string(),
    }
}

/// HTTP client for the HR backend.
#[derive(Clone)]
pub struct RrhhClient {
    config: Arc<ClientConfig>,
    http_client: Client,
    token: Arc<RwLock<Option<String>>>,
}

impl RrhhClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let http_client = Client::builder()
            .timeout(config.request_timeout())
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()?;
        info!("API client created for {}", config.api_base_url);
        Ok(Self {
            config: Arc::new(config),
            http_client,
            token: Arc::new(RwLock::new(None)),
        })
    }

    // Only the session context decides which token is in use.
    pub(crate) fn set_bearer_token(&self, token: Option<String>) {
        match self.token.write() {
            Ok(mut guard) => *guard = token,
            Err(poisoned) => *poisoned.into_inner() = token,
        }
    }

    fn bearer_token(&self) -> Option<String> {
        match self.token.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn build_request(&self, method: Method, endpoint: &str) -> Result<RequestBuilder> {
        self.build_request_with_auth(method, endpoint, true)
    }

    fn build_request_with_auth(
        &self,
        method: Method,
        endpoint: &str,
        with_auth: bool,
    ) -> Result<RequestBuilder> {
        let base = self.config.api_base_url.trim_end_matches('/');
        let url = if endpoint.starts_with("http") {
            endpoint.to_string()
        } else if endpoint.starts_with('/') {
            format!("{}{}", base, endpoint)
        } else {
            format!("{}/{}", base, endpoint)
        };

        Url::parse(&url)?;

        let mut builder = self
            .http_client
            .request(method, &url)
            .header(ACCEPT, "application/json")
            .header(CONTENT_TYPE, "application/json");
        if let Some(token) = self.bearer_token().filter(|_| with_auth) {
            builder = builder.header(AUTHORIZATION, format!("Bearer {}", token));
        }
        Ok(builder)
    }

    async fn execute(&self, request_builder: RequestBuilder, context_msg: &str) -> Result<Vec<u8>> {
        let request = match request_builder.build() {
            Ok(req) => req,
            Err(e) => {
                error!("Request build failed for '{}': {}", context_msg, e);
                return Err(RrhhError::Request(e));
            }
        };
        let request_url = request.url().to_string();
        let authenticated = request.headers().contains_key(AUTHORIZATION);
        debug!("Sending request for '{}' to URL: {}", context_msg, request_url);

        let resp = match self.http_client.execute(request).await {
            Ok(resp) => resp,
            Err(e) if e.is_timeout() => {
                error!("Request for '{}' (URL: {}) timed out", context_msg, request_url);
                return Err(RrhhError::Timeout);
            }
            Err(e) => {
                error!(
                    "Network or request execution error for '{}' (URL: {}): {}",
                    context_msg, request_url, e
                );
                return Err(RrhhError::Request(e));
            }
        };

        let status = resp.status();
        info!(
            "Received response for '{}' (URL: {}): Status={}",
            context_msg, request_url, status
        );

        let bytes = match resp.bytes().await {
            Ok(bytes) => bytes,
            Err(e) if e.is_timeout() => return Err(RrhhError::Timeout),
            Err(e) => {
                error!("Failed to read response body for '{}': {}", context_msg, e);
                return Err(RrhhError::Request(e));
            }
        };

        match std::str::from_utf8(&bytes) {
            Ok(text) => debug!("Raw response body for '{}': {}", context_msg, text),
            Err(_) => debug!(
                "Raw response body (hex) for '{}': {}",
                context_msg,
                hex::encode(&bytes)
            ),
        }

        if status.is_success() {
            return Ok(bytes.to_vec());
        }

        let error_body = String::from_utf8_lossy(&bytes).into_owned();
        error!(
            "API Error Response: Status={}, Body='{}' for URL: {}",
            status, error_body, request_url
        );

        // A 401 on an anonymous call (login) is a credentials problem, not an
        // expired session.
        if status == StatusCode::UNAUTHORIZED && authenticated {
            warn!("Session rejected by server for '{}'", context_msg);
            return Err(RrhhError::SessionExpired);
        }

        Err(RrhhError::Api {
            status,
            message: error_message_from_body(&error_body),
        })
    }

    pub async fn send_and_deserialize<T: DeserializeOwned>(
        &self,
        request_builder: RequestBuilder,
        context_msg: &str,
    ) -> Result<T> {
        let bytes = self.execute(request_builder, context_msg).await?;
        serde_json::from_slice::<T>(&bytes).map_err(|e| {
            error!("JSON deserialization failed for '{}': {}", context_msg, e);
            RrhhError::Json(e)
        })
    }

    /// For endpoints whose body is irrelevant or empty.
    pub async fn send_expect_success(
        &self,
        request_builder: RequestBuilder,
        context_msg: &str,
    ) -> Result<()> {
        self.execute(request_builder, context_msg).await.map(|_| ())
    }

    async fn get<T: DeserializeOwned>(&self, endpoint: &str, context_msg: &str) -> Result<T> {
        let rb = self.build_request(Method::GET, endpoint)?;
        self.send_and_deserialize(rb, context_msg).await
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: &B,
        context_msg: &str,
    ) -> Result<T> {
        let rb = self.build_request(Method::POST, endpoint)?.json(body);
        self.send_and_deserialize(rb, context_msg).await
    }

    // --- Auth ---

    pub async fn login(&self, credentials: &LoginCredentials) -> Result<AuthResponse> {
        // Login must never carry a stale bearer token.
        let rb = self
            .build_request_with_auth(Method::POST, "/auth/login", false)?
            .json(credentials);
        let response: AuthResponse = self.send_and_deserialize(rb, "login").await?;
        if response.token.trim().is_empty() {
            return Err(RrhhError::InvalidToken("login returned an empty token".to_string()));
        }
        Ok(response)
    }

    pub async fn logout(&self) -> Result<()> {
        let rb = self.build_request(Method::POST, "/auth/logout")?;
        self.send_expect_success(rb, "logout").await
    }

    // --- Attendance ---

    pub async fn get_attendance_status(&self, employee_id: EmployeeId) -> Result<EstadoAsistenciaResponse> {
        self.get(
            &format!("/Asistencias/estado/{}", employee_id),
            "attendance status",
        )
        .await
    }

    pub async fn mark_attendance(&self, employee_id: EmployeeId) -> Result<MarcarResponse> {
        self.post(
            "/Asistencias/marcar",
            &MarcarRequest { empleado_id: employee_id },
            "mark attendance",
        )
        .await
    }

    pub async fn list_attendance(&self, filter: &AttendanceFilter) -> Result<Vec<AsistenciaRecord>> {
        let rb = self
            .build_request(Method::GET, "/Asistencias")?
            .query(&filter.query_pairs());
        self.send_and_deserialize(rb, "list attendance").await
    }

    // --- Payroll ---

    pub async fn generate_biweekly_payroll(
        &self,
        request: &GenerarNominaQuincenalRequest,
    ) -> Result<Vec<DetalleNomina>> {
        self.post("/Nominas/generar-quincenal", request, "generate biweekly payroll")
            .await
    }

    pub async fn list_payrolls(&self) -> Result<Vec<NominaDto>> {
        self.get("/Nominas", "list payrolls").await
    }

    pub async fn list_payrolls_for_period(&self, period: BiweeklyPeriod) -> Result<Vec<NominaDto>> {
        self.get(
            &format!(
                "/Nominas/quincena/{}/{}/{}",
                period.quincena().number(),
                period.month(),
                period.year()
            ),
            "list payrolls for period",
        )
        .await
    }

    pub async fn payroll_summary(&self, period: BiweeklyPeriod) -> Result<ResumenNominaQuincenal> {
        self.get(
            &format!(
                "/Nominas/resumen/{}/{}/{}",
                period.quincena().number(),
                period.month(),
                period.year()
            ),
            "payroll summary",
        )
        .await
    }

    pub async fn annul_payroll(&self, id_nomina: i64) -> Result<()> {
        let rb = self.build_request(Method::PUT, &format!("/Nominas/{}/anular", id_nomina))?;
        self.send_expect_success(rb, "annul payroll").await
    }

    // --- Directory ---

    pub async fn list_employees(&self) -> Result<Vec<Empleado>> {
        self.get("/Empleados", "list employees").await
    }

    pub async fn list_positions(&self) -> Result<Vec<Puesto>> {
        self.get("/Puestos", "list positions").await
    }

    pub async fn list_departments(&self) -> Result<Vec<Departamento>> {
        self.get("/Departamentos", "list departments").await
    }

    pub async fn list_roles(&self) -> Result<Vec<Rol>> {
        self.get("/Rol", "list roles").await
    }
}

#[async_trait]
impl AttendanceApi for RrhhClient {
    async fn fetch_day_state(&self, employee_id: EmployeeId) -> Result<EstadoAsistenciaResponse> {
        self.get_attendance_status(employee_id).await
    }

    async fn mark_attendance(&self, employee_id: EmployeeId) -> Result<MarcarResponse> {
        RrhhClient::mark_attendance(self, employee_id).await
    }
}

#[async_trait]
impl PayrollApi for RrhhClient {
    async fn generate_biweekly_payroll(
        &self,
        request: &GenerarNominaQuincenalRequest,
    ) -> Result<Vec<DetalleNomina>> {
        RrhhClient::generate_biweekly_payroll(self, request).await
    }

    async fn list_payrolls(&self) -> Result<Vec<NominaDto>> {
        RrhhClient::list_payrolls(self).await
    }
}
