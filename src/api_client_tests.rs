// src/api_client_tests.rs

#[cfg(test)]
mod tests {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
    use chrono::NaiveDate;
    use reqwest::StatusCode;
    use std::sync::Arc;
    use std::time::Duration;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::super::api_client::RrhhClient;
    use super::super::attendance::AttendanceApi;
    use super::super::clock::FixedClock;
    use super::super::config::ClientConfig;
    use super::super::directory::AttendanceFilter;
    use super::super::error::RrhhError;
    use super::super::payroll::{BiweeklyPeriod, GenerarNominaQuincenalRequest, Quincena};
    use super::super::session::{LoginCredentials, SessionContext, AUTH_TOKEN_KEY, REMEMBERED_USER_KEY};
    use super::super::storage::{KeyValueStore, MemoryStore};

    fn client_for(server: &MockServer) -> RrhhClient {
        let config = ClientConfig {
            api_base_url: format!("{}/api", server.uri()),
            request_timeout_secs: 1,
            ..ClientConfig::default()
        };
        RrhhClient::new(config).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn token_for_employee(employee_id: i64) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let payload = serde_json::json!({
            "UserId": "21",
            "Username": "lmora",
            "EmployeeId": employee_id.to_string(),
            "http://schemas.microsoft.com/ws/2008/06/identity/claims/role": "EMPLEADO"
        });
        format!(
            "{}.{}.sig",
            header,
            URL_SAFE_NO_PAD.encode(payload.to_string().as_bytes())
        )
    }

    #[tokio::test]
    async fn fetches_attendance_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/Asistencias/estado/7"))
            .and(header("accept", "application/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "tieneRegistro": true,
                "puedeMarcarEntrada": false,
                "puedeMarcarSalida": true,
                "estado": "PRESENTE",
                "horaEntrada": "2024-03-05T08:02:00",
                "mensaje": "Puedes marcar tu salida"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let status = client.fetch_day_state(7).await.unwrap();
        assert!(status.tiene_registro);
        assert!(status.puede_marcar_salida);
        assert_eq!(status.hora_entrada.as_deref(), Some("2024-03-05T08:02:00"));
    }

    #[tokio::test]
    async fn mark_posts_employee_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/Asistencias/marcar"))
            .and(body_json(serde_json::json!({ "empleadoId": 7 })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "exito": false,
                "mensaje": "Ya registraste tu salida hoy"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let response = AttendanceApi::mark_attendance(&client, 7).await.unwrap();
        assert!(!response.exito);
        assert_eq!(response.mensaje.as_deref(), Some("Ya registraste tu salida hoy"));
    }

    #[tokio::test]
    async fn backend_error_message_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/Nominas/generar-quincenal"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(serde_json::json!({ "message": "La nómina ya fue generada" })),
            )
            .mount(&server)
            .await;

        let client = client_for(&server);
        let period = BiweeklyPeriod::new(Quincena::First, 3, 2024).unwrap();
        let request = GenerarNominaQuincenalRequest::for_period(period, date(2024, 3, 16));
        let err = client.generate_biweekly_payroll(&request).await.unwrap_err();
        match err {
            RrhhError::Api { status, message } => {
                assert_eq!(status, StatusCode::BAD_REQUEST);
                assert_eq!(message, "La nómina ya fue generada");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn plain_text_error_body_is_kept() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/Empleados"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let err = client_for(&server).list_employees().await.unwrap_err();
        assert!(matches!(err, RrhhError::Api { ref message, .. } if message == "boom"));
    }

    #[tokio::test]
    async fn slow_backend_maps_to_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/Puestos"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!([]))
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let err = client_for(&server).list_positions().await.unwrap_err();
        assert!(matches!(err, RrhhError::Timeout), "got {:?}", err);
    }

    #[tokio::test]
    async fn attendance_listing_sends_filters() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/Asistencias"))
            .and(query_param("empleadoId", "3"))
            .and(query_param("fechaInicio", "2024-03-01"))
            .and(query_param("fechaFin", "2024-03-15"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([{
                "idAsistencia": 1,
                "empleadoId": 3,
                "nombreEmpleado": "Luis Mora",
                "fechaRegistro": "2024-03-04T00:00:00",
                "horasTrabajadas": "08:00:00"
            }])))
            .expect(1)
            .mount(&server)
            .await;

        let filter = AttendanceFilter {
            empleado_id: Some(3),
            fecha_inicio: Some(date(2024, 3, 1)),
            fecha_fin: Some(date(2024, 3, 15)),
        };
        let rows = client_for(&server).list_attendance(&filter).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].worked_minutes(), 480);
    }

    #[tokio::test]
    async fn period_endpoints_use_quincena_month_year() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/Nominas/resumen/2/12/2023"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "quincena": 2,
                "mes": 12,
                "anio": 2023,
                "totalEmpleados": 4,
                "totalBruto": 1200000,
                "totalDeducciones": 130000,
                "totalNeto": 1070000
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/api/Nominas/41/anular"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let period = BiweeklyPeriod::second_of_previous_month(date(2024, 1, 1));
        let summary = client.payroll_summary(period).await.unwrap();
        assert_eq!(summary.total_empleados, 4);
        client.annul_payroll(41).await.unwrap();
    }

    #[tokio::test]
    async fn login_stores_session_and_sends_bearer_afterwards() {
        let server = MockServer::start().await;
        let token = token_for_employee(7);
        Mock::given(method("POST"))
            .and(path("/api/auth/login"))
            .and(body_json(serde_json::json!({ "username": "lmora", "password": "secreto" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "token": token,
                "expiration": "2030-01-01T00:00:00"
            })))
            .expect(1)
            .mount(&server)
            .await;
        // Unmatched requests get a 404, so this only answers with the bearer.
        Mock::given(method("GET"))
            .and(path("/api/Rol"))
            .and(header("authorization", format!("Bearer {}", token).as_str()))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!([{ "idRol": 2, "nombreRol": "EMPLEADO" }])),
            )
            .expect(1)
            .mount(&server)
            .await;

        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(FixedClock::on_date(date(2024, 3, 5)));
        let mut session =
            SessionContext::bootstrap(store.clone(), clock, client_for(&server)).unwrap();
        assert!(!session.is_authenticated());

        let user = session
            .login(
                LoginCredentials {
                    username: "lmora".to_string(),
                    password: "secreto".to_string(),
                },
                true,
            )
            .await
            .unwrap();
        assert_eq!(user.employee_id, Some(7));
        assert!(session.is_authenticated());
        assert_eq!(session.home_route(), "/empleado");
        assert!(session.has_any_role(&["ADMIN", "EMPLEADO"]));
        assert!(!session.has_any_role(&["ADMIN"]));
        assert_eq!(store.get(AUTH_TOKEN_KEY).unwrap(), Some(token.clone()));
        assert_eq!(
            store.get(REMEMBERED_USER_KEY).unwrap().as_deref(),
            Some("lmora")
        );

        let roles = session.client().list_roles().await.unwrap();
        assert_eq!(roles[0].nombre_rol, "EMPLEADO");
    }

    #[tokio::test]
    async fn rejected_credentials_are_not_a_session_expiry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/auth/login"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_json(serde_json::json!({ "message": "Credenciales inválidas" })),
            )
            .mount(&server)
            .await;

        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(FixedClock::on_date(date(2024, 3, 5)));
        let mut session = SessionContext::bootstrap(store, clock, client_for(&server)).unwrap();
        let err = session
            .login(
                LoginCredentials {
                    username: "lmora".to_string(),
                    password: "mal".to_string(),
                },
                false,
            )
            .await
            .unwrap_err();
        assert_eq!(err.user_message(), "Credenciales inválidas");
        assert!(!session.is_authenticated());
    }

    #[tokio::test]
    async fn expired_bearer_maps_to_session_expired_and_logout_clears_state() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/Nominas"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/auth/logout"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let store = Arc::new(MemoryStore::new());
        store.set(AUTH_TOKEN_KEY, &token_for_employee(7)).unwrap();
        store.set("auth_expires", "2030-01-01T00:00:00").unwrap();
        let clock = Arc::new(FixedClock::on_date(date(2024, 3, 5)));
        let mut session =
            SessionContext::bootstrap(store.clone(), clock, client_for(&server)).unwrap();
        assert!(session.is_authenticated());
        assert_eq!(session.employee_id(), Some(7));

        let err = session.client().list_payrolls().await.unwrap_err();
        assert!(matches!(err, RrhhError::SessionExpired));

        session.logout().await.unwrap();
        assert!(!session.is_authenticated());
        assert_eq!(store.get(AUTH_TOKEN_KEY).unwrap(), None);
    }

    #[tokio::test]
    async fn expired_stored_session_is_cleared_on_bootstrap() {
        let server = MockServer::start().await;
        let store = Arc::new(MemoryStore::new());
        store.set(AUTH_TOKEN_KEY, &token_for_employee(7)).unwrap();
        store.set("auth_expires", "2024-03-01T00:00:00").unwrap();
        let clock = Arc::new(FixedClock::on_date(date(2024, 3, 5)));

        let session = SessionContext::bootstrap(store.clone(), clock, client_for(&server)).unwrap();
        assert!(!session.is_authenticated());
        assert_eq!(session.home_route(), "/login");
        assert!(store.keys().is_empty());
    }
}
