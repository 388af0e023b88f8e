use std::time::Duration;

use image::RgbImage;
use serde_json::{json, Value};
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use emosense_lib::api::{
    ActivityCatalog, ApiClient, ApiError, HttpActivityCatalog, HttpInferenceClient,
    HttpSessionGateway, InferenceClient, SessionGateway,
};
use emosense_lib::auth::{AuthClient, Role};
use emosense_lib::models::EmotionResult;
use emosense_lib::sampler::encode_jpeg;

const TOKEN: &str = "9944b09199c62bcf9418ad846dd0e4bbdfc6ee4b";

fn client(server: &MockServer) -> ApiClient {
    ApiClient::new(&server.uri(), Duration::from_secs(5))
        .unwrap()
        .with_token(Some(TOKEN.to_string()))
}

#[tokio::test]
async fn create_and_end_session_use_token_auth() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/sesiones-actividad/"))
        .and(header("authorization", format!("Token {TOKEN}").as_str()))
        .and(body_json(json!({"actividad": 7, "alumno": 42})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": 501,
            "actividad": {"id": 7, "nombre": "Lectura"},
            "alumno": {"id": 42},
            "fecha_hora_inicio_real": "2025-03-10T14:00:00.123456"
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/sesiones-actividad/501/end_session/"))
        .and(header("authorization", format!("Token {TOKEN}").as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 501,
            "fecha_hora_inicio_real": "2025-03-10T14:00:00Z",
            "fecha_hora_fin_real": "2025-03-10T14:02:00Z"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = HttpSessionGateway::new(client(&server));
    let handle = gateway.create_session(7, 42).await.unwrap();
    assert_eq!(handle.id, 501);
    assert!(handle.started_at().is_some());
    assert!(handle.ended_at().is_none());

    let ended = gateway.end_session(501).await.unwrap();
    assert_eq!(
        ended.ended_at().map(|t| t.to_rfc3339()),
        Some("2025-03-10T14:02:00+00:00".to_string())
    );
}

#[tokio::test]
async fn gateway_errors_carry_the_backend_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/sesiones-actividad/9/end_session/"))
        .respond_with(
            ResponseTemplate::new(404)
                .set_body_json(json!({"error": "Sesión de actividad no encontrada."})),
        )
        .mount(&server)
        .await;

    let err = HttpSessionGateway::new(client(&server))
        .end_session(9)
        .await
        .unwrap_err();
    match err {
        ApiError::Status {
            status, message, ..
        } => {
            assert_eq!(status.as_u16(), 404);
            assert_eq!(message, "Sesión de actividad no encontrada.");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn missing_token_never_reaches_the_server() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&server)
        .await;

    let api = ApiClient::new(&server.uri(), Duration::from_secs(5))
        .unwrap()
        .with_token(Some(String::new()));
    assert!(!api.has_token());

    let err = HttpSessionGateway::new(api)
        .create_session(7, 42)
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Unauthenticated));
}

#[tokio::test]
async fn catalog_picks_the_activity_from_the_subject_list() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/actividades/"))
        .and(query_param("materia", "3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": 6, "materia": 3, "nombre": "Intro", "duracion_analisis_minutos": 0},
            {
                "id": 7,
                "materia": {"id": 3, "nombre": "Lengua"},
                "nombre": "Lectura",
                "descripcion": "Leer el capítulo 2",
                "fecha_inicio": "2025-03-10T14:00:00Z",
                "duracion_analisis_minutos": 2
            }
        ])))
        .mount(&server)
        .await;

    let catalog = HttpActivityCatalog::new(client(&server));
    let activity = catalog.get_activity(3, 7).await.unwrap().unwrap();
    assert_eq!(activity.nombre, "Lectura");
    assert_eq!(activity.subject_id(), Some(3));
    assert_eq!(activity.countdown_secs(), Some(120));

    assert!(catalog.get_activity(3, 99).await.unwrap().is_none());
}

#[tokio::test]
async fn inference_posts_a_jpeg_data_url() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/emocion-detection/"))
        .and(header("authorization", format!("Token {TOKEN}").as_str()))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "emocion_predominante": "felicidad",
            "confianza_emocion": 0.91
        })))
        .expect(1)
        .mount(&server)
        .await;

    let frame = encode_jpeg(&RgbImage::from_pixel(32, 24, image::Rgb([200, 150, 90])), 85).unwrap();
    let inference = HttpInferenceClient::new(client(&server));
    let result = inference.infer(501, &frame, 12).await;
    assert_eq!(
        result,
        EmotionResult::Detected {
            label: "felicidad".into(),
            confidence: Some(0.91)
        }
    );

    let requests = server.received_requests().await.unwrap();
    let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["sesion_id"], 501);
    assert_eq!(body["momento_segundo"], 12);
    assert!(body["frame_base64"]
        .as_str()
        .unwrap()
        .starts_with("data:image/jpeg;base64,/9j/"));
}

#[tokio::test]
async fn inference_failures_become_results() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/emocion-detection/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "message": "No se detectó ningún rostro o el modelo no está cargado.",
            "sesion_id": 501
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/emocion-detection/"))
        .respond_with(ResponseTemplate::new(500).set_body_string("model crashed"))
        .mount(&server)
        .await;

    let frame = encode_jpeg(&RgbImage::new(8, 8), 85).unwrap();
    let inference = HttpInferenceClient::new(client(&server));

    assert_eq!(inference.infer(501, &frame, 1).await, EmotionResult::NotDetected);
    match inference.infer(501, &frame, 3).await {
        EmotionResult::Failed { reason } => assert!(reason.contains("model crashed"), "{reason}"),
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test]
async fn inference_timeout_is_a_failed_result() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/emocion-detection/"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let api = ApiClient::new(&server.uri(), Duration::from_millis(200))
        .unwrap()
        .with_token(Some(TOKEN.to_string()));
    let frame = encode_jpeg(&RgbImage::new(8, 8), 85).unwrap();

    let result = HttpInferenceClient::new(api).infer(1, &frame, 0).await;
    assert!(matches!(result, EmotionResult::Failed { .. }));
}

#[tokio::test]
async fn login_builds_an_auth_context_and_logout_sends_the_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/login/"))
        .and(body_json(json!({"username": "ana", "password": "secreto"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "token": TOKEN,
            "user_id": 42,
            "username": "ana",
            "email": "ana@example.edu",
            "rol": "alumno",
            "user_data": {"first_name": "Ana", "last_name": "Pérez"}
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/logout/"))
        .and(header("authorization", format!("Token {TOKEN}").as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"message": "ok"})))
        .expect(1)
        .mount(&server)
        .await;

    let anonymous = ApiClient::new(&server.uri(), Duration::from_secs(5)).unwrap();
    let auth_client = AuthClient::new(anonymous);

    let auth = auth_client.login("ana", "secreto").await.unwrap();
    assert!(auth.is_authenticated());
    assert_eq!(auth.token(), Some(TOKEN));
    let user = auth.current_user().unwrap();
    assert_eq!(user.id, 42);
    assert_eq!(user.rol, Role::Alumno);
    assert_eq!(user.last_name.as_deref(), Some("Pérez"));

    auth_client.logout(&auth).await.unwrap();
}

#[tokio::test]
async fn rejected_login_reports_non_field_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/login/"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "non_field_errors": ["Credenciales inválidas"]
        })))
        .mount(&server)
        .await;

    let auth_client = AuthClient::new(ApiClient::new(&server.uri(), Duration::from_secs(5)).unwrap());
    let err = auth_client.login("ana", "mal").await.unwrap_err();
    assert!(err.to_string().contains("Credenciales inválidas"), "{err}");
}
