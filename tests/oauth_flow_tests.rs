//! End-to-end tests for the Salesforce authorize and callback routes.

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
    response::Response,
};
use friction_integrations::{
    auth::Principal,
    credential_store::CredentialStore,
    models::{IntegrationMetadata, SystemType},
    server::create_app,
};
use serde_json::json;
use tower::ServiceExt;
use uuid::Uuid;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[path = "test_utils/mod.rs"]
mod test_utils;

use test_utils::{
    CLIENT_ID, service_access, session_cookie, setup_test_db, test_config,
    test_config_with_login_base, test_state,
};

async fn app_with(config: friction_integrations::config::AppConfig) -> (Router, CredentialStore) {
    let db = setup_test_db().await.unwrap();
    let state = test_state(config, db);
    let store = state.store.clone();
    (create_app(state), store)
}

async fn get(app: Router, uri: &str, cookie: Option<String>) -> Response {
    let mut request = Request::builder().uri(uri);
    if let Some(cookie) = cookie {
        request = request.header(header::COOKIE, cookie);
    }
    app.oneshot(request.body(Body::empty()).unwrap())
        .await
        .unwrap()
}

fn location(response: &Response) -> &str {
    response
        .headers()
        .get(header::LOCATION)
        .expect("redirect carries a location")
        .to_str()
        .unwrap()
}

fn salesforce_token_body() -> serde_json::Value {
    json!({
        "access_token": "00Dxx0000001gPL!AQ4AQFake.Access.Token",
        "refresh_token": "5Aep861TSESvWeug_fake_refresh",
        "signature": "ignored",
        "scope": "refresh_token api",
        "instance_url": "https://acme.my.salesforce.com",
        "id": "https://login.salesforce.com/id/00Dxx0000001gPL/005xx000001Sv6A",
        "token_type": "Bearer",
        "issued_at": "1700000000000"
    })
}

#[tokio::test]
async fn authorize_redirects_to_salesforce_with_exact_parameters() {
    let mut config = test_config();
    config.salesforce.redirect_uri = Some("https://app.example/callback".to_string());
    let (app, _) = app_with(config).await;

    let response = get(
        app,
        "/oauth/salesforce/authorize",
        Some(session_cookie(Uuid::new_v4())),
    )
    .await;

    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(
        location(&response),
        format!(
            "https://login.salesforce.com/services/oauth2/authorize?response_type=code&client_id={}&redirect_uri=https%3A%2F%2Fapp.example%2Fcallback&scope=api+refresh_token&prompt=login",
            CLIENT_ID
        )
    );
}

#[tokio::test]
async fn authorize_forces_login_for_every_request() {
    let (app, _) = app_with(test_config()).await;
    let cookie = session_cookie(Uuid::new_v4());

    for _ in 0..2 {
        let response = get(
            app.clone(),
            "/oauth/salesforce/authorize",
            Some(cookie.clone()),
        )
        .await;
        let target = url::Url::parse(location(&response)).unwrap();
        let params: Vec<(String, String)> = target.query_pairs().into_owned().collect();
        assert_eq!(params.len(), 5);
        assert_eq!(params[4], ("prompt".to_string(), "login".to_string()));
    }
}

#[tokio::test]
async fn authorize_without_client_id_redirects_to_fallback() {
    let mut config = test_config();
    config.salesforce.client_id = None;
    let (app, _) = app_with(config).await;

    let response = get(
        app,
        "/oauth/salesforce/authorize",
        Some(session_cookie(Uuid::new_v4())),
    )
    .await;

    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(
        location(&response),
        "/settings/integrations?error=oauth_config_missing"
    );
}

#[tokio::test]
async fn authorize_with_insecure_login_host_is_config_invalid() {
    let mut config = test_config();
    config.salesforce.login_base = "http://login.salesforce.com".to_string();
    let (app, _) = app_with(config).await;

    let response = get(
        app,
        "/oauth/salesforce/authorize",
        Some(session_cookie(Uuid::new_v4())),
    )
    .await;

    assert_eq!(
        location(&response),
        "/settings/integrations?error=oauth_config_invalid"
    );
}

#[tokio::test]
async fn authorize_without_session_is_unauthenticated() {
    let (app, _) = app_with(test_config()).await;

    let response = get(app, "/oauth/salesforce/authorize", None).await;

    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(
        location(&response),
        "/settings/integrations?error=unauthenticated"
    );
}

#[tokio::test]
async fn callback_stores_integration_and_tokens() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/services/oauth2/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code=aPrxFakeCode"))
        .and(body_string_contains(format!("client_id={}", CLIENT_ID)))
        .respond_with(ResponseTemplate::new(200).set_body_json(salesforce_token_body()))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = test_config_with_login_base(&mock_server.uri());
    let access_config = config.clone();
    let (app, store) = app_with(config).await;
    let user_id = Uuid::new_v4();

    let response = get(
        app,
        "/oauth/salesforce/callback?code=aPrxFakeCode&state=opaque-provider-echo",
        Some(session_cookie(user_id)),
    )
    .await;

    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(
        location(&response),
        "/settings/integrations?connected=salesforce"
    );

    let principal = Principal::new(user_id);
    let integration = store
        .get_integration(&principal, SystemType::Salesforce)
        .await
        .unwrap()
        .expect("integration stored");
    assert!(integration.is_active());
    assert_eq!(
        integration.instance_url.as_deref(),
        Some("https://acme.my.salesforce.com")
    );
    match integration.typed_metadata().unwrap() {
        Some(IntegrationMetadata::Salesforce(metadata)) => {
            assert_eq!(metadata.user_id.as_deref(), Some("005xx000001Sv6A"));
        }
        other => panic!("unexpected metadata {:?}", other),
    }

    let tokens = store
        .get_tokens(&service_access(&access_config), integration.id)
        .await
        .unwrap()
        .expect("tokens stored");
    assert_eq!(
        tokens.access_token(),
        "00Dxx0000001gPL!AQ4AQFake.Access.Token"
    );
    assert_eq!(tokens.refresh_token(), Some("5Aep861TSESvWeug_fake_refresh"));
    assert!(tokens.expires_at.is_some());
}

#[tokio::test]
async fn second_callback_supersedes_first() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/services/oauth2/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(salesforce_token_body()))
        .expect(2)
        .mount(&mock_server)
        .await;

    let (app, store) = app_with(test_config_with_login_base(&mock_server.uri())).await;
    let user_id = Uuid::new_v4();

    for code in ["first", "second"] {
        let response = get(
            app.clone(),
            &format!("/oauth/salesforce/callback?code={}", code),
            Some(session_cookie(user_id)),
        )
        .await;
        assert_eq!(
            location(&response),
            "/settings/integrations?connected=salesforce"
        );
    }

    let active = store
        .list_for_diagnostics(&friction_integrations::repositories::IntegrationFilter {
            user_id: Some(user_id),
            status: Some(friction_integrations::models::IntegrationStatus::Active),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(active.len(), 1);
}

#[tokio::test]
async fn callback_with_provider_error_stores_nothing() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/services/oauth2/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(salesforce_token_body()))
        .expect(0)
        .mount(&mock_server)
        .await;

    let (app, store) = app_with(test_config_with_login_base(&mock_server.uri())).await;
    let user_id = Uuid::new_v4();

    let response = get(
        app,
        "/oauth/salesforce/callback?error=access_denied&error_description=end-user+denied+authorization",
        Some(session_cookie(user_id)),
    )
    .await;

    assert_eq!(
        location(&response),
        "/settings/integrations?error=provider_denied"
    );
    assert!(
        store
            .get_integration(&Principal::new(user_id), SystemType::Salesforce)
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn callback_without_code_is_missing_code() {
    let (app, _) = app_with(test_config()).await;

    let response = get(
        app,
        "/oauth/salesforce/callback",
        Some(session_cookie(Uuid::new_v4())),
    )
    .await;

    assert_eq!(
        location(&response),
        "/settings/integrations?error=missing_code"
    );
}

#[tokio::test]
async fn callback_without_session_is_unauthenticated() {
    let (app, _) = app_with(test_config()).await;

    let response = get(app, "/oauth/salesforce/callback?code=abc", None).await;

    assert_eq!(
        location(&response),
        "/settings/integrations?error=unauthenticated"
    );
}

#[tokio::test]
async fn rejected_code_exchange_stores_nothing() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/services/oauth2/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "expired authorization code"
        })))
        .mount(&mock_server)
        .await;

    let (app, store) = app_with(test_config_with_login_base(&mock_server.uri())).await;
    let user_id = Uuid::new_v4();

    let response = get(
        app,
        "/oauth/salesforce/callback?code=stale",
        Some(session_cookie(user_id)),
    )
    .await;

    assert_eq!(
        location(&response),
        "/settings/integrations?error=token_exchange_failed"
    );
    assert!(
        store
            .get_integration(&Principal::new(user_id), SystemType::Salesforce)
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn callback_without_client_secret_is_config_missing() {
    let mut config = test_config();
    config.salesforce.client_secret = None;
    let (app, _) = app_with(config).await;

    let response = get(
        app,
        "/oauth/salesforce/callback?code=abc",
        Some(session_cookie(Uuid::new_v4())),
    )
    .await;

    assert_eq!(
        location(&response),
        "/settings/integrations?error=oauth_config_missing"
    );
}
