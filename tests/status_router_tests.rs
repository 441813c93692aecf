mod common;

use axum::{
    body::{Body, to_bytes},
    http::{Request, StatusCode},
};
use common::{Harness, car_seed, command_reply};
use solar_fleet::fleet::car::CarState;
use solar_fleet::router::{AppState, fleet_router};
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

const KEY: &str = "pwd";

async fn app(h: &Harness) -> axum::Router {
    fleet_router(AppState::new(h.service.clone(), h.tokens.clone(), KEY))
}

async fn body_string(resp: axum::response::Response) -> String {
    let body = to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("failed to read response body");
    String::from_utf8(body.to_vec()).expect("response body was not utf-8")
}

#[tokio::test]
async fn health_needs_no_key() {
    let h = Harness::new(&[]).await;
    let resp = app(&h)
        .await
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .expect("request failed");
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn status_requires_key() {
    let h = Harness::new(&[]).await;
    let app = app(&h).await;

    let resp = app
        .clone()
        .oneshot(Request::get("/api/status").body(Body::empty()).unwrap())
        .await
        .expect("request failed");
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = app
        .oneshot(
            Request::get("/api/status")
                .header("x-api-key", KEY)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .expect("request failed");
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_string(resp).await;
    assert!(body.contains(r#""token_state":"not_requested""#), "{body}");
    assert!(body.contains(r#""proxy_required":false"#), "{body}");
}

#[tokio::test]
async fn charge_target_is_stored_on_the_car() {
    let h = Harness::new(&[car_seed(1, "VIN1")]).await;
    let app = app(&h).await;

    let resp = app
        .clone()
        .oneshot(
            Request::put("/api/cars/1/target?key=pwd")
                .header("content-type", "application/json")
                .body(Body::from(
                    r#"{"should_charge":true,"amps":10,"scheduled_start":null}"#,
                ))
                .unwrap(),
        )
        .await
        .expect("request failed");
    assert_eq!(resp.status(), StatusCode::OK);

    let car = h.fleet.car(1).await.unwrap();
    let target = car.read().await.target.clone();
    assert_eq!(target.should_charge, Some(true));
    assert_eq!(target.amps, Some(10));
    assert_eq!(target.scheduled_start, Some(None));

    let resp = app
        .oneshot(
            Request::put("/api/cars/42/target")
                .header("authorization", format!("Bearer {KEY}"))
                .header("content-type", "application/json")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await
        .expect("request failed");
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let body = body_string(resp).await;
    assert!(body.contains(r#""code":"UNKNOWN_CAR""#), "{body}");
}

#[tokio::test]
async fn token_request_is_recorded() {
    let h = Harness::new(&[]).await;
    let resp = app(&h)
        .await
        .oneshot(
            Request::post("/api/token/request")
                .header("x-api-key", KEY)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .expect("request failed");
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    assert!(
        h.storage
            .has_config(solar_fleet::db::ConfigKey::FleetApiTokenRequested)
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn logger_suspension_makes_next_command_resume_logging() {
    let h = Harness::new(&[car_seed(1, "VIN1")]).await;
    h.store_valid_token().await;
    {
        let car = h.fleet.car(1).await.unwrap();
        car.write().await.runtime.state = Some(CarState::Online);
    }

    let resp = app(&h)
        .await
        .oneshot(
            Request::post("/api/cars/1/logging/suspended")
                .header("x-api-key", KEY)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .expect("request failed");
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_string(resp).await;
    assert!(body.contains(r#""value":true"#), "{body}");
    let car = h.fleet.car(1).await.unwrap();
    assert_eq!(car.read().await.runtime.state, Some(CarState::Suspended));

    Mock::given(method("POST"))
        .and(path("/api/1/vehicles/VIN1/wake_up"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&h.server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/logger/api/v1/cars/1/logging/resume"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&h.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/1/vehicles/VIN1/command/set_charge_limit"))
        .respond_with(ResponseTemplate::new(200).set_body_json(command_reply(true, "")))
        .expect(1)
        .mount(&h.server)
        .await;

    h.service.set_charge_limit(1, 80).await.unwrap();
}

#[tokio::test]
async fn sleeping_car_is_not_marked_suspended() {
    let h = Harness::new(&[car_seed(1, "VIN1")]).await;
    {
        let car = h.fleet.car(1).await.unwrap();
        car.write().await.runtime.state = Some(CarState::Asleep);
    }

    assert!(!h.fleet.mark_logging_suspended(1).await.unwrap());
    let car = h.fleet.car(1).await.unwrap();
    assert_eq!(car.read().await.runtime.state, Some(CarState::Asleep));
    assert!(h.fleet.mark_logging_suspended(9).await.is_err());
}
