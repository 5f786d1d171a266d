use std::str::FromStr;
use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    response::Response,
    Router,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::Value;
use stockdesk_backend::{app_router, build_state, session_layer, session_store, AppState, Config};
use tempfile::TempDir;
use tower::ServiceExt;

const CATALOG: &str = r#"{
    "currencies": [{"sign": "$", "name": "US Dollar"}],
    "stocks": [
        {"ticker": "AAPL", "name": "Apple", "description": "Phones", "currency": "$"},
        {"ticker": "MSFT", "name": "Microsoft", "currency": "$"}
    ]
}"#;

struct TestApp {
    router: Router,
    state: AppState,
    _dir: TempDir,
}

impl TestApp {
    async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let catalog_path = dir.path().join("catalog.json");
        std::fs::write(&catalog_path, CATALOG).unwrap();
        let session_path = dir.path().join("sessions.db");

        let config = Config {
            db_path: dir.path().join("app.db").to_string_lossy().into_owned(),
            session_db_path: session_path.to_string_lossy().into_owned(),
            catalog_path: Some(catalog_path.to_string_lossy().into_owned()),
            starting_balance: dec!(1000),
            ..Config::default()
        };

        let store = session_store(&config.session_db_path).await.unwrap();
        let state = build_state(config).unwrap();
        let router = app_router(state.clone(), session_layer(store));

        Self {
            router,
            state,
            _dir: dir,
        }
    }

    async fn send(&self, request: Request<Body>) -> Response {
        self.router.clone().oneshot(request).await.unwrap()
    }

    async fn get(&self, uri: &str, cookie: Option<&str>) -> Response {
        let mut builder = Request::builder().uri(uri);
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    async fn post_form(&self, uri: &str, body: &str, cookie: Option<&str>) -> Response {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        self.send(builder.body(Body::from(body.to_string())).unwrap())
            .await
    }

    /// Registers `username` and returns its session cookie.
    async fn register(&self, username: &str) -> String {
        let response = self
            .post_form(
                "/register",
                &format!("username={}&password=hunter2hunter2", username),
                None,
            )
            .await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        session_cookie(&response)
    }

    async fn account(&self, cookie: &str) -> Value {
        let response = self.get("/stock/account", Some(cookie)).await;
        assert_eq!(response.status(), StatusCode::OK);
        json(response).await
    }
}

fn session_cookie(response: &Response) -> String {
    let raw = response
        .headers()
        .get(header::SET_COOKIE)
        .expect("response sets a session cookie")
        .to_str()
        .unwrap();
    raw.split(';').next().unwrap().to_string()
}

fn location(response: &Response) -> &str {
    response.headers()[header::LOCATION].to_str().unwrap()
}

async fn json(response: Response) -> Value {
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&body).unwrap()
}

fn decimal(value: &Value) -> Decimal {
    Decimal::from_str(value.as_str().expect("decimal serialized as string")).unwrap()
}

fn dollars(account: &Value) -> Decimal {
    decimal(&account["currencies"][0]["amount"])
}

#[tokio::test]
async fn stock_list_is_public() {
    let app = TestApp::new().await;
    let response = app.get("/stock/list", None).await;
    assert_eq!(response.status(), StatusCode::OK);

    let stocks = json(response).await;
    assert_eq!(stocks.as_array().unwrap().len(), 2);
    assert_eq!(stocks[0]["ticker"], "AAPL");
    assert_eq!(stocks[0]["currency"]["sign"], "$");
}

#[tokio::test]
async fn protected_routes_require_login() {
    let app = TestApp::new().await;
    for uri in ["/stock/detail/1", "/stock/account", "/stock/transactions", "/user"] {
        let response = app.get(uri, None).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{uri}");
    }
    let response = app.post_form("/stock/buy/1", "amount=1&price=1", None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn detail_page_offers_a_demo_price() {
    let app = TestApp::new().await;
    let cookie = app.register("alice").await;

    let response = app.get("/stock/detail/1", Some(&cookie)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let page = json(response).await;

    assert_eq!(page["stock"]["ticker"], "AAPL");
    assert_eq!(page["user_has_stock"], false);
    assert_eq!(page["available_amount"], 0);
    let price = decimal(&page["form"]["data"]["price"]);
    assert!(price >= dec!(1) && price <= dec!(100));
}

#[tokio::test]
async fn missing_stock_is_not_found() {
    let app = TestApp::new().await;
    let cookie = app.register("alice").await;

    let response = app.get("/stock/detail/99", Some(&cookie)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let response = app
        .post_form("/stock/buy/99", "amount=1&price=1", Some(&cookie))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn get_on_trade_route_redirects_to_detail() {
    let app = TestApp::new().await;
    let cookie = app.register("alice").await;

    let response = app.get("/stock/sell/2", Some(&cookie)).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/stock/detail/2");
}

#[tokio::test]
async fn buy_updates_portfolio_and_flashes_once() {
    let app = TestApp::new().await;
    let cookie = app.register("alice").await;

    let response = app
        .post_form("/stock/buy/1", "amount=2&price=10.50", Some(&cookie))
        .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/stock/account");

    let account = app.account(&cookie).await;
    assert_eq!(account["messages"][0], "Successfully bought 2 shares of AAPL");
    assert_eq!(dollars(&account), dec!(979));
    assert_eq!(account["stocks"][0]["ticker"], "AAPL");
    assert_eq!(account["stocks"][0]["amount"], 2);
    assert_eq!(account["stocks"][0]["stock_id"], 1);
    assert_eq!(decimal(&account["stocks"][0]["avg"]), dec!(10.50));

    let again = app.account(&cookie).await;
    assert!(again["messages"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn trades_evict_cached_portfolio() {
    let app = TestApp::new().await;
    let cookie = app.register("alice").await;

    // Warm the cache
    let before = app.account(&cookie).await;
    assert_eq!(dollars(&before), dec!(1000));
    assert!(app.state.cache.currencies("alice").await.is_some());
    assert!(app.state.cache.stocks("alice").await.is_some());

    let response = app
        .post_form("/stock/buy/2", "amount=1&price=100", Some(&cookie))
        .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert!(app.state.cache.currencies("alice").await.is_none());
    assert!(app.state.cache.stocks("alice").await.is_none());

    let after = app.account(&cookie).await;
    assert_eq!(dollars(&after), dec!(900));
    assert_eq!(after["stocks"][0]["ticker"], "MSFT");
}

#[tokio::test]
async fn sells_evict_cached_portfolio() {
    let app = TestApp::new().await;
    let cookie = app.register("alice").await;
    app.post_form("/stock/buy/2", "amount=2&price=100", Some(&cookie))
        .await;

    let before = app.account(&cookie).await;
    assert_eq!(dollars(&before), dec!(800));
    assert!(app.state.cache.currencies("alice").await.is_some());
    assert!(app.state.cache.stocks("alice").await.is_some());

    let response = app
        .post_form("/stock/sell/2", "amount=1&price=150.25", Some(&cookie))
        .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert!(app.state.cache.currencies("alice").await.is_none());
    assert!(app.state.cache.stocks("alice").await.is_none());

    let after = app.account(&cookie).await;
    assert_eq!(dollars(&after), dec!(950.25));
    assert_eq!(after["stocks"][0]["amount"], 1);
    assert_eq!(decimal(&after["stocks"][0]["avg"]), dec!(100));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_reads_never_cache_pre_trade_rows() {
    let app = Arc::new(TestApp::new().await);
    let cookie = app.register("alice").await;

    let mut tasks = Vec::new();
    for _ in 0..25 {
        let (reader, reader_cookie) = (app.clone(), cookie.clone());
        tasks.push(tokio::spawn(async move {
            reader.get("/stock/account", Some(&reader_cookie)).await;
        }));
        let (buyer, buyer_cookie) = (app.clone(), cookie.clone());
        tasks.push(tokio::spawn(async move {
            let response = buyer
                .post_form("/stock/buy/1", "amount=1&price=1", Some(&buyer_cookie))
                .await;
            assert_eq!(response.status(), StatusCode::SEE_OTHER);
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    // Whatever survived in the cache must match the ledger after every buy
    if let Some(currencies) = app.state.cache.currencies("alice").await {
        assert_eq!(currencies[0].amount, dec!(975));
    }
    if let Some(stocks) = app.state.cache.stocks("alice").await {
        assert_eq!(stocks[0].amount, 25);
    }
    let account = app.account(&cookie).await;
    assert_eq!(dollars(&account), dec!(975));
    assert_eq!(account["stocks"][0]["amount"], 25);
}

#[tokio::test]
async fn second_buy_averages_cost() {
    let app = TestApp::new().await;
    let cookie = app.register("alice").await;

    app.post_form("/stock/buy/1", "amount=1&price=10", Some(&cookie))
        .await;
    app.post_form("/stock/buy/1", "amount=3&price=30", Some(&cookie))
        .await;

    let account = app.account(&cookie).await;
    // (1 * 10 + 3 * 30) / 4
    assert_eq!(decimal(&account["stocks"][0]["avg"]), dec!(25));
    assert_eq!(account["stocks"][0]["amount"], 4);
    assert_eq!(dollars(&account), dec!(900));
}

#[tokio::test]
async fn insufficient_funds_rerenders_detail_without_changes() {
    let app = TestApp::new().await;
    let cookie = app.register("alice").await;
    app.account(&cookie).await;

    let response = app
        .post_form("/stock/buy/1", "amount=11&price=99.99", Some(&cookie))
        .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let page = json(response).await;
    assert_eq!(page["form"]["errors"]["non_field"][0], "Insufficient funds in $");
    assert_eq!(page["form"]["data"]["amount"], "11");
    assert_eq!(page["stock"]["ticker"], "AAPL");

    // A refused trade leaves the cached portfolio in place
    assert!(app.state.cache.currencies("alice").await.is_some());
    let account = app.account(&cookie).await;
    assert_eq!(dollars(&account), dec!(1000));
    assert!(account["stocks"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn invalid_form_reports_field_errors() {
    let app = TestApp::new().await;
    let cookie = app.register("alice").await;

    let response = app
        .post_form("/stock/buy/1", "amount=abc&price=", Some(&cookie))
        .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let page = json(response).await;
    assert_eq!(page["form"]["errors"]["fields"]["amount"][0], "Enter a whole number.");
    assert_eq!(page["form"]["errors"]["fields"]["price"][0], "This field is required.");
}

#[tokio::test]
async fn overselling_is_refused() {
    let app = TestApp::new().await;
    let cookie = app.register("alice").await;

    let response = app
        .post_form("/stock/sell/1", "amount=1&price=10", Some(&cookie))
        .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let page = json(response).await;
    assert_eq!(page["form"]["errors"]["non_field"][0], "You have no shares of AAPL");

    app.post_form("/stock/buy/1", "amount=2&price=10", Some(&cookie))
        .await;
    let response = app
        .post_form("/stock/sell/1", "amount=5&price=10", Some(&cookie))
        .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let page = json(response).await;
    assert_eq!(
        page["form"]["errors"]["non_field"][0],
        "Not enough shares to sell. You have 2 shares"
    );
    assert_eq!(page["user_has_stock"], true);
    assert_eq!(page["available_amount"], 2);

    let account = app.account(&cookie).await;
    assert_eq!(dollars(&account), dec!(980));
    assert_eq!(account["stocks"][0]["amount"], 2);
}

#[tokio::test]
async fn round_trip_restores_balance_and_is_recorded() {
    let app = TestApp::new().await;
    let cookie = app.register("alice").await;

    app.post_form("/stock/buy/1", "amount=3&price=33.33", Some(&cookie))
        .await;
    let response = app
        .post_form("/stock/sell/1", "amount=3&price=33.33", Some(&cookie))
        .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);

    let account = app.account(&cookie).await;
    assert_eq!(dollars(&account), dec!(1000));
    assert!(account["stocks"].as_array().unwrap().is_empty());
    assert_eq!(
        account["messages"][1],
        "Successfully sold 3 shares of AAPL for 99.99$"
    );

    let response = app.get("/stock/transactions", Some(&cookie)).await;
    let trades = json(response).await;
    let trades = trades.as_array().unwrap();
    assert_eq!(trades.len(), 2);
    assert_eq!(trades[0]["side"], "SELL");
    assert_eq!(trades[1]["side"], "BUY");
    assert_eq!(decimal(&trades[1]["total"]), dec!(99.99));
}

#[tokio::test]
async fn login_logout_cycle() {
    let app = TestApp::new().await;
    app.register("alice").await;

    let response = app
        .post_form("/login", "username=alice&password=wrong-password", None)
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .post_form("/login", "username=alice&password=hunter2hunter2", None)
        .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    let cookie = session_cookie(&response);

    let user = json(app.get("/user", Some(&cookie)).await).await;
    assert_eq!(user["username"], "alice");

    let response = app.get("/logout", Some(&cookie)).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    let response = app.get("/stock/account", Some(&cookie)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn duplicate_registration_conflicts() {
    let app = TestApp::new().await;
    app.register("alice").await;

    let response = app
        .post_form("/register", "username=alice&password=another-password", None)
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
}
