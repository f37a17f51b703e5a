//! Query round trips through bound binders and operators, including
//! error responses and the three timeout dispositions.

use std::rc::Rc;
use std::time::{Duration, Instant};

use tokio::task::LocalSet;

use eventwire::{
    BinderOperator, Client, EventRule, EventTarget, QueryError, QueryOptions, RuleBinder,
    RuleType, Server, ServerClient, TimeoutBehavior, Value,
};

fn int_rule(keys: &[&str]) -> EventRule {
    EventRule::typed(keys.iter().map(|k| (*k, RuleType::number())).collect()).expect("rule")
}

/// Apply both binders onto a freshly wired server/client pair and build
/// the operators for each side.
fn connect(
    server_binder: &RuleBinder,
    client_binder: &RuleBinder,
) -> (ServerClient, Client, BinderOperator, BinderOperator) {
    let server = Server::new();
    let server_client = server.create_client();
    let client = Client::new();

    let peer = client.clone();
    server_client.on_send(move |packet| {
        peer.receive_data(&packet.prefix, &packet.body)
            .expect("client receive");
    });
    let peer = server_client.clone();
    client.on_send(move |packet| {
        peer.receive_data(&packet.prefix, &packet.body)
            .expect("server receive");
    });

    server_binder.apply_to_server(&server).expect("apply server");
    server_binder
        .apply_to_connection(&server_client)
        .expect("apply connection");
    client_binder.apply_to_client(&client).expect("apply client");

    let server_operator = server_binder
        .create_operator(server_client.clone())
        .expect("server operator");
    let client_operator = client_binder
        .create_operator(client.clone())
        .expect("client operator");
    (server_client, client, server_operator, client_operator)
}

#[tokio::test]
async fn queries_resolve_in_both_directions() {
    let local = LocalSet::new();
    local
        .run_until(async {
            let server_binder = RuleBinder::server_bound();
            let client_binder = RuleBinder::client_bound();
            server_binder.bind_opposite(&client_binder).expect("bind");

            server_binder
                .add_query_rule("sum", int_rule(&["a", "b"]), int_rule(&["ans"]))
                .expect("query rule");
            server_binder
                .set_query_processor("sum", |meta: Value, _: Rc<dyn EventTarget>| async move {
                    let a = meta.get("a").as_f64().unwrap_or(0.0);
                    let b = meta.get("b").as_f64().unwrap_or(0.0);
                    Ok(Some(Value::object([("ans", Value::from(a + b))])))
                })
                .expect("processor");

            client_binder
                .add_query_rule("diff", int_rule(&["a", "b"]), int_rule(&["ans"]))
                .expect("query rule");
            client_binder
                .set_query_processor("diff", |meta: Value, _: Rc<dyn EventTarget>| async move {
                    let a = meta.get("a").as_f64().unwrap_or(0.0);
                    let b = meta.get("b").as_f64().unwrap_or(0.0);
                    Ok(Some(Value::object([("ans", Value::from(a - b))])))
                })
                .expect("processor");

            let (_server_client, _client, server_operator, client_operator) =
                connect(&server_binder, &client_binder);

            let result = client_operator
                .query(
                    "sum",
                    Value::object([("a", Value::from(1)), ("b", Value::from(2))]),
                    QueryOptions::default(),
                )
                .expect("start")
                .await
                .expect("resolve");
            assert_eq!(result, Value::object([("ans", Value::from(3))]));

            let result = server_operator
                .query(
                    "diff",
                    Value::object([("a", Value::from(3)), ("b", Value::from(2))]),
                    QueryOptions::default(),
                )
                .expect("start")
                .await
                .expect("resolve");
            assert_eq!(result, Value::object([("ans", Value::from(1))]));
        })
        .await;
}

#[tokio::test]
async fn query_rejection_carries_cause() {
    let local = LocalSet::new();
    local
        .run_until(async {
            let server_binder = RuleBinder::server_bound();
            let client_binder = RuleBinder::client_bound();
            server_binder.bind_opposite(&client_binder).expect("bind");

            server_binder
                .add_query_rule("div", int_rule(&["a", "b"]), int_rule(&["ans"]))
                .expect("query rule");
            server_binder
                .set_query_processor("div", |meta: Value, _: Rc<dyn EventTarget>| async move {
                    let a = meta.get("a").as_f64().unwrap_or(0.0);
                    let b = meta.get("b").as_f64().unwrap_or(0.0);
                    if b == 0.0 {
                        return Err(QueryError::rejected("division by zero"));
                    }
                    Ok(Some(Value::object([("ans", Value::from(a / b))])))
                })
                .expect("processor");

            let (_server_client, _client, _server_operator, client_operator) =
                connect(&server_binder, &client_binder);

            let error = client_operator
                .query(
                    "div",
                    Value::object([("a", Value::from(1)), ("b", Value::from(0))]),
                    QueryOptions::default(),
                )
                .expect("start")
                .await
                .expect_err("rejected");
            assert_eq!(error, QueryError::rejected("division by zero"));

            // The happy path still works on the same query.
            let result = client_operator
                .query(
                    "div",
                    Value::object([("a", Value::from(8)), ("b", Value::from(2))]),
                    QueryOptions::default(),
                )
                .expect("start")
                .await
                .expect("resolve");
            assert_eq!(result, Value::object([("ans", Value::from(4))]));
        })
        .await;
}

/// Binders for a query nobody answers: the rule exists on the server but
/// no processor is installed, so requests arrive and are dropped.
fn unanswered_binders() -> (RuleBinder, RuleBinder) {
    let server_binder = RuleBinder::server_bound();
    let client_binder = RuleBinder::client_bound();
    server_binder.bind_opposite(&client_binder).expect("bind");
    server_binder
        .add_query_rule("slow", int_rule(&["a"]), int_rule(&["ans"]))
        .expect("query rule");
    (server_binder, client_binder)
}

#[tokio::test]
async fn query_timeout_rejects_after_deadline() {
    let local = LocalSet::new();
    local
        .run_until(async {
            let (server_binder, client_binder) = unanswered_binders();
            let (_server_client, _client, _server_operator, client_operator) =
                connect(&server_binder, &client_binder);

            let started = Instant::now();
            let error = client_operator
                .query(
                    "slow",
                    Value::object([("a", Value::from(1))]),
                    QueryOptions::with_timeout(Duration::from_millis(10)),
                )
                .expect("start")
                .await
                .expect_err("timeout");
            assert_eq!(error, QueryError::Timeout);
            assert!(started.elapsed() >= Duration::from_millis(10));
        })
        .await;
}

#[tokio::test]
async fn query_timeout_resolve_yields_null() {
    let local = LocalSet::new();
    local
        .run_until(async {
            let (server_binder, client_binder) = unanswered_binders();
            let (_server_client, _client, _server_operator, client_operator) =
                connect(&server_binder, &client_binder);

            let started = Instant::now();
            let result = client_operator
                .query(
                    "slow",
                    Value::object([("a", Value::from(1))]),
                    QueryOptions::with_timeout(Duration::from_millis(10))
                        .on_timeout(TimeoutBehavior::Resolve),
                )
                .expect("start")
                .await
                .expect("resolve");
            assert_eq!(result, Value::Null);
            assert!(started.elapsed() >= Duration::from_millis(10));
        })
        .await;
}

#[tokio::test]
async fn query_timeout_discard_never_settles() {
    let local = LocalSet::new();
    local
        .run_until(async {
            let (server_binder, client_binder) = unanswered_binders();
            let (_server_client, _client, _server_operator, client_operator) =
                connect(&server_binder, &client_binder);

            let future = client_operator
                .query(
                    "slow",
                    Value::object([("a", Value::from(1))]),
                    QueryOptions::with_timeout(Duration::from_millis(5))
                        .on_timeout(TimeoutBehavior::Discard),
                )
                .expect("start");
            // The entry is dropped at the deadline and the future stays
            // pending; disposing of it is the caller's job.
            let raced = tokio::time::timeout(Duration::from_millis(60), future).await;
            assert!(raced.is_err());
        })
        .await;
}
