//! End-to-end trigger flow between a server connection and a client,
//! wired back to back in memory.

use std::cell::RefCell;
use std::rc::Rc;

use eventwire::{Client, EventRule, Packet, RuleType, Server, ServerClient, Value};

/// Connect both agents through in-memory sinks, delivering packets
/// synchronously in send order.
fn wire(server_client: &ServerClient, client: &Client) {
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
}

#[test]
fn ping_arrives_twice_in_order() {
    let server = Server::new();
    let server_client = server.create_client();
    let client = Client::new();
    wire(&server_client, &client);

    server
        .add_server_event_rule(
            "ping",
            EventRule::typed(vec![("n", RuleType::integer())]).expect("rule"),
        )
        .expect("register");

    let seen: Rc<RefCell<Vec<Value>>> = Rc::new(RefCell::new(Vec::new()));
    let log = Rc::clone(&seen);
    server_client
        .set_event_listener("ping", move |meta, _| {
            log.borrow_mut().push(meta.clone());
            Ok(())
        })
        .expect("listener");

    client.send_trigger("ping", &Value::object([("n", Value::from(1))]));
    client.send_trigger("ping", &Value::object([("n", Value::from(2))]));

    assert_eq!(
        seen.borrow().as_slice(),
        [
            Value::object([("n", Value::from(1))]),
            Value::object([("n", Value::from(2))]),
        ]
    );
}

#[test]
fn alternating_triggers_arrive_in_send_order() {
    let server = Server::new();
    let server_client = server.create_client();
    let client = Client::new();
    wire(&server_client, &client);

    server
        .add_server_event_rule(
            "server_event",
            EventRule::typed(vec![("seq", RuleType::number())]).expect("rule"),
        )
        .expect("register");
    server
        .add_client_event_rule("client_event", EventRule::untyped(["seq"]).expect("rule"))
        .expect("register");
    client
        .add_event_rule(
            "client_event",
            EventRule::typed(vec![("seq", RuleType::number())]).expect("rule"),
        )
        .expect("register");

    let seen: Rc<RefCell<Vec<(&'static str, Value)>>> = Rc::new(RefCell::new(Vec::new()));
    let log = Rc::clone(&seen);
    server_client
        .set_event_listener("server_event", move |meta, _| {
            log.borrow_mut().push(("server", meta.clone()));
            Ok(())
        })
        .expect("listener");
    let log = Rc::clone(&seen);
    client
        .set_event_listener("client_event", move |meta, _| {
            log.borrow_mut().push(("client", meta.clone()));
            Ok(())
        })
        .expect("listener");

    for seq in 0..6 {
        let payload = Value::object([("seq", Value::from(seq))]);
        if seq % 2 == 0 {
            client.send_trigger("server_event", &payload);
        } else {
            server_client.send_trigger("client_event", &payload);
        }
    }

    let expected: Vec<(&str, Value)> = (0..6)
        .map(|seq| {
            let receiver = if seq % 2 == 0 { "server" } else { "client" };
            (receiver, Value::object([("seq", Value::from(seq))]))
        })
        .collect();
    assert_eq!(seen.borrow().as_slice(), expected.as_slice());
}

#[test]
fn short_code_negotiation_progresses_both_directions() {
    let server = Server::new();
    let server_client = server.create_client();
    let client = Client::new();

    // Tap both directions before forwarding.
    let client_out: Rc<RefCell<Vec<Packet>>> = Rc::new(RefCell::new(Vec::new()));
    let server_out: Rc<RefCell<Vec<Packet>>> = Rc::new(RefCell::new(Vec::new()));
    {
        let log = Rc::clone(&server_out);
        let peer = client.clone();
        server_client.on_send(move |packet| {
            log.borrow_mut().push(packet.clone());
            peer.receive_data(&packet.prefix, &packet.body)
                .expect("client receive");
        });
        let log = Rc::clone(&client_out);
        let peer = server_client.clone();
        client.on_send(move |packet| {
            log.borrow_mut().push(packet.clone());
            peer.receive_data(&packet.prefix, &packet.body)
                .expect("server receive");
        });
    }

    server
        .add_server_event_rule(
            "up",
            EventRule::typed(vec![("n", RuleType::integer())]).expect("rule"),
        )
        .expect("register");
    server
        .add_client_event_rule("down", EventRule::untyped(["n"]).expect("rule"))
        .expect("register");
    client
        .add_event_rule(
            "down",
            EventRule::typed(vec![("n", RuleType::integer())]).expect("rule"),
        )
        .expect("register");
    server_client
        .set_event_listener("up", |_, _| Ok(()))
        .expect("listener");
    client
        .set_event_listener("down", |_, _| Ok(()))
        .expect("listener");

    let payload = |n: i64| Value::object([("n", Value::from(n))]);

    // Client → server: verbose first, the advertised code afterwards.
    client.send_trigger("up", &payload(0));
    client.send_trigger("up", &payload(1));
    {
        let out = client_out.borrow();
        assert_eq!(out[0].prefix, "*up");
        assert_eq!(out[1].prefix, "0");
        assert_eq!(out[1].body, Value::array([Value::from(1)]));
    }
    {
        let out = server_out.borrow();
        assert_eq!(out[0].prefix, "=up");
    }

    // Server → client: code and first payload travel together, then the
    // bare code.
    server_client.send_trigger("down", &payload(2));
    server_client.send_trigger("down", &payload(3));
    {
        let out = server_out.borrow();
        assert_eq!(out[1].prefix, "+down");
        assert_eq!(out[1].body.get("short"), &Value::from("0"));
        assert_eq!(out[2].prefix, "0");
        assert_eq!(out[2].body, Value::array([Value::from(3)]));
    }
}
