//! Integration tests: request/reply over a virtual circuit on a named local bus

use std::time::Duration;
use vcircuit_core::advisory;
use vcircuit_core::prelude::*;

fn fast() -> CircuitOptions {
    CircuitOptions::new()
        .with_heartbeat_ivl(Duration::from_millis(20))
        .with_missed_heartbeats(5)
}

#[test]
fn test_adder_over_circuit() {
    let bus_name = "circuit-tests-adder";
    let server_side = Transport::local(bus_name);
    let client_side = Transport::local(bus_name);

    // Server: accept a circuit and add x + y on a dispatch thread.
    let acceptor = VirtualCircuit::accept(&server_side, fast()).unwrap();
    let server_queue = Queue::new("server");
    let server_vc = acceptor.transport();
    let replier = server_vc.clone();
    let _work = Listener::new(
        &server_queue,
        &server_vc,
        Subject::parse("ADD").unwrap(),
        move |req| {
            let sum = req.get_u32("x").unwrap() + req.get_u32("y").unwrap();
            let mut reply = req.clone();
            reply.update_u32("sum", sum);
            replier.send_reply(reply, req).unwrap();
        },
    )
    .unwrap();
    let _server_dispatch = Dispatcher::spawn(&server_queue).unwrap();

    // Client: connect, send requests, collect sums on its own queue.
    let client = VirtualCircuit::connect(&client_side, acceptor.connect_subject(), fast()).unwrap();
    client.wait_for_connection(Duration::from_secs(1)).unwrap();

    let client_vc = client.transport();
    let reply_to = Subject::literal("ADD.REPLY").unwrap();
    let client_queue = Queue::new("client");
    let (tx, rx) = flume::unbounded();
    let _replies = Listener::new(&client_queue, &client_vc, reply_to.clone(), move |msg| {
        tx.send(msg.get_u32("sum").unwrap()).unwrap();
    })
    .unwrap();
    let _client_dispatch = Dispatcher::spawn(&client_queue).unwrap();

    for i in 0..20u32 {
        let req = Message::to(Subject::literal("ADD").unwrap())
            .with_reply_subject(reply_to.clone())
            .with_u32("x", i)
            .with_u32("y", 100);
        client_vc.send(req).unwrap();
    }

    let mut sums: Vec<u32> = (0..20)
        .map(|_| rx.recv_timeout(Duration::from_secs(2)).unwrap())
        .collect();
    sums.sort_unstable();
    assert_eq!(sums, (100..120).collect::<Vec<_>>());

    LocalBus::close(bus_name);
}

#[test]
fn test_dropping_acceptor_disconnects_client() {
    let bus_name = "circuit-tests-drop";
    let transport = Transport::local(bus_name);

    let acceptor = VirtualCircuit::accept(&transport, fast()).unwrap();
    let client = VirtualCircuit::connect(&transport, acceptor.connect_subject(), fast()).unwrap();
    client.wait_for_connection(Duration::from_secs(1)).unwrap();

    let queue = Queue::new("monitor");
    let (tx, rx) = flume::bounded(1);
    let _monitor = Listener::new(
        &queue,
        &client.transport(),
        advisory::disconnected_pattern(),
        move |msg| {
            let _ = tx.try_send(CircuitEvent::from_message(msg));
        },
    )
    .unwrap();

    drop(acceptor);
    queue.timed_dispatch(Duration::from_secs(1)).unwrap();

    assert!(matches!(
        rx.try_recv().unwrap(),
        Some(CircuitEvent::Disconnected { .. })
    ));
    assert_eq!(client.state(), CircuitState::Disconnected);

    LocalBus::close(bus_name);
}

#[test]
fn test_request_reply_through_shared_bus() {
    let bus_name = "circuit-tests-request";
    let transport = Transport::local(bus_name);

    let queue = Queue::new("responder");
    let replier = transport.clone();
    let _responder = Listener::new(
        &queue,
        &transport,
        Subject::parse("LOCATE").unwrap(),
        move |req| {
            replier
                .send_reply(Message::new().with_string("who", "server".into()), req)
                .unwrap();
        },
    )
    .unwrap();
    let _dispatch = Dispatcher::spawn(&queue).unwrap();

    let reply = transport
        .send_request(
            Message::to(Subject::literal("LOCATE").unwrap()),
            Duration::from_secs(1),
        )
        .unwrap();
    assert_eq!(reply.get_string("who").unwrap(), "server");

    LocalBus::close(bus_name);
}
