//! Timeouts.
//!
//! GREEN when:
//! - `order.buy {symbol:EURUSD}` with a 5000ms window and nobody polling
//!   returns Timeout, and the command is gone from the queue.
//! - A command taken but never answered times out too; the late response
//!   is benign (no error, nothing resolved).
//! - Under concurrent load, unanswered waiters time out while answered
//!   ones receive their own response.

use std::sync::Arc;
use std::time::Duration;

use mtb_broker::{
    BrokerError, BrokerEvent, Controller, ControllerSettings, HttpCallbackTransport,
};

fn controller() -> Arc<Controller> {
    Arc::new(
        Controller::new(
            ControllerSettings::default(),
            Arc::new(HttpCallbackTransport::new(Duration::from_secs(1))),
        )
        .unwrap(),
    )
}

#[tokio::test(start_paused = true)]
async fn untaken_command_times_out_after_window() {
    let c = controller();
    let mut events = c.subscribe();

    let started = tokio::time::Instant::now();
    let err = c
        .handle_inbound_request("order.buy", "{symbol:EURUSD}", Duration::from_millis(5000))
        .await
        .unwrap_err();

    assert!(started.elapsed() >= Duration::from_millis(5000));
    match err {
        BrokerError::Timeout { waited_ms, .. } => assert_eq!(waited_ms, 5000),
        other => panic!("expected timeout, got {other:?}"),
    }
    let status = c.status();
    assert_eq!((status.pending, status.inflight), (0, 0));

    assert!(matches!(events.recv().await.unwrap(), BrokerEvent::Queued { .. }));
    assert!(matches!(events.recv().await.unwrap(), BrokerEvent::TimedOut { .. }));
}

#[tokio::test(start_paused = true)]
async fn taken_command_times_out_and_late_response_is_ignored() {
    let c = controller();
    let inbound = {
        let c = Arc::clone(&c);
        tokio::spawn(async move {
            c.handle_inbound_request("order.buy", "{symbol:EURUSD}", Duration::from_millis(5000))
                .await
        })
    };

    assert!(c.poll_wait_for_command(None, Duration::from_secs(1)).await.unwrap());
    let envelope = c.poll_take_command(None).unwrap().unwrap();

    assert!(matches!(
        inbound.await.unwrap(),
        Err(BrokerError::Timeout { .. })
    ));
    assert_eq!(c.status().inflight, 0);

    assert_eq!(
        c.post_command_response(None, &envelope.id.to_string(), "late")
            .unwrap(),
        None
    );
    assert_eq!(
        c.post_command_response(None, "order.buy", "late").unwrap(),
        None
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn mixed_load_times_out_only_unanswered() {
    let c = controller();
    let window = Duration::from_millis(2000);

    let waiters: Vec<_> = (0..20)
        .map(|i| {
            let c = Arc::clone(&c);
            tokio::spawn(async move {
                c.handle_inbound_request(&format!("cmd{i}"), &i.to_string(), window)
                    .await
            })
        })
        .collect();

    // Answer the even-numbered payloads as they arrive.
    let responder = {
        let c = Arc::clone(&c);
        tokio::spawn(async move {
            let mut answered = 0;
            while answered < 10 {
                if !c.poll_wait_for_command(None, Duration::from_millis(50)).await.unwrap() {
                    continue;
                }
                while let Some(env) = c.poll_take_command(None).unwrap() {
                    let n: usize = env.payload.parse().unwrap();
                    if n % 2 == 0 {
                        c.post_command_response(None, &env.id.to_string(), &format!("ok{n}"))
                            .unwrap();
                        answered += 1;
                    }
                }
            }
        })
    };

    for (i, w) in waiters.into_iter().enumerate() {
        match w.await.unwrap() {
            Ok(r) => {
                assert_eq!(i % 2, 0);
                assert_eq!(r, format!("ok{i}"));
            }
            Err(BrokerError::Timeout { .. }) => assert_eq!(i % 2, 1),
            Err(other) => panic!("unexpected {other:?}"),
        }
    }
    responder.await.unwrap();
    assert_eq!(c.status().inflight, 0);
}
