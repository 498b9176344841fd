//! Event bus under load: mixed sync/async fan-out, ordering, drop
//! accounting.

use agent_core::bus::{Delivery, EventBus};
use agent_core::events::{Event, EventPayload};
use agent_core::message::Message;
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn numbered(topic: &str, n: usize) -> Event {
    Event::new(
        topic,
        EventPayload::AgentMessage {
            message: Message::user(format!("e{n}")),
        },
    )
}

fn text_of(payload: &EventPayload) -> String {
    match payload {
        EventPayload::AgentMessage { message } => message.text(),
        _ => panic!("unexpected payload"),
    }
}

#[tokio::test]
async fn fifty_events_reach_sync_and_async_subscribers_in_order() {
    let bus = EventBus::new();
    let sync_seen = Arc::new(Mutex::new(Vec::new()));
    let async_seen = Arc::new(Mutex::new(Vec::new()));

    let sync_clone = Arc::clone(&sync_seen);
    bus.subscribe(
        "t",
        move |event| sync_clone.lock().unwrap().push(text_of(&event.payload)),
        Delivery::Sync,
    )
    .unwrap();

    let async_clone = Arc::clone(&async_seen);
    bus.subscribe(
        "t",
        move |event| async_clone.lock().unwrap().push(text_of(&event.payload)),
        Delivery::Buffered(100),
    )
    .unwrap();

    for n in 0..50 {
        // A buffer of 100 never blocks nor drops at 50 events.
        bus.publish(numbered("t", n)).unwrap();
    }

    let expected: Vec<String> = (0..50).map(|n| format!("e{n}")).collect();
    assert_eq!(*sync_seen.lock().unwrap(), expected);

    for _ in 0..100 {
        if async_seen.lock().unwrap().len() == 50 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(*async_seen.lock().unwrap(), expected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_publishers_preserve_per_subscriber_order() {
    // Two tasks publish interleaved; each subscriber must still see one
    // consistent publication order (every publisher's events in its own
    // order, no duplicates, no losses).
    let bus = Arc::new(EventBus::new());
    let seen = Arc::new(Mutex::new(Vec::new()));

    let seen_clone = Arc::clone(&seen);
    bus.subscribe(
        "t",
        move |event| seen_clone.lock().unwrap().push(text_of(&event.payload)),
        Delivery::Sync,
    )
    .unwrap();

    let mut handles = Vec::new();
    for publisher in 0..2 {
        let bus = Arc::clone(&bus);
        handles.push(tokio::spawn(async move {
            for n in 0..25 {
                bus.publish(Event::new(
                    "t",
                    EventPayload::AgentMessage {
                        message: Message::user(format!("p{publisher}-{n}")),
                    },
                ))
                .unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 50);
    for publisher in 0..2 {
        let ordered: Vec<&String> = seen
            .iter()
            .filter(|text| text.starts_with(&format!("p{publisher}-")))
            .collect();
        assert_eq!(ordered.len(), 25);
        for (n, text) in ordered.iter().enumerate() {
            assert_eq!(**text, format!("p{publisher}-{n}"));
        }
    }
}

#[tokio::test]
async fn unsubscribed_and_closed_bus_behave() {
    let bus = EventBus::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = Arc::clone(&seen);
    let id = bus
        .subscribe(
            "t",
            move |event| seen_clone.lock().unwrap().push(text_of(&event.payload)),
            Delivery::Sync,
        )
        .unwrap();

    bus.publish(numbered("t", 0)).unwrap();
    assert!(bus.unsubscribe("t", id));
    bus.publish(numbered("t", 1)).unwrap();
    assert_eq!(seen.lock().unwrap().len(), 1);

    bus.close();
    assert!(matches!(bus.publish(numbered("t", 2)), Err(agent_core::Error::BusClosed)));
}
