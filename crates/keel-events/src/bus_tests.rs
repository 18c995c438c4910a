use super::*;
use crate::EventCollector;
use std::sync::atomic::AtomicUsize;

#[derive(Debug, Clone, Default, PartialEq)]
struct Scored {
    points: u32,
}

#[derive(Debug, Clone, Default)]
struct Tick;

fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) + Clone + Send + Sync + 'static) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = log.clone();
    let push = move |entry: &str| sink.lock().push(entry.to_string());
    (log, push)
}

#[test]
fn test_publish_without_subscribers_is_noop() {
    let bus = EventBus::new();
    let outcome = bus.publish(Scored { points: 1 });
    assert_eq!(outcome, PublishOutcome::Delivered { handlers: 0, failures: 0 });
}

#[test]
fn test_handlers_run_in_subscription_order() {
    let bus = EventBus::new();
    let (log, push) = recorder();

    let h1 = push.clone();
    bus.subscribe(move |_: &Scored| {
        h1("H1");
        Ok(())
    });
    let h2 = push.clone();
    bus.subscribe(move |_: &Scored| {
        h2("H2");
        Ok(())
    });

    let outcome = bus.publish(Scored { points: 5 });
    assert_eq!(outcome.handlers(), 2);
    assert_eq!(*log.lock(), vec!["H1", "H2"]);
}

#[test]
fn test_handlers_only_see_their_event_type() {
    let bus = EventBus::new();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    bus.subscribe(move |_: &Tick| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    bus.publish(Scored::default());
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    bus.publish(Tick);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[test]
fn test_abort_blocks_every_subscriber() {
    let bus = EventBus::new();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    bus.subscribe(move |_: &Scored| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    bus.add_interceptor::<Scored, _>(0, |_| Ok(Intercept::Abort));

    assert_eq!(bus.publish(Scored::default()), PublishOutcome::Aborted);
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[test]
fn test_stop_chain_still_delivers() {
    let bus = EventBus::new();
    let (log, push) = recorder();

    let first = push.clone();
    bus.add_interceptor::<Scored, _>(0, move |_| {
        first("stop");
        Ok(Intercept::StopChain)
    });
    let second = push.clone();
    bus.add_interceptor::<Scored, _>(1, move |_| {
        second("skipped");
        Ok(Intercept::Abort)
    });
    let handler = push.clone();
    bus.subscribe(move |_: &Scored| {
        handler("handler");
        Ok(())
    });

    assert!(bus.publish(Scored::default()).is_delivered());
    assert_eq!(*log.lock(), vec!["stop", "handler"]);
}

#[test]
fn test_interceptor_error_aborts() {
    let bus = EventBus::new();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    bus.subscribe(move |_: &Scored| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    bus.add_interceptor::<Scored, _>(0, |_| Err(anyhow::anyhow!("gate exploded")));

    assert_eq!(bus.publish(Scored::default()), PublishOutcome::Aborted);
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[test]
fn test_interceptor_rewrites_payload_and_sender() {
    let bus = EventBus::new();
    let seen = Arc::new(Mutex::new(None));
    let sink = seen.clone();
    bus.subscribe_with_sender(move |event: &Scored, sender: Option<&str>| {
        *sink.lock() = Some((event.points, sender.map(str::to_string)));
        Ok(())
    });
    bus.add_interceptor::<Scored, _>(0, |packet| {
        packet.payload.points *= 10;
        *packet.sender = Some("referee".to_string());
        Ok(Intercept::Continue)
    });

    bus.publish_from("player", Scored { points: 3 });
    assert_eq!(*seen.lock(), Some((30, Some("referee".to_string()))));
}

#[test]
fn test_typed_and_global_chains_merge_by_priority() {
    let bus = EventBus::new();
    let (log, push) = recorder();

    let a = push.clone();
    bus.add_interceptor::<Scored, _>(10, move |_| {
        a("typed-10");
        Ok(Intercept::Continue)
    });
    let b = push.clone();
    bus.add_global_interceptor(-5, move |packet| {
        assert!(packet.is::<Scored>());
        b("global-minus-5");
        Ok(Intercept::Continue)
    });
    let c = push.clone();
    bus.add_interceptor::<Scored, _>(0, move |_| {
        c("typed-0");
        Ok(Intercept::Continue)
    });
    let d = push.clone();
    bus.add_global_interceptor(0, move |_| {
        d("global-0");
        Ok(Intercept::Continue)
    });

    bus.publish(Scored::default());
    assert_eq!(
        *log.lock(),
        vec!["global-minus-5", "typed-0", "global-0", "typed-10"]
    );
}

#[test]
fn test_global_interceptor_sees_other_types() {
    let bus = EventBus::new();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    bus.add_global_interceptor(0, move |packet| {
        if packet.is::<Tick>() {
            return Ok(Intercept::Abort);
        }
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(Intercept::Continue)
    });

    assert_eq!(bus.publish(Tick), PublishOutcome::Aborted);
    assert!(bus.publish(Scored::default()).is_delivered());
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[test]
fn test_failing_handler_does_not_stop_others() {
    let bus = EventBus::new();
    let hits = Arc::new(AtomicUsize::new(0));

    bus.subscribe(|_: &Scored| anyhow::bail!("broken handler"));
    let counter = hits.clone();
    bus.subscribe(move |_: &Scored| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    let outcome = bus.publish(Scored::default());
    assert_eq!(outcome, PublishOutcome::Delivered { handlers: 2, failures: 1 });
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[test]
fn test_once_handler_runs_once() {
    let bus = EventBus::new();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let sub = bus.subscribe_once(move |_: &Tick| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    bus.publish(Tick);
    bus.publish(Tick);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert!(!sub.is_active());
    assert_eq!(bus.subscriber_count::<Tick>(), 0);
}

#[test]
fn test_failing_once_handler_is_still_removed() {
    let bus = EventBus::new();
    bus.subscribe_once(|_: &Tick| anyhow::bail!("nope"));

    assert_eq!(bus.publish(Tick).failures(), 1);
    assert_eq!(bus.publish(Tick).handlers(), 0);
}

#[test]
fn test_unsubscribe_is_idempotent() {
    let bus = EventBus::new();
    let sub = bus.subscribe(|_: &Tick| Ok(()));
    assert_eq!(bus.subscriber_count::<Tick>(), 1);

    assert!(sub.unsubscribe());
    assert!(!sub.unsubscribe());
    assert_eq!(bus.subscriber_count::<Tick>(), 0);
    assert_eq!(bus.publish(Tick).handlers(), 0);
}

#[test]
fn test_unsubscribe_after_bus_dropped() {
    let bus = EventBus::new();
    let sub = bus.subscribe(|_: &Tick| Ok(()));
    drop(bus);
    assert!(sub.unsubscribe());
}

#[test]
fn test_handler_unsubscribing_later_handler_mid_dispatch() {
    let bus = EventBus::new();
    let hits = Arc::new(AtomicUsize::new(0));
    let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

    let target = slot.clone();
    bus.subscribe(move |_: &Tick| {
        if let Some(sub) = target.lock().take() {
            sub.unsubscribe();
        }
        Ok(())
    });
    let counter = hits.clone();
    let second = bus.subscribe(move |_: &Tick| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    *slot.lock() = Some(second);

    assert_eq!(bus.publish(Tick).handlers(), 1);
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[test]
fn test_collector_releases_only_its_registrations() {
    let bus = EventBus::new();
    let collector = EventCollector::new();

    bus.subscribe(|_: &Tick| Ok(())).add_to(&collector);
    bus.subscribe(|_: &Tick| Ok(())).add_to(&collector);
    let outsider = bus.subscribe(|_: &Tick| Ok(()));
    assert_eq!(collector.len(), 2);

    assert_eq!(collector.dispose(), 2);
    assert_eq!(collector.dispose(), 0);
    assert!(outsider.is_active());
    assert_eq!(bus.subscriber_count::<Tick>(), 1);
}

#[test]
fn test_collector_drop_releases() {
    let bus = EventBus::new();
    {
        let collector = EventCollector::new();
        bus.subscribe(|_: &Scored| Ok(())).add_to(&collector);
        bus.add_interceptor::<Scored, _>(0, |_| Ok(Intercept::Abort))
            .add_to(&collector);
        assert_eq!(bus.publish(Scored::default()), PublishOutcome::Aborted);
    }
    assert_eq!(bus.subscriber_count::<Scored>(), 0);
    assert_eq!(bus.interceptor_count::<Scored>(), 0);
    assert!(bus.publish(Scored::default()).is_delivered());
}

#[test]
fn test_interceptor_handle_remove() {
    let bus = EventBus::new();
    let handle = bus.add_global_interceptor(0, |_| Ok(Intercept::Abort));
    assert!(handle.is_global());
    assert_eq!(bus.publish(Tick), PublishOutcome::Aborted);

    assert!(handle.remove());
    assert!(!handle.remove());
    assert_eq!(bus.global_interceptor_count(), 0);
    assert!(bus.publish(Tick).is_delivered());
}

#[test]
fn test_reentrant_publish_is_queued_fifo() {
    let bus = EventBus::new();
    let (log, push) = recorder();

    let inner_bus = bus.clone();
    let on_scored = push.clone();
    let nested: Arc<Mutex<Vec<PublishOutcome>>> = Arc::new(Mutex::new(Vec::new()));
    let nested_sink = nested.clone();
    bus.subscribe(move |event: &Scored| {
        on_scored(&format!("scored-{}", event.points));
        if event.points == 0 {
            nested_sink.lock().push(inner_bus.publish(Tick));
            nested_sink.lock().push(inner_bus.publish(Scored { points: 1 }));
        }
        Ok(())
    });
    let on_tick = push.clone();
    bus.subscribe(move |_: &Tick| {
        on_tick("tick");
        Ok(())
    });

    let outcome = bus.publish(Scored { points: 0 });
    assert_eq!(outcome.handlers(), 1);
    assert_eq!(*nested.lock(), vec![PublishOutcome::Queued, PublishOutcome::Queued]);
    assert_eq!(*log.lock(), vec!["scored-0", "tick", "scored-1"]);
    assert_eq!(bus.queued(), 0);
}

#[test]
fn test_publish_default() {
    let bus = EventBus::new();
    let seen = Arc::new(Mutex::new(None));
    let sink = seen.clone();
    bus.subscribe(move |event: &Scored| {
        *sink.lock() = Some(event.clone());
        Ok(())
    });

    bus.publish_default::<Scored>();
    assert_eq!(*seen.lock(), Some(Scored { points: 0 }));
}

#[test]
fn test_reset_clears_everything() {
    let bus = EventBus::new();
    let sub = bus.subscribe(|_: &Tick| Ok(()));
    let handle = bus.add_global_interceptor(0, |_| Ok(Intercept::Abort));

    bus.reset();
    assert!(!sub.is_active());
    assert!(!handle.is_active());
    assert_eq!(bus.subscriber_count::<Tick>(), 0);
    assert_eq!(bus.global_interceptor_count(), 0);
    assert_eq!(bus.publish(Tick), PublishOutcome::Delivered { handlers: 0, failures: 0 });
}

#[test]
fn test_async_handler_without_runtime_counts_as_failure() {
    let bus = EventBus::new();
    bus.subscribe_async(|_: Arc<Tick>| async { anyhow::Ok(()) });

    let outcome = bus.publish(Tick);
    assert_eq!(outcome, PublishOutcome::Delivered { handlers: 1, failures: 1 });
}

#[tokio::test]
async fn test_publish_spawns_async_handlers() {
    let bus = EventBus::new();
    let (tx, rx) = tokio::sync::oneshot::channel::<u32>();
    let tx = Arc::new(Mutex::new(Some(tx)));
    bus.subscribe_async(move |event: Arc<Scored>| {
        let tx = tx.clone();
        async move {
            if let Some(tx) = tx.lock().take() {
                let _ = tx.send(event.points);
            }
            anyhow::Ok(())
        }
    });

    let outcome = bus.publish(Scored { points: 9 });
    assert_eq!(outcome, PublishOutcome::Delivered { handlers: 1, failures: 0 });
    assert_eq!(rx.await.unwrap(), 9);
}

#[tokio::test]
async fn test_publish_async_awaits_and_counts_failures() {
    let bus = EventBus::new();
    let done = Arc::new(AtomicUsize::new(0));

    let counter = done.clone();
    bus.subscribe_async(move |_: Arc<Tick>| {
        let counter = counter.clone();
        async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            counter.fetch_add(1, Ordering::SeqCst);
            anyhow::Ok(())
        }
    });
    bus.subscribe_async(|_: Arc<Tick>| async { Err::<(), _>(anyhow::anyhow!("async failure")) });
    let counter = done.clone();
    bus.subscribe(move |_: &Tick| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    let outcome = bus.publish_async(Tick).await;
    assert_eq!(outcome, PublishOutcome::Delivered { handlers: 3, failures: 1 });
    assert_eq!(done.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_publish_async_respects_abort() {
    let bus = EventBus::new();
    bus.subscribe_async(|_: Arc<Tick>| async { anyhow::Ok(()) });
    bus.add_interceptor::<Tick, _>(0, |_| Ok(Intercept::Abort));

    assert_eq!(bus.publish_async(Tick).await, PublishOutcome::Aborted);
}

#[derive(Debug, Clone, Default)]
struct Ping;

#[tokio::test]
async fn test_publish_delivers_while_publish_async_awaits() {
    let bus = EventBus::new();
    let started = Arc::new(tokio::sync::Notify::new());
    let release = Arc::new(tokio::sync::Notify::new());

    let (started_tx, release_rx) = (started.clone(), release.clone());
    bus.subscribe_async(move |_: Arc<Tick>| {
        let (started, release) = (started_tx.clone(), release_rx.clone());
        async move {
            started.notify_one();
            release.notified().await;
            anyhow::Ok(())
        }
    });
    let pinged = Arc::new(AtomicUsize::new(0));
    let counter = pinged.clone();
    bus.subscribe(move |_: &Ping| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    let slow_bus = bus.clone();
    let slow = tokio::spawn(async move { slow_bus.publish_async(Tick).await });
    started.notified().await;

    assert_eq!(bus.publish(Ping), PublishOutcome::Delivered { handlers: 1, failures: 0 });
    assert_eq!(pinged.load(Ordering::SeqCst), 1);
    assert_eq!(bus.queued(), 0);

    release.notify_one();
    let outcome = slow.await.unwrap();
    assert_eq!(outcome, PublishOutcome::Delivered { handlers: 1, failures: 0 });
}

#[test]
fn test_invoke_now_runs_one_handler_with_default() {
    let bus = EventBus::new();
    let (log, push) = recorder();
    bus.add_interceptor::<Scored, _>(0, |_| Ok(Intercept::Abort));

    let first = push.clone();
    let sub = bus.subscribe(move |event: &Scored| {
        first(&format!("first {}", event.points));
        Ok(())
    });
    let second = push.clone();
    bus.subscribe(move |_: &Scored| {
        second("second");
        Ok(())
    });

    assert!(sub.invoke_now::<Scored>());
    assert!(!sub.invoke_now::<Tick>());
    assert_eq!(*log.lock(), vec!["first 0"]);

    sub.unsubscribe();
    assert!(!sub.invoke_now::<Scored>());
}

#[test]
fn test_invoke_now_consumes_once_handler() {
    let bus = EventBus::new();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let sub = bus.subscribe_once(move |_: &Tick| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    assert!(sub.invoke_now::<Tick>());
    assert!(!sub.invoke_now::<Tick>());
    bus.publish(Tick);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert!(!bus.has_subscribers::<Tick>());
}

#[test]
fn test_invoke_now_inside_dispatch_is_immediate() {
    let bus = EventBus::new();
    let (log, push) = recorder();

    let inner = push.clone();
    let scored = bus.subscribe(move |_: &Scored| {
        inner("scored");
        Ok(())
    });
    let outer = push.clone();
    bus.subscribe(move |_: &Tick| {
        outer("tick start");
        scored.invoke_now::<Scored>();
        outer("tick end");
        Ok(())
    });

    bus.publish(Tick);
    assert_eq!(*log.lock(), vec!["tick start", "scored", "tick end"]);
    assert_eq!(bus.queued(), 0);
}
