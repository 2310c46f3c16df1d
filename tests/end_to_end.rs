//! End-to-end scenarios: two adapter services wired through the in-process
//! transport, one acting as the peer of the other.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use silcla::prelude::*;
use silcla::transport::local::LocalBroker;
use silcla::value::ValueUpdateMode;

fn wait_until(what: &str, predicate: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !predicate() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(20));
    }
}

fn counter(hits: &Arc<AtomicUsize>) -> Arc<dyn Fn(&ValueEntity) + Send + Sync> {
    let hits = Arc::clone(hits);
    Arc::new(move |_| {
        hits.fetch_add(1, Ordering::SeqCst);
    })
}

#[test_log::test]
fn consumed_data_fan_out_distinguishes_update_and_change() {
    let broker = LocalBroker::new();

    let provider = ClaService::new(Box::new(broker.factory()));
    let provided = provider
        .get_do("Demo::Counter")
        .unwrap()
        .provided_data("Value", TxTrigger::OnUpdate)
        .unwrap();

    let consumer = ClaService::new(Box::new(broker.factory()));
    let consumed = consumer
        .get_do("Demo::Counter")
        .unwrap()
        .consumed_data("Value")
        .unwrap();

    let updates = Arc::new(AtomicUsize::new(0));
    let changes = Arc::new(AtomicUsize::new(0));
    let order = Arc::new(Mutex::new(Vec::new()));
    let o = Arc::clone(&order);
    let c = Arc::clone(&changes);
    consumed.value().register_callback(
        Arc::new(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            o.lock().push("change");
        }),
        ValueUpdateMode::OnChange,
    );
    let o = Arc::clone(&order);
    let u = Arc::clone(&updates);
    consumed.value().register_callback(
        Arc::new(move |_| {
            u.fetch_add(1, Ordering::SeqCst);
            o.lock().push("update");
        }),
        ValueUpdateMode::OnUpdate,
    );

    consumer.connect_with_name("consumer").unwrap();
    provider.connect_with_name("provider").unwrap();

    // int32 = 1 on the wire.
    let mut ser = provided.value().serializer();
    ser.write_i32(1, 32);
    ser.end();
    wait_until("first update", || updates.load(Ordering::SeqCst) == 1);
    assert_eq!(changes.load(Ordering::SeqCst), 1);
    assert_eq!(*order.lock(), vec!["change", "update"]);
    assert_eq!(consumed.value().copy_data(), vec![0x01, 0x00, 0x00, 0x00]);

    // The identical payload again: an update but no change.
    let mut ser = provided.value().serializer();
    ser.write_i32(1, 32);
    ser.end();
    wait_until("second update", || updates.load(Ordering::SeqCst) == 2);
    assert_eq!(changes.load(Ordering::SeqCst), 1);

    provider.disconnect().unwrap();
    consumer.disconnect().unwrap();
}

#[test_log::test]
fn field_getter_updates_the_cached_value() {
    let broker = LocalBroker::new();

    let provider = ClaService::new(Box::new(broker.factory()));
    let provided = provider
        .get_do("Demo::Room")
        .unwrap()
        .provided_field("Temperature", TxTrigger::OnChange)
        .unwrap();
    let _provided_getter = provided.getter().unwrap();
    {
        let mut ser = provided.value().serializer();
        ser.write_i32(42, 32);
        ser.end();
    }

    let consumer = ClaService::new(Box::new(broker.factory()));
    let consumed = consumer
        .get_do("Demo::Room")
        .unwrap()
        .consumed_field("Temperature")
        .unwrap();
    let getter = consumed.getter().unwrap();
    let changes = Arc::new(AtomicUsize::new(0));
    consumed
        .value()
        .register_callback(counter(&changes), ValueUpdateMode::OnChange);

    provider.connect_with_name("provider").unwrap();
    consumer.connect_with_name("consumer").unwrap();

    let context = getter.create_call_context();
    context.input_serializer().end();
    let state = context.call_blocking(Duration::from_secs(5)).unwrap();
    assert_eq!(state, CallState::Returned);

    let cached = {
        let mut de = consumed.value().deserializer();
        de.read_i32(32).unwrap()
    };
    assert_eq!(cached, 42);
    assert_eq!(changes.load(Ordering::SeqCst), 1);
    assert_eq!(context.output_deserializer().read_i32(32).unwrap(), 42);

    consumer.disconnect().unwrap();
    provider.disconnect().unwrap();
}

#[test_log::test]
fn retries_preserve_dispatch_order_once_the_server_comes_up() {
    let broker = LocalBroker::new();

    let consumer = ClaService::new(Box::new(broker.factory()));
    let method = consumer
        .get_do("Demo::Machine")
        .unwrap()
        .consumed_method("Process")
        .unwrap();
    consumer.connect_with_name("consumer").unwrap();

    // Server is down: the three calls queue up in dispatch order.
    let order = Arc::new(Mutex::new(Vec::new()));
    let fired = Arc::new(AtomicUsize::new(0));
    let mut contexts = Vec::new();
    for tag in [10, 20, 30] {
        let context = method.create_call_context();
        let mut ser = context.input_serializer();
        ser.write_i32(tag, 32);
        ser.end();
        let o = Arc::clone(&order);
        let f = Arc::clone(&fired);
        let echoed_from = Arc::clone(&context);
        context
            .call_async(Some(Box::new(move || {
                let mut de = echoed_from.output_deserializer();
                o.lock().push(de.read_i32(32).unwrap());
                f.fetch_add(1, Ordering::SeqCst);
            })))
            .unwrap();
        contexts.push(context);
    }
    assert_eq!(fired.load(Ordering::SeqCst), 0);

    // Server comes up: the worker sweep drains the queue front to back.
    let provider = ClaService::new(Box::new(broker.factory()));
    let served = provider
        .get_do("Demo::Machine")
        .unwrap()
        .provided_method("Process")
        .unwrap();
    served.set_callback(Some(Arc::new(|context: &ProviderCallContext| {
        let input = {
            let mut de = context.input_deserializer();
            de.read_i32(32).unwrap_or_default()
        };
        let mut ser = context.output_serializer();
        ser.write_i32(input, 32);
        ser.end();
    })));
    provider.connect_with_name("provider").unwrap();

    wait_until("all three responses", || fired.load(Ordering::SeqCst) == 3);
    assert_eq!(*order.lock(), vec![10, 20, 30]);
    for context in &contexts {
        assert_eq!(context.call_state(), CallState::Returned);
    }

    consumer.disconnect().unwrap();
    provider.disconnect().unwrap();
}

#[test_log::test]
fn dropping_the_context_cancels_the_call_and_drops_the_late_response() {
    let broker = LocalBroker::new();

    let provider = ClaService::new(Box::new(broker.factory()));
    let served = provider
        .get_do("Demo::Machine")
        .unwrap()
        .provided_method("Slow")
        .unwrap();
    let handled = Arc::new(AtomicUsize::new(0));
    let h = Arc::clone(&handled);
    served.set_callback(Some(Arc::new(move |context: &ProviderCallContext| {
        // Keep the response in flight long enough for the host to give up.
        std::thread::sleep(Duration::from_millis(300));
        h.fetch_add(1, Ordering::SeqCst);
        context.output_serializer().end();
    })));
    provider.connect_with_name("provider").unwrap();

    let consumer = ClaService::new(Box::new(broker.factory()));
    let method = consumer
        .get_do("Demo::Machine")
        .unwrap()
        .consumed_method("Slow")
        .unwrap();
    consumer.connect_with_name("consumer").unwrap();

    let fired = Arc::new(AtomicUsize::new(0));
    let context = method.create_call_context();
    context.input_serializer().end();
    let f = Arc::clone(&fired);
    context
        .call_async(Some(Box::new(move || {
            f.fetch_add(1, Ordering::SeqCst);
        })))
        .unwrap();
    drop(context);

    // The provider still services the request; the response finds no context.
    wait_until("provider handling", || handled.load(Ordering::SeqCst) == 1);
    std::thread::sleep(Duration::from_millis(200));
    assert_eq!(fired.load(Ordering::SeqCst), 0);

    consumer.disconnect().unwrap();
    provider.disconnect().unwrap();
}

#[test_log::test]
fn waiting_on_a_silent_topic_times_out() {
    let broker = LocalBroker::new();

    let consumer = ClaService::new(Box::new(broker.factory()));
    let consumed = consumer
        .get_do("Demo::Quiet")
        .unwrap()
        .consumed_data("Nothing")
        .unwrap();
    consumed.block_at_connect(Duration::from_millis(200));
    consumer.connect_with_name("consumer").unwrap();

    assert!(matches!(
        consumed.wait_for_first_transmission(),
        Err(AdapterError::Timeout)
    ));
    consumer.disconnect().unwrap();
}

#[test_log::test]
fn provided_field_default_setter_stores_and_echoes() {
    let broker = LocalBroker::new();

    let provider = ClaService::new(Box::new(broker.factory()));
    let provided = provider
        .get_do("Demo::Lamp")
        .unwrap()
        .provided_field("Brightness", TxTrigger::OnChange)
        .unwrap();
    // No user callback: the default implementation services the setter.
    let _setter = provided.setter().unwrap();
    provider.connect_with_name("provider").unwrap();

    let consumer = ClaService::new(Box::new(broker.factory()));
    let consumed = consumer
        .get_do("Demo::Lamp")
        .unwrap()
        .consumed_field("Brightness")
        .unwrap();
    let setter = consumed.setter().unwrap();
    consumer.connect_with_name("consumer").unwrap();

    let context = setter.create_call_context();
    {
        let mut ser = context.input_serializer();
        ser.write_u8(123, 8);
        ser.end();
    }
    let state = context.call_blocking(Duration::from_secs(5)).unwrap();
    assert_eq!(state, CallState::Returned);

    assert_eq!(provided.value().copy_data(), vec![0x7B]);
    // The setter response is the new field value and lands in the cache.
    assert_eq!(consumed.value().copy_data(), vec![0x7B]);

    consumer.disconnect().unwrap();
    provider.disconnect().unwrap();
}

#[test_log::test]
fn disconnect_is_a_transmission_barrier() {
    let broker = LocalBroker::new();

    let provider = ClaService::new(Box::new(broker.factory()));
    let provided = provider
        .get_do("Demo::Counter")
        .unwrap()
        .provided_data("Value", TxTrigger::OnUpdate)
        .unwrap();

    let consumer = ClaService::new(Box::new(broker.factory()));
    let consumed = consumer
        .get_do("Demo::Counter")
        .unwrap()
        .consumed_data("Value")
        .unwrap();
    let updates = Arc::new(AtomicUsize::new(0));
    consumed
        .value()
        .register_callback(counter(&updates), ValueUpdateMode::OnUpdate);

    consumer.connect_with_name("consumer").unwrap();
    provider.connect_with_name("provider").unwrap();

    provided.value().set_data(vec![1]);
    wait_until("delivery", || updates.load(Ordering::SeqCst) == 1);

    provider.disconnect().unwrap();
    provided.value().set_data(vec![2]);
    std::thread::sleep(Duration::from_millis(200));
    assert_eq!(updates.load(Ordering::SeqCst), 1);
    assert_eq!(consumed.value().copy_data(), vec![1]);

    consumer.disconnect().unwrap();
}

#[test_log::test]
fn one_adapter_can_provide_and_consume_different_objects() {
    let broker = LocalBroker::new();

    let left = ClaService::new(Box::new(broker.factory()));
    let right = ClaService::new(Box::new(broker.factory()));

    let left_out = left
        .get_do("Demo::Left")
        .unwrap()
        .provided_event("Pulse", TxTrigger::OnUpdate)
        .unwrap();
    let left_in = left
        .get_do("Demo::Right")
        .unwrap()
        .consumed_event("Pulse")
        .unwrap();
    let right_out = right
        .get_do("Demo::Right")
        .unwrap()
        .provided_event("Pulse", TxTrigger::OnUpdate)
        .unwrap();
    let right_in = right
        .get_do("Demo::Left")
        .unwrap()
        .consumed_event("Pulse")
        .unwrap();

    left_in.block_at_connect(Duration::from_secs(5));
    right_in.block_at_connect(Duration::from_secs(5));
    left.connect_with_name("left").unwrap();
    right.connect_with_name("right").unwrap();

    left_out.trigger();
    right_out.trigger();
    left_in.wait_for_first_transmission().unwrap();
    right_in.wait_for_first_transmission().unwrap();

    left.disconnect().unwrap();
    right.disconnect().unwrap();
}
