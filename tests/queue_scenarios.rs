//! End-to-end scenarios driving producer and consumer fibers on the lab
//! executor: partial batch admission under backpressure, rejection and
//! eviction strategies, interruption of a parked batch, and the full
//! graceful-drain protocol.

use aqueduct::lab::Lab;
use aqueduct::{Cx, Queue, TakeError};
use futures_lite::future::block_on;

fn init_test(name: &str) {
    aqueduct::test_logging::init_test_logging();
    aqueduct::test_phase!(name);
}

/// Bounded(2): a forked batch of four is admitted two at a time as the
/// consumer drains, and the producer fiber completes with nothing left
/// over.
#[test]
fn bounded_batch_drains_in_capacity_sized_waves() {
    init_test("bounded_batch_drains_in_capacity_sized_waves");
    let queue: Queue<i32, String> = Queue::bounded(2);
    let mut lab = Lab::new();

    let producer_queue = queue.clone();
    let producer = lab.spawn(async move {
        let cx = Cx::for_testing();
        producer_queue.offer_all(&cx, vec![1, 2, 3, 4]).await
    });
    lab.run_until_stalled();
    aqueduct::assert_with_log!(
        !producer.is_finished(),
        "producer parked with the second wave",
        false,
        producer.is_finished()
    );

    let cx = Cx::for_testing();
    let first = block_on(queue.take_all(&cx)).expect("first wave");
    aqueduct::assert_with_log!(first == vec![1, 2], "first wave", vec![1, 2], first);

    lab.run_until_stalled();
    let second = block_on(queue.take_all(&cx)).expect("second wave");
    aqueduct::assert_with_log!(second == vec![3, 4], "second wave", vec![3, 4], second);

    lab.run_until_stalled();
    let remainder = producer.try_join();
    aqueduct::assert_with_log!(
        remainder == Some(Vec::new()),
        "batch fully admitted",
        Some(Vec::<i32>::new()),
        remainder
    );
    aqueduct::test_complete!("bounded_batch_drains_in_capacity_sized_waves");
}

/// Unbounded: a forked batch is admitted at once and `take_n` slices it
/// in order.
#[test]
fn unbounded_batch_sliced_by_take_n() {
    init_test("unbounded_batch_sliced_by_take_n");
    let queue: Queue<i32, String> = Queue::unbounded();
    let mut lab = Lab::new();

    let producer_queue = queue.clone();
    let producer = lab.spawn(async move {
        let cx = Cx::for_testing();
        producer_queue.offer_all(&cx, vec![1, 2, 3, 4]).await
    });
    lab.run_until_stalled();
    let remainder = producer.try_join();
    aqueduct::assert_with_log!(
        remainder == Some(Vec::new()),
        "unbounded admits the whole batch",
        Some(Vec::<i32>::new()),
        remainder
    );

    let cx = Cx::for_testing();
    let first = block_on(queue.take_n(&cx, 2)).expect("first pair");
    aqueduct::assert_with_log!(first == vec![1, 2], "first pair", vec![1, 2], first);
    let second = block_on(queue.take_n(&cx, 2)).expect("second pair");
    aqueduct::assert_with_log!(second == vec![3, 4], "second pair", vec![3, 4], second);
    aqueduct::test_complete!("unbounded_batch_sliced_by_take_n");
}

/// Bounded(2, dropping): the overflow is reported back, later offers are
/// rejected, and consumers only ever see the earliest two.
#[test]
fn dropping_queue_keeps_earliest_and_reports_overflow() {
    init_test("dropping_queue_keeps_earliest_and_reports_overflow");
    let queue: Queue<i32, String> = Queue::dropping(2);
    let cx = Cx::for_testing();

    let remainder = block_on(queue.offer_all(&cx, vec![1, 2, 3, 4]));
    aqueduct::assert_with_log!(remainder == vec![3, 4], "overflow reported", vec![3, 4], remainder);

    let admitted = block_on(queue.offer(&cx, 5));
    aqueduct::assert_with_log!(!admitted, "offer beyond capacity rejected", false, admitted);

    let drained = block_on(queue.take_all(&cx)).expect("earliest items");
    aqueduct::assert_with_log!(drained == vec![1, 2], "earliest delivered", vec![1, 2], drained);
    aqueduct::test_complete!("dropping_queue_keeps_earliest_and_reports_overflow");
}

/// Bounded(2, sliding): everything is accepted, the oldest items are
/// evicted, and consumers see only the most recent two.
#[test]
fn sliding_queue_keeps_newest() {
    init_test("sliding_queue_keeps_newest");
    let queue: Queue<i32, String> = Queue::sliding(2);
    let cx = Cx::for_testing();

    let remainder = block_on(queue.offer_all(&cx, vec![1, 2, 3, 4]));
    aqueduct::assert_with_log!(remainder.is_empty(), "sliding accepts all", true, remainder.is_empty());

    let admitted = block_on(queue.offer(&cx, 5));
    aqueduct::assert_with_log!(admitted, "sliding offer always admits", true, admitted);

    let drained = block_on(queue.take_all(&cx)).expect("newest items");
    aqueduct::assert_with_log!(drained == vec![4, 5], "newest delivered", vec![4, 5], drained);
    aqueduct::test_complete!("sliding_queue_keeps_newest");
}

/// Bounded(2): interrupting a parked batch discards the unadmitted
/// remainder for good; the admitted prefix stays and the queue keeps
/// working.
#[test]
fn interrupted_batch_discards_unadmitted_remainder() {
    init_test("interrupted_batch_discards_unadmitted_remainder");
    let queue: Queue<i32, String> = Queue::bounded(2);
    let mut lab = Lab::new();

    let producer_queue = queue.clone();
    let producer = lab.spawn(async move {
        let cx = Cx::for_testing();
        producer_queue.offer_all(&cx, vec![1, 2, 3, 4]).await
    });
    lab.run_until_stalled();
    aqueduct::assert_with_log!(
        !producer.is_finished(),
        "producer parked after first wave",
        false,
        producer.is_finished()
    );
    lab.abort(&producer);

    let cx = Cx::for_testing();
    let first = block_on(queue.take_all(&cx)).expect("admitted prefix");
    aqueduct::assert_with_log!(first == vec![1, 2], "prefix survives interruption", vec![1, 2], first);

    let admitted = block_on(queue.offer(&cx, 5));
    aqueduct::assert_with_log!(admitted, "queue keeps working", true, admitted);
    let rest = block_on(queue.take_all(&cx)).expect("fresh item");
    aqueduct::assert_with_log!(rest == vec![5], "remainder never resurfaces", vec![5], rest);
    aqueduct::test_complete!("interrupted_batch_discards_unadmitted_remainder");
}

/// Bounded(2): two forked batches plus a single offer, then `end` — the
/// take side drains all nine items in order, `await_done` resolves, and a
/// subsequent offer is rejected.
#[test]
fn graceful_end_drains_queued_offers_in_order() {
    init_test("graceful_end_drains_queued_offers_in_order");
    let queue: Queue<i32, String> = Queue::bounded(2);
    let mut lab = Lab::new();

    let q1 = queue.clone();
    let batch_one = lab.spawn(async move {
        let cx = Cx::for_testing();
        q1.offer_all(&cx, vec![1, 2, 3, 4]).await
    });
    let q2 = queue.clone();
    let batch_two = lab.spawn(async move {
        let cx = Cx::for_testing();
        q2.offer_all(&cx, vec![5, 6, 7, 8]).await
    });
    let q3 = queue.clone();
    let single = lab.spawn(async move {
        let cx = Cx::for_testing();
        q3.offer(&cx, 9).await
    });
    lab.run_until_stalled();

    queue.end();

    let await_queue = queue.clone();
    let awaiter = lab.spawn(async move {
        let cx = Cx::for_testing();
        await_queue.await_done(&cx).await
    });
    lab.run_until_stalled();
    aqueduct::assert_with_log!(
        !awaiter.is_finished(),
        "await parked while offers drain",
        false,
        awaiter.is_finished()
    );

    let cx = Cx::for_testing();
    let mut received = Vec::new();
    while let Ok(item) = block_on(queue.take(&cx)) {
        received.push(item);
        lab.run_until_stalled();
    }
    aqueduct::assert_with_log!(
        received == vec![1, 2, 3, 4, 5, 6, 7, 8, 9],
        "queued offers drained in order",
        vec![1, 2, 3, 4, 5, 6, 7, 8, 9],
        received
    );

    lab.run_until_stalled();
    let resolved = awaiter.try_join();
    aqueduct::assert_with_log!(resolved == Some(Ok(())), "await resolved", Some(Ok::<(), aqueduct::TakeError<String>>(())), resolved);
    let batch_one_result = batch_one.try_join();
    aqueduct::assert_with_log!(
        batch_one_result == Some(Vec::new()),
        "first batch fully admitted",
        Some(Vec::<i32>::new()),
        batch_one_result
    );
    let batch_two_result = batch_two.try_join();
    aqueduct::assert_with_log!(
        batch_two_result == Some(Vec::new()),
        "second batch fully admitted",
        Some(Vec::<i32>::new()),
        batch_two_result
    );
    let single_result = single.try_join();
    aqueduct::assert_with_log!(
        single_result == Some(true),
        "single offer admitted",
        Some(true),
        single_result
    );

    let admitted = block_on(queue.offer(&cx, 10));
    aqueduct::assert_with_log!(!admitted, "offer after end rejected", false, admitted);
    aqueduct::test_complete!("graceful_end_drains_queued_offers_in_order");
}

/// A failure is delivered exactly once, to the oldest waiting consumer.
#[test]
fn failure_goes_to_the_oldest_waiting_consumer() {
    init_test("failure_goes_to_the_oldest_waiting_consumer");
    let queue: Queue<i32, String> = Queue::unbounded();
    let mut lab = Lab::new();

    let q1 = queue.clone();
    let first = lab.spawn(async move {
        let cx = Cx::for_testing();
        q1.take(&cx).await
    });
    let q2 = queue.clone();
    let second = lab.spawn(async move {
        let cx = Cx::for_testing();
        q2.take(&cx).await
    });
    lab.run_until_stalled();

    queue.fail("storage lost".to_owned());
    lab.run_until_stalled();

    let first_result = first.try_join();
    aqueduct::assert_with_log!(
        first_result == Some(Err(TakeError::Failed("storage lost".to_owned()))),
        "oldest consumer receives the failure",
        Some(Err::<i32, _>(TakeError::Failed("storage lost".to_owned()))),
        first_result
    );
    let second_result = second.try_join();
    aqueduct::assert_with_log!(
        second_result == Some(Err(TakeError::Done)),
        "later consumer sees Done",
        Some(Err::<i32, _>(TakeError::<String>::Done)),
        second_result
    );
    aqueduct::test_complete!("failure_goes_to_the_oldest_waiting_consumer");
}

/// Shutdown reaches parked parties and later arrivals alike.
#[test]
fn shutdown_resolves_parked_and_future_parties() {
    init_test("shutdown_resolves_parked_and_future_parties");
    let queue: Queue<i32, String> = Queue::bounded(1);
    let cx = Cx::for_testing();
    assert!(block_on(queue.offer(&cx, 1)), "fill buffer");

    let mut lab = Lab::new();
    let producer_queue = queue.clone();
    let producer = lab.spawn(async move {
        let cx = Cx::for_testing();
        producer_queue.offer(&cx, 2).await
    });
    lab.run_until_stalled();

    queue.shutdown();
    lab.run_until_stalled();

    let admitted = producer.try_join();
    aqueduct::assert_with_log!(admitted == Some(false), "parked offer rejected", Some(false), admitted);

    // Buffer contents prior to shutdown are gone.
    let taken = block_on(queue.take(&cx));
    aqueduct::assert_with_log!(
        taken == Err(TakeError::Done),
        "take after shutdown is Done",
        Err::<i32, _>(TakeError::<String>::Done),
        taken
    );
    let resolved = block_on(queue.await_done(&cx));
    aqueduct::assert_with_log!(resolved == Ok(()), "await resolves after shutdown", Ok::<(), TakeError<String>>(()), resolved);
    aqueduct::test_complete!("shutdown_resolves_parked_and_future_parties");
}
