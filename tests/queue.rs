use crossbeam_utils::thread;
use pipekvs::queue;
use pipekvs::ConnectRequest;
use std::collections::HashSet;
use std::sync::Mutex;

fn request(n: usize) -> ConnectRequest {
    ConnectRequest::new(
        format!("/tmp/req{}", n),
        format!("/tmp/resp{}", n),
        format!("/tmp/notif{}", n),
    )
}

#[test]
fn first_admitted_is_first_served() {
    let (tx, rx) = queue::bounded(4);
    for n in 0..4 {
        tx.enqueue(request(n)).unwrap();
    }
    for n in 0..4 {
        assert_eq!(rx.dequeue(), Some(request(n)));
    }
}

#[test]
fn full_queue_refuses_until_a_slot_frees() {
    let (tx, rx) = queue::bounded(2);
    assert!(tx.try_enqueue(request(0)).is_ok());
    assert!(tx.try_enqueue(request(1)).is_ok());
    assert_eq!(tx.len(), 2);

    // a third connection has to wait
    assert_eq!(tx.try_enqueue(request(2)), Err(request(2)));

    assert_eq!(rx.dequeue(), Some(request(0)));
    assert!(tx.try_enqueue(request(2)).is_ok());
}

#[test]
fn blocked_producer_resumes_when_a_consumer_takes_an_item() {
    let (tx, rx) = queue::bounded(1);
    tx.enqueue(request(0)).unwrap();

    thread::scope(|s| {
        let producer = s.spawn(|_| tx.enqueue(request(1)));
        assert_eq!(rx.dequeue(), Some(request(0)));
        producer.join().unwrap().unwrap();
        assert_eq!(rx.dequeue(), Some(request(1)));
    })
    .unwrap();
}

#[test]
fn every_request_goes_to_exactly_one_consumer() {
    let (tx, rx) = queue::bounded(8);
    let seen = Mutex::new(Vec::new());

    thread::scope(|s| {
        for _ in 0..4 {
            let rx = rx.clone();
            let seen = &seen;
            s.spawn(move |_| {
                while let Some(req) = rx.dequeue() {
                    seen.lock().unwrap().push(req);
                }
            });
        }
        for n in 0..100 {
            tx.enqueue(request(n)).unwrap();
        }
        // closing the queue lets the consumers drain it and exit
        drop(tx);
    })
    .unwrap();

    let seen = seen.into_inner().unwrap();
    assert_eq!(seen.len(), 100);
    let unique: HashSet<_> = seen.iter().map(|r| r.request_path.clone()).collect();
    assert_eq!(unique.len(), 100);
}

#[test]
fn dequeue_returns_none_once_closed_and_drained() {
    let (tx, rx) = queue::bounded(2);
    tx.enqueue(request(7)).unwrap();
    drop(tx);
    assert_eq!(rx.dequeue(), Some(request(7)));
    assert_eq!(rx.dequeue(), None);
}

#[test]
fn blocked_admission_gives_up_when_cancelled() {
    let (tx, rx) = queue::bounded(1);
    let (stop, cancel) = crossbeam::channel::bounded(1);
    tx.enqueue(request(0)).unwrap();

    thread::scope(|s| {
        let blocked = s.spawn(|_| tx.enqueue_unless(request(1), &cancel).unwrap());
        std::thread::sleep(std::time::Duration::from_millis(100));
        stop.send(()).unwrap();
        assert!(!blocked.join().unwrap());
    })
    .unwrap();

    // the cancelled request never reached the queue
    assert_eq!(rx.dequeue(), Some(request(0)));
    assert_eq!(tx.len(), 0);
}

#[test]
fn admission_with_a_free_slot_ignores_the_cancel_channel() {
    let (tx, rx) = queue::bounded(1);
    let (_stop, cancel) = crossbeam::channel::bounded::<()>(1);
    assert!(tx.enqueue_unless(request(0), &cancel).unwrap());
    assert_eq!(rx.dequeue(), Some(request(0)));
}
