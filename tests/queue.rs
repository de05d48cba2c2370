use std::sync::Arc;
use std::thread;
use std::time::Duration;

use ferrite_resnet::graph::{BoundedQueue, Closable, Discipline, Fetch, Graph, Node, Request};
use ferrite_resnet::Error;

#[test]
fn pop_many_larger_than_capacity_completes() {
    let queue = Arc::new(BoundedQueue::new("q", 2, Discipline::Fifo).unwrap());
    let producer = {
        let queue = queue.clone();
        thread::spawn(move || queue.push_many(0..10))
    };
    let items = queue.pop_many(10).unwrap();
    producer.join().unwrap().unwrap();
    assert_eq!(items, (0..10).collect::<Vec<_>>());
}

#[test]
fn shuffle_keeps_min_after_dequeue_until_closed() {
    let queue = BoundedQueue::new("q", 8, Discipline::Shuffle { min_after_dequeue: 3 }).unwrap();
    queue.push_many(0..5).unwrap();
    let mut popped = queue.pop_many(2).unwrap();
    assert_eq!(queue.len(), 3);

    queue.close();
    popped.extend(queue.pop_many(3).unwrap());
    popped.sort();
    assert_eq!(popped, vec![0, 1, 2, 3, 4]);
}

#[test]
fn push_blocks_while_full() {
    let queue = Arc::new(BoundedQueue::new("q", 1, Discipline::Fifo).unwrap());
    queue.push(1).unwrap();
    let pusher = {
        let queue = queue.clone();
        thread::spawn(move || queue.push(2))
    };
    thread::sleep(Duration::from_millis(50));
    assert_eq!(queue.len(), 1);
    assert_eq!(queue.pop().unwrap(), 1);
    pusher.join().unwrap().unwrap();
    assert_eq!(queue.pop().unwrap(), 2);
}

#[test]
fn runners_fill_a_queue_until_the_graph_closes() {
    let graph = Graph::new();
    let queue = graph.queue::<u32>("numbers", 4, Discipline::Fifo).unwrap();
    let sink = queue.clone();
    graph.add_queue_runner("numbers", Node::new("push_seven", move |_| sink.push(7)));
    assert_eq!(graph.start_queue_runners().unwrap(), 1);

    assert_eq!(queue.pop_many(6).unwrap(), vec![7; 6]);
    graph.close();
    assert!(queue.is_closed());
    assert!(graph.failure().is_none());
}

#[test]
fn a_failing_runner_surfaces_on_the_next_step() {
    let graph = Graph::new();
    let queue = graph.queue::<u32>("never_filled", 4, Discipline::Fifo).unwrap();
    graph.add_queue_runner(
        "broken",
        Node::new("broken", |_| Err::<(), _>(Error::contract("corrupt input"))),
    );
    graph.start_queue_runners().unwrap();

    let source = queue.clone();
    let pop = Node::new("pop", move |_| source.pop().map(|v| v as i64));
    let err = graph.run(Request::new().fetch(Fetch::named("pop", &pop))).unwrap_err();
    match err {
        Error::RunnerFailed(cause) => assert!(cause.contains("corrupt input")),
        other => panic!("expected a runner failure, got {other:?}"),
    }
}
