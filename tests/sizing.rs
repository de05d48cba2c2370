use std::sync::Arc;

use ferrite_resnet::graph::{Fetch, Graph, Phase, RemainingCounter, Request, SeedSignal, Tensor, UNSET};
use ferrite_resnet::pipeline::{Batch, Preprocess, QueueProducer};
use proptest::prelude::*;

#[path = "./helpers.rs"]
mod helpers;

proptest! {
    #[test]
    fn seeded_total_is_drained_exactly_once(total in 0usize..500, requested in 1usize..64) {
        let counter = RemainingCounter::new("total", Arc::new(SeedSignal::default()));
        counter.seed(total as i64);

        let mut sizes = Vec::new();
        loop {
            let size = counter.make_size(requested);
            if size == 0 {
                break;
            }
            prop_assert!(size <= requested);
            sizes.push(size);
        }
        prop_assert_eq!(sizes.iter().sum::<usize>(), total);
        prop_assert_eq!(sizes.len(), total.div_ceil(requested));
        // Every batch but the last is full.
        prop_assert!(sizes.iter().rev().skip(1).all(|&size| size == requested));
        prop_assert_eq!(counter.get(), 0);
    }

    #[test]
    fn consume_never_goes_negative(total in 0i64..100, rows in 0usize..200) {
        let counter = RemainingCounter::new("total", Arc::new(SeedSignal::default()));
        counter.seed(total);
        counter.consume(rows);
        prop_assert_eq!(counter.get(), (total - rows as i64).max(0));
    }
}

#[test]
fn unset_counter_is_not_consumed() {
    let counter = RemainingCounter::new("total", Arc::new(SeedSignal::default()));
    counter.consume(10);
    assert_eq!(counter.get(), UNSET);
}

#[test]
fn test_batches_split_a_seeded_total() {
    let config = helpers::tiny_config();
    let graph = Graph::new();
    graph.set_phase(Phase::Test);

    let mut producer = QueueProducer::new(config.queue_producer.clone());
    let preprocess = Preprocess::new(config.preprocess.clone()).unwrap();
    let mut batch = Batch::new(config.batch.clone());
    let blob = producer
        .blob(&graph, "image", Some(vec![None, None, Some(3)]))
        .unwrap()
        .func(|blob| preprocess.test(blob))
        .unwrap()
        .func(|blob| batch.test(&graph, blob))
        .unwrap();
    let (image, label) = blob.single_pair().unwrap();
    assert_eq!(image.shape(), Some(&vec![None, Some(8), Some(8), Some(3)]));

    graph.run(batch.kwargs(5, Phase::Test).unwrap()).unwrap();
    assert_eq!(batch.counter(Phase::Test).unwrap().get(), 5);
    graph.start_queue_runners().unwrap();
    for n in 0..5 {
        let image = helpers::solid(10 + n, 12, [n as f32, 0.0, 0.0]);
        graph.run(producer.kwargs(image).unwrap()).unwrap();
    }

    // Two test images of two crops fit a batch of four crops.
    let request = Request::new()
        .fetch(Fetch::named("image", &image))
        .fetch(Fetch::named("label", &label));
    let mut rows = Vec::new();
    loop {
        let mut fetched = graph.run(request.clone()).unwrap();
        let images: Tensor = fetched.take("image").unwrap();
        let labels: ndarray::ArrayD<i64> = fetched.take("label").unwrap();
        assert_eq!(images.shape()[0], 2 * labels.len());
        if labels.is_empty() {
            break;
        }
        rows.push(images.shape()[0]);
    }
    assert_eq!(rows, vec![4, 4, 2]);
}
