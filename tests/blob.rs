use ferrite_resnet::graph::{Feeds, Graph, Node, Tensor};
use ferrite_resnet::pipeline::{Blob, Content, NO_LABEL};
use ferrite_resnet::Error;
use ndarray::{ArrayD, IxDyn};

fn image(name: &str) -> Node<Tensor> {
    Node::constant(name, ArrayD::zeros(IxDyn(&[2, 2, 3])))
}

#[test]
fn images_without_labels_get_the_sentinel() {
    let blob = Blob::from_images(vec![image("a"), image("b")]);
    assert_eq!(blob.content(), Content::ImageLabel);
    assert_eq!(blob.len(), 2);

    let graph = Graph::new();
    for label in blob.labels().unwrap() {
        let value = graph.eval(label, Feeds::new()).unwrap();
        assert_eq!(value.ndim(), 0);
        assert_eq!(value.iter().next().copied(), Some(NO_LABEL));
    }
}

#[test]
fn constructor_takes_exactly_one_variant() {
    assert!(matches!(
        Blob::from_parts(Some(vec![image("a")]), None, Some(vec![image("v")])),
        Err(Error::Contract(_))
    ));
    assert!(matches!(Blob::from_parts(None, None, None), Err(Error::Contract(_))));

    let values = Blob::from_parts(None, None, Some(vec![image("v")])).unwrap();
    assert_eq!(values.content(), Content::Value);
    assert!(values.images().is_err());
    assert!(values.as_tuple_list().is_err());
}

#[test]
fn mismatched_labels_are_rejected() {
    let label = Node::constant("l", ArrayD::from_elem(IxDyn(&[]), 0i64));
    let result = Blob::from_images_labels(vec![image("a"), image("b")], label);
    assert!(matches!(result, Err(Error::Contract(_))));
}

#[test]
fn single_pair_requires_one_image() {
    let one = Blob::from_images(image("a"));
    assert!(one.single_pair().is_ok());

    let two = Blob::from_images(vec![image("a"), image("b")]);
    let err = two.single_pair().unwrap_err();
    assert!(err.to_string().contains("single pair"));
}

#[test]
fn kwargs_fetch_every_node() {
    let blob = Blob::from_images(vec![image("a"), image("b")]);
    let request = blob.kwargs();
    assert_eq!(request.fetches().len(), 4);

    let graph = Graph::new();
    let fetched = graph.run(request).unwrap();
    assert_eq!(fetched.len(), 4);
}

#[test]
fn func_threads_the_blob_through_a_stage() {
    let count = Blob::from_images(image("a")).func(|blob| blob.len());
    assert_eq!(count, 1);
}
