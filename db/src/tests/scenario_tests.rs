//! End-to-end scenarios over the sequential scan.

use std::io::Cursor;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use metrisch_types::distance::DistanceStats;
use metrisch_types::filter::{FixedArrayFilter, PrecomputedFilter};
use metrisch_types::key::ObjectKey;
use metrisch_types::meta::{AggregateMetaObject, Aggregation, MetaObject};
use metrisch_types::object::LocalObject;
use metrisch_types::text::{DEFAULT_REGISTRY, read_object, write_object};
use metrisch_types::vector::{FLOAT_VECTOR_TAG, FloatVector};
use pretty_assertions::assert_eq;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::algorithm::AlgorithmHost;
use crate::algorithm::seq_scan::{ScanConfig, SequentialScan};
use crate::operation::{
    BatchKnnQuery, KnnQuery, Operation, OperationCode, RangeQuery,
};
use crate::tests::{SlowVector, answer_summary, vector};

fn k(n: usize) -> NonZeroUsize {
    NonZeroUsize::new(n).unwrap()
}

#[test]
fn single_knn_over_a_tiny_dataset() {
    let scan = SequentialScan::new("tiny");
    for (locator, components) in [
        ("a", [0.0, 0.0]),
        ("b", [1.0, 0.0]),
        ("c", [0.0, 1.0]),
        ("d", [5.0, 5.0]),
    ] {
        scan.insert_object(vector(locator, &components));
    }
    let host = AlgorithmHost::new(scan);

    let mut knn = KnnQuery::new(vector("q", &[0.0, 0.0]), k(2));
    host.execute(&mut knn).unwrap();

    let operation: &mut dyn Operation = &mut knn;
    assert!(operation.was_successful());
    assert_eq!(
        answer_summary(knn.answer()),
        vec![("a".to_owned(), 0.0), ("b".to_owned(), 1.0)]
    );
}

#[test]
fn range_search_through_a_fixed_array_filter() {
    // Pivots p1=[10,0], p2=[0,10]; both x and q sit at the origin, so both
    // store the distances [10, 10].
    let mut x = FloatVector::with_locator("x", vec![0.0, 0.0]);
    x.header_mut().filters_mut().attach(
        PrecomputedFilter::Fixed(FixedArrayFilter::from_distances(vec![10.0, 10.0])),
        false,
    );
    let mut q = FloatVector::with_locator("q", vec![0.0, 0.0]);
    q.header_mut().filters_mut().attach(
        PrecomputedFilter::Fixed(FixedArrayFilter::from_distances(vec![10.0, 10.0])),
        false,
    );

    // Radius 0: the difference bound cannot prune equal filter entries.
    assert!(!q
        .header()
        .filters()
        .exclude(x.header().filters(), 0.0));
    // Radius 9.5: the sum bound (20) cannot admit either, so the metric
    // must decide.
    assert!(!q
        .header()
        .filters()
        .include(x.header().filters(), 9.5));
    assert!(!q
        .header()
        .filters()
        .exclude(x.header().filters(), 9.5));

    let mut range = RangeQuery::new(Arc::new(q), 9.5);
    range.evaluate(&(Arc::new(x) as Arc<dyn LocalObject>)).unwrap();
    let stats: DistanceStats = range.header().stats().distances;
    assert_eq!(stats.computations, 1);
    assert_eq!(stats.savings, 0);
    assert_eq!(answer_summary(range.answer()), vec![("x".to_owned(), 0.0)]);
}

fn composite(locator: &str, color: &[f32], shape: &[f32]) -> Arc<dyn LocalObject> {
    let meta = MetaObject::new(
        Some(ObjectKey::basic(locator)),
        vec![
            (
                "color".to_owned(),
                Box::new(FloatVector::new(color.to_vec())) as Box<dyn LocalObject>,
            ),
            (
                "shape".to_owned(),
                Box::new(FloatVector::new(shape.to_vec())) as Box<dyn LocalObject>,
            ),
        ],
    );
    Arc::new(AggregateMetaObject::new(meta, Aggregation::Sum))
}

#[test]
fn meta_object_sum_aggregation_ranks_composites() {
    let scan = SequentialScan::new("meta");
    scan.insert_object(composite("A", &[0.0, 0.0], &[3.0, 0.0]));
    scan.insert_object(composite("B", &[1.0, 0.0], &[0.0, 4.0]));
    let host = AlgorithmHost::new(scan);

    let mut knn = KnnQuery::new(composite("Q", &[0.0, 0.0], &[0.0, 0.0]), k(1));
    host.execute(&mut knn).unwrap();

    assert_eq!(answer_summary(knn.answer()), vec![("A".to_owned(), 3.0)]);
}

fn random_dataset(count: usize, seed: u64) -> Vec<Arc<dyn LocalObject>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|index| {
            let components = vec![rng.gen_range(0.0..1.0), rng.gen_range(0.0..1.0)];
            vector(&format!("o/{index}"), &components)
        })
        .collect()
}

fn batch_results(
    objects: &[Arc<dyn LocalObject>],
    queries: &[Arc<dyn LocalObject>],
    pool_size: usize,
) -> Vec<Vec<(String, f32)>> {
    let scan = SequentialScan::with_config(
        "batch",
        ScanConfig {
            chunk_size: 500,
            pool_size,
            ..ScanConfig::default()
        },
    );
    for object in objects {
        scan.insert_object(Arc::clone(object));
    }
    let host = AlgorithmHost::new(scan);

    let mut batch = BatchKnnQuery::new(
        queries
            .iter()
            .map(|query| KnnQuery::new(Arc::clone(query), k(5)))
            .collect(),
    );
    host.execute(&mut batch).unwrap();
    assert!(batch.all_terminated());

    batch
        .operations()
        .iter()
        .map(|query| {
            assert_eq!(query.header().code(), OperationCode::ResponseReturned);
            answer_summary(query.answer())
        })
        .collect()
}

#[test]
fn batch_knn_is_equivalent_across_pool_sizes() {
    let objects = random_dataset(10_000, 0xBEEF);
    let mut rng = StdRng::seed_from_u64(0xF00D);
    let queries: Vec<Arc<dyn LocalObject>> = (0..64)
        .map(|index| {
            let components = vec![rng.gen_range(0.0..1.0), rng.gen_range(0.0..1.0)];
            vector(&format!("q/{index}"), &components)
        })
        .collect();

    let sequential = batch_results(&objects, &queries, 1);
    let parallel = batch_results(&objects, &queries, 8);
    assert_eq!(sequential, parallel);
}

#[test]
fn terminating_one_sub_query_leaves_the_rest_running() {
    let scan = SequentialScan::with_config(
        "cancellable",
        ScanConfig {
            chunk_size: 100,
            pool_size: 8,
            ..ScanConfig::default()
        },
    );
    for index in 0..2000 {
        scan.insert_object(Arc::new(SlowVector::new(
            &format!("s/{index}"),
            &[index as f32, 0.0],
            Duration::from_micros(50),
        )));
    }
    let host = Arc::new(AlgorithmHost::new(scan));

    let queries: Vec<KnnQuery> = (0..16)
        .map(|index| {
            KnnQuery::new(
                Arc::new(SlowVector::new(
                    &format!("q/{index}"),
                    &[index as f32, 1.0],
                    Duration::from_micros(50),
                )) as Arc<dyn LocalObject>,
                k(5),
            )
        })
        .collect();
    let batch = BatchKnnQuery::new(queries);
    let victim = batch.operation(0).unwrap().header().id();

    let handle = host.background_execute(Box::new(batch));
    std::thread::sleep(Duration::from_millis(10));
    // The registry entry appears once the background thread enters execute;
    // retry briefly instead of racing it.
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while host.terminate_operation(victim).is_err() {
        assert!(
            std::time::Instant::now() < deadline,
            "sub-operation was never registered"
        );
        std::thread::sleep(Duration::from_millis(1));
    }

    let mut caller_stats = metrisch_utils::stats::OperationStats::default();
    let finished = host.wait_background(handle, &mut caller_stats).unwrap();
    let batch = finished.downcast_ref::<BatchKnnQuery>().unwrap();

    assert_eq!(
        batch.operation(0).unwrap().header().code(),
        OperationCode::Interrupted
    );
    assert!(batch.operation(0).unwrap().answer().len() <= 5);
    for index in 1..batch.operation_count() {
        assert_eq!(
            batch.operation(index).unwrap().header().code(),
            OperationCode::ResponseReturned
        );
    }
    assert!(caller_stats.distances.computations > 0);
}

#[test]
fn text_round_trip_preserves_key_and_filter() {
    let mut object = FloatVector::with_locator("u/1", vec![1.0, 2.0]);
    object.header_mut().filters_mut().attach(
        PrecomputedFilter::Fixed(FixedArrayFilter::from_distances(vec![0.5, 1.25, 3.0])),
        false,
    );

    let mut buffer = Vec::new();
    write_object(&object, &mut buffer).unwrap();
    let text = String::from_utf8(buffer.clone()).unwrap();
    assert_eq!(
        text,
        "#objectKey BasicKey u/1\n#filter FixedArrayFilter 0.5 1.25 3\nv 2 1 2\n"
    );

    let mut cursor = Cursor::new(buffer);
    let restored = read_object(&mut cursor, FLOAT_VECTOR_TAG, &DEFAULT_REGISTRY)
        .unwrap()
        .unwrap();
    assert!(restored.data_equals(&object));
    let restored_filter = restored
        .header()
        .filters()
        .get(metrisch_types::filter::FilterKind::FixedArray)
        .unwrap();
    let PrecomputedFilter::Fixed(restored_filter) = restored_filter else {
        panic!("expected the fixed-array filter to survive the round trip");
    };
    assert_eq!(restored_filter.distances(), &[0.5, 1.25, 3.0]);
}
