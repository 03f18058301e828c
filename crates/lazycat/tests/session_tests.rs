//! Sessions driving catalogs end to end.

#![allow(clippy::unwrap_used)]

use lazycat::{ArrayData, ChunkCache, MemoryStorage, Session, Settings, StorageBackend};
use std::sync::Arc;

fn particles() -> Arc<dyn StorageBackend> {
    let storage = MemoryStorage::with_id("session");
    for part in 0..3_usize {
        let rows = 10 + part * 5;
        let velocity: Vec<f64> = (0..rows * 3)
            .map(|i| ((i + part * 17) % 23) as f64 - 11.0)
            .collect();
        storage
            .insert_file(
                format!("part.{part}"),
                vec![
                    (
                        "Velocity".to_string(),
                        ArrayData::from_shape_vec(&[rows, 3], velocity).unwrap(),
                    ),
                    (
                        "Mass".to_string(),
                        ArrayData::from_vec(vec![0.5_f64 + part as f64; rows]),
                    ),
                ],
            )
            .unwrap();
    }
    Arc::new(storage)
}

fn settings(chunk_rows: usize) -> Settings {
    Settings {
        chunk_rows,
        cache_capacity_bytes: 1 << 20,
        ..Settings::default()
    }
}

#[test]
fn test_session_uses_configured_chunk_rows() {
    let session = Session::new(settings(4)).unwrap();
    let view = session
        .catalog(particles())
        .files(["part.0", "part.1", "part.2"])
        .build()
        .unwrap();
    // 10, 15 and 20 rows in chunks of 4
    assert_eq!(view.layout().num_chunks(), 3 + 4 + 5);
    assert_eq!(view.size(), 45);
}

#[test]
fn test_momentum_is_cached_between_calls() {
    let session = Session::new(settings(6)).unwrap();
    let view = session
        .catalog(particles())
        .files(["part.0", "part.1", "part.2"])
        .build()
        .unwrap();
    let velocity = view.column("Velocity").unwrap();
    let mass = view.column("Mass").unwrap();
    let momentum = velocity.select(1, 2).unwrap().mul(&mass).unwrap().sum_all().unwrap();

    let (first, stats) = session.compute_with_stats(&[&momentum]).unwrap();
    assert!(stats.reads > 0);
    let (second, stats) = session.compute_with_stats(&[&momentum]).unwrap();
    assert_eq!(stats.reads, 0);
    assert_eq!(stats.cache_hits, 1);
    assert!(first[0].bit_eq(&second[0]));

    session.clear_cache();
    assert_eq!(session.cache_stats().entries, 0);
    let (_, stats) = session.compute_with_stats(&[&momentum]).unwrap();
    assert!(stats.reads > 0);
}

#[test]
fn test_sessions_can_share_one_cache() {
    let cache = Arc::new(ChunkCache::new(1 << 20));
    let a = Session::with_cache(settings(8), Arc::clone(&cache)).unwrap();
    let b = Session::with_cache(
        Settings {
            parallel: false,
            ..settings(8)
        },
        Arc::clone(&cache),
    )
    .unwrap();

    let storage = particles();
    let view = a.catalog(Arc::clone(&storage)).file("part.2").build().unwrap();
    let total = view.column("Mass").unwrap().sum_all().unwrap();
    a.compute_one(&total).unwrap();

    let again = b.catalog(storage).file("part.2").build().unwrap();
    let total = again.column("Mass").unwrap().sum_all().unwrap();
    let (values, stats) = b.compute_with_stats(&[&total]).unwrap();
    assert_eq!(stats.reads, 0);
    assert_eq!(values[0], ArrayData::scalar(2.5_f64 * 20.0));
}

#[test]
fn test_shrinking_the_cache_keeps_results_correct() {
    let mut session = Session::new(settings(5)).unwrap();
    let view = session.catalog(particles()).file("part.1").build().unwrap();
    let speed = view
        .column("Velocity")
        .unwrap()
        .pow_scalar(2)
        .unwrap()
        .sum(1)
        .unwrap()
        .max_all()
        .unwrap();

    let before = session.compute_one(&speed).unwrap();
    session.resize_cache(16);
    assert!(session.cache().usage_bytes() <= 16);
    let after = session.compute_one(&speed).unwrap();
    assert!(before.bit_eq(&after));
}
