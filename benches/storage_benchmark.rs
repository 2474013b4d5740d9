use criterion::{black_box, criterion_group, criterion_main, Criterion};

use vesper::memory::{MemoryResource, MonotonicResource, PoolResource};
use vesper::{Config, GraphDb, PropertyValue};

fn bench_vertex_insert(c: &mut Criterion) {
    c.bench_function("insert_commit_vertex", |b| {
        let db = GraphDb::with_config(Config::without_gc());
        let n = db.property("n").unwrap();
        b.iter(|| {
            let dba = db.access();
            let gid = {
                let mut vertex = dba.insert_vertex().unwrap();
                vertex.props_set(n, PropertyValue::Int(1)).unwrap();
                vertex.gid()
            };
            dba.commit().unwrap();
            black_box(gid)
        });
    });
}

fn bench_property_read(c: &mut Criterion) {
    c.bench_function("read_property", |b| {
        let db = GraphDb::with_config(Config::without_gc());
        let n = db.property("n").unwrap();
        let gid = {
            let dba = db.access();
            let mut vertex = dba.insert_vertex().unwrap();
            vertex.props_set(n, PropertyValue::Int(42)).unwrap();
            let gid = vertex.gid();
            drop(vertex);
            dba.commit().unwrap();
            gid
        };
        b.iter(|| {
            let dba = db.access();
            let vertex = dba.find_vertex(gid).unwrap().unwrap();
            black_box(vertex.props_at(n).unwrap())
        });
    });
}

fn bench_pool_roundtrip(c: &mut Criterion) {
    c.bench_function("pool_alloc_dealloc_64b", |b| {
        let mut pool = PoolResource::new(128, 1 << 10);
        b.iter(|| {
            let ptr = pool.allocate(64, 8).unwrap();
            unsafe { pool.deallocate(black_box(ptr), 64, 8) };
        });
    });
}

fn bench_monotonic_fill(c: &mut Criterion) {
    c.bench_function("monotonic_fill_release", |b| {
        b.iter(|| {
            let mut scratch = MonotonicResource::new(4 << 10);
            for _ in 0..128 {
                black_box(scratch.allocate(32, 8).unwrap());
            }
            scratch.release();
        });
    });
}

criterion_group!(
    benches,
    bench_vertex_insert,
    bench_property_read,
    bench_pool_roundtrip,
    bench_monotonic_fill
);
criterion_main!(benches);
