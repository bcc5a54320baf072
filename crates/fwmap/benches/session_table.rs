//! Session table benchmarks: hot-path get/put under one worker.

use criterion::{Criterion, criterion_group, criterion_main};
use riptide_fwmap::{
    Fw4Key, Fwmap, FwmapCopyValue, FwmapFuncs, FwmapHash, FwmapKeyEqual, FwmapMergeValue,
    FwmapRand, FwmapSpec, FwstateValue,
};
use riptide_shm::{Arena, ArenaOptions, NO_LIMIT};

fn spec() -> FwmapSpec {
    FwmapSpec {
        key_size: size_of::<Fw4Key>() as u32,
        value_size: size_of::<FwstateValue>() as u32,
        shard_count: 4,
        shard_capacity: 4096,
        max_load: 3072,
        funcs: FwmapFuncs {
            key_equal: FwmapKeyEqual::Fw4,
            copy_value: FwmapCopyValue::Fwstate,
            merge_value: FwmapMergeValue::Fwstate,
            hash: FwmapHash::Fnv1a,
            rand: FwmapRand::Default,
        },
    }
}

fn key(n: u32) -> Fw4Key {
    Fw4Key {
        src: n,
        dst: !n,
        src_port: 1000,
        dst_port: 443,
        proto: 6,
        _pad: [0; 3],
    }
}

fn bench_session_table(c: &mut Criterion) {
    let arena = Arena::anonymous(&ArenaOptions {
        size: 64 << 20,
        ..ArenaOptions::default()
    })
    .unwrap();
    let agent = arena.attach_agent("bench", 1, NO_LIMIT).unwrap();
    let map = Fwmap::create(&arena, agent.context(), &spec()).unwrap();

    let value = FwstateValue {
        packets_fwd: 1,
        proto: 6,
        ..FwstateValue::default()
    };
    for n in 0..1024 {
        map.put(key(n).as_bytes(), value.as_bytes(), u64::MAX / 2, 0)
            .unwrap();
    }

    c.bench_function("get_hit", |b| {
        let k = key(512);
        let mut out = [0u8; size_of::<FwstateValue>()];
        b.iter(|| {
            assert!(map.get(std::hint::black_box(k.as_bytes()), 1, &mut out).unwrap());
        });
    });

    c.bench_function("get_miss", |b| {
        let k = key(1_000_000);
        let mut out = [0u8; size_of::<FwstateValue>()];
        b.iter(|| {
            assert!(!map.get(std::hint::black_box(k.as_bytes()), 1, &mut out).unwrap());
        });
    });

    c.bench_function("put_merge_existing", |b| {
        let k = key(256);
        b.iter(|| {
            map.put(std::hint::black_box(k.as_bytes()), value.as_bytes(), u64::MAX / 2, 1)
                .unwrap();
        });
    });
}

criterion_group!(benches, bench_session_table);
criterion_main!(benches);
