//! End-to-end builder and reclamation behavior against a real arena.

use pretty_assertions::assert_eq;
use riptide_config::{
    ChainConfig, ConfigError, DeviceConfig, FunctionConfig, GenView, InstanceOptions, ModuleConfig,
    ModuleRef, PipelineBinding, PipelineConfig, publish_bootstrap,
};
use riptide_controlplane::{CpClient, reclaim};
use riptide_shm::{Arena, ArenaOptions};

fn arena() -> Arena {
    Arena::anonymous(&ArenaOptions {
        size: 8 << 20,
        ..ArenaOptions::default()
    })
    .unwrap()
}

fn options() -> InstanceOptions {
    InstanceOptions {
        device_count: 4,
        ..InstanceOptions::default()
    }
}

fn module(ty: &str, name: &str, data: &[u8]) -> ModuleConfig {
    ModuleConfig {
        module_type: ty.into(),
        name: name.into(),
        data: data.to_vec(),
    }
}

fn simple_function(name: &str, module_ty: &str, module_name: &str) -> FunctionConfig {
    FunctionConfig {
        name: name.into(),
        chains: vec![ChainConfig {
            modules: vec![ModuleRef {
                module_type: module_ty.into(),
                name: module_name.into(),
            }],
            weight: 1,
        }],
    }
}

fn pipeline(name: &str, functions: &[&str]) -> PipelineConfig {
    PipelineConfig {
        name: name.into(),
        functions: functions.iter().map(|s| (*s).to_string()).collect(),
    }
}

fn device(id: u32, input: &[(&str, u32)], output: &[(&str, u32)]) -> DeviceConfig {
    let bind = |list: &[(&str, u32)]| {
        list.iter()
            .map(|(p, w)| PipelineBinding {
                pipeline: (*p).to_string(),
                weight: *w,
            })
            .collect()
    };
    DeviceConfig {
        device_id: id,
        input: bind(input),
        output: bind(output),
    }
}

/// Build a complete config: modules -> functions -> pipelines -> devices.
fn build_full(client: &CpClient<'_>) -> u64 {
    client
        .update_modules(&[
            module("route", "main", b"route-config"),
            module("forward", "l2", b"fwd-config"),
        ])
        .unwrap();
    client
        .update_functions(&[
            simple_function("do-route", "route", "main"),
            simple_function("do-forward", "forward", "l2"),
        ])
        .unwrap();
    client
        .update_pipelines(&[
            pipeline("fast", &["do-forward"]),
            pipeline("full", &["do-route", "do-forward"]),
        ])
        .unwrap();
    client
        .update_devices(&[
            device(0, &[("full", 1)], &[("fast", 1)]),
            device(1, &[("fast", 3), ("full", 1)], &[("fast", 1)]),
        ])
        .unwrap()
}

fn head_view(arena: &Arena) -> GenView<'_> {
    // SAFETY: tests never retire the head while the view is alive.
    unsafe { GenView::from_head(arena.header().config_head().unwrap()) }
}

#[test]
fn full_build_reads_back() {
    let arena = arena();
    publish_bootstrap(&arena, &["route", "forward"]).unwrap();
    let agent = arena.attach_agent("test-cp", 1, riptide_shm::NO_LIMIT).unwrap();
    let client = CpClient::new(agent, &options());

    let last_gen = build_full(&client);
    assert_eq!(last_gen, 5);

    let view = head_view(&arena);
    assert_eq!(view.gen_number(), 5);

    // Registries resolve by name.
    let route_ty = view.find_dp_module("route").unwrap();
    let module_idx = view.find_cp_module(route_ty, "main").unwrap();
    assert_eq!(
        view.cp_modules()[module_idx as usize].payload(),
        b"route-config"
    );

    let full = view.find_pipeline("full").unwrap();
    let funcs = view.pipeline_functions(full);
    assert_eq!(funcs.len(), 2);
    let first_fn = &view.functions()[funcs[0] as usize];
    assert_eq!(first_fn.name.as_str(), "do-route");

    // Device rings resolve and respect weights.
    let dev = view.device_by_id(1).unwrap();
    let fast = view.find_pipeline("fast").unwrap();
    let fullp = view.find_pipeline("full").unwrap();
    let picks: Vec<u32> = (0..4u64).map(|h| dev.select_input(h).unwrap()).collect();
    assert_eq!(picks.iter().filter(|&&p| p == fast).count(), 3);
    assert_eq!(picks.iter().filter(|&&p| p == fullp).count(), 1);
    assert!(view.device_by_id(3).is_none());
}

#[test]
fn chain_selection_follows_weights() {
    let arena = arena();
    publish_bootstrap(&arena, &["route"]).unwrap();
    let agent = arena.attach_agent("cp", 1, riptide_shm::NO_LIMIT).unwrap();
    let client = CpClient::new(agent, &options());

    client
        .update_modules(&[module("route", "a", b"a"), module("route", "b", b"b")])
        .unwrap();
    client
        .update_functions(&[FunctionConfig {
            name: "split".into(),
            chains: vec![
                ChainConfig {
                    modules: vec![ModuleRef {
                        module_type: "route".into(),
                        name: "a".into(),
                    }],
                    weight: 1,
                },
                ChainConfig {
                    modules: vec![ModuleRef {
                        module_type: "route".into(),
                        name: "b".into(),
                    }],
                    weight: 3,
                },
            ],
        }])
        .unwrap();

    let view = head_view(&arena);
    let f = view.find_function("split").unwrap();
    let mut counts = [0usize; 2];
    for hash in 0..4u64 {
        let chain = view.select_chain(f, hash).unwrap();
        let module_idx = view.chain_modules(chain)[0];
        counts[module_idx as usize] += 1;
    }
    // Modules sort a < b, so index 0 is "a" (weight 1), 1 is "b" (3).
    assert_eq!(counts, [1, 3]);
}

#[test]
fn validation_failure_leaves_arena_untouched() {
    let arena = arena();
    publish_bootstrap(&arena, &["route"]).unwrap();
    let agent = arena.attach_agent("cp", 1, riptide_shm::NO_LIMIT).unwrap();
    let client = CpClient::new(agent, &options());
    client.update_modules(&[module("route", "main", b"x")]).unwrap();

    let free_before = arena.header().allocator().free_bytes();
    let gen_before = arena.header().published_gen();

    // Unknown module type.
    let err = client
        .update_modules(&[module("nat64", "m", b"")])
        .unwrap_err();
    assert!(matches!(err, ConfigError::UnknownModuleType { .. }));

    // Unknown function in a pipeline.
    let err = client
        .update_pipelines(&[pipeline("p", &["missing"])])
        .unwrap_err();
    assert!(matches!(err, ConfigError::UnknownFunction { .. }));

    // Function with all-zero weights.
    let err = client
        .update_functions(&[FunctionConfig {
            name: "zero".into(),
            chains: vec![ChainConfig {
                modules: vec![],
                weight: 0,
            }],
        }])
        .unwrap_err();
    assert!(matches!(err, ConfigError::AllZeroWeights { .. }));

    // Device outside the topology.
    let err = client
        .update_devices(&[device(99, &[("p", 1)], &[("p", 1)])])
        .unwrap_err();
    assert!(matches!(err, ConfigError::DeviceOutOfRange { .. }));

    assert_eq!(arena.header().allocator().free_bytes(), free_before);
    assert_eq!(arena.header().published_gen(), gen_before);
}

#[test]
fn quota_failure_unwinds_cleanly() {
    let arena = arena();
    publish_bootstrap(&arena, &["route"]).unwrap();
    // Tiny quota: the build must fail midway and roll back.
    let agent = arena.attach_agent("starved", 1, 256).unwrap();
    let client = CpClient::new(agent, &options());

    let free_before = arena.header().allocator().free_bytes();
    let err = client
        .update_modules(&[module("route", "big", &[0u8; 4096])])
        .unwrap_err();
    assert!(matches!(
        err,
        ConfigError::Shm(riptide_shm::ShmError::QuotaExceeded { .. })
    ));
    assert_eq!(arena.header().allocator().free_bytes(), free_before);
    assert_eq!(client.agent().context().in_use(), 0);
}

#[test]
fn carried_module_payloads_are_shared() {
    let arena = arena();
    publish_bootstrap(&arena, &["route"]).unwrap();
    let agent = arena.attach_agent("cp", 1, riptide_shm::NO_LIMIT).unwrap();
    let client = CpClient::new(agent, &options());

    client.update_modules(&[module("route", "main", b"payload")]).unwrap();
    let view = head_view(&arena);
    let entry = &view.cp_modules()[0];
    let data_before = entry.data.load().unwrap();

    // An unrelated update carries the module over by reference.
    client
        .update_functions(&[simple_function("f", "route", "main")])
        .unwrap();
    let view = head_view(&arena);
    let entry = &view.cp_modules()[0];
    let data_after = entry.data.load().unwrap();
    assert_eq!(data_before.as_ptr(), data_after.as_ptr());
    // SAFETY: payload blocks live while any generation references them.
    assert_eq!(unsafe { data_after.as_ref() }.refcount(), 2);
}

#[test]
fn delete_module_respects_references() {
    let arena = arena();
    publish_bootstrap(&arena, &["route"]).unwrap();
    let agent = arena.attach_agent("cp", 1, riptide_shm::NO_LIMIT).unwrap();
    let client = CpClient::new(agent, &options());

    client.update_modules(&[module("route", "main", b"x")]).unwrap();
    client
        .update_functions(&[simple_function("f", "route", "main")])
        .unwrap();

    let err = client.delete_module("route", "main").unwrap_err();
    assert!(matches!(err, ConfigError::StillReferenced { .. }));

    // Drop the function first, then the module goes away.
    client
        .update_functions(&[FunctionConfig {
            name: "f".into(),
            chains: vec![],
        }])
        .unwrap();
    client.delete_module("route", "main").unwrap();
    let view = head_view(&arena);
    assert!(view.cp_modules().is_empty());

    // Deleting an absent module is an idempotent no-op.
    client.delete_module("route", "main").unwrap();
}

#[test]
fn generation_reclamation_follows_worker_barrier() {
    let arena = arena();
    publish_bootstrap(&arena, &["route"]).unwrap();
    let agent = arena.attach_agent("cp", 1, riptide_shm::NO_LIMIT).unwrap();
    let client = CpClient::new(agent, &options());

    // A worker observing gen 1 pins everything newer than its view.
    let worker = arena.register_worker(0).unwrap();
    assert_eq!(worker.observed_gen(), 1);

    client.update_modules(&[module("route", "a", b"1")]).unwrap(); // gen 2
    client.update_modules(&[module("route", "a", b"2")]).unwrap(); // gen 3
    let stale = u64::MAX / 2;

    // Worker still at 1: nothing can be freed.
    let stats = reclaim(&arena, stale);
    assert_eq!(stats.generations_freed, 0);

    // Worker acknowledges gen 2: gen 1 (bootstrap) becomes freeable.
    worker.observe(2);
    let stats = reclaim(&arena, stale);
    assert_eq!(stats.generations_freed, 1);

    // Worker acknowledges gen 3: gen 2 becomes freeable; the head
    // (gen 3) never is.
    worker.observe(3);
    let stats = reclaim(&arena, stale);
    assert_eq!(stats.generations_freed, 1);
    let stats = reclaim(&arena, stale);
    assert_eq!(stats.generations_freed, 0);
    assert_eq!(arena.header().published_gen(), 3);
}

#[test]
fn reclamation_returns_retired_generations() {
    let arena = arena();
    publish_bootstrap(&arena, &["route"]).unwrap();
    let free_after_bootstrap = arena.header().allocator().free_bytes();

    let agent = arena.attach_agent("cp", 1, riptide_shm::NO_LIMIT).unwrap();
    let client = CpClient::new(agent, &options());
    client.update_modules(&[module("route", "a", b"payload")]).unwrap();
    client
        .update_functions(&[simple_function("f", "route", "a")])
        .unwrap();

    // Walk the config back to empty, then let every old gen retire.
    client
        .update_functions(&[FunctionConfig {
            name: "f".into(),
            chains: vec![],
        }])
        .unwrap();
    client.delete_module("route", "a").unwrap();

    // No workers: every retired generation is immediately freeable.
    let stats = reclaim(&arena, 1_000);
    assert!(stats.generations_freed >= 4);

    // The head is now shaped exactly like the bootstrap generation
    // (one ConfigGen, one directory array), so the heap is back to
    // the post-bootstrap level and the agent holds only the head.
    let view = head_view(&arena);
    assert!(view.cp_modules().is_empty());
    assert_eq!(
        arena.header().allocator().free_bytes(),
        free_after_bootstrap
    );
}

#[test]
fn counters_sum_over_active_workers() {
    let arena = arena();
    let w0 = arena.register_worker(0).unwrap();
    let w1 = arena.register_worker(0).unwrap();
    w0.slot().counters().add(10, 8, 1, 0, 1);
    w1.slot().counters().add(5, 5, 0, 2, 0);

    let totals = riptide_controlplane::sum_counters(&arena);
    assert_eq!(totals.rx, 15);
    assert_eq!(totals.tx, 13);
    assert_eq!(totals.drop, 1);
    assert_eq!(totals.bypass, 2);
    assert_eq!(totals.parse_err, 1);

    // Deregistered workers fall out of the sum.
    drop(w1);
    let totals = riptide_controlplane::sum_counters(&arena);
    assert_eq!(totals.rx, 10);
}

#[test]
fn stale_worker_does_not_pin_generations() {
    let arena = arena();
    publish_bootstrap(&arena, &["route"]).unwrap();
    let agent = arena.attach_agent("cp", 1, riptide_shm::NO_LIMIT).unwrap();
    let client = CpClient::new(agent, &options());

    let worker = arena.register_worker(0).unwrap();
    client.update_modules(&[module("route", "a", b"1")]).unwrap();
    drop(worker); // deregisters; slot no longer counts

    let stats = reclaim(&arena, 1_000);
    assert_eq!(stats.generations_freed, 1);
}
