//! Worker engine behavior against a real arena and real generations.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use pretty_assertions::assert_eq;

use riptide_config::{
    ChainConfig, DeviceConfig, FunctionConfig, InstanceOptions, ModuleConfig, ModuleRef,
    PipelineBinding, PipelineConfig, publish_bootstrap,
};
use riptide_controlplane::CpClient;
use riptide_dataplane::{
    ModuleCtx, ModuleRegistry, Packet, PacketFront, PacketHandler, PacketIo, PacketList, Worker,
};
use riptide_shm::{Arena, ArenaOptions};

// --- test fixtures ---------------------------------------------------------

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
        batch_size: 16,
        ..InstanceOptions::default()
    }
}

fn ipv4_frame(src: [u8; 4], dst: [u8; 4]) -> Vec<u8> {
    let mut f = vec![0u8; 14 + 20 + 8];
    f[12] = 0x08;
    f[14] = 0x45;
    f[22] = 64; // ttl
    f[23] = 17; // udp
    f[26..30].copy_from_slice(&src);
    f[30..34].copy_from_slice(&dst);
    f
}

/// Queue-backed I/O: tests preload RX and inspect TX.
#[derive(Default)]
struct QueueIo {
    rx: VecDeque<Box<Packet>>,
    tx: Vec<(u32, u32, Vec<Box<Packet>>)>,
}

impl QueueIo {
    fn preload(&mut self, frames: Vec<(Vec<u8>, u32)>) {
        for (data, device) in frames {
            self.rx.push_back(Packet::new(data, device));
        }
    }

    fn emitted(&self) -> usize {
        self.tx.iter().map(|(_, _, v)| v.len()).sum()
    }
}

impl PacketIo for QueueIo {
    fn rx_drain(&mut self, max: usize, out: &mut PacketList) {
        for _ in 0..max {
            match self.rx.pop_front() {
                Some(p) => out.push_back(p),
                None => break,
            }
        }
    }

    fn tx_emit(&mut self, device_id: u32, pipeline: u32, mut packets: PacketList) {
        let mut v = Vec::new();
        while let Some(p) = packets.pop_front() {
            v.push(p);
        }
        self.tx.push((device_id, pipeline, v));
    }
}

/// Forwards everything, counting invocations.
struct Passthrough {
    calls: AtomicUsize,
}

impl Passthrough {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }
}

impl PacketHandler for Passthrough {
    fn name(&self) -> &str {
        "passthrough"
    }

    fn handle(&self, _ctx: &ModuleCtx<'_>, front: &mut PacketFront) {
        self.calls.fetch_add(1, Ordering::Relaxed);
        while let Some(p) = front.input.pop_front() {
            front.output(p);
        }
    }
}

/// Rewrites tx_device_id from its one-byte config.
struct Steer;

impl PacketHandler for Steer {
    fn name(&self) -> &str {
        "steer"
    }

    fn handle(&self, ctx: &ModuleCtx<'_>, front: &mut PacketFront) {
        let target = u32::from(*ctx.config.first().unwrap_or(&0));
        while let Some(mut p) = front.input.pop_front() {
            p.tx_device_id = target;
            front.output(p);
        }
    }
}

/// Drops everything.
struct Blackhole;

impl PacketHandler for Blackhole {
    fn name(&self) -> &str {
        "blackhole"
    }

    fn handle(&self, _ctx: &ModuleCtx<'_>, front: &mut PacketFront) {
        while let Some(p) = front.input.pop_front() {
            front.drop(p);
        }
    }
}

/// Defers every packet exactly once, then forwards.
struct DeferOnce {
    armed: AtomicBool,
}

impl DeferOnce {
    fn new() -> Self {
        Self {
            armed: AtomicBool::new(true),
        }
    }
}

impl PacketHandler for DeferOnce {
    fn name(&self) -> &str {
        "defer-once"
    }

    fn handle(&self, _ctx: &ModuleCtx<'_>, front: &mut PacketFront) {
        let defer = self.armed.swap(false, Ordering::Relaxed);
        while let Some(p) = front.input.pop_front() {
            if defer {
                front.pending(p);
            } else {
                front.output(p);
            }
        }
    }
}

/// Bypasses straight to device selection after retargeting.
struct Eject;

impl PacketHandler for Eject {
    fn name(&self) -> &str {
        "eject"
    }

    fn handle(&self, _ctx: &ModuleCtx<'_>, front: &mut PacketFront) {
        while let Some(mut p) = front.input.pop_front() {
            p.tx_device_id = 1;
            front.bypass(p);
        }
    }
}

/// Publish a one-module config: every device routes through `module`.
fn configure(arena: &Arena, module_type: &str, data: &[u8]) {
    let agent = arena.attach_agent("test-cp", 1, riptide_shm::NO_LIMIT).unwrap();
    let client = CpClient::new(agent, &options());
    client
        .update_modules(&[ModuleConfig {
            module_type: module_type.into(),
            name: "m0".into(),
            data: data.to_vec(),
        }])
        .unwrap();
    client
        .update_functions(&[FunctionConfig {
            name: "f0".into(),
            chains: vec![ChainConfig {
                modules: vec![ModuleRef {
                    module_type: module_type.into(),
                    name: "m0".into(),
                }],
                weight: 1,
            }],
        }])
        .unwrap();
    client
        .update_pipelines(&[PipelineConfig {
            name: "main".into(),
            functions: vec!["f0".into()],
        }])
        .unwrap();
    let bind = |w| {
        vec![PipelineBinding {
            pipeline: "main".into(),
            weight: w,
        }]
    };
    client
        .update_devices(&[
            DeviceConfig {
                device_id: 0,
                input: bind(1),
                output: bind(1),
            },
            DeviceConfig {
                device_id: 1,
                input: bind(1),
                output: bind(1),
            },
        ])
        .unwrap();
}

// --- tests -----------------------------------------------------------------

#[test]
fn packets_flow_through_pipeline_to_tx() {
    let arena = arena();
    let mut registry = ModuleRegistry::new();
    registry.register(Box::new(Passthrough::new())).unwrap();
    publish_bootstrap(&arena, &registry.names()).unwrap();
    configure(&arena, "passthrough", &[]);

    let stop = AtomicBool::new(false);
    let mut io = QueueIo::default();
    io.preload(vec![
        (ipv4_frame([10, 0, 0, 1], [10, 0, 0, 2]), 0),
        (ipv4_frame([10, 0, 0, 3], [10, 0, 0, 4]), 0),
    ]);
    let mut worker = Worker::new(&arena, &registry, io, &options(), &stop).unwrap();

    let stats = worker.run_batch();
    assert_eq!(stats.rx, 2);
    assert_eq!(stats.emitted, 2);
    assert_eq!(stats.dropped, 0);
    assert_eq!(worker.io_mut().emitted(), 2);
    // Untouched packets leave on the device they arrived on.
    assert!(worker.io_mut().tx.iter().all(|(dev, _, _)| *dev == 0));
}

#[test]
fn steer_module_redirects_to_other_device() {
    let arena = arena();
    let mut registry = ModuleRegistry::new();
    registry.register(Box::new(Steer)).unwrap();
    publish_bootstrap(&arena, &registry.names()).unwrap();
    configure(&arena, "steer", &[1]); // steer everything to device 1

    let stop = AtomicBool::new(false);
    let mut io = QueueIo::default();
    io.preload(vec![(ipv4_frame([10, 0, 0, 1], [10, 0, 0, 2]), 0)]);
    let mut worker = Worker::new(&arena, &registry, io, &options(), &stop).unwrap();

    let stats = worker.run_batch();
    assert_eq!(stats.emitted, 1);
    let (device, _pipeline, packets) = &worker.io_mut().tx[0];
    assert_eq!(*device, 1);
    assert_eq!(packets[0].tx_device_id, 1);
}

#[test]
fn blackhole_drops_everything() {
    let arena = arena();
    let mut registry = ModuleRegistry::new();
    registry.register(Box::new(Blackhole)).unwrap();
    publish_bootstrap(&arena, &registry.names()).unwrap();
    configure(&arena, "blackhole", &[]);

    let stop = AtomicBool::new(false);
    let mut io = QueueIo::default();
    io.preload(vec![
        (ipv4_frame([1, 1, 1, 1], [2, 2, 2, 2]), 0),
        (ipv4_frame([3, 3, 3, 3], [4, 4, 4, 4]), 0),
    ]);
    let mut worker = Worker::new(&arena, &registry, io, &options(), &stop).unwrap();

    let stats = worker.run_batch();
    assert_eq!(stats.dropped, 2);
    assert_eq!(stats.emitted, 0);
    assert_eq!(worker.io_mut().emitted(), 0);
}

#[test]
fn deferred_packets_run_in_next_batch() {
    let arena = arena();
    let mut registry = ModuleRegistry::new();
    registry.register(Box::new(DeferOnce::new())).unwrap();
    publish_bootstrap(&arena, &registry.names()).unwrap();
    configure(&arena, "defer-once", &[]);

    let stop = AtomicBool::new(false);
    let mut io = QueueIo::default();
    io.preload(vec![(ipv4_frame([9, 9, 9, 9], [8, 8, 8, 8]), 0)]);
    let mut worker = Worker::new(&arena, &registry, io, &options(), &stop).unwrap();

    let first = worker.run_batch();
    assert_eq!(first.pending, 1);
    assert_eq!(first.emitted, 0);

    let second = worker.run_batch();
    assert_eq!(second.rx, 0);
    assert_eq!(second.pending, 0);
    assert_eq!(second.emitted, 1);
}

#[test]
fn bypass_reenters_device_selection() {
    let arena = arena();
    let mut registry = ModuleRegistry::new();
    registry.register(Box::new(Eject)).unwrap();
    publish_bootstrap(&arena, &registry.names()).unwrap();
    configure(&arena, "eject", &[]);

    let stop = AtomicBool::new(false);
    let mut io = QueueIo::default();
    io.preload(vec![(ipv4_frame([5, 5, 5, 5], [6, 6, 6, 6]), 0)]);
    let mut worker = Worker::new(&arena, &registry, io, &options(), &stop).unwrap();

    let stats = worker.run_batch();
    assert_eq!(stats.bypassed, 1);
    assert_eq!(stats.emitted, 1);
    let (device, _, _) = &worker.io_mut().tx[0];
    assert_eq!(*device, 1);
}

#[test]
fn garbage_frames_hit_parse_counter() {
    let arena = arena();
    let mut registry = ModuleRegistry::new();
    registry.register(Box::new(Passthrough::new())).unwrap();
    publish_bootstrap(&arena, &registry.names()).unwrap();
    configure(&arena, "passthrough", &[]);

    let stop = AtomicBool::new(false);
    let mut io = QueueIo::default();
    io.preload(vec![
        (vec![0xFF; 6], 0),
        (ipv4_frame([1, 2, 3, 4], [5, 6, 7, 8]), 0),
    ]);
    let mut worker = Worker::new(&arena, &registry, io, &options(), &stop).unwrap();

    let stats = worker.run_batch();
    assert_eq!(stats.parse_errors, 1);
    assert_eq!(stats.dropped, 1);
    assert_eq!(stats.emitted, 1);

    use std::sync::atomic::Ordering::Relaxed;
    let slot = arena.header().workers().slot(worker.slot_index());
    assert_eq!(slot.counters().parse_err.load(Relaxed), 1);
    assert_eq!(slot.counters().rx.load(Relaxed), 2);
}

#[test]
fn unroutable_rx_device_drops() {
    let arena = arena();
    let mut registry = ModuleRegistry::new();
    registry.register(Box::new(Passthrough::new())).unwrap();
    publish_bootstrap(&arena, &registry.names()).unwrap();
    configure(&arena, "passthrough", &[]);

    let stop = AtomicBool::new(false);
    let mut io = QueueIo::default();
    // Device 3 exists in the topology but has no configured pipelines.
    io.preload(vec![(ipv4_frame([1, 1, 1, 1], [2, 2, 2, 2]), 3)]);
    let mut worker = Worker::new(&arena, &registry, io, &options(), &stop).unwrap();

    let stats = worker.run_batch();
    assert_eq!(stats.dropped, 1);
    assert_eq!(stats.emitted, 0);
}

#[test]
fn worker_observes_new_generations() {
    let arena = arena();
    let mut registry = ModuleRegistry::new();
    registry.register(Box::new(Passthrough::new())).unwrap();
    publish_bootstrap(&arena, &registry.names()).unwrap();

    let stop = AtomicBool::new(false);
    let mut worker =
        Worker::new(&arena, &registry, QueueIo::default(), &options(), &stop).unwrap();

    let stats = worker.run_batch();
    assert_eq!(stats.generation, 1);

    configure(&arena, "passthrough", &[]); // publishes gens 2..=5
    let stats = worker.run_batch();
    assert_eq!(stats.generation, 5);

    let slot = arena.header().workers().slot(worker.slot_index());
    assert_eq!(slot.observed_gen(), 5);
}

#[test]
fn stop_drains_deferred_packets() {
    let arena = arena();
    let mut registry = ModuleRegistry::new();
    registry.register(Box::new(DeferOnce::new())).unwrap();
    publish_bootstrap(&arena, &registry.names()).unwrap();
    configure(&arena, "defer-once", &[]);

    let stop = AtomicBool::new(false);
    let mut io = QueueIo::default();
    io.preload(vec![(ipv4_frame([9, 9, 9, 9], [8, 8, 8, 8]), 0)]);
    let mut worker = Worker::new(&arena, &registry, io, &options(), &stop).unwrap();

    let stats = worker.run_batch();
    assert_eq!(stats.pending, 1);

    // Raise stop and run: the loop exits immediately and the deferred
    // packet is accounted as dropped.
    stop.store(true, Ordering::Release);
    worker.run();

    use std::sync::atomic::Ordering::Relaxed;
    let slot = arena.header().workers().slot(worker.slot_index());
    assert_eq!(slot.counters().drop.load(Relaxed), 1);
}
