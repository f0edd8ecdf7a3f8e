//! Benchmarks for engine execution
//!
//! Measures a compute-set step across tiles and a host round trip through
//! streams on the simulated driver.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use tilegraph_backends::{DriverConfig, ElementType, SimulatedDriver};
use tilegraph_core::{CompileOptions, Device, Engine, Graph, HostBuffer, Program};

/// Simulated device large enough for the biggest benchmark size
fn device(tiles: usize) -> Device {
    let driver = SimulatedDriver::new(&DriverConfig {
        tiles_per_ipu: tiles,
        tile_memory_bytes: 16 * 1024 * 1024,
        ..DriverConfig::default()
    })
    .unwrap();
    Device::acquire(Arc::new(driver), 1).unwrap()
}

/// Engine with `data`, one AddScalar vertex per tile, and step/upload/download programs
fn engine(device: &Device, size: usize) -> Engine {
    let mut graph = Graph::new(device.target());
    let data = graph.add_variable("data", ElementType::F32, size).unwrap();
    let partition = graph.map_linearly(data).unwrap();
    let cs = graph.add_compute_set("loopBody").unwrap();
    for interval in partition.intervals() {
        graph
            .add_work_item(cs, data.slice(interval.range.clone()), interval.tile, 1.0, 100)
            .unwrap();
    }
    let input = graph.add_host_to_device_stream("in", ElementType::F32, size).unwrap();
    let output = graph.add_device_to_host_stream("out", ElementType::F32, size).unwrap();
    graph.add_program("step", Program::execute(cs)).unwrap();
    graph
        .add_program("round_trip", Program::sequence([Program::copy(input, data), Program::copy(data, output)]))
        .unwrap();

    let mut engine = Engine::compile(&graph, CompileOptions::default()).unwrap();
    engine.load(device).unwrap();
    engine
}

fn benchmark_execute(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine_execute");

    for tiles in [1usize, 4, 16] {
        let size = 200_000;
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("add_scalar", tiles), &tiles, |bencher, &tiles| {
            let device = device(tiles);
            let mut engine = engine(&device, size);
            let step = engine.program_id("step").unwrap();
            bencher.iter(|| engine.run(black_box(step)).unwrap());
        });
    }

    group.finish();
}

fn benchmark_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine_round_trip");

    for size in [1_024usize, 65_536, 200_000] {
        group.throughput(Throughput::Bytes((size * 4 * 2) as u64));
        group.bench_with_input(BenchmarkId::new("f32", size), &size, |bencher, &size| {
            let device = device(4);
            let mut engine = engine(&device, size);
            let host = HostBuffer::filled(size, 1.0f32);
            engine.connect_stream("in", &host).unwrap();
            engine.connect_stream("out", &host).unwrap();
            let id = engine.program_id("round_trip").unwrap();
            bencher.iter(|| engine.run(black_box(id)).unwrap());
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_execute, benchmark_round_trip);
criterion_main!(benches);
