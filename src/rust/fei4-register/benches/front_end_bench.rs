// Copyright 2025 The FE-I4 Scan Authors
// SPDX-License-Identifier: Apache-2.0

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use fei4_register::{ChipFlavor, CommandRequest, FrontEndWrite, GlobalSelection, RegisterFile};
use std::hint::black_box;

fn register_file() -> RegisterFile {
    RegisterFile::builtin(ChipFlavor::Fei4b).expect("built-in definition is valid")
}

fn bench_front_end_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("front_end_write");

    for register in ["Enable", "TDAC", "FDAC"] {
        let mut reg = register_file();
        group.bench_with_input(
            BenchmarkId::new("same_mask", register),
            &register,
            |b, &register| {
                b.iter(|| {
                    let write = FrontEndWrite::new(register).same_mask_for_all_dc(true);
                    black_box(reg.get_commands(write.into()).unwrap());
                });
            },
        );
        group.bench_with_input(
            BenchmarkId::new("all_double_columns", register),
            &register,
            |b, &register| {
                b.iter(|| {
                    let write = FrontEndWrite::new(register);
                    black_box(reg.get_commands(write.into()).unwrap());
                });
            },
        );
    }

    group.finish();
}

fn bench_global_configuration(c: &mut Criterion) {
    let mut reg = register_file();
    c.bench_function("write_all_global_registers", |b| {
        b.iter(|| {
            black_box(
                reg.get_commands(CommandRequest::WrRegister(GlobalSelection::Writable))
                    .unwrap(),
            );
        });
    });
}

fn bench_pixel_bitset(c: &mut Criterion) {
    let reg = register_file();
    c.bench_function("pixel_register_bitset", |b| {
        b.iter(|| {
            for dc in 0..40 {
                black_box(reg.pixel_register_bitset("TDAC", 2, dc).unwrap());
            }
        });
    });
}

criterion_group!(
    benches,
    bench_front_end_write,
    bench_global_configuration,
    bench_pixel_bitset
);
criterion_main!(benches);
