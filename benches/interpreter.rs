mod common;

use criterion::{Criterion, black_box, criterion_group, criterion_main};

fn bench_interpreter(c: &mut Criterion) {
    for (label, path) in common::WORKLOADS {
        let source = common::load_source(path);

        c.bench_function(&format!("interpreter_load_only_{label}"), |b| {
            b.iter(|| {
                let mut interpreter = common::silent_interpreter();
                let value = interpreter.eval(black_box(&source)).expect("eval");
                black_box(value);
            })
        });

        c.bench_function(&format!("interpreter_load_and_run_{label}"), |b| {
            b.iter(|| {
                let mut interpreter = common::silent_interpreter();
                interpreter.eval(black_box(&source)).expect("eval");
                let value = interpreter.invoke("main", &[]).expect("invoke");
                black_box(value);
            })
        });

        c.bench_function(&format!("interpreter_run_loaded_{label}"), |b| {
            let mut interpreter = common::silent_interpreter();
            interpreter.eval(&source).expect("eval");
            b.iter(|| {
                let value = interpreter.invoke("main", &[]).expect("invoke");
                black_box(value);
            })
        });
    }
}

criterion_group!(benches, bench_interpreter);
criterion_main!(benches);
