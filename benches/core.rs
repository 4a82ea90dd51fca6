#[macro_use]
extern crate criterion;

use criterion::{BenchmarkId, Criterion};
use fiber_compiler::{
    testing::InMemoryCom, Children, Compiler, Config, Element, ElementType, HostPrimitive, Props, PropsContent,
    TickState,
};

criterion::criterion_group!(core, compile_empty, recompile_unchanged_tree, compile_n_sections);
criterion::criterion_main!(core);

fn section(id: String, text: String) -> Element {
    Element::new(
        ElementType::HostPrimitive(HostPrimitive::Section),
        Props::default().with_field("id", id).with_content(PropsContent::Text(text)),
        None,
    )
}

fn compile_empty(c: &mut Criterion) {
    let mut compiler = Compiler::new(InMemoryCom::new(), Config::default());
    let element = section("s".into(), "hello".into());
    c.bench_function("compile_empty", |b| {
        b.iter(|| compiler.compile(&element, &TickState::new()).unwrap())
    });
}

fn recompile_unchanged_tree(c: &mut Criterion) {
    let mut compiler = Compiler::new(InMemoryCom::new(), Config::default());
    let element = section("s".into(), "hello".into());
    compiler.compile(&element, &TickState::new()).unwrap();
    c.bench_function("recompile_unchanged_tree", |b| {
        b.iter(|| compiler.compile(&element, &TickState::new()).unwrap())
    });
}

fn compile_n_sections(c: &mut Criterion) {
    let mut group = c.benchmark_group("compile_n_sections");
    for n in &[8usize, 32, 128] {
        let root = Element::new(
            ElementType::Fragment(fiber_compiler::FragmentMarker::shared()),
            Props::default().with_children(Children::Array(
                (0..*n).map(|i| Children::from(section(format!("s{i}"), format!("content {i}")))).collect(),
            )),
            None,
        );
        group.bench_with_input(BenchmarkId::from_parameter(n), n, |b, _| {
            let mut compiler = Compiler::new(InMemoryCom::new(), Config::default());
            b.iter(|| compiler.compile(&root, &TickState::new()).unwrap())
        });
    }
    group.finish();
}
