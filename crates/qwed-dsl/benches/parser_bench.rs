use criterion::{black_box, criterion_group, criterion_main, Criterion};
use qwed_dsl::{parse, parse_and_validate, Limits};

const SMALL: &str = "(AND (GT x 5) (LT y 10))";
const QUANTIFIED: &str = "(FORALL i (IMPLIES (AND (GE i 0) (LT i (LEN a))) (GE (GET a i) (MULT 2 i))))";

fn wide_conjunction() -> String {
    let clauses: Vec<String> = (0..500).map(|i| format!("(GE v{i} {i})")).collect();
    format!("(AND {})", clauses.join(" "))
}

fn bench_parse_small(c: &mut Criterion) {
    c.bench_function("parse_small", |b| b.iter(|| parse(black_box(SMALL)).unwrap()));
}

fn bench_validate_quantified(c: &mut Criterion) {
    let limits = Limits::default();
    c.bench_function("validate_quantified", |b| {
        b.iter(|| parse_and_validate(black_box(QUANTIFIED), &limits).unwrap())
    });
}

fn bench_validate_wide(c: &mut Criterion) {
    let src = wide_conjunction();
    let limits = Limits::default();
    c.bench_function("validate_wide_500", |b| {
        b.iter(|| parse_and_validate(black_box(&src), &limits).unwrap())
    });
}

criterion_group!(
    benches,
    bench_parse_small,
    bench_validate_quantified,
    bench_validate_wide
);
criterion_main!(benches);
