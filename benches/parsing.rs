use criterion::{criterion_group, criterion_main, Criterion};

const PLAIN: &[u8] = include_bytes!("../tests/fixtures/plain.eml");
const MULTIPART: &[u8] = include_bytes!("../tests/fixtures/multipart.eml");

fn bench_parse_mail(c: &mut Criterion) {
    c.bench_function("parse_plain_mail", |b| {
        b.iter(|| mailpool::parser::mime::parse_mail(PLAIN, "user1").unwrap())
    });
    c.bench_function("parse_multipart_mail", |b| {
        b.iter(|| mailpool::parser::mime::parse_mail(MULTIPART, "user1").unwrap())
    });
}

fn bench_partition(c: &mut Criterion) {
    let recipients: Vec<String> = (1..=5_000).map(|i| format!("user{i}@localhost")).collect();

    c.bench_function("partition_5000_by_7", |b| {
        b.iter(|| mailpool::campaign::partition(&recipients, 7))
    });
}

criterion_group!(benches, bench_parse_mail, bench_partition);
criterion_main!(benches);
