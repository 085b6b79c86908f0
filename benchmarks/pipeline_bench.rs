use criterion::{black_box, criterion_group, criterion_main, Criterion};
use refile::mapper::resolve;
use refile::sequencer::sequence;
use refile::validator::validate;

fn bench_sequence(c: &mut Criterion) {
    let chain = (0..20)
        .map(|i| format!("ffmpeg -i in_{i}.mp4 -vn out_{i}.mp3"))
        .collect::<Vec<_>>()
        .join(" && ");
    c.bench_function("sequence_and_chain_20", |b| {
        b.iter(|| black_box(sequence(black_box(&chain))));
    });
    c.bench_function("sequence_single_loop", |b| {
        b.iter(|| black_box(sequence(black_box("for f in *.png; do convert \"$f\" \"${f%.png}.jpg\"; done"))));
    });
}

fn bench_validate(c: &mut Criterion) {
    c.bench_function("validate_pdftocairo", |b| {
        b.iter(|| black_box(validate(black_box("pdftocairo -png -r 150 doc.pdf page"))));
    });
    c.bench_function("validate_unknown_tool", |b| {
        b.iter(|| black_box(validate(black_box("echo 'hello world' > out.txt"))));
    });
}

fn bench_resolve(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let mut refs = Vec::new();
    for i in 0..50 {
        let id = uuid::Uuid::new_v4().to_string();
        std::fs::write(dir.path().join(format!("{id}.mp4")), b"").unwrap();
        if i % 10 == 0 {
            refs.push(format!("{id}.mp4"));
        }
    }
    refs.push("holiday.mp4".to_string());
    refs.push("missing.wav".to_string());

    c.bench_function("resolve_50_files", |b| {
        b.iter(|| black_box(resolve(dir.path(), black_box(&refs))));
    });
}

criterion_group!(benches, bench_sequence, bench_validate, bench_resolve);
criterion_main!(benches);
