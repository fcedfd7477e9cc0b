//! Estimator performance benchmarks.
//!
//! Measures design construction and the effort, CPUE, and harvest
//! estimators over synthetic interview and count frames.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use creel::{
    CpueEstimator, CpueMethod, DesignBuilder, EffortEstimator, EffortMethod, HarvestEstimator,
    HarvestMode, PeriodSource, SurveyDesign, SurveyFrame,
};

const SITES: &[&str] = &["ramp_a", "ramp_b", "ramp_c", "ramp_d"];

/// Synthetic interview frame: `rows` trips spread over four sites.
fn interview_frame(rows: usize, seed: u64) -> SurveyFrame {
    let mut rng = fastrand::Rng::with_seed(seed);
    let mut sites = Vec::with_capacity(rows);
    let mut complete = Vec::with_capacity(rows);
    let mut catches = Vec::with_capacity(rows);
    let mut hours = Vec::with_capacity(rows);
    for _ in 0..rows {
        sites.push(SITES[rng.usize(0..SITES.len())]);
        complete.push(rng.bool());
        catches.push(f64::from(rng.u32(0..20)));
        hours.push(0.5 + rng.f64() * 7.5);
    }
    SurveyFrame::builder()
        .text("site", sites)
        .flag("trip_complete", complete)
        .numeric("catch_total", catches)
        .numeric("hours_fished", hours)
        .build()
        .unwrap()
}

/// Synthetic count frame: instantaneous snapshots over four sites.
fn count_frame(rows: usize, seed: u64) -> SurveyFrame {
    let mut rng = fastrand::Rng::with_seed(seed);
    let mut sites = Vec::with_capacity(rows);
    let mut anglers = Vec::with_capacity(rows);
    for _ in 0..rows {
        sites.push(SITES[rng.usize(0..SITES.len())]);
        anglers.push(f64::from(rng.u32(0..60)));
    }
    SurveyFrame::builder()
        .text("site", sites)
        .numeric("anglers", anglers)
        .numeric("interval_minutes", vec![30.0; rows])
        .build()
        .unwrap()
}

fn interview_design(rows: usize) -> SurveyDesign {
    DesignBuilder::new(interview_frame(rows, 1), &["site"])
        .build()
        .unwrap()
}

fn instantaneous() -> EffortMethod {
    EffortMethod::Instantaneous {
        count: "anglers".to_string(),
        interval: "interval_minutes".to_string(),
        period: PeriodSource::Minutes(480.0),
    }
}

/// Benchmark design construction, with and without bootstrap replicates.
fn bench_design_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("design_build");

    for &rows in &[1_000usize, 10_000] {
        let frame = interview_frame(rows, 1);
        group.bench_with_input(BenchmarkId::new("plain", rows), &frame, |b, frame| {
            b.iter(|| {
                black_box(
                    DesignBuilder::new(frame.clone(), &["site"])
                        .build()
                        .unwrap(),
                )
            })
        });
        group.bench_with_input(
            BenchmarkId::new("bootstrap_500", rows),
            &frame,
            |b, frame| {
                b.iter(|| {
                    black_box(
                        DesignBuilder::new(frame.clone(), &["site"])
                            .bootstrap(500, 7)
                            .build()
                            .unwrap(),
                    )
                })
            },
        );
    }

    group.finish();
}

/// Benchmark the CPUE estimator families.
fn bench_cpue(c: &mut Criterion) {
    let mut group = c.benchmark_group("cpue");

    for &rows in &[1_000usize, 10_000] {
        let design = interview_design(rows);
        group.bench_with_input(
            BenchmarkId::new("ratio_of_means", rows),
            &design,
            |b, design| {
                let estimator = CpueEstimator::new("catch_total", "hours_fished");
                b.iter(|| black_box(estimator.estimate(design).unwrap()))
            },
        );
        group.bench_with_input(
            BenchmarkId::new("auto_mixed", rows),
            &design,
            |b, design| {
                let estimator = CpueEstimator::new("catch_total", "hours_fished")
                    .with_method(CpueMethod::Auto)
                    .with_completion_column("trip_complete");
                b.iter(|| black_box(estimator.estimate(design).unwrap()))
            },
        );
    }

    // Replicate variance dominates once a design carries weights.
    let replicated = DesignBuilder::new(interview_frame(1_000, 1), &["site"])
        .bootstrap(500, 7)
        .build()
        .unwrap();
    group.bench_function("ratio_of_means_bootstrap_500", |b| {
        let estimator = CpueEstimator::new("catch_total", "hours_fished");
        b.iter(|| black_box(estimator.estimate(&replicated).unwrap()))
    });

    group.finish();
}

/// Benchmark instantaneous effort estimation.
fn bench_effort(c: &mut Criterion) {
    let mut group = c.benchmark_group("effort");

    for &rows in &[1_000usize, 10_000] {
        let design = DesignBuilder::new(count_frame(rows, 2), &["site"])
            .build()
            .unwrap();
        group.bench_with_input(
            BenchmarkId::new("instantaneous", rows),
            &design,
            |b, design| {
                let estimator = EffortEstimator::new(instantaneous());
                b.iter(|| black_box(estimator.estimate(design).unwrap()))
            },
        );
    }

    group.finish();
}

/// Benchmark the harvest join over precomputed component tables.
fn bench_harvest(c: &mut Criterion) {
    let mut group = c.benchmark_group("harvest");

    let effort_design = DesignBuilder::new(count_frame(10_000, 2), &["site"])
        .build()
        .unwrap();
    let effort = EffortEstimator::new(instantaneous())
        .estimate(&effort_design)
        .unwrap();
    let cpue = CpueEstimator::new("catch_total", "hours_fished")
        .estimate(&interview_design(10_000))
        .unwrap();

    group.bench_function("independent_join", |b| {
        let estimator = HarvestEstimator::new(HarvestMode::Independent);
        b.iter(|| black_box(estimator.estimate(&effort, &cpue).unwrap()))
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_design_build,
    bench_cpue,
    bench_effort,
    bench_harvest
);
criterion_main!(benches);
