use criterion::{black_box, criterion_group, criterion_main, Criterion};

use cv_stereo_cloud::block_matching::{BlockMatcher, Params as BlockParams};
use cv_stereo_cloud::prelude::*;
use cv_stereo_cloud::semi_global::{Params as SemiGlobalParams, SemiGlobalMatcher};
use cv_stereo_cloud::test_utils::{pinhole_calibration, shifted_frame, shifted_pair};
use cv_stereo_cloud::visualize::visualize;

const WIDTH: u32 = 320;
const HEIGHT: u32 = 240;

fn matcher_bench(c: &mut Criterion) {
    let pair = shifted_pair(WIDTH, HEIGHT, 12);

    let mut bm = BlockMatcher::new(BlockParams::default());
    c.bench_function("block matching 320x240", |b| b.iter(|| bm.compute(black_box(&pair))));

    let mut sgm = SemiGlobalMatcher::new(SemiGlobalParams::default());
    c.bench_function("semi-global 320x240", |b| b.iter(|| sgm.compute(black_box(&pair))));
}

fn reconstruction_bench(c: &mut Criterion) {
    let frame = shifted_frame(WIDTH, HEIGHT, 12);
    let mut pipeline = StereoPipeline::new(
        pinhole_calibration(WIDTH, HEIGHT),
        MatcherKind::BlockMatching.build()
    )
    .unwrap();
    let processed = pipeline.process(&frame).unwrap();

    c.bench_function("visualize 320x240", |b| {
        b.iter(|| visualize(black_box(&processed.disparity)))
    });
    c.bench_function("point cloud 320x240", |b| {
        b.iter(|| pipeline.point_cloud(black_box(&processed.pair), black_box(&processed.disparity)))
    });
}

criterion_group!(benches, matcher_bench, reconstruction_bench);
criterion_main!(benches);
