// Criterion benchmarks for minirpc-common protocol layer
//
// Run benchmarks with:
//   cargo bench -p minirpc-common
//
// For detailed output with plots:
//   cargo bench -p minirpc-common -- --save-baseline main

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use minirpc_common::protocol::{encode_frame, Header, HEADER_SIZE};
use minirpc_common::transport::JsonCodec;
use minirpc_common::{Request, Response};
use serde_json::json;

fn bench_header(c: &mut Criterion) {
    let mut group = c.benchmark_group("header");

    group.bench_function("encode", |b| {
        let header = Header::new(128, 42);
        b.iter(|| black_box(&header).encode());
    });

    group.bench_function("decode", |b| {
        let bytes = Header::new(128, 42).encode();
        b.iter(|| Header::decode(black_box(&bytes)));
    });

    group.finish();
}

fn bench_request_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("request_codec");

    let small = Request::new("CalculatorService", "add", vec![json!(4), json!(5)]);
    let data: Vec<String> = (0..100).map(|i| format!("item_{}", i)).collect();
    let large = Request::new("Store", "put", vec![json!({ "data": data })]);

    group.bench_function("encode_small", |b| {
        b.iter(|| JsonCodec::encode_request(black_box(&small)));
    });

    group.bench_function("encode_large", |b| {
        b.iter(|| JsonCodec::encode_request(black_box(&large)));
    });

    let small_body = JsonCodec::encode_request(&small).unwrap();
    let large_body = JsonCodec::encode_request(&large).unwrap();

    group.bench_function("decode_small", |b| {
        b.iter(|| JsonCodec::decode_request(black_box(&small_body)));
    });

    group.bench_function("decode_large", |b| {
        b.iter(|| JsonCodec::decode_request(black_box(&large_body)));
    });

    group.finish();
}

fn bench_response_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("response_codec");

    let success = Response::success(json!(9));
    let error = Response::error(500, "division by zero");

    group.bench_function("encode_success", |b| {
        b.iter(|| JsonCodec::encode_response(black_box(&success)));
    });

    group.bench_function("encode_error", |b| {
        b.iter(|| JsonCodec::encode_response(black_box(&error)));
    });

    let body = JsonCodec::encode_response(&success).unwrap();
    group.bench_function("decode_success", |b| {
        b.iter(|| JsonCodec::decode_response(black_box(&body)));
    });

    group.finish();
}

fn bench_full_frame(c: &mut Criterion) {
    let mut group = c.benchmark_group("full_frame");

    let request = Request::new("CalculatorService", "add", vec![json!(4), json!(5)]);

    group.bench_function("encode_request_frame", |b| {
        b.iter(|| {
            let body = JsonCodec::encode_request(black_box(&request)).unwrap();
            encode_frame(black_box(7), &body)
        });
    });

    let frame = encode_frame(7, &JsonCodec::encode_request(&request).unwrap()).unwrap();
    group.bench_function("decode_request_frame", |b| {
        b.iter(|| {
            let header = Header::decode(black_box(&frame[..HEADER_SIZE])).unwrap();
            let end = HEADER_SIZE + header.body_len as usize;
            JsonCodec::decode_request(&frame[HEADER_SIZE..end])
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_header,
    bench_request_codec,
    bench_response_codec,
    bench_full_frame
);
criterion_main!(benches);
