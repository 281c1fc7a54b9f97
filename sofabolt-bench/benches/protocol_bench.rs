//! Frame encoding/decoding benchmarks.

use bytes::BytesMut;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use sofabolt_protocol::{
    Command, Decoder, Encoder, FastSimpleMap, HeaderMap, Proto, Request, Response, SimpleMap,
    Version, CLASS_REQUEST,
};

fn create_test_request(proto: Proto, content_size: usize) -> Request {
    let mut req = Request::new();
    req.set_proto(proto)
        .set_class(CLASS_REQUEST.as_bytes())
        .set_header("service", "com.alipay.test.EchoService:1.0")
        .set_header("sofa_head_method_name", "echo")
        .set_content("x".repeat(content_size).as_bytes());
    if proto == Proto::BoltV2 {
        req.set_ver1(Version::BOLT_V2).set_switc(1);
    }
    req
}

fn bench_request_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("request_encode");

    for proto in [Proto::BoltV1, Proto::BoltV2] {
        for size in [100, 1000, 10000] {
            let mut request = create_test_request(proto, size);
            let mut dst = BytesMut::with_capacity(request.size());

            group.throughput(Throughput::Bytes(request.size() as u64));
            group.bench_function(BenchmarkId::new(proto.to_string(), size), |b| {
                b.iter(|| {
                    dst.clear();
                    request.write(&mut dst).unwrap();
                    black_box(dst.len())
                });
            });
        }
    }

    group.finish();
}

fn bench_request_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("request_decode");

    for proto in [Proto::BoltV1, Proto::BoltV2] {
        for size in [100, 1000, 10000] {
            let mut request = create_test_request(proto, size);
            let encoded = Encoder::encode_request(&mut request).unwrap();

            group.throughput(Throughput::Bytes(encoded.len() as u64));
            group.bench_with_input(
                BenchmarkId::new(proto.to_string(), size),
                &encoded,
                |b, encoded| {
                    let mut req = Request::new();
                    b.iter(|| black_box(req.read(encoded).unwrap()));
                },
            );
        }
    }

    group.finish();
}

fn bench_response_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("response_encode");

    for size in [100, 1000, 10000] {
        let request = create_test_request(Proto::BoltV1, 0);
        let mut response = Response::new();
        response
            .derive(&request)
            .set_content("x".repeat(size).as_bytes());

        group.throughput(Throughput::Elements(1));
        group.bench_function(BenchmarkId::from_parameter(size), |b| {
            b.iter(|| black_box(Encoder::encode_response(&mut response).unwrap()));
        });
    }

    group.finish();
}

fn bench_stream_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("stream_decode");

    // Many small frames arriving in one read.
    let mut batch = BytesMut::new();
    for _ in 0..64 {
        create_test_request(Proto::BoltV1, 64).write(&mut batch).unwrap();
    }

    group.throughput(Throughput::Elements(64));
    group.bench_function("64_frames", |b| {
        b.iter(|| {
            let mut decoder = Decoder::new();
            decoder.extend(&batch);
            let mut cmd = Command::new();
            let mut n = 0;
            while decoder.decode_into(&mut cmd).unwrap() {
                n += 1;
            }
            black_box(n)
        });
    });

    group.finish();
}

fn bench_header_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("header_lookup");
    let keys = ["service", "host", "content-type", "authorization", "x-trace-id"];

    let mut simple = SimpleMap::new();
    let mut fast = FastSimpleMap::new();
    for key in keys {
        simple.set(key, "value");
        fast.set(key, "value");
    }

    group.bench_function("simple_map", |b| {
        b.iter(|| {
            for key in keys {
                black_box(simple.get(key));
            }
        });
    });
    group.bench_function("fast_simple_map", |b| {
        b.iter(|| {
            for key in keys {
                black_box(fast.get(key));
            }
        });
    });

    group.finish();
}

fn bench_crc32(c: &mut Criterion) {
    let mut group = c.benchmark_group("crc32");

    for size in [100, 1000, 10000, 100000] {
        let data = vec![0x42u8; size];

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &data, |b, data| {
            b.iter(|| black_box(crc32fast::hash(data)));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_request_encode,
    bench_request_decode,
    bench_response_encode,
    bench_stream_decode,
    bench_header_lookup,
    bench_crc32,
);

criterion_main!(benches);
