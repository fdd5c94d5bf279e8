use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use tokio::runtime::Runtime;

use windrose::buf::{self, MultiBuffer};
use windrose::pipe::{self, PipeOptions, StreamReader};

fn bench_pipe(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("pipe");
    group.throughput(Throughput::Bytes(buf::SIZE as u64));
    group.bench_function("write_read_one_buffer", |b| {
        let payload = vec![0xA5u8; buf::SIZE];
        b.to_async(&rt).iter(|| async {
            let (reader, writer) = pipe::new(PipeOptions::default());
            writer
                .write(MultiBuffer::from_bytes(&payload))
                .await
                .unwrap();
            black_box(reader.read().await.unwrap());
        });
    });

    group.throughput(Throughput::Bytes((64 * buf::SIZE) as u64));
    group.bench_function("stream_64_buffers", |b| {
        let payload = vec![0x5Au8; buf::SIZE];
        b.to_async(&rt).iter(|| async {
            let (reader, writer) = pipe::new(PipeOptions::default());
            let producer = async {
                for _ in 0..64 {
                    writer
                        .write(MultiBuffer::from_bytes(&payload))
                        .await
                        .unwrap();
                }
                writer.close();
            };
            let consumer = async {
                let mut total = 0usize;
                loop {
                    match reader.read().await {
                        Ok(mb) => total += mb.total_len(),
                        Err(_) => break,
                    }
                }
                total
            };
            let (_, total) = tokio::join!(producer, consumer);
            black_box(total);
        });
    });
    group.finish();
}

criterion_group!(benches, bench_pipe);
criterion_main!(benches);
