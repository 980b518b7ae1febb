use courier_protocol::{codec, ChatCommand, ChatEvent};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn history_page(len: usize) -> String {
    let messages: Vec<String> = (1..=len)
        .map(|i| {
            format!(
                r#"{{"id":{i},"conversationId":42,"senderId":{},"message":"message number {i}","createdAt":"2024-05-01T10:00:00Z","isRead":false}}"#,
                1 + (i % 2)
            )
        })
        .collect();
    format!(
        r#"{{"event":"messages-loaded","data":{{"conversationId":42,"messages":[{}]}}}}"#,
        messages.join(",")
    )
}

fn bench_encode(c: &mut Criterion) {
    let cmd = ChatCommand::SendMessage {
        conversation_id: 42,
        message: "On my way, five minutes out".to_string(),
        request_id: Some(uuid::Uuid::new_v4()),
    };

    c.bench_function("encode_send_message", |b| {
        b.iter(|| codec::encode(black_box(&cmd)).unwrap())
    });
}

fn bench_decode(c: &mut Criterion) {
    let single = r#"{"event":"new-message","data":{"message":{"id":7,"conversationId":42,"senderId":2,"message":"hello","createdAt":"2024-05-01T10:00:00Z"}}}"#;
    let page = history_page(50);

    c.bench_function("decode_new_message", |b| {
        b.iter(|| codec::decode::<ChatEvent>(black_box(single)).unwrap())
    });

    c.bench_function("decode_history_page_50", |b| {
        b.iter(|| codec::decode::<ChatEvent>(black_box(&page)).unwrap())
    });
}

criterion_group!(benches, bench_encode, bench_decode);
criterion_main!(benches);
