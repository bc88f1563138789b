use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use nlp_transformers::model::{ClassifierTokenizer, ModelFamily};
use nlp_transformers::Processor;
use serde_json::json;

const WORDS: &[&str] = &[
    "the", "movie", "was", "great", "terrible", "plot", "acting", "i", "loved", "hated", "it",
    "a", "good", "bad", "story", "film", "and", "but", "very", "not",
];

fn tokenizer() -> ClassifierTokenizer {
    let mut vocab = serde_json::Map::new();
    for (i, token) in ["[PAD]", "[UNK]", "[CLS]", "[SEP]", "[MASK]"]
        .iter()
        .chain(WORDS)
        .enumerate()
    {
        vocab.insert(token.to_string(), json!(i));
    }
    let tokenizer_json = json!({
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": [],
        "normalizer": { "type": "BertNormalizer", "clean_text": true, "handle_chinese_chars": true,
                        "strip_accents": null, "lowercase": true },
        "pre_tokenizer": { "type": "BertPreTokenizer" },
        "post_processor": null,
        "decoder": null,
        "model": { "type": "WordPiece", "unk_token": "[UNK]", "continuing_subword_prefix": "##",
                   "max_input_chars_per_word": 100, "vocab": vocab }
    });
    ClassifierTokenizer::from_bytes(tokenizer_json.to_string().as_bytes(), ModelFamily::Bert)
        .expect("bench tokenizer")
}

fn corpus(n: usize, words_per_text: usize) -> Vec<String> {
    (0..n)
        .map(|i| {
            (0..words_per_text)
                .map(|j| WORDS[(i * 7 + j * 3) % WORDS.len()])
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect()
}

fn bench_preprocess(c: &mut Criterion) {
    let processor = Processor::from_tokenizer(tokenizer(), true);
    let texts = corpus(256, 40);
    let labels: Vec<u32> = (0..texts.len() as u32).map(|i| i % 2).collect();

    let mut group = c.benchmark_group("preprocess");
    for max_len in [32usize, 128, 512] {
        group.bench_with_input(BenchmarkId::from_parameter(max_len), &max_len, |b, &max_len| {
            b.iter(|| {
                processor
                    .preprocess(black_box(&texts), Some(labels.as_slice()), max_len)
                    .expect("preprocess")
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_preprocess);
criterion_main!(benches);
