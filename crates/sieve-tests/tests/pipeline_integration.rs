mod common;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use sieve_core::config::GenerationSettings;
use sieve_core::engine::Engine;
use sieve_core::output::TaskOutput;
use sieve_core::signature::{FieldKind, FieldSpec, OutputSchema};
use sieve_core::{Document, Result, SieveError};
use sieve_engines::{ChatEngine, ConstrainedEngine, ReasoningEngine, TaggerEngine, ZeroShotEngine};
use sieve_tasks::{Dataset, Pipeline, PredictiveTask, Task, TaskConfig, TaskSpec};

use common::{docs, CannedChat, CountingZeroShot, KeywordConstrained, WordTagger};

fn labels(names: &[&str]) -> TaskSpec {
    TaskSpec::Classification {
        labels: names.iter().map(|s| s.to_string()).collect(),
    }
}

fn scores(doc: &Document, task_id: &str) -> Vec<(String, f64)> {
    doc.result(task_id)
        .and_then(TaskOutput::as_classification)
        .expect("classification result")
        .labels
        .iter()
        .map(|s| (s.label.clone(), s.score))
        .collect()
}

#[tokio::test]
async fn results_follow_document_order_under_concurrency() {
    let backend = KeywordConstrained::new("keyword");
    let engine = ConstrainedEngine::new(backend.clone()).with_settings(GenerationSettings {
        batch_size: Some(2),
        strict: false,
    });
    let task = PredictiveTask::builder(TaskSpec::Summarization { max_n: 5 }, Arc::new(engine))
        .build()
        .unwrap();

    let texts: Vec<String> = (0..7).map(|i| format!("document number {i}")).collect();
    let mut docs: Vec<Document> = texts.iter().map(Document::new).collect();
    task.run(&mut docs).await.unwrap();

    assert_eq!(backend.calls(), 7);
    for (doc, text) in docs.iter().zip(&texts) {
        assert_eq!(
            doc.result("Summarization").and_then(TaskOutput::as_text),
            Some(text.to_uppercase().as_str())
        );
    }
}

#[tokio::test]
async fn chunk_scores_are_averaged_per_document() {
    let engine = ConstrainedEngine::new(KeywordConstrained::new("keyword"));
    let task = PredictiveTask::builder(labels(&["sports", "politics"]), Arc::new(engine))
        .build()
        .unwrap();

    let mut docs = vec![
        Document::new("sports then politics").with_chunks(["sports news", "politics news"]),
        Document::new("politics only"),
        Document::new("sports and politics").with_chunks(["sports", "sports", "sports politics"]),
    ];
    task.run(&mut docs).await.unwrap();

    // Ties keep label declaration order.
    assert_eq!(
        scores(&docs[0], "Classification"),
        vec![("sports".to_string(), 0.5), ("politics".to_string(), 0.5)]
    );
    assert_eq!(
        scores(&docs[1], "Classification"),
        vec![("politics".to_string(), 1.0), ("sports".to_string(), 0.0)]
    );
    let third = scores(&docs[2], "Classification");
    assert_eq!(third[0], ("sports".to_string(), 1.0));
    assert_eq!(third[1].0, "politics");
    assert!((third[1].1 - 1.0 / 3.0).abs() < 1e-9);

    let reasoning = docs[0]
        .result("Classification")
        .and_then(TaskOutput::as_classification)
        .and_then(|c| c.reasoning.clone())
        .unwrap();
    assert_eq!(
        serde_json::from_str::<Vec<String>>(&reasoning).unwrap(),
        vec!["saw sports news", "saw politics news"]
    );
}

#[tokio::test]
async fn include_meta_keeps_raw_chunk_results() {
    let engine = ConstrainedEngine::new(KeywordConstrained::new("keyword"));
    let task = PredictiveTask::builder(labels(&["rain"]), Arc::new(engine))
        .task_id("weather")
        .include_meta(true)
        .build()
        .unwrap();

    let mut docs = vec![Document::new("ignored").with_chunks(["rain today", "sun tomorrow"])];
    task.run(&mut docs).await.unwrap();

    let meta = docs[0].meta.get("weather").and_then(Value::as_array).unwrap();
    assert_eq!(meta.len(), 2);
    assert_eq!(meta[0]["rain"], json!(1.0));
    assert_eq!(meta[1]["rain"], json!(0.0));
}

#[tokio::test]
async fn meta_is_not_written_by_default() {
    let engine = ConstrainedEngine::new(KeywordConstrained::new("keyword"));
    let task = PredictiveTask::builder(labels(&["rain"]), Arc::new(engine))
        .build()
        .unwrap();

    let mut docs = docs(&["rain"]);
    task.run(&mut docs).await.unwrap();
    assert!(docs[0].meta.is_empty());
}

#[tokio::test]
async fn entities_are_unioned_across_chunks() {
    let entity = OutputSchema::new("Person").field(FieldSpec::new("name", FieldKind::String));
    let engine = ConstrainedEngine::new(KeywordConstrained::new("keyword"));
    let task = PredictiveTask::builder(
        TaskSpec::InformationExtraction {
            entity_schema: entity,
        },
        Arc::new(engine),
    )
    .build()
    .unwrap();

    let mut docs = vec![Document::new("x").with_chunks(["Alice met Bob", "then Alice left"])];
    task.run(&mut docs).await.unwrap();

    let entities = docs[0]
        .result("InformationExtraction")
        .and_then(TaskOutput::as_entities)
        .unwrap();
    assert_eq!(entities, &[json!({"name": "Alice"}), json!({"name": "Bob"})]);
}

#[tokio::test]
async fn zero_shot_classification_end_to_end() {
    let backend = CountingZeroShot::new();
    let engine = ZeroShotEngine::new(backend.clone());
    let task = PredictiveTask::builder(labels(&["cats", "dogs"]), Arc::new(engine))
        .build()
        .unwrap();

    let mut docs = docs(&["cats cats dogs", "nothing here"]);
    task.run(&mut docs).await.unwrap();

    assert_eq!(
        scores(&docs[0], "Classification"),
        vec![("cats".to_string(), 1.0), ("dogs".to_string(), 0.5)]
    );
    assert_eq!(
        scores(&docs[1], "Classification"),
        vec![("cats".to_string(), 0.0), ("dogs".to_string(), 0.0)]
    );
    // Unbounded batch: one backend call for all chunks.
    assert_eq!(backend.calls.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[tokio::test]
async fn tagger_answers_take_best_span_across_chunks() {
    let engine = TaggerEngine::new(Arc::new(WordTagger));
    let task = PredictiveTask::builder(
        TaskSpec::QuestionAnswering {
            questions: vec!["longest word?".to_string()],
        },
        Arc::new(engine),
    )
    .build()
    .unwrap();

    let mut docs = vec![Document::new("x").with_chunks(["a tiny example", "an enormous elephant"])];
    task.run(&mut docs).await.unwrap();

    let answers = docs[0]
        .result("QuestionAnswering")
        .and_then(TaskOutput::as_answers)
        .unwrap();
    assert_eq!(answers.len(), 1);
    assert_eq!(answers[0].question, "longest word?");
    // "enormous" and "elephant" tie; the earlier span wins.
    assert_eq!(answers[0].answer, "enormous");
}

#[tokio::test]
async fn reasoning_engine_translation_end_to_end() {
    let chat = CannedChat::new(r#"```json
{"reasoning": "simple greeting", "translation": "Hola"}
```"#);
    let task = PredictiveTask::builder(
        TaskSpec::Translation {
            to: "Spanish".to_string(),
        },
        Arc::new(ReasoningEngine::new(chat.clone())),
    )
    .build()
    .unwrap();

    let mut docs = docs(&["Hello"]);
    task.run(&mut docs).await.unwrap();

    assert_eq!(docs[0].result("Translation").and_then(TaskOutput::as_text), Some("Hola"));
    let requests = chat.requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].prompt.contains("text: Hello"));
    assert!(requests[0].prompt.contains("to: Spanish"));
}

#[tokio::test]
async fn unparseable_output_is_absent_unless_strict() {
    let chat = CannedChat::new("I would rather not answer in JSON.");
    let lenient = PredictiveTask::builder(
        TaskSpec::Summarization { max_n: 5 },
        Arc::new(ReasoningEngine::new(chat.clone())),
    )
    .build()
    .unwrap();

    let mut docs = docs(&["Some text."]);
    lenient.run(&mut docs).await.unwrap();
    assert_eq!(docs[0].result("Summarization").and_then(TaskOutput::as_text), Some(""));

    let strict = PredictiveTask::builder(
        TaskSpec::Summarization { max_n: 5 },
        Arc::new(ReasoningEngine::new(chat).with_settings(GenerationSettings {
            batch_size: None,
            strict: true,
        })),
    )
    .build()
    .unwrap();
    assert!(strict.run(&mut docs).await.is_err());
}

#[tokio::test]
async fn replies_without_reasoning_keep_their_scores() {
    let strict = GenerationSettings {
        batch_size: None,
        strict: true,
    };
    let engines: [Arc<dyn Engine>; 2] = [
        Arc::new(ChatEngine::new(CannedChat::new(r#"{"A": 0.9, "B": 0.1}"#)).with_settings(strict.clone())),
        Arc::new(
            ReasoningEngine::new(CannedChat::new(r#"{"confidence_per_label": {"A": 0.9, "B": 0.1}}"#))
                .with_settings(strict),
        ),
    ];

    for engine in engines {
        let task = PredictiveTask::builder(labels(&["A", "B"]), engine)
            .build()
            .unwrap();
        let mut docs = docs(&["Some text."]);
        task.run(&mut docs).await.unwrap();
        assert_eq!(
            scores(&docs[0], "Classification"),
            vec![("A".to_string(), 0.9), ("B".to_string(), 0.1)]
        );
    }
}

#[tokio::test]
async fn documents_without_text_are_rejected() {
    let backend = KeywordConstrained::new("keyword");
    let task = PredictiveTask::builder(
        TaskSpec::Summarization { max_n: 5 },
        Arc::new(ConstrainedEngine::new(backend.clone())),
    )
    .build()
    .unwrap();

    let mut docs = vec![Document::new("fine"), Document::default()];
    let err = task.run(&mut docs).await.unwrap_err();
    assert!(matches!(err, SieveError::MissingText { index: 1 }));
    assert_eq!(backend.calls(), 0);
}

/// Counts the words of an earlier task's text result.
struct WordCount {
    reads: &'static str,
}

#[async_trait]
impl Task for WordCount {
    fn id(&self) -> &str {
        "word_count"
    }

    async fn run(&self, docs: &mut [Document]) -> Result<()> {
        for doc in docs.iter_mut() {
            let words = doc
                .result(self.reads)
                .and_then(TaskOutput::as_text)
                .map_or(0, |t| t.split_whitespace().count());
            doc.results
                .insert("word_count".to_string(), TaskOutput::Text(words.to_string()));
        }
        Ok(())
    }

    fn config(&self) -> TaskConfig {
        unimplemented!("not serialized in these tests")
    }

    fn to_dataset(&self, _docs: &[Document]) -> Result<Dataset> {
        Ok(Dataset::new("word_count", &["text", "words"]))
    }
}

#[tokio::test]
async fn later_tasks_see_earlier_results() {
    let summarize = PredictiveTask::builder(
        TaskSpec::Summarization { max_n: 5 },
        Arc::new(ConstrainedEngine::new(KeywordConstrained::new("keyword"))),
    )
    .task_id("summary")
    .build()
    .unwrap();

    let pipeline = Pipeline::new(Vec::new())
        .unwrap()
        .then(summarize)
        .unwrap()
        .then(WordCount { reads: "summary" })
        .unwrap();
    assert_eq!(pipeline.len(), 2);

    let mut docs = docs(&["three short words", "one"]);
    pipeline.run(&mut docs).await.unwrap();

    assert_eq!(
        docs[0].result("summary").and_then(TaskOutput::as_text),
        Some("THREE SHORT WORDS")
    );
    assert_eq!(docs[0].result("word_count").and_then(TaskOutput::as_text), Some("3"));
    assert_eq!(docs[1].result("word_count").and_then(TaskOutput::as_text), Some("1"));
}

#[tokio::test]
async fn dataset_export_names_the_missing_task() {
    let task = PredictiveTask::builder(
        labels(&["a", "b"]),
        Arc::new(ConstrainedEngine::new(KeywordConstrained::new("keyword"))),
    )
    .task_id("topics")
    .build()
    .unwrap();

    let mut processed = docs(&["a text"]);
    task.run(&mut processed).await.unwrap();
    let dataset = task.to_dataset(&processed).unwrap();
    assert_eq!(dataset.len(), 1);
    assert_eq!(dataset.columns, vec!["text", "labels", "scores"]);

    processed.push(Document::new("never processed"));
    match task.to_dataset(&processed) {
        Err(SieveError::MissingResult { task_id }) => assert_eq!(task_id, "topics"),
        other => panic!("expected MissingResult, got {other:?}"),
    }
}
