mod common;

use std::sync::Arc;

use sieve_core::config::{GenerationSettings, SettingsOverride};
use sieve_core::engine::EngineConfig;
use sieve_core::signature::{FieldKind, FieldSpec, OutputSchema};
use sieve_core::SieveError;
use sieve_engines::{BackendSet, ChatEngine, ConstrainedEngine, TaggerEngine, ZeroShotEngine};
use sieve_tasks::classification::FewshotExample;
use sieve_tasks::{Pipeline, PipelineConfig, PredictiveTask, TaskSpec};

use common::{docs, CannedChat, CountingZeroShot, KeywordConstrained, WordTagger};

fn build_pipeline(
    constrained: Arc<KeywordConstrained>,
    zero_shot: Arc<CountingZeroShot>,
) -> Pipeline {
    let engine = Arc::new(ConstrainedEngine::new(constrained).with_settings(GenerationSettings {
        batch_size: Some(3),
        strict: false,
    }));

    let topics = PredictiveTask::builder(
        TaskSpec::Classification {
            labels: vec!["cats".to_string(), "dogs".to_string()],
        },
        engine.clone(),
    )
    .task_id("topics")
    .prompt_signature_description("Pet topics.")
    .include_meta(true)
    .fewshot_examples([FewshotExample {
        text: "A kitten.".to_string(),
        reasoning: "Young cat.".to_string(),
        confidence_per_label: [("cats".to_string(), 1.0)].into_iter().collect(),
    }])
    .build()
    .unwrap();

    let people = PredictiveTask::builder(
        TaskSpec::InformationExtraction {
            entity_schema: OutputSchema::new("Person")
                .field(FieldSpec::new("name", FieldKind::String)),
        },
        engine,
    )
    .build()
    .unwrap();

    let nli = PredictiveTask::builder(
        TaskSpec::Classification {
            labels: vec!["cats".to_string(), "dogs".to_string()],
        },
        Arc::new(ZeroShotEngine::new(zero_shot).with_multi_label(true)),
    )
    .task_id("nli")
    .prompt_template("This text mentions {}.")
    .build()
    .unwrap();

    Pipeline::new(vec![Box::new(topics), Box::new(people), Box::new(nli)]).unwrap()
}

#[tokio::test]
async fn restored_pipeline_reproduces_results() {
    let constrained = KeywordConstrained::new("keyword");
    let zero_shot = CountingZeroShot::new();
    let original = build_pipeline(constrained.clone(), zero_shot.clone());

    let snapshot = original.to_config().to_json().unwrap();
    let config = PipelineConfig::from_json(&snapshot).unwrap();
    assert_eq!(config.tasks.len(), 3);
    assert_eq!(config.tasks[0].task_id, "topics");
    assert_eq!(config.tasks[0].fewshot_examples.len(), 1);
    assert_eq!(config.tasks[2].prompt_template.as_deref(), Some("This text mentions {}."));

    let backends = BackendSet::new()
        .with_constrained(constrained)
        .with_zero_shot(zero_shot);
    let restored = Pipeline::from_config(&config, &backends).unwrap();
    assert_eq!(restored.to_config().tasks, config.tasks);

    let texts = ["Alice has two cats", "Bob walks the dogs", "cats and dogs"];
    let mut first = docs(&texts);
    let mut second = docs(&texts);
    original.run(&mut first).await.unwrap();
    restored.run(&mut second).await.unwrap();

    assert_eq!(first, second);
    assert!(second[0].meta.contains_key("topics"));
}

#[test]
fn engine_settings_survive_the_snapshot() {
    let pipeline = build_pipeline(KeywordConstrained::new("keyword"), CountingZeroShot::new());
    let config = pipeline.to_config();

    assert_eq!(
        config.tasks[0].engine,
        EngineConfig::Constrained {
            backend: "keyword".to_string(),
            settings: GenerationSettings {
                batch_size: Some(3),
                strict: false,
            },
        }
    );
    assert!(matches!(
        config.tasks[2].engine,
        EngineConfig::ZeroShot { multi_label: true, .. }
    ));
}

#[test]
fn tagger_threshold_survives_the_snapshot() {
    let task = PredictiveTask::builder(
        TaskSpec::QuestionAnswering {
            questions: vec!["who?".to_string()],
        },
        Arc::new(TaggerEngine::new(Arc::new(WordTagger)).with_threshold(0.8)),
    )
    .build()
    .unwrap();
    let pipeline = Pipeline::new(vec![Box::new(task)]).unwrap();
    let config = pipeline.to_config();

    let restored = Pipeline::from_config(&config, &BackendSet::new().with_tagger(Arc::new(WordTagger)))
        .unwrap();
    match &restored.to_config().tasks[0].engine {
        EngineConfig::Tagger { threshold, .. } => assert_eq!(*threshold, 0.8),
        other => panic!("expected tagger engine, got {other:?}"),
    }
}

#[test]
fn restore_without_backend_fails() {
    let pipeline = build_pipeline(KeywordConstrained::new("keyword"), CountingZeroShot::new());
    let config = pipeline.to_config();

    let only_constrained = BackendSet::new().with_constrained(KeywordConstrained::new("keyword"));
    assert!(matches!(
        Pipeline::from_config(&config, &only_constrained),
        Err(SieveError::Config(_))
    ));

    let renamed = BackendSet::new()
        .with_constrained(KeywordConstrained::new("other"))
        .with_zero_shot(CountingZeroShot::new());
    assert!(Pipeline::from_config(&config, &renamed).is_err());
}

#[test]
fn snapshot_from_another_version_still_loads() {
    let pipeline = build_pipeline(KeywordConstrained::new("keyword"), CountingZeroShot::new());
    let mut config = pipeline.to_config();
    config.version = "0.0.1".to_string();

    let backends = BackendSet::new()
        .with_constrained(KeywordConstrained::new("keyword"))
        .with_zero_shot(CountingZeroShot::new());
    let restored = Pipeline::from_config(&config, &backends).unwrap();
    assert_eq!(restored.len(), 3);
}

#[test]
fn duplicate_task_ids_rejected_on_restore() {
    let pipeline = build_pipeline(KeywordConstrained::new("keyword"), CountingZeroShot::new());
    let mut config = pipeline.to_config();
    config.tasks[1].task_id = "topics".to_string();

    let backends = BackendSet::new()
        .with_constrained(KeywordConstrained::new("keyword"))
        .with_zero_shot(CountingZeroShot::new());
    assert!(matches!(
        Pipeline::from_config(&config, &backends),
        Err(SieveError::DuplicateTaskId(id)) if id == "topics"
    ));
}

#[tokio::test]
async fn strict_override_applies_to_restored_engines() {
    let chat = CannedChat::new("not json");
    let task = PredictiveTask::builder(
        TaskSpec::Summarization { max_n: 5 },
        Arc::new(ChatEngine::new(chat.clone())),
    )
    .build()
    .unwrap();
    let mut config = Pipeline::new(vec![Box::new(task)]).unwrap().to_config();
    let backends = BackendSet::new().with_chat(chat);

    let lenient = Pipeline::from_config(&config, &backends).unwrap();
    assert!(lenient.run(&mut docs(&["Some text."])).await.is_ok());

    config.apply_overrides(&SettingsOverride {
        batch_size: Some(1),
        strict: Some(true),
    });
    let strict = Pipeline::from_config(&config, &backends).unwrap();
    assert_eq!(
        strict.to_config().tasks[0].engine.settings(),
        &GenerationSettings {
            batch_size: Some(1),
            strict: true,
        }
    );
    assert!(matches!(
        strict.run(&mut docs(&["Some text."])).await,
        Err(SieveError::ContractViolation(_))
    ));
}
