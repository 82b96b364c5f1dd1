//! Regeneration Integration Tests

mod common;

use std::time::Duration;

use common::*;
use taleweaver::core::{fetch_bundle, GenerationLimits, Orchestrator, Regenerator};
use taleweaver::domain::{Bundle, DurableId, PedagogicalApproach, StyleOverrides};
use taleweaver::error::Failure;
use taleweaver::store::Stores;

async fn saved_story(stores: &Stores, scenes: u32, failing: &[u32]) -> Bundle<DurableId> {
    let orch = Orchestrator::new(
        generators(
            FakeStory::hedgehog(),
            FakeExtractor::numbered(),
            FakeImages::failing_on(failing),
        ),
        stores.clone(),
    );
    orch.generate(&brief(), scenes).await.unwrap()
}

#[tokio::test]
async fn test_regenerate_adds_a_new_current_image() {
    let stores = Stores::in_memory();
    let bundle = saved_story(&stores, 2, &[]).await;
    let target = bundle.scenario(1).unwrap();
    let previous = target.image.clone().unwrap();

    // Keep created_at strictly increasing
    tokio::time::sleep(Duration::from_millis(5)).await;

    let images = FakeImages::ok();
    let regenerated = Regenerator::new(images.clone(), stores.clone())
        .regenerate(target.scenario.id, &StyleOverrides::default())
        .await
        .unwrap();

    assert_eq!(regenerated.replaces, Some(previous.id));
    assert_ne!(regenerated.image.id, previous.id);
    assert_eq!(regenerated.image.scenario_id, target.scenario.id);
    assert!(regenerated
        .image
        .prompt
        .starts_with(&target.scenario.image_prompt));

    // Scenario untouched, old image kept, new one current
    let scenario = stores.scenarios.get(target.scenario.id).await.unwrap().unwrap();
    assert_eq!(scenario, target.scenario);
    let history = stores.images.history(target.scenario.id).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].id, regenerated.image.id);
    assert_eq!(history[1], previous);

    let fetched = fetch_bundle(&stores, bundle.story.id).await.unwrap();
    assert_eq!(
        fetched.scenario(1).unwrap().image.as_ref().unwrap().id,
        regenerated.image.id
    );
    assert_eq!(fetched.scenario(2).unwrap().image, bundle.scenario(2).unwrap().image);
}

#[tokio::test]
async fn test_regenerate_fills_a_missing_image() {
    let stores = Stores::in_memory();
    let bundle = saved_story(&stores, 2, &[2]).await;
    let target = bundle.scenario(2).unwrap();
    assert!(target.image.is_none());

    let regenerated = Regenerator::new(FakeImages::ok(), stores.clone())
        .regenerate(target.scenario.id, &StyleOverrides::default())
        .await
        .unwrap();

    assert!(regenerated.replaces.is_none());
    let fetched = fetch_bundle(&stores, bundle.story.id).await.unwrap();
    assert_eq!(fetched.image_count(), 2);
}

#[tokio::test]
async fn test_approach_defaults_to_story_and_can_be_overridden() {
    let stores = Stores::in_memory();
    let bundle = saved_story(&stores, 1, &[]).await;
    let scenario_id = bundle.scenario(1).unwrap().scenario.id;

    let images = FakeImages::ok();
    let regenerator = Regenerator::new(images.clone(), stores.clone());

    regenerator
        .regenerate(scenario_id, &StyleOverrides::default())
        .await
        .unwrap();
    let style = images.last_style().unwrap();
    assert_eq!(style.approach, PedagogicalApproach::Montessori);
    assert_eq!(style.width, 512);

    regenerator
        .regenerate(
            scenario_id,
            &StyleOverrides {
                approach: Some(PedagogicalApproach::Waldorf),
                width: Some(768),
                style: Some("watercolor".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let style = images.last_style().unwrap();
    assert_eq!(style.approach, PedagogicalApproach::Waldorf);
    assert_eq!(style.width, 768);
    assert_eq!(style.height, 512);
    assert_eq!(style.style, "watercolor");

    assert_eq!(stores.images.history(scenario_id).await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_unknown_scenario_is_not_found() {
    let stores = Stores::in_memory();
    let bundle = saved_story(&stores, 1, &[]).await;
    let scenario_id = bundle.scenario(1).unwrap().scenario.id;
    assert!(stores.stories.delete(bundle.story.id).await.unwrap());

    let images = FakeImages::ok();
    let failure = Regenerator::new(images.clone(), stores)
        .regenerate(scenario_id, &StyleOverrides::default())
        .await
        .unwrap_err();

    assert!(matches!(failure, Failure::NotFound { entity: "scenario", .. }));
    assert_eq!(images.call_count(), 0);
}

#[tokio::test]
async fn test_invalid_dimensions_rejected_before_generation() {
    let stores = Stores::in_memory();
    let bundle = saved_story(&stores, 1, &[]).await;
    let scenario_id = bundle.scenario(1).unwrap().scenario.id;

    let images = FakeImages::ok();
    let failure = Regenerator::new(images.clone(), stores)
        .regenerate(
            scenario_id,
            &StyleOverrides {
                height: Some(4096),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();

    assert!(matches!(failure, Failure::Validation(_)));
    assert_eq!(images.call_count(), 0);
}

#[tokio::test]
async fn test_provider_failure_leaves_history_unchanged() {
    let stores = Stores::in_memory();
    let bundle = saved_story(&stores, 1, &[]).await;
    let scenario_id = bundle.scenario(1).unwrap().scenario.id;

    let failure = Regenerator::new(FakeImages::failing_on(&[1]), stores.clone())
        .regenerate(scenario_id, &StyleOverrides::default())
        .await
        .unwrap_err();

    assert_eq!(failure.kind(), "provider_failure");
    assert_eq!(stores.images.history(scenario_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_slow_regeneration_times_out() {
    let stores = Stores::in_memory();
    let bundle = saved_story(&stores, 1, &[]).await;
    let scenario_id = bundle.scenario(1).unwrap().scenario.id;

    let failure = Regenerator::new(
        FakeImages::delayed(&[(1, Duration::from_secs(10))]),
        stores,
    )
    .with_limits(GenerationLimits {
        image_timeout_seconds: 1,
        ..Default::default()
    })
    .regenerate(scenario_id, &StyleOverrides::default())
    .await
    .unwrap_err();

    assert!(failure.to_string().contains("timed out"));
}
