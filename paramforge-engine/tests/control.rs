use paramforge_core::grouping::GroupingRuleSet;
use paramforge_core::mapping::{DeviceMapping, ParamMeta};
use paramforge_core::sample::Sample;
use paramforge_core::signature::compute_signature;
use paramforge_engine::{
    DeviceRef, Engine, EngineConfig, InMemoryMappingStore, LearnMode, LearnRequest, MappingStore,
    ResolveOptions, SimulatedDevice, TargetValue,
};
use rstest::rstest;
use std::sync::Arc;

fn at() -> DeviceRef {
    DeviceRef::new(0, 3)
}

fn engine(sim: SimulatedDevice) -> Engine<SimulatedDevice> {
    engine_with_store(sim, Arc::new(InMemoryMappingStore::new()))
}

fn engine_with_store(
    sim: SimulatedDevice,
    store: Arc<InMemoryMappingStore>,
) -> Engine<SimulatedDevice> {
    let config = EngineConfig {
        settle_ms: 0,
        ..EngineConfig::default()
    };
    Engine::new(Arc::new(sim), store, config)
}

const ALGORITHMS: &[&str] = &["Hall", "Room", "Plate", "Spring", "Chamber"];

fn selector() -> SimulatedDevice {
    SimulatedDevice::new(at(), "JS: Reverb Selector").with_labels("Algorithm", 0.0, ALGORITHMS)
}

fn amp() -> SimulatedDevice {
    SimulatedDevice::new(at(), "JS: Amp")
        .with_param("Drive", 0.1, |x| format!("{:.3} dB", 10.0 * x * x))
        .with_labels("Voicing", 0.0, &["Clean", "Crunch", "Lead"])
        .with_param("Cliff", 0.0, |x| {
            (if x < 0.5 { "0.0 dB" } else { "10.0 dB" }).to_string()
        })
}

fn naive(lo: f64, hi: f64) -> ResolveOptions {
    ResolveOptions {
        naive_display_bounds: Some((lo, hi)),
        ..ResolveOptions::default()
    }
}

#[tokio::test]
async fn test_refinement_corrects_a_linear_guess() {
    let engine = engine(amp());
    let outcome = engine
        .resolve_target(&at(), &"Drive".into(), &TargetValue::Display(2.5), &naive(0.0, 10.0))
        .await
        .unwrap();

    assert!(outcome.converged);
    assert!(outcome.iterations >= 1 && outcome.iterations <= 6);
    assert!(outcome.error_margin.unwrap() <= 0.05);
    assert!((outcome.normalized - 0.5).abs() < 0.01);
    assert_eq!(engine.live().value(0), Some(outcome.normalized));
}

#[tokio::test]
async fn test_without_refinement_the_guess_stands() {
    let engine = engine(amp());
    let options = ResolveOptions {
        refine: false,
        ..naive(0.0, 10.0)
    };
    let outcome = engine
        .resolve_target(&at(), &0.into(), &TargetValue::Display(2.5), &options)
        .await
        .unwrap();
    assert!(!outcome.converged);
    assert_eq!(outcome.iterations, 0);
    assert_eq!(outcome.normalized, 0.25);
    assert_eq!(outcome.applied_value, Some(0.625));
}

#[tokio::test]
async fn test_discontinuous_curve_reports_best_effort() {
    let engine = engine(amp());
    let outcome = engine
        .resolve_target(&at(), &"Cliff".into(), &TargetValue::Display(5.0), &naive(0.0, 10.0))
        .await
        .unwrap();

    assert!(!outcome.converged);
    assert_eq!(outcome.iterations, engine.config().refine_max_iterations);
    assert_eq!(outcome.error_margin, Some(5.0));

    let err = outcome.into_strict().unwrap_err();
    assert_eq!(err.code(), "BISECTION_NON_CONVERGENT");
    assert!(err.is_recoverable());
}

#[tokio::test]
async fn test_learned_mapping_drives_display_and_label_targets() {
    let engine = engine(amp());
    engine
        .learning()
        .learn_now(LearnRequest::new(at(), LearnMode::Exhaustive))
        .await
        .unwrap();

    let options = ResolveOptions::default();
    let drive = engine
        .resolve_target(&at(), &"drive".into(), &TargetValue::Display(6.4), &options)
        .await
        .unwrap();
    assert!(drive.converged);
    assert!((drive.applied_value.unwrap() - 6.4).abs() <= 0.128);

    let voicing = engine
        .resolve_target(
            &at(),
            &"Voicing".into(),
            &TargetValue::Label("crunch".to_string()),
            &ResolveOptions::default(),
        )
        .await
        .unwrap();
    assert!(voicing.converged);
    assert_eq!(voicing.applied_display.as_deref(), Some("Crunch"));
    assert_eq!(voicing.error_margin, Some(0.0));
}

#[tokio::test]
async fn test_quick_learn_finds_every_selector_option() {
    let engine = engine(selector());
    let mapping = engine
        .learning()
        .learn_now(LearnRequest::new(at(), LearnMode::Quick))
        .await
        .unwrap();
    let mut labels = mapping.param(0).unwrap().labels.clone();
    labels.sort();
    let mut expected = ALGORITHMS.to_vec();
    expected.sort();
    assert_eq!(labels, expected);

    let room = engine
        .resolve_target(
            &at(),
            &"Algorithm".into(),
            &TargetValue::Label("Room".to_string()),
            &ResolveOptions::default(),
        )
        .await
        .unwrap();
    assert!(room.converged);
    assert_eq!(room.applied_display.as_deref(), Some("Room"));
}

#[tokio::test]
async fn test_label_missing_from_mapping_is_enumerated() {
    let signature = compute_signature(&["Algorithm"]);
    let partial = ParamMeta::from_samples(
        0,
        "Algorithm",
        0.0,
        1.0,
        &[Sample::new(0.0, "Hall"), Sample::new(0.5, "Plate"), Sample::new(1.0, "Chamber")],
        0.9,
    );
    let store = Arc::new(InMemoryMappingStore::new());
    let stored =
        DeviceMapping::new(signature.as_str(), "reverb", vec![partial], GroupingRuleSet::default());
    store.save(&signature, &stored).unwrap();

    let engine = engine_with_store(selector(), Arc::clone(&store));
    let spring = engine
        .resolve_target(
            &at(),
            &"Algorithm".into(),
            &TargetValue::Label("Spring".to_string()),
            &ResolveOptions::default(),
        )
        .await
        .unwrap();
    assert!(spring.converged);
    assert_eq!(spring.applied_display.as_deref(), Some("Spring"));
    assert_eq!(spring.error_margin, Some(0.0));

    let saved = store.get(&signature).unwrap().unwrap();
    let labels = &saved.param(0).unwrap().labels;
    assert_eq!(labels.len(), 5);
    assert!(labels.iter().any(|l| l == "Room"));

    let unknown = engine
        .resolve_target(
            &at(),
            &"Algorithm".into(),
            &TargetValue::Label("Shimmer".to_string()),
            &ResolveOptions::default(),
        )
        .await
        .unwrap_err();
    assert_eq!(unknown.code(), "INVALID_PARAMETER");
}

#[tokio::test]
async fn test_restore_puts_the_original_value_back() {
    let engine = engine(amp());
    let options = ResolveOptions {
        restore: true,
        ..naive(0.0, 10.0)
    };
    let outcome = engine
        .resolve_target(&at(), &"Drive".into(), &TargetValue::Display(2.5), &options)
        .await
        .unwrap();

    assert!(outcome.restored);
    assert!(outcome.converged);
    assert_eq!(engine.live().value(0), Some(0.1));
}

#[rstest]
#[case::display(TargetValue::Display(2.5), "NO_MAPPING_AVAILABLE")]
#[case::label(TargetValue::Label("Lead".to_string()), "NO_MAPPING_AVAILABLE")]
#[tokio::test]
async fn test_targets_without_mapping(#[case] target: TargetValue, #[case] code: &str) {
    let engine = engine(amp());
    let err = engine
        .resolve_target(&at(), &"Drive".into(), &target, &ResolveOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.code(), code);
}

#[tokio::test]
async fn test_normalized_target_needs_no_mapping() {
    let engine = engine(amp());
    let half = TargetValue::Normalized(0.5);
    let outcome = engine
        .resolve_target(&at(), &"Drive".into(), &half, &ResolveOptions::default())
        .await
        .unwrap();
    assert!(outcome.converged);
    assert_eq!(outcome.applied_display.as_deref(), Some("2.500 dB"));
    assert_eq!(outcome.error_margin, Some(0.0));
}

#[tokio::test]
async fn test_unlearned_param_in_existing_mapping() {
    let engine = engine(amp());
    engine
        .learning()
        .learn_now(LearnRequest::new(at(), LearnMode::Quick).with_params(vec!["Voicing".into()]))
        .await
        .unwrap();

    let target = TargetValue::Display(2.5);
    let err = engine
        .resolve_target(&at(), &"Drive".into(), &target, &ResolveOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INSUFFICIENT_SAMPLES");
}

#[tokio::test]
async fn test_unknown_device_and_param() {
    let engine = engine(amp());
    let err = engine
        .resolve_target(
            &DeviceRef::new(9, 9),
            &"Drive".into(),
            &TargetValue::Normalized(0.5),
            &ResolveOptions::default(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "DEVICE_NOT_FOUND");

    let target = TargetValue::Normalized(0.5);
    let err = engine
        .resolve_target(&at(), &"Tone".into(), &target, &ResolveOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "PARAMETER_NOT_FOUND");
}
