use paramforge_core::classifier::{classify, ControlType};
use paramforge_core::fit::{fit, Fit};
use paramforge_core::invert::invert;
use paramforge_core::sample::Sample;
use paramforge_core::signature::compute_signature;
use proptest::prelude::*;

prop_compose! {
    fn param_names()(
        names in prop::collection::vec("[A-Za-z][A-Za-z ]{0,11}", 0..12)
    ) -> Vec<String> {
        names
    }
}

prop_compose! {
    // Strictly monotonic closed-form curves over [0, 1].
    fn closed_form()(
        kind in 0u8..3,
        a in prop_oneof![-50.0f64..-0.5, 0.5f64..50.0],
        b in -20.0f64..20.0,
        rate in prop_oneof![-4.0f64..-0.5, 0.5f64..4.0],
        scale in 0.05f64..10.0,
    ) -> Fit {
        match kind {
            0 => Fit::Linear { a, b, r2: 1.0 },
            1 => Fit::Log { a, b, r2: 1.0 },
            _ => Fit::Exp { a: scale, b: rate, r2: 1.0 },
        }
    }
}

proptest! {
    #[test]
    fn signature_is_stable(names in param_names()) {
        let again = names.clone();
        prop_assert_eq!(compute_signature(&names), compute_signature(&again));
        prop_assert_eq!(compute_signature(&names).len(), 32);
    }

    #[test]
    fn signature_changes_when_a_name_is_appended(names in param_names()) {
        let mut longer = names.clone();
        longer.push("Extra".to_string());
        prop_assert_ne!(compute_signature(&names), compute_signature(&longer));
    }

    #[test]
    fn classification_is_deterministic(
        pairs in prop::collection::vec(
            (0.0f64..=1.0, prop_oneof!["[0-9]{1,3} dB", "Hall|Room|Plate|Spring"]),
            0..20,
        )
    ) {
        let samples: Vec<Sample> = pairs.iter().map(|(x, d)| Sample::new(*x, d.as_str())).collect();
        prop_assert_eq!(classify(&samples, 0.0, 1.0), classify(&samples, 0.0, 1.0));
    }

    #[test]
    fn two_distinct_displays_are_binary(
        xs in prop::collection::vec(0.0f64..=1.0, 2..16),
        flip in prop::collection::vec(any::<bool>(), 16),
    ) {
        let samples: Vec<Sample> = xs
            .iter()
            .zip(&flip)
            .map(|(x, on)| Sample::new(*x, if *on { "On" } else { "Off" }))
            .collect();
        prop_assert_eq!(classify(&samples, 0.0, 1.0).control_type, ControlType::Binary);
    }

    #[test]
    fn inversion_round_trips_within_two_percent(fit in closed_form(), x in 0.01f64..=1.0) {
        let target = fit.evaluate(x);
        prop_assume!(target.is_finite());
        let back = invert(&fit, target, 0.0, 1.0);
        let readback = fit.evaluate(back);
        let tolerance = (0.02 * target.abs()).max(0.02);
        prop_assert!(
            (readback - target).abs() <= tolerance,
            "target {} readback {}",
            target,
            readback
        );
    }

    #[test]
    fn piecewise_points_are_sorted_and_unique(
        points in prop::collection::vec((0.0f64..=1.0, -100.0f64..100.0), 0..24)
    ) {
        if let Fit::Piecewise { points, .. } = fit(&points) {
            prop_assert!(points.windows(2).all(|w| w[0].0 < w[1].0));
        }
    }
}
