//! Device parameter mapping and calibration.
//!
//! Pure, host-independent pieces: display parsing, classification, curve
//! fitting and inversion, grouping rules and the persisted mapping model.

pub mod classifier;
pub mod device_type;
pub mod display;
pub mod fit;
pub mod grouping;
pub mod invert;
pub mod mapping;
pub mod resolver;
pub mod sample;
pub mod signature;

pub use classifier::{build_label_map, classify, Classification, ControlType};
pub use device_type::{detect_device_type, DeviceTypeRule, UNKNOWN_DEVICE_TYPE};
pub use display::{infer_unit, normalize_token, parse_display_number};
pub use fit::{fit, fit_with_threshold, Fit, DEFAULT_ACCEPT_R2};
pub use grouping::{classify_relationships, GroupingRuleSet, DEFAULT_ACTIVE_THRESHOLD};
pub use invert::{invert, invert_label, refinement_tolerance, Bisection};
pub use mapping::{build_sections, DeviceMapping, ParamMeta};
pub use resolver::{resolve_param, ParamRef, ParamResolution};
pub use sample::{Sample, SampleStore};
pub use signature::compute_signature;
