//! Device-type detection as data.
//!
//! Rules are evaluated in order; the first match wins. Adding a device type
//! means adding a row, not a branch.
//!
//! Keywords match the start of a whole word (see [`words`]), so "amp" finds
//! "Amp" and "Amplifier" but not "Sample".

use crate::display::words;

pub const UNKNOWN_DEVICE_TYPE: &str = "unknown";

#[derive(Debug, Clone, Copy)]
pub struct DeviceTypeRule {
    pub device_type: &'static str,
    /// Any one found in the device name is enough.
    pub name_keywords: &'static [&'static str],
    /// All must be found among the parameter names. An empty list disables
    /// matching by parameters.
    pub required_params: &'static [&'static str],
}

fn has_keyword(words: &[String], keyword: &str) -> bool {
    words.iter().any(|w| w.starts_with(keyword))
}

impl DeviceTypeRule {
    pub fn matches<S: AsRef<str>>(&self, device_name: &str, param_names: &[S]) -> bool {
        let name_words = words(device_name);
        if self.name_keywords.iter().any(|k| has_keyword(&name_words, k)) {
            return true;
        }
        if self.required_params.is_empty() {
            return false;
        }
        let param_words: Vec<String> = param_names.iter().flat_map(|p| words(p.as_ref())).collect();
        self.required_params
            .iter()
            .all(|required| has_keyword(&param_words, required))
    }
}

pub static DEVICE_TYPE_RULES: &[DeviceTypeRule] = &[
    DeviceTypeRule {
        device_type: "reverb",
        name_keywords: &["reverb", "verb", "hall", "plate", "room"],
        required_params: &["decay", "pre"],
    },
    DeviceTypeRule {
        device_type: "delay",
        name_keywords: &["delay", "echo"],
        required_params: &["feedback", "time"],
    },
    DeviceTypeRule {
        device_type: "chorus",
        name_keywords: &["chorus", "ensemble"],
        required_params: &["rate", "depth", "chorus"],
    },
    DeviceTypeRule {
        device_type: "compressor",
        name_keywords: &["comp", "limit", "leveler"],
        required_params: &["threshold", "ratio", "attack", "release"],
    },
    DeviceTypeRule {
        device_type: "gate",
        name_keywords: &["gate"],
        required_params: &["threshold", "hold"],
    },
    DeviceTypeRule {
        device_type: "eq",
        name_keywords: &["eq", "equalizer"],
        required_params: &["band", "freq", "gain"],
    },
    DeviceTypeRule {
        device_type: "amp",
        name_keywords: &["amp", "archetype", "drive", "dist"],
        required_params: &["gain", "bass", "treble"],
    },
];

/// Classify a device with the built-in rule table.
pub fn detect_device_type<S: AsRef<str>>(device_name: &str, param_names: &[S]) -> String {
    detect_with_rules(DEVICE_TYPE_RULES, device_name, param_names)
}

pub fn detect_with_rules<S: AsRef<str>>(
    rules: &[DeviceTypeRule],
    device_name: &str,
    param_names: &[S],
) -> String {
    rules
        .iter()
        .find(|rule| rule.matches(device_name, param_names))
        .map(|rule| rule.device_type.to_string())
        .unwrap_or_else(|| UNKNOWN_DEVICE_TYPE.to_string())
}
