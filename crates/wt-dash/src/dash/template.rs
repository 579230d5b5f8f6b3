// Only `$Bandwidth$` and `$Time$` are substituted, optionally with the
// `%0[width]d` format tag DASH-IF IOP allows. Other identifiers such as
// `$Number$` or `$RepresentationID$` are left untouched.

use regex::{Regex, Replacer};
use std::{collections::HashMap, sync::LazyLock};
use url::Url;

use super::url::merge_baseurls;
use crate::error::WtResult;

// Example template: "$Bandwidth$/t$Time%012d$.m4s"
static TEMPLATE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$(Time|Bandwidth)(?:%0([\d])d)?\$").unwrap());

pub struct Template<'a> {
    args: HashMap<&'a str, String>,
}

impl Template<'_> {
    pub const TIME: &'static str = "Time";
    pub const BANDWIDTH: &'static str = "Bandwidth";

    pub fn new() -> Self {
        Self {
            args: HashMap::with_capacity(2),
        }
    }

    pub fn insert(&mut self, key: &'static str, value: String) {
        self.args.insert(key, value);
    }

    pub fn resolve(&self, template: &str) -> String {
        TEMPLATE_REGEX
            .replace_all(template, TemplateReplacer(&self.args))
            .to_string()
    }
}

impl Default for Template<'_> {
    fn default() -> Self {
        Self::new()
    }
}

struct TemplateReplacer<'a>(&'a HashMap<&'a str, String>);

impl Replacer for TemplateReplacer<'_> {
    fn replace_append(&mut self, caps: &regex::Captures<'_>, dst: &mut String) {
        let Some(value) = self.0.get(&caps[1]) else {
            dst.push_str(&caps[0]);
            return;
        };

        match caps.get(2).and_then(|m| m.as_str().parse::<usize>().ok()) {
            Some(width) => dst.push_str(&format!("{value:0>width$}")),
            None => dst.push_str(value),
        }
    }
}

/// URL of the initialization segment of a variant.
pub fn build_init_url(base_url: &Url, pattern: &str, bandwidth: u64) -> WtResult<Url> {
    let mut template = Template::new();
    template.insert(Template::BANDWIDTH, bandwidth.to_string());
    merge_baseurls(base_url, &template.resolve(pattern))
}

/// URL of the media segment of a variant starting at `time` ticks.
pub fn build_segment_url(base_url: &Url, pattern: &str, bandwidth: u64, time: u64) -> WtResult<Url> {
    let mut template = Template::new();
    template.insert(Template::BANDWIDTH, bandwidth.to_string());
    template.insert(Template::TIME, time.to_string());
    merge_baseurls(base_url, &template.resolve(pattern))
}
