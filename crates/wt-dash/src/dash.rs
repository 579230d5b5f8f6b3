pub mod manifest;
pub mod template;
pub mod url;

pub use manifest::{
    fetch_manifest, parse_manifest, AdaptationSet, ContentType, ManifestModel, SegmentTemplate,
    SegmentTimeline, Variant,
};
