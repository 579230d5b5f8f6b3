use std::{collections::BTreeMap, fmt, sync::Arc};

use url::Url;

use super::url::manifest_base_url;
use crate::{
    error::{WtError, WtResult},
    util::http::HttpClient,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentType {
    Video,
    Audio,
    Text,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Text => "text",
        }
    }

    /// Accepts both `contentType` values (`video`) and mime types (`video/mp4`).
    fn from_attribute(value: &str) -> Option<Self> {
        if value.starts_with("video") {
            Some(Self::Video)
        } else if value.starts_with("audio") {
            Some(Self::Audio)
        } else if value.starts_with("text") {
            Some(Self::Text)
        } else {
            None
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One encoding of an adaptation set, a `Representation` in the manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variant {
    pub id: u64,
    /// Bits per second, substituted for `$Bandwidth$`.
    pub bandwidth: u64,
    pub width: Option<u64>,
    pub height: Option<u64>,
    pub frame_rate: Option<String>,
    pub codecs: Option<String>,
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentTemplate {
    pub initialization: String,
    pub media: String,
    /// Ticks per second.
    pub timescale: u64,
}

/// First entry of the segment timeline.
///
/// Segments are assumed to have a constant duration, later `S` entries and
/// repeat counts are not consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentTimeline {
    /// Timestamp of the newest published segment when the manifest was fetched.
    pub start: u64,
    /// Ticks per segment.
    pub duration: u64,
}

#[derive(Debug, Clone)]
pub struct AdaptationSet {
    pub id: String,
    pub content_type: ContentType,
    pub language: Option<String>,
    pub variants: BTreeMap<u64, Variant>,
    pub segment_template: SegmentTemplate,
    pub segment_timeline: SegmentTimeline,
}

impl AdaptationSet {
    pub fn variant(&self, id: u64) -> Option<&Variant> {
        self.variants.get(&id)
    }

    /// Variant with the lowest id. Manifests list the lowest quality first.
    pub fn lowest_variant(&self) -> Option<&Variant> {
        self.variants.values().next()
    }

    /// Variant with the greatest bandwidth not exceeding `max_bitrate`, or the
    /// one with the smallest bandwidth if nothing fits. Ties go to the lowest id.
    pub fn variant_within_bitrate(&self, max_bitrate: u64) -> Option<&Variant> {
        self.variants
            .values()
            .filter(|v| v.bandwidth <= max_bitrate)
            .max_by(|a, b| a.bandwidth.cmp(&b.bandwidth).then(b.id.cmp(&a.id)))
            .or_else(|| self.variants.values().min_by_key(|v| (v.bandwidth, v.id)))
    }
}

/// A parsed manifest. Only the first period is kept.
#[derive(Debug, Clone)]
pub struct ManifestModel {
    pub base_url: Url,
    pub adaptation_sets: Vec<Arc<AdaptationSet>>,
}

impl ManifestModel {
    /// First adaptation set in document order matching the content type and,
    /// if given, the language (compared exactly).
    pub fn select_adaptation_set(
        &self,
        content_type: ContentType,
        language: Option<&str>,
    ) -> Option<&Arc<AdaptationSet>> {
        self.adaptation_sets.iter().find(|set| {
            set.content_type == content_type
                && language.map_or(true, |lang| set.language.as_deref() == Some(lang))
        })
    }

    pub fn video(&self) -> Option<&Arc<AdaptationSet>> {
        self.select_adaptation_set(ContentType::Video, None)
    }

    pub fn audio(&self, language: Option<&str>) -> Option<&Arc<AdaptationSet>> {
        self.select_adaptation_set(ContentType::Audio, language)
    }

    pub fn text(&self, language: Option<&str>) -> Option<&Arc<AdaptationSet>> {
        self.select_adaptation_set(ContentType::Text, language)
    }

    /// Languages of all adaptation sets of a content type, in document order.
    pub fn list_languages(&self, content_type: ContentType) -> Vec<&str> {
        self.adaptation_sets
            .iter()
            .filter(|set| set.content_type == content_type)
            .filter_map(|set| set.language.as_deref())
            .collect()
    }
}

pub async fn fetch_manifest(client: &HttpClient, manifest_url: &Url) -> WtResult<ManifestModel> {
    let response = client
        .get(manifest_url.clone())
        .header("Accept", "application/dash+xml,video/vnd.mpeg.dash.mpd")
        .send()
        .await?;
    if !response.status().is_success() {
        return Err(WtError::HttpError(response.status()));
    }
    let bytes = response.bytes().await?;

    let manifest = parse_manifest(&bytes, manifest_base_url(manifest_url)?)?;
    tracing::info!(
        url = %manifest_url,
        adaptation_sets = manifest.adaptation_sets.len(),
        "Manifest fetched"
    );
    Ok(manifest)
}

pub fn parse_manifest(document: &[u8], base_url: Url) -> WtResult<ManifestModel> {
    let text = std::str::from_utf8(document)
        .map_err(|e| WtError::invalid_manifest(format!("document is not UTF-8: {e}")))?;
    let mpd = dash_mpd::parse(text)?;

    let period = mpd
        .periods
        .first()
        .ok_or_else(|| WtError::invalid_manifest("no Period"))?;
    if period.adaptations.is_empty() {
        return Err(WtError::invalid_manifest("no AdaptationSet"));
    }

    let mut adaptation_sets = Vec::with_capacity(period.adaptations.len());
    for (index, adaptation) in period.adaptations.iter().enumerate() {
        if let Some(set) = parse_adaptation_set(index, adaptation)? {
            adaptation_sets.push(Arc::new(set));
        }
    }

    if adaptation_sets.is_empty() {
        return Err(WtError::invalid_manifest("no supported AdaptationSet"));
    }

    Ok(ManifestModel {
        base_url,
        adaptation_sets,
    })
}

fn parse_adaptation_set(
    index: usize,
    adaptation: &dash_mpd::AdaptationSet,
) -> WtResult<Option<AdaptationSet>> {
    let content_type = adaptation
        .contentType
        .as_deref()
        .or(adaptation.mimeType.as_deref())
        .ok_or_else(|| {
            WtError::invalid_manifest(format!("AdaptationSet #{index} has no contentType"))
        })?;
    let Some(content_type) = ContentType::from_attribute(content_type) else {
        tracing::debug!("Skipping AdaptationSet #{index} with content type {content_type}");
        return Ok(None);
    };
    let id = adaptation.id.clone().unwrap_or_else(|| index.to_string());

    let mut variants = BTreeMap::new();
    for representation in adaptation.representations.iter() {
        let variant = parse_variant(&id, representation)?;
        if variants.contains_key(&variant.id) {
            return Err(WtError::invalid_manifest(format!(
                "AdaptationSet {id} has duplicate Representation {}",
                variant.id
            )));
        }
        variants.insert(variant.id, variant);
    }
    if variants.is_empty() {
        return Err(WtError::invalid_manifest(format!(
            "AdaptationSet {id} has no Representation"
        )));
    }

    let template = adaptation
        .SegmentTemplate
        .as_ref()
        .or_else(|| {
            adaptation
                .representations
                .iter()
                .find_map(|r| r.SegmentTemplate.as_ref())
        })
        .ok_or_else(|| {
            WtError::invalid_manifest(format!("AdaptationSet {id} has no SegmentTemplate"))
        })?;
    let missing = |what: &str| WtError::invalid_manifest(format!("AdaptationSet {id}: missing {what}"));

    let timescale = template.timescale.ok_or_else(|| missing("@timescale"))?;
    if timescale == 0 {
        return Err(missing("non-zero @timescale"));
    }
    let segment_template = SegmentTemplate {
        initialization: template
            .initialization
            .clone()
            .ok_or_else(|| missing("@initialization"))?,
        media: template.media.clone().ok_or_else(|| missing("@media"))?,
        timescale,
    };

    let first = template
        .SegmentTimeline
        .as_ref()
        .ok_or_else(|| missing("SegmentTimeline"))?
        .segments
        .first()
        .ok_or_else(|| missing("SegmentTimeline/S"))?;
    let segment_timeline = SegmentTimeline {
        start: first.t.ok_or_else(|| missing("S@t"))?,
        duration: first.d,
    };
    if segment_timeline.duration == 0 {
        return Err(missing("non-zero S@d"));
    }

    Ok(Some(AdaptationSet {
        id,
        content_type,
        language: adaptation.lang.clone(),
        variants,
        segment_template,
        segment_timeline,
    }))
}

fn parse_variant(set_id: &str, representation: &dash_mpd::Representation) -> WtResult<Variant> {
    let id = representation
        .id
        .as_deref()
        .and_then(|id| id.parse::<u64>().ok())
        .ok_or_else(|| {
            WtError::invalid_manifest(format!(
                "AdaptationSet {set_id}: Representation without numeric @id"
            ))
        })?;
    let bandwidth = representation.bandwidth.ok_or_else(|| {
        WtError::invalid_manifest(format!(
            "AdaptationSet {set_id}: Representation {id} has no @bandwidth"
        ))
    })?;

    Ok(Variant {
        id,
        bandwidth,
        width: representation.width,
        height: representation.height,
        frame_rate: representation.frameRate.clone(),
        codecs: representation.codecs.clone(),
        mime_type: representation.mimeType.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<MPD xmlns="urn:mpeg:dash:schema:mpd:2011" type="dynamic" minBufferTime="PT4S" profiles="urn:mpeg:dash:profile:isoff-live:2011">
  <Period id="1" start="PT0S">
    <AdaptationSet id="1" contentType="video" mimeType="video/mp4">
      <SegmentTemplate timescale="1000" initialization="$Bandwidth$/init.mp4" media="$Bandwidth$/t_$Time$.m4s">
        <SegmentTimeline><S t="1000000000000" d="4000"/></SegmentTimeline>
      </SegmentTemplate>
      <Representation id="2" bandwidth="2800000" width="1280" height="720" frameRate="25"/>
      <Representation id="1" bandwidth="250000" width="400" height="224" frameRate="25/2"/>
    </AdaptationSet>
    <AdaptationSet id="2" contentType="audio" lang="de" mimeType="audio/mp4">
      <SegmentTemplate timescale="48000" initialization="audio/$Bandwidth$/init.mp4" media="audio/$Bandwidth$/t_$Time$.m4s">
        <SegmentTimeline><S t="48000000000000" d="192000"/></SegmentTimeline>
      </SegmentTemplate>
      <Representation id="10" bandwidth="128000"/>
    </AdaptationSet>
    <AdaptationSet id="3" contentType="audio" lang="fr" mimeType="audio/mp4">
      <SegmentTemplate timescale="48000" initialization="fr/$Bandwidth$/init.mp4" media="fr/$Bandwidth$/t_$Time$.m4s">
        <SegmentTimeline><S t="48000000000000" d="192000"/></SegmentTimeline>
      </SegmentTemplate>
      <Representation id="11" bandwidth="96000"/>
    </AdaptationSet>
  </Period>
</MPD>"#;

    fn base() -> Url {
        Url::parse("https://cdn.example.com/live/").unwrap()
    }

    #[test]
    fn test_parse_manifest() {
        let manifest = parse_manifest(MANIFEST.as_bytes(), base()).unwrap();
        assert_eq!(manifest.adaptation_sets.len(), 3);

        let video = manifest.video().unwrap();
        assert_eq!(video.id, "1");
        assert_eq!(video.language, None);
        assert_eq!(video.segment_template.timescale, 1000);
        assert_eq!(video.segment_timeline.start, 1000000000000);
        assert_eq!(video.segment_timeline.duration, 4000);
        assert_eq!(video.variants.len(), 2);
        assert_eq!(video.lowest_variant().unwrap().id, 1);
        assert_eq!(video.variant(2).unwrap().width, Some(1280));
    }

    #[test]
    fn test_select_adaptation_set_by_language() {
        let manifest = parse_manifest(MANIFEST.as_bytes(), base()).unwrap();
        assert_eq!(manifest.audio(None).unwrap().id, "2");
        assert_eq!(manifest.audio(Some("fr")).unwrap().id, "3");
        assert!(manifest.audio(Some("FR")).is_none());
        assert!(manifest.text(None).is_none());
        assert_eq!(manifest.list_languages(ContentType::Audio), vec!["de", "fr"]);
    }

    #[test]
    fn test_list_languages_keeps_duplicates() {
        let document = MANIFEST.replace(r#"lang="fr""#, r#"lang="de""#);
        let manifest = parse_manifest(document.as_bytes(), base()).unwrap();
        assert_eq!(manifest.list_languages(ContentType::Audio), vec!["de", "de"]);
        // the first match in document order wins
        assert_eq!(manifest.audio(Some("de")).unwrap().id, "2");
    }

    #[test]
    fn test_only_unsupported_content_types() {
        let document = MANIFEST
            .replace(r#"contentType="video" mimeType="video/mp4""#, r#"contentType="image" mimeType="image/jpeg""#)
            .replace(r#"contentType="audio""#, r#"contentType="image""#);
        let result = parse_manifest(document.as_bytes(), base());
        assert!(matches!(result, Err(WtError::InvalidManifest(_))));
    }

    #[test]
    fn test_duplicate_representation_id() {
        let document = MANIFEST.replace(r#"<Representation id="1" "#, r#"<Representation id="2" "#);
        let result = parse_manifest(document.as_bytes(), base());
        assert!(matches!(result, Err(WtError::InvalidManifest(_))));
    }

    #[test]
    fn test_variant_within_bitrate() {
        let manifest = parse_manifest(MANIFEST.as_bytes(), base()).unwrap();
        let video = manifest.video().unwrap();
        assert_eq!(video.variant_within_bitrate(1_000_000).unwrap().id, 1);
        assert_eq!(video.variant_within_bitrate(2_800_000).unwrap().id, 2);
        assert_eq!(video.variant_within_bitrate(u64::MAX).unwrap().id, 2);
        // nothing fits: fall back to the smallest variant
        assert_eq!(video.variant_within_bitrate(1000).unwrap().id, 1);
    }

    #[test]
    fn test_variant_within_bitrate_tie() {
        let manifest = parse_manifest(MANIFEST.as_bytes(), base()).unwrap();
        let mut video = (**manifest.video().unwrap()).clone();
        let mut twin = video.variant(2).unwrap().clone();
        twin.id = 7;
        video.variants.insert(7, twin);
        assert_eq!(video.variant_within_bitrate(3_000_000).unwrap().id, 2);
    }

    #[test]
    fn test_missing_timeline() {
        let document = MANIFEST.replace(r#"<SegmentTimeline><S t="1000000000000" d="4000"/></SegmentTimeline>"#, "");
        let result = parse_manifest(document.as_bytes(), base());
        assert!(matches!(result, Err(WtError::InvalidManifest(_))));
    }

    #[test]
    fn test_missing_timescale() {
        let document = MANIFEST.replace(r#"timescale="1000" "#, "");
        let result = parse_manifest(document.as_bytes(), base());
        assert!(matches!(result, Err(WtError::InvalidManifest(_))));
    }

    #[test]
    fn test_not_xml() {
        let result = parse_manifest(b"this is not a manifest", base());
        assert!(result.is_err());
    }

    #[test]
    fn test_non_numeric_representation_id() {
        let document = MANIFEST.replace(r#"<Representation id="10""#, r#"<Representation id="audio=128000""#);
        let result = parse_manifest(document.as_bytes(), base());
        assert!(matches!(result, Err(WtError::InvalidManifest(_))));
    }
}
